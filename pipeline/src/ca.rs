//! Certificate-authority stages: the private key, the public certificate,
//! and the trust-bundle merge.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use models::CertConfig;
use tracing::info;

use crate::errors::{Error, Step};
use crate::{abs_arg, backup_artifact, dependency_check, latest, request_cnf, run_signer};
use crate::context::PipelineContext;

/// Generate the CA's encrypted private key.
///
/// An existing key is never overwritten without `force`; regeneration
/// invalidates every certificate the old key signed.
pub fn generate_ca_key(ctx: &PipelineContext, force: bool) -> Result<PathBuf, Error> {
    let cfg = ctx.config();
    utilities::ensure_private_dir(&cfg.dir).map_err(Error::io_at(&cfg.dir))?;

    let ca_key = cfg.ca_key_path();
    if !force && ca_key.exists() {
        return Err(Error::RefusingOverwrite { path: ca_key });
    }
    let password = ctx.require_password()?;

    info!("generating the CA private key: {}", ca_key.display());
    backup_artifact(&ca_key, ctx.depth())?;

    let args = vec![
        "genrsa".to_string(),
        "-passout".to_string(),
        format!("pass:{password}"),
        "-des3".to_string(),
        "-out".to_string(),
        abs_arg(&ca_key)?,
        "4096".to_string(),
    ];
    run_signer(ctx, Step::CaKey, args)?;

    utilities::set_mode(&ca_key, 0o600).map_err(Error::io_at(&ca_key))?;
    Ok(ca_key)
}

/// Generate the self-signed CA certificate and refresh the trust bundle.
pub fn generate_ca_cert(ctx: &PipelineContext, force: bool) -> Result<PathBuf, Error> {
    let cfg = ctx.config();
    utilities::ensure_private_dir(&cfg.dir).map_err(Error::io_at(&cfg.dir))?;

    let ca_key = cfg.ca_key_path();
    let ca_cert = cfg.ca_cert_path();
    if !force && ca_cert.exists() {
        return Err(Error::RefusingOverwrite { path: ca_cert });
    }
    dependency_check(&ca_key)?;
    let password = ctx.require_password()?;

    let cnf = request_cnf::write_ca_request_cnf(cfg, ctx.depth())?;

    info!("generating the public CA certificate: {}", ca_cert.display());
    backup_artifact(&ca_cert, ctx.depth())?;

    let args = vec![
        "req".to_string(),
        "-passin".to_string(),
        format!("pass:{password}"),
        "-text".to_string(),
        "-config".to_string(),
        abs_arg(&cnf)?,
        "-new".to_string(),
        "-x509".to_string(),
        "-days".to_string(),
        cfg.expiration_days.to_string(),
        "-sha256".to_string(),
        "-key".to_string(),
        abs_arg(&ca_key)?,
        "-out".to_string(),
        abs_arg(&ca_cert)?,
    ];
    run_signer(ctx, Step::CaCert, args)?;

    merge_other_ca_certs(cfg)?;

    latest::write_latest(
        &cfg.dir,
        &[models::base_name(&cfg.ca_cert).to_string()],
        0o644,
    )?;
    utilities::set_mode(&ca_cert, 0o644).map_err(Error::io_at(&ca_cert))?;
    Ok(ca_cert)
}

/// Append the configured extra CA certificates to the CA bundle, skipping
/// any whose text is already present. Returns how many were appended.
pub fn merge_other_ca_certs(cfg: &CertConfig) -> Result<usize, Error> {
    if cfg.other_ca_certs.is_empty() {
        return Ok(0);
    }
    let bundle_path = cfg.ca_cert_path();
    let mut bundle =
        fs::read_to_string(&bundle_path).map_err(Error::io_at(&bundle_path))?;

    let mut appended = 0usize;
    for other in &cfg.other_ca_certs {
        dependency_check(other)?;
        let content = fs::read_to_string(other).map_err(Error::io_at(other))?;
        if bundle.contains(&content) {
            continue;
        }
        let mut file = OpenOptions::new()
            .append(true)
            .open(&bundle_path)
            .map_err(Error::io_at(&bundle_path))?;
        file.write_all(content.as_bytes())
            .map_err(Error::io_at(&bundle_path))?;
        bundle.push_str(&content);
        appended += 1;
        info!("merged {} into {}", other.display(), bundle_path.display());
    }
    Ok(appended)
}

//! Per-host server stages: key, certificate request, and the signed
//! certificate.
//!
//! The signing stage also babysits the scratch state the signer's `ca`
//! subcommand keeps beside the CA artifacts (`index.txt`, `serial`) so a
//! re-run always starts from a clean database.

use std::fs;
use std::path::PathBuf;

use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Duration, OffsetDateTime};
use tracing::info;

use crate::context::PipelineContext;
use crate::errors::{Error, Step};
use crate::{abs_arg, backup_artifact, dependency_check, request_cnf, run_signer};

/// Timestamp form the signer's `-startdate` option expects.
const STARTDATE_FORMAT: &[FormatItem<'static>] =
    format_description!("[year repr:last_two][month][day][hour][minute][second]Z");

/// Verify the CA key, CA certificate, and password are all in place.
///
/// The combined generation flow runs this before touching anything, so a
/// run against a missing CA leaves the per-host directory exactly as it
/// was instead of stopping halfway with a fresh key and request.
pub fn check_signing_prerequisites(ctx: &PipelineContext) -> Result<(), Error> {
    let cfg = ctx.config();
    dependency_check(&cfg.ca_key_path())?;
    dependency_check(&cfg.ca_cert_path())?;
    ctx.require_password()?;
    Ok(())
}

/// Generate the server's private key under the per-host directory.
pub fn generate_server_key(ctx: &PipelineContext) -> Result<PathBuf, Error> {
    let cfg = ctx.config();
    let server_dir = cfg.server_dir();
    utilities::ensure_private_dir(&server_dir).map_err(Error::io_at(&server_dir))?;

    let server_key = cfg.server_key_path();
    info!("generating the server private key: {}", server_key.display());
    backup_artifact(&server_key, ctx.depth())?;

    let args = vec![
        "genrsa".to_string(),
        "-out".to_string(),
        abs_arg(&server_key)?,
        "4096".to_string(),
    ];
    run_signer(ctx, Step::ServerKey, args)?;

    utilities::set_mode(&server_key, 0o600).map_err(Error::io_at(&server_key))?;
    Ok(server_key)
}

/// Generate the server's certificate signing request.
pub fn generate_server_cert_req(ctx: &PipelineContext) -> Result<PathBuf, Error> {
    let cfg = ctx.config();
    let server_dir = cfg.server_dir();
    utilities::ensure_private_dir(&server_dir).map_err(Error::io_at(&server_dir))?;

    let server_key = cfg.server_key_path();
    dependency_check(&server_key)?;

    let cnf = request_cnf::write_server_request_cnf(cfg, ctx.depth())?;

    let cert_req = cfg.server_cert_req_path();
    info!(
        "generating the server certificate request: {}",
        cert_req.display()
    );
    backup_artifact(&cert_req, ctx.depth())?;

    let args = vec![
        "req".to_string(),
        "-sha256".to_string(),
        "-text".to_string(),
        "-config".to_string(),
        abs_arg(&cnf)?,
        "-new".to_string(),
        "-key".to_string(),
        abs_arg(&server_key)?,
        "-out".to_string(),
        abs_arg(&cert_req)?,
    ];
    run_signer(ctx, Step::ServerCertReq, args)?;

    utilities::set_mode(&cert_req, 0o600).map_err(Error::io_at(&cert_req))?;
    Ok(cert_req)
}

/// Sign the server's certificate request with the CA key.
pub fn generate_server_cert(ctx: &PipelineContext) -> Result<PathBuf, Error> {
    let cfg = ctx.config();
    let server_dir = cfg.server_dir();
    utilities::ensure_private_dir(&server_dir).map_err(Error::io_at(&server_dir))?;

    let ca_cnf = cfg.ca_request_cnf_path();
    let ca_key = cfg.ca_key_path();
    let ca_cert = cfg.ca_cert_path();
    let cert_req = cfg.server_cert_req_path();
    let server_cert = cfg.server_cert_path();

    dependency_check(&ca_cnf)?;
    dependency_check(&ca_key)?;
    dependency_check(&ca_cert)?;
    dependency_check(&cert_req)?;
    let password = ctx.require_password()?;

    let serial = prepare_signing_state(ctx)?;
    request_cnf::update_ca_dir(cfg)?;

    info!("signing the server certificate: {}", server_cert.display());
    backup_artifact(&server_cert, ctx.depth())?;

    let startdate = (OffsetDateTime::now_utc() - Duration::weeks(1))
        .format(STARTDATE_FORMAT)
        .map_err(|e| Error::InvalidArgument(format!("cannot format the signing start date: {e}")))?;

    let args = vec![
        "ca".to_string(),
        "-extensions".to_string(),
        cfg.purpose.extensions_section().to_string(),
        "-passin".to_string(),
        format!("pass:{password}"),
        "-outdir".to_string(),
        "./".to_string(),
        "-config".to_string(),
        abs_arg(&ca_cnf)?,
        "-in".to_string(),
        abs_arg(&cert_req)?,
        "-batch".to_string(),
        "-cert".to_string(),
        abs_arg(&ca_cert)?,
        "-keyfile".to_string(),
        abs_arg(&ca_key)?,
        "-startdate".to_string(),
        startdate,
        "-days".to_string(),
        cfg.expiration_days.to_string(),
        "-md".to_string(),
        "sha256".to_string(),
        "-out".to_string(),
        abs_arg(&server_cert)?,
    ];
    run_signer(ctx, Step::ServerCert, args)?;

    utilities::set_mode(&server_cert, 0o644).map_err(Error::io_at(&server_cert))?;
    cleanup_signing_state(ctx, &serial)?;
    Ok(server_cert)
}

/// Reset the signer's certificate database and make sure a serial exists.
///
/// Returns the serial value the signer will issue next, used afterwards
/// to drop the duplicate `<SERIAL>.pem` copy it leaves in its outdir.
fn prepare_signing_state(ctx: &PipelineContext) -> Result<String, Error> {
    let cfg = ctx.config();
    let index_txt = cfg.dir.join("index.txt");
    let serial_path = cfg.dir.join("serial");

    match fs::remove_file(&index_txt) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::io_at(&index_txt)(e)),
    }
    fs::write(&index_txt, "").map_err(Error::io_at(&index_txt))?;

    if !serial_path.is_file() {
        fs::write(&serial_path, "01\n").map_err(Error::io_at(&serial_path))?;
    }
    let serial = fs::read_to_string(&serial_path)
        .map_err(Error::io_at(&serial_path))?
        .trim()
        .to_string();
    Ok(serial)
}

/// Drop the `.old` database copies and the duplicate serial-named PEM the
/// signer leaves behind after issuing.
fn cleanup_signing_state(ctx: &PipelineContext, serial: &str) -> Result<(), Error> {
    let cfg = ctx.config();
    for leftover in [
        cfg.dir.join("index.txt.old"),
        cfg.dir.join("serial.old"),
        ctx.scratch_dir()?.join(format!("{}.pem", serial.to_uppercase())),
    ] {
        match fs::remove_file(&leftover) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io_at(&leftover)(e)),
        }
    }
    Ok(())
}

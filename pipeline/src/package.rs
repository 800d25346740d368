//! OS package assembly for the CA certificate and the per-host key set.
//!
//! Package internals are delegated to the external builder; this module
//! only works out the release number, lays out the option list, and
//! verifies the expected archive actually appeared.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::ca::merge_other_ca_certs;
use crate::context::PipelineContext;
use crate::errors::{Error, Step};
use crate::{abs_arg, dependency_check, latest, path_arg, run_external};

/// Version every generated package carries; only the release moves.
pub const PACKAGE_VERSION: &str = "1.0";

const PACKAGE_GROUP: &str = "Applications/System";

/// Removes the hash symlinks the install scripts may have pointed at the
/// packaged certificates once the key set is fully uninstalled.
const POST_UNINSTALL_SCRIPT: &str = "\
if [ \"$1\" = \"0\" ]; then
    find %{cert_dir} -maxdepth 1 -type l ! -exec test -e {} \\; -exec rm -f {} \\; 2>/dev/null
fi
exit 0
";

/// Package the public CA certificate for client installation.
pub fn build_ca_package(ctx: &PipelineContext) -> Result<PathBuf, Error> {
    let cfg = ctx.config();
    utilities::ensure_private_dir(&cfg.dir).map_err(Error::io_at(&cfg.dir))?;

    let ca_cert = cfg.ca_cert_path();
    let ca_cert_name = models::base_name(&cfg.ca_cert);
    dependency_check(&ca_cert)?;
    merge_other_ca_certs(cfg)?;

    let name = cfg.package.ca_package.clone();
    let release = next_release(&cfg.dir, &name)?;
    let stem = format!("{name}-{PACKAGE_VERSION}-{release}");
    info!("generating the CA certificate package: {stem}.noarch.rpm");

    let mut args = builder_common_args(
        &name,
        release,
        &cfg.package.packager,
        &cfg.package.vendor,
        models::CA_PACKAGE_SUMMARY,
        models::CA_PACKAGE_SUMMARY,
    );
    args.push(format!(
        "{}/{}={}",
        path_arg(&cfg.package.ca_install_dir),
        ca_cert_name,
        abs_arg(&ca_cert)?,
    ));
    run_external(Step::CaPackage, &cfg.package_builder, args, &cfg.dir)?;

    let package = cfg.dir.join(format!("{stem}.noarch.rpm"));
    if !package.is_file() {
        return Err(Error::MissingArtifact {
            step: Step::CaPackage,
            path: package,
        });
    }
    utilities::set_mode(&package, 0o644).map_err(Error::io_at(&package))?;

    latest::write_latest(
        &cfg.dir,
        &[
            ca_cert_name.to_string(),
            format!("{stem}.noarch.rpm"),
            format!("{stem}.src.rpm"),
        ],
        0o644,
    )?;
    Ok(package)
}

/// Package the server's key, request, and certificate for deployment on
/// the target host.
pub fn build_server_package(ctx: &PipelineContext) -> Result<PathBuf, Error> {
    let cfg = ctx.config();
    let server_dir = cfg.server_dir();
    utilities::ensure_private_dir(&server_dir).map_err(Error::io_at(&server_dir))?;

    let server_key = cfg.server_key_path();
    let cert_req = cfg.server_cert_req_path();
    let server_cert = cfg.server_cert_path();
    dependency_check(&server_key)?;
    dependency_check(&cert_req)?;
    dependency_check(&server_cert)?;

    let name = cfg.package.server_package(&cfg.hostname);
    let release = next_release(&server_dir, &name)?;
    let stem = format!("{name}-{PACKAGE_VERSION}-{release}");
    info!("generating the server key set package: {stem}.noarch.rpm");

    let description = format!(
        "{}\nThis package should only be installed on the host it was \
         generated for: {}",
        models::SERVER_PACKAGE_SUMMARY,
        cfg.hostname,
    );

    let postun = cfg.dir.join("postun.scriptlet");
    let scriptlet = POST_UNINSTALL_SCRIPT.replace(
        "%{cert_dir}",
        &path_arg(&cfg.package.server_install_dir.join("certs")),
    );
    fs::write(&postun, scriptlet).map_err(Error::io_at(&postun))?;

    let install_dir = &cfg.package.server_install_dir;
    let mut args = builder_common_args(
        &name,
        release,
        &cfg.package.packager,
        &cfg.package.vendor,
        models::SERVER_PACKAGE_SUMMARY,
        &description,
    );
    args.push("--postun".to_string());
    args.push(abs_arg(&postun)?);
    args.push(format!(
        "{}/private/{}:0600={}",
        path_arg(install_dir),
        models::base_name(&cfg.server_key),
        abs_arg(&server_key)?,
    ));
    args.push(format!(
        "{}/certs/{}={}",
        path_arg(install_dir),
        models::base_name(&cfg.server_cert_req),
        abs_arg(&cert_req)?,
    ));
    args.push(format!(
        "{}/certs/{}={}",
        path_arg(install_dir),
        models::base_name(&cfg.server_cert),
        abs_arg(&server_cert)?,
    ));

    let result = run_external(Step::ServerPackage, &cfg.package_builder, args, &server_dir);
    let _ = fs::remove_file(&postun);
    result?;

    let package = server_dir.join(format!("{stem}.noarch.rpm"));
    if !package.is_file() {
        return Err(Error::MissingArtifact {
            step: Step::ServerPackage,
            path: package,
        });
    }
    utilities::set_mode(&package, 0o600).map_err(Error::io_at(&package))?;

    latest::write_latest(
        &server_dir,
        &[format!("{stem}.noarch.rpm"), format!("{stem}.src.rpm")],
        0o600,
    )?;
    Ok(package)
}

fn builder_common_args(
    name: &str,
    release: u32,
    packager: &str,
    vendor: &str,
    summary: &str,
    description: &str,
) -> Vec<String> {
    vec![
        "--name".to_string(),
        name.to_string(),
        "--version".to_string(),
        PACKAGE_VERSION.to_string(),
        "--release".to_string(),
        release.to_string(),
        "--packager".to_string(),
        packager.to_string(),
        "--vendor".to_string(),
        vendor.to_string(),
        "--group".to_string(),
        PACKAGE_GROUP.to_string(),
        "--summary".to_string(),
        summary.to_string(),
        "--description".to_string(),
        description.to_string(),
    ]
}

/// Next release number for a package, derived from the archive file names
/// already in the output directory. Deliberately filename-based; package
/// header introspection is out of scope.
pub fn next_release(dir: &Path, name: &str) -> Result<u32, Error> {
    let prefix = format!("{name}-{PACKAGE_VERSION}-");
    let mut newest = 0u32;
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(1),
        Err(e) => return Err(Error::io_at(dir)(e)),
    };
    for entry in entries {
        let entry = entry.map_err(Error::io_at(dir))?;
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            continue;
        };
        let Some(rest) = file_name.strip_prefix(&prefix) else {
            continue;
        };
        let Some(release) = rest.strip_suffix(".noarch.rpm") else {
            continue;
        };
        if let Ok(n) = release.parse::<u32>() {
            newest = newest.max(n);
        }
    }
    Ok(newest + 1)
}

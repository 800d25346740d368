//! Signer request-configuration files rendered from the typed config.
//!
//! The CA variant carries the `[ ca ]` machinery the signer's `ca`
//! subcommand needs (database, serial, policy) on top of the request
//! sections; the server variant only needs the request sections. Both
//! are regenerated from the configuration whenever their step runs, with
//! the previous file rotated into the backup series first.

use std::fs;
use std::path::PathBuf;

use models::{CertConfig, CertPurpose};

use crate::errors::Error;
use crate::{absolute, backup_artifact};
use utilities::RotateDepth;

const GENERATED_BANNER: &str =
    "# Generated by fleetcert from its configuration. Edits are rotated away\n\
     # on the next run; change the fleetcert configuration instead.\n";

/// Write the CA request configuration into the build directory.
pub fn write_ca_request_cnf(config: &CertConfig, depth: RotateDepth) -> Result<PathBuf, Error> {
    let path = config.ca_request_cnf_path();
    let dir = absolute(&config.dir)?;

    let mut text = String::from(GENERATED_BANNER);
    text.push_str("\n[ ca ]\ndefault_ca = CA_default\n");
    text.push_str(&format!(
        "\n[ CA_default ]\n\
         dir             = {dir}\n\
         database        = $dir/index.txt\n\
         serial          = $dir/serial\n\
         new_certs_dir   = .\n\
         certificate     = $dir/{cert}\n\
         private_key     = $dir/{key}\n\
         default_md      = sha256\n\
         unique_subject  = no\n\
         policy          = policy_optional\n",
        dir = dir.display(),
        cert = models::base_name(&config.ca_cert),
        key = models::base_name(&config.ca_key),
    ));
    text.push_str(
        "\n[ policy_optional ]\n\
         countryName             = optional\n\
         stateOrProvinceName     = optional\n\
         localityName            = optional\n\
         organizationName        = optional\n\
         organizationalUnitName  = optional\n\
         commonName              = supplied\n\
         emailAddress            = optional\n",
    );
    push_req_sections(&mut text, config, &config.dn.common_name, "req_ca_x509_extensions");

    write_rotated(&path, &text, depth)
}

/// Write the server request configuration into the per-host directory.
pub fn write_server_request_cnf(
    config: &CertConfig,
    depth: RotateDepth,
) -> Result<PathBuf, Error> {
    let path = config.server_request_cnf_path();
    let mut text = String::from(GENERATED_BANNER);
    push_req_sections(
        &mut text,
        config,
        &config.hostname,
        config.purpose.extensions_section(),
    );
    write_rotated(&path, &text, depth)
}

/// Point the CA configuration's `dir` line at the current build
/// directory, in case the artifact tree moved since the file was written.
pub fn update_ca_dir(config: &CertConfig) -> Result<(), Error> {
    let path = config.ca_request_cnf_path();
    let dir = absolute(&config.dir)?;
    let text = fs::read_to_string(&path).map_err(Error::io_at(&path))?;
    let mut changed = false;
    let updated: Vec<String> = text
        .lines()
        .map(|line| {
            let trimmed = line.trim_start();
            if trimmed.starts_with("dir ") || trimmed.starts_with("dir=") {
                changed = true;
                format!("dir             = {}", dir.display())
            } else {
                line.to_string()
            }
        })
        .collect();
    if changed {
        fs::write(&path, updated.join("\n") + "\n").map_err(Error::io_at(&path))?;
    }
    Ok(())
}

fn push_req_sections(
    text: &mut String,
    config: &CertConfig,
    common_name: &str,
    default_extensions: &str,
) {
    text.push_str(&format!(
        "\n[ req ]\n\
         default_bits        = 4096\n\
         prompt              = no\n\
         distinguished_name  = req_distinguished_name\n\
         x509_extensions     = {default_extensions}\n",
    ));

    text.push_str("\n[ req_distinguished_name ]\n");
    let dn = &config.dn;
    for (field, value) in [
        ("C", dn.country.as_str()),
        ("ST", dn.state.as_str()),
        ("L", dn.city.as_str()),
        ("O", dn.org.as_str()),
        ("OU", dn.org_unit.as_str()),
        ("CN", common_name),
        ("emailAddress", dn.email.as_str()),
    ] {
        if !value.is_empty() {
            text.push_str(&format!("{field} = {value}\n"));
        }
    }

    text.push_str(
        "\n[ req_ca_x509_extensions ]\n\
         basicConstraints  = CA:true\n\
         keyUsage          = digitalSignature, keyEncipherment, keyCertSign, cRLSign\n\
         nsComment         = \"fleetcert generated certificate\"\n",
    );
    for purpose in [CertPurpose::Server, CertPurpose::Client] {
        let (section, cert_type, eku) = match purpose {
            CertPurpose::Server => (purpose.extensions_section(), "server", "serverAuth"),
            CertPurpose::Client => (purpose.extensions_section(), "client", "clientAuth"),
        };
        text.push_str(&format!(
            "\n[ {section} ]\n\
             basicConstraints  = CA:false\n\
             nsCertType        = {cert_type}\n\
             keyUsage          = digitalSignature, keyEncipherment\n\
             extendedKeyUsage  = {eku}\n\
             nsComment         = \"fleetcert generated certificate\"\n",
        ));
    }
}

fn write_rotated(
    path: &std::path::Path,
    text: &str,
    depth: RotateDepth,
) -> Result<PathBuf, Error> {
    backup_artifact(path, depth)?;
    fs::write(path, text).map_err(Error::io_at(path))?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::CertConfig;

    fn config(dir: &std::path::Path) -> CertConfig {
        let mut cfg = CertConfig::default();
        cfg.dir = dir.to_path_buf();
        cfg.hostname = "web01.fleet.example.com".to_string();
        cfg
    }

    #[test]
    fn ca_request_cnf_carries_the_ca_machinery_and_the_ca_common_name() {
        let dir = tempfile::Builder::new()
            .prefix("fleetcert-cnf-")
            .tempdir()
            .expect("tempdir should be creatable");
        let cfg = config(dir.path());
        let path = write_ca_request_cnf(&cfg, RotateDepth::default())
            .expect("the cnf should be written");
        let text = std::fs::read_to_string(path).expect("the cnf should be readable");
        assert!(text.contains("[ ca ]"));
        assert!(text.contains("database        = $dir/index.txt"));
        assert!(text.contains("CN = Fleet Management CA"));
        assert!(text.contains("[ req_server_x509_extensions ]"));
    }

    #[test]
    fn server_request_cnf_uses_the_hostname_as_common_name() {
        let dir = tempfile::Builder::new()
            .prefix("fleetcert-cnf-")
            .tempdir()
            .expect("tempdir should be creatable");
        let cfg = config(dir.path());
        std::fs::create_dir_all(cfg.server_dir()).expect("server dir should be creatable");
        let path = write_server_request_cnf(&cfg, RotateDepth::default())
            .expect("the cnf should be written");
        let text = std::fs::read_to_string(path).expect("the cnf should be readable");
        assert!(text.contains("CN = web01.fleet.example.com"));
        assert!(!text.contains("[ ca ]"));
    }

    #[test]
    fn rewriting_the_cnf_rotates_the_previous_one() {
        let dir = tempfile::Builder::new()
            .prefix("fleetcert-cnf-")
            .tempdir()
            .expect("tempdir should be creatable");
        let mut cfg = config(dir.path());
        write_ca_request_cnf(&cfg, RotateDepth::default()).expect("first write");
        cfg.dn.common_name = "Renamed CA".to_string();
        write_ca_request_cnf(&cfg, RotateDepth::default()).expect("second write");
        let backup = dir.path().join("ca-openssl.cnf.1");
        let text = std::fs::read_to_string(backup).expect("the rotation should exist");
        assert!(text.contains("CN = Fleet Management CA"));
    }

    #[test]
    fn update_ca_dir_rewrites_only_the_dir_line() {
        let dir = tempfile::Builder::new()
            .prefix("fleetcert-cnf-")
            .tempdir()
            .expect("tempdir should be creatable");
        let mut cfg = config(dir.path());
        write_ca_request_cnf(&cfg, RotateDepth::default()).expect("write");
        let moved = dir.path().join("elsewhere");
        std::fs::create_dir_all(&moved).expect("dir should be creatable");
        std::fs::rename(
            dir.path().join("ca-openssl.cnf"),
            moved.join("ca-openssl.cnf"),
        )
        .expect("rename should work");
        cfg.dir = moved.clone();
        update_ca_dir(&cfg).expect("update should work");
        let text =
            std::fs::read_to_string(moved.join("ca-openssl.cnf")).expect("cnf should be readable");
        assert!(text.contains(&format!("dir             = {}", moved.display())));
        assert!(text.contains("CN = Fleet Management CA"));
    }
}

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use models::CertConfig;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "fleetcert.toml";

#[derive(Debug, Parser)]
#[command(name = "fleetcert", about = "Fleet CA and server TLS key set generator", version)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Build directory where generated artifacts live
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,

    /// Hostname the server key set is generated for (defaults to this
    /// machine's hostname)
    #[arg(long, global = true)]
    pub hostname: Option<String>,

    /// CA password; the file:<path> form reads it from a file
    #[arg(long, global = true)]
    pub password: Option<String>,

    /// Read the CA password from a file
    #[arg(long, global = true, conflicts_with = "password")]
    pub password_file: Option<PathBuf>,

    /// Two-letter country code for the distinguished name
    #[arg(long = "set-country", global = true)]
    pub country: Option<String>,

    /// State or province for the distinguished name
    #[arg(long = "set-state", global = true)]
    pub state: Option<String>,

    /// City or locality for the distinguished name
    #[arg(long = "set-city", global = true)]
    pub city: Option<String>,

    /// Organization for the distinguished name
    #[arg(long = "set-org", global = true)]
    pub org: Option<String>,

    /// Organizational unit for the distinguished name
    #[arg(long = "set-org-unit", global = true)]
    pub org_unit: Option<String>,

    /// Common name of the CA certificate
    #[arg(long = "set-common-name", global = true)]
    pub common_name: Option<String>,

    /// Email address for the distinguished name
    #[arg(long = "set-email", global = true)]
    pub email: Option<String>,

    /// Certificate lifetime in days
    #[arg(long, global = true)]
    pub expiration_days: Option<u32>,

    /// Rotation backups kept per managed file; -1 keeps all of them
    #[arg(long, global = true, allow_hyphen_values = true)]
    pub rotation_depth: Option<i64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Write a commented configuration template
    Init(InitArgs),
    /// Resolve and validate the configuration
    Validate,
    /// Report which artifacts exist and what latest.txt records
    Status(StatusArgs),
    /// Generate the CA private key, public certificate, and package
    GenCa(GenCaArgs),
    /// Generate the server key, request, signed certificate, and package
    GenServer(GenServerArgs),
}

#[derive(Debug, Args)]
pub struct InitArgs {
    /// Overwrite an existing configuration file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Emit the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct GenCaArgs {
    /// Only generate the CA private key
    #[arg(long, group = "phase")]
    pub key_only: bool,

    /// Only generate the CA public certificate
    #[arg(long, group = "phase")]
    pub cert_only: bool,

    /// Only build the CA certificate package
    #[arg(long, group = "phase")]
    pub package_only: bool,

    /// Skip the package build at the end of the flow
    #[arg(long, conflicts_with = "package_only")]
    pub no_package: bool,

    /// Overwrite an existing CA key or certificate
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Args)]
pub struct GenServerArgs {
    /// Only generate the server private key
    #[arg(long, group = "phase")]
    pub key_only: bool,

    /// Only generate the server certificate request
    #[arg(long, group = "phase")]
    pub cert_req_only: bool,

    /// Only sign the server certificate
    #[arg(long, group = "phase")]
    pub cert_only: bool,

    /// Only build the server key set package
    #[arg(long, group = "phase")]
    pub package_only: bool,

    /// Skip the package build at the end of the flow
    #[arg(long, conflicts_with = "package_only")]
    pub no_package: bool,
}

impl Cli {
    /// Load the configuration file (when present) and fold in the
    /// command-line overrides.
    pub fn resolve_config(&self) -> Result<CertConfig> {
        let path = self
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut cfg: CertConfig = if path.is_file() {
            let text = fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            toml::from_str(&text)
                .with_context(|| format!("failed to parse {}", path.display()))?
        } else if self.config.is_some() {
            bail!("configuration file {} does not exist", path.display());
        } else {
            CertConfig::default()
        };

        if let Some(dir) = &self.dir {
            cfg.dir = dir.clone();
        }
        if let Some(hostname) = &self.hostname {
            cfg.hostname = hostname.clone();
        }
        if let Some(country) = &self.country {
            cfg.dn.country = country.clone();
        }
        if let Some(state) = &self.state {
            cfg.dn.state = state.clone();
        }
        if let Some(city) = &self.city {
            cfg.dn.city = city.clone();
        }
        if let Some(org) = &self.org {
            cfg.dn.org = org.clone();
        }
        if let Some(org_unit) = &self.org_unit {
            cfg.dn.org_unit = org_unit.clone();
        }
        if let Some(common_name) = &self.common_name {
            cfg.dn.common_name = common_name.clone();
        }
        if let Some(email) = &self.email {
            cfg.dn.email = email.clone();
        }
        if let Some(days) = self.expiration_days {
            cfg.expiration_days = days;
        }
        if let Some(depth) = self.rotation_depth {
            cfg.rotation_depth = depth;
        }

        if cfg.hostname.trim().is_empty() {
            cfg.hostname = hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        Ok(cfg)
    }

    /// Resolve the CA password from the flags, honoring the file:<path>
    /// convention.
    pub fn resolve_password(&self) -> Result<Option<String>> {
        if let Some(file) = &self.password_file {
            return read_password_file(file).map(Some);
        }
        match self.password.as_deref() {
            Some(raw) => match raw.strip_prefix("file:") {
                Some(file) => read_password_file(Path::new(file)).map(Some),
                None => Ok(Some(raw.to_string())),
            },
            None => Ok(None),
        }
    }
}

fn read_password_file(path: &Path) -> Result<String> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read password file {}", path.display()))?;
    Ok(text.trim_end_matches(['\r', '\n']).to_string())
}

const CONFIG_TEMPLATE: &str = r#"# fleetcert configuration.
# Artifacts are generated under `dir`; the server key set lands in a
# per-hostname subdirectory beneath it. Every value shown commented out
# is the built-in default.

# dir = "ssl-build"
# hostname = "web01.example.com"   # defaults to this machine's hostname

# ca_key = "ca.key"
# ca_cert = "ca.crt"
# server_key = "server.key"
# server_cert_req = "server.csr"
# server_cert = "server.crt"

# Certificate lifetime in days.
# expiration_days = 365

# Purpose of the signed server certificate: "server" or "client".
# purpose = "server"

# Extra trusted CA certificates merged into the CA bundle.
# other_ca_certs = ["/etc/pki/extra/corp-root.crt"]

# External tools.
# signer = "/usr/bin/openssl"
# package_builder = "fleet-certs-gen-rpm"

# Rotation backups kept per managed file; -1 keeps all of them.
# rotation_depth = 5

# log_path = "fleetcert.log"

[dn]
# country = "US"
# state = ""
# city = ""
# org = "Fleet Management"
# org_unit = "Operations"
# common_name = "Fleet Management CA"
# email = ""

[package]
# packager = "Fleet Management"
# vendor = "Fleet Management"
# ca_package = "fleet-ca-cert"
# server_package_prefix = "fleet-server-ssl-key-pair"
# ca_install_dir = "/etc/pki/fleet/certs"
# server_install_dir = "/etc/pki/fleet/ssl"
"#;

/// Write the commented configuration template.
pub fn init_config_template(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "{} already exists (pass --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    fs::write(path, CONFIG_TEMPLATE)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

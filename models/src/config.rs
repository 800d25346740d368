use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::{Duration, OffsetDateTime};

pub const CA_PACKAGE_SUMMARY: &str =
    "Public CA certificate for the fleet-management infrastructure";
pub const SERVER_PACKAGE_SUMMARY: &str =
    "TLS key pair and certificate set for a fleet-management web server";

/// Validation failures for a [`CertConfig`].
///
/// The variants mirror the conditions the tool refuses to start with;
/// everything else about the configuration is taken at face value.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("certificate expiration must be at least 1 day")]
    ExpirationTooShort,
    #[error("certificate expiration cannot exceed {max} days (one day before the 32-bit epoch overflow)")]
    ExpirationTooLong { max: i64 },
    #[error("country code cannot exceed 2 characters (got \"{0}\")")]
    InvalidCountryCode(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Process exit code for this validation failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::ExpirationTooShort => 30,
            ConfigError::ExpirationTooLong { .. } => 31,
            ConfigError::InvalidCountryCode(_) | ConfigError::Invalid(_) => 32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CertPurpose {
    #[serde(rename = "server")]
    Server,
    #[serde(rename = "client")]
    Client,
}

impl CertPurpose {
    /// Name of the extensions section the external signer is pointed at
    /// when signing a certificate for this purpose.
    pub fn extensions_section(self) -> &'static str {
        match self {
            CertPurpose::Server => "req_server_x509_extensions",
            CertPurpose::Client => "req_client_x509_extensions",
        }
    }
}

impl Default for CertPurpose {
    fn default() -> Self {
        CertPurpose::Server
    }
}

/// Distinguished-name components shared by the CA and server certificates.
///
/// The server certificate's common name is always the target hostname, so
/// `common_name` here only applies to the CA.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnRecord {
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub city: String,
    #[serde(default = "default_org")]
    pub org: String,
    #[serde(default = "default_org_unit")]
    pub org_unit: String,
    #[serde(default = "default_common_name")]
    pub common_name: String,
    #[serde(default)]
    pub email: String,
}

impl Default for DnRecord {
    fn default() -> Self {
        Self {
            country: default_country(),
            state: String::new(),
            city: String::new(),
            org: default_org(),
            org_unit: default_org_unit(),
            common_name: default_common_name(),
            email: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageMeta {
    #[serde(default = "default_packager")]
    pub packager: String,
    #[serde(default = "default_vendor")]
    pub vendor: String,
    /// Package name for the public CA certificate.
    #[serde(default = "default_ca_package")]
    pub ca_package: String,
    /// Prefix for the per-host server key-set package; the hostname is
    /// appended to form the full package name.
    #[serde(default = "default_server_package_prefix")]
    pub server_package_prefix: String,
    /// Install location of the CA certificate on client machines.
    #[serde(default = "default_ca_install_dir")]
    pub ca_install_dir: PathBuf,
    /// Install location of the server key set; `private/` and `certs/`
    /// subdirectories are appended per artifact.
    #[serde(default = "default_server_install_dir")]
    pub server_install_dir: PathBuf,
}

impl Default for PackageMeta {
    fn default() -> Self {
        Self {
            packager: default_packager(),
            vendor: default_vendor(),
            ca_package: default_ca_package(),
            server_package_prefix: default_server_package_prefix(),
            ca_install_dir: default_ca_install_dir(),
            server_install_dir: default_server_install_dir(),
        }
    }
}

impl PackageMeta {
    pub fn server_package(&self, hostname: &str) -> String {
        format!("{}-{}", self.server_package_prefix, hostname)
    }
}

/// Fully resolved configuration for one pipeline run.
///
/// Every step receives this record explicitly; there is no global state.
/// File-name fields are base names; the tool always anchors them under
/// `dir` (or the per-host subdirectory) regardless of any path prefix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertConfig {
    /// Build directory where all generated artifacts live.
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
    /// Hostname the server key set is generated for.
    #[serde(default)]
    pub hostname: String,
    #[serde(default = "default_ca_key")]
    pub ca_key: String,
    #[serde(default = "default_ca_cert")]
    pub ca_cert: String,
    #[serde(default = "default_server_key")]
    pub server_key: String,
    #[serde(default = "default_server_cert_req")]
    pub server_cert_req: String,
    #[serde(default = "default_server_cert")]
    pub server_cert: String,
    /// Certificate lifetime in days.
    #[serde(default = "default_expiration_days")]
    pub expiration_days: u32,
    #[serde(default)]
    pub purpose: CertPurpose,
    #[serde(default)]
    pub dn: DnRecord,
    /// Additional trusted CA certificates merged into the CA bundle.
    #[serde(default)]
    pub other_ca_certs: Vec<PathBuf>,
    /// External signer executable.
    #[serde(default = "default_signer")]
    pub signer: PathBuf,
    /// External package-builder executable.
    #[serde(default = "default_package_builder")]
    pub package_builder: String,
    #[serde(default)]
    pub package: PackageMeta,
    /// Rotation backups kept per managed file; -1 keeps all of them.
    #[serde(default = "default_rotation_depth")]
    pub rotation_depth: i64,
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,
}

impl Default for CertConfig {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            hostname: String::new(),
            ca_key: default_ca_key(),
            ca_cert: default_ca_cert(),
            server_key: default_server_key(),
            server_cert_req: default_server_cert_req(),
            server_cert: default_server_cert(),
            expiration_days: default_expiration_days(),
            purpose: CertPurpose::default(),
            dn: DnRecord::default(),
            other_ca_certs: Vec::new(),
            signer: default_signer(),
            package_builder: default_package_builder(),
            package: PackageMeta::default(),
            rotation_depth: default_rotation_depth(),
            log_path: default_log_path(),
        }
    }
}

impl CertConfig {
    /// Validate the record once at the pipeline entry boundary.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hostname.trim().is_empty() {
            return Err(ConfigError::Invalid("hostname cannot be empty".into()));
        }
        if self.dn.common_name.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "the CA common name cannot be empty".into(),
            ));
        }
        if self.dn.country.chars().count() > 2 {
            return Err(ConfigError::InvalidCountryCode(self.dn.country.clone()));
        }
        if self.expiration_days < 1 {
            return Err(ConfigError::ExpirationTooShort);
        }
        let max = days_until_epoch_overflow();
        if i64::from(self.expiration_days) > max {
            return Err(ConfigError::ExpirationTooLong { max });
        }
        if self.rotation_depth == 0 || self.rotation_depth < -1 {
            return Err(ConfigError::Invalid(format!(
                "rotation_depth must be -1 or a positive integer (got {})",
                self.rotation_depth
            )));
        }
        for (label, name) in [
            ("ca_key", &self.ca_key),
            ("ca_cert", &self.ca_cert),
            ("server_key", &self.server_key),
            ("server_cert_req", &self.server_cert_req),
            ("server_cert", &self.server_cert),
        ] {
            if base_name(name).is_empty() {
                return Err(ConfigError::Invalid(format!("{label} cannot be empty")));
            }
        }
        Ok(())
    }

    pub fn ca_key_path(&self) -> PathBuf {
        self.dir.join(base_name(&self.ca_key))
    }

    pub fn ca_cert_path(&self) -> PathBuf {
        self.dir.join(base_name(&self.ca_cert))
    }

    pub fn ca_request_cnf_path(&self) -> PathBuf {
        self.dir.join("ca-openssl.cnf")
    }

    /// Per-host subdirectory holding the server key set.
    pub fn server_dir(&self) -> PathBuf {
        self.dir.join(&self.hostname)
    }

    pub fn server_key_path(&self) -> PathBuf {
        self.server_dir().join(base_name(&self.server_key))
    }

    pub fn server_cert_req_path(&self) -> PathBuf {
        self.server_dir().join(base_name(&self.server_cert_req))
    }

    pub fn server_cert_path(&self) -> PathBuf {
        self.server_dir().join(base_name(&self.server_cert))
    }

    pub fn server_request_cnf_path(&self) -> PathBuf {
        self.server_dir().join("server-openssl.cnf")
    }
}

/// Base name of a possibly path-qualified file name.
pub fn base_name(name: &str) -> &str {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
}

/// Days until one day before the 32-bit Unix epoch overflow
/// (2038-01-19 03:14:07). Certificates must not outlive it.
pub fn days_until_epoch_overflow() -> i64 {
    let overflow = OffsetDateTime::UNIX_EPOCH + Duration::seconds(i64::from(i32::MAX));
    (overflow - OffsetDateTime::now_utc()).whole_days() - 1
}

fn default_country() -> String {
    "US".to_string()
}

fn default_org() -> String {
    "Fleet Management".to_string()
}

fn default_org_unit() -> String {
    "Operations".to_string()
}

fn default_common_name() -> String {
    "Fleet Management CA".to_string()
}

fn default_packager() -> String {
    "Fleet Management".to_string()
}

fn default_vendor() -> String {
    "Fleet Management".to_string()
}

fn default_ca_package() -> String {
    "fleet-ca-cert".to_string()
}

fn default_server_package_prefix() -> String {
    "fleet-server-ssl-key-pair".to_string()
}

fn default_ca_install_dir() -> PathBuf {
    PathBuf::from("/etc/pki/fleet/certs")
}

fn default_server_install_dir() -> PathBuf {
    PathBuf::from("/etc/pki/fleet/ssl")
}

fn default_dir() -> PathBuf {
    PathBuf::from("ssl-build")
}

fn default_ca_key() -> String {
    "ca.key".to_string()
}

fn default_ca_cert() -> String {
    "ca.crt".to_string()
}

fn default_server_key() -> String {
    "server.key".to_string()
}

fn default_server_cert_req() -> String {
    "server.csr".to_string()
}

fn default_server_cert() -> String {
    "server.crt".to_string()
}

fn default_expiration_days() -> u32 {
    365
}

fn default_signer() -> PathBuf {
    PathBuf::from("/usr/bin/openssl")
}

fn default_package_builder() -> String {
    "fleet-certs-gen-rpm".to_string()
}

fn default_rotation_depth() -> i64 {
    5
}

fn default_log_path() -> PathBuf {
    PathBuf::from("fleetcert.log")
}

pub mod config;

pub use config::{
    base_name, days_until_epoch_overflow, CertConfig, CertPurpose, ConfigError, DnRecord,
    PackageMeta, CA_PACKAGE_SUMMARY,
    SERVER_PACKAGE_SUMMARY,
};

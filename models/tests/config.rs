use models::{base_name, days_until_epoch_overflow, CertConfig, CertPurpose, ConfigError};

fn sample_config() -> CertConfig {
    CertConfig {
        hostname: "web01.fleet.example.com".to_string(),
        ..CertConfig::default()
    }
}

#[test]
fn default_config_with_hostname_is_valid() {
    sample_config().validate().expect("defaults should validate");
}

#[test]
fn empty_hostname_is_rejected() {
    let cfg = CertConfig::default();
    let err = cfg.validate().expect_err("empty hostname must fail");
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[test]
fn long_country_code_is_rejected() {
    let mut cfg = sample_config();
    cfg.dn.country = "USA".to_string();
    let err = cfg.validate().expect_err("three-letter country must fail");
    assert!(matches!(err, ConfigError::InvalidCountryCode(_)));
}

#[test]
fn expiration_is_clamped_to_the_epoch_overflow() {
    let mut cfg = sample_config();
    cfg.expiration_days = 0;
    assert!(matches!(
        cfg.validate(),
        Err(ConfigError::ExpirationTooShort)
    ));

    cfg.expiration_days = u32::try_from(days_until_epoch_overflow() + 10)
        .expect("overflow horizon fits in u32");
    assert!(matches!(
        cfg.validate(),
        Err(ConfigError::ExpirationTooLong { .. })
    ));
}

#[test]
fn each_validation_failure_has_its_own_exit_code() {
    assert_eq!(ConfigError::ExpirationTooShort.exit_code(), 30);
    assert_eq!(ConfigError::ExpirationTooLong { max: 4000 }.exit_code(), 31);
    assert_eq!(
        ConfigError::InvalidCountryCode("USA".to_string()).exit_code(),
        32
    );
    assert_eq!(ConfigError::Invalid("hostname".to_string()).exit_code(), 32);
}

#[test]
fn zero_rotation_depth_is_rejected() {
    let mut cfg = sample_config();
    cfg.rotation_depth = 0;
    assert!(cfg.validate().is_err());

    cfg.rotation_depth = -1;
    cfg.validate().expect("-1 means keep every backup");
}

#[test]
fn artifact_paths_use_base_names_only() {
    let mut cfg = sample_config();
    cfg.ca_key = "/somewhere/else/ca.key".to_string();
    assert_eq!(cfg.ca_key_path(), cfg.dir.join("ca.key"));
    assert_eq!(base_name("plain.crt"), "plain.crt");
    assert_eq!(base_name("nested/dir/plain.crt"), "plain.crt");
}

#[test]
fn server_artifacts_live_under_the_host_directory() {
    let cfg = sample_config();
    let host_dir = cfg.dir.join(&cfg.hostname);
    assert_eq!(cfg.server_dir(), host_dir);
    assert_eq!(cfg.server_key_path(), host_dir.join("server.key"));
    assert_eq!(cfg.server_cert_req_path(), host_dir.join("server.csr"));
    assert_eq!(cfg.server_cert_path(), host_dir.join("server.crt"));
}

#[test]
fn purpose_selects_the_signing_extensions_section() {
    assert_eq!(
        CertPurpose::Server.extensions_section(),
        "req_server_x509_extensions"
    );
    assert_eq!(
        CertPurpose::Client.extensions_section(),
        "req_client_x509_extensions"
    );
}

#[test]
fn server_package_name_embeds_the_hostname() {
    let cfg = sample_config();
    assert_eq!(
        cfg.package.server_package(&cfg.hostname),
        format!("fleet-server-ssl-key-pair-{}", cfg.hostname)
    );
}

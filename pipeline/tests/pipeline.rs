//! Pipeline behavior against fake external tools.
//!
//! The signer and the package builder are stand-in shell scripts that
//! record their invocation and fabricate the artifact they were asked to
//! produce, so the orchestration around them can be checked end to end.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use models::CertConfig;
use pipeline::{backup_artifact, ca, classify, package, request_cnf, server};
use pipeline::{Error, PipelineContext};
use utilities::RotateDepth;

struct Harness {
    dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        Self {
            dir: tempfile::Builder::new()
                .prefix("fleetcert-pipe-")
                .tempdir()
                .expect("tempdir should be creatable"),
        }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write an executable script the pipeline will invoke as a tool.
    fn script(&self, name: &str, body: &str) -> PathBuf {
        let path = self.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{body}")).expect("script should be writable");
        utilities::set_mode(&path, 0o755).expect("script should be chmoddable");
        path
    }

    /// A signer that writes `contents` plus a call counter into whatever
    /// file follows `-out`, and logs its full argument list.
    fn fake_signer(&self, contents: &str) -> PathBuf {
        let log = self.path().join("signer.log");
        let counter = self.path().join("signer.calls");
        self.script(
            "fake-openssl",
            &format!(
                r#"echo "$@" >> {log}
calls=$(cat {counter} 2>/dev/null || echo 0)
calls=$((calls + 1))
echo $calls > {counter}
out=""
prev=""
for a in "$@"; do
    case "$prev" in -out) out="$a" ;; esac
    prev="$a"
done
[ -n "$out" ] && echo "{contents} (call $calls)" > "$out"
exit 0
"#,
                log = log.display(),
                counter = counter.display(),
            ),
        )
    }

    fn signer_log(&self) -> String {
        fs::read_to_string(self.path().join("signer.log")).unwrap_or_default()
    }

    fn config(&self, signer: PathBuf) -> CertConfig {
        let mut cfg = CertConfig::default();
        cfg.dir = self.path().join("ssl-build");
        cfg.hostname = "web01.fleet.example.com".to_string();
        cfg.signer = signer;
        cfg
    }
}

fn mode_of(path: &Path) -> u32 {
    fs::metadata(path)
        .expect("artifact should have metadata")
        .permissions()
        .mode()
        & 0o7777
}

fn context(cfg: CertConfig, password: Option<&str>) -> PipelineContext {
    PipelineContext::new(cfg, password.map(str::to_string))
        .expect("the test configuration should validate")
}

#[test]
fn server_key_generation_creates_the_host_directory_and_restricts_the_key() {
    let h = Harness::new();
    let signer = h.fake_signer("FAKE KEY");
    let ctx = context(h.config(signer), None);

    let key = server::generate_server_key(&ctx).expect("key generation should succeed");
    assert!(key.ends_with("web01.fleet.example.com/server.key"));
    assert_eq!(mode_of(&key), 0o600);
    assert_eq!(mode_of(key.parent().expect("key has a parent")), 0o700);
    assert!(h.signer_log().contains("genrsa -out"));
}

#[test]
fn cert_request_without_a_key_fails_the_dependency_check_and_writes_nothing() {
    let h = Harness::new();
    let signer = h.fake_signer("FAKE CSR");
    let cfg = h.config(signer);
    let csr = cfg.server_cert_req_path();
    let ctx = context(cfg, None);

    let err = server::generate_server_cert_req(&ctx).expect_err("missing key must fail");
    match err {
        Error::MissingDependency(path) => assert!(path.ends_with("server.key")),
        other => panic!("expected MissingDependency, got {other}"),
    }
    assert!(!csr.exists(), "no artifact may be written on failure");
    assert!(h.signer_log().is_empty(), "the signer must not be invoked");
}

#[test]
fn signing_prerequisites_fail_up_front_with_nothing_generated() {
    let h = Harness::new();
    let signer = h.fake_signer("FAKE ARTIFACT");
    let cfg = h.config(signer);
    let server_dir = cfg.server_dir();
    let ctx = context(cfg, Some("secret"));

    let err = server::check_signing_prerequisites(&ctx).expect_err("missing CA must fail");
    match err {
        Error::MissingDependency(path) => assert!(path.ends_with("ca.key")),
        other => panic!("expected MissingDependency, got {other}"),
    }
    assert!(!server_dir.exists(), "no per-host directory may be created");
    assert!(h.signer_log().is_empty(), "the signer must not be invoked");
}

#[test]
fn signing_prerequisites_require_a_password_even_with_the_ca_in_place() {
    let h = Harness::new();
    let signer = h.fake_signer("FAKE ARTIFACT");
    let cfg = h.config(signer);
    fs::create_dir_all(&cfg.dir).expect("build dir");
    fs::write(cfg.ca_key_path(), "key").expect("ca key");
    fs::write(cfg.ca_cert_path(), "cert").expect("ca cert");
    let ctx = context(cfg, None);

    let err = server::check_signing_prerequisites(&ctx).expect_err("no password must fail");
    assert!(matches!(err, Error::InvalidArgument(_)));
}

#[test]
fn ca_key_refuses_to_overwrite_without_force() {
    let h = Harness::new();
    let signer = h.fake_signer("FAKE CA KEY");
    let cfg = h.config(signer);
    let ctx = context(cfg, Some("secret"));

    ca::generate_ca_key(&ctx, false).expect("first generation should succeed");
    let err = ca::generate_ca_key(&ctx, false).expect_err("second run must refuse");
    assert!(matches!(err, Error::RefusingOverwrite { .. }));
    ca::generate_ca_key(&ctx, true).expect("forced regeneration should succeed");
}

#[test]
fn ca_cert_generation_writes_the_request_config_and_latest_marker() {
    let h = Harness::new();
    let signer = h.fake_signer("FAKE CA CERT");
    let cfg = h.config(signer);
    let ctx = context(cfg, Some("secret"));

    ca::generate_ca_key(&ctx, false).expect("key generation should succeed");
    let cert = ca::generate_ca_cert(&ctx, false).expect("cert generation should succeed");

    assert_eq!(mode_of(&cert), 0o644);
    assert!(ctx.config().ca_request_cnf_path().is_file());
    let latest = pipeline::latest::read_latest(&ctx.config().dir)
        .expect("latest should be readable")
        .expect("latest should exist");
    assert_eq!(latest, vec!["ca.crt".to_string()]);
    assert!(h.signer_log().contains("-new -x509 -days 365 -sha256"));
}

#[test]
fn signing_again_rotates_the_previous_certificate() {
    let h = Harness::new();
    let signer = h.fake_signer("FAKE ARTIFACT");
    let cfg = h.config(signer);
    let ctx = context(cfg, Some("secret"));

    ca::generate_ca_key(&ctx, false).expect("ca key");
    ca::generate_ca_cert(&ctx, false).expect("ca cert");
    server::generate_server_key(&ctx).expect("server key");
    server::generate_server_cert_req(&ctx).expect("server csr");

    let cert = server::generate_server_cert(&ctx).expect("first signing");
    let first = fs::read_to_string(&cert).expect("cert should be readable");
    server::generate_server_cert(&ctx).expect("second signing");

    let backup = cert.with_file_name("server.crt.1");
    assert!(backup.is_file(), "the previous certificate must be rotated");
    assert_eq!(
        fs::read_to_string(backup).expect("backup should be readable"),
        first
    );
    assert_ne!(
        fs::read_to_string(&cert).expect("cert should be readable"),
        first
    );
    assert_eq!(mode_of(&cert), 0o644);
}

#[test]
fn signing_resets_the_certificate_database_and_seeds_the_serial() {
    let h = Harness::new();
    let signer = h.fake_signer("FAKE ARTIFACT");
    let cfg = h.config(signer);
    let ctx = context(cfg, Some("secret"));

    ca::generate_ca_key(&ctx, false).expect("ca key");
    ca::generate_ca_cert(&ctx, false).expect("ca cert");
    server::generate_server_key(&ctx).expect("server key");
    server::generate_server_cert_req(&ctx).expect("server csr");

    fs::write(ctx.config().dir.join("index.txt"), "stale entries\n")
        .expect("index should be writable");
    server::generate_server_cert(&ctx).expect("signing");

    let index = fs::read_to_string(ctx.config().dir.join("index.txt"))
        .expect("index should be readable");
    assert!(index.is_empty(), "the signer database must start empty");
    let serial = fs::read_to_string(ctx.config().dir.join("serial"))
        .expect("serial should be readable");
    assert_eq!(serial.trim(), "01");
}

#[test]
fn a_wrong_ca_password_is_diagnosed_from_the_signer_stderr() {
    let h = Harness::new();
    let signer = h.script(
        "fake-openssl",
        "echo 'unable to load CA private key' 1>&2\n\
         echo 'PEM routines:PEM_do_header:bad decrypt' 1>&2\n\
         exit 1\n",
    );
    let cfg = h.config(signer);
    let ctx = context(cfg, Some("wrong"));

    fs::create_dir_all(&ctx.config().dir).expect("build dir");
    request_cnf::write_ca_request_cnf(ctx.config(), RotateDepth::default()).expect("ca cnf");
    fs::write(ctx.config().ca_key_path(), "key").expect("ca key");
    fs::write(ctx.config().ca_cert_path(), "cert").expect("ca cert");
    fs::create_dir_all(ctx.config().server_dir()).expect("server dir");
    fs::write(ctx.config().server_cert_req_path(), "csr").expect("csr");

    let err = server::generate_server_cert(&ctx).expect_err("signing must fail");
    match err {
        Error::ExternalTool {
            status, diagnostic, ..
        } => {
            assert_eq!(status, 1);
            assert_eq!(diagnostic, Some(classify::Diagnostic::CaPasswordMismatch));
        }
        other => panic!("expected ExternalTool, got {other}"),
    }
}

#[test]
fn ca_package_build_verifies_the_archive_and_updates_latest() {
    let h = Harness::new();
    let signer = h.fake_signer("FAKE CA CERT");
    // Builder fabricates "<name>-1.0-<release>.noarch.rpm" in its cwd.
    let builder = h.script(
        "fake-gen-rpm",
        r#"name=""
rel=""
prev=""
for a in "$@"; do
    case "$prev" in
        --name) name="$a" ;;
        --release) rel="$a" ;;
    esac
    prev="$a"
done
touch "$name-1.0-$rel.noarch.rpm"
"#,
    );
    let mut cfg = h.config(signer);
    cfg.package_builder = builder.to_string_lossy().into_owned();
    let ctx = context(cfg, Some("secret"));

    ca::generate_ca_key(&ctx, false).expect("ca key");
    ca::generate_ca_cert(&ctx, false).expect("ca cert");

    let first = package::build_ca_package(&ctx).expect("first package");
    assert!(first.ends_with("fleet-ca-cert-1.0-1.noarch.rpm"));
    assert_eq!(mode_of(&first), 0o644);

    let second = package::build_ca_package(&ctx).expect("second package");
    assert!(
        second.ends_with("fleet-ca-cert-1.0-2.noarch.rpm"),
        "the release must bump past existing archives"
    );

    let latest = pipeline::latest::read_latest(&ctx.config().dir)
        .expect("latest should be readable")
        .expect("latest should exist");
    assert_eq!(
        latest,
        vec![
            "ca.crt".to_string(),
            "fleet-ca-cert-1.0-2.noarch.rpm".to_string(),
            "fleet-ca-cert-1.0-2.src.rpm".to_string(),
        ]
    );
}

#[test]
fn a_builder_that_produces_nothing_is_reported_even_on_exit_zero() {
    let h = Harness::new();
    let signer = h.fake_signer("FAKE ARTIFACT");
    let builder = h.script("fake-gen-rpm", "exit 0\n");
    let mut cfg = h.config(signer);
    cfg.package_builder = builder.to_string_lossy().into_owned();
    let ctx = context(cfg, Some("secret"));

    ca::generate_ca_key(&ctx, false).expect("ca key");
    ca::generate_ca_cert(&ctx, false).expect("ca cert");

    let err = package::build_ca_package(&ctx).expect_err("empty build must fail");
    assert!(matches!(err, Error::MissingArtifact { .. }));
}

#[test]
fn server_package_bundles_the_key_set_and_cleans_its_scriptlet() {
    let h = Harness::new();
    let signer = h.fake_signer("FAKE ARTIFACT");
    let log = h.path().join("builder.log");
    let builder = h.script(
        "fake-gen-rpm",
        &format!(
            r#"echo "$@" >> {log}
name=""
rel=""
prev=""
for a in "$@"; do
    case "$prev" in
        --name) name="$a" ;;
        --release) rel="$a" ;;
    esac
    prev="$a"
done
touch "$name-1.0-$rel.noarch.rpm"
"#,
            log = log.display()
        ),
    );
    let mut cfg = h.config(signer);
    cfg.package_builder = builder.to_string_lossy().into_owned();
    let ctx = context(cfg, Some("secret"));

    ca::generate_ca_key(&ctx, false).expect("ca key");
    ca::generate_ca_cert(&ctx, false).expect("ca cert");
    server::generate_server_key(&ctx).expect("server key");
    server::generate_server_cert_req(&ctx).expect("server csr");
    server::generate_server_cert(&ctx).expect("server cert");

    let package = package::build_server_package(&ctx).expect("server package");
    assert!(package.ends_with(
        "web01.fleet.example.com/fleet-server-ssl-key-pair-web01.fleet.example.com-1.0-1.noarch.rpm"
    ));
    assert_eq!(mode_of(&package), 0o600);
    assert!(
        !ctx.config().dir.join("postun.scriptlet").exists(),
        "the scriptlet is removed after the build"
    );

    let invocation = fs::read_to_string(log).expect("builder log should exist");
    assert!(invocation.contains("/etc/pki/fleet/ssl/private/server.key:0600="));
    assert!(invocation.contains("/etc/pki/fleet/ssl/certs/server.crt="));
    assert!(invocation.contains("--postun"));

    let latest = pipeline::latest::read_latest(&ctx.config().server_dir())
        .expect("latest should be readable")
        .expect("latest should exist");
    assert_eq!(latest.len(), 2);
}

#[test]
fn backing_up_a_missing_artifact_is_a_quiet_no_op() {
    let h = Harness::new();
    let absent = h.path().join("nothing-here.crt");
    let rotated = backup_artifact(&absent, RotateDepth::default())
        .expect("missing artifacts are fine to skip");
    assert!(rotated.is_none());
    assert!(!h.path().join("nothing-here.crt.1").exists());
}

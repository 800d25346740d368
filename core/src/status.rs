use std::path::{Path, PathBuf};

use anyhow::Result;
use models::CertConfig;
use serde_json::json;

/// Report which artifacts exist on disk and what each scope's
/// `latest.txt` records. The report is derived purely from the
/// filesystem; nothing is modified.
pub fn run_status(cfg: &CertConfig, json_output: bool) -> Result<()> {
    let artifacts: Vec<(&str, PathBuf)> = vec![
        ("CA key", cfg.ca_key_path()),
        ("CA certificate", cfg.ca_cert_path()),
        ("CA request config", cfg.ca_request_cnf_path()),
        ("server key", cfg.server_key_path()),
        ("server cert request", cfg.server_cert_req_path()),
        ("server certificate", cfg.server_cert_path()),
        ("server request config", cfg.server_request_cnf_path()),
    ];
    let ca_latest = pipeline::latest::read_latest(&cfg.dir)?;
    let server_latest = pipeline::latest::read_latest(&cfg.server_dir())?;

    if json_output {
        let artifacts_json = artifacts
            .iter()
            .map(|(label, path)| {
                json!({
                    "label": label,
                    "path": path.to_string_lossy(),
                    "exists": path.is_file(),
                })
            })
            .collect::<Vec<_>>();
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "dir": cfg.dir.to_string_lossy(),
                "hostname": cfg.hostname,
                "artifacts": artifacts_json,
                "ca_latest": latest_json(&cfg.dir, ca_latest.as_deref()),
                "server_latest": latest_json(&cfg.server_dir(), server_latest.as_deref()),
            }))?
        );
        return Ok(());
    }

    println!("Build dir: {}", cfg.dir.display());
    println!("Hostname:  {}", cfg.hostname);
    println!();
    println!("Artifacts:");
    for (label, path) in &artifacts {
        let mark = if path.is_file() { "present" } else { "missing" };
        println!("  {label:<22} {mark:<8} {}", path.display());
    }

    print_latest("CA", &cfg.dir, ca_latest);
    print_latest("Server", &cfg.server_dir(), server_latest);
    Ok(())
}

fn latest_json(scope_dir: &Path, entries: Option<&[String]>) -> serde_json::Value {
    match entries {
        Some(list) => json!(list
            .iter()
            .map(|name| {
                json!({
                    "name": name,
                    "exists": scope_dir.join(name).is_file(),
                })
            })
            .collect::<Vec<_>>()),
        None => json!(null),
    }
}

fn print_latest(scope: &str, scope_dir: &Path, entries: Option<Vec<String>>) {
    println!();
    match entries {
        Some(list) => {
            println!("{scope} latest.txt:");
            for name in list {
                let mark = if scope_dir.join(&name).is_file() {
                    "present"
                } else {
                    "missing"
                };
                println!("  {name:<48} {mark}");
            }
        }
        None => println!("{scope} latest.txt: (none)"),
    }
}

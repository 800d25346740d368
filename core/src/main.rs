use clap::Parser;
use fleetcert::config::{init_config_template, Cli, Command, DEFAULT_CONFIG_PATH};
use fleetcert::status;
use pipeline::{ca, package, server, PipelineContext};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            eprintln!("ERROR: {err:#}");
            ExitCode::from(exit_code_for(&err) as u8)
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Init(args) => {
            let path = cli
                .config
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
            init_config_template(&path, args.force)?;
            println!("Wrote {}", path.display());
            Ok(())
        }
        Command::Validate => {
            let cfg = cli.resolve_config()?;
            cfg.validate()?;
            println!("OK");
            Ok(())
        }
        Command::Status(args) => {
            let cfg = cli.resolve_config()?;
            status::run_status(&cfg, args.json)
        }
        Command::GenCa(args) => {
            let cfg = cli.resolve_config()?;
            utilities::init_logging(&cfg.log_path)?;
            let ctx = PipelineContext::new(cfg, cli.resolve_password()?)?;

            let (key, cert, pkg) = if args.key_only {
                (true, false, false)
            } else if args.cert_only {
                (false, true, false)
            } else if args.package_only {
                (false, false, true)
            } else {
                (true, true, !args.no_package)
            };

            if key {
                let path = ca::generate_ca_key(&ctx, args.force)?;
                println!("Wrote {}", path.display());
            }
            if cert {
                let path = ca::generate_ca_cert(&ctx, args.force)?;
                println!("Wrote {}", path.display());
            }
            if pkg {
                let path = package::build_ca_package(&ctx)?;
                println!("Wrote {}", path.display());
            }
            Ok(())
        }
        Command::GenServer(args) => {
            let cfg = cli.resolve_config()?;
            utilities::init_logging(&cfg.log_path)?;
            let ctx = PipelineContext::new(cfg, cli.resolve_password()?)?;

            let (key, req, cert, pkg) = if args.key_only {
                (true, false, false, false)
            } else if args.cert_req_only {
                (false, true, false, false)
            } else if args.cert_only {
                (false, false, true, false)
            } else if args.package_only {
                (false, false, false, true)
            } else {
                // The full flow signs at the end; check the CA material
                // and password before generating anything.
                server::check_signing_prerequisites(&ctx)?;
                (true, true, true, !args.no_package)
            };

            if key {
                let path = server::generate_server_key(&ctx)?;
                println!("Wrote {}", path.display());
            }
            if req {
                let path = server::generate_server_cert_req(&ctx)?;
                println!("Wrote {}", path.display());
            }
            if cert {
                let path = server::generate_server_cert(&ctx)?;
                println!("Wrote {}", path.display());
            }
            if pkg {
                let path = package::build_server_package(&ctx)?;
                println!("Wrote {}", path.display());
            }
            Ok(())
        }
    }
}

/// Map a failure to the process exit code contract: 10-12 for CA steps,
/// 20-23 for server steps, 30-32 for configuration problems, 33 for a
/// missing artifact dependency, 1 for anything else.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    if let Some(pipeline_err) = err.downcast_ref::<pipeline::Error>() {
        return pipeline_err.exit_code();
    }
    if let Some(config_err) = err.downcast_ref::<models::ConfigError>() {
        return config_err.exit_code();
    }
    if err.downcast_ref::<toml::de::Error>().is_some() {
        return 32;
    }
    1
}

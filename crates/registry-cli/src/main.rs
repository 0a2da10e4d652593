//! `registry` binary: schema ledger and versioning mode operator tool.

use clap::{Parser, Subcommand};
use registry_cli::{commands, config};
use registry_db::{create_pool, DbRuntimeSettings};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "registry", version, about = "Business registry schema and versioning tool")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply ledger steps up to a target revision.
    Upgrade {
        #[arg(default_value = "head")]
        target: String,
    },
    /// Revert ledger steps down to a target revision (`base` reverts all).
    Downgrade { target: String },
    /// Show the current revision.
    Current,
    /// List ledger steps and which are applied.
    History,
    /// Show the versioning mode the configured flags select.
    Mode,
    /// List corp type reference data.
    CorpTypes,
}

fn resolve_config_path(cli_path: Option<String>) -> (Option<String>, &'static str) {
    if let Some(path) = cli_path.filter(|value| !value.trim().is_empty()) {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("REGISTRY_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(out) => println!("{out}"),
        Err(e) => tracing::error!(error = %e, "failed to encode output"),
    }
}

fn run(cli: Cli, config: &config::Config) -> Result<(), Box<dyn std::error::Error>> {
    if let Command::Mode = cli.command {
        let report = commands::mode(&config.versioning)?;
        if cli.json {
            print_json(&report);
        } else {
            println!("{}: {}", report.service, report.mode);
        }
        return Ok(());
    }

    let pool = create_pool(
        &config.database.path,
        DbRuntimeSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            pool_max_size: config.database.pool_max_size,
        },
    )?;
    let conn = pool.get()?;

    match cli.command {
        Command::Upgrade { target } => {
            let applied = commands::upgrade(&conn, &target)?;
            tracing::info!(count = applied, %target, "upgrade finished");
            println!("applied {applied} step(s)");
        }
        Command::Downgrade { target } => {
            let reverted = commands::downgrade(&conn, &target)?;
            tracing::info!(count = reverted, %target, "downgrade finished");
            println!("reverted {reverted} step(s)");
        }
        Command::Current => {
            let current = commands::current(&conn)?;
            if cli.json {
                print_json(&current);
            } else {
                println!("{}", current.as_deref().unwrap_or("base"));
            }
        }
        Command::History => {
            let entries = commands::history(&conn)?;
            if cli.json {
                print_json(&entries);
            } else {
                for entry in entries {
                    let marker = match (entry.current, entry.applied) {
                        (true, _) => "*",
                        (false, true) => "+",
                        (false, false) => " ",
                    };
                    println!(
                        "{marker} {} -> {} {}",
                        entry.down_revision.unwrap_or("<base>"),
                        entry.revision,
                        entry.description
                    );
                }
            }
        }
        Command::CorpTypes => {
            let rows = commands::corp_types(&conn)?;
            if cli.json {
                print_json(&rows);
            } else {
                for row in rows {
                    println!("{:<4} {:<8} {}", row.corp_type_cd, row.corp_class, row.full_desc);
                }
            }
        }
        Command::Mode => {}
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let (resolved_config_path, config_source) = resolve_config_path(cli.config.clone());
    let selected_config_path = resolved_config_path.as_deref().or(Some("registry.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration; the tool cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    if let Err(e) = run(cli, &config) {
        tracing::error!(error = %e, "command failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::error;

use provwatch_lib::client::CompletionRequest;
use provwatch_lib::commands::{alerts, config, credentials, health};
use provwatch_lib::{db, init_tracing, Monitor};

#[derive(Parser)]
#[command(name = "provwatch")]
#[command(about = "Provider fallback with credential health monitoring", long_about = None)]
#[command(version)]
struct Cli {
    /// Data directory (defaults to ~/.provwatch)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Health report for every tracked credential
    Health,

    /// Per-status counts and overall rating
    Summary,

    /// Recent alert history
    Alerts {
        #[arg(long, default_value = "20")]
        limit: u32,

        /// Print window counts instead of entries
        #[arg(long)]
        summary: bool,
    },

    /// Clear a credential's failure streak after remediation
    Reset { caller: String, provider: String },

    /// Check keys with a cheap provider call, skipping recently verified ones
    Verify {
        /// Callers to check; defaults to every caller with a health record
        callers: Vec<String>,

        /// Check every key even if its last verification is still fresh
        #[arg(long)]
        force: bool,
    },

    /// Show or update alert channel configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Manage provider secrets in the OS keychain
    Secret {
        #[command(subcommand)]
        action: SecretAction,
    },

    /// Send a prompt through the fallback chain for a caller
    Invoke { caller: String, prompt: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    Show,
    /// Apply a JSON merge patch, e.g. '{"slackWebhook": "https://..."}'
    Update { patch: String },
}

#[derive(Subcommand)]
enum SecretAction {
    /// Read the secret from --value or the first line of stdin
    Set {
        caller: String,
        provider: String,
        #[arg(long)]
        value: Option<String>,
    },
    Delete { caller: String, provider: String },
    Exists { caller: String, provider: String },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), String> {
    let json = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", json);
    Ok(())
}

fn read_secret(value: Option<String>) -> Result<String, String> {
    if let Some(v) = value {
        return Ok(v);
    }
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| e.to_string())?;
    Ok(line.trim_end().to_string())
}

async fn run(cli: Cli) -> Result<(), String> {
    let data_dir = cli.data_dir.unwrap_or_else(db::provwatch_data_dir);
    // Every command exits when done; nothing to hot-reload.
    let monitor = Monitor::open(&data_dir, false)?;

    match cli.command {
        Commands::Health => print_json(&health::health_report(&monitor)?),
        Commands::Summary => print_json(&health::health_summary(&monitor)?),
        Commands::Alerts { limit, summary } => {
            if summary {
                print_json(&alerts::alerts_summary(&monitor)?)
            } else {
                print_json(&alerts::alerts_recent(&monitor, limit)?)
            }
        }
        Commands::Reset { caller, provider } => {
            health::health_reset(&monitor, &caller, &provider)?;
            print_json(&monitor.metrics().get_health(&caller, &provider)?)
        }
        Commands::Verify { callers, force } => {
            print_json(&health::health_verify(&monitor, &callers, force).await?)
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => print_json(&config::config_get(&monitor)),
            ConfigAction::Update { patch } => {
                print_json(&config::config_update(&monitor, &patch).await?)
            }
        },
        Commands::Secret { action } => match action {
            SecretAction::Set {
                caller,
                provider,
                value,
            } => {
                let secret = read_secret(value)?;
                credentials::credentials_set(&monitor, &caller, &provider, &secret)
            }
            SecretAction::Delete { caller, provider } => {
                credentials::credentials_delete(&monitor, &caller, &provider)
            }
            SecretAction::Exists { caller, provider } => {
                print_json(&credentials::credentials_exists(&monitor, &caller, &provider)?)
            }
        },
        Commands::Invoke { caller, prompt } => {
            match monitor
                .engine()
                .invoke(&caller, &CompletionRequest::prompt(prompt))
                .await
            {
                Ok(response) => print_json(&response),
                Err(provwatch_lib::engine::InvokeError::Exhausted(agg)) => {
                    print_json(&agg)?;
                    Err(agg.to_string())
                }
                Err(e) => Err(e.to_string()),
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

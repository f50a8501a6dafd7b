use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use assured_ledger::anchor::registry::RegistryClient;
use assured_ledger::anchor::signer::SigningRegistryClient;
use assured_ledger::anchor::{LedgerQuery, RegistryReader, RegistrySigner};
use assured_ledger::config::AppConfig;
use assured_ledger::error::{LedgerError, Result};
use assured_ledger::pipeline;
use assured_ledger::project::Workspace;
use assured_ledger::server::{self, AppState};
use assured_ledger::snapshot::Step;

#[derive(Parser)]
#[command(name = "assured-ledger")]
#[command(about = "Tamper-evident lab workflow snapshots anchored on-chain")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new project
    Init {
        project: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        cell_line: Option<String>,
        #[arg(long)]
        owner: Option<String>,
    },
    /// Write a snapshot of a stage's form fields
    Capture {
        project: String,
        /// Step label or directory name (e.g. "Design", "seed_bank")
        step: Step,
        /// JSON object with the form fields
        #[arg(long)]
        fields: Option<PathBuf>,
    },
    /// Anchor a snapshot's hash on-chain and write its chain proof
    Anchor {
        project: String,
        snapshot: PathBuf,
        /// Anchor even if readiness checks report issues
        #[arg(long)]
        force: bool,
    },
    /// Check a snapshot against its chain proof and the ledger
    Verify { snapshot: PathBuf },
    /// List a project's snapshots and their anchoring state
    Status { project: String },
    /// Print ledger entries from the registry's event log
    Ledger {
        #[arg(long)]
        from_block: Option<u64>,
        #[arg(long)]
        to_block: Option<u64>,
    },
    /// Run the HTTP API
    Serve,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "assured_ledger=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<ExitCode> {
    let config = AppConfig::from_env()?;
    let workspace = Workspace::new(&config.data_dir);

    match command {
        Commands::Init {
            project,
            name,
            cell_line,
            owner,
        } => {
            let mut meta = Map::new();
            for (key, value) in [("project_name", name), ("cell_line", cell_line), ("owner", owner)] {
                if let Some(value) = value {
                    meta.insert(key.into(), Value::String(value));
                }
            }
            print_json(&workspace.create_project(&project, meta)?.meta)?;
        }
        Commands::Capture {
            project,
            step,
            fields,
        } => {
            let fields = match fields {
                Some(path) => read_fields(&path)?,
                None => Map::new(),
            };
            let result = pipeline::capture(&workspace, &project, step, fields)?;
            print_json(&result)?;
        }
        Commands::Anchor {
            project,
            snapshot,
            force,
        } => {
            let signer = signing_client(&config)?;
            let result = pipeline::anchor(&workspace, &project, &snapshot, &signer, force).await?;
            print_json(&result)?;
        }
        Commands::Verify { snapshot } => {
            let reader = RegistryClient::new(config.require_chain()?.clone());
            let verification = pipeline::verify(&snapshot, &reader).await?;
            print_json(&verification)?;
            if !verification.is_verified() {
                return Ok(ExitCode::from(2));
            }
        }
        Commands::Status { project } => {
            print_json(&pipeline::list_snapshots(&workspace, &project)?)?;
        }
        Commands::Ledger {
            from_block,
            to_block,
        } => {
            let reader = RegistryClient::new(config.require_chain()?.clone());
            let entries = reader
                .logged_events(LedgerQuery {
                    from_block,
                    to_block,
                })
                .await?;
            print_json(&entries)?;
        }
        Commands::Serve => {
            let reader = config
                .chain
                .clone()
                .map(|chain| Arc::new(RegistryClient::new(chain)) as Arc<dyn RegistryReader>);
            let signer = match config.signer {
                Some(_) => Some(Arc::new(signing_client(&config)?) as Arc<dyn RegistrySigner>),
                None => None,
            };
            if signer.is_none() {
                tracing::warn!("No signing key configured; anchoring is disabled");
            }
            let state = AppState::new(workspace, reader, signer);
            server::serve(state, config.bind_addr).await?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn signing_client(config: &AppConfig) -> Result<SigningRegistryClient> {
    let registry = RegistryClient::new(config.require_chain()?.clone());
    let client = SigningRegistryClient::new(registry, config.require_signer()?)?;
    tracing::info!(submitter = %client.submitter(), "Signing client ready");
    Ok(client)
}

fn read_fields(path: &Path) -> Result<Map<String, Value>> {
    let bytes = std::fs::read(path)?;
    match serde_json::from_slice(&bytes) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(LedgerError::Validation(format!(
            "{} must contain a JSON object",
            path.display()
        ))),
        Err(e) => Err(LedgerError::Serialization(format!("{}: {e}", path.display()))),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out =
        serde_json::to_string_pretty(value).map_err(|e| LedgerError::Serialization(e.to_string()))?;
    println!("{out}");
    Ok(())
}

//! Oracle routing reconciler
//!
//! Brings the on-chain oracle routing table in line with one or more
//! desired-state descriptors:
//! - CLI arguments and TOML config file support
//! - Direct execution for node-held identities, Safe batching for the rest
//! - Simulated (impersonation) or external (Safe Transaction Service) approval
//! - Structured logging with tracing

use std::path::PathBuf;
use std::sync::Mutex;

use alloy::primitives::hex;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use oracle_sync::{
    AppConfig, ApprovalAuthority, ApprovalMode, BatchFile, DesiredState, DispatchOutcome,
    DispatchState, ExecutionDriver, ExternalAuthority, LogFormat, RpcChain, SafeTransactionService,
    SimulatedAuthority,
};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser)]
#[command(name = "oracle_sync")]
#[command(version, about = "Oracle routing reconciler with Safe batching", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "oracle_sync.toml")]
    config: String,

    /// Desired-state descriptor (repeatable, one pass each, in order)
    #[arg(long)]
    desired: Vec<PathBuf>,

    /// Override the node's JSON-RPC URL
    #[arg(long)]
    rpc_url: Option<String>,

    /// Override approval mode (simulated, external)
    #[arg(long)]
    mode: Option<String>,

    /// Safe delegate private key (overrides config)
    #[arg(long, env = "ORACLE_SYNC_DELEGATE_KEY")]
    delegate_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Output format (pretty, json, compact)
    #[arg(long)]
    log_format: Option<String>,

    /// Log file path (logs to both file and stdout)
    #[arg(long)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a sample config file
    GenerateConfig {
        /// Output file path
        #[arg(short, long, default_value = "oracle_sync.toml")]
        output: String,
    },
    /// Validate config without running
    ValidateConfig,
    /// Show the pending Safe batch
    Status,
    /// Print the corrections each descriptor needs, without sending or queueing
    Plan,
    /// Reconcile every descriptor and dispatch the batch (default)
    Run,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if it exists (before parsing CLI args)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Some(Commands::GenerateConfig { output }) = &cli.command {
        std::fs::write(output, AppConfig::sample_toml()?)?;
        println!("Sample config written to: {output}");
        return Ok(());
    }

    let config = load_config(&cli)?;

    match &cli.command {
        Some(Commands::ValidateConfig) => {
            config.validate()?;
            // toml output never includes the delegate key
            println!("Configuration is valid:\n{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        Some(Commands::Status) => {
            return show_batch_status(&config);
        }
        _ => {}
    }

    setup_logging(&config, &cli)?;
    config.validate()?;

    let passes = config
        .desired
        .files
        .iter()
        .map(|path| DesiredState::load(path))
        .collect::<Result<Vec<_>, _>>()?;
    if passes.is_empty() {
        return Err("No descriptor given. Use --desired <file> or [desired] files in config.".into());
    }

    let chain = RpcChain::connect(None, &config.network.rpc_url).await?;
    let chain_id = match config.network.chain_id {
        Some(chain_id) => chain_id,
        None => chain.chain_id().await?,
    };
    info!(
        rpc_url = %config.network.rpc_url,
        chain_id = chain_id,
        mode = ?config.network.mode,
        governor = %config.governance.governor,
        passes = passes.len(),
        "Starting oracle_sync"
    );

    let driver = ExecutionDriver::new(
        &chain,
        &chain,
        config.contracts,
        config.governance.governor,
        BatchFile::new(&config.batch.path),
    )
    .with_policy(config.reconcile);

    if let Some(Commands::Plan) = &cli.command {
        for (index, desired) in passes.iter().enumerate() {
            let calls = driver.plan(desired).await?;
            println!("Pass {} ({} corrections):", index + 1, calls.len());
            for call in &calls {
                println!("  {call}");
            }
        }
        return Ok(());
    }

    let authority: Box<dyn ApprovalAuthority + '_> = match config.network.mode {
        ApprovalMode::Simulated => {
            Box::new(SimulatedAuthority::new(&chain, config.governance.governor))
        }
        ApprovalMode::External => {
            let wallet = config.governance.delegate_wallet()?;
            let delegate = config.governance.delegate.unwrap_or(wallet.address());
            let service = SafeTransactionService::new(
                None,
                &config.governance.safe_service_url(chain_id)?,
                chain_id,
                config.governance.governor,
                config.governance.multi_send,
                wallet,
            );
            Box::new(ExternalAuthority::new(service, delegate))
        }
    };

    let report = driver.run(&passes, authority.as_ref()).await?;

    for (index, pass) in report.passes.iter().enumerate() {
        println!(
            "Pass {}: {} proposed, {} executed, {} queued, {} already queued",
            index + 1,
            pass.proposed,
            pass.executed,
            pass.queued,
            pass.duplicates
        );
    }
    match report.outcome {
        DispatchOutcome::Empty => println!("Nothing to approve."),
        DispatchOutcome::Applied { executed } => {
            println!("Applied {} batched transactions.", executed.len())
        }
        DispatchOutcome::PendingApproval { proposal_id } => {
            println!("Batch proposed to the Safe, awaiting approval: {proposal_id}")
        }
    }
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Config file merged with CLI overrides.
fn load_config(cli: &Cli) -> Result<AppConfig, Box<dyn std::error::Error>> {
    let mut config = AppConfig::load(std::path::Path::new(&cli.config))?;

    if let Some(rpc_url) = &cli.rpc_url {
        config.network.rpc_url = rpc_url.clone();
    }
    if let Some(mode) = &cli.mode {
        config.network.mode = mode.parse()?;
    }
    if let Some(key) = &cli.delegate_key {
        config.governance.delegate_private_key = Some(key.clone());
    }
    if !cli.desired.is_empty() {
        config.desired.files = cli.desired.clone();
    }
    Ok(config)
}

fn setup_logging(config: &AppConfig, cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let level = cli.log_level.as_ref().unwrap_or(&config.logging.level);

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)?
            .add_directive("hyper=warn".parse()?)
            .add_directive("reqwest=warn".parse()?),
    };

    let format = cli
        .log_format
        .as_deref()
        .unwrap_or(match config.logging.format {
            LogFormat::Json => "json",
            LogFormat::Compact => "compact",
            LogFormat::Pretty => "pretty",
        });

    let log_file = cli.log_file.as_ref().or(config.logging.log_file.as_ref());

    if let Some(log_path) = log_file {
        let file = Mutex::new(std::fs::File::create(log_path)?);

        // When logging to file, use JSON format for both (easier to parse)
        let stdout_layer = tracing_subscriber::fmt::layer().json();
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .json();

        tracing_subscriber::registry()
            .with(filter)
            .with(stdout_layer)
            .with(file_layer)
            .init();

        eprintln!("Logging to file: {log_path} (using JSON format for both stdout and file)");
    } else {
        match format {
            "json" => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .json()
                    .init();
            }
            "compact" => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .compact()
                    .init();
            }
            _ => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_target(false)
                    .init();
            }
        }
    }

    Ok(())
}

/// Print the pending batch without touching the node.
fn show_batch_status(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let batch = BatchFile::new(&config.batch.path);
    let entries = batch.drain()?;
    let state = if entries.is_empty() {
        DispatchState::Empty
    } else {
        DispatchState::PendingLocal {
            count: entries.len(),
        }
    };

    println!("Batch: {}", batch.path().display());
    match state {
        DispatchState::Empty => println!("No transactions pending."),
        DispatchState::PendingLocal { count } => {
            println!("{count} transactions pending approval:");
            for (index, tx) in entries.iter().enumerate() {
                println!(
                    "  [{index}] to={} value={} data={}",
                    tx.to(),
                    tx.value(),
                    hex::encode_prefixed(tx.data())
                );
            }
        }
    }
    Ok(())
}

//! AutoFixIDE service binary.
//!
//! `autofix serve` (the default) starts the HTTP/WebSocket server;
//! `autofix exec <file>` runs one file through the pipeline and prints the
//! outcome as JSON.

use anyhow::{Context, Result};
use autofix_core::config::{AppConfig, ConfigLoader};
use autofix_core::{CodeSubmission, Pipeline};
use autofix_server::{shutdown_signal, AutofixServer, ServerConfig};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[clap(author, version, about = "AutoFixIDE - run code and explain what went wrong")]
struct Cli {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(long, default_value = ".env", help = "Environment file to load; skipped when it does not exist")]
    env_file: PathBuf,

    #[clap(long, help = "Address to bind, overrides HOST and PORT")]
    bind_addr: Option<String>,

    #[clap(long, short, help = "Log level, overrides LOG_LEVEL")]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the server (default command)
    Serve,
    /// Run a file once and print the outcome
    Exec {
        file: PathBuf,

        #[clap(long, help = "Only execute, never ask for a diagnosis")]
        no_diagnose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_loaded = load_env_file(&cli.env_file)?;
    let config = ConfigLoader::read_lookup(&|key: &str| std::env::var(key).ok())?;

    init_logging(cli.log_level.as_deref(), &config)?;
    if let Some(count) = env_loaded {
        log::info!("Loaded {} variables from {}", count, cli.env_file.display());
    }

    // Fail fast: nothing starts without a usable configuration and credential.
    config.validate()?;

    match cli.command {
        Some(Commands::Exec { file, no_diagnose }) => exec_file(&config, &file, no_diagnose).await,
        Some(Commands::Serve) | None => run_server(&config, cli.bind_addr).await,
    }
}

fn load_env_file(path: &Path) -> Result<Option<usize>> {
    if !path.exists() {
        return Ok(None);
    }
    let count = ConfigLoader::load_env_file(path)?;
    Ok(Some(count))
}

fn init_logging(cli_level: Option<&str>, config: &AppConfig) -> Result<()> {
    let level = cli_level.unwrap_or(config.logging.level.as_str());
    let level_filter = level.parse().unwrap_or(LevelFilter::Info);

    let mut builder = env_logger::Builder::new();
    builder.filter_level(level_filter);

    if let Some(file) = &config.logging.file {
        let target = OpenOptions::new()
            .create(true)
            .append(true)
            .open(file)
            .with_context(|| format!("Failed to open log file {}", file.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(target)));
    }

    builder.init();
    Ok(())
}

async fn run_server(config: &AppConfig, bind_addr: Option<String>) -> Result<()> {
    let pipeline = Pipeline::from_config(config)?;

    let mut server_config = ServerConfig::from_app_config(config)?;
    if let Some(addr) = bind_addr {
        server_config = server_config.with_bind_addr_str(&addr)?;
    }

    log::info!(
        "Using model {} with {}s execution timeout",
        config.llm.model,
        config.execution.timeout_secs
    );
    if !config.execution.safe_mode {
        log::warn!("SAFE_MODE is off: submissions inherit the server environment.");
    }

    let server = AutofixServer::with_config(pipeline, server_config);
    if let Err(e) = server.serve_with_shutdown(shutdown_signal()).await {
        log::error!("Server failed: {}", e);
        return Err(e.into());
    }

    Ok(())
}

async fn exec_file(config: &AppConfig, file: &Path, no_diagnose: bool) -> Result<()> {
    let source = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let submission = CodeSubmission::new(source);
    let pipeline = Pipeline::from_config(config)?;

    let rendered = if no_diagnose {
        serde_json::to_string_pretty(&pipeline.execute_only(&submission).await)?
    } else {
        serde_json::to_string_pretty(&pipeline.run(&submission).await)?
    };
    println!("{}", rendered);

    Ok(())
}

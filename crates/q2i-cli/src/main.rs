//! Q2I CLI - transactional queue to InfluxDB sink.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use q2i_core::config::{LogFormat, LogLevel};
use q2i_core::Config;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions: 0 is success, 1-127 are application errors.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, missing required fields)
    ConfigError = 1,
    /// InfluxDB error (connection, query, write)
    InfluxError = 2,
    /// Channel or spool file error
    ChannelError = 3,
    /// Malformed record
    CodecError = 4,
    /// Rollback failed; delivery state is unknown
    TransactionError = 5,
    /// General runtime error
    RuntimeError = 10,
}

impl ExitCode {
    /// Map an error to an exit code, by type when it is a core error and by
    /// message otherwise.
    fn from_error(error: &anyhow::Error) -> Self {
        if let Some(err) = error.downcast_ref::<q2i_core::Error>() {
            return Self::from_core(err);
        }
        if error.downcast_ref::<q2i_core::ChannelError>().is_some() {
            return ExitCode::ChannelError;
        }
        if error.downcast_ref::<q2i_core::CodecError>().is_some() {
            return ExitCode::CodecError;
        }

        let error_str = error.to_string().to_lowercase();
        if error_str.contains("config") || error_str.contains("toml") {
            ExitCode::ConfigError
        } else if error_str.contains("influx") {
            ExitCode::InfluxError
        } else if error_str.contains("spool") || error_str.contains("channel") {
            ExitCode::ChannelError
        } else if error_str.contains("record") || error_str.contains("point") {
            ExitCode::CodecError
        } else {
            ExitCode::RuntimeError
        }
    }

    fn from_core(err: &q2i_core::Error) -> Self {
        use q2i_core::Error;
        match err {
            Error::Config(_) | Error::Serialization(_) => ExitCode::ConfigError,
            Error::Influx(_) => ExitCode::InfluxError,
            Error::Channel(_) | Error::Io(_) => ExitCode::ChannelError,
            Error::Codec(_) | Error::InvalidPoint(_) => ExitCode::CodecError,
            Error::TransactionFailure { .. } => ExitCode::TransactionError,
            Error::Delivery { cause } => Self::from_core(cause),
            Error::NotRunning => ExitCode::RuntimeError,
        }
    }
}

mod commands;
mod server;

#[derive(Parser)]
#[command(name = "q2i")]
#[command(about = "Transactional queue to InfluxDB sink", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "Q2I_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Drain spool files into InfluxDB
    Run {
        /// Spool files to load into the channel
        #[arg(long, short)]
        spool: Vec<PathBuf>,

        /// Override the batch size
        #[arg(long)]
        batch_size: Option<usize>,

        /// Exit once the channel is drained
        #[arg(long)]
        once: bool,

        /// Do not start the health and metrics servers
        #[arg(long)]
        no_server: bool,
    },

    /// Validate configuration file
    Validate,

    /// Encode JSON points (one per line) into a spool file
    Encode {
        /// Input file (stdin if omitted)
        #[arg(long, short)]
        input: Option<PathBuf>,

        /// Spool file to write
        #[arg(long, short)]
        output: PathBuf,
    },

    /// Print the records of a spool file as JSON points
    Decode {
        /// Spool file to read
        input: PathBuf,

        /// Skip malformed records instead of failing
        #[arg(long)]
        skip_invalid: bool,
    },

    /// Show status and health of a running sink
    Status {
        /// Health endpoint URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,

        /// Metrics endpoint URL
        #[arg(long, default_value = "http://localhost:9090")]
        metrics_url: String,
    },
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Log settings come from the config file when it parses; otherwise defaults
    let monitoring = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring);
    let log_format = monitoring
        .as_ref()
        .map(|m| m.log_format)
        .unwrap_or(LogFormat::Json);
    let log_level = monitoring
        .as_ref()
        .map(|m| m.log_level)
        .unwrap_or(LogLevel::Info);

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new(log_level.as_str()),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    // Logs go to stderr so decode output on stdout stays clean
    match log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }

    match execute_command(cli).await {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

async fn execute_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            spool,
            batch_size,
            once,
            no_server,
        } => {
            let config = load_config(&cli.config)?;
            let options = commands::run::RunOptions {
                spool,
                batch_size,
                once,
                no_server,
            };
            commands::run::run(config, options).await?;
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            if let Err(issues) = config.settings() {
                for issue in &issues {
                    println!("  - {}", issue);
                }
                bail!("Configuration is invalid ({} issues)", issues.len());
            }
            println!("Configuration is valid");
        }

        Commands::Encode { input, output } => {
            commands::encode::run(input.as_deref(), &output)?;
        }

        Commands::Decode {
            input,
            skip_invalid,
        } => {
            commands::decode::run(&input, skip_invalid)?;
        }

        Commands::Status { url, metrics_url } => {
            commands::status::run(&url, &metrics_url).await?;
        }
    }

    Ok(())
}

/// Read the config file without validating it; each command validates what it needs.
fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    let path = path.clone().unwrap_or_else(|| PathBuf::from("config.toml"));

    let content = std::fs::read_to_string(&path)?;
    let config: Config = toml::from_str(&content)?;
    Ok(config)
}

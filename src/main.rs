//! Mooltipass command-line client.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mooltipass_hid as app;
use serde::Serialize;
use serde_json::json;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use app::config::{AppConfig, ConfigLoadResult, LoggingConfig};
use app::mp::{ContextResult, Credential, DeviceState, MooltipassClient};
use app::AppError;

/// Talk to a Mooltipass over USB.
#[derive(Parser)]
#[command(name = "mooltipass", version)]
struct Cli {
    /// Config file (default: per-user config directory)
    #[arg(long, env = "MOOLTIPASS_CONFIG")]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check the device answers
    Ping,
    /// Print the firmware version
    Version,
    /// Print the device status
    Status,
    /// Select a credential context
    SetContext { name: String },
    /// Create a credential context
    AddContext { name: String },
    /// Set the login of a context
    SetLogin { context: String, login: String },
    /// Set the password of a context
    SetPassword {
        context: String,
        #[arg(long, env = "MOOLTIPASS_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Store a login/password pair, creating the context if needed
    Store {
        context: String,
        login: String,
        #[arg(long, env = "MOOLTIPASS_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Enter and leave memory management mode
    MemoryManagement,
    /// Write a config file with default values
    InitConfig,
}

/// One command's outcome.
#[derive(Serialize)]
struct Report {
    command: &'static str,
    result: serde_json::Value,
    state: DeviceState,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let load_result = AppConfig::try_load(&config_path);
    let logging = match &load_result {
        ConfigLoadResult::Loaded(config) => config.logging.clone(),
        _ => LoggingConfig::default(),
    };
    let _guard = init_logging(&logging);

    tracing::info!("Config path: {:?}", config_path);
    let config = match load_result {
        ConfigLoadResult::Loaded(config) => {
            tracing::info!("Config loaded successfully");
            config
        }
        ConfigLoadResult::Missing => {
            tracing::info!("Config missing, using defaults");
            AppConfig::default()
        }
        ConfigLoadResult::Invalid(e) => {
            tracing::error!("Config invalid: {}", e);
            eprintln!("Error: invalid config {}: {e}", config_path.display());
            return ExitCode::from(AppError::from(e).exit_code() as u8);
        }
    };

    match run(&cli, &config, &config_path) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("Error: {e:#}");
            let code = e.downcast_ref::<AppError>().map(AppError::exit_code).unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

/// Install the stderr subscriber, plus a file writer when configured.
fn init_logging(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let stderr = fmt::layer().with_writer(std::io::stderr);

    match &config.file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path.file_name().unwrap_or(OsStr::new("mooltipass.log"));
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(fmt::layer().with_ansi(false).with_writer(writer))
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

fn run(cli: &Cli, config: &AppConfig, config_path: &Path) -> anyhow::Result<()> {
    if let Command::InitConfig = cli.command {
        config.save(config_path).map_err(AppError::from)?;
        println!("Wrote {}", config_path.display());
        return Ok(());
    }

    let mut client = MooltipassClient::open(&config.device, config.timeouts.to_timeouts())
        .map_err(AppError::from)
        .context("Failed to open Mooltipass")?;

    let report = execute(&mut client, &cli.command)?;
    client.close();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report).map_err(AppError::from)?);
    } else {
        println!("{}: {} (state: {:?})", report.command, human(&report.result), report.state);
    }
    Ok(())
}

fn execute(client: &mut MooltipassClient, command: &Command) -> app::Result<Report> {
    let (name, result) = match command {
        Command::Ping => {
            client.ping()?;
            ("ping", json!("ok"))
        }
        Command::Version => {
            let payload = client.get_version()?;
            let text = String::from_utf8_lossy(&payload).trim_end_matches('\0').to_string();
            ("version", json!({ "text": text, "raw": hex(&payload) }))
        }
        Command::Status => {
            let status = client.get_status()?;
            ("status", json!({ "status": status, "byte": status.byte() }))
        }
        Command::SetContext { name } => ("set-context", json!(client.set_context(name)?)),
        Command::AddContext { name } => ("add-context", json!(require(client.add_context(name)?, "add-context")?)),
        Command::SetLogin { context, login } => {
            select_context(client, context)?;
            ("set-login", json!(require(client.set_login(login)?, "set-login")?))
        }
        Command::SetPassword { context, password } => {
            select_context(client, context)?;
            ("set-password", json!(require(client.set_password(password)?, "set-password")?))
        }
        Command::Store {
            context,
            login,
            password,
        } => {
            let credential = Credential::new(login.as_str(), password.as_str());
            let stored = client.store_credential(context, &credential)?;
            ("store", json!(require(stored, "store")?))
        }
        Command::MemoryManagement => {
            require(client.start_memory_management()?, "start-memory-management")?;
            let ended = client.end_memory_management()?;
            ("memory-management", json!(require(ended, "end-memory-management")?))
        }
        Command::InitConfig => unreachable!("handled before opening the device"),
    };

    Ok(Report {
        command: name,
        result,
        state: client.state(),
    })
}

fn select_context(client: &mut MooltipassClient, context: &str) -> app::Result<()> {
    match client.set_context(context)? {
        ContextResult::KnownTrue => Ok(()),
        ContextResult::KnownFalse => Err(AppError::refused(format!("unknown context {context}"))),
        ContextResult::NoCard => Err(AppError::refused("no card inserted")),
    }
}

fn require(ok: bool, what: &str) -> app::Result<bool> {
    if ok {
        Ok(true)
    } else {
        Err(AppError::refused(what.to_string()))
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn human(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

//! chatsync: chat session store with account sync
//!
//! Usage:
//!   chatsync <command> [args]     - Run one command and exit
//!   chatsync --user <id> <command> - Run one command as a signed-in user
//!   chatsync --cli                 - Start interactive CLI mode
//!   chatsync --help                - Show help

mod cli;
mod commands;

use chatsync_core::{Config, ReconciliationEngine};
use tracing_subscriber::EnvFilter;

use commands::Command;

/// Run mode
#[derive(Debug, PartialEq, Eq)]
enum RunMode {
    /// Run a single command
    Once(Vec<String>),
    /// Interactive CLI mode
    Cli,
    /// Show help
    Help,
    /// Show version
    Version,
}

/// Parsed command line
#[derive(Debug, PartialEq, Eq)]
struct Args {
    mode: RunMode,
    user: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = parse_args(std::env::args().skip(1))?;

    let words = match args.mode {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("chatsync {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        RunMode::Once(ref words) if words.is_empty() => {
            print_help();
            return Ok(());
        }
        RunMode::Once(ref words) => Some(words.clone()),
        RunMode::Cli => None,
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    // Load .env file
    dotenvy::dotenv().ok();

    let config = Config::load().map_err(|e| anyhow::anyhow!("Config error: {}", e))?;
    tracing::info!("Local database: {}", config.local.db_path);
    if let Some(url) = &config.remote.base_url {
        tracing::info!("Session service: {}", url);
    }

    let engine = ReconciliationEngine::from_config(&config)
        .map_err(|e| anyhow::anyhow!("Failed to open session store: {}", e))?;

    if let Some(user) = &args.user {
        if let Some(report) = engine.sign_in(user.as_str()).await? {
            println!("{}", commands::format_migration(&report));
        }
    }

    match words {
        None => {
            tracing::info!("Running in CLI mode");
            cli::run_cli(engine).await
        }
        Some(words) => {
            let command = Command::parse(&words).map_err(|e| anyhow::anyhow!(e))?;
            match commands::execute(&engine, command).await {
                Ok(output) => {
                    println!("{}", output);
                    Ok(())
                }
                Err(e) => {
                    eprintln!("❌ {}", commands::feedback_message(&e));
                    std::process::exit(1);
                }
            }
        }
    }
}

/// Parse command line arguments
fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Args> {
    let mut args = args.into_iter();
    let mut user = None;
    let mut words = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--cli" | "-c" if words.is_empty() => return Ok(Args { mode: RunMode::Cli, user }),
            "--help" | "-h" => return Ok(Args { mode: RunMode::Help, user }),
            "--version" | "-v" => return Ok(Args { mode: RunMode::Version, user }),
            "--user" | "-u" if words.is_empty() => {
                let id = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--user needs a user id"))?;
                user = Some(id);
            }
            _ => words.push(arg),
        }
    }

    Ok(Args {
        mode: RunMode::Once(words),
        user,
    })
}

/// Print help message
fn print_help() {
    println!("chatsync - chat session store with account sync");
    println!();
    println!("Usage:");
    println!("  chatsync [--user <id>] <command> [args]   Run one command");
    println!("  chatsync [--user <id>] --cli              Start interactive CLI mode");
    println!("  chatsync --help                           Show this help message");
    println!("  chatsync --version                        Show version");
    println!();
    println!("Commands:");
    for (name, args, desc) in commands::COMMANDS {
        let usage = format!("{} {}", name, args);
        println!("  {:<24} {}", usage.trim_end(), desc);
    }
    println!();
    println!("Environment Variables:");
    println!("  CHATSYNC_DB_PATH        Local SQLite database (default: data/chatsync.db)");
    println!("  CHATSYNC_STORAGE_KEY    Key of the local collection (default: chatSessions)");
    println!("  CHATSYNC_REMOTE_URL     Session service base URL (optional)");
    println!("  CHATSYNC_API_TOKEN      Bearer token for the session service");
    println!("  CHATSYNC_TIMEOUT_SECS   Request timeout in seconds (default: 30)");
    println!("  CHATSYNC_AUTO_MIGRATE   Migrate local sessions on sign-in (default: true)");
    println!("  RUST_LOG                Log filter (default: info)");
}

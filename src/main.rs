//! chatcore - command-line entry point
//!
//! Loads the database configuration from the environment and runs one
//! maintenance command against it.

use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use chatcore::app::Backend;
use chatcore::db::{DatabaseConfig, EnvAccessor};
use chatcore::facade::VerifiedIdentity;

enum Command {
    Health,
    SyncUser { email: String, name: String },
    Stats,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let mut url: Option<String> = None;
    let mut verbose = false;
    let mut positional: Vec<String> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-d" | "--database" => {
                i += 1;
                if i < args.len() {
                    url = Some(args[i].clone());
                }
            }
            "-v" | "--verbose" => {
                verbose = true;
            }
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "--version" => {
                println!("chatcore v{}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            arg if arg.starts_with('-') => {
                eprintln!("Unknown option: {}", arg);
                return ExitCode::FAILURE;
            }
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    init_tracing(verbose);

    let command = match parse_command(&positional) {
        Some(command) => command,
        None => {
            print_help();
            return ExitCode::FAILURE;
        }
    };

    let mut env = EnvAccessor::from_env();
    if let Some(url) = url {
        env = env.with_override("DATABASE_URL", url);
    }
    let config = match DatabaseConfig::from_accessor(&env) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let backend = match Backend::bootstrap(config) {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("Error opening database: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let outcome = run(&backend, command).await;
    let closed = backend.close();

    match (outcome, closed) {
        (Ok(true), Ok(())) => ExitCode::SUCCESS,
        (Ok(false), _) => ExitCode::FAILURE,
        (Err(e), _) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
        (Ok(true), Err(e)) => {
            eprintln!("Error closing database: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_command(args: &[String]) -> Option<Command> {
    match args {
        [cmd] if cmd == "health" => Some(Command::Health),
        [cmd] if cmd == "stats" => Some(Command::Stats),
        [cmd, email, name] if cmd == "sync-user" => Some(Command::SyncUser {
            email: email.clone(),
            name: name.clone(),
        }),
        _ => None,
    }
}

/// Run a command. `Ok(false)` means it ran but the answer is "unhealthy".
async fn run(backend: &Backend, command: Command) -> Result<bool, Box<dyn std::error::Error>> {
    match command {
        Command::Health => {
            let healthy = backend.is_healthy().await;
            println!("{}", if healthy { "ok" } else { "unhealthy" });
            Ok(healthy)
        }
        Command::SyncUser { email, name } => {
            let identity = VerifiedIdentity::new(email, name)?;
            let (outcome, user) = backend.iam.sync_identity(identity).await?;
            println!("{}\t{}\t{}\t{}", outcome, user.id, user.email, user.name);
            Ok(true)
        }
        Command::Stats => {
            let stats = backend.stats();
            println!("tables\t{}", stats.store.tables);
            println!("rows\t{}", stats.store.total_rows);
            println!("commit_seq\t{}", stats.store.commit_seq);
            println!("active_transactions\t{}", stats.active_transactions);
            println!(
                "connections\t{}/{}",
                stats.connections_in_use, stats.max_connections
            );
            Ok(true)
        }
    }
}

fn print_help() {
    println!("chatcore - transactional data core for a chat backend");
    println!();
    println!("Usage: chatcore [OPTIONS] <COMMAND>");
    println!();
    println!("Commands:");
    println!("  health                   Probe the database, exit non-zero if unhealthy");
    println!("  sync-user EMAIL NAME     Create or update the user with this email");
    println!("  stats                    Print store and pool statistics");
    println!();
    println!("Options:");
    println!("  -d, --database URL       memory:// or file://PATH (default: $DATABASE_URL)");
    println!("  -v, --verbose            Enable debug logging");
    println!("  -h, --help               Show this help message");
    println!("  --version                Show version");
    println!();
    println!("Environment:");
    println!("  DATABASE_URL, DATABASE_POOL_MAX, DATABASE_POOL_TIMEOUT_MS,");
    println!("  DATABASE_ISOLATION, RUST_LOG");
}

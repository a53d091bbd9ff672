//! Pageant - Unified Binary
//!
//! - Server mode: `pageant server [options]`
//! - Token minting for development: `pageant token --user <uuid>`
//!
//! Usage:
//!   pageant server --port 8080
//!   pageant server --in-memory --fixtures fixtures/demo.json
//!   pageant token --user 6f1c... --ttl 86400

mod server;
mod token;

use clap::{Parser, Subcommand};
use tracing::info;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "pageant")]
#[command(version)]
#[command(about = "Pageant scoring, signing and certification server")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scoring API and real-time fan-out server
    #[command(visible_alias = "s")]
    Server(server::ServerArgs),

    /// Mint a bearer token for an existing user
    Token(token::TokenArgs),

    /// Show version and build info
    Version,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("pageant=debug".parse().unwrap())
                .add_directive("pageant_server=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _sentry_guard = pageant_server::init_sentry();
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => {
            info!("Pageant v{} - Server Mode", VERSION);
            server::run(args).await
        }
        Commands::Token(args) => token::run(args),
        Commands::Version => {
            println!("Pageant v{}", VERSION);
            println!("  Build: {}", env!("CARGO_PKG_NAME"));
            println!("  Commit: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
            Ok(())
        }
    }
}

//! Server mode - scoring API, certification workflow and WebSocket fan-out

use anyhow::Result;
use clap::Args;
use pageant_server::config::{DEFAULT_DATABASE_URL, DEFAULT_SUBMIT_RATE_LIMIT, DEFAULT_WS_BUFFER};
use pageant_server::models::TieBreak;
use pageant_server::{api, db, AppState, MemoryStore, PgStore, ScoringStore, ServerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Server port
    #[arg(short, long, default_value = "8080", env = "PORT")]
    pub port: u16,

    /// Server host
    #[arg(long, default_value = "0.0.0.0", env = "HOST")]
    pub host: String,

    /// PostgreSQL base URL (without database name)
    #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL)]
    pub database_url: String,

    /// HS256 secret used to verify bearer tokens
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: String,

    /// Keep all state in process memory instead of PostgreSQL
    #[arg(long, env = "PAGEANT_IN_MEMORY")]
    pub in_memory: bool,

    /// JSON fixture seeding the in-memory store
    #[arg(long, env = "PAGEANT_FIXTURES", requires = "in_memory")]
    pub fixtures: Option<PathBuf>,

    /// Score submissions allowed per judge per minute
    #[arg(long, env = "SUBMIT_RATE_LIMIT", default_value_t = DEFAULT_SUBMIT_RATE_LIMIT)]
    pub submit_rate_limit: u32,

    /// Leaderboard tie-break: contestant_number | none
    #[arg(long, env = "LEADERBOARD_TIE_BREAK", default_value = "contestant_number")]
    pub tie_break: TieBreak,

    /// Outbound frames buffered per WebSocket connection
    #[arg(long, env = "WS_BUFFER", default_value_t = DEFAULT_WS_BUFFER)]
    pub ws_buffer: usize,
}

impl From<ServerArgs> for ServerConfig {
    fn from(args: ServerArgs) -> Self {
        ServerConfig {
            host: args.host,
            port: args.port,
            database_url: args.database_url,
            jwt_secret: args.jwt_secret,
            in_memory: args.in_memory,
            fixtures: args.fixtures,
            submit_rate_limit: args.submit_rate_limit,
            tie_break: args.tie_break,
            ws_buffer: args.ws_buffer,
        }
    }
}

async fn open_store(config: &ServerConfig) -> Result<Arc<dyn ScoringStore>> {
    if config.in_memory {
        let store = match &config.fixtures {
            Some(path) => {
                info!("Loading fixtures from {}", path.display());
                MemoryStore::from_fixture_file(path)?
            }
            None => MemoryStore::new(),
        };
        warn!("Using in-memory store; state is lost on restart");
        return Ok(Arc::new(store));
    }

    let pool = db::init_db(&config.database_url).await?;
    info!("Database: pageant_scoring");
    Ok(Arc::new(PgStore::new(pool)))
}

pub async fn run(args: ServerArgs) -> Result<()> {
    let config = ServerConfig::from(args);
    let addr = config.bind_addr();

    let store = open_store(&config).await?;
    let state = Arc::new(AppState::new(store, config));

    // Rate limit windows are only reset lazily; sweep idle judges
    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            sweeper.rules.cleanup_expired();
        }
    });

    let app = api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Server ready at http://{}", addr);
    info!("  Scoring:       /scoring/*");
    info!("  Certification: /tally-master/*, /auditor/*, /board/*");
    info!("  WebSocket:     ws://{}/ws?token=<jwt>", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

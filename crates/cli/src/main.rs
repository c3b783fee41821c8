use {
    clap::Parser,
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use courier_gateway::AppState;

#[derive(Parser)]
#[command(name = "courier", about = "courier — local gateway for pooled Codex accounts")]
struct Cli {
    /// Address to bind to (overrides config value).
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on (overrides config value).
    #[arg(long)]
    port: Option<u16>,

    /// Config file path (defaults to ./courier.yaml, then ~/.config/courier/).
    #[arg(long, env = "COURIER_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let mut config = match &cli.config {
        Some(path) => courier_config::load_config(path)
            .map_err(|e| anyhow::anyhow!("config: {e}"))?,
        None => courier_config::discover_and_load(),
    };
    if let Some(bind) = cli.bind {
        config.server.host = bind;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::initialize(config).await?;

    // A token in the environment seeds the pool on startup.
    if let Ok(token) = std::env::var("CODEX_JWT_TOKEN")
        && !token.trim().is_empty()
    {
        match state.pool.add_account(token.trim(), None).await {
            Ok(entry) => info!(entry_id = %entry.id, "seeded account from CODEX_JWT_TOKEN"),
            Err(e) => warn!(error = %e, "CODEX_JWT_TOKEN rejected"),
        }
    }

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    courier_gateway::serve(state, listener).await
}

fn init_tracing(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

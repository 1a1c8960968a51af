use anyhow::Result;
use clap::Parser;
use shelfgate::config::Config;
use shelfgate::server::Server;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "shelfgate", version, about = "Request-shaping gate for the storefront API")]
struct Args {
    /// Bind address, overriding BIND_ADDR
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Redis URL, overriding REDIS_URL
    #[arg(long)]
    redis_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let args = Args::parse();
    let mut config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    if let Some(redis_url) = args.redis_url {
        shelfgate::config::validate_redis_url(&redis_url)
            .map_err(|e| anyhow::anyhow!("Invalid --redis-url: {}", e))?;
        config.redis_url = Some(redis_url);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("shelfgate={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting shelfgate");
    tracing::info!(
        bind_addr = %config.bind_addr,
        redis_configured = config.redis_url.is_some(),
        "Configuration loaded"
    );

    let server = Server::new(config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}

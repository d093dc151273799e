use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use catshelter_kernel::{
    CacheConfig, CatCache, CatRepository, CatService, EventLog, InMemoryCatRepository,
    InMemoryEventLog, PostgresCatRepository, RedisStreamLog,
};

mod routes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EventLogKind {
    /// Process-local log. Only this instance sees its own publishes.
    Memory,
    /// Redis stream shared by every instance.
    Redis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum DbType {
    /// Process-local repository. Contents are lost on restart.
    Memory,
    /// Postgres `cats` table shared by every instance.
    Postgres,
}

/// Shelter cat records API
#[derive(Parser, Debug)]
#[command(name = "catshelter")]
#[command(about = "Shelter cat API with an event-log-synchronized read cache", long_about = None)]
struct Cli {
    /// Address to serve the HTTP API on
    #[arg(long, env = "SERVER_ADDRESS", default_value = "0.0.0.0:9090")]
    address: SocketAddr,

    /// Repository backend holding the system of record
    #[arg(long, env = "DB_TYPE", value_enum, default_value_t = DbType::Memory)]
    db_type: DbType,

    /// Postgres connection URL, used with `--db-type postgres`
    #[arg(long, env = "POSTGRES_URL", default_value = "postgres://postgres@localhost:5432/cats")]
    postgres_url: String,

    /// Maximum pooled Postgres connections
    #[arg(long, env = "POSTGRES_POOL_SIZE", default_value_t = 16)]
    postgres_pool_size: usize,

    /// Event log backend feeding the read cache
    #[arg(long, env = "EVENT_LOG", value_enum, default_value_t = EventLogKind::Memory)]
    event_log: EventLogKind,

    /// Redis connection URL, used with `--event-log redis`
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Redis stream key holding cache events
    #[arg(long, env = "REDIS_STREAM", default_value = "cats")]
    redis_stream: String,

    /// Path to cache config JSON
    #[arg(long, env = "CACHE_CONFIG")]
    cache_config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    // ----------------------------
    // Load cache config
    // ----------------------------
    let cache_config = if let Some(path) = &cli.cache_config {
        let data = fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
        serde_json::from_str::<CacheConfig>(&data).with_context(|| format!("parsing {path}"))?
    } else {
        CacheConfig::default()
    };
    cache_config.validate().context("invalid cache config")?;
    check_backends(cli.db_type, cli.event_log)?;

    // ----------------------------
    // Repository
    // ----------------------------
    let repository: Arc<dyn CatRepository> = match cli.db_type {
        DbType::Memory => Arc::new(InMemoryCatRepository::new()),
        DbType::Postgres => Arc::new(
            PostgresCatRepository::connect(&cli.postgres_url, cli.postgres_pool_size)
                .await
                .context("connecting to postgres")?,
        ),
    };

    // ----------------------------
    // Event log + cache
    // ----------------------------
    let log: Arc<dyn EventLog> = match cli.event_log {
        EventLogKind::Memory => {
            tracing::warn!("using in-memory event log; cache is not shared across instances");
            Arc::new(InMemoryEventLog::new())
        }
        EventLogKind::Redis => Arc::new(
            RedisStreamLog::connect(&cli.redis_url, cli.redis_stream.clone())
                .await
                .context("connecting to redis event log")?,
        ),
    };

    let cache = Arc::new(CatCache::new(log, cache_config));
    cache.start()?;

    // ----------------------------
    // Service + HTTP
    // ----------------------------
    let service = CatService::new(repository, Arc::clone(&cache));
    let app = routes::router(service);

    let listener = TcpListener::bind(cli.address)
        .await
        .with_context(|| format!("binding {}", cli.address))?;
    tracing::info!(address = %cli.address, "serving cat API");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    cache.stop().await;
    tracing::info!("shutdown complete");
    Ok(())
}

/// A shared log replays cats into every instance's cache, so the
/// repository behind it must be shared too.
fn check_backends(db_type: DbType, event_log: EventLogKind) -> Result<()> {
    if db_type == DbType::Memory && event_log == EventLogKind::Redis {
        bail!("--event-log redis needs a shared repository; use --db-type postgres");
    }
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

use actix_web::{web, App, HttpServer};
use anyhow::{anyhow, bail, Context, Result};
use feed_cache::{CacheMetrics, CacheStore, MemoryCache, RedisCache};
use sqlx::postgres::PgPoolOptions;
use std::env;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use personalization_service::config::Config;
use personalization_service::handlers;
use personalization_service::jobs::{EtlOptions, EtlOrchestrator};
use personalization_service::models::FeedRequest;
use personalization_service::services::{FeedAssembler, PersonalizationContext};
use personalization_service::{MemoryStore, PgPersonalizationStore, Repositories};

/// Service run mode
#[derive(Debug, Clone, PartialEq)]
enum RunMode {
    /// Default: HTTP server
    Serve,
    /// One full ETL pass, then exit
    Etl(EtlOptions),
    /// Print one freshly assembled feed, then exit
    SimulateFeed {
        user_id: String,
        limit: Option<usize>,
    },
}

impl RunMode {
    fn from_args(args: &[String]) -> Result<Self> {
        let flag = |name: &str| args.iter().any(|a| a == name);
        let value = |name: &str| {
            args.iter()
                .position(|a| a == name)
                .and_then(|i| args.get(i + 1))
                .cloned()
        };

        let Some(mode) = value("--mode") else {
            return Ok(RunMode::Serve);
        };

        match mode.as_str() {
            "serve" => Ok(RunMode::Serve),
            "etl" => Ok(RunMode::Etl(EtlOptions {
                refresh_affinities: flag("--refresh-affinities"),
                skip_audit_log: flag("--skip-audit-log"),
                refresh_clusters: !flag("--skip-clusters"),
            })),
            "simulate-feed" => {
                let user_id = value("--user").ok_or_else(|| anyhow!("--user is required"))?;
                let limit = value("--limit")
                    .map(|l| l.parse::<usize>())
                    .transpose()
                    .context("--limit must be a positive integer")?;
                Ok(RunMode::SimulateFeed { user_id, limit })
            }
            other => {
                warn!("Unknown mode '{}', using default 'serve'", other);
                Ok(RunMode::Serve)
            }
        }
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,personalization_service=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let args: Vec<String> = env::args().collect();
    let mode = RunMode::from_args(&args)?;
    info!("Starting personalization service in {:?} mode", mode);

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    config.validate()?;

    if let Err(e) = CacheMetrics::register(prometheus::default_registry()) {
        warn!("Failed to register cache metrics: {}", e);
    }

    let repos = connect_store(&config, matches!(mode, RunMode::Serve)).await?;
    let cache = connect_cache(&config).await;

    match mode {
        RunMode::Serve => run_server(config, repos, cache).await,
        RunMode::Etl(options) => {
            let repos = repos.ok_or_else(|| anyhow!("ETL requires a backing store"))?;
            run_etl(config, repos, cache, options).await
        }
        RunMode::SimulateFeed { user_id, limit } => {
            run_simulate_feed(config, repos, cache, user_id, limit).await
        }
    }
}

/// Postgres when DATABASE_URL is set, the in-memory store otherwise.
///
/// In serve mode an unreachable database leaves the service up without a
/// store, answering feed requests with 503.
async fn connect_store(config: &Config, tolerate_failure: bool) -> Result<Option<Repositories>> {
    let Some(url) = config.database.url.as_deref() else {
        warn!("DATABASE_URL not set, using in-memory store");
        return Ok(Some(Repositories::from_store(Arc::new(MemoryStore::new()))));
    };

    let connected = async {
        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .connect(url)
            .await
            .context("failed to connect to database")?;
        let store = PgPersonalizationStore::new(pool);
        store.ping().await?;
        if config.database.run_migrations {
            store.migrate().await?;
        }
        Ok::<_, anyhow::Error>(store)
    }
    .await;

    match connected {
        Ok(store) => {
            info!("Database connection pool initialized");
            Ok(Some(Repositories::from_store(Arc::new(store))))
        }
        Err(e) if tolerate_failure => {
            error!("Database unavailable, serving without a store: {:#}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

async fn connect_cache(config: &Config) -> Arc<dyn CacheStore> {
    if let Some(url) = config.cache.redis_url.as_deref() {
        let connected = async {
            let cache = RedisCache::connect(url).await?;
            cache.ping().await?;
            Ok::<_, feed_cache::CacheError>(cache)
        }
        .await;
        match connected {
            Ok(cache) => {
                info!("Redis cache connected");
                return Arc::new(cache);
            }
            Err(e) => warn!("Redis unavailable, using in-process cache: {}", e),
        }
    }
    Arc::new(MemoryCache::new())
}

async fn run_server(
    config: Config,
    repos: Option<Repositories>,
    cache: Arc<dyn CacheStore>,
) -> Result<()> {
    let ctx = PersonalizationContext::new(repos, cache, config.personalization.clone());
    let assembler = web::Data::new(FeedAssembler::new(ctx));

    let bind = (config.app.host.clone(), config.app.port);
    info!(
        "{} listening on {}:{}",
        config.app.service_name, bind.0, bind.1
    );

    HttpServer::new(move || {
        App::new()
            .app_data(assembler.clone())
            .configure(handlers::configure)
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}

async fn run_etl(
    config: Config,
    repos: Repositories,
    cache: Arc<dyn CacheStore>,
    options: EtlOptions,
) -> Result<()> {
    let policy = config.personalization.etl.health.clone();
    let orchestrator = EtlOrchestrator::new(repos, cache, config.personalization);

    let summary = orchestrator.run(options).await.map_err(|e| {
        error!("ETL could not start: {}", e);
        anyhow!("ETL error: {}", e)
    })?;

    println!("{}", serde_json::to_string_pretty(&summary)?);

    for violation in policy.violations(&summary) {
        warn!(run_id = %summary.run_id, "ETL health policy breached: {}", violation);
    }

    if summary.errors > 0 {
        bail!("ETL completed with {} errors", summary.errors);
    }
    Ok(())
}

async fn run_simulate_feed(
    config: Config,
    repos: Option<Repositories>,
    cache: Arc<dyn CacheStore>,
    user_id: String,
    limit: Option<usize>,
) -> Result<()> {
    let ctx = PersonalizationContext::new(repos, cache, config.personalization);
    let assembler = FeedAssembler::new(ctx);

    let response = assembler
        .get_personalized_feed(FeedRequest {
            user_id: Some(user_id),
            limit,
            force_refresh: true,
            ..Default::default()
        })
        .await?;

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

// Cascade API server

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cascade_api::{build_router, AppState, Config};
use cascade_engine::{
    bridge_from_key, ActionDeps, ActionRegistry, EmailMonitor, EventBus, JobScheduler,
    MemoryMailer,
};
use cascade_storage::{
    Cache, ExecutionStore, MemoryCache, MemoryExecutionStore, PgExecutionStore, RedisCache,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cascade_api=debug,cascade_engine=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("cascade-api starting...");
    let config = Arc::new(Config::from_env());

    // Persistence collaborator
    let store: Arc<dyn ExecutionStore> = match &config.database_url {
        Some(url) => {
            let store = PgExecutionStore::from_url(url)
                .await
                .context("Failed to connect to database")?;
            info!("Connected to database");
            Arc::new(store)
        }
        None => {
            warn!("DATABASE_URL not set - executions will not survive restarts");
            Arc::new(MemoryExecutionStore::new())
        }
    };

    // Cache / pub-sub collaborator
    let cache: Arc<dyn Cache> = match &config.redis_url {
        Some(url) => match RedisCache::connect(url).await {
            Ok(cache) => {
                info!("Connected to redis");
                Arc::new(cache)
            }
            Err(e) => {
                warn!("redis unavailable ({e}) - using in-process cache");
                Arc::new(MemoryCache::new())
            }
        },
        None => {
            info!("REDIS_URL not set - using in-process cache");
            Arc::new(MemoryCache::new())
        }
    };

    // E-mail collaborator
    let mailer = Arc::new(MemoryMailer::new(cache.clone()));
    info!(
        smtp_server = %config.smtp_server,
        smtp_port = config.smtp_port,
        from = %config.from_email,
        auth = config.smtp_auth_configured(),
        "e-mail transport delegated to the mail collaborator"
    );

    // Engine wiring
    let bridge = bridge_from_key(config.ably_api_key.as_deref());
    let bus = Arc::new(EventBus::new(bridge));
    let registry = Arc::new(ActionRegistry::with_builtins(ActionDeps {
        http: reqwest::Client::new(),
        mailer: mailer.clone(),
    }));
    let scheduler = JobScheduler::new(
        store.clone(),
        cache.clone(),
        registry,
        bus.clone(),
        mailer.clone(),
    );
    scheduler.start();

    let monitor = Arc::new(EmailMonitor::new(cache.clone()));
    let _monitor_task = monitor.start();

    let state = AppState {
        config: config.clone(),
        store,
        cache,
        scheduler: scheduler.clone(),
        bus,
    };

    let app = build_router(state)
        .layer(cors_layer(&config))
        .layer(TraceLayer::new_for_http());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("shutting down...");
    scheduler.stop().await;
    monitor.stop();

    Ok(())
}

fn cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if config.cors_origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        layer.allow_origin(origins)
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

use std::sync::Arc;
use std::time::Duration;

use fleet_events::{BrokerConfig, ConsumerRuntime, Publisher};
use fleet_monitoring::{DeviceEventHandler, MonitoringConfig, PgRuleStore, RuleEngine};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    // --- Configuration ---
    let config = MonitoringConfig::from_env().expect("Invalid monitoring configuration");
    let broker_config = BrokerConfig::from_env().expect("Invalid broker configuration");
    tracing::info!(
        queue = %config.queue,
        patterns = ?config.routing_keys,
        broker = ?broker_config,
        "Loaded monitoring configuration",
    );

    // --- Database ---
    let pool = fleet_db::create_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    fleet_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");
    fleet_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Broker ---
    let broker = fleet_events::connect(&broker_config)
        .await
        .expect("Failed to connect to message broker");

    // --- Rule engine and consumer ---
    let store = Arc::new(PgRuleStore::new(pool.clone()));
    let engine = Arc::new(RuleEngine::new(store, Publisher::new(Arc::clone(&broker))));
    let handler = Arc::new(DeviceEventHandler::new(engine));
    let runtime = ConsumerRuntime::new(
        Arc::clone(&broker),
        config.consumer_config(&broker_config),
        handler,
    )
    .expect("Invalid consumer binding");

    let cancel = CancellationToken::new();
    let consumer_handle = tokio::spawn(runtime.run(cancel.clone()));
    tracing::info!("Monitoring consumer started");

    shutdown_signal().await;

    // The consumer drains within its own grace period; allow a little extra
    // before giving up on the join.
    cancel.cancel();
    let join_timeout = config.shutdown_grace + Duration::from_secs(5);
    if tokio::time::timeout(join_timeout, consumer_handle).await.is_err() {
        tracing::warn!("Consumer did not stop in time");
    }
    tracing::info!("Monitoring consumer stopped");

    if let Err(e) = broker.close().await {
        tracing::warn!(error = %e, "Failed to close broker connection");
    }
    pool.close().await;
    tracing::info!("Graceful shutdown complete");
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fleet_monitoring=debug,fleet_events=debug".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

//! Catalog service entry point.

use std::sync::Arc;

use application::PublishFailurePolicy;
use messaging::{AmqpBroker, MessageBroker};
use persistence::{PgUnitOfWorkFactory, PgVideoRepository, run_migrations};
use server::config::Config;
use server::error::StartupError;
use server::{
    AppState, ShutdownCause, create_app, create_consumer, create_service, spawn_consumer,
    wait_for_shutdown,
};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tokio::sync::{oneshot, watch};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), StartupError> {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| StartupError::Metrics(e.to_string()))?;

    // 3. Database pool and schema
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await?;
    run_migrations(&pool).await?;

    // 4. Broker connection and consumer topology
    let amqp = AmqpBroker::connect(&config.amqp_url).await?;
    amqp.declare_topology(&config.topology()).await?;
    let broker: Arc<dyn MessageBroker> = Arc::new(amqp);

    // 5. Command pipeline
    let service = Arc::new(create_service(
        PgUnitOfWorkFactory::new(pool.clone()),
        broker.clone(),
        config.publish_failure_policy,
    )?);
    let videos = Arc::new(PgVideoRepository::new(pool.clone()));

    // 6. Background tasks
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer = create_consumer(service.clone(), videos, broker.clone(), &config);
    let deliveries = broker.subscribe(&config.amqp_queue).await?;
    let consumer_task = spawn_consumer(consumer, deliveries, shutdown_rx.clone());

    let redelivery_task = if config.publish_failure_policy == PublishFailurePolicy::DeadLetterLocally {
        let service = service.clone();
        let period = config.dead_letter_redelivery_interval();
        let mut redelivery_shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        service.redeliver_dead_letters().await;
                    }
                    _ = redelivery_shutdown.changed() => break,
                }
            }
        }))
    } else {
        None
    };

    // 7. Serve HTTP
    let app = create_app(AppState { service }, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, queue = %config.amqp_queue, "starting catalog service");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let (cause_tx, cause_rx) = oneshot::channel();
    let consumer_stopped = consumer_task.stopped.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let cause = wait_for_shutdown(shutdown_signal(), consumer_stopped).await;
            let _ = cause_tx.send(cause);
        })
        .await?;

    // 8. Stop background tasks
    let _ = shutdown_tx.send(true);
    if let Err(e) = consumer_task.handle.await {
        tracing::error!(error = %e, "consumer task failed");
    }
    if let Some(task) = redelivery_task
        && let Err(e) = task.await
    {
        tracing::error!(error = %e, "dead letter redelivery task failed");
    }
    pool.close().await;

    if cause_rx.await == Ok(ShutdownCause::ConsumerStopped) {
        return Err(StartupError::ConsumerStopped);
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}

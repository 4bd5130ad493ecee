//! Process wiring of the catalog service.
//!
//! Builds the command pipeline over a unit of work factory and a message
//! broker, runs the encoder result consumer, and serves health, metrics and
//! dead letter endpoints with structured logging (tracing) and Prometheus
//! metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::future::Future;
use std::sync::Arc;

use application::{
    ApplicationService, MediaConversionHandler, PublishFailurePolicy, catalog_routing_table,
};
use axum::Router;
use axum::routing::{get, post};
use messaging::{
    ConfigurationError, DeliveryStream, EventTranslator, IntegrationEventPublisher, MessageBroker,
    MessageConsumer, MessageHandler, RetryFilter,
};
use metrics_exporter_prometheus::PrometheusHandle;
use persistence::{UnitOfWork, UnitOfWorkFactory, VideoRepository};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Shared state of the HTTP routes.
pub struct AppState<F: UnitOfWorkFactory> {
    pub service: Arc<ApplicationService<F>>,
}

impl<F: UnitOfWorkFactory> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
        }
    }
}

/// Creates the Axum router with all routes and shared state.
pub fn create_app<F: UnitOfWorkFactory + 'static>(
    state: AppState<F>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/dead-letters", get(routes::dead_letters::list::<F>))
        .route(
            "/dead-letters/redeliver",
            post(routes::dead_letters::redeliver::<F>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Builds the command pipeline with the catalog routing table.
///
/// Fails if any catalog event has no route.
pub fn create_service<F: UnitOfWorkFactory>(
    factory: F,
    broker: Arc<dyn MessageBroker>,
    policy: PublishFailurePolicy,
) -> Result<ApplicationService<F>, ConfigurationError> {
    let translator = EventTranslator::new(Arc::new(catalog_routing_table()?));
    let publisher = IntegrationEventPublisher::new(broker);
    Ok(ApplicationService::new(factory, translator, publisher).with_failure_policy(policy))
}

/// Builds the encoder result consumer with the configured retry policy.
pub fn create_consumer<F, V>(
    service: Arc<ApplicationService<F>>,
    videos: Arc<V>,
    broker: Arc<dyn MessageBroker>,
    config: &Config,
) -> MessageConsumer<MediaConversionHandler<F, V>>
where
    F: UnitOfWorkFactory + 'static,
    V: VideoRepository<<F::UnitOfWork as UnitOfWork>::Transaction> + 'static,
{
    let retry = RetryFilter::new(broker)
        .with_policy(config.retry_policy())
        .with_delayed_exchange(config.amqp_delayed_exchange.clone());
    MessageConsumer::new(MediaConversionHandler::new(service, videos), retry)
}

/// Why the HTTP server stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownCause {
    /// SIGINT or SIGTERM.
    Signal,
    /// The consumer task ended before shutdown was requested.
    ConsumerStopped,
}

/// A consumer running on its own task.
pub struct ConsumerTask {
    pub handle: JoinHandle<()>,
    /// Flips to `true` when the consumer loop returns. The sender is
    /// dropped if the task panics.
    pub stopped: watch::Receiver<bool>,
}

/// Runs `consumer` over `deliveries` until `shutdown` flips to `true` or
/// the stream ends.
pub fn spawn_consumer<H>(
    consumer: MessageConsumer<H>,
    deliveries: DeliveryStream,
    mut shutdown: watch::Receiver<bool>,
) -> ConsumerTask
where
    H: MessageHandler + 'static,
{
    let (stopped_tx, stopped) = watch::channel(false);
    let handle = tokio::spawn(async move {
        consumer
            .run(deliveries, async move {
                let _ = shutdown.changed().await;
            })
            .await;
        let _ = stopped_tx.send(true);
    });
    ConsumerTask { handle, stopped }
}

/// Resolves when `signal` fires or the consumer stops, whichever is first.
pub async fn wait_for_shutdown(
    signal: impl Future<Output = ()>,
    consumer_stopped: watch::Receiver<bool>,
) -> ShutdownCause {
    tokio::select! {
        () = signal => ShutdownCause::Signal,
        () = consumer_finished(consumer_stopped) => {
            tracing::error!("message consumer stopped, shutting down");
            ShutdownCause::ConsumerStopped
        }
    }
}

async fn consumer_finished(mut stopped: watch::Receiver<bool>) {
    loop {
        if *stopped.borrow_and_update() {
            return;
        }
        // The sender is gone only if the consumer task panicked.
        if stopped.changed().await.is_err() {
            return;
        }
    }
}

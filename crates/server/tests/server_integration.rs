//! Integration tests for the HTTP surface of the catalog service.

use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use application::{
    ApplicationService, CreateCategory, CreateVideo, PublishFailurePolicy, UploadAudioVideoMedia,
};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use domain::{MediaKind, NewVideo};
use messaging::{BrokerError, Delivery, DeliveryStream, InMemoryBroker};
use metrics_exporter_prometheus::PrometheusHandle;
use persistence::{
    InMemoryCategoryRepository, InMemoryDatabase, InMemoryUnitOfWorkFactory,
    InMemoryVideoRepository,
};
use server::config::Config;
use server::{AppState, ShutdownCause, spawn_consumer, wait_for_shutdown};
use tokio::sync::watch;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestServer {
    app: axum::Router,
    service: Arc<ApplicationService<InMemoryUnitOfWorkFactory>>,
    broker: Arc<InMemoryBroker>,
    db: InMemoryDatabase,
}

fn setup(policy: PublishFailurePolicy) -> TestServer {
    let db = InMemoryDatabase::new();
    let broker = Arc::new(InMemoryBroker::new());
    let service = Arc::new(
        server::create_service(
            InMemoryUnitOfWorkFactory::new(db.clone()),
            broker.clone(),
            policy,
        )
        .unwrap(),
    );
    let app = server::create_app(
        AppState {
            service: service.clone(),
        },
        get_metrics_handle(),
    );

    TestServer {
        app,
        service,
        broker,
        db,
    }
}

/// Creates a video and uploads its main media, which publishes one
/// integration event.
async fn upload_video_media(server: &TestServer) {
    let categories = Arc::new(InMemoryCategoryRepository::new(server.db.clone()));
    let videos = Arc::new(InMemoryVideoRepository::new(server.db.clone()));

    let category_id = server
        .service
        .run(CreateCategory {
            categories: categories.clone(),
            name: "Documentary".to_string(),
            description: None,
            is_active: true,
        })
        .await
        .unwrap();

    let video_id = server
        .service
        .run(CreateVideo {
            categories,
            videos: videos.clone(),
            input: NewVideo {
                title: "Planet Earth".to_string(),
                description: "Nature".to_string(),
                year_launched: 2006,
                duration: 50,
                opened: true,
                category_ids: BTreeSet::from([category_id]),
            },
        })
        .await
        .unwrap();

    server
        .service
        .run(UploadAudioVideoMedia {
            videos,
            video_id,
            kind: MediaKind::Video,
            name: "planet-earth.mp4".to_string(),
            raw_location: format!("videos/{video_id}/planet-earth.mp4"),
        })
        .await
        .unwrap();
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let server = setup(PublishFailurePolicy::Log);

    let response = server
        .app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let server = setup(PublishFailurePolicy::Log);
    upload_video_media(&server).await;

    let response = server
        .app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("command_duration_seconds"));
}

#[tokio::test]
async fn test_dead_letters_empty() {
    let server = setup(PublishFailurePolicy::DeadLetterLocally);

    let response = server
        .app
        .oneshot(
            Request::builder()
                .uri("/dead-letters")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["count"], 0);
    assert_eq!(json["entries"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_failed_publish_is_listed() {
    let server = setup(PublishFailurePolicy::DeadLetterLocally);
    server.broker.fail_next_publishes(1).await;
    upload_video_media(&server).await;

    let response = server
        .app
        .oneshot(
            Request::builder()
                .uri("/dead-letters")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["count"], 1);
    let entry = &json["entries"][0];
    assert_eq!(entry["event_name"], "VideoAudioMediaUploadedIntegrationEvent");
    assert_eq!(entry["exchange"], "amq.direct");
    assert_eq!(entry["routing_key"], "videos.convert");
    assert!(!entry["reason"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_redeliver_dead_letters() {
    let server = setup(PublishFailurePolicy::DeadLetterLocally);
    server.broker.fail_next_publishes(1).await;
    upload_video_media(&server).await;
    assert_eq!(server.broker.publish_count().await, 0);

    let response = server
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/dead-letters/redeliver")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["delivered"], 1);
    assert_eq!(json["remaining"], 0);
    assert_eq!(server.broker.publish_count().await, 1);

    let response = server
        .app
        .oneshot(
            Request::builder()
                .uri("/dead-letters")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(json["count"], 0);
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let server = setup(PublishFailurePolicy::Log);

    let response = server
        .app
        .oneshot(
            Request::builder()
                .uri("/videos")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

fn spawn_media_consumer(
    server: &TestServer,
    deliveries: DeliveryStream,
    shutdown: watch::Receiver<bool>,
) -> server::ConsumerTask {
    let consumer = server::create_consumer(
        server.service.clone(),
        Arc::new(InMemoryVideoRepository::new(server.db.clone())),
        server.broker.clone(),
        &Config::default(),
    );
    spawn_consumer(consumer, deliveries, shutdown)
}

#[tokio::test]
async fn test_closed_delivery_stream_triggers_shutdown() {
    let server = setup(PublishFailurePolicy::Log);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let deliveries: DeliveryStream =
        Box::pin(futures_util::stream::empty::<Result<Delivery, BrokerError>>());

    let task = spawn_media_consumer(&server, deliveries, shutdown_rx);
    let cause = wait_for_shutdown(std::future::pending(), task.stopped.clone()).await;

    assert_eq!(cause, ShutdownCause::ConsumerStopped);
    task.handle.await.unwrap();
}

#[tokio::test]
async fn test_signal_stops_running_consumer() {
    let server = setup(PublishFailurePolicy::Log);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let deliveries: DeliveryStream =
        Box::pin(futures_util::stream::pending::<Result<Delivery, BrokerError>>());

    let task = spawn_media_consumer(&server, deliveries, shutdown_rx);
    let cause = wait_for_shutdown(async {}, task.stopped.clone()).await;
    assert_eq!(cause, ShutdownCause::Signal);
    assert!(!*task.stopped.borrow());

    shutdown_tx.send(true).unwrap();
    task.handle.await.unwrap();
    assert!(*task.stopped.borrow());
}

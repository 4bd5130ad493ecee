//! End-to-end command pipeline over the in-memory store and broker.

use std::collections::BTreeSet;
use std::sync::Arc;

use application::catalog::{CONVERSION_RESULT_ROUTING_KEY, MEDIA_UPLOADED_EVENT};
use application::{
    ApplicationError, ApplicationService, CreateCategory, CreateVideo, DeleteCategory,
    MediaConversionHandler, ReplaceVideoCategories, UploadAudioVideoMedia, catalog_routing_table,
};
use domain::{
    AudioVideoMedia, CategoryId, MediaKind, MediaStatus, NewVideo, VideoId,
};
use futures_util::future::BoxFuture;
use messaging::{
    AckOutcome, Delivery, Disposition, DropReason, EventTranslator, InMemoryBroker,
    IntegrationEvent, IntegrationEventPublisher, MessageConsumer, RecordingAcker, RetryFilter,
    Transport,
};
use persistence::memory_repositories::{CATEGORIES, VIDEO_CATEGORIES, VIDEOS};
use persistence::{
    InMemoryCategoryRepository, InMemoryDatabase, InMemoryUnitOfWork, InMemoryUnitOfWorkFactory,
    InMemoryVideoRepository, Repository, UnitOfWork,
};
use serde_json::json;

struct Harness {
    db: InMemoryDatabase,
    broker: Arc<InMemoryBroker>,
    service: Arc<ApplicationService<InMemoryUnitOfWorkFactory>>,
    categories: Arc<InMemoryCategoryRepository>,
    videos: Arc<InMemoryVideoRepository>,
}

impl Harness {
    fn new() -> Self {
        let db = InMemoryDatabase::new();
        let broker = Arc::new(InMemoryBroker::new());
        let translator = EventTranslator::new(Arc::new(catalog_routing_table().unwrap()));
        let service = ApplicationService::new(
            InMemoryUnitOfWorkFactory::new(db.clone()),
            translator,
            IntegrationEventPublisher::new(broker.clone()),
        );

        Self {
            categories: Arc::new(InMemoryCategoryRepository::new(db.clone())),
            videos: Arc::new(InMemoryVideoRepository::new(db.clone())),
            service: Arc::new(service),
            broker,
            db,
        }
    }

    async fn create_categories(&self, count: usize) -> BTreeSet<CategoryId> {
        let mut ids = BTreeSet::new();
        for i in 0..count {
            let id = self
                .service
                .run(CreateCategory {
                    categories: self.categories.clone(),
                    name: format!("Category {i}"),
                    description: None,
                    is_active: true,
                })
                .await
                .unwrap();
            ids.insert(id);
        }
        ids
    }

    fn create_video(&self, category_ids: BTreeSet<CategoryId>) -> CreateVideo<InMemoryCategoryRepository, InMemoryVideoRepository> {
        CreateVideo {
            categories: self.categories.clone(),
            videos: self.videos.clone(),
            input: NewVideo {
                title: "The Matrix".to_string(),
                description: "Wake up, Neo".to_string(),
                year_launched: 1999,
                duration: 136,
                opened: false,
                category_ids,
            },
        }
    }

    fn upload(&self, video_id: VideoId, kind: MediaKind) -> UploadAudioVideoMedia<InMemoryVideoRepository> {
        UploadAudioVideoMedia {
            videos: self.videos.clone(),
            video_id,
            kind,
            name: format!("{kind}.mp4"),
            raw_location: format!("videos/{video_id}/{kind}.mp4"),
        }
    }

    async fn published_events(&self) -> Vec<IntegrationEvent> {
        self.broker
            .published()
            .await
            .iter()
            .map(|message| serde_json::from_slice(&message.body).unwrap())
            .collect()
    }
}

#[tokio::test]
async fn video_and_associations_commit_together() {
    let harness = Harness::new();
    let categories = harness.create_categories(3).await;

    let video_id = harness
        .service
        .run(harness.create_video(categories.clone()))
        .await
        .unwrap();

    assert_eq!(harness.db.row_count(VIDEOS).await, 1);
    assert_eq!(harness.db.row_count(VIDEO_CATEGORIES).await, 3);
    let video = harness.videos.find_by_id(None, video_id).await.unwrap().unwrap();
    assert_eq!(video.category_ids(), &categories);
    // Every catalog event so far is internal-only.
    assert_eq!(harness.broker.publish_count().await, 0);
}

#[tokio::test]
async fn missing_category_rejects_the_whole_video() {
    let harness = Harness::new();
    let mut categories = harness.create_categories(2).await;
    categories.insert(CategoryId::new());

    let err = harness
        .service
        .run(harness.create_video(categories))
        .await
        .unwrap_err();

    assert!(matches!(err, ApplicationError::NotFound { entity: "Category", .. }));
    assert_eq!(harness.db.row_count(VIDEOS).await, 0);
    assert_eq!(harness.db.row_count(VIDEO_CATEGORIES).await, 0);
}

#[tokio::test]
async fn failed_commit_leaves_no_rows_and_publishes_nothing() {
    let harness = Harness::new();
    let categories = harness.create_categories(3).await;
    let video_id = harness
        .service
        .run(harness.create_video(categories.clone()))
        .await
        .unwrap();

    harness.db.fail_next_commit().await;
    let result = harness
        .service
        .run(harness.upload(video_id, MediaKind::Video))
        .await;

    assert!(matches!(result, Err(ApplicationError::Persistence(_))));
    assert_eq!(harness.broker.publish_count().await, 0);
    let video = harness.videos.find_by_id(None, video_id).await.unwrap().unwrap();
    assert!(video.media(MediaKind::Video).is_none());
}

#[tokio::test]
async fn category_replacement_rewrites_association_rows() {
    let harness = Harness::new();
    let first = harness.create_categories(3).await;
    let video_id = harness
        .service
        .run(harness.create_video(first))
        .await
        .unwrap();
    let second = harness.create_categories(2).await;

    harness
        .service
        .run(ReplaceVideoCategories {
            categories: harness.categories.clone(),
            videos: harness.videos.clone(),
            video_id,
            category_ids: second.clone(),
        })
        .await
        .unwrap();

    assert_eq!(harness.db.row_count(VIDEO_CATEGORIES).await, 2);
    let video = harness.videos.find_by_id(None, video_id).await.unwrap().unwrap();
    assert_eq!(video.category_ids(), &second);
}

#[tokio::test]
async fn deleting_a_category_drops_its_associations() {
    let harness = Harness::new();
    let categories = harness.create_categories(2).await;
    harness
        .service
        .run(harness.create_video(categories.clone()))
        .await
        .unwrap();
    let doomed = *categories.iter().next().unwrap();

    harness
        .service
        .run(DeleteCategory {
            categories: harness.categories.clone(),
            category_id: doomed,
        })
        .await
        .unwrap();

    assert_eq!(harness.db.row_count(CATEGORIES).await, 1);
    assert_eq!(harness.db.row_count(VIDEO_CATEGORIES).await, 1);
}

#[tokio::test]
async fn media_upload_is_published_after_commit() {
    let harness = Harness::new();
    let categories = harness.create_categories(1).await;
    let video_id = harness
        .service
        .run(harness.create_video(categories))
        .await
        .unwrap();

    harness
        .service
        .run(harness.upload(video_id, MediaKind::Trailer))
        .await
        .unwrap();

    let published = harness.broker.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].exchange, "amq.direct");
    assert_eq!(published[0].routing_key, "videos.convert");
    assert!(published[0].correlation_id.is_some());

    let events = harness.published_events().await;
    assert_eq!(events[0].event_name, MEDIA_UPLOADED_EVENT);
    assert_eq!(
        events[0].payload,
        json!({
            "resource_id": format!("{video_id}.trailer"),
            "file_path": format!("videos/{video_id}/trailer.mp4"),
        })
    );
}

fn replace_both_media<'a>(
    uow: &'a mut InMemoryUnitOfWork,
    videos: Arc<InMemoryVideoRepository>,
    video_id: VideoId,
) -> BoxFuture<'a, application::Result<()>> {
    Box::pin(async move {
        let mut video = videos
            .find_by_id(Some(uow.transaction()), video_id)
            .await?
            .ok_or_else(|| ApplicationError::not_found("Video", video_id))?;
        video.replace_media(
            MediaKind::Trailer,
            AudioVideoMedia::pending("trailer.mp4", "raw/trailer.mp4")?,
        )?;
        video.replace_media(
            MediaKind::Video,
            AudioVideoMedia::pending("video.mp4", "raw/video.mp4")?,
        )?;
        videos.update(uow.transaction(), &video).await?;
        uow.track(video);
        Ok(())
    })
}

#[tokio::test]
async fn events_of_one_aggregate_are_published_in_record_order() {
    let harness = Harness::new();
    let categories = harness.create_categories(1).await;
    let video_id = harness
        .service
        .run(harness.create_video(categories))
        .await
        .unwrap();

    let videos = harness.videos.clone();
    harness
        .service
        .execute(move |uow| replace_both_media(uow, videos, video_id))
        .await
        .unwrap();

    let resource_ids: Vec<String> = harness
        .published_events()
        .await
        .iter()
        .map(|event| event.payload["resource_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(
        resource_ids,
        vec![format!("{video_id}.trailer"), format!("{video_id}.video")]
    );
}

#[tokio::test]
async fn broker_outage_after_commit_keeps_the_write() {
    let harness = Harness::new();
    let categories = harness.create_categories(1).await;
    let video_id = harness
        .service
        .run(harness.create_video(categories))
        .await
        .unwrap();
    harness.broker.fail_next_publishes(1).await;

    harness
        .service
        .run(harness.upload(video_id, MediaKind::Video))
        .await
        .unwrap();

    assert_eq!(harness.broker.publish_count().await, 0);
    let video = harness.videos.find_by_id(None, video_id).await.unwrap().unwrap();
    assert_eq!(
        video.media(MediaKind::Video).map(|m| m.status()),
        Some(MediaStatus::Pending)
    );
}

fn conversion_delivery(body: serde_json::Value, acker: &RecordingAcker) -> Delivery {
    let mut delivery = Delivery::direct(
        CONVERSION_RESULT_ROUTING_KEY,
        serde_json::to_vec(&body).unwrap(),
    );
    delivery.exchange = "amq.direct".to_string();
    delivery.transport = Transport::Broker;
    delivery.acker = Arc::new(acker.clone());
    delivery
}

#[tokio::test]
async fn conversion_result_completes_media() {
    let harness = Harness::new();
    let categories = harness.create_categories(1).await;
    let video_id = harness
        .service
        .run(harness.create_video(categories))
        .await
        .unwrap();
    harness
        .service
        .run(harness.upload(video_id, MediaKind::Video))
        .await
        .unwrap();

    let consumer = MessageConsumer::new(
        MediaConversionHandler::new(harness.service.clone(), harness.videos.clone()),
        RetryFilter::new(harness.broker.clone()),
    );
    let acker = RecordingAcker::new();
    let disposition = consumer
        .process(conversion_delivery(
            json!({
                "video": {
                    "resource_id": format!("{video_id}.video"),
                    "encoded_video_folder": "videos/encoded/matrix",
                },
                "status": "COMPLETED",
            }),
            &acker,
        ))
        .await
        .unwrap();

    assert_eq!(disposition, Disposition::Acked);
    assert_eq!(acker.outcomes().await, vec![AckOutcome::Acked]);
    let video = harness.videos.find_by_id(None, video_id).await.unwrap().unwrap();
    let media = video.media(MediaKind::Video).unwrap();
    assert_eq!(media.status(), MediaStatus::Completed);
    assert_eq!(media.encoded_location(), Some("videos/encoded/matrix"));
}

#[tokio::test]
async fn conversion_result_for_unknown_video_is_dropped() {
    let harness = Harness::new();
    let consumer = MessageConsumer::new(
        MediaConversionHandler::new(harness.service.clone(), harness.videos.clone()),
        RetryFilter::new(harness.broker.clone()),
    );
    let acker = RecordingAcker::new();

    let disposition = consumer
        .process(conversion_delivery(
            json!({
                "video": {
                    "resource_id": format!("{}.video", VideoId::new()),
                    "encoded_video_folder": "videos/encoded/missing",
                },
                "status": "COMPLETED",
            }),
            &acker,
        ))
        .await
        .unwrap();

    assert_eq!(disposition, Disposition::Dropped(DropReason::NonRetryable));
    assert_eq!(
        acker.outcomes().await,
        vec![AckOutcome::Rejected { requeue: false }]
    );
    assert_eq!(harness.broker.publish_count().await, 0);
}

#[tokio::test]
async fn store_failure_while_consuming_is_requeued() {
    let harness = Harness::new();
    let categories = harness.create_categories(1).await;
    let video_id = harness
        .service
        .run(harness.create_video(categories))
        .await
        .unwrap();
    harness
        .service
        .run(harness.upload(video_id, MediaKind::Trailer))
        .await
        .unwrap();
    harness.broker.clear().await;

    let consumer = MessageConsumer::new(
        MediaConversionHandler::new(harness.service.clone(), harness.videos.clone()),
        RetryFilter::new(harness.broker.clone()),
    );
    harness.db.fail_next_commit().await;
    let acker = RecordingAcker::new();

    let disposition = consumer
        .process(conversion_delivery(
            json!({
                "video": {
                    "resource_id": format!("{video_id}.trailer"),
                    "encoded_video_folder": "videos/encoded/trailer",
                },
                "status": "COMPLETED",
            }),
            &acker,
        ))
        .await
        .unwrap();

    assert!(matches!(disposition, Disposition::Requeued { retry_count: 1, .. }));
    assert_eq!(acker.outcomes().await, vec![AckOutcome::Acked]);
    let requeued = harness.broker.published().await;
    assert_eq!(requeued.len(), 1);
    assert_eq!(requeued[0].exchange, RetryFilter::DEFAULT_DELAYED_EXCHANGE);
    assert_eq!(requeued[0].routing_key, CONVERSION_RESULT_ROUTING_KEY);
}

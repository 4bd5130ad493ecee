//! Inspection and redelivery of locally dead-lettered integration events.

use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Utc};
use persistence::UnitOfWorkFactory;
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct DeadLetterView {
    pub event_name: String,
    pub exchange: String,
    pub routing_key: String,
    pub correlation_id: String,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct DeadLettersResponse {
    pub count: usize,
    pub entries: Vec<DeadLetterView>,
}

#[derive(Serialize)]
pub struct RedeliveryResponse {
    pub delivered: usize,
    pub remaining: usize,
}

/// GET /dead-letters: lists integration events that failed to publish.
pub async fn list<F: UnitOfWorkFactory + 'static>(
    State(state): State<AppState<F>>,
) -> Json<DeadLettersResponse> {
    let entries: Vec<DeadLetterView> = state
        .service
        .dead_letters()
        .entries()
        .await
        .into_iter()
        .map(|letter| DeadLetterView {
            event_name: letter.routed.event.event_name,
            exchange: letter.routed.exchange,
            routing_key: letter.routed.routing_key,
            correlation_id: letter.routed.correlation_id.to_string(),
            reason: letter.reason,
            failed_at: letter.failed_at,
        })
        .collect();

    Json(DeadLettersResponse {
        count: entries.len(),
        entries,
    })
}

/// POST /dead-letters/redeliver: republishes every dead-lettered event.
#[tracing::instrument(skip_all)]
pub async fn redeliver<F: UnitOfWorkFactory + 'static>(
    State(state): State<AppState<F>>,
) -> Json<RedeliveryResponse> {
    let delivered = state.service.redeliver_dead_letters().await;
    let remaining = state.service.dead_letters().len().await;
    metrics::gauge!("local_dead_letters").set(remaining as f64);

    Json(RedeliveryResponse {
        delivered,
        remaining,
    })
}

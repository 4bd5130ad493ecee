//! The transactional command executor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::AggregateRoot;
use futures_util::future::BoxFuture;
use messaging::{EventTranslator, IntegrationEventPublisher, RoutedEvent, Translation};
use persistence::{UnitOfWork, UnitOfWorkFactory, UnitOfWorkState};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{DomainEventMediator, Result};

/// One business operation run inside a unit of work.
///
/// The use case writes through `uow.transaction()` and registers every
/// aggregate it touched with the unit of work. It never commits.
#[async_trait]
pub trait UseCase<U: UnitOfWork>: Send {
    type Output: Send;

    async fn execute(self, uow: &mut U) -> Result<Self::Output>;
}

/// What to do when an integration event cannot be published after commit.
///
/// The command has already committed in every case; the policy only
/// decides how much effort goes into not losing the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishFailurePolicy {
    /// Log the failure and drop the event.
    #[default]
    Log,
    /// Keep the event in the process-local [`LocalDeadLetters`] store.
    DeadLetterLocally,
    /// Try again up to `max_attempts` times in total, then log and drop.
    Retry { max_attempts: u32, delay: Duration },
}

/// An integration event that could not be published.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub routed: RoutedEvent,
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

/// Process-local store of unpublished integration events.
///
/// Lost when the process exits.
#[derive(Debug, Clone, Default)]
pub struct LocalDeadLetters {
    entries: Arc<Mutex<Vec<DeadLetter>>>,
}

impl LocalDeadLetters {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, routed: RoutedEvent, reason: impl Into<String>) {
        self.entries.lock().await.push(DeadLetter {
            routed,
            reason: reason.into(),
            failed_at: Utc::now(),
        });
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Copy of the stored entries, oldest first.
    pub async fn entries(&self) -> Vec<DeadLetter> {
        self.entries.lock().await.clone()
    }

    /// Removes and returns every entry.
    pub async fn take_all(&self) -> Vec<DeadLetter> {
        std::mem::take(&mut *self.entries.lock().await)
    }
}

/// Runs commands so that their integration events leave the process only
/// after their transaction committed.
///
/// For each command:
///
/// 1. a fresh unit of work is created and started;
/// 2. the use case runs against it;
/// 3. registered in-process handlers see the pending domain events;
/// 4. the unit of work commits;
/// 5. every tracked aggregate is drained in tracking order and each event,
///    in recorded order, is translated and published.
///
/// A failure in steps 2 to 4 rolls back and returns the original error with
/// nothing published. A failure in step 5 is handled by the
/// [`PublishFailurePolicy`] and never fails the command.
pub struct ApplicationService<F: UnitOfWorkFactory> {
    factory: F,
    translator: EventTranslator,
    publisher: IntegrationEventPublisher,
    mediator: DomainEventMediator,
    failure_policy: PublishFailurePolicy,
    dead_letters: LocalDeadLetters,
}

impl<F: UnitOfWorkFactory> ApplicationService<F> {
    pub fn new(
        factory: F,
        translator: EventTranslator,
        publisher: IntegrationEventPublisher,
    ) -> Self {
        Self {
            factory,
            translator,
            publisher,
            mediator: DomainEventMediator::new(),
            failure_policy: PublishFailurePolicy::default(),
            dead_letters: LocalDeadLetters::new(),
        }
    }

    #[must_use]
    pub fn with_mediator(mut self, mediator: DomainEventMediator) -> Self {
        self.mediator = mediator;
        self
    }

    #[must_use]
    pub fn with_failure_policy(mut self, policy: PublishFailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn failure_policy(&self) -> PublishFailurePolicy {
        self.failure_policy
    }

    pub fn dead_letters(&self) -> &LocalDeadLetters {
        &self.dead_letters
    }

    /// Runs a [`UseCase`] as one transactional command.
    #[tracing::instrument(skip_all, fields(use_case = short_type_name::<C>()))]
    pub async fn run<C>(&self, use_case: C) -> Result<C::Output>
    where
        C: UseCase<F::UnitOfWork>,
    {
        let started = Instant::now();
        let mut uow = self.factory.create();
        uow.start().await?;

        let result = use_case.execute(&mut uow).await;
        let result = self.complete(uow, result).await;
        record_duration(started, result.is_ok());
        result
    }

    /// Runs a closure as one transactional command.
    ///
    /// ```ignore
    /// service
    ///     .execute(|uow| Box::pin(async move {
    ///         let video = Video::create(input)?;
    ///         videos.insert(uow.transaction(), &video).await?;
    ///         uow.track(video);
    ///         Ok(())
    ///     }))
    ///     .await?;
    /// ```
    #[tracing::instrument(skip_all)]
    pub async fn execute<T, Op>(&self, operation: Op) -> Result<T>
    where
        T: Send,
        Op: for<'a> FnOnce(&'a mut F::UnitOfWork) -> BoxFuture<'a, Result<T>> + Send,
    {
        let started = Instant::now();
        let mut uow = self.factory.create();
        uow.start().await?;

        let result = operation(&mut uow).await;
        let result = self.complete(uow, result).await;
        record_duration(started, result.is_ok());
        result
    }

    /// Republishes every locally dead-lettered event. Events that fail
    /// again go back into the store. Returns how many were delivered.
    pub async fn redeliver_dead_letters(&self) -> usize {
        let mut delivered = 0;
        for letter in self.dead_letters.take_all().await {
            match self.publisher.publish(&letter.routed).await {
                Ok(()) => delivered += 1,
                Err(e) => self.dead_letters.push(letter.routed, e.to_string()).await,
            }
        }
        if delivered > 0 {
            info!(delivered, "Dead-lettered integration events redelivered");
        }
        delivered
    }

    async fn complete<T>(&self, mut uow: F::UnitOfWork, result: Result<T>) -> Result<T> {
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                debug!(error = %e, "Use case failed");
                abort(&mut uow).await;
                return Err(e);
            }
        };

        if let Err(e) = self.mediator.dispatch(uow.aggregates()).await {
            warn!(error = %e, "Domain event handler failed");
            abort(&mut uow).await;
            return Err(e);
        }

        // A failed commit is already rolled back by the store.
        uow.commit().await?;

        self.publish_events(uow.take_aggregates()).await;
        Ok(output)
    }

    async fn publish_events(&self, aggregates: Vec<Box<dyn AggregateRoot>>) {
        for mut aggregate in aggregates {
            for event in aggregate.pull_events() {
                match self.translator.translate(&event) {
                    Ok(Translation::Publish(routed)) => self.deliver(routed).await,
                    Ok(Translation::InternalOnly) => {
                        debug!(event_name = event.event_name(), "Event stays in-process");
                    }
                    Err(e) => {
                        metrics::counter!("integration_events_publish_failures_total")
                            .increment(1);
                        error!(
                            error = %e,
                            event_name = event.event_name(),
                            aggregate_id = %event.aggregate_id(),
                            "Integration event translation failed"
                        );
                    }
                }
            }
        }
    }

    async fn deliver(&self, routed: RoutedEvent) {
        match self.failure_policy {
            PublishFailurePolicy::Log => {
                if let Err(e) = self.publisher.publish(&routed).await {
                    error!(
                        error = %e,
                        event_name = %routed.event.event_name,
                        correlation_id = %routed.correlation_id,
                        "Integration event lost after commit"
                    );
                }
            }
            PublishFailurePolicy::DeadLetterLocally => {
                if let Err(e) = self.publisher.publish(&routed).await {
                    warn!(
                        error = %e,
                        event_name = %routed.event.event_name,
                        "Integration event kept in local dead letters"
                    );
                    self.dead_letters.push(routed, e.to_string()).await;
                }
            }
            PublishFailurePolicy::Retry {
                max_attempts,
                delay,
            } => {
                let mut attempt = 1;
                loop {
                    match self.publisher.publish(&routed).await {
                        Ok(()) => break,
                        Err(e) if attempt < max_attempts => {
                            warn!(error = %e, attempt, "Integration event publish failed, retrying");
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        Err(e) => {
                            error!(
                                error = %e,
                                attempts = attempt,
                                event_name = %routed.event.event_name,
                                "Integration event lost after retries"
                            );
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Rolls back an active unit of work. A rollback failure is logged only:
/// the caller returns the error that caused the abort.
async fn abort<U: UnitOfWork>(uow: &mut U) {
    if uow.state() != UnitOfWorkState::Active {
        return;
    }
    if let Err(e) = uow.rollback().await {
        error!(error = %e, "Rollback failed");
    }
}

fn record_duration(started: Instant, succeeded: bool) {
    let outcome = if succeeded { "success" } else { "failure" };
    metrics::histogram!("command_duration_seconds", "outcome" => outcome)
        .record(started.elapsed().as_secs_f64());
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

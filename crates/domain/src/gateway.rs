use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::DomainResult;
use crate::error::DomainError;
use crate::notifications::Notification;
use crate::observability;
use crate::ports::BoxStream;
use crate::ports::record_store::{EventKind, RecordEvent, RecordFilter, RecordService, RecordType};
use crate::submission::Submission;
use crate::util::backoff_ms;
use crate::wire::{self, SubmissionPatch, UserProfile};

/// Bounded exponential backoff for idempotent reads. Mutations never retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRetryPolicy {
    pub attempts: u32,
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for ReadRetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_ms: 100,
            max_ms: 2_000,
        }
    }
}

impl ReadRetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            attempts: 1,
            base_ms: 0,
            max_ms: 0,
        }
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> DomainResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DomainResult<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay_ms = backoff_ms(self.base_ms, attempt, self.max_ms);
                    warn!(
                        operation = %operation,
                        attempt,
                        delay_ms,
                        error = %err,
                        "record store read failed; retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Listed {
    pub position: usize,
    pub submission: Submission,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ListedPage {
    pub items: Vec<Listed>,
    pub raw_count: usize,
    pub next_cursor: Option<String>,
}

#[derive(Clone)]
pub struct RecordStoreGateway {
    service: Arc<dyn RecordService>,
    retry: ReadRetryPolicy,
}

impl RecordStoreGateway {
    pub fn new(service: Arc<dyn RecordService>, retry: ReadRetryPolicy) -> Self {
        Self { service, retry }
    }

    pub async fn create_submission(&self, submission: &Submission) -> DomainResult<Submission> {
        let input = wire::encode_submission(submission)?;
        let created = self.service.create(RecordType::Feedback, &input).await?;
        wire::decode_submission(created)
    }

    pub async fn get_submission(&self, id: &str) -> DomainResult<Option<Submission>> {
        let raw = self
            .retry
            .run("get_submission", || self.service.get(RecordType::Feedback, id))
            .await?;
        raw.map(wire::decode_submission).transpose()
    }

    pub async fn list_submissions(
        &self,
        filter: &RecordFilter,
        limit: usize,
        cursor: Option<&str>,
    ) -> DomainResult<ListedPage> {
        if !filter.is_supported() {
            return Err(DomainError::Validation(
                "an or-of-equality clause cannot be combined with other clauses".into(),
            ));
        }
        let list = self
            .retry
            .run("list_submissions", || {
                self.service
                    .list(RecordType::Feedback, filter, limit, cursor)
            })
            .await?;

        let raw_count = list.items.len();
        let mut items = Vec::with_capacity(raw_count);
        for (position, raw) in list.items.into_iter().enumerate() {
            let record_id = wire::record_id(&raw).unwrap_or_default().to_string();
            match wire::decode_submission(raw) {
                Ok(submission) => items.push(Listed {
                    position,
                    submission,
                }),
                Err(err) => {
                    observability::register_schema_drift(RecordType::Feedback.as_str());
                    warn!(record_id = %record_id, error = %err, "dropping undecodable submission");
                }
            }
        }

        Ok(ListedPage {
            items,
            raw_count,
            next_cursor: list.next_cursor,
        })
    }

    pub async fn update_submission(&self, patch: &SubmissionPatch) -> DomainResult<Submission> {
        let updated = self
            .service
            .update(RecordType::Feedback, &patch.to_value(), patch.precondition())
            .await?;
        wire::decode_submission(updated)
    }

    pub async fn delete_submission(&self, id: &str) -> DomainResult<()> {
        self.service.delete(RecordType::Feedback, id).await
    }

    pub async fn subscribe_submission_events(
        &self,
        kind: EventKind,
        id: &str,
    ) -> DomainResult<BoxStream<'static, RecordEvent>> {
        self.service
            .subscribe(RecordType::Feedback, kind, &RecordFilter::by_id(id))
            .await
    }

    pub async fn create_notification(&self, notification: &Notification) -> DomainResult<Notification> {
        let input = wire::encode_notification(notification)?;
        let created = self.service.create(RecordType::Notification, &input).await?;
        wire::decode_notification(created)
    }

    pub async fn get_user_profile(&self, subject_id: &str) -> DomainResult<Option<UserProfile>> {
        let raw = self
            .retry
            .run("get_user_profile", || {
                self.service.get(RecordType::User, subject_id)
            })
            .await?;
        raw.map(wire::decode_user_profile).transpose()
    }
}

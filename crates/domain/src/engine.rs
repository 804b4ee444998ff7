use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::DomainResult;
use crate::attachments::AttachmentService;
use crate::cell::SubmissionSnapshot;
use crate::coordinator::{MutationAction, MutationCoordinator};
use crate::gateway::{ReadRetryPolicy, RecordStoreGateway};
use crate::identity::ActorProfile;
use crate::notifications::NotificationDispatcher;
use crate::pagination::{DEFAULT_CHUNK_SIZE, Page, QueryAccumulator, SubmissionQuery};
use crate::ports::identity::IdentityProvider;
use crate::ports::object_store::ObjectStore;
use crate::ports::record_store::RecordService;
use crate::profile::ProfileCache;
use crate::ratings::{RatingAggregator, RatingSummary};
use crate::reconcile::{ReconciliationStream, TrackedSubmission};
use crate::submission::{self, ContentEdit, ServiceCategory, StatusChange, Submission, SubmissionContent};
use crate::util::now_ms;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub staff_group: String,
    pub page_chunk_size: usize,
    pub read_retry: ReadRetryPolicy,
    pub notification_dedupe_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            staff_group: "Admin".into(),
            page_chunk_size: DEFAULT_CHUNK_SIZE,
            read_retry: ReadRetryPolicy::default(),
            notification_dedupe_capacity: 1_024,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubmission {
    pub category: ServiceCategory,
    pub rating: u8,
    #[serde(default)]
    pub content: SubmissionContent,
}

#[derive(Clone)]
pub struct SyncEngine {
    gateway: RecordStoreGateway,
    profiles: ProfileCache,
    coordinator: Arc<MutationCoordinator>,
    reconciliation: ReconciliationStream,
    accumulator: QueryAccumulator,
    ratings: RatingAggregator,
    attachments: AttachmentService,
}

impl SyncEngine {
    pub fn new(
        records: Arc<dyn RecordService>,
        identity: Arc<dyn IdentityProvider>,
        objects: Arc<dyn ObjectStore>,
        config: EngineConfig,
    ) -> Self {
        let gateway = RecordStoreGateway::new(records, config.read_retry);
        let profiles = ProfileCache::new(identity, gateway.clone(), config.staff_group);
        let dispatcher = Arc::new(NotificationDispatcher::new(
            gateway.clone(),
            config.notification_dedupe_capacity,
        ));
        let accumulator = QueryAccumulator::new(gateway.clone(), config.page_chunk_size);
        Self {
            coordinator: Arc::new(MutationCoordinator::new(
                gateway.clone(),
                profiles.clone(),
                dispatcher,
            )),
            reconciliation: ReconciliationStream::new(gateway.clone()),
            ratings: RatingAggregator::new(accumulator.clone()),
            attachments: AttachmentService::new(objects),
            accumulator,
            profiles,
            gateway,
        }
    }

    pub async fn submit(&self, input: NewSubmission) -> DomainResult<SubmissionHandle> {
        let actor = self.profiles.current().await?;
        let draft = submission::create(
            &actor.subject_id,
            input.category,
            input.rating,
            input.content,
            now_ms(),
        )?;
        let created = self.gateway.create_submission(&draft).await?;
        info!(
            submission_id = %created.id,
            category = %created.category.as_str(),
            full_feedback = created.is_full_feedback(),
            "submission created"
        );
        Ok(self.handle(self.reconciliation.track_known(created)))
    }

    pub fn track(&self, id: &str) -> SubmissionHandle {
        self.handle(self.reconciliation.track(id))
    }

    pub async fn fetch_page(
        &self,
        query: &SubmissionQuery,
        min_size: usize,
        cursor: Option<&str>,
    ) -> DomainResult<Page> {
        self.accumulator.fetch_page(query, min_size, cursor).await
    }

    pub async fn my_submissions(&self, min_size: usize, cursor: Option<&str>) -> DomainResult<Page> {
        let actor = self.profiles.current().await?;
        self.fetch_page(&SubmissionQuery::for_owner(actor.subject_id), min_size, cursor)
            .await
    }

    pub async fn rating_summary(&self, category: Option<ServiceCategory>) -> DomainResult<RatingSummary> {
        self.ratings.summarize(category).await
    }

    pub fn attachments(&self) -> &AttachmentService {
        &self.attachments
    }

    pub async fn current_actor(&self) -> DomainResult<ActorProfile> {
        self.profiles.current().await
    }

    pub async fn clear_cached_profile(&self) {
        self.profiles.clear().await;
    }

    pub fn tracked_count(&self) -> usize {
        self.reconciliation.tracked_count()
    }

    fn handle(&self, tracked: TrackedSubmission) -> SubmissionHandle {
        SubmissionHandle {
            tracked,
            coordinator: Arc::clone(&self.coordinator),
        }
    }
}

#[derive(Clone)]
pub struct SubmissionHandle {
    tracked: TrackedSubmission,
    coordinator: Arc<MutationCoordinator>,
}

impl SubmissionHandle {
    pub fn id(&self) -> &str {
        self.tracked.id()
    }

    pub fn current(&self) -> Option<Submission> {
        self.tracked.current()
    }

    pub fn snapshot(&self) -> SubmissionSnapshot {
        self.tracked.snapshot()
    }

    pub async fn changed(&mut self) -> Option<Submission> {
        self.tracked.changed().await
    }

    pub async fn send(&self, action: MutationAction) -> DomainResult<Submission> {
        self.coordinator.send(self.tracked.cell(), action).await
    }

    pub async fn change_status(&self, change: StatusChange) -> DomainResult<Submission> {
        self.send(MutationAction::ChangeStatus(change)).await
    }

    pub async fn edit_content(&self, edit: ContentEdit) -> DomainResult<Submission> {
        self.send(MutationAction::EditContent(edit)).await
    }

    pub async fn reply(&self, message: impl Into<String>) -> DomainResult<Submission> {
        self.send(MutationAction::Reply {
            message: message.into(),
        })
        .await
    }

    pub async fn delete(&self) -> DomainResult<()> {
        self.coordinator.delete(self.tracked.cell()).await
    }
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use futures_util::stream::select_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::cell::{SubmissionCell, SubmissionSnapshot};
use crate::gateway::RecordStoreGateway;
use crate::observability;
use crate::ports::record_store::{EventKind, RecordEvent};
use crate::submission::Submission;
use crate::wire;

struct TrackedEntry {
    cell: Arc<SubmissionCell>,
    observers: usize,
    task: JoinHandle<()>,
}

type Registry = Arc<Mutex<HashMap<String, TrackedEntry>>>;

fn lock(registry: &Registry) -> std::sync::MutexGuard<'_, HashMap<String, TrackedEntry>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct ReconciliationStream {
    gateway: RecordStoreGateway,
    registry: Registry,
}

impl ReconciliationStream {
    pub fn new(gateway: RecordStoreGateway) -> Self {
        Self {
            gateway,
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn track(&self, id: &str) -> TrackedSubmission {
        self.track_with(id, None)
    }

    pub fn track_known(&self, submission: Submission) -> TrackedSubmission {
        let id = submission.id.clone();
        self.track_with(&id, Some(submission))
    }

    fn track_with(&self, id: &str, known: Option<Submission>) -> TrackedSubmission {
        let mut registry = lock(&self.registry);
        let cell = match registry.get_mut(id) {
            Some(entry) => {
                entry.observers += 1;
                Arc::clone(&entry.cell)
            }
            None => {
                let cell = Arc::new(SubmissionCell::new(id));
                let task = tokio::spawn(follow(self.gateway.clone(), Arc::clone(&cell)));
                registry.insert(
                    id.to_string(),
                    TrackedEntry {
                        cell: Arc::clone(&cell),
                        observers: 1,
                        task,
                    },
                );
                debug!(submission_id = %id, "tracking submission");
                cell
            }
        };
        drop(registry);

        if let Some(known) = known {
            cell.apply_pull(Some(known));
        }
        TrackedSubmission::attach(cell, Arc::clone(&self.registry))
    }

    pub fn tracked_count(&self) -> usize {
        lock(&self.registry).len()
    }
}

/// Subscribes first so that nothing pushed during the initial pull is missed.
async fn follow(gateway: RecordStoreGateway, cell: Arc<SubmissionCell>) {
    let mut streams = Vec::with_capacity(EventKind::ALL.len());
    for kind in EventKind::ALL {
        match gateway.subscribe_submission_events(kind, cell.id()).await {
            Ok(stream) => streams.push(stream),
            Err(err) => warn!(
                submission_id = %cell.id(),
                event_kind = %kind.as_str(),
                error = %err,
                "subscription failed"
            ),
        }
    }

    pull(&gateway, &cell).await;

    let mut events = select_all(streams);
    while let Some(event) = events.next().await {
        apply_event(&gateway, &cell, event).await;
    }
    debug!(submission_id = %cell.id(), "change subscriptions ended");
}

async fn pull(gateway: &RecordStoreGateway, cell: &SubmissionCell) {
    match gateway.get_submission(cell.id()).await {
        Ok(pulled) => {
            cell.apply_pull(pulled);
        }
        Err(err) => warn!(submission_id = %cell.id(), error = %err, "pull failed"),
    }
}

async fn apply_event(gateway: &RecordStoreGateway, cell: &SubmissionCell, event: RecordEvent) {
    let kind = event.kind.as_str();
    let Some(event_id) = wire::record_id(&event.payload) else {
        drop_event(cell, kind, "missing_id");
        return;
    };
    if event_id != cell.id() {
        drop_event(cell, kind, "foreign_id");
        return;
    }

    match event.kind {
        EventKind::Deleted => {
            cell.clear();
        }
        EventKind::Created | EventKind::Updated if wire::is_id_only(&event.payload) => {
            observability::register_repull(kind);
            pull(gateway, cell).await;
        }
        EventKind::Created | EventKind::Updated => match wire::decode_submission(event.payload) {
            Ok(pushed) => {
                cell.apply_push(pushed);
            }
            Err(err) => {
                warn!(submission_id = %cell.id(), event_kind = %kind, error = %err, "malformed push event");
                observability::register_dropped_push_event(kind, "malformed");
            }
        },
    }
}

fn drop_event(cell: &SubmissionCell, kind: &str, reason: &str) {
    warn!(submission_id = %cell.id(), event_kind = %kind, reason = %reason, "dropping push event");
    observability::register_dropped_push_event(kind, reason);
}

pub struct TrackedSubmission {
    cell: Arc<SubmissionCell>,
    receiver: watch::Receiver<SubmissionSnapshot>,
    registry: Registry,
}

impl TrackedSubmission {
    fn attach(cell: Arc<SubmissionCell>, registry: Registry) -> Self {
        let receiver = cell.subscribe();
        Self {
            cell,
            receiver,
            registry,
        }
    }

    pub fn id(&self) -> &str {
        self.cell.id()
    }

    pub fn cell(&self) -> &Arc<SubmissionCell> {
        &self.cell
    }

    pub fn current(&self) -> Option<Submission> {
        self.cell.current()
    }

    pub fn snapshot(&self) -> SubmissionSnapshot {
        self.cell.snapshot()
    }

    pub async fn changed(&mut self) -> Option<Submission> {
        if self.receiver.changed().await.is_err() {
            return self.cell.current();
        }
        self.receiver.borrow_and_update().submission.clone()
    }
}

impl Clone for TrackedSubmission {
    fn clone(&self) -> Self {
        if let Some(entry) = lock(&self.registry).get_mut(self.cell.id()) {
            if Arc::ptr_eq(&entry.cell, &self.cell) {
                entry.observers += 1;
            }
        }
        Self::attach(Arc::clone(&self.cell), Arc::clone(&self.registry))
    }
}

impl Drop for TrackedSubmission {
    fn drop(&mut self) {
        let mut registry = lock(&self.registry);
        let Some(entry) = registry.get_mut(self.cell.id()) else {
            return;
        };
        if !Arc::ptr_eq(&entry.cell, &self.cell) {
            return;
        }
        entry.observers = entry.observers.saturating_sub(1);
        if entry.observers > 0 {
            return;
        }
        if let Some(entry) = registry.remove(self.cell.id()) {
            entry.task.abort();
            debug!(submission_id = %self.cell.id(), "stopped tracking submission");
        }
    }
}

//! In-memory record service shared by the engine's unit tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;

use crate::DomainResult;
use crate::error::DomainError;
use crate::ports::record_store::{
    EventKind, Precondition, RecordEvent, RecordFilter, RecordList, RecordService, RecordType,
};
use crate::ports::{BoxFuture, BoxStream};
use crate::submission::Submission;
use crate::util::{format_ms_rfc3339, parse_rfc3339_ms};
use crate::wire;

pub(crate) struct MemoryRecords {
    records: RwLock<HashMap<RecordType, Vec<Value>>>,
    channels: Mutex<HashMap<EventKind, broadcast::Sender<RecordEvent>>>,
    pub update_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub get_calls: AtomicUsize,
    pub failing_updates: AtomicUsize,
    pub push_id_only: AtomicBool,
    pub update_gate: tokio::sync::Mutex<()>,
}

impl Default for MemoryRecords {
    fn default() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            update_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            get_calls: AtomicUsize::new(0),
            failing_updates: AtomicUsize::new(0),
            push_id_only: AtomicBool::new(false),
            update_gate: tokio::sync::Mutex::new(()),
        }
    }
}

impl MemoryRecords {
    pub async fn seed(&self, submission: &Submission) {
        let value = wire::encode_submission(submission).unwrap();
        self.records
            .write()
            .await
            .entry(RecordType::Feedback)
            .or_default()
            .push(value);
    }

    pub fn fail_next_updates(&self, count: usize) {
        self.failing_updates.store(count, Ordering::SeqCst);
    }

    pub async fn all(&self, record_type: RecordType) -> Vec<Value> {
        self.records
            .read()
            .await
            .get(&record_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn emit(&self, kind: EventKind, payload: Value) {
        let _ = self.sender(kind).send(RecordEvent { kind, payload });
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.sender(kind).receiver_count()
    }

    fn sender(&self, kind: EventKind) -> broadcast::Sender<RecordEvent> {
        let mut channels = self.channels.lock().unwrap();
        channels
            .entry(kind)
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

impl RecordService for MemoryRecords {
    fn create(&self, record_type: RecordType, input: &Value) -> BoxFuture<'_, DomainResult<Value>> {
        let input = input.clone();
        Box::pin(async move {
            let mut records = self.records.write().await;
            let items = records.entry(record_type).or_default();
            if record_type == RecordType::Notification
                && items
                    .iter()
                    .any(|existing| existing["dedupeKey"] == input["dedupeKey"])
            {
                return Err(DomainError::Conflict);
            }
            items.push(input.clone());
            drop(records);
            if record_type == RecordType::Feedback {
                self.emit(EventKind::Created, input.clone());
            }
            Ok(input)
        })
    }

    fn get(&self, record_type: RecordType, id: &str) -> BoxFuture<'_, DomainResult<Option<Value>>> {
        let id = id.to_string();
        Box::pin(async move {
            self.get_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .records
                .read()
                .await
                .get(&record_type)
                .and_then(|items| {
                    items
                        .iter()
                        .find(|item| wire::record_id(item) == Some(id.as_str()))
                })
                .cloned())
        })
    }

    fn list(
        &self,
        record_type: RecordType,
        filter: &RecordFilter,
        limit: usize,
        cursor: Option<&str>,
    ) -> BoxFuture<'_, DomainResult<RecordList>> {
        let filter = filter.clone();
        let offset = cursor.and_then(|cursor| cursor.parse::<usize>().ok()).unwrap_or(0);
        Box::pin(async move {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let records = self.records.read().await;
            let matching: Vec<Value> = records
                .get(&record_type)
                .map(|items| {
                    items
                        .iter()
                        .filter(|item| filter.matches(item))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            let end = (offset + limit).min(matching.len());
            let items = matching.get(offset..end).unwrap_or_default().to_vec();
            let next_cursor = (end < matching.len()).then(|| end.to_string());
            Ok(RecordList { items, next_cursor })
        })
    }

    fn update(
        &self,
        record_type: RecordType,
        partial: &Value,
        precondition: Option<Precondition>,
    ) -> BoxFuture<'_, DomainResult<Value>> {
        let partial = partial.clone();
        Box::pin(async move {
            self.update_calls.fetch_add(1, Ordering::SeqCst);
            let _gate = self.update_gate.lock().await;
            if self
                .failing_updates
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
            {
                return Err(DomainError::RemoteUnavailable("update refused".into()));
            }
            let id = wire::record_id(&partial).ok_or(DomainError::NotFound)?.to_string();
            let mut records = self.records.write().await;
            let item = records
                .get_mut(&record_type)
                .and_then(|items| {
                    items
                        .iter_mut()
                        .find(|item| wire::record_id(item) == Some(id.as_str()))
                })
                .ok_or(DomainError::NotFound)?;
            if precondition.is_some_and(|precondition| !precondition.holds(item)) {
                return Err(DomainError::Conflict);
            }
            if let (Some(target), Some(fields)) = (item.as_object_mut(), partial.as_object()) {
                for (key, value) in fields {
                    target.insert(key.clone(), value.clone());
                }
            }
            let previous = item["updatedAt"]
                .as_str()
                .and_then(|value| parse_rfc3339_ms(value).ok())
                .unwrap_or_default();
            item["updatedAt"] = json!(format_ms_rfc3339(previous + 1));
            let updated = item.clone();
            drop(records);
            if self.push_id_only.load(Ordering::SeqCst) {
                self.emit(EventKind::Updated, json!({ "id": id }));
            } else {
                self.emit(EventKind::Updated, updated.clone());
            }
            Ok(updated)
        })
    }

    fn delete(&self, record_type: RecordType, id: &str) -> BoxFuture<'_, DomainResult<()>> {
        let id = id.to_string();
        Box::pin(async move {
            let mut records = self.records.write().await;
            if let Some(items) = records.get_mut(&record_type) {
                items.retain(|item| wire::record_id(item) != Some(id.as_str()));
            }
            drop(records);
            self.emit(EventKind::Deleted, json!({ "id": id }));
            Ok(())
        })
    }

    fn subscribe(
        &self,
        _record_type: RecordType,
        kind: EventKind,
        filter: &RecordFilter,
    ) -> BoxFuture<'_, DomainResult<BoxStream<'static, RecordEvent>>> {
        let filter = filter.clone();
        Box::pin(async move {
            let receiver = self.sender(kind).subscribe();
            let stream = BroadcastStream::new(receiver).filter_map(move |event| {
                let event = event
                    .ok()
                    .filter(|event| !event.payload.is_object() || filter.matches(&event.payload));
                async move { event }
            });
            Ok(Box::pin(stream) as BoxStream<'static, RecordEvent>)
        })
    }
}

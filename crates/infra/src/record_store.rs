use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use serde_json::{Value, json};
use tanggap_domain::DomainResult;
use tanggap_domain::error::DomainError;
use tanggap_domain::ports::record_store::{
    EventKind, FilterClause, Precondition, RecordEvent, RecordFilter, RecordList, RecordService,
    RecordType,
};
use tanggap_domain::ports::{BoxFuture, BoxStream};
use tanggap_domain::util::{format_ms_rfc3339, now_ms};
use tanggap_domain::wire;
use tokio::sync::{RwLock, broadcast};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 256;
const MAX_LIST_LIMIT: usize = 1_000;

/// How created and updated records are announced to subscribers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PushMode {
    #[default]
    FullRecord,
    IdOnly,
}

type ChannelMap = HashMap<(RecordType, EventKind), broadcast::Sender<RecordEvent>>;

/// Process-local record service with push channels. Records keep insertion
/// order and `updatedAt` is assigned here, strictly increasing per service.
#[derive(Default)]
pub struct InMemoryRecordService {
    records: Arc<RwLock<HashMap<RecordType, Vec<Value>>>>,
    channels: Arc<Mutex<ChannelMap>>,
    id_only: AtomicBool,
    unavailable: AtomicBool,
    failing_updates: AtomicUsize,
    update_calls: AtomicUsize,
    list_calls: AtomicUsize,
    last_timestamp_ms: AtomicI64,
}

impl InMemoryRecordService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_push_mode(mode: PushMode) -> Self {
        let service = Self::default();
        service.set_push_mode(mode);
        service
    }

    pub fn set_push_mode(&self, mode: PushMode) {
        self.id_only
            .store(mode == PushMode::IdOnly, Ordering::SeqCst);
    }

    /// While unavailable every call fails with `RemoteUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn fail_next_updates(&self, count: usize) {
        self.failing_updates.store(count, Ordering::SeqCst);
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self, record_type: RecordType, kind: EventKind) -> usize {
        self.sender(record_type, kind).receiver_count()
    }

    /// Stores a record verbatim without announcing it.
    pub async fn insert_raw(&self, record_type: RecordType, record: Value) {
        self.records
            .write()
            .await
            .entry(record_type)
            .or_default()
            .push(record);
    }

    pub async fn put_user(&self, subject_id: &str, name: &str, email: Option<&str>) {
        self.insert_raw(
            RecordType::User,
            json!({ "id": subject_id, "name": name, "email": email }),
        )
        .await;
    }

    pub async fn records(&self, record_type: RecordType) -> Vec<Value> {
        self.records
            .read()
            .await
            .get(&record_type)
            .cloned()
            .unwrap_or_default()
    }

    /// Publishes an arbitrary payload, including ones no real record matches.
    pub fn inject_event(&self, record_type: RecordType, kind: EventKind, payload: Value) {
        let _ = self
            .sender(record_type, kind)
            .send(RecordEvent { kind, payload });
    }

    fn announce(&self, record_type: RecordType, kind: EventKind, record: &Value) {
        let payload = match kind {
            EventKind::Deleted => id_only(record),
            _ if self.id_only.load(Ordering::SeqCst) => id_only(record),
            _ => record.clone(),
        };
        let delivered = self
            .sender(record_type, kind)
            .send(RecordEvent { kind, payload })
            .unwrap_or(0);
        debug!(
            record_type = %record_type.as_str(),
            event_kind = %kind.as_str(),
            delivered,
            "record event published"
        );
    }

    fn sender(&self, record_type: RecordType, kind: EventKind) -> broadcast::Sender<RecordEvent> {
        self.channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((record_type, kind))
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    fn ensure_available(&self) -> DomainResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DomainError::RemoteUnavailable(
                "record service is unreachable".into(),
            ));
        }
        Ok(())
    }

    fn next_timestamp_ms(&self) -> i64 {
        let now = now_ms();
        let previous = self
            .last_timestamp_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or(now);
        now.max(previous + 1)
    }
}

fn id_only(record: &Value) -> Value {
    json!({ "id": wire::record_id(record).unwrap_or_default() })
}

fn required_id(value: &Value) -> DomainResult<String> {
    wire::record_id(value)
        .map(str::to_string)
        .ok_or_else(|| DomainError::Rejected("record id is required".into()))
}

/// Records of typed collections must still decode after a write.
fn validate(record_type: RecordType, record: &Value) -> DomainResult<()> {
    let result = match record_type {
        RecordType::Feedback => wire::decode_submission(record.clone()).map(|_| ()),
        RecordType::Notification => wire::decode_notification(record.clone()).map(|_| ()),
        RecordType::User => wire::decode_user_profile(record.clone()).map(|_| ()),
    };
    result.map_err(|err| DomainError::Rejected(err.to_string()))
}

fn filtered_id(filter: &RecordFilter) -> Option<String> {
    filter.clauses.iter().find_map(|clause| match clause {
        FilterClause::Eq { field, value } if field == "id" => value.as_str().map(str::to_string),
        _ => None,
    })
}

impl RecordService for InMemoryRecordService {
    fn create(&self, record_type: RecordType, input: &Value) -> BoxFuture<'_, DomainResult<Value>> {
        let input = input.clone();
        Box::pin(async move {
            self.ensure_available()?;
            let id = required_id(&input)?;
            let mut record = input;
            if record_type == RecordType::Feedback {
                let stamp = format_ms_rfc3339(self.next_timestamp_ms());
                record["updatedAt"] = json!(stamp);
                if record.get("createdAt").is_none_or(Value::is_null) {
                    record["createdAt"] = json!(stamp);
                }
            }
            validate(record_type, &record)?;

            let mut records = self.records.write().await;
            let items = records.entry(record_type).or_default();
            if items
                .iter()
                .any(|existing| wire::record_id(existing) == Some(id.as_str()))
            {
                return Err(DomainError::Conflict);
            }
            if record_type == RecordType::Notification
                && items
                    .iter()
                    .any(|existing| existing.get("dedupeKey") == record.get("dedupeKey"))
            {
                return Err(DomainError::Conflict);
            }
            items.push(record.clone());
            drop(records);

            self.announce(record_type, EventKind::Created, &record);
            Ok(record)
        })
    }

    fn get(&self, record_type: RecordType, id: &str) -> BoxFuture<'_, DomainResult<Option<Value>>> {
        let id = id.to_string();
        Box::pin(async move {
            self.ensure_available()?;
            let records = self.records.read().await;
            Ok(records.get(&record_type).and_then(|items| {
                items
                    .iter()
                    .find(|item| wire::record_id(item) == Some(id.as_str()))
                    .cloned()
            }))
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
        let cursor = cursor.map(str::to_string);
        Box::pin(async move {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            self.ensure_available()?;
            if !filter.is_supported() {
                return Err(DomainError::Rejected("unsupported filter".into()));
            }
            let offset = match cursor.as_deref() {
                None => 0,
                Some(cursor) => cursor
                    .parse::<usize>()
                    .map_err(|_| DomainError::Rejected("invalid cursor".into()))?,
            };
            let limit = limit.clamp(1, MAX_LIST_LIMIT);

            let records = self.records.read().await;
            let matching: Vec<&Value> = records
                .get(&record_type)
                .map(|items| items.iter().filter(|item| filter.matches(item)).collect())
                .unwrap_or_default();
            let end = offset.saturating_add(limit).min(matching.len());
            let items = matching
                .get(offset.min(end)..end)
                .unwrap_or_default()
                .iter()
                .map(|item| (*item).clone())
                .collect();
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
            self.ensure_available()?;
            if self
                .failing_updates
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok()
            {
                return Err(DomainError::RemoteUnavailable("update timed out".into()));
            }
            let id = required_id(&partial)?;
            let Some(fields) = partial.as_object() else {
                return Err(DomainError::Rejected("partial update must be an object".into()));
            };

            let mut records = self.records.write().await;
            let item = records
                .get_mut(&record_type)
                .and_then(|items| {
                    items
                        .iter_mut()
                        .find(|item| wire::record_id(item) == Some(id.as_str()))
                })
                .ok_or(DomainError::NotFound)?;
            if let Some(precondition) = precondition.filter(|precondition| !precondition.holds(item)) {
                debug!(record_id = %id, expected = precondition.updated_at_ms, "stale update refused");
                return Err(DomainError::Conflict);
            }

            let mut merged = item.clone();
            if let Some(target) = merged.as_object_mut() {
                for (key, value) in fields {
                    if key != "id" && key != "createdAt" {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
            if record_type == RecordType::Feedback {
                merged["updatedAt"] = json!(format_ms_rfc3339(self.next_timestamp_ms()));
            }
            validate(record_type, &merged)?;
            *item = merged.clone();
            drop(records);

            self.announce(record_type, EventKind::Updated, &merged);
            Ok(merged)
        })
    }

    fn delete(&self, record_type: RecordType, id: &str) -> BoxFuture<'_, DomainResult<()>> {
        let id = id.to_string();
        Box::pin(async move {
            self.ensure_available()?;
            let mut records = self.records.write().await;
            let items = records.entry(record_type).or_default();
            let Some(index) = items
                .iter()
                .position(|item| wire::record_id(item) == Some(id.as_str()))
            else {
                return Err(DomainError::NotFound);
            };
            let removed = items.remove(index);
            drop(records);

            self.announce(record_type, EventKind::Deleted, &removed);
            Ok(())
        })
    }

    /// A lagging subscriber on a single-record channel receives an id-only
    /// event in place of what it missed, so it knows to pull again.
    fn subscribe(
        &self,
        record_type: RecordType,
        kind: EventKind,
        filter: &RecordFilter,
    ) -> BoxFuture<'_, DomainResult<BoxStream<'static, RecordEvent>>> {
        let filter = filter.clone();
        Box::pin(async move {
            self.ensure_available()?;
            let lag_id = filtered_id(&filter).filter(|_| kind != EventKind::Deleted);
            let receiver = self.sender(record_type, kind).subscribe();
            let stream = BroadcastStream::new(receiver).filter_map(move |item| {
                let event = match item {
                    Ok(event) => {
                        // Non-object payloads cannot be matched; subscribers decide.
                        let relevant =
                            !event.payload.is_object() || filter.matches(&event.payload);
                        relevant.then_some(event)
                    }
                    Err(BroadcastStreamRecvError::Lagged(missed)) => {
                        warn!(
                            record_type = %record_type.as_str(),
                            event_kind = %kind.as_str(),
                            missed,
                            "subscriber lagged behind record events"
                        );
                        lag_id.as_ref().map(|id| RecordEvent {
                            kind,
                            payload: json!({ "id": id }),
                        })
                    }
                };
                async move { event }
            });
            Ok(Box::pin(stream) as BoxStream<'static, RecordEvent>)
        })
    }
}

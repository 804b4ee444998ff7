use serde_json::Value;

use crate::DomainResult;
use crate::ports::{BoxFuture, BoxStream};
use crate::util::parse_rfc3339_ms;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordType {
    Feedback,
    Notification,
    User,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feedback => "Feedback",
            Self::Notification => "Notification",
            Self::User => "User",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

impl EventKind {
    pub const ALL: [Self; 3] = [Self::Created, Self::Updated, Self::Deleted];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FilterClause {
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    AnyOf { field: String, values: Vec<Value> },
}

impl FilterClause {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn any_of<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::AnyOf {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, record: &Value) -> bool {
        match self {
            Self::Eq { field, value } => record.get(field) == Some(value),
            Self::Ne { field, value } => record.get(field) != Some(value),
            Self::AnyOf { field, values } => record
                .get(field)
                .is_some_and(|actual| values.iter().any(|value| value == actual)),
        }
    }
}

/// Clauses are joined with AND. The store accepts an `AnyOf` clause only as
/// the sole clause of a filter; richer predicates are post-filtered by callers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordFilter {
    pub clauses: Vec<FilterClause>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: &str) -> Self {
        Self::new().and(FilterClause::eq("id", id))
    }

    pub fn and(mut self, clause: FilterClause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn is_supported(&self) -> bool {
        let any_of = self
            .clauses
            .iter()
            .filter(|clause| matches!(clause, FilterClause::AnyOf { .. }))
            .count();
        any_of == 0 || (any_of == 1 && self.clauses.len() == 1)
    }

    pub fn matches(&self, record: &Value) -> bool {
        self.clauses.iter().all(|clause| clause.matches(record))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RecordList {
    pub items: Vec<Value>,
    pub next_cursor: Option<String>,
}

/// A pushed change. `payload` is either the full record or an object holding
/// only `id`, depending on the channel.
#[derive(Clone, Debug, PartialEq)]
pub struct RecordEvent {
    pub kind: EventKind,
    pub payload: Value,
}

/// Guard for `update`: the write applies only while the stored record still
/// carries this `updatedAt`, otherwise the store answers `Conflict`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Precondition {
    pub updated_at_ms: i64,
}

impl Precondition {
    pub fn unchanged_since(updated_at_ms: i64) -> Self {
        Self { updated_at_ms }
    }

    pub fn holds(&self, stored: &Value) -> bool {
        stored
            .get("updatedAt")
            .and_then(Value::as_str)
            .and_then(|value| parse_rfc3339_ms(value).ok())
            == Some(self.updated_at_ms)
    }
}

#[allow(clippy::needless_pass_by_value)]
pub trait RecordService: Send + Sync {
    fn create(&self, record_type: RecordType, input: &Value) -> BoxFuture<'_, DomainResult<Value>>;

    fn get(&self, record_type: RecordType, id: &str)
    -> BoxFuture<'_, DomainResult<Option<Value>>>;

    fn list(
        &self,
        record_type: RecordType,
        filter: &RecordFilter,
        limit: usize,
        cursor: Option<&str>,
    ) -> BoxFuture<'_, DomainResult<RecordList>>;

    fn update(
        &self,
        record_type: RecordType,
        partial: &Value,
        precondition: Option<Precondition>,
    ) -> BoxFuture<'_, DomainResult<Value>>;

    fn delete(&self, record_type: RecordType, id: &str) -> BoxFuture<'_, DomainResult<()>>;

    fn subscribe(
        &self,
        record_type: RecordType,
        kind: EventKind,
        filter: &RecordFilter,
    ) -> BoxFuture<'_, DomainResult<BoxStream<'static, RecordEvent>>>;
}

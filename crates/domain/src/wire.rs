use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::DomainResult;
use crate::error::DomainError;
use crate::notifications::{Notification, NotificationType, Recipient};
use crate::ports::record_store::Precondition;
use crate::reply::{Reply, ReplyRole};
use crate::submission::{Rating, ServiceCategory, Submission, SubmissionStatus};
use crate::util::{format_ms_rfc3339, parse_rfc3339_ms};

const STAFF_GROUP_TOKEN: &str = "STAFF";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyRecord {
    pub from_role: ReplyRole,
    pub by_id: String,
    pub by_name: String,
    pub message: String,
    pub at: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRecord {
    pub id: String,
    pub owner_id: String,
    pub service_category: ServiceCategory,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub suggestion: Option<String>,
    #[serde(default)]
    pub attachment_key: Option<String>,
    pub rating: Rating,
    pub status: SubmissionStatus,
    #[serde(default)]
    pub urgency: Option<u8>,
    #[serde(default)]
    pub internal_notes: Option<String>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub replies: Vec<ReplyRecord>,
    #[serde(default)]
    pub updated_by_id: Option<String>,
    #[serde(default)]
    pub updated_by_name: Option<String>,
    #[serde(default)]
    pub responded_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub recipient_group: Option<String>,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub feedback_id: String,
    pub title: String,
    pub body: String,
    pub actor_id: String,
    pub actor_name: String,
    pub dedupe_key: String,
    #[serde(default)]
    pub read: bool,
    pub created_at: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "id")]
    pub subject_id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

impl From<&Reply> for ReplyRecord {
    fn from(reply: &Reply) -> Self {
        Self {
            from_role: reply.from_role,
            by_id: reply.by_id.clone(),
            by_name: reply.by_name.clone(),
            message: reply.message.clone(),
            at: format_ms_rfc3339(reply.at_ms),
        }
    }
}

impl TryFrom<ReplyRecord> for Reply {
    type Error = DomainError;

    fn try_from(record: ReplyRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            from_role: record.from_role,
            by_id: record.by_id,
            by_name: record.by_name,
            message: record.message,
            at_ms: parse_rfc3339_ms(&record.at)?,
        })
    }
}

impl From<&Submission> for SubmissionRecord {
    fn from(submission: &Submission) -> Self {
        Self {
            id: submission.id.clone(),
            owner_id: submission.owner_id.clone(),
            service_category: submission.category,
            title: submission.title.clone(),
            description: submission.description.clone(),
            suggestion: submission.suggestion.clone(),
            attachment_key: submission.attachment_key.clone(),
            rating: submission.rating,
            status: submission.status,
            urgency: submission.urgency,
            internal_notes: submission.internal_notes.clone(),
            replies: submission.replies.iter().map(ReplyRecord::from).collect(),
            updated_by_id: submission.updated_by_id.clone(),
            updated_by_name: submission.updated_by_name.clone(),
            responded_at: submission.responded_at_ms.map(format_ms_rfc3339),
            created_at: format_ms_rfc3339(submission.created_at_ms),
            updated_at: format_ms_rfc3339(submission.updated_at_ms),
        }
    }
}

impl TryFrom<SubmissionRecord> for Submission {
    type Error = DomainError;

    fn try_from(record: SubmissionRecord) -> Result<Self, Self::Error> {
        let replies = record
            .replies
            .into_iter()
            .map(Reply::try_from)
            .collect::<DomainResult<Vec<_>>>()?;
        Ok(Self {
            id: record.id,
            owner_id: record.owner_id,
            category: record.service_category,
            title: record.title,
            description: record.description,
            suggestion: record.suggestion,
            attachment_key: record.attachment_key,
            rating: record.rating,
            status: record.status,
            urgency: record.urgency,
            internal_notes: record.internal_notes,
            replies,
            updated_by_id: record.updated_by_id,
            updated_by_name: record.updated_by_name,
            responded_at_ms: record
                .responded_at
                .as_deref()
                .map(parse_rfc3339_ms)
                .transpose()?,
            created_at_ms: parse_rfc3339_ms(&record.created_at)?,
            updated_at_ms: parse_rfc3339_ms(&record.updated_at)?,
        })
    }
}

pub fn encode_submission(submission: &Submission) -> DomainResult<Value> {
    serde_json::to_value(SubmissionRecord::from(submission))
        .map_err(|err| DomainError::schema_drift("failed to encode submission", err))
}

pub fn decode_submission(value: Value) -> DomainResult<Submission> {
    let record: SubmissionRecord = serde_json::from_value(value)
        .map_err(|err| DomainError::schema_drift("unparsable submission record", err))?;
    Submission::try_from(record)
}

pub fn encode_notification(notification: &Notification) -> DomainResult<Value> {
    let (recipient_id, recipient_group) = match &notification.recipient {
        Recipient::User(subject_id) => (Some(subject_id.clone()), None),
        Recipient::Staff => (None, Some(STAFF_GROUP_TOKEN.to_string())),
    };
    let record = NotificationRecord {
        id: notification.notification_id.clone(),
        recipient_id,
        recipient_group,
        notification_type: notification.notification_type,
        feedback_id: notification.submission_id.clone(),
        title: notification.title.clone(),
        body: notification.body.clone(),
        actor_id: notification.actor_id.clone(),
        actor_name: notification.actor_name.clone(),
        dedupe_key: notification.dedupe_key.clone(),
        read: notification.read,
        created_at: format_ms_rfc3339(notification.created_at_ms),
    };
    serde_json::to_value(record)
        .map_err(|err| DomainError::schema_drift("failed to encode notification", err))
}

pub fn decode_notification(value: Value) -> DomainResult<Notification> {
    let record: NotificationRecord = serde_json::from_value(value)
        .map_err(|err| DomainError::schema_drift("unparsable notification record", err))?;
    let recipient = match (record.recipient_id, record.recipient_group.as_deref()) {
        (_, Some(STAFF_GROUP_TOKEN)) => Recipient::Staff,
        (Some(subject_id), None) => Recipient::User(subject_id),
        (_, group) => {
            return Err(DomainError::SchemaDrift(format!(
                "notification has no usable recipient (group {group:?})"
            )));
        }
    };
    Ok(Notification {
        notification_id: record.id,
        recipient,
        notification_type: record.notification_type,
        submission_id: record.feedback_id,
        title: record.title,
        body: record.body,
        actor_id: record.actor_id,
        actor_name: record.actor_name,
        dedupe_key: record.dedupe_key,
        read: record.read,
        created_at_ms: parse_rfc3339_ms(&record.created_at)?,
    })
}

pub fn decode_user_profile(value: Value) -> DomainResult<UserProfile> {
    serde_json::from_value(value)
        .map_err(|err| DomainError::schema_drift("unparsable user record", err))
}

pub fn record_id(value: &Value) -> Option<&str> {
    value
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
}

pub fn is_id_only(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|object| object.len() == 1 && object.contains_key("id"))
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubmissionPatch {
    id: String,
    fields: Map<String, Value>,
    base_version: Option<i64>,
}

const STAFF_AUDIT_FIELDS: [&str; 3] = ["updatedById", "updatedByName", "respondedAt"];

impl SubmissionPatch {
    pub fn status_change(next: &Submission) -> DomainResult<Self> {
        Self::pick(next, &["status", "urgency", "internalNotes"], true)
    }

    pub fn content_edit(next: &Submission) -> DomainResult<Self> {
        Self::pick(
            next,
            &["title", "description", "suggestion", "rating", "attachmentKey"],
            false,
        )
    }

    pub fn replies(next: &Submission, staff_reply: bool) -> DomainResult<Self> {
        Self::pick(next, &["replies"], staff_reply)
    }

    fn pick(next: &Submission, keys: &[&str], with_audit: bool) -> DomainResult<Self> {
        let Value::Object(mut encoded) = encode_submission(next)? else {
            return Err(DomainError::SchemaDrift(
                "submission did not encode to an object".into(),
            ));
        };
        let audit: &[&str] = if with_audit { &STAFF_AUDIT_FIELDS } else { &[] };
        let fields = keys
            .iter()
            .chain(audit)
            .map(|key| {
                let value = encoded.remove(*key).unwrap_or(Value::Null);
                ((*key).to_string(), value)
            })
            .collect();
        Ok(Self {
            id: next.id.clone(),
            fields,
            base_version: None,
        })
    }

    pub fn based_on(mut self, updated_at_ms: i64) -> Self {
        self.base_version = Some(updated_at_ms);
        self
    }

    pub fn precondition(&self) -> Option<Precondition> {
        self.base_version.map(Precondition::unchanged_since)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.keys().map(String::as_str).collect()
    }

    pub fn to_value(&self) -> Value {
        let mut object = self.fields.clone();
        object.insert("id".into(), Value::String(self.id.clone()));
        Value::Object(object)
    }
}

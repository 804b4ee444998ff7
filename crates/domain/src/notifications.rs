use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::DomainError;
use crate::gateway::RecordStoreGateway;
use crate::observability;
use crate::reply::{self, ReplyRole};
use crate::submission::Submission;
use crate::util::{now_ms, uuid_v7_without_dashes};

const MAX_BODY_CHARS: usize = 280;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationType {
    StatusChanged,
    AdminReply,
    UserReply,
    GeneralInfo,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StatusChanged => "STATUS_CHANGED",
            Self::AdminReply => "ADMIN_REPLY",
            Self::UserReply => "USER_REPLY",
            Self::GeneralInfo => "GENERAL_INFO",
        }
    }

    fn dedupe_kind(&self) -> &'static str {
        match self {
            Self::StatusChanged => "status",
            Self::AdminReply => "admin_reply",
            Self::UserReply => "user_reply",
            Self::GeneralInfo => "info",
        }
    }
}

/// Tokens this build does not know decode as `GeneralInfo`.
impl From<String> for NotificationType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "STATUS_CHANGED" => Self::StatusChanged,
            "ADMIN_REPLY" => Self::AdminReply,
            "USER_REPLY" => Self::UserReply,
            _ => Self::GeneralInfo,
        }
    }
}

impl From<NotificationType> for String {
    fn from(value: NotificationType) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Recipient {
    User(String),
    Staff,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    pub notification_id: String,
    pub recipient: Recipient,
    pub notification_type: NotificationType,
    pub submission_id: String,
    pub title: String,
    pub body: String,
    pub actor_id: String,
    pub actor_name: String,
    pub dedupe_key: String,
    pub created_at_ms: i64,
    pub read: bool,
}

pub fn dedupe_key(submission: &Submission, notification_type: NotificationType) -> String {
    format!(
        "{}:{}:{}",
        submission.id,
        notification_type.dedupe_kind(),
        submission.updated_at_ms
    )
}

#[derive(Clone, Debug)]
pub enum DispatchTrigger {
    StatusChanged {
        previous: Submission,
        updated: Submission,
    },
    AdminReply {
        updated: Submission,
        message: String,
    },
    UserReply {
        updated: Submission,
        message: String,
    },
}

struct DedupeWindow {
    capacity: usize,
    keys: HashSet<String>,
    order: VecDeque<String>,
}

impl DedupeWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            keys: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    fn insert(&mut self, key: &str) -> bool {
        if !self.keys.insert(key.to_string()) {
            return false;
        }
        self.order.push_back(key.to_string());
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.keys.remove(&evicted);
            }
        }
        true
    }

    fn remove(&mut self, key: &str) {
        if self.keys.remove(key) {
            self.order.retain(|existing| existing != key);
        }
    }
}

pub struct NotificationDispatcher {
    gateway: RecordStoreGateway,
    seen: Mutex<DedupeWindow>,
}

impl NotificationDispatcher {
    pub fn new(gateway: RecordStoreGateway, dedupe_capacity: usize) -> Self {
        Self {
            gateway,
            seen: Mutex::new(DedupeWindow::new(dedupe_capacity)),
        }
    }

    pub async fn on_status_changed(
        &self,
        previous: &Submission,
        updated: &Submission,
    ) -> Option<Notification> {
        if previous.status == updated.status {
            return None;
        }
        let notification = self.build(
            updated,
            NotificationType::StatusChanged,
            Recipient::User(updated.owner_id.clone()),
            format!("Status updated: {}", updated.display_title()),
            format!(
                "Your feedback moved from {} to {}.",
                previous.status.label(),
                updated.status.label()
            ),
            updated.updated_by_id.clone().unwrap_or_default(),
            updated.updated_by_name.clone().unwrap_or_default(),
        );
        self.dispatch(notification).await
    }

    pub async fn on_admin_reply(&self, updated: &Submission, reply_text: &str) -> Option<Notification> {
        let (actor_id, actor_name) = reply_author(updated, ReplyRole::Admin);
        let notification = self.build(
            updated,
            NotificationType::AdminReply,
            Recipient::User(updated.owner_id.clone()),
            format!("New reply from staff on {}", updated.display_title()),
            excerpt(reply_text),
            actor_id,
            actor_name,
        );
        self.dispatch(notification).await
    }

    pub async fn on_user_reply(&self, updated: &Submission, reply_text: &str) -> Option<Notification> {
        let (actor_id, actor_name) = reply_author(updated, ReplyRole::General);
        let notification = self.build(
            updated,
            NotificationType::UserReply,
            Recipient::Staff,
            format!("Member replied on {}", updated.display_title()),
            excerpt(reply_text),
            actor_id,
            actor_name,
        );
        self.dispatch(notification).await
    }

    pub async fn handle(&self, trigger: DispatchTrigger) -> Option<Notification> {
        match trigger {
            DispatchTrigger::StatusChanged { previous, updated } => {
                self.on_status_changed(&previous, &updated).await
            }
            DispatchTrigger::AdminReply { updated, message } => {
                self.on_admin_reply(&updated, &message).await
            }
            DispatchTrigger::UserReply { updated, message } => {
                self.on_user_reply(&updated, &message).await
            }
        }
    }

    pub fn spawn(self: &Arc<Self>, trigger: DispatchTrigger) -> JoinHandle<Option<Notification>> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.handle(trigger).await })
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        &self,
        submission: &Submission,
        notification_type: NotificationType,
        recipient: Recipient,
        title: String,
        body: String,
        actor_id: String,
        actor_name: String,
    ) -> Notification {
        Notification {
            notification_id: uuid_v7_without_dashes(),
            recipient,
            notification_type,
            submission_id: submission.id.clone(),
            title,
            body,
            actor_id,
            actor_name,
            dedupe_key: dedupe_key(submission, notification_type),
            created_at_ms: now_ms(),
            read: false,
        }
    }

    async fn dispatch(&self, notification: Notification) -> Option<Notification> {
        let kind = notification.notification_type.as_str();
        let key = notification.dedupe_key.clone();
        if !self.seen().insert(&key) {
            debug!(dedupe_key = %key, "notification already dispatched");
            observability::register_notification(kind, "suppressed");
            return None;
        }

        match self.gateway.create_notification(&notification).await {
            Ok(created) => {
                info!(
                    submission_id = %created.submission_id,
                    notification_type = %kind,
                    "notification dispatched"
                );
                observability::register_notification(kind, "delivered");
                Some(created)
            }
            Err(DomainError::Conflict) => {
                debug!(dedupe_key = %key, "notification already stored");
                observability::register_notification(kind, "duplicate");
                None
            }
            Err(err) => {
                self.seen().remove(&key);
                warn!(
                    submission_id = %notification.submission_id,
                    notification_type = %kind,
                    error = %err,
                    "notification dispatch failed"
                );
                observability::register_notification(kind, "failed");
                None
            }
        }
    }

    fn seen(&self) -> std::sync::MutexGuard<'_, DedupeWindow> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn reply_author(updated: &Submission, role: ReplyRole) -> (String, String) {
    reply::latest_reply(updated, Some(role))
        .map(|reply| (reply.by_id.clone(), reply.by_name.clone()))
        .unwrap_or_default()
}

fn excerpt(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= MAX_BODY_CHARS {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(MAX_BODY_CHARS).collect();
    cut.push('…');
    cut
}

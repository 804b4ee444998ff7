use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use futures_util::future::Shared;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::DomainResult;
use crate::cell::SubmissionCell;
use crate::error::DomainError;
use crate::gateway::RecordStoreGateway;
use crate::identity::ActorProfile;
use crate::notifications::{DispatchTrigger, NotificationDispatcher};
use crate::observability;
use crate::ports::BoxFuture;
use crate::profile::ProfileCache;
use crate::reply::{Reply, ReplyRole};
use crate::submission::{self, ContentEdit, StatusChange, Submission};
use crate::util::{normalize_optional, now_ms, payload_digest};
use crate::wire::SubmissionPatch;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum MutationAction {
    ChangeStatus(StatusChange),
    EditContent(ContentEdit),
    Reply { message: String },
}

impl MutationAction {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChangeStatus(_) => "change_status",
            Self::EditContent(_) => "edit_content",
            Self::Reply { .. } => "reply",
        }
    }

    fn normalized(&self) -> Self {
        match self {
            Self::ChangeStatus(change) => Self::ChangeStatus(StatusChange {
                status: change.status,
                urgency: change.urgency,
                internal_notes: change
                    .internal_notes
                    .as_ref()
                    .map(|notes| notes.trim().to_string()),
            }),
            Self::EditContent(edit) => Self::EditContent(ContentEdit {
                title: normalize_optional(edit.title.clone()),
                description: normalize_optional(edit.description.clone()),
                suggestion: normalize_optional(edit.suggestion.clone()),
                rating: edit.rating,
                attachment_key: normalize_optional(edit.attachment_key.clone()),
            }),
            Self::Reply { message } => Self::Reply {
                message: message.trim().to_string(),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct DedupKey {
    submission_id: String,
    kind: &'static str,
    digest: String,
}

type SharedSend = Shared<BoxFuture<'static, DomainResult<Submission>>>;

struct InFlight {
    base_version: i64,
    send: SharedSend,
}

type Lane = Arc<tokio::sync::Mutex<()>>;

const MAX_REBASES: usize = 3;

enum FollowUp {
    None,
    StatusChanged,
    AdminReply(String),
    UserReply(String),
}

struct Planned {
    next: Submission,
    patch: SubmissionPatch,
    follow_up: FollowUp,
}

struct Confirmed {
    previous: Submission,
    server: Submission,
    follow_up: FollowUp,
}

pub struct MutationCoordinator {
    gateway: RecordStoreGateway,
    profiles: ProfileCache,
    dispatcher: Arc<NotificationDispatcher>,
    in_flight: Arc<Mutex<HashMap<DedupKey, InFlight>>>,
    lanes: Arc<Mutex<HashMap<String, Lane>>>,
}

impl MutationCoordinator {
    pub fn new(
        gateway: RecordStoreGateway,
        profiles: ProfileCache,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            gateway,
            profiles,
            dispatcher,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            lanes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Resolves with the server-confirmed value. A send identical to one in
    /// flight joins it instead of issuing a second remote call.
    pub async fn send(
        &self,
        cell: &Arc<SubmissionCell>,
        action: MutationAction,
    ) -> DomainResult<Submission> {
        let actor = self.profiles.current().await?;
        let action = action.normalized();
        let kind = action.kind();
        let key = DedupKey {
            submission_id: cell.id().to_string(),
            kind,
            digest: payload_digest(&action)?,
        };

        let send = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = in_flight.get(&key) {
                debug!(
                    submission_id = %cell.id(),
                    action = %kind,
                    base_version = existing.base_version,
                    "joining in-flight send"
                );
                existing.send.clone()
            } else {
                let visible = cell
                    .current()
                    .or_else(|| cell.confirmed())
                    .ok_or(DomainError::NotFound)?;
                let preview = plan(&visible, &action, &actor, now_ms()).inspect_err(|_| {
                    observability::register_mutation(kind, "rejected_locally");
                })?;
                let base_version = cell
                    .confirmed()
                    .map_or(visible.updated_at_ms, |confirmed| confirmed.updated_at_ms);
                cell.project(preview.next);
                let send = self.launch(cell, key.clone(), action, actor);
                in_flight.insert(
                    key,
                    InFlight {
                        base_version,
                        send: send.clone(),
                    },
                );
                send
            }
        };

        send.await
    }

    fn lane(&self, submission_id: &str) -> Lane {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(lanes.entry(submission_id.to_string()).or_default())
    }

    fn launch(
        &self,
        cell: &Arc<SubmissionCell>,
        key: DedupKey,
        action: MutationAction,
        actor: ActorProfile,
    ) -> SharedSend {
        let gateway = self.gateway.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        let in_flight = Arc::clone(&self.in_flight);
        let lanes = Arc::clone(&self.lanes);
        let lane = self.lane(cell.id());
        let cell = Arc::clone(cell);
        let kind = key.kind;

        // Spawned so that dropping every caller does not cancel the update.
        let task = tokio::spawn(async move {
            let outcome = {
                let _turn = lane.lock().await;
                write_on_confirmed(&gateway, &cell, &action, &actor).await
            };
            {
                let mut lanes = lanes.lock().unwrap_or_else(PoisonError::into_inner);
                // The map and this task hold the only references once no send waits.
                if Arc::strong_count(&lane) <= 2 {
                    lanes.remove(cell.id());
                }
            }

            let result = match outcome {
                Ok(confirmed) => {
                    cell.confirm(confirmed.server.clone());
                    observability::register_mutation(kind, "confirmed");
                    info!(submission_id = %confirmed.server.id, action = %kind, "mutation confirmed");
                    let server = confirmed.server.clone();
                    if let Some(trigger) =
                        follow_up(confirmed.follow_up, confirmed.previous, confirmed.server)
                    {
                        dispatcher.spawn(trigger);
                    }
                    Ok(server)
                }
                Err(err) => {
                    observability::register_mutation(kind, "failed");
                    warn!(submission_id = %cell.id(), action = %kind, error = %err, "mutation failed");
                    Err(err)
                }
            };
            in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
            result
        });

        let joined: BoxFuture<'static, DomainResult<Submission>> = Box::pin(async move {
            task.await.unwrap_or_else(|err| {
                Err(DomainError::RemoteUnavailable(format!(
                    "mutation task ended abnormally: {err}"
                )))
            })
        });
        joined.shared()
    }

    pub async fn delete(&self, cell: &Arc<SubmissionCell>) -> DomainResult<()> {
        let actor = self.profiles.current().await?;
        let current = cell.current().ok_or(DomainError::NotFound)?;
        if !current.can_delete(&actor) {
            if current.owner_id == actor.subject_id {
                return Err(DomainError::EditNotAllowed);
            }
            return Err(DomainError::Forbidden(
                "only the owner or staff may delete a submission".into(),
            ));
        }

        self.gateway.delete_submission(&current.id).await?;
        cell.clear();
        observability::register_mutation("delete", "confirmed");
        info!(submission_id = %current.id, "submission deleted");
        Ok(())
    }
}

/// Plans against the last confirmed value and writes only if the server still
/// holds that version. A stale base is refreshed and the action re-planned.
async fn write_on_confirmed(
    gateway: &RecordStoreGateway,
    cell: &SubmissionCell,
    action: &MutationAction,
    actor: &ActorProfile,
) -> DomainResult<Confirmed> {
    let mut base = cell
        .confirmed()
        .or_else(|| cell.current())
        .ok_or(DomainError::NotFound)?;
    let mut rebases = 0;
    loop {
        let planned = plan(&base, action, actor, now_ms())?;
        let patch = planned.patch.based_on(base.updated_at_ms);
        match gateway.update_submission(&patch).await {
            Ok(server) => {
                return Ok(Confirmed {
                    previous: base,
                    server,
                    follow_up: planned.follow_up,
                });
            }
            Err(DomainError::Conflict) if rebases < MAX_REBASES => {
                rebases += 1;
                debug!(submission_id = %cell.id(), action = %action.kind(), rebases, "base is stale, pulling");
                let fresh = gateway
                    .get_submission(cell.id())
                    .await?
                    .ok_or(DomainError::NotFound)?;
                cell.apply_pull(Some(fresh.clone()));
                base = fresh;
            }
            Err(err) => return Err(err),
        }
    }
}

fn plan(
    base: &Submission,
    action: &MutationAction,
    actor: &ActorProfile,
    now_ms: i64,
) -> DomainResult<Planned> {
    match action {
        MutationAction::ChangeStatus(change) => {
            let next = submission::apply_status_change(base, change, actor, now_ms)?;
            Ok(Planned {
                patch: SubmissionPatch::status_change(&next)?,
                next,
                follow_up: FollowUp::StatusChanged,
            })
        }
        MutationAction::EditContent(edit) => {
            let next = submission::apply_content_edit(base, edit, actor, now_ms)?;
            Ok(Planned {
                patch: SubmissionPatch::content_edit(&next)?,
                next,
                follow_up: FollowUp::None,
            })
        }
        MutationAction::Reply { message } => {
            let role = reply_role(base, actor)?;
            let reply = Reply::new(
                role,
                actor.subject_id.clone(),
                actor.display_name.clone(),
                message,
                now_ms,
            )?;
            let next = submission::append_reply(base, reply, now_ms)?;
            let staff_reply = role == ReplyRole::Admin;
            Ok(Planned {
                patch: SubmissionPatch::replies(&next, staff_reply)?,
                next,
                follow_up: if staff_reply {
                    FollowUp::AdminReply(message.clone())
                } else {
                    FollowUp::UserReply(message.clone())
                },
            })
        }
    }
}

fn reply_role(base: &Submission, actor: &ActorProfile) -> DomainResult<ReplyRole> {
    if actor.is_staff {
        return Ok(ReplyRole::Admin);
    }
    if actor.subject_id != base.owner_id {
        return Err(DomainError::Forbidden(
            "only the owner may reply as a member".into(),
        ));
    }
    Ok(ReplyRole::General)
}

fn follow_up(
    follow_up: FollowUp,
    previous: Submission,
    updated: Submission,
) -> Option<DispatchTrigger> {
    match follow_up {
        FollowUp::None => None,
        FollowUp::StatusChanged => Some(DispatchTrigger::StatusChanged { previous, updated }),
        FollowUp::AdminReply(message) => Some(DispatchTrigger::AdminReply { updated, message }),
        FollowUp::UserReply(message) => Some(DispatchTrigger::UserReply { updated, message }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ReadRetryPolicy;
    use crate::ports::identity::IdentityProvider;
    use crate::ports::record_store::RecordType;
    use crate::submission::SubmissionStatus;
    use crate::submission::tests::sample_submission;
    use crate::testing::MemoryRecords;
    use std::collections::HashSet;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    struct FixedIdentity {
        subject_id: &'static str,
        staff: bool,
    }

    impl IdentityProvider for FixedIdentity {
        fn current_subject_id(&self) -> DomainResult<String> {
            Ok(self.subject_id.to_string())
        }

        fn current_group_claims(&self) -> DomainResult<HashSet<String>> {
            Ok(if self.staff {
                HashSet::from(["Admin".to_string()])
            } else {
                HashSet::new()
            })
        }
    }

    fn coordinator(store: &Arc<MemoryRecords>, subject_id: &'static str, staff: bool) -> MutationCoordinator {
        let gateway = RecordStoreGateway::new(store.clone(), ReadRetryPolicy::no_retry());
        let identity = Arc::new(FixedIdentity { subject_id, staff });
        MutationCoordinator::new(
            gateway.clone(),
            ProfileCache::new(identity, gateway.clone(), "Admin"),
            Arc::new(NotificationDispatcher::new(gateway, 64)),
        )
    }

    async fn seeded(store: &MemoryRecords) -> Arc<SubmissionCell> {
        let submission = sample_submission();
        store.seed(&submission).await;
        Arc::new(SubmissionCell::seeded(submission))
    }

    async fn wait_for_notifications(store: &MemoryRecords, expected: usize) -> Vec<serde_json::Value> {
        for _ in 0..100 {
            let stored = store.all(RecordType::Notification).await;
            if stored.len() >= expected {
                return stored;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        store.all(RecordType::Notification).await
    }

    async fn wait_for_update_calls(store: &MemoryRecords, expected: usize) {
        for _ in 0..100 {
            if store.update_calls.load(Ordering::SeqCst) >= expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("update was never attempted");
    }

    async fn stored_messages(store: &MemoryRecords) -> Vec<String> {
        let stored = store.all(RecordType::Feedback).await;
        stored[0]["replies"]
            .as_array()
            .unwrap()
            .iter()
            .map(|reply| reply["message"].as_str().unwrap().to_string())
            .collect()
    }

    fn reply(message: &str) -> MutationAction {
        MutationAction::Reply {
            message: message.into(),
        }
    }

    #[tokio::test]
    async fn staff_status_change_is_confirmed_and_notified() {
        let store = Arc::new(MemoryRecords::default());
        let cell = seeded(&store).await;
        let staff = coordinator(&store, "staff-1", true);

        let confirmed = staff
            .send(&cell, MutationAction::ChangeStatus(StatusChange::to(SubmissionStatus::InProgress)))
            .await
            .unwrap();

        assert_eq!(confirmed.status, SubmissionStatus::InProgress);
        assert_eq!(confirmed.updated_by_id.as_deref(), Some("staff-1"));
        assert_eq!(cell.confirmed(), Some(confirmed.clone()));
        assert!(!cell.snapshot().provisional);

        let notifications = wait_for_notifications(&store, 1).await;
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0]["recipientId"], "owner-1");
        assert_eq!(notifications[0]["type"], "STATUS_CHANGED");
    }

    #[tokio::test]
    async fn double_tap_reply_issues_one_remote_update() {
        let store = Arc::new(MemoryRecords::default());
        let cell = seeded(&store).await;
        let staff = Arc::new(coordinator(&store, "staff-1", true));

        let gate = store.update_gate.lock().await;
        let first = tokio::spawn({
            let (staff, cell) = (staff.clone(), cell.clone());
            async move { staff.send(&cell, MutationAction::Reply { message: "On it".into() }).await }
        });
        let second = tokio::spawn({
            let (staff, cell) = (staff.clone(), cell.clone());
            async move { staff.send(&cell, MutationAction::Reply { message: " On it ".into() }).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let projected = cell.snapshot();
        assert!(projected.provisional);
        assert_eq!(projected.submission.unwrap().replies.len(), 1);
        drop(gate);

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.replies.len(), 1);
        assert_eq!(store.update_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn double_tap_joins_after_own_push_advances_the_version() {
        let store = Arc::new(MemoryRecords::default());
        let cell = seeded(&store).await;
        let staff = Arc::new(coordinator(&store, "staff-1", true));

        let gate = store.update_gate.lock().await;
        let first = tokio::spawn({
            let (staff, cell) = (staff.clone(), cell.clone());
            async move { staff.send(&cell, reply("On it")).await }
        });
        wait_for_update_calls(&store, 1).await;

        // The store's push for the first write lands before its response.
        let mut pushed = cell.current().unwrap();
        pushed.updated_at_ms += 1;
        assert!(cell.apply_push(pushed));

        let second = tokio::spawn({
            let (staff, cell) = (staff.clone(), cell.clone());
            async move { staff.send(&cell, reply("On it")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(gate);

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(store.update_calls.load(Ordering::SeqCst), 1);
        assert_eq!(stored_messages(&store).await, vec!["On it"]);
    }

    #[tokio::test]
    async fn failed_reply_is_not_carried_by_a_queued_one() {
        let store = Arc::new(MemoryRecords::default());
        let cell = seeded(&store).await;
        let staff = Arc::new(coordinator(&store, "staff-1", true));

        let gate = store.update_gate.lock().await;
        let first = tokio::spawn({
            let (staff, cell) = (staff.clone(), cell.clone());
            async move { staff.send(&cell, reply("A")).await }
        });
        wait_for_update_calls(&store, 1).await;
        store.fail_next_updates(1);
        let second = tokio::spawn({
            let (staff, cell) = (staff.clone(), cell.clone());
            async move { staff.send(&cell, reply("B")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let projected = cell.current().unwrap();
        assert_eq!(projected.replies.len(), 2);
        assert_eq!(store.update_calls.load(Ordering::SeqCst), 1);
        drop(gate);

        assert!(matches!(
            first.await.unwrap(),
            Err(DomainError::RemoteUnavailable(_))
        ));
        let second = second.await.unwrap().unwrap();
        assert_eq!(second.replies.len(), 1);
        assert_eq!(stored_messages(&store).await, vec!["B"]);

        staff.send(&cell, reply("A")).await.unwrap();
        assert_eq!(stored_messages(&store).await, vec!["B", "A"]);
    }

    #[tokio::test]
    async fn queued_reply_keeps_the_slow_one_before_it() {
        let store = Arc::new(MemoryRecords::default());
        let cell = seeded(&store).await;
        let staff = Arc::new(coordinator(&store, "staff-1", true));

        let gate = store.update_gate.lock().await;
        let first = tokio::spawn({
            let (staff, cell) = (staff.clone(), cell.clone());
            async move { staff.send(&cell, reply("A")).await }
        });
        wait_for_update_calls(&store, 1).await;
        let second = tokio::spawn({
            let (staff, cell) = (staff.clone(), cell.clone());
            async move { staff.send(&cell, reply("B")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(gate);

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();
        assert_eq!(first.replies.len(), 1);
        assert_eq!(second.replies.len(), 2);
        assert_eq!(stored_messages(&store).await, vec!["A", "B"]);
        assert_eq!(cell.current(), Some(second));
        assert_eq!(store.update_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stale_base_is_pulled_and_replanned() {
        let store = Arc::new(MemoryRecords::default());
        let cell = seeded(&store).await;
        let elsewhere = Arc::new(SubmissionCell::seeded(cell.current().unwrap()));
        let staff = coordinator(&store, "staff-1", true);
        let colleague = coordinator(&store, "staff-2", true);

        colleague.send(&elsewhere, reply("Checking now")).await.unwrap();
        let mine = staff.send(&cell, reply("Vendor booked")).await.unwrap();

        assert_eq!(mine.replies.len(), 2);
        assert_eq!(
            stored_messages(&store).await,
            vec!["Checking now", "Vendor booked"]
        );
        assert_eq!(store.update_calls.load(Ordering::SeqCst), 3);
        assert_eq!(cell.current(), Some(mine));
    }

    #[tokio::test]
    async fn local_violations_never_reach_the_store() {
        let store = Arc::new(MemoryRecords::default());
        let cell = seeded(&store).await;
        let owner = coordinator(&store, "owner-1", false);

        let turn = owner
            .send(&cell, MutationAction::Reply { message: "hello?".into() })
            .await;
        let status = owner
            .send(&cell, MutationAction::ChangeStatus(StatusChange::to(SubmissionStatus::Resolved)))
            .await;

        assert_eq!(turn, Err(DomainError::TurnViolation));
        assert!(matches!(status, Err(DomainError::Forbidden(_))));
        assert_eq!(store.update_calls.load(Ordering::SeqCst), 0);
        assert!(!cell.snapshot().provisional);
    }

    #[tokio::test]
    async fn stranger_cannot_reply_as_member() {
        let store = Arc::new(MemoryRecords::default());
        let cell = seeded(&store).await;
        let stranger = coordinator(&store, "someone-else", false);

        let result = stranger
            .send(&cell, MutationAction::Reply { message: "me too".into() })
            .await;

        assert!(matches!(result, Err(DomainError::Forbidden(_))));
    }

    #[tokio::test]
    async fn failed_update_surfaces_without_rollback() {
        let store = Arc::new(MemoryRecords::default());
        let cell = seeded(&store).await;
        store.fail_next_updates(1);
        let staff = coordinator(&store, "staff-1", true);

        let result = staff
            .send(&cell, MutationAction::ChangeStatus(StatusChange::to(SubmissionStatus::Rejected)))
            .await;

        assert!(matches!(result, Err(DomainError::RemoteUnavailable(_))));
        let snapshot = cell.snapshot();
        assert_eq!(snapshot.confirmed.unwrap().status, SubmissionStatus::Submitted);
        assert_eq!(snapshot.submission.unwrap().status, SubmissionStatus::Rejected);

        let retried = staff
            .send(&cell, MutationAction::ChangeStatus(StatusChange::to(SubmissionStatus::Rejected)))
            .await
            .unwrap();
        assert_eq!(retried.status, SubmissionStatus::Rejected);
        assert_eq!(store.update_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn owner_edit_is_refused_once_staff_pick_it_up() {
        let store = Arc::new(MemoryRecords::default());
        let cell = seeded(&store).await;
        let owner = coordinator(&store, "owner-1", false);
        let staff = coordinator(&store, "staff-1", true);
        let edit = ContentEdit {
            title: Some("Broken lift again".into()),
            description: Some("Still stuck".into()),
            suggestion: None,
            rating: 2,
            attachment_key: None,
        };

        let edited = owner
            .send(&cell, MutationAction::EditContent(edit.clone()))
            .await
            .unwrap();
        assert_eq!(edited.title.as_deref(), Some("Broken lift again"));

        staff
            .send(&cell, MutationAction::ChangeStatus(StatusChange::to(SubmissionStatus::UnderReview)))
            .await
            .unwrap();

        let refused = owner.send(&cell, MutationAction::EditContent(edit)).await;
        assert_eq!(refused, Err(DomainError::EditNotAllowed));
        assert_eq!(owner.delete(&cell).await, Err(DomainError::EditNotAllowed));
        assert_eq!(store.update_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn staff_delete_clears_the_cell() {
        let store = Arc::new(MemoryRecords::default());
        let cell = seeded(&store).await;
        let staff = coordinator(&store, "staff-1", true);

        staff.delete(&cell).await.unwrap();

        assert!(cell.current().is_none());
        assert!(store.all(RecordType::Feedback).await.is_empty());
    }

    #[test]
    fn equivalent_actions_share_a_digest() {
        let padded = MutationAction::Reply { message: "  thanks ".into() }.normalized();
        let trimmed = MutationAction::Reply { message: "thanks".into() }.normalized();
        assert_eq!(payload_digest(&padded).unwrap(), payload_digest(&trimmed).unwrap());
    }
}

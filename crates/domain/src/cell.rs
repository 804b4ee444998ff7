use tokio::sync::watch;

use crate::submission::Submission;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubmissionSnapshot {
    pub submission: Option<Submission>,
    pub confirmed: Option<Submission>,
    pub provisional: bool,
}

#[derive(Debug)]
pub struct SubmissionCell {
    id: String,
    sender: watch::Sender<SubmissionSnapshot>,
}

impl SubmissionCell {
    pub fn new(id: impl Into<String>) -> Self {
        let (sender, _) = watch::channel(SubmissionSnapshot::default());
        Self {
            id: id.into(),
            sender,
        }
    }

    pub fn seeded(submission: Submission) -> Self {
        let cell = Self::new(submission.id.clone());
        cell.confirm(submission);
        cell
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn subscribe(&self) -> watch::Receiver<SubmissionSnapshot> {
        self.sender.subscribe()
    }

    pub fn snapshot(&self) -> SubmissionSnapshot {
        self.sender.borrow().clone()
    }

    pub fn current(&self) -> Option<Submission> {
        self.sender.borrow().submission.clone()
    }

    pub fn confirmed(&self) -> Option<Submission> {
        self.sender.borrow().confirmed.clone()
    }

    pub fn project(&self, next: Submission) {
        self.sender.send_modify(|snapshot| {
            snapshot.submission = Some(next);
            snapshot.provisional = true;
        });
    }

    pub fn confirm(&self, server: Submission) {
        self.sender.send_modify(|snapshot| {
            let newer = snapshot
                .confirmed
                .clone()
                .filter(|held| held.updated_at_ms > server.updated_at_ms);
            let value = newer.unwrap_or(server);
            *snapshot = SubmissionSnapshot {
                submission: Some(value.clone()),
                confirmed: Some(value),
                provisional: false,
            };
        });
    }

    pub fn apply_push(&self, pushed: Submission) -> bool {
        self.sender.send_if_modified(|snapshot| {
            let next = SubmissionSnapshot {
                submission: Some(pushed.clone()),
                confirmed: Some(pushed),
                provisional: false,
            };
            if *snapshot == next {
                return false;
            }
            *snapshot = next;
            true
        })
    }

    pub fn apply_pull(&self, pulled: Option<Submission>) -> bool {
        self.sender.send_if_modified(|snapshot| {
            let held_version = snapshot.confirmed.as_ref().map(|held| held.updated_at_ms);
            match pulled {
                Some(pulled) => {
                    if held_version.is_some_and(|held| pulled.updated_at_ms < held) {
                        return false;
                    }
                    if snapshot.confirmed.as_ref() == Some(&pulled) && !snapshot.provisional {
                        return false;
                    }
                    *snapshot = SubmissionSnapshot {
                        submission: Some(pulled.clone()),
                        confirmed: Some(pulled),
                        provisional: false,
                    };
                    true
                }
                None => false,
            }
        })
    }

    pub fn clear(&self) -> bool {
        self.sender.send_if_modified(|snapshot| {
            if snapshot.submission.is_none() && snapshot.confirmed.is_none() {
                return false;
            }
            *snapshot = SubmissionSnapshot::default();
            true
        })
    }
}

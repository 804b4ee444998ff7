use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::error::DomainError;
use crate::submission::Submission;

const MAX_MESSAGE_LENGTH: usize = 2_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplyRole {
    General,
    Admin,
}

impl ReplyRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "GENERAL",
            Self::Admin => "ADMIN",
        }
    }
}

impl FromStr for ReplyRole {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "GENERAL" => Ok(Self::General),
            "ADMIN" => Ok(Self::Admin),
            other => Err(DomainError::SchemaDrift(format!(
                "unknown reply role token {other:?}"
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub from_role: ReplyRole,
    pub by_id: String,
    pub by_name: String,
    pub message: String,
    pub at_ms: i64,
}

impl Reply {
    pub fn new(
        from_role: ReplyRole,
        by_id: impl Into<String>,
        by_name: impl Into<String>,
        message: &str,
        at_ms: i64,
    ) -> DomainResult<Self> {
        let message = message.trim();
        validate_message(message)?;
        Ok(Self {
            from_role,
            by_id: by_id.into(),
            by_name: by_name.into(),
            message: message.to_string(),
            at_ms,
        })
    }
}

pub fn replies(submission: &Submission) -> &[Reply] {
    &submission.replies
}

pub fn replies_by_role(submission: &Submission, role: ReplyRole) -> Vec<&Reply> {
    submission
        .replies
        .iter()
        .filter(|reply| reply.from_role == role)
        .collect()
}

pub fn has_admin_reply(submission: &Submission) -> bool {
    submission
        .replies
        .iter()
        .any(|reply| reply.from_role == ReplyRole::Admin)
}

pub fn latest_reply(submission: &Submission, role: Option<ReplyRole>) -> Option<&Reply> {
    submission
        .replies
        .iter()
        .rev()
        .find(|reply| role.is_none_or(|role| reply.from_role == role))
}

pub fn ensure_turn(submission: &Submission, role: ReplyRole) -> DomainResult<()> {
    if role == ReplyRole::General && !has_admin_reply(submission) {
        return Err(DomainError::TurnViolation);
    }
    Ok(())
}

fn validate_message(message: &str) -> DomainResult<()> {
    if message.is_empty() {
        return Err(DomainError::EmptyMessage);
    }
    if message.chars().count() > MAX_MESSAGE_LENGTH {
        return Err(DomainError::Validation(format!(
            "reply exceeds max length of {MAX_MESSAGE_LENGTH}"
        )));
    }
    Ok(())
}

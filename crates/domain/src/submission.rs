use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::error::DomainError;
use crate::identity::ActorProfile;
use crate::reply::{self, Reply, ReplyRole};
use crate::util::normalize_optional;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;
const MAX_URGENCY: u8 = 5;
const MAX_TITLE_LENGTH: usize = 200;
const MAX_TEXT_LENGTH: usize = 5_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Submitted,
    UnderReview,
    InProgress,
    Resolved,
    Rejected,
    MoreInfoNeeded,
}

impl SubmissionStatus {
    pub const ALL: [Self; 6] = [
        Self::Submitted,
        Self::UnderReview,
        Self::InProgress,
        Self::Resolved,
        Self::Rejected,
        Self::MoreInfoNeeded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::UnderReview => "UNDER_REVIEW",
            Self::InProgress => "IN_PROGRESS",
            Self::Resolved => "RESOLVED",
            Self::Rejected => "REJECTED",
            Self::MoreInfoNeeded => "MORE_INFO_NEEDED",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Submitted => "Submitted",
            Self::UnderReview => "Under review",
            Self::InProgress => "In progress",
            Self::Resolved => "Resolved",
            Self::Rejected => "Rejected",
            Self::MoreInfoNeeded => "More info needed",
        }
    }
}

impl FromStr for SubmissionStatus {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == value)
            .ok_or_else(|| DomainError::SchemaDrift(format!("unknown status token {value:?}")))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceCategory {
    Facilities,
    ItSupport,
    Cafeteria,
    Transportation,
    HumanResources,
    Security,
    Other,
}

impl ServiceCategory {
    pub const ALL: [Self; 7] = [
        Self::Facilities,
        Self::ItSupport,
        Self::Cafeteria,
        Self::Transportation,
        Self::HumanResources,
        Self::Security,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Facilities => "FACILITIES",
            Self::ItSupport => "IT_SUPPORT",
            Self::Cafeteria => "CAFETERIA",
            Self::Transportation => "TRANSPORTATION",
            Self::HumanResources => "HUMAN_RESOURCES",
            Self::Security => "SECURITY",
            Self::Other => "OTHER",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Facilities => "Facilities",
            Self::ItSupport => "IT support",
            Self::Cafeteria => "Cafeteria",
            Self::Transportation => "Transportation",
            Self::HumanResources => "Human resources",
            Self::Security => "Security",
            Self::Other => "Other",
        }
    }
}

impl FromStr for ServiceCategory {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == value)
            .ok_or_else(|| DomainError::SchemaDrift(format!("unknown category token {value:?}")))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub fn new(value: u8) -> DomainResult<Self> {
        if !(MIN_RATING..=MAX_RATING).contains(&value) {
            return Err(DomainError::Validation(format!(
                "rating must be between {MIN_RATING} and {MAX_RATING}"
            )));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Rating {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Rating> for u8 {
    fn from(value: Rating) -> Self {
        value.0
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionContent {
    pub title: Option<String>,
    pub description: Option<String>,
    pub suggestion: Option<String>,
    pub attachment_key: Option<String>,
}

impl SubmissionContent {
    pub fn rating_only() -> Self {
        Self::default()
    }

    fn normalized(self) -> Self {
        Self {
            title: normalize_optional(self.title),
            description: normalize_optional(self.description),
            suggestion: normalize_optional(self.suggestion),
            attachment_key: normalize_optional(self.attachment_key),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Submission {
    pub id: String,
    pub owner_id: String,
    pub category: ServiceCategory,
    pub title: Option<String>,
    pub description: Option<String>,
    pub suggestion: Option<String>,
    pub attachment_key: Option<String>,
    pub rating: Rating,
    pub status: SubmissionStatus,
    pub urgency: Option<u8>,
    pub internal_notes: Option<String>,
    pub replies: Vec<Reply>,
    pub updated_by_id: Option<String>,
    pub updated_by_name: Option<String>,
    pub responded_at_ms: Option<i64>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Submission {
    pub fn is_full_feedback(&self) -> bool {
        self.title.is_some() || self.description.is_some() || self.suggestion.is_some()
    }

    pub fn is_editable(&self) -> bool {
        self.status == SubmissionStatus::Submitted
    }

    pub fn can_edit_or_delete(&self, actor_id: &str) -> bool {
        self.is_editable() && self.owner_id == actor_id
    }

    pub fn can_delete(&self, actor: &ActorProfile) -> bool {
        actor.is_staff || self.can_edit_or_delete(&actor.subject_id)
    }

    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(self.category.label())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: SubmissionStatus,
    pub urgency: Option<u8>,
    pub internal_notes: Option<String>,
}

impl StatusChange {
    pub fn to(status: SubmissionStatus) -> Self {
        Self {
            status,
            urgency: None,
            internal_notes: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentEdit {
    pub title: Option<String>,
    pub description: Option<String>,
    pub suggestion: Option<String>,
    pub rating: u8,
    pub attachment_key: Option<String>,
}

pub fn create(
    owner_id: &str,
    category: ServiceCategory,
    rating: u8,
    content: SubmissionContent,
    now_ms: i64,
) -> DomainResult<Submission> {
    let owner_id = owner_id.trim();
    if owner_id.is_empty() {
        return Err(DomainError::Validation("owner_id is required".into()));
    }
    let rating = Rating::new(rating)?;
    let content = content.normalized();
    validate_lengths(&content.title, &content.description, &content.suggestion)?;

    Ok(Submission {
        id: crate::util::uuid_v7_without_dashes(),
        owner_id: owner_id.to_string(),
        category,
        title: content.title,
        description: content.description,
        suggestion: content.suggestion,
        attachment_key: content.attachment_key,
        rating,
        status: SubmissionStatus::Submitted,
        urgency: None,
        internal_notes: None,
        replies: Vec::new(),
        updated_by_id: None,
        updated_by_name: None,
        responded_at_ms: None,
        created_at_ms: now_ms,
        updated_at_ms: now_ms,
    })
}

/// Any status may follow any other; only staff may move it.
pub fn apply_status_change(
    current: &Submission,
    change: &StatusChange,
    actor: &ActorProfile,
    now_ms: i64,
) -> DomainResult<Submission> {
    if !actor.is_staff {
        return Err(DomainError::Forbidden(
            "only staff may change submission status".into(),
        ));
    }
    validate_urgency(change.urgency)?;

    let mut next = current.clone();
    next.status = change.status;
    if let Some(urgency) = change.urgency {
        next.urgency = Some(urgency);
    }
    if let Some(notes) = change.internal_notes.as_ref() {
        next.internal_notes = normalize_optional(Some(notes.clone()));
    }
    stamp_staff(&mut next, &actor.subject_id, &actor.display_name, now_ms);
    Ok(next)
}

pub fn apply_content_edit(
    current: &Submission,
    edit: &ContentEdit,
    actor: &ActorProfile,
    now_ms: i64,
) -> DomainResult<Submission> {
    if !current.can_edit_or_delete(&actor.subject_id) {
        return Err(DomainError::EditNotAllowed);
    }
    let title = required_text("title", edit.title.as_deref())?;
    let description = required_text("description", edit.description.as_deref())?;
    let suggestion = normalize_optional(edit.suggestion.clone());
    let rating = Rating::new(edit.rating)?;
    validate_lengths(&Some(title.clone()), &Some(description.clone()), &suggestion)?;

    let mut next = current.clone();
    next.title = Some(title);
    next.description = Some(description);
    next.suggestion = suggestion;
    next.rating = rating;
    if let Some(key) = normalize_optional(edit.attachment_key.clone()) {
        next.attachment_key = Some(key);
    }
    next.updated_at_ms = now_ms;
    Ok(next)
}

pub fn append_reply(current: &Submission, reply: Reply, now_ms: i64) -> DomainResult<Submission> {
    let message = reply.message.trim().to_string();
    if message.is_empty() {
        return Err(DomainError::EmptyMessage);
    }
    reply::ensure_turn(current, reply.from_role)?;

    let mut next = current.clone();
    if reply.from_role == ReplyRole::Admin {
        stamp_staff(&mut next, &reply.by_id, &reply.by_name, now_ms);
    } else {
        next.updated_at_ms = now_ms;
    }
    next.replies.push(Reply { message, ..reply });
    Ok(next)
}

fn stamp_staff(next: &mut Submission, by_id: &str, by_name: &str, now_ms: i64) {
    next.updated_by_id = Some(by_id.to_string());
    next.updated_by_name = Some(by_name.to_string());
    next.responded_at_ms.get_or_insert(now_ms);
    next.updated_at_ms = now_ms;
}

fn required_text(field: &str, value: Option<&str>) -> DomainResult<String> {
    let value = value.map(str::trim).unwrap_or_default();
    if value.is_empty() {
        return Err(DomainError::Validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

fn validate_urgency(urgency: Option<u8>) -> DomainResult<()> {
    match urgency {
        Some(value) if !(1..=MAX_URGENCY).contains(&value) => Err(DomainError::Validation(
            format!("urgency must be between 1 and {MAX_URGENCY}"),
        )),
        _ => Ok(()),
    }
}

fn validate_lengths(
    title: &Option<String>,
    description: &Option<String>,
    suggestion: &Option<String>,
) -> DomainResult<()> {
    if title
        .as_ref()
        .is_some_and(|title| title.chars().count() > MAX_TITLE_LENGTH)
    {
        return Err(DomainError::Validation(format!(
            "title exceeds max length of {MAX_TITLE_LENGTH}"
        )));
    }
    for (field, value) in [("description", description), ("suggestion", suggestion)] {
        if value
            .as_ref()
            .is_some_and(|value| value.chars().count() > MAX_TEXT_LENGTH)
        {
            return Err(DomainError::Validation(format!(
                "{field} exceeds max length of {MAX_TEXT_LENGTH}"
            )));
        }
    }
    Ok(())
}

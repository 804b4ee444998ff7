use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorProfile {
    pub subject_id: String,
    pub display_name: String,
    pub is_staff: bool,
}

impl ActorProfile {
    pub fn member(subject_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            display_name: display_name.into(),
            is_staff: false,
        }
    }

    pub fn staff(subject_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            display_name: display_name.into(),
            is_staff: true,
        }
    }
}

use std::sync::Arc;

use tracing::info;

use crate::DomainResult;
use crate::error::DomainError;
use crate::ports::object_store::ObjectStore;
use crate::util::uuid_v7_without_dashes;

pub const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;
const MAX_FILE_NAME_CHARS: usize = 100;
const KEY_PREFIX: &str = "feedback";

#[derive(Clone)]
pub struct AttachmentService {
    store: Arc<dyn ObjectStore>,
}

impl AttachmentService {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub async fn upload(&self, owner_id: &str, file_name: &str, bytes: Vec<u8>) -> DomainResult<String> {
        let owner_id = owner_id.trim();
        if owner_id.is_empty() {
            return Err(DomainError::Validation("owner_id is required".into()));
        }
        if bytes.is_empty() {
            return Err(DomainError::Validation("attachment is empty".into()));
        }
        if bytes.len() > MAX_ATTACHMENT_BYTES {
            return Err(DomainError::Validation(format!(
                "attachment exceeds {MAX_ATTACHMENT_BYTES} bytes"
            )));
        }

        let size = bytes.len();
        let path = attachment_path(owner_id, file_name);
        let key = self.store.upload(&path, bytes).await?;
        info!(owner_id = %owner_id, attachment_key = %key, size, "attachment stored");
        Ok(key)
    }

    pub async fn download(&self, attachment_key: &str) -> DomainResult<Option<Vec<u8>>> {
        let attachment_key = attachment_key.trim();
        if !attachment_key.starts_with(KEY_PREFIX) {
            return Err(DomainError::Validation("unknown attachment key".into()));
        }
        self.store.download(attachment_key).await
    }
}

pub fn attachment_path(owner_id: &str, file_name: &str) -> String {
    format!(
        "{KEY_PREFIX}/{}/{}-{}",
        sanitize_segment(owner_id),
        uuid_v7_without_dashes(),
        sanitize_file_name(file_name)
    )
}

fn sanitize_segment(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

fn sanitize_file_name(file_name: &str) -> String {
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let cleaned: String = base
        .chars()
        .filter(|ch| !ch.is_control())
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_') {
                ch
            } else {
                '_'
            }
        })
        .take(MAX_FILE_NAME_CHARS)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "attachment".to_string()
    } else {
        cleaned.to_string()
    }
}

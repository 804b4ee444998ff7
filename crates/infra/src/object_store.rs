use std::collections::HashMap;

use tanggap_domain::DomainResult;
use tanggap_domain::error::DomainError;
use tanggap_domain::ports::BoxFuture;
use tanggap_domain::ports::object_store::ObjectStore;
use tokio::sync::RwLock;
use tracing::debug;

/// Keeps uploaded objects in process memory, keyed by their path.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn upload(&self, path: &str, bytes: Vec<u8>) -> BoxFuture<'_, DomainResult<String>> {
        let path = path.to_string();
        Box::pin(async move {
            let mut objects = self.objects.write().await;
            if objects.contains_key(&path) {
                return Err(DomainError::Conflict);
            }
            debug!(path = %path, size = bytes.len(), "object stored");
            objects.insert(path.clone(), bytes);
            Ok(path)
        })
    }

    fn download(&self, stored_path: &str) -> BoxFuture<'_, DomainResult<Option<Vec<u8>>>> {
        let stored_path = stored_path.to_string();
        Box::pin(async move { Ok(self.objects.read().await.get(&stored_path).cloned()) })
    }
}

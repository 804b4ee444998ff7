use crate::DomainResult;
use crate::ports::BoxFuture;

pub trait ObjectStore: Send + Sync {
    fn upload(&self, path: &str, bytes: Vec<u8>) -> BoxFuture<'_, DomainResult<String>>;

    fn download(&self, stored_path: &str) -> BoxFuture<'_, DomainResult<Option<Vec<u8>>>>;
}

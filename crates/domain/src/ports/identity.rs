use std::collections::HashSet;

use crate::DomainResult;

pub trait IdentityProvider: Send + Sync {
    fn current_subject_id(&self) -> DomainResult<String>;

    fn current_group_claims(&self) -> DomainResult<HashSet<String>>;
}

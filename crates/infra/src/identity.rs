use std::collections::HashSet;
use std::sync::{PoisonError, RwLock};

use tanggap_domain::DomainResult;
use tanggap_domain::error::DomainError;
use tanggap_domain::ports::identity::IdentityProvider;

#[derive(Clone, Debug, Default)]
struct Session {
    subject_id: Option<String>,
    groups: HashSet<String>,
}

/// Identity taken from configuration. `sign_in` and `sign_out` switch it at
/// runtime, which the engine observes once its profile cache is cleared.
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    session: RwLock<Session>,
}

impl StaticIdentityProvider {
    pub fn new(subject_id: impl Into<String>, groups: HashSet<String>) -> Self {
        let provider = Self::default();
        provider.sign_in(subject_id, groups);
        provider
    }

    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn sign_in(&self, subject_id: impl Into<String>, groups: HashSet<String>) {
        let mut session = self.session.write().unwrap_or_else(PoisonError::into_inner);
        session.subject_id = Some(subject_id.into());
        session.groups = groups;
    }

    pub fn sign_out(&self) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = Session::default();
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn current_subject_id(&self) -> DomainResult<String> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .subject_id
            .clone()
            .filter(|subject_id| !subject_id.trim().is_empty())
            .ok_or_else(|| DomainError::Forbidden("no signed-in subject".into()))
    }

    fn current_group_claims(&self) -> DomainResult<HashSet<String>> {
        let session = self.session.read().unwrap_or_else(PoisonError::into_inner);
        if session.subject_id.is_none() {
            return Err(DomainError::Forbidden("no signed-in subject".into()));
        }
        Ok(session.groups.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_out_provider_is_forbidden() {
        let provider = StaticIdentityProvider::signed_out();
        assert!(matches!(
            provider.current_subject_id(),
            Err(DomainError::Forbidden(_))
        ));
        assert!(provider.current_group_claims().is_err());
    }

    #[test]
    fn sign_in_switches_subject_and_claims() {
        let provider = StaticIdentityProvider::new("member-1", HashSet::new());
        provider.sign_in("staff-1", HashSet::from(["Admin".to_string()]));

        assert_eq!(provider.current_subject_id().unwrap(), "staff-1");
        assert!(provider.current_group_claims().unwrap().contains("Admin"));

        provider.sign_out();
        assert!(provider.current_subject_id().is_err());
    }
}

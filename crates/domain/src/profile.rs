use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::DomainResult;
use crate::gateway::RecordStoreGateway;
use crate::identity::ActorProfile;
use crate::ports::identity::IdentityProvider;

struct ProfileCacheInner {
    identity: Arc<dyn IdentityProvider>,
    gateway: RecordStoreGateway,
    staff_group: String,
    cached: RwLock<Option<ActorProfile>>,
}

#[derive(Clone)]
pub struct ProfileCache {
    inner: Arc<ProfileCacheInner>,
}

impl ProfileCache {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        gateway: RecordStoreGateway,
        staff_group: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(ProfileCacheInner {
                identity,
                gateway,
                staff_group: staff_group.into(),
                cached: RwLock::new(None),
            }),
        }
    }

    pub async fn current(&self) -> DomainResult<ActorProfile> {
        if let Some(profile) = self.inner.cached.read().await.as_ref() {
            return Ok(profile.clone());
        }

        let subject_id = self.inner.identity.current_subject_id()?;
        let is_staff = self
            .inner
            .identity
            .current_group_claims()?
            .iter()
            .any(|group| group.eq_ignore_ascii_case(&self.inner.staff_group));

        let display_name = match self.inner.gateway.get_user_profile(&subject_id).await {
            Ok(Some(profile)) if !profile.display_name.trim().is_empty() => {
                profile.display_name.trim().to_string()
            }
            Ok(_) => subject_id.clone(),
            Err(err) => {
                // Not cached, so the next call tries the lookup again.
                warn!(subject_id = %subject_id, error = %err, "user profile lookup failed");
                return Ok(ActorProfile {
                    display_name: subject_id.clone(),
                    subject_id,
                    is_staff,
                });
            }
        };

        let profile = ActorProfile {
            subject_id,
            display_name,
            is_staff,
        };
        debug!(subject_id = %profile.subject_id, is_staff, "actor profile resolved");
        *self.inner.cached.write().await = Some(profile.clone());
        Ok(profile)
    }

    pub async fn clear(&self) {
        self.inner.cached.write().await.take();
    }
}

use super::{CloudCredentials, CredentialFederator, CredentialResult};
use crate::model::Provider;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Serves credentials from memory until they are about to expire.
///
/// A failed refresh evicts the entry and returns the error, so stale
/// credentials are never handed out.
pub struct CachingFederator {
    inner: Arc<dyn CredentialFederator>,
    entries: RwLock<HashMap<(Provider, String), CloudCredentials>>,
}

impl CachingFederator {
    pub fn new(inner: Arc<dyn CredentialFederator>) -> Self {
        Self {
            inner,
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn cached(&self, key: &(Provider, String)) -> Option<CloudCredentials> {
        self.entries
            .read()
            .await
            .get(key)
            .filter(|creds| !creds.is_expired())
            .cloned()
    }
}

#[async_trait]
impl CredentialFederator for CachingFederator {
    fn provider(&self) -> Provider {
        self.inner.provider()
    }

    async fn credentials_for(&self, account_id: &str) -> CredentialResult<CloudCredentials> {
        let key = (self.inner.provider(), account_id.to_string());

        if let Some(creds) = self.cached(&key).await {
            debug!(account_id = %account_id, "Using cached credentials");
            return Ok(creds);
        }

        match self.inner.credentials_for(account_id).await {
            Ok(creds) => {
                self.entries.write().await.insert(key, creds.clone());
                Ok(creds)
            }
            Err(err) => {
                self.entries.write().await.remove(&key);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialError, GcpAccessToken, MockFederator};
    use chrono::{Duration, Utc};

    fn gcp_token(expires_in: Duration) -> CloudCredentials {
        CloudCredentials::Gcp(GcpAccessToken {
            token: "ya29.token".to_string(),
            expires_at: Utc::now() + expires_in,
        })
    }

    #[tokio::test]
    async fn test_reuses_valid_credentials() {
        let inner = Arc::new(MockFederator::gcp());
        let cache = CachingFederator::new(inner.clone());

        cache.credentials_for("project-a").await.unwrap();
        cache.credentials_for("project-a").await.unwrap();
        assert_eq!(inner.calls(), 1);

        cache.credentials_for("project-b").await.unwrap();
        assert_eq!(inner.calls(), 2);
        assert_eq!(cache.provider(), Provider::Gcp);
    }

    #[tokio::test]
    async fn test_refreshes_expired_credentials() {
        let inner = Arc::new(MockFederator::returning(
            Provider::Gcp,
            Ok(gcp_token(Duration::seconds(10))),
        ));
        let cache = CachingFederator::new(inner.clone());

        cache.credentials_for("project-a").await.unwrap();
        cache.credentials_for("project-a").await.unwrap();
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_evicts_entry() {
        let inner = Arc::new(MockFederator::returning(
            Provider::Gcp,
            Ok(gcp_token(Duration::seconds(10))),
        ));
        let cache = CachingFederator::new(inner.clone());
        cache.credentials_for("project-a").await.unwrap();

        inner.set_result(Err(CredentialError::Http("timed out".to_string())));
        let result = cache.credentials_for("project-a").await;
        assert!(matches!(result, Err(CredentialError::Http(_))));

        let key = (Provider::Gcp, "project-a".to_string());
        assert!(cache.entries.read().await.get(&key).is_none());
    }
}

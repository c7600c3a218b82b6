//! Credential federation into client cloud accounts.
//!
//! Every stage needs short-lived credentials scoped to the client's account
//! before it can call any plugin. Credentials are obtained fresh per job (or
//! served from [`CachingFederator`] while still valid) and never persisted.

pub mod aws;
pub mod cache;
pub mod gcp;
pub mod sigv4;

pub use aws::{AwsRoleFederator, StsClient};
pub use cache::CachingFederator;
pub use gcp::GcpFederator;

use crate::model::Provider;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::fmt;

/// Credentials are treated as expired this long before their actual expiry
pub const REFRESH_SKEW_SECS: i64 = 60;

/// Errors raised while obtaining credentials
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Required configuration or ambient identity is missing
    Configuration(String),

    /// Transport failure or timeout talking to an identity service
    Http(String),

    /// An identity service answered with a non-success status
    Rejected {
        service: String,
        status: u16,
        body: String,
    },

    /// An identity service answered with something we could not read
    Parse(String),

    /// No federator is configured for the provider
    UnsupportedProvider(Provider),
}

impl fmt::Display for CredentialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialError::Configuration(msg) => {
                write!(f, "Credential configuration error: {}", msg)
            }
            CredentialError::Http(msg) => write!(f, "Identity service request failed: {}", msg),
            CredentialError::Rejected {
                service,
                status,
                body,
            } => write!(f, "{} rejected the request ({}): {}", service, status, body),
            CredentialError::Parse(msg) => {
                write!(f, "Failed to parse identity service response: {}", msg)
            }
            CredentialError::UnsupportedProvider(provider) => {
                write!(f, "No credential federator configured for {}", provider)
            }
        }
    }
}

impl std::error::Error for CredentialError {}

impl From<reqwest::Error> for CredentialError {
    fn from(err: reqwest::Error) -> Self {
        CredentialError::Http(err.to_string())
    }
}

pub type CredentialResult<T> = Result<T, CredentialError>;

/// AWS access keys, long-lived (ambient) or temporary (assumed role)
#[derive(Clone, PartialEq, Eq)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AwsCredentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
            expires_at: None,
        }
    }

    /// Read the processing identity from the standard AWS environment variables
    pub fn from_env() -> CredentialResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> CredentialResult<Self> {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let access_key_id = non_empty("AWS_ACCESS_KEY_ID").ok_or_else(|| {
            CredentialError::Configuration("AWS_ACCESS_KEY_ID is not set".to_string())
        })?;
        let secret_access_key = non_empty("AWS_SECRET_ACCESS_KEY").ok_or_else(|| {
            CredentialError::Configuration("AWS_SECRET_ACCESS_KEY is not set".to_string())
        })?;

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token: non_empty("AWS_SESSION_TOKEN"),
            expires_at: None,
        })
    }
}

impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// OAuth access token for an impersonated GCP service account
#[derive(Clone, PartialEq, Eq)]
pub struct GcpAccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for GcpAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GcpAccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Short-lived credentials scoped to one client account
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudCredentials {
    Aws(AwsCredentials),
    Gcp(GcpAccessToken),
}

impl CloudCredentials {
    pub fn provider(&self) -> Provider {
        match self {
            CloudCredentials::Aws(_) => Provider::Aws,
            CloudCredentials::Gcp(_) => Provider::Gcp,
        }
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            CloudCredentials::Aws(creds) => creds.expires_at,
            CloudCredentials::Gcp(token) => Some(token.expires_at),
        }
    }

    /// True once the credentials are within [`REFRESH_SKEW_SECS`] of expiry
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expires_at) => now + Duration::seconds(REFRESH_SKEW_SECS) >= expires_at,
            None => false,
        }
    }

    pub fn as_aws(&self) -> Option<&AwsCredentials> {
        match self {
            CloudCredentials::Aws(creds) => Some(creds),
            _ => None,
        }
    }

    pub fn as_gcp(&self) -> Option<&GcpAccessToken> {
        match self {
            CloudCredentials::Gcp(token) => Some(token),
            _ => None,
        }
    }
}

/// Turns the processing identity into credentials for a client account
#[async_trait]
pub trait CredentialFederator: Send + Sync {
    /// Provider whose accounts this federator can reach
    fn provider(&self) -> Provider;

    /// Obtain credentials for the account (AWS) or project (GCP)
    async fn credentials_for(&self, account_id: &str) -> CredentialResult<CloudCredentials>;
}

/// Federator handing out a fixed result and counting calls
#[cfg(test)]
pub struct MockFederator {
    provider: Provider,
    result: std::sync::Mutex<CredentialResult<CloudCredentials>>,
    calls: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockFederator {
    pub fn aws() -> Self {
        Self::returning(
            Provider::Aws,
            Ok(CloudCredentials::Aws(AwsCredentials::new("AKIDEXAMPLE", "secret"))),
        )
    }

    pub fn gcp() -> Self {
        Self::returning(
            Provider::Gcp,
            Ok(CloudCredentials::Gcp(GcpAccessToken {
                token: "ya29.token".to_string(),
                expires_at: Utc::now() + Duration::hours(1),
            })),
        )
    }

    pub fn failing(provider: Provider) -> Self {
        Self::returning(provider, Err(CredentialError::Http("connection refused".to_string())))
    }

    pub fn returning(provider: Provider, result: CredentialResult<CloudCredentials>) -> Self {
        Self {
            provider,
            result: std::sync::Mutex::new(result),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Change what subsequent calls return
    pub fn set_result(&self, result: CredentialResult<CloudCredentials>) {
        *self.result.lock().unwrap() = result;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
#[async_trait]
impl CredentialFederator for MockFederator {
    fn provider(&self) -> Provider {
        self.provider
    }

    async fn credentials_for(&self, _account_id: &str) -> CredentialResult<CloudCredentials> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.result.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_from_lookup_reads_keys() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("AWS_ACCESS_KEY_ID", "AKID"),
            ("AWS_SECRET_ACCESS_KEY", "secret"),
            ("AWS_SESSION_TOKEN", ""),
        ]);

        let creds = AwsCredentials::from_lookup(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(creds.access_key_id, "AKID");
        assert_eq!(creds.session_token, None);
    }

    #[test]
    fn test_from_lookup_requires_secret() {
        let result = AwsCredentials::from_lookup(|k| {
            (k == "AWS_ACCESS_KEY_ID").then(|| "AKID".to_string())
        });
        assert!(matches!(result, Err(CredentialError::Configuration(_))));
    }

    #[test]
    fn test_expiry_uses_refresh_skew() {
        let now = Utc::now();
        let token = |expires_at| {
            CloudCredentials::Gcp(GcpAccessToken {
                token: "t".to_string(),
                expires_at,
            })
        };

        assert!(!token(now + Duration::minutes(10)).is_expired_at(now));
        assert!(token(now + Duration::seconds(30)).is_expired_at(now));
        assert!(token(now - Duration::seconds(1)).is_expired_at(now));
    }

    #[test]
    fn test_ambient_keys_never_expire() {
        let creds = CloudCredentials::Aws(AwsCredentials::new("AKID", "secret"));
        assert!(!creds.is_expired());
        assert_eq!(creds.provider(), Provider::Aws);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut creds = AwsCredentials::new("AKID", "super-secret");
        creds.session_token = Some("session".to_string());

        let printed = format!("{:?}", creds);
        assert!(printed.contains("AKID"));
        assert!(!printed.contains("super-secret"));
        assert!(!printed.contains("session\""));
    }
}

//! Resource plugins: one per cloud resource type.
//!
//! A plugin knows how to enumerate resources of its type in a client account
//! (`discover`) and how to fetch the configuration of a given set of them
//! (`retrieve_config`). Plugins never write to the client account.

pub mod gcs;
pub mod registry;
pub mod s3;

pub use gcs::GcsPlugin;
pub use registry::PluginRegistry;
pub use s3::S3Plugin;

use crate::credentials::CloudCredentials;
use crate::model::{ConfigDocument, Provider};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

/// Errors raised by resource plugins
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginError {
    /// The plugin was handed credentials for another provider
    WrongCredentials {
        plugin: String,
        expected: Provider,
    },

    /// Transport failure or timeout
    Http(String),

    /// The cloud API answered with a non-success status
    Api {
        operation: String,
        status: u16,
        body: String,
    },

    /// The cloud API answered with something we could not read
    Parse(String),
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginError::WrongCredentials { plugin, expected } => {
                write!(f, "Plugin '{}' requires {} credentials", plugin, expected)
            }
            PluginError::Http(msg) => write!(f, "Cloud API request failed: {}", msg),
            PluginError::Api {
                operation,
                status,
                body,
            } => write!(f, "{} failed ({}): {}", operation, status, body),
            PluginError::Parse(msg) => write!(f, "Failed to parse cloud API response: {}", msg),
        }
    }
}

impl std::error::Error for PluginError {}

impl From<reqwest::Error> for PluginError {
    fn from(err: reqwest::Error) -> Self {
        PluginError::Http(err.to_string())
    }
}

pub type PluginResult<T> = Result<T, PluginError>;

/// Contract every resource type implements
#[async_trait]
pub trait ResourcePlugin: Send + Sync {
    /// Resource type name, e.g. `s3`; keys job resources, configs and policies
    fn name(&self) -> &str;

    fn provider(&self) -> Provider;

    /// List identifiers of every resource of this type in the account
    async fn discover(&self, creds: &CloudCredentials, account_id: &str) -> PluginResult<Vec<String>>;

    /// Fetch configurations for `ids`. Identifiers whose configuration cannot
    /// be fetched are left out of the result rather than failing the call.
    async fn retrieve_config(
        &self,
        creds: &CloudCredentials,
        account_id: &str,
        ids: &[String],
    ) -> PluginResult<BTreeMap<String, ConfigDocument>>;
}

/// Scriptable plugin for pipeline tests
#[cfg(test)]
pub struct MockPlugin {
    name: String,
    provider: Provider,
    discovered: PluginResult<Vec<String>>,
    configs: PluginResult<BTreeMap<String, ConfigDocument>>,
    failures_before_success: std::sync::atomic::AtomicUsize,
    discover_calls: std::sync::atomic::AtomicUsize,
    retrieve_calls: std::sync::Mutex<Vec<Vec<String>>>,
}

#[cfg(test)]
impl MockPlugin {
    pub fn new(name: &str, provider: Provider) -> Self {
        Self {
            name: name.to_string(),
            provider,
            discovered: Ok(Vec::new()),
            configs: Ok(BTreeMap::new()),
            failures_before_success: std::sync::atomic::AtomicUsize::new(0),
            discover_calls: std::sync::atomic::AtomicUsize::new(0),
            retrieve_calls: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn discovering(mut self, ids: &[&str]) -> Self {
        self.discovered = Ok(ids.iter().map(|id| id.to_string()).collect());
        self
    }

    pub fn failing_discovery(mut self) -> Self {
        self.discovered = Err(PluginError::Api {
            operation: "List".to_string(),
            status: 403,
            body: "AccessDenied".to_string(),
        });
        self
    }

    pub fn with_config(mut self, id: &str, config: serde_json::Value) -> Self {
        if let (Ok(configs), serde_json::Value::Object(doc)) = (&mut self.configs, config) {
            configs.insert(id.to_string(), doc);
        }
        self
    }

    pub fn failing_retrieval(mut self) -> Self {
        self.configs = Err(PluginError::Http("connection reset".to_string()));
        self
    }

    /// Fail the first `n` calls of either operation with a transport error
    pub fn flaky(self, n: usize) -> Self {
        self.failures_before_success
            .store(n, std::sync::atomic::Ordering::SeqCst);
        self
    }

    pub fn discover_calls(&self) -> usize {
        self.discover_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Identifier lists passed to each retrieve_config call
    pub fn retrieve_calls(&self) -> Vec<Vec<String>> {
        self.retrieve_calls.lock().unwrap().clone()
    }

    fn take_failure(&self) -> bool {
        use std::sync::atomic::Ordering;
        self.failures_before_success
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[cfg(test)]
#[async_trait]
impl ResourcePlugin for MockPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn provider(&self) -> Provider {
        self.provider
    }

    async fn discover(&self, _creds: &CloudCredentials, _account_id: &str) -> PluginResult<Vec<String>> {
        self.discover_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.take_failure() {
            return Err(PluginError::Http("flaky".to_string()));
        }
        self.discovered.clone()
    }

    async fn retrieve_config(
        &self,
        _creds: &CloudCredentials,
        _account_id: &str,
        ids: &[String],
    ) -> PluginResult<BTreeMap<String, ConfigDocument>> {
        self.retrieve_calls.lock().unwrap().push(ids.to_vec());
        if self.take_failure() {
            return Err(PluginError::Http("flaky".to_string()));
        }
        self.configs.clone()
    }
}

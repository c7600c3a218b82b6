use crate::credentials::CredentialFederator;
use crate::model::Provider;
use crate::notify::{LogNotifier, Notifier};
use crate::pipeline::{RetryPolicy, StageError};
use crate::plugins::PluginRegistry;
use crate::policy::{PolicyEngine, RegorusEngine};
use crate::store::{ConfigStore, JobStore, PolicyStore, ScanStore};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default bound on each credential or store call
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything a stage needs, constructed once per process and passed to
/// each stage invocation.
pub struct StageContext {
    pub jobs: Arc<dyn JobStore>,
    pub configs: Arc<dyn ConfigStore>,
    pub scans: Arc<dyn ScanStore>,
    pub policies: Arc<dyn PolicyStore>,
    pub engine: Arc<dyn PolicyEngine>,
    pub notifier: Arc<dyn Notifier>,
    pub plugins: Arc<PluginRegistry>,
    pub federators: HashMap<Provider, Arc<dyn CredentialFederator>>,
    pub operation_timeout: Duration,
    pub retry: RetryPolicy,
}

impl StageContext {
    /// Create a context backed by one store implementing every store trait,
    /// with the Rego engine, log-only notifications and no plugins.
    pub fn new<S>(store: Arc<S>) -> Self
    where
        S: JobStore + ConfigStore + ScanStore + PolicyStore + 'static,
    {
        Self {
            jobs: store.clone(),
            configs: store.clone(),
            scans: store.clone(),
            policies: store,
            engine: Arc::new(RegorusEngine::new()),
            notifier: Arc::new(LogNotifier),
            plugins: Arc::new(PluginRegistry::new()),
            federators: HashMap::new(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_plugins(mut self, plugins: PluginRegistry) -> Self {
        self.plugins = Arc::new(plugins);
        self
    }

    /// Register the federator for its provider, replacing any previous one
    pub fn with_federator(mut self, federator: Arc<dyn CredentialFederator>) -> Self {
        self.federators.insert(federator.provider(), federator);
        self
    }

    pub fn with_engine(mut self, engine: Arc<dyn PolicyEngine>) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn federator(&self, provider: Provider) -> Result<Arc<dyn CredentialFederator>, StageError> {
        self.federators
            .get(&provider)
            .cloned()
            .ok_or(StageError::UnsupportedProvider(provider))
    }

    /// Run a credential or store call within the operation timeout
    pub async fn bounded<T, E, F>(&self, operation: &str, call: F) -> Result<T, StageError>
    where
        F: Future<Output = Result<T, E>>,
        StageError: From<E>,
    {
        match tokio::time::timeout(self.operation_timeout, call).await {
            Ok(result) => result.map_err(StageError::from),
            Err(_) => Err(StageError::Timeout {
                operation: operation.to_string(),
                after: self.operation_timeout,
            }),
        }
    }
}

impl Clone for StageContext {
    fn clone(&self) -> Self {
        Self {
            jobs: Arc::clone(&self.jobs),
            configs: Arc::clone(&self.configs),
            scans: Arc::clone(&self.scans),
            policies: Arc::clone(&self.policies),
            engine: Arc::clone(&self.engine),
            notifier: Arc::clone(&self.notifier),
            plugins: Arc::clone(&self.plugins),
            federators: self.federators.clone(),
            operation_timeout: self.operation_timeout,
            retry: self.retry.clone(),
        }
    }
}

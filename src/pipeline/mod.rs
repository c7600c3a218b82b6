//! Stage orchestrators: discovery → retrieval → scan.
//!
//! Each stage is a stateless pass over one job. Stages hand off through an
//! explicit [`JobMessage`](crate::model::JobMessage), never through shared
//! state, and every fatal error surfaces as a [`StageError`] to the caller,
//! which owns redelivery.

pub mod discovery;
pub mod retrieval;
pub mod scan;

pub use discovery::{handle_trigger, run_discovery};
pub use retrieval::{handle_retrieval_batch, run_retrieval, RetrievalSummary};
pub use scan::{handle_scan_batch, run_scan, ScanSummary};

use crate::credentials::CredentialError;
use crate::model::{JobId, JobStatus, Provider};
use crate::plugins::{PluginError, PluginResult};
use crate::queue::QueueError;
use crate::store::StoreError;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Fatal stage failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// Credentials for the client account could not be obtained
    Credentials(CredentialError),

    /// A plugin failed to enumerate resources; the job is marked `error`
    Discovery {
        job_id: JobId,
        resource_type: String,
        source: PluginError,
    },

    /// A store call failed
    Persistence(StoreError),

    JobNotFound(JobId),

    /// The job exists but discovery did not complete it
    JobNotReady { job_id: JobId, status: JobStatus },

    /// The next stage could not be notified
    Queue(QueueError),

    /// A credential or store call exceeded the operation timeout
    Timeout { operation: String, after: Duration },

    /// A message body could not be decoded
    InvalidMessage(String),

    /// No credential federator is configured for the provider
    UnsupportedProvider(Provider),
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageError::Credentials(err) => write!(f, "{}", err),
            StageError::Discovery {
                job_id,
                resource_type,
                source,
            } => write!(
                f,
                "Discovery of '{}' failed for job {}: {}",
                resource_type, job_id, source
            ),
            StageError::Persistence(err) => write!(f, "{}", err),
            StageError::JobNotFound(id) => write!(f, "Job {} not found", id),
            StageError::JobNotReady { job_id, status } => {
                write!(f, "Job {} is {}, not completed", job_id, status)
            }
            StageError::Queue(err) => write!(f, "{}", err),
            StageError::Timeout { operation, after } => {
                write!(f, "{} timed out after {:?}", operation, after)
            }
            StageError::InvalidMessage(msg) => write!(f, "Invalid message: {}", msg),
            StageError::UnsupportedProvider(provider) => {
                write!(f, "Provider {} is not configured", provider)
            }
        }
    }
}

impl std::error::Error for StageError {}

impl From<CredentialError> for StageError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::UnsupportedProvider(provider) => StageError::UnsupportedProvider(provider),
            other => StageError::Credentials(other),
        }
    }
}

impl From<StoreError> for StageError {
    fn from(err: StoreError) -> Self {
        StageError::Persistence(err)
    }
}

impl From<QueueError> for StageError {
    fn from(err: QueueError) -> Self {
        StageError::Queue(err)
    }
}

/// Bounded retry applied to plugin calls only
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts; 1 means no retry
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }
}

/// Call a plugin operation, retrying failures up to the policy's attempt count
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, operation: &str, mut call: F) -> PluginResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = PluginResult<T>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < policy.attempts => {
                warn!(operation = %operation, attempt, error = %err, "Plugin call failed, retrying");
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Outcome of a batch of queued messages
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Messages processed and handed on
    pub processed: usize,
    /// Undecodable messages that were dropped
    pub skipped: usize,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::StageContext;
    use crate::credentials::MockFederator;
    use crate::model::{JobMessage, ScanTrigger};
    use crate::notify::RecordingNotifier;
    use crate::plugins::{MockPlugin, PluginRegistry};
    use crate::queue::MemoryQueue;
    use crate::store::{ConfigStore, JobStore, MemoryStore, PolicyStore, ScanStore};
    use crate::model::RegoPolicy;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub const S3_POLICY: &str = r#"
        package s3

        deny["public-read"] = true {
            input.bucket_policy == ""
        }
    "#;

    pub fn trigger(provider: Provider) -> ScanTrigger {
        ScanTrigger {
            client_id: "client-1".to_string(),
            account_id: match provider {
                Provider::Aws => "123456789012".to_string(),
                Provider::Gcp => "client-project".to_string(),
            },
            client_email: "owner@example.com".to_string(),
            provider,
        }
    }

    /// Context over a memory store with the given plugins and mock federators
    pub fn context(store: &Arc<MemoryStore>, plugins: Vec<Arc<MockPlugin>>) -> (StageContext, Arc<RecordingNotifier>) {
        let mut registry = PluginRegistry::new();
        for plugin in plugins {
            registry.register(plugin);
        }
        let notifier = Arc::new(RecordingNotifier::new());

        let ctx = StageContext::new(store.clone())
            .with_plugins(registry)
            .with_federator(Arc::new(MockFederator::aws()))
            .with_federator(Arc::new(MockFederator::gcp()))
            .with_notifier(notifier.clone())
            .with_retry(RetryPolicy::new(1, Duration::ZERO));
        (ctx, notifier)
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_attempts() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);

        let result: PluginResult<()> = with_retry(&policy, "discover", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(PluginError::Http("down".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_returns_first_success() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(3, Duration::ZERO);

        let result = with_retry(&policy, "discover", || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(PluginError::Http("blip".to_string()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(1));
    }

    #[test]
    fn test_retry_policy_needs_one_attempt() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts, 1);
    }

    #[tokio::test]
    async fn test_full_pipeline_through_queues() {
        let store = Arc::new(MemoryStore::new());
        let s3 = Arc::new(
            MockPlugin::new("s3", Provider::Aws)
                .discovering(&["bucket-a", "bucket-b"])
                .with_config("bucket-a", json!({ "bucket_policy": "" }))
                .with_config(
                    "bucket-b",
                    json!({ "bucket_policy": { "Statement": [] } }),
                ),
        );
        let (ctx, notifier) = context(&store, vec![s3]);
        PolicyStore::create(store.as_ref(), RegoPolicy::new("s3", "data.s3.deny", S3_POLICY))
            .await
            .unwrap();

        let retrieval_queue = MemoryQueue::new();
        let scan_queue = MemoryQueue::new();

        let message = handle_trigger(&ctx, &trigger(Provider::Aws), &retrieval_queue)
            .await
            .unwrap();
        let retrieval = handle_retrieval_batch(&ctx, &retrieval_queue.drain(), &scan_queue)
            .await
            .unwrap();
        let forwarded = scan_queue.drain();
        let scan = handle_scan_batch(&ctx, &forwarded).await.unwrap();

        assert_eq!(retrieval.processed, 1);
        assert_eq!(scan.processed, 1);
        assert_eq!(JobMessage::from_json(&forwarded[0]).unwrap(), message);

        let job = store.find(&message.job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);

        // No orphan configs
        let configs = ConfigStore::find_by_job(store.as_ref(), &job.id).await.unwrap();
        assert_eq!(configs.len(), 2);
        for config in &configs {
            assert!(job
                .resource_ids(&config.resource_type)
                .unwrap()
                .contains(&config.resource_id));
        }

        let results = ScanStore::find_by_job(store.as_ref(), &job.id).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.pass == r.misconfiguration.is_empty()));

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].2.len(), 1);
        assert_eq!(sent[0].2[0].resource_id, "bucket-a");
    }
}

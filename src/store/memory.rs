use super::{ConfigStore, JobStore, PolicyStore, ScanStore, StoreError, StoreResult};
use crate::model::{DiscoveryJob, JobId, JobStatus, RegoPolicy, ResourceConfig, ScanResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

type RowKey = (JobId, String, String);

/// In-process store implementing every store trait.
///
/// Used by the inline `run` command and by tests.
#[derive(Default)]
pub struct MemoryStore {
    jobs: RwLock<BTreeMap<JobId, DiscoveryJob>>,
    configs: RwLock<BTreeMap<RowKey, ResourceConfig>>,
    scans: RwLock<BTreeMap<RowKey, ScanResult>>,
    policies: RwLock<BTreeMap<String, RegoPolicy>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create(&self, job: &DiscoveryJob) -> StoreResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(format!("job {}", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn find(&self, id: &JobId) -> StoreResult<Option<DiscoveryJob>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn set_resources(&self, id: &JobId, resource_type: &str, ids: Vec<String>) -> StoreResult<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("job {}", id)))?;
        job.resources.insert(resource_type.to_string(), ids);
        Ok(())
    }

    async fn set_status(&self, id: &JobId, status: JobStatus) -> StoreResult<()> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("job {}", id)))?;
        job.status = status;
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn insert_many(&self, configs: Vec<ResourceConfig>) -> StoreResult<usize> {
        let mut rows = self.configs.write().await;
        let batch: BTreeMap<_, _> = configs.into_iter().map(|config| (config.natural_key(), config)).collect();
        let count = batch.len();
        rows.extend(batch);
        Ok(count)
    }

    async fn find_by_job(&self, job_id: &JobId) -> StoreResult<Vec<ResourceConfig>> {
        Ok(self
            .configs
            .read()
            .await
            .values()
            .filter(|c| &c.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn find_by_type_and_job(&self, resource_type: &str, job_id: &JobId) -> StoreResult<Vec<ResourceConfig>> {
        Ok(self
            .configs
            .read()
            .await
            .values()
            .filter(|c| &c.job_id == job_id && c.resource_type == resource_type)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ScanStore for MemoryStore {
    async fn insert_many(&self, results: Vec<ScanResult>) -> StoreResult<usize> {
        let mut rows = self.scans.write().await;
        let batch: BTreeMap<_, _> = results.into_iter().map(|result| (result.natural_key(), result)).collect();
        let count = batch.len();
        rows.extend(batch);
        Ok(count)
    }

    async fn find_by_job(&self, job_id: &JobId) -> StoreResult<Vec<ScanResult>> {
        Ok(self
            .scans
            .read()
            .await
            .values()
            .filter(|r| &r.job_id == job_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PolicyStore for MemoryStore {
    async fn create(&self, policy: RegoPolicy) -> StoreResult<()> {
        let mut policies = self.policies.write().await;
        if policies.contains_key(&policy.resource_type) {
            return Err(StoreError::Duplicate(format!(
                "policy for resource type '{}'",
                policy.resource_type
            )));
        }
        policies.insert(policy.resource_type.clone(), policy);
        Ok(())
    }

    async fn find_by_resource_type(&self, resource_type: &str) -> StoreResult<Option<RegoPolicy>> {
        Ok(self.policies.read().await.get(resource_type).cloned())
    }

    async fn list(&self) -> StoreResult<Vec<RegoPolicy>> {
        Ok(self.policies.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConfigDocument, Provider, ScanStatus};

    fn job() -> DiscoveryJob {
        DiscoveryJob::new("client-1", "123456789012", Provider::Aws)
    }

    fn config(job: &DiscoveryJob, resource_type: &str, id: &str) -> ResourceConfig {
        ResourceConfig::for_job(job, resource_type, id, ConfigDocument::new())
    }

    #[tokio::test]
    async fn test_job_lifecycle() {
        let store = MemoryStore::new();
        let job = job();
        JobStore::create(&store, &job).await.unwrap();

        store
            .set_resources(&job.id, "s3", vec!["bucket-a".to_string()])
            .await
            .unwrap();
        store
            .set_resources(&job.id, "ec2", vec![])
            .await
            .unwrap();
        store.set_status(&job.id, JobStatus::Completed).await.unwrap();

        let found = store.find(&job.id).await.unwrap().unwrap();
        assert_eq!(found.status, JobStatus::Completed);
        assert_eq!(found.resource_ids("s3").unwrap(), ["bucket-a"]);
        assert_eq!(found.resource_ids("ec2").unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_updating_missing_job_fails() {
        let store = MemoryStore::new();
        let missing = JobId::new();

        assert!(matches!(
            store.set_status(&missing, JobStatus::Error).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(store.find(&missing).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_config_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let job = job();
        let rows = vec![config(&job, "s3", "bucket-a"), config(&job, "s3", "bucket-b")];

        ConfigStore::insert_many(&store, rows.clone()).await.unwrap();
        ConfigStore::insert_many(&store, rows).await.unwrap();

        assert_eq!(ConfigStore::find_by_job(&store, &job.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_keys_in_batch_count_once() {
        let store = MemoryStore::new();
        let job = job();

        let written = ConfigStore::insert_many(
            &store,
            vec![config(&job, "s3", "bucket-a"), config(&job, "s3", "bucket-a")],
        )
        .await
        .unwrap();

        assert_eq!(written, 1);
        assert_eq!(ConfigStore::find_by_job(&store, &job.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_configs_filtered_by_type_and_job() {
        let store = MemoryStore::new();
        let job = job();
        let other = self::job();
        ConfigStore::insert_many(
            &store,
            vec![
                config(&job, "s3", "bucket-a"),
                config(&job, "gcs", "logs"),
                config(&other, "s3", "bucket-z"),
            ],
        )
        .await
        .unwrap();

        let s3 = store.find_by_type_and_job("s3", &job.id).await.unwrap();
        assert_eq!(s3.len(), 1);
        assert_eq!(s3[0].resource_id, "bucket-a");
    }

    #[tokio::test]
    async fn test_scan_results_roundtrip() {
        let store = MemoryStore::new();
        let job = job();
        let row = config(&job, "s3", "bucket-a");
        let result = ScanResult::from_evaluation(&row, ScanStatus::Completed, vec!["x".to_string()]);

        ScanStore::insert_many(&store, vec![result.clone(), result.clone()])
            .await
            .unwrap();

        assert_eq!(ScanStore::find_by_job(&store, &job.id).await.unwrap(), vec![result]);
    }

    #[tokio::test]
    async fn test_policy_unique_per_resource_type() {
        let store = MemoryStore::new();
        let policy = RegoPolicy::new("s3", "data.s3.deny", "package s3");

        PolicyStore::create(&store, policy.clone()).await.unwrap();
        assert!(matches!(
            PolicyStore::create(&store, policy.clone()).await,
            Err(StoreError::Duplicate(_))
        ));

        assert_eq!(store.find_by_resource_type("s3").await.unwrap(), Some(policy));
        assert!(store.find_by_resource_type("gcs").await.unwrap().is_none());
        assert_eq!(store.list().await.unwrap().len(), 1);
    }
}

use super::{ConfigStore, JobStore, PolicyStore, ScanStore, StoreError, StoreResult};
use crate::model::{DiscoveryJob, JobId, JobStatus, RegoPolicy, ResourceConfig, ScanResult};
use crate::traits::{FileSystem, RealFileSystem};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Store keeping one JSON document per record under a root directory:
///
/// ```text
/// <root>/jobs/<job_id>.json         one DiscoveryJob
/// <root>/configs/<job_id>.json      every ResourceConfig of the job
/// <root>/scans/<job_id>.json        every ScanResult of the job
/// <root>/policies/<type>.json       one RegoPolicy
/// ```
///
/// Separate processes can run different stages against the same root.
pub struct FileStore {
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
    // Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_filesystem(root, Arc::new(RealFileSystem))
    }

    pub fn with_filesystem(root: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            root: root.into(),
            fs,
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the collection directories
    pub fn init(&self) -> StoreResult<()> {
        for dir in ["jobs", "configs", "scans", "policies"] {
            self.fs
                .create_dir_all(&self.root.join(dir))
                .map_err(backend)?;
        }
        Ok(())
    }

    fn job_path(&self, id: &JobId) -> PathBuf {
        self.root.join("jobs").join(format!("{}.json", id))
    }

    fn configs_path(&self, id: &JobId) -> PathBuf {
        self.root.join("configs").join(format!("{}.json", id))
    }

    fn scans_path(&self, id: &JobId) -> PathBuf {
        self.root.join("scans").join(format!("{}.json", id))
    }

    fn policy_path(&self, resource_type: &str) -> StoreResult<PathBuf> {
        let valid = !resource_type.is_empty()
            && resource_type
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::Backend(format!(
                "'{}' is not a valid resource type name",
                resource_type
            )));
        }
        Ok(self.root.join("policies").join(format!("{}.json", resource_type)))
    }

    /// Run filesystem work on the blocking pool so slow disks never stall
    /// the async runtime
    async fn blocking<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn FileSystem) -> StoreResult<T> + Send + 'static,
    {
        let fs = Arc::clone(&self.fs);
        tokio::task::spawn_blocking(move || op(fs.as_ref()))
            .await
            .map_err(|e| StoreError::Backend(format!("Storage task failed: {}", e)))?
    }

    async fn exists(&self, path: PathBuf) -> StoreResult<bool> {
        self.blocking(move |fs| Ok(fs.exists(&path))).await
    }

    async fn read<T: DeserializeOwned + Send + 'static>(&self, path: PathBuf) -> StoreResult<Option<T>> {
        self.blocking(move |fs| {
            if !fs.exists(&path) {
                return Ok(None);
            }
            let contents = fs.read_to_string(&path).map_err(backend)?;
            Ok(Some(serde_json::from_str(&contents)?))
        })
        .await
    }

    async fn write<T: Serialize>(&self, path: PathBuf, value: &T) -> StoreResult<()> {
        let contents = serde_json::to_string_pretty(value)?;
        self.blocking(move |fs| fs.write(&path, &contents).map_err(backend))
            .await
    }

    async fn update_job(&self, id: &JobId, apply: impl FnOnce(&mut DiscoveryJob)) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.job_path(id);
        let mut job: DiscoveryJob = self
            .read(path.clone())
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("job {}", id)))?;
        apply(&mut job);
        self.write(path, &job).await
    }

    /// Merge rows into per-job documents, replacing rows with the same key
    async fn upsert_rows<T, K>(
        &self,
        rows: Vec<T>,
        job_of: impl Fn(&T) -> JobId,
        key_of: impl Fn(&T) -> K,
        path_of: impl Fn(&JobId) -> PathBuf,
    ) -> StoreResult<usize>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        K: Ord,
    {
        let _guard = self.write_lock.lock().await;

        // Later rows win over earlier rows with the same key
        let mut by_job: BTreeMap<JobId, BTreeMap<K, T>> = BTreeMap::new();
        for row in rows {
            by_job.entry(job_of(&row)).or_default().insert(key_of(&row), row);
        }
        let count = by_job.values().map(BTreeMap::len).sum();

        for (job_id, new_rows) in by_job {
            let path = path_of(&job_id);
            let existing: Vec<T> = self.read(path.clone()).await?.unwrap_or_default();

            let mut merged: BTreeMap<K, T> = existing.into_iter().map(|row| (key_of(&row), row)).collect();
            merged.extend(new_rows);

            let merged: Vec<T> = merged.into_values().collect();
            self.write(path, &merged).await?;
        }

        Ok(count)
    }
}

fn backend(err: anyhow::Error) -> StoreError {
    StoreError::Backend(format!("{:#}", err))
}

#[async_trait]
impl JobStore for FileStore {
    async fn create(&self, job: &DiscoveryJob) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.job_path(&job.id);
        if self.exists(path.clone()).await? {
            return Err(StoreError::Duplicate(format!("job {}", job.id)));
        }
        self.write(path, job).await
    }

    async fn find(&self, id: &JobId) -> StoreResult<Option<DiscoveryJob>> {
        self.read(self.job_path(id)).await
    }

    async fn set_resources(&self, id: &JobId, resource_type: &str, ids: Vec<String>) -> StoreResult<()> {
        self.update_job(id, |job| {
            job.resources.insert(resource_type.to_string(), ids);
        })
        .await
    }

    async fn set_status(&self, id: &JobId, status: JobStatus) -> StoreResult<()> {
        self.update_job(id, |job| job.status = status).await
    }
}

#[async_trait]
impl ConfigStore for FileStore {
    async fn insert_many(&self, configs: Vec<ResourceConfig>) -> StoreResult<usize> {
        self.upsert_rows(
            configs,
            |c| c.job_id,
            ResourceConfig::natural_key,
            |id| self.configs_path(id),
        )
        .await
    }

    async fn find_by_job(&self, job_id: &JobId) -> StoreResult<Vec<ResourceConfig>> {
        Ok(self.read(self.configs_path(job_id)).await?.unwrap_or_default())
    }

    async fn find_by_type_and_job(&self, resource_type: &str, job_id: &JobId) -> StoreResult<Vec<ResourceConfig>> {
        let configs: Vec<ResourceConfig> = ConfigStore::find_by_job(self, job_id).await?;
        Ok(configs
            .into_iter()
            .filter(|c| c.resource_type == resource_type)
            .collect())
    }
}

#[async_trait]
impl ScanStore for FileStore {
    async fn insert_many(&self, results: Vec<ScanResult>) -> StoreResult<usize> {
        self.upsert_rows(
            results,
            |r| r.job_id,
            ScanResult::natural_key,
            |id| self.scans_path(id),
        )
        .await
    }

    async fn find_by_job(&self, job_id: &JobId) -> StoreResult<Vec<ScanResult>> {
        Ok(self.read(self.scans_path(job_id)).await?.unwrap_or_default())
    }
}

#[async_trait]
impl PolicyStore for FileStore {
    async fn create(&self, policy: RegoPolicy) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.policy_path(&policy.resource_type)?;
        if self.exists(path.clone()).await? {
            return Err(StoreError::Duplicate(format!(
                "policy for resource type '{}'",
                policy.resource_type
            )));
        }
        self.write(path, &policy).await
    }

    async fn find_by_resource_type(&self, resource_type: &str) -> StoreResult<Option<RegoPolicy>> {
        self.read(self.policy_path(resource_type)?).await
    }

    async fn list(&self) -> StoreResult<Vec<RegoPolicy>> {
        let dir = self.root.join("policies");
        let files = self
            .blocking(move |fs| fs.list_files(&dir, "json").map_err(backend))
            .await?;

        let mut policies = Vec::with_capacity(files.len());
        for file in files {
            if let Some(policy) = self.read::<RegoPolicy>(file).await? {
                policies.push(policy);
            }
        }
        Ok(policies)
    }
}

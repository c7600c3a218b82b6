//! Persistence for jobs, resource configs, scan results and policies.
//!
//! Row-level writes are atomic; there are no cross-row transactions. Bulk
//! inserts are upserts on `(job_id, resource_type, resource_id)`, so a stage
//! re-run for the same job replaces its rows instead of duplicating them.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::model::{DiscoveryJob, JobId, JobStatus, RegoPolicy, ResourceConfig, ScanResult};
use async_trait::async_trait;
use std::fmt;

/// Error types for store operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The record to update does not exist
    NotFound(String),

    /// A record with the same unique key already exists
    Duplicate(String),

    /// The backing storage failed
    Backend(String),

    /// A stored record could not be encoded or decoded
    Serialization(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(what) => write!(f, "Not found: {}", what),
            StoreError::Duplicate(what) => write!(f, "Already exists: {}", what),
            StoreError::Backend(msg) => write!(f, "Storage error: {}", msg),
            StoreError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Discovery jobs; written by discovery only
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: &DiscoveryJob) -> StoreResult<()>;

    async fn find(&self, id: &JobId) -> StoreResult<Option<DiscoveryJob>>;

    /// Set one entry of the job's resource map, leaving the others untouched
    async fn set_resources(&self, id: &JobId, resource_type: &str, ids: Vec<String>) -> StoreResult<()>;

    async fn set_status(&self, id: &JobId, status: JobStatus) -> StoreResult<()>;
}

/// Retrieved resource configs; written by retrieval only
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Upsert configs on their natural key, returning the number of distinct
    /// keys written
    async fn insert_many(&self, configs: Vec<ResourceConfig>) -> StoreResult<usize>;

    async fn find_by_job(&self, job_id: &JobId) -> StoreResult<Vec<ResourceConfig>>;

    async fn find_by_type_and_job(&self, resource_type: &str, job_id: &JobId) -> StoreResult<Vec<ResourceConfig>>;
}

/// Scan verdicts; written by scan only
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Upsert results on their natural key, returning the number of distinct
    /// keys written
    async fn insert_many(&self, results: Vec<ScanResult>) -> StoreResult<usize>;

    async fn find_by_job(&self, job_id: &JobId) -> StoreResult<Vec<ScanResult>>;
}

/// Rule-sets, at most one per resource type
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn create(&self, policy: RegoPolicy) -> StoreResult<()>;

    async fn find_by_resource_type(&self, resource_type: &str) -> StoreResult<Option<RegoPolicy>>;

    async fn list(&self) -> StoreResult<Vec<RegoPolicy>>;
}


//! Records that flow through the discovery → retrieval → scan pipeline.
//!
//! Each stage owns writes to exactly one record type:
//!
//! - [`DiscoveryJob`]: written by discovery, read by retrieval and scan
//! - [`ResourceConfig`]: written by retrieval, read by scan
//! - [`ScanResult`]: written by scan
//!
//! [`RegoPolicy`] rows are administered out of band and are read-only to the
//! pipeline. [`JobMessage`] is the descriptor handed from one stage to the next.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Open-ended configuration document returned by a resource plugin
pub type ConfigDocument = serde_json::Map<String, serde_json::Value>;

/// Globally unique discovery job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    /// Allocate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| format!("Invalid job id '{}': {}", s, e))
    }
}

/// Cloud providers a client account can live in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Provider {
    #[serde(rename = "AWS", alias = "aws")]
    Aws,
    #[serde(rename = "GCP", alias = "gcp")]
    Gcp,
}

impl Provider {
    /// Wire representation used in queue messages and stored records
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "AWS",
            Provider::Gcp => "GCP",
        }
    }

    /// Get all supported providers
    pub fn all() -> Vec<Provider> {
        vec![Provider::Aws, Provider::Gcp]
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "aws" => Ok(Provider::Aws),
            "gcp" | "google" => Ok(Provider::Gcp),
            other => Err(format!("Unsupported provider: {}", other)),
        }
    }
}

/// Lifecycle of a discovery job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    InProgress,
    Completed,
    Error,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::InProgress => write!(f, "in-progress"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// One discovery run for one client account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryJob {
    pub id: JobId,
    pub client_id: String,
    /// Cloud-native account (AWS) or project (GCP) identifier
    pub account_id: String,
    pub provider: Provider,
    pub status: JobStatus,
    /// Resource type name → discovered identifiers, filled one plugin at a time
    pub resources: BTreeMap<String, Vec<String>>,
    pub created_at: DateTime<Utc>,
}

impl DiscoveryJob {
    /// Create an in-progress job with no resources
    pub fn new(client_id: impl Into<String>, account_id: impl Into<String>, provider: Provider) -> Self {
        Self {
            id: JobId::new(),
            client_id: client_id.into(),
            account_id: account_id.into(),
            provider,
            status: JobStatus::InProgress,
            resources: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Identifiers discovered for a resource type, if discovery reached it
    pub fn resource_ids(&self, resource_type: &str) -> Option<&[String]> {
        self.resources.get(resource_type).map(|ids| ids.as_slice())
    }

    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Configuration of one resource retrieved for a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceConfig {
    pub job_id: JobId,
    pub client_id: String,
    pub account_id: String,
    pub provider: Provider,
    pub resource_type: String,
    pub resource_id: String,
    pub config: ConfigDocument,
}

impl ResourceConfig {
    /// Build a config row for a job, copying the job's tenant fields
    pub fn for_job(
        job: &DiscoveryJob,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        config: ConfigDocument,
    ) -> Self {
        Self {
            job_id: job.id,
            client_id: job.client_id.clone(),
            account_id: job.account_id.clone(),
            provider: job.provider,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            config,
        }
    }

    /// (job, resource type, resource id); at most one row per key
    pub fn natural_key(&self) -> (JobId, String, String) {
        (self.job_id, self.resource_type.clone(), self.resource_id.clone())
    }
}

/// Rule-set evaluated against every config of one resource type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegoPolicy {
    pub resource_type: String,
    /// Entry point rule path, e.g. `data.s3.deny`
    pub query: String,
    pub rego: String,
}

/// Whether the policy engine itself ran to completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Completed,
    Error,
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanStatus::Completed => write!(f, "completed"),
            ScanStatus::Error => write!(f, "error"),
        }
    }
}

/// Verdict for one resource config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    pub job_id: JobId,
    pub client_id: String,
    pub account_id: String,
    pub provider: Provider,
    pub resource_type: String,
    pub resource_id: String,
    pub status: ScanStatus,
    pub pass: bool,
    pub misconfiguration: Vec<String>,
}

impl ScanResult {
    /// Build the verdict for a config; `pass` always mirrors an empty violation list
    pub fn from_evaluation(
        config: &ResourceConfig,
        status: ScanStatus,
        mut misconfiguration: Vec<String>,
    ) -> Self {
        misconfiguration.sort();
        misconfiguration.dedup();

        Self {
            job_id: config.job_id,
            client_id: config.client_id.clone(),
            account_id: config.account_id.clone(),
            provider: config.provider,
            resource_type: config.resource_type.clone(),
            resource_id: config.resource_id.clone(),
            status,
            pass: misconfiguration.is_empty(),
            misconfiguration,
        }
    }

    pub fn natural_key(&self) -> (JobId, String, String) {
        (self.job_id, self.resource_type.clone(), self.resource_id.clone())
    }
}

/// Inbound request to scan one client account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTrigger {
    pub client_id: String,
    pub account_id: String,
    pub client_email: String,
    pub provider: Provider,
}

/// Job descriptor handed between stages through the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: JobId,
    pub client_id: String,
    pub account_id: String,
    pub client_email: String,
    pub provider: Provider,
}

impl JobMessage {
    /// Descriptor for a job created from a trigger
    pub fn for_job(job: &DiscoveryJob, client_email: impl Into<String>) -> Self {
        Self {
            job_id: job.id,
            client_id: job.client_id.clone(),
            account_id: job.account_id.clone(),
            client_email: client_email.into(),
            provider: job.provider,
        }
    }

    pub fn from_json(body: &str) -> serde_json::Result<Self> {
        serde_json::from_str(body)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

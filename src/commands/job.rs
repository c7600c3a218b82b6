use crate::model::{DiscoveryJob, JobId, ResourceConfig, ScanResult};
use crate::output::{self, LabelColor};
use crate::store::{ConfigStore, JobStore, ScanStore};
use anyhow::{Result, bail};

pub struct JobCommand;

/// A job with everything stored for it
#[derive(Debug)]
pub struct JobReport {
    pub job: DiscoveryJob,
    pub configs: Vec<ResourceConfig>,
    pub results: Vec<ScanResult>,
}

impl JobCommand {
    pub async fn execute_show<S>(store: &S, id: &JobId) -> Result<JobReport>
    where
        S: JobStore + ConfigStore + ScanStore,
    {
        let Some(job) = JobStore::find(store, id).await? else {
            bail!("Job {} not found", id);
        };
        let configs = ConfigStore::find_by_job(store, id).await?;
        let results = ScanStore::find_by_job(store, id).await?;

        output::section(&format!("Job {}", job.id));
        output::key_value("Client", &job.client_id);
        output::key_value("Account", &job.account_id);
        output::key_value("Provider", job.provider.as_str());
        output::key_value("Created", &job.created_at.to_rfc3339());
        let status_color = match job.status {
            crate::model::JobStatus::Completed => LabelColor::Green,
            crate::model::JobStatus::InProgress => LabelColor::Blue,
            crate::model::JobStatus::Error => LabelColor::Yellow,
        };
        output::label("Status:", &job.status.to_string(), status_color);

        output::subsection("Resources");
        for (resource_type, ids) in &job.resources {
            let stored = configs.iter().filter(|c| &c.resource_type == resource_type).count();
            output::key_value(
                resource_type,
                &format!("{} discovered, {} retrieved", ids.len(), stored),
            );
        }

        if !results.is_empty() {
            output::subsection("Scan results");
            output::table_header(&["Type", "Resource", "Status", "Misconfigurations"]);
            for result in &results {
                let verdict = if result.pass { "pass".to_string() } else { "fail".to_string() };
                let status = format!("{} ({})", verdict, result.status);
                let violations = result.misconfiguration.join(", ");
                output::table_row(&[&result.resource_type, &result.resource_id, &status, &violations]);
            }
        }

        Ok(JobReport { job, configs, results })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConfigDocument, Provider, ScanStatus};
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_show_collects_job_rows() {
        let store = MemoryStore::new();
        let job = DiscoveryJob::new("client-1", "123456789012", Provider::Aws);
        JobStore::create(&store, &job).await.unwrap();
        JobStore::set_resources(&store, &job.id, "s3", vec!["bucket-a".to_string()])
            .await
            .unwrap();
        let config = ResourceConfig::for_job(&job, "s3", "bucket-a", ConfigDocument::new());
        ConfigStore::insert_many(&store, vec![config.clone()]).await.unwrap();
        ScanStore::insert_many(
            &store,
            vec![ScanResult::from_evaluation(&config, ScanStatus::Completed, vec!["x".to_string()])],
        )
        .await
        .unwrap();

        let report = JobCommand::execute_show(&store, &job.id).await.unwrap();

        assert_eq!(report.job.resource_ids("s3").unwrap().len(), 1);
        assert_eq!(report.configs.len(), 1);
        assert_eq!(report.results.len(), 1);
        assert!(!report.results[0].pass);
    }

    #[tokio::test]
    async fn test_show_unknown_job() {
        let store = MemoryStore::new();
        assert!(JobCommand::execute_show(&store, &JobId::new()).await.is_err());
    }
}

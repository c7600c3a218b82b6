use super::{with_retry, BatchSummary, StageError};
use crate::context::StageContext;
use crate::model::{JobId, JobMessage, ResourceConfig};
use crate::queue::JobQueue;
use tracing::{debug, info, warn};

/// What a retrieval pass stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalSummary {
    pub job_id: JobId,
    pub configs_stored: usize,
    /// Resource types whose plugin failed; their configurations are missing
    pub failed_types: Vec<String>,
}

/// Fetch configurations for every resource a completed job discovered.
///
/// A failing plugin is logged and skipped so the other resource types still
/// reach the scan. Documents for identifiers the job never discovered are
/// dropped. Everything retrieved is stored in one bulk insert.
pub async fn run_retrieval(ctx: &StageContext, message: &JobMessage) -> Result<RetrievalSummary, StageError> {
    let job = ctx
        .bounded("find job", ctx.jobs.find(&message.job_id))
        .await?
        .ok_or(StageError::JobNotFound(message.job_id))?;
    if !job.is_completed() {
        return Err(StageError::JobNotReady {
            job_id: job.id,
            status: job.status,
        });
    }

    let federator = ctx.federator(job.provider)?;
    let creds = ctx
        .bounded("obtain credentials", federator.credentials_for(&job.account_id))
        .await?;

    let mut rows = Vec::new();
    let mut failed_types = Vec::new();

    for plugin in ctx.plugins.for_provider(job.provider) {
        let resource_type = plugin.name().to_string();
        let ids = match job.resource_ids(&resource_type) {
            Some(ids) if !ids.is_empty() => ids,
            _ => {
                debug!(job_id = %job.id, resource_type = %resource_type, "Nothing discovered, skipping");
                continue;
            }
        };

        let plugin_ref = plugin.as_ref();
        let creds_ref = &creds;
        let account_id = job.account_id.as_str();
        let retrieved = with_retry(&ctx.retry, &resource_type, move || {
            plugin_ref.retrieve_config(creds_ref, account_id, ids)
        })
        .await;

        match retrieved {
            Ok(configs) => {
                let before = rows.len();
                for (resource_id, config) in configs {
                    if !ids.contains(&resource_id) {
                        warn!(
                            job_id = %job.id,
                            resource_type = %resource_type,
                            resource_id = %resource_id,
                            "Dropping configuration for undiscovered resource"
                        );
                        continue;
                    }
                    rows.push(ResourceConfig::for_job(&job, &resource_type, resource_id, config));
                }
                info!(
                    job_id = %job.id,
                    resource_type = %resource_type,
                    count = rows.len() - before,
                    "Retrieved configurations"
                );
            }
            Err(e) => {
                warn!(job_id = %job.id, resource_type = %resource_type, error = %e, "Retrieval failed, skipping");
                failed_types.push(resource_type);
            }
        }
    }

    let configs_stored = if rows.is_empty() {
        info!(job_id = %job.id, "No configurations retrieved");
        0
    } else {
        ctx.bounded("store configurations", ctx.configs.insert_many(rows))
            .await?
    };

    Ok(RetrievalSummary {
        job_id: job.id,
        configs_stored,
        failed_types,
    })
}

/// Process a batch of retrieval messages, forwarding each body unchanged to
/// the scan stage once its configurations are stored.
///
/// Undecodable bodies are dropped with a warning. Any other failure aborts
/// the batch so the caller can redeliver it.
pub async fn handle_retrieval_batch(
    ctx: &StageContext,
    bodies: &[String],
    scan_queue: &dyn JobQueue,
) -> Result<BatchSummary, StageError> {
    let mut summary = BatchSummary::default();

    for body in bodies {
        let message = match JobMessage::from_json(body) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable retrieval message");
                summary.skipped += 1;
                continue;
            }
        };

        run_retrieval(ctx, &message).await?;
        scan_queue.send_raw(body).await?;
        summary.processed += 1;
    }

    Ok(summary)
}

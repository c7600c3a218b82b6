use super::{with_retry, StageError};
use crate::context::StageContext;
use crate::model::{DiscoveryJob, JobMessage, JobStatus, ScanTrigger};
use crate::queue::JobQueue;
use tracing::{info, warn};

/// Enumerate every resource type of the trigger's provider into a new job.
///
/// Credentials are obtained before the job exists, so a federation failure
/// leaves nothing behind. A plugin failure marks the job `error` and stops
/// the run; the job is only `completed` once every plugin has reported.
pub async fn run_discovery(ctx: &StageContext, trigger: &ScanTrigger) -> Result<JobMessage, StageError> {
    let federator = ctx.federator(trigger.provider)?;
    let creds = ctx
        .bounded("obtain credentials", federator.credentials_for(&trigger.account_id))
        .await?;

    let job = DiscoveryJob::new(&trigger.client_id, &trigger.account_id, trigger.provider);
    ctx.bounded("create job", ctx.jobs.create(&job)).await?;
    info!(
        job_id = %job.id,
        client_id = %job.client_id,
        account_id = %job.account_id,
        provider = %job.provider,
        "Discovery started"
    );

    for plugin in ctx.plugins.for_provider(trigger.provider) {
        let resource_type = plugin.name().to_string();
        let plugin_ref = plugin.as_ref();
        let creds_ref = &creds;
        let account_id = trigger.account_id.as_str();

        let discovered = with_retry(&ctx.retry, &resource_type, move || {
            plugin_ref.discover(creds_ref, account_id)
        })
        .await;

        match discovered {
            Ok(ids) => {
                info!(job_id = %job.id, resource_type = %resource_type, count = ids.len(), "Discovered resources");
                ctx.bounded(
                    "record resources",
                    ctx.jobs.set_resources(&job.id, &resource_type, ids),
                )
                .await?;
            }
            Err(source) => {
                if let Err(e) = ctx
                    .bounded("mark job failed", ctx.jobs.set_status(&job.id, JobStatus::Error))
                    .await
                {
                    warn!(job_id = %job.id, error = %e, "Failed to mark job as errored");
                }
                return Err(StageError::Discovery {
                    job_id: job.id,
                    resource_type,
                    source,
                });
            }
        }
    }

    ctx.bounded("complete job", ctx.jobs.set_status(&job.id, JobStatus::Completed))
        .await?;
    info!(job_id = %job.id, "Discovery completed");

    Ok(JobMessage::for_job(&job, &trigger.client_email))
}

/// Run discovery and hand the job to the retrieval stage
pub async fn handle_trigger(
    ctx: &StageContext,
    trigger: &ScanTrigger,
    retrieval_queue: &dyn JobQueue,
) -> Result<JobMessage, StageError> {
    let message = run_discovery(ctx, trigger).await?;
    retrieval_queue.send(&message).await?;
    Ok(message)
}

use super::{BatchSummary, StageError};
use crate::context::StageContext;
use crate::model::{JobId, JobMessage, ScanResult, ScanStatus};
use serde_json::Value;
use tracing::{debug, error, info, warn};

/// What a scan pass evaluated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    pub job_id: JobId,
    pub evaluated: usize,
    pub failing: usize,
    /// Resource types with configurations but no rule-set
    pub unscanned_types: Vec<String>,
    /// Resource types a failure report was sent for
    pub notified_types: Vec<String>,
}

/// Evaluate every stored configuration of a job against its resource type's
/// rule-set and report failures to the client.
///
/// A configuration the engine cannot evaluate yields an `error` result with
/// no violations. Each resource type with failing results produces exactly
/// one notification.
pub async fn run_scan(ctx: &StageContext, message: &JobMessage) -> Result<ScanSummary, StageError> {
    let mut summary = ScanSummary {
        job_id: message.job_id,
        evaluated: 0,
        failing: 0,
        unscanned_types: Vec::new(),
        notified_types: Vec::new(),
    };

    for plugin in ctx.plugins.for_provider(message.provider) {
        let resource_type = plugin.name();
        let configs = ctx
            .bounded(
                "load configurations",
                ctx.configs.find_by_type_and_job(resource_type, &message.job_id),
            )
            .await?;
        if configs.is_empty() {
            debug!(job_id = %message.job_id, resource_type = %resource_type, "No configurations to scan");
            continue;
        }

        let Some(policy) = ctx
            .bounded("load rule-set", ctx.policies.find_by_resource_type(resource_type))
            .await?
        else {
            warn!(
                job_id = %message.job_id,
                resource_type = %resource_type,
                "No rule-set for resource type, skipping"
            );
            summary.unscanned_types.push(resource_type.to_string());
            continue;
        };

        let results: Vec<ScanResult> = configs
            .iter()
            .map(|config| {
                let input = Value::Object(config.config.clone());
                match ctx.engine.evaluate(&policy, &input) {
                    Ok(violations) => ScanResult::from_evaluation(config, ScanStatus::Completed, violations),
                    Err(e) => {
                        error!(
                            job_id = %message.job_id,
                            resource_type = %resource_type,
                            resource_id = %config.resource_id,
                            error = %e,
                            "Evaluation failed"
                        );
                        ScanResult::from_evaluation(config, ScanStatus::Error, Vec::new())
                    }
                }
            })
            .collect();

        let failing: Vec<ScanResult> = results.iter().filter(|r| !r.pass).cloned().collect();
        summary.evaluated += results.len();
        summary.failing += failing.len();

        ctx.bounded("store scan results", ctx.scans.insert_many(results))
            .await?;
        info!(
            job_id = %message.job_id,
            resource_type = %resource_type,
            failing = failing.len(),
            "Scanned resource type"
        );

        if !failing.is_empty() {
            ctx.notifier
                .notify(&message.client_email, resource_type, &failing)
                .await;
            summary.notified_types.push(resource_type.to_string());
        }
    }

    Ok(summary)
}

/// Process a batch of scan messages; the scan stage is the last one.
pub async fn handle_scan_batch(ctx: &StageContext, bodies: &[String]) -> Result<BatchSummary, StageError> {
    let mut summary = BatchSummary::default();

    for body in bodies {
        let message = match JobMessage::from_json(body) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable scan message");
                summary.skipped += 1;
                continue;
            }
        };

        run_scan(ctx, &message).await?;
        summary.processed += 1;
    }

    Ok(summary)
}

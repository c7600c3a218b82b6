use crate::config::Settings;
use crate::context::StageContext;
use crate::model::{ScanResult, ScanTrigger};
use crate::output::{self, LabelColor};
use crate::pipeline::{handle_retrieval_batch, handle_scan_batch, handle_trigger};
use crate::queue::MemoryQueue;
use crate::store::{MemoryStore, PolicyStore};
use anyhow::{Context, Result};
use std::sync::Arc;

pub struct RunCommand;

impl RunCommand {
    /// Run all three stages in this process, handing off through in-memory queues.
    ///
    /// With `in_memory`, jobs and results are kept only for the duration of
    /// the run; rule-sets are still read from the configured store.
    pub async fn execute(settings: &Settings, trigger: &ScanTrigger, in_memory: bool) -> Result<()> {
        let http = settings.http_client()?;
        let file_store = settings.file_store()?;

        let ctx = if in_memory {
            let store = Arc::new(MemoryStore::new());
            for policy in file_store.list().await? {
                PolicyStore::create(store.as_ref(), policy).await?;
            }
            settings.federated_context(store, &http)?
        } else {
            settings.federated_context(file_store, &http)?
        };

        Self::run(&ctx, trigger).await?;
        Ok(())
    }

    pub async fn run(ctx: &StageContext, trigger: &ScanTrigger) -> Result<Vec<ScanResult>> {
        let retrieval_queue = MemoryQueue::new();
        let scan_queue = MemoryQueue::new();

        output::step(1, 3, "Discovering resources");
        let message = handle_trigger(ctx, trigger, &retrieval_queue)
            .await
            .with_context(|| format!("Discovery failed for account {}", trigger.account_id))?;
        output::key_value("Job", &message.job_id.to_string());

        output::step(2, 3, "Retrieving configurations");
        handle_retrieval_batch(ctx, &retrieval_queue.drain(), &scan_queue)
            .await
            .context("Retrieval failed")?;

        output::step(3, 3, "Scanning");
        handle_scan_batch(ctx, &scan_queue.drain())
            .await
            .context("Scan failed")?;

        let results = ctx.scans.find_by_job(&message.job_id).await?;
        print_results(&results);
        Ok(results)
    }
}

fn print_results(results: &[ScanResult]) {
    let failing = results.iter().filter(|r| !r.pass).count();

    output::summary_box(
        "Scan summary",
        &[
            ("Resources".to_string(), results.len().to_string()),
            ("Passing".to_string(), (results.len() - failing).to_string()),
            ("Failing".to_string(), failing.to_string()),
        ],
    );

    for result in results.iter().filter(|r| !r.pass) {
        output::list_item_colored(
            &format!(
                "{}/{}: {}",
                result.resource_type,
                result.resource_id,
                result.misconfiguration.join(", ")
            ),
            LabelColor::Yellow,
        );
    }
}

use crate::config::Settings;
use crate::context::StageContext;
use crate::output;
use crate::pipeline::{BatchSummary, handle_retrieval_batch};
use crate::queue::JobQueue;
use anyhow::{Context, Result};

pub struct RetrieveCommand;

impl RetrieveCommand {
    /// Retrieve configurations for each job message and forward it to the scan queue
    pub async fn execute(settings: &Settings, bodies: &[String]) -> Result<()> {
        let http = settings.http_client()?;
        let ctx = settings.federated_context(settings.file_store()?, &http)?;
        let queue = settings.scan_queue(&http)?;

        Self::run(&ctx, bodies, queue.as_ref()).await?;
        Ok(())
    }

    pub async fn run(ctx: &StageContext, bodies: &[String], scan_queue: &dyn JobQueue) -> Result<BatchSummary> {
        output::section("Retrieval");

        let summary = handle_retrieval_batch(ctx, bodies, scan_queue)
            .await
            .context("Retrieval failed")?;

        output::success_with_details(
            "Retrieval completed",
            &format!("{} processed, {} skipped", summary.processed, summary.skipped),
        );
        Ok(summary)
    }
}

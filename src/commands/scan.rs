use crate::config::Settings;
use crate::context::StageContext;
use crate::output;
use crate::pipeline::{BatchSummary, handle_scan_batch};
use anyhow::{Context, Result};

pub struct ScanCommand;

impl ScanCommand {
    /// Evaluate stored configurations for each job message
    pub async fn execute(settings: &Settings, bodies: &[String]) -> Result<()> {
        let http = settings.http_client()?;
        let ctx = settings.stage_context(settings.file_store()?, &http)?;

        Self::run(&ctx, bodies).await?;
        Ok(())
    }

    pub async fn run(ctx: &StageContext, bodies: &[String]) -> Result<BatchSummary> {
        output::section("Scan");

        let summary = handle_scan_batch(ctx, bodies).await.context("Scan failed")?;

        output::success_with_details(
            "Scan completed",
            &format!("{} processed, {} skipped", summary.processed, summary.skipped),
        );
        Ok(summary)
    }
}

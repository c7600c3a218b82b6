use crate::config::Settings;
use crate::context::StageContext;
use crate::model::{JobMessage, ScanTrigger};
use crate::output;
use crate::pipeline::handle_trigger;
use crate::queue::JobQueue;
use anyhow::{Context, Result};

pub struct DiscoverCommand;

impl DiscoverCommand {
    /// Discover the trigger's account and hand the job to the retrieval queue
    pub async fn execute(settings: &Settings, trigger: &ScanTrigger) -> Result<()> {
        let http = settings.http_client()?;
        let ctx = settings.federated_context(settings.file_store()?, &http)?;
        let queue = settings.retrieval_queue(&http)?;

        Self::run(&ctx, trigger, queue.as_ref()).await?;
        Ok(())
    }

    pub async fn run(ctx: &StageContext, trigger: &ScanTrigger, queue: &dyn JobQueue) -> Result<JobMessage> {
        output::section("Discovery");
        output::key_value("Client", &trigger.client_id);
        output::key_value("Account", &trigger.account_id);
        output::key_value("Provider", trigger.provider.as_str());

        let message = handle_trigger(ctx, trigger, queue)
            .await
            .with_context(|| format!("Discovery failed for account {}", trigger.account_id))?;

        output::success_with_details("Discovery completed", &format!("job {}", message.job_id));
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MockFederator;
    use crate::model::Provider;
    use crate::plugins::{MockPlugin, PluginRegistry};
    use crate::queue::MemoryQueue;
    use crate::store::{JobStore, MemoryStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_run_enqueues_job() {
        let store = Arc::new(MemoryStore::new());
        let mut plugins = PluginRegistry::new();
        plugins.register(Arc::new(MockPlugin::new("s3", Provider::Aws).discovering(&["bucket-a"])));
        let ctx = StageContext::new(store.clone())
            .with_plugins(plugins)
            .with_federator(Arc::new(MockFederator::aws()));
        let queue = MemoryQueue::new();
        let trigger = ScanTrigger {
            client_id: "client-1".to_string(),
            account_id: "123456789012".to_string(),
            client_email: "owner@example.com".to_string(),
            provider: Provider::Aws,
        };

        let message = DiscoverCommand::run(&ctx, &trigger, &queue).await.unwrap();

        assert_eq!(queue.len(), 1);
        assert!(store.find(&message.job_id).await.unwrap().unwrap().is_completed());
    }

    #[tokio::test]
    async fn test_run_reports_missing_federator() {
        let ctx = StageContext::new(Arc::new(MemoryStore::new()));
        let trigger = ScanTrigger {
            client_id: "client-1".to_string(),
            account_id: "my-project".to_string(),
            client_email: "owner@example.com".to_string(),
            provider: Provider::Gcp,
        };

        let err = DiscoverCommand::run(&ctx, &trigger, &MemoryQueue::new())
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("Provider GCP is not configured"));
    }
}

//! Process settings, read from flags with environment fallbacks.
//!
//! Everything here runs before any job work: a missing or malformed setting
//! aborts the command with a non-zero exit.

use crate::context::StageContext;
use crate::credentials::aws::DEFAULT_CROSS_ACCOUNT_ROLE;
use crate::credentials::{
    AwsCredentials, AwsRoleFederator, CachingFederator, CredentialFederator, GcpFederator, StsClient,
};
use crate::notify::{LogNotifier, Notifier, SmtpNotifier, SmtpSettings};
use crate::pipeline::RetryPolicy;
use crate::plugins::PluginRegistry;
use crate::queue::{JobQueue, SqsQueue, StdoutQueue};
use crate::store::{ConfigStore, FileStore, JobStore, PolicyStore, ScanStore};
use anyhow::{Context, Result, bail};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Args)]
pub struct Settings {
    /// Directory holding jobs, configurations, scan results and rule-sets
    #[arg(long, env = "WOZ_STORE_DIR", default_value = ".woz", global = true)]
    pub store_dir: PathBuf,

    /// Region for STS, S3 and SQS calls
    #[arg(long, env = "AWS_REGION", default_value = "us-east-1", global = true)]
    pub aws_region: String,

    /// Role the scanner assumes before entering client accounts
    #[arg(long, env = "WOZ_PROCESSING_ROLE_ARN", global = true)]
    pub processing_role_arn: Option<String>,

    /// Role name clients create in their accounts for the scanner
    #[arg(long, env = "WOZ_CROSS_ACCOUNT_ROLE", default_value = DEFAULT_CROSS_ACCOUNT_ROLE, global = true)]
    pub cross_account_role: String,

    /// Workload identity provider audience for AWS → GCP federation
    #[arg(long, env = "WOZ_GCP_AUDIENCE", global = true)]
    pub gcp_audience: Option<String>,

    /// Service account name impersonated in client projects
    #[arg(long, env = "WOZ_GCP_SERVICE_ACCOUNT", global = true)]
    pub gcp_service_account: Option<String>,

    /// SQS queue feeding the retrieval stage (stdout when unset)
    #[arg(long, env = "WOZ_RETRIEVAL_QUEUE_URL", global = true)]
    pub retrieval_queue_url: Option<String>,

    /// SQS queue feeding the scan stage (stdout when unset)
    #[arg(long, env = "WOZ_SCAN_QUEUE_URL", global = true)]
    pub scan_queue_url: Option<String>,

    /// SMTP relay; reports are only logged when unset
    #[arg(long, env = "SMTP_HOST", global = true)]
    pub smtp_host: Option<String>,

    #[arg(long, env = "SMTP_PORT", default_value_t = 587, global = true)]
    pub smtp_port: u16,

    #[arg(long, env = "SMTP_USER", global = true)]
    pub smtp_user: Option<String>,

    #[arg(long, env = "SMTP_PASSWORD", hide_env_values = true, global = true)]
    pub smtp_password: Option<String>,

    /// Sender address (defaults to the SMTP user)
    #[arg(long, env = "SMTP_FROM", global = true)]
    pub smtp_from: Option<String>,

    /// Bound on each credential and store call
    #[arg(long, env = "WOZ_OPERATION_TIMEOUT_SECS", default_value_t = 5, global = true)]
    pub operation_timeout_secs: u64,

    /// Bound on each outbound HTTP request
    #[arg(long, env = "WOZ_HTTP_TIMEOUT_SECS", default_value_t = 30, global = true)]
    pub http_timeout_secs: u64,

    /// Attempts per plugin call; 1 disables retry
    #[arg(long, env = "WOZ_RETRY_ATTEMPTS", default_value_t = 1, global = true)]
    pub retry_attempts: u32,

    #[arg(long, env = "WOZ_RETRY_DELAY_MS", default_value_t = 500, global = true)]
    pub retry_delay_ms: u64,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.operation_timeout_secs == 0 {
            bail!("Operation timeout must be at least one second");
        }
        if self.http_timeout_secs == 0 {
            bail!("HTTP timeout must be at least one second");
        }
        if self.retry_attempts == 0 {
            bail!("Retry attempts must be at least 1");
        }
        if self.aws_region.trim().is_empty() {
            bail!("AWS region must not be empty");
        }
        Ok(())
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn http_client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(self.http_timeout_secs))
            .user_agent(concat!("woz-scanner/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")
    }

    /// Open the on-disk store, creating its directories
    pub fn file_store(&self) -> Result<Arc<FileStore>> {
        let store = FileStore::new(&self.store_dir);
        store
            .init()
            .with_context(|| format!("Failed to initialise store at {}", self.store_dir.display()))?;
        Ok(Arc::new(store))
    }

    pub fn smtp_settings(&self) -> Result<Option<SmtpSettings>> {
        let Some(host) = &self.smtp_host else {
            return Ok(None);
        };
        let (Some(username), Some(password)) = (&self.smtp_user, &self.smtp_password) else {
            bail!("SMTP_USER and SMTP_PASSWORD are required when SMTP_HOST is set");
        };

        Ok(Some(SmtpSettings {
            host: host.clone(),
            port: self.smtp_port,
            username: username.clone(),
            password: password.clone(),
            from: self.smtp_from.clone(),
        }))
    }

    pub fn notifier(&self) -> Result<Arc<dyn Notifier>> {
        match self.smtp_settings()? {
            Some(smtp) => {
                let notifier = SmtpNotifier::new(&smtp).context("Failed to configure SMTP notifier")?;
                Ok(Arc::new(notifier))
            }
            None => Ok(Arc::new(LogNotifier)),
        }
    }

    /// Build the federators for every configured provider.
    ///
    /// AWS needs the processing role and ambient credentials; GCP is added
    /// when both its audience and service account are set.
    pub fn federators(&self, http: &reqwest::Client) -> Result<Vec<Arc<dyn CredentialFederator>>> {
        let Some(processing_role_arn) = &self.processing_role_arn else {
            bail!("WOZ_PROCESSING_ROLE_ARN is required to obtain client credentials");
        };
        let ambient = AwsCredentials::from_env().context("Missing processing identity")?;
        let sts = StsClient::new(http.clone(), &self.aws_region)?;
        let aws = Arc::new(AwsRoleFederator::new(
            sts,
            ambient,
            processing_role_arn,
            &self.cross_account_role,
        ));

        let mut federators: Vec<Arc<dyn CredentialFederator>> =
            vec![Arc::new(CachingFederator::new(aws.clone()))];

        match (&self.gcp_audience, &self.gcp_service_account) {
            (Some(audience), Some(service_account)) => {
                let gcp = GcpFederator::new(aws, audience, service_account);
                federators.push(Arc::new(CachingFederator::new(Arc::new(gcp))));
            }
            (None, None) => {}
            _ => bail!("WOZ_GCP_AUDIENCE and WOZ_GCP_SERVICE_ACCOUNT must be set together"),
        }

        Ok(federators)
    }

    fn queue(&self, url: Option<&str>, http: &reqwest::Client) -> Result<Arc<dyn JobQueue>> {
        match url {
            Some(url) => {
                let credentials = AwsCredentials::from_env().context("Missing processing identity")?;
                let queue = SqsQueue::new(http.clone(), credentials, &self.aws_region, url)?;
                Ok(Arc::new(queue))
            }
            None => Ok(Arc::new(StdoutQueue)),
        }
    }

    pub fn retrieval_queue(&self, http: &reqwest::Client) -> Result<Arc<dyn JobQueue>> {
        self.queue(self.retrieval_queue_url.as_deref(), http)
    }

    pub fn scan_queue(&self, http: &reqwest::Client) -> Result<Arc<dyn JobQueue>> {
        self.queue(self.scan_queue_url.as_deref(), http)
    }

    /// Context with the default plugins, the configured notifier, timeout and
    /// retry policy, and no federators
    pub fn stage_context<S>(&self, store: Arc<S>, http: &reqwest::Client) -> Result<StageContext>
    where
        S: JobStore + ConfigStore + ScanStore + PolicyStore + 'static,
    {
        self.validate()?;

        Ok(StageContext::new(store)
            .with_plugins(PluginRegistry::with_defaults(http.clone(), &self.aws_region))
            .with_notifier(self.notifier()?)
            .with_operation_timeout(self.operation_timeout())
            .with_retry(self.retry_policy()))
    }

    /// [`Settings::stage_context`] plus every configured federator
    pub fn federated_context<S>(&self, store: Arc<S>, http: &reqwest::Client) -> Result<StageContext>
    where
        S: JobStore + ConfigStore + ScanStore + PolicyStore + 'static,
    {
        let ctx = self.stage_context(store, http)?;
        Ok(self
            .federators(http)?
            .into_iter()
            .fold(ctx, |ctx, federator| ctx.with_federator(federator)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Provider;
    use crate::store::MemoryStore;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        settings: Settings,
    }

    fn parse(args: &[&str]) -> Settings {
        let mut argv = vec!["woz"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).unwrap().settings
    }

    #[test]
    fn test_flags_override_defaults() {
        let settings = parse(&[
            "--store-dir",
            "/tmp/woz",
            "--operation-timeout-secs",
            "9",
            "--retry-attempts",
            "3",
        ]);

        assert_eq!(settings.store_dir, PathBuf::from("/tmp/woz"));
        assert_eq!(settings.operation_timeout(), Duration::from_secs(9));
        assert_eq!(settings.retry_policy().attempts, 3);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_zero_retry_attempts_is_invalid() {
        let settings = parse(&["--retry-attempts", "0"]);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_smtp_requires_credentials() {
        let settings = parse(&["--smtp-host", "smtp.example.com", "--smtp-user", "u"]);
        let err = settings.smtp_settings().unwrap_err();
        assert!(err.to_string().contains("SMTP_PASSWORD"));
    }

    #[test]
    fn test_smtp_settings_from_flags() {
        let settings = parse(&[
            "--smtp-host",
            "smtp.example.com",
            "--smtp-port",
            "2525",
            "--smtp-user",
            "scanner@example.com",
            "--smtp-password",
            "secret",
        ]);

        let smtp = settings.smtp_settings().unwrap().unwrap();
        assert_eq!(smtp.port, 2525);
        assert_eq!(smtp.username, "scanner@example.com");
    }

    #[test]
    fn test_gcp_settings_must_be_paired() {
        let settings = parse(&[
            "--processing-role-arn",
            "arn:aws:iam::111111111111:role/processing",
            "--gcp-audience",
            "//iam.googleapis.com/projects/1/locations/global/workloadIdentityPools/p/providers/aws",
        ]);
        let http = reqwest::Client::new();

        // Fails on the missing service account or the missing ambient identity
        assert!(settings.federators(&http).is_err());
    }

    #[test]
    fn test_federators_need_processing_role() {
        let settings = parse(&[]);
        let err = settings.federators(&reqwest::Client::new()).err().unwrap();
        assert!(err.to_string().contains("WOZ_PROCESSING_ROLE_ARN"));
    }

    #[test]
    fn test_stage_context_has_default_plugins() {
        let settings = parse(&["--operation-timeout-secs", "2"]);
        let http = settings.http_client().unwrap();

        let ctx = settings
            .stage_context(Arc::new(MemoryStore::new()), &http)
            .unwrap();

        assert!(ctx.plugins.has("s3"));
        assert!(ctx.plugins.has("gcs"));
        assert_eq!(ctx.operation_timeout, Duration::from_secs(2));
        assert!(ctx.federator(Provider::Aws).is_err());
    }
}

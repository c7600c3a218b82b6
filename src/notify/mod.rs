//! Client notifications about failing scan results.
//!
//! Notification is fire-and-forget: a failed send is logged and never
//! reported back to the scan stage.

pub mod smtp;

pub use smtp::{SmtpNotifier, SmtpSettings};

use crate::model::ScanResult;
use async_trait::async_trait;
use handlebars::{Handlebars, Helper, HelperResult, Output, RenderContext};
use serde_json::json;
use std::fmt;
use tracing::{debug, info};

const SCAN_REPORT_TEMPLATE: &str = include_str!("scan_report.hbs");

/// Errors raised while building or sending a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    Template(String),
    Address(String),
    Transport(String),
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyError::Template(msg) => write!(f, "Failed to render notification: {}", msg),
            NotifyError::Address(msg) => write!(f, "Invalid email address: {}", msg),
            NotifyError::Transport(msg) => write!(f, "Failed to send notification: {}", msg),
        }
    }
}

impl std::error::Error for NotifyError {}

/// Rendered notification for the failing results of one resource type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub subject: String,
    pub html: String,
}

impl ScanReport {
    pub fn subject_for(resource_type: &str) -> String {
        format!("Security scan failed for resource type {}", resource_type)
    }

    /// Render the report; passing results are left out
    pub fn render(results: &[ScanResult], resource_type: &str) -> Result<Self, NotifyError> {
        let failing: Vec<&ScanResult> = results.iter().filter(|r| !r.pass).collect();
        let subject = Self::subject_for(resource_type);

        let first = failing.first();
        let data = json!({
            "subject": subject,
            "resource_type": resource_type,
            "account_id": first.map(|r| r.account_id.as_str()).unwrap_or_default(),
            "provider": first.map(|r| r.provider.as_str()).unwrap_or_default(),
            "job_id": first.map(|r| r.job_id.to_string()).unwrap_or_default(),
            "count": failing.len(),
            "results": failing,
        });

        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_helper("join", Box::new(join_helper));

        let html = handlebars
            .render_template(SCAN_REPORT_TEMPLATE, &data)
            .map_err(|e| NotifyError::Template(e.to_string()))?;

        Ok(Self { subject, html })
    }
}

/// Join an array of strings with a separator
fn join_helper(
    h: &Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut RenderContext,
    out: &mut dyn Output,
) -> HelperResult {
    let items = h.param(0).and_then(|v| v.value().as_array());
    let separator = h.param(1).and_then(|v| v.value().as_str()).unwrap_or(", ");

    if let Some(items) = items {
        let joined = items
            .iter()
            .filter_map(|item| item.as_str())
            .collect::<Vec<_>>()
            .join(separator);
        out.write(&handlebars::html_escape(&joined))?;
    }

    Ok(())
}

/// Delivers scan reports to clients
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send one report covering `failing`; errors are logged, never returned
    async fn notify(&self, recipient: &str, resource_type: &str, failing: &[ScanResult]);
}

/// Logs reports instead of sending them
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, recipient: &str, resource_type: &str, failing: &[ScanResult]) {
        match ScanReport::render(failing, resource_type) {
            Ok(report) => {
                info!(
                    recipient = %recipient,
                    resource_type = %resource_type,
                    failing = failing.len(),
                    subject = %report.subject,
                    "Scan report (not sent, SMTP not configured)"
                );
                debug!(html = %report.html, "Scan report body");
            }
            Err(e) => tracing::warn!(error = %e, "Failed to render scan report"),
        }
    }
}

/// Captures every notification for assertions
#[cfg(test)]
#[derive(Default)]
pub struct RecordingNotifier {
    sent: std::sync::Mutex<Vec<(String, String, Vec<ScanResult>)>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// (recipient, resource type, results) per notification
    pub fn sent(&self) -> Vec<(String, String, Vec<ScanResult>)> {
        self.sent.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, recipient: &str, resource_type: &str, failing: &[ScanResult]) {
        self.sent.lock().unwrap().push((
            recipient.to_string(),
            resource_type.to_string(),
            failing.to_vec(),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConfigDocument, DiscoveryJob, Provider, ResourceConfig, ScanStatus};

    fn result(id: &str, violations: &[&str]) -> ScanResult {
        let job = DiscoveryJob::new("client-1", "123456789012", Provider::Aws);
        let config = ResourceConfig::for_job(&job, "s3", id, ConfigDocument::new());
        ScanResult::from_evaluation(
            &config,
            ScanStatus::Completed,
            violations.iter().map(|v| v.to_string()).collect(),
        )
    }

    #[test]
    fn test_report_lists_only_failing_results() {
        let results = vec![
            result("bucket-a", &["public-read", "no-encryption"]),
            result("bucket-ok", &[]),
        ];

        let report = ScanReport::render(&results, "s3").unwrap();

        assert_eq!(report.subject, "Security scan failed for resource type s3");
        assert!(report.html.contains("bucket-a"));
        assert!(report.html.contains("no-encryption, public-read"));
        assert!(report.html.contains("123456789012"));
        assert!(report.html.contains("1 resource violating"));
        assert!(!report.html.contains("bucket-ok"));
    }

    #[test]
    fn test_report_escapes_names() {
        let results = vec![result("<script>", &["a&b"])];

        let report = ScanReport::render(&results, "s3").unwrap();
        assert!(!report.html.contains("<script>"));
        assert!(report.html.contains("a&amp;b"));
    }

    #[tokio::test]
    async fn test_recording_notifier() {
        let notifier = RecordingNotifier::new();
        let failing = vec![result("bucket-a", &["public-read"])];

        notifier.notify("owner@example.com", "s3", &failing).await;

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "owner@example.com");
        assert_eq!(sent[0].1, "s3");
    }

    #[tokio::test]
    async fn test_log_notifier_never_fails() {
        LogNotifier
            .notify("owner@example.com", "s3", &[result("bucket-a", &["x"])])
            .await;
    }
}

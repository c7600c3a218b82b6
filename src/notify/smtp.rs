use super::{Notifier, NotifyError, ScanReport};
use crate::model::ScanResult;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{info, warn};

/// SMTP relay connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Sender address; defaults to the username
    pub from: Option<String>,
}

/// Sends scan reports as HTML mail through a STARTTLS relay
pub struct SmtpNotifier {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpNotifier {
    pub fn new(settings: &SmtpSettings) -> Result<Self, NotifyError> {
        let from_address = settings.from.as_deref().unwrap_or(&settings.username);
        let from: Mailbox = from_address
            .parse()
            .map_err(|e| NotifyError::Address(format!("{}: {}", from_address, e)))?;

        let credentials = Credentials::new(settings.username.clone(), settings.password.clone());
        let mailer = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
            .map_err(|e| NotifyError::Transport(format!("SMTP relay error: {}", e)))?
            .port(settings.port)
            .credentials(credentials)
            .build();

        Ok(Self { mailer, from })
    }

    /// Build the mail for a report
    pub fn compose(&self, recipient: &str, report: &ScanReport) -> Result<Message, NotifyError> {
        let to: Mailbox = recipient
            .parse()
            .map_err(|e| NotifyError::Address(format!("{}: {}", recipient, e)))?;

        Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(report.subject.clone())
            .header(ContentType::TEXT_HTML)
            .body(report.html.clone())
            .map_err(|e| NotifyError::Template(format!("Failed to build email: {}", e)))
    }

    async fn send(&self, recipient: &str, resource_type: &str, failing: &[ScanResult]) -> Result<(), NotifyError> {
        let report = ScanReport::render(failing, resource_type)?;
        let message = self.compose(recipient, &report)?;

        self.mailer
            .send(message)
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, recipient: &str, resource_type: &str, failing: &[ScanResult]) {
        match self.send(recipient, resource_type, failing).await {
            Ok(()) => info!(
                recipient = %recipient,
                resource_type = %resource_type,
                failing = failing.len(),
                "Sent scan report"
            ),
            Err(e) => warn!(
                recipient = %recipient,
                resource_type = %resource_type,
                error = %e,
                "Failed to send scan report"
            ),
        }
    }
}

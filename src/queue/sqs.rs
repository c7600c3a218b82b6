use super::{JobQueue, QueueError, QueueResult};
use crate::credentials::AwsCredentials;
use crate::credentials::sigv4::{signed_request, RequestSigner};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;
use url::Url;

#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    #[serde(rename = "MessageId")]
    message_id: String,
}

/// Amazon SQS queue addressed by URL, using the JSON protocol
pub struct SqsQueue {
    http: reqwest::Client,
    credentials: AwsCredentials,
    region: String,
    queue_url: String,
    endpoint: Url,
}

impl SqsQueue {
    pub fn new(
        http: reqwest::Client,
        credentials: AwsCredentials,
        region: &str,
        queue_url: &str,
    ) -> QueueResult<Self> {
        let parsed = Url::parse(queue_url)
            .map_err(|e| QueueError::Encode(format!("Invalid queue URL '{}': {}", queue_url, e)))?;
        let mut endpoint = parsed.clone();
        endpoint.set_path("/");
        endpoint.set_query(None);

        Ok(Self {
            http,
            credentials,
            region: region.to_string(),
            queue_url: queue_url.to_string(),
            endpoint,
        })
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

#[async_trait]
impl JobQueue for SqsQueue {
    async fn send_raw(&self, body: &str) -> QueueResult<()> {
        let payload = serde_json::json!({
            "QueueUrl": self.queue_url,
            "MessageBody": body,
        })
        .to_string();

        let signer = RequestSigner::new(&self.credentials, &self.region, "sqs");
        let response = signed_request(
            &self.http,
            &signer,
            reqwest::Method::POST,
            self.endpoint.clone(),
            &[
                ("content-type", "application/x-amz-json-1.0"),
                ("x-amz-target", "AmazonSQS.SendMessage"),
            ],
            payload.into_bytes(),
        )
        .send()
        .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(QueueError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        let sent: SendMessageResponse = serde_json::from_str(&text)
            .map_err(|e| QueueError::Http(format!("Unreadable SendMessage response: {}", e)))?;
        info!(queue_url = %self.queue_url, message_id = %sent.message_id, "Sent message");
        Ok(())
    }
}

//! Hand-off of job descriptors between stages.

pub mod sqs;

pub use sqs::SqsQueue;

use crate::model::JobMessage;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

/// Errors raised while enqueueing a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Transport failure or timeout
    Http(String),

    /// The queue service refused the message
    Rejected { status: u16, body: String },

    /// The message could not be encoded
    Encode(String),
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Http(msg) => write!(f, "Queue request failed: {}", msg),
            QueueError::Rejected { status, body } => {
                write!(f, "Queue rejected the message ({}): {}", status, body)
            }
            QueueError::Encode(msg) => write!(f, "Failed to encode message: {}", msg),
        }
    }
}

impl std::error::Error for QueueError {}

impl From<reqwest::Error> for QueueError {
    fn from(err: reqwest::Error) -> Self {
        QueueError::Http(err.to_string())
    }
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Destination for job descriptors
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue a raw message body as-is
    async fn send_raw(&self, body: &str) -> QueueResult<()>;

    /// Enqueue a job descriptor
    async fn send(&self, message: &JobMessage) -> QueueResult<()> {
        let body = message
            .to_json()
            .map_err(|e| QueueError::Encode(e.to_string()))?;
        self.send_raw(&body).await
    }
}

/// In-process FIFO queue
#[derive(Default)]
pub struct MemoryQueue {
    messages: Mutex<VecDeque<String>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every queued message body, oldest first
    pub fn drain(&self) -> Vec<String> {
        match self.messages.lock() {
            Ok(mut messages) => messages.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn send_raw(&self, body: &str) -> QueueResult<()> {
        match self.messages.lock() {
            Ok(mut messages) => messages.push_back(body.to_string()),
            Err(poisoned) => poisoned.into_inner().push_back(body.to_string()),
        }
        Ok(())
    }
}

/// Prints each message on its own line, for piping one stage into the next
pub struct StdoutQueue;

#[async_trait]
impl JobQueue for StdoutQueue {
    async fn send_raw(&self, body: &str) -> QueueResult<()> {
        println!("{}", body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DiscoveryJob, Provider};

    #[tokio::test]
    async fn test_memory_queue_is_fifo() {
        let queue = MemoryQueue::new();
        queue.send_raw("first").await.unwrap();
        queue.send_raw("second").await.unwrap();

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain(), vec!["first", "second"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_send_encodes_descriptor() {
        let queue = MemoryQueue::new();
        let job = DiscoveryJob::new("client-1", "123456789012", Provider::Gcp);
        let message = JobMessage::for_job(&job, "owner@example.com");

        queue.send(&message).await.unwrap();

        let body = queue.drain().remove(0);
        assert_eq!(JobMessage::from_json(&body).unwrap(), message);
    }
}

//! Send side: chunking plus per-frame timeout and retry.

use std::future::Future;
use std::io;
use std::time::Duration;

use crate::config::TransportConfig;
use crate::observability::metrics;
use crate::resilience::RetryPolicy;
use crate::transport::frame::split_message;
use crate::transport::{TransportError, TransportResult};

/// Something that can put one encoded frame on the link.
pub trait FrameSink: Send + Sync {
    fn write_frame(&self, frame: &[u8]) -> impl Future<Output = io::Result<()>> + Send;
}

pub struct FramedSender<S> {
    sink: S,
    chunk_size: usize,
    write_timeout: Duration,
    retry: RetryPolicy,
}

impl<S: FrameSink> FramedSender<S> {
    pub fn new(sink: S, config: &TransportConfig) -> Self {
        Self {
            sink,
            chunk_size: config.chunk_size,
            write_timeout: Duration::from_millis(config.write_timeout_ms),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_ms: config.retry_base_delay_ms,
                max_ms: config.retry_max_delay_ms,
            },
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Chunk and send `payload`. Returns the message id used.
    pub async fn send(&self, payload: &[u8]) -> TransportResult<String> {
        let id = uuid::Uuid::new_v4().to_string();
        for frame in split_message(&id, payload, self.chunk_size) {
            self.write_with_retry(&frame.to_bytes()?).await?;
        }
        tracing::trace!(message_id = %id, bytes = payload.len(), "Message sent");
        Ok(id)
    }

    async fn write_with_retry(&self, bytes: &[u8]) -> TransportResult<()> {
        let mut last_error = String::new();

        for attempt in 0..=self.retry.max_retries {
            if attempt > 0 {
                metrics::record_frame_retry();
                tokio::time::sleep(self.retry.delay(attempt)).await;
            }

            match tokio::time::timeout(self.write_timeout, self.sink.write_frame(bytes)).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => {
                    tracing::warn!(attempt, error = %e, "Frame write failed");
                    last_error = e.to_string();
                }
                Err(_) => {
                    tracing::warn!(attempt, timeout_ms = self.write_timeout.as_millis() as u64, "Frame write timed out");
                    last_error = format!("timed out after {:?}", self.write_timeout);
                }
            }
        }

        Err(TransportError::RetriesExhausted {
            attempts: self.retry.max_retries + 1,
            last_error,
        })
    }
}

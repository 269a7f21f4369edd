//! Receive-side reassembly of chunked messages.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use zeroize::Zeroizing;

use crate::config::TransportConfig;
use crate::transport::frame::{raw_chunk_len, Frame};
use crate::transport::{TransportError, TransportResult};

#[derive(Debug, Clone, Copy)]
pub struct ReassemblyLimits {
    pub timeout: Duration,
    pub max_message_bytes: usize,
    pub max_pending: usize,
    pub chunk_size: usize,
}

impl From<&TransportConfig> for ReassemblyLimits {
    fn from(config: &TransportConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.reassembly_timeout_secs),
            max_message_bytes: config.max_message_bytes,
            max_pending: config.max_pending_messages,
            chunk_size: config.chunk_size,
        }
    }
}

impl ReassemblyLimits {
    fn max_chunks(&self) -> u32 {
        let per_chunk = raw_chunk_len(self.chunk_size);
        (self.max_message_bytes.div_ceil(per_chunk) as u32).max(1)
    }
}

struct MessageAssembly {
    chunks: Vec<Option<Zeroizing<Vec<u8>>>>,
    received: usize,
    bytes: usize,
    end_seen: bool,
    deadline: Instant,
}

impl MessageAssembly {
    fn is_complete(&self) -> bool {
        self.end_seen && self.received == self.chunks.len()
    }

    fn concat(self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(self.bytes));
        for chunk in self.chunks.into_iter().flatten() {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

/// Buffers chunk frames per message id until every index and the end
/// frame have arrived. Partial buffers are wiped when dropped.
pub struct Reassembler {
    limits: ReassemblyLimits,
    assemblies: HashMap<String, MessageAssembly>,
}

impl Reassembler {
    pub fn new(limits: ReassemblyLimits) -> Self {
        Self {
            limits,
            assemblies: HashMap::new(),
        }
    }

    /// Partial messages currently buffered.
    pub fn pending(&self) -> usize {
        self.assemblies.len()
    }

    /// Earliest deadline among buffered messages.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.assemblies.values().map(|a| a.deadline).min()
    }

    /// Drop every assembly past its deadline. Returns how many were dropped.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.assemblies.len();
        self.assemblies.retain(|id, assembly| {
            let keep = now < assembly.deadline;
            if !keep {
                tracing::debug!(message_id = %id, received = assembly.received, "Discarding incomplete message");
            }
            keep
        });
        before - self.assemblies.len()
    }

    /// Feed one frame. Returns the full message once complete.
    pub fn accept(&mut self, frame: Frame, now: Instant) -> TransportResult<Option<Zeroizing<Vec<u8>>>> {
        self.purge_expired(now);

        match frame {
            Frame::Chunk {
                id,
                index,
                count,
                data,
            } => {
                if count == 0 || index >= count {
                    return Err(TransportError::Malformed(format!(
                        "chunk index {} out of range for count {}",
                        index, count
                    )));
                }
                if count > self.limits.max_chunks() {
                    return Err(TransportError::TooLarge {
                        limit: self.limits.max_message_bytes,
                    });
                }
                let bytes = Zeroizing::new(
                    STANDARD
                        .decode(data.as_bytes())
                        .map_err(|_| TransportError::Malformed("chunk data is not base64".to_string()))?,
                );
                if bytes.len() > raw_chunk_len(self.limits.chunk_size) {
                    return Err(TransportError::Malformed("chunk exceeds frame size".to_string()));
                }

                if !self.assemblies.contains_key(&id) && self.assemblies.len() >= self.limits.max_pending {
                    return Err(TransportError::TooManyPending);
                }
                let deadline = now + self.limits.timeout;
                let assembly = self.assemblies.entry(id.clone()).or_insert_with(|| MessageAssembly {
                    chunks: (0..count).map(|_| None).collect(),
                    received: 0,
                    bytes: 0,
                    end_seen: false,
                    deadline,
                });

                if assembly.chunks.len() != count as usize {
                    self.assemblies.remove(&id);
                    return Err(TransportError::Malformed(format!(
                        "inconsistent chunk count for message {}",
                        id
                    )));
                }

                // Retransmitted chunks are ignored; the first copy wins.
                let slot = &mut assembly.chunks[index as usize];
                if slot.is_none() {
                    assembly.bytes += bytes.len();
                    assembly.received += 1;
                    *slot = Some(bytes);
                }

                if assembly.bytes > self.limits.max_message_bytes {
                    self.assemblies.remove(&id);
                    return Err(TransportError::TooLarge {
                        limit: self.limits.max_message_bytes,
                    });
                }

                Ok(self.take_if_complete(&id))
            }
            Frame::End { id } => {
                let assembly = self
                    .assemblies
                    .get_mut(&id)
                    .ok_or_else(|| TransportError::UnknownMessage(id.clone()))?;
                assembly.end_seen = true;
                Ok(self.take_if_complete(&id))
            }
        }
    }

    fn take_if_complete(&mut self, id: &str) -> Option<Zeroizing<Vec<u8>>> {
        if self.assemblies.get(id).is_some_and(|a| a.is_complete()) {
            self.assemblies.remove(id).map(MessageAssembly::concat)
        } else {
            None
        }
    }
}

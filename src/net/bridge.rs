//! TCP bridge for an external wireless adapter.
//!
//! # Responsibilities
//! - Bind to the configured address and accept adapter connections
//! - Enforce `max_connections` via semaphore
//! - Read a hello line naming the device, then newline-delimited frames
//! - Run one [`DeviceLink`] per connection
//!
//! # Wire Format
//! ```text
//! adapter → relay: {"deviceId":"<id>"}\n  then one frame JSON per line
//! relay → adapter: one frame JSON per line
//! ```

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Deserialize;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex, Semaphore};

use crate::config::{ListenerConfig, TransportConfig};
use crate::intake::IntakeGate;
use crate::lifecycle::Shutdown;
use crate::net::link::DeviceLink;
use crate::session::device::is_valid_device_id;
use crate::session::SessionManager;
use crate::transport::FrameSink;

const HELLO_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_LINE_BYTES: usize = 4096;
const INBOUND_QUEUE: usize = 64;

/// Error type for bridge operations.
#[derive(Debug)]
pub enum BridgeError {
    /// Failed to bind to address.
    Bind(io::Error),
    /// Failed to accept connection.
    Accept(io::Error),
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::Bind(e) => write!(f, "Failed to bind: {}", e),
            BridgeError::Accept(e) => write!(f, "Failed to accept: {}", e),
        }
    }
}

impl std::error::Error for BridgeError {}

/// Everything a link needs, shared by all connections.
#[derive(Clone)]
pub struct LinkContext {
    pub sessions: Arc<SessionManager>,
    pub gate: Arc<IntakeGate>,
    pub transport: TransportConfig,
    /// Devices with a live connection, to refuse a second one.
    active: Arc<DashMap<String, SocketAddr>>,
}

impl LinkContext {
    pub fn new(sessions: Arc<SessionManager>, gate: Arc<IntakeGate>, transport: TransportConfig) -> Self {
        Self {
            sessions,
            gate,
            transport,
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn active_links(&self) -> usize {
        self.active.len()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Hello {
    device_id: String,
}

/// Writes each frame as one line.
pub struct LineSink<W> {
    writer: Mutex<W>,
}

impl<W> LineSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> FrameSink for LineSink<W> {
    async fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(frame).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    }
}

/// Read one line of at most [`MAX_LINE_BYTES`]. `Ok(None)` on EOF.
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_LINE_BYTES as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if n > MAX_LINE_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
    }
    Ok(Some(buf))
}

/// A bounded TCP listener feeding device links.
pub struct FrameBridge {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

impl FrameBridge {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, BridgeError> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|e| BridgeError::Bind(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

        let listener = TcpListener::bind(addr).await.map_err(BridgeError::Bind)?;
        let local_addr = listener.local_addr().map_err(BridgeError::Bind)?;

        tracing::info!(
            address = %local_addr,
            max_connections = config.max_connections,
            "Frame bridge bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, io::Error> {
        self.inner.local_addr()
    }

    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Accept connections until shutdown. Waits for a free slot before
    /// accepting, so excess adapters queue in the kernel backlog.
    pub async fn serve(self, ctx: LinkContext, shutdown: Arc<Shutdown>) -> Result<(), BridgeError> {
        let mut stop = shutdown.subscribe();

        loop {
            let permit = tokio::select! {
                _ = stop.recv() => break,
                permit = self.connection_limit.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer) = tokio::select! {
                _ = stop.recv() => break,
                accepted = self.inner.accept() => accepted.map_err(BridgeError::Accept)?,
            };

            tracing::debug!(
                peer_addr = %peer,
                available_permits = self.connection_limit.available_permits(),
                "Adapter connection accepted"
            );

            let ctx = ctx.clone();
            let link_shutdown = shutdown.subscribe();
            tokio::spawn(async move {
                handle_connection(stream, peer, ctx, link_shutdown).await;
                drop(permit);
            });
        }

        tracing::info!("Frame bridge stopped accepting");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: LinkContext,
    shutdown: broadcast::Receiver<()>,
) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let hello = match tokio::time::timeout(HELLO_TIMEOUT, read_line(&mut reader)).await {
        Ok(Ok(Some(line))) => serde_json::from_slice::<Hello>(&line).ok(),
        _ => None,
    };
    let Some(device_id) = hello.map(|h| h.device_id).filter(|id| is_valid_device_id(id)) else {
        tracing::warn!(peer_addr = %peer, "Adapter sent no valid hello");
        let _ = write_half.write_all(b"{\"type\":\"error\",\"message\":\"invalid hello\"}\n").await;
        return;
    };

    let already_linked = match ctx.active.entry(device_id.clone()) {
        Entry::Occupied(_) => true,
        Entry::Vacant(slot) => {
            slot.insert(peer);
            false
        }
    };
    if already_linked {
        tracing::warn!(peer_addr = %peer, device = %device_id, "Device already linked");
        let _ = write_half.write_all(b"{\"type\":\"error\",\"message\":\"device already linked\"}\n").await;
        return;
    }

    let (frames_tx, frames_rx) = mpsc::channel(INBOUND_QUEUE);
    let reader_device = device_id.clone();
    let reader_task = tokio::spawn(async move {
        loop {
            match read_line(&mut reader).await {
                Ok(Some(line)) if line.is_empty() => continue,
                Ok(Some(line)) => {
                    if frames_tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(device = %reader_device, error = %e, "Adapter read failed");
                    break;
                }
            }
        }
    });

    let link = DeviceLink::new(
        device_id.clone(),
        ctx.sessions.clone(),
        ctx.gate.clone(),
        LineSink::new(write_half),
        &ctx.transport,
    );
    let end = link.run(frames_rx, shutdown).await;

    reader_task.abort();
    ctx.active.remove(&device_id);
    tracing::debug!(peer_addr = %peer, device = %device_id, reason = ?end, "Adapter connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_line_limits() {
        let input = b"{\"deviceId\":\"abc\"}\r\nsecond\n".to_vec();
        let mut reader = BufReader::new(input.as_slice());
        assert_eq!(read_line(&mut reader).await.unwrap().unwrap(), b"{\"deviceId\":\"abc\"}");
        assert_eq!(read_line(&mut reader).await.unwrap().unwrap(), b"second");
        assert!(read_line(&mut reader).await.unwrap().is_none());

        let long = vec![b'a'; MAX_LINE_BYTES + 10];
        let mut reader = BufReader::new(long.as_slice());
        assert!(read_line(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_line_sink_appends_newline() {
        let sink = LineSink::new(Vec::new());
        sink.write_frame(b"{\"type\":\"end\",\"id\":\"m\"}").await.unwrap();
        let written = sink.writer.into_inner();
        assert_eq!(written, b"{\"type\":\"end\",\"id\":\"m\"}\n");
    }
}

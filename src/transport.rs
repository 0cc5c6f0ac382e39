//! Byte-stream connection used by a session.
//!
//! Every read carries a timeout. A timeout is reported as
//! [`TransportError::Timeout`] and leaves any partially received bytes
//! buffered, so the caller can poll again without losing stream alignment.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, trace};

const READ_CHUNK: usize = 32 * 1024;

#[derive(Debug)]
pub enum TransportError {
    /// Nothing arrived in time; try again.
    Timeout,
    /// The peer closed the connection or it was closed locally.
    Closed,
    Io(std::io::Error),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Timeout => write!(f, "timed out"),
            TransportError::Closed => write!(f, "connection closed"),
            TransportError::Io(e) => write!(f, "socket error: {}", e),
        }
    }
}

impl std::error::Error for TransportError {}

#[async_trait]
pub trait Connection: Send {
    /// Read exactly `n` bytes or fail with a timeout/closed condition.
    async fn read(&mut self, n: usize, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    async fn write(&mut self, buf: &[u8], timeout: Duration) -> Result<(), TransportError>;

    async fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Adapts any tokio stream (TCP socket, in-memory duplex) to [`Connection`].
pub struct StreamConnection<S> {
    stream: S,
    buffer: Vec<u8>,
    scratch: Vec<u8>,
    open: bool,
    peer: String,
}

impl<S> StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, peer: impl Into<String>) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
            scratch: vec![0u8; READ_CHUNK],
            open: true,
            peer: peer.into(),
        }
    }
}

#[async_trait]
impl<S> Connection for StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn read(&mut self, n: usize, wait: Duration) -> Result<Vec<u8>, TransportError> {
        let deadline = Instant::now() + wait;
        while self.buffer.len() < n {
            if !self.open {
                return Err(TransportError::Closed);
            }
            // A single read() is cancel safe: nothing is lost if the deadline fires.
            match timeout_at(deadline, self.stream.read(&mut self.scratch)).await {
                Err(_) => return Err(TransportError::Timeout),
                Ok(Ok(0)) => {
                    debug!("{} closed the connection", self.peer);
                    self.open = false;
                    return Err(TransportError::Closed);
                }
                Ok(Ok(k)) => {
                    trace!("read {} bytes from {}", k, self.peer);
                    self.buffer.extend_from_slice(&self.scratch[..k]);
                }
                Ok(Err(e)) => {
                    self.open = false;
                    return Err(TransportError::Io(e));
                }
            }
        }
        Ok(self.buffer.drain(..n).collect())
    }

    async fn write(&mut self, buf: &[u8], wait: Duration) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let result = timeout(wait, async {
            self.stream.write_all(buf).await?;
            self.stream.flush().await
        })
        .await;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.open = false;
                Err(TransportError::Io(e))
            }
            Err(_) => {
                // A partial write leaves the frame stream unusable.
                self.open = false;
                Err(TransportError::Timeout)
            }
        }
    }

    async fn close(&mut self) {
        if self.open {
            let _ = self.stream.shutdown().await;
            self.open = false;
            debug!("closed connection to {}", self.peer);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

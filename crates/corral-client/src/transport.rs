//! Framed transport over an ordered byte stream
//!
//! The controller connection is any `AsyncRead + AsyncWrite` (TCP in
//! production, an in-memory duplex in tests) wrapped in [`FrameCodec`]. The
//! read half feeds the splitter; the write half is shared by every virtual
//! channel through a [`FrameSender`].

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use corral_core::{ConnectionError, CorralError};
use corral_protocol::{Frame, FrameCodec, ProtocolError};

/// How long `close` waits for buffered frames to flush
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Write half of a framed transport
pub type BoxFrameSink = Pin<Box<dyn Sink<Frame, Error = ProtocolError> + Send>>;

/// Read half of a framed transport
pub type BoxFrameStream = Pin<Box<dyn Stream<Item = Result<Frame, ProtocolError>> + Send>>;

/// Wrap a byte stream in the frame codec and split it
pub fn framed<T>(io: T) -> (BoxFrameSink, BoxFrameStream)
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (sink, stream) = Framed::new(io, FrameCodec::new()).split();
    (Box::pin(sink), Box::pin(stream))
}

/// Open a TCP connection to the controller
pub async fn connect_tcp(address: &str, timeout: Duration) -> Result<TcpStream, ConnectionError> {
    tracing::debug!("Connecting to controller at {}", address);

    let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
        .await
        .map_err(|_| ConnectionError::Timeout(address.to_string()))?
        .map_err(|e| ConnectionError::ConnectFailed {
            address: address.to_string(),
            reason: e.to_string(),
        })?;

    if let Err(e) = stream.set_nodelay(true) {
        tracing::warn!("Failed to set TCP_NODELAY: {}", e);
    }

    Ok(stream)
}

/// Shared send path of one connection.
///
/// Each `send` writes one whole frame; callers that need request/reply
/// ordering coordinate through the gate.
#[derive(Clone)]
pub struct FrameSender {
    sink: Arc<Mutex<BoxFrameSink>>,
    cancel: CancellationToken,
}

impl FrameSender {
    pub fn new(sink: BoxFrameSink, cancel: CancellationToken) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
            cancel,
        }
    }

    /// Write one frame, failing with `Closed` once the connection is closed
    pub async fn send(&self, frame: Frame) -> Result<(), CorralError> {
        if self.cancel.is_cancelled() {
            return Err(ConnectionError::Closed.into());
        }

        let mut sink = self.sink.lock().await;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ConnectionError::Closed.into()),
            result = sink.send(frame) => result.map_err(CorralError::from),
        }
    }

    /// Flush and close the write half, best effort
    pub async fn shutdown(&self) {
        let flush = async {
            let mut sink = self.sink.lock().await;
            sink.close().await
        };
        match tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, flush).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!("Error closing transport: {}", e),
            Err(_) => tracing::debug!("Timed out flushing transport on close"),
        }
    }

    /// Whether the owning connection has been closed
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

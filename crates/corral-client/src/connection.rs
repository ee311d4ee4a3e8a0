//! One controller connection and its fixed channel set

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use corral_protocol::{Frame, MessageType};

use crate::splitter::{Splitter, VirtualChannel};
use crate::transport::{framed, FrameSender};

/// Control requests and their replies
pub const MAIN_CHANNEL: usize = 0;
/// Event bus notifications
pub const EVENT_CHANNEL: usize = 1;
/// Console lines of servers and services
pub const STREAM_CHANNEL: usize = 2;
/// Extension module traffic, split further per module
pub const EXTENSION_CHANNEL: usize = 3;

const CHANNEL_COUNT: usize = 4;

/// Route a frame from the transport to its fixed channel
pub fn classify(frame: &Frame) -> Option<usize> {
    match frame.kind {
        MessageType::EventStream => Some(EVENT_CHANNEL),
        MessageType::Stream => Some(STREAM_CHANNEL),
        MessageType::Extension => Some(EXTENSION_CHANNEL),
        _ => Some(MAIN_CHANNEL),
    }
}

/// The fixed channels of a freshly opened connection
#[derive(Debug)]
pub struct Channels {
    pub main: VirtualChannel,
    pub events: VirtualChannel,
    pub streams: VirtualChannel,
    pub extensions: VirtualChannel,
}

/// Owner of the transport; closing it closes every derived channel
pub struct Connection {
    sender: FrameSender,
    cancel: CancellationToken,
}

impl Connection {
    /// Frame `io` and start demultiplexing it
    pub fn open<T>(io: T) -> (Self, Channels)
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let (sink, stream) = framed(io);
        let sender = FrameSender::new(sink, cancel.clone());

        let [main, events, streams, extensions] = Splitter::spawn_fixed::<CHANNEL_COUNT, _, _>(
            stream,
            classify,
            sender.clone(),
            cancel.clone(),
        );
        let channels = Channels {
            main,
            events,
            streams,
            extensions,
        };

        (Self { sender, cancel }, channels)
    }

    /// Close the connection. Safe to call repeatedly.
    pub async fn close(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        tracing::debug!("Closing connection");
        self.cancel.cancel();
        self.sender.shutdown().await;
    }

    /// Whether `close` has been called
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled when the connection closes
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

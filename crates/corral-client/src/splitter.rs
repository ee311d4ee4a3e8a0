//! Frame-channel splitter
//!
//! One background task owns the read side of a frame source. Every frame is
//! classified to a slot index and queued on that slot's [`VirtualChannel`];
//! frames classified to `None` or to an index past the last slot are dropped.
//! Only reception is demultiplexed: all channels produced by one split share
//! the same [`FrameSender`].
//!
//! When the source ends (transport EOF or error) the task exits and every
//! channel drains its queue and then reports closed. Cancelling the split's
//! token closes every channel immediately, including channels produced by
//! splitting one of them again.

use std::fmt;
use std::pin::Pin;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use corral_core::CorralError;
use corral_protocol::{Frame, ProtocolError};

use crate::transport::FrameSender;

/// Discriminator of a virtual channel within its split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub usize);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel-{}", self.0)
    }
}

/// A logical sub-stream of one connection
pub struct VirtualChannel {
    id: ChannelId,
    queue: Mutex<mpsc::UnboundedReceiver<Frame>>,
    sender: FrameSender,
    cancel: CancellationToken,
}

impl VirtualChannel {
    /// Channel discriminator
    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Receive the next frame routed to this channel.
    ///
    /// Returns None once the channel is closed; never blocks past close.
    pub async fn recv(&self) -> Option<Frame> {
        if self.cancel.is_cancelled() {
            return None;
        }

        let mut queue = self.queue.lock().await;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            frame = queue.recv() => frame,
        }
    }

    /// Send a frame on the shared connection
    pub async fn send(&self, frame: Frame) -> Result<(), CorralError> {
        self.sender.send(frame).await
    }

    /// The connection's shared send path
    pub fn sender(&self) -> &FrameSender {
        &self.sender
    }

    /// Whether this channel has been closed locally
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Close this channel; frames still routed to it are dropped
    pub async fn close(&self) {
        self.cancel.cancel();
        self.queue.lock().await.close();
    }

    /// Split this channel's incoming frames into `slots` further channels.
    ///
    /// The new channels close when this channel closes.
    pub fn split<F>(self, slots: usize, classifier: F) -> Vec<VirtualChannel>
    where
        F: Fn(&Frame) -> Option<usize> + Send + 'static,
    {
        let sender = self.sender.clone();
        let cancel = self.cancel.child_token();
        let source = futures::stream::unfold(self, |channel| async move {
            let frame = channel.recv().await?;
            Some((Ok(frame), channel))
        });
        Splitter::spawn(Box::pin(source), slots, classifier, sender, cancel)
    }

    /// A stream over this channel's frames, ending at close
    pub fn into_stream(self) -> impl Stream<Item = Frame> + Send {
        futures::stream::unfold(self, |channel| async move {
            let frame = channel.recv().await?;
            Some((frame, channel))
        })
    }
}

impl fmt::Debug for VirtualChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualChannel")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Demultiplexes one frame source into N virtual channels
pub struct Splitter;

impl Splitter {
    /// Start the demultiplexing task and return its channels, indexed by slot
    pub fn spawn<S, F>(
        source: Pin<Box<S>>,
        slots: usize,
        classifier: F,
        sender: FrameSender,
        cancel: CancellationToken,
    ) -> Vec<VirtualChannel>
    where
        S: Stream<Item = Result<Frame, ProtocolError>> + Send + ?Sized + 'static,
        F: Fn(&Frame) -> Option<usize> + Send + 'static,
    {
        let (queues, channels): (Vec<_>, Vec<_>) = (0..slots)
            .map(|slot| channel_for(slot, &sender, &cancel))
            .unzip();

        tokio::spawn(demultiplex(source, queues, classifier, cancel));
        channels
    }

    /// Like [`Splitter::spawn`] for a slot count known at compile time
    pub fn spawn_fixed<const N: usize, S, F>(
        source: Pin<Box<S>>,
        classifier: F,
        sender: FrameSender,
        cancel: CancellationToken,
    ) -> [VirtualChannel; N]
    where
        S: Stream<Item = Result<Frame, ProtocolError>> + Send + ?Sized + 'static,
        F: Fn(&Frame) -> Option<usize> + Send + 'static,
    {
        let mut queues = Vec::with_capacity(N);
        let channels = std::array::from_fn(|slot| {
            let (queue, channel) = channel_for(slot, &sender, &cancel);
            queues.push(queue);
            channel
        });

        tokio::spawn(demultiplex(source, queues, classifier, cancel));
        channels
    }
}

fn channel_for(
    slot: usize,
    sender: &FrameSender,
    cancel: &CancellationToken,
) -> (mpsc::UnboundedSender<Frame>, VirtualChannel) {
    let (tx, rx) = mpsc::unbounded_channel();
    let channel = VirtualChannel {
        id: ChannelId(slot),
        queue: Mutex::new(rx),
        sender: sender.clone(),
        cancel: cancel.child_token(),
    };
    (tx, channel)
}

async fn demultiplex<S, F>(
    mut source: Pin<Box<S>>,
    queues: Vec<mpsc::UnboundedSender<Frame>>,
    classifier: F,
    cancel: CancellationToken,
) where
    S: Stream<Item = Result<Frame, ProtocolError>> + Send + ?Sized,
    F: Fn(&Frame) -> Option<usize>,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::trace!("Splitter cancelled");
                break;
            }
            next = source.next() => next,
        };

        let frame = match next {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                tracing::warn!("Transport error, closing channels: {}", e);
                break;
            }
            None => {
                tracing::debug!("Frame source ended, closing channels");
                break;
            }
        };

        match classifier(&frame) {
            Some(slot) if slot < queues.len() => {
                if queues[slot].send(frame).is_err() {
                    tracing::trace!(slot, "Dropping frame for closed channel");
                }
            }
            slot => {
                tracing::trace!(?slot, kind = ?frame.kind, "Dropping unroutable frame");
            }
        }
    }
    // Dropping `queues` here closes every channel once its backlog is read.
}

//! Lifecycle control and console streams of servers and services
//!
//! Console output is pushed on the stream channel as `Stream` frames, one
//! line each, tagged with the executable and stream kind. The controller only
//! forwards a stream while at least one client listens to it, so every
//! `(source, id, kind)` key gets its own reference-counted [`Subscription`].

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use corral_core::{CorralError, StreamKey};
use corral_protocol::{ExecAction, ExecStatus, Request, Source, StreamKind, StreamLine};

use crate::gate::Gate;
use crate::splitter::VirtualChannel;
use crate::subscription::{FeedControl, Subscription, SubscriptionGuard};

/// Lines of one console stream
pub type ConsoleLines = SubscriptionGuard<String>;

struct StreamFeed {
    gate: Arc<Gate>,
    key: StreamKey,
}

#[async_trait]
impl FeedControl for StreamFeed {
    async fn enable(&self) -> Result<(), CorralError> {
        self.gate
            .exchange_unit(Request::ExecListen {
                source: self.key.source,
                id: self.key.id,
                kind: self.key.kind,
            })
            .await
    }

    async fn disable(&self) -> Result<(), CorralError> {
        self.gate
            .exchange_unit(Request::ExecMute {
                source: self.key.source,
                id: self.key.id,
                kind: self.key.kind,
            })
            .await
    }
}

/// Per-key console feeds fed from the stream channel
pub(crate) struct StreamRouter {
    gate: Arc<Gate>,
    feeds: DashMap<StreamKey, Subscription<String>>,
    capacity: usize,
    closed: CancellationToken,
}

impl StreamRouter {
    /// Start routing lines arriving on `streams`
    pub(crate) fn spawn(
        gate: Arc<Gate>,
        streams: VirtualChannel,
        capacity: usize,
        closed: CancellationToken,
    ) -> Arc<Self> {
        let router = Arc::new(Self {
            gate,
            feeds: DashMap::new(),
            capacity,
            closed,
        });
        tokio::spawn(pump(streams, Arc::clone(&router)));
        router
    }

    fn feed(&self, key: StreamKey) -> Subscription<String> {
        // Handles are only cloned under the entry lock, so a feed found idle
        // here cannot be picked up concurrently.
        self.feeds.retain(|_, feed| !feed.is_idle());
        self.feeds
            .entry(key)
            .or_insert_with(|| {
                let control = StreamFeed {
                    gate: Arc::clone(&self.gate),
                    key,
                };
                Subscription::new(key.to_string(), self.capacity, control, self.closed.clone())
            })
            .clone()
    }

    fn route(&self, line: StreamLine) {
        let key = StreamKey::new(line.source, line.id, line.kind);
        match self.feeds.get(&key) {
            Some(feed) => {
                feed.publish(line.line);
            }
            None => tracing::trace!(stream = %key, "Dropping line for unwatched stream"),
        }
    }
}

async fn pump(streams: VirtualChannel, router: Arc<StreamRouter>) {
    while let Some(frame) = streams.recv().await {
        match frame.peek::<StreamLine>() {
            Ok(line) => router.route(line),
            Err(e) => tracing::warn!("Dropping malformed stream frame: {}", e),
        }
    }
    tracing::debug!("Stream channel closed");
}

/// Executable control requests and console subscriptions
#[derive(Clone, Copy)]
pub struct Executables<'a> {
    gate: &'a Gate,
    streams: &'a StreamRouter,
}

impl<'a> Executables<'a> {
    pub(crate) fn new(gate: &'a Gate, streams: &'a StreamRouter) -> Self {
        Self { gate, streams }
    }

    /// Start, stop, restart or kill an executable
    pub async fn manage(
        &self,
        source: Source,
        id: u32,
        action: ExecAction,
    ) -> Result<(), CorralError> {
        self.gate
            .exchange_unit(Request::ExecManage { source, id, action })
            .await
    }

    pub async fn start(&self, source: Source, id: u32) -> Result<(), CorralError> {
        self.manage(source, id, ExecAction::Start).await
    }

    pub async fn stop(&self, source: Source, id: u32) -> Result<(), CorralError> {
        self.manage(source, id, ExecAction::Stop).await
    }

    /// Current run state
    pub async fn status(&self, source: Source, id: u32) -> Result<ExecStatus, CorralError> {
        self.gate
            .exchange(Request::ExecStatus { source, id }, |reply| reply.read())
            .await
    }

    /// Write a line to the executable's console input
    pub async fn command(
        &self,
        source: Source,
        id: u32,
        line: impl Into<String>,
    ) -> Result<(), CorralError> {
        self.gate
            .exchange_unit(Request::ExecCommand {
                source,
                id,
                line: line.into(),
            })
            .await
    }

    /// Follow one console stream.
    ///
    /// The first subscriber of a stream makes the controller start
    /// forwarding it; the last one to release makes it stop.
    pub async fn subscribe(
        &self,
        source: Source,
        id: u32,
        kind: StreamKind,
    ) -> Result<ConsoleLines, CorralError> {
        self.streams
            .feed(StreamKey::new(source, id, kind))
            .acquire()
            .await
    }

    /// Number of console streams with live subscribers or pending joins
    pub fn watched(&self) -> usize {
        self.streams
            .feeds
            .iter()
            .filter(|feed| !feed.value().is_idle())
            .count()
    }

    /// Number of local subscribers of a stream
    pub fn listeners(&self, source: Source, id: u32, kind: StreamKind) -> usize {
        self.streams
            .feeds
            .get(&StreamKey::new(source, id, kind))
            .map(|feed| feed.holders())
            .unwrap_or(0)
    }
}

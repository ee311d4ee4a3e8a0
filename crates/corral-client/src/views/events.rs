//! Event bus subscriptions
//!
//! The controller publishes named events on the event channel while at least
//! one client listens. Payloads stay encoded until a subscriber asks for a
//! concrete type, which is looked up in the session's [`TypeRegistry`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use corral_core::{CorralError, EventType, TypeRegistry};
use corral_protocol::{EventBody, Request};

use crate::gate::Gate;
use crate::splitter::VirtualChannel;
use crate::subscription::{FeedControl, Subscription, SubscriptionGuard};

/// One event received from the bus
#[derive(Clone)]
pub struct Event {
    name: Arc<str>,
    payload: Arc<[u8]>,
    registry: Arc<TypeRegistry>,
}

impl Event {
    /// Registered type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encoded payload
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Whether this event is `ancestor` or extends it
    pub fn is_a(&self, ancestor: &str) -> bool {
        self.registry.is_a(&self.name, ancestor)
    }

    /// Decode the payload as `E`
    pub fn decode<E: EventType>(&self) -> Result<E, CorralError> {
        self.registry.decode::<E>(&self.name, &self.payload)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

struct EventFeed {
    gate: Arc<Gate>,
}

#[async_trait]
impl FeedControl for EventFeed {
    async fn enable(&self) -> Result<(), CorralError> {
        self.gate.exchange_unit(Request::EventListen).await
    }

    async fn disable(&self) -> Result<(), CorralError> {
        self.gate.exchange_unit(Request::EventMute).await
    }
}

/// The session's event feed
pub(crate) struct EventBus {
    feed: Subscription<Event>,
}

impl EventBus {
    /// Start publishing events arriving on `events`
    pub(crate) fn spawn(
        gate: Arc<Gate>,
        registry: Arc<TypeRegistry>,
        events: VirtualChannel,
        capacity: usize,
        closed: CancellationToken,
    ) -> Self {
        let feed = Subscription::new("events", capacity, EventFeed { gate }, closed);
        tokio::spawn(pump(events, feed.clone(), registry));
        Self { feed }
    }
}

async fn pump(events: VirtualChannel, feed: Subscription<Event>, registry: Arc<TypeRegistry>) {
    while let Some(frame) = events.recv().await {
        let body: EventBody = match frame.peek() {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("Dropping malformed event frame: {}", e);
                continue;
            }
        };

        if registry.get(&body.name).is_none() {
            tracing::trace!(event = %body.name, "Event of unregistered type");
        }
        let delivered = feed.publish(Event {
            name: body.name.into(),
            payload: body.payload.into(),
            registry: Arc::clone(&registry),
        });
        tracing::trace!(delivered, "Published event");
    }
    tracing::debug!("Event channel closed");
}

/// Event bus view
#[derive(Clone, Copy)]
pub struct Events<'a> {
    bus: &'a EventBus,
}

impl<'a> Events<'a> {
    pub(crate) fn new(bus: &'a EventBus) -> Self {
        Self { bus }
    }

    /// Receive every event published from now on
    pub async fn subscribe(&self) -> Result<EventSubscription, CorralError> {
        Ok(EventSubscription {
            guard: self.bus.feed.acquire().await?,
            filter: None,
        })
    }

    /// Receive events that are `ancestor` or extend it
    pub async fn subscribe_to(
        &self,
        ancestor: impl Into<String>,
    ) -> Result<EventSubscription, CorralError> {
        Ok(EventSubscription {
            guard: self.bus.feed.acquire().await?,
            filter: Some(ancestor.into()),
        })
    }

    /// Number of local subscribers
    pub fn listeners(&self) -> usize {
        self.bus.feed.holders()
    }
}

/// A subscriber's cursor over the event bus; dropping it unsubscribes
pub struct EventSubscription {
    guard: SubscriptionGuard<Event>,
    filter: Option<String>,
}

impl EventSubscription {
    /// Next matching event; None once the session is closed
    pub async fn next(&mut self) -> Option<Event> {
        loop {
            let event = self.guard.next().await?;
            match &self.filter {
                Some(ancestor) if !event.is_a(ancestor) => continue,
                _ => return Some(event),
            }
        }
    }

    /// Next event registered as `E`, decoded
    pub async fn next_as<E: EventType>(&mut self) -> Option<Result<E, CorralError>> {
        loop {
            let event = self.next().await?;
            if event.name() == E::NAME {
                return Some(event.decode::<E>());
            }
        }
    }

    /// Unsubscribe and wait for the bus to be muted if this was the last listener
    pub async fn release(self) {
        self.guard.release().await;
    }
}

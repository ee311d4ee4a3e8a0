//! Request/response gate for the main channel
//!
//! The controller answers control requests strictly in order and without
//! correlation ids, so at most one request may be outstanding. [`Gate`]
//! enforces that with a fair lock around the main channel.
//!
//! Once a caller holds the lock, sending the request and reading its reply
//! happen on a detached task that owns the lock guard. A caller dropped
//! mid-exchange therefore never leaves the reply unread: the task still
//! consumes it and then releases the lock for the next caller.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use corral_core::{ConnectionError, CorralError, DomainError};
use corral_protocol::{ErrorBody, FieldCursor, Frame, MessageType, ProtocolError, Request};

use crate::splitter::VirtualChannel;

/// A reply frame whose trailing fields are read by the caller
#[derive(Debug)]
pub struct Reply {
    kind: MessageType,
    fields: FieldCursor,
}

impl Reply {
    fn new(kind: MessageType, fields: FieldCursor) -> Self {
        Self { kind, fields }
    }

    /// Type tag of the reply frame
    pub fn kind(&self) -> MessageType {
        self.kind
    }

    /// Read the next typed field
    pub fn read<T: DeserializeOwned>(&mut self) -> Result<T, CorralError> {
        Ok(self.fields.read()?)
    }

    /// Fail unless the reply carries the given tag
    pub fn expect_kind(&self, expected: MessageType) -> Result<(), CorralError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedFrame {
                expected,
                actual: self.kind,
            }
            .into())
        }
    }

    /// Bytes not yet read
    pub fn remaining(&self) -> usize {
        self.fields.remaining()
    }
}

/// Serializes control exchanges on the main channel
pub struct Gate {
    main: Arc<Mutex<VirtualChannel>>,
}

impl Gate {
    /// Take ownership of the main channel
    pub fn new(main: VirtualChannel) -> Self {
        Self {
            main: Arc::new(Mutex::new(main)),
        }
    }

    /// Send `request` and hand its reply to `read`.
    ///
    /// An error envelope is returned as the matching [`DomainError`] and
    /// `read` is not called. Whatever `read` leaves unread is discarded
    /// before the next exchange starts.
    pub async fn exchange<T, F>(&self, request: Request, read: F) -> Result<T, CorralError>
    where
        F: FnOnce(&mut Reply) -> Result<T, CorralError>,
    {
        let frame = request.into_frame()?;
        self.exchange_frame(frame, read).await
    }

    /// Exchange whose reply carries nothing the caller needs
    pub async fn exchange_unit(&self, request: Request) -> Result<(), CorralError> {
        self.exchange(request, |_| Ok(())).await
    }

    /// [`Gate::exchange`] for a pre-encoded request frame
    pub async fn exchange_frame<T, F>(&self, request: Frame, read: F) -> Result<T, CorralError>
    where
        F: FnOnce(&mut Reply) -> Result<T, CorralError>,
    {
        let kind = request.kind;
        let guard = Arc::clone(&self.main).lock_owned().await;

        let in_flight = tokio::spawn(async move {
            let reply = transact(&guard, request).await;
            (guard, reply)
        });
        let (guard, reply) = in_flight
            .await
            .map_err(|e| ConnectionError::TaskFailed(e.to_string()))?;
        let reply = reply?;

        let mut fields = reply.fields();
        if reply.kind == MessageType::Error {
            let body: ErrorBody = fields.read()?;
            if let Some(error) = DomainError::from_body(body) {
                tracing::debug!(request = ?kind, "Request failed: {}", error);
                return Err(error.into());
            }
        }

        let mut reply = Reply::new(reply.kind, fields);
        let result = read(&mut reply);

        let unread = reply.fields.drain();
        if unread > 0 {
            tracing::trace!(request = ?kind, unread, "Drained unread reply fields");
        }
        drop(guard);

        result
    }
}

async fn transact(main: &VirtualChannel, request: Frame) -> Result<Frame, CorralError> {
    let kind = request.kind;
    main.send(request).await?;
    let reply = main.recv().await.ok_or(ConnectionError::Closed)?;
    tracing::trace!(request = ?kind, reply = ?reply.kind, "Exchange completed");
    Ok(reply)
}

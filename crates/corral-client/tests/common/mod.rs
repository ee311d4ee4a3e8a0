//! Scripted controller used by the integration tests
//!
//! The client side talks to the mock over an in-memory duplex pipe. Tests
//! drive the mock step by step: read the next request, assert on it, answer.

#![allow(dead_code)]

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::DuplexStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use corral_client::{ModuleCatalog, Session};
use corral_core::config::ClientConfig;
use corral_protocol::{
    ErrorOutcome, ExtensionHeader, ExtensionKind, Frame, FrameBuilder, FrameCodec, MessageType,
};

/// How long the mock waits for a frame before failing the test
pub const STEP_TIMEOUT: Duration = Duration::from_secs(2);

/// How long the mock waits to be sure nothing else was sent
pub const QUIET_PERIOD: Duration = Duration::from_millis(50);

/// Controller end of an in-memory connection
pub struct MockServer {
    framed: Framed<DuplexStream, FrameCodec>,
}

impl MockServer {
    /// Next frame from the client
    pub async fn recv(&mut self) -> Frame {
        timeout(STEP_TIMEOUT, self.framed.next())
            .await
            .expect("Timed out waiting for a client frame")
            .expect("Client closed the connection")
            .expect("Failed to decode client frame")
    }

    /// Next frame from the client, which must have the given kind
    pub async fn expect(&mut self, kind: MessageType) -> Frame {
        let frame = self.recv().await;
        assert_eq!(frame.kind, kind, "unexpected request");
        frame
    }

    /// Assert the client sends nothing for a short while
    pub async fn expect_silence(&mut self) {
        if let Ok(frame) = timeout(QUIET_PERIOD, self.framed.next()).await {
            panic!("Expected no client frame, got {:?}", frame);
        }
    }

    /// Whether the client has hung up
    pub async fn expect_hangup(&mut self) {
        match timeout(STEP_TIMEOUT, self.framed.next()).await {
            Ok(None) | Ok(Some(Err(_))) => {}
            Ok(Some(Ok(frame))) => panic!("Expected hangup, got {:?}", frame),
            Err(_) => panic!("Client never hung up"),
        }
    }

    pub async fn send(&mut self, frame: Frame) {
        self.framed
            .send(frame)
            .await
            .expect("Failed to send frame to client");
    }

    /// Answer with an empty success reply
    pub async fn ok(&mut self) {
        self.send(Frame::empty(MessageType::NoOp)).await;
    }

    /// Answer with one field
    pub async fn reply<T: Serialize>(&mut self, kind: MessageType, value: &T) {
        self.send(frame_of(kind, value)).await;
    }

    /// Answer with an error envelope
    pub async fn fail(&mut self, code: ErrorOutcome, message: &str) {
        let frame = Frame::error(code, message).expect("Failed to encode error frame");
        self.send(frame).await;
    }

    /// Serve the handshake, announcing `server` as the controller name
    pub async fn accept_handshake(&mut self, server: &str) -> String {
        let frame = self.expect(MessageType::Handshake).await;
        let mut fields = frame.fields();
        let _version: String = fields.read().expect("handshake version");
        let client: String = fields.read().expect("handshake client");
        self.reply(MessageType::Handshake, &server.to_string()).await;
        client
    }
}

/// An in-memory connection: client io plus the scripted controller
pub fn pipe() -> (DuplexStream, MockServer) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    (
        client,
        MockServer {
            framed: Framed::new(server, FrameCodec::new()),
        },
    )
}

/// Config used by every test session
pub fn test_config() -> ClientConfig {
    ClientConfig {
        client_name: "test-client".to_string(),
        ..ClientConfig::default()
    }
}

/// Open a session against a fresh mock controller named "hub"
pub async fn open_session(catalog: ModuleCatalog) -> (Session, MockServer) {
    let (io, mut server) = pipe();
    let (session, client) = tokio::join!(
        Session::from_io(io, test_config(), catalog),
        server.accept_handshake("hub")
    );
    assert_eq!(client, "test-client");
    (session.expect("Failed to open session"), server)
}

/// A frame with a single field
pub fn frame_of<T: Serialize + ?Sized>(kind: MessageType, value: &T) -> Frame {
    let mut frame = FrameBuilder::new(kind);
    frame.push(value).expect("Failed to encode field");
    frame.finish()
}

/// An extension frame for `module`
pub fn extension_frame(module: u32, kind: ExtensionKind, payload: &[u8]) -> Frame {
    let mut frame = FrameBuilder::new(MessageType::Extension);
    frame
        .push(&ExtensionHeader { module, kind })
        .expect("Failed to encode extension header");
    frame.push(payload).expect("Failed to encode extension payload");
    frame.finish()
}

/// Read the fields of a request in order
pub fn field<T: DeserializeOwned>(fields: &mut corral_protocol::FieldCursor) -> T {
    fields.read().expect("Failed to decode request field")
}

/// Poll `condition` until it holds or the step timeout expires
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(STEP_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("Condition never became true");
}

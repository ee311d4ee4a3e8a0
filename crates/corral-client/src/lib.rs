//! corral-client: Multiplexed management session for a Corral controller
//!
//! One TCP connection to the controller carries control requests, the event
//! bus, console streams and extension module traffic. This crate splits that
//! connection into independent channels and exposes them through a
//! [`Session`]:
//!
//! - [`splitter`] demultiplexes incoming frames into virtual channels
//! - [`gate`] keeps exactly one control request in flight
//! - [`subscription`] turns server-side feeds on and off with local interest
//! - [`extension`] wires extension modules to their own channels
//! - [`views`] offer typed access to each request kind

pub mod commands;
pub mod connection;
pub mod extension;
pub mod gate;
pub mod output;
pub mod session;
pub mod splitter;
pub mod subscription;
pub mod transport;
pub mod views;

pub use extension::{
    ExtensionChannel, ExtensionHandler, ExtensionModule, ExtensionRegistry, ModuleCatalog,
    ModuleContext, NoopHandler,
};
pub use session::Session;
pub use subscription::{FeedItem, SubscriptionGuard};
pub use views::{Access, ConsoleLines, Event, EventSubscription, Events, Executables, Resources};

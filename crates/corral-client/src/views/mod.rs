//! Typed views over the controller's request kinds
//!
//! Views are cheap borrows of a [`Session`](crate::Session); they carry no
//! state of their own and may be used from many tasks at once.

pub mod access;
pub mod events;
pub mod executables;
pub mod resources;

pub use access::Access;
pub use events::{Event, EventSubscription, Events};
pub use executables::{ConsoleLines, Executables};
pub use resources::Resources;

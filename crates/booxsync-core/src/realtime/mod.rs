//! Realtime change listener.
//!
//! Subscribes to row changes on the backend's realtime channel and turns each
//! relevant change into a [`ChangeAction`]. The listener only reports actions;
//! the orchestrator executes them against the gateway.

mod listener;
pub mod protocol;

pub use listener::{ListenerEvent, ListenerState, RealtimeListener};
pub use protocol::ChangeAction;

//! Event fan-out and session recording.
//!
//! The engine publishes structured [`Event`]s on an [`EventBus`];
//! subscribers receive them synchronously (typed or catch-all). The
//! [`SessionRecorder`] is the built-in subscriber that persists one
//! line-delimited JSON file per run.

mod bus;
mod recorder;

pub use bus::EventBus;
pub use recorder::SessionRecorder;

pub use arena_domain::event::{names, Event};

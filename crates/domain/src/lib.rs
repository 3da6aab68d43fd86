//! Shared domain types for the arena test harness.
//!
//! Everything that crosses a crate boundary lives here: messages and
//! conversation state, run metadata and results, stream elements for the
//! duplex pipeline, scenario/eval configuration, audio frame types, and
//! the shared error type.

pub mod audio;
pub mod config;
pub mod element;
pub mod error;
pub mod event;
pub mod message;
pub mod run;
pub mod scenario;
pub mod state;
pub mod tool;

/// Free-form JSON metadata map, used on messages, stream elements, and
/// conversation state.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A boxed async stream, used for streaming provider responses.
pub type BoxStream<'a, T> = std::pin::Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

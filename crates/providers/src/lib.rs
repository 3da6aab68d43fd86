//! Provider capability interface and registry.
//!
//! The core never talks to a model vendor directly; it consumes the
//! [`Provider`] trait (request/response prediction, optional streaming,
//! optional duplex sessions, cost calculation) and looks instances up in
//! a [`ProviderRegistry`]. The [`mock`] module supplies a deterministic
//! in-process provider used for mock-provider mode and tests.

mod registry;
mod traits;

pub mod mock;

pub use registry::ProviderRegistry;
pub use traits::{
    PredictRequest, PredictResponse, Provider, ProviderCapabilities, ProviderSession,
    SessionControl, StreamingInputConfig, Usage,
};

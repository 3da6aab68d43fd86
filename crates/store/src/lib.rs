//! Authoritative per-run state: conversation messages, run metadata, and
//! the reconstructed result view.
//!
//! The [`StateStore`] is the single source of truth for everything a run
//! produces; all writers go through it, and [`StateStore::get_run_result`]
//! rebuilds the uniform result record from it at query time.

mod memory;
mod result;

pub use memory::StateStore;
pub use result::reconstruct;

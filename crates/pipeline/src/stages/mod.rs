//! Concrete stages used by the duplex conversation path.

mod audio_turn;
mod media;
mod prompt;
mod provider;
mod resample;
mod state_save;
mod template;

pub use audio_turn::AudioTurn;
pub use media::MediaExternalizer;
pub use prompt::PromptAssembly;
pub use provider::{DuplexProvider, SESSION_ENDED_MESSAGE};
pub use resample::Resample;
pub use state_save::StateStoreSave;
pub use template::{substitute, Template};

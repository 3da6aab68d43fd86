//! Text-to-speech seam for self-play duplex turns.

use async_trait::async_trait;

use arena_domain::audio::{AudioFrame, SAMPLE_RATE_HZ};
use arena_domain::error::Result;

#[async_trait]
pub trait TtsEngine: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<AudioFrame>;
}

/// Deterministic tone synthesizer used in mock-provider mode and tests.
/// Produces a sine burst whose length tracks the word count and whose
/// pitch is derived from the text, so distinct utterances yield distinct
/// (but reproducible) audio.
pub struct ToneTts {
    ms_per_word: u64,
}

impl ToneTts {
    pub fn new() -> Self {
        Self { ms_per_word: 80 }
    }
}

impl Default for ToneTts {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TtsEngine for ToneTts {
    async fn synthesize(&self, text: &str) -> Result<AudioFrame> {
        let words = text.split_whitespace().count().max(1) as u64;
        let duration_ms = words * self.ms_per_word;
        let sample_count = (SAMPLE_RATE_HZ as u64 * duration_ms / 1000) as usize;

        let seed: u32 = text.bytes().fold(0u32, |acc, b| {
            acc.wrapping_mul(31).wrapping_add(b as u32)
        });
        let frequency = 200.0 + (seed % 400) as f64;

        let mut data = Vec::with_capacity(sample_count * 2);
        for i in 0..sample_count {
            let t = i as f64 / SAMPLE_RATE_HZ as f64;
            let sample = (8000.0 * (2.0 * std::f64::consts::PI * frequency * t).sin()) as i16;
            data.extend_from_slice(&sample.to_le_bytes());
        }
        Ok(AudioFrame::pcm16(data))
    }
}

//! Audio frame types and the transport format constants.
//!
//! The pipeline and providers exchange 16-kHz, 16-bit, mono,
//! little-endian PCM in 640-byte chunks (20 ms).

use serde::{Deserialize, Serialize};

/// Transport sample rate between pipeline and provider.
pub const SAMPLE_RATE_HZ: u32 = 16_000;
/// Bytes per 16-bit sample.
pub const BYTES_PER_SAMPLE: usize = 2;
/// Mono transport.
pub const CHANNELS: u16 = 1;
/// Inter-stage chunk size: 640 bytes = 20 ms of 16-kHz 16-bit mono PCM.
pub const CHUNK_BYTES: usize = 640;
/// Wall-clock duration of one transport chunk.
pub const CHUNK_MILLIS: u64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleFormat {
    /// Signed 16-bit little-endian PCM.
    PcmS16Le,
}

/// One chunk of raw audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFrame {
    pub data: Vec<u8>,
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

impl AudioFrame {
    /// A frame in the transport format (16-kHz mono PCM16).
    pub fn pcm16(data: Vec<u8>) -> Self {
        Self {
            data,
            sample_rate: SAMPLE_RATE_HZ,
            channels: CHANNELS,
            format: SampleFormat::PcmS16Le,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.data.len() / (BYTES_PER_SAMPLE * self.channels as usize)
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.sample_count() as u64 * 1000) / self.sample_rate as u64
    }

    /// Whether the frame is already in the transport format.
    pub fn is_transport_format(&self) -> bool {
        self.sample_rate == SAMPLE_RATE_HZ
            && self.channels == CHANNELS
            && self.format == SampleFormat::PcmS16Le
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_is_twenty_millis() {
        let frame = AudioFrame::pcm16(vec![0u8; CHUNK_BYTES]);
        assert_eq!(frame.sample_count(), 320);
        assert_eq!(frame.duration_ms(), CHUNK_MILLIS);
        assert!(frame.is_transport_format());
    }

    #[test]
    fn non_transport_rate_detected() {
        let frame = AudioFrame {
            data: vec![0u8; 960],
            sample_rate: 24_000,
            channels: 1,
            format: SampleFormat::PcmS16Le,
        };
        assert!(!frame.is_transport_format());
        assert_eq!(frame.duration_ms(), 20);
    }
}

//! PCM helpers: chunking, signal level, and resampling to the transport
//! format.

use arena_domain::audio::{AudioFrame, SampleFormat, BYTES_PER_SAMPLE, SAMPLE_RATE_HZ};

/// Split raw PCM bytes into transport-sized chunks. The final chunk may
/// be short.
pub fn chunk_pcm(data: &[u8], chunk_bytes: usize) -> impl Iterator<Item = &[u8]> {
    data.chunks(chunk_bytes.max(BYTES_PER_SAMPLE))
}

/// Normalised RMS level of a PCM16 frame, in [0, 1].
pub fn rms_level(frame: &AudioFrame) -> f64 {
    let samples: Vec<i16> = frame
        .data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples
        .iter()
        .map(|&s| {
            let v = s as f64 / i16::MAX as f64;
            v * v
        })
        .sum();
    (sum_sq / samples.len() as f64).sqrt()
}

/// Convert an arbitrary PCM16 frame to 16-kHz mono via nearest-sample
/// selection (channel 0 when multi-channel). Frames already in the
/// transport format are returned unchanged.
pub fn resample_to_transport(frame: &AudioFrame) -> AudioFrame {
    if frame.is_transport_format() {
        return frame.clone();
    }

    let channels = frame.channels.max(1) as usize;
    let frame_stride = BYTES_PER_SAMPLE * channels;
    let source_frames = frame.data.len() / frame_stride;
    if source_frames == 0 || frame.sample_rate == 0 {
        return AudioFrame::pcm16(Vec::new());
    }

    let target_frames =
        ((source_frames as u64 * SAMPLE_RATE_HZ as u64) / frame.sample_rate as u64) as usize;
    let mut out = Vec::with_capacity(target_frames * BYTES_PER_SAMPLE);
    for i in 0..target_frames {
        let src = (i as u64 * frame.sample_rate as u64 / SAMPLE_RATE_HZ as u64) as usize;
        let src = src.min(source_frames - 1);
        let offset = src * frame_stride;
        out.push(frame.data[offset]);
        out.push(frame.data[offset + 1]);
    }
    AudioFrame {
        data: out,
        sample_rate: SAMPLE_RATE_HZ,
        channels: 1,
        format: SampleFormat::PcmS16Le,
    }
}

use std::path::Path;

use hound::{SampleFormat, WavSpec, WavWriter};

use super::buffer::AudioBuffer;
use crate::error::{Result, VoxError};

/// Headroom kept below full scale when converting to 16-bit.
pub const PCM_HEADROOM: f32 = 0.98;

/// Write a buffer as 16-bit PCM mono WAV. Multi-channel input is downmixed.
///
/// Signals that exceed full scale are normalised first, then clipped to
/// [-1, 1] and scaled by [`PCM_HEADROOM`] so the integer conversion never wraps.
pub fn write_wav(path: &Path, audio: &AudioBuffer) -> Result<()> {
    let mono = audio.to_mono();
    let peak = mono.peak();
    let pre_gain = if peak > 1.0 { 1.0 / peak } else { 1.0 };

    let spec = WavSpec {
        channels: 1,
        sample_rate: mono.sample_rate(),
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| VoxError::io(parent, e))?;
        }
    }

    let to_io = |e: hound::Error| match e {
        hound::Error::IoError(io) => VoxError::io(path, io),
        other => VoxError::io(path, std::io::Error::new(std::io::ErrorKind::Other, other)),
    };

    let mut writer = WavWriter::create(path, spec).map_err(to_io)?;
    for &s in mono.samples() {
        let v = (s * pre_gain).clamp(-1.0, 1.0) * PCM_HEADROOM;
        writer
            .write_sample((v * i16::MAX as f32) as i16)
            .map_err(to_io)?;
    }
    writer.finalize().map_err(to_io)?;

    log::debug!(
        "Wrote {} samples at {}Hz to {}",
        mono.frames(),
        mono.sample_rate(),
        path.display()
    );
    Ok(())
}

use crate::error::{Result, VoxError};

/// Owned block of interleaved samples at a fixed sample rate.
///
/// Stages never mutate a buffer they receive; they produce a new one.
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    channels: usize,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Mono buffer. Fails on empty input, a zero sample rate or non-finite samples.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        Self::interleaved(samples, 1, sample_rate)
    }

    pub fn interleaved(samples: Vec<f32>, channels: usize, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(VoxError::invalid_audio("sample rate must be positive"));
        }
        if channels == 0 {
            return Err(VoxError::invalid_audio("channel count must be positive"));
        }
        if samples.is_empty() {
            return Err(VoxError::invalid_audio("audio buffer is empty"));
        }
        if samples.len() % channels != 0 {
            return Err(VoxError::invalid_audio(format!(
                "{} samples do not divide into {} channels",
                samples.len(),
                channels
            )));
        }
        if let Some(pos) = samples.iter().position(|s| !s.is_finite()) {
            return Err(VoxError::invalid_audio(format!(
                "non-finite sample at index {}",
                pos
            )));
        }
        Ok(Self {
            samples,
            channels,
            sample_rate,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels
    }

    pub fn duration(&self) -> f32 {
        self.frames() as f32 / self.sample_rate as f32
    }

    pub fn is_mono(&self) -> bool {
        self.channels == 1
    }

    /// Average all channels into a new mono buffer.
    pub fn to_mono(&self) -> AudioBuffer {
        if self.channels == 1 {
            return self.clone();
        }
        let samples = self
            .samples
            .chunks(self.channels)
            .map(|frame| frame.iter().sum::<f32>() / self.channels as f32)
            .collect();
        AudioBuffer {
            samples,
            channels: 1,
            sample_rate: self.sample_rate,
        }
    }

    /// New buffer with the same format and different content.
    pub fn with_samples(&self, samples: Vec<f32>) -> Result<AudioBuffer> {
        AudioBuffer::interleaved(samples, self.channels, self.sample_rate)
    }

    pub fn peak(&self) -> f32 {
        self.samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
    }

    pub fn rms(&self) -> f32 {
        (self.samples.iter().map(|s| s * s).sum::<f32>() / self.samples.len() as f32).sqrt()
    }

    /// Scale so the absolute peak equals `target`. Silent buffers are returned unchanged.
    pub fn normalized(&self, target: f32) -> AudioBuffer {
        let peak = self.peak();
        if peak <= f32::EPSILON {
            log::warn!("Signal is silent, skipping normalization");
            return self.clone();
        }
        let gain = target / peak;
        AudioBuffer {
            samples: self.samples.iter().map(|s| s * gain).collect(),
            channels: self.channels,
            sample_rate: self.sample_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_and_zero_rate() {
        assert!(matches!(
            AudioBuffer::new(Vec::new(), 16000),
            Err(VoxError::InvalidAudioInput { .. })
        ));
        assert!(matches!(
            AudioBuffer::new(vec![0.1], 0),
            Err(VoxError::InvalidAudioInput { .. })
        ));
        assert!(AudioBuffer::new(vec![f32::NAN], 16000).is_err());
    }

    #[test]
    fn test_to_mono_averages_channels() {
        let stereo = AudioBuffer::interleaved(vec![1.0, 0.0, 0.5, 0.5], 2, 8000).unwrap();
        let mono = stereo.to_mono();
        assert_eq!(mono.samples(), &[0.5, 0.5]);
        assert_eq!(mono.frames(), 2);
        assert!((stereo.duration() - 2.0 / 8000.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalized_hits_target_peak() {
        let buf = AudioBuffer::new(vec![0.1, -0.4, 0.2], 16000).unwrap();
        let norm = buf.normalized(0.95);
        assert!((norm.peak() - 0.95).abs() < 1e-6);
        // the source buffer is untouched
        assert!((buf.peak() - 0.4).abs() < 1e-6);
    }
}

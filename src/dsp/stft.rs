use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::audio::spectrum::hann_window;
use crate::error::{Result, VoxError};

/// Analysis window and hop for short-time processing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StftConfig {
    pub window_len: usize,
    pub hop: usize,
}

impl Default for StftConfig {
    fn default() -> Self {
        // 50% overlap
        Self {
            window_len: 1024,
            hop: 512,
        }
    }
}

impl StftConfig {
    pub fn validate(&self) -> Result<()> {
        if !(512..=2048).contains(&self.window_len) {
            return Err(VoxError::config(format!(
                "STFT window must be 512-2048 samples, got {}",
                self.window_len
            )));
        }
        if self.hop == 0 || self.hop > self.window_len {
            return Err(VoxError::config(format!(
                "STFT hop must be in 1..={}, got {}",
                self.window_len, self.hop
            )));
        }
        Ok(())
    }

    pub fn bins(&self) -> usize {
        self.window_len / 2 + 1
    }
}

/// Half spectrum of one analysis window.
#[derive(Clone, Debug)]
pub struct SpectralFrame {
    pub spectrum: Vec<Complex<f32>>,
    /// Bin spacing (Hz)
    pub bin_hz: f32,
}

impl SpectralFrame {
    pub fn magnitudes(&self) -> impl Iterator<Item = f32> + '_ {
        self.spectrum.iter().map(|c| c.norm())
    }

    pub fn energy(&self) -> f32 {
        self.spectrum.iter().map(|c| c.norm_sqr()).sum()
    }

    pub fn frequency(&self, bin: usize) -> f32 {
        bin as f32 * self.bin_hz
    }
}

/// Short-time Fourier transform of one signal.
///
/// The signal is padded with half a window of zeros on both sides (and with
/// zeros at the end up to a whole hop), so every input sample is covered by
/// at least two windows and the inverse can be trimmed back to the exact input
/// length.
pub struct Stft {
    pub frames: Vec<SpectralFrame>,
    config: StftConfig,
    pad: usize,
    padded_len: usize,
    signal_len: usize,
    sample_rate: u32,
    window: Vec<f32>,
    inverse: Arc<dyn Fft<f32>>,
}

impl Stft {
    pub fn analyze(samples: &[f32], sample_rate: u32, config: StftConfig) -> Stft {
        let n = config.window_len;
        let pad = n / 2;
        let unpadded = samples.len() + 2 * pad;
        let frame_count = 1 + (unpadded.saturating_sub(n) + config.hop - 1) / config.hop;
        let padded_len = (frame_count - 1) * config.hop + n;

        let mut padded = vec![0.0f32; padded_len];
        padded[pad..pad + samples.len()].copy_from_slice(samples);

        let window = hann_window(n);
        let mut planner = FftPlanner::<f32>::new();
        let forward = planner.plan_fft_forward(n);
        let inverse = planner.plan_fft_inverse(n);
        let bin_hz = sample_rate as f32 / n as f32;

        let frames = (0..frame_count)
            .map(|f| {
                let start = f * config.hop;
                let mut buffer: Vec<Complex<f32>> = padded[start..start + n]
                    .iter()
                    .zip(&window)
                    .map(|(&s, &w)| Complex::new(s * w, 0.0))
                    .collect();
                forward.process(&mut buffer);
                buffer.truncate(config.bins());
                SpectralFrame {
                    spectrum: buffer,
                    bin_hz,
                }
            })
            .collect();

        Stft {
            frames,
            config,
            pad,
            padded_len,
            signal_len: samples.len(),
            sample_rate,
            window,
            inverse,
        }
    }

    pub fn config(&self) -> StftConfig {
        self.config
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bins(&self) -> usize {
        self.config.bins()
    }

    /// Start of frame `index` in seconds relative to the unpadded signal.
    pub fn frame_time(&self, index: usize) -> f32 {
        (index * self.config.hop) as f32 / self.sample_rate as f32
            - self.pad as f32 / self.sample_rate as f32
    }

    /// Frames whose window lies entirely inside the original signal. Falls back
    /// to every frame when the signal is shorter than one window.
    pub fn interior_frames(&self) -> Vec<usize> {
        let interior: Vec<usize> = (0..self.frames.len())
            .filter(|&f| {
                let start = f * self.config.hop;
                start >= self.pad && start + self.config.window_len <= self.pad + self.signal_len
            })
            .collect();
        if interior.is_empty() {
            (0..self.frames.len()).collect()
        } else {
            interior
        }
    }

    /// Weighted overlap-add of modified spectra, trimmed to the input length.
    pub fn synthesize(&self, spectra: &[Vec<Complex<f32>>]) -> Vec<f32> {
        let n = self.config.window_len;
        let bins = self.bins();
        let mut output = vec![0.0f32; self.padded_len];
        let mut norm = vec![0.0f32; self.padded_len];
        let mut buffer = vec![Complex::new(0.0f32, 0.0); n];

        for (f, half) in spectra.iter().enumerate() {
            buffer[..bins].copy_from_slice(&half[..bins]);
            // Hermitian mirror of the upper half
            for k in bins..n {
                buffer[k] = half[n - k].conj();
            }
            self.inverse.process(&mut buffer);

            let start = f * self.config.hop;
            for i in 0..n {
                let w = self.window[i];
                output[start + i] += buffer[i].re / n as f32 * w;
                norm[start + i] += w * w;
            }
        }

        (self.pad..self.pad + self.signal_len)
            .map(|i| if norm[i] > 1e-8 { output[i] / norm[i] } else { 0.0 })
            .collect()
    }
}

//! Spectral noise reduction
//!
//! - Spectral subtraction with over-subtraction (`alpha`) and a spectral floor (`beta`)
//! - Wiener filtering with `G = S / (S + N)`
//! - Pluggable noise estimation when no explicit profile is given

use rustfft::num_complex::Complex;

use super::stft::{Stft, StftConfig};
use crate::audio::AudioBuffer;
use crate::error::{Result, VoxError};

/// Average noise magnitude per frequency bin.
#[derive(Clone, Debug, PartialEq)]
pub struct NoiseProfile {
    pub magnitude: Vec<f32>,
}

impl NoiseProfile {
    /// Learn a profile from a noise-only clip.
    pub fn from_noise_clip(noise: &AudioBuffer, config: StftConfig) -> NoiseProfile {
        let mono = noise.to_mono();
        let stft = Stft::analyze(mono.samples(), mono.sample_rate(), config);
        mean_magnitude(&stft, &stft.interior_frames())
    }

    pub fn bins(&self) -> usize {
        self.magnitude.len()
    }
}

/// Strategy for estimating the noise spectrum from the signal itself.
pub trait NoiseEstimator: Send + Sync {
    fn name(&self) -> &'static str;
    fn estimate(&self, stft: &Stft) -> NoiseProfile;
}

/// Mean spectrum of the quietest fraction of frames, median-smoothed across
/// frequency.
///
/// A tone that never stops shows up in the quietest frames too. The median
/// over neighbouring bins drops such narrow peaks so they are not treated as
/// noise, while broadband noise keeps its level.
#[derive(Clone, Copy, Debug)]
pub struct PercentileNoiseEstimator {
    /// Fraction of frames (by energy, lowest first) treated as noise-only
    pub fraction: f32,
    /// Bins on each side of the median window; 0 disables smoothing
    pub smoothing_radius: usize,
}

impl Default for PercentileNoiseEstimator {
    fn default() -> Self {
        Self {
            fraction: 0.1,
            smoothing_radius: 8,
        }
    }
}

impl NoiseEstimator for PercentileNoiseEstimator {
    fn name(&self) -> &'static str {
        "lowest-energy percentile"
    }

    fn estimate(&self, stft: &Stft) -> NoiseProfile {
        let mut candidates = stft.interior_frames();
        candidates.sort_by(|&a, &b| stft.frames[a].energy().total_cmp(&stft.frames[b].energy()));
        let count = ((candidates.len() as f32 * self.fraction) as usize).clamp(1, candidates.len());
        log::debug!(
            "Noise estimate from {} of {} frames ({})",
            count,
            candidates.len(),
            self.name()
        );
        let mean = mean_magnitude(stft, &candidates[..count]);
        NoiseProfile {
            magnitude: median_smooth(&mean.magnitude, self.smoothing_radius),
        }
    }
}

/// Mean spectrum of the frames inside the first `seconds` of the signal.
#[derive(Clone, Copy, Debug)]
pub struct LeadingSegmentNoiseEstimator {
    pub seconds: f32,
}

impl Default for LeadingSegmentNoiseEstimator {
    fn default() -> Self {
        Self { seconds: 0.5 }
    }
}

impl NoiseEstimator for LeadingSegmentNoiseEstimator {
    fn name(&self) -> &'static str {
        "leading segment"
    }

    fn estimate(&self, stft: &Stft) -> NoiseProfile {
        let window_secs = stft.config().window_len as f32 / stft.sample_rate() as f32;
        let interior = stft.interior_frames();
        let leading: Vec<usize> = interior
            .iter()
            .copied()
            .filter(|&f| stft.frame_time(f) + window_secs <= self.seconds)
            .collect();
        if leading.is_empty() {
            log::warn!(
                "No complete frame within the first {:.2}s, using the first frame as noise",
                self.seconds
            );
            return mean_magnitude(stft, &interior[..1]);
        }
        mean_magnitude(stft, &leading)
    }
}

fn mean_magnitude(stft: &Stft, frames: &[usize]) -> NoiseProfile {
    let mut magnitude = vec![0.0f32; stft.bins()];
    for &f in frames {
        for (acc, mag) in magnitude.iter_mut().zip(stft.frames[f].magnitudes()) {
            *acc += mag;
        }
    }
    let count = frames.len().max(1) as f32;
    for m in magnitude.iter_mut() {
        *m /= count;
    }
    NoiseProfile { magnitude }
}

/// Running median over `radius` bins on each side, truncated at the edges.
fn median_smooth(values: &[f32], radius: usize) -> Vec<f32> {
    if radius == 0 {
        return values.to_vec();
    }
    let mut window = Vec::with_capacity(2 * radius + 1);
    (0..values.len())
        .map(|i| {
            let lo = i.saturating_sub(radius);
            let hi = (i + radius + 1).min(values.len());
            window.clear();
            window.extend_from_slice(&values[lo..hi]);
            window.sort_by(|a, b| a.total_cmp(b));
            window[window.len() / 2]
        })
        .collect()
}

/// Noise power for the Wiener filter.
#[derive(Clone, Debug, PartialEq)]
pub enum NoisePower {
    /// Same power in every bin
    Flat(f32),
    /// One value per bin
    PerBin(Vec<f32>),
    /// Flat power equal to `ratio` times the mean bin power of the signal
    Ratio(f32),
}

impl NoisePower {
    pub fn from_ratio(ratio: f32) -> NoisePower {
        NoisePower::Ratio(ratio)
    }

    fn resolve(&self, stft: &Stft) -> Result<Vec<f32>> {
        let bins = stft.bins();
        let values = match self {
            NoisePower::Flat(p) => vec![*p; bins],
            NoisePower::PerBin(v) => {
                if v.len() != bins {
                    return Err(VoxError::invalid_audio(format!(
                        "noise power has {} bins, expected {}",
                        v.len(),
                        bins
                    )));
                }
                v.clone()
            }
            NoisePower::Ratio(ratio) => {
                let total: f64 = stft
                    .frames
                    .iter()
                    .flat_map(|f| f.spectrum.iter())
                    .map(|c| c.norm_sqr() as f64)
                    .sum();
                let mean = total / (stft.frames.len() * bins).max(1) as f64;
                vec![(*ratio as f64 * mean) as f32; bins]
            }
        };
        if values.iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(VoxError::invalid_audio(
                "noise power must be finite and non-negative",
            ));
        }
        Ok(values)
    }
}

/// Wiener gain `S / (S + N)`, 0 when both powers are 0.
pub fn wiener_gain(signal_power: f32, noise_power: f32) -> f32 {
    let s = signal_power.max(0.0);
    let n = noise_power.max(0.0);
    let total = s + n;
    if total <= 0.0 || !total.is_finite() {
        return 0.0;
    }
    (s / total).clamp(0.0, 1.0)
}

/// Short-time spectral denoiser.
pub struct SpectralDenoiser {
    config: StftConfig,
    estimator: Box<dyn NoiseEstimator>,
}

impl Default for SpectralDenoiser {
    fn default() -> Self {
        Self::new(StftConfig::default())
    }
}

impl SpectralDenoiser {
    /// Denoiser with the default lowest-energy percentile noise estimator.
    pub fn new(config: StftConfig) -> Self {
        Self::with_estimator(config, Box::new(PercentileNoiseEstimator::default()))
    }

    pub fn with_estimator(config: StftConfig, estimator: Box<dyn NoiseEstimator>) -> Self {
        Self { config, estimator }
    }

    pub fn config(&self) -> StftConfig {
        self.config
    }

    /// `|S| = max(|Y| - alpha*|N|, beta*|Y|)` per bin, phase kept.
    pub fn spectral_subtraction(
        &self,
        audio: &AudioBuffer,
        alpha: f32,
        beta: f32,
        noise_profile: Option<&NoiseProfile>,
    ) -> Result<AudioBuffer> {
        self.config.validate()?;
        if !alpha.is_finite() || alpha < 0.0 {
            return Err(VoxError::invalid_audio(format!(
                "over-subtraction factor must be non-negative, got {}",
                alpha
            )));
        }
        if !beta.is_finite() || !(0.0..=1.0).contains(&beta) {
            return Err(VoxError::invalid_audio(format!(
                "spectral floor must be in [0, 1], got {}",
                beta
            )));
        }

        log::info!(
            "Spectral subtraction: alpha={:.2}, beta={:.2}, window={}, hop={}",
            alpha,
            beta,
            self.config.window_len,
            self.config.hop
        );

        self.per_channel(audio, |samples, sample_rate| {
            let stft = Stft::analyze(samples, sample_rate, self.config);
            let noise = match noise_profile {
                Some(profile) => {
                    if profile.bins() != stft.bins() {
                        return Err(VoxError::invalid_audio(format!(
                            "noise profile has {} bins, expected {}",
                            profile.bins(),
                            stft.bins()
                        )));
                    }
                    profile.clone()
                }
                None => self.estimator.estimate(&stft),
            };

            let spectra: Vec<Vec<Complex<f32>>> = stft
                .frames
                .iter()
                .map(|frame| {
                    frame
                        .spectrum
                        .iter()
                        .zip(&noise.magnitude)
                        .map(|(&c, &noise_mag)| {
                            let mag = c.norm();
                            if mag <= 0.0 {
                                return c;
                            }
                            let clean = (mag - alpha * noise_mag).max(beta * mag);
                            c * (clean / mag)
                        })
                        .collect()
                })
                .collect();

            Ok(stft.synthesize(&spectra))
        })
    }

    /// Apply `G = S/(S+N)` per bin with `S = max(|Y|^2 - N, 0)`.
    pub fn wiener_filter(&self, audio: &AudioBuffer, noise_power: &NoisePower) -> Result<AudioBuffer> {
        self.config.validate()?;

        self.per_channel(audio, |samples, sample_rate| {
            let stft = Stft::analyze(samples, sample_rate, self.config);
            let noise = noise_power.resolve(&stft)?;

            let mut gain_sum = 0.0f64;
            let mut gain_count = 0usize;
            let spectra: Vec<Vec<Complex<f32>>> = stft
                .frames
                .iter()
                .map(|frame| {
                    frame
                        .spectrum
                        .iter()
                        .zip(&noise)
                        .map(|(&c, &n)| {
                            let signal = (c.norm_sqr() - n).max(0.0);
                            let g = wiener_gain(signal, n);
                            gain_sum += g as f64;
                            gain_count += 1;
                            c * g
                        })
                        .collect()
                })
                .collect();

            log::info!(
                "Wiener filter: mean noise power {:.3e}, mean gain {:.3}",
                noise.iter().map(|&p| p as f64).sum::<f64>() / noise.len().max(1) as f64,
                gain_sum / gain_count.max(1) as f64
            );
            Ok(stft.synthesize(&spectra))
        })
    }

    fn per_channel<F>(&self, audio: &AudioBuffer, mut process: F) -> Result<AudioBuffer>
    where
        F: FnMut(&[f32], u32) -> Result<Vec<f32>>,
    {
        let channels = audio.channels();
        if channels == 1 {
            return audio.with_samples(process(audio.samples(), audio.sample_rate())?);
        }

        let frames = audio.frames();
        let mut output = vec![0.0f32; audio.samples().len()];
        for ch in 0..channels {
            let channel: Vec<f32> = audio.samples().iter().skip(ch).step_by(channels).copied().collect();
            let processed = process(&channel, audio.sample_rate())?;
            for (i, s) in processed.into_iter().enumerate().take(frames) {
                output[i * channels + ch] = s;
            }
        }
        audio.with_samples(output)
    }
}

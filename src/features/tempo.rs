//! Speech rhythm: onset envelope, syllable-like onsets and a tempo estimate
//!
//! The envelope is log-compressed spectral flux averaged over bins and scaled
//! to a peak of 1. Onsets are local maxima that clear a moving median by a
//! fixed margin. Tempo comes from the autocorrelation of the envelope,
//! weighted towards 120 BPM by a log-normal prior so that octave errors
//! favour the common rate.

/// Returned when fewer than two onsets are found.
pub const DEFAULT_TEMPO_BPM: f64 = 120.0;

/// Compression constant in `ln(1 + C·|X|)`.
const LOG_COMPRESSION: f32 = 10.0;
/// Tempo search range.
const MIN_BPM: f64 = 40.0;
const MAX_BPM: f64 = 240.0;
/// Centre and spread (octaves) of the tempo prior.
const PRIOR_BPM: f64 = 120.0;
const PRIOR_OCTAVES: f64 = 1.0;

/// Peak-picking parameters, in seconds where they are durations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OnsetConfig {
    /// Span of the moving median the peaks are compared against
    pub median_window: f32,
    /// Margin above the median, on the normalised envelope
    pub delta: f32,
    /// Onsets closer than this collapse into the stronger one
    pub min_gap: f32,
}

impl Default for OnsetConfig {
    fn default() -> Self {
        // Syllables arrive at roughly 4-7 per second
        Self {
            median_window: 0.5,
            delta: 0.07,
            min_gap: 0.1,
        }
    }
}

/// Onset strength per analysis frame.
#[derive(Debug, Clone)]
pub struct OnsetEnvelope {
    pub strength: Vec<f32>,
    /// Frames per second
    pub frame_rate: f32,
}

impl OnsetEnvelope {
    pub fn from_magnitudes(magnitudes: &[Vec<f32>], frame_rate: f32) -> Self {
        let compressed: Vec<Vec<f32>> = magnitudes
            .iter()
            .map(|frame| frame.iter().map(|m| (1.0 + LOG_COMPRESSION * m).ln()).collect())
            .collect();

        let mut strength = Vec::with_capacity(compressed.len());
        strength.push(0.0);
        for pair in compressed.windows(2) {
            let rise: f32 = pair[1].iter().zip(&pair[0]).map(|(c, p)| (c - p).max(0.0)).sum();
            strength.push(rise / pair[1].len().max(1) as f32);
        }
        strength.truncate(compressed.len());

        let peak = strength.iter().copied().fold(0.0f32, f32::max);
        if peak > 0.0 {
            strength.iter_mut().for_each(|s| *s /= peak);
        }
        Self { strength, frame_rate }
    }

    fn frames(&self, seconds: f32) -> usize {
        (seconds * self.frame_rate).round().max(1.0) as usize
    }

    /// Onset times in seconds.
    pub fn onsets(&self, config: &OnsetConfig) -> Vec<f32> {
        let s = &self.strength;
        let half = self.frames(config.median_window) / 2;
        let gap = self.frames(config.min_gap);

        // (frame, strength) of accepted onsets
        let mut picked: Vec<(usize, f32)> = Vec::new();
        for i in 0..s.len() {
            let left = i == 0 || s[i] > s[i - 1];
            let right = i + 1 == s.len() || s[i] >= s[i + 1];
            if !(left && right) {
                continue;
            }
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(s.len());
            if s[i] <= median(&s[lo..hi]) + config.delta {
                continue;
            }
            if let Some(last) = picked.last_mut() {
                if i - last.0 < gap {
                    if s[i] > last.1 {
                        *last = (i, s[i]);
                    }
                    continue;
                }
            }
            picked.push((i, s[i]));
        }

        picked.into_iter().map(|(i, _)| i as f32 / self.frame_rate).collect()
    }

    /// Autocorrelation tempo in BPM, or `None` when the envelope is flat.
    pub fn autocorrelation_tempo(&self) -> Option<f64> {
        let s = &self.strength;
        let rate = self.frame_rate as f64;
        let min_lag = (60.0 * rate / MAX_BPM).ceil().max(1.0) as usize;
        let max_lag = ((60.0 * rate / MIN_BPM).floor() as usize).min(s.len().saturating_sub(1));

        let mut best: Option<(usize, f64)> = None;
        for lag in min_lag..=max_lag {
            let acf: f64 = s[lag..].iter().zip(s).map(|(a, b)| (*a as f64) * (*b as f64)).sum();
            if acf <= 0.0 {
                continue;
            }
            let bpm = 60.0 * rate / lag as f64;
            let octaves = (bpm / PRIOR_BPM).log2() / PRIOR_OCTAVES;
            let weighted = acf * (-0.5 * octaves * octaves).exp();
            if best.map_or(true, |(_, w)| weighted > w) {
                best = Some((lag, weighted));
            }
        }
        best.map(|(lag, _)| 60.0 * rate / lag as f64)
    }
}

/// Tempo of a clip, falling back to [`DEFAULT_TEMPO_BPM`] when it has fewer
/// than two onsets.
pub fn estimate_tempo(envelope: &OnsetEnvelope, config: &OnsetConfig) -> f64 {
    let onsets = envelope.onsets(config);
    if onsets.len() < 2 {
        log::debug!("{} onset(s) found, using default tempo", onsets.len());
        return DEFAULT_TEMPO_BPM;
    }
    envelope.autocorrelation_tempo().unwrap_or(DEFAULT_TEMPO_BPM)
}

fn median(values: &[f32]) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted[sorted.len() / 2]
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: f32 = 100.0;

    /// Unit pulses every `period` frames, starting at frame 5.
    fn pulses(len: usize, period: usize) -> OnsetEnvelope {
        let strength = (0..len).map(|i| if i % period == 5 { 1.0 } else { 0.0 }).collect();
        OnsetEnvelope { strength, frame_rate: RATE }
    }

    #[test]
    fn test_envelope_rises_only_on_energy_increase() {
        let mags = vec![vec![0.0, 0.0], vec![1.0, 1.0], vec![1.0, 1.0], vec![0.0, 0.0], vec![2.0, 0.0]];
        let env = OnsetEnvelope::from_magnitudes(&mags, RATE);
        assert_eq!(env.strength.len(), 5);
        assert_eq!(env.strength[0], 0.0);
        assert_eq!(env.strength[2], 0.0);
        assert_eq!(env.strength[3], 0.0);
        assert_eq!(env.strength[1], 1.0);
        assert!(env.strength[4] > 0.0 && env.strength[4] < 1.0);
    }

    #[test]
    fn test_silence_has_flat_envelope() {
        let env = OnsetEnvelope::from_magnitudes(&vec![vec![0.0; 16]; 50], RATE);
        assert!(env.strength.iter().all(|&s| s == 0.0));
        assert!(env.onsets(&OnsetConfig::default()).is_empty());
        assert_eq!(env.autocorrelation_tempo(), None);
        assert_eq!(estimate_tempo(&env, &OnsetConfig::default()), DEFAULT_TEMPO_BPM);
    }

    #[test]
    fn test_onsets_at_pulses() {
        let onsets = pulses(200, 25).onsets(&OnsetConfig::default());
        assert_eq!(onsets.len(), 8);
        assert!((onsets[0] - 0.05).abs() < 1e-6);
        assert!((onsets[1] - onsets[0] - 0.25).abs() < 1e-5);
    }

    #[test]
    fn test_close_onsets_keep_the_stronger() {
        let mut strength = vec![0.0f32; 100];
        strength[40] = 0.5;
        strength[45] = 1.0;
        let env = OnsetEnvelope { strength, frame_rate: RATE };
        assert_eq!(env.onsets(&OnsetConfig::default()), vec![0.45]);
    }

    #[test]
    fn test_tempo_of_regular_pulses() {
        assert!((estimate_tempo(&pulses(800, 50), &OnsetConfig::default()) - 120.0).abs() < 1e-6);
        assert!((estimate_tempo(&pulses(800, 40), &OnsetConfig::default()) - 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_single_onset_gives_default() {
        let mut strength = vec![0.0f32; 300];
        strength[120] = 1.0;
        let env = OnsetEnvelope { strength, frame_rate: RATE };
        assert_eq!(estimate_tempo(&env, &OnsetConfig::default()), DEFAULT_TEMPO_BPM);
    }
}

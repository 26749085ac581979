//! Fundamental frequency tracking (YIN)

/// YIN pitch detector over fixed-size frames.
pub struct YinDetector {
    sample_rate: u32,
    window_size: usize,
    min_freq: f32,
    max_freq: f32,
    /// Dip in the normalized difference that counts as periodic
    threshold: f32,
    diff_buffer: Vec<f32>,
    cmnd_buffer: Vec<f32>,
}

impl YinDetector {
    pub fn new(sample_rate: u32, window_size: usize, min_freq: f32, max_freq: f32) -> Self {
        Self {
            sample_rate,
            window_size,
            min_freq,
            max_freq,
            threshold: 0.15,
            diff_buffer: vec![0.0; window_size / 2],
            cmnd_buffer: vec![0.0; window_size / 2],
        }
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.threshold = threshold.clamp(0.01, 0.5);
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Pitch of one frame in Hz, `None` when unvoiced. Frames shorter than the
    /// window are zero-padded.
    pub fn detect(&mut self, frame: &[f32]) -> Option<f32> {
        let half = self.window_size / 2;
        if half < 3 {
            return None;
        }

        let mut padded;
        let samples = if frame.len() >= self.window_size {
            &frame[..self.window_size]
        } else {
            padded = vec![0.0f32; self.window_size];
            padded[..frame.len()].copy_from_slice(frame);
            &padded[..]
        };

        self.difference_function(samples);
        self.cumulative_mean_normalized_difference();

        let min_tau = ((self.sample_rate as f32 / self.max_freq) as usize).max(2);
        let max_tau = ((self.sample_rate as f32 / self.min_freq).ceil() as usize).min(half - 2);
        if min_tau >= max_tau {
            return None;
        }

        // First dip under the threshold, followed down to its local minimum
        let mut tau = min_tau;
        let mut best_tau = None;
        while tau <= max_tau {
            if self.cmnd_buffer[tau] < self.threshold {
                while tau < max_tau && self.cmnd_buffer[tau + 1] < self.cmnd_buffer[tau] {
                    tau += 1;
                }
                best_tau = Some(tau);
                break;
            }
            tau += 1;
        }

        let tau = best_tau?;
        let frequency = self.sample_rate as f32 / self.parabolic_interpolation(tau);
        (frequency.is_finite() && frequency >= self.min_freq * 0.95 && frequency <= self.max_freq * 1.05)
            .then_some(frequency)
    }

    fn difference_function(&mut self, samples: &[f32]) {
        let half = self.window_size / 2;
        for tau in 0..half {
            let mut sum = 0.0f32;
            for j in 0..half {
                let diff = samples[j] - samples[j + tau];
                sum += diff * diff;
            }
            self.diff_buffer[tau] = sum;
        }
    }

    fn cumulative_mean_normalized_difference(&mut self) {
        self.cmnd_buffer[0] = 1.0;
        let mut running_sum = 0.0f32;
        for tau in 1..self.diff_buffer.len() {
            running_sum += self.diff_buffer[tau];
            self.cmnd_buffer[tau] = if running_sum > 0.0 {
                self.diff_buffer[tau] * tau as f32 / running_sum
            } else {
                1.0
            };
        }
    }

    fn parabolic_interpolation(&self, tau: usize) -> f32 {
        if tau == 0 || tau + 1 >= self.cmnd_buffer.len() {
            return tau as f32;
        }
        let s0 = self.cmnd_buffer[tau - 1];
        let s1 = self.cmnd_buffer[tau];
        let s2 = self.cmnd_buffer[tau + 1];
        let adjustment = (s2 - s0) / (2.0 * (2.0 * s1 - s0 - s2));
        if adjustment.is_finite() && adjustment.abs() <= 1.0 {
            tau as f32 + adjustment
        } else {
            tau as f32
        }
    }
}

/// Per-frame pitch track; `None` marks unvoiced frames.
pub struct PitchTrack {
    pub frames: Vec<Option<f32>>,
}

impl PitchTrack {
    /// Track pitch across the signal. Frames whose RMS falls below
    /// `silence_rms` are unvoiced without running YIN.
    pub fn analyze(
        samples: &[f32],
        detector: &mut YinDetector,
        hop: usize,
        silence_rms: f32,
    ) -> PitchTrack {
        let window = detector.window_size();
        let hop = hop.max(1);
        let count = if samples.len() <= window {
            1
        } else {
            1 + (samples.len() - window) / hop
        };

        let frames = (0..count)
            .map(|f| {
                let start = f * hop;
                let end = (start + window).min(samples.len());
                let frame = &samples[start..end];
                let rms = (frame.iter().map(|s| s * s).sum::<f32>() / window as f32).sqrt();
                if rms < silence_rms {
                    None
                } else {
                    detector.detect(frame)
                }
            })
            .collect();

        PitchTrack { frames }
    }

    pub fn voiced(&self) -> impl Iterator<Item = f32> + '_ {
        self.frames.iter().filter_map(|f| *f)
    }

    pub fn voiced_ratio(&self) -> f64 {
        if self.frames.is_empty() {
            return 0.0;
        }
        self.voiced().count() as f64 / self.frames.len() as f64
    }

    /// Mean and population variance of voiced frames, `(0, 0)` when none are voiced.
    pub fn summary(&self) -> (f64, f64) {
        let voiced: Vec<f64> = self.voiced().map(|f| f as f64).collect();
        if voiced.is_empty() {
            return (0.0, 0.0);
        }
        let mean = voiced.iter().sum::<f64>() / voiced.len() as f64;
        let variance = voiced.iter().map(|f| (f - mean).powi(2)).sum::<f64>() / voiced.len() as f64;
        (mean, variance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 16000;

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    fn detector() -> YinDetector {
        YinDetector::new(SR, 2048, 65.0, 2093.0)
    }

    #[test]
    fn test_detects_sine_pitch() {
        let mut yin = detector();
        for freq in [110.0f32, 220.0, 440.0, 1000.0] {
            let f0 = yin.detect(&sine(freq, 2048)).expect("voiced");
            assert!((f0 - freq).abs() / freq < 0.02, "expected {} got {}", freq, f0);
        }
    }

    #[test]
    fn test_harmonic_signal_reports_fundamental() {
        let samples: Vec<f32> = (0..2048)
            .map(|i| {
                let t = i as f32 / SR as f32;
                let w = 2.0 * std::f32::consts::PI * 150.0 * t;
                0.5 * w.sin() + 0.3 * (2.0 * w).sin() + 0.2 * (3.0 * w).sin()
            })
            .collect();
        let f0 = detector().detect(&samples).expect("voiced");
        assert!((f0 - 150.0).abs() < 3.0, "got {}", f0);
    }

    #[test]
    fn test_silence_and_noise_are_unvoiced() {
        let track = PitchTrack::analyze(&vec![0.0; 8000], &mut detector(), 512, 1e-3);
        assert_eq!(track.voiced_ratio(), 0.0);
        assert_eq!(track.summary(), (0.0, 0.0));

        let mut seed = 99u32;
        let noise: Vec<f32> = (0..2048)
            .map(|_| {
                seed ^= seed << 13;
                seed ^= seed >> 17;
                seed ^= seed << 5;
                seed as f32 / u32::MAX as f32 - 0.5
            })
            .collect();
        assert!(detector().detect(&noise).is_none());
    }

    #[test]
    fn test_track_summary_over_voiced_frames() {
        let mut samples = vec![0.0f32; 8192];
        samples.extend(sine(200.0, 8192));
        let track = PitchTrack::analyze(&samples, &mut detector(), 512, 1e-3);
        let ratio = track.voiced_ratio();
        assert!(ratio > 0.3 && ratio < 0.7, "ratio {}", ratio);
        let (mean, variance) = track.summary();
        assert!((mean - 200.0).abs() < 4.0, "mean {}", mean);
        assert!(variance < 25.0);
    }
}

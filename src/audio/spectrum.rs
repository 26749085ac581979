use rustfft::{num_complex::Complex, FftPlanner};
use serde::Serialize;

use super::buffer::AudioBuffer;

/// Upper edge of the low band (Hz).
pub const LOW_BAND_MAX_HZ: f32 = 1000.0;
/// Upper edge of the mid band (Hz).
pub const MID_BAND_MAX_HZ: f32 = 4000.0;

/// Fraction of spectral energy in each report band. Sums to 1 for non-silent input.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct BandEnergy {
    /// < 1 kHz
    pub low: f32,
    /// 1-4 kHz
    pub mid: f32,
    /// > 4 kHz
    pub high: f32,
}

/// Whole-signal frequency-domain summary used in processing reports
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SpectrumAnalysis {
    /// Energy-weighted spectral centroid (Hz)
    pub mean_frequency: f32,
    /// Frequency of the largest non-DC bin (Hz)
    pub dominant_frequency: f32,
    /// Energy-weighted spread around the centroid (Hz)
    pub bandwidth: f32,
    pub rms: f32,
    pub peak: f32,
    pub band_energy: BandEnergy,
}

/// Analyze the full signal with a single FFT. Reads only; never modifies the buffer.
pub fn analyze_spectrum(audio: &AudioBuffer) -> SpectrumAnalysis {
    let mono = audio.to_mono();
    let samples = mono.samples();
    let n = samples.len();
    let sr = mono.sample_rate() as f32;

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n);
    let mut buffer: Vec<Complex<f32>> = samples.iter().map(|&s| Complex::new(s, 0.0)).collect();
    fft.process(&mut buffer);

    let half = n / 2 + 1;
    let freq_resolution = sr / n as f32;
    let magnitudes: Vec<f32> = buffer[..half].iter().map(|c| c.norm()).collect();

    // Moments are weighted by |X|², accumulated in f64
    let power: Vec<f64> = magnitudes.iter().map(|&m| (m as f64) * (m as f64)).collect();
    let total_power: f64 = power.iter().sum();
    let freq = |i: usize| i as f64 * freq_resolution as f64;

    let mean_frequency = if total_power > 1e-20 {
        power.iter().enumerate().map(|(i, p)| freq(i) * p).sum::<f64>() / total_power
    } else {
        0.0
    };

    let bandwidth = if total_power > 1e-20 {
        (power
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let d = freq(i) - mean_frequency;
                d * d * p
            })
            .sum::<f64>()
            / total_power)
            .sqrt()
    } else {
        0.0
    };

    // Skip DC
    let dominant_frequency = magnitudes
        .iter()
        .enumerate()
        .skip(1)
        .fold((0usize, 0.0f32), |best, (i, &m)| if m > best.1 { (i, m) } else { best })
        .0 as f32
        * freq_resolution;

    SpectrumAnalysis {
        mean_frequency: mean_frequency as f32,
        dominant_frequency,
        bandwidth: bandwidth as f32,
        rms: mono.rms(),
        peak: mono.peak(),
        band_energy: band_energy(&magnitudes, freq_resolution),
    }
}

fn band_energy(magnitudes: &[f32], freq_resolution: f32) -> BandEnergy {
    let mut low = 0.0f64;
    let mut mid = 0.0f64;
    let mut high = 0.0f64;
    for (i, &mag) in magnitudes.iter().enumerate() {
        let freq = i as f32 * freq_resolution;
        let power = (mag as f64) * (mag as f64);
        if freq < LOW_BAND_MAX_HZ {
            low += power;
        } else if freq < MID_BAND_MAX_HZ {
            mid += power;
        } else {
            high += power;
        }
    }
    let total = low + mid + high;
    if total <= 1e-20 {
        return BandEnergy::default();
    }
    BandEnergy {
        low: (low / total) as f32,
        mid: (mid / total) as f32,
        high: (high / total) as f32,
    }
}

/// Symmetric Hann window.
pub fn hann_window(size: usize) -> Vec<f32> {
    if size <= 1 {
        return vec![1.0; size];
    }
    (0..size)
        .map(|i| {
            0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / (size - 1) as f32).cos())
        })
        .collect()
}

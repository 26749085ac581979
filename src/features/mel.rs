//! Mel-scale utilities, filterbank generation and cepstral transforms.

use std::f64::consts::PI;

/// Amplitude floor before taking logarithms.
const AMIN: f64 = 1e-10;

/// Converts frequency in Hz to mel scale.
pub fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

/// Converts mel scale frequency back to Hz.
pub fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10.0_f64.powf(mel / 2595.0) - 1.0)
}

/// Creates the mel filterbank matrix.
///
/// Returns `[num_mels][half_fft]` where `half_fft = fft_size / 2 + 1`.
pub fn mel_filter_bank(
    num_mels: usize,
    fft_size: usize,
    sample_rate: u32,
    low_freq: f64,
    high_freq: f64,
) -> Vec<Vec<f64>> {
    let half_fft = fft_size / 2 + 1;
    let low_mel = hz_to_mel(low_freq);
    let high_mel = hz_to_mel(high_freq);

    // num_mels + 2 equally spaced mel points
    let step = (high_mel - low_mel) / (num_mels + 1) as f64;
    let mut bins: Vec<usize> = (0..num_mels + 2)
        .map(|i| {
            let hz = mel_to_hz(low_mel + i as f64 * step);
            let bin = (hz * fft_size as f64 / sample_rate as f64).round() as usize;
            bin.min(half_fft - 1)
        })
        .collect();

    // At least one bin per triangle edge
    for i in 1..bins.len() {
        if bins[i] <= bins[i - 1] {
            bins[i] = bins[i - 1] + 1;
        }
    }

    (0..num_mels)
        .map(|m| {
            let mut filter = vec![0.0f64; half_fft];
            let (left, center, right) = (bins[m], bins[m + 1], bins[m + 2]);
            for (k, weight) in filter.iter_mut().enumerate().take(center.min(half_fft)).skip(left) {
                *weight = (k - left) as f64 / (center - left) as f64;
            }
            for k in center..=right.min(half_fft - 1) {
                filter[k] = (right - k) as f64 / (right - center) as f64;
            }
            filter
        })
        .collect()
}

/// Project a power spectrum onto the filterbank.
pub fn apply_filter_bank(bank: &[Vec<f64>], power: &[f64]) -> Vec<f64> {
    bank.iter()
        .map(|filter| filter.iter().zip(power).map(|(w, p)| w * p).sum())
        .collect()
}

/// Convert a power spectrogram to decibels relative to `reference`, clipping
/// everything more than `top_db` below the loudest value.
pub fn power_to_db(spectrogram: &[Vec<f64>], reference: f64, top_db: f64) -> Vec<Vec<f64>> {
    let ref_db = 10.0 * reference.max(AMIN).log10();
    let mut db: Vec<Vec<f64>> = spectrogram
        .iter()
        .map(|frame| {
            frame
                .iter()
                .map(|&p| 10.0 * p.max(AMIN).log10() - ref_db)
                .collect()
        })
        .collect();

    let max_db = db
        .iter()
        .flat_map(|f| f.iter().copied())
        .fold(f64::NEG_INFINITY, f64::max);
    if max_db.is_finite() {
        let floor = max_db - top_db;
        for v in db.iter_mut().flat_map(|f| f.iter_mut()) {
            *v = v.max(floor);
        }
    }
    db
}

/// Orthonormal DCT-II, keeping the first `n_coeffs` coefficients.
pub fn dct_ortho(input: &[f64], n_coeffs: usize) -> Vec<f64> {
    let n = input.len();
    if n == 0 {
        return vec![0.0; n_coeffs];
    }
    let scale0 = (1.0 / n as f64).sqrt();
    let scale = (2.0 / n as f64).sqrt();
    (0..n_coeffs)
        .map(|k| {
            let sum: f64 = input
                .iter()
                .enumerate()
                .map(|(i, &x)| x * (PI * k as f64 * (2 * i + 1) as f64 / (2 * n) as f64).cos())
                .sum();
            sum * if k == 0 { scale0 } else { scale }
        })
        .collect()
}

/// Regression deltas over time (`width` frames each side, edges replicated).
///
/// `frames` is `[time][coeff]`.
pub fn delta(frames: &[Vec<f64>], width: usize) -> Vec<Vec<f64>> {
    let t = frames.len();
    if t == 0 || width == 0 {
        return frames.iter().map(|f| vec![0.0; f.len()]).collect();
    }
    let denom: f64 = 2.0 * (1..=width).map(|n| (n * n) as f64).sum::<f64>();
    let at = |i: isize| &frames[i.clamp(0, t as isize - 1) as usize];

    (0..t as isize)
        .map(|i| {
            let dims = frames[i as usize].len();
            (0..dims)
                .map(|d| {
                    (1..=width as isize)
                        .map(|n| n as f64 * (at(i + n)[d] - at(i - n)[d]))
                        .sum::<f64>()
                        / denom
                })
                .collect()
        })
        .collect()
}

/// Mean over time of a `[time][dim]` matrix.
pub fn time_mean(frames: &[Vec<f64>]) -> Vec<f64> {
    let Some(first) = frames.first() else {
        return Vec::new();
    };
    let mut mean = vec![0.0; first.len()];
    for frame in frames {
        for (m, v) in mean.iter_mut().zip(frame) {
            *m += v;
        }
    }
    for m in mean.iter_mut() {
        *m /= frames.len() as f64;
    }
    mean
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_hz_mel_roundtrip() {
        for &hz in &[0.0, 100.0, 440.0, 1000.0, 4000.0, 8000.0] {
            let back = mel_to_hz(hz_to_mel(hz));
            assert!((hz - back).abs() < 1e-6, "roundtrip failed for {} Hz", hz);
        }
    }

    #[test]
    fn test_mel_filter_bank_shape() {
        let bank = mel_filter_bank(80, 1024, 16000, 0.0, 8000.0);
        assert_eq!(bank.len(), 80);
        assert_eq!(bank[0].len(), 513);
        for filter in &bank {
            assert!(filter.iter().all(|&v| (0.0..=1.0).contains(&v)));
            assert!(filter.iter().any(|&v| v > 0.0));
        }
    }

    #[test]
    fn test_dct_of_constant_is_dc_only() {
        let coeffs = dct_ortho(&[2.0; 16], 4);
        assert_relative_eq!(coeffs[0], 2.0 * 16f64.sqrt(), epsilon = 1e-9);
        for c in &coeffs[1..] {
            assert!(c.abs() < 1e-9);
        }
    }

    #[test]
    fn test_dct_preserves_energy() {
        let input: Vec<f64> = (0..32).map(|i| ((i * 37) % 11) as f64 - 5.0).collect();
        let coeffs = dct_ortho(&input, 32);
        let e_in: f64 = input.iter().map(|x| x * x).sum();
        let e_out: f64 = coeffs.iter().map(|x| x * x).sum();
        assert_relative_eq!(e_in, e_out, max_relative = 1e-9);
    }

    #[test]
    fn test_delta_of_ramp_is_slope() {
        let frames: Vec<Vec<f64>> = (0..10).map(|t| vec![3.0 * t as f64]).collect();
        let d = delta(&frames, 2);
        for row in &d[2..8] {
            assert_relative_eq!(row[0], 3.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_power_to_db_floors_at_top_db() {
        let spec = vec![vec![1.0, 1e-12], vec![0.1, 0.0]];
        let db = power_to_db(&spec, 1.0, 80.0);
        assert_relative_eq!(db[0][0], 0.0, epsilon = 1e-9);
        assert_relative_eq!(db[1][0], -10.0, epsilon = 1e-9);
        assert_relative_eq!(db[0][1], -80.0, epsilon = 1e-9);
        assert_relative_eq!(db[1][1], -80.0, epsilon = 1e-9);
    }
}

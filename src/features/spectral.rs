//! Frame-level spectral shape and time-domain energy descriptors

/// Magnitude-weighted mean frequency of one frame (Hz). 0 for silent frames.
pub fn centroid(magnitudes: &[f32], bin_hz: f32) -> f64 {
    let total: f64 = magnitudes.iter().map(|&m| m as f64).sum();
    if total <= 1e-12 {
        return 0.0;
    }
    magnitudes
        .iter()
        .enumerate()
        .map(|(i, &m)| i as f64 * bin_hz as f64 * m as f64)
        .sum::<f64>()
        / total
}

/// Magnitude-weighted standard deviation around `centroid_hz`.
pub fn bandwidth(magnitudes: &[f32], bin_hz: f32, centroid_hz: f64) -> f64 {
    let total: f64 = magnitudes.iter().map(|&m| m as f64).sum();
    if total <= 1e-12 {
        return 0.0;
    }
    (magnitudes
        .iter()
        .enumerate()
        .map(|(i, &m)| {
            let d = i as f64 * bin_hz as f64 - centroid_hz;
            m as f64 * d * d
        })
        .sum::<f64>()
        / total)
        .sqrt()
}

/// Lowest frequency below which `percent` of the frame's magnitude lies.
pub fn rolloff(magnitudes: &[f32], bin_hz: f32, percent: f64) -> f64 {
    let total: f64 = magnitudes.iter().map(|&m| m as f64).sum();
    if total <= 1e-12 {
        return 0.0;
    }
    let target = total * percent;
    let mut cumulative = 0.0f64;
    for (i, &m) in magnitudes.iter().enumerate() {
        cumulative += m as f64;
        if cumulative >= target {
            return i as f64 * bin_hz as f64;
        }
    }
    (magnitudes.len().saturating_sub(1)) as f64 * bin_hz as f64
}

pub fn rms(frame: &[f32]) -> f64 {
    if frame.is_empty() {
        return 0.0;
    }
    (frame.iter().map(|&s| (s as f64).powi(2)).sum::<f64>() / frame.len() as f64).sqrt()
}

/// Fraction of adjacent sample pairs whose sign differs.
pub fn zero_crossing_rate(frame: &[f32]) -> f64 {
    if frame.len() < 2 {
        return 0.0;
    }
    let crossings = frame
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f64 / frame.len() as f64
}

/// Mean and population variance.
pub fn mean_variance(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    (mean, variance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_single_bin_shape() {
        let mut mags = vec![0.0f32; 33];
        mags[10] = 1.0;
        assert_relative_eq!(centroid(&mags, 100.0), 1000.0, epsilon = 1e-6);
        assert_relative_eq!(bandwidth(&mags, 100.0, 1000.0), 0.0, epsilon = 1e-6);
        assert_relative_eq!(rolloff(&mags, 100.0, 0.85), 1000.0, epsilon = 1e-6);
    }

    #[test]
    fn test_flat_spectrum_rolloff() {
        let mags = vec![1.0f32; 100];
        // 85 of 100 bins reached at index 84
        assert_relative_eq!(rolloff(&mags, 10.0, 0.85), 840.0, epsilon = 1e-6);
        assert_relative_eq!(centroid(&mags, 10.0), 495.0, epsilon = 1e-6);
    }

    #[test]
    fn test_silent_frame_is_zero() {
        let mags = vec![0.0f32; 16];
        assert_eq!(centroid(&mags, 10.0), 0.0);
        assert_eq!(rolloff(&mags, 10.0, 0.85), 0.0);
        assert_eq!(rms(&[0.0; 8]), 0.0);
    }

    #[test]
    fn test_zero_crossing_rate_of_alternating_signal() {
        let frame: Vec<f32> = (0..100).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        assert_relative_eq!(zero_crossing_rate(&frame), 0.99, epsilon = 1e-9);
        assert_eq!(zero_crossing_rate(&[0.5; 10]), 0.0);
    }

    #[test]
    fn test_mean_variance() {
        let (mean, var) = mean_variance(&[1.0, 2.0, 3.0, 4.0]);
        assert_relative_eq!(mean, 2.5);
        assert_relative_eq!(var, 1.25);
        assert_eq!(mean_variance(&[]), (0.0, 0.0));
    }
}

//! Butterworth filter design in second-order sections
//!
//! The analog prototype is transformed in pole-zero form and only collapsed to
//! biquads at the end, so high orders stay numerically stable.

use rustfft::num_complex::Complex64;
use std::f64::consts::PI;

use crate::error::{Result, VoxError};

/// Highest prototype order accepted by the designer.
pub const MAX_ORDER: usize = 16;

const PAIR_EPS: f64 = 1e-9;

/// Requested filter band.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterSpec {
    pub low_cutoff_hz: f64,
    pub high_cutoff_hz: f64,
    pub order: usize,
    pub sample_rate: u32,
}

/// One biquad, `a0` normalised to 1.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Biquad {
    pub b: [f64; 3],
    pub a: [f64; 2],
}

impl Biquad {
    /// DC gain, used for steady-state initial conditions.
    fn dc_gain(&self) -> f64 {
        let den = 1.0 + self.a[0] + self.a[1];
        if den.abs() < 1e-300 {
            0.0
        } else {
            (self.b[0] + self.b[1] + self.b[2]) / den
        }
    }

    fn response(&self, z_inv: Complex64) -> Complex64 {
        let z2 = z_inv * z_inv;
        (self.b[0] + z_inv * self.b[1] + z2 * self.b[2])
            / (1.0 + z_inv * self.a[0] + z2 * self.a[1])
    }

    /// Direct form II transposed over `data` in place, starting from `state`.
    fn run(&self, data: &mut [f64], mut state: [f64; 2]) {
        let [b0, b1, b2] = self.b;
        let [a1, a2] = self.a;
        for x in data.iter_mut() {
            let input = *x;
            let y = b0 * input + state[0];
            state[0] = b1 * input - a1 * y + state[1];
            state[1] = b2 * input - a2 * y;
            *x = y;
        }
    }
}

/// Cascade of second-order sections plus the spec it was designed from.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterCoefficients {
    pub spec: FilterSpec,
    pub sections: Vec<Biquad>,
}

impl FilterCoefficients {
    /// Complex frequency response at `freq_hz`.
    pub fn response(&self, freq_hz: f64) -> Complex64 {
        let w = 2.0 * PI * freq_hz / self.spec.sample_rate as f64;
        let z_inv = Complex64::from_polar(1.0, -w);
        self.sections
            .iter()
            .fold(Complex64::new(1.0, 0.0), |acc, s| acc * s.response(z_inv))
    }

    pub fn magnitude_db(&self, freq_hz: f64) -> f64 {
        20.0 * self.response(freq_hz).norm().max(1e-300).log10()
    }

    /// Single causal pass from rest.
    pub fn filter(&self, samples: &[f32]) -> Vec<f32> {
        let mut data: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
        for section in &self.sections {
            section.run(&mut data, [0.0, 0.0]);
        }
        data.into_iter().map(|s| s as f32).collect()
    }

    /// Zero-phase filtering: forward and backward passes over an odd-extended
    /// signal, each section started in its step-response steady state.
    pub fn filtfilt(&self, samples: &[f32]) -> Vec<f32> {
        let n = samples.len();
        if n == 0 {
            return Vec::new();
        }
        let x: Vec<f64> = samples.iter().map(|&s| s as f64).collect();
        let padlen = (3 * (2 * self.sections.len() + 1)).min(n - 1);

        let mut ext = Vec::with_capacity(n + 2 * padlen);
        for i in (1..=padlen).rev() {
            ext.push(2.0 * x[0] - x[i]);
        }
        ext.extend_from_slice(&x);
        for i in 0..padlen {
            ext.push(2.0 * x[n - 1] - x[n - 2 - i]);
        }

        let zi = self.steady_state();
        self.run_cascade(&mut ext, &zi);
        ext.reverse();
        self.run_cascade(&mut ext, &zi);
        ext.reverse();

        ext[padlen..padlen + n].iter().map(|&s| s as f32).collect()
    }

    fn run_cascade(&self, data: &mut [f64], zi: &[[f64; 2]]) {
        let x0 = data.first().copied().unwrap_or(0.0);
        for (section, z) in self.sections.iter().zip(zi) {
            section.run(data, [z[0] * x0, z[1] * x0]);
        }
    }

    /// Per-section state for a unit step that has been applied forever.
    fn steady_state(&self) -> Vec<[f64; 2]> {
        let mut scale = 1.0;
        self.sections
            .iter()
            .map(|s| {
                let g = s.dc_gain();
                let z = [
                    (s.b[1] + s.b[2] - g * (s.a[0] + s.a[1])) * scale,
                    (s.b[2] - s.a[1] * g) * scale,
                ];
                scale *= g;
                z
            })
            .collect()
    }
}

/// Designs Butterworth filters for a fixed sample rate.
#[derive(Clone, Copy, Debug, Default)]
pub struct FilterDesigner;

impl FilterDesigner {
    pub fn new() -> Self {
        Self
    }

    /// Band-pass Butterworth with `order` prototype poles (`order` sections).
    pub fn design_bandpass(
        &self,
        low_hz: f64,
        high_hz: f64,
        sample_rate: u32,
        order: usize,
    ) -> Result<FilterCoefficients> {
        let spec = FilterSpec {
            low_cutoff_hz: low_hz,
            high_cutoff_hz: high_hz,
            order,
            sample_rate,
        };
        validate(&spec)?;

        let fs2 = 2.0 * sample_rate as f64;
        let w1 = prewarp(low_hz, sample_rate);
        let w2 = prewarp(high_hz, sample_rate);
        let bw = w2 - w1;
        let w0 = (w1 * w2).sqrt();

        let mut poles = Vec::with_capacity(2 * order);
        for p in prototype_poles(order) {
            let p_lp = p * (bw / 2.0);
            let d = (p_lp * p_lp - w0 * w0).sqrt();
            poles.push(bilinear(p_lp + d, fs2));
            poles.push(bilinear(p_lp - d, fs2));
        }

        // One zero at z=1 and one at z=-1 per section
        let sections = pair_poles(&poles, [1.0, 0.0, -1.0]);
        let centre = (2.0 * (w0 / fs2).atan()) * sample_rate as f64 / (2.0 * PI);
        let coeffs = normalize_gain(FilterCoefficients { spec, sections }, centre);

        log::debug!(
            "Band-pass {:.1}-{:.1} Hz (normalized {:.4}-{:.4}), order {}, {} sections",
            low_hz,
            high_hz,
            low_hz / (sample_rate as f64 / 2.0),
            high_hz / (sample_rate as f64 / 2.0),
            order,
            coeffs.sections.len()
        );
        Ok(coeffs)
    }

    /// High-pass Butterworth. `order` prototype poles, rounded up to whole sections.
    pub fn design_highpass(
        &self,
        cutoff_hz: f64,
        sample_rate: u32,
        order: usize,
    ) -> Result<FilterCoefficients> {
        let nyquist = sample_rate as f64 / 2.0;
        let spec = FilterSpec {
            low_cutoff_hz: cutoff_hz,
            high_cutoff_hz: nyquist,
            order,
            sample_rate,
        };
        if !(cutoff_hz.is_finite() && cutoff_hz > 0.0 && cutoff_hz < nyquist) {
            return Err(spec_error(&spec, "cutoff must lie in (0, Nyquist)"));
        }
        check_order(&spec)?;

        let fs2 = 2.0 * sample_rate as f64;
        let wc = prewarp(cutoff_hz, sample_rate);
        let mut poles: Vec<Complex64> = prototype_poles(order)
            .into_iter()
            .map(|p| bilinear(wc / p, fs2))
            .collect();

        // Odd orders leave one real pole; pad with a pole at the origin so every
        // section gets a pair, and drop the matching zero.
        let sections = if order % 2 == 1 {
            poles.push(Complex64::new(0.0, 0.0));
            let mut sections = pair_poles(&poles, [1.0, -2.0, 1.0]);
            if let Some(last) = sections.iter_mut().find(|s| s.a[1] == 0.0) {
                last.b = [1.0, -1.0, 0.0];
            }
            sections
        } else {
            pair_poles(&poles, [1.0, -2.0, 1.0])
        };

        let coeffs = normalize_gain(FilterCoefficients { spec, sections }, nyquist);
        log::debug!(
            "High-pass {:.1} Hz, order {}, {} sections",
            cutoff_hz,
            order,
            coeffs.sections.len()
        );
        Ok(coeffs)
    }
}

fn validate(spec: &FilterSpec) -> Result<()> {
    let nyquist = spec.sample_rate as f64 / 2.0;
    if spec.sample_rate == 0 {
        return Err(spec_error(spec, "sample rate must be positive"));
    }
    if !spec.low_cutoff_hz.is_finite() || !spec.high_cutoff_hz.is_finite() {
        return Err(spec_error(spec, "cutoffs must be finite"));
    }
    if spec.low_cutoff_hz <= 0.0 {
        return Err(spec_error(spec, "low cutoff must be positive"));
    }
    if spec.low_cutoff_hz >= spec.high_cutoff_hz {
        return Err(spec_error(spec, "low cutoff must be below high cutoff"));
    }
    if spec.high_cutoff_hz >= nyquist {
        return Err(spec_error(
            spec,
            &format!("high cutoff must be below Nyquist ({} Hz)", nyquist),
        ));
    }
    check_order(spec)
}

fn check_order(spec: &FilterSpec) -> Result<()> {
    if spec.order == 0 || spec.order > MAX_ORDER {
        return Err(spec_error(
            spec,
            &format!("order must be between 1 and {}", MAX_ORDER),
        ));
    }
    Ok(())
}

fn spec_error(spec: &FilterSpec, reason: &str) -> VoxError {
    VoxError::InvalidFilterSpec {
        low_hz: spec.low_cutoff_hz,
        high_hz: spec.high_cutoff_hz,
        sample_rate: spec.sample_rate,
        order: spec.order,
        reason: reason.to_string(),
    }
}

/// Analog frequency (rad/s) that lands on `freq_hz` after the bilinear transform.
fn prewarp(freq_hz: f64, sample_rate: u32) -> f64 {
    2.0 * sample_rate as f64 * (PI * freq_hz / sample_rate as f64).tan()
}

/// Left-half-plane poles of the normalised analog Butterworth low-pass.
fn prototype_poles(order: usize) -> Vec<Complex64> {
    (0..order)
        .map(|k| {
            let theta = PI * (2 * k + order + 1) as f64 / (2 * order) as f64;
            Complex64::from_polar(1.0, theta)
        })
        .collect()
}

fn bilinear(s: Complex64, fs2: f64) -> Complex64 {
    (fs2 + s) / (fs2 - s)
}

/// Group digital poles into conjugate pairs (or pairs of real poles).
fn pair_poles(poles: &[Complex64], numerator: [f64; 3]) -> Vec<Biquad> {
    let mut sections = Vec::with_capacity(poles.len() / 2);

    for p in poles.iter().filter(|p| p.im > PAIR_EPS) {
        sections.push(Biquad {
            b: numerator,
            a: [-2.0 * p.re, p.norm_sqr()],
        });
    }

    let mut real: Vec<f64> = poles
        .iter()
        .filter(|p| p.im.abs() <= PAIR_EPS)
        .map(|p| p.re)
        .collect();
    real.sort_by(|a, b| a.total_cmp(b));
    for pair in real.chunks(2) {
        let (r1, r2) = (pair[0], pair.get(1).copied().unwrap_or(0.0));
        sections.push(Biquad {
            b: numerator,
            a: [-(r1 + r2), r1 * r2],
        });
    }
    sections
}

/// Scale the first section so the cascade has unity gain at `freq_hz`.
fn normalize_gain(mut coeffs: FilterCoefficients, freq_hz: f64) -> FilterCoefficients {
    let mag = coeffs.response(freq_hz).norm();
    if mag > 0.0 && mag.is_finite() {
        if let Some(first) = coeffs.sections.first_mut() {
            for b in first.b.iter_mut() {
                *b /= mag;
            }
        }
    }
    coeffs
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustfft::{num_complex::Complex, FftPlanner};

    /// xorshift white noise in [-1, 1)
    fn white_noise(len: usize, mut seed: u64) -> Vec<f32> {
        (0..len)
            .map(|_| {
                seed ^= seed << 13;
                seed ^= seed >> 7;
                seed ^= seed << 17;
                (seed >> 11) as f32 / (1u64 << 53) as f32 * 2.0 - 1.0
            })
            .collect()
    }

    #[test]
    fn test_rejects_invalid_bounds() {
        let designer = FilterDesigner::new();
        for (low, high, order) in [
            (0.0, 1000.0, 4),
            (2000.0, 1000.0, 4),
            (1000.0, 1000.0, 4),
            (100.0, 8000.0, 4),
            (100.0, 9000.0, 4),
            (100.0, 1000.0, 0),
            (f64::NAN, 1000.0, 4),
        ] {
            let result = designer.design_bandpass(low, high, 16000, order);
            assert!(
                matches!(result, Err(VoxError::InvalidFilterSpec { .. })),
                "expected rejection for {}-{} order {}",
                low,
                high,
                order
            );
        }
    }

    #[test]
    fn test_section_count_matches_order() {
        let designer = FilterDesigner::new();
        for order in 1..=8 {
            let coeffs = designer.design_bandpass(300.0, 3000.0, 16000, order).unwrap();
            assert_eq!(coeffs.sections.len(), order);
        }
    }

    #[test]
    fn test_unity_gain_in_passband() {
        let coeffs = FilterDesigner::new()
            .design_bandpass(300.0, 3000.0, 16000, 4)
            .unwrap();
        assert!(coeffs.magnitude_db(1000.0).abs() < 0.5);
        // -3 dB at the band edges
        assert!((coeffs.magnitude_db(300.0) + 3.01).abs() < 0.1);
        assert!((coeffs.magnitude_db(3000.0) + 3.01).abs() < 0.1);
        assert!(coeffs.magnitude_db(50.0) < -40.0);
        assert!(coeffs.magnitude_db(7000.0) < -40.0);
    }

    #[test]
    fn test_impulse_response_is_stable() {
        let designer = FilterDesigner::new();
        let mut impulse = vec![0.0f32; 8192];
        impulse[0] = 1.0;
        for (low, high, sr) in [(80.0, 7900.0, 16000), (300.0, 3400.0, 16000), (200.0, 4000.0, 44100)] {
            for order in 1..=8 {
                let coeffs = designer.design_bandpass(low, high, sr, order).unwrap();
                let h = coeffs.filter(&impulse);
                assert!(h.iter().all(|v| v.is_finite()), "non-finite output at order {}", order);
                let head = h[..512].iter().fold(0.0f32, |m, v| m.max(v.abs()));
                let tail = h[h.len() - 512..].iter().fold(0.0f32, |m, v| m.max(v.abs()));
                assert!(head > 0.0);
                assert!(tail < head * 1e-3, "order {} {}-{}: tail {} head {}", order, low, high, tail, head);
            }
        }
    }

    #[test]
    fn test_white_noise_out_of_band_attenuation() {
        let sr = 16000u32;
        let (low, high) = (400.0, 800.0);
        let n = 16384;
        let noise = white_noise(n, 0x9E37_79B9_7F4A_7C15);

        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(n);

        for order in 1..=8 {
            let coeffs = FilterDesigner::new().design_bandpass(low, high, sr, order).unwrap();
            let filtered = coeffs.filtfilt(&noise);
            let mut spectrum: Vec<Complex<f32>> =
                filtered.iter().map(|&s| Complex::new(s, 0.0)).collect();
            fft.process(&mut spectrum);

            let (mut in_power, mut in_bins, mut out_power, mut out_bins) = (0.0f64, 0, 0.0f64, 0);
            for (k, c) in spectrum.iter().enumerate().take(n / 2).skip(1) {
                let freq = k as f64 * sr as f64 / n as f64;
                let p = c.norm_sqr() as f64;
                if freq >= low && freq <= high {
                    in_power += p;
                    in_bins += 1;
                } else {
                    out_power += p;
                    out_bins += 1;
                }
            }
            let ratio_db =
                10.0 * ((in_power / in_bins as f64) / (out_power / out_bins as f64)).log10();
            assert!(ratio_db >= 15.0, "order {}: only {:.1} dB", order, ratio_db);
        }
    }

    #[test]
    fn test_filtfilt_preserves_length_and_passband_tone() {
        let coeffs = FilterDesigner::new()
            .design_bandpass(300.0, 3000.0, 16000, 4)
            .unwrap();
        let tone: Vec<f32> = (0..4000)
            .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / 16000.0).sin())
            .collect();
        let out = coeffs.filtfilt(&tone);
        assert_eq!(out.len(), tone.len());
        // zero phase: the middle of the signal lines up sample for sample
        for i in 1000..3000 {
            assert!((out[i] - tone[i]).abs() < 0.02);
        }
    }

    #[test]
    fn test_highpass_blocks_dc() {
        let designer = FilterDesigner::new();
        for order in 1..=5 {
            let coeffs = designer.design_highpass(80.0, 16000, order).unwrap();
            assert!(coeffs.magnitude_db(1.0) < -30.0, "order {}", order);
            assert!(coeffs.magnitude_db(4000.0).abs() < 0.1, "order {}", order);
            assert!((coeffs.magnitude_db(80.0) + 3.01).abs() < 0.1, "order {}", order);
        }
        assert!(designer.design_highpass(8000.0, 16000, 4).is_err());
    }
}

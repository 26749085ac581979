//! Preprocessing end to end
//!
//! A 1 kHz tone buried in white noise at 0 dB SNR for the whole clip goes
//! through the default preprocessing chain. The output SNR is measured by
//! projecting the processed signal onto the clean tone.

use voxsift::audio::decode::load_audio;
use voxsift::audio::wav::write_wav;
use voxsift::audio::AudioBuffer;
use voxsift::dsp::denoise::SpectralDenoiser;
use voxsift::dsp::filter::FilterDesigner;
use voxsift::pipeline::preprocess::{AudioPreprocessor, PreprocessOptions, ProcessingStep};

const SAMPLE_RATE: u32 = 16000;
const TONE_HZ: f64 = 1000.0;

/// 2 s of a steady 1 kHz tone.
fn clean_signal() -> Vec<f64> {
    (0..2 * SAMPLE_RATE as usize)
        .map(|i| {
            let t = i as f64 / SAMPLE_RATE as f64;
            0.5 * (2.0 * std::f64::consts::PI * TONE_HZ * t).sin()
        })
        .collect()
}

/// Deterministic white noise in [-1, 1].
fn generate_noise(samples: usize) -> Vec<f64> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    (0..samples)
        .map(|i| {
            let mut hasher = DefaultHasher::new();
            i.hash(&mut hasher);
            let h = hasher.finish();
            (h as f64 / u64::MAX as f64) * 2.0 - 1.0
        })
        .collect()
}

fn power(signal: &[f64]) -> f64 {
    signal.iter().map(|x| x * x).sum::<f64>() / signal.len() as f64
}

/// Mix clean and noise so the overall SNR is 0 dB.
fn noisy_mixture(clean: &[f64]) -> Vec<f64> {
    let noise = generate_noise(clean.len());
    let scale = (power(clean) / power(&noise)).sqrt();
    clean.iter().zip(&noise).map(|(s, n)| s + scale * n).collect()
}

/// SNR of `processed` with respect to `clean`, allowing any overall gain.
fn snr_db(clean: &[f64], processed: &[f64]) -> f64 {
    let n = clean.len().min(processed.len());
    let (clean, processed) = (&clean[..n], &processed[..n]);
    let dot: f64 = clean.iter().zip(processed).map(|(s, y)| s * y).sum();
    let gain = dot / clean.iter().map(|s| s * s).sum::<f64>();
    let signal: f64 = clean.iter().map(|s| (gain * s).powi(2)).sum();
    let residual: f64 = clean
        .iter()
        .zip(processed)
        .map(|(s, y)| (y - gain * s).powi(2))
        .sum();
    10.0 * (signal / residual).log10()
}

fn to_buffer(signal: &[f64]) -> AudioBuffer {
    AudioBuffer::new(signal.iter().map(|&x| x as f32).collect(), SAMPLE_RATE).unwrap()
}

fn preprocessor() -> AudioPreprocessor {
    AudioPreprocessor::new(FilterDesigner::new(), SpectralDenoiser::default(), SAMPLE_RATE)
}

#[test]
fn test_default_chain_improves_snr() {
    let clean = clean_signal();
    let noisy = noisy_mixture(&clean);
    let before = snr_db(&clean, &noisy);
    assert!(before.abs() < 0.5, "mixture SNR {:.2} dB", before);

    let input = to_buffer(&noisy);
    let (output, steps) = preprocessor()
        .process_buffer(&input, &PreprocessOptions::default())
        .unwrap();

    assert_eq!(output.frames(), input.frames());
    assert!(steps
        .iter()
        .any(|s| matches!(s, ProcessingStep::SpectralSubtraction { .. })));
    assert!(output.samples().iter().all(|x| x.is_finite()));

    let processed: Vec<f64> = output.samples().iter().map(|&x| x as f64).collect();
    let after = snr_db(&clean, &processed);
    assert!(
        after - before >= 3.0,
        "SNR went from {:.2} dB to {:.2} dB",
        before,
        after
    );
}

#[test]
fn test_wiener_stage_also_improves_snr() {
    let clean = clean_signal();
    let noisy = noisy_mixture(&clean);
    let options = PreprocessOptions {
        apply_spectral_subtraction: false,
        apply_wiener: true,
        wiener_noise_ratio: 0.5,
        ..PreprocessOptions::default()
    };
    let (output, _) = preprocessor().process_buffer(&to_buffer(&noisy), &options).unwrap();
    let processed: Vec<f64> = output.samples().iter().map(|&x| x as f64).collect();
    assert!(snr_db(&clean, &processed) > snr_db(&clean, &noisy));
}

#[test]
fn test_files_written_by_process_audio_keep_the_gain() {
    let dir = tempfile::tempdir().unwrap();
    let clean = clean_signal();
    let noisy = noisy_mixture(&clean);
    let input = dir.path().join("noisy_take.wav");
    write_wav(&input, &to_buffer(&noisy)).unwrap();

    let result = preprocessor()
        .process_audio(&input, dir.path(), &PreprocessOptions::default())
        .unwrap();
    assert_eq!(result.output_path, dir.path().join("noisy_take_preprocessed.wav"));
    let report = std::fs::read_to_string(&result.report_path).unwrap();
    assert!(report.starts_with("Audio Preprocessing Report"));

    let reloaded = load_audio(&result.output_path, SAMPLE_RATE).unwrap();
    assert!(reloaded.peak() <= 0.96);
    let processed: Vec<f64> = reloaded.samples().iter().map(|&x| x as f64).collect();
    assert!(snr_db(&clean, &processed) - snr_db(&clean, &noisy) >= 3.0);
}

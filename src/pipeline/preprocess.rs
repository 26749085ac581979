use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::decode::load_audio;
use crate::audio::spectrum::{analyze_spectrum, SpectrumAnalysis};
use crate::audio::wav::write_wav;
use crate::audio::AudioBuffer;
use crate::dsp::denoise::{NoisePower, SpectralDenoiser};
use crate::dsp::filter::FilterDesigner;
use crate::error::{Result, VoxError};
use crate::report;

/// Upper cutoffs within this fraction of Nyquist switch the band-pass to a
/// high-pass. Cutoffs further above Nyquist are rejected by the designer.
const NYQUIST_TOLERANCE: f64 = 0.01;

fn default_true() -> bool {
    true
}
fn default_low_freq() -> f64 {
    80.0
}
fn default_high_freq() -> f64 {
    8000.0
}
fn default_filter_order() -> usize {
    4
}
fn default_alpha() -> f32 {
    1.5
}
fn default_spectral_floor() -> f32 {
    0.1
}
fn default_wiener_noise_ratio() -> f32 {
    0.1
}
fn default_target_peak() -> f32 {
    0.95
}

/// Which preprocessing steps run, and with what parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreprocessOptions {
    #[serde(default = "default_true")]
    pub apply_bandpass: bool,
    #[serde(default = "default_low_freq")]
    pub low_freq: f64,
    #[serde(default = "default_high_freq")]
    pub high_freq: f64,
    #[serde(default = "default_filter_order")]
    pub filter_order: usize,
    #[serde(default = "default_true")]
    pub apply_spectral_subtraction: bool,
    /// Over-subtraction factor
    #[serde(default = "default_alpha")]
    pub noise_reduction_alpha: f32,
    #[serde(default = "default_spectral_floor")]
    pub spectral_floor: f32,
    #[serde(default)]
    pub apply_wiener: bool,
    /// Flat Wiener noise power as a fraction of the mean signal power
    #[serde(default = "default_wiener_noise_ratio")]
    pub wiener_noise_ratio: f32,
    #[serde(default = "default_true")]
    pub normalize: bool,
    #[serde(default = "default_target_peak")]
    pub target_peak: f32,
}

impl Default for PreprocessOptions {
    fn default() -> Self {
        Self {
            apply_bandpass: true,
            low_freq: default_low_freq(),
            high_freq: default_high_freq(),
            filter_order: default_filter_order(),
            apply_spectral_subtraction: true,
            noise_reduction_alpha: default_alpha(),
            spectral_floor: default_spectral_floor(),
            apply_wiener: false,
            wiener_noise_ratio: default_wiener_noise_ratio(),
            normalize: true,
            target_peak: default_target_peak(),
        }
    }
}

impl PreprocessOptions {
    /// Checks of the denoising and normalization parameters. Cutoffs are
    /// checked by the filter designer, which reports `InvalidFilterSpec`.
    pub fn validate(&self) -> Result<()> {
        if !self.noise_reduction_alpha.is_finite() || self.noise_reduction_alpha < 0.0 {
            return Err(VoxError::config(format!(
                "noise_reduction_alpha must be non-negative, got {}",
                self.noise_reduction_alpha
            )));
        }
        if !(0.0..=1.0).contains(&self.spectral_floor) {
            return Err(VoxError::config(format!(
                "spectral_floor must be in [0, 1], got {}",
                self.spectral_floor
            )));
        }
        if !self.wiener_noise_ratio.is_finite() || self.wiener_noise_ratio < 0.0 {
            return Err(VoxError::config(format!(
                "wiener_noise_ratio must be non-negative, got {}",
                self.wiener_noise_ratio
            )));
        }
        if !(self.target_peak > 0.0 && self.target_peak <= 1.0) {
            return Err(VoxError::config(format!(
                "target_peak must be in (0, 1], got {}",
                self.target_peak
            )));
        }
        Ok(())
    }
}

/// One applied transformation, in order.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ProcessingStep {
    Bandpass { low_hz: f64, high_hz: f64, order: usize },
    Highpass { cutoff_hz: f64, order: usize },
    SpectralSubtraction { alpha: f32, floor: f32 },
    Wiener { noise_ratio: f32 },
    Normalize { target_peak: f32 },
}

impl fmt::Display for ProcessingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingStep::Bandpass { low_hz, high_hz, order } => {
                write!(f, "Bandpass filter ({:.0}-{:.0} Hz, order {})", low_hz, high_hz, order)
            }
            ProcessingStep::Highpass { cutoff_hz, order } => {
                write!(f, "Highpass filter ({:.0} Hz, order {})", cutoff_hz, order)
            }
            ProcessingStep::SpectralSubtraction { alpha, floor } => write!(
                f,
                "Spectral subtraction (alpha={:.2}, floor={:.2})",
                alpha, floor
            ),
            ProcessingStep::Wiener { noise_ratio } => {
                write!(f, "Wiener filter (noise ratio={:.2})", noise_ratio)
            }
            ProcessingStep::Normalize { target_peak } => {
                write!(f, "Peak normalization ({:.2})", target_peak)
            }
        }
    }
}

/// Outcome of preprocessing one file.
#[derive(Clone, Debug, Serialize)]
pub struct ProcessingResult {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub report_path: PathBuf,
    pub sample_rate: u32,
    pub duration_secs: f32,
    pub steps: Vec<ProcessingStep>,
    pub before: SpectrumAnalysis,
    pub after: SpectrumAnalysis,
}

/// Filter, denoise and normalise recordings before separation.
pub struct AudioPreprocessor {
    designer: FilterDesigner,
    denoiser: SpectralDenoiser,
    sample_rate: u32,
}

impl AudioPreprocessor {
    pub fn new(designer: FilterDesigner, denoiser: SpectralDenoiser, sample_rate: u32) -> Self {
        Self {
            designer,
            denoiser,
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Load, clean up and save `input`, writing `<stem>_preprocessed.wav` and
    /// `<stem>_report.txt` into `output_dir`.
    pub fn process_audio(
        &self,
        input: &Path,
        output_dir: &Path,
        options: &PreprocessOptions,
    ) -> Result<ProcessingResult> {
        options.validate()?;
        log::info!("Preprocessing {}", input.display());

        let audio = load_audio(input, self.sample_rate)?;
        log::info!(
            "Loaded {:.2}s at {} Hz",
            audio.duration(),
            audio.sample_rate()
        );

        let before = analyze_spectrum(&audio);
        let (processed, steps) = self.process_buffer(&audio, options)?;
        let after = analyze_spectrum(&processed);

        std::fs::create_dir_all(output_dir).map_err(|e| VoxError::io(output_dir, e))?;
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        let output_path = output_dir.join(format!("{}_preprocessed.wav", stem));
        let report_path = output_dir.join(format!("{}_report.txt", stem));

        write_wav(&output_path, &processed)?;

        let result = ProcessingResult {
            input_path: input.to_path_buf(),
            output_path,
            report_path,
            sample_rate: processed.sample_rate(),
            duration_secs: processed.duration(),
            steps,
            before,
            after,
        };
        std::fs::write(&result.report_path, report::render_processing_report(&result))
            .map_err(|e| VoxError::io(&result.report_path, e))?;

        log::info!("Preprocessed audio saved to {}", result.output_path.display());
        Ok(result)
    }

    /// Run the enabled steps on an in-memory buffer. The input is not modified.
    pub fn process_buffer(
        &self,
        audio: &AudioBuffer,
        options: &PreprocessOptions,
    ) -> Result<(AudioBuffer, Vec<ProcessingStep>)> {
        options.validate()?;
        let mut current = audio.clone();
        let mut steps = Vec::new();
        let sample_rate = audio.sample_rate();

        if options.apply_bandpass {
            let nyquist = sample_rate as f64 / 2.0;
            let near_nyquist = (options.high_freq - nyquist).abs() <= nyquist * NYQUIST_TOLERANCE;
            let (coeffs, step) = if near_nyquist {
                log::info!(
                    "Upper cutoff {:.0} Hz reaches Nyquist, applying high-pass at {:.0} Hz",
                    options.high_freq,
                    options.low_freq
                );
                (
                    self.designer
                        .design_highpass(options.low_freq, sample_rate, options.filter_order)?,
                    ProcessingStep::Highpass {
                        cutoff_hz: options.low_freq,
                        order: options.filter_order,
                    },
                )
            } else {
                log::info!(
                    "Applying band-pass {:.0}-{:.0} Hz",
                    options.low_freq,
                    options.high_freq
                );
                (
                    self.designer.design_bandpass(
                        options.low_freq,
                        options.high_freq,
                        sample_rate,
                        options.filter_order,
                    )?,
                    ProcessingStep::Bandpass {
                        low_hz: options.low_freq,
                        high_hz: options.high_freq,
                        order: options.filter_order,
                    },
                )
            };
            current = filter_channels(&current, |x| coeffs.filtfilt(x))?;
            steps.push(step);
        }

        if options.apply_spectral_subtraction {
            current = self.denoiser.spectral_subtraction(
                &current,
                options.noise_reduction_alpha,
                options.spectral_floor,
                None,
            )?;
            steps.push(ProcessingStep::SpectralSubtraction {
                alpha: options.noise_reduction_alpha,
                floor: options.spectral_floor,
            });
        }

        if options.apply_wiener {
            log::info!("Applying Wiener filter");
            current = self
                .denoiser
                .wiener_filter(&current, &NoisePower::from_ratio(options.wiener_noise_ratio))?;
            steps.push(ProcessingStep::Wiener {
                noise_ratio: options.wiener_noise_ratio,
            });
        }

        if options.normalize {
            current = current.normalized(options.target_peak);
            steps.push(ProcessingStep::Normalize {
                target_peak: options.target_peak,
            });
        }

        Ok((current, steps))
    }
}

fn filter_channels<F>(audio: &AudioBuffer, filter: F) -> Result<AudioBuffer>
where
    F: Fn(&[f32]) -> Vec<f32>,
{
    let channels = audio.channels();
    if channels == 1 {
        return audio.with_samples(filter(audio.samples()));
    }
    let mut output = vec![0.0f32; audio.samples().len()];
    for ch in 0..channels {
        let channel: Vec<f32> = audio.samples().iter().skip(ch).step_by(channels).copied().collect();
        for (i, s) in filter(&channel).into_iter().enumerate() {
            output[i * channels + ch] = s;
        }
    }
    audio.with_samples(output)
}

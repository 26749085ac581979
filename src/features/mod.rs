//! Voice descriptors for speaker comparison
//!
//! Every clip is reduced to a [`FeatureVector`]: time-pooled MFCCs (with
//! deltas), a mean log-mel spectrum, spectral shape statistics, pitch, energy
//! and a tempo estimate.

pub mod mel;
pub mod pitch;
pub mod spectral;
pub mod tempo;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::audio::AudioBuffer;
use crate::dsp::stft::{Stft, StftConfig};
use crate::error::{Result, VoxError};
use pitch::{PitchTrack, YinDetector};
use tempo::{OnsetConfig, OnsetEnvelope};

/// Number of frames on each side used for delta regression.
const DELTA_WIDTH: usize = 2;
/// Dynamic range kept by the log-mel conversion.
const TOP_DB: f64 = 80.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Mfcc,
    Mel,
    SpectralCentroid,
    SpectralRolloff,
    SpectralBandwidth,
    F0,
    VoicedRatio,
    RmsEnergy,
    ZeroCrossingRate,
    Tempo,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 10] = [
        FeatureKind::Mfcc,
        FeatureKind::Mel,
        FeatureKind::SpectralCentroid,
        FeatureKind::SpectralRolloff,
        FeatureKind::SpectralBandwidth,
        FeatureKind::F0,
        FeatureKind::VoicedRatio,
        FeatureKind::RmsEnergy,
        FeatureKind::ZeroCrossingRate,
        FeatureKind::Tempo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureKind::Mfcc => "mfcc",
            FeatureKind::Mel => "mel",
            FeatureKind::SpectralCentroid => "spectral_centroid",
            FeatureKind::SpectralRolloff => "spectral_rolloff",
            FeatureKind::SpectralBandwidth => "spectral_bandwidth",
            FeatureKind::F0 => "f0",
            FeatureKind::VoicedRatio => "voiced_ratio",
            FeatureKind::RmsEnergy => "rms_energy",
            FeatureKind::ZeroCrossingRate => "zero_crossing_rate",
            FeatureKind::Tempo => "tempo",
        }
    }

    /// Human-readable label for reports ("Spectral Centroid").
    pub fn label(&self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureValue {
    Scalar(f64),
    Vector(Vec<f64>),
    Summary { mean: f64, variance: f64 },
}

impl FeatureValue {
    /// Collapse to one number: a scalar as-is, a one-element vector as its
    /// element, longer vectors by their mean, a summary by its mean.
    pub fn as_scalar(&self) -> f64 {
        match self {
            FeatureValue::Scalar(v) => *v,
            FeatureValue::Vector(v) if v.len() == 1 => v[0],
            FeatureValue::Vector(v) if v.is_empty() => 0.0,
            FeatureValue::Vector(v) => v.iter().sum::<f64>() / v.len() as f64,
            FeatureValue::Summary { mean, .. } => *mean,
        }
    }

    pub fn as_vector(&self) -> Vec<f64> {
        match self {
            FeatureValue::Vector(v) => v.clone(),
            other => vec![other.as_scalar()],
        }
    }
}

/// Ordered map of feature kind to value. Immutable once extracted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector {
    values: BTreeMap<FeatureKind, FeatureValue>,
}

impl FeatureVector {
    pub fn get(&self, kind: FeatureKind) -> Option<&FeatureValue> {
        self.values.get(&kind)
    }

    pub fn contains(&self, kind: FeatureKind) -> bool {
        self.values.contains_key(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = FeatureKind> + '_ {
        self.values.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureKind, &FeatureValue)> + '_ {
        self.values.iter().map(|(k, v)| (*k, v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy without `kind`.
    pub fn without(&self, kind: FeatureKind) -> FeatureVector {
        let mut values = self.values.clone();
        values.remove(&kind);
        FeatureVector { values }
    }
}

impl FromIterator<(FeatureKind, FeatureValue)> for FeatureVector {
    fn from_iter<I: IntoIterator<Item = (FeatureKind, FeatureValue)>>(iter: I) -> Self {
        FeatureVector {
            values: iter.into_iter().collect(),
        }
    }
}

fn default_n_fft() -> usize {
    1024
}
fn default_hop() -> usize {
    256
}
fn default_n_mfcc() -> usize {
    13
}
fn default_n_mels() -> usize {
    80
}
fn default_rolloff_percent() -> f64 {
    0.85
}
fn default_pitch_frame() -> usize {
    2048
}
fn default_pitch_hop() -> usize {
    512
}
fn default_pitch_min_hz() -> f32 {
    65.0
}
fn default_pitch_max_hz() -> f32 {
    2093.0
}
fn default_silence_rms() -> f32 {
    1e-3
}

/// Analysis parameters for [`FeatureExtractor`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FeatureConfig {
    #[serde(default = "default_n_fft")]
    pub n_fft: usize,
    #[serde(default = "default_hop")]
    pub hop: usize,
    #[serde(default = "default_n_mfcc")]
    pub n_mfcc: usize,
    #[serde(default = "default_n_mels")]
    pub n_mels: usize,
    #[serde(default = "default_rolloff_percent")]
    pub rolloff_percent: f64,
    /// YIN frame length (samples)
    #[serde(default = "default_pitch_frame")]
    pub pitch_frame: usize,
    #[serde(default = "default_pitch_hop")]
    pub pitch_hop: usize,
    #[serde(default = "default_pitch_min_hz")]
    pub pitch_min_hz: f32,
    #[serde(default = "default_pitch_max_hz")]
    pub pitch_max_hz: f32,
    /// Pitch frames quieter than this RMS are unvoiced
    #[serde(default = "default_silence_rms")]
    pub silence_rms: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            n_fft: default_n_fft(),
            hop: default_hop(),
            n_mfcc: default_n_mfcc(),
            n_mels: default_n_mels(),
            rolloff_percent: default_rolloff_percent(),
            pitch_frame: default_pitch_frame(),
            pitch_hop: default_pitch_hop(),
            pitch_min_hz: default_pitch_min_hz(),
            pitch_max_hz: default_pitch_max_hz(),
            silence_rms: default_silence_rms(),
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<()> {
        self.stft().validate()?;
        if self.n_mels == 0 || self.n_mfcc == 0 || self.n_mfcc > self.n_mels {
            return Err(VoxError::config(format!(
                "need 0 < n_mfcc <= n_mels, got n_mfcc={} n_mels={}",
                self.n_mfcc, self.n_mels
            )));
        }
        if !(0.0..=1.0).contains(&self.rolloff_percent) || self.rolloff_percent == 0.0 {
            return Err(VoxError::config(format!(
                "rolloff_percent must be in (0, 1], got {}",
                self.rolloff_percent
            )));
        }
        if self.pitch_frame < 64 || self.pitch_hop == 0 {
            return Err(VoxError::config("pitch_frame must be >= 64 and pitch_hop > 0"));
        }
        if !(self.pitch_min_hz > 0.0 && self.pitch_min_hz < self.pitch_max_hz) {
            return Err(VoxError::config(format!(
                "pitch range must satisfy 0 < min < max, got {}..{}",
                self.pitch_min_hz, self.pitch_max_hz
            )));
        }
        Ok(())
    }

    fn stft(&self) -> StftConfig {
        StftConfig {
            window_len: self.n_fft,
            hop: self.hop,
        }
    }
}

/// Turns audio into a [`FeatureVector`].
#[derive(Clone, Debug, Default)]
pub struct FeatureExtractor {
    config: FeatureConfig,
}

impl FeatureExtractor {
    pub fn new(config: FeatureConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Extract from a buffer, downmixing to mono first.
    pub fn extract(&self, audio: &AudioBuffer) -> Result<FeatureVector> {
        let mono = audio.to_mono();
        self.extract_samples(mono.samples(), mono.sample_rate())
    }

    pub fn extract_samples(&self, samples: &[f32], sample_rate: u32) -> Result<FeatureVector> {
        if samples.is_empty() {
            return Err(VoxError::invalid_audio("cannot extract features from empty audio"));
        }
        if sample_rate == 0 {
            return Err(VoxError::invalid_audio("sample rate must be positive"));
        }
        if samples.iter().any(|s| !s.is_finite()) {
            return Err(VoxError::invalid_audio("audio contains non-finite samples"));
        }

        let cfg = &self.config;
        let stft = Stft::analyze(samples, sample_rate, cfg.stft());
        let bin_hz = sample_rate as f32 / cfg.n_fft as f32;
        let magnitudes: Vec<Vec<f32>> = stft.frames.iter().map(|f| f.magnitudes().collect()).collect();
        let power: Vec<Vec<f64>> = magnitudes
            .iter()
            .map(|frame| frame.iter().map(|&m| (m as f64) * (m as f64)).collect())
            .collect();

        log::debug!(
            "Extracting features: {} samples @ {} Hz, {} frames",
            samples.len(),
            sample_rate,
            stft.frames.len()
        );

        let mut values = BTreeMap::new();

        // Cepstral and mel features
        let bank = mel::mel_filter_bank(cfg.n_mels, cfg.n_fft, sample_rate, 0.0, sample_rate as f64 / 2.0);
        let mel_power: Vec<Vec<f64>> = power.iter().map(|p| mel::apply_filter_bank(&bank, p)).collect();

        let mfcc_frames: Vec<Vec<f64>> = mel::power_to_db(&mel_power, 1.0, TOP_DB)
            .iter()
            .map(|frame| mel::dct_ortho(frame, cfg.n_mfcc))
            .collect();
        let d1 = mel::delta(&mfcc_frames, DELTA_WIDTH);
        let d2 = mel::delta(&d1, DELTA_WIDTH);
        let mut mfcc = mel::time_mean(&mfcc_frames);
        mfcc.extend(mel::time_mean(&d1));
        mfcc.extend(mel::time_mean(&d2));
        values.insert(FeatureKind::Mfcc, FeatureValue::Vector(mfcc));

        let peak_mel = mel_power
            .iter()
            .flat_map(|f| f.iter().copied())
            .fold(0.0f64, f64::max);
        let mel_db = mel::power_to_db(&mel_power, peak_mel, TOP_DB);
        values.insert(FeatureKind::Mel, FeatureValue::Vector(mel::time_mean(&mel_db)));

        // Spectral shape
        let mut centroids = Vec::with_capacity(magnitudes.len());
        let mut bandwidths = Vec::with_capacity(magnitudes.len());
        let mut rolloffs = Vec::with_capacity(magnitudes.len());
        for frame in &magnitudes {
            let c = spectral::centroid(frame, bin_hz);
            centroids.push(c);
            bandwidths.push(spectral::bandwidth(frame, bin_hz, c));
            rolloffs.push(spectral::rolloff(frame, bin_hz, cfg.rolloff_percent));
        }
        values.insert(FeatureKind::SpectralCentroid, summary(&centroids));
        values.insert(FeatureKind::SpectralRolloff, summary(&rolloffs));
        values.insert(FeatureKind::SpectralBandwidth, summary(&bandwidths));

        // Time-domain energy, framed like the STFT
        let frames = centered_frames(samples, cfg.n_fft, cfg.hop, stft.frames.len());
        let rms: Vec<f64> = frames.iter().map(|f| spectral::rms(f)).collect();
        let zcr: Vec<f64> = frames.iter().map(|f| spectral::zero_crossing_rate(f)).collect();
        values.insert(FeatureKind::RmsEnergy, summary(&rms));
        values.insert(FeatureKind::ZeroCrossingRate, summary(&zcr));

        // Pitch
        let mut yin = YinDetector::new(sample_rate, cfg.pitch_frame, cfg.pitch_min_hz, cfg.pitch_max_hz);
        let track = PitchTrack::analyze(samples, &mut yin, cfg.pitch_hop, cfg.silence_rms);
        let (f0_mean, f0_variance) = track.summary();
        if f0_mean == 0.0 {
            log::debug!("No voiced frames found");
        }
        values.insert(
            FeatureKind::F0,
            FeatureValue::Summary {
                mean: f0_mean,
                variance: f0_variance,
            },
        );
        values.insert(FeatureKind::VoicedRatio, FeatureValue::Scalar(track.voiced_ratio()));

        // Tempo
        let envelope = OnsetEnvelope::from_magnitudes(&magnitudes, sample_rate as f32 / cfg.hop as f32);
        let bpm = tempo::estimate_tempo(&envelope, &OnsetConfig::default());
        values.insert(FeatureKind::Tempo, FeatureValue::Scalar(bpm));

        Ok(FeatureVector { values })
    }
}

fn summary(values: &[f64]) -> FeatureValue {
    let (mean, variance) = spectral::mean_variance(values);
    FeatureValue::Summary { mean, variance }
}

/// `count` windows of `n` samples centred on multiples of `hop`, zero-padded.
fn centered_frames(samples: &[f32], n: usize, hop: usize, count: usize) -> Vec<Vec<f32>> {
    let pad = n / 2;
    (0..count)
        .map(|f| {
            let mut frame = vec![0.0f32; n];
            let center = f * hop;
            for (i, slot) in frame.iter_mut().enumerate() {
                let idx = (center + i).checked_sub(pad);
                if let Some(&s) = idx.and_then(|idx| samples.get(idx)) {
                    *slot = s;
                }
            }
            frame
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 16000;

    fn harmonic(f0: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let w = 2.0 * std::f32::consts::PI * f0 * i as f32 / SR as f32;
                0.4 * w.sin() + 0.2 * (2.0 * w).sin() + 0.1 * (3.0 * w).sin()
            })
            .collect()
    }

    #[test]
    fn test_extracts_every_kind() {
        let fv = FeatureExtractor::default()
            .extract_samples(&harmonic(180.0, SR as usize), SR)
            .unwrap();
        for kind in FeatureKind::ALL {
            assert!(fv.contains(kind), "missing {}", kind);
        }
        match fv.get(FeatureKind::Mfcc) {
            Some(FeatureValue::Vector(v)) => assert_eq!(v.len(), 39),
            other => panic!("unexpected mfcc {:?}", other),
        }
        match fv.get(FeatureKind::Mel) {
            Some(FeatureValue::Vector(v)) => assert_eq!(v.len(), 80),
            other => panic!("unexpected mel {:?}", other),
        }
        let f0 = fv.get(FeatureKind::F0).unwrap().as_scalar();
        assert!((f0 - 180.0).abs() < 5.0, "f0 {}", f0);
        assert!(fv.get(FeatureKind::VoicedRatio).unwrap().as_scalar() > 0.9);
    }

    #[test]
    fn test_silence_yields_sentinels() {
        let fv = FeatureExtractor::default()
            .extract_samples(&vec![0.0; 8000], SR)
            .unwrap();
        assert_eq!(
            fv.get(FeatureKind::F0),
            Some(&FeatureValue::Summary {
                mean: 0.0,
                variance: 0.0
            })
        );
        assert_eq!(fv.get(FeatureKind::VoicedRatio), Some(&FeatureValue::Scalar(0.0)));
        assert_eq!(
            fv.get(FeatureKind::Tempo),
            Some(&FeatureValue::Scalar(tempo::DEFAULT_TEMPO_BPM))
        );
    }

    #[test]
    fn test_empty_input_rejected() {
        let err = FeatureExtractor::default().extract_samples(&[], SR).unwrap_err();
        assert!(matches!(err, VoxError::InvalidAudioInput { .. }));
    }

    #[test]
    fn test_short_clip_still_extracts() {
        let fv = FeatureExtractor::default()
            .extract_samples(&harmonic(220.0, 300), SR)
            .unwrap();
        assert_eq!(fv.len(), FeatureKind::ALL.len());
    }

    #[test]
    fn test_as_scalar_coercion() {
        assert_eq!(FeatureValue::Vector(vec![0.8765]).as_scalar(), 0.8765);
        assert_eq!(FeatureValue::Vector(vec![1.0, 3.0]).as_scalar(), 2.0);
        assert_eq!(FeatureValue::Vector(vec![]).as_scalar(), 0.0);
        assert_eq!(
            FeatureValue::Summary {
                mean: 4.0,
                variance: 1.0
            }
            .as_scalar(),
            4.0
        );
    }

    #[test]
    fn test_feature_vector_json_uses_kind_names() {
        let fv: FeatureVector = [
            (FeatureKind::Tempo, FeatureValue::Scalar(120.0)),
            (FeatureKind::F0, FeatureValue::Summary { mean: 150.0, variance: 4.0 }),
        ]
        .into_iter()
        .collect();
        let json = serde_json::to_string(&fv).unwrap();
        assert_eq!(
            json,
            r#"{"f0":{"summary":{"mean":150.0,"variance":4.0}},"tempo":{"scalar":120.0}}"#
        );
        let back: FeatureVector = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fv);
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let cfg = FeatureConfig {
            n_mfcc: 100,
            ..FeatureConfig::default()
        };
        assert!(FeatureExtractor::new(cfg).is_err());
        let cfg = FeatureConfig {
            pitch_min_hz: 500.0,
            pitch_max_hz: 100.0,
            ..FeatureConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(FeatureKind::SpectralCentroid.label(), "Spectral Centroid");
        assert_eq!(FeatureKind::F0.label(), "F0");
    }
}

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Pipeline stage an error was raised in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Preprocessing,
    SourceSeparation,
    SpeakerSeparation,
    VoiceMatching,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Preprocessing => "preprocessing",
            Stage::SourceSeparation => "source_separation",
            Stage::SpeakerSeparation => "speaker_separation",
            Stage::VoiceMatching => "voice_matching",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum VoxError {
    #[error("Invalid audio input: {reason}")]
    InvalidAudioInput { reason: String },

    #[error(
        "Invalid filter spec (low={low_hz} Hz, high={high_hz} Hz, sample_rate={sample_rate} Hz, order={order}): {reason}"
    )]
    InvalidFilterSpec {
        low_hz: f64,
        high_hz: f64,
        sample_rate: u32,
        order: usize,
        reason: String,
    },

    #[error("No comparable feature kinds (reference: {reference:?}, candidate: {candidate:?})")]
    IncompatibleFeatureSets {
        reference: Vec<String>,
        candidate: Vec<String>,
    },

    #[error("{tool} exceeded its time budget of {timeout:?}\n{diagnostics}")]
    ExternalToolTimeout {
        tool: String,
        timeout: Duration,
        diagnostics: String,
    },

    #[error("{tool} failed ({status})\n{diagnostics}")]
    ExternalToolFailure {
        tool: String,
        status: String,
        diagnostics: String,
    },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<VoxError>,
    },
}

pub type Result<T> = std::result::Result<T, VoxError>;

impl VoxError {
    pub fn invalid_audio(reason: impl Into<String>) -> Self {
        VoxError::InvalidAudioInput {
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VoxError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn config(reason: impl Into<String>) -> Self {
        VoxError::InvalidConfig {
            reason: reason.into(),
        }
    }

    /// Tag the error with the stage it surfaced in. Already tagged errors keep
    /// their original stage.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            tagged @ VoxError::Stage { .. } => tagged,
            other => VoxError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage the error was raised in, if it was tagged.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            VoxError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_tagging_is_idempotent() {
        let err = VoxError::invalid_audio("empty")
            .in_stage(Stage::Preprocessing)
            .in_stage(Stage::VoiceMatching);
        assert_eq!(err.stage(), Some(Stage::Preprocessing));
        assert!(err.to_string().starts_with("preprocessing stage failed"));
    }

    #[test]
    fn test_filter_spec_message_names_parameters() {
        let err = VoxError::InvalidFilterSpec {
            low_hz: 9000.0,
            high_hz: 100.0,
            sample_rate: 16000,
            order: 4,
            reason: "low cutoff must be below high cutoff".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("low=9000"));
        assert!(msg.contains("order=4"));
    }
}

//! Machine-learning collaborators run as child processes
//!
//! Each tool reads one audio file and writes its results into an output
//! directory. The crate only depends on that file contract, so tools can be
//! swapped or mocked behind [`ExternalTool`].

pub mod demucs;
pub mod diarize;
pub mod process;
pub mod rttm;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::error::Result;

pub use demucs::DemucsSeparator;
pub use diarize::CommandDiarizer;

/// Files produced by one tool run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ToolOutput {
    /// Output name (stem or speaker label) to audio file
    pub files: BTreeMap<String, PathBuf>,
    /// Diarization timeline, when the tool writes one
    pub timeline: Option<PathBuf>,
}

pub trait ExternalTool: Send + Sync {
    fn name(&self) -> &str;

    /// Process `input`, writing results under `output_dir`. The child is
    /// killed once `timeout` elapses.
    fn run(&self, input: &Path, output_dir: &Path, timeout: Duration) -> Result<ToolOutput>;
}

//! Target speaker extraction
//!
//! Cleans up a mixed recording, hands it to external source-separation and
//! diarization tools, and picks the separated speaker that sounds most like a
//! reference recording.

pub mod audio;
pub mod config;
pub mod dsp;
pub mod error;
pub mod external;
pub mod features;
pub mod matching;
pub mod pipeline;
pub mod report;

pub use error::{Result, Stage, VoxError};

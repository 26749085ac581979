//! RTTM diarization timelines
//!
//! One segment per line:
//! `SPEAKER <file> <chan> <start> <duration> <NA> <NA> <label> <NA> <NA>`

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::error::{Result, VoxError};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DiarizationSegment {
    pub start: f64,
    pub end: f64,
    pub speaker: String,
}

impl DiarizationSegment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Parse RTTM text. Blank lines, `;;` comments and non-`SPEAKER` records are skipped.
pub fn parse_rttm(text: &str) -> std::result::Result<Vec<DiarizationSegment>, String> {
    let mut segments = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(";;") || line.starts_with('#') {
            continue;
        }
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields[0] != "SPEAKER" {
            continue;
        }
        if fields.len() < 8 {
            return Err(format!(
                "line {}: expected at least 8 fields, got {}",
                lineno + 1,
                fields.len()
            ));
        }
        let number = |idx: usize, what: &str| -> std::result::Result<f64, String> {
            fields[idx]
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && *v >= 0.0)
                .ok_or_else(|| format!("line {}: invalid {} `{}`", lineno + 1, what, fields[idx]))
        };
        let start = number(3, "start time")?;
        let duration = number(4, "duration")?;
        segments.push(DiarizationSegment {
            start,
            end: start + duration,
            speaker: fields[7].to_string(),
        });
    }
    segments.sort_by(|a, b| a.start.total_cmp(&b.start));
    Ok(segments)
}

pub fn read_rttm(path: &Path) -> Result<Vec<DiarizationSegment>> {
    let text = std::fs::read_to_string(path).map_err(|e| VoxError::io(path, e))?;
    parse_rttm(&text).map_err(|reason| VoxError::Decode {
        path: path.to_path_buf(),
        reason,
    })
}

/// Total speaking time per speaker label (seconds).
pub fn speaker_durations(segments: &[DiarizationSegment]) -> BTreeMap<String, f64> {
    let mut totals = BTreeMap::new();
    for seg in segments {
        *totals.entry(seg.speaker.clone()).or_insert(0.0) += seg.duration();
    }
    totals
}

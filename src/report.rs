//! Plain-text reports
//!
//! Numbers are always printed with fixed precision. Feature values are
//! collapsed to plain floats before formatting so no container type ever leaks
//! into a report.

use std::fmt::Write;
use std::path::Path;

use crate::audio::spectrum::SpectrumAnalysis;
use crate::features::{FeatureKind, FeatureValue, FeatureVector};
use crate::matching::MatchReport;
use crate::pipeline::preprocess::ProcessingResult;
use crate::pipeline::PipelineOutcome;

const RULE: &str = "==================================================";

/// Similarity or score with four decimals.
pub fn format_score(value: f64) -> String {
    format!("{:.4}", value)
}

/// Render one feature value. One-element vectors print as the scalar they hold.
pub fn format_value(value: &FeatureValue) -> String {
    match value {
        FeatureValue::Scalar(_) => format_score(value.as_scalar()),
        FeatureValue::Vector(v) if v.len() <= 1 => format_score(value.as_scalar()),
        FeatureValue::Vector(v) => format!("[{} values, mean {}]", v.len(), format_score(value.as_scalar())),
        FeatureValue::Summary { mean, variance } => {
            format!("{} (std {})", format_score(*mean), format_score(variance.max(0.0).sqrt()))
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn write_analysis(out: &mut String, title: &str, a: &SpectrumAnalysis) {
    let _ = writeln!(out, "{}:", title);
    let _ = writeln!(out, "  Mean frequency: {:.2} Hz", a.mean_frequency);
    let _ = writeln!(out, "  Dominant frequency: {:.2} Hz", a.dominant_frequency);
    let _ = writeln!(out, "  Spectral bandwidth: {:.2} Hz", a.bandwidth);
    let _ = writeln!(out, "  RMS: {:.4}", a.rms);
    let _ = writeln!(out, "  Peak: {:.4}", a.peak);
    let _ = writeln!(out, "  Energy distribution:");
    let _ = writeln!(out, "    Low freq (0-1kHz): {:.1}%", a.band_energy.low * 100.0);
    let _ = writeln!(out, "    Mid freq (1-4kHz): {:.1}%", a.band_energy.mid * 100.0);
    let _ = writeln!(out, "    High freq (4kHz+): {:.1}%", a.band_energy.high * 100.0);
    out.push('\n');
}

pub fn render_processing_report(result: &ProcessingResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Audio Preprocessing Report");
    let _ = writeln!(out, "{}\n", RULE);

    let _ = writeln!(out, "Input Information:");
    let _ = writeln!(out, "  Input file: {}", file_name(&result.input_path));
    let _ = writeln!(out, "  Output file: {}", file_name(&result.output_path));
    let _ = writeln!(out, "  Sample rate: {} Hz", result.sample_rate);
    let _ = writeln!(out, "  Duration: {:.2} s\n", result.duration_secs);

    let _ = writeln!(out, "Processing Steps Applied:");
    if result.steps.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for (i, step) in result.steps.iter().enumerate() {
        let _ = writeln!(out, "  {}. {}", i + 1, step);
    }
    out.push('\n');

    write_analysis(&mut out, "Original Audio Analysis", &result.before);
    write_analysis(&mut out, "Processed Audio Analysis", &result.after);

    let (b, a) = (&result.before.band_energy, &result.after.band_energy);
    let _ = writeln!(out, "Processing Effects:");
    let _ = writeln!(out, "  Low frequency energy change: {:+.1}%", (a.low - b.low) * 100.0);
    let _ = writeln!(out, "  Mid frequency energy change: {:+.1}%", (a.mid - b.mid) * 100.0);
    let _ = writeln!(out, "  High frequency energy change: {:+.1}%", (a.high - b.high) * 100.0);
    out
}

pub fn render_match_report(report: &MatchReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Voice Matching Analysis Report");
    let _ = writeln!(out, "{}\n", RULE);

    let _ = writeln!(out, "Analysis Information:");
    let _ = writeln!(out, "  Reference audio: {}", file_name(&report.reference));
    let _ = writeln!(
        out,
        "  Candidates analyzed: {}",
        report.ranked.len() + report.failures.len()
    );
    let _ = writeln!(out, "  Feature extraction: MFCC, Mel-spectrogram, Spectral, Pitch, Temporal\n");

    if let Some(best) = report.best() {
        let _ = writeln!(out, "Best Match Results:");
        let _ = writeln!(out, "  Best candidate: {}", best.id);
        let _ = writeln!(out, "  Composite score: {}\n", format_score(best.composite()));

        let _ = writeln!(out, "Detailed Feature Scores (Best Match):");
        for (kind, score) in best.similarity.ranked_scores() {
            let _ = writeln!(out, "  {}: {}", kind.label(), format_score(score));
        }
        out.push('\n');
    }

    let _ = writeln!(out, "All Candidates Ranking:");
    for (rank, candidate) in report.ranked.iter().enumerate() {
        let _ = writeln!(
            out,
            "  {}. {}: {}",
            rank + 1,
            candidate.id,
            format_score(candidate.composite())
        );
    }

    if !report.failures.is_empty() {
        out.push('\n');
        let _ = writeln!(out, "Skipped Candidates:");
        for failure in &report.failures {
            let _ = writeln!(out, "  {}: {}", failure.id, failure.error);
        }
    }
    out
}

/// Summary of a full extraction run.
pub fn render_pipeline_report(outcome: &PipelineOutcome) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Voice Processing Pipeline Report");
    let _ = writeln!(out, "{}\n", RULE);

    let mut completed = Vec::new();
    if outcome.preprocessing.is_some() {
        completed.push("preprocessing");
    }
    completed.extend(["source_separation", "speaker_separation", "voice_matching"]);

    let _ = writeln!(out, "Pipeline Information:");
    let _ = writeln!(out, "  Input file: {}", file_name(&outcome.input_path));
    let _ = writeln!(out, "  Reference file: {}", file_name(&outcome.reference_path));
    let _ = writeln!(out, "  Total duration: {:.1} seconds", outcome.elapsed_secs);
    let _ = writeln!(out, "  Steps completed: {}\n", completed.join(", "));

    if let Some(best) = outcome.matching.best() {
        let _ = writeln!(out, "Final Results:");
        let _ = writeln!(out, "  Best match: {}", best.id);
        let _ = writeln!(out, "  Similarity score: {}", format_score(best.composite()));
        let _ = writeln!(out, "  Output file: {}\n", file_name(&outcome.exported.audio_path));
    }

    let _ = writeln!(out, "Step Details:");
    if let Some(pre) = &outcome.preprocessing {
        let steps: Vec<String> = pre.steps.iter().map(|s| s.to_string()).collect();
        let _ = writeln!(out, "  Preprocessing:");
        let _ = writeln!(out, "    Output: {}", file_name(&pre.output_path));
        let _ = writeln!(out, "    Steps: {}", steps.join(", "));
    }
    let stems: Vec<&str> = outcome.stems.files.keys().map(String::as_str).collect();
    let _ = writeln!(out, "  Source Separation:");
    let _ = writeln!(out, "    Stems: {}", stems.join(", "));

    let _ = writeln!(out, "  Speaker Separation:");
    let _ = writeln!(out, "    Speakers found: {}", outcome.speakers.files.len());
    for (speaker, secs) in &outcome.speaker_durations {
        let _ = writeln!(out, "    {}: {:.2} s", speaker, secs);
    }

    let _ = writeln!(out, "  Voice Matching:");
    let _ = writeln!(
        out,
        "    Candidates analyzed: {}",
        outcome.matching.ranked.len() + outcome.matching.failures.len()
    );
    out
}

/// Feature listing for the `features` command.
pub fn render_features(path: &Path, features: &FeatureVector) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Features of {}", file_name(path));
    for kind in FeatureKind::ALL {
        if let Some(value) = features.get(kind) {
            let _ = writeln!(out, "  {}: {}", kind.label(), format_value(value));
        }
    }
    out
}

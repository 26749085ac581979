//! End-to-end target speaker extraction
//!
//! preprocess -> source separation -> speaker separation -> voice matching.
//! Each stage writes into its own directory under the output root, and
//! artifacts of finished stages are kept when a later stage fails.

pub mod batch;
pub mod preprocess;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{Result, Stage, VoxError};
use crate::external::rttm::{read_rttm, speaker_durations};
use crate::external::{ExternalTool, ToolOutput};
use crate::matching::{ExportedMatch, MatchReport, VoiceMatcher};
use crate::report;
use preprocess::{AudioPreprocessor, PreprocessOptions, ProcessingResult};

pub const SUMMARY_FILE: &str = "pipeline_summary.json";
pub const PIPELINE_REPORT_FILE: &str = "pipeline_report.txt";

/// Per-stage output directories under one root.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StageDirs {
    pub preprocessing: PathBuf,
    pub demucs_output: PathBuf,
    pub speaker_output: PathBuf,
    pub final_output: PathBuf,
}

impl StageDirs {
    pub fn new(root: &Path) -> Self {
        Self {
            preprocessing: root.join("preprocessing"),
            demucs_output: root.join("demucs_output"),
            speaker_output: root.join("speaker_output"),
            final_output: root.join("final_output"),
        }
    }

    pub fn create_all(&self) -> Result<()> {
        for dir in [
            &self.preprocessing,
            &self.demucs_output,
            &self.speaker_output,
            &self.final_output,
        ] {
            std::fs::create_dir_all(dir).map_err(|e| VoxError::io(dir, e))?;
        }
        Ok(())
    }
}

/// Everything a successful run produced.
#[derive(Clone, Debug, Serialize)]
pub struct PipelineOutcome {
    pub input_path: PathBuf,
    pub reference_path: PathBuf,
    pub dirs: StageDirs,
    /// `None` when preprocessing was skipped
    pub preprocessing: Option<ProcessingResult>,
    pub stems: ToolOutput,
    pub speakers: ToolOutput,
    /// Speaking time per speaker from the diarization timeline (seconds)
    pub speaker_durations: BTreeMap<String, f64>,
    pub matching: MatchReport,
    pub exported: ExportedMatch,
    pub elapsed_secs: f64,
}

pub struct ExtractionPipeline {
    preprocessor: AudioPreprocessor,
    options: PreprocessOptions,
    separator: Box<dyn ExternalTool>,
    diarizer: Box<dyn ExternalTool>,
    matcher: VoiceMatcher,
    tool_timeout: Duration,
    preprocess: bool,
}

impl ExtractionPipeline {
    pub fn new(
        preprocessor: AudioPreprocessor,
        separator: Box<dyn ExternalTool>,
        diarizer: Box<dyn ExternalTool>,
        matcher: VoiceMatcher,
    ) -> Self {
        Self {
            preprocessor,
            options: PreprocessOptions::default(),
            separator,
            diarizer,
            matcher,
            tool_timeout: Duration::from_secs(3600),
            preprocess: true,
        }
    }

    pub fn with_options(mut self, options: PreprocessOptions) -> Self {
        self.options = options;
        self
    }

    /// Time budget for each external tool run.
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Feed the input straight to source separation.
    pub fn skip_preprocessing(mut self, skip: bool) -> Self {
        self.preprocess = !skip;
        self
    }

    /// Extract the speaker in `input` that best matches `reference`, writing
    /// all stage outputs under `output_root`.
    pub fn run(&self, input: &Path, reference: &Path, output_root: &Path) -> Result<PipelineOutcome> {
        let started = Instant::now();
        let dirs = StageDirs::new(output_root);
        dirs.create_all()?;
        let total = if self.preprocess { 4 } else { 3 };
        let mut step = 0;
        let mut announce = |what: &str| {
            step += 1;
            log::info!("[{}/{}] {}", step, total, what);
        };

        let preprocessing = if self.preprocess {
            announce("Audio preprocessing");
            let result = self
                .preprocessor
                .process_audio(input, &dirs.preprocessing, &self.options)
                .map_err(|e| e.in_stage(Stage::Preprocessing))?;
            Some(result)
        } else {
            None
        };
        let separation_input = preprocessing
            .as_ref()
            .map(|r| r.output_path.clone())
            .unwrap_or_else(|| input.to_path_buf());

        announce("Source separation");
        let stems = self
            .separator
            .run(&separation_input, &dirs.demucs_output, self.tool_timeout)
            .map_err(|e| e.in_stage(Stage::SourceSeparation))?;
        let vocals = stems.files.get("vocals").cloned().ok_or_else(|| {
            VoxError::ExternalToolFailure {
                tool: self.separator.name().to_string(),
                status: "missing output".into(),
                diagnostics: "no vocals stem produced".into(),
            }
            .in_stage(Stage::SourceSeparation)
        })?;

        announce("Speaker separation");
        let speakers = self
            .diarizer
            .run(&vocals, &dirs.speaker_output, self.tool_timeout)
            .map_err(|e| e.in_stage(Stage::SpeakerSeparation))?;
        if speakers.files.is_empty() {
            return Err(VoxError::invalid_audio("speaker separation produced no speaker tracks")
                .in_stage(Stage::SpeakerSeparation));
        }
        let durations = match &speakers.timeline {
            Some(path) => match read_rttm(path) {
                Ok(segments) => speaker_durations(&segments),
                Err(e) => {
                    log::warn!("Ignoring unreadable timeline: {}", e);
                    BTreeMap::new()
                }
            },
            None => BTreeMap::new(),
        };
        for (speaker, secs) in &durations {
            log::info!("  {}: {:.1}s of speech", speaker, secs);
        }

        announce("Voice matching");
        let candidates: Vec<PathBuf> = speakers.files.values().cloned().collect();
        let matching = self
            .matcher
            .match_files(reference, &candidates)
            .map_err(|e| e.in_stage(Stage::VoiceMatching))?;
        let exported = self
            .matcher
            .export_best(&matching, &dirs.final_output)
            .map_err(|e| e.in_stage(Stage::VoiceMatching))?;

        let outcome = PipelineOutcome {
            input_path: input.to_path_buf(),
            reference_path: reference.to_path_buf(),
            dirs,
            preprocessing,
            stems,
            speakers,
            speaker_durations: durations,
            matching,
            exported,
            elapsed_secs: started.elapsed().as_secs_f64(),
        };
        write_summary(&outcome)?;

        log::info!(
            "Pipeline finished in {:.1}s, final output {}",
            outcome.elapsed_secs,
            outcome.exported.audio_path.display()
        );
        Ok(outcome)
    }
}

/// Write the JSON summary and the text report into the final output directory.
fn write_summary(outcome: &PipelineOutcome) -> Result<()> {
    let json_path = outcome.dirs.final_output.join(SUMMARY_FILE);
    let json = serde_json::to_string_pretty(outcome)
        .map_err(|e| VoxError::invalid_audio(format!("failed to serialize summary: {}", e)))?;
    std::fs::write(&json_path, json).map_err(|e| VoxError::io(&json_path, e))?;

    let report_path = outcome.dirs.final_output.join(PIPELINE_REPORT_FILE);
    std::fs::write(&report_path, report::render_pipeline_report(outcome))
        .map_err(|e| VoxError::io(&report_path, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::decode::load_audio;
    use crate::audio::wav::write_wav;
    use crate::audio::AudioBuffer;
    use crate::dsp::denoise::SpectralDenoiser;
    use crate::dsp::filter::FilterDesigner;
    use crate::features::FeatureExtractor;
    use crate::matching::SimilarityScorer;
    use std::f32::consts::PI;

    const SR: u32 = 16000;

    fn voice(f0: f32, seconds: f32) -> AudioBuffer {
        let n = (SR as f32 * seconds) as usize;
        let samples = (0..n)
            .map(|i| {
                let t = i as f32 / SR as f32;
                (1..=4)
                    .map(|h| 0.2 / h as f32 * (2.0 * PI * f0 * h as f32 * t).sin())
                    .sum()
            })
            .collect();
        AudioBuffer::new(samples, SR).unwrap()
    }

    /// Copies its input to `vocals.wav`.
    struct FakeSeparator;

    impl ExternalTool for FakeSeparator {
        fn name(&self) -> &str {
            "fake-demucs"
        }

        fn run(&self, input: &Path, output_dir: &Path, _timeout: Duration) -> Result<ToolOutput> {
            let vocals = output_dir.join("vocals.wav");
            std::fs::copy(input, &vocals).map_err(|e| VoxError::io(input, e))?;
            let mut out = ToolOutput::default();
            out.files.insert("vocals".into(), vocals);
            Ok(out)
        }
    }

    /// Writes two synthetic speakers and a timeline.
    struct FakeDiarizer;

    impl ExternalTool for FakeDiarizer {
        fn name(&self) -> &str {
            "fake-diarizer"
        }

        fn run(&self, _input: &Path, output_dir: &Path, _timeout: Duration) -> Result<ToolOutput> {
            let mut out = ToolOutput::default();
            for (label, f0) in [("SPEAKER_00", 120.0), ("SPEAKER_01", 230.0)] {
                let path = output_dir.join(format!("{}.wav", label));
                write_wav(&path, &voice(f0, 1.0))?;
                out.files.insert(label.into(), path);
            }
            let rttm = output_dir.join("vocals.rttm");
            std::fs::write(
                &rttm,
                "SPEAKER vocals 1 0.00 1.50 <NA> <NA> SPEAKER_00 <NA> <NA>\n\
                 SPEAKER vocals 1 1.50 0.75 <NA> <NA> SPEAKER_01 <NA> <NA>\n",
            )
            .map_err(|e| VoxError::io(&rttm, e))?;
            out.timeline = Some(rttm);
            Ok(out)
        }
    }

    struct BrokenTool;

    impl ExternalTool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }

        fn run(&self, _input: &Path, _output_dir: &Path, _timeout: Duration) -> Result<ToolOutput> {
            Err(VoxError::ExternalToolFailure {
                tool: "broken".into(),
                status: "exit status: 1".into(),
                diagnostics: "CUDA out of memory".into(),
            })
        }
    }

    fn pipeline(separator: Box<dyn ExternalTool>) -> ExtractionPipeline {
        ExtractionPipeline::new(
            AudioPreprocessor::new(FilterDesigner::new(), SpectralDenoiser::default(), SR),
            separator,
            Box::new(FakeDiarizer),
            VoiceMatcher::new(FeatureExtractor::default(), SimilarityScorer::default(), SR),
        )
    }

    #[test]
    fn test_runs_all_stages_with_injected_tools() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("mix.wav");
        write_wav(&input, &voice(150.0, 1.0)).unwrap();
        let reference = dir.path().join("ref.wav");
        write_wav(&reference, &voice(230.0, 1.0)).unwrap();

        let root = dir.path().join("out");
        let outcome = pipeline(Box::new(FakeSeparator))
            .run(&input, &reference, &root)
            .unwrap();

        assert!(root.join("preprocessing").join("mix_preprocessed.wav").exists());
        assert!(root.join("demucs_output").join("vocals.wav").exists());
        assert_eq!(outcome.matching.ranked.len(), 2);
        assert_eq!(outcome.matching.best().unwrap().id, "SPEAKER_01.wav");
        assert!((outcome.speaker_durations["SPEAKER_00"] - 1.5).abs() < 1e-9);

        let best = load_audio(&outcome.exported.audio_path, SR).unwrap();
        assert_eq!(best.frames(), SR as usize);
        assert!(root.join("final_output").join(SUMMARY_FILE).exists());
        assert!(root.join("final_output").join(PIPELINE_REPORT_FILE).exists());

        let summary: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(root.join("final_output").join(SUMMARY_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(summary["matching"]["ranked"][0]["id"], "SPEAKER_01.wav");
    }

    #[test]
    fn test_skip_preprocessing_feeds_input_directly() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("mix.wav");
        write_wav(&input, &voice(150.0, 1.0)).unwrap();
        let reference = dir.path().join("ref.wav");
        write_wav(&reference, &voice(120.0, 1.0)).unwrap();

        let root = dir.path().join("out");
        let outcome = pipeline(Box::new(FakeSeparator))
            .skip_preprocessing(true)
            .run(&input, &reference, &root)
            .unwrap();
        assert!(outcome.preprocessing.is_none());
        assert_eq!(outcome.matching.best().unwrap().id, "SPEAKER_00.wav");
    }

    #[test]
    fn test_failure_is_tagged_with_stage_and_keeps_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("mix.wav");
        write_wav(&input, &voice(150.0, 1.0)).unwrap();

        let root = dir.path().join("out");
        let err = pipeline(Box::new(BrokenTool))
            .run(&input, &dir.path().join("ref.wav"), &root)
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::SourceSeparation));
        assert!(err.to_string().contains("source_separation"));
        assert!(root.join("preprocessing").join("mix_preprocessed.wav").exists());
    }

    #[test]
    fn test_missing_reference_fails_in_matching() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("mix.wav");
        write_wav(&input, &voice(150.0, 1.0)).unwrap();

        let err = pipeline(Box::new(FakeSeparator))
            .run(&input, &dir.path().join("missing_ref.wav"), &dir.path().join("out"))
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::VoiceMatching));
    }
}

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::scorer::{SimilarityReport, SimilarityScorer};
use crate::audio::decode::load_audio;
use crate::audio::wav::write_wav;
use crate::error::{Result, VoxError};
use crate::features::{FeatureExtractor, FeatureVector};
use crate::report;

pub const BEST_MATCH_FILE: &str = "best_matched_voice.wav";
pub const MATCH_REPORT_FILE: &str = "voice_matching_report.txt";

#[derive(Clone, Debug, Serialize)]
pub struct RankedCandidate {
    pub id: String,
    /// Source file, when the candidate came from disk
    pub path: Option<PathBuf>,
    pub similarity: SimilarityReport,
}

impl RankedCandidate {
    pub fn composite(&self) -> f64 {
        self.similarity.composite
    }
}

/// A candidate that could not be analysed.
#[derive(Clone, Debug, Serialize)]
pub struct CandidateFailure {
    pub id: String,
    pub path: PathBuf,
    pub error: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct MatchReport {
    pub reference: PathBuf,
    /// Best first
    pub ranked: Vec<RankedCandidate>,
    pub failures: Vec<CandidateFailure>,
}

impl MatchReport {
    pub fn best(&self) -> Option<&RankedCandidate> {
        self.ranked.first()
    }
}

/// Files written by [`VoiceMatcher::export_best`].
#[derive(Clone, Debug, Serialize)]
pub struct ExportedMatch {
    pub audio_path: PathBuf,
    pub report_path: PathBuf,
}

/// Ranks candidate recordings by how closely they resemble a reference voice.
pub struct VoiceMatcher {
    extractor: FeatureExtractor,
    scorer: SimilarityScorer,
    sample_rate: u32,
}

impl VoiceMatcher {
    pub fn new(extractor: FeatureExtractor, scorer: SimilarityScorer, sample_rate: u32) -> Self {
        Self {
            extractor,
            scorer,
            sample_rate,
        }
    }

    pub fn features_of(&self, path: &Path) -> Result<FeatureVector> {
        let audio = load_audio(path, self.sample_rate)?;
        self.extractor.extract(&audio)
    }

    /// Score every candidate file against the reference. Candidates that
    /// fail to load or compare are recorded in `failures`; the run fails only
    /// when none succeeds.
    pub fn match_files(&self, reference: &Path, candidates: &[PathBuf]) -> Result<MatchReport> {
        if candidates.is_empty() {
            return Err(VoxError::invalid_audio("no candidate files to match against"));
        }

        log::info!("Extracting reference features from {}", reference.display());
        let reference_fv = self.features_of(reference)?;

        let mut ranked = Vec::with_capacity(candidates.len());
        let mut failures = Vec::new();
        for (i, path) in candidates.iter().enumerate() {
            let id = candidate_id(path);
            log::info!("Analyzing candidate {}/{}: {}", i + 1, candidates.len(), id);
            let scored = self
                .features_of(path)
                .and_then(|fv| self.scorer.score(&reference_fv, &fv));
            match scored {
                Ok(similarity) => {
                    log::info!("  {} composite={:.4}", id, similarity.composite);
                    ranked.push(RankedCandidate {
                        id,
                        path: Some(path.clone()),
                        similarity,
                    });
                }
                Err(e) => {
                    log::warn!("Skipping candidate {}: {}", path.display(), e);
                    failures.push(CandidateFailure {
                        id,
                        path: path.clone(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if ranked.is_empty() {
            let first = failures
                .first()
                .map(|f| format!(" (first error: {})", f.error))
                .unwrap_or_default();
            return Err(VoxError::invalid_audio(format!(
                "none of the {} candidates could be analysed{}",
                candidates.len(),
                first
            )));
        }

        sort_by_composite(&mut ranked);
        if let Some(best) = ranked.first() {
            log::info!("Best match: {} ({:.4})", best.id, best.composite());
        }

        Ok(MatchReport {
            reference: reference.to_path_buf(),
            ranked,
            failures,
        })
    }

    /// Rank already-extracted candidates. Ties keep their input order.
    pub fn rank(
        &self,
        reference: &FeatureVector,
        candidates: Vec<(String, FeatureVector)>,
    ) -> Result<Vec<RankedCandidate>> {
        let mut ranked = candidates
            .into_iter()
            .map(|(id, fv)| {
                Ok(RankedCandidate {
                    id,
                    path: None,
                    similarity: self.scorer.score(reference, &fv)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        sort_by_composite(&mut ranked);
        Ok(ranked)
    }

    /// Write the best candidate as `best_matched_voice.wav` and the text
    /// report as `voice_matching_report.txt` under `output_dir`.
    pub fn export_best(&self, report: &MatchReport, output_dir: &Path) -> Result<ExportedMatch> {
        let best = report
            .best()
            .ok_or_else(|| VoxError::invalid_audio("match report has no ranked candidates"))?;
        let source = best.path.as_deref().ok_or_else(|| {
            VoxError::invalid_audio(format!("best candidate {} has no source file", best.id))
        })?;

        std::fs::create_dir_all(output_dir).map_err(|e| VoxError::io(output_dir, e))?;

        let audio = load_audio(source, self.sample_rate)?;
        let audio_path = output_dir.join(BEST_MATCH_FILE);
        write_wav(&audio_path, &audio)?;

        let report_path = output_dir.join(MATCH_REPORT_FILE);
        std::fs::write(&report_path, report::render_match_report(report))
            .map_err(|e| VoxError::io(&report_path, e))?;

        log::info!("Best match saved to {}", audio_path.display());
        Ok(ExportedMatch {
            audio_path,
            report_path,
        })
    }
}

/// Descending by composite. `sort_by` is stable, so ties keep input order.
fn sort_by_composite(ranked: &mut [RankedCandidate]) {
    ranked.sort_by(|a, b| b.composite().total_cmp(&a.composite()));
}

fn candidate_id(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

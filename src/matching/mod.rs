pub mod matcher;
pub mod scorer;

pub use matcher::{CandidateFailure, ExportedMatch, MatchReport, RankedCandidate, VoiceMatcher};
pub use scorer::{SimilarityReport, SimilarityScorer};

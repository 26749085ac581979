use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::process::run_command;
use super::{ExternalTool, ToolOutput};
use crate::error::{Result, VoxError};

pub const INPUT_PLACEHOLDER: &str = "{input}";
pub const OUTPUT_DIR_PLACEHOLDER: &str = "{output_dir}";

fn default_program() -> String {
    "python".to_string()
}
fn default_args() -> Vec<String> {
    vec![
        "diarize.py".to_string(),
        "--input".to_string(),
        INPUT_PLACEHOLDER.to_string(),
        "--output-dir".to_string(),
        OUTPUT_DIR_PLACEHOLDER.to_string(),
    ]
}

/// Command line of a diarization/separation script.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiarizerConfig {
    #[serde(default = "default_program")]
    pub program: String,
    /// Arguments; `{input}` and `{output_dir}` are substituted per run
    #[serde(default = "default_args")]
    pub args: Vec<String>,
}

impl Default for DiarizerConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
        }
    }
}

/// Speaker diarization and separation delegated to an external script.
///
/// The script must write one `SPEAKER_*.wav` (or `speaker_*.wav`) file per
/// speaker into the output directory and may write an `.rttm` timeline next
/// to them.
#[derive(Clone, Debug, Default)]
pub struct CommandDiarizer {
    config: DiarizerConfig,
}

impl CommandDiarizer {
    pub fn new(config: DiarizerConfig) -> Self {
        Self { config }
    }

    pub fn args(&self, input: &Path, output_dir: &Path) -> Vec<String> {
        let input = input.display().to_string();
        let output_dir = output_dir.display().to_string();
        self.config
            .args
            .iter()
            .map(|a| {
                a.replace(INPUT_PLACEHOLDER, &input)
                    .replace(OUTPUT_DIR_PLACEHOLDER, &output_dir)
            })
            .collect()
    }
}

impl ExternalTool for CommandDiarizer {
    fn name(&self) -> &str {
        "diarizer"
    }

    fn run(&self, input: &Path, output_dir: &Path, timeout: Duration) -> Result<ToolOutput> {
        std::fs::create_dir_all(output_dir).map_err(|e| VoxError::io(output_dir, e))?;
        log::info!("Separating speakers with {}", self.config.program);

        run_command(self.name(), &self.config.program, &self.args(input, output_dir), timeout)?;

        let output = collect_outputs(output_dir)?;
        if output.files.is_empty() {
            return Err(VoxError::ExternalToolFailure {
                tool: self.name().to_string(),
                status: "missing output".into(),
                diagnostics: format!("no speaker files in {}", output_dir.display()),
            });
        }
        log::info!("Found {} speaker track(s)", output.files.len());
        Ok(output)
    }
}

/// Scan a directory for per-speaker WAV files and an RTTM timeline.
pub fn collect_outputs(dir: &Path) -> Result<ToolOutput> {
    let entries = std::fs::read_dir(dir).map_err(|e| VoxError::io(dir, e))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    paths.sort();

    let mut output = ToolOutput::default();
    for path in paths {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let lower = name.to_ascii_lowercase();
        if lower.starts_with("speaker_") && lower.ends_with(".wav") {
            let label = name[..name.len() - 4].to_string();
            output.files.insert(label, path.clone());
        } else if lower.ends_with(".rttm") && output.timeline.is_none() {
            output.timeline = Some(path.clone());
        }
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders_are_substituted() {
        let diarizer = CommandDiarizer::new(DiarizerConfig {
            program: "python".into(),
            args: vec!["sep.py".into(), "{input}".into(), "--out={output_dir}".into()],
        });
        assert_eq!(
            diarizer.args(Path::new("/a/vocals.wav"), Path::new("/b/speakers")),
            vec!["sep.py", "/a/vocals.wav", "--out=/b/speakers"]
        );
    }

    #[test]
    fn test_collects_speaker_files_and_timeline() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["SPEAKER_00.wav", "speaker_01.wav", "vocals.rttm", "notes.txt", "mix.wav"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let output = collect_outputs(dir.path()).unwrap();
        let labels: Vec<&str> = output.files.keys().map(String::as_str).collect();
        assert_eq!(labels, vec!["SPEAKER_00", "speaker_01"]);
        assert_eq!(output.timeline, Some(dir.path().join("vocals.rttm")));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_requires_speaker_files() {
        let dir = tempfile::tempdir().unwrap();
        let diarizer = CommandDiarizer::new(DiarizerConfig {
            program: "sh".into(),
            args: vec!["-c".into(), "touch '{output_dir}/SPEAKER_00.wav'".into()],
        });
        let out = dir.path().join("speakers");
        let output = diarizer
            .run(Path::new("in.wav"), &out, Duration::from_secs(10))
            .unwrap();
        assert_eq!(output.files.len(), 1);

        let silent = CommandDiarizer::new(DiarizerConfig {
            program: "true".into(),
            args: vec![],
        });
        let empty = dir.path().join("empty");
        assert!(matches!(
            silent.run(Path::new("in.wav"), &empty, Duration::from_secs(10)),
            Err(VoxError::ExternalToolFailure { .. })
        ));
    }
}

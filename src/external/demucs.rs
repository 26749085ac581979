use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::process::run_command;
use super::{ExternalTool, ToolOutput};
use crate::error::{Result, VoxError};

pub const FOUR_STEMS: [&str; 4] = ["vocals", "drums", "bass", "other"];

fn default_python() -> String {
    "python".to_string()
}
fn default_model() -> String {
    "htdemucs".to_string()
}
fn default_device() -> String {
    "cpu".to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DemucsConfig {
    /// Interpreter with the `demucs` package installed. May include a
    /// launcher prefix such as `conda run -n demucs python`.
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_device")]
    pub device: String,
    /// Split into `<stem>` and `no_<stem>` only
    #[serde(default)]
    pub two_stems: Option<String>,
}

impl Default for DemucsConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            model: default_model(),
            device: default_device(),
            two_stems: None,
        }
    }
}

/// Music source separation through `python -m demucs`.
#[derive(Clone, Debug, Default)]
pub struct DemucsSeparator {
    config: DemucsConfig,
}

impl DemucsSeparator {
    pub fn new(config: DemucsConfig) -> Self {
        Self { config }
    }

    /// Program and full argument list for separating `input`.
    pub fn command(&self, input: &Path, output_dir: &Path) -> (String, Vec<String>) {
        let mut words = self.config.python.split_whitespace().map(str::to_string);
        let program = words.next().unwrap_or_else(default_python);
        let mut args: Vec<String> = words.collect();
        args.extend(self.args(input, output_dir));
        (program, args)
    }

    pub fn args(&self, input: &Path, output_dir: &Path) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            "demucs".into(),
            "--name".into(),
            self.config.model.clone(),
            "--out".into(),
            output_dir.display().to_string(),
            "--device".into(),
            self.config.device.clone(),
        ];
        if let Some(stem) = &self.config.two_stems {
            args.extend(["--two-stems".to_string(), stem.clone()]);
        }
        args.push(input.display().to_string());
        args
    }

    /// Directory demucs writes the stems of `input` into.
    pub fn stem_dir(&self, input: &Path, output_dir: &Path) -> PathBuf {
        let name = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        output_dir.join(&self.config.model).join(name)
    }

    fn expected_stems(&self) -> Vec<String> {
        match &self.config.two_stems {
            Some(stem) => vec![stem.clone(), format!("no_{}", stem)],
            None => FOUR_STEMS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ExternalTool for DemucsSeparator {
    fn name(&self) -> &str {
        "demucs"
    }

    fn run(&self, input: &Path, output_dir: &Path, timeout: Duration) -> Result<ToolOutput> {
        std::fs::create_dir_all(output_dir).map_err(|e| VoxError::io(output_dir, e))?;
        log::info!(
            "Separating sources with demucs (model={}, device={})",
            self.config.model,
            self.config.device
        );

        let (program, args) = self.command(input, output_dir);
        run_command(self.name(), &program, &args, timeout)?;

        let stem_dir = self.stem_dir(input, output_dir);
        let mut output = ToolOutput::default();
        for stem in self.expected_stems() {
            let path = stem_dir.join(format!("{}.wav", stem));
            if path.is_file() {
                log::info!("  {}: {}", stem, path.display());
                output.files.insert(stem, path);
            } else {
                log::warn!("Stem {} not found at {}", stem, path.display());
            }
        }

        if !output.files.contains_key("vocals") {
            return Err(VoxError::ExternalToolFailure {
                tool: self.name().to_string(),
                status: "missing output".into(),
                diagnostics: format!("no vocals stem in {}", stem_dir.display()),
            });
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line() {
        let sep = DemucsSeparator::default();
        let args = sep.args(Path::new("/in/mix.wav"), Path::new("/out/demucs_output"));
        assert_eq!(
            args,
            vec![
                "-m",
                "demucs",
                "--name",
                "htdemucs",
                "--out",
                "/out/demucs_output",
                "--device",
                "cpu",
                "/in/mix.wav"
            ]
        );
        assert_eq!(
            sep.stem_dir(Path::new("/in/mix.wav"), Path::new("/out")),
            PathBuf::from("/out/htdemucs/mix")
        );
    }

    #[test]
    fn test_two_stem_mode() {
        let sep = DemucsSeparator::new(DemucsConfig {
            two_stems: Some("vocals".into()),
            ..DemucsConfig::default()
        });
        let args = sep.args(Path::new("a.wav"), Path::new("out"));
        assert!(args.windows(2).any(|w| w[0] == "--two-stems" && w[1] == "vocals"));
        assert_eq!(sep.expected_stems(), vec!["vocals", "no_vocals"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_collects_stems_written_by_the_tool() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("mix.wav");
        std::fs::write(&input, b"").unwrap();
        let out = dir.path().join("demucs_output");

        // Stand-in interpreter: `sh fake_python.sh -m demucs ...` writes the stems
        let script = format!(
            "mkdir -p '{0}/htdemucs/mix' && touch '{0}/htdemucs/mix/vocals.wav' '{0}/htdemucs/mix/drums.wav'",
            out.display()
        );
        let fake = dir.path().join("fake_python.sh");
        std::fs::write(&fake, format!("{}\n", script)).unwrap();

        let sep = DemucsSeparator::new(DemucsConfig {
            python: format!("sh {}", fake.display()),
            ..DemucsConfig::default()
        });
        let output = sep.run(&input, &out, Duration::from_secs(10)).unwrap();
        assert_eq!(output.files.len(), 2);
        assert!(output.files["vocals"].ends_with("htdemucs/mix/vocals.wav"));
        assert!(output.timeline.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_vocals_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let sep = DemucsSeparator::new(DemucsConfig {
            python: "true".into(),
            ..DemucsConfig::default()
        });
        let err = sep
            .run(&dir.path().join("mix.wav"), dir.path(), Duration::from_secs(10))
            .unwrap_err();
        assert!(matches!(err, VoxError::ExternalToolFailure { .. }));
    }
}

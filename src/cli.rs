use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "voxsift", about = "Extract a target speaker's voice from mixed recordings")]
pub struct Cli {
    /// Config file (defaults to ./voxsift.toml or ~/.config/voxsift/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Working sample rate; inputs are resampled to it
    #[arg(long, global = true, default_value_t = 16000)]
    pub sample_rate: u32,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Filter, denoise and normalize one recording
    Preprocess {
        /// Input audio file (WAV, MP3, FLAC, OGG, M4A)
        input: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "output/preprocessing")]
        output: PathBuf,

        #[command(flatten)]
        steps: StepArgs,
    },

    /// Preprocess many recordings in parallel
    Batch {
        /// Input audio files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output directory
        #[arg(short, long, default_value = "output/preprocessing")]
        output: PathBuf,

        /// Worker threads (0 = all cores)
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        #[command(flatten)]
        steps: StepArgs,
    },

    /// Rank candidate recordings by similarity to a reference voice
    Match {
        /// Reference recording of the target speaker
        #[arg(short, long)]
        reference: PathBuf,

        /// Candidate recordings
        #[arg(required = true)]
        candidates: Vec<PathBuf>,

        /// Directory for the best match and the report
        #[arg(short, long, default_value = "output/final_output")]
        output: PathBuf,
    },

    /// Print the voice features of a recording
    Features {
        input: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run the full pipeline: preprocess, separate, diarize, match
    Extract {
        /// Mixed input recording
        input: PathBuf,

        /// Reference recording of the target speaker
        #[arg(short, long)]
        reference: PathBuf,

        /// Output root; stage directories are created inside it
        #[arg(short, long, default_value = "output")]
        output: PathBuf,

        /// Send the input to source separation unchanged
        #[arg(long)]
        skip_preprocessing: bool,

        /// Time budget per external tool in seconds
        #[arg(long)]
        timeout: Option<u64>,

        #[command(flatten)]
        steps: StepArgs,
    },
}

/// Overrides for the `[preprocess]` config section.
#[derive(Args, Debug, Default)]
pub struct StepArgs {
    /// Band-pass lower cutoff (Hz)
    #[arg(long)]
    pub low_freq: Option<f64>,

    /// Band-pass upper cutoff (Hz)
    #[arg(long)]
    pub high_freq: Option<f64>,

    /// Butterworth filter order
    #[arg(long)]
    pub filter_order: Option<usize>,

    /// Spectral subtraction over-subtraction factor
    #[arg(long)]
    pub alpha: Option<f32>,

    /// Skip the band-pass filter
    #[arg(long)]
    pub no_bandpass: bool,

    /// Skip spectral subtraction
    #[arg(long)]
    pub no_denoise: bool,

    /// Also apply a Wiener filter
    #[arg(long)]
    pub wiener: bool,

    /// Skip peak normalization
    #[arg(long)]
    pub no_normalize: bool,
}

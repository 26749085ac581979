mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use cli::{Cli, Command, StepArgs};
use voxsift::config::{self, Config};
use voxsift::dsp::denoise::SpectralDenoiser;
use voxsift::dsp::filter::FilterDesigner;
use voxsift::external::{CommandDiarizer, DemucsSeparator};
use voxsift::features::FeatureExtractor;
use voxsift::matching::{SimilarityScorer, VoiceMatcher};
use voxsift::pipeline::batch::{BatchOutcome, BatchPreprocessor};
use voxsift::pipeline::preprocess::{AudioPreprocessor, PreprocessOptions};
use voxsift::pipeline::ExtractionPipeline;
use voxsift::report;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut cli = Cli::parse();

    // Explicit --config path, or auto-detect voxsift.toml / global config
    let config_path = cli.config.clone().or_else(config::discover_config);
    let config = match config_path {
        Some(ref path) => {
            let cfg = config::load_config(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            log::info!("Loaded config from {}", path.display());
            cfg
        }
        None => Config::default(),
    };
    // Config values apply only when the CLI is at its default
    if cli.sample_rate == 16000 {
        cli.sample_rate = config.audio.sample_rate;
    }

    match cli.command {
        Command::Preprocess {
            ref input,
            ref output,
            ref steps,
        } => {
            let options = merge_steps(&config.preprocess, steps);
            let result = preprocessor(cli.sample_rate)
                .process_audio(input, output, &options)
                .with_context(|| format!("Preprocessing {} failed", input.display()))?;
            println!("{}", report::render_processing_report(&result));
            println!("Saved {}", result.output_path.display());
        }

        Command::Batch {
            ref inputs,
            ref output,
            threads,
            ref steps,
        } => {
            let options = merge_steps(&config.preprocess, steps);
            let mut runner = BatchPreprocessor::new(preprocessor(cli.sample_rate));
            let threads = threads.unwrap_or(config.batch.threads);
            if threads > 0 {
                runner = runner.with_threads(threads)?;
            }

            let pb = ProgressBar::new(inputs.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} files ({eta} remaining)")
                    .context("Invalid progress bar template")?,
            );
            let summary = runner.run(inputs, output, &options, |_| pb.inc(1))?;
            pb.finish_with_message("Batch complete");

            for item in &summary.items {
                match &item.outcome {
                    BatchOutcome::Done(result) => {
                        println!("ok      {} -> {}", item.input.display(), result.output_path.display())
                    }
                    BatchOutcome::Failed(e) => println!("failed  {}: {}", item.input.display(), e),
                    BatchOutcome::Cancelled => println!("skipped {}", item.input.display()),
                }
            }
            let counts = summary.counts();
            if counts.done == 0 && counts.failed > 0 {
                anyhow::bail!("All {} file(s) failed to preprocess", counts.failed);
            }
        }

        Command::Match {
            ref reference,
            ref candidates,
            ref output,
        } => {
            let matcher = matcher(&config, cli.sample_rate)?;
            let match_report = matcher
                .match_files(reference, candidates)
                .context("Voice matching failed")?;
            let exported = matcher.export_best(&match_report, output)?;
            println!("{}", report::render_match_report(&match_report));
            println!("Best match saved to {}", exported.audio_path.display());
        }

        Command::Features { ref input, json } => {
            let extractor = FeatureExtractor::new(config.features.clone())?;
            let audio = voxsift::audio::decode::load_audio(input, cli.sample_rate)
                .with_context(|| format!("Failed to load {}", input.display()))?;
            let features = extractor.extract(&audio)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&features)?);
            } else {
                print!("{}", report::render_features(input, &features));
            }
        }

        Command::Extract {
            ref input,
            ref reference,
            ref output,
            skip_preprocessing,
            timeout,
            ref steps,
        } => {
            if !input.exists() {
                anyhow::bail!("Input file not found: {}", input.display());
            }
            if !reference.exists() {
                anyhow::bail!("Reference file not found: {}", reference.display());
            }
            let timeout = timeout
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| config.tools.timeout());

            log::info!("voxsift - target speaker extraction");
            log::info!("Input: {}", input.display());
            log::info!("Reference: {}", reference.display());
            log::info!("Output: {}", output.display());

            let pipeline = ExtractionPipeline::new(
                preprocessor(cli.sample_rate),
                Box::new(DemucsSeparator::new(config.demucs.clone())),
                Box::new(CommandDiarizer::new(config.diarizer.clone())),
                matcher(&config, cli.sample_rate)?,
            )
            .with_options(merge_steps(&config.preprocess, steps))
            .with_tool_timeout(timeout)
            .skip_preprocessing(skip_preprocessing);

            let outcome = pipeline.run(input, reference, output)?;
            if let Some(best) = outcome.matching.best() {
                println!("Best match: {} (score {})", best.id, report::format_score(best.composite()));
            }
            println!("Final output: {}", outcome.exported.audio_path.display());
            println!("Total duration: {:.1}s", outcome.elapsed_secs);
        }
    }

    Ok(())
}

fn preprocessor(sample_rate: u32) -> AudioPreprocessor {
    AudioPreprocessor::new(FilterDesigner::new(), SpectralDenoiser::default(), sample_rate)
}

fn matcher(config: &Config, sample_rate: u32) -> Result<VoiceMatcher> {
    let extractor = FeatureExtractor::new(config.features.clone())?;
    let scorer = SimilarityScorer::with_weights(config.matching.weights())?;
    Ok(VoiceMatcher::new(extractor, scorer, sample_rate))
}

fn merge_steps(base: &PreprocessOptions, steps: &StepArgs) -> PreprocessOptions {
    let mut options = base.clone();
    if let Some(low) = steps.low_freq {
        options.low_freq = low;
    }
    if let Some(high) = steps.high_freq {
        options.high_freq = high;
    }
    if let Some(order) = steps.filter_order {
        options.filter_order = order;
    }
    if let Some(alpha) = steps.alpha {
        options.noise_reduction_alpha = alpha;
    }
    if steps.no_bandpass {
        options.apply_bandpass = false;
    }
    if steps.no_denoise {
        options.apply_spectral_subtraction = false;
    }
    if steps.wiener {
        options.apply_wiener = true;
    }
    if steps.no_normalize {
        options.normalize = false;
    }
    options
}

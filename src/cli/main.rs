//! Transparent asset generation CLI
//!
//! `generate` runs a batch against the HTTP backend; `recover` performs
//! offline alpha recovery from two existing renders.

use super::config::{CliConfigBuilder, ReferenceSpec};
use crate::{
    backends::GeminiBackend,
    compositing::{reconcile, recover_alpha_with},
    config::DualmatteConfig,
    request::{AspectRatio, SizeClass},
    scheduler::{BatchReport, BatchScheduler},
    services::{
        BatchTally, ProgressReporter, ProgressUpdate, RasterCodec, SlotOutcome, SlotSettlement,
    },
    tracing_config::{init_cli_tracing, spans},
};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Instrument};

/// Generate transparent assets from opaque image models
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "dualmatte")]
pub struct Cli {
    /// Enable verbose logging (-v: DEBUG, -vv: TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Configuration file [default: <config dir>/dualmatte/config.json]
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON (requires the tracing-json feature; compact text otherwise)
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate a batch of assets from one prompt
    Generate(GenerateArgs),
    /// Recover a transparent asset from existing white and black renders
    Recover(RecoverArgs),
}

#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Subject description
    #[arg(short, long)]
    pub prompt: String,

    /// Number of variants to generate concurrently
    #[arg(short = 'n', long, default_value_t = 1)]
    pub count: usize,

    /// Skip the background swap and keep the opaque render
    #[arg(long)]
    pub opaque: bool,

    /// Output size class (1K, 2K, 4K)
    #[arg(long, default_value = "1K")]
    pub size: SizeClass,

    /// Aspect ratio (1:1, 2:3, 3:2, 3:4, 4:3, 4:5, 5:4, 9:16, 16:9, 21:9)
    #[arg(long, default_value = "1:1")]
    pub aspect: AspectRatio,

    /// Model identifier [default: from configuration]
    #[arg(short, long)]
    pub model: Option<String>,

    /// Reference image as PATH[:TAG[:STRENGTH]], repeatable
    #[arg(short = 'r', long = "reference", value_name = "PATH[:TAG[:STRENGTH]]")]
    pub references: Vec<ReferenceSpec>,

    /// Output directory for asset-<n>.png files
    #[arg(short, long, value_name = "DIR")]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct RecoverArgs {
    /// Render of the subject over pure white
    #[arg(long, value_name = "PATH")]
    pub white: PathBuf,

    /// Render of the same subject over pure black
    #[arg(long, value_name = "PATH")]
    pub black: PathBuf,

    /// Output PNG path
    #[arg(short, long, value_name = "PATH")]
    pub output: PathBuf,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_cli_tracing(cli.verbose, cli.json_logs).context("Failed to initialize tracing")?;

    let config = DualmatteConfig::load_or_default(cli.config.as_deref())
        .context("Failed to load configuration")?;

    match &cli.command {
        Command::Generate(args) => run_generate(args, &config).await,
        Command::Recover(args) => run_recover(args, &config),
    }
}

/// Progress bar over settled slots
struct BatchProgressBar {
    bar: ProgressBar,
}

impl BatchProgressBar {
    fn new(total: usize) -> Self {
        let bar = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        bar.enable_steady_tick(std::time::Duration::from_millis(120));
        Self { bar }
    }
}

impl ProgressReporter for BatchProgressBar {
    fn report_progress(&self, update: ProgressUpdate) {
        self.bar
            .set_message(format!("#{}: {}", update.ordinal, update.label));
    }

    fn report_slot_settled(&self, settlement: SlotSettlement) {
        if let SlotOutcome::Failed { message, .. } = &settlement.outcome {
            self.bar
                .println(format!("❌ asset {} failed: {}", settlement.ordinal, message));
        }
        self.bar.inc(1);
    }

    fn report_batch_completion(&self, tally: BatchTally) {
        self.bar.finish_with_message(format!(
            "{} done, {} failed, {} cancelled",
            tally.succeeded, tally.failed, tally.cancelled
        ));
    }
}

async fn run_generate(args: &GenerateArgs, config: &DualmatteConfig) -> Result<()> {
    let request = CliConfigBuilder::generation_request(args, config)?;
    let transparent = !args.opaque;
    let span = spans::generate(&request.model, args.count, transparent);

    let backend = GeminiBackend::new(config.gemini.clone()).context("Failed to create model backend")?;
    let scheduler = BatchScheduler::new(Arc::new(backend), config.batch.clone())
        .context("Invalid batch configuration")?;
    let (handle, prepared) = scheduler
        .prepare(request, args.count, transparent)
        .context("Failed to prepare batch")?;

    std::fs::create_dir_all(&args.output).with_context(|| {
        format!("Failed to create output directory: {}", args.output.display())
    })?;

    let abort = handle.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; aborting in-flight requests");
            abort.abort();
        }
    });

    let progress = Arc::new(BatchProgressBar::new(args.count));
    let report = prepared.run(progress).instrument(span).await;
    interrupt.abort();

    let written = write_assets(&report, &args.output)?;
    for failure in &report.failures {
        eprintln!(
            "❌ asset {} ({}): {}",
            failure.ordinal, failure.kind, failure.message
        );
    }

    let tally = report.tally();
    info!(
        written,
        failed = tally.failed,
        cancelled = tally.cancelled,
        output = %args.output.display(),
        "Batch finished"
    );

    if handle.is_aborted() {
        anyhow::bail!("Batch aborted; {} of {} assets written", written, tally.total);
    }
    if report.assets.is_empty() {
        anyhow::bail!("No assets were produced");
    }
    Ok(())
}

fn asset_path(output_dir: &Path, ordinal: usize) -> PathBuf {
    output_dir.join(format!("asset-{}.png", ordinal))
}

fn write_assets(report: &BatchReport, output_dir: &Path) -> Result<usize> {
    for asset in &report.assets {
        let path = asset_path(output_dir, asset.ordinal);
        RasterCodec::save_png(&asset.image, &path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("✅ {}", path.display());
    }
    Ok(report.assets.len())
}

pub(crate) fn run_recover(args: &RecoverArgs, config: &DualmatteConfig) -> Result<()> {
    let _span = spans::recover(&args.white, &args.black).entered();
    let pipeline = &config.batch.pipeline;

    let white = RasterCodec::load(&args.white)
        .with_context(|| format!("Failed to load {}", args.white.display()))?;
    let black = RasterCodec::load(&args.black)
        .with_context(|| format!("Failed to load {}", args.black.display()))?;

    let reconciled = reconcile(&white, black, pipeline.resample_filter)
        .context("Failed to match render dimensions")?;
    let asset = recover_alpha_with(&white, &reconciled.image, &pipeline.recovery)
        .context("Alpha recovery failed")?;

    RasterCodec::save_png(&asset, &args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    info!(
        output = %args.output.display(),
        width = asset.width(),
        height = asset.height(),
        resampled = reconciled.resampled,
        "Recovered transparent asset"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PixelLayout, Provenance, RasterImage};

    #[test]
    fn test_parse_generate_arguments() {
        let cli = Cli::try_parse_from([
            "dualmatte",
            "-v",
            "generate",
            "--prompt",
            "a teapot",
            "-n",
            "3",
            "--size",
            "4k",
            "--aspect",
            "16:9",
            "-r",
            "ref.png:style:0.5",
            "--output",
            "out",
        ])
        .unwrap();

        assert_eq!(cli.verbose, 1);
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        assert_eq!(args.count, 3);
        assert!(!args.opaque);
        assert_eq!(args.size, SizeClass::FourK);
        assert_eq!(args.aspect, AspectRatio::Landscape16x9);
        assert_eq!(args.references.len(), 1);
        assert_eq!(args.output, PathBuf::from("out"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let result = Cli::try_parse_from([
            "dualmatte", "generate", "--prompt", "x", "--aspect", "7:3", "--output", "out",
        ]);
        assert!(result.is_err());

        let result = Cli::try_parse_from(["dualmatte", "generate", "--output", "out"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_recover_writes_transparent_png() {
        let dir = tempfile::tempdir().unwrap();
        let white_path = dir.path().join("white.png");
        let black_path = dir.path().join("black.png");
        let output = dir.path().join("out").join("asset.png");

        // Left pixel opaque subject, right pixel background
        let white = RasterImage::new(
            2,
            1,
            PixelLayout::Rgb8,
            vec![40, 90, 160, 255, 255, 255],
            Provenance::External,
        )
        .unwrap();
        let black = RasterImage::new(
            2,
            1,
            PixelLayout::Rgb8,
            vec![40, 90, 160, 0, 0, 0],
            Provenance::External,
        )
        .unwrap();
        RasterCodec::save_png(&white, &white_path).unwrap();
        RasterCodec::save_png(&black, &black_path).unwrap();

        let args = RecoverArgs {
            white: white_path,
            black: black_path,
            output: output.clone(),
        };
        run_recover(&args, &DualmatteConfig::default()).unwrap();

        let recovered = RasterCodec::load(&output).unwrap();
        assert_eq!(recovered.layout(), PixelLayout::Rgba8);
        assert_eq!(recovered.pixel(0, 0), Some(&[40u8, 90, 160, 255][..]));
        assert_eq!(recovered.pixel(1, 0), Some(&[0u8, 0, 0, 0][..]));
    }

    #[test]
    fn test_recover_reports_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let args = RecoverArgs {
            white: dir.path().join("nope.png"),
            black: dir.path().join("nope2.png"),
            output: dir.path().join("out.png"),
        };
        assert!(run_recover(&args, &DualmatteConfig::default()).is_err());
    }

    #[test]
    fn test_asset_paths_follow_ordinal() {
        assert_eq!(
            asset_path(Path::new("out"), 3),
            PathBuf::from("out").join("asset-3.png")
        );
    }
}

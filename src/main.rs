use anyhow::{Context, Result, anyhow};
use burn::{backend::Autodiff, config::Config, prelude::Backend};
use clap::{Args, Parser, Subcommand};
use dehaze_gan::model::{
    data::{DehazeDataset, PairingMode},
    inference::Dehazer,
    training::{self, TrainingConfig},
};
use std::io::{BufRead, ErrorKind, IsTerminal};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "cuda")]
type MyBackend = burn::backend::Cuda<f32, i32>;
#[cfg(not(feature = "cuda"))]
type MyBackend = burn::backend::NdArray<f32>;

type MyAutodiffBackend = Autodiff<MyBackend>;

#[derive(Parser)]
#[command(version, about = "Train a pix2pix GAN to remove haze, then dehaze images with it")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Train on aligned clean/noisy directories, then dehaze paths read from stdin.
    Train(TrainArgs),
    /// Dehaze images with a generator saved by `train --artifact-dir`.
    Infer(InferArgs),
}

#[derive(Args)]
struct TrainArgs {
    #[arg(long)]
    clean_dir: PathBuf,

    #[arg(long)]
    noisy_dir: PathBuf,

    /// JSON training config; the stock pix2pix settings are used when absent.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    epochs: Option<usize>,

    /// Where to save config.json and the trained generator.
    #[arg(long)]
    artifact_dir: Option<PathBuf>,

    #[arg(long, default_value = "dehazed")]
    output_dir: PathBuf,

    /// Require matching file counts and stems in both directories.
    #[arg(long)]
    strict_pairing: bool,

    /// Exit after training instead of reading images from stdin.
    #[arg(long)]
    no_inference: bool,
}

#[derive(Args)]
struct InferArgs {
    #[arg(long)]
    artifact_dir: PathBuf,

    #[arg(long, default_value = "dehazed")]
    output_dir: PathBuf,

    /// Images to dehaze; paths are read from stdin when none are given.
    images: Vec<PathBuf>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);
    Registry::default().with(filter).with(fmt_layer).init();
}

/// Yields one trimmed path per non-empty line. A line that is not valid UTF-8
/// is logged and skipped; any other read error ends the input.
fn read_paths<R: BufRead>(reader: R) -> impl Iterator<Item = PathBuf> {
    reader
        .lines()
        .map_while(|line| match line {
            Ok(line) => Some(Some(line)),
            Err(err) if err.kind() == ErrorKind::InvalidData => {
                error!("skipping unreadable input line: {err}");
                Some(None)
            }
            Err(err) => {
                error!("failed to read input: {err}");
                None
            }
        })
        .flatten()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
}

/// Dehazes one path per stdin line until end of input.
fn dehaze_stdin<B: Backend>(dehazer: &Dehazer<B>, output_dir: &Path) {
    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        info!("enter image paths, one per line (Ctrl-D to finish)");
    }

    let rendered = dehazer.render_all(read_paths(stdin.lock()), output_dir);
    info!("dehazed {} images into {}", rendered, output_dir.display());
}

fn run_train(args: TrainArgs, device: <MyBackend as Backend>::Device) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => TrainingConfig::load(path)
            .map_err(|err| anyhow!("failed to load config {}: {err:?}", path.display()))?,
        None => TrainingConfig::pix2pix(),
    };
    if let Some(epochs) = args.epochs {
        config.num_epochs = epochs;
    }

    let mode = if args.strict_pairing {
        PairingMode::Strict
    } else {
        PairingMode::ByOrder
    };
    let dataset = DehazeDataset::from_dirs(&args.clean_dir, &args.noisy_dir, mode)
        .context("failed to load training images")?;

    let dehazer = training::train::<MyAutodiffBackend>(
        dataset,
        &config,
        args.artifact_dir.as_deref(),
        device,
    )?;

    if args.no_inference {
        return Ok(());
    }
    info!("training completed, starting testing phase");
    dehaze_stdin(&dehazer, &args.output_dir);
    Ok(())
}

fn run_infer(args: InferArgs, device: <MyBackend as Backend>::Device) -> Result<()> {
    let dehazer = Dehazer::<MyBackend>::load(&args.artifact_dir, &device)?;
    if args.images.is_empty() {
        dehaze_stdin(&dehazer, &args.output_dir);
    } else {
        let rendered = dehazer.render_all(&args.images, &args.output_dir);
        info!(
            "dehazed {}/{} images into {}",
            rendered,
            args.images.len(),
            args.output_dir.display()
        );
    }
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let device = <MyBackend as Backend>::Device::default();

    match cli.command {
        Command::Train(args) => run_train(args, device),
        Command::Infer(args) => run_infer(args, device),
    }
}

//! micromosaic CLI: stitch an ordered list of microscope tiles into one image.

use clap::{Parser, ValueEnum};
use micromosaic::logger::{debug, error, info, warn};
use micromosaic::photo::{CanvasBounds, FsImageStore, StitchConfig, StitchError, StrategyMode};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "micromosaic")]
#[command(about = "Stitch overlapping microscope tiles into a single panorama")]
#[command(version)]
struct Cli {
    /// Tile images, in stage order (at least two).
    #[arg(required = true, num_args = 1..)]
    tiles: Vec<PathBuf>,

    /// Output image; the format follows the extension.
    #[arg(short, long)]
    output: PathBuf,

    /// Alignment strategy.
    #[arg(long, value_enum, default_value_t = StrategyArg::Auto)]
    strategy: StrategyArg,

    /// Canvas growth policy for pairwise merges.
    #[arg(long, value_enum, default_value_t = BoundsArg::Tight)]
    canvas: BoundsArg,

    /// RANSAC seed.
    #[arg(long)]
    seed: Option<u64>,

    /// Maximum ORB keypoints per image.
    #[arg(long, default_value = "2000")]
    max_features: usize,

    /// Minimum peak correlation for holistic alignment.
    #[arg(long, default_value = "0.8")]
    min_correlation: f64,

    /// Give up after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Worker threads (default: MOSAIC_CPU_THREADS or all cores).
    #[arg(long)]
    threads: Option<usize>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    Auto,
    Holistic,
    Pairwise,
}

impl From<StrategyArg> for StrategyMode {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Auto => StrategyMode::Auto,
            StrategyArg::Holistic => StrategyMode::HolisticOnly,
            StrategyArg::Pairwise => StrategyMode::PairwiseOnly,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BoundsArg {
    Tight,
    Conservative,
}

impl From<BoundsArg> for CanvasBounds {
    fn from(arg: BoundsArg) -> Self {
        match arg {
            BoundsArg::Tight => CanvasBounds::Tight,
            BoundsArg::Conservative => CanvasBounds::Conservative,
        }
    }
}

impl Cli {
    fn config(&self) -> StitchConfig {
        let mut config = StitchConfig::default()
            .with_strategy(self.strategy.into())
            .with_bounds(self.canvas.into());
        config.orb = config.orb.clone().with_n_features(self.max_features);
        config.holistic = config.holistic.clone().with_min_correlation(self.min_correlation);
        if let Some(seed) = self.seed {
            config = config.with_seed(seed);
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        config
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    micromosaic::logger::init(cli.verbose);

    if let Err(e) = micromosaic::init_thread_pool(cli.threads) {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    debug!(threads = micromosaic::core::current_cpu_threads(), tiles = cli.tiles.len(), "starting");

    match micromosaic::stitch_with(&FsImageStore, &cli.config(), &cli.tiles, &cli.output) {
        Ok(report) => {
            for failure in &report.decode_failures {
                warn!("could not read {}: {}", failure.path.display(), failure.reason);
            }
            for skipped in &report.skipped {
                warn!("tile {} skipped ({}): {}", skipped.index, skipped.kind, skipped.reason);
            }
            info!("wrote {report}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            if let StitchError::InsufficientTiles { decode_failures, .. } = &e {
                for failure in decode_failures {
                    warn!("could not read {}: {}", failure.path.display(), failure.reason);
                }
            }
            error!(kind = %e.kind(), "{e}");
            ExitCode::FAILURE
        }
    }
}

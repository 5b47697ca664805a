use crate::stitcher::{SkippedTile, StrategyUsed};
use std::fmt;
use std::path::PathBuf;

/// A tile path that could not be decoded; the run continues without it.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeFailure {
    /// Position in the input path list.
    pub index: usize,
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of a successful file-to-file stitch. Tile indices refer to the
/// input path list.
#[derive(Debug, Clone)]
pub struct StitchReport {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub strategy: StrategyUsed,
    pub merged_tiles: Vec<usize>,
    pub skipped: Vec<SkippedTile>,
    pub decode_failures: Vec<DecodeFailure>,
}

impl StitchReport {
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty() || !self.decode_failures.is_empty()
    }
}

impl fmt::Display for StitchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}x{}, {} strategy, {} tiles merged",
            self.output.display(),
            self.width,
            self.height,
            self.strategy,
            self.merged_tiles.len()
        )?;
        if !self.skipped.is_empty() {
            write!(f, ", {} skipped", self.skipped.len())?;
        }
        if !self.decode_failures.is_empty() {
            write!(f, ", {} unreadable", self.decode_failures.len())?;
        }
        f.write_str(")")
    }
}

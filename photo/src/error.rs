use crate::report::DecodeFailure;
use mosaic_features::FeatureError;
use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, StitchError>;

#[derive(Debug, thiserror::Error)]
pub enum StitchError {
    #[error("could not read image {path}: {reason}")]
    DecodeFailure { path: PathBuf, reason: String },

    /// `decode_failures` lists the inputs that were dropped on the way.
    #[error("at least 2 decodable tiles are required, got {found} ({} unreadable)", .decode_failures.len())]
    InsufficientTiles {
        found: usize,
        decode_failures: Vec<DecodeFailure>,
    },

    #[error("tile {tile}: {found} good matches, at least {required} required")]
    InsufficientCorrespondences {
        tile: usize,
        found: usize,
        required: usize,
    },

    #[error("tile {tile}: no consistent geometry ({reason})")]
    NoConsistentGeometry { tile: usize, reason: String },

    #[error("could not write composite to {path}: {reason}")]
    CompositeWriteFailure { path: PathBuf, reason: String },

    #[error("no usable composite: holistic alignment failed ({holistic}) and no tile could be merged pairwise")]
    NoUsableComposite { holistic: String },

    #[error("stitching cancelled")]
    Cancelled,

    #[error("stitching deadline exceeded")]
    DeadlineExceeded,

    #[error("feature extraction failed: {0}")]
    Features(#[from] FeatureError),
}

impl StitchError {
    /// Per-tile failures map onto the skip reasons of the pairwise loop.
    pub(crate) fn from_pair(tile: usize, err: FeatureError) -> Self {
        match err {
            FeatureError::InsufficientCorrespondences { found, required } => {
                StitchError::InsufficientCorrespondences {
                    tile,
                    found,
                    required,
                }
            }
            other => StitchError::NoConsistentGeometry {
                tile,
                reason: other.to_string(),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            StitchError::DecodeFailure { .. } => ErrorKind::DecodeFailure,
            StitchError::InsufficientTiles { .. } => ErrorKind::InsufficientTiles,
            StitchError::InsufficientCorrespondences { .. } => ErrorKind::InsufficientCorrespondences,
            StitchError::NoConsistentGeometry { .. } => ErrorKind::NoConsistentGeometry,
            StitchError::CompositeWriteFailure { .. } => ErrorKind::CompositeWriteFailure,
            StitchError::NoUsableComposite { .. } | StitchError::Features(_) => ErrorKind::NoUsableComposite,
            StitchError::Cancelled => ErrorKind::Cancelled,
            StitchError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
        }
    }

    /// The per-tile cause without the tile index.
    pub(crate) fn pair_detail(&self) -> String {
        match self {
            StitchError::InsufficientCorrespondences { found, required, .. } => {
                format!("{found} good matches, at least {required} required")
            }
            StitchError::NoConsistentGeometry { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }

    /// Whether the pairwise loop may skip the tile and carry on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StitchError::InsufficientCorrespondences { .. } | StitchError::NoConsistentGeometry { .. }
        )
    }
}

/// Coarse failure category, stable enough to show to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DecodeFailure,
    InsufficientTiles,
    InsufficientCorrespondences,
    NoConsistentGeometry,
    CompositeWriteFailure,
    NoUsableComposite,
    Cancelled,
    DeadlineExceeded,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::DecodeFailure => "decode failure",
            ErrorKind::InsufficientTiles => "insufficient tiles",
            ErrorKind::InsufficientCorrespondences => "insufficient correspondences",
            ErrorKind::NoConsistentGeometry => "no consistent geometry",
            ErrorKind::CompositeWriteFailure => "composite write failure",
            ErrorKind::NoUsableComposite => "no usable composite",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::DeadlineExceeded => "deadline exceeded",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

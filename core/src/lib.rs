//! Core types shared by the micromosaic crates.
//!
//! Keypoints, matches and binary descriptors, the planar [`Homography`]
//! type, a generic seeded RANSAC engine and the global rayon pool setup.

pub mod descriptor;
pub mod error;
pub mod geometry;
pub mod keypoint;
pub mod robust;
pub mod runtime;

pub use descriptor::*;
pub use error::{Error, Result};
pub use geometry::*;
pub use keypoint::*;
pub use robust::{Ransac, RobustConfig, RobustModel, RobustResult};
pub use runtime::{current_cpu_threads, init_global_thread_pool};

pub use image::{GrayImage, RgbImage};

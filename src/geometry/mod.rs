pub mod epipolar;
pub mod pnp;
pub mod triangulation;

pub use epipolar::*;
pub use pnp::*;
pub use triangulation::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("essential matrix needs at least 8 correspondences, have {0}")]
    NotEnoughCorrespondences(usize),
    #[error("no essential matrix consensus ({inliers} inliers of {total})")]
    EssentialFailed { inliers: usize, total: usize },
    #[error("no pose candidate places the scene in front of both cameras")]
    CheiralityFailed,
    #[error("PnP needs at least 4 tracked points, have {0}")]
    NotEnoughPoints(usize),
    #[error("no PnP consensus over {total} tracked points")]
    PnpFailed { total: usize },
}

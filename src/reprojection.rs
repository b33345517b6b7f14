use nalgebra as na;
use rayon::prelude::*;

use crate::types::{CameraPose, Intrinsics};

// Depth floor keeping projections finite; a track crossing the camera
// plane shows up as a huge pixel error instead of NaN.
const MIN_DEPTH: f64 = 1e-12;

/// Projects a world point through a pose and intrinsics into pixels.
pub fn project_point(
    pose: &CameraPose,
    intrinsics: &Intrinsics,
    point: &na::Vector3<f64>,
) -> glam::Vec2 {
    let pc = pose.transform(point);
    let z = if pc.z.abs() < MIN_DEPTH {
        MIN_DEPTH.copysign(pc.z)
    } else {
        pc.z
    };
    glam::Vec2::new(
        (intrinsics.fx() * (pc.x / z) + intrinsics.cx()) as f32,
        (intrinsics.fy() * (pc.y / z) + intrinsics.cy()) as f32,
    )
}

/// Mean Euclidean pixel distance between each observation and the
/// projection of its 3D point. Pure measurement, always finite; degenerate
/// geometry surfaces as an abnormally large value rather than an error.
pub fn mean_reprojection_error(
    points3d: &[na::Vector3<f64>],
    observations: &[glam::Vec2],
    pose: &CameraPose,
    intrinsics: &Intrinsics,
) -> f64 {
    debug_assert_eq!(points3d.len(), observations.len());
    if points3d.is_empty() {
        return 0.0;
    }
    let total: f64 = points3d
        .par_iter()
        .zip(observations.par_iter())
        .map(|(p, obs)| {
            let projected = project_point(pose, intrinsics, p);
            let dx = (projected.x - obs.x) as f64;
            let dy = (projected.y - obs.y) as f64;
            (dx * dx + dy * dy).sqrt()
        })
        .sum();
    total / points3d.len() as f64
}

use nalgebra as na;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sqpnp_simple::sqpnp_solve_glam;

use super::GeometryError;
use crate::reprojection::project_point;
use crate::types::{CameraPose, Intrinsics};

/// RANSAC settings for absolute pose estimation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PnpRansacParams {
    pub max_iterations: usize,
    /// Inlier threshold on the reprojection distance, in pixels.
    pub threshold_px: f64,
    pub confidence: f64,
    pub seed: u64,
}

impl Default for PnpRansacParams {
    fn default() -> Self {
        PnpRansacParams {
            max_iterations: 100,
            threshold_px: 8.0,
            confidence: 0.99,
            seed: 0,
        }
    }
}

/// Absolute pose with the indices of the correspondences that support it.
#[derive(Debug, Clone)]
pub struct PnpEstimate {
    pub pose: CameraPose,
    pub inliers: Vec<usize>,
}

/// Estimates a world-to-camera pose from 3D points and their pixel
/// observations with RANSAC around a minimal 4-point SQPnP solve, then
/// refits on the consensus set. The returned inlier indices are the
/// caller's pruning mask for every array kept parallel to the inputs.
pub fn pnp_ransac(
    points3d: &[na::Vector3<f64>],
    image_points: &[glam::Vec2],
    intrinsics: &Intrinsics,
    params: &PnpRansacParams,
) -> Result<PnpEstimate, GeometryError> {
    debug_assert_eq!(points3d.len(), image_points.len());
    let n = points3d.len();
    if n < 4 {
        return Err(GeometryError::NotEnoughPoints(n));
    }

    let object: Vec<glam::Vec3> = points3d
        .iter()
        .map(|p| glam::Vec3::new(p.x as f32, p.y as f32, p.z as f32))
        .collect();
    let normalized: Vec<glam::Vec2> = image_points
        .iter()
        .map(|p| intrinsics.normalize(*p))
        .collect();
    let thresh_sq = params.threshold_px * params.threshold_px;

    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    let mut best_pose: Option<CameraPose> = None;
    let mut best_inliers: Vec<usize> = Vec::new();
    let mut adaptive_max = params.max_iterations;

    for iter in 0..params.max_iterations {
        if iter >= adaptive_max {
            break;
        }
        let sample = rand::seq::index::sample(&mut rng, n, 4);
        let s3: Vec<glam::Vec3> = sample.iter().map(|i| object[i]).collect();
        let s2: Vec<glam::Vec2> = sample.iter().map(|i| normalized[i]).collect();
        let Some(pose) = solve_absolute_pose(&s3, &s2) else {
            continue;
        };

        let inliers = reprojection_inliers(&pose, points3d, image_points, intrinsics, thresh_sq);
        if inliers.len() > best_inliers.len() {
            let w = inliers.len() as f64 / n as f64;
            if w > 0.0 && w < 1.0 {
                let p_fail = (1.0 - w.powi(4)).max(1e-15);
                let k = (1.0 - params.confidence).ln() / p_fail.ln();
                adaptive_max = (k.ceil() as usize).min(params.max_iterations);
            }
            best_pose = Some(pose);
            best_inliers = inliers;
        }
        if best_inliers.len() == n {
            break;
        }
    }

    let Some(mut pose) = best_pose else {
        return Err(GeometryError::PnpFailed { total: n });
    };
    if best_inliers.len() < 4 {
        return Err(GeometryError::PnpFailed { total: n });
    }

    // Refit on the consensus set; keep it only if it does not lose support.
    let r3: Vec<glam::Vec3> = best_inliers.iter().map(|&i| object[i]).collect();
    let r2: Vec<glam::Vec2> = best_inliers.iter().map(|&i| normalized[i]).collect();
    if let Some(refined) = solve_absolute_pose(&r3, &r2) {
        let inliers = reprojection_inliers(&refined, points3d, image_points, intrinsics, thresh_sq);
        if inliers.len() >= best_inliers.len() {
            pose = refined;
            best_inliers = inliers;
        }
    }

    log::debug!("pnp: {}/{} inliers", best_inliers.len(), n);
    Ok(PnpEstimate {
        pose,
        inliers: best_inliers,
    })
}

fn solve_absolute_pose(object: &[glam::Vec3], normalized: &[glam::Vec2]) -> Option<CameraPose> {
    let (rvec, tvec) = sqpnp_solve_glam(object, normalized).into_iter().next()?;
    let pose = CameraPose::from_rvec_tvec(
        &na::Vector3::new(rvec.0, rvec.1, rvec.2),
        &na::Vector3::new(tvec.0, tvec.1, tvec.2),
    );
    let finite = pose.translation.iter().all(|v| v.is_finite())
        && pose.rotation.matrix().iter().all(|v| v.is_finite());
    finite.then_some(pose)
}

fn reprojection_inliers(
    pose: &CameraPose,
    points3d: &[na::Vector3<f64>],
    image_points: &[glam::Vec2],
    intrinsics: &Intrinsics,
    thresh_sq: f64,
) -> Vec<usize> {
    points3d
        .iter()
        .zip(image_points)
        .enumerate()
        .filter_map(|(i, (p, obs))| {
            if pose.transform(p).z <= 0.0 {
                return None;
            }
            let projected = project_point(pose, intrinsics, p);
            let dx = (projected.x - obs.x) as f64;
            let dy = (projected.y - obs.y) as f64;
            (dx * dx + dy * dy <= thresh_sq).then_some(i)
        })
        .collect()
}

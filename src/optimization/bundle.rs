use std::collections::HashMap;

use nalgebra as na;
use tiny_solver::Optimizer;

use crate::optimization::factors::{BundleWindowFactor, INTRINSICS_LEN, POSE_LEN};
use crate::reprojection::mean_reprojection_error;
use crate::types::{CameraPose, Intrinsics};

/// Refined copy of one view window after local bundle adjustment.
pub struct RefinedWindow {
    pub points3d: Vec<na::Vector3<f64>>,
    pub observations: Vec<glam::Vec2>,
    pub pose: CameraPose,
    pub error: f64,
}

fn pack_window(
    points3d: &[na::Vector3<f64>],
    observations: &[glam::Vec2],
    pose: &CameraPose,
    intrinsics: &Intrinsics,
) -> na::DVector<f64> {
    let n = points3d.len();
    let mut x = na::DVector::<f64>::zeros(POSE_LEN + INTRINSICS_LEN + 5 * n);
    let m = pose.matrix3x4();
    for r in 0..3 {
        for c in 0..4 {
            x[r * 4 + c] = m[(r, c)];
        }
    }
    for r in 0..3 {
        for c in 0..3 {
            x[POSE_LEN + r * 3 + c] = intrinsics.k[(r, c)];
        }
    }
    let obs_base = POSE_LEN + INTRINSICS_LEN;
    for (i, ob) in observations.iter().enumerate() {
        x[obs_base + 2 * i] = ob.x as f64;
        x[obs_base + 2 * i + 1] = ob.y as f64;
    }
    let pts_base = obs_base + 2 * n;
    for (i, p) in points3d.iter().enumerate() {
        x[pts_base + 3 * i] = p.x;
        x[pts_base + 3 * i + 1] = p.y;
        x[pts_base + 3 * i + 2] = p.z;
    }
    x
}

fn unpack_window(x: &na::DVector<f64>, n: usize) -> (Vec<na::Vector3<f64>>, Vec<glam::Vec2>, CameraPose) {
    let raw = na::Matrix3::new(x[0], x[1], x[2], x[4], x[5], x[6], x[8], x[9], x[10]);
    let pose = CameraPose::new(
        na::Rotation3::from_matrix(&raw),
        na::Vector3::new(x[3], x[7], x[11]),
    );
    let obs_base = POSE_LEN + INTRINSICS_LEN;
    let observations: Vec<glam::Vec2> = (0..n)
        .map(|i| glam::Vec2::new(x[obs_base + 2 * i] as f32, x[obs_base + 2 * i + 1] as f32))
        .collect();
    let pts_base = obs_base + 2 * n;
    let points3d: Vec<na::Vector3<f64>> = (0..n)
        .map(|i| na::Vector3::new(x[pts_base + 3 * i], x[pts_base + 3 * i + 1], x[pts_base + 3 * i + 2]))
        .collect();
    (points3d, observations, pose)
}

/// Jointly refines a view's pose, its observations and the 3d points they
/// see, by Gauss-Newton over the packed window vector. The refined
/// intrinsics slice is discarded; the caller keeps its calibration.
///
/// Windows that already sit at or below `tolerance` pixels of mean
/// reprojection error are returned unchanged, as are windows the optimizer
/// makes worse.
pub fn adjust_window(
    points3d: &[na::Vector3<f64>],
    observations: &[glam::Vec2],
    pose: &CameraPose,
    intrinsics: &Intrinsics,
    tolerance: f64,
) -> RefinedWindow {
    let n = points3d.len();
    let current = mean_reprojection_error(points3d, observations, pose, intrinsics);
    if n == 0 || current <= tolerance {
        log::debug!("bundle window already at {:.4} px, skipping", current);
        return RefinedWindow {
            points3d: points3d.to_vec(),
            observations: observations.to_vec(),
            pose: pose.clone(),
            error: current,
        };
    }

    let cost = BundleWindowFactor::new(n);
    let param_len = cost.param_len();
    let mut problem = tiny_solver::Problem::new();
    problem.add_residual_block(
        cost.residual_num(),
        vec![("w".to_string(), param_len)],
        Box::new(cost),
        None,
    );
    let x = pack_window(points3d, observations, pose, intrinsics);
    let initial_values = HashMap::<String, na::DVector<f64>>::from([("w".to_string(), x)]);
    let optimizer = tiny_solver::GaussNewtonOptimizer {};
    let result = optimizer.optimize(&problem, &initial_values, None);
    let Some(refined) = result.get("w") else {
        log::warn!("bundle window solve returned nothing, keeping {:.4} px", current);
        return RefinedWindow {
            points3d: points3d.to_vec(),
            observations: observations.to_vec(),
            pose: pose.clone(),
            error: current,
        };
    };

    let (new_points, new_obs, new_pose) = unpack_window(refined, n);
    let new_error = mean_reprojection_error(&new_points, &new_obs, &new_pose, intrinsics);
    if !new_error.is_finite() || new_error > current {
        log::warn!(
            "bundle window went {:.4} -> {:.4} px, keeping the original",
            current,
            new_error
        );
        return RefinedWindow {
            points3d: points3d.to_vec(),
            observations: observations.to_vec(),
            pose: pose.clone(),
            error: current,
        };
    }
    log::debug!("bundle window {:.4} -> {:.4} px over {} points", current, new_error, n);
    RefinedWindow {
        points3d: new_points,
        observations: new_obs,
        pose: new_pose,
        error: new_error,
    }
}

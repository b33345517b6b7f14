use nalgebra as na;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::GeometryError;
use super::triangulation::triangulate_point;
use crate::types::{CameraPose, Intrinsics};

/// RANSAC settings for the essential matrix stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EssentialRansacParams {
    pub max_iterations: usize,
    /// Inlier threshold on the Sampson distance, in pixels. Rescaled onto
    /// the normalized image plane with the mean focal length.
    pub threshold_px: f64,
    pub confidence: f64,
    pub seed: u64,
}

impl Default for EssentialRansacParams {
    fn default() -> Self {
        EssentialRansacParams {
            max_iterations: 1000,
            threshold_px: 0.4,
            confidence: 0.999,
            seed: 0,
        }
    }
}

/// Essential matrix with its consensus set.
#[derive(Debug, Clone)]
pub struct EssentialEstimate {
    pub essential: na::Matrix3<f64>,
    pub inlier_mask: Vec<bool>,
    pub inlier_count: usize,
    pub iterations: usize,
}

/// Relative pose recovered from an essential matrix plus the per-point
/// positive-depth mask of the winning candidate.
#[derive(Debug, Clone)]
pub struct PoseRecovery {
    pub relative: CameraPose,
    pub depth_mask: Vec<bool>,
    pub points_in_front: usize,
}

/// Estimates the essential matrix between two views with a seeded RANSAC
/// around the conditioned 8-point solver, scoring with the Sampson distance.
/// The adaptive iteration bound follows the usual 1-(1-w^8)^k argument and
/// the winner is refit on its full consensus set.
pub fn estimate_essential(
    points_a: &[glam::Vec2],
    points_b: &[glam::Vec2],
    intrinsics: &Intrinsics,
    params: &EssentialRansacParams,
) -> Result<EssentialEstimate, GeometryError> {
    debug_assert_eq!(points_a.len(), points_b.len());
    let n = points_a.len();
    if n < 8 {
        return Err(GeometryError::NotEnoughCorrespondences(n));
    }

    let xa = normalize_points(points_a, intrinsics);
    let xb = normalize_points(points_b, intrinsics);
    let thresh_sq = (params.threshold_px / intrinsics.mean_focal()).powi(2);

    let mut rng = ChaCha8Rng::seed_from_u64(params.seed);
    let mut best_e = na::Matrix3::zeros();
    let mut best_mask = vec![false; n];
    let mut best_count = 0usize;
    let mut best_score = f64::INFINITY;
    let mut adaptive_max = params.max_iterations;
    let mut iterations = 0usize;

    for iter in 0..params.max_iterations {
        if iter >= adaptive_max {
            break;
        }
        iterations = iter + 1;

        let sample = rand::seq::index::sample(&mut rng, n, 8);
        let sa: Vec<na::Vector2<f64>> = sample.iter().map(|i| xa[i]).collect();
        let sb: Vec<na::Vector2<f64>> = sample.iter().map(|i| xb[i]).collect();
        let e = match eight_point_essential(&sa, &sb) {
            Some(e) => e,
            None => continue,
        };

        let mut mask = vec![false; n];
        let mut count = 0usize;
        let mut score = 0.0f64;
        for i in 0..n {
            let d = sampson_distance(&e, &xa[i], &xb[i]);
            if d <= thresh_sq {
                mask[i] = true;
                count += 1;
                score += d;
            }
        }

        if count > best_count || (count == best_count && score < best_score) {
            best_e = e;
            best_mask = mask;
            best_count = count;
            best_score = score;

            let w = count as f64 / n as f64;
            if w > 0.0 {
                let p_fail = (1.0 - w.powi(8)).max(1e-15);
                let k = (1.0 - params.confidence).ln() / p_fail.ln();
                adaptive_max = (k.ceil() as usize).min(params.max_iterations);
            }
        }
        if best_count == n {
            break;
        }
    }

    if best_count < 8 {
        return Err(GeometryError::EssentialFailed {
            inliers: best_count,
            total: n,
        });
    }

    // Refit on the consensus set and rescore with the refined model.
    let ia: Vec<na::Vector2<f64>> = (0..n).filter(|&i| best_mask[i]).map(|i| xa[i]).collect();
    let ib: Vec<na::Vector2<f64>> = (0..n).filter(|&i| best_mask[i]).map(|i| xb[i]).collect();
    if let Some(refined) = eight_point_essential(&ia, &ib) {
        let mut mask = vec![false; n];
        let mut count = 0usize;
        for i in 0..n {
            if sampson_distance(&refined, &xa[i], &xb[i]) <= thresh_sq {
                mask[i] = true;
                count += 1;
            }
        }
        if count >= 8 {
            best_e = refined;
            best_mask = mask;
            best_count = count;
        }
    }

    log::debug!(
        "essential: {best_count}/{n} inliers after {iterations} iterations"
    );
    Ok(EssentialEstimate {
        essential: best_e,
        inlier_mask: best_mask,
        inlier_count: best_count,
        iterations,
    })
}

/// Picks among the four (R, t) decompositions of an essential matrix by
/// counting triangulated points with positive depth in both views. All
/// given correspondences are treated as the consensus set; the returned
/// mask flags the entries in front of both cameras under the winner.
pub fn recover_pose(
    essential: &na::Matrix3<f64>,
    points_a: &[glam::Vec2],
    points_b: &[glam::Vec2],
    intrinsics: &Intrinsics,
) -> Result<PoseRecovery, GeometryError> {
    debug_assert_eq!(points_a.len(), points_b.len());
    let xa = normalize_points(points_a, intrinsics);
    let xb = normalize_points(points_b, intrinsics);
    let candidates = decompose_essential(essential).ok_or(GeometryError::CheiralityFailed)?;

    let p_a = na::Matrix3x4::<f64>::identity();
    let mut best: Option<PoseRecovery> = None;
    for (r, t) in candidates {
        let pose = CameraPose::new(r, t);
        let p_b = pose.matrix3x4();
        let mut mask = vec![false; xa.len()];
        let mut count = 0usize;
        for i in 0..xa.len() {
            let x = triangulate_point(&p_a, &p_b, &xa[i], &xb[i]);
            if x.z > 0.0 && pose.transform(&x).z > 0.0 {
                mask[i] = true;
                count += 1;
            }
        }
        if best.as_ref().is_none_or(|b| count > b.points_in_front) {
            best = Some(PoseRecovery {
                relative: pose,
                depth_mask: mask,
                points_in_front: count,
            });
        }
    }

    match best {
        Some(recovery) if recovery.points_in_front > 0 => {
            log::debug!(
                "recovered pose with {}/{} points in front",
                recovery.points_in_front,
                xa.len()
            );
            Ok(recovery)
        }
        _ => Err(GeometryError::CheiralityFailed),
    }
}

fn normalize_points(points: &[glam::Vec2], intrinsics: &Intrinsics) -> Vec<na::Vector2<f64>> {
    points
        .iter()
        .map(|p| {
            let n = intrinsics.normalize(*p);
            na::Vector2::new(n.x as f64, n.y as f64)
        })
        .collect()
}

/// Conditioned 8-point solve. Accumulates the 9x9 normal matrix of the
/// epipolar constraint rows, takes the eigenvector of its smallest
/// eigenvalue, projects the reshaped matrix onto rank 2 with equal leading
/// singular values, then undoes the conditioning.
fn eight_point_essential(
    xa: &[na::Vector2<f64>],
    xb: &[na::Vector2<f64>],
) -> Option<na::Matrix3<f64>> {
    if xa.len() < 8 {
        return None;
    }
    let t1 = conditioning_transform(xa)?;
    let t2 = conditioning_transform(xb)?;

    let mut m = na::SMatrix::<f64, 9, 9>::zeros();
    for (p1, p2) in xa.iter().zip(xb) {
        let c1 = t1 * na::Vector3::new(p1.x, p1.y, 1.0);
        let c2 = t2 * na::Vector3::new(p2.x, p2.y, 1.0);
        let a = [
            c2.x * c1.x,
            c2.x * c1.y,
            c2.x,
            c2.y * c1.x,
            c2.y * c1.y,
            c2.y,
            c1.x,
            c1.y,
            1.0,
        ];
        for i in 0..9 {
            for j in 0..9 {
                m[(i, j)] += a[i] * a[j];
            }
        }
    }

    let eig = na::SymmetricEigen::new(m);
    let mut min_idx = 0;
    for i in 1..9 {
        if eig.eigenvalues[i] < eig.eigenvalues[min_idx] {
            min_idx = i;
        }
    }
    let v = eig.eigenvectors.column(min_idx);
    let e = na::Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8]);

    // Project onto the essential manifold: singular values (s, s, 0).
    let svd = e.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return None;
    };
    let s = 0.5 * (svd.singular_values[0] + svd.singular_values[1]);
    let e = u * na::Matrix3::from_diagonal(&na::Vector3::new(s, s, 0.0)) * v_t;

    let e = t2.transpose() * e * t1;
    let norm = e.norm();
    if norm < 1e-15 {
        return None;
    }
    Some(e / norm)
}

/// Hartley conditioning: centroid to the origin, mean distance sqrt(2).
fn conditioning_transform(points: &[na::Vector2<f64>]) -> Option<na::Matrix3<f64>> {
    let n = points.len() as f64;
    let mut centroid = na::Vector2::zeros();
    for p in points {
        centroid += p;
    }
    centroid /= n;

    let mut mean_dist = 0.0;
    for p in points {
        mean_dist += (p - centroid).norm();
    }
    mean_dist /= n;
    if !mean_dist.is_finite() {
        return None;
    }
    let scale = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    Some(na::Matrix3::new(
        scale,
        0.0,
        -scale * centroid.x,
        0.0,
        scale,
        -scale * centroid.y,
        0.0,
        0.0,
        1.0,
    ))
}

/// First-order approximation of the geometric epipolar distance. Squared
/// units, so thresholds must be squared too.
pub fn sampson_distance(
    e: &na::Matrix3<f64>,
    x1: &na::Vector2<f64>,
    x2: &na::Vector2<f64>,
) -> f64 {
    let x1h = na::Vector3::new(x1.x, x1.y, 1.0);
    let x2h = na::Vector3::new(x2.x, x2.y, 1.0);
    let ex1 = e * x1h;
    let etx2 = e.transpose() * x2h;
    let num = x2h.dot(&ex1);
    let denom = ex1.x * ex1.x + ex1.y * ex1.y + etx2.x * etx2.x + etx2.y * etx2.y;
    if denom < 1e-30 {
        return f64::MAX;
    }
    num * num / denom
}

/// The four (R, t) readings of an essential matrix.
fn decompose_essential(
    e: &na::Matrix3<f64>,
) -> Option<[(na::Rotation3<f64>, na::Vector3<f64>); 4]> {
    let svd = e.svd(true, true);
    let (Some(mut u), Some(mut v_t)) = (svd.u, svd.v_t) else {
        return None;
    };
    if u.determinant() < 0.0 {
        u = -u;
    }
    if v_t.determinant() < 0.0 {
        v_t = -v_t;
    }
    let w = na::Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
    let r1 = na::Rotation3::from_matrix_unchecked(u * w * v_t);
    let r2 = na::Rotation3::from_matrix_unchecked(u * w.transpose() * v_t);
    let t: na::Vector3<f64> = u.column(2).into_owned();
    Some([(r1, t), (r1, -t), (r2, t), (r2, -t)])
}

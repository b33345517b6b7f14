use nalgebra as na;
use num_dual::DualDVec64;
use tiny_solver::factors::Factor;

/// Reprojection cost over one view window packed as a single flat vector:
/// `[pose (12, row-major 3x4) | intrinsics (9, row-major 3x3) |
/// observations (2N, xy interleaved) | points (3N)]`.
///
/// Each observation contributes its per-axis squared difference against the
/// reprojection of its point, scaled by 1/N, so the residual vector has 2N
/// entries. Pose, intrinsics, observations and points all float freely;
/// the caller decides which refined slices to keep.
pub struct BundleWindowFactor {
    pub num_points: usize,
}

pub const POSE_LEN: usize = 12;
pub const INTRINSICS_LEN: usize = 9;

impl BundleWindowFactor {
    pub fn new(num_points: usize) -> BundleWindowFactor {
        BundleWindowFactor { num_points }
    }

    pub fn residual_num(&self) -> usize {
        self.num_points * 2
    }

    pub fn param_len(&self) -> usize {
        POSE_LEN + INTRINSICS_LEN + self.num_points * 5
    }
}

impl Factor for BundleWindowFactor {
    fn residual_func(
        &self,
        params: &[nalgebra::DVector<num_dual::DualDVec64>],
    ) -> nalgebra::DVector<num_dual::DualDVec64> {
        let v = &params[0];
        let n = self.num_points;
        let rotation = na::Matrix3::new(
            v[0].clone(),
            v[1].clone(),
            v[2].clone(),
            v[4].clone(),
            v[5].clone(),
            v[6].clone(),
            v[8].clone(),
            v[9].clone(),
            v[10].clone(),
        );
        let translation = na::Vector3::new(v[3].clone(), v[7].clone(), v[11].clone());
        let fx = v[12].clone();
        let skew = v[13].clone();
        let cx = v[14].clone();
        let fy = v[16].clone();
        let cy = v[17].clone();

        let obs_base = POSE_LEN + INTRINSICS_LEN;
        let pts_base = obs_base + 2 * n;
        let scale = DualDVec64::from_re(1.0 / n as f64);

        let mut residuals = Vec::with_capacity(2 * n);
        for i in 0..n {
            let p = na::Vector3::new(
                v[pts_base + 3 * i].clone(),
                v[pts_base + 3 * i + 1].clone(),
                v[pts_base + 3 * i + 2].clone(),
            );
            let pc = rotation.clone() * p + translation.clone();
            let xn = pc[0].clone() / pc[2].clone();
            let yn = pc[1].clone() / pc[2].clone();
            let u = fx.clone() * xn + skew.clone() * yn.clone() + cx.clone();
            let w = fy.clone() * yn + cy.clone();

            let du = v[obs_base + 2 * i].clone() - u;
            let dv = v[obs_base + 2 * i + 1].clone() - w;
            residuals.push(du.clone() * du * scale.clone());
            residuals.push(dv.clone() * dv * scale.clone());
        }
        na::DVector::from_vec(residuals)
    }
}

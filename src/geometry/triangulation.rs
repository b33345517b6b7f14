use nalgebra as na;
use rayon::prelude::*;

// Keeps dehomogenization finite for points at infinity; degenerate tracks
// come out far away instead of NaN and get caught by reprojection checks.
const MIN_HOMOGENEOUS_W: f64 = 1e-12;

/// DLT triangulation of one track from two projection matrices. Each view
/// contributes the rows x*P3 - P1 and y*P3 - P2 of the 4x4 design matrix;
/// the point is the right singular vector of the smallest singular value.
pub fn triangulate_point(
    proj_a: &na::Matrix3x4<f64>,
    proj_b: &na::Matrix3x4<f64>,
    x_a: &na::Vector2<f64>,
    x_b: &na::Vector2<f64>,
) -> na::Vector3<f64> {
    let mut design = na::Matrix4::<f64>::zeros();
    design.set_row(0, &(proj_a.row(2) * x_a.x - proj_a.row(0)));
    design.set_row(1, &(proj_a.row(2) * x_a.y - proj_a.row(1)));
    design.set_row(2, &(proj_b.row(2) * x_b.x - proj_b.row(0)));
    design.set_row(3, &(proj_b.row(2) * x_b.y - proj_b.row(1)));

    let svd = design.svd(true, true);
    let Some(v_t) = svd.v_t else {
        return na::Vector3::zeros();
    };
    let h = v_t.row(3);
    let w = if h[3].abs() < MIN_HOMOGENEOUS_W {
        MIN_HOMOGENEOUS_W.copysign(h[3])
    } else {
        h[3]
    };
    na::Vector3::new(h[0] / w, h[1] / w, h[2] / w)
}

/// Triangulates every correspondence of a pair through two full pixel-space
/// projections, in parallel. Output order follows the input order.
pub fn triangulate_points(
    proj_a: &na::Matrix3x4<f64>,
    proj_b: &na::Matrix3x4<f64>,
    points_a: &[glam::Vec2],
    points_b: &[glam::Vec2],
) -> Vec<na::Vector3<f64>> {
    debug_assert_eq!(points_a.len(), points_b.len());
    points_a
        .par_iter()
        .zip(points_b.par_iter())
        .map(|(pa, pb)| {
            triangulate_point(
                proj_a,
                proj_b,
                &na::Vector2::new(pa.x as f64, pa.y as f64),
                &na::Vector2::new(pb.x as f64, pb.y as f64),
            )
        })
        .collect()
}

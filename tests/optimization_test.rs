use incremental_sfm::optimization::{BundleWindowFactor, INTRINSICS_LEN, POSE_LEN, adjust_window};
use incremental_sfm::reprojection::{mean_reprojection_error, project_point};
use incremental_sfm::types::{CameraPose, Intrinsics};
use nalgebra as na;
use num_dual::DualDVec64;
use tiny_solver::factors::Factor;

fn test_intrinsics() -> Intrinsics {
    Intrinsics::new(na::Matrix3::new(
        520.0, 0.0, 320.0, 0.0, 520.0, 240.0, 0.0, 0.0, 1.0,
    ))
}

fn window_points() -> Vec<na::Vector3<f64>> {
    let mut pts = Vec::new();
    for i in 0..4 {
        for j in 0..3 {
            pts.push(na::Vector3::new(
                i as f64 * 0.5 - 0.75,
                j as f64 * 0.4 - 0.4,
                5.0 + ((i + j) % 3) as f64 * 0.6,
            ));
        }
    }
    pts
}

fn window_pose() -> CameraPose {
    CameraPose::from_rvec_tvec(
        &na::Vector3::new(0.06, -0.1, 0.04),
        &na::Vector3::new(0.2, -0.1, 0.3),
    )
}

fn project_f64(pose: &CameraPose, k: &Intrinsics, p: &na::Vector3<f64>) -> na::Vector2<f64> {
    let pc = pose.transform(p);
    na::Vector2::new(
        k.fx() * pc.x / pc.z + k.cx(),
        k.fy() * pc.y / pc.z + k.cy(),
    )
}

/// [pose 12 | intrinsics 9 | observations 2N | points 3N], row-major.
fn pack_flat(
    points3d: &[na::Vector3<f64>],
    observations: &[na::Vector2<f64>],
    pose: &CameraPose,
    k: &Intrinsics,
) -> Vec<f64> {
    let m = pose.matrix3x4();
    let mut x = Vec::new();
    for r in 0..3 {
        for c in 0..4 {
            x.push(m[(r, c)]);
        }
    }
    for r in 0..3 {
        for c in 0..3 {
            x.push(k.k[(r, c)]);
        }
    }
    for ob in observations {
        x.push(ob.x);
        x.push(ob.y);
    }
    for p in points3d {
        x.push(p.x);
        x.push(p.y);
        x.push(p.z);
    }
    x
}

fn dual_params(x: &[f64]) -> Vec<na::DVector<DualDVec64>> {
    vec![na::DVector::from_vec(
        x.iter().map(|&v| DualDVec64::from_re(v)).collect(),
    )]
}

fn residual_norm(r: &na::DVector<DualDVec64>) -> f64 {
    r.iter().map(|d| d.re * d.re).sum::<f64>().sqrt()
}

#[test]
fn test_bundle_factor_zero_at_ground_truth() {
    let k = test_intrinsics();
    let pose = window_pose();
    let pts = window_points();
    let obs: Vec<na::Vector2<f64>> = pts.iter().map(|p| project_f64(&pose, &k, p)).collect();

    let factor = BundleWindowFactor::new(pts.len());
    let flat = pack_flat(&pts, &obs, &pose, &k);
    assert_eq!(flat.len(), factor.param_len());

    let residual = factor.residual_func(&dual_params(&flat));
    assert_eq!(residual.len(), factor.residual_num());
    assert!(
        residual_norm(&residual) < 1e-9,
        "residual at ground truth is {}",
        residual_norm(&residual)
    );

    // Nudging the translation must show up in the residual.
    let mut bad = flat.clone();
    bad[3] += 0.1;
    let residual_bad = factor.residual_func(&dual_params(&bad));
    assert!(residual_norm(&residual_bad) > 1e-3);
}

#[test]
fn test_bundle_factor_entries_are_squared_per_axis() {
    let k = test_intrinsics();
    let pose = window_pose();
    let pts = window_points();
    let n = pts.len();
    let obs: Vec<na::Vector2<f64>> = pts.iter().map(|p| project_f64(&pose, &k, p)).collect();

    let mut flat = pack_flat(&pts, &obs, &pose, &k);
    // Shift the first observation 3 px in x only.
    flat[POSE_LEN + INTRINSICS_LEN] += 3.0;

    let factor = BundleWindowFactor::new(n);
    let residual = factor.residual_func(&dual_params(&flat));
    assert!((residual[0].re - 9.0 / n as f64).abs() < 1e-6);
    assert!(residual[1].re.abs() < 1e-9);
    for i in 2..residual.len() {
        assert!(residual[i].re.abs() < 1e-9, "entry {} moved", i);
    }
}

#[test]
fn test_adjust_window_skips_below_tolerance() {
    let k = test_intrinsics();
    let pose = window_pose();
    let pts = window_points();
    let obs: Vec<glam::Vec2> = pts.iter().map(|p| project_point(&pose, &k, p)).collect();

    let refined = adjust_window(&pts, &obs, &pose, &k, 0.5);
    assert_eq!(refined.pose, pose);
    assert_eq!(refined.points3d, pts);
    assert!(refined.error < 0.5);
}

#[test]
fn test_adjust_window_empty() {
    let k = test_intrinsics();
    let refined = adjust_window(&[], &[], &CameraPose::identity(), &k, 0.5);
    assert!(refined.points3d.is_empty());
    assert!(refined.observations.is_empty());
    assert_eq!(refined.error, 0.0);
}

#[test]
fn test_adjust_window_never_worsens() {
    let k = test_intrinsics();
    let pose = window_pose();
    let pts = window_points();
    let obs: Vec<glam::Vec2> = pts.iter().map(|p| project_point(&pose, &k, p)).collect();

    // Push the points off their tracks so the window starts a few px out.
    let perturbed: Vec<na::Vector3<f64>> = pts
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let s = if i % 2 == 0 { 0.03 } else { -0.025 };
            p + na::Vector3::new(s, -s, s * 0.5)
        })
        .collect();
    let initial = mean_reprojection_error(&perturbed, &obs, &pose, &k);
    assert!(initial > 1.0, "perturbation too small, error {}", initial);

    let refined = adjust_window(&perturbed, &obs, &pose, &k, 1e-6);
    assert_eq!(refined.points3d.len(), pts.len());
    assert_eq!(refined.observations.len(), obs.len());
    assert!(refined.error.is_finite());
    assert!(refined.error <= initial + 1e-9);

    // The reported error matches the window it came with.
    let recomputed = mean_reprojection_error(
        &refined.points3d,
        &refined.observations,
        &refined.pose,
        &k,
    );
    assert!((refined.error - recomputed).abs() < 1e-9);
}

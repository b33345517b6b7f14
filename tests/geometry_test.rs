use incremental_sfm::geometry::{
    EssentialRansacParams, GeometryError, PnpRansacParams, estimate_essential, pnp_ransac,
    recover_pose, sampson_distance, triangulate_point, triangulate_points,
};
use incremental_sfm::reprojection::project_point;
use incremental_sfm::types::{CameraPose, Intrinsics};
use nalgebra as na;

fn test_intrinsics() -> Intrinsics {
    Intrinsics::new(na::Matrix3::new(
        520.0, 0.0, 320.0, 0.0, 520.0, 240.0, 0.0, 0.0, 1.0,
    ))
}

/// 40 points in front of the origin with varied depth, nothing planar.
fn scene_points() -> Vec<na::Vector3<f64>> {
    let mut pts = Vec::new();
    for i in 0..8 {
        for j in 0..5 {
            pts.push(na::Vector3::new(
                i as f64 * 0.4 - 1.4,
                j as f64 * 0.35 - 0.7,
                5.0 + ((i * 5 + j) % 7) as f64 * 0.45,
            ));
        }
    }
    pts
}

/// Exact f64 projection, bypassing the f32 observation type.
fn project_f64(pose: &CameraPose, k: &Intrinsics, p: &na::Vector3<f64>) -> na::Vector2<f64> {
    let pc = pose.transform(p);
    na::Vector2::new(
        k.fx() * pc.x / pc.z + k.cx(),
        k.fy() * pc.y / pc.z + k.cy(),
    )
}

#[test]
fn test_triangulation_round_trip() {
    let k = test_intrinsics();
    let pose_a = CameraPose::identity();
    let pose_b = CameraPose::from_rvec_tvec(
        &na::Vector3::new(0.05, -0.1, 0.02),
        &na::Vector3::new(-0.6, 0.1, 0.08),
    );
    let proj_a = pose_a.projection(&k);
    let proj_b = pose_b.projection(&k);

    let p = na::Vector3::new(0.3, -0.2, 6.0);
    let ob_a = project_f64(&pose_a, &k, &p);
    let ob_b = project_f64(&pose_b, &k, &p);
    let x = triangulate_point(&proj_a, &proj_b, &ob_a, &ob_b);
    assert!((x - p).norm() < 1e-6, "triangulated {:?}", x);
}

#[test]
fn test_triangulation_batch() {
    let k = test_intrinsics();
    let pose_a = CameraPose::identity();
    let pose_b = CameraPose::from_rvec_tvec(
        &na::Vector3::new(0.0, -0.08, 0.01),
        &na::Vector3::new(-0.7, 0.0, 0.05),
    );
    let pts = scene_points();
    let obs_a: Vec<glam::Vec2> = pts.iter().map(|p| project_point(&pose_a, &k, p)).collect();
    let obs_b: Vec<glam::Vec2> = pts.iter().map(|p| project_point(&pose_b, &k, p)).collect();

    let out = triangulate_points(
        &pose_a.projection(&k),
        &pose_b.projection(&k),
        &obs_a,
        &obs_b,
    );
    assert_eq!(out.len(), pts.len());
    // Observations went through f32, so only expect millimeters at this depth.
    for (x, p) in out.iter().zip(pts.iter()) {
        assert!((x - p).norm() < 1e-2, "point {:?} came back {:?}", p, x);
    }
}

#[test]
fn test_essential_on_clean_correspondences() {
    let k = test_intrinsics();
    let pose_a = CameraPose::identity();
    let t_gt = na::Vector3::new(-0.8, 0.1, 0.15);
    let pose_b = CameraPose::from_rvec_tvec(&na::Vector3::new(0.04, -0.12, 0.03), &t_gt);
    let pts = scene_points();
    let obs_a: Vec<glam::Vec2> = pts.iter().map(|p| project_point(&pose_a, &k, p)).collect();
    let obs_b: Vec<glam::Vec2> = pts.iter().map(|p| project_point(&pose_b, &k, p)).collect();

    let est = estimate_essential(&obs_a, &obs_b, &k, &EssentialRansacParams::default()).unwrap();
    assert_eq!(est.inlier_count, pts.len());
    assert!(est.inlier_mask.iter().all(|&m| m));

    // The epipolar residual of every correspondence is tiny.
    for (a, b) in obs_a.iter().zip(obs_b.iter()) {
        let na_ = k.normalize(*a);
        let nb = k.normalize(*b);
        let d = sampson_distance(
            &est.essential,
            &na::Vector2::new(na_.x as f64, na_.y as f64),
            &na::Vector2::new(nb.x as f64, nb.y as f64),
        );
        assert!(d < 1e-8);
    }

    let rec = recover_pose(&est.essential, &obs_a, &obs_b, &k).unwrap();
    assert_eq!(rec.points_in_front, pts.len());
    assert!(rec.depth_mask.iter().all(|&m| m));

    let dr = rec.relative.rotation.rotation_to(&pose_b.rotation).angle();
    assert!(dr < 1e-3, "rotation off by {} rad", dr);
    // Translation comes back unit length; cheirality fixes its sign.
    let dot = rec.relative.translation.normalize().dot(&t_gt.normalize());
    assert!(dot > 0.999, "translation direction dot {}", dot);
}

#[test]
fn test_essential_rejects_planted_outliers() {
    let k = test_intrinsics();
    let pose_a = CameraPose::identity();
    let pose_b = CameraPose::from_rvec_tvec(
        &na::Vector3::new(0.02, -0.1, 0.0),
        &na::Vector3::new(-0.75, 0.05, 0.1),
    );
    let pts = scene_points();
    let obs_a: Vec<glam::Vec2> = pts.iter().map(|p| project_point(&pose_a, &k, p)).collect();
    let mut obs_b: Vec<glam::Vec2> = pts.iter().map(|p| project_point(&pose_b, &k, p)).collect();

    let corrupted = [3usize, 9, 17, 24, 31, 38];
    for &i in &corrupted {
        obs_b[i] += glam::Vec2::new(40.0, -25.0);
    }

    let est = estimate_essential(&obs_a, &obs_b, &k, &EssentialRansacParams::default()).unwrap();
    assert_eq!(est.inlier_count, pts.len() - corrupted.len());
    for i in 0..pts.len() {
        assert_eq!(est.inlier_mask[i], !corrupted.contains(&i), "index {}", i);
    }
}

#[test]
fn test_essential_needs_eight() {
    let k = test_intrinsics();
    let obs: Vec<glam::Vec2> = (0..5).map(|i| glam::Vec2::new(i as f32, i as f32)).collect();
    let err = estimate_essential(&obs, &obs, &k, &EssentialRansacParams::default()).unwrap_err();
    assert!(matches!(err, GeometryError::NotEnoughCorrespondences(5)));
}

#[test]
fn test_pnp_recovers_pose_and_drops_corrupted() {
    let k = test_intrinsics();
    let rvec_gt = na::Vector3::new(0.1, -0.05, 0.08);
    let t_gt = na::Vector3::new(0.3, -0.2, 0.5);
    let pose_gt = CameraPose::from_rvec_tvec(&rvec_gt, &t_gt);

    let mut pts = scene_points();
    let extra = scene_points();
    pts.extend(extra.iter().map(|p| p + na::Vector3::new(0.15, 0.1, 1.3)));
    let mut obs: Vec<glam::Vec2> = pts.iter().map(|p| project_point(&pose_gt, &k, p)).collect();

    let corrupted = [1usize, 8, 15, 22, 29, 36, 43, 50, 57, 64];
    for &i in &corrupted {
        obs[i] += glam::Vec2::new(50.0, 35.0);
    }

    let est = pnp_ransac(&pts, &obs, &k, &PnpRansacParams::default()).unwrap();
    for &i in &corrupted {
        assert!(!est.inliers.contains(&i), "corrupted index {} survived", i);
    }
    assert!(est.inliers.len() >= pts.len() - corrupted.len() - 2);

    let dr = est.pose.rotation.rotation_to(&pose_gt.rotation).angle();
    assert!(dr < 1e-2, "rotation off by {} rad", dr);
    assert!((est.pose.translation - t_gt).norm() < 0.05);
}

#[test]
fn test_pnp_needs_four() {
    let k = test_intrinsics();
    let pts = vec![na::Vector3::new(0.0, 0.0, 5.0); 3];
    let obs = vec![glam::Vec2::new(320.0, 240.0); 3];
    let err = pnp_ransac(&pts, &obs, &k, &PnpRansacParams::default()).unwrap_err();
    assert!(matches!(err, GeometryError::NotEnoughPoints(3)));
}

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use image::RgbImage;
use indicatif::ProgressIterator;
use nalgebra as na;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data_loader::{LoaderError, SequenceLoader};
use crate::geometry::{
    EssentialRansacParams, GeometryError, PnpRansacParams, estimate_essential, pnp_ransac,
    recover_pose, triangulate_points,
};
use crate::io::{
    ReconstructionReport, report_timestamp, write_error_series, write_ply, write_report,
    write_trajectory,
};
use crate::matching::{FeatureExtractor, match_views};
use crate::point_cloud::PointCloud;
use crate::reprojection::mean_reprojection_error;
use crate::tracking::link_tracks;
use crate::types::{CameraPose, Correspondences, Intrinsics};

#[derive(Debug, Error)]
pub enum SfmError {
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error("no matches between view {view_a} and view {view_b}")]
    NoMatches { view_a: usize, view_b: usize },
    #[error("geometric estimation failed at view {view}: {source}")]
    Geometry { view: usize, source: GeometryError },
    #[error("invalid pipeline state: {0}")]
    InvalidState(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Everything tunable about a run. All fields have working defaults, so a
/// partial JSON config only needs to name what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconstructionConfig {
    /// Per-axis image downscale factor, a power of two.
    pub downscale: u32,
    /// AKAZE detector response threshold.
    pub akaze_threshold: f64,
    /// Lowe ratio for 2-NN descriptor match filtering.
    pub match_ratio: f32,
    pub essential: EssentialRansacParams,
    pub pnp: PnpRansacParams,
    /// Run the local bundle adjustment stage each iteration.
    pub bundle_adjustment: bool,
    /// Mean reprojection error (px) below which a window skips adjustment.
    pub ba_tolerance: f64,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        ReconstructionConfig {
            downscale: 2,
            akaze_threshold: 0.001,
            match_ratio: 0.7,
            essential: EssentialRansacParams::default(),
            pnp: PnpRansacParams::default(),
            bundle_adjustment: false,
            ba_tolerance: 0.5,
        }
    }
}

/// The view pair bridging one iteration to the next: its matches, the two
/// world poses, and the pair's triangulated points. Right after bootstrap
/// `points3d` is aligned with `corr` row by row; after an advance it is
/// stale and the next iteration re-triangulates the carried matches.
struct Carry {
    corr: Correspondences,
    points3d: Vec<na::Vector3<f64>>,
    pose_a: CameraPose,
    pose_b: CameraPose,
}

/// Final outputs, handed off once the driver is done with them.
pub struct ReconstructionOutput {
    pub cloud: PointCloud,
    pub projections: Vec<na::Matrix3x4<f64>>,
    pub errors: Vec<f64>,
}

/// The incremental reconstruction state machine. Feed it the first pair's
/// matches through [`Reconstruction::bootstrap`], every later pair through
/// [`Reconstruction::iterate`], then take the accumulated results with
/// [`Reconstruction::finalize`].
pub struct Reconstruction {
    config: ReconstructionConfig,
    intrinsics: Intrinsics,
    carry: Option<Carry>,
    iteration: usize,
    cloud: PointCloud,
    projections: Vec<na::Matrix3x4<f64>>,
    errors: Vec<f64>,
}

impl Reconstruction {
    pub fn new(intrinsics: Intrinsics, config: ReconstructionConfig) -> Reconstruction {
        Reconstruction {
            config,
            intrinsics,
            carry: None,
            iteration: 0,
            cloud: PointCloud::new(),
            projections: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn views_processed(&self) -> usize {
        self.projections.len()
    }

    pub fn errors(&self) -> &[f64] {
        &self.errors
    }

    pub fn cloud_len(&self) -> usize {
        self.cloud.len()
    }

    /// Initializes the world from the first two views.
    ///
    /// Prunes the pair's matches through the essential matrix consensus and
    /// the cheirality mask, composes the second pose, triangulates, then
    /// runs one PnP pass whose inliers align the surviving matches with
    /// their 3d points for the iterative loop. Returns the pair's mean
    /// reprojection error.
    pub fn bootstrap(&mut self, mut matches: Correspondences) -> Result<f64, SfmError> {
        if self.carry.is_some() {
            return Err(SfmError::InvalidState("bootstrap ran twice"));
        }
        if matches.is_empty() {
            return Err(SfmError::NoMatches {
                view_a: 0,
                view_b: 1,
            });
        }
        let geometry = |source| SfmError::Geometry { view: 1, source };

        let est = estimate_essential(
            &matches.points_a,
            &matches.points_b,
            &self.intrinsics,
            &self.config.essential,
        )
        .map_err(geometry)?;
        matches.retain_by_mask(&est.inlier_mask);

        let recovery = recover_pose(
            &est.essential,
            &matches.points_a,
            &matches.points_b,
            &self.intrinsics,
        )
        .map_err(geometry)?;
        matches.retain_by_mask(&recovery.depth_mask);

        let pose_a = CameraPose::identity();
        let pose_b = pose_a.compose_relative(&recovery.relative);
        let proj_a = pose_a.projection(&self.intrinsics);
        let proj_b = pose_b.projection(&self.intrinsics);

        let points3d =
            triangulate_points(&proj_a, &proj_b, &matches.points_a, &matches.points_b);
        let error =
            mean_reprojection_error(&points3d, &matches.points_b, &pose_b, &self.intrinsics);
        log::info!(
            "bootstrap: {} points, reprojection error {:.4} px",
            points3d.len(),
            error
        );

        // One alignment pass; the recovered pose already fixes the scale so
        // only the inlier set is kept.
        let pnp = pnp_ransac(&points3d, &matches.points_b, &self.intrinsics, &self.config.pnp)
            .map_err(geometry)?;
        let points3d = select(&points3d, &pnp.inliers);
        let matches = matches.select(&pnp.inliers);
        log::debug!("bootstrap alignment kept {} of the pair", points3d.len());

        self.projections.push(proj_a);
        self.projections.push(proj_b);
        self.carry = Some(Carry {
            corr: matches,
            points3d,
            pose_a,
            pose_b,
        });
        Ok(error)
    }

    /// Folds one more view into the reconstruction.
    ///
    /// `new_matches` pair the carried view with view `view_index`; `image`
    /// is the new view's raster for color sampling. Returns the iteration's
    /// mean reprojection error over its novel points.
    pub fn iterate(
        &mut self,
        new_matches: Correspondences,
        image: &RgbImage,
        view_index: usize,
    ) -> Result<f64, SfmError> {
        let carry = self
            .carry
            .as_mut()
            .ok_or(SfmError::InvalidState("iterate before bootstrap"))?;
        if new_matches.is_empty() {
            return Err(SfmError::NoMatches {
                view_a: view_index - 1,
                view_b: view_index,
            });
        }
        let geometry = |source| SfmError::Geometry {
            view: view_index,
            source,
        };

        // The first carry still holds the bootstrap-aligned points; every
        // later carry holds raw matches that need fresh triangulation.
        if self.iteration > 0 {
            let proj_a = carry.pose_a.projection(&self.intrinsics);
            let proj_b = carry.pose_b.projection(&self.intrinsics);
            carry.points3d = triangulate_points(
                &proj_a,
                &proj_b,
                &carry.corr.points_a,
                &carry.corr.points_b,
            );
        }

        let part = link_tracks(&carry.corr.ids_b, &new_matches.ids_a);
        let known_points3d = select(&carry.points3d, &part.carried_known);
        let known_obs_new = select(&new_matches.points_b, &part.new_known);

        let pnp = pnp_ransac(
            &known_points3d,
            &known_obs_new,
            &self.intrinsics,
            &self.config.pnp,
        )
        .map_err(geometry)?;
        let pose_new = pnp.pose;
        let known_points3d = select(&known_points3d, &pnp.inliers);
        let known_obs_new = select(&known_obs_new, &pnp.inliers);

        let known_error = mean_reprojection_error(
            &known_points3d,
            &known_obs_new,
            &pose_new,
            &self.intrinsics,
        );
        log::debug!(
            "view {}: {} known tracks, pnp error {:.4} px",
            view_index,
            known_points3d.len(),
            known_error
        );

        let novel_obs_shared = select(&new_matches.points_a, &part.new_novel);
        let novel_obs_new = select(&new_matches.points_b, &part.new_novel);
        let proj_prev = carry.pose_b.projection(&self.intrinsics);
        let proj_new = pose_new.projection(&self.intrinsics);
        let novel_points =
            triangulate_points(&proj_prev, &proj_new, &novel_obs_shared, &novel_obs_new);
        let mut error =
            mean_reprojection_error(&novel_points, &novel_obs_new, &pose_new, &self.intrinsics);
        log::info!(
            "view {}: {} novel points, reprojection error {:.4} px",
            view_index,
            novel_points.len(),
            error
        );

        // The trajectory records the pose as estimated; adjustment below
        // only feeds the carried state and the cloud.
        self.projections.push(proj_new);

        let (novel_points, novel_obs_new, pose_final) = if self.config.bundle_adjustment {
            let refined = crate::optimization::adjust_window(
                &novel_points,
                &novel_obs_new,
                &pose_new,
                &self.intrinsics,
                self.config.ba_tolerance,
            );
            log::info!(
                "view {}: error after bundle adjustment {:.4} px",
                view_index,
                refined.error
            );
            error = refined.error;
            (refined.points3d, refined.observations, refined.pose)
        } else {
            (novel_points, novel_obs_new, pose_new)
        };

        self.cloud.add_points(&novel_points, &novel_obs_new, image);
        self.errors.push(error);

        carry.pose_a = std::mem::replace(&mut carry.pose_b, pose_final);
        carry.corr = new_matches;
        self.iteration += 1;
        Ok(error)
    }

    /// Ends the run: filters and scales the cloud, then hands everything
    /// accumulated to the caller.
    pub fn finalize(self) -> ReconstructionOutput {
        let mut cloud = self.cloud;
        cloud.finalize();
        ReconstructionOutput {
            cloud,
            projections: self.projections,
            errors: self.errors,
        }
    }
}

/// Output directory name for a run, split by the adjustment toggle so the
/// two variants never overwrite each other.
pub fn output_dir_name(bundle_adjustment: bool) -> &'static str {
    if bundle_adjustment { "results_ba" } else { "results" }
}

/// Runs the whole pipeline over a loaded sequence and writes the cloud,
/// trajectory, error series and run report into `output_dir`.
///
/// `cancel` is polled between iterations; a raised flag stops the loop
/// early and everything gathered so far is still exported.
pub fn run_pipeline(
    loader: &SequenceLoader,
    config: &ReconstructionConfig,
    output_dir: &Path,
    cancel: &AtomicBool,
) -> Result<ReconstructionReport, SfmError> {
    let intrinsics = loader.intrinsics.clone();
    let extractor = FeatureExtractor::new(config.akaze_threshold);

    let (first, second) = rayon::join(
        || loader.load_image(0).map(|img| extractor.extract(&img)),
        || loader.load_image(1).map(|img| extractor.extract(&img)),
    );
    let features_a = first?;
    let mut features_prev = second?;

    let mut recon = Reconstruction::new(intrinsics.clone(), config.clone());
    let matches = match_views(&features_a, &features_prev, config.match_ratio);
    recon.bootstrap(matches)?;

    let total = loader.len() - 2;
    for view in (2..loader.len()).progress_count(total as u64) {
        if cancel.load(Ordering::Relaxed) {
            log::warn!("cancelled before view {}, exporting partial results", view);
            break;
        }
        let image = loader.load_image(view)?;
        let features = extractor.extract(&image);
        let matches = match_views(&features_prev, &features, config.match_ratio);
        recon.iterate(matches, &image.to_rgb8(), view)?;
        features_prev = features;
    }

    let views = recon.views_processed();
    let output = recon.finalize();

    std::fs::create_dir_all(output_dir)?;
    write_ply(&output_dir.join("cloud.ply"), &output.cloud)?;
    write_trajectory(
        &output_dir.join("trajectory.txt"),
        &intrinsics,
        &output.projections,
    )?;
    write_error_series(&output_dir.join("reprojection_errors.txt"), &output.errors)?;

    let report = ReconstructionReport {
        timestamp: report_timestamp(),
        bundle_adjustment: config.bundle_adjustment,
        views,
        cloud_points: output.cloud.len(),
        final_error: output.errors.last().copied().unwrap_or(0.0),
        mean_errors: output.errors,
    };
    write_report(&output_dir.join("report.json"), &report)?;
    log::info!(
        "wrote {} points over {} views to {}",
        report.cloud_points,
        report.views,
        output_dir.display()
    );
    Ok(report)
}

fn select<T: Copy>(items: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| items[i]).collect()
}

use image::RgbImage;
use nalgebra as na;

use crate::types::retain_masked;

/// Points whose centroid distance exceeds the mean distance by this margin
/// are dropped at finalization.
pub const OUTLIER_MARGIN: f64 = 300.0;

/// Surviving points are stretched by this factor before export.
pub const EXPORT_SCALE: f64 = 200.0;

/// World point cloud grown across iterations, one color sample per point.
/// Colors are kept blue, green, red to match the export column order.
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    pub points: Vec<na::Vector3<f64>>,
    pub colors: Vec<[u8; 3]>,
}

impl PointCloud {
    pub fn new() -> PointCloud {
        PointCloud::default()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Appends one iteration's triangulated points, sampling each color from
    /// `image` at the truncated observation coordinate. Observations outside
    /// the frame are clamped to the nearest edge pixel.
    pub fn add_points(
        &mut self,
        points: &[na::Vector3<f64>],
        observations: &[glam::Vec2],
        image: &RgbImage,
    ) {
        debug_assert_eq!(points.len(), observations.len());
        for (p, ob) in points.iter().zip(observations.iter()) {
            self.points.push(*p);
            self.colors.push(sample_color(image, *ob));
        }
        log::debug!("cloud grew by {} to {} points", points.len(), self.len());
    }

    /// Drops every point farther from the centroid than the mean centroid
    /// distance plus [`OUTLIER_MARGIN`]. Returns the number removed.
    pub fn filter_outliers(&mut self) -> usize {
        if self.points.is_empty() {
            return 0;
        }
        let n = self.points.len() as f64;
        let centroid = self.points.iter().sum::<na::Vector3<f64>>() / n;
        let distances: Vec<f64> = self.points.iter().map(|p| (p - centroid).norm()).collect();
        let mean = distances.iter().sum::<f64>() / n;
        let threshold = mean + OUTLIER_MARGIN;
        let keep: Vec<bool> = distances.iter().map(|d| *d < threshold).collect();
        let before = self.points.len();
        retain_masked(&mut self.points, &keep);
        retain_masked(&mut self.colors, &keep);
        before - self.points.len()
    }

    /// Multiplies every coordinate by `factor`.
    pub fn scale(&mut self, factor: f64) {
        for p in self.points.iter_mut() {
            *p *= factor;
        }
    }

    /// Outlier filter then export scaling, in that order.
    pub fn finalize(&mut self) {
        let removed = self.filter_outliers();
        log::info!("dropped {} outliers, {} points remain", removed, self.len());
        self.scale(EXPORT_SCALE);
    }
}

fn sample_color(image: &RgbImage, ob: glam::Vec2) -> [u8; 3] {
    let x = (ob.x as u32).min(image.width().saturating_sub(1));
    let y = (ob.y as u32).min(image.height().saturating_sub(1));
    let px = image.get_pixel(x, y).0;
    [px[2], px[1], px[0]]
}

use std::path::Path;

use nalgebra as na;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::point_cloud::PointCloud;
use crate::types::Intrinsics;

/// Serializes an object to a JSON file.
pub fn object_to_json<T: Serialize>(output_path: &Path, object: &T) -> std::io::Result<()> {
    let j = serde_json::to_string_pretty(object)?;
    std::fs::write(output_path, j)
}

/// Deserializes an object from a JSON file.
pub fn object_from_json<T: DeserializeOwned>(file_path: &Path) -> std::io::Result<T> {
    let contents = std::fs::read_to_string(file_path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Writes the cloud as an ascii ply file, one `x y z b g r` line per vertex.
pub fn write_ply(output_path: &Path, cloud: &PointCloud) -> std::io::Result<()> {
    let mut s = String::new();
    s += "ply\n";
    s += "format ascii 1.0\n";
    s += format!("element vertex {}\n", cloud.len()).as_str();
    s += "property float x\n";
    s += "property float y\n";
    s += "property float z\n";
    s += "property uchar blue\n";
    s += "property uchar green\n";
    s += "property uchar red\n";
    s += "end_header\n";
    for (p, c) in cloud.points.iter().zip(cloud.colors.iter()) {
        s += format!(
            "{:.6} {:.6} {:.6} {} {} {}\n",
            p.x, p.y, p.z, c[0], c[1], c[2]
        )
        .as_str();
    }
    std::fs::write(output_path, s)
}

/// Writes the flattened trajectory, one value per line: the nine intrinsic
/// entries first, then twelve entries per projection matrix, all row major.
pub fn write_trajectory(
    output_path: &Path,
    intrinsics: &Intrinsics,
    projections: &[na::Matrix3x4<f64>],
) -> std::io::Result<()> {
    let mut s = String::new();
    for r in 0..3 {
        for c in 0..3 {
            s += format!("{}\n", intrinsics.k[(r, c)]).as_str();
        }
    }
    for proj in projections {
        for r in 0..3 {
            for c in 0..4 {
                s += format!("{}\n", proj[(r, c)]).as_str();
            }
        }
    }
    std::fs::write(output_path, s)
}

/// Writes the per-iteration mean reprojection errors as `index error` lines.
pub fn write_error_series(output_path: &Path, errors: &[f64]) -> std::io::Result<()> {
    let mut s = String::new();
    for (i, e) in errors.iter().enumerate() {
        s += format!("{} {:.6}\n", i, e).as_str();
    }
    std::fs::write(output_path, s)
}

/// Summary of one reconstruction run.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReconstructionReport {
    pub timestamp: String,
    pub bundle_adjustment: bool,
    pub views: usize,
    pub cloud_points: usize,
    pub mean_errors: Vec<f64>,
    pub final_error: f64,
}

pub fn write_report(output_path: &Path, report: &ReconstructionReport) -> std::io::Result<()> {
    object_to_json(output_path, report)
}

/// Local wall-clock time as an rfc3339 string, falling back to utc when the
/// local offset cannot be determined.
pub fn report_timestamp() -> String {
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    now.format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}

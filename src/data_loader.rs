use std::fs;
use std::path::{Path, PathBuf};

use glob::glob;
use image::DynamicImage;
use image::imageops::FilterType;
use nalgebra as na;
use thiserror::Error;

use crate::types::Intrinsics;

const INTRINSIC_FILE: &str = "K.txt";

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{path}: expected 9 values for a 3x3 intrinsic matrix, found {count}")]
    MalformedIntrinsics { path: PathBuf, count: usize },
    #[error("{path}: cannot parse '{token}' as a number")]
    BadNumber { path: PathBuf, token: String },
    #[error("invalid image pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    #[error("{dir}: found {count} images, an ordered sequence needs at least 2")]
    NotEnoughImages { dir: PathBuf, count: usize },
    #[error("downscale factor {0} must be a power of two >= 1")]
    BadDownscale(u32),
    #[error("cannot decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// An ordered image sequence with one shared pinhole camera.
///
/// The dataset directory holds the images plus a `K.txt` with the 3x3
/// intrinsic matrix, nine whitespace separated values in row-major order.
/// Intrinsics are rescaled once for the requested downscale factor; images
/// are decoded lazily per view.
pub struct SequenceLoader {
    pub intrinsics: Intrinsics,
    pub image_paths: Vec<PathBuf>,
    downscale: u32,
}

impl SequenceLoader {
    /// Opens a dataset directory.
    ///
    /// * `dir` - directory holding `K.txt` and the image files.
    /// * `downscale` - per-axis downscale factor, a power of two (1 keeps
    ///   full resolution).
    pub fn open(dir: &Path, downscale: u32) -> Result<SequenceLoader, LoaderError> {
        if downscale == 0 || !downscale.is_power_of_two() {
            return Err(LoaderError::BadDownscale(downscale));
        }
        let k_path = dir.join(INTRINSIC_FILE);
        let raw = fs::read_to_string(&k_path).map_err(|source| LoaderError::Io {
            path: k_path.clone(),
            source,
        })?;
        let intrinsics = parse_intrinsics(&raw, &k_path)?.downscaled(downscale);

        let pattern = format!("{}/*", dir.display());
        let mut image_paths: Vec<PathBuf> =
            glob(&pattern)?.filter_map(image_filter).collect();
        image_paths.sort();
        if image_paths.len() < 2 {
            return Err(LoaderError::NotEnoughImages {
                dir: dir.to_path_buf(),
                count: image_paths.len(),
            });
        }
        log::info!(
            "{}: {} images, downscale {}",
            dir.display(),
            image_paths.len(),
            downscale
        );
        Ok(SequenceLoader {
            intrinsics,
            image_paths,
            downscale,
        })
    }

    pub fn len(&self) -> usize {
        self.image_paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_paths.is_empty()
    }

    /// Decodes view `index` and halves its resolution once per octave of the
    /// downscale factor, mirroring the intrinsic rescale done in `open`.
    pub fn load_image(&self, index: usize) -> Result<DynamicImage, LoaderError> {
        let path = &self.image_paths[index];
        log::trace!("loading {}", path.display());
        let mut img = image::open(path).map_err(|source| LoaderError::Decode {
            path: path.clone(),
            source,
        })?;
        for _ in 0..self.downscale.trailing_zeros() {
            let (w, h) = (img.width(), img.height());
            img = img.resize_exact((w / 2).max(1), (h / 2).max(1), FilterType::Gaussian);
        }
        Ok(img)
    }
}

fn image_filter(entry: glob::GlobResult) -> Option<PathBuf> {
    if let Ok(p) = entry {
        let name = p.as_os_str().to_string_lossy().to_lowercase();
        for ext in &[".png", ".jpg", ".jpeg"] {
            if name.ends_with(ext) {
                return Some(p);
            }
        }
    }
    None
}

fn parse_intrinsics(raw: &str, path: &Path) -> Result<Intrinsics, LoaderError> {
    let mut values = [0.0f64; 9];
    let mut count = 0;
    for token in raw.split_whitespace() {
        if count < 9 {
            values[count] = token.parse().map_err(|_| LoaderError::BadNumber {
                path: path.to_path_buf(),
                token: token.to_string(),
            })?;
        }
        count += 1;
    }
    if count != 9 {
        return Err(LoaderError::MalformedIntrinsics {
            path: path.to_path_buf(),
            count,
        });
    }
    Ok(Intrinsics::new(na::Matrix3::from_row_slice(&values)))
}

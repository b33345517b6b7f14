use akaze::Akaze;
use bitarray::{BitArray, Hamming};
use image::DynamicImage;
use rayon::prelude::*;
use space::{Knn, LinearKnn};

use crate::types::Correspondences;

pub type Descriptor = BitArray<64>;

/// Keypoints and descriptors of one view. A keypoint's index in these
/// parallel vectors is its id for track linking.
pub struct ViewFeatures {
    pub keypoints: Vec<glam::Vec2>,
    pub descriptors: Vec<Descriptor>,
}

impl ViewFeatures {
    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// AKAZE front end shared by all views of a sequence.
pub struct FeatureExtractor {
    akaze: Akaze,
}

impl FeatureExtractor {
    pub fn new(threshold: f64) -> FeatureExtractor {
        FeatureExtractor {
            akaze: Akaze::new(threshold),
        }
    }

    pub fn extract(&self, image: &DynamicImage) -> ViewFeatures {
        let (keypoints, descriptors) = self.akaze.extract(image);
        log::debug!("extracted {} features", keypoints.len());
        ViewFeatures {
            keypoints: keypoints
                .iter()
                .map(|kp| glam::Vec2::new(kp.point.0, kp.point.1))
                .collect(),
            descriptors,
        }
    }
}

impl Default for FeatureExtractor {
    fn default() -> FeatureExtractor {
        FeatureExtractor {
            akaze: Akaze::default(),
        }
    }
}

/// Matches `a` against `b` with a 2-NN Hamming search and Lowe's ratio test:
/// a pairing survives iff its best distance is under `ratio` times the
/// second-best. Entries come out ordered by keypoint id in `a`.
pub fn match_views(a: &ViewFeatures, b: &ViewFeatures, ratio: f32) -> Correspondences {
    if b.descriptors.len() < 2 {
        return Correspondences::default();
    }
    let candidates: Vec<Option<usize>> = (0..a.descriptors.len())
        .into_par_iter()
        .map(|ia| {
            let knn = LinearKnn {
                metric: Hamming,
                iter: b.descriptors.iter(),
            };
            let neighbors = knn.knn(&a.descriptors[ia], 2);
            if (neighbors[0].distance as f32) < ratio * neighbors[1].distance as f32 {
                Some(neighbors[0].index)
            } else {
                None
            }
        })
        .collect();

    let mut out = Correspondences::with_capacity(candidates.len());
    for (ia, ib) in candidates.iter().enumerate() {
        if let Some(ib) = ib {
            out.push(ia as u32, a.keypoints[ia], *ib as u32, b.keypoints[*ib]);
        }
    }
    log::debug!("{} of {} descriptors matched", out.len(), a.descriptors.len());
    out
}

use nalgebra as na;

/// Pinhole intrinsics shared by every view of a sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Intrinsics {
    pub k: na::Matrix3<f64>,
}

impl Intrinsics {
    pub fn new(k: na::Matrix3<f64>) -> Intrinsics {
        Intrinsics { k }
    }

    pub fn fx(&self) -> f64 {
        self.k[(0, 0)]
    }

    pub fn fy(&self) -> f64 {
        self.k[(1, 1)]
    }

    pub fn cx(&self) -> f64 {
        self.k[(0, 2)]
    }

    pub fn cy(&self) -> f64 {
        self.k[(1, 2)]
    }

    pub fn mean_focal(&self) -> f64 {
        0.5 * (self.fx() + self.fy())
    }

    /// Rescale for an image downscaled by `factor` in each dimension.
    pub fn downscaled(&self, factor: u32) -> Intrinsics {
        let s = 1.0 / factor as f64;
        let mut k = self.k;
        k[(0, 0)] *= s;
        k[(1, 1)] *= s;
        k[(0, 2)] *= s;
        k[(1, 2)] *= s;
        Intrinsics { k }
    }

    /// Pixel coordinates to the normalized image plane (z = 1).
    pub fn normalize(&self, p: glam::Vec2) -> glam::Vec2 {
        glam::Vec2::new(
            ((p.x as f64 - self.cx()) / self.fx()) as f32,
            ((p.y as f64 - self.cy()) / self.fy()) as f32,
        )
    }
}

/// World-to-camera rigid transform.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraPose {
    pub rotation: na::Rotation3<f64>,
    pub translation: na::Vector3<f64>,
}

impl CameraPose {
    pub fn new(rotation: na::Rotation3<f64>, translation: na::Vector3<f64>) -> CameraPose {
        CameraPose {
            rotation,
            translation,
        }
    }

    pub fn identity() -> CameraPose {
        CameraPose {
            rotation: na::Rotation3::identity(),
            translation: na::Vector3::zeros(),
        }
    }

    pub fn from_rvec_tvec(rvec: &na::Vector3<f64>, tvec: &na::Vector3<f64>) -> CameraPose {
        CameraPose {
            rotation: na::Rotation3::from_scaled_axis(*rvec),
            translation: *tvec,
        }
    }

    pub fn rvec(&self) -> na::Vector3<f64> {
        self.rotation.scaled_axis()
    }

    /// [R | t] as a 3x4 matrix.
    pub fn matrix3x4(&self) -> na::Matrix3x4<f64> {
        let mut m = na::Matrix3x4::zeros();
        m.fixed_view_mut::<3, 3>(0, 0).copy_from(self.rotation.matrix());
        m.column_mut(3).copy_from(&self.translation);
        m
    }

    /// K [R | t], the full projection matrix.
    pub fn projection(&self, intrinsics: &Intrinsics) -> na::Matrix3x4<f64> {
        intrinsics.k * self.matrix3x4()
    }

    /// Chain a relative pose measured in this pose's camera frame onto it,
    /// giving the next view's world-to-camera transform.
    pub fn compose_relative(&self, relative: &CameraPose) -> CameraPose {
        CameraPose {
            rotation: relative.rotation * self.rotation,
            translation: self.translation + self.rotation * relative.translation,
        }
    }

    /// World point into this camera's frame.
    pub fn transform(&self, p: &na::Vector3<f64>) -> na::Vector3<f64> {
        self.rotation * p + self.translation
    }
}

/// Matched observations between a view pair. The four columns stay in
/// lockstep: entry i is one track seen at keypoint `ids_a[i]` in the first
/// view and `ids_b[i]` in the second.
#[derive(Debug, Clone, Default)]
pub struct Correspondences {
    pub ids_a: Vec<u32>,
    pub ids_b: Vec<u32>,
    pub points_a: Vec<glam::Vec2>,
    pub points_b: Vec<glam::Vec2>,
}

impl Correspondences {
    pub fn with_capacity(n: usize) -> Correspondences {
        Correspondences {
            ids_a: Vec::with_capacity(n),
            ids_b: Vec::with_capacity(n),
            points_a: Vec::with_capacity(n),
            points_b: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, id_a: u32, point_a: glam::Vec2, id_b: u32, point_b: glam::Vec2) {
        self.ids_a.push(id_a);
        self.ids_b.push(id_b);
        self.points_a.push(point_a);
        self.points_b.push(point_b);
    }

    pub fn len(&self) -> usize {
        self.ids_a.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids_a.is_empty()
    }

    /// Keep entries whose mask slot is true, all columns in lockstep.
    pub fn retain_by_mask(&mut self, mask: &[bool]) {
        debug_assert_eq!(mask.len(), self.len());
        retain_masked(&mut self.ids_a, mask);
        retain_masked(&mut self.ids_b, mask);
        retain_masked(&mut self.points_a, mask);
        retain_masked(&mut self.points_b, mask);
    }

    /// New set holding the entries at `indices`, in that order.
    pub fn select(&self, indices: &[usize]) -> Correspondences {
        let mut out = Correspondences::with_capacity(indices.len());
        for &i in indices {
            out.push(self.ids_a[i], self.points_a[i], self.ids_b[i], self.points_b[i]);
        }
        out
    }
}

pub(crate) fn retain_masked<T>(items: &mut Vec<T>, mask: &[bool]) {
    let mut i = 0;
    items.retain(|_| {
        let keep = i < mask.len() && mask[i];
        i += 1;
        keep
    });
}

use binrw::binrw;
use cgmath::{InnerSpace, Matrix4, SquareMatrix, Vector3};

/// 4×4 transform as stored on disk: sixteen floats, four per column, with the
/// translation in the last column.
#[binrw]
#[derive(Debug, Clone, Copy, PartialEq)]
#[br(little)]
pub struct TpMatrix44(
    #[br(map = |raw: [f32; 16]| Matrix4::new(
        raw[0], raw[1], raw[2], raw[3],
        raw[4], raw[5], raw[6], raw[7],
        raw[8], raw[9], raw[10], raw[11],
        raw[12], raw[13], raw[14], raw[15]
    ))]
    #[bw(map = |m: &Matrix4<f32>| [
        m.x.x, m.x.y, m.x.z, m.x.w,
        m.y.x, m.y.y, m.y.z, m.y.w,
        m.z.x, m.z.y, m.z.z, m.z.w,
        m.w.x, m.w.y, m.w.z, m.w.w
    ])]
    pub Matrix4<f32>,
);

impl Default for TpMatrix44 {
    fn default() -> Self {
        TpMatrix44(Matrix4::identity())
    }
}

impl TpMatrix44 {
    pub fn to_slice(&self) -> [f32; 16] {
        let m = &self.0;
        [
            m.x.x, m.x.y, m.x.z, m.x.w, m.y.x, m.y.y, m.y.z, m.y.w, m.z.x, m.z.y, m.z.z, m.z.w,
            m.w.x, m.w.y, m.w.z, m.w.w,
        ]
    }

    pub fn from_translation(translation: [f32; 3]) -> Self {
        TpMatrix44(Matrix4::from_translation(Vector3::from(translation)))
    }

    pub fn translation(&self) -> [f32; 3] {
        [self.0.w.x, self.0.w.y, self.0.w.z]
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl Default for Aabb {
    fn default() -> Self {
        Aabb {
            min: [0.0; 3],
            max: [0.0; 3],
        }
    }
}

impl Aabb {
    /// Component-wise min/max of two corners given in any order.
    pub fn from_corners(a: [f32; 3], b: [f32; 3]) -> Self {
        Aabb {
            min: [a[0].min(b[0]), a[1].min(b[1]), a[2].min(b[2])],
            max: [a[0].max(b[0]), a[1].max(b[1]), a[2].max(b[2])],
        }
    }

    /// `None` for an empty point set.
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a [f32; 3]>) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = *iter.next()?;
        let mut bounds = Aabb {
            min: first,
            max: first,
        };
        for p in iter {
            bounds.include(*p);
        }
        Some(bounds)
    }

    pub fn include(&mut self, p: [f32; 3]) {
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(p[axis]);
            self.max[axis] = self.max[axis].max(p[axis]);
        }
    }

    pub fn center(&self) -> [f32; 3] {
        [
            0.5 * (self.min[0] + self.max[0]),
            0.5 * (self.min[1] + self.max[1]),
            0.5 * (self.min[2] + self.max[2]),
        ]
    }

    pub fn surface_area(&self) -> f32 {
        let e = [
            self.max[0] - self.min[0],
            self.max[1] - self.min[1],
            self.max[2] - self.min[2],
        ];
        2.0 * (e[0] * e[1] + e[1] * e[2] + e[2] * e[0])
    }

    pub fn to_floats(&self) -> [f32; 6] {
        [
            self.min[0], self.min[1], self.min[2], self.max[0], self.max[1], self.max[2],
        ]
    }
}

/// Plane `normal · p - distance = 0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vector3<f32>,
    pub distance: f32,
}

impl Plane {
    pub fn axis(axis: usize, distance: f32) -> Self {
        let mut normal = Vector3::new(0.0, 0.0, 0.0);
        normal[axis] = 1.0;
        Plane { normal, distance }
    }

    pub fn signed_distance(&self, p: [f32; 3]) -> f32 {
        self.normal.dot(Vector3::from(p)) - self.distance
    }
}

pub fn centroid(points: &[[f32; 3]]) -> [f32; 3] {
    if points.is_empty() {
        return [0.0; 3];
    }
    let sum = points
        .iter()
        .fold(Vector3::new(0.0f32, 0.0, 0.0), |acc, p| acc + Vector3::from(*p));
    let c = sum / points.len() as f32;
    [c.x, c.y, c.z]
}

pub fn triangle_centroid(tri: &[[f32; 3]; 3]) -> [f32; 3] {
    [
        (tri[0][0] + tri[1][0] + tri[2][0]) / 3.0,
        (tri[0][1] + tri[1][1] + tri[2][1]) / 3.0,
        (tri[0][2] + tri[1][2] + tri[2][2]) / 3.0,
    ]
}

/// Face plane as stored by collision triangles: unit normal and
/// `-normal · centre`.
pub fn face_plane(tri: &[[f32; 3]; 3]) -> [f32; 4] {
    let a = Vector3::from(tri[0]);
    let b = Vector3::from(tri[1]);
    let c = Vector3::from(tri[2]);
    let cross = (b - a).cross(c - a);
    let normal = if cross.magnitude2() > 0.0 {
        cross.normalize()
    } else {
        Vector3::new(0.0, 0.0, 0.0)
    };
    let center = Vector3::from(triangle_centroid(tri));
    [normal.x, normal.y, normal.z, -normal.dot(center)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{ByteReader, ByteWriter};

    #[test]
    fn matrix_translation_is_last_column() {
        let mut raw = [0.0f32; 16];
        raw[0] = 1.0;
        raw[5] = 1.0;
        raw[10] = 1.0;
        raw[15] = 1.0;
        raw[12] = 3.0;
        raw[13] = 4.0;
        raw[14] = 5.0;
        let mut w = ByteWriter::new();
        w.mat4(&raw);
        let bytes = w.into_inner();
        let m: TpMatrix44 = ByteReader::new(&bytes).record().unwrap();
        assert_eq!(m.translation(), [3.0, 4.0, 5.0]);
        assert_eq!(m.to_slice(), raw);
    }

    #[test]
    fn aabb_normalises_corner_order() {
        let b = Aabb::from_corners([1.0, -2.0, 3.0], [-1.0, 2.0, 0.0]);
        assert_eq!(b.min, [-1.0, -2.0, 0.0]);
        assert_eq!(b.max, [1.0, 2.0, 3.0]);
        assert_eq!(Aabb::from_corners([0.0; 3], [1.0, 1.0, 1.0]).surface_area(), 6.0);
    }

    #[test]
    fn face_plane_of_xy_triangle() {
        let plane = face_plane(&[[0.0, 0.0, 2.0], [1.0, 0.0, 2.0], [0.0, 1.0, 2.0]]);
        assert_eq!(plane, [0.0, 0.0, 1.0, -2.0]);
    }
}

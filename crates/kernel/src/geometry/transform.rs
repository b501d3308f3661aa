use nalgebra::{Similarity3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use super::point::Point3d;
use super::vector::Vec3;

/// A rigid motion combined with a uniform scale.
///
/// Only similarity transforms are representable: analytic carriers (circles,
/// spheres, cylinders) stay analytic under them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub inner: Similarity3<f64>,
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            inner: Similarity3::identity(),
        }
    }

    pub fn translation(dx: f64, dy: f64, dz: f64) -> Self {
        Self {
            inner: Similarity3::from_parts(
                Translation3::new(dx, dy, dz),
                UnitQuaternion::identity(),
                1.0,
            ),
        }
    }

    /// Uniform scale about the origin. Non-positive factors are rejected.
    pub fn uniform_scaling(s: f64) -> Option<Self> {
        if s <= 0.0 || !s.is_finite() {
            return None;
        }
        Some(Self {
            inner: Similarity3::from_parts(
                Translation3::identity(),
                UnitQuaternion::identity(),
                s,
            ),
        })
    }

    pub fn rotation_axis_angle(axis: Vec3, angle: f64) -> Self {
        let rotation = axis
            .normalized()
            .map(|a| UnitQuaternion::from_scaled_axis(a.to_na() * angle))
            .unwrap_or_else(UnitQuaternion::identity);
        Self {
            inner: Similarity3::from_parts(Translation3::identity(), rotation, 1.0),
        }
    }

    pub fn rotation_z(angle: f64) -> Self {
        Self::rotation_axis_angle(Vec3::Z, angle)
    }

    pub fn transform_point(&self, p: &Point3d) -> Point3d {
        Point3d::from_na(&(self.inner * p.to_na()))
    }

    /// Applies rotation and scale (no translation).
    pub fn transform_vector(&self, v: &Vec3) -> Vec3 {
        Vec3::from_na(&(self.inner * v.to_na()))
    }

    /// Applies the rotation only; unit directions stay unit.
    pub fn transform_direction(&self, v: &Vec3) -> Vec3 {
        let r: Vector3<f64> = self.inner.isometry.rotation * v.to_na();
        Vec3::from_na(&r)
    }

    pub fn scale_factor(&self) -> f64 {
        self.inner.scaling()
    }

    /// `self` followed by `other`.
    pub fn then(&self, other: &Transform) -> Transform {
        Transform {
            inner: other.inner * self.inner,
        }
    }

    pub fn inverse(&self) -> Self {
        Self {
            inner: self.inner.inverse(),
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Point3d,
    pub max: Point3d,
}

impl BoundingBox {
    pub fn new(min: Point3d, max: Point3d) -> Self {
        Self { min, max }
    }

    pub fn empty() -> Self {
        Self {
            min: Point3d::new(f64::INFINITY, f64::INFINITY, f64::INFINITY),
            max: Point3d::new(f64::NEG_INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
        }
    }

    pub fn from_points(points: &[Point3d]) -> Self {
        let mut bb = Self::empty();
        for p in points {
            bb.expand_to_include(p);
        }
        bb
    }

    pub fn expand_to_include(&mut self, p: &Point3d) {
        self.min.x = self.min.x.min(p.x);
        self.min.y = self.min.y.min(p.y);
        self.min.z = self.min.z.min(p.z);
        self.max.x = self.max.x.max(p.x);
        self.max.y = self.max.y.max(p.y);
        self.max.z = self.max.z.max(p.z);
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: Point3d::new(
                self.min.x.min(other.min.x),
                self.min.y.min(other.min.y),
                self.min.z.min(other.min.z),
            ),
            max: Point3d::new(
                self.max.x.max(other.max.x),
                self.max.y.max(other.max.y),
                self.max.z.max(other.max.z),
            ),
        }
    }

    pub fn intersects(&self, other: &Self) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    pub fn contains_point(&self, p: &Point3d) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    pub fn center(&self) -> Point3d {
        self.min.midpoint(&self.max)
    }

    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn diagonal(&self) -> f64 {
        if self.is_valid() {
            self.size().length()
        } else {
            0.0
        }
    }

    pub fn is_valid(&self) -> bool {
        self.min.x <= self.max.x && self.min.y <= self.max.y && self.min.z <= self.max.z
    }

    pub fn expanded(&self, margin: f64) -> Self {
        Self {
            min: Point3d::new(
                self.min.x - margin,
                self.min.y - margin,
                self.min.z - margin,
            ),
            max: Point3d::new(
                self.max.x + margin,
                self.max.y + margin,
                self.max.z + margin,
            ),
        }
    }

    /// Index (0, 1, 2) of the axis with the largest extent.
    pub fn longest_axis(&self) -> usize {
        let s = self.size();
        if s.x >= s.y && s.x >= s.z {
            0
        } else if s.y >= s.z {
            1
        } else {
            2
        }
    }

    pub fn center_on_axis(&self, axis: usize) -> f64 {
        let c = self.center();
        match axis {
            0 => c.x,
            1 => c.y,
            _ => c.z,
        }
    }

    pub fn corners(&self) -> [Point3d; 8] {
        let (a, b) = (self.min, self.max);
        [
            Point3d::new(a.x, a.y, a.z),
            Point3d::new(b.x, a.y, a.z),
            Point3d::new(a.x, b.y, a.z),
            Point3d::new(b.x, b.y, a.z),
            Point3d::new(a.x, a.y, b.z),
            Point3d::new(b.x, a.y, b.z),
            Point3d::new(a.x, b.y, b.z),
            Point3d::new(b.x, b.y, b.z),
        ]
    }
}

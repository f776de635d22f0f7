//! Axis-aligned bounding boxes.

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Axis-aligned box. An empty (inverted) box absorbs the first merged point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const EMPTY: Aabb = Aabb {
        min: Vec3::splat(f32::MAX),
        max: Vec3::splat(f32::MIN),
    };

    pub fn from_point(p: Vec3) -> Self {
        Self { min: p, max: p }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x
    }

    #[inline]
    pub fn merge_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    #[inline]
    pub fn merge(&mut self, other: &Aabb) {
        if !other.is_empty() {
            self.min = self.min.min(other.min);
            self.max = self.max.max(other.max);
        }
    }

    /// Grow the box by `margin` on every side.
    #[inline]
    pub fn inflated(&self, margin: f32) -> Aabb {
        Aabb {
            min: self.min - Vec3::splat(margin),
            max: self.max + Vec3::splat(margin),
        }
    }

    /// Box scaled around its centre.
    pub fn scaled(&self, factor: f32) -> Aabb {
        let center = (self.min + self.max) * 0.5;
        let half = (self.max - self.min) * 0.5 * factor;
        Aabb {
            min: center - half,
            max: center + half,
        }
    }

    #[inline]
    pub fn intersects(&self, other: &Aabb) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    #[inline]
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::EMPTY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_absorbs_first_point() {
        let mut aabb = Aabb::EMPTY;
        assert!(aabb.is_empty());
        aabb.merge_point(Vec3::new(1.0, 2.0, 3.0));
        assert!(!aabb.is_empty());
        assert_eq!(aabb.min, aabb.max);
    }

    #[test]
    fn test_intersects() {
        let mut a = Aabb::from_point(Vec3::ZERO);
        a.merge_point(Vec3::ONE);
        let mut b = Aabb::from_point(Vec3::splat(0.5));
        b.merge_point(Vec3::splat(2.0));
        let c = Aabb::from_point(Vec3::splat(5.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
        assert!(!a.intersects(&Aabb::EMPTY));
    }

    #[test]
    fn test_inflate_and_scale() {
        let mut a = Aabb::from_point(Vec3::ZERO);
        a.merge_point(Vec3::ONE);
        let inflated = a.inflated(0.05);
        assert!(inflated.contains_point(Vec3::splat(-0.04)));
        let scaled = a.scaled(1.2);
        assert!(scaled.contains_point(Vec3::splat(1.05)));
    }
}

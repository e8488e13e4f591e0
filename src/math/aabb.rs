//! Axis-aligned bounding box used for node boxes and object collision boxes

use crate::core::types::Vec3;

/// Axis-aligned bounding box defined by min and max corners, in node units
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create AABB from min and max corners
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box covering a whole node centered on the origin
    pub const fn full_node() -> Self {
        Self::new(Vec3::splat(-0.5), Vec3::splat(0.5))
    }

    /// Get center point
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Get size (max - min)
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Swap corners so that min <= max on every axis
    pub fn repair(&mut self) {
        let (a, b) = (self.min, self.max);
        self.min = a.min(b);
        self.max = a.max(b);
    }

    /// Check if point is inside AABB
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Check if two AABBs intersect
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y &&
        self.min.z <= other.max.z && self.max.z >= other.min.z
    }

    /// Return merged AABB containing both
    pub fn merged(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Translated copy
    pub fn translated(&self, offset: Vec3) -> Aabb {
        Aabb::new(self.min + offset, self.max + offset)
    }

    /// Rotate around the Y axis by a multiple of 90 degrees (clockwise seen
    /// from above, matching facedir rotation)
    pub fn rotated_y(&self, quarter_turns: u8) -> Aabb {
        let rot = |v: Vec3| match quarter_turns & 3 {
            0 => v,
            1 => Vec3::new(v.z, v.y, -v.x),
            2 => Vec3::new(-v.x, v.y, -v.z),
            _ => Vec3::new(-v.z, v.y, v.x),
        };
        let mut b = Aabb::new(rot(self.min), rot(self.max));
        b.repair();
        b
    }

    /// Flip upside down (around the X axis), used by ceiling-mounted boxes
    pub fn flipped_y(&self) -> Aabb {
        let mut b = Aabb::new(
            Vec3::new(self.min.x, -self.min.y, -self.min.z),
            Vec3::new(self.max.x, -self.max.y, -self.max.z),
        );
        b.repair();
        b
    }
}

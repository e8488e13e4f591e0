//! VoxelArea: inclusive integer box with cached extent

use crate::core::types::IVec3;

/// Inclusive box `[min, max]`. Empty when `max - min == (-1, -1, -1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VoxelArea {
    pub min: IVec3,
    pub max: IVec3,
    extent: IVec3,
}

impl Default for VoxelArea {
    fn default() -> Self {
        Self::new(IVec3::ONE, IVec3::ZERO)
    }
}

impl VoxelArea {
    pub fn new(min: IVec3, max: IVec3) -> Self {
        Self { min, max, extent: max - min + IVec3::ONE }
    }

    /// Single-point area
    pub fn point(p: IVec3) -> Self {
        Self::new(p, p)
    }

    #[inline]
    pub fn extent(&self) -> IVec3 {
        self.extent
    }

    pub fn has_empty_extent(&self) -> bool {
        self.extent.cmple(IVec3::ZERO).any()
    }

    pub fn volume(&self) -> usize {
        if self.has_empty_extent() {
            0
        } else {
            (self.extent.x as i64 * self.extent.y as i64 * self.extent.z as i64) as usize
        }
    }

    fn set(&mut self, min: IVec3, max: IVec3) {
        *self = Self::new(min, max);
    }

    /// Grow to contain another area
    pub fn add_area(&mut self, a: &VoxelArea) {
        if a.has_empty_extent() {
            return;
        }
        if self.has_empty_extent() {
            *self = *a;
            return;
        }
        self.set(self.min.min(a.min), self.max.max(a.max));
    }

    /// Grow to contain a point
    pub fn add_point(&mut self, p: IVec3) {
        if self.has_empty_extent() {
            self.set(p, p);
            return;
        }
        self.set(self.min.min(p), self.max.max(p));
    }

    /// Grow (or shrink, for negative `d`) by `d` on every side
    pub fn pad(&mut self, d: IVec3) {
        self.set(self.min - d, self.max + d);
    }

    pub fn contains_area(&self, a: &VoxelArea) -> bool {
        if a.has_empty_extent() {
            return true;
        }
        !self.has_empty_extent() && a.min.cmpge(self.min).all() && a.max.cmple(self.max).all()
    }

    #[inline]
    pub fn contains(&self, p: IVec3) -> bool {
        !self.has_empty_extent() && p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    pub fn contains_index(&self, i: usize) -> bool {
        i < self.volume()
    }

    /// Overlap of two areas (empty if disjoint)
    pub fn intersect(&self, a: &VoxelArea) -> VoxelArea {
        let min = self.min.max(a.min);
        let max = self.max.min(a.max);
        if min.cmpgt(max).any() {
            VoxelArea::default()
        } else {
            VoxelArea::new(min, max)
        }
    }

    /// Up to six disjoint boxes whose union is `self \ sub`
    pub fn diff(&self, sub: &VoxelArea) -> Vec<VoxelArea> {
        let mut out = Vec::with_capacity(6);
        let a = self.intersect(sub);
        if a.has_empty_extent() {
            if !self.has_empty_extent() {
                out.push(*self);
            }
            return out;
        }
        let (min, max) = (self.min, self.max);
        let mut push = |lo: IVec3, hi: IVec3| {
            let b = VoxelArea::new(lo, hi);
            if b.volume() > 0 {
                out.push(b);
            }
        };
        // back and front slabs span the full XY range
        push(IVec3::new(min.x, min.y, a.max.z + 1), max);
        push(min, IVec3::new(max.x, max.y, a.min.z - 1));
        // top and bottom span the full X range inside the sub's Z range
        push(IVec3::new(min.x, a.max.y + 1, a.min.z), IVec3::new(max.x, max.y, a.max.z));
        push(IVec3::new(min.x, min.y, a.min.z), IVec3::new(max.x, a.min.y - 1, a.max.z));
        // left and right are limited to the sub's Y and Z range
        push(IVec3::new(min.x, a.min.y, a.min.z), IVec3::new(a.min.x - 1, a.max.y, a.max.z));
        push(IVec3::new(a.max.x + 1, a.min.y, a.min.z), IVec3::new(max.x, a.max.y, a.max.z));
        out
    }

    /// Linear index of a position inside the area
    #[inline]
    pub fn index(&self, x: i32, y: i32, z: i32) -> usize {
        ((z - self.min.z) * self.extent.y * self.extent.x
            + (y - self.min.y) * self.extent.x
            + (x - self.min.x)) as usize
    }

    #[inline]
    pub fn index_p(&self, p: IVec3) -> usize {
        self.index(p.x, p.y, p.z)
    }

    /// Position of a linear index
    pub fn position(&self, i: usize) -> IVec3 {
        let i = i as i32;
        let xy = self.extent.x * self.extent.y;
        IVec3::new(
            i % self.extent.x,
            (i % xy) / self.extent.x,
            i / xy,
        ) + self.min
    }

    /// Index step for one unit along Y
    #[inline]
    pub fn ystride(&self) -> usize {
        self.extent.x as usize
    }

    /// Index step for one unit along Z
    #[inline]
    pub fn zstride(&self) -> usize {
        (self.extent.x * self.extent.y) as usize
    }

    /// Iterate every position in x-fastest order
    pub fn iter(&self) -> impl Iterator<Item = IVec3> + use<> {
        let (min, max) = (self.min, self.max);
        let empty = self.has_empty_extent();
        (min.z..=max.z)
            .flat_map(move |z| (min.y..=max.y).flat_map(move |y| (min.x..=max.x).map(move |x| IVec3::new(x, y, z))))
            .filter(move |_| !empty)
    }
}

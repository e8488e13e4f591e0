//! Rays and voxel traversal

use crate::core::types::{IVec3, Vec3};
use super::aabb::Aabb;

/// A line segment used for pointing at nodes and objects
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    /// Unit direction; `Vec3::ZERO` for a degenerate segment
    pub direction: Vec3,
    pub length: f32,
    inv_direction: Vec3,
}

impl Ray {
    pub fn segment(from: Vec3, to: Vec3) -> Self {
        let delta = to - from;
        let length = delta.length();
        let direction = if length > 0.0 { delta / length } else { Vec3::ZERO };
        Self { origin: from, direction, length, inv_direction: direction.recip() }
    }

    /// Distance from the origin at which the segment enters `aabb`, 0 when
    /// it starts inside. `None` when the box is missed or lies beyond the
    /// end of the segment.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> Option<f32> {
        if self.length == 0.0 {
            return aabb.contains_point(self.origin).then_some(0.0);
        }
        // Zero direction components give infinite slabs; NaN from 0 * inf
        // is dropped by min/max
        let t1 = (aabb.min - self.origin) * self.inv_direction;
        let t2 = (aabb.max - self.origin) * self.inv_direction;
        let t_near = t1.min(t2).max_element();
        let t_far = t1.max(t2).min_element();
        if t_near > t_far || t_far < 0.0 || t_near > self.length {
            return None;
        }
        Some(t_near.max(0.0))
    }
}

/// Node containing a point; nodes are centered on integer coordinates
pub fn float_to_node(p: Vec3) -> IVec3 {
    (p + Vec3::splat(0.5)).floor().as_ivec3()
}

/// Every node a line segment passes through, in order, starting with the
/// node holding the start point and ending with the node holding the end
/// point. Each step moves across exactly one face.
#[derive(Clone, Debug)]
pub struct VoxelLineIterator {
    current: IVec3,
    step: IVec3,
    next_t: Vec3,
    delta_t: Vec3,
    remaining: u32,
    started: bool,
}

impl VoxelLineIterator {
    pub fn new(from: Vec3, to: Vec3) -> Self {
        let start = float_to_node(from);
        let end = float_to_node(to);
        let dir = to - from;
        let step = IVec3::new(sign(dir.x), sign(dir.y), sign(dir.z));

        let mut next_t = Vec3::splat(f32::INFINITY);
        let mut delta_t = Vec3::splat(f32::INFINITY);
        for axis in 0..3 {
            if step[axis] == 0 {
                continue;
            }
            let boundary = start[axis] as f32 + 0.5 * step[axis] as f32;
            next_t[axis] = (boundary - from[axis]) / dir[axis];
            delta_t[axis] = 1.0 / dir[axis].abs();
        }

        let d = (end - start).abs();
        Self {
            current: start,
            step,
            next_t,
            delta_t,
            remaining: (d.x + d.y + d.z) as u32,
            started: false,
        }
    }

    /// Number of nodes left to visit
    pub fn len(&self) -> usize {
        self.remaining as usize + usize::from(!self.started)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn sign(v: f32) -> i32 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

impl Iterator for VoxelLineIterator {
    type Item = IVec3;

    fn next(&mut self) -> Option<IVec3> {
        if !self.started {
            self.started = true;
            return Some(self.current);
        }
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let axis = if self.next_t.x <= self.next_t.y && self.next_t.x <= self.next_t.z {
            0
        } else if self.next_t.y <= self.next_t.z {
            1
        } else {
            2
        };
        self.current[axis] += self.step[axis];
        self.next_t[axis] += self.delta_t[axis];
        Some(self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_enters_box() {
        let ray = Ray::segment(Vec3::new(-2.5, 0.0, 0.0), Vec3::new(3.0, 0.0, 0.0));
        let near = ray.intersects_aabb(&Aabb::full_node()).unwrap();
        assert!((near - 2.0).abs() < 0.001);
        // Starting inside
        let inside = Ray::segment(Vec3::new(0.1, 0.0, 0.0), Vec3::new(0.1, 4.0, 0.0));
        assert_eq!(inside.intersects_aabb(&Aabb::full_node()), Some(0.0));
    }

    #[test]
    fn test_segment_misses_box() {
        let above = Ray::segment(Vec3::new(-2.0, 5.0, 0.0), Vec3::new(2.0, 5.0, 0.0));
        assert!(above.intersects_aabb(&Aabb::full_node()).is_none());
        // Ends before reaching the box
        let short = Ray::segment(Vec3::new(-3.0, 0.0, 0.0), Vec3::new(-1.0, 0.0, 0.0));
        assert!(short.intersects_aabb(&Aabb::full_node()).is_none());
    }

    #[test]
    fn test_float_to_node_rounds_to_center() {
        assert_eq!(float_to_node(Vec3::new(0.49, -0.49, 1.5)), IVec3::new(0, 0, 2));
        assert_eq!(float_to_node(Vec3::new(-0.51, 0.0, 0.0)), IVec3::new(-1, 0, 0));
    }

    #[test]
    fn test_line_along_axis() {
        let nodes: Vec<IVec3> = VoxelLineIterator::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -3.0)).collect();
        assert_eq!(nodes, vec![IVec3::ZERO, IVec3::new(0, 0, -1), IVec3::new(0, 0, -2), IVec3::new(0, 0, -3)]);
    }

    #[test]
    fn test_diagonal_line_is_face_connected() {
        let it = VoxelLineIterator::new(Vec3::new(0.1, 0.2, 0.0), Vec3::new(4.0, 2.3, 1.1));
        assert_eq!(it.len(), 8);
        let nodes: Vec<IVec3> = it.collect();
        assert_eq!(nodes.first(), Some(&IVec3::ZERO));
        assert_eq!(nodes.last(), Some(&IVec3::new(4, 2, 1)));
        for w in nodes.windows(2) {
            let d = (w[1] - w[0]).abs();
            assert_eq!(d.x + d.y + d.z, 1);
        }
    }

    #[test]
    fn test_single_node_line() {
        let nodes: Vec<IVec3> = VoxelLineIterator::new(Vec3::splat(0.1), Vec3::splat(0.2)).collect();
        assert_eq!(nodes, vec![IVec3::ZERO]);
    }
}

//! VoxelManipulator: dense node buffer over a `VoxelArea`
//!
//! Every cell carries a flag byte next to its node. `VOXELFLAG_NO_DATA`
//! marks cells that were never filled. The `DUNGEON_*` bits are reserved for
//! the dungeon carver and survive across generator passes; other generator
//! scratch state lives in the generator's own buffers.

use crate::core::error::Error;
use crate::core::types::{IVec3, Result};
use super::area::VoxelArea;
use super::node::{MapNode, NodeContainer};

/// Cell holds no data (reads return IGNORE)
pub const VOXELFLAG_NO_DATA: u8 = 1 << 0;
/// Cell is inside a dungeon room or corridor
pub const VMANIP_FLAG_DUNGEON_INSIDE: u8 = 1 << 1;
/// Cell must not be touched by the dungeon carver
pub const VMANIP_FLAG_DUNGEON_PRESERVE: u8 = 1 << 2;
/// Either of the above
pub const VMANIP_FLAG_DUNGEON_UNTOUCHABLE: u8 = VMANIP_FLAG_DUNGEON_INSIDE | VMANIP_FLAG_DUNGEON_PRESERVE;

/// Dense node buffer with a parallel flag buffer
#[derive(Clone, Debug, Default)]
pub struct VoxelManipulator {
    pub area: VoxelArea,
    pub data: Vec<MapNode>,
    pub flags: Vec<u8>,
}

impl VoxelManipulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer covering `area` with every cell marked NO_DATA
    pub fn with_area(area: VoxelArea) -> Self {
        let mut vm = Self::new();
        vm.add_area(&area);
        vm
    }

    pub fn clear(&mut self) {
        self.area = VoxelArea::default();
        self.data.clear();
        self.flags.clear();
    }

    /// Grow the buffer to cover `a`, preserving existing contents
    pub fn add_area(&mut self, a: &VoxelArea) {
        if a.has_empty_extent() || self.area.contains_area(a) {
            return;
        }
        let mut new_area = self.area;
        new_area.add_area(a);
        let volume = new_area.volume();
        let mut new_data = vec![MapNode::ignore(); volume];
        let mut new_flags = vec![VOXELFLAG_NO_DATA; volume];

        if !self.area.has_empty_extent() {
            let old = self.area;
            let row = old.extent().x as usize;
            for z in old.min.z..=old.max.z {
                for y in old.min.y..=old.max.y {
                    let src = old.index(old.min.x, y, z);
                    let dst = new_area.index(old.min.x, y, z);
                    new_data[dst..dst + row].copy_from_slice(&self.data[src..src + row]);
                    new_flags[dst..dst + row].copy_from_slice(&self.flags[src..src + row]);
                }
            }
        }

        self.area = new_area;
        self.data = new_data;
        self.flags = new_flags;
    }

    pub fn exists_node(&self, p: IVec3) -> bool {
        self.area.contains(p) && self.flags[self.area.index_p(p)] & VOXELFLAG_NO_DATA == 0
    }

    /// Read a node, failing for positions outside the buffer or without data
    pub fn get_node(&self, p: IVec3) -> Result<MapNode> {
        if !self.exists_node(p) {
            return Err(Error::InvalidPosition(p));
        }
        Ok(self.data[self.area.index_p(p)])
    }

    /// Read a node, IGNORE for positions outside the buffer or without data
    pub fn get_node_no_ex(&self, p: IVec3) -> MapNode {
        if self.exists_node(p) {
            self.data[self.area.index_p(p)]
        } else {
            MapNode::ignore()
        }
    }

    /// Same as `get_node_no_ex`; the buffer never emerges on read
    pub fn get_node_no_ex_no_emerge(&self, p: IVec3) -> MapNode {
        self.get_node_no_ex(p)
    }

    /// Mutable access to a cell with data
    pub fn get_node_mut(&mut self, p: IVec3) -> Option<&mut MapNode> {
        if !self.exists_node(p) {
            return None;
        }
        let i = self.area.index_p(p);
        Some(&mut self.data[i])
    }

    /// Write a node, growing the buffer if needed
    pub fn set_node(&mut self, p: IVec3, n: MapNode) {
        self.add_area(&VoxelArea::point(p));
        let i = self.area.index_p(p);
        self.data[i] = n;
        self.flags[i] &= !VOXELFLAG_NO_DATA;
    }

    /// OR `flags` into every cell of `a` that lies inside the buffer
    pub fn set_flags(&mut self, a: &VoxelArea, flags: u8) {
        let a = self.area.intersect(a);
        for p in a.iter() {
            let i = self.area.index_p(p);
            self.flags[i] |= flags;
        }
    }

    /// Clear `flags` from every cell
    pub fn clear_flag(&mut self, flags: u8) {
        for f in self.flags.iter_mut() {
            *f &= !flags;
        }
    }

    /// Copy a `size` box from `src` (laid out over `src_area`) starting at
    /// `from_pos` into this buffer at `to_pos`, one x-row at a time
    pub fn copy_from(&mut self, src: &[MapNode], src_area: &VoxelArea, from_pos: IVec3, to_pos: IVec3, size: IVec3) {
        self.add_area(&VoxelArea::new(to_pos, to_pos + size - IVec3::ONE));
        let row = size.x as usize;
        for z in 0..size.z {
            for y in 0..size.y {
                let si = src_area.index(from_pos.x, from_pos.y + y, from_pos.z + z);
                let di = self.area.index(to_pos.x, to_pos.y + y, to_pos.z + z);
                self.data[di..di + row].copy_from_slice(&src[si..si + row]);
                for f in &mut self.flags[di..di + row] {
                    *f &= !VOXELFLAG_NO_DATA;
                }
            }
        }
    }

    /// Copy a `size` box out of this buffer into `dst` (laid out over
    /// `dst_area`). Cells holding IGNORE or without data are skipped.
    pub fn copy_to(&self, dst: &mut [MapNode], dst_area: &VoxelArea, dst_pos: IVec3, from_pos: IVec3, size: IVec3) {
        for z in 0..size.z {
            for y in 0..size.y {
                let mut si = self.area.index(from_pos.x, from_pos.y + y, from_pos.z + z);
                let mut di = dst_area.index(dst_pos.x, dst_pos.y + y, dst_pos.z + z);
                for _ in 0..size.x {
                    let n = self.data[si];
                    if self.flags[si] & VOXELFLAG_NO_DATA == 0 && !n.is_ignore() {
                        dst[di] = n;
                    }
                    si += 1;
                    di += 1;
                }
            }
        }
    }
}

impl NodeContainer for VoxelManipulator {
    fn get_node_no_ex(&self, p: IVec3) -> MapNode {
        VoxelManipulator::get_node_no_ex(self, p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::node::{CONTENT_AIR, CONTENT_IGNORE};

    #[test]
    fn test_new_area_has_no_data() {
        let vm = VoxelManipulator::with_area(VoxelArea::new(IVec3::ZERO, IVec3::splat(3)));
        assert_eq!(vm.data.len(), 64);
        assert!(vm.get_node(IVec3::ONE).is_err());
        assert_eq!(vm.get_node_no_ex(IVec3::ONE).content(), CONTENT_IGNORE);
        assert!(matches!(vm.get_node(IVec3::splat(9)), Err(Error::InvalidPosition(_))));
    }

    #[test]
    fn test_set_node_grows() {
        let mut vm = VoxelManipulator::new();
        vm.set_node(IVec3::new(1, 2, 3), MapNode::new(5));
        vm.set_node(IVec3::new(-1, 0, 0), MapNode::new(6));
        assert_eq!(vm.get_node(IVec3::new(1, 2, 3)).unwrap().content(), 5);
        assert_eq!(vm.get_node(IVec3::new(-1, 0, 0)).unwrap().content(), 6);
        assert!(!vm.exists_node(IVec3::ZERO));
        assert_eq!(vm.area.min, IVec3::new(-1, 0, 0));
    }

    #[test]
    fn test_grow_preserves_flags() {
        let mut vm = VoxelManipulator::with_area(VoxelArea::new(IVec3::ZERO, IVec3::ONE));
        vm.set_node(IVec3::ZERO, MapNode::new(CONTENT_AIR));
        vm.set_flags(&VoxelArea::point(IVec3::ZERO), VMANIP_FLAG_DUNGEON_INSIDE);
        vm.add_area(&VoxelArea::new(IVec3::splat(-2), IVec3::splat(4)));
        let i = vm.area.index_p(IVec3::ZERO);
        assert_eq!(vm.flags[i], VMANIP_FLAG_DUNGEON_INSIDE);
        vm.clear_flag(VMANIP_FLAG_DUNGEON_UNTOUCHABLE);
        assert_eq!(vm.flags[i], 0);
    }

    #[test]
    fn test_copy_from_and_to() {
        let src_area = VoxelArea::new(IVec3::ZERO, IVec3::splat(3));
        let src: Vec<MapNode> = (0..64u16).map(MapNode::new).collect();
        let mut vm = VoxelManipulator::new();
        vm.copy_from(&src, &src_area, IVec3::ONE, IVec3::new(10, 10, 10), IVec3::splat(2));
        assert_eq!(vm.get_node(IVec3::new(10, 10, 10)).unwrap().content(), src_area.index(1, 1, 1) as u16);
        assert_eq!(vm.get_node(IVec3::new(11, 11, 11)).unwrap().content(), src_area.index(2, 2, 2) as u16);

        vm.set_node(IVec3::new(11, 10, 10), MapNode::ignore());
        let mut dst = vec![MapNode::new(CONTENT_AIR); 64];
        vm.copy_to(&mut dst, &src_area, IVec3::ZERO, IVec3::new(10, 10, 10), IVec3::splat(2));
        assert_eq!(dst[0].content(), src_area.index(1, 1, 1) as u16);
        // IGNORE source cell left destination untouched
        assert_eq!(dst[1].content(), CONTENT_AIR);
    }
}

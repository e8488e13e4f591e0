//! Map-backed voxel manipulator
//!
//! Generators and bulk edits load a box of whole blocks into one dense
//! buffer, work on it without touching the map, then write it back.

use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};

use crate::core::types::{block_to_node_pos, is_valid_block_pos, IVec3, MAP_BLOCKSIZE};
use crate::map::MapAccess;
use crate::voxel::block::{ModifiedState, MOD_REASON_VMANIP};

use super::area::VoxelArea;
use super::manip::{VoxelManipulator, VOXELFLAG_NO_DATA};
use super::node::CONTENT_IGNORE;

/// The block had no data and its cells are marked NO_DATA
pub const VMANIP_BLOCK_DATA_INEXIST: u8 = 1 << 0;
/// The block was loaded but still holds IGNORE nodes
pub const VMANIP_BLOCK_CONTAINS_CIGNORE: u8 = 1 << 1;

#[derive(Clone, Debug, Default)]
pub struct MMVManip {
    vm: VoxelManipulator,
    loaded_blocks: HashMap<IVec3, u8>,
    is_dirty: bool,
}

impl MMVManip {
    pub fn new() -> Self {
        Self::default()
    }

    fn block_area(p: IVec3) -> VoxelArea {
        let min = block_to_node_pos(p);
        VoxelArea::new(min, min + IVec3::splat(MAP_BLOCKSIZE - 1))
    }

    /// Load every block in `blockpos_min..=blockpos_max` into the buffer.
    ///
    /// Blocks already loaded by an earlier call are skipped. Missing blocks
    /// are emerged (created empty if storage has nothing) when
    /// `load_if_inexistent` is set; otherwise their cells are marked
    /// NO_DATA.
    pub fn initial_emerge<M: MapAccess + ?Sized>(
        &mut self,
        map: &mut M,
        blockpos_min: IVec3,
        blockpos_max: IVec3,
        load_if_inexistent: bool,
    ) {
        let area = VoxelArea::new(
            block_to_node_pos(blockpos_min),
            block_to_node_pos(blockpos_max + IVec3::ONE) - IVec3::ONE,
        );
        self.vm.add_area(&area);

        for z in blockpos_min.z..=blockpos_max.z {
            for y in blockpos_min.y..=blockpos_max.y {
                for x in blockpos_min.x..=blockpos_max.x {
                    let p = IVec3::new(x, y, z);
                    if self.loaded_blocks.contains_key(&p) {
                        continue;
                    }
                    let mut flags = 0;
                    let block = if map.get_block_no_create(p).is_some() {
                        map.get_block_no_create(p)
                    } else if load_if_inexistent && is_valid_block_pos(p) {
                        map.emerge_block(p, true).map(|b| &*b)
                    } else {
                        None
                    };
                    match block {
                        Some(block) => {
                            block.copy_to(&mut self.vm);
                            if block.get_node_no_check(IVec3::ZERO).content() == CONTENT_IGNORE {
                                flags |= VMANIP_BLOCK_CONTAINS_CIGNORE;
                            }
                        }
                        None => {
                            flags |= VMANIP_BLOCK_DATA_INEXIST;
                            let a = Self::block_area(p);
                            self.vm.set_flags(&a, VOXELFLAG_NO_DATA);
                        }
                    }
                    self.loaded_blocks.insert(p, flags);
                }
            }
        }
        self.is_dirty = false;
    }

    /// Copy the buffer into every block it was loaded from. Blocks that had
    /// no data are skipped, as are generated blocks unless
    /// `overwrite_generated` is set. Cells without data never overwrite.
    pub fn blit_back_all<M: MapAccess + ?Sized>(
        &self,
        map: &mut M,
        mut modified_blocks: Option<&mut HashSet<IVec3>>,
        overwrite_generated: bool,
    ) {
        if self.vm.area.has_empty_extent() {
            return;
        }
        for (&p, &flags) in &self.loaded_blocks {
            if flags & VMANIP_BLOCK_DATA_INEXIST != 0 {
                continue;
            }
            let Some(block) = map.get_block_no_create_mut(p) else { continue };
            if !overwrite_generated && block.is_generated() {
                continue;
            }
            block.copy_from(&self.vm);
            block.raise_modified(ModifiedState::WriteNeeded, MOD_REASON_VMANIP);
            if let Some(m) = modified_blocks.as_deref_mut() {
                m.insert(p);
            }
        }
    }

    pub fn loaded_blocks(&self) -> &HashMap<IVec3, u8> {
        &self.loaded_blocks
    }

    pub fn is_dirty(&self) -> bool {
        self.is_dirty
    }

    pub fn mark_dirty(&mut self) {
        self.is_dirty = true;
    }

    pub fn clear(&mut self) {
        self.vm.clear();
        self.loaded_blocks.clear();
        self.is_dirty = false;
    }

    pub fn manipulator(&self) -> &VoxelManipulator {
        &self.vm
    }
}

impl Deref for MMVManip {
    type Target = VoxelManipulator;

    fn deref(&self) -> &VoxelManipulator {
        &self.vm
    }
}

impl DerefMut for MMVManip {
    fn deref_mut(&mut self) -> &mut VoxelManipulator {
        &mut self.vm
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::map::Map;
    use crate::voxel::node::{MapNode, CONTENT_AIR};
    use crate::voxel::nodedef::NodeDefManager;

    fn map_with_block(p: IVec3) -> Map {
        let mut map = Map::new(Arc::new(NodeDefManager::with_default_content()));
        let block = map.create_block(p);
        block.fill(MapNode::new(CONTENT_AIR));
        block.set_generated(true);
        map
    }

    #[test]
    fn test_missing_blocks_marked_no_data() {
        let mut map = map_with_block(IVec3::ZERO);
        let mut vm = MMVManip::new();
        vm.initial_emerge(&mut map, IVec3::ZERO, IVec3::X, false);
        assert_eq!(vm.area, VoxelArea::new(IVec3::ZERO, IVec3::new(31, 15, 15)));
        assert_eq!(vm.loaded_blocks()[&IVec3::ZERO], 0);
        assert_eq!(vm.loaded_blocks()[&IVec3::X], VMANIP_BLOCK_DATA_INEXIST);
        assert!(vm.exists_node(IVec3::new(3, 3, 3)));
        assert!(!vm.exists_node(IVec3::new(20, 3, 3)));
    }

    #[test]
    fn test_load_if_inexistent_creates_blocks() {
        let mut map = map_with_block(IVec3::ZERO);
        let mut vm = MMVManip::new();
        vm.initial_emerge(&mut map, IVec3::ZERO, IVec3::X, true);
        assert_eq!(vm.loaded_blocks()[&IVec3::X], VMANIP_BLOCK_CONTAINS_CIGNORE);
        assert!(map.get_block_no_create(IVec3::X).is_some());
    }

    #[test]
    fn test_blit_back_respects_generated() {
        let mut map = map_with_block(IVec3::ZERO);
        let mut vm = MMVManip::new();
        vm.initial_emerge(&mut map, IVec3::ZERO, IVec3::ZERO, false);
        vm.set_node(IVec3::new(1, 2, 3), MapNode::new(5));

        let mut modified = HashSet::new();
        vm.blit_back_all(&mut map, Some(&mut modified), false);
        assert!(modified.is_empty());
        assert_eq!(map.get_node(IVec3::new(1, 2, 3)).unwrap().content(), CONTENT_AIR);

        vm.blit_back_all(&mut map, Some(&mut modified), true);
        assert!(modified.contains(&IVec3::ZERO));
        assert_eq!(map.get_node(IVec3::new(1, 2, 3)).unwrap().content(), 5);
    }
}

//! MapSector: the column of blocks at one (x, z) position

use std::collections::BTreeMap;

use crate::core::types::{IVec2, IVec3};
use crate::voxel::block::MapBlock;

#[derive(Debug)]
pub struct MapSector {
    pos: IVec2,
    blocks: BTreeMap<i32, MapBlock>,
    usage_timer: f32,
}

impl MapSector {
    pub fn new(pos: IVec2) -> Self {
        Self { pos, blocks: BTreeMap::new(), usage_timer: 0.0 }
    }

    /// Column position (x, z) in blocks
    pub fn pos(&self) -> IVec2 {
        self.pos
    }

    pub fn get_block(&self, y: i32) -> Option<&MapBlock> {
        self.blocks.get(&y)
    }

    pub fn get_block_mut(&mut self, y: i32) -> Option<&mut MapBlock> {
        self.blocks.get_mut(&y)
    }

    /// Create an empty (all IGNORE) block at height `y`, or return the
    /// existing one
    pub fn create_block(&mut self, y: i32) -> &mut MapBlock {
        let pos = IVec3::new(self.pos.x, y, self.pos.y);
        self.blocks.entry(y).or_insert_with(|| MapBlock::new(pos))
    }

    /// Install a block, replacing any block at the same height
    pub fn insert_block(&mut self, block: MapBlock) {
        debug_assert_eq!(IVec2::new(block.pos().x, block.pos().z), self.pos);
        self.blocks.insert(block.pos().y, block);
    }

    pub fn remove_block(&mut self, y: i32) -> Option<MapBlock> {
        self.blocks.remove(&y)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &MapBlock> {
        self.blocks.values()
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut MapBlock> {
        self.blocks.values_mut()
    }

    pub fn block_heights(&self) -> Vec<i32> {
        self.blocks.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn usage_timer(&self) -> f32 {
        self.usage_timer
    }

    pub fn set_usage_timer(&mut self, t: f32) {
        self.usage_timer = t;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_remove() {
        let mut s = MapSector::new(IVec2::new(2, -3));
        let b = s.create_block(5);
        assert_eq!(b.pos(), IVec3::new(2, 5, -3));
        s.create_block(-1);
        assert_eq!(s.block_heights(), vec![-1, 5]);
        assert!(s.remove_block(5).is_some());
        assert!(s.get_block(5).is_none());
        assert_eq!(s.len(), 1);
    }
}

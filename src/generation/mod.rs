//! Map generation: chunk jobs, generators and structure carvers
//!
//! A generator works on one chunk at a time. `LogicMap::init_block_make`
//! loads the chunk plus a one-block border into a `BlockMakeData`, a
//! `MapGenerator` fills it, and `LogicMap::finish_block_make` writes it back
//! into the map with lighting. Jobs can run on the emerge worker's threads
//! since the job owns its buffer.

pub mod caves;
pub mod dungeon;
pub mod emerge;
pub mod mapgen;
pub mod noise;
pub mod random;
pub mod singlenode;
pub mod tree;
pub mod v6;

use std::collections::VecDeque;
use std::sync::Arc;

use crate::core::types::{IVec2, IVec3, MAP_BLOCKSIZE};
use crate::voxel::mmvmanip::MMVManip;
use crate::voxel::nodedef::NodeDefManager;

pub use emerge::{EmergeManager, EmergeRequest};
pub use mapgen::MapgenBase;
pub use noise::{Noise, NoiseParams};
pub use random::PseudoRandom;
pub use singlenode::MapgenSinglenode;
pub use v6::{MapgenV6, MapgenV6Params};

/// One chunk generation job
#[derive(Debug)]
pub struct BlockMakeData {
    pub seed: u64,
    pub vmanip: MMVManip,
    /// First block of the chunk
    pub blockpos_min: IVec3,
    /// Last block of the chunk
    pub blockpos_max: IVec3,
    /// The block whose request started the job
    pub blockpos_requested: IVec3,
    pub nodedef: Arc<NodeDefManager>,
    /// Liquid nodes the map should start transforming after integration
    pub transforming_liquid: VecDeque<IVec3>,
}

impl BlockMakeData {
    pub fn new(nodedef: Arc<NodeDefManager>, seed: u64) -> Self {
        Self {
            seed,
            vmanip: MMVManip::new(),
            blockpos_min: IVec3::ZERO,
            blockpos_max: IVec3::ZERO,
            blockpos_requested: IVec3::ZERO,
            nodedef,
            transforming_liquid: VecDeque::new(),
        }
    }

    /// Node bounds of the chunk
    pub fn node_min(&self) -> IVec3 {
        self.blockpos_min * MAP_BLOCKSIZE
    }

    pub fn node_max(&self) -> IVec3 {
        (self.blockpos_max + IVec3::ONE) * MAP_BLOCKSIZE - IVec3::ONE
    }
}

/// A chunk generator
pub trait MapGenerator: Send {
    fn base(&self) -> &MapgenBase;

    /// Fill the chunk described by `data`
    fn make_chunk(&mut self, data: &mut BlockMakeData);

    /// Y at which a player spawning at `p` stands, or `None` when the column
    /// is unsuitable (under water or too high)
    fn get_spawn_level_at_point(&mut self, p: IVec2) -> Option<i32>;
}

/// Chunk offset in blocks; chunks are centered around the origin block
pub fn chunk_offset(chunksize: i16) -> i32 {
    -(chunksize as i32 / 2)
}

/// First block of the chunk containing `blockpos`
pub fn get_chunk_containing_block(blockpos: IVec3, chunksize: i16) -> IVec3 {
    let cs = chunksize.max(1) as i32;
    let coff = IVec3::splat(chunk_offset(chunksize));
    (blockpos - coff).div_euclid(IVec3::splat(cs)) * cs + coff
}

/// Seed of a block, derived from its position and the map seed
pub fn get_block_seed(p: IVec3, seed: u64) -> u32 {
    (seed as u32)
        .wrapping_add((p.z as u32).wrapping_mul(38134234))
        .wrapping_add((p.y as u32).wrapping_mul(42123))
        .wrapping_add((p.x as u32).wrapping_mul(23))
}

/// Second block seed with better spread, used where neighbouring blocks
/// must not correlate
pub fn get_block_seed2(p: IVec3, seed: u64) -> u32 {
    let mut n = (1619u32.wrapping_mul(p.x as u32))
        .wrapping_add(31337u32.wrapping_mul(p.y as u32))
        .wrapping_add(52591u32.wrapping_mul(p.z as u32))
        .wrapping_add(1013u32.wrapping_mul(seed as u32));
    n = (n >> 13) ^ n;
    n.wrapping_mul(n.wrapping_mul(n).wrapping_mul(60493).wrapping_add(19990303))
        .wrapping_add(1376312589)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_alignment() {
        // chunksize 5 puts the origin block in the middle of its chunk
        assert_eq!(get_chunk_containing_block(IVec3::ZERO, 5), IVec3::splat(-2));
        assert_eq!(get_chunk_containing_block(IVec3::splat(2), 5), IVec3::splat(-2));
        assert_eq!(get_chunk_containing_block(IVec3::splat(3), 5), IVec3::splat(3));
        assert_eq!(get_chunk_containing_block(IVec3::new(-3, 7, -8), 5), IVec3::new(-7, 3, -12));
        assert_eq!(get_chunk_containing_block(IVec3::new(4, -1, 9), 1), IVec3::new(4, -1, 9));
    }

    #[test]
    fn test_block_seeds_differ() {
        let a = get_block_seed(IVec3::new(1, 2, 3), 99);
        let b = get_block_seed(IVec3::new(1, 2, 4), 99);
        assert_ne!(a, b);
        assert_eq!(get_block_seed2(IVec3::new(5, 0, 5), 7), get_block_seed2(IVec3::new(5, 0, 5), 7));
        assert_ne!(get_block_seed2(IVec3::new(5, 0, 5), 7), get_block_seed2(IVec3::new(5, 0, 6), 7));
    }

    #[test]
    fn test_make_data_bounds() {
        let mut data = BlockMakeData::new(Arc::new(NodeDefManager::with_default_content()), 1);
        data.blockpos_min = IVec3::splat(-2);
        data.blockpos_max = IVec3::splat(2);
        assert_eq!(data.node_min(), IVec3::splat(-32));
        assert_eq!(data.node_max(), IVec3::splat(47));
    }
}

//! Core type aliases, re-exports and position helpers

pub use glam::{IVec2, IVec3, Vec3};

/// Standard Result type for the world core
pub type Result<T> = std::result::Result<T, crate::core::error::Error>;

/// Edge length of a map block in nodes
pub const MAP_BLOCKSIZE: i32 = 16;

/// Number of nodes in a map block
pub const NODES_PER_BLOCK: usize = (MAP_BLOCKSIZE * MAP_BLOCKSIZE * MAP_BLOCKSIZE) as usize;

/// Largest absolute node coordinate that is considered inside the world
pub const MAX_MAP_GENERATION_LIMIT: i32 = 31000;

/// The six face neighbours, in the order used by border tracking and lighting
/// (+x, -x, +y, -y, +z, -z)
pub const FACE_DIRS: [IVec3; 6] = [
    IVec3::new(1, 0, 0),
    IVec3::new(-1, 0, 0),
    IVec3::new(0, 1, 0),
    IVec3::new(0, -1, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(0, 0, -1),
];

/// Index of the opposite face in `FACE_DIRS`
pub const fn opposite_face(dir: usize) -> usize {
    dir ^ 1
}

/// Block position containing a node position
pub fn node_to_block_pos(p: IVec3) -> IVec3 {
    IVec3::new(
        p.x.div_euclid(MAP_BLOCKSIZE),
        p.y.div_euclid(MAP_BLOCKSIZE),
        p.z.div_euclid(MAP_BLOCKSIZE),
    )
}

/// Offset of a node inside its block (each component in 0..16)
pub fn node_block_offset(p: IVec3) -> IVec3 {
    IVec3::new(
        p.x.rem_euclid(MAP_BLOCKSIZE),
        p.y.rem_euclid(MAP_BLOCKSIZE),
        p.z.rem_euclid(MAP_BLOCKSIZE),
    )
}

/// Position of the lowest corner node of a block
pub fn block_to_node_pos(blockpos: IVec3) -> IVec3 {
    blockpos * MAP_BLOCKSIZE
}

/// Linear index into a block's node array (stride x=1, y=16, z=256)
#[inline]
pub fn block_node_index(rel: IVec3) -> usize {
    (rel.z * MAP_BLOCKSIZE * MAP_BLOCKSIZE + rel.y * MAP_BLOCKSIZE + rel.x) as usize
}

/// Inverse of `block_node_index`
#[inline]
pub fn block_index_to_pos(index: usize) -> IVec3 {
    let i = index as i32;
    IVec3::new(i % MAP_BLOCKSIZE, (i / MAP_BLOCKSIZE) % MAP_BLOCKSIZE, i / (MAP_BLOCKSIZE * MAP_BLOCKSIZE))
}

/// True if the node position lies inside the generation limits
pub fn is_valid_node_pos(p: IVec3) -> bool {
    p.x.abs() <= MAX_MAP_GENERATION_LIMIT
        && p.y.abs() <= MAX_MAP_GENERATION_LIMIT
        && p.z.abs() <= MAX_MAP_GENERATION_LIMIT
}

/// True if every node of the block lies inside the generation limits
pub fn is_valid_block_pos(blockpos: IVec3) -> bool {
    let min = block_to_node_pos(blockpos);
    let max = min + IVec3::splat(MAP_BLOCKSIZE - 1);
    is_valid_node_pos(min) && is_valid_node_pos(max)
}

/// Encode a block position into a single integer key.
///
/// Each component is a 12-bit signed value, packed as `z*16777216 + y*4096 + x`.
pub fn block_pos_to_key(p: IVec3) -> i64 {
    p.z as i64 * 0x100_0000 + p.y as i64 * 0x1000 + p.x as i64
}

fn unsigned_to_signed(i: i64, max_positive: i64) -> i64 {
    if i < max_positive { i } else { i - 2 * max_positive }
}

fn python_modulo(i: i64, m: i64) -> i64 {
    i.rem_euclid(m)
}

/// Decode a key produced by `block_pos_to_key`
pub fn key_to_block_pos(key: i64) -> IVec3 {
    let mut i = key;
    let x = unsigned_to_signed(python_modulo(i, 4096), 2048);
    i = (i - x) / 4096;
    let y = unsigned_to_signed(python_modulo(i, 4096), 2048);
    i = (i - y) / 4096;
    let z = unsigned_to_signed(python_modulo(i, 4096), 2048);
    IVec3::new(x as i32, y as i32, z as i32)
}

/// Chebyshev (max-norm) distance
pub fn chebyshev(a: IVec3, b: IVec3) -> i32 {
    (a - b).abs().max_element()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_block_conversion() {
        assert_eq!(node_to_block_pos(IVec3::new(15, 16, -1)), IVec3::new(0, 1, -1));
        assert_eq!(node_block_offset(IVec3::new(-1, 17, 0)), IVec3::new(15, 1, 0));
        assert_eq!(block_to_node_pos(IVec3::new(-1, 2, 0)), IVec3::new(-16, 32, 0));
    }

    #[test]
    fn test_block_index_round_trip() {
        for i in [0usize, 1, 17, 255, 256, 4095] {
            assert_eq!(block_node_index(block_index_to_pos(i)), i);
        }
        assert_eq!(block_node_index(IVec3::new(1, 1, 1)), 1 + 16 + 256);
    }

    #[test]
    fn test_block_key_encoding() {
        for p in [
            IVec3::new(0, 0, 0),
            IVec3::new(-1, 2, -3),
            IVec3::new(2047, -2048, 100),
            IVec3::new(-5, -5, -5),
        ] {
            assert_eq!(key_to_block_pos(block_pos_to_key(p)), p);
        }
        assert_eq!(block_pos_to_key(IVec3::new(1, 1, 1)), 16777216 + 4096 + 1);
    }

    #[test]
    fn test_opposite_face() {
        for d in 0..6 {
            assert_eq!(FACE_DIRS[d], -FACE_DIRS[opposite_face(d)]);
        }
    }
}

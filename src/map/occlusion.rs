//! Block occlusion test against a viewer position
//!
//! Rays are cast from the viewer to the block center and its eight
//! (slightly overshot) corners, stepping in growing increments. A ray counts
//! as blocked after crossing `NEEDED_COUNT` nodes that stop light. The block
//! is occluded only if every ray is blocked.

use crate::core::types::{block_to_node_pos, IVec3, MAP_BLOCKSIZE};
use crate::math::ray::float_to_node;

use super::{Map, MapAccess};

/// Opaque nodes a ray must cross before it counts as blocked
pub const NEEDED_COUNT: u32 = 2;

const STEP: f32 = 1.2;
const STEP_FACTOR: f32 = 1.05;
const START_OFFSET: f32 = 1.0;
/// Rays towards corners stop one block diagonal short of the target
const CORNER_END_OFFSET: f32 = -(MAP_BLOCKSIZE as f32) * 1.732;

impl Map {
    /// Whether light-stopping nodes hide the target from the camera
    pub fn is_occluded(&self, camera: IVec3, target: IVec3, end_offset: f32, needed_count: u32) -> bool {
        let delta = (target - camera).as_vec3();
        let distance = delta.length();
        let direction = if distance > 0.0 { delta / distance } else { delta };
        let origin = camera.as_vec3();
        let defs = self.node_defs();

        let mut count = 0;
        let mut step = STEP;
        let mut offset = START_OFFSET;
        while offset < distance + end_offset {
            let p = float_to_node(origin + direction * offset);
            if let Some(n) = self.get_node_opt(p) {
                if !defs.get_node(n).light_propagates {
                    count += 1;
                    if count >= needed_count {
                        return true;
                    }
                }
            }
            offset += step;
            step *= STEP_FACTOR;
        }
        false
    }

    /// Whether block `blockpos` is hidden from a camera at node position
    /// `camera`
    pub fn is_block_occluded(&self, blockpos: IVec3, camera: IVec3) -> bool {
        let half = MAP_BLOCKSIZE / 2;
        let min = block_to_node_pos(blockpos);
        let max = min + IVec3::splat(MAP_BLOCKSIZE - 1);
        let center = min + IVec3::splat(half);

        // The node closest to the camera sits on a face turned towards it
        let outside = camera.cmplt(min).any() || camera.cmpgt(max).any();
        if outside {
            let closest = camera.clamp(min, max);
            if !self.is_occluded(camera, closest, -1.0, NEEDED_COUNT) {
                return false;
            }
        }

        let reach = half + 1;
        let mut targets = vec![center];
        for sx in [-1, 1] {
            for sy in [-1, 1] {
                for sz in [-1, 1] {
                    targets.push(center + IVec3::new(sx, sy, sz) * reach);
                }
            }
        }
        targets
            .into_iter()
            .all(|t| self.is_occluded(camera, t, CORNER_END_OFFSET, NEEDED_COUNT))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::map::tests::filled_map;
    use crate::voxel::area::VoxelArea;
    use crate::voxel::node::{MapNode, CONTENT_AIR};
    use crate::voxel::nodedef::NodeDefManager;

    #[test]
    fn test_open_air_not_occluded() {
        let map = filled_map(Arc::new(NodeDefManager::with_default_content()), 3, "air", false);
        assert!(!map.is_block_occluded(IVec3::new(3, 0, 0), IVec3::new(8, 8, 8)));
    }

    #[test]
    fn test_block_inside_stone_occluded() {
        let defs = Arc::new(NodeDefManager::with_default_content());
        let mut map = filled_map(defs, 3, "stone", true);
        // Camera sits in a small pocket in the center block
        for p in VoxelArea::new(IVec3::splat(7), IVec3::splat(9)).iter() {
            map.set_node_raw(p, MapNode::new(CONTENT_AIR)).unwrap();
        }
        assert!(map.is_block_occluded(IVec3::new(3, 0, 0), IVec3::splat(8)));
        assert!(map.is_block_occluded(IVec3::new(-3, 2, 1), IVec3::splat(8)));
        // Corner rays of a close block end before reaching any stone
        assert!(!map.is_block_occluded(IVec3::new(1, 0, 0), IVec3::splat(8)));
    }
}

//! Light repair across block seams
//!
//! A block lit while a neighbour was unloaded has the lighting-complete bit
//! for that face cleared. Once both sides are loaded, the nodes on the seam
//! are checked and wrong light is unspread and spread again.

use std::collections::HashSet;

use crate::core::types::{block_to_node_pos, opposite_face, IVec3, FACE_DIRS, MAP_BLOCKSIZE};
use crate::map::MapAccess;
use crate::voxel::area::VoxelArea;
use crate::voxel::node::{LightBank, LIGHT_SUN};
use crate::voxel::nodedef::NodeDefManager;

use super::bulk::{propagate_sunlight_down, ColumnLight, SunlightPropagation};
use super::queue::{ReLightQueue, UnlightQueue, NO_SOURCE};
use super::update::{spread_light, unspread_light, write_node};

const FACE_UP: usize = 2;
const FACE_DOWN: usize = 3;

/// The nodes of a block lying on face `dir`, in block-relative coordinates
fn face_area(dir: usize) -> VoxelArea {
    let d = FACE_DIRS[dir];
    let mut min = IVec3::ZERO;
    let mut max = IVec3::splat(MAP_BLOCKSIZE - 1);
    for axis in 0..3 {
        if d[axis] > 0 {
            min[axis] = MAP_BLOCKSIZE - 1;
        } else if d[axis] < 0 {
            max[axis] = 0;
        }
    }
    VoxelArea::new(min, max)
}

/// Light a node at `p` should hold given its neighbours, or `None` for
/// nodes that don't carry light
fn expected_light<M: MapAccess + ?Sized>(map: &M, defs: &NodeDefManager, bank: LightBank, p: IVec3) -> Option<(u8, u8)> {
    let n = map.get_node_opt(p)?;
    let f = defs.get_node(n);
    if !f.light_propagates {
        return None;
    }
    let mut expected = f.light_source;
    for d in FACE_DIRS {
        if let Some(n2) = map.get_node_opt(p + d) {
            let l = n2.get_light(bank, defs.get_node(n2));
            expected = expected.max(l.saturating_sub(1));
        }
    }
    Some((n.light_raw(bank, f), expected))
}

/// Reconcile light on every face of `blockpos` whose lighting-complete bit
/// (on either side) is cleared and whose neighbour is loaded. Both bits are
/// set afterwards.
pub fn update_block_border_lighting<M: MapAccess + ?Sized>(
    map: &mut M,
    blockpos: IVec3,
    modified_blocks: &mut HashSet<IVec3>,
) {
    if map.get_block_no_create(blockpos).is_none() {
        return;
    }
    let defs = map.node_defs().clone();

    for bank in LightBank::ALL {
        let mut unlight = UnlightQueue::default();
        let mut relight = ReLightQueue::default();

        for dir in 0..6 {
            let other = blockpos + FACE_DIRS[dir];
            let other_dir = opposite_face(dir);
            let complete = match (map.get_block_no_create(blockpos), map.get_block_no_create(other)) {
                (Some(a), Some(b)) => a.is_lighting_complete(bank, dir) && b.is_lighting_complete(bank, other_dir),
                _ => continue,
            };
            if complete {
                continue;
            }
            for (bp, face) in [(blockpos, dir), (other, other_dir)] {
                if let Some(b) = map.get_block_no_create_mut(bp) {
                    b.set_lighting_complete_face(bank, face, true);
                }
            }

            // Sunlight crosses the horizontal seam straight down
            if bank == LightBank::Day && (dir == FACE_UP || dir == FACE_DOWN) {
                let upper = if dir == FACE_UP { other } else { blockpos };
                let mut light: ColumnLight = [[false; MAP_BLOCKSIZE as usize]; MAP_BLOCKSIZE as usize];
                if let Some(b) = map.get_block_no_create(upper) {
                    for z in 0..MAP_BLOCKSIZE {
                        for x in 0..MAP_BLOCKSIZE {
                            let n = b.get_node_no_check(IVec3::new(x, 0, z));
                            light[z as usize][x as usize] = n.get_light(bank, defs.get_node(n)) == LIGHT_SUN;
                        }
                    }
                }
                let data = SunlightPropagation::new(upper - IVec3::Y, &light);
                propagate_sunlight_down(map, &defs, data, &mut unlight, &mut relight, modified_blocks);
            }

            for (bp, face) in [(blockpos, dir), (other, other_dir)] {
                let origin = block_to_node_pos(bp);
                for rel in face_area(face).iter() {
                    let p = origin + rel;
                    let Some((light, expected)) = expected_light(map, &defs, bank, p) else { continue };
                    if light == expected || (bank == LightBank::Day && light == LIGHT_SUN) {
                        continue;
                    }
                    if light > 0 {
                        if let Some(mut n) = map.get_node_opt(p) {
                            n.set_light(bank, 0, defs.get_node(n));
                            write_node(map, p, n, modified_blocks);
                        }
                    }
                    unlight.push(light, p, NO_SOURCE);
                }
            }
        }

        unspread_light(map, &defs, bank, &mut unlight, &mut relight, modified_blocks);
        spread_light(map, &defs, bank, &mut relight, modified_blocks);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_area() {
        assert_eq!(face_area(0), VoxelArea::new(IVec3::new(15, 0, 0), IVec3::splat(15)));
        assert_eq!(face_area(3), VoxelArea::new(IVec3::ZERO, IVec3::new(15, 0, 15)));
        assert_eq!(face_area(5).volume(), 256);
    }
}

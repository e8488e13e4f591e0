//! Whole-block light computation for generator output and repairs

use std::collections::HashSet;

use crate::core::types::{block_index_to_pos, block_to_node_pos, node_to_block_pos, IVec2, IVec3, MAP_BLOCKSIZE};
use crate::map::MapAccess;
use crate::voxel::area::VoxelArea;
use crate::voxel::manip::VOXELFLAG_NO_DATA;
use crate::voxel::mmvmanip::MMVManip;
use crate::voxel::node::{LightBank, CONTENT_IGNORE, LIGHT_MAX, LIGHT_SUN};
use crate::voxel::nodedef::NodeDefManager;

use super::queue::{ReLightQueue, UnlightQueue, NO_SOURCE};
use super::update::{spread_light, unspread_light};

const BS: i32 = MAP_BLOCKSIZE;
const FACE_DOWN: u8 = 3;

/// Sunlight flags of one block's columns, indexed `[z][x]`
pub type ColumnLight = [[bool; BS as usize]; BS as usize];

/// The six one-node-thick faces of a block, without overlaps
fn block_pad() -> [VoxelArea; 6] {
    [
        VoxelArea::new(IVec3::new(15, 0, 0), IVec3::new(15, 15, 15)),
        VoxelArea::new(IVec3::new(1, 15, 0), IVec3::new(14, 15, 15)),
        VoxelArea::new(IVec3::new(1, 1, 15), IVec3::new(14, 14, 15)),
        VoxelArea::new(IVec3::new(1, 1, 0), IVec3::new(14, 14, 0)),
        VoxelArea::new(IVec3::new(1, 0, 0), IVec3::new(14, 0, 15)),
        VoxelArea::new(IVec3::new(0, 0, 0), IVec3::new(0, 15, 15)),
    ]
}

/// Columns of one block still carrying sunlight (or shadow) downwards
pub(super) struct SunlightPropagation {
    columns: Vec<(IVec2, bool)>,
    target_block: IVec3,
}

impl SunlightPropagation {
    pub(super) fn new(block_below: IVec3, light: &ColumnLight) -> Self {
        let mut columns = Vec::with_capacity((BS * BS) as usize);
        for z in 0..BS {
            for x in 0..BS {
                columns.push((IVec2::new(x, z), light[z as usize][x as usize]));
            }
        }
        Self { columns, target_block: block_below }
    }
}

/// Which columns of block `pos` receive sunlight from the block above.
/// The block above is emerged if needed; when it is missing or not
/// generated, every column follows `pos`'s underground flag.
pub fn is_sunlight_above_block<M: MapAccess + ?Sized>(
    map: &mut M,
    pos: IVec3,
    defs: &NodeDefManager,
    light: &mut ColumnLight,
) -> bool {
    let above = pos + IVec3::Y;
    let source = map.emerge_block(above, false).filter(|b| b.is_generated()).map(|b| {
        let mut l = [[false; BS as usize]; BS as usize];
        for z in 0..BS {
            for x in 0..BS {
                let n = b.get_node_no_check(IVec3::new(x, 0, z));
                l[z as usize][x as usize] = n.get_light(LightBank::Day, defs.get_node(n)) == LIGHT_SUN;
            }
        }
        l
    });
    match source {
        Some(l) => {
            *light = l;
            false
        }
        None => {
            let sunlight = map.get_block_no_create(pos).is_some_and(|b| !b.is_underground());
            *light = [[sunlight; BS as usize]; BS as usize];
            sunlight
        }
    }
}

/// Reset the day bank of one block column span of `vm` to plain sunlight
/// and the night bank to dark. `offset` is the column's node (x, z) origin.
/// On return `light` holds the sunlight leaving the bottom of the buffer.
pub fn fill_with_sunlight(vm: &mut MMVManip, defs: &NodeDefManager, offset: IVec2, light: &mut ColumnLight) {
    let area = vm.area;
    let ystride = area.ystride();
    for z in 0..BS {
        for x in 0..BS {
            let rx = offset.x + x;
            let rz = offset.y + z;
            let max_i = area.index(rx, area.max.y, rz);
            let mut lit = light[z as usize][x as usize];
            for step in 0..area.extent().y as usize {
                let i = max_i - step * ystride;
                if vm.flags[i] & VOXELFLAG_NO_DATA != 0 {
                    continue;
                }
                let n = &mut vm.data[i];
                if n.content() == CONTENT_IGNORE {
                    continue;
                }
                let f = defs.get_node(*n);
                if lit && !f.sunlight_propagates {
                    lit = false;
                }
                n.set_light(LightBank::Day, if lit { LIGHT_SUN } else { 0 }, f);
                n.set_light(LightBank::Night, 0, f);
            }
            light[z as usize][x as usize] = lit;
        }
    }
}

/// Carry sunlight or shadow one block further down. Columns whose state no
/// longer changes are dropped from `data`. Returns true if the target block
/// was modified.
fn propagate_block_sunlight<M: MapAccess + ?Sized>(
    map: &mut M,
    defs: &NodeDefManager,
    data: &mut SunlightPropagation,
    unlight: &mut UnlightQueue,
    relight: &mut ReLightQueue,
) -> bool {
    let Some(block) = map.get_block_no_create_mut(data.target_block) else {
        data.columns.clear();
        return false;
    };
    let origin = block_to_node_pos(data.target_block);
    let mut modified = false;
    let mut i = 0;
    while i < data.columns.len() {
        let (col, sunlit) = data.columns[i];
        let mut y = BS - 1;
        while y >= 0 {
            let rel = IVec3::new(col.x, y, col.y);
            let mut n = block.get_node_no_check(rel);
            let f = defs.get_node(n);
            let raw = n.light_raw(LightBank::Day, f);
            if sunlit {
                if raw < LIGHT_SUN && f.sunlight_propagates {
                    n.set_light(LightBank::Day, LIGHT_SUN, f);
                    block.set_node_no_check(rel, n);
                    relight.push(LIGHT_SUN, origin + rel, FACE_DOWN);
                    modified = true;
                } else {
                    break;
                }
            } else if raw == LIGHT_SUN {
                n.set_light(LightBank::Day, 0, f);
                block.set_node_no_check(rel, n);
                unlight.push(LIGHT_SUN, origin + rel, FACE_DOWN);
                modified = true;
            } else {
                break;
            }
            y -= 1;
        }
        if y >= 0 {
            data.columns.swap_remove(i);
        } else {
            i += 1;
        }
    }
    modified
}

pub(super) fn propagate_sunlight_down<M: MapAccess + ?Sized>(
    map: &mut M,
    defs: &NodeDefManager,
    mut data: SunlightPropagation,
    unlight: &mut UnlightQueue,
    relight: &mut ReLightQueue,
    modified_blocks: &mut HashSet<IVec3>,
) {
    while !data.columns.is_empty() {
        if propagate_block_sunlight(map, defs, &mut data, unlight, relight) {
            modified_blocks.insert(data.target_block);
        }
        data.target_block.y -= 1;
    }
}

/// Unlight, collect every light source in the block range, then spread
fn finish_bulk_light_update<M: MapAccess + ?Sized>(
    map: &mut M,
    defs: &NodeDefManager,
    minblock: IVec3,
    maxblock: IVec3,
    unlight: &mut [UnlightQueue; 2],
    relight: &mut [ReLightQueue; 2],
    modified_blocks: &mut HashSet<IVec3>,
) {
    for (b, bank) in LightBank::ALL.into_iter().enumerate() {
        unspread_light(map, defs, bank, &mut unlight[b], &mut relight[b], modified_blocks);
    }

    for bz in minblock.z..=maxblock.z {
        for by in minblock.y..=maxblock.y {
            for bx in minblock.x..=maxblock.x {
                let bp = IVec3::new(bx, by, bz);
                let Some(block) = map.get_block_no_create(bp) else { continue };
                let origin = block_to_node_pos(bp);
                for (i, n) in block.nodes().iter().enumerate() {
                    let f = defs.get_node(*n);
                    for (b, bank) in LightBank::ALL.into_iter().enumerate() {
                        let light = n.get_light(bank, f);
                        if light > 1 {
                            let rel = block_index_to_pos(i);
                            relight[b].push(light, origin + rel, NO_SOURCE);
                        }
                    }
                }
            }
        }
    }

    for (b, bank) in LightBank::ALL.into_iter().enumerate() {
        spread_light(map, defs, bank, &mut relight[b], modified_blocks);
    }
}

/// Write a generator's manipulator back into the map with correct light.
///
/// Sunlight is recomputed column by column from the blocks above, pushed
/// down through loaded blocks below the buffer, and the borders of the
/// buffer are unlit wherever the new data is darker than what was there.
pub fn blit_back_with_light<M: MapAccess + ?Sized>(
    map: &mut M,
    vm: &mut MMVManip,
    modified_blocks: &mut HashSet<IVec3>,
) {
    if vm.area.has_empty_extent() {
        return;
    }
    let defs = map.node_defs().clone();
    let minblock = node_to_block_pos(vm.area.min);
    let maxblock = node_to_block_pos(vm.area.max);
    let mut unlight = [UnlightQueue::with_capacity(256), UnlightQueue::with_capacity(256)];
    let mut relight = [ReLightQueue::with_capacity(256), ReLightQueue::with_capacity(256)];

    for bz in minblock.z..=maxblock.z {
        for bx in minblock.x..=maxblock.x {
            let mut light = [[false; BS as usize]; BS as usize];
            is_sunlight_above_block(map, IVec3::new(bx, maxblock.y, bz), &defs, &mut light);
            fill_with_sunlight(vm, &defs, IVec2::new(bx * BS, bz * BS), &mut light);
            let data = SunlightPropagation::new(IVec3::new(bx, minblock.y - 1, bz), &light);
            let [u, _] = &mut unlight;
            let [r, _] = &mut relight;
            propagate_sunlight_down(map, &defs, data, u, r, modified_blocks);
        }
    }

    let pads = block_pad();
    for bz in minblock.z..=maxblock.z {
        for by in minblock.y..=maxblock.y {
            for bx in minblock.x..=maxblock.x {
                let bp = IVec3::new(bx, by, bz);
                let Some(block) = map.get_block_no_create(bp) else { continue };
                let origin = block_to_node_pos(bp);
                for a in &pads {
                    for rel in a.iter() {
                        let old = block.get_node_no_check(rel);
                        let old_f = defs.get_node(old);
                        let new = vm.get_node_no_ex(origin + rel);
                        let new_f = defs.get_node(new);
                        for (b, bank) in LightBank::ALL.into_iter().enumerate() {
                            let old_light = if old_f.lighting_flags().has_light {
                                old.get_light(bank, old_f)
                            } else {
                                LIGHT_SUN
                            };
                            if old_light > new.get_light(bank, new_f) {
                                unlight[b].push(old_light, origin + rel, NO_SOURCE);
                            }
                        }
                    }
                }
            }
        }
    }

    vm.blit_back_all(map, Some(&mut *modified_blocks), true);

    finish_bulk_light_update(map, &defs, minblock, maxblock, &mut unlight, &mut relight, modified_blocks);
}

/// Recompute all light of one loaded block from scratch and reconcile it
/// with its neighbours
pub fn repair_block_light<M: MapAccess + ?Sized>(map: &mut M, blockpos: IVec3, modified_blocks: &mut HashSet<IVec3>) {
    if map.get_block_no_create(blockpos).is_none() {
        return;
    }
    let defs = map.node_defs().clone();
    let mut unlight = [UnlightQueue::with_capacity(256), UnlightQueue::with_capacity(256)];
    let mut relight = [ReLightQueue::with_capacity(256), ReLightQueue::with_capacity(256)];
    modified_blocks.insert(blockpos);

    let mut light = [[false; BS as usize]; BS as usize];
    is_sunlight_above_block(map, blockpos, &defs, &mut light);
    let Some(block) = map.get_block_no_create_mut(blockpos) else { return };
    for z in 0..BS {
        for x in 0..BS {
            let mut lit = light[z as usize][x as usize];
            for y in (0..BS).rev() {
                let rel = IVec3::new(x, y, z);
                let mut n = block.get_node_no_check(rel);
                if n.content() == CONTENT_IGNORE {
                    continue;
                }
                let f = defs.get_node(n);
                if lit && !f.sunlight_propagates {
                    lit = false;
                }
                n.set_light(LightBank::Day, if lit { LIGHT_SUN } else { 0 }, f);
                n.set_light(LightBank::Night, 0, f);
                block.set_node_no_check(rel, n);
            }
            light[z as usize][x as usize] = lit;
        }
    }

    let data = SunlightPropagation::new(blockpos - IVec3::Y, &light);
    {
        let [u, _] = &mut unlight;
        let [r, _] = &mut relight;
        propagate_sunlight_down(map, &defs, data, u, r, modified_blocks);
    }

    let origin = block_to_node_pos(blockpos);
    if let Some(block) = map.get_block_no_create(blockpos) {
        for a in &block_pad() {
            for rel in a.iter() {
                let n = block.get_node_no_check(rel);
                let f = defs.get_node(n);
                for (b, bank) in LightBank::ALL.into_iter().enumerate() {
                    if n.get_light(bank, f) < LIGHT_SUN {
                        unlight[b].push(LIGHT_MAX, origin + rel, NO_SOURCE);
                    }
                }
            }
        }
    }

    finish_bulk_light_update(map, &defs, blockpos, blockpos, &mut unlight, &mut relight, modified_blocks);
}

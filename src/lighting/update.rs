//! Incremental light propagation over loaded blocks

use std::collections::HashSet;

use crate::core::types::{node_block_offset, node_to_block_pos, opposite_face, IVec3, FACE_DIRS};
use crate::map::MapAccess;
use crate::voxel::node::{LightBank, MapNode, CONTENT_IGNORE, LIGHT_SUN};
use crate::voxel::nodedef::NodeDefManager;

use super::queue::{ChangingLight, ReLightQueue, UnlightQueue, NO_SOURCE};

const FACE_DOWN: u8 = 3;

/// Neighbour of `pos` across face `dir`, or `None` when that neighbour's
/// block is not loaded. A missing block clears the lighting-complete bit of
/// `pos`'s block for that face.
pub(crate) fn neighbor<M: MapAccess + ?Sized>(
    map: &mut M,
    bank: LightBank,
    pos: IVec3,
    dir: usize,
) -> Option<(IVec3, MapNode)> {
    let np = pos + FACE_DIRS[dir];
    let nbp = node_to_block_pos(np);
    match map.get_block_no_create(nbp) {
        Some(b) => Some((np, b.get_node_no_check(node_block_offset(np)))),
        None => {
            if let Some(b) = map.get_block_no_create_mut(node_to_block_pos(pos)) {
                b.set_lighting_complete_face(bank, dir, false);
            }
            None
        }
    }
}

/// Store a node back into its (loaded) block and record the block
pub(crate) fn write_node<M: MapAccess + ?Sized>(
    map: &mut M,
    p: IVec3,
    n: MapNode,
    modified_blocks: &mut HashSet<IVec3>,
) {
    let bp = node_to_block_pos(p);
    if let Some(b) = map.get_block_no_create_mut(bp) {
        b.set_node_no_check(node_block_offset(p), n);
        modified_blocks.insert(bp);
    }
}

/// Remove light that depended on the cells in `from_nodes`.
///
/// Each popped cell is already dark. Neighbours dimmer than it lost their
/// source and are darkened in turn; brighter neighbours (or the cell's own
/// light source) can relight it, so the cell goes to `light_sources` at one
/// below its brightest supporter.
pub fn unspread_light<M: MapAccess + ?Sized>(
    map: &mut M,
    defs: &NodeDefManager,
    bank: LightBank,
    from_nodes: &mut UnlightQueue,
    light_sources: &mut ReLightQueue,
    modified_blocks: &mut HashSet<IVec3>,
) {
    while let Some((current_light, current)) = from_nodes.pop() {
        let Some(node) = map.get_node_opt(current.pos) else { continue };
        let f = defs.get_node(node);
        let mut source_dir = NO_SOURCE;
        let mut brightest = f.light_source + 1;

        for dir in 0..6 {
            if current.source_dir != NO_SOURCE && dir == opposite_face(current.source_dir as usize) {
                continue;
            }
            let Some((np, mut n)) = neighbor(map, bank, current.pos, dir) else { continue };
            let nf = defs.get_node(n);
            let mut neighbor_light = n.light_raw(bank, nf);
            if nf.light_propagates && neighbor_light < current_light {
                if neighbor_light > 0 {
                    n.set_light(bank, 0, nf);
                    write_node(map, np, n, modified_blocks);
                    from_nodes.push(neighbor_light, np, dir as u8);
                }
            } else {
                neighbor_light = neighbor_light.max(nf.light_source);
                if brightest < neighbor_light {
                    brightest = neighbor_light;
                    source_dir = dir as u8;
                }
            }
        }

        if brightest > 1 && f.light_propagates {
            let from = if source_dir == NO_SOURCE {
                NO_SOURCE
            } else {
                opposite_face(source_dir as usize) as u8
            };
            light_sources.push(brightest - 1, current.pos, from);
        }
    }
}

/// Spread light outwards from every cell in `light_sources`.
///
/// A popped cell is first raised to its bucket level; each neighbour that
/// lets light through and is dimmer than one below that level is brightened
/// and queued.
pub fn spread_light<M: MapAccess + ?Sized>(
    map: &mut M,
    defs: &NodeDefManager,
    bank: LightBank,
    light_sources: &mut ReLightQueue,
    modified_blocks: &mut HashSet<IVec3>,
) {
    while let Some((light, current)) = light_sources.pop() {
        raise_light(map, defs, bank, current, light, modified_blocks);
        if light == 0 {
            continue;
        }
        let spreading = light - 1;
        for dir in 0..6 {
            if current.source_dir != NO_SOURCE && dir == opposite_face(current.source_dir as usize) {
                continue;
            }
            let Some((np, mut n)) = neighbor(map, bank, current.pos, dir) else { continue };
            let nf = defs.get_node(n);
            if nf.light_propagates && n.light_raw(bank, nf) < spreading {
                n.set_light(bank, spreading, nf);
                write_node(map, np, n, modified_blocks);
                light_sources.push(spreading, np, dir as u8);
            }
        }
    }
}

fn raise_light<M: MapAccess + ?Sized>(
    map: &mut M,
    defs: &NodeDefManager,
    bank: LightBank,
    c: ChangingLight,
    light: u8,
    modified_blocks: &mut HashSet<IVec3>,
) {
    let Some(mut n) = map.get_node_opt(c.pos) else { return };
    let f = defs.get_node(n);
    if f.light_propagates && n.light_raw(bank, f) < light {
        n.set_light(bank, light, f);
        write_node(map, c.pos, n, modified_blocks);
    }
}

/// Whether the node at `pos` can receive sunlight from above. With no
/// loaded block above, the node's own block decides by its underground flag.
pub fn is_sunlight_above<M: MapAccess + ?Sized>(map: &M, pos: IVec3, defs: &NodeDefManager) -> bool {
    let above = pos + IVec3::Y;
    match map.get_block_no_create(node_to_block_pos(above)) {
        None => map
            .get_block_no_create(node_to_block_pos(pos))
            .is_some_and(|b| !b.is_underground()),
        Some(b) => {
            let n = b.get_node_no_check(node_block_offset(above));
            if n.content() == CONTENT_IGNORE {
                !b.is_underground()
            } else {
                n.get_light(LightBank::Day, defs.get_node(n)) == LIGHT_SUN
            }
        }
    }
}

/// Relight after the nodes in `old_nodes` were replaced in place.
///
/// `old_nodes` holds each changed position with the node that was there
/// before; the new nodes are already in the map with their light cleared.
/// Every block whose light changed ends up in `modified_blocks`.
pub fn update_lighting_nodes<M: MapAccess + ?Sized>(
    map: &mut M,
    old_nodes: &[(IVec3, MapNode)],
    modified_blocks: &mut HashSet<IVec3>,
) {
    if old_nodes.is_empty() {
        return;
    }
    let defs = map.node_defs().clone();

    for bank in LightBank::ALL {
        let mut disappearing = UnlightQueue::with_capacity(16);
        let mut sources = ReLightQueue::with_capacity(16);

        // Nodes brighter than every old node did not get their light from
        // the changed nodes and can be trusted as sources.
        let mut min_safe_light = old_nodes
            .iter()
            .map(|(_, old)| old.get_light(bank, defs.get_node(*old)))
            .max()
            .unwrap_or(0);
        if old_nodes.len() > 1 {
            min_safe_light += 1;
        }

        for &(p, old) in old_nodes {
            let bp = node_to_block_pos(p);
            let Some(block) = map.get_block_no_create(bp) else { continue };
            let mut n = block.get_node_no_check(node_block_offset(p));
            let old_light = old.get_light(bank, defs.get_node(old));
            modified_blocks.insert(bp);

            let f = defs.get_node(n);
            let new_light = if !f.light_propagates {
                f.light_source
            } else if bank == LightBank::Day && f.sunlight_propagates && is_sunlight_above(map, p, &defs) {
                LIGHT_SUN
            } else {
                let mut l = f.light_source;
                for d in FACE_DIRS {
                    if let Some(n2) = map.get_node_opt(p + d) {
                        let spread = n2.get_light(bank, defs.get_node(n2));
                        if spread > l && spread >= min_safe_light {
                            l = spread - 1;
                        }
                    }
                }
                l
            };

            if new_light > 0 {
                sources.push(new_light, p, NO_SOURCE);
            }

            if new_light < old_light {
                n.set_light(bank, 0, f);
                write_node(map, p, n, modified_blocks);
                disappearing.push(old_light, p, NO_SOURCE);

                // The column below loses the sunlight that passed through
                if bank == LightBank::Day && old_light == LIGHT_SUN {
                    let mut below = p - IVec3::Y;
                    while let Some(mut n2) = map.get_node_opt(below) {
                        let f2 = defs.get_node(n2);
                        if n2.get_light(LightBank::Day, f2) != LIGHT_SUN {
                            break;
                        }
                        n2.set_light(LightBank::Day, 0, f2);
                        write_node(map, below, n2, modified_blocks);
                        disappearing.push(LIGHT_SUN, below, FACE_DOWN);
                        below -= IVec3::Y;
                    }
                }
            } else if new_light > old_light && bank == LightBank::Day && new_light == LIGHT_SUN {
                let mut below = p - IVec3::Y;
                while let Some(n2) = map.get_node_opt(below) {
                    let f2 = defs.get_node(n2);
                    if n2.get_light(LightBank::Day, f2) == LIGHT_SUN || !f2.sunlight_propagates {
                        break;
                    }
                    sources.push(LIGHT_SUN, below, FACE_DOWN);
                    below -= IVec3::Y;
                }
            }
        }

        unspread_light(map, &defs, bank, &mut disappearing, &mut sources, modified_blocks);
        spread_light(map, &defs, bank, &mut sources, modified_blocks);
    }
}

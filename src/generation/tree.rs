//! Tree builders: the fixed v6 trees and an L-system interpreter
//!
//! All builders write into a voxel manipulator and only replace air,
//! IGNORE, or (for trunks) their own foliage.

use std::collections::HashSet;
use std::f32::consts::FRAC_PI_2;

use glam::{Mat3, Vec3};
use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::{node_to_block_pos, IVec3, Result};
use crate::lighting::bulk::blit_back_with_light;
use crate::map::{Map, MapEditEvent};
use crate::math::float_to_node;
use crate::voxel::area::VoxelArea;
use crate::voxel::manip::VoxelManipulator;
use crate::voxel::mmvmanip::MMVManip;
use crate::voxel::node::{MapNode, CONTENT_AIR, CONTENT_IGNORE};
use crate::voxel::nodedef::NodeDefManager;

use super::random::PseudoRandom;

fn is_free(vm: &VoxelManipulator, p: IVec3) -> bool {
    let c = vm.get_node_no_ex(p).content();
    c == CONTENT_AIR || c == CONTENT_IGNORE
}

/// Write `n` if `p` lies inside the buffer
fn put(vm: &mut VoxelManipulator, p: IVec3, n: MapNode) {
    if vm.area.contains(p) {
        vm.set_node(p, n);
    }
}

fn resolve(defs: &NodeDefManager, alias: &str) -> Option<MapNode> {
    match defs.get_id(alias) {
        Some(id) => Some(MapNode::new(id)),
        None => {
            log::error!("tree builder: mapgen alias '{}' is not defined", alias);
            None
        }
    }
}

/// Blit a leaf mask centered on `top` into free cells
fn blit_leaves(vm: &mut VoxelManipulator, mask_area: &VoxelArea, mask: &[u8], top: IVec3, mut node_for: impl FnMut(u8) -> Option<MapNode>) {
    for rel in mask_area.iter() {
        let p = top + rel;
        if !vm.area.contains(p) || !is_free(vm, p) {
            continue;
        }
        if let Some(n) = node_for(mask[mask_area.index_p(rel)]) {
            vm.set_node(p, n);
        }
    }
}

/// Default tree: a 4 or 5 tall trunk under a random blob of leaves,
/// optionally with apples
pub fn make_tree(vm: &mut VoxelManipulator, p0: IVec3, is_apple_tree: bool, defs: &NodeDefManager, seed: u32) {
    let (Some(tree), Some(leaves), Some(apple)) =
        (resolve(defs, "mapgen_tree"), resolve(defs, "mapgen_leaves"), resolve(defs, "mapgen_apple"))
    else {
        return;
    };

    let mut pr = PseudoRandom::new(seed as u64);
    let trunk_h = pr.range(4, 5);
    let mut p1 = p0;
    for _ in 0..trunk_h {
        put(vm, p1, tree);
        p1.y += 1;
    }
    // Top of the trunk
    p1.y -= 1;

    let leaves_a = VoxelArea::new(IVec3::new(-2, -1, -2), IVec3::new(2, 2, 2));
    let mut leaves_d = vec![0u8; leaves_a.volume()];
    let d = 1;
    for rel in VoxelArea::new(IVec3::splat(-d), IVec3::splat(d)).iter() {
        leaves_d[leaves_a.index_p(rel)] = 1;
    }
    for _ in 0..7 {
        let p = IVec3::new(
            pr.range(leaves_a.min.x, leaves_a.max.x - d),
            pr.range(leaves_a.min.y, leaves_a.max.y - d),
            pr.range(leaves_a.min.z, leaves_a.max.z - d),
        );
        for rel in VoxelArea::new(p, p + IVec3::splat(d)).iter() {
            leaves_d[leaves_a.index_p(rel)] = 1;
        }
    }

    blit_leaves(vm, &leaves_a, &leaves_d, p1, |m| {
        (m == 1).then(|| if is_apple_tree && pr.range(0, 99) < 10 { apple } else { leaves })
    });
}

/// Tall jungle tree with buttress roots and a wide crown
pub fn make_jungle_tree(vm: &mut VoxelManipulator, p0: IVec3, defs: &NodeDefManager, seed: u32) {
    let Some(tree) = resolve(defs, "mapgen_jungletree") else { return };
    let leaves = match defs.get_id("mapgen_jungleleaves") {
        Some(id) => MapNode::new(id),
        None => match resolve(defs, "mapgen_leaves") {
            Some(n) => n,
            None => return,
        },
    };

    let mut pr = PseudoRandom::new(seed as u64);
    for x in -1..=1 {
        for z in -1..=1 {
            if pr.range(0, 2) == 0 {
                continue;
            }
            let p1 = p0 + IVec3::new(x, 0, z);
            let p2 = p0 + IVec3::new(x, -1, z);
            if vm.area.contains(p2) && vm.get_node_no_ex(p2).content() == CONTENT_AIR {
                vm.set_node(p2, tree);
            } else if vm.area.contains(p1) && vm.get_node_no_ex(p1).content() == CONTENT_AIR {
                vm.set_node(p1, tree);
            }
        }
    }
    put(vm, p0, tree);

    let trunk_h = pr.range(8, 12);
    let mut p1 = p0;
    for _ in 0..trunk_h {
        if vm.area.contains(p1) && is_free(vm, p1) {
            vm.set_node(p1, tree);
        }
        p1.y += 1;
    }
    p1.y -= 1;

    let leaves_a = VoxelArea::new(IVec3::new(-3, -2, -3), IVec3::new(3, 2, 3));
    let mut leaves_d = vec![0u8; leaves_a.volume()];
    let d = 1;
    for rel in VoxelArea::new(IVec3::splat(-d), IVec3::splat(d)).iter() {
        leaves_d[leaves_a.index_p(rel)] = 1;
    }
    for _ in 0..30 {
        let p = IVec3::new(
            pr.range(leaves_a.min.x, leaves_a.max.x - d),
            pr.range(leaves_a.min.y, leaves_a.max.y - d),
            pr.range(leaves_a.min.z, leaves_a.max.z - d),
        );
        for rel in VoxelArea::new(p, p + IVec3::splat(d)).iter() {
            leaves_d[leaves_a.index_p(rel)] = 1;
        }
    }

    blit_leaves(vm, &leaves_a, &leaves_d, p1, |m| (m == 1).then_some(leaves));
}

/// Conical pine with snow on its branches
pub fn make_pine_tree(vm: &mut VoxelManipulator, p0: IVec3, defs: &NodeDefManager, seed: u32) {
    let Some(tree) = resolve(defs, "mapgen_pine_tree") else { return };
    let leaves = match defs.get_id("mapgen_pine_needles") {
        Some(id) => MapNode::new(id),
        None => match resolve(defs, "mapgen_leaves") {
            Some(n) => n,
            None => return,
        },
    };
    let snow = MapNode::new(defs.get_id("mapgen_snow").unwrap_or(CONTENT_AIR));

    let mut pr = PseudoRandom::new(seed as u64);
    let trunk_h = pr.range(9, 13);
    let mut p1 = p0;
    for _ in 0..trunk_h {
        if vm.area.contains(p1) && is_free(vm, p1) {
            vm.set_node(p1, tree);
        }
        p1.y += 1;
    }
    p1.y -= 1;

    let leaves_a = VoxelArea::new(IVec3::new(-3, -6, -3), IVec3::new(3, 3, 3));
    let mut leaves_d = vec![0u8; leaves_a.volume()];
    // 1 is a needle, 2 snow on top of one
    let mut layer = |leaves_d: &mut Vec<u8>, pr: &mut PseudoRandom, yy: i32, dev: i32| {
        for zz in -dev..=dev {
            for xx in -dev..=dev {
                if pr.range(0, 20) <= 19 - dev {
                    leaves_d[leaves_a.index(xx, yy, zz)] = 1;
                    leaves_d[leaves_a.index(xx, yy + 1, zz)] = 2;
                }
            }
        }
    };

    // Upper branches
    for (yy, dev) in [(-1, 3), (0, 2), (1, 1)] {
        layer(&mut leaves_d, &mut pr, yy, dev);
    }
    // Centre top
    leaves_d[leaves_a.index(0, 1, 0)] = 1;
    leaves_d[leaves_a.index(0, 2, 0)] = 1;
    leaves_d[leaves_a.index(0, 3, 0)] = 2;

    // Lower branches
    let mut my = -6;
    for _ in 0..20 {
        let xi = pr.range(-3, 2);
        let yy = pr.range(-6, -5);
        let zi = pr.range(-3, 2);
        my = my.max(yy);
        for zz in zi..=zi + 1 {
            for xx in xi..=xi + 1 {
                leaves_d[leaves_a.index(xx, yy, zz)] = 1;
                let above = leaves_a.index(xx, yy + 1, zz);
                if leaves_d[above] == 0 {
                    leaves_d[above] = 2;
                }
            }
        }
    }
    for (yy, dev) in [(my + 1, 2), (my + 2, 1)] {
        layer(&mut leaves_d, &mut pr, yy, dev);
    }

    for rel in leaves_a.iter() {
        let p = p1 + rel;
        if !vm.area.contains(p) {
            continue;
        }
        let c = vm.get_node_no_ex(p).content();
        if c != CONTENT_AIR && c != CONTENT_IGNORE && c != snow.content() {
            continue;
        }
        match leaves_d[leaves_a.index_p(rel)] {
            1 => vm.set_node(p, leaves),
            2 => vm.set_node(p, snow),
            _ => {}
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrunkType {
    #[default]
    Single,
    /// 2x2 trunk
    Double,
    /// Plus-shaped trunk
    Crossed,
}

/// An L-system tree
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TreeDef {
    pub initial_axiom: String,
    pub rules_a: String,
    pub rules_b: String,
    pub rules_c: String,
    pub rules_d: String,
    pub trunk: MapNode,
    pub leaves: MapNode,
    pub leaves2: MapNode,
    /// Percent of leaves drawn with `leaves2`
    pub leaves2_chance: i32,
    /// Turn angle in degrees
    pub angle: f32,
    pub iterations: i32,
    /// Up to this many iterations are randomly skipped
    pub iterations_random_level: i32,
    pub trunk_type: TrunkType,
    /// Branches stay one node thick for wide trunks
    pub thin_branches: bool,
    pub fruit: MapNode,
    /// Percent of leaves replaced by fruit
    pub fruit_chance: i32,
    /// Fixed seed; position-derived otherwise
    pub seed: Option<i32>,
}

impl TreeDef {
    pub fn new(axiom: impl Into<String>, trunk: MapNode, leaves: MapNode) -> Self {
        Self {
            initial_axiom: axiom.into(),
            rules_a: String::new(),
            rules_b: String::new(),
            rules_c: String::new(),
            rules_d: String::new(),
            trunk,
            leaves,
            leaves2: leaves,
            leaves2_chance: 0,
            angle: 30.0,
            iterations: 0,
            iterations_random_level: 0,
            trunk_type: TrunkType::Single,
            thin_branches: false,
            fruit: MapNode::new(CONTENT_AIR),
            fruit_chance: 0,
            seed: None,
        }
    }

    fn is_foliage(&self, n: MapNode) -> bool {
        n.content() == self.leaves.content() || n.content() == self.leaves2.content() || n.content() == self.fruit.content()
    }
}

/// Rewrite the axiom `iterations` times
fn expand_axiom(tree: &TreeDef, ps: &mut PseudoRandom) -> String {
    let mut iterations = tree.iterations;
    if tree.iterations_random_level > 0 {
        iterations -= ps.range(0, tree.iterations_random_level);
    }
    let mut axiom = tree.initial_axiom.clone();
    for _ in 0..iterations {
        let mut next = String::with_capacity(axiom.len() * 2);
        for ch in axiom.chars() {
            let (rule, chance) = match ch {
                'A' => (&tree.rules_a, 10),
                'B' => (&tree.rules_b, 10),
                'C' => (&tree.rules_c, 10),
                'D' => (&tree.rules_d, 10),
                'a' => (&tree.rules_a, 9),
                'b' => (&tree.rules_b, 8),
                'c' => (&tree.rules_c, 7),
                'd' => (&tree.rules_d, 6),
                _ => {
                    next.push(ch);
                    continue;
                }
            };
            if chance == 10 || ps.range(1, 10) <= chance {
                next.push_str(rule);
            }
        }
        axiom = next;
    }
    axiom
}

fn place_trunk(vm: &mut VoxelManipulator, p: Vec3, tree: &TreeDef) {
    let p = float_to_node(p);
    if !vm.area.contains(p) {
        return;
    }
    let current = vm.get_node_no_ex(p);
    if is_free(vm, p) || tree.is_foliage(current) {
        vm.set_node(p, tree.trunk);
    }
}

fn place_leaves(vm: &mut VoxelManipulator, p: Vec3, seed: u32, tree: &TreeDef) {
    let mut ps = PseudoRandom::new(seed as u64);
    let mut leaves = tree.leaves;
    if ps.range(1, 100) > 100 - tree.leaves2_chance {
        leaves = tree.leaves2;
    }
    let p = float_to_node(p);
    if !vm.area.contains(p) || !is_free(vm, p) {
        return;
    }
    if tree.fruit_chance > 0 {
        let n = if ps.range(1, 100) > 100 - tree.fruit_chance { tree.fruit } else { leaves };
        vm.set_node(p, n);
    } else if ps.range(1, 100) > 20 {
        vm.set_node(p, leaves);
    }
}

fn place_fruit(vm: &mut VoxelManipulator, p: Vec3, tree: &TreeDef) {
    let p = float_to_node(p);
    if vm.area.contains(p) && is_free(vm, p) {
        vm.set_node(p, tree.fruit);
    }
}

/// Extra trunk columns of a wide trunk around `p`
fn wide_trunk_offsets(kind: TrunkType) -> &'static [Vec3] {
    const DOUBLE: [Vec3; 3] = [Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0), Vec3::new(1.0, 0.0, 1.0)];
    const CROSSED: [Vec3; 4] =
        [Vec3::new(1.0, 0.0, 0.0), Vec3::new(-1.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 1.0), Vec3::new(0.0, 0.0, -1.0)];
    match kind {
        TrunkType::Single => &[],
        TrunkType::Double => &DOUBLE,
        TrunkType::Crossed => &CROSSED,
    }
}

/// Grow an L-system tree rooted at `p0`.
///
/// The turtle starts pointing up. `G` moves, `F` draws trunk and branches,
/// `T` draws trunk only, `f` draws leaves, `R` places fruit, `+ - & ^ * /`
/// turn around the z, y and x axes, and `[` `]` push and pop the turtle.
pub fn make_ltree(vm: &mut VoxelManipulator, p0: IVec3, tree: &TreeDef) -> Result<()> {
    let seed = match tree.seed {
        Some(s) => s.wrapping_add(14002),
        None => p0.x.wrapping_mul(2).wrapping_add(p0.y.wrapping_mul(4)).wrapping_add(p0.z),
    };
    let mut ps = PseudoRandom::new(seed as u32 as u64);
    let axiom = expand_axiom(tree, &mut ps);

    let angle = tree.angle.to_radians();
    let mut position = p0.as_vec3();
    let mut rotation = Mat3::from_rotation_z(FRAC_PI_2);
    let mut stack: Vec<(Mat3, Vec3)> = Vec::new();

    for ch in axiom.chars() {
        match ch {
            'G' => position += rotation * Vec3::X,
            'T' => {
                place_trunk(vm, position, tree);
                if !tree.thin_branches {
                    for off in wide_trunk_offsets(tree.trunk_type) {
                        place_trunk(vm, position + *off, tree);
                    }
                }
                position += rotation * Vec3::X;
            }
            'F' => {
                place_trunk(vm, position, tree);
                // The main trunk is always wide, branches only without thin_branches
                if stack.is_empty() || !tree.thin_branches {
                    for off in wide_trunk_offsets(tree.trunk_type) {
                        place_trunk(vm, position + *off, tree);
                    }
                }
                position += rotation * Vec3::X;
            }
            'f' => {
                let leaf_seed = ps.next();
                place_leaves(vm, position, leaf_seed, tree);
                position += rotation * Vec3::X;
            }
            'R' => {
                place_fruit(vm, position, tree);
                position += rotation * Vec3::X;
            }
            '[' => stack.push((rotation, position)),
            ']' => {
                let (r, p) = stack.pop().ok_or(Error::UnbalancedBrackets)?;
                rotation = r;
                position = p;
            }
            '+' => rotation *= Mat3::from_axis_angle(Vec3::Z, angle),
            '-' => rotation *= Mat3::from_axis_angle(Vec3::Z, -angle),
            '&' => rotation *= Mat3::from_axis_angle(Vec3::Y, angle),
            '^' => rotation *= Mat3::from_axis_angle(Vec3::Y, -angle),
            '*' => rotation *= Mat3::from_axis_angle(Vec3::X, angle),
            '/' => rotation *= Mat3::from_axis_angle(Vec3::X, -angle),
            _ => {}
        }
    }
    Ok(())
}

/// Grow an L-system tree in a live map: work on the 3x4x3 blocks around
/// `p0`, write back with lighting and report one event for all of it
pub fn spawn_ltree(map: &mut Map, p0: IVec3, tree: &TreeDef) -> Result<()> {
    let blockpos = node_to_block_pos(p0);
    let mut vm = MMVManip::new();
    vm.initial_emerge(map, blockpos - IVec3::ONE, blockpos + IVec3::new(1, 3, 1), false);
    make_ltree(&mut vm, p0, tree)?;

    let mut modified = HashSet::new();
    blit_back_with_light(map, &mut vm, &mut modified);
    map.dispatch_event(MapEditEvent::other(modified));
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::map::tests::filled_map;
    use crate::map::{MapAccess, MapEditEventType};

    fn air_vm() -> VoxelManipulator {
        let area = VoxelArea::new(IVec3::splat(-10), IVec3::splat(20));
        let mut vm = VoxelManipulator::with_area(area);
        for p in area.iter() {
            vm.set_node(p, MapNode::new(CONTENT_AIR));
        }
        vm
    }

    fn count(vm: &VoxelManipulator, c: u16) -> usize {
        vm.data.iter().filter(|n| n.content() == c).count()
    }

    #[test]
    fn test_default_tree_shape() {
        let defs = NodeDefManager::with_default_content();
        let tree = defs.get_id("default:tree").unwrap();
        let leaves = defs.get_id("default:leaves").unwrap();
        let mut vm = air_vm();
        make_tree(&mut vm, IVec3::ZERO, false, &defs, 42);
        let trunk = count(&vm, tree);
        assert!((4..=5).contains(&trunk));
        assert_eq!(vm.get_node_no_ex(IVec3::ZERO).content(), tree);
        // The forced 3x3x3 around the top minus the trunk itself
        assert!(count(&vm, leaves) >= 26 - 2);

        let mut again = air_vm();
        make_tree(&mut again, IVec3::ZERO, false, &defs, 42);
        assert_eq!(vm.data, again.data);
    }

    #[test]
    fn test_trees_keep_solid_ground() {
        let defs = NodeDefManager::with_default_content();
        let stone = defs.get_id("default:stone").unwrap();
        let mut vm = air_vm();
        for p in VoxelArea::new(IVec3::new(-10, 8, -10), IVec3::splat(20)).iter() {
            vm.set_node(p, MapNode::new(stone));
        }
        let before = count(&vm, stone);
        make_jungle_tree(&mut vm, IVec3::ZERO, &defs, 1);
        make_pine_tree(&mut vm, IVec3::new(5, 0, 5), &defs, 2);
        assert_eq!(count(&vm, stone), before);
    }

    #[test]
    fn test_ltree_straight_trunk() {
        let defs = NodeDefManager::with_default_content();
        let trunk = MapNode::new(defs.get_id("default:tree").unwrap());
        let leaves = MapNode::new(defs.get_id("default:leaves").unwrap());
        let mut def = TreeDef::new("TTTA", trunk, leaves);
        def.rules_a = "TT".to_string();
        def.iterations = 1;
        let mut vm = air_vm();
        make_ltree(&mut vm, IVec3::ZERO, &def).unwrap();
        for y in 0..5 {
            assert_eq!(vm.get_node_no_ex(IVec3::new(0, y, 0)), trunk, "y {y}");
        }
        assert_eq!(vm.get_node_no_ex(IVec3::new(0, 5, 0)).content(), CONTENT_AIR);
    }

    #[test]
    fn test_ltree_turns_and_brackets() {
        let defs = NodeDefManager::with_default_content();
        let trunk = MapNode::new(defs.get_id("default:tree").unwrap());
        let leaves = MapNode::new(defs.get_id("default:leaves").unwrap());
        let mut def = TreeDef::new("TT[+TT]T", trunk, leaves);
        def.angle = 90.0;
        let mut vm = air_vm();
        make_ltree(&mut vm, IVec3::ZERO, &def).unwrap();
        // Branch grows sideways from y = 2, trunk continues up
        assert_eq!(vm.get_node_no_ex(IVec3::new(0, 2, 0)), trunk);
        assert_eq!(vm.get_node_no_ex(IVec3::new(-1, 2, 0)), trunk);
        assert_eq!(vm.get_node_no_ex(IVec3::new(0, 3, 0)).content(), CONTENT_AIR);
        assert_eq!(count(&vm, trunk.content()), 4);
    }

    #[test]
    fn test_tree_def_json() {
        let defs = NodeDefManager::with_default_content();
        let trunk = MapNode::new(defs.get_id("default:tree").unwrap());
        let leaves = MapNode::with_params(defs.get_id("default:leaves").unwrap(), 0, 3);
        let mut def = TreeDef::new("TT[&A]", trunk, leaves);
        def.trunk_type = TrunkType::Crossed;
        let json = serde_json::to_string(&def).unwrap();
        let back: TreeDef = serde_json::from_str(&json).unwrap();
        assert_eq!(back.leaves, leaves);
        assert_eq!(back.trunk_type, TrunkType::Crossed);
        assert_eq!(back.initial_axiom, "TT[&A]");
    }

    #[test]
    fn test_ltree_unbalanced() {
        let defs = NodeDefManager::with_default_content();
        let trunk = MapNode::new(defs.get_id("default:tree").unwrap());
        let def = TreeDef::new("TT]", trunk, trunk);
        let mut vm = air_vm();
        assert!(matches!(make_ltree(&mut vm, IVec3::ZERO, &def), Err(Error::UnbalancedBrackets)));
    }

    #[test]
    fn test_spawn_ltree_emits_event() {
        let defs = Arc::new(NodeDefManager::with_default_content());
        let trunk = MapNode::new(defs.get_id("default:tree").unwrap());
        let mut map = filled_map(defs.clone(), 1, "air", false);
        let def = TreeDef::new("TTTT", trunk, trunk);
        spawn_ltree(&mut map, IVec3::new(2, 0, 2), &def).unwrap();
        assert_eq!(map.get_node_or_ignore(IVec3::new(2, 3, 2)), trunk);
        let events = map.take_events();
        let last = events.last().unwrap();
        assert_eq!(last.kind, MapEditEventType::Other);
        assert!(last.modified_blocks.contains(&IVec3::ZERO));
    }
}

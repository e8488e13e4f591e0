//! MapNode: one voxel cell
//!
//! A node is a 16-bit content id plus two parameter bytes. `param1` usually
//! stores light (day in the low nibble, night in the high nibble); `param2`
//! is interpreted according to the content's `ParamType2`.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::{IVec3, Result, Vec3};
use crate::math::Aabb;
use super::nodedef::{ContentFeatures, LiquidType, NodeBox, NodeDefManager, ParamType, ParamType2};

/// Render-time placeholder for undefined content
pub const CONTENT_UNKNOWN: u16 = 125;
/// Empty space
pub const CONTENT_AIR: u16 = 126;
/// Unknown or ungenerated; never written back into the map
pub const CONTENT_IGNORE: u16 = 127;

/// Brightest artificial light level
pub const LIGHT_MAX: u8 = 14;
/// Sunlight, one above LIGHT_MAX, only carried by the day bank
pub const LIGHT_SUN: u8 = 15;

pub const LIQUID_LEVEL_MASK: u8 = 0x07;
pub const LIQUID_LEVEL_MAX: u8 = 7;
pub const LIQUID_LEVEL_SOURCE: u8 = 8;
pub const LIQUID_FLOW_DOWN_MASK: u8 = 0x08;
pub const LEVELED_MASK: u8 = 0x7f;

/// Light bank selector
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LightBank {
    Day,
    Night,
}

impl LightBank {
    pub const ALL: [LightBank; 2] = [LightBank::Day, LightBank::Night];

    fn shift(self) -> u8 {
        match self {
            LightBank::Day => 0,
            LightBank::Night => 4,
        }
    }
}

/// Quarter turns around the Y axis
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rotation {
    R0 = 0,
    R90 = 1,
    R180 = 2,
    R270 = 3,
}

/// Wallmounted value to facedir, used when rotating fixed boxes
const WALLMOUNTED_TO_FACEDIR: [u8; 8] = [20, 0, 17, 15, 8, 6, 20, 0];

/// Direction each wallmounted value points at (the wall it is attached to)
pub const WALLMOUNTED_DIRS: [IVec3; 8] = [
    IVec3::new(0, 1, 0),
    IVec3::new(0, -1, 0),
    IVec3::new(1, 0, 0),
    IVec3::new(-1, 0, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(0, 0, -1),
    IVec3::new(0, 1, 0),
    IVec3::new(0, -1, 0),
];

/// Side wallmounted values indexed by their Y rotation relative to -X
const ROT_TO_WALLMOUNTED: [u8; 4] = [3, 4, 2, 5];

/// Neighbour order for connected node boxes (+y, -y, -z, -x, +z, +x)
pub const CONNECT_DIRS: [IVec3; 6] = [
    IVec3::new(0, 1, 0),
    IVec3::new(0, -1, 0),
    IVec3::new(0, 0, -1),
    IVec3::new(-1, 0, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(1, 0, 0),
];

/// Anything that can answer "which node is at p" without failing
pub trait NodeContainer {
    fn get_node_no_ex(&self, p: IVec3) -> MapNode;
}

/// 3x3 integer rotation as images of the basis vectors
type Orientation = [IVec3; 3];

fn apply(m: &Orientation, v: IVec3) -> IVec3 {
    m[0] * v.x + m[1] * v.y + m[2] * v.z
}

fn compose(a: &Orientation, b: &Orientation) -> Orientation {
    [apply(a, b[0]), apply(a, b[1]), apply(a, b[2])]
}

/// Quarter turn around +Y: (x, y, z) -> (z, y, -x)
const ROT_Y: Orientation = [IVec3::new(0, 0, -1), IVec3::new(0, 1, 0), IVec3::new(1, 0, 0)];

/// Rotations taking +Y to each facedir axis (+Y, +Z, -Z, +X, -X, -Y)
const AXIS_ROT: [Orientation; 6] = [
    [IVec3::X, IVec3::Y, IVec3::Z],
    [IVec3::X, IVec3::Z, IVec3::NEG_Y],
    [IVec3::X, IVec3::NEG_Z, IVec3::Y],
    [IVec3::NEG_Y, IVec3::X, IVec3::Z],
    [IVec3::Y, IVec3::NEG_X, IVec3::Z],
    [IVec3::X, IVec3::NEG_Y, IVec3::NEG_Z],
];

fn y_rotation(turns: u8) -> Orientation {
    let mut m = [IVec3::X, IVec3::Y, IVec3::Z];
    for _ in 0..(turns & 3) {
        m = compose(&ROT_Y, &m);
    }
    m
}

/// Orientation matrix for a facedir value (0..24)
fn facedir_orientation(facedir: u8) -> Orientation {
    let facedir = facedir % 24;
    compose(&AXIS_ROT[(facedir / 4) as usize], &y_rotation(facedir % 4))
}

fn facedir_tables() -> &'static ([Orientation; 24], [u8; 96]) {
    static TABLES: OnceLock<([Orientation; 24], [u8; 96])> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut mats = [[IVec3::ZERO; 3]; 24];
        for (f, m) in mats.iter_mut().enumerate() {
            *m = facedir_orientation(f as u8);
        }
        let mut rotate = [0u8; 96];
        for f in 0..24 {
            for rot in 0..4u8 {
                let target = compose(&y_rotation(rot), &mats[f]);
                let found = mats.iter().position(|m| *m == target).unwrap_or(f);
                rotate[f * 4 + rot as usize] = found as u8;
            }
        }
        (mats, rotate)
    })
}

/// Direction the front (+Z side) of a facedir node points to
pub fn facedir_to_dir(facedir: u8) -> IVec3 {
    apply(&facedir_tables().0[(facedir % 24) as usize], IVec3::Z)
}

fn transform_box(b: &Aabb, m: &Orientation) -> Aabb {
    let mf = |v: Vec3| {
        let x = m[0].as_vec3();
        let y = m[1].as_vec3();
        let z = m[2].as_vec3();
        x * v.x + y * v.y + z * v.z
    };
    let mut out = Aabb::new(mf(b.min), mf(b.max));
    out.repair();
    out
}

/// One voxel cell
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MapNode {
    pub param0: u16,
    pub param1: u8,
    pub param2: u8,
}

impl Default for MapNode {
    fn default() -> Self {
        Self::new(CONTENT_AIR)
    }
}

impl MapNode {
    pub const fn new(content: u16) -> Self {
        Self { param0: content, param1: 0, param2: 0 }
    }

    pub const fn with_params(content: u16, param1: u8, param2: u8) -> Self {
        Self { param0: content, param1, param2 }
    }

    pub const fn ignore() -> Self {
        Self::new(CONTENT_IGNORE)
    }

    #[inline]
    pub fn content(&self) -> u16 {
        self.param0
    }

    #[inline]
    pub fn set_content(&mut self, c: u16) {
        self.param0 = c;
    }

    #[inline]
    pub fn param1(&self) -> u8 {
        self.param1
    }

    #[inline]
    pub fn param2(&self) -> u8 {
        self.param2
    }

    pub fn set_param1(&mut self, v: u8) {
        self.param1 = v;
    }

    pub fn set_param2(&mut self, v: u8) {
        self.param2 = v;
    }

    pub fn is_ignore(&self) -> bool {
        self.param0 == CONTENT_IGNORE
    }

    /* Light */

    /// Stored light of a bank, 0 for nodes that don't store light
    pub fn light_raw(&self, bank: LightBank, f: &ContentFeatures) -> u8 {
        if f.param_type == ParamType::Light {
            (self.param1 >> bank.shift()) & 0x0f
        } else {
            0
        }
    }

    /// Stored light ignoring the param type
    #[inline]
    pub fn light_no_checks(&self, bank: LightBank, f: &ContentFeatures) -> u8 {
        ((self.param1 >> bank.shift()) & 0x0f).max(f.light_source)
    }

    /// Effective light: max of light source and stored value
    pub fn get_light(&self, bank: LightBank, f: &ContentFeatures) -> u8 {
        f.light_source.max(self.light_raw(bank, f))
    }

    pub fn set_light(&mut self, bank: LightBank, level: u8, f: &ContentFeatures) {
        if f.param_type == ParamType::Light {
            let shift = bank.shift();
            self.param1 = (self.param1 & !(0x0f << shift)) | ((level & 0x0f) << shift);
        }
    }

    /// Effective (day, night) light
    pub fn light_banks(&self, f: &ContentFeatures) -> (u8, u8) {
        (self.get_light(LightBank::Day, f), self.get_light(LightBank::Night, f))
    }

    /// Day and night light blended by a day-night ratio in 0..=1000
    pub fn light_blend(&self, daylight_factor: u32, f: &ContentFeatures) -> u8 {
        let (day, night) = self.light_banks(f);
        blend_light(daylight_factor, day, night)
    }

    pub fn is_light_day_night_eq(&self, f: &ContentFeatures) -> bool {
        if f.param_type != ParamType::Light {
            return true;
        }
        let day = f.light_source.max(self.param1 & 0x0f);
        let night = f.light_source.max((self.param1 >> 4) & 0x0f);
        day == night
    }

    /* Rotation */

    /// Facedir value (0..24); wallmounted nodes are converted when allowed
    pub fn face_dir(&self, f: &ContentFeatures, allow_wallmounted: bool) -> u8 {
        match f.param_type2 {
            ParamType2::FaceDir | ParamType2::ColorFaceDir => {
                let v = self.param2 & 0x1f;
                if v >= 24 { 0 } else { v }
            }
            ParamType2::WallMounted | ParamType2::ColorWallMounted if allow_wallmounted => {
                WALLMOUNTED_TO_FACEDIR[(self.param2 & 0x07) as usize]
            }
            _ => 0,
        }
    }

    /// Raw wallmounted value (0..8)
    pub fn wall_mounted(&self, f: &ContentFeatures) -> u8 {
        match f.param_type2 {
            ParamType2::WallMounted | ParamType2::ColorWallMounted => self.param2 & 0x07,
            _ => 0,
        }
    }

    pub fn wall_mounted_dir(&self, f: &ContentFeatures) -> IVec3 {
        WALLMOUNTED_DIRS[self.wall_mounted(f) as usize]
    }

    /// Rotation in degrees
    pub fn deg_rotate(&self, f: &ContentFeatures) -> f32 {
        match f.param_type2 {
            ParamType2::DegRotate => (self.param2 % 240) as f32 * 1.5,
            ParamType2::ColorDegRotate => ((self.param2 & 0x1f) % 24) as f32 * 15.0,
            _ => 0.0,
        }
    }

    /// Rotate in place around the Y axis according to the param2 family
    pub fn rotate_along_y_axis(&mut self, f: &ContentFeatures, rot: Rotation) {
        let rot = rot as u8;
        match f.param_type2 {
            ParamType2::FaceDir | ParamType2::ColorFaceDir => {
                let facedir = (self.param2 & 0x1f) % 24;
                let rotated = facedir_tables().1[(facedir * 4 + rot) as usize];
                self.param2 = (self.param2 & !0x1f) | rotated;
            }
            ParamType2::WallMounted | ParamType2::ColorWallMounted => {
                let wm = self.param2 & 0x07;
                // Floor and ceiling (and their rotated variants) are fixed points
                if wm <= 1 || wm >= 6 {
                    return;
                }
                let Some(old) = ROT_TO_WALLMOUNTED.iter().position(|&w| w == wm) else {
                    return;
                };
                let new = ROT_TO_WALLMOUNTED[(old as u8 + rot) as usize & 3];
                self.param2 = (self.param2 & !0x07) | new;
            }
            ParamType2::DegRotate => {
                let angle = (self.param2 as u32 % 240 + 60 * rot as u32) % 240;
                self.param2 = angle as u8;
            }
            ParamType2::ColorDegRotate => {
                let angle = ((self.param2 & 0x1f) as u32 % 24 + 6 * rot as u32) % 24;
                self.param2 = (self.param2 & 0xe0) | angle as u8;
            }
            _ => {}
        }
    }

    /* Shapes */

    /// Mask of connected neighbours in (+y,-y,-z,-x,+z,+x) order
    pub fn get_neighbors<M: NodeContainer + ?Sized>(&self, p: IVec3, map: &M, defs: &NodeDefManager) -> u8 {
        let f = defs.get_node(*self);
        if !matches!(f.node_box, NodeBox::Connected { .. }) {
            return 0;
        }
        let mut mask = 0u8;
        for (i, d) in CONNECT_DIRS.iter().enumerate() {
            let bit = 1u8 << i;
            let other = map.get_node_no_ex(p + *d);
            if defs.nodebox_connects(*self, other, bit) {
                mask |= bit;
            }
        }
        mask
    }

    fn transform_boxes(&self, nb: &NodeBox, f: &ContentFeatures, neighbors: u8, out: &mut Vec<Aabb>) {
        match nb {
            NodeBox::Regular => out.push(Aabb::full_node()),
            NodeBox::Fixed(boxes) => {
                let m = facedir_tables().0[self.face_dir(f, true) as usize];
                out.extend(boxes.iter().map(|b| transform_box(b, &m)));
            }
            NodeBox::Leveled(boxes) => {
                let level = self.get_level(f) as f32;
                let m = facedir_tables().0[self.face_dir(f, true) as usize];
                for (i, b) in boxes.iter().enumerate() {
                    let mut b = *b;
                    if i == 0 {
                        b.max.y = -0.5 + level / 64.0;
                    }
                    out.push(transform_box(&b, &m));
                }
            }
            NodeBox::WallMounted { top, bottom, side } => {
                let b = match self.wall_mounted(f) {
                    0 | 6 => *top,
                    1 | 7 => *bottom,
                    wm => {
                        let turns = ROT_TO_WALLMOUNTED.iter().position(|&w| w == wm).unwrap_or(0);
                        side.rotated_y(turns as u8)
                    }
                };
                out.push(b);
            }
            NodeBox::Connected { fixed, connect } => {
                out.extend(fixed.iter().copied());
                for (i, boxes) in connect.iter().enumerate() {
                    if neighbors & (1 << i) != 0 {
                        out.extend(boxes.iter().copied());
                    }
                }
            }
        }
    }

    /// Visual boxes in node-local coordinates
    pub fn node_boxes(&self, defs: &NodeDefManager, neighbors: u8) -> Vec<Aabb> {
        let f = defs.get_node(*self);
        let mut out = Vec::new();
        self.transform_boxes(&f.node_box, f, neighbors, &mut out);
        out
    }

    /// Collision boxes; empty for non-walkable nodes
    pub fn collision_boxes(&self, defs: &NodeDefManager, neighbors: u8) -> Vec<Aabb> {
        let f = defs.get_node(*self);
        let mut out = Vec::new();
        if f.walkable {
            self.transform_boxes(f.collision_box.as_ref().unwrap_or(&f.node_box), f, neighbors, &mut out);
        }
        out
    }

    pub fn selection_boxes(&self, defs: &NodeDefManager, neighbors: u8) -> Vec<Aabb> {
        let f = defs.get_node(*self);
        let mut out = Vec::new();
        self.transform_boxes(f.selection_box.as_ref().unwrap_or(&f.node_box), f, neighbors, &mut out);
        out
    }

    /* Levels */

    pub fn get_max_level(&self, f: &ContentFeatures) -> u8 {
        if f.liquid_type == LiquidType::Flowing || f.param_type2 == ParamType2::FlowingLiquid {
            LIQUID_LEVEL_MAX
        } else if f.leveled > 0 || f.param_type2 == ParamType2::Leveled {
            f.leveled_max
        } else {
            0
        }
    }

    pub fn get_level(&self, f: &ContentFeatures) -> u8 {
        if f.liquid_type == LiquidType::Source {
            return LIQUID_LEVEL_SOURCE;
        }
        if f.param_type2 == ParamType2::FlowingLiquid || f.liquid_type == LiquidType::Flowing {
            return self.param2 & LIQUID_LEVEL_MASK;
        }
        if f.param_type2 == ParamType2::Leveled {
            let level = self.param2 & LEVELED_MASK;
            if level != 0 {
                return level;
            }
        }
        f.leveled.min(f.leveled_max)
    }

    /// Set the level, converting liquids between source and flowing forms.
    /// Returns the amount that did not fit.
    pub fn set_level(&mut self, f: &ContentFeatures, level: i16) -> i16 {
        let mut rest = 0;
        if f.param_type2 == ParamType2::FlowingLiquid || f.is_liquid() {
            if level <= 0 {
                self.set_content(CONTENT_AIR);
                return 0;
            }
            if level >= LIQUID_LEVEL_SOURCE as i16 {
                rest = level - LIQUID_LEVEL_SOURCE as i16;
                self.set_content(f.liquid_alternative_source_id);
                self.param2 = 0;
            } else {
                self.set_content(f.liquid_alternative_flowing_id);
                self.param2 = (level as u8 & LIQUID_LEVEL_MASK) | (self.param2 & !LIQUID_LEVEL_MASK);
            }
        } else if f.param_type2 == ParamType2::Leveled {
            let mut level = level;
            if level < 0 {
                rest = level;
                level = 0;
            } else if level > f.leveled_max as i16 {
                rest = level - f.leveled_max as i16;
                level = f.leveled_max as i16;
            }
            self.param2 = (level as u8 & LEVELED_MASK) | (self.param2 & !LEVELED_MASK);
        }
        rest
    }

    pub fn add_level(&mut self, f: &ContentFeatures, add: i16) -> i16 {
        let level = self.get_level(f) as i16 + add;
        self.set_level(f, level)
    }

    /* Serialization */

    /// Fixed 4-byte form: u16 content, u8 param1, u8 param2
    pub fn serialize(&self) -> [u8; 4] {
        let c = self.param0.to_be_bytes();
        [c[0], c[1], self.param1, self.param2]
    }

    pub fn deserialize(bytes: [u8; 4]) -> Self {
        Self {
            param0: u16::from_be_bytes([bytes[0], bytes[1]]),
            param1: bytes[2],
            param2: bytes[3],
        }
    }

    /// Bulk form: content array, then param1 array, then param2 array
    pub fn serialize_bulk(nodes: &[MapNode], content_width: u8, params_width: u8) -> Result<Vec<u8>> {
        if content_width != 2 || params_width != 2 {
            return Err(Error::Serialization(format!(
                "cannot write bulk nodes with widths {}/{}",
                content_width, params_width
            )));
        }
        let n = nodes.len();
        let mut out = vec![0u8; n * 4];
        let (content, params) = out.split_at_mut(n * 2);
        let (p1, p2) = params.split_at_mut(n);
        for (i, node) in nodes.iter().enumerate() {
            content[i * 2..i * 2 + 2].copy_from_slice(&node.param0.to_be_bytes());
            p1[i] = node.param1;
            p2[i] = node.param2;
        }
        Ok(out)
    }

    /// Decode `count` nodes from the bulk form. A content width of 1 is the
    /// pre-24 layout where ids above 0x7f borrow the high nibble of param2.
    pub fn deserialize_bulk(data: &[u8], count: usize, content_width: u8, params_width: u8) -> Result<Vec<MapNode>> {
        if !(content_width == 1 || content_width == 2) || params_width != 2 {
            return Err(Error::Serialization(format!(
                "unsupported bulk node widths {}/{}",
                content_width, params_width
            )));
        }
        let cw = content_width as usize;
        let needed = count * (cw + 2);
        if data.len() < needed {
            return Err(Error::Serialization(format!(
                "bulk node data too short: {} < {}",
                data.len(),
                needed
            )));
        }
        let p1 = &data[count * cw..count * (cw + 1)];
        let p2 = &data[count * (cw + 1)..needed];
        let mut nodes = Vec::with_capacity(count);
        for i in 0..count {
            let mut n = MapNode::with_params(0, p1[i], p2[i]);
            if cw == 2 {
                n.param0 = u16::from_be_bytes([data[i * 2], data[i * 2 + 1]]);
            } else {
                n.param0 = data[i] as u16;
                if n.param0 > 0x7f {
                    n.param0 = (n.param0 << 4) | ((n.param2 >> 4) & 0x0f) as u16;
                    n.param2 &= 0x0f;
                }
            }
            nodes.push(n);
        }
        Ok(nodes)
    }
}

/// Blend day and night light by a factor in 0..=1000
pub fn blend_light(daylight_factor: u32, day: u8, night: u8) -> u8 {
    let c = 1000u32;
    let l = (daylight_factor * day as u32 + (c - daylight_factor.min(c)) * night as u32) / c;
    l.min(LIGHT_SUN as u32) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs() -> NodeDefManager {
        NodeDefManager::with_default_content()
    }

    #[test]
    fn test_light_nibbles() {
        let d = defs();
        let air = d.get(CONTENT_AIR);
        let mut n = MapNode::new(CONTENT_AIR);
        n.set_light(LightBank::Day, LIGHT_SUN, air);
        n.set_light(LightBank::Night, 3, air);
        assert_eq!(n.light_raw(LightBank::Day, air), 15);
        assert_eq!(n.light_raw(LightBank::Night, air), 3);
        assert_eq!(n.param1, 0x3f);
        assert!(!n.is_light_day_night_eq(air));
    }

    #[test]
    fn test_light_source_dominates() {
        let d = defs();
        let torch_id = d.get_id("default:torch").unwrap();
        let f = d.get(torch_id);
        let n = MapNode::new(torch_id);
        assert_eq!(n.get_light(LightBank::Night, f), 13);
        assert!(n.is_light_day_night_eq(f));

        let stone = MapNode::with_params(d.get_id("default:stone").unwrap(), 0xff, 0);
        // Opaque non-light nodes report no stored light
        assert_eq!(stone.get_light(LightBank::Day, d.get_node(stone)), 0);
    }

    #[test]
    fn test_light_blend() {
        assert_eq!(blend_light(1000, 15, 0), 15);
        assert_eq!(blend_light(0, 15, 4), 4);
        assert_eq!(blend_light(500, 10, 4), 7);
    }

    #[test]
    fn test_rotation_four_times_identity() {
        let d = defs();
        let stair = d.get(d.get_id("stairs:stair_cobble").unwrap());
        let torch = d.get(d.get_id("default:torch").unwrap());
        let mut deg = ContentFeatures::default();
        deg.param_type2 = ParamType2::DegRotate;
        let mut cdeg = ContentFeatures::default();
        cdeg.param_type2 = ParamType2::ColorDegRotate;

        for f in [stair, torch, &deg, &cdeg] {
            for p2 in 0..=255u8 {
                for rot in [Rotation::R90, Rotation::R180, Rotation::R270] {
                    let start = MapNode::with_params(1, 0, p2);
                    let mut n = start;
                    for _ in 0..4 {
                        n.rotate_along_y_axis(f, rot);
                    }
                    let mut once = start;
                    once.rotate_along_y_axis(f, Rotation::R0);
                    assert_eq!(n.param2, once.param2, "p2={} rot={:?}", p2, rot);
                }
            }
        }
    }

    #[test]
    fn test_facedir_rotation_is_bijection() {
        let d = defs();
        let f = d.get(d.get_id("stairs:stair_cobble").unwrap());
        for rot in [Rotation::R90, Rotation::R180, Rotation::R270] {
            let mut seen = [false; 24];
            for fd in 0..24u8 {
                let mut n = MapNode::with_params(1, 0, fd);
                n.rotate_along_y_axis(f, rot);
                assert!(n.param2 < 24);
                assert!(!seen[n.param2 as usize]);
                seen[n.param2 as usize] = true;
            }
        }
        // Upright facedirs just cycle
        let mut n = MapNode::with_params(1, 0, 3);
        n.rotate_along_y_axis(f, Rotation::R90);
        assert_eq!(n.param2, 0);
    }

    #[test]
    fn test_facedir_directions() {
        assert_eq!(facedir_to_dir(0), IVec3::Z);
        assert_eq!(facedir_to_dir(1), IVec3::X);
        assert_eq!(facedir_to_dir(2), IVec3::NEG_Z);
        assert_eq!(facedir_to_dir(3), IVec3::NEG_X);
    }

    #[test]
    fn test_wallmounted_rotation() {
        let d = defs();
        let f = d.get(d.get_id("default:torch").unwrap());
        let mut n = MapNode::with_params(1, 0, 1);
        n.rotate_along_y_axis(f, Rotation::R90);
        assert_eq!(n.param2, 1);
        let mut n = MapNode::with_params(1, 0, 3);
        n.rotate_along_y_axis(f, Rotation::R90);
        assert_eq!(n.wall_mounted_dir(f), IVec3::Z);
    }

    #[test]
    fn test_liquid_levels() {
        let d = defs();
        let src = d.get_id("default:water_source").unwrap();
        let flowing = d.get_id("default:water_flowing").unwrap();

        let n = MapNode::new(src);
        assert_eq!(n.get_level(d.get(src)), LIQUID_LEVEL_SOURCE);

        let mut n = MapNode::with_params(flowing, 0, 5);
        assert_eq!(n.get_level(d.get(flowing)), 5);
        let rest = n.set_level(d.get(flowing), 10);
        assert_eq!(rest, 2);
        assert_eq!(n.content(), src);

        let mut n = MapNode::new(src);
        n.set_level(d.get(src), 3);
        assert_eq!(n.content(), flowing);
        assert_eq!(n.param2 & LIQUID_LEVEL_MASK, 3);

        let mut n = MapNode::with_params(flowing, 0, 1);
        n.add_level(d.get(flowing), -1);
        assert_eq!(n.content(), CONTENT_AIR);
    }

    #[test]
    fn test_leveled_node() {
        let d = defs();
        let snow = d.get_id("default:snow").unwrap();
        let f = d.get(snow);
        let mut n = MapNode::new(snow);
        assert_eq!(n.get_level(f), 8);
        assert_eq!(n.set_level(f, 100), 36);
        assert_eq!(n.get_level(f), 64);
        let boxes = n.node_boxes(&d, 0);
        assert_eq!(boxes.len(), 1);
        assert!((boxes[0].max.y - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_bulk_round_trip() {
        let nodes: Vec<MapNode> = (0..100u16)
            .map(|i| MapNode::with_params(i * 300, (i * 7) as u8, (i * 13) as u8))
            .collect();
        let data = MapNode::serialize_bulk(&nodes, 2, 2).unwrap();
        assert_eq!(data.len(), 400);
        let back = MapNode::deserialize_bulk(&data, 100, 2, 2).unwrap();
        assert_eq!(back, nodes);
        assert!(MapNode::deserialize_bulk(&data[..10], 100, 2, 2).is_err());
    }

    #[test]
    fn test_legacy_content_width() {
        // One node: content byte 0x80, param1 0, param2 0x35
        let data = [0x80, 0x00, 0x35];
        let nodes = MapNode::deserialize_bulk(&data, 1, 1, 2).unwrap();
        assert_eq!(nodes[0].param0, 0x803);
        assert_eq!(nodes[0].param2, 0x05);
    }

    #[test]
    fn test_single_node_serialize() {
        let n = MapNode::with_params(0x1234, 5, 6);
        assert_eq!(n.serialize(), [0x12, 0x34, 5, 6]);
        assert_eq!(MapNode::deserialize(n.serialize()), n);
    }

    struct Grid(Vec<(IVec3, MapNode)>);

    impl NodeContainer for Grid {
        fn get_node_no_ex(&self, p: IVec3) -> MapNode {
            self.0.iter().find(|(q, _)| *q == p).map(|(_, n)| *n).unwrap_or(MapNode::new(CONTENT_AIR))
        }
    }

    #[test]
    fn test_connected_neighbors() {
        let d = defs();
        let fence = MapNode::new(d.get_id("default:fence_wood").unwrap());
        let grid = Grid(vec![(IVec3::new(1, 0, 0), fence), (IVec3::new(0, 0, -1), fence)]);
        let mask = fence.get_neighbors(IVec3::ZERO, &grid, &d);
        assert_eq!(mask, (1 << 5) | (1 << 2));
        assert_eq!(fence.node_boxes(&d, mask).len(), 3);
    }
}

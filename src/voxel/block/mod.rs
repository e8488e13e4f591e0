//! MapBlock: a 16x16x16 chunk of nodes with its auxiliary tables

pub mod legacy;
pub mod metadata;
pub mod serialize;
pub mod static_object;
pub mod timer;

use std::collections::BTreeMap;

use crate::core::error::Error;
use crate::core::types::{IVec2, IVec3, Result};
use crate::core::types::{block_node_index, block_to_node_pos, MAP_BLOCKSIZE, NODES_PER_BLOCK};
use super::area::VoxelArea;
use super::manip::VoxelManipulator;
use super::node::{LightBank, MapNode, CONTENT_AIR};
use super::nodedef::NodeDefManager;

pub use metadata::{NodeMetadata, NodeMetadataList};
pub use static_object::{StaticObject, StaticObjectList};
pub use timer::{NodeTimer, NodeTimerList};

/// Timestamp of a block that was never stamped
pub const BLOCK_TIMESTAMP_UNDEFINED: u32 = 0xffff_ffff;

/// Every face of both banks is known consistent
pub const LIGHTING_COMPLETE_ALL: u16 = 0xffff;

/// Ground level sentinel: no walkable node in the column
pub const GROUND_LEVEL_NONE: i16 = -1;
/// Ground level sentinel: the topmost node is already walkable
pub const GROUND_LEVEL_ABOVE: i16 = -2;

/// How urgently a block needs to be written to the database
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ModifiedState {
    Clean = 0,
    WriteAtUnload = 2,
    WriteNeeded = 4,
}

pub const MOD_REASON_REALLOCATE: u32 = 1 << 0;
pub const MOD_REASON_SET_IS_UNDERGROUND: u32 = 1 << 1;
pub const MOD_REASON_SET_LIGHTING_COMPLETE: u32 = 1 << 2;
pub const MOD_REASON_SET_GENERATED: u32 = 1 << 3;
pub const MOD_REASON_SET_NODE: u32 = 1 << 4;
pub const MOD_REASON_SET_NODE_NO_CHECK: u32 = 1 << 5;
pub const MOD_REASON_SET_TIMESTAMP: u32 = 1 << 6;
pub const MOD_REASON_REPORT_META_CHANGE: u32 = 1 << 7;
pub const MOD_REASON_CLEAR_ALL_OBJECTS: u32 = 1 << 8;
pub const MOD_REASON_BLOCK_EXPIRED: u32 = 1 << 9;
pub const MOD_REASON_ADD_ACTIVE_OBJECT_RAW: u32 = 1 << 10;
pub const MOD_REASON_REMOVE_OBJECTS_REMOVE: u32 = 1 << 11;
pub const MOD_REASON_REMOVE_OBJECTS_DEACTIVATE: u32 = 1 << 12;
pub const MOD_REASON_EXPIRE_DAYNIGHTDIFF: u32 = 1 << 13;
pub const MOD_REASON_VMANIP: u32 = 1 << 14;
pub const MOD_REASON_STATIC_DATA_ADDED: u32 = 1 << 15;
pub const MOD_REASON_STATIC_DATA_REMOVED: u32 = 1 << 16;
pub const MOD_REASON_STATIC_DATA_CHANGED: u32 = 1 << 17;
pub const MOD_REASON_NODE_TIMER: u32 = 1 << 18;
pub const MOD_REASON_UNKNOWN: u32 = 1 << 19;

const MOD_REASON_NAMES: [(u32, &str); 20] = [
    (MOD_REASON_REALLOCATE, "reallocate"),
    (MOD_REASON_SET_IS_UNDERGROUND, "setIsUnderground"),
    (MOD_REASON_SET_LIGHTING_COMPLETE, "setLightingComplete"),
    (MOD_REASON_SET_GENERATED, "setGenerated"),
    (MOD_REASON_SET_NODE, "setNode"),
    (MOD_REASON_SET_NODE_NO_CHECK, "setNodeNoCheck"),
    (MOD_REASON_SET_TIMESTAMP, "setTimestamp"),
    (MOD_REASON_REPORT_META_CHANGE, "reportMetadataChange"),
    (MOD_REASON_CLEAR_ALL_OBJECTS, "clearAllObjects"),
    (MOD_REASON_BLOCK_EXPIRED, "blockExpired"),
    (MOD_REASON_ADD_ACTIVE_OBJECT_RAW, "addActiveObjectRaw"),
    (MOD_REASON_REMOVE_OBJECTS_REMOVE, "removeRemovedObjects/remove"),
    (MOD_REASON_REMOVE_OBJECTS_DEACTIVATE, "removeRemovedObjects/deactivate"),
    (MOD_REASON_EXPIRE_DAYNIGHTDIFF, "expireDayNightDiff"),
    (MOD_REASON_VMANIP, "VoxelManipulator"),
    (MOD_REASON_STATIC_DATA_ADDED, "staticData/added"),
    (MOD_REASON_STATIC_DATA_REMOVED, "staticData/removed"),
    (MOD_REASON_STATIC_DATA_CHANGED, "staticData/changed"),
    (MOD_REASON_NODE_TIMER, "nodeTimer"),
    (MOD_REASON_UNKNOWN, "unknown"),
];

/// Bit in the lighting-complete mask for a bank and a face (FACE_DIRS order)
pub fn lighting_complete_bit(bank: LightBank, face: usize) -> u16 {
    let bank_offset = match bank {
        LightBank::Day => 0,
        LightBank::Night => 6,
    };
    1 << (face + bank_offset)
}

/// Fixed-size chunk of the map
#[derive(Clone, Debug)]
pub struct MapBlock {
    pos: IVec3,
    nodes: Vec<MapNode>,
    pub metadata: NodeMetadataList,
    pub node_timers: NodeTimerList,
    pub static_objects: StaticObjectList,
    /// Names of cells that could not be resolved at load, kept so that the
    /// cell is written back under its original name
    unresolved: BTreeMap<u16, String>,
    timestamp: u32,
    disk_timestamp: u32,
    is_underground: bool,
    generated: bool,
    lighting_complete: u16,
    day_night_differs: bool,
    day_night_differs_expired: bool,
    modified: ModifiedState,
    modified_reason: u32,
    refcount: u32,
    usage_timer: f32,
}

impl MapBlock {
    /// New block at block position `pos`, every cell IGNORE
    pub fn new(pos: IVec3) -> Self {
        Self {
            pos,
            nodes: vec![MapNode::ignore(); NODES_PER_BLOCK],
            metadata: NodeMetadataList::new(),
            node_timers: NodeTimerList::new(),
            static_objects: StaticObjectList::new(),
            unresolved: BTreeMap::new(),
            timestamp: BLOCK_TIMESTAMP_UNDEFINED,
            disk_timestamp: BLOCK_TIMESTAMP_UNDEFINED,
            is_underground: false,
            generated: false,
            lighting_complete: LIGHTING_COMPLETE_ALL,
            day_night_differs: false,
            day_night_differs_expired: true,
            modified: ModifiedState::WriteNeeded,
            modified_reason: MOD_REASON_REALLOCATE,
            refcount: 0,
            usage_timer: 0.0,
        }
    }

    /// Block position
    pub fn pos(&self) -> IVec3 {
        self.pos
    }

    /// Node position of the lowest corner
    pub fn node_origin(&self) -> IVec3 {
        block_to_node_pos(self.pos)
    }

    /// Node area covered by this block
    pub fn node_area(&self) -> VoxelArea {
        let min = self.node_origin();
        VoxelArea::new(min, min + IVec3::splat(MAP_BLOCKSIZE - 1))
    }

    pub fn is_valid_position(rel: IVec3) -> bool {
        rel.cmpge(IVec3::ZERO).all() && rel.cmplt(IVec3::splat(MAP_BLOCKSIZE)).all()
    }

    pub fn nodes(&self) -> &[MapNode] {
        &self.nodes
    }

    /* Node access */

    pub fn get_node(&self, rel: IVec3) -> Result<MapNode> {
        if !Self::is_valid_position(rel) {
            return Err(Error::InvalidPosition(rel));
        }
        Ok(self.nodes[block_node_index(rel)])
    }

    pub fn get_node_no_ex(&self, rel: IVec3) -> MapNode {
        self.get_node(rel).unwrap_or(MapNode::ignore())
    }

    /// Read without bounds checks beyond the slice index
    #[inline]
    pub fn get_node_no_check(&self, rel: IVec3) -> MapNode {
        self.nodes[block_node_index(rel)]
    }

    pub fn set_node(&mut self, rel: IVec3, n: MapNode) -> Result<()> {
        if !Self::is_valid_position(rel) {
            return Err(Error::InvalidPosition(rel));
        }
        let i = block_node_index(rel);
        self.nodes[i] = n;
        self.unresolved.remove(&(i as u16));
        self.raise_modified(ModifiedState::WriteNeeded, MOD_REASON_SET_NODE);
        Ok(())
    }

    /// Write used by lighting and bulk paths
    #[inline]
    pub fn set_node_no_check(&mut self, rel: IVec3, n: MapNode) {
        let i = block_node_index(rel);
        self.nodes[i] = n;
        self.raise_modified(ModifiedState::WriteNeeded, MOD_REASON_SET_NODE_NO_CHECK);
    }

    /// Write without touching the modified state (used while loading and
    /// when the caller tracks dirtiness itself)
    #[inline]
    pub(crate) fn set_node_silent(&mut self, index: usize, n: MapNode) {
        self.nodes[index] = n;
    }

    /// Fill every cell with `n`
    pub fn fill(&mut self, n: MapNode) {
        self.nodes.fill(n);
        self.unresolved.clear();
        self.raise_modified(ModifiedState::WriteNeeded, MOD_REASON_SET_NODE);
    }

    /* Voxel manipulator transfer */

    /// Copy every cell into `vm` at this block's node position
    pub fn copy_to(&self, vm: &mut VoxelManipulator) {
        let data_area = VoxelArea::new(IVec3::ZERO, IVec3::splat(MAP_BLOCKSIZE - 1));
        vm.copy_from(&self.nodes, &data_area, IVec3::ZERO, self.node_origin(), IVec3::splat(MAP_BLOCKSIZE));
    }

    /// Take every non-IGNORE cell from `vm`
    pub fn copy_from(&mut self, vm: &VoxelManipulator) {
        let data_area = VoxelArea::new(IVec3::ZERO, IVec3::splat(MAP_BLOCKSIZE - 1));
        let origin = self.node_origin();
        vm.copy_to(&mut self.nodes, &data_area, IVec3::ZERO, origin, IVec3::splat(MAP_BLOCKSIZE));
        self.raise_modified(ModifiedState::WriteNeeded, MOD_REASON_VMANIP);
    }

    /* Day/night difference digest */

    pub fn compute_day_night_diff(&self, defs: &NodeDefManager) -> bool {
        let mut previous = MapNode::ignore();
        let mut differs = false;
        for n in &self.nodes {
            if *n == previous {
                continue;
            }
            if !n.is_light_day_night_eq(defs.get_node(*n)) {
                differs = true;
                break;
            }
            previous = *n;
        }
        // A block of nothing but air has nothing to render either way
        differs && self.nodes.iter().any(|n| n.content() != CONTENT_AIR)
    }

    pub fn actually_update_day_night_diff(&mut self, defs: &NodeDefManager) {
        self.day_night_differs = self.compute_day_night_diff(defs);
        self.day_night_differs_expired = false;
    }

    pub fn expire_day_night_diff(&mut self) {
        self.day_night_differs_expired = true;
    }

    pub fn day_night_diff(&mut self, defs: &NodeDefManager) -> bool {
        if self.day_night_differs_expired {
            self.actually_update_day_night_diff(defs);
        }
        self.day_night_differs
    }

    /// Digest without updating the cache
    pub fn day_night_diff_peek(&self, defs: &NodeDefManager) -> bool {
        if self.day_night_differs_expired {
            self.compute_day_night_diff(defs)
        } else {
            self.day_night_differs
        }
    }

    /// Highest walkable y in the (x, z) column, or a `GROUND_LEVEL_*` sentinel
    pub fn ground_level(&self, column: IVec2, defs: &NodeDefManager) -> i16 {
        for y in (0..MAP_BLOCKSIZE).rev() {
            let n = self.get_node_no_check(IVec3::new(column.x, y, column.y));
            if defs.get_node(n).walkable {
                if y == MAP_BLOCKSIZE - 1 {
                    return GROUND_LEVEL_ABOVE;
                }
                return y as i16;
            }
        }
        GROUND_LEVEL_NONE
    }

    /* Flags */

    pub fn is_underground(&self) -> bool {
        self.is_underground
    }

    pub fn set_is_underground(&mut self, v: bool) {
        self.is_underground = v;
        self.raise_modified(ModifiedState::WriteNeeded, MOD_REASON_SET_IS_UNDERGROUND);
    }

    pub fn is_generated(&self) -> bool {
        self.generated
    }

    pub fn set_generated(&mut self, v: bool) {
        self.generated = v;
        self.raise_modified(ModifiedState::WriteNeeded, MOD_REASON_SET_GENERATED);
    }

    pub fn lighting_complete(&self) -> u16 {
        self.lighting_complete
    }

    pub fn set_lighting_complete(&mut self, mask: u16) {
        if mask != self.lighting_complete {
            self.lighting_complete = mask;
            self.raise_modified(ModifiedState::WriteNeeded, MOD_REASON_SET_LIGHTING_COMPLETE);
        }
    }

    pub fn is_lighting_complete(&self, bank: LightBank, face: usize) -> bool {
        self.lighting_complete & lighting_complete_bit(bank, face) != 0
    }

    pub fn set_lighting_complete_face(&mut self, bank: LightBank, face: usize, complete: bool) {
        let bit = lighting_complete_bit(bank, face);
        let mask = if complete {
            self.lighting_complete | bit
        } else {
            self.lighting_complete & !bit
        };
        self.set_lighting_complete(mask);
    }

    /* Timestamps */

    pub fn timestamp(&self) -> u32 {
        self.timestamp
    }

    pub fn disk_timestamp(&self) -> u32 {
        self.disk_timestamp
    }

    pub fn set_timestamp(&mut self, t: u32) {
        self.timestamp = t;
        self.raise_modified(ModifiedState::WriteAtUnload, MOD_REASON_SET_TIMESTAMP);
    }

    pub fn set_timestamp_no_changed_flag(&mut self, t: u32) {
        self.timestamp = t;
    }

    /* Dirty tracking */

    pub fn modified(&self) -> ModifiedState {
        self.modified
    }

    pub fn modified_reason(&self) -> u32 {
        self.modified_reason
    }

    pub fn raise_modified(&mut self, state: ModifiedState, reason: u32) {
        if state > self.modified {
            self.modified = state;
            self.modified_reason = reason;
            if state >= ModifiedState::WriteAtUnload {
                self.disk_timestamp = self.timestamp;
            }
        } else if state == self.modified {
            self.modified_reason |= reason;
        }
        if state == ModifiedState::WriteNeeded {
            self.expire_day_night_diff();
        }
    }

    pub fn reset_modified(&mut self) {
        self.modified = ModifiedState::Clean;
        self.modified_reason = 0;
    }

    /// Human readable list of accumulated modification reasons
    pub fn modified_reason_string(&self) -> String {
        MOD_REASON_NAMES
            .iter()
            .filter(|(bit, _)| self.modified_reason & bit != 0)
            .map(|(_, name)| *name)
            .collect::<Vec<_>>()
            .join(", ")
    }

    /* Usage */

    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    pub fn ref_grab(&mut self) {
        self.refcount += 1;
    }

    pub fn ref_drop(&mut self) {
        self.refcount = self.refcount.saturating_sub(1);
    }

    pub fn usage_timer(&self) -> f32 {
        self.usage_timer
    }

    pub fn reset_usage_timer(&mut self) {
        self.usage_timer = 0.0;
    }

    pub fn increment_usage_timer(&mut self, dtime: f32) {
        self.usage_timer += dtime;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::node::{LIGHT_SUN, CONTENT_IGNORE};

    #[test]
    fn test_new_block() {
        let b = MapBlock::new(IVec3::new(1, -2, 3));
        assert_eq!(b.node_origin(), IVec3::new(16, -32, 48));
        assert_eq!(b.get_node_no_check(IVec3::ZERO).content(), CONTENT_IGNORE);
        assert!(b.get_node(IVec3::new(16, 0, 0)).is_err());
        assert_eq!(b.lighting_complete(), LIGHTING_COMPLETE_ALL);
    }

    #[test]
    fn test_modified_state_transitions() {
        let mut b = MapBlock::new(IVec3::ZERO);
        b.reset_modified();
        b.set_timestamp(5);
        assert_eq!(b.modified(), ModifiedState::WriteAtUnload);
        b.set_node(IVec3::ZERO, MapNode::new(CONTENT_AIR)).unwrap();
        assert_eq!(b.modified(), ModifiedState::WriteNeeded);
        assert_eq!(b.modified_reason_string(), "setNode");
        b.set_generated(true);
        assert_eq!(b.modified_reason_string(), "setGenerated, setNode");
    }

    #[test]
    fn test_day_night_diff() {
        let defs = NodeDefManager::with_default_content();
        let mut b = MapBlock::new(IVec3::ZERO);
        let air = defs.get(CONTENT_AIR);
        let mut n = MapNode::new(CONTENT_AIR);
        n.set_light(LightBank::Day, LIGHT_SUN, air);
        b.fill(n);
        // All air: never reported as differing
        assert!(!b.day_night_diff(&defs));

        let stone = defs.get_id("default:stone").unwrap();
        b.set_node(IVec3::ZERO, MapNode::new(stone)).unwrap();
        assert!(b.day_night_diff(&defs));

        b.fill(MapNode::new(stone));
        assert!(!b.day_night_diff(&defs));
    }

    #[test]
    fn test_ground_level() {
        let defs = NodeDefManager::with_default_content();
        let stone = defs.get_id("default:stone").unwrap();
        let mut b = MapBlock::new(IVec3::ZERO);
        b.fill(MapNode::new(CONTENT_AIR));
        assert_eq!(b.ground_level(IVec2::new(3, 4), &defs), GROUND_LEVEL_NONE);
        b.set_node(IVec3::new(3, 7, 4), MapNode::new(stone)).unwrap();
        assert_eq!(b.ground_level(IVec2::new(3, 4), &defs), 7);
        b.set_node(IVec3::new(3, 15, 4), MapNode::new(stone)).unwrap();
        assert_eq!(b.ground_level(IVec2::new(3, 4), &defs), GROUND_LEVEL_ABOVE);
    }

    #[test]
    fn test_lighting_complete_bits() {
        let mut b = MapBlock::new(IVec3::ZERO);
        b.set_lighting_complete_face(LightBank::Night, 3, false);
        assert!(!b.is_lighting_complete(LightBank::Night, 3));
        assert!(b.is_lighting_complete(LightBank::Day, 3));
        assert_eq!(b.lighting_complete(), LIGHTING_COMPLETE_ALL & !(1 << 9));
    }

    #[test]
    fn test_vmanip_transfer() {
        let mut b = MapBlock::new(IVec3::new(0, 1, 0));
        b.fill(MapNode::new(CONTENT_AIR));
        b.set_node(IVec3::new(1, 2, 3), MapNode::new(42)).unwrap();
        let mut vm = VoxelManipulator::new();
        b.copy_to(&mut vm);
        assert_eq!(vm.get_node(IVec3::new(1, 18, 3)).unwrap().content(), 42);

        vm.set_node(IVec3::new(1, 18, 3), MapNode::new(43));
        vm.set_node(IVec3::new(2, 18, 3), MapNode::ignore());
        b.copy_from(&vm);
        assert_eq!(b.get_node_no_check(IVec3::new(1, 2, 3)).content(), 43);
        assert_eq!(b.get_node_no_check(IVec3::new(2, 2, 3)).content(), CONTENT_AIR);
    }
}

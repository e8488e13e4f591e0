//! The loaded world: sectors of blocks, node access and mutation
//!
//! `Map` owns every loaded `MapBlock`, grouped into `MapSector` columns.
//! Single-node mutation goes through `add_node_and_update`, which keeps
//! lighting consistent and records the touched blocks. Every authoritative
//! change is queued as a `MapEditEvent` until the owner flushes it.
//!
//! `MapAccess` is the seam the lighting engine and `MMVManip` work through,
//! so the same code runs on a bare `Map` and on a `LogicMap` that loads
//! blocks from its database on demand.

pub mod database;
pub mod event;
pub mod liquid;
pub mod logic;
pub mod occlusion;
pub mod query;
pub mod sector;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::core::error::Error;
use crate::core::types::{
    block_to_node_pos, is_valid_node_pos, node_block_offset, node_to_block_pos, IVec2, IVec3, Result, FACE_DIRS,
};
use crate::voxel::block::{MapBlock, ModifiedState, NodeMetadata, NodeTimer, MOD_REASON_NODE_TIMER, MOD_REASON_REPORT_META_CHANGE};
use crate::voxel::node::{LightBank, MapNode, NodeContainer, CONTENT_AIR};
use crate::voxel::nodedef::NodeDefManager;

pub use database::{FileDatabase, MapDatabase, MemoryDatabase};
pub use event::{MapEditEvent, MapEditEventType, MapEventReceiver};
pub use liquid::LiquidQueueState;
pub use logic::LogicMap;
pub use sector::MapSector;

/// Block-level access shared by `Map` and `LogicMap`
pub trait MapAccess {
    fn node_defs(&self) -> &Arc<NodeDefManager>;

    fn get_block_no_create(&self, p: IVec3) -> Option<&MapBlock>;

    fn get_block_no_create_mut(&mut self, p: IVec3) -> Option<&mut MapBlock>;

    /// Create an empty block (all IGNORE) or return the loaded one
    fn create_block(&mut self, p: IVec3) -> &mut MapBlock;

    /// Get a loaded block, loading it from storage where the map has any.
    /// With `create_blank` a missing block is created empty.
    fn emerge_block(&mut self, p: IVec3, create_blank: bool) -> Option<&mut MapBlock> {
        if self.get_block_no_create(p).is_some() {
            return self.get_block_no_create_mut(p);
        }
        if create_blank {
            Some(self.create_block(p))
        } else {
            None
        }
    }

    /// Node at `p`, `None` when its block is not loaded
    fn get_node_opt(&self, p: IVec3) -> Option<MapNode> {
        self.get_block_no_create(node_to_block_pos(p))
            .map(|b| b.get_node_no_check(node_block_offset(p)))
    }

    fn get_node(&self, p: IVec3) -> Result<MapNode> {
        self.get_node_opt(p).ok_or(Error::InvalidPosition(p))
    }

    /// Node at `p`, IGNORE when its block is not loaded
    fn get_node_or_ignore(&self, p: IVec3) -> MapNode {
        self.get_node_opt(p).unwrap_or(MapNode::ignore())
    }

    fn is_valid_position(&self, p: IVec3) -> bool {
        self.get_block_no_create(node_to_block_pos(p)).is_some()
    }

    /// Replace a node with no lighting work
    fn set_node_raw(&mut self, p: IVec3, n: MapNode) -> Result<()> {
        if !is_valid_node_pos(p) {
            return Err(Error::InvalidPosition(p));
        }
        let block = self
            .get_block_no_create_mut(node_to_block_pos(p))
            .ok_or(Error::InvalidPosition(p))?;
        block.set_node(node_block_offset(p), n)
    }
}

/// The set of loaded blocks plus queued edits
#[derive(Debug)]
pub struct Map {
    sectors: HashMap<IVec2, MapSector>,
    defs: Arc<NodeDefManager>,
    pub(crate) transforming_liquid: VecDeque<IVec3>,
    pub(crate) liquid_state: LiquidQueueState,
    events: Vec<MapEditEvent>,
}

impl Map {
    pub fn new(defs: Arc<NodeDefManager>) -> Self {
        Self {
            sectors: HashMap::new(),
            defs,
            transforming_liquid: VecDeque::new(),
            liquid_state: LiquidQueueState::default(),
            events: Vec::new(),
        }
    }

    /// Mutable handle for loaders that allocate placeholder ids
    pub fn node_defs_mut(&mut self) -> &mut Arc<NodeDefManager> {
        &mut self.defs
    }

    /* Sectors and blocks */

    pub fn get_sector(&self, p2d: IVec2) -> Option<&MapSector> {
        self.sectors.get(&p2d)
    }

    pub fn create_sector(&mut self, p2d: IVec2) -> &mut MapSector {
        self.sectors.entry(p2d).or_insert_with(|| MapSector::new(p2d))
    }

    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    /// Install a block, replacing any loaded block at the same position
    pub fn insert_block(&mut self, block: MapBlock) {
        let p = block.pos();
        self.create_sector(IVec2::new(p.x, p.z)).insert_block(block);
    }

    /// Drop a block from memory without saving it
    pub fn remove_block(&mut self, p: IVec3) -> Option<MapBlock> {
        let p2d = IVec2::new(p.x, p.z);
        let sector = self.sectors.get_mut(&p2d)?;
        let block = sector.remove_block(p.y);
        if sector.is_empty() {
            self.sectors.remove(&p2d);
        }
        block
    }

    pub fn loaded_block_count(&self) -> usize {
        self.sectors.values().map(MapSector::len).sum()
    }

    pub fn loaded_block_positions(&self) -> Vec<IVec3> {
        let mut out = Vec::with_capacity(self.loaded_block_count());
        for sector in self.sectors.values() {
            out.extend(sector.blocks().map(MapBlock::pos));
        }
        out
    }

    pub fn blocks(&self) -> impl Iterator<Item = &MapBlock> {
        self.sectors.values().flat_map(MapSector::blocks)
    }

    pub fn blocks_mut(&mut self) -> impl Iterator<Item = &mut MapBlock> {
        self.sectors.values_mut().flat_map(MapSector::blocks_mut)
    }

    /* Node mutation */

    /// Replace the node at `p` and update lighting around it. Light is
    /// carried over unchanged when the new node lights exactly like the old
    /// one. With `remove_metadata` a content change also drops the node's
    /// metadata and timer. Touched blocks are added to `modified_blocks`.
    pub fn add_node_and_update(
        &mut self,
        p: IVec3,
        mut n: MapNode,
        modified_blocks: &mut HashSet<IVec3>,
        remove_metadata: bool,
    ) -> Result<()> {
        let blockpos = node_to_block_pos(p);
        let rel = node_block_offset(p);
        let defs = self.defs.clone();
        let block = self
            .get_block_no_create_mut(blockpos)
            .ok_or(Error::InvalidPosition(p))?;
        let old = block.get_node_no_check(rel);

        if remove_metadata && old.content() != n.content() {
            block.metadata.remove(rel);
            block.node_timers.remove(rel);
        }

        let f = defs.get_node(n);
        let old_f = defs.get_node(old);
        if f.lighting_flags() == old_f.lighting_flags() {
            for bank in LightBank::ALL {
                n.set_light(bank, old.light_raw(bank, old_f), f);
            }
            block.set_node(rel, n)?;
            modified_blocks.insert(blockpos);
        } else {
            for bank in LightBank::ALL {
                n.set_light(bank, 0, f);
            }
            block.set_node(rel, n)?;
            crate::lighting::update_lighting_nodes(self, &[(p, old)], modified_blocks);
            for bp in modified_blocks.iter() {
                if let Some(b) = self.get_block_no_create_mut(*bp) {
                    b.expire_day_night_diff();
                }
            }
        }
        self.queue_liquid_around(p);
        Ok(())
    }

    /// Queue the liquid or floodable neighbours of an edited node, then the
    /// node itself, so a removed node is transformed after its neighbours
    fn queue_liquid_around(&mut self, p: IVec3) {
        for d in FACE_DIRS.into_iter().chain(std::iter::once(IVec3::ZERO)) {
            let p2 = p + d;
            let Some(n2) = self.get_node_opt(p2) else { continue };
            let f = self.defs.get_node(n2);
            if f.is_liquid() || f.floodable {
                self.transforming_liquid.push_back(p2);
            }
        }
    }

    pub fn remove_node_and_update(&mut self, p: IVec3, modified_blocks: &mut HashSet<IVec3>) -> Result<()> {
        self.add_node_and_update(p, MapNode::new(CONTENT_AIR), modified_blocks, true)
    }

    /// Full node replacement with lighting, queueing an edit event.
    /// Returns false if the block of `p` is not loaded.
    pub fn set_node(&mut self, p: IVec3, n: MapNode) -> bool {
        self.add_node_with_event(p, n, true)
    }

    /// Add a node and queue an `AddNode` event, or `SwapNode` when metadata
    /// is kept
    pub fn add_node_with_event(&mut self, p: IVec3, n: MapNode, remove_metadata: bool) -> bool {
        let kind = if remove_metadata { MapEditEventType::AddNode } else { MapEditEventType::SwapNode };
        let mut event = MapEditEvent::new(kind, p, n);
        let ok = self
            .add_node_and_update(p, n, &mut event.modified_blocks, remove_metadata)
            .is_ok();
        self.dispatch_event(event);
        ok
    }

    pub fn remove_node_with_event(&mut self, p: IVec3) -> bool {
        let mut event = MapEditEvent::new(MapEditEventType::RemoveNode, p, MapNode::new(CONTENT_AIR));
        let ok = self.remove_node_and_update(p, &mut event.modified_blocks).is_ok();
        self.dispatch_event(event);
        ok
    }

    /// Replace a node keeping its metadata and timer
    pub fn swap_node(&mut self, p: IVec3, n: MapNode) -> bool {
        self.add_node_with_event(p, n, false)
    }

    /* Metadata and timers */

    pub fn get_node_metadata(&self, p: IVec3) -> Option<&NodeMetadata> {
        self.get_block_no_create(node_to_block_pos(p))?
            .metadata
            .get(node_block_offset(p))
    }

    /// Store metadata for the node at `p`. Fails if the block is not loaded.
    pub fn set_node_metadata(&mut self, p: IVec3, meta: NodeMetadata) -> bool {
        let blockpos = node_to_block_pos(p);
        let Some(block) = self.get_block_no_create_mut(blockpos) else {
            log::warn!("set_node_metadata: block not found at {}", p);
            return false;
        };
        block.metadata.set(node_block_offset(p), meta);
        block.raise_modified(ModifiedState::WriteNeeded, MOD_REASON_REPORT_META_CHANGE);
        self.report_metadata_change(blockpos);
        true
    }

    pub fn remove_node_metadata(&mut self, p: IVec3) -> Option<NodeMetadata> {
        let blockpos = node_to_block_pos(p);
        let block = self.get_block_no_create_mut(blockpos)?;
        let removed = block.metadata.remove(node_block_offset(p))?;
        block.raise_modified(ModifiedState::WriteNeeded, MOD_REASON_REPORT_META_CHANGE);
        self.report_metadata_change(blockpos);
        Some(removed)
    }

    fn report_metadata_change(&mut self, blockpos: IVec3) {
        let mut event = MapEditEvent::new(MapEditEventType::BlockNodeMetadataChanged, blockpos, MapNode::ignore());
        event.modified_blocks.insert(blockpos);
        self.dispatch_event(event);
    }

    /// Positions of nodes carrying metadata inside the node box `p1..=p2`
    pub fn find_nodes_with_metadata(&self, p1: IVec3, p2: IVec3) -> Vec<IVec3> {
        let min = p1.min(p2);
        let max = p1.max(p2);
        let bmin = node_to_block_pos(min);
        let bmax = node_to_block_pos(max);
        let mut out = Vec::new();
        for z in bmin.z..=bmax.z {
            for y in bmin.y..=bmax.y {
                for x in bmin.x..=bmax.x {
                    let bp = IVec3::new(x, y, z);
                    let Some(block) = self.get_block_no_create(bp) else { continue };
                    let origin = block_to_node_pos(bp);
                    out.extend(
                        block
                            .metadata
                            .positions()
                            .into_iter()
                            .map(|rel| origin + rel)
                            .filter(|p| p.cmpge(min).all() && p.cmple(max).all()),
                    );
                }
            }
        }
        out
    }

    pub fn get_node_timer(&self, p: IVec3) -> Option<NodeTimer> {
        self.get_block_no_create(node_to_block_pos(p))?
            .node_timers
            .get(node_block_offset(p))
    }

    pub fn set_node_timer(&mut self, p: IVec3, timer: NodeTimer) -> bool {
        let Some(block) = self.get_block_no_create_mut(node_to_block_pos(p)) else {
            log::warn!("set_node_timer: block not found at {}", p);
            return false;
        };
        block.node_timers.set(node_block_offset(p), timer);
        block.raise_modified(ModifiedState::WriteNeeded, MOD_REASON_NODE_TIMER);
        true
    }

    pub fn remove_node_timer(&mut self, p: IVec3) {
        if let Some(block) = self.get_block_no_create_mut(node_to_block_pos(p)) {
            if block.node_timers.remove(node_block_offset(p)).is_some() {
                block.raise_modified(ModifiedState::WriteNeeded, MOD_REASON_NODE_TIMER);
            }
        }
    }

    /* Events */

    pub fn dispatch_event(&mut self, event: MapEditEvent) {
        self.events.push(event);
    }

    pub fn take_events(&mut self) -> Vec<MapEditEvent> {
        std::mem::take(&mut self.events)
    }

    /// Hand every queued event to `receiver` in order
    pub fn flush_events(&mut self, receiver: &mut dyn MapEventReceiver) {
        for event in self.take_events() {
            receiver.on_map_edit_event(&event);
        }
    }

    /* Unloading */

    /// Age every block by `dtime` and unload blocks that are unreferenced and
    /// idle for longer than `unload_timeout`. With a nonzero
    /// `max_loaded_blocks`, the oldest unreferenced blocks are also unloaded
    /// until the count fits. Modified blocks go through `save` first; a block
    /// whose save fails stays loaded. Unloaded positions are appended to
    /// `unloaded`.
    pub fn timer_update(
        &mut self,
        dtime: f32,
        unload_timeout: f32,
        max_loaded_blocks: usize,
        unloaded: &mut Vec<IVec3>,
        save: &mut dyn FnMut(&mut MapBlock) -> bool,
    ) {
        let mut candidates: Vec<(f32, IVec3)> = Vec::new();
        for block in self.blocks_mut() {
            block.increment_usage_timer(dtime);
            candidates.push((block.usage_timer(), block.pos()));
        }
        // Oldest first
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut loaded = candidates.len();
        let mut saved = 0usize;
        let mut deleted = 0usize;
        for (timer, p) in candidates {
            let over_limit = max_loaded_blocks > 0 && loaded > max_loaded_blocks;
            if !over_limit && timer <= unload_timeout {
                break;
            }
            let Some(block) = self.get_block_no_create_mut(p) else { continue };
            if block.refcount() > 0 {
                continue;
            }
            if block.modified() != ModifiedState::Clean {
                log::trace!("saving block {} before unload ({})", p, block.modified_reason_string());
                if !save(block) {
                    continue;
                }
                saved += 1;
            }
            self.remove_block(p);
            unloaded.push(p);
            deleted += 1;
            loaded -= 1;
        }

        if deleted > 0 {
            log::info!("Unloaded {} blocks from memory, of which {} were written ({} remain)", deleted, saved, loaded);
        }
    }
}

impl MapAccess for Map {
    fn node_defs(&self) -> &Arc<NodeDefManager> {
        &self.defs
    }

    fn get_block_no_create(&self, p: IVec3) -> Option<&MapBlock> {
        self.sectors.get(&IVec2::new(p.x, p.z))?.get_block(p.y)
    }

    fn get_block_no_create_mut(&mut self, p: IVec3) -> Option<&mut MapBlock> {
        self.sectors.get_mut(&IVec2::new(p.x, p.z))?.get_block_mut(p.y)
    }

    fn create_block(&mut self, p: IVec3) -> &mut MapBlock {
        self.create_sector(IVec2::new(p.x, p.z)).create_block(p.y)
    }
}

impl NodeContainer for Map {
    fn get_node_no_ex(&self, p: IVec3) -> MapNode {
        self.get_node_or_ignore(p)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::voxel::node::LightBank;

    /// Map with `radius` blocks around the origin filled with `fill`,
    /// lighting left dark
    pub(crate) fn filled_map(defs: Arc<NodeDefManager>, radius: i32, fill: &str, underground: bool) -> Map {
        let id = defs.get_id(fill).unwrap();
        let mut map = Map::new(defs);
        for z in -radius..=radius {
            for y in -radius..=radius {
                for x in -radius..=radius {
                    let block = map.create_block(IVec3::new(x, y, z));
                    block.fill(MapNode::new(id));
                    block.set_is_underground(underground);
                    block.set_generated(true);
                }
            }
        }
        map
    }

    fn defs() -> Arc<NodeDefManager> {
        Arc::new(NodeDefManager::with_default_content())
    }

    #[test]
    fn test_get_set_node_raw() {
        let mut map = filled_map(defs(), 0, "air", true);
        let stone = map.node_defs().get_id("default:stone").unwrap();
        map.set_node_raw(IVec3::new(3, 4, 5), MapNode::new(stone)).unwrap();
        assert_eq!(map.get_node(IVec3::new(3, 4, 5)).unwrap().content(), stone);
        assert!(map.get_node(IVec3::new(16, 0, 0)).is_err());
        assert!(map.get_node_or_ignore(IVec3::new(16, 0, 0)).is_ignore());
        assert!(map.set_node_raw(IVec3::new(-17, 0, 0), MapNode::new(stone)).is_err());
    }

    #[test]
    fn test_sector_cleanup_on_remove() {
        let mut map = Map::new(defs());
        map.create_block(IVec3::new(1, 2, 3));
        map.create_block(IVec3::new(1, 5, 3));
        assert_eq!(map.sector_count(), 1);
        assert!(map.remove_block(IVec3::new(1, 2, 3)).is_some());
        assert_eq!(map.sector_count(), 1);
        map.remove_block(IVec3::new(1, 5, 3));
        assert_eq!(map.sector_count(), 0);
    }

    #[test]
    fn test_swap_keeps_light_and_metadata() {
        let d = defs();
        let mut map = filled_map(d.clone(), 0, "air", true);
        let p = IVec3::new(4, 4, 4);
        let glass = d.get_id("default:glass").unwrap();
        let mut n = MapNode::new(CONTENT_AIR);
        n.set_light(LightBank::Night, 9, d.get(CONTENT_AIR));
        map.set_node_raw(p, n).unwrap();

        let mut meta = NodeMetadata::new();
        meta.set_string("owner", "sam");
        assert!(map.set_node_metadata(p, meta));
        assert!(map.swap_node(p, MapNode::new(glass)));
        let got = map.get_node(p).unwrap();
        assert_eq!(got.content(), glass);
        assert_eq!(got.get_light(LightBank::Night, d.get(glass)), 9);
        assert_eq!(map.get_node_metadata(p).unwrap().get_string("owner"), "sam");

        let events = map.take_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, MapEditEventType::BlockNodeMetadataChanged);
        assert_eq!(events[1].kind, MapEditEventType::SwapNode);
    }

    #[test]
    fn test_digging_next_to_water_queues_liquid() {
        let d = defs();
        let mut map = filled_map(d.clone(), 0, "stone", true);
        let source = d.get_id("default:water_source").unwrap();
        map.set_node_raw(IVec3::new(5, 5, 5), MapNode::new(source)).unwrap();
        assert_eq!(map.transforming_liquid_size(), 0);

        let mut modified = HashSet::new();
        map.remove_node_and_update(IVec3::new(6, 5, 5), &mut modified).unwrap();
        let queued: Vec<IVec3> = map.transforming_liquid.iter().copied().collect();
        assert_eq!(queued, vec![IVec3::new(5, 5, 5), IVec3::new(6, 5, 5)]);

        map.transform_liquids(&mut modified, 10_000, std::time::Duration::ZERO);
        let n = map.get_node(IVec3::new(6, 5, 5)).unwrap();
        assert_eq!(n.content(), d.get_id("default:water_flowing").unwrap());
    }

    #[test]
    fn test_add_node_drops_metadata_and_timer() {
        let d = defs();
        let mut map = filled_map(d.clone(), 0, "air", true);
        let p = IVec3::new(1, 1, 1);
        map.set_node_metadata(p, NodeMetadata::new());
        map.set_node_timer(p, NodeTimer::new(5.0, 0.0));
        assert!(map.set_node(p, MapNode::new(d.get_id("default:stone").unwrap())));
        assert!(map.get_node_metadata(p).is_none());
        assert!(map.get_node_timer(p).is_none());
        assert!(!map.set_node(IVec3::new(100, 0, 0), MapNode::new(CONTENT_AIR)));
    }

    #[test]
    fn test_find_nodes_with_metadata() {
        let mut map = filled_map(defs(), 1, "air", true);
        for p in [IVec3::new(-3, 0, 0), IVec3::new(5, 5, 5), IVec3::new(20, 0, 0)] {
            map.set_node_metadata(p, NodeMetadata::new());
        }
        let mut found = map.find_nodes_with_metadata(IVec3::new(6, 6, 6), IVec3::new(-4, -1, -1));
        found.sort_by_key(|p| p.x);
        assert_eq!(found, vec![IVec3::new(-3, 0, 0), IVec3::new(5, 5, 5)]);
    }

    #[test]
    fn test_flush_events() {
        struct Collect(Vec<MapEditEventType>);
        impl MapEventReceiver for Collect {
            fn on_map_edit_event(&mut self, event: &MapEditEvent) {
                self.0.push(event.kind);
            }
        }
        let mut map = filled_map(defs(), 0, "air", true);
        map.remove_node_with_event(IVec3::ONE);
        map.dispatch_event(MapEditEvent::other(HashSet::new()));
        let mut c = Collect(Vec::new());
        map.flush_events(&mut c);
        assert_eq!(c.0, vec![MapEditEventType::RemoveNode, MapEditEventType::Other]);
        assert!(map.take_events().is_empty());
    }

    #[test]
    fn test_timer_update_unloads_idle_blocks() {
        let mut map = filled_map(defs(), 0, "air", false);
        map.create_block(IVec3::new(0, 1, 0)).ref_grab();
        let mut saved = Vec::new();
        let mut unloaded = Vec::new();
        map.timer_update(10.0, 5.0, 0, &mut unloaded, &mut |b| {
            saved.push(b.pos());
            true
        });
        // Referenced block survives, the dirty one was saved then dropped
        assert_eq!(unloaded, vec![IVec3::ZERO]);
        assert_eq!(saved, vec![IVec3::ZERO]);
        assert!(map.get_block_no_create(IVec3::new(0, 1, 0)).is_some());
    }

    #[test]
    fn test_timer_update_failed_save_keeps_block() {
        let mut map = filled_map(defs(), 0, "air", false);
        let mut unloaded = Vec::new();
        map.timer_update(10.0, 5.0, 0, &mut unloaded, &mut |_| false);
        assert!(unloaded.is_empty());
        assert_eq!(map.loaded_block_count(), 1);
    }

    #[test]
    fn test_timer_update_enforces_limit() {
        let mut map = filled_map(defs(), 1, "air", false);
        for b in map.blocks_mut() {
            b.reset_modified();
        }
        let mut unloaded = Vec::new();
        map.timer_update(0.1, 100.0, 20, &mut unloaded, &mut |_| true);
        assert_eq!(unloaded.len(), 7);
        assert_eq!(map.loaded_block_count(), 20);
    }
}

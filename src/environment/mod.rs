//! The server-side world: map, active objects, modifiers and clocks
//!
//! `LogicEnvironment::step` drives everything on the owning thread. Blocks
//! near players become active; active blocks run node timers, ABMs and
//! objects, and blocks entering the active set run their LBMs and restore
//! their stored objects.

pub mod abm;
pub mod active_block;
pub mod lbm;
pub mod messages;
pub mod meta;
pub mod object;

use std::collections::{HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::core::settings::WorldSettings;
use crate::core::time::{GameClock, IntervalLimiter, TimeOfDay};
use crate::core::types::{block_to_node_pos, node_to_block_pos, IVec3, Result, Vec3};
use crate::generation::{EmergeManager, PseudoRandom};
use crate::map::{LogicMap, MapAccess, MapEditEvent, MapEventReceiver};
use crate::math::float_to_node;
use crate::voxel::area::VoxelArea;
use crate::voxel::block::static_object::MAX_STATIC_OBJECTS_PER_BLOCK;
use crate::voxel::block::{
    ModifiedState, NodeTimer, StaticObject, BLOCK_TIMESTAMP_UNDEFINED, MOD_REASON_CLEAR_ALL_OBJECTS,
    MOD_REASON_REMOVE_OBJECTS_DEACTIVATE, MOD_REASON_REMOVE_OBJECTS_REMOVE, MOD_REASON_STATIC_DATA_ADDED,
    MOD_REASON_STATIC_DATA_CHANGED, MOD_REASON_STATIC_DATA_REMOVED, MOD_REASON_ADD_ACTIVE_OBJECT_RAW,
    MOD_REASON_BLOCK_EXPIRED, MOD_REASON_UNKNOWN,
};
use crate::voxel::node::MapNode;

use abm::{AbmHandler, AbmState};

pub use abm::ActiveBlockModifier;
pub use active_block::{ActiveBlockChanges, ActiveBlockList, ActivePlayer};
pub use lbm::{LbmManager, LoadingBlockModifier};
pub use messages::{ActiveObjectCommand, ActiveObjectMessage, ObjectProperties};
pub use meta::{time_to_daynight_ratio, EnvMeta};
pub use object::{create_object, ActiveObject, ActiveObjectManager, EntityObject};

const ACTIVE_BLOCK_MGMT_INTERVAL: f32 = 2.0;
const NODE_TIMER_INTERVAL: f32 = 0.2;
const LIQUID_INTERVAL: f32 = 1.0;
const OBJECT_SEND_INTERVAL: f32 = 0.1;
const OBJECT_MANAGEMENT_INTERVAL: f32 = 0.5;
const MAP_TIMER_AND_UNLOAD_INTERVAL: f32 = 2.92;
/// Fraction of the ABM interval a single ABM pass may take
const ABM_TIME_BUDGET: f32 = 0.2;
/// Blocks a full object clear loads before unloading unreferenced ones
const MAX_CLEAROBJECTS_EXTRA_LOADED_BLOCKS: usize = 4096;
/// A block whose stamp runs this far ahead of the disk copy is saved on unload
const BLOCK_EXPIRE_SECONDS: u32 = 60;

/// Receives expired node timers
pub trait NodeTimerHandler: Send {
    /// Return true to restart the timer with its timeout
    fn on_timer(&mut self, env: &mut LogicEnvironment, p: IVec3, n: MapNode, elapsed: f32) -> bool;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClearObjectsMode {
    /// Load every stored block and clear it
    Full,
    /// Clear loaded blocks now, the rest when they are next activated
    Quick,
}

/// Time notification for observers
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeOfDayUpdate {
    pub time_of_day: u32,
    pub speed: f32,
}

/// A connected observer
#[derive(Clone, Debug)]
pub struct RemotePlayer {
    pub name: String,
    pub active: ActivePlayer,
    /// Objects this player has been told about
    pub known_objects: HashSet<u16>,
}

pub struct LogicEnvironment {
    map: LogicMap,
    objects: ActiveObjectManager,
    abms: Vec<AbmState>,
    lbms: LbmManager,
    active_blocks: ActiveBlockList,
    players: Vec<RemotePlayer>,
    settings: WorldSettings,
    world_dir: PathBuf,

    game_time: GameClock,
    time_of_day: TimeOfDay,
    last_clear_objects_time: u32,

    active_blocks_mgmt_interval: IntervalLimiter,
    abm_interval: IntervalLimiter,
    node_timer_interval: IntervalLimiter,
    liquid_interval: IntervalLimiter,
    object_send_interval: IntervalLimiter,
    object_management_interval: IntervalLimiter,
    map_save_interval: IntervalLimiter,
    unload_interval: IntervalLimiter,
    time_send_interval: IntervalLimiter,

    ignore_map_edit_events_area: VoxelArea,
    unsent_map_edit_queue: VecDeque<MapEditEvent>,
    ao_messages: VecDeque<ActiveObjectMessage>,
    time_of_day_updates: VecDeque<TimeOfDayUpdate>,

    rng: PseudoRandom,
    emerge: Option<EmergeManager>,
    node_timer_handler: Option<Box<dyn NodeTimerHandler>>,
    /// Objects added since the ABM handler last counted
    added_objects: u32,
}

impl std::fmt::Debug for LogicEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicEnvironment")
            .field("world_dir", &self.world_dir)
            .field("game_time", &self.game_time.seconds)
            .field("time_of_day", &self.time_of_day.units)
            .field("objects", &self.objects.len())
            .field("active_blocks", &self.active_blocks.list.len())
            .field("abms", &self.abms.len())
            .field("lbms", &self.lbms)
            .finish_non_exhaustive()
    }
}

impl LogicEnvironment {
    pub fn new(map: LogicMap, settings: WorldSettings, world_dir: impl Into<PathBuf>) -> Self {
        let rng = PseudoRandom::new(map.seed());
        Self {
            map,
            objects: ActiveObjectManager::new(),
            abms: Vec::new(),
            lbms: LbmManager::new(),
            active_blocks: ActiveBlockList::new(),
            players: Vec::new(),
            time_of_day: TimeOfDay::new(0, settings.time_speed, 0),
            settings,
            world_dir: world_dir.into(),
            game_time: GameClock::new(0),
            last_clear_objects_time: 0,
            active_blocks_mgmt_interval: IntervalLimiter::new(),
            abm_interval: IntervalLimiter::new(),
            node_timer_interval: IntervalLimiter::new(),
            liquid_interval: IntervalLimiter::new(),
            object_send_interval: IntervalLimiter::new(),
            object_management_interval: IntervalLimiter::new(),
            map_save_interval: IntervalLimiter::new(),
            unload_interval: IntervalLimiter::new(),
            time_send_interval: IntervalLimiter::new(),
            ignore_map_edit_events_area: VoxelArea::default(),
            unsent_map_edit_queue: VecDeque::new(),
            ao_messages: VecDeque::new(),
            time_of_day_updates: VecDeque::new(),
            rng,
            emerge: None,
            node_timer_handler: None,
            added_objects: 0,
        }
    }

    pub fn map(&self) -> &LogicMap {
        &self.map
    }

    pub fn map_mut(&mut self) -> &mut LogicMap {
        &mut self.map
    }

    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    pub fn world_dir(&self) -> &Path {
        &self.world_dir
    }

    pub fn active_blocks(&self) -> &ActiveBlockList {
        &self.active_blocks
    }

    /* Registration */

    pub fn add_abm(&mut self, abm: Box<dyn ActiveBlockModifier>) {
        self.abms.push(AbmState::new(abm));
    }

    /// Register a loading block modifier; only valid before `load_meta`
    pub fn add_lbm(&mut self, lbm: Box<dyn LoadingBlockModifier>) -> bool {
        self.lbms.add_lbm(lbm)
    }

    pub fn set_node_timer_handler(&mut self, handler: Box<dyn NodeTimerHandler>) {
        self.node_timer_handler = Some(handler);
    }

    /// Generate missing blocks through `emerge` instead of leaving them
    /// queued
    pub fn set_emerge_manager(&mut self, emerge: EmergeManager) {
        self.emerge = Some(emerge);
    }

    /// Keep `blockpos` active regardless of players
    pub fn set_block_forceloaded(&mut self, blockpos: IVec3, forceloaded: bool) {
        if forceloaded {
            self.active_blocks.forceloaded.insert(blockpos);
        } else {
            self.active_blocks.forceloaded.remove(&blockpos);
        }
    }

    /* Players */

    pub fn add_player(&mut self, name: &str, pos: Vec3) {
        if self.player(name).is_some() {
            log::warn!("Player {} is already in the environment", name);
            return;
        }
        self.players.push(RemotePlayer {
            name: name.to_string(),
            active: ActivePlayer::new(pos),
            known_objects: HashSet::new(),
        });
    }

    /// Remove a player, forgetting every object it knew
    pub fn remove_player(&mut self, name: &str) -> Option<RemotePlayer> {
        let index = self.players.iter().position(|p| p.name == name)?;
        let player = self.players.remove(index);
        for id in &player.known_objects {
            if let Some(obj) = self.objects.get_mut(*id) {
                let base = obj.base_mut();
                base.known_by_count = base.known_by_count.saturating_sub(1);
            }
        }
        Some(player)
    }

    pub fn player(&self, name: &str) -> Option<&RemotePlayer> {
        self.players.iter().find(|p| p.name == name)
    }

    pub fn player_mut(&mut self, name: &str) -> Option<&mut RemotePlayer> {
        self.players.iter_mut().find(|p| p.name == name)
    }

    /* Clocks */

    pub fn game_time(&self) -> u32 {
        self.game_time.seconds
    }

    pub fn get_time_of_day(&self) -> u32 {
        self.time_of_day.units
    }

    pub fn get_time_of_day_f(&self) -> f32 {
        self.time_of_day.fraction
    }

    pub fn set_time_of_day(&mut self, units: u32) {
        self.time_of_day.set(units);
        self.time_of_day_updates.push_back(TimeOfDayUpdate {
            time_of_day: self.time_of_day.units,
            speed: self.time_of_day.speed,
        });
    }

    pub fn get_day_count(&self) -> u32 {
        self.time_of_day.day_count
    }

    /// Sunlight factor in 0..=1000 for the current time of day
    pub fn get_day_night_ratio(&self) -> u32 {
        time_to_daynight_ratio(self.time_of_day.fraction * 24000.0, true)
    }

    /// Light of the node at `p` blended for the current time of day
    pub fn get_node_light(&self, p: IVec3) -> Option<u8> {
        let n = self.map.get_node_opt(p)?;
        Some(n.light_blend(self.get_day_night_ratio(), self.map.node_defs().get_node(n)))
    }

    /* Persistence */

    /// Restore clocks and LBM introduction times from the world directory.
    /// Must run after every LBM is registered.
    pub fn load_meta(&mut self) -> Result<()> {
        let meta = EnvMeta::load(&self.world_dir)?;
        self.game_time = GameClock::new(meta.game_time);
        self.time_of_day = TimeOfDay::new(meta.time_of_day, self.settings.time_speed, meta.day_count);
        self.last_clear_objects_time = meta.last_clear_objects_time;
        let defs = self.map.node_defs().clone();
        self.lbms
            .load_introduction_times(&meta.lbm_introduction_times, &defs, self.game_time.seconds)?;
        log::info!(
            "Environment loaded: game time {}, time of day {}, day {}",
            meta.game_time,
            meta.time_of_day,
            meta.day_count
        );
        Ok(())
    }

    pub fn save_meta(&self) -> Result<()> {
        let meta = EnvMeta {
            game_time: self.game_time.seconds,
            time_of_day: self.time_of_day.units,
            last_clear_objects_time: self.last_clear_objects_time,
            day_count: self.time_of_day.day_count,
            lbm_introduction_times: self.lbms.create_introduction_times_string(),
        };
        meta.save(&self.world_dir)
    }

    /// Write dirty blocks and the environment state
    pub fn save(&mut self) {
        self.map.begin_save();
        let saved = self.map.save(ModifiedState::WriteNeeded);
        self.map.end_save();
        if saved > 0 {
            log::debug!("Periodic save wrote {} blocks", saved);
        }
        if let Err(e) = self.save_meta() {
            log::error!("Failed to save environment state: {}", e);
        }
    }

    /// Store every object statically and write everything out
    pub fn shutdown(&mut self) -> Result<()> {
        self.deactivate_far_objects(true);
        self.map.begin_save();
        self.map.save(ModifiedState::WriteAtUnload);
        self.map.end_save();
        self.save_meta()
    }

    /* Map edits */

    /// Replace a node, updating light and queueing the edit for observers
    pub fn set_node(&mut self, p: IVec3, n: MapNode) -> bool {
        let ok = self.map.set_node(p, n);
        self.process_map_events();
        ok
    }

    pub fn remove_node(&mut self, p: IVec3) -> bool {
        let ok = self.map.remove_node_with_event(p);
        self.process_map_events();
        ok
    }

    /// Replace a node keeping its metadata and timer
    pub fn swap_node(&mut self, p: IVec3, n: MapNode) -> bool {
        let ok = self.map.swap_node(p, n);
        self.process_map_events();
        ok
    }

    /// Edits wholly inside `area` are not forwarded to observers
    pub fn set_ignore_map_edit_events_area(&mut self, area: VoxelArea) {
        self.ignore_map_edit_events_area = area;
    }

    /// Drain the map's event queue through the ignore filter
    pub fn process_map_events(&mut self) {
        for event in self.map.take_events() {
            self.on_map_edit_event(&event);
        }
    }

    pub fn take_unsent_map_edit_events(&mut self) -> Vec<MapEditEvent> {
        self.unsent_map_edit_queue.drain(..).collect()
    }

    pub fn take_active_object_messages(&mut self) -> Vec<ActiveObjectMessage> {
        self.ao_messages.drain(..).collect()
    }

    pub fn take_time_of_day_updates(&mut self) -> Vec<TimeOfDayUpdate> {
        self.time_of_day_updates.drain(..).collect()
    }

    /* Objects */

    pub fn get_active_object(&self, id: u16) -> Option<&dyn ActiveObject> {
        self.objects.get(id)
    }

    pub fn get_active_object_mut(&mut self, id: u16) -> Option<&mut (dyn ActiveObject + 'static)> {
        self.objects.get_mut(id)
    }

    pub fn active_object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn get_objects_inside_radius(&self, pos: Vec3, radius: f32) -> Vec<u16> {
        self.objects.get_objects_inside_radius(pos, radius, |o| !o.is_gone())
    }

    /// Objects `player` should be told about
    pub fn get_added_active_objects(&self, player: &str, radius: f32, player_radius: f32) -> Vec<u16> {
        let Some(p) = self.player(player) else { return Vec::new() };
        self.objects
            .get_added_active_objects_around_pos(p.active.pos, radius, player_radius, &p.known_objects)
    }

    /// Objects `player` should forget
    pub fn get_removed_active_objects(&self, player: &str, radius: f32, player_radius: f32) -> Vec<u16> {
        let Some(p) = self.player(player) else { return Vec::new() };
        self.objects
            .get_removed_active_objects_around_pos(p.active.pos, radius, player_radius, &p.known_objects)
    }

    /// Apply the added and removed sets to the known objects of `player`,
    /// keeping `known_by_count` in step. Returns (added, removed).
    pub fn update_known_objects(&mut self, player: &str, radius: f32, player_radius: f32) -> (Vec<u16>, Vec<u16>) {
        let added = self.get_added_active_objects(player, radius, player_radius);
        let removed = self.get_removed_active_objects(player, radius, player_radius);
        let Some(index) = self.players.iter().position(|p| p.name == player) else {
            return (added, removed);
        };
        for id in &removed {
            self.players[index].known_objects.remove(id);
            if let Some(obj) = self.objects.get_mut(*id) {
                let base = obj.base_mut();
                base.known_by_count = base.known_by_count.saturating_sub(1);
            }
        }
        for id in &added {
            self.players[index].known_objects.insert(*id);
            if let Some(obj) = self.objects.get_mut(*id) {
                obj.base_mut().known_by_count += 1;
            }
        }
        (added, removed)
    }

    /// Add a new object and store it in its block. Returns the id.
    pub fn add_active_object(&mut self, obj: Box<dyn ActiveObject>) -> Option<u16> {
        self.added_objects += 1;
        self.add_active_object_raw(obj, true, 0)
    }

    fn add_active_object_raw(&mut self, obj: Box<dyn ActiveObject>, set_changed: bool, dtime_s: u32) -> Option<u16> {
        let id = self.objects.register(obj)?;
        let obj = self.objects.get_mut(id)?;
        obj.added_to_environment(dtime_s);
        if !obj.is_static_allowed() {
            return Some(id);
        }

        let pos = obj.base_position();
        let s_obj = StaticObject::new(obj.kind(), pos, obj.get_static_data());
        let blockpos = node_to_block_pos(float_to_node(pos));
        match self.map.emerge_block(blockpos, false) {
            Some(block) => {
                block.static_objects.insert(Some(id), s_obj);
                if set_changed {
                    block.raise_modified(ModifiedState::WriteNeeded, MOD_REASON_ADD_ACTIVE_OBJECT_RAW);
                }
                let base = obj.base_mut();
                base.static_exists = true;
                base.static_block = blockpos;
            }
            None => log::warn!("Could not find block {} to store object id={}", blockpos, id),
        }
        Some(id)
    }

    /// Turn the stored objects of a block into active ones
    fn activate_objects(&mut self, blockpos: IVec3, dtime_s: u32) {
        let Some(block) = self.map.get_block_no_create_mut(blockpos) else { return };
        if block.static_objects.stored.is_empty() {
            return;
        }
        if block.static_objects.stored.len() > MAX_STATIC_OBJECTS_PER_BLOCK {
            log::warn!(
                "Suspiciously many objects ({}) in block {}; removing them",
                block.static_objects.stored.len(),
                blockpos
            );
            block.static_objects.stored.clear();
            block.raise_modified(ModifiedState::WriteNeeded, MOD_REASON_CLEAR_ALL_OBJECTS);
            return;
        }

        let stored = std::mem::take(&mut block.static_objects.stored);
        let mut kept = Vec::new();
        for s_obj in stored {
            let obj = match create_object(s_obj.kind, s_obj.pos, &s_obj.data) {
                Ok(obj) => obj,
                Err(e) => {
                    log::error!("Failed to create object of type {} in {}: {}", s_obj.kind, blockpos, e);
                    kept.push(s_obj);
                    continue;
                }
            };
            if self.add_active_object_raw(obj, false, dtime_s).is_none() {
                kept.push(s_obj);
            }
        }
        if let Some(block) = self.map.get_block_no_create_mut(blockpos) {
            block.static_objects.stored.extend(kept);
        }
    }

    /// Static record of object `id` as it is now
    fn static_record(&self, id: u16) -> Option<StaticObject> {
        let obj = self.objects.get(id)?;
        Some(StaticObject::new(obj.kind(), obj.base_position(), obj.get_static_data()))
    }

    fn save_static_to_block(&mut self, blockpos: IVec3, store_id: Option<u16>, id: u16, s_obj: StaticObject, reason: u32) -> bool {
        let Some(block) = self.map.emerge_block(blockpos, false) else {
            log::warn!("Could not save object id={} to its block {}", id, blockpos);
            return false;
        };
        if block.static_objects.stored.len() >= MAX_STATIC_OBJECTS_PER_BLOCK {
            log::warn!("Block {} is full, not saving object id={}", blockpos, id);
            return false;
        }
        block.static_objects.insert(store_id, s_obj);
        if reason != MOD_REASON_UNKNOWN {
            block.raise_modified(ModifiedState::WriteNeeded, reason);
        }
        if let Some(obj) = self.objects.get_mut(id) {
            let base = obj.base_mut();
            base.static_exists = true;
            base.static_block = blockpos;
        }
        true
    }

    /// Drop the static copy of object `id`. With `no_emerge` only a loaded
    /// block is touched.
    fn delete_static_from_block(&mut self, id: u16, reason: u32, no_emerge: bool) {
        let Some(obj) = self.objects.get(id) else { return };
        if !obj.base().static_exists {
            return;
        }
        let static_block = obj.base().static_block;
        let block = if no_emerge {
            self.map.get_block_no_create_mut(static_block)
        } else {
            self.map.emerge_block(static_block, false)
        };
        let Some(block) = block else {
            if !no_emerge {
                log::warn!("Failed to load block {} holding object id={}", static_block, id);
            }
            return;
        };
        block.static_objects.remove(id);
        if reason != MOD_REASON_UNKNOWN {
            block.raise_modified(ModifiedState::WriteNeeded, reason);
        }
        if let Some(obj) = self.objects.get_mut(id) {
            obj.base_mut().static_exists = false;
        }
    }

    /// Detach object `id` from parent and children and forget it
    fn delete_object(&mut self, id: u16) {
        self.objects.detach(id);
        let children: Vec<u16> = self
            .objects
            .get(id)
            .map(|o| o.attachment_children().iter().copied().collect())
            .unwrap_or_default();
        for child in children {
            self.objects.detach(child);
        }
        self.objects.remove(id);
    }

    /// Store objects outside the active blocks into their blocks. With
    /// `force_delete` every object is stored and deleted.
    pub fn deactivate_far_objects(&mut self, force_delete: bool) {
        for id in self.objects.ids() {
            let Some(obj) = self.objects.get(id) else { continue };
            if !force_delete && obj.base().pending_removal {
                continue;
            }
            let pos = obj.base_position();
            let blockpos_o = node_to_block_pos(float_to_node(pos));
            let static_exists = obj.base().static_exists;
            let static_block = obj.base().static_block;
            let static_allowed = obj.is_static_allowed();
            let known_by = obj.base().known_by_count;
            let min_movement = obj.minimum_saved_movement();

            // Stored in an inactive block but standing in an active one:
            // move the record
            if !force_delete
                && static_exists
                && !self.active_blocks.contains(static_block)
                && self.active_blocks.contains(blockpos_o)
            {
                self.delete_static_from_block(id, MOD_REASON_STATIC_DATA_REMOVED, false);
                if let Some(s_obj) = self.static_record(id) {
                    self.save_static_to_block(blockpos_o, Some(id), id, s_obj, MOD_REASON_STATIC_DATA_ADDED);
                }
                continue;
            }

            let still_active = if static_allowed {
                self.active_blocks.contains(blockpos_o)
            } else {
                self.map.get_block_no_create(blockpos_o).is_some()
            };
            if !force_delete && still_active {
                continue;
            }

            log::debug!("Deactivating object id={} in inactive block {}", id, blockpos_o);
            let pending_delete = known_by > 0 && !force_delete;
            let mut delete_now = force_delete;

            if static_allowed {
                let Some(s_obj) = self.static_record(id) else { continue };
                let mut stays_in_same_block = false;
                let mut data_changed = true;
                if static_exists {
                    stays_in_same_block = static_block == blockpos_o;
                    if let Some(block) = self.map.emerge_block(static_block, false) {
                        match block.static_objects.active.get(&id) {
                            Some(old) => {
                                if old.data == s_obj.data && old.pos.distance(pos) < min_movement {
                                    data_changed = false;
                                }
                            }
                            None => log::warn!("Object id={} missing from its static block {}", id, static_block),
                        }
                    }
                }
                // Always rewritten, but the block is only dirtied when the
                // record really changed
                let reason = if !stays_in_same_block || data_changed {
                    MOD_REASON_STATIC_DATA_CHANGED
                } else {
                    MOD_REASON_UNKNOWN
                };
                self.delete_static_from_block(id, reason, false);
                let store_id = pending_delete.then_some(id);
                if !self.save_static_to_block(blockpos_o, store_id, id, s_obj, reason) {
                    delete_now = true;
                }
            }

            if let Some(obj) = self.objects.get_mut(id) {
                obj.mark_for_deactivation();
            }
            if pending_delete && !delete_now {
                log::debug!("Object id={} is known by {} players; not deleting yet", id, known_by);
                continue;
            }
            self.delete_object(id);
        }
    }

    /// Delete objects marked for removal or deactivation once no player
    /// knows them
    pub fn remove_removed_objects(&mut self) {
        for id in self.objects.ids() {
            let Some(obj) = self.objects.get(id) else { continue };
            if !obj.is_gone() {
                continue;
            }
            let pending_removal = obj.base().pending_removal;
            if pending_removal {
                self.delete_static_from_block(id, MOD_REASON_REMOVE_OBJECTS_REMOVE, false);
            }

            let Some(obj) = self.objects.get(id) else { continue };
            if obj.base().known_by_count > 0 {
                continue;
            }
            let static_exists = obj.base().static_exists;
            let static_block = obj.base().static_block;

            // Deactivated: the active record becomes a stored one
            if !pending_removal && static_exists {
                match self.map.emerge_block(static_block, false) {
                    Some(block) => match block.static_objects.remove(id) {
                        Some(s_obj) => {
                            block.static_objects.stored.push(s_obj);
                            block.raise_modified(ModifiedState::WriteNeeded, MOD_REASON_REMOVE_OBJECTS_DEACTIVATE);
                        }
                        None => log::warn!("Object id={} not in the active list of block {}", id, static_block),
                    },
                    None => log::info!("Failed to load block {} of deactivated object id={}", static_block, id),
                }
            }
            self.delete_object(id);
        }
    }

    /// Delete every object. `Quick` clears loaded blocks and leaves the rest
    /// to activation, which drops objects stored before this call.
    pub fn clear_objects(&mut self, mode: ClearObjectsMode) {
        log::info!("Clearing all objects ({:?})", mode);
        for id in self.objects.ids() {
            let Some(obj) = self.objects.get(id) else { continue };
            if obj.kind() == object::ACTIVEOBJECT_TYPE_PLAYER {
                continue;
            }
            self.delete_static_from_block(id, MOD_REASON_CLEAR_ALL_OBJECTS, true);
            let known = self.objects.get(id).map_or(0, |o| o.base().known_by_count);
            if known > 0 {
                if let Some(obj) = self.objects.get_mut(id) {
                    obj.mark_for_removal();
                }
                continue;
            }
            self.delete_object(id);
        }

        let loaded = self.map.loaded_block_positions();
        let loadable = match mode {
            ClearObjectsMode::Quick => loaded.clone(),
            ClearObjectsMode::Full => {
                let mut list = match self.map.list_all_loadable_blocks() {
                    Ok(list) => list,
                    Err(e) => {
                        log::error!("Failed to list stored blocks: {}", e);
                        Vec::new()
                    }
                };
                list.extend(loaded.iter().copied());
                list.sort_by_key(|p| (p.z, p.y, p.x));
                list.dedup();
                list
            }
        };
        let unload_interval = match mode {
            ClearObjectsMode::Quick => usize::MAX,
            ClearObjectsMode::Full => MAX_CLEAROBJECTS_EXTRA_LOADED_BLOCKS.max(1),
        };

        for p in &loaded {
            if let Some(block) = self.map.get_block_no_create_mut(*p) {
                block.ref_grab();
            }
        }

        let report_interval = loadable.len() / 10;
        let mut blocks_checked = 0usize;
        let mut blocks_cleared = 0usize;
        let mut objects_cleared = 0usize;
        for p in &loadable {
            let Some(block) = self.map.emerge_block(*p, false) else {
                log::error!("Failed to load block {} while clearing objects", p);
                continue;
            };
            let count = block.static_objects.len();
            if count > 0 {
                block.static_objects.clear();
                block.raise_modified(ModifiedState::WriteNeeded, MOD_REASON_CLEAR_ALL_OBJECTS);
                objects_cleared += count;
                blocks_cleared += 1;
            }
            blocks_checked += 1;
            if report_interval != 0 && blocks_checked % report_interval == 0 {
                log::info!(
                    "Cleared {} objects in {} blocks ({}%)",
                    objects_cleared,
                    blocks_cleared,
                    100 * blocks_checked / loadable.len()
                );
            }
            if blocks_checked % unload_interval == 0 {
                self.unload_unreferenced_blocks();
            }
        }
        self.unload_unreferenced_blocks();

        for p in &loaded {
            if let Some(block) = self.map.get_block_no_create_mut(*p) {
                block.ref_drop();
            }
        }
        self.last_clear_objects_time = self.game_time.seconds;
        log::info!("Cleared {} objects in {} blocks", objects_cleared, blocks_cleared);
    }

    fn unload_unreferenced_blocks(&mut self) {
        let mut unloaded = Vec::new();
        self.map.timer_update(0.0, -1.0, 0, &mut unloaded);
    }

    /* Blocks */

    /// Bring a freshly active block up to date: drop objects cleared while
    /// it was away, restore stored objects, run LBMs, expired node timers
    /// and a catch-up ABM pass, then stamp it. Returns false when the block
    /// is not loaded.
    pub fn activate_block(&mut self, blockpos: IVec3, additional_dtime: u32) -> bool {
        let game_time = self.game_time.seconds;
        let last_clear = self.last_clear_objects_time;
        let Some(block) = self.map.get_block_no_create_mut(blockpos) else { return false };
        block.reset_usage_timer();

        let stamp = block.timestamp();
        let mut dtime_s = if stamp != BLOCK_TIMESTAMP_UNDEFINED && game_time > stamp {
            game_time - stamp
        } else {
            0
        };
        dtime_s += additional_dtime;

        if stamp != BLOCK_TIMESTAMP_UNDEFINED && stamp < last_clear && !block.static_objects.stored.is_empty() {
            block.static_objects.stored.clear();
            block.raise_modified(ModifiedState::WriteNeeded, MOD_REASON_CLEAR_ALL_OBJECTS);
        }
        let elapsed = block.node_timers.step(dtime_s as f32);

        self.activate_objects(blockpos, dtime_s);

        let mut lbms = std::mem::take(&mut self.lbms);
        lbms.apply_lbms(self, blockpos, stamp, dtime_s as f32);
        self.lbms = lbms;

        self.run_node_timers(blockpos, elapsed);

        if let Some(block) = self.map.get_block_no_create_mut(blockpos) {
            block.set_timestamp(game_time);
        }
        self.run_abms(&[blockpos], dtime_s as f32, false, None);
        self.process_map_events();
        true
    }

    fn run_node_timers(&mut self, blockpos: IVec3, elapsed: Vec<(IVec3, NodeTimer)>) {
        if elapsed.is_empty() {
            return;
        }
        let Some(mut handler) = self.node_timer_handler.take() else { return };
        let origin = block_to_node_pos(blockpos);
        for (rel, timer) in elapsed {
            let p = origin + rel;
            let n = self.map.get_node_or_ignore(p);
            if handler.on_timer(self, p, n, timer.elapsed) {
                if let Some(block) = self.map.get_block_no_create_mut(blockpos) {
                    block.node_timers.set(rel, NodeTimer::new(timer.timeout, 0.0));
                }
            }
        }
        if self.node_timer_handler.is_none() {
            self.node_timer_handler = Some(handler);
        }
    }

    fn run_abms(&mut self, blocks: &[IVec3], dtime_s: f32, use_timers: bool, budget: Option<Duration>) {
        if self.abms.is_empty() {
            return;
        }
        let mut abms = std::mem::take(&mut self.abms);
        let defs = self.map.node_defs().clone();
        let handler = AbmHandler::new(&mut abms, dtime_s, &defs, use_timers);
        if !handler.is_empty() {
            let mut rng = std::mem::replace(&mut self.rng, PseudoRandom::new(0));
            let start = Instant::now();
            let mut runs = 0u32;
            let mut scanned = 0usize;
            for &bp in blocks {
                if budget.is_some_and(|b| start.elapsed() > b) {
                    log::debug!("ABM time budget exceeded after {} of {} blocks", scanned, blocks.len());
                    break;
                }
                if use_timers {
                    let game_time = self.game_time.seconds;
                    match self.map.get_block_no_create_mut(bp) {
                        Some(block) => block.set_timestamp_no_changed_flag(game_time),
                        None => continue,
                    }
                }
                runs += handler.apply(&mut abms, self, &mut rng, bp);
                scanned += 1;
            }
            self.rng = rng;
            log::trace!("ABMs ran {} times over {} blocks", runs, scanned);
        }
        abms.append(&mut self.abms);
        self.abms = abms;
    }

    fn shuffled_abm_blocks(&mut self) -> Vec<IVec3> {
        let mut blocks: Vec<IVec3> = self.active_blocks.abm_list.iter().copied().collect();
        blocks.sort_by_key(|p| (p.z, p.y, p.x));
        for i in (1..blocks.len()).rev() {
            let j = self.rng.range(0, i as i32) as usize;
            blocks.swap(i, j);
        }
        blocks
    }

    /* Step */

    /// Advance the world by `dtime` seconds
    pub fn step(&mut self, dtime: f32) {
        // Clocks
        self.game_time.step(dtime);
        self.time_of_day.step(dtime);
        if self.time_send_interval.step(dtime, self.settings.time_send_interval) {
            self.time_of_day_updates.push_back(TimeOfDayUpdate {
                time_of_day: self.time_of_day.units,
                speed: self.time_of_day.speed,
            });
        }

        if self.active_blocks_mgmt_interval.step(dtime, ACTIVE_BLOCK_MGMT_INTERVAL) {
            self.update_active_blocks();
        }

        if self.node_timer_interval.step(dtime, NODE_TIMER_INTERVAL) {
            self.step_node_timers(NODE_TIMER_INTERVAL);
        }

        let abm_interval = self.settings.abm_interval;
        if self.abm_interval.step(dtime, abm_interval) {
            let blocks = self.shuffled_abm_blocks();
            let budget = Duration::from_secs_f32((abm_interval * ABM_TIME_BUDGET).max(0.0));
            self.run_abms(&blocks, abm_interval, true, Some(budget));
        }

        if self.liquid_interval.step(dtime, LIQUID_INTERVAL) {
            let mut modified = HashSet::new();
            let purge = Duration::from_secs_f32(self.settings.liquid_queue_purge_time.max(0.0));
            self.map.transform_liquids(&mut modified, self.settings.liquid_loop_max, purge);
            if !modified.is_empty() {
                self.map.dispatch_event(MapEditEvent::other(modified));
            }
        }

        self.step_emerge();

        let send_recommended = self.object_send_interval.step(dtime, OBJECT_SEND_INTERVAL);
        self.step_objects(dtime, send_recommended);

        if self.object_management_interval.step(dtime, OBJECT_MANAGEMENT_INTERVAL) {
            self.remove_removed_objects();
        }

        if self.map_save_interval.step(dtime, self.settings.server_map_save_interval) {
            self.save();
        }

        if self.unload_interval.step(dtime, MAP_TIMER_AND_UNLOAD_INTERVAL) {
            let mut unloaded = Vec::new();
            self.map.timer_update(
                MAP_TIMER_AND_UNLOAD_INTERVAL,
                self.settings.server_unload_unused_data_timeout,
                self.settings.max_loaded_blocks,
                &mut unloaded,
            );
        }

        self.process_map_events();
    }

    fn update_active_blocks(&mut self) {
        let players: Vec<ActivePlayer> = self.players.iter().map(|p| p.active).collect();
        let changes = self.active_blocks.update(
            &players,
            self.settings.active_block_range,
            self.settings.active_object_send_range_blocks,
        );

        self.deactivate_far_objects(false);

        let game_time = self.game_time.seconds;
        let mut removed: Vec<IVec3> = changes.removed.into_iter().collect();
        removed.sort_by_key(|p| (p.z, p.y, p.x));
        for p in removed {
            let Some(block) = self.map.get_block_no_create_mut(p) else { continue };
            block.set_timestamp_no_changed_flag(game_time);
            if block.modified() == ModifiedState::WriteNeeded {
                if let Err(e) = self.map.save_block(p) {
                    log::error!("Failed to save deactivated block {}: {}", p, e);
                }
            }
        }

        let mut added: Vec<IVec3> = changes.added.into_iter().collect();
        added.sort_by_key(|p| (p.z, p.y, p.x));
        for p in added {
            if !self.ensure_loaded(p) {
                self.active_blocks.remove(p);
                continue;
            }
            self.activate_block(p, 0);
        }

        let mut extra: Vec<IVec3> = changes.extra_added.into_iter().collect();
        extra.sort_by_key(|p| (p.z, p.y, p.x));
        for p in extra {
            if !self.ensure_loaded(p) {
                self.active_blocks.remove(p);
                continue;
            }
            self.activate_objects(p, 0);
        }
    }

    /// Load `p` from the database when possible, otherwise queue it for
    /// emerging. True when the block is in memory.
    fn ensure_loaded(&mut self, p: IVec3) -> bool {
        if self.map.emerge_block(p, false).is_some() {
            return true;
        }
        self.map.get_block_or_emerge(p).is_some()
    }

    fn step_node_timers(&mut self, dtime: f32) {
        let game_time = self.game_time.seconds;
        let mut blocks: Vec<IVec3> = self.active_blocks.list.iter().copied().collect();
        blocks.sort_by_key(|p| (p.z, p.y, p.x));
        for bp in blocks {
            let Some(block) = self.map.get_block_no_create_mut(bp) else { continue };
            block.reset_usage_timer();
            block.set_timestamp_no_changed_flag(game_time);
            if block.disk_timestamp() != BLOCK_TIMESTAMP_UNDEFINED
                && block.timestamp() > block.disk_timestamp().saturating_add(BLOCK_EXPIRE_SECONDS)
            {
                block.raise_modified(ModifiedState::WriteAtUnload, MOD_REASON_BLOCK_EXPIRED);
            }
            let elapsed = block.node_timers.step(dtime);
            self.run_node_timers(bp, elapsed);
        }
    }

    fn step_emerge(&mut self) {
        let Some(mut emerge) = self.emerge.take() else { return };
        let mut modified = HashSet::new();
        let ready = self.map.run_emerge(&mut emerge, &mut modified);
        self.emerge = Some(emerge);
        if !ready.is_empty() {
            log::debug!("{} emerged blocks ready", ready.len());
        }
        if !modified.is_empty() {
            self.map.dispatch_event(MapEditEvent::other(modified));
        }
    }

    fn step_objects(&mut self, dtime: f32, send_recommended: bool) {
        let mut messages = Vec::new();
        self.objects.step(|obj| {
            if obj.is_gone() {
                return;
            }
            let stepped = catch_unwind(AssertUnwindSafe(|| obj.step(dtime, send_recommended)));
            if stepped.is_err() {
                log::error!("Active object id={} failed during step; removing it", obj.id());
                obj.mark_for_removal();
            }
            messages.extend(obj.take_messages());
        });
        self.ao_messages.extend(messages);
    }
}

impl MapEventReceiver for LogicEnvironment {
    fn on_map_edit_event(&mut self, event: &MapEditEvent) {
        let area = event.area();
        if !area.has_empty_extent() && self.ignore_map_edit_events_area.contains_area(&area) {
            return;
        }
        self.unsent_map_edit_queue.push_back(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::map::{MapEditEventType, MemoryDatabase};
    use crate::voxel::node::CONTENT_AIR;
    use crate::voxel::nodedef::NodeDefManager;

    fn env_with_blocks(dir: &Path, blocks: &[IVec3]) -> LogicEnvironment {
        let defs = Arc::new(NodeDefManager::with_default_content());
        let settings = WorldSettings {
            chunksize: 1,
            active_block_range: 2,
            active_object_send_range_blocks: 2,
            ..Default::default()
        };
        let mut map = LogicMap::new(defs, Box::new(MemoryDatabase::new()), &settings);
        for p in blocks {
            let block = map.create_block(*p);
            block.fill(MapNode::new(CONTENT_AIR));
            block.set_generated(true);
        }
        LogicEnvironment::new(map, settings, dir)
    }

    fn cube(r: i32) -> Vec<IVec3> {
        let mut out = Vec::new();
        for z in -r..=r {
            for y in -r..=r {
                for x in -r..=r {
                    out.push(IVec3::new(x, y, z));
                }
            }
        }
        out
    }

    #[test]
    fn test_meta_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_with_blocks(dir.path(), &[]);
        env.load_meta().unwrap();
        env.set_time_of_day(6000);
        for _ in 0..10 {
            env.step(0.5);
        }
        assert_eq!(env.game_time(), 5);
        env.save_meta().unwrap();

        let mut env2 = env_with_blocks(dir.path(), &[]);
        env2.load_meta().unwrap();
        assert_eq!(env2.game_time(), 5);
        assert_eq!(env2.get_time_of_day(), env.get_time_of_day());
        assert!(env2.get_day_night_ratio() > 0);
    }

    #[test]
    fn test_blocks_around_player_become_active() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_with_blocks(dir.path(), &cube(1));
        env.load_meta().unwrap();
        env.add_player("sam", Vec3::new(8.0, 8.0, 8.0));
        env.step(2.0);
        assert!(env.active_blocks().contains(IVec3::ZERO));
        assert!(env.active_blocks().contains(IVec3::new(1, 0, 0)));
        // Not loaded: dropped and queued for emerging
        assert!(!env.active_blocks().contains(IVec3::new(0, 2, 0)));
        assert_eq!(env.map().get_block_no_create(IVec3::ZERO).unwrap().timestamp(), 2);
        assert!(env.map().emerge_queue_len() > 0);
    }

    #[test]
    fn test_objects_go_static_and_come_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_with_blocks(dir.path(), &cube(1));
        env.load_meta().unwrap();
        let id = env.add_active_object(Box::new(EntityObject::new(Vec3::new(3.0, 3.0, 3.0), "test:ball", ""))).unwrap();
        let block = env.map().get_block_no_create(IVec3::ZERO).unwrap();
        assert!(block.static_objects.active.contains_key(&id));

        // Nobody around: the object is stored in its block
        env.deactivate_far_objects(false);
        assert_eq!(env.active_object_count(), 0);
        let block = env.map().get_block_no_create(IVec3::ZERO).unwrap();
        assert_eq!(block.static_objects.stored.len(), 1);
        assert!(block.static_objects.active.is_empty());

        // A player arrives and the object is restored
        env.add_player("sam", Vec3::new(8.0, 8.0, 8.0));
        env.step(2.0);
        assert_eq!(env.active_object_count(), 1);
        let block = env.map().get_block_no_create(IVec3::ZERO).unwrap();
        assert!(block.static_objects.stored.is_empty());
        assert_eq!(block.static_objects.active.len(), 1);
    }

    #[test]
    fn test_known_objects_delay_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_with_blocks(dir.path(), &cube(1));
        env.load_meta().unwrap();
        env.add_player("sam", Vec3::new(100.0, 8.0, 8.0));
        let id = env.add_active_object(Box::new(EntityObject::new(Vec3::new(3.0, 3.0, 3.0), "test:ball", ""))).unwrap();
        let (added, removed) = env.update_known_objects("sam", 1000.0, 0.0);
        assert_eq!(added, vec![id]);
        assert!(removed.is_empty());

        env.deactivate_far_objects(false);
        let obj = env.get_active_object(id).unwrap();
        assert!(obj.is_gone());
        // Still known, so the block keeps it as active
        let block = env.map().get_block_no_create(IVec3::ZERO).unwrap();
        assert!(block.static_objects.active.contains_key(&id));

        let (_, removed) = env.update_known_objects("sam", 1000.0, 0.0);
        assert_eq!(removed, vec![id]);
        env.remove_removed_objects();
        assert_eq!(env.active_object_count(), 0);
        let block = env.map().get_block_no_create(IVec3::ZERO).unwrap();
        assert_eq!(block.static_objects.stored.len(), 1);
    }

    #[test]
    fn test_clear_objects_quick() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_with_blocks(dir.path(), &cube(1));
        env.load_meta().unwrap();
        env.add_active_object(Box::new(EntityObject::new(Vec3::new(3.0, 3.0, 3.0), "test:ball", ""))).unwrap();
        env.game_time = GameClock::new(40);
        env.clear_objects(ClearObjectsMode::Quick);
        assert_eq!(env.active_object_count(), 0);
        assert_eq!(env.last_clear_objects_time, 40);
        let block = env.map().get_block_no_create(IVec3::ZERO).unwrap();
        assert!(block.static_objects.is_empty());
    }

    struct DirtToStone(Vec<String>);

    impl ActiveBlockModifier for DirtToStone {
        fn trigger_contents(&self) -> &[String] {
            &self.0
        }

        fn trigger_interval(&self) -> f32 {
            1.0
        }

        fn trigger_chance(&self) -> u32 {
            1
        }

        fn trigger(&mut self, env: &mut LogicEnvironment, p: IVec3, _n: MapNode, _c: u32, _w: u32) {
            let stone = env.map().node_defs().get_id("default:stone").unwrap_or(CONTENT_AIR);
            env.set_node(p, MapNode::new(stone));
        }
    }

    #[test]
    fn test_abm_converts_nodes_in_active_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_with_blocks(dir.path(), &cube(1));
        let defs = env.map().node_defs().clone();
        let dirt = defs.get_id("default:dirt").unwrap();
        let stone = defs.get_id("default:stone").unwrap();
        env.map_mut().set_node_raw(IVec3::new(5, 5, 5), MapNode::new(dirt)).unwrap();
        env.add_abm(Box::new(DirtToStone(vec!["default:dirt".to_string()])));
        env.load_meta().unwrap();
        env.add_player("sam", Vec3::new(8.0, 8.0, 8.0));
        env.step(2.0);
        assert_eq!(env.map().get_node_or_ignore(IVec3::new(5, 5, 5)).content(), stone);
        let events = env.take_unsent_map_edit_events();
        assert!(events.iter().any(|e| e.kind == MapEditEventType::AddNode && e.p == IVec3::new(5, 5, 5)));
    }

    #[test]
    fn test_ignore_area_absorbs_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_with_blocks(dir.path(), &[IVec3::ZERO]);
        let stone = env.map().node_defs().get_id("default:stone").unwrap();
        env.set_ignore_map_edit_events_area(VoxelArea::new(IVec3::ZERO, IVec3::splat(7)));
        assert!(env.set_node(IVec3::new(1, 1, 1), MapNode::new(stone)));
        assert!(env.take_unsent_map_edit_events().is_empty());
        assert!(env.set_node(IVec3::new(9, 1, 1), MapNode::new(stone)));
        assert_eq!(env.take_unsent_map_edit_events().len(), 1);
        assert!(env.remove_node(IVec3::new(9, 1, 1)));
        assert_eq!(env.take_unsent_map_edit_events()[0].kind, MapEditEventType::RemoveNode);
    }

    struct CountDirt {
        name: String,
        contents: Vec<String>,
        hits: Arc<AtomicUsize>,
    }

    impl LoadingBlockModifier for CountDirt {
        fn name(&self) -> &str {
            &self.name
        }

        fn trigger_contents(&self) -> &[String] {
            &self.contents
        }

        fn trigger(&mut self, _env: &mut LogicEnvironment, _p: IVec3, _n: MapNode, _dtime_s: f32) {
            self.hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_lbm_runs_on_blocks_older_than_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_with_blocks(dir.path(), &[IVec3::ZERO, IVec3::X]);
        let dirt = env.map().node_defs().get_id("default:dirt").unwrap();
        env.map_mut().set_node_raw(IVec3::new(1, 1, 1), MapNode::new(dirt)).unwrap();
        env.map_mut().set_node_raw(IVec3::new(17, 1, 1), MapNode::new(dirt)).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        env.add_lbm(Box::new(CountDirt {
            name: "test:count".to_string(),
            contents: vec!["default:dirt".to_string()],
            hits: hits.clone(),
        }));
        env.game_time = GameClock::new(100);
        env.lbms.load_introduction_times("", &env.map.node_defs().clone(), 100).unwrap();

        env.map_mut().get_block_no_create_mut(IVec3::ZERO).unwrap().set_timestamp(50);
        env.map_mut().get_block_no_create_mut(IVec3::X).unwrap().set_timestamp(150);
        assert!(env.activate_block(IVec3::ZERO, 0));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(env.activate_block(IVec3::X, 0));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(env.map().get_block_no_create(IVec3::ZERO).unwrap().timestamp(), 100);
    }

    struct Restart(Arc<AtomicUsize>);

    impl NodeTimerHandler for Restart {
        fn on_timer(&mut self, _env: &mut LogicEnvironment, _p: IVec3, _n: MapNode, _elapsed: f32) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst) == 0
        }
    }

    #[test]
    fn test_node_timers_fire_and_restart() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_with_blocks(dir.path(), &cube(1));
        env.load_meta().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        env.set_node_timer_handler(Box::new(Restart(fired.clone())));
        env.map_mut().set_node_timer(IVec3::new(2, 2, 2), NodeTimer::new(1.0, 0.0));
        env.add_player("sam", Vec3::new(8.0, 8.0, 8.0));
        for _ in 0..30 {
            env.step(0.2);
        }
        // Fired once, restarted, fired again and stopped
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert!(env.map().get_node_timer(IVec3::new(2, 2, 2)).is_none());
    }

    #[test]
    fn test_time_updates_are_queued() {
        let dir = tempfile::tempdir().unwrap();
        let mut env = env_with_blocks(dir.path(), &[]);
        env.step(5.0);
        let updates = env.take_time_of_day_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].time_of_day, 100);
    }
}

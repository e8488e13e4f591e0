//! Authoritative map backed by a block database
//!
//! `LogicMap` wraps a `Map` and adds paging: blocks are loaded from the
//! database on demand, written back on save or eviction, and generated
//! chunk by chunk through `init_block_make` / `finish_block_make`.

use std::collections::HashSet;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::core::error::Error;
use crate::core::settings::WorldSettings;
use crate::core::types::{is_valid_block_pos, IVec3, Result, FACE_DIRS};
use crate::generation::emerge::{EmergeManager, EmergeResult};
use crate::generation::{get_chunk_containing_block, BlockMakeData, MapGenerator};
use crate::lighting;
use crate::voxel::block::serialize::SER_FMT_VER_HIGHEST_WRITE;
use crate::voxel::block::{MapBlock, ModifiedState, MOD_REASON_EXPIRE_DAYNIGHTDIFF};
use crate::voxel::nodedef::NodeDefManager;

use super::database::MapDatabase;
use super::{Map, MapAccess};

/// Serialize `block` into `db` and mark it clean
fn write_block(db: &mut dyn MapDatabase, block: &mut MapBlock, defs: &NodeDefManager, compression_level: i32) -> Result<()> {
    let body = block.serialize(SER_FMT_VER_HIGHEST_WRITE, true, compression_level, defs)?;
    let mut blob = Vec::with_capacity(body.len() + 1);
    blob.push(SER_FMT_VER_HIGHEST_WRITE);
    blob.extend_from_slice(&body);
    db.save_block(block.pos(), &blob)?;
    block.reset_modified();
    Ok(())
}

pub struct LogicMap {
    map: Map,
    db: Box<dyn MapDatabase>,
    seed: u64,
    chunksize: i16,
    compression_level: i32,
    /// First blocks of chunks handed to a generator and not finished yet
    chunks_in_progress: HashSet<IVec3>,
    /// Blocks asked for through `get_block_or_emerge`
    emerge_queue: HashSet<IVec3>,
}

impl std::fmt::Debug for LogicMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicMap")
            .field("loaded_blocks", &self.map.loaded_block_count())
            .field("chunks_in_progress", &self.chunks_in_progress.len())
            .field("emerge_queue", &self.emerge_queue.len())
            .finish()
    }
}

impl Deref for LogicMap {
    type Target = Map;

    fn deref(&self) -> &Map {
        &self.map
    }
}

impl DerefMut for LogicMap {
    fn deref_mut(&mut self) -> &mut Map {
        &mut self.map
    }
}

impl LogicMap {
    pub fn new(defs: Arc<NodeDefManager>, db: Box<dyn MapDatabase>, settings: &WorldSettings) -> Self {
        Self {
            map: Map::new(defs),
            db,
            seed: settings.seed,
            chunksize: settings.chunksize.max(1),
            compression_level: settings.compression_level,
            chunks_in_progress: HashSet::new(),
            emerge_queue: HashSet::new(),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn chunksize(&self) -> i16 {
        self.chunksize
    }

    /* Persistence */

    pub fn begin_save(&mut self) {
        self.db.begin_save();
    }

    pub fn end_save(&mut self) {
        self.db.end_save();
    }

    /// Write one loaded block to the database
    pub fn save_block(&mut self, p: IVec3) -> Result<()> {
        let defs = self.map.node_defs().clone();
        let block = self.map.get_block_no_create_mut(p).ok_or(Error::InvalidPosition(p))?;
        write_block(self.db.as_mut(), block, &defs, self.compression_level)
    }

    /// Read a block from the database into memory, replacing any loaded
    /// copy. `Ok(None)` when the database has no such block.
    pub fn load_block(&mut self, p: IVec3) -> Result<Option<&mut MapBlock>> {
        let Some(blob) = self.db.load_block(p)? else { return Ok(None) };
        let Some((&version, body)) = blob.split_first() else {
            return Err(Error::Serialization(format!("empty blob for block {}", p)));
        };
        let mut block = MapBlock::new(p);
        block.deserialize(body, version, true, self.map.node_defs_mut())?;
        // Freshly read from disk; only an upgrade needs a rewrite
        block.reset_modified();
        if version < SER_FMT_VER_HIGHEST_WRITE {
            block.raise_modified(ModifiedState::WriteNeeded, MOD_REASON_EXPIRE_DAYNIGHTDIFF);
        }
        self.map.insert_block(block);
        self.reconcile_loaded_block(p);
        Ok(self.map.get_block_no_create_mut(p))
    }

    /// Repair light on the seams between a block just read from storage and
    /// its loaded neighbours
    fn reconcile_loaded_block(&mut self, p: IVec3) {
        if !FACE_DIRS.iter().any(|d| self.map.get_block_no_create(p + *d).is_some()) {
            return;
        }
        let mut modified = HashSet::new();
        lighting::update_block_border_lighting(&mut self.map, p, &mut modified);
        for bp in modified {
            if let Some(block) = self.map.get_block_no_create_mut(bp) {
                block.expire_day_night_diff();
            }
        }
    }

    /// Save every loaded block at least as dirty as `level`. Returns how
    /// many were written.
    pub fn save(&mut self, level: ModifiedState) -> usize {
        let defs = self.map.node_defs().clone();
        let compression_level = self.compression_level;
        let db = self.db.as_mut();
        db.begin_save();
        let mut saved = 0usize;
        let mut failed = 0usize;
        for block in self.map.blocks_mut() {
            if block.modified() == ModifiedState::Clean || block.modified() < level {
                continue;
            }
            match write_block(db, block, &defs, compression_level) {
                Ok(()) => saved += 1,
                Err(e) => {
                    log::error!("Failed to save block {}: {}", block.pos(), e);
                    failed += 1;
                }
            }
        }
        db.end_save();
        if saved > 0 || failed > 0 {
            log::info!("Saved {} blocks ({} failed)", saved, failed);
        }
        saved
    }

    /// Positions of every block that is loaded or stored
    pub fn list_all_loadable_blocks(&mut self) -> Result<Vec<IVec3>> {
        let mut all: HashSet<IVec3> = self.db.list_all_loadable_blocks()?.into_iter().collect();
        all.extend(self.map.loaded_block_positions());
        let mut all: Vec<IVec3> = all.into_iter().collect();
        all.sort_by_key(|p| (p.z, p.y, p.x));
        Ok(all)
    }

    /// Age blocks and unload idle ones, writing dirty blocks first
    pub fn timer_update(&mut self, dtime: f32, unload_timeout: f32, max_loaded_blocks: usize, unloaded: &mut Vec<IVec3>) {
        let defs = self.map.node_defs().clone();
        let compression_level = self.compression_level;
        let db = self.db.as_mut();
        db.begin_save();
        self.map.timer_update(dtime, unload_timeout, max_loaded_blocks, unloaded, &mut |block| {
            match write_block(db, block, &defs, compression_level) {
                Ok(()) => true,
                Err(e) => {
                    log::error!("Failed to save block {} before unload: {}", block.pos(), e);
                    false
                }
            }
        });
        db.end_save();
    }

    /* Generation */

    /// Loaded block at `p`; otherwise queue it for emerging and return
    /// `None`
    pub fn get_block_or_emerge(&mut self, p: IVec3) -> Option<&mut MapBlock> {
        if self.map.get_block_no_create(p).is_some() {
            return self.map.get_block_no_create_mut(p);
        }
        if is_valid_block_pos(p) {
            self.emerge_queue.insert(p);
        }
        None
    }

    pub fn emerge_queue_len(&self) -> usize {
        self.emerge_queue.len()
    }

    /// Prepare a generator job for the chunk containing `blockpos`.
    ///
    /// The chunk plus a one block border is emerged into the job's buffer.
    /// Returns `None` when the chunk is already being generated or reaches
    /// past the map limits.
    pub fn init_block_make(&mut self, blockpos: IVec3) -> Option<BlockMakeData> {
        let bpmin = get_chunk_containing_block(blockpos, self.chunksize);
        let bpmax = bpmin + IVec3::splat(self.chunksize as i32 - 1);
        let full_bpmin = bpmin - IVec3::ONE;
        let full_bpmax = bpmax + IVec3::ONE;
        if !is_valid_block_pos(full_bpmin) || !is_valid_block_pos(full_bpmax) {
            log::debug!("Chunk {} is outside the generation limit", bpmin);
            return None;
        }
        if !self.chunks_in_progress.insert(bpmin) {
            return None;
        }
        log::debug!("init_block_make: chunk {}..{} for block {}", bpmin, bpmax, blockpos);

        let mut data = BlockMakeData::new(self.map.node_defs().clone(), self.seed);
        data.blockpos_min = bpmin;
        data.blockpos_max = bpmax;
        data.blockpos_requested = blockpos;
        data.vmanip.initial_emerge(self, full_bpmin, full_bpmax, true);
        Some(data)
    }

    /// Integrate a finished job: blit it into the map with lighting, repair
    /// light on the chunk's seams, take over its liquid queue and mark the
    /// central chunk generated
    pub fn finish_block_make(&mut self, mut data: BlockMakeData, modified_blocks: &mut HashSet<IVec3>) {
        let bpmin = data.blockpos_min;
        let bpmax = data.blockpos_max;

        let mut changed = HashSet::new();
        lighting::blit_back_with_light(self, &mut data.vmanip, &mut changed);
        for z in bpmin.z..=bpmax.z {
            for y in bpmin.y..=bpmax.y {
                for x in bpmin.x..=bpmax.x {
                    lighting::update_block_border_lighting(self, IVec3::new(x, y, z), &mut changed);
                }
            }
        }
        self.map.transforming_liquid.extend(data.transforming_liquid);

        for &p in &changed {
            if let Some(block) = self.map.get_block_no_create_mut(p) {
                block.expire_day_night_diff();
                block.raise_modified(ModifiedState::WriteNeeded, MOD_REASON_EXPIRE_DAYNIGHTDIFF);
            }
        }
        for z in bpmin.z..=bpmax.z {
            for y in bpmin.y..=bpmax.y {
                for x in bpmin.x..=bpmax.x {
                    if let Some(block) = self.map.get_block_no_create_mut(IVec3::new(x, y, z)) {
                        block.set_generated(true);
                    }
                }
            }
        }
        modified_blocks.extend(changed);
        self.chunks_in_progress.remove(&bpmin);
        log::debug!("finish_block_make: chunk {}..{} generated", bpmin, bpmax);
    }

    /// Abandon a job whose generator failed
    pub fn cancel_block_make(&mut self, chunk: IVec3) {
        self.chunks_in_progress.remove(&chunk);
    }

    /// Generate the chunk containing `blockpos` on the calling thread
    pub fn generate_block(
        &mut self,
        blockpos: IVec3,
        generator: &mut dyn MapGenerator,
        modified_blocks: &mut HashSet<IVec3>,
    ) -> bool {
        let Some(mut data) = self.init_block_make(blockpos) else { return false };
        generator.make_chunk(&mut data);
        self.finish_block_make(data, modified_blocks);
        true
    }

    /// Serve queued emerge requests: blocks generated on disk are loaded,
    /// the rest are handed to `emerge` as chunk jobs. Finished jobs are
    /// integrated. Returns the blocks that became available.
    pub fn run_emerge(&mut self, emerge: &mut EmergeManager, modified_blocks: &mut HashSet<IVec3>) -> Vec<IVec3> {
        let mut ready = Vec::new();
        for p in std::mem::take(&mut self.emerge_queue) {
            match self.map.get_block_no_create(p).map(MapBlock::is_generated) {
                Some(true) => {
                    ready.push(p);
                    continue;
                }
                Some(false) => {}
                None => match self.load_block(p) {
                    Ok(Some(block)) if block.is_generated() => {
                        ready.push(p);
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => log::error!("Failed to load block {}: {}", p, e),
                },
            }
            let chunk = get_chunk_containing_block(p, self.chunksize);
            if self.chunks_in_progress.contains(&chunk) {
                continue;
            }
            if let Some(data) = self.init_block_make(p) {
                if !emerge.request(data, 0.0) {
                    self.chunks_in_progress.remove(&chunk);
                }
            }
        }

        for result in emerge.poll_results() {
            match result {
                EmergeResult::Generated(data) => {
                    let (bpmin, bpmax) = (data.blockpos_min, data.blockpos_max);
                    self.finish_block_make(data, modified_blocks);
                    for z in bpmin.z..=bpmax.z {
                        for y in bpmin.y..=bpmax.y {
                            for x in bpmin.x..=bpmax.x {
                                ready.push(IVec3::new(x, y, z));
                            }
                        }
                    }
                }
                EmergeResult::Failed(chunk) => self.cancel_block_make(chunk),
            }
        }
        ready
    }

    /// Recompute light of one block from scratch
    pub fn repair_block_light(&mut self, blockpos: IVec3, modified_blocks: &mut HashSet<IVec3>) {
        lighting::bulk::repair_block_light(self, blockpos, modified_blocks);
    }
}

impl MapAccess for LogicMap {
    fn node_defs(&self) -> &Arc<NodeDefManager> {
        self.map.node_defs()
    }

    fn get_block_no_create(&self, p: IVec3) -> Option<&MapBlock> {
        self.map.get_block_no_create(p)
    }

    fn get_block_no_create_mut(&mut self, p: IVec3) -> Option<&mut MapBlock> {
        self.map.get_block_no_create_mut(p)
    }

    fn create_block(&mut self, p: IVec3) -> &mut MapBlock {
        self.map.create_block(p)
    }

    /// Loaded block, else the stored one, else (with `create_blank`) a new
    /// empty block
    fn emerge_block(&mut self, p: IVec3, create_blank: bool) -> Option<&mut MapBlock> {
        if self.map.get_block_no_create(p).is_none() {
            match self.load_block(p) {
                Ok(_) => {}
                Err(e) => log::error!("Failed to load block {}: {}", p, e),
            }
        }
        if self.map.get_block_no_create(p).is_some() {
            return self.map.get_block_no_create_mut(p);
        }
        if create_blank {
            Some(self.map.create_block(p))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::MapgenSinglenode;
    use crate::map::database::{FileDatabase, MemoryDatabase};
    use crate::voxel::node::{LightBank, MapNode, CONTENT_AIR};

    fn settings() -> WorldSettings {
        WorldSettings { chunksize: 1, ..WorldSettings::default() }
    }

    fn defs() -> Arc<NodeDefManager> {
        Arc::new(NodeDefManager::with_default_content())
    }

    #[test]
    fn test_save_and_reload() {
        let defs = defs();
        let stone = defs.get_id("default:stone").unwrap();
        let mut map = LogicMap::new(defs.clone(), Box::new(MemoryDatabase::new()), &settings());
        let block = map.create_block(IVec3::new(1, 2, 3));
        block.fill(MapNode::new(stone));
        block.set_generated(true);
        assert_eq!(map.save(ModifiedState::WriteAtUnload), 1);
        assert_eq!(map.get_block_no_create(IVec3::new(1, 2, 3)).unwrap().modified(), ModifiedState::Clean);
        // Nothing dirty any more
        assert_eq!(map.save(ModifiedState::WriteAtUnload), 0);

        map.remove_block(IVec3::new(1, 2, 3));
        assert_eq!(map.list_all_loadable_blocks().unwrap(), vec![IVec3::new(1, 2, 3)]);
        assert_eq!(map.get_node_or_ignore(IVec3::new(17, 33, 49)), MapNode::ignore());

        let block = map.emerge_block(IVec3::new(1, 2, 3), false).unwrap();
        assert!(block.is_generated());
        assert_eq!(block.get_node_no_check(IVec3::new(4, 5, 6)).content(), stone);
        assert!(map.emerge_block(IVec3::new(9, 9, 9), false).is_none());
    }

    #[test]
    fn test_file_backed_map() {
        let dir = tempfile::tempdir().unwrap();
        let defs = defs();
        let dirt = defs.get_id("default:dirt").unwrap();
        {
            let db = FileDatabase::open(dir.path()).unwrap();
            let mut map = LogicMap::new(defs.clone(), Box::new(db), &settings());
            map.create_block(IVec3::ZERO).fill(MapNode::new(dirt));
            map.save_block(IVec3::ZERO).unwrap();
        }
        let db = FileDatabase::open(dir.path()).unwrap();
        let mut map = LogicMap::new(defs, Box::new(db), &settings());
        assert!(map.load_block(IVec3::ZERO).unwrap().is_some());
        assert_eq!(map.get_node(IVec3::new(15, 15, 15)).unwrap().content(), dirt);
    }

    #[test]
    fn test_unload_writes_dirty_blocks() {
        let defs = defs();
        let mut map = LogicMap::new(defs, Box::new(MemoryDatabase::new()), &settings());
        map.create_block(IVec3::ZERO);
        map.create_block(IVec3::X);
        map.get_block_no_create_mut(IVec3::X).unwrap().ref_grab();

        let mut unloaded = Vec::new();
        map.timer_update(10.0, 5.0, 0, &mut unloaded);
        assert_eq!(unloaded, vec![IVec3::ZERO]);
        assert!(map.get_block_no_create(IVec3::X).is_some());
        assert_eq!(map.list_all_loadable_blocks().unwrap(), vec![IVec3::ZERO, IVec3::X]);
    }

    #[test]
    fn test_generate_chunk() {
        let defs = defs();
        let stone = defs.get_id("default:stone").unwrap();
        let mut map = LogicMap::new(defs, Box::new(MemoryDatabase::new()), &settings());
        let mut generator = MapgenSinglenode::new(&settings(), "default:stone");
        let mut modified = HashSet::new();

        let data = map.init_block_make(IVec3::new(2, 0, 0)).unwrap();
        assert_eq!(data.blockpos_min, IVec3::new(2, 0, 0));
        // Second request for the same chunk while the first is in flight
        assert!(map.init_block_make(IVec3::new(2, 0, 0)).is_none());
        map.cancel_block_make(IVec3::new(2, 0, 0));
        drop(data);

        assert!(map.generate_block(IVec3::new(2, 0, 0), &mut generator, &mut modified));
        assert!(modified.contains(&IVec3::new(2, 0, 0)));
        let block = map.get_block_no_create(IVec3::new(2, 0, 0)).unwrap();
        assert!(block.is_generated());
        assert_eq!(block.get_node_no_check(IVec3::ZERO).content(), stone);
        // The border blocks exist but are not generated
        assert!(!map.get_block_no_create(IVec3::new(3, 0, 0)).unwrap().is_generated());
    }

    fn night_light(map: &LogicMap, p: IVec3) -> u8 {
        let n = map.get_node(p).unwrap();
        n.get_light(LightBank::Night, map.node_defs().get_node(n))
    }

    #[test]
    fn test_load_repairs_seam_light() {
        let defs = defs();
        let lamp = defs.get_id("default:mese_lamp").unwrap();
        let mut map = LogicMap::new(defs, Box::new(MemoryDatabase::new()), &settings());
        for p in [IVec3::ZERO, IVec3::X] {
            let block = map.create_block(p);
            block.fill(MapNode::new(CONTENT_AIR));
            block.set_is_underground(true);
            block.set_generated(true);
        }
        map.save(ModifiedState::WriteAtUnload);
        map.remove_block(IVec3::X);

        let mut modified = HashSet::new();
        map.add_node_and_update(IVec3::new(15, 8, 8), MapNode::new(lamp), &mut modified, true).unwrap();
        assert_eq!(night_light(&map, IVec3::new(14, 8, 8)), 13);
        assert!(!map.get_block_no_create(IVec3::ZERO).unwrap().is_lighting_complete(LightBank::Night, 0));

        assert!(map.emerge_block(IVec3::X, false).is_some());
        assert_eq!(night_light(&map, IVec3::new(16, 8, 8)), 13);
        assert_eq!(night_light(&map, IVec3::new(20, 8, 8)), 9);
        assert!(map.get_block_no_create(IVec3::ZERO).unwrap().is_lighting_complete(LightBank::Night, 0));
        assert!(map.get_block_no_create(IVec3::X).unwrap().is_lighting_complete(LightBank::Night, 1));
    }

    #[test]
    fn test_generated_chunk_is_lit_from_neighbours() {
        let defs = defs();
        let lamp = defs.get_id("default:mese_lamp").unwrap();
        let mut map = LogicMap::new(defs, Box::new(MemoryDatabase::new()), &settings());
        let neighbour = IVec3::new(2, 0, 0);
        let block = map.create_block(neighbour);
        block.fill(MapNode::new(CONTENT_AIR));
        block.set_is_underground(true);
        block.set_generated(true);
        let mut modified = HashSet::new();
        map.add_node_and_update(IVec3::new(32, 8, 8), MapNode::new(lamp), &mut modified, true).unwrap();
        assert!(!map.get_block_no_create(neighbour).unwrap().is_lighting_complete(LightBank::Night, 1));

        let mut generator = MapgenSinglenode::new(&settings(), "air");
        assert!(map.generate_block(IVec3::X, &mut generator, &mut modified));
        assert_eq!(night_light(&map, IVec3::new(31, 8, 8)), 13);
        assert_eq!(night_light(&map, IVec3::new(24, 8, 8)), 6);
        assert!(map.get_block_no_create(neighbour).unwrap().is_lighting_complete(LightBank::Night, 1));
        assert!(map.get_block_no_create(IVec3::X).unwrap().is_lighting_complete(LightBank::Night, 0));
    }

    #[test]
    fn test_get_block_or_emerge_queues() {
        let defs = defs();
        let mut map = LogicMap::new(defs.clone(), Box::new(MemoryDatabase::new()), &settings());
        assert!(map.get_block_or_emerge(IVec3::new(0, 0, 5)).is_none());
        assert!(map.get_block_or_emerge(IVec3::new(0, 0, 5)).is_none());
        assert_eq!(map.emerge_queue_len(), 1);

        let factory: crate::generation::emerge::GeneratorFactory =
            Arc::new(|| Box::new(MapgenSinglenode::new(&settings(), "air")) as Box<dyn MapGenerator>);
        let mut emerge = EmergeManager::new(factory, 1).unwrap();
        let mut modified = HashSet::new();
        let mut ready = map.run_emerge(&mut emerge, &mut modified);
        while ready.is_empty() {
            match emerge.wait_result() {
                Some(EmergeResult::Generated(data)) => {
                    map.finish_block_make(data, &mut modified);
                    ready.push(IVec3::new(0, 0, 5));
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert!(map.get_block_or_emerge(IVec3::new(0, 0, 5)).unwrap().is_generated());
        assert_eq!(map.emerge_queue_len(), 0);
    }
}

//! MapBlock (de)serialization
//!
//! Formats 11..=21 are read by `legacy`. Layout for versions 22..=28:
//!
//! ```text
//! u8   flags            bit0 underground, bit1 day/night differs, bit3 not generated
//! u16  lighting_complete (27+)
//! u8   content_width = 2, u8 params_width = 2
//! zlib bulk nodes
//! zlib node metadata (old typed records before 23)
//! -- disk only --
//! static objects, u32 timestamp, name-id mapping, node timers
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::core::error::Error;
use crate::core::types::{IVec3, Result, NODES_PER_BLOCK};
use crate::util::serialize::{compress_zlib, write_u8, write_u16, write_u32, Reader};
use crate::voxel::name_id::NameIdMapping;
use crate::voxel::node::{MapNode, CONTENT_IGNORE};
use crate::voxel::nodedef::NodeDefManager;
use super::{legacy, MapBlock, NodeMetadataList, NodeTimerList, StaticObjectList, LIGHTING_COMPLETE_ALL};

/// Version written by default
pub const SER_FMT_VER_HIGHEST_WRITE: u8 = 28;
/// Oldest version that can be written
pub const SER_FMT_VER_LOWEST_WRITE: u8 = 24;
/// Oldest version that can be read
pub const SER_FMT_VER_LOWEST_READ: u8 = 11;

impl MapBlock {
    /// Serialize the block body (without the leading version byte)
    pub fn serialize(&self, version: u8, disk: bool, compression_level: i32, defs: &NodeDefManager) -> Result<Vec<u8>> {
        if !(SER_FMT_VER_LOWEST_WRITE..=SER_FMT_VER_HIGHEST_WRITE).contains(&version) {
            return Err(Error::VersionMismatch { version });
        }
        let mut out = Vec::with_capacity(4096);

        let mut flags = 0u8;
        if self.is_underground {
            flags |= 0x01;
        }
        if self.day_night_diff_peek(defs) {
            flags |= 0x02;
        }
        if !self.generated {
            flags |= 0x08;
        }
        write_u8(&mut out, flags);
        if version >= 27 {
            write_u16(&mut out, self.lighting_complete);
        }

        let mut nimap = NameIdMapping::new();
        let bulk = if disk {
            let local = self.local_id_nodes(&mut nimap, defs);
            MapNode::serialize_bulk(&local, 2, 2)?
        } else {
            MapNode::serialize_bulk(&self.nodes, 2, 2)?
        };
        write_u8(&mut out, 2);
        write_u8(&mut out, 2);
        compress_zlib(&mut out, &bulk, compression_level)?;

        let mut meta = Vec::new();
        self.metadata.serialize(&mut meta, disk);
        compress_zlib(&mut out, &meta, compression_level)?;

        if disk {
            if version == 24 {
                self.node_timers.serialize(&mut out, version);
            }
            self.static_objects.serialize(&mut out);
            write_u32(&mut out, self.timestamp);
            nimap.serialize(&mut out);
            if version >= 25 {
                self.node_timers.serialize(&mut out, version);
            }
        }
        Ok(out)
    }

    /// Copy of the node array with ids replaced by block-local ids assigned
    /// in order of first appearance
    fn local_id_nodes(&self, nimap: &mut NameIdMapping, defs: &NodeDefManager) -> Vec<MapNode> {
        let mut mapping: HashMap<(u16, Option<&str>), u16> = HashMap::new();
        let mut next_id = 0u16;
        let mut out = self.nodes.clone();
        for (i, n) in out.iter_mut().enumerate() {
            let global = n.content();
            // Cells whose name could not be resolved at load keep that name
            let unresolved = if global == CONTENT_IGNORE {
                self.unresolved.get(&(i as u16)).map(String::as_str)
            } else {
                None
            };
            let key = (global, unresolved);
            let id = match mapping.get(&key) {
                Some(&id) => id,
                None => {
                    let id = next_id;
                    next_id += 1;
                    mapping.insert(key, id);
                    let name = unresolved.unwrap_or_else(|| defs.name_of(global));
                    nimap.set(id, name);
                    id
                }
            };
            n.set_content(id);
        }
        out
    }

    /// Deserialize a block body. On disk loads content ids are remapped
    /// through the stored name-id mapping; names unknown to `defs` get dummy
    /// ids allocated (copy-on-write on the shared table) once the whole body
    /// has parsed. Formats before 22 are converted to the current node
    /// layout.
    pub fn deserialize(&mut self, data: &[u8], version: u8, disk: bool, defs: &mut Arc<NodeDefManager>) -> Result<()> {
        if !(SER_FMT_VER_LOWEST_READ..=SER_FMT_VER_HIGHEST_WRITE).contains(&version) {
            return Err(Error::VersionMismatch { version });
        }
        if version <= 21 {
            return self.deserialize_pre22(data, version, disk, defs);
        }
        let mut r = Reader::new(data);

        let flags = r.read_u8()?;
        let is_underground = flags & 0x01 != 0;
        let day_night_differs = flags & 0x02 != 0;
        let generated = flags & 0x08 == 0;
        let lighting_complete = if version >= 27 { r.read_u16()? } else { LIGHTING_COMPLETE_ALL };

        let content_width = r.read_u8()?;
        let params_width = r.read_u8()?;
        if content_width != 1 && content_width != 2 {
            return Err(Error::Serialization(format!("invalid content width {}", content_width)));
        }
        if params_width != 2 {
            return Err(Error::Serialization(format!("invalid params width {}", params_width)));
        }
        let bulk = r.read_zlib()?;
        let mut nodes = MapNode::deserialize_bulk(&bulk, NODES_PER_BLOCK, content_width, params_width)?;

        let meta = r.read_zlib()?;
        let mut node_timers = NodeTimerList::new();
        let parsed = if version >= 23 {
            NodeMetadataList::deserialize(&meta)
        } else {
            let mut list = NodeMetadataList::new();
            legacy::deserialize_legacy_metadata(&meta, &mut list, &mut node_timers).map(|()| list)
        };
        let metadata = match parsed {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Ignoring node metadata of block {:?}: {}", self.pos, e);
                node_timers = NodeTimerList::new();
                NodeMetadataList::new()
            }
        };

        let mut static_objects = StaticObjectList::new();
        let mut timestamp = self.timestamp;
        let mut pending = PendingIds::default();
        if disk {
            if version == 23 {
                r.read_u8()?;
            }
            if version == 24 {
                node_timers = NodeTimerList::deserialize(&mut r, version)?;
            }
            static_objects = StaticObjectList::deserialize(&mut r)?;
            timestamp = r.read_u32()?;
            let nimap = NameIdMapping::deserialize(&mut r)?;
            pending = resolve_block_node_ids(&nimap, &mut nodes, defs, self.pos);
            if version >= 25 {
                node_timers = NodeTimerList::deserialize(&mut r, version)?;
            }
        }

        // Only touch the definitions and the block once everything parsed
        let unresolved = pending.allocate(&mut nodes, defs, self.pos);
        self.nodes = nodes;
        self.metadata = metadata;
        self.node_timers = node_timers;
        self.static_objects = static_objects;
        self.unresolved = unresolved;
        self.is_underground = is_underground;
        self.generated = generated;
        self.lighting_complete = lighting_complete;
        self.day_night_differs = day_night_differs;
        self.day_night_differs_expired = false;
        if disk {
            self.timestamp = timestamp;
            self.disk_timestamp = timestamp;
        }
        Ok(())
    }

    fn deserialize_pre22(&mut self, data: &[u8], version: u8, disk: bool, defs: &mut Arc<NodeDefManager>) -> Result<()> {
        let legacy = legacy::deserialize_pre22(data, version, disk)?;
        let mut nodes = legacy.nodes;
        // Old ids are never the current ones, so network data is mapped too
        let pending = resolve_block_node_ids(&legacy.nimap, &mut nodes, defs, self.pos);
        let unresolved = pending.allocate(&mut nodes, defs, self.pos);
        legacy::convert_pre22_nodes(&mut nodes, defs);

        self.nodes = nodes;
        self.metadata = legacy.metadata;
        self.node_timers = legacy.node_timers;
        self.static_objects = legacy.static_objects;
        self.unresolved = unresolved;
        self.is_underground = legacy.is_underground;
        self.generated = legacy.generated;
        self.lighting_complete = LIGHTING_COMPLETE_ALL;
        self.day_night_differs = legacy.day_night_differs;
        self.day_night_differs_expired = true;
        if disk {
            self.timestamp = legacy.timestamp;
            self.disk_timestamp = legacy.timestamp;
        }
        Ok(())
    }

    /// Extra data only sent over the network
    pub fn serialize_network_specific(&self, out: &mut Vec<u8>) {
        write_u8(out, 2);
    }

    pub fn deserialize_network_specific(&mut self, data: &[u8]) -> Result<()> {
        let mut r = Reader::new(data);
        let version = r.read_u8()?;
        if version > 2 {
            log::debug!("Unknown network-specific block data version {}", version);
        }
        Ok(())
    }
}

/// Names of a loaded block that `defs` does not know yet, with the cells
/// using each
#[derive(Debug, Default)]
struct PendingIds {
    cells: BTreeMap<String, Vec<usize>>,
}

impl PendingIds {
    /// Allocate a dummy id per pending name and write it into its cells.
    /// Returns the names of cells left at IGNORE because no id was free.
    fn allocate(self, nodes: &mut [MapNode], defs: &mut Arc<NodeDefManager>, blockpos: IVec3) -> BTreeMap<u16, String> {
        let mut unresolved = BTreeMap::new();
        for (name, cells) in self.cells {
            match Arc::make_mut(defs).allocate_dummy(&name) {
                Some(id) => {
                    for i in cells {
                        nodes[i].set_content(id);
                    }
                }
                None => {
                    log::error!(
                        "{}",
                        Error::UnknownContent(format!("{} in block {:?}: no id left to allocate", name, blockpos))
                    );
                    unresolved.extend(cells.into_iter().map(|i| (i as u16, name.clone())));
                }
            }
        }
        unresolved
    }
}

/// Map block-local ids to ids of `defs`. Cells whose name `defs` does not
/// know are set to IGNORE and returned for a later `PendingIds::allocate`.
fn resolve_block_node_ids(
    nimap: &NameIdMapping,
    nodes: &mut [MapNode],
    defs: &NodeDefManager,
    blockpos: IVec3,
) -> PendingIds {
    let mut resolved: HashMap<u16, Option<u16>> = HashMap::new();
    let mut pending = PendingIds::default();
    let mut unnamed = 0usize;
    for (i, n) in nodes.iter_mut().enumerate() {
        let local = n.content();
        let Some(name) = nimap.get_name(local) else {
            unnamed += 1;
            n.set_content(CONTENT_IGNORE);
            continue;
        };
        match *resolved.entry(local).or_insert_with(|| defs.get_id(name)) {
            Some(id) => n.set_content(id),
            None => {
                n.set_content(CONTENT_IGNORE);
                pending.cells.entry(name.to_string()).or_default().push(i);
            }
        }
    }
    if unnamed > 0 {
        log::error!("Block {:?} has {} nodes with ids missing from its name-id mapping", blockpos, unnamed);
    }
    pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{IVec3, Vec3};
    use crate::voxel::block::{NodeMetadata, NodeTimer, StaticObject};
    use crate::voxel::nodedef::ContentFeatures;

    /// Small deterministic generator for test data
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u32 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (self.0 >> 33) as u32
        }
    }

    fn random_block(defs: &NodeDefManager, rng: &mut Lcg) -> MapBlock {
        let names = ["default:stone", "default:dirt", "air", "default:torch", "default:water_source"];
        let ids: Vec<u16> = names.iter().map(|n| defs.get_id(n).unwrap()).collect();
        let mut b = MapBlock::new(IVec3::new(2, -1, 5));
        for i in 0..NODES_PER_BLOCK {
            let c = ids[rng.next() as usize % ids.len()];
            b.set_node_silent(i, MapNode::with_params(c, rng.next() as u8, rng.next() as u8));
        }
        for k in 0..20 {
            let mut m = NodeMetadata::new();
            m.set_string("infotext", &format!("cell {}", k));
            m.set_string("n", &rng.next().to_string());
            let rel = IVec3::new(k % 16, k / 16 + 1, (k * 5) % 16);
            b.metadata.set(rel, m);
        }
        for k in 0..5 {
            b.node_timers.set(IVec3::new(k, k, 15 - k), NodeTimer::new(1.0 + k as f32, 0.5));
        }
        for k in 0..3 {
            b.static_objects.insert(None, StaticObject::new(7, Vec3::new(k as f32 + 0.5, 1.25, -2.0), vec![k as u8; 4]));
        }
        b.set_timestamp(12345);
        b.set_generated(true);
        b.set_is_underground(true);
        b.set_lighting_complete(0x0f0f);
        b
    }

    fn assert_blocks_equal(a: &MapBlock, b: &MapBlock, a_defs: &NodeDefManager, b_defs: &NodeDefManager) {
        for i in 0..NODES_PER_BLOCK {
            let (na, nb) = (a.nodes[i], b.nodes[i]);
            assert_eq!(a_defs.name_of(na.content()), b_defs.name_of(nb.content()), "cell {}", i);
            assert_eq!(na.param1, nb.param1);
            assert_eq!(na.param2, nb.param2);
        }
        assert_eq!(a.metadata, b.metadata);
        assert_eq!(a.node_timers, b.node_timers);
        assert_eq!(a.static_objects.stored, b.static_objects.stored);
        assert_eq!(a.timestamp(), b.timestamp());
        assert_eq!(a.is_generated(), b.is_generated());
        assert_eq!(a.is_underground(), b.is_underground());
        assert_eq!(a.lighting_complete(), b.lighting_complete());
    }

    #[test]
    fn test_disk_round_trip() {
        let defs = NodeDefManager::with_default_content();
        let block = random_block(&defs, &mut Lcg(99));
        let data = block.serialize(28, true, 6, &defs).unwrap();

        let mut shared = Arc::new(defs.clone());
        let mut back = MapBlock::new(block.pos());
        back.deserialize(&data, 28, true, &mut shared).unwrap();
        assert_blocks_equal(&block, &back, &defs, &shared);
        assert_eq!(back.nodes, block.nodes);
    }

    #[test]
    fn test_round_trip_with_reassigned_ids() {
        let defs = NodeDefManager::with_default_content();
        let block = random_block(&defs, &mut Lcg(7));
        let data = block.serialize(28, true, -1, &defs).unwrap();

        // A table that registers extra nodes first so every id shifts
        let mut other = NodeDefManager::new();
        for i in 0..10 {
            other.register(ContentFeatures::solid(&format!("mod:filler{}", i)));
        }
        let full = NodeDefManager::with_default_content();
        for name in ["default:water_source", "default:torch", "default:dirt", "default:stone"] {
            let id = full.get_id(name).unwrap();
            other.register(full.get(id).clone());
        }
        let mut shared = Arc::new(other);
        let mut back = MapBlock::new(block.pos());
        back.deserialize(&data, 28, true, &mut shared).unwrap();
        assert_blocks_equal(&block, &back, &defs, &shared);
        assert_ne!(
            shared.get_id("default:stone").unwrap(),
            defs.get_id("default:stone").unwrap()
        );
    }

    #[test]
    fn test_unknown_names_get_dummies_and_survive() {
        let mut defs = NodeDefManager::new();
        let special = defs.register(ContentFeatures::solid("mod:special"));
        let mut block = MapBlock::new(IVec3::ZERO);
        block.fill(MapNode::new(crate::voxel::node::CONTENT_AIR));
        block.set_node(IVec3::new(4, 4, 4), MapNode::new(special)).unwrap();
        let data = block.serialize(28, true, 1, &defs).unwrap();

        let mut shared = Arc::new(NodeDefManager::new());
        let mut back = MapBlock::new(IVec3::ZERO);
        back.deserialize(&data, 28, true, &mut shared).unwrap();
        let c = back.get_node_no_check(IVec3::new(4, 4, 4)).content();
        assert_eq!(shared.name_of(c), "mod:special");

        // Written again, the name is preserved
        let again = back.serialize(28, true, 1, &shared).unwrap();
        let mut original = Arc::new(defs);
        let mut third = MapBlock::new(IVec3::ZERO);
        third.deserialize(&again, 28, true, &mut original).unwrap();
        assert_eq!(third.get_node_no_check(IVec3::new(4, 4, 4)).content(), special);
    }

    #[test]
    fn test_network_form_keeps_raw_ids() {
        let defs = NodeDefManager::with_default_content();
        let block = random_block(&defs, &mut Lcg(3));
        let data = block.serialize(28, false, 6, &defs).unwrap();
        let mut shared = Arc::new(NodeDefManager::new());
        let mut back = MapBlock::new(block.pos());
        back.deserialize(&data, 28, false, &mut shared).unwrap();
        assert_eq!(back.nodes, block.nodes);
        assert!(back.node_timers.is_empty());
    }

    #[test]
    fn test_older_versions() {
        let defs = NodeDefManager::with_default_content();
        let block = random_block(&defs, &mut Lcg(11));
        for version in [24u8, 25, 26, 27] {
            let data = block.serialize(version, true, 6, &defs).unwrap();
            let mut shared = Arc::new(defs.clone());
            let mut back = MapBlock::new(block.pos());
            back.deserialize(&data, version, true, &mut shared).unwrap();
            assert_eq!(back.nodes, block.nodes);
            assert_eq!(back.node_timers, block.node_timers);
            if version < 27 {
                assert_eq!(back.lighting_complete(), LIGHTING_COMPLETE_ALL);
            }
        }
    }

    #[test]
    fn test_version_mismatch() {
        let defs = NodeDefManager::with_default_content();
        let block = MapBlock::new(IVec3::ZERO);
        assert!(matches!(block.serialize(29, true, 6, &defs), Err(Error::VersionMismatch { version: 29 })));
        let mut shared = Arc::new(defs);
        let mut back = MapBlock::new(IVec3::ZERO);
        assert!(matches!(back.deserialize(&[0u8; 8], 10, true, &mut shared), Err(Error::VersionMismatch { .. })));
    }

    /// A format 21 disk body: flags, three parallel node arrays, typed
    /// metadata, an empty block object list, static objects, timestamp and
    /// the block's name-id mapping
    fn v21_blob() -> Vec<u8> {
        use crate::util::serialize::{serialize_string16, write_i16};

        let mut content = vec![0x7fu8; NODES_PER_BLOCK];
        let mut param1 = vec![0u8; NODES_PER_BLOCK];
        let mut param2 = vec![0u8; NODES_PER_BLOCK];
        // Stone carrying coal, an extended id (0x805) and a torch on -x
        content[0] = 0;
        param1[0] = 1;
        content[1] = 0x80;
        param2[1] = 0x53;
        content[2] = 3;
        param2[2] = 0x02;
        content[3] = 15;

        let mut bulk = content;
        bulk.extend_from_slice(&param1);
        bulk.extend_from_slice(&param2);

        let chest = b"List 0 32\nWidth 0\nEndInventoryList\nEndInventory\n".to_vec();
        let mut meta = Vec::new();
        write_u16(&mut meta, 1);
        write_u16(&mut meta, 1);
        write_u16(&mut meta, 3);
        write_i16(&mut meta, 15);
        serialize_string16(&mut meta, &chest);

        let mut nimap = NameIdMapping::new();
        nimap.set(0, "default:stone");
        nimap.set(3, "default:torch");
        nimap.set(15, "default:chest");
        nimap.set(0x805, "default:dirt");
        nimap.set(0x7f, "air");

        let mut statics = StaticObjectList::new();
        statics.insert(None, StaticObject::new(7, Vec3::new(1.0, 2.0, 3.0), vec![1, 2]));

        let mut out = Vec::new();
        write_u8(&mut out, 0x01);
        compress_zlib(&mut out, &bulk, 6).unwrap();
        compress_zlib(&mut out, &meta, 6).unwrap();
        write_u16(&mut out, 0);
        statics.serialize(&mut out);
        write_u32(&mut out, 4242);
        nimap.serialize(&mut out);
        out
    }

    #[test]
    fn test_reads_format_21_block() {
        let defs = NodeDefManager::with_default_content();
        let mut shared = Arc::new(defs);
        let mut back = MapBlock::new(IVec3::new(1, 2, 3));
        back.deserialize(&v21_blob(), 21, true, &mut shared).unwrap();

        let name = |rel: IVec3| shared.name_of(back.get_node_no_check(rel).content()).to_string();
        assert_eq!(name(IVec3::new(0, 0, 0)), "default:stone_with_coal");
        assert_eq!(back.get_node_no_check(IVec3::ZERO).param1, 0);
        assert_eq!(name(IVec3::new(1, 0, 0)), "default:dirt");
        assert_eq!(back.get_node_no_check(IVec3::new(1, 0, 0)).param2, 0x03);
        assert_eq!(name(IVec3::new(2, 0, 0)), "default:torch");
        // One-hot 0x02 is the fourth wallmounted direction
        assert_eq!(back.get_node_no_check(IVec3::new(2, 0, 0)).param2, 3);
        assert_eq!(name(IVec3::new(5, 9, 9)), "air");

        let chest = back.metadata.get(IVec3::new(3, 0, 0)).unwrap();
        assert!(chest.inventory.starts_with("List main 32\n"));
        assert_eq!(back.static_objects.stored.len(), 1);
        assert_eq!(back.timestamp(), 4242);
        assert!(back.is_underground());
        assert!(back.is_generated());
        assert_eq!(back.lighting_complete(), LIGHTING_COMPLETE_ALL);

        // Written back in the current format it reads the same
        let again = back.serialize(28, true, 6, &shared).unwrap();
        let mut third = MapBlock::new(back.pos());
        third.deserialize(&again, 28, true, &mut shared).unwrap();
        assert_eq!(third.nodes, back.nodes);
        assert_eq!(third.metadata, back.metadata);
    }

    #[test]
    fn test_failed_parse_allocates_no_dummies() {
        let mut defs = NodeDefManager::new();
        let special = defs.register(ContentFeatures::solid("mod:special"));
        let mut block = MapBlock::new(IVec3::ZERO);
        block.fill(MapNode::new(crate::voxel::node::CONTENT_AIR));
        block.set_node(IVec3::new(1, 1, 1), MapNode::new(special)).unwrap();
        block.node_timers.set(IVec3::new(2, 2, 2), NodeTimer::new(3.0, 0.0));
        let data = block.serialize(28, true, 6, &defs).unwrap();

        // Cut inside the timer list, after the name-id mapping
        let table = Arc::new(NodeDefManager::new());
        let mut shared = Arc::clone(&table);
        let mut back = MapBlock::new(IVec3::ZERO);
        assert!(back.deserialize(&data[..data.len() - 3], 28, true, &mut shared).is_err());
        assert!(shared.get_id("mod:special").is_none());
        assert!(Arc::ptr_eq(&shared, &table));

        back.deserialize(&data, 28, true, &mut shared).unwrap();
        assert!(shared.get_id("mod:special").is_some());
    }

    #[test]
    fn test_truncated_blob_is_rejected_and_block_untouched() {
        let defs = NodeDefManager::with_default_content();
        let block = random_block(&defs, &mut Lcg(5));
        let data = block.serialize(28, true, 6, &defs).unwrap();
        let mut shared = Arc::new(defs);
        let mut back = MapBlock::new(block.pos());
        assert!(back.deserialize(&data[..data.len() - 5], 28, true, &mut shared).is_err());
        assert_eq!(back.get_node_no_check(IVec3::ZERO).content(), CONTENT_IGNORE);
    }
}

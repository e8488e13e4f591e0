//! Reader for block formats 11..=21 and the old node metadata layout
//!
//! These formats keep one content byte per node (bytes above 0x7f borrow
//! the high nibble of param2 for a 12-bit id), use a fixed name-id table
//! before version 21, and store node metadata as per-type binary records.

use crate::core::error::Error;
use crate::core::types::{block_index_to_pos, Result, NODES_PER_BLOCK};
use crate::util::serialize::Reader;
use crate::voxel::name_id::NameIdMapping;
use crate::voxel::node::{MapNode, CONTENT_AIR, CONTENT_IGNORE};
use crate::voxel::nodedef::NodeDefManager;

use super::{NodeMetadata, NodeMetadataList, NodeTimer, NodeTimerList, StaticObjectList, BLOCK_TIMESTAMP_UNDEFINED};

const NODEMETA_GENERIC: i16 = 1;
const NODEMETA_SIGN: i16 = 14;
const NODEMETA_CHEST: i16 = 15;
const NODEMETA_FURNACE: i16 = 16;
const NODEMETA_LOCKABLE_CHEST: i16 = 17;

const CHEST_FORMSPEC: &str = "size[8,9]list[current_name;main;0,0;8,4;]list[current_player;main;0,5;8,4;]";
const FURNACE_FORMSPEC: &str = "size[8,9]list[current_name;fuel;2,3;1,1;]list[current_name;src;2,1;1,1;]\
list[current_name;dst;5,1;2,2;]list[current_player;main;0,5;8,4;]";

/// Content ids renumbered in format 20, as (id from 20 on, id before 20)
const TRANSLATE_19: [(u16, u16); 21] = [
    (0x800, 1),
    (0x801, 4),
    (0x802, 5),
    (0x803, 6),
    (0x804, 7),
    (0x805, 8),
    (0x806, 10),
    (0x807, 11),
    (0x808, 12),
    (0x809, 13),
    (0x80a, 18),
    (0x80b, 19),
    (0x80c, 20),
    (0x80d, 22),
    (0x80e, 23),
    (0x80f, 24),
    (0x810, 25),
    (0x811, 26),
    (0x812, 27),
    (0x813, 28),
    (0x814, 29),
];

/// Name-id table implied by blocks written before format 21
pub fn legacy_name_id_mapping() -> NameIdMapping {
    let mut m = NameIdMapping::new();
    for (id, name) in [
        (0, "default:stone"),
        (2, "default:water_flowing"),
        (3, "default:torch"),
        (9, "default:water_source"),
        (14, "default:sign_wall"),
        (15, "default:chest"),
        (16, "default:furnace"),
        (17, "default:chest_locked"),
        (21, "default:fence_wood"),
        (30, "default:rail"),
        (31, "default:ladder"),
        (32, "default:lava_flowing"),
        (33, "default:lava_source"),
        (0x800, "default:dirt_with_grass"),
        (0x801, "default:tree"),
        (0x802, "default:leaves"),
        (0x803, "default:dirt_with_grass_footsteps"),
        (0x804, "default:mese"),
        (0x805, "default:dirt"),
        (0x806, "default:cloud"),
        (0x807, "default:coalstone"),
        (0x808, "default:wood"),
        (0x809, "default:sand"),
        (0x80a, "default:cobble"),
        (0x80b, "default:steelblock"),
        (0x80c, "default:glass"),
        (0x80d, "default:mossycobble"),
        (0x80e, "default:gravel"),
        (0x80f, "default:sandstone"),
        (0x810, "default:cactus"),
        (0x811, "default:brick"),
        (0x812, "default:clay"),
        (0x813, "default:papyrus"),
        (0x814, "default:bookshelf"),
        (0x815, "default:jungletree"),
        (0x816, "default:junglegrass"),
        (0x817, "default:nyancat"),
        (0x818, "default:nyancat_rainbow"),
        (0x819, "default:apple"),
        (0x820, "default:sapling"),
        (CONTENT_IGNORE, "ignore"),
        (CONTENT_AIR, "air"),
    ] {
        m.set(id, name);
    }
    m
}

/// One node from the three parallel byte arrays of the old bulk layout
fn decode_node(content: u8, param1: u8, param2: u8, version: u8) -> MapNode {
    if version <= 19 {
        // These versions spelled IGNORE and AIR as 255 and 254
        match content {
            255 => return MapNode::with_params(CONTENT_IGNORE, param1, param2),
            254 => return MapNode::with_params(CONTENT_AIR, param1, param2),
            _ => {}
        }
    }
    let mut n = MapNode::with_params(content as u16, param1, param2);
    if content > 0x7f {
        n.param0 = ((content as u16) << 4) | ((param2 >> 4) & 0x0f) as u16;
        n.param2 = param2 & 0x0f;
    }
    if version <= 19 {
        if let Some(&(new, _)) = TRANSLATE_19.iter().find(|(_, old)| *old == n.param0) {
            n.param0 = new;
        }
    }
    n
}

/// Everything read from an old block, with content ids still in the
/// block's own numbering
#[derive(Debug)]
pub struct LegacyBlock {
    pub nodes: Vec<MapNode>,
    pub metadata: NodeMetadataList,
    pub node_timers: NodeTimerList,
    pub static_objects: StaticObjectList,
    pub timestamp: u32,
    pub nimap: NameIdMapping,
    pub is_underground: bool,
    pub day_night_differs: bool,
    pub generated: bool,
}

/// Parse a block body of format 11..=21
pub fn deserialize_pre22(data: &[u8], version: u8, disk: bool) -> Result<LegacyBlock> {
    let mut r = Reader::new(data);
    let flags = r.read_u8()?;
    let is_underground = flags & 0x01 != 0;
    let day_night_differs = flags & 0x02 != 0;
    let generated = version < 18 || flags & 0x08 == 0;

    let bulk = r.read_zlib()?;
    if bulk.len() != NODES_PER_BLOCK * 3 {
        return Err(Error::Serialization(format!(
            "legacy node data has {} bytes, expected {}",
            bulk.len(),
            NODES_PER_BLOCK * 3
        )));
    }
    let (content, params) = bulk.split_at(NODES_PER_BLOCK);
    let (param1, param2) = params.split_at(NODES_PER_BLOCK);
    let nodes: Vec<MapNode> = (0..NODES_PER_BLOCK)
        .map(|i| decode_node(content[i], param1[i], param2[i], version))
        .collect();

    let mut metadata = NodeMetadataList::new();
    let mut node_timers = NodeTimerList::new();
    if version >= 14 {
        let raw = if version <= 15 { r.read_string16()?.to_vec() } else { r.read_zlib()? };
        if let Err(e) = deserialize_legacy_metadata(&raw, &mut metadata, &mut node_timers) {
            log::warn!("Ignoring legacy node metadata: {}", e);
            metadata.clear();
            node_timers = NodeTimerList::new();
        }
    }

    let mut block = LegacyBlock {
        nodes,
        metadata,
        node_timers,
        static_objects: StaticObjectList::new(),
        timestamp: BLOCK_TIMESTAMP_UNDEFINED,
        nimap: legacy_name_id_mapping(),
        is_underground,
        day_night_differs,
        generated,
    };
    if !disk {
        return Ok(block);
    }

    // Block objects were dropped long ago; a non-empty list has no known length
    let object_count = r.read_u16()?;
    if object_count != 0 {
        log::warn!("Ignoring {} legacy block objects and everything after them", object_count);
        return Ok(block);
    }
    if version >= 15 {
        block.static_objects = StaticObjectList::deserialize(&mut r)?;
    }
    if version >= 17 {
        block.timestamp = r.read_u32()?;
    }
    if version >= 21 {
        block.nimap = NameIdMapping::deserialize(&mut r)?;
    }
    Ok(block)
}

/// Conversions applied once ids refer to `defs`: ore nodes that were stone
/// with a mineral in param1, facings moved from param1 to param2, and
/// one-hot wall directions turned into wallmounted indices
pub fn convert_pre22_nodes(nodes: &mut [MapNode], defs: &NodeDefManager) {
    let stone = defs.get_id("default:stone");
    let coal = defs.get_id("default:stone_with_coal");
    let iron = defs.get_id("default:stone_with_iron");
    const WALLMOUNTED_BITS: [u8; 6] = [0x04, 0x08, 0x01, 0x02, 0x10, 0x20];

    for n in nodes.iter_mut() {
        if Some(n.content()) == stone {
            let ore = match n.param1 {
                1 => coal,
                2 => iron,
                _ => None,
            };
            if let Some(ore) = ore {
                n.set_content(ore);
                n.param1 = 0;
            }
        }
        let f = defs.get_node(*n);
        if f.legacy_facedir_simple {
            n.param2 = n.param1;
            n.param1 = 0;
        }
        if f.legacy_wallmounted {
            let old = n.param2;
            n.param2 = WALLMOUNTED_BITS.iter().position(|bit| old & bit != 0).unwrap_or(0) as u8;
        }
    }
}

/// Read one text inventory up to and including its `EndInventory` line
fn read_inventory(r: &mut Reader) -> Result<String> {
    let mut text = String::new();
    loop {
        let rest = r.remaining();
        if rest.is_empty() {
            return Err(Error::Serialization("legacy inventory without EndInventory".to_string()));
        }
        let len = rest.iter().position(|&b| b == b'\n').map_or(rest.len(), |i| i + 1);
        let line = String::from_utf8_lossy(r.take(len)?).into_owned();
        let done = line.trim() == "EndInventory";
        text.push_str(&line);
        if done {
            return Ok(text);
        }
    }
}

fn read_string16(r: &mut Reader) -> Result<String> {
    Ok(String::from_utf8_lossy(r.read_string16()?).into_owned())
}

fn read_string32(r: &mut Reader) -> Result<String> {
    Ok(String::from_utf8_lossy(r.read_string32()?).into_owned())
}

/// Old furnaces kept their times as whitespace separated tenths
fn furnace_times(rest: &[u8]) -> [f32; 4] {
    let text = String::from_utf8_lossy(rest);
    let mut values = text.split_whitespace().map(|s| s.parse::<i32>().unwrap_or(0) as f32 / 10.0);
    std::array::from_fn(|_| values.next().unwrap_or(0.0))
}

/// Decode one typed record. Returns whether the node needs a running timer.
fn deserialize_legacy_body(id: i16, body: &[u8], meta: &mut NodeMetadata) -> Result<bool> {
    let mut r = Reader::new(body);
    match id {
        NODEMETA_GENERIC => {
            meta.inventory = read_inventory(&mut r)?;
            read_string32(&mut r)?;
            read_string16(&mut r)?;
            meta.set_string("infotext", &read_string16(&mut r)?);
            meta.set_string("formspec", &read_string16(&mut r)?);
            r.skip(3)?;
            let vars = r.read_u32()?;
            for _ in 0..vars {
                let name = read_string16(&mut r)?;
                let value = read_string32(&mut r)?;
                meta.set_string(&name, &value);
            }
            Ok(false)
        }
        NODEMETA_SIGN => {
            let text = read_string16(&mut r)?;
            meta.set_string("infotext", &format!("\"{}\"", text));
            meta.set_string("text", &text);
            meta.set_string("formspec", "field[text;;${text}]");
            Ok(false)
        }
        NODEMETA_CHEST | NODEMETA_LOCKABLE_CHEST => {
            if id == NODEMETA_LOCKABLE_CHEST {
                meta.set_string("owner", &read_string16(&mut r)?);
            }
            let inventory = read_inventory(&mut r)?;
            meta.inventory = inventory
                .lines()
                .map(|line| match line.strip_prefix("List 0 ") {
                    Some(size) => format!("List main {}\n", size),
                    None => format!("{}\n", line),
                })
                .collect();
            meta.set_string("formspec", CHEST_FORMSPEC);
            Ok(false)
        }
        NODEMETA_FURNACE => {
            meta.inventory = read_inventory(&mut r)?;
            let [fuel_total, fuel, _src_total, src] = furnace_times(r.remaining());
            meta.set_string("fuel_totaltime", &fuel_total.to_string());
            meta.set_string("fuel_time", &fuel.to_string());
            meta.set_string("src_time", &src.to_string());
            meta.set_string("formspec", FURNACE_FORMSPEC);
            Ok(true)
        }
        other => Err(Error::Serialization(format!("unknown legacy node metadata type {}", other))),
    }
}

/// Parse the old metadata list into `metadata`, starting a 1 s timer for
/// nodes whose record asks for one
pub fn deserialize_legacy_metadata(
    data: &[u8],
    metadata: &mut NodeMetadataList,
    timers: &mut NodeTimerList,
) -> Result<()> {
    let mut r = Reader::new(data);
    let version = r.read_u16()?;
    if version > 1 {
        return Err(Error::Serialization(format!("unsupported legacy node metadata version {}", version)));
    }
    let count = r.read_u16()?;
    for _ in 0..count {
        let index = r.read_u16()? as usize;
        let id = r.read_i16()?;
        let body = r.read_string16()?;
        if index >= NODES_PER_BLOCK {
            log::warn!("Legacy node metadata at invalid index {}, skipping", index);
            continue;
        }
        let rel = block_index_to_pos(index);
        if metadata.get(rel).is_some() {
            log::warn!("Duplicate legacy node metadata at {}, ignoring", rel);
            continue;
        }
        let mut meta = NodeMetadata::new();
        let needs_timer = deserialize_legacy_body(id, body, &mut meta)?;
        metadata.set(rel, meta);
        if needs_timer {
            timers.set(rel, NodeTimer::new(1.0, 0.0));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::IVec3;
    use crate::util::serialize::{serialize_string16, write_i16, write_u16};

    fn record(out: &mut Vec<u8>, index: u16, id: i16, body: &[u8]) {
        write_u16(out, index);
        write_i16(out, id);
        serialize_string16(out, body);
    }

    #[test]
    fn test_decode_node_extended_ids() {
        assert_eq!(decode_node(0x80, 7, 0x5c, 21), MapNode::with_params(0x805, 7, 0x0c));
        assert_eq!(decode_node(3, 0, 0x21, 21), MapNode::with_params(3, 0, 0x21));
        assert_eq!(decode_node(255, 0, 0, 19).content(), CONTENT_IGNORE);
        assert_eq!(decode_node(254, 0, 0, 19).content(), CONTENT_AIR);
        // Pre-20 dirt (8) is renumbered to 0x805
        assert_eq!(decode_node(8, 0, 0, 19).content(), 0x805);
        assert_eq!(decode_node(8, 0, 0, 20).content(), 8);
    }

    #[test]
    fn test_convert_minerals_and_wallmounted() {
        let defs = NodeDefManager::with_default_content();
        let stone = defs.get_id("default:stone").unwrap();
        let torch = defs.get_id("default:torch").unwrap();
        let mut nodes = vec![
            MapNode::with_params(stone, 1, 0),
            MapNode::with_params(stone, 2, 0),
            MapNode::with_params(stone, 0, 0),
            MapNode::with_params(torch, 0, 0x01),
            MapNode::with_params(torch, 0, 0x20),
        ];
        convert_pre22_nodes(&mut nodes, &defs);
        assert_eq!(defs.name_of(nodes[0].content()), "default:stone_with_coal");
        assert_eq!(nodes[0].param1, 0);
        assert_eq!(defs.name_of(nodes[1].content()), "default:stone_with_iron");
        assert_eq!(nodes[2].content(), stone);
        assert_eq!(nodes[3].param2, 2);
        assert_eq!(nodes[4].param2, 5);
    }

    #[test]
    fn test_legacy_metadata_records() {
        let mut sign = Vec::new();
        serialize_string16(&mut sign, b"hello");
        let mut chest = Vec::new();
        serialize_string16(&mut chest, b"sam");
        chest.extend_from_slice(b"List 0 32\nWidth 0\nEndInventoryList\nEndInventory\n");
        let mut furnace = b"List fuel 1\nEndInventoryList\nEndInventory\n".to_vec();
        furnace.extend_from_slice(b"15 5 0 30");

        let mut data = Vec::new();
        write_u16(&mut data, 1);
        write_u16(&mut data, 3);
        record(&mut data, 0x0102, NODEMETA_SIGN, &sign);
        record(&mut data, 5, NODEMETA_LOCKABLE_CHEST, &chest);
        record(&mut data, 7, NODEMETA_FURNACE, &furnace);

        let mut metadata = NodeMetadataList::new();
        let mut timers = NodeTimerList::new();
        deserialize_legacy_metadata(&data, &mut metadata, &mut timers).unwrap();

        let s = metadata.get(IVec3::new(2, 0, 1)).unwrap();
        assert_eq!(s.get_string("text"), "hello");
        assert_eq!(s.get_string("infotext"), "\"hello\"");
        let c = metadata.get(IVec3::new(5, 0, 0)).unwrap();
        assert_eq!(c.get_string("owner"), "sam");
        assert!(c.inventory.starts_with("List main 32\n"));
        let f = metadata.get(IVec3::new(7, 0, 0)).unwrap();
        assert_eq!(f.get_string("fuel_totaltime"), "1.5");
        assert_eq!(f.get_string("src_time"), "3");
        assert!(timers.get(IVec3::new(7, 0, 0)).is_some());
        assert!(timers.get(IVec3::new(5, 0, 0)).is_none());
    }

    #[test]
    fn test_unknown_metadata_type_fails() {
        let mut data = Vec::new();
        write_u16(&mut data, 1);
        write_u16(&mut data, 1);
        record(&mut data, 0, 99, b"");
        let mut metadata = NodeMetadataList::new();
        let mut timers = NodeTimerList::new();
        assert!(deserialize_legacy_metadata(&data, &mut metadata, &mut timers).is_err());
    }
}

//! Per-node metadata: string key/value pairs plus an optional inventory blob

use std::collections::{BTreeMap, BTreeSet};

use crate::core::error::Error;
use crate::core::types::{IVec3, Result};
use crate::core::types::{block_index_to_pos, block_node_index, NODES_PER_BLOCK};
use crate::util::serialize::{serialize_string16, serialize_string32, write_u8, write_u16, write_u32, Reader};

/// Metadata attached to one node
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeMetadata {
    vars: BTreeMap<String, String>,
    privates: BTreeSet<String>,
    /// Serialized inventory, empty when the node has none
    pub inventory: String,
}

impl NodeMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_string(&self, key: &str) -> &str {
        self.vars.get(key).map(String::as_str).unwrap_or("")
    }

    /// Set a value; an empty value removes the key
    pub fn set_string(&mut self, key: &str, value: &str) {
        if value.is_empty() {
            self.vars.remove(key);
            self.privates.remove(key);
        } else {
            self.vars.insert(key.to_string(), value.to_string());
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    pub fn vars(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_private(&self, key: &str) -> bool {
        self.privates.contains(key)
    }

    /// Mark a key private (not sent to observers). Returns false when the key
    /// does not exist.
    pub fn mark_private(&mut self, key: &str, private: bool) -> bool {
        if !self.vars.contains_key(key) {
            return false;
        }
        if private {
            self.privates.insert(key.to_string());
        } else {
            self.privates.remove(key);
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty() && self.inventory.is_empty()
    }

    fn serialize(&self, out: &mut Vec<u8>, version: u8, disk: bool) {
        let vars: Vec<_> = self
            .vars
            .iter()
            .filter(|(k, _)| disk || !self.privates.contains(*k))
            .collect();
        write_u32(out, vars.len() as u32);
        for (k, v) in vars {
            serialize_string16(out, k.as_bytes());
            serialize_string32(out, v.as_bytes());
            if version >= 2 {
                write_u8(out, self.privates.contains(k) as u8);
            }
        }
        serialize_string32(out, self.inventory.as_bytes());
    }

    fn deserialize(r: &mut Reader, version: u8) -> Result<Self> {
        let mut meta = NodeMetadata::new();
        let count = r.read_u32()?;
        for _ in 0..count {
            let key = String::from_utf8_lossy(r.read_string16()?).into_owned();
            let value = String::from_utf8_lossy(r.read_string32()?).into_owned();
            if version >= 2 && r.read_u8()? != 0 {
                meta.privates.insert(key.clone());
            }
            meta.vars.insert(key, value);
        }
        meta.inventory = String::from_utf8_lossy(r.read_string32()?).into_owned();
        Ok(meta)
    }
}

/// All metadata of one block, keyed by block-local node index
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeMetadataList {
    entries: BTreeMap<u16, NodeMetadata>,
}

impl NodeMetadataList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, rel: IVec3) -> Option<&NodeMetadata> {
        self.entries.get(&(block_node_index(rel) as u16))
    }

    pub fn get_mut(&mut self, rel: IVec3) -> Option<&mut NodeMetadata> {
        self.entries.get_mut(&(block_node_index(rel) as u16))
    }

    pub fn set(&mut self, rel: IVec3, meta: NodeMetadata) {
        self.entries.insert(block_node_index(rel) as u16, meta);
    }

    pub fn remove(&mut self, rel: IVec3) -> Option<NodeMetadata> {
        self.entries.remove(&(block_node_index(rel) as u16))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Block-local positions that carry metadata
    pub fn positions(&self) -> Vec<IVec3> {
        self.entries.keys().map(|&i| block_index_to_pos(i as usize)).collect()
    }

    /// Serialize into the (uncompressed) list format
    pub fn serialize(&self, out: &mut Vec<u8>, disk: bool) {
        let entries: Vec<_> = self.entries.iter().filter(|(_, m)| !m.is_empty()).collect();
        if entries.is_empty() {
            write_u8(out, 0);
            return;
        }
        let version = 2;
        write_u8(out, version);
        write_u16(out, entries.len() as u16);
        for (pos, meta) in entries {
            write_u16(out, *pos);
            meta.serialize(out, version, disk);
        }
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut list = NodeMetadataList::new();
        if data.is_empty() {
            return Ok(list);
        }
        let mut r = Reader::new(data);
        let version = r.read_u8()?;
        if version == 0 {
            return Ok(list);
        }
        if version > 2 {
            return Err(Error::Serialization(format!("unsupported node metadata version {}", version)));
        }
        let count = r.read_u16()?;
        for _ in 0..count {
            let pos = r.read_u16()?;
            if pos as usize >= NODES_PER_BLOCK {
                log::warn!("Node metadata at invalid index {}, skipping", pos);
            }
            let meta = NodeMetadata::deserialize(&mut r, version)?;
            if (pos as usize) < NODES_PER_BLOCK {
                list.entries.insert(pos, meta);
            }
        }
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_clear_string() {
        let mut m = NodeMetadata::new();
        m.set_string("owner", "alice");
        assert_eq!(m.get_string("owner"), "alice");
        assert!(m.mark_private("owner", true));
        assert!(!m.mark_private("missing", true));
        m.set_string("owner", "");
        assert!(!m.contains("owner"));
        assert!(!m.is_private("owner"));
        assert!(m.is_empty());
    }

    #[test]
    fn test_list_round_trip() {
        let mut list = NodeMetadataList::new();
        let mut a = NodeMetadata::new();
        a.set_string("text", "hello");
        a.set_string("secret", "42");
        a.mark_private("secret", true);
        a.inventory = "List main 1\nEmpty\nEndInventoryList\nEndInventory\n".to_string();
        list.set(IVec3::new(1, 2, 3), a);
        let mut b = NodeMetadata::new();
        b.set_string("k", "v");
        list.set(IVec3::new(15, 15, 15), b);

        let mut buf = Vec::new();
        list.serialize(&mut buf, true);
        let back = NodeMetadataList::deserialize(&buf).unwrap();
        assert_eq!(back, list);
        assert_eq!(back.positions(), vec![IVec3::new(1, 2, 3), IVec3::new(15, 15, 15)]);
    }

    #[test]
    fn test_network_form_drops_private_vars() {
        let mut list = NodeMetadataList::new();
        let mut a = NodeMetadata::new();
        a.set_string("public", "1");
        a.set_string("secret", "2");
        a.mark_private("secret", true);
        list.set(IVec3::ZERO, a);
        let mut buf = Vec::new();
        list.serialize(&mut buf, false);
        let back = NodeMetadataList::deserialize(&buf).unwrap();
        let m = back.get(IVec3::ZERO).unwrap();
        assert_eq!(m.get_string("public"), "1");
        assert!(!m.contains("secret"));
    }

    #[test]
    fn test_empty_list_is_single_byte() {
        let mut buf = Vec::new();
        NodeMetadataList::new().serialize(&mut buf, true);
        assert_eq!(buf, vec![0]);
        assert!(NodeMetadataList::deserialize(&buf).unwrap().is_empty());
    }
}

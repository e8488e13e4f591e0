//! Per-block content id <-> name mapping stored alongside block data

use std::collections::BTreeMap;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::util::serialize::{serialize_string16, write_u8, write_u16, Reader};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NameIdMapping {
    id_to_name: BTreeMap<u16, String>,
}

impl NameIdMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, id: u16, name: &str) {
        self.id_to_name.insert(id, name.to_string());
    }

    pub fn get_name(&self, id: u16) -> Option<&str> {
        self.id_to_name.get(&id).map(String::as_str)
    }

    pub fn get_id(&self, name: &str) -> Option<u16> {
        self.id_to_name.iter().find(|(_, n)| *n == name).map(|(&id, _)| id)
    }

    pub fn len(&self) -> usize {
        self.id_to_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_name.is_empty()
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        write_u8(out, 0);
        write_u16(out, self.id_to_name.len() as u16);
        for (id, name) in &self.id_to_name {
            write_u16(out, *id);
            serialize_string16(out, name.as_bytes());
        }
    }

    pub fn deserialize(r: &mut Reader) -> Result<Self> {
        let version = r.read_u8()?;
        if version != 0 {
            return Err(Error::Serialization(format!("unsupported name-id mapping version {}", version)));
        }
        let count = r.read_u16()?;
        let mut map = NameIdMapping::new();
        for _ in 0..count {
            let id = r.read_u16()?;
            let name = String::from_utf8_lossy(r.read_string16()?).into_owned();
            map.id_to_name.insert(id, name);
        }
        Ok(map)
    }
}

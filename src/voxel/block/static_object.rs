//! Static (persisted) form of active objects stored inside a block

use std::collections::BTreeMap;

use crate::core::error::Error;
use crate::core::types::{Result, Vec3};
use crate::util::serialize::{serialize_string16, write_u8, write_u16, write_v3f_fixed, Reader};

/// Objects beyond this count are not written to disk
pub const MAX_STATIC_OBJECTS_PER_BLOCK: usize = 64;

/// One persisted object
#[derive(Clone, Debug, PartialEq)]
pub struct StaticObject {
    /// Active object type tag
    pub kind: u8,
    /// Position in nodes
    pub pos: Vec3,
    /// Opaque object state
    pub data: Vec<u8>,
}

impl StaticObject {
    pub fn new(kind: u8, pos: Vec3, data: Vec<u8>) -> Self {
        Self { kind, pos, data }
    }

    fn serialize(&self, out: &mut Vec<u8>) {
        write_u8(out, self.kind);
        write_v3f_fixed(out, self.pos);
        serialize_string16(out, &self.data);
    }

    fn deserialize(r: &mut Reader) -> Result<Self> {
        let kind = r.read_u8()?;
        let pos = r.read_v3f_fixed()?;
        let data = r.read_string16()?.to_vec();
        Ok(Self { kind, pos, data })
    }
}

/// Objects of one block: stored ones waiting for activation and static
/// copies of currently active ones, keyed by object id
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StaticObjectList {
    pub stored: Vec<StaticObject>,
    pub active: BTreeMap<u16, StaticObject>,
}

impl StaticObjectList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an object; with an id it is tracked as active
    pub fn insert(&mut self, id: Option<u16>, obj: StaticObject) {
        match id {
            Some(id) => {
                if self.active.insert(id, obj).is_some() {
                    log::warn!("Static object id {} was already present in block", id);
                }
            }
            None => self.stored.push(obj),
        }
    }

    pub fn remove(&mut self, id: u16) -> Option<StaticObject> {
        self.active.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.stored.len() + self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.stored.clear();
        self.active.clear();
    }

    pub fn serialize(&self, out: &mut Vec<u8>) {
        write_u8(out, 0);
        let mut count = self.len();
        if count > u16::MAX as usize {
            log::warn!("Too many static objects in block ({}), truncating", count);
            count = u16::MAX as usize;
        }
        write_u16(out, count as u16);
        for obj in self.stored.iter().chain(self.active.values()).take(count) {
            obj.serialize(out);
        }
    }

    /// Everything read back lands in `stored`
    pub fn deserialize(r: &mut Reader) -> Result<Self> {
        let version = r.read_u8()?;
        if version != 0 {
            return Err(Error::Serialization(format!("unsupported static object list version {}", version)));
        }
        let count = r.read_u16()?;
        let mut list = StaticObjectList::new();
        for _ in 0..count {
            list.stored.push(StaticObject::deserialize(r)?);
        }
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_collects_into_stored() {
        let mut list = StaticObjectList::new();
        list.insert(None, StaticObject::new(7, Vec3::new(1.5, 2.25, -3.0), b"item".to_vec()));
        list.insert(Some(12), StaticObject::new(7, Vec3::new(0.0, 1.0, 0.0), vec![]));
        let mut buf = Vec::new();
        list.serialize(&mut buf);
        let back = StaticObjectList::deserialize(&mut Reader::new(&buf)).unwrap();
        assert_eq!(back.stored.len(), 2);
        assert!(back.active.is_empty());
        assert_eq!(back.stored[0], list.stored[0]);
        assert_eq!(back.stored[1].data, Vec::<u8>::new());
    }

    #[test]
    fn test_remove_active() {
        let mut list = StaticObjectList::new();
        list.insert(Some(3), StaticObject::new(1, Vec3::ZERO, vec![1]));
        assert!(list.remove(3).is_some());
        assert!(list.remove(3).is_none());
        assert!(list.is_empty());
    }
}

//! Node timers

use std::collections::BTreeMap;

use crate::core::error::Error;
use crate::core::types::{IVec3, Result};
use crate::core::types::{block_index_to_pos, block_node_index};
use crate::util::serialize::{write_i32, write_u8, write_u16, Reader};

/// Bytes per timer record in the stream (u16 position + two fixed-point i32)
const TIMER_DATA_LEN: u8 = 2 + 4 + 4;

/// A countdown attached to one node
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NodeTimer {
    pub timeout: f32,
    pub elapsed: f32,
}

impl NodeTimer {
    pub fn new(timeout: f32, elapsed: f32) -> Self {
        Self { timeout, elapsed }
    }
}

/// Timers of one block, keyed by block-local node index
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NodeTimerList {
    timers: BTreeMap<u16, NodeTimer>,
}

impl NodeTimerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, rel: IVec3) -> Option<NodeTimer> {
        self.timers.get(&(block_node_index(rel) as u16)).copied()
    }

    pub fn set(&mut self, rel: IVec3, timer: NodeTimer) {
        self.timers.insert(block_node_index(rel) as u16, timer);
    }

    pub fn remove(&mut self, rel: IVec3) -> Option<NodeTimer> {
        self.timers.remove(&(block_node_index(rel) as u16))
    }

    pub fn clear(&mut self) {
        self.timers.clear();
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }

    /// Advance every timer by `dtime` and remove the expired ones, returning
    /// them with their block-local position
    pub fn step(&mut self, dtime: f32) -> Vec<(IVec3, NodeTimer)> {
        let mut expired = Vec::new();
        self.timers.retain(|&pos, timer| {
            timer.elapsed += dtime;
            if timer.elapsed >= timer.timeout {
                expired.push((block_index_to_pos(pos as usize), *timer));
                false
            } else {
                true
            }
        });
        expired
    }

    /// Serialize for block format `version` (24 lacks the record length byte)
    pub fn serialize(&self, out: &mut Vec<u8>, version: u8) {
        if version != 24 {
            write_u8(out, TIMER_DATA_LEN);
        }
        write_u16(out, self.timers.len() as u16);
        for (pos, t) in &self.timers {
            write_u16(out, *pos);
            write_i32(out, (t.timeout * 1000.0) as i32);
            write_i32(out, (t.elapsed * 1000.0) as i32);
        }
    }

    pub fn deserialize(r: &mut Reader, version: u8) -> Result<Self> {
        let mut list = NodeTimerList::new();
        if version != 24 {
            let data_len = r.read_u8()?;
            if data_len == 0 {
                return Ok(list);
            }
            if data_len != TIMER_DATA_LEN {
                return Err(Error::Serialization(format!("unsupported node timer record length {}", data_len)));
            }
        }
        let count = r.read_u16()?;
        for _ in 0..count {
            let pos = r.read_u16()?;
            let timeout = r.read_i32()? as f32 / 1000.0;
            let elapsed = r.read_i32()? as f32 / 1000.0;
            if timeout <= 0.0 {
                continue;
            }
            list.timers.insert(pos, NodeTimer::new(timeout, elapsed));
        }
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_expires() {
        let mut list = NodeTimerList::new();
        list.set(IVec3::new(1, 0, 0), NodeTimer::new(1.0, 0.0));
        list.set(IVec3::new(2, 0, 0), NodeTimer::new(5.0, 0.0));
        assert!(list.step(0.5).is_empty());
        let expired = list.step(0.6);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, IVec3::new(1, 0, 0));
        assert!((expired[0].1.elapsed - 1.1).abs() < 1e-5);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_round_trip() {
        let mut list = NodeTimerList::new();
        list.set(IVec3::new(3, 4, 5), NodeTimer::new(2.5, 0.25));
        list.set(IVec3::new(0, 15, 0), NodeTimer::new(10.0, 9.0));
        for version in [24u8, 28] {
            let mut buf = Vec::new();
            list.serialize(&mut buf, version);
            let back = NodeTimerList::deserialize(&mut Reader::new(&buf), version).unwrap();
            assert_eq!(back, list);
        }
    }
}

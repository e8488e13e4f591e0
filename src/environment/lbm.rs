//! Loading block modifiers: callbacks run when a block is activated
//!
//! Each modifier remembers the game time at which it was first seen in the
//! world. On activation, only modifiers introduced at or after the block's
//! timestamp run, so a block is converted once per modifier. Modifiers that
//! run on every load sit at `u32::MAX`.

use std::collections::{BTreeMap, HashMap};

use crate::core::error::Error;
use crate::core::types::{block_to_node_pos, IVec3, Result, MAP_BLOCKSIZE};
use crate::map::MapAccess;
use crate::voxel::node::MapNode;
use crate::voxel::nodedef::NodeDefManager;

use super::LogicEnvironment;

pub trait LoadingBlockModifier: Send {
    /// Unique `mod:name` identifier, persisted with the first-seen time
    fn name(&self) -> &str;

    /// Node names or `group:<name>` entries the modifier runs on
    fn trigger_contents(&self) -> &[String];

    fn run_at_every_load(&self) -> bool {
        false
    }

    /// `dtime_s` is the time the block spent inactive
    fn trigger(&mut self, env: &mut LogicEnvironment, p: IVec3, n: MapNode, dtime_s: f32);
}

/// Modifiers of one introduction time, by content id
#[derive(Debug, Default)]
struct LbmContentMapping {
    /// Indices into `LbmManager::lbms`
    list: Vec<usize>,
    by_content: HashMap<u16, Vec<usize>>,
}

impl LbmContentMapping {
    fn add(&mut self, index: usize, lbm: &dyn LoadingBlockModifier, defs: &NodeDefManager) {
        self.list.push(index);
        for name in lbm.trigger_contents() {
            for c in defs.get_ids(name) {
                let entry = self.by_content.entry(c).or_default();
                if !entry.contains(&index) {
                    entry.push(index);
                }
            }
        }
    }
}

#[derive(Default)]
pub struct LbmManager {
    lbms: Vec<Box<dyn LoadingBlockModifier>>,
    /// Introduction time to modifiers
    lookup: BTreeMap<u32, LbmContentMapping>,
    /// Set once introduction times are loaded; no registrations after that
    query_mode: bool,
}

impl std::fmt::Debug for LbmManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.lbms.iter().map(|l| l.name()).collect();
        f.debug_struct("LbmManager")
            .field("lbms", &names)
            .field("query_mode", &self.query_mode)
            .finish()
    }
}

fn is_valid_lbm_name(name: &str) -> bool {
    let Some((module, item)) = name.split_once(':') else { return false };
    let valid = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    (module.is_empty() || valid(module)) && valid(item)
}

impl LbmManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lbms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lbms.is_empty()
    }

    /// Add a modifier. Fails after introduction times were loaded, for a
    /// malformed name, or for a name already taken.
    pub fn add_lbm(&mut self, lbm: Box<dyn LoadingBlockModifier>) -> bool {
        if self.query_mode {
            log::error!("LBM {} registered after the world started", lbm.name());
            return false;
        }
        if !is_valid_lbm_name(lbm.name()) {
            log::error!("LBM name {:?} does not follow the mod:name convention", lbm.name());
            return false;
        }
        if self.lbms.iter().any(|l| l.name() == lbm.name()) {
            log::error!("LBM {} registered twice", lbm.name());
            return false;
        }
        self.lbms.push(lbm);
        true
    }

    /// Parse `name~time;` entries and sort every modifier into its
    /// introduction bucket. Modifiers absent from `times` are introduced at
    /// `now`; entries for unknown modifiers are dropped.
    pub fn load_introduction_times(&mut self, times: &str, defs: &NodeDefManager, now: u32) -> Result<()> {
        self.query_mode = true;
        self.lookup.clear();

        let mut introduced: HashMap<&str, u32> = HashMap::new();
        for entry in times.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, time) = entry
                .split_once('~')
                .ok_or_else(|| Error::Serialization(format!("invalid LBM introduction entry {:?}", entry)))?;
            let time: u32 = time
                .parse()
                .map_err(|_| Error::Serialization(format!("invalid LBM introduction time {:?}", entry)))?;
            introduced.insert(name, time);
        }

        for (index, lbm) in self.lbms.iter().enumerate() {
            let time = if lbm.run_at_every_load() {
                u32::MAX
            } else {
                introduced.get(lbm.name()).copied().unwrap_or(now)
            };
            self.lookup.entry(time).or_default().add(index, lbm.as_ref(), defs);
        }
        Ok(())
    }

    /// The `name~time;` list to persist; every-load modifiers are left out
    pub fn create_introduction_times_string(&self) -> String {
        let mut out = String::new();
        for (time, mapping) in &self.lookup {
            for &index in &mapping.list {
                let lbm = &self.lbms[index];
                if lbm.run_at_every_load() {
                    continue;
                }
                out.push_str(&format!("{}~{};", lbm.name(), time));
            }
        }
        out
    }

    /// Run every modifier introduced at or after `stamp` over the nodes of
    /// block `blockpos`
    pub fn apply_lbms(&mut self, env: &mut LogicEnvironment, blockpos: IVec3, stamp: u32, dtime_s: f32) {
        if !self.query_mode {
            log::warn!("apply_lbms called before introduction times were loaded");
            return;
        }
        let origin = block_to_node_pos(blockpos);
        for mapping in self.lookup.range(stamp..).map(|(_, m)| m) {
            if mapping.by_content.is_empty() {
                continue;
            }
            for z in 0..MAP_BLOCKSIZE {
                for y in 0..MAP_BLOCKSIZE {
                    for x in 0..MAP_BLOCKSIZE {
                        let p = origin + IVec3::new(x, y, z);
                        let Some(n) = env.map.get_node_opt(p) else { return };
                        let Some(list) = mapping.by_content.get(&n.content()) else { continue };
                        for &index in list {
                            self.lbms[index].trigger(env, p, n, dtime_s);
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Convert {
        name: String,
        contents: Vec<String>,
        every_load: bool,
    }

    impl LoadingBlockModifier for Convert {
        fn name(&self) -> &str {
            &self.name
        }

        fn trigger_contents(&self) -> &[String] {
            &self.contents
        }

        fn run_at_every_load(&self) -> bool {
            self.every_load
        }

        fn trigger(&mut self, _env: &mut LogicEnvironment, _p: IVec3, _n: MapNode, _dtime_s: f32) {}
    }

    fn lbm(name: &str, every_load: bool) -> Box<dyn LoadingBlockModifier> {
        Box::new(Convert { name: name.to_string(), contents: vec!["group:soil".to_string()], every_load })
    }

    #[test]
    fn test_registration_rules() {
        let mut m = LbmManager::new();
        assert!(m.add_lbm(lbm("farming:convert", false)));
        assert!(!m.add_lbm(lbm("farming:convert", false)));
        assert!(!m.add_lbm(lbm("no colon", false)));
        assert!(m.add_lbm(lbm(":bare", false)));
        let defs = NodeDefManager::with_default_content();
        m.load_introduction_times("", &defs, 5).unwrap();
        assert!(!m.add_lbm(lbm("late:one", false)));
        assert_eq!(m.len(), 2);
    }

    #[test]
    fn test_introduction_times_round_trip() {
        let defs = NodeDefManager::with_default_content();
        let mut m = LbmManager::new();
        m.add_lbm(lbm("a:old", false));
        m.add_lbm(lbm("a:new", false));
        m.add_lbm(lbm("a:always", true));
        m.load_introduction_times("a:old~100;gone:lbm~3;a:always~7;", &defs, 500).unwrap();

        assert_eq!(m.create_introduction_times_string(), "a:old~100;a:new~500;");
        let times: Vec<u32> = m.lookup.keys().copied().collect();
        assert_eq!(times, vec![100, 500, u32::MAX]);
        let dirt = defs.get_id("default:dirt").unwrap();
        assert_eq!(m.lookup[&100].by_content[&dirt], vec![0]);
    }

    #[test]
    fn test_malformed_times_are_rejected() {
        let defs = NodeDefManager::with_default_content();
        let mut m = LbmManager::new();
        assert!(m.load_introduction_times("a:x~12;broken;", &defs, 0).is_err());
        assert!(m.load_introduction_times("a:x~soon;", &defs, 0).is_err());
    }
}

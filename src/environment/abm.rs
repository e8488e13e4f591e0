//! Active block modifiers: periodic callbacks on matching nodes of active
//! blocks

use std::collections::{HashMap, HashSet};

use crate::core::types::{block_to_node_pos, IVec3, MAP_BLOCKSIZE};
use crate::generation::PseudoRandom;
use crate::map::MapAccess;
use crate::voxel::node::MapNode;
use crate::voxel::nodedef::NodeDefManager;

use super::LogicEnvironment;

/// A callback run on nodes of active blocks at a fixed interval
pub trait ActiveBlockModifier: Send {
    /// Node names or `group:<name>` entries the modifier runs on
    fn trigger_contents(&self) -> &[String];

    /// When not empty, one of these must be among the 26 neighbours
    fn required_neighbors(&self) -> &[String] {
        &[]
    }

    /// Seconds between runs
    fn trigger_interval(&self) -> f32;

    /// 1 in `chance` matching nodes trigger on each run
    fn trigger_chance(&self) -> u32;

    /// Lower the chance in proportion to the time a block spent inactive
    fn simple_catch_up(&self) -> bool {
        true
    }

    fn min_y(&self) -> i32 {
        i32::MIN
    }

    fn max_y(&self) -> i32 {
        i32::MAX
    }

    fn trigger(
        &mut self,
        env: &mut LogicEnvironment,
        p: IVec3,
        n: MapNode,
        active_object_count: u32,
        active_object_count_wider: u32,
    );
}

/// A registered modifier and its interval timer
pub struct AbmState {
    pub abm: Box<dyn ActiveBlockModifier>,
    pub timer: f32,
}

impl std::fmt::Debug for AbmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbmState").field("timer", &self.timer).finish_non_exhaustive()
    }
}

impl AbmState {
    pub fn new(abm: Box<dyn ActiveBlockModifier>) -> Self {
        Self { abm, timer: 0.0 }
    }
}

#[derive(Clone, Debug)]
struct ActiveAbm {
    index: usize,
    chance: u32,
    required_neighbors: HashSet<u16>,
    min_y: i32,
    max_y: i32,
}

/// The modifiers due in one run, indexed by content id
#[derive(Debug, Default)]
pub(crate) struct AbmHandler {
    by_content: HashMap<u16, Vec<ActiveAbm>>,
}

impl AbmHandler {
    /// Collect the modifiers due after `dtime_s` seconds. With `use_timers`
    /// each modifier waits for its own interval; without, `dtime_s` is the
    /// time a block was away and every modifier catches up at once.
    pub(crate) fn new(abms: &mut [AbmState], dtime_s: f32, defs: &NodeDefManager, use_timers: bool) -> Self {
        let mut handler = Self::default();
        for (index, state) in abms.iter_mut().enumerate() {
            let trigger_interval = state.abm.trigger_interval().max(0.001);
            let mut actual_interval = dtime_s;
            if use_timers {
                state.timer += dtime_s;
                if state.timer < trigger_interval {
                    continue;
                }
                state.timer -= trigger_interval;
                actual_interval = trigger_interval;
            }

            let chance = state.abm.trigger_chance().max(1);
            let chance = if state.abm.simple_catch_up() {
                let intervals = actual_interval / trigger_interval;
                if intervals == 0.0 {
                    continue;
                }
                ((chance as f32 / intervals) as u32).max(1)
            } else {
                chance
            };

            let required_neighbors: HashSet<u16> = state
                .abm
                .required_neighbors()
                .iter()
                .flat_map(|name| defs.get_ids(name))
                .collect();
            let active = ActiveAbm {
                index,
                chance,
                required_neighbors,
                min_y: state.abm.min_y(),
                max_y: state.abm.max_y(),
            };
            for name in state.abm.trigger_contents() {
                for c in defs.get_ids(name) {
                    handler.by_content.entry(c).or_default().push(active.clone());
                }
            }
        }
        handler
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.by_content.is_empty()
    }

    /// Objects in the block, and an estimate for the 3x3x3 blocks around it
    /// extrapolated over the ones that are not loaded
    fn count_objects(env: &LogicEnvironment, blockpos: IVec3) -> (u32, u32) {
        let mut wider = 0u32;
        let mut unknown = 0u32;
        for z in -1..=1 {
            for y in -1..=1 {
                for x in -1..=1 {
                    match env.map.get_block_no_create(blockpos + IVec3::new(x, y, z)) {
                        Some(b) => wider += b.static_objects.len() as u32,
                        None => unknown += 1,
                    }
                }
            }
        }
        let count = env
            .map
            .get_block_no_create(blockpos)
            .map_or(0, |b| b.static_objects.active.len() as u32);
        let known = 27 - unknown;
        if known > 0 {
            wider += unknown * wider / known;
        }
        (count, wider)
    }

    fn has_neighbor(env: &LogicEnvironment, p: IVec3, wanted: &HashSet<u16>) -> bool {
        for z in -1..=1 {
            for y in -1..=1 {
                for x in -1..=1 {
                    let d = IVec3::new(x, y, z);
                    if d == IVec3::ZERO {
                        continue;
                    }
                    if wanted.contains(&env.map.get_node_or_ignore(p + d).content()) {
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Run the due modifiers over every node of block `blockpos`. Returns
    /// how many triggers ran.
    pub(crate) fn apply(
        &self,
        abms: &mut [AbmState],
        env: &mut LogicEnvironment,
        rng: &mut PseudoRandom,
        blockpos: IVec3,
    ) -> u32 {
        if self.is_empty() {
            return 0;
        }
        let Some(block) = env.map.get_block_no_create(blockpos) else { return 0 };
        if !block.nodes().iter().any(|n| self.by_content.contains_key(&n.content())) {
            return 0;
        }

        let origin = block_to_node_pos(blockpos);
        let (mut count, mut wider) = Self::count_objects(env, blockpos);
        env.added_objects = 0;
        let mut runs = 0;

        for z in 0..MAP_BLOCKSIZE {
            for y in 0..MAP_BLOCKSIZE {
                for x in 0..MAP_BLOCKSIZE {
                    let p = origin + IVec3::new(x, y, z);
                    let n = env.map.get_node_or_ignore(p);
                    let c = n.content();
                    let Some(list) = self.by_content.get(&c) else { continue };
                    for aabm in list {
                        if p.y < aabm.min_y || p.y > aabm.max_y {
                            continue;
                        }
                        if rng.next_u32() % aabm.chance != 0 {
                            continue;
                        }
                        if !aabm.required_neighbors.is_empty()
                            && !Self::has_neighbor(env, p, &aabm.required_neighbors)
                        {
                            continue;
                        }
                        runs += 1;
                        abms[aabm.index].abm.trigger(env, p, n, count, wider);

                        if env.added_objects > 0 {
                            (count, wider) = Self::count_objects(env, blockpos);
                            env.added_objects = 0;
                        }
                        // Stop once a trigger changed the node
                        if env.map.get_node_or_ignore(p).content() != c {
                            break;
                        }
                    }
                }
            }
        }
        runs
    }
}

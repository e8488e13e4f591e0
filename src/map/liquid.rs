//! Liquid flow
//!
//! Positions whose liquid state may change sit in `Map::transforming_liquid`.
//! Each step pops a bounded number of them, decides the new node from the six
//! neighbours and queues neighbours that may follow.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use crate::core::types::IVec3;
use crate::voxel::node::{LightBank, MapNode, CONTENT_AIR, CONTENT_IGNORE, LIQUID_FLOW_DOWN_MASK, LIQUID_LEVEL_MASK, LIQUID_LEVEL_MAX, LIQUID_LEVEL_SOURCE};
use crate::voxel::nodedef::LiquidType;

use super::{Map, MapAccess};

/// Level gained when flowing liquid falls onto a node
const WATER_DROP_BOOST: u8 = 4;
/// Nominal server step used to grow the loop budget while the queue backs up
const BURST_STEP: f32 = 0.09;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum NeighborType {
    Upper,
    SameLevel,
    Lower,
}

#[derive(Clone, Copy, Debug)]
struct NodeNeighbor {
    n: MapNode,
    t: NeighborType,
    p: IVec3,
}

/// Neighbour order: up, the four sides, down
const LIQUID_6DIRS: [IVec3; 6] = [
    IVec3::new(0, 1, 0),
    IVec3::new(1, 0, 0),
    IVec3::new(-1, 0, 0),
    IVec3::new(0, 0, 1),
    IVec3::new(0, 0, -1),
    IVec3::new(0, -1, 0),
];

/// Queue bookkeeping across steps
#[derive(Clone, Debug)]
pub struct LiquidQueueState {
    loop_count_multiplier: f32,
    unprocessed_count: usize,
    trending_up_since: Option<Instant>,
}

impl Default for LiquidQueueState {
    fn default() -> Self {
        Self { loop_count_multiplier: 1.0, unprocessed_count: 0, trending_up_since: None }
    }
}

impl LiquidQueueState {
    pub fn loop_count_multiplier(&self) -> f32 {
        self.loop_count_multiplier
    }
}

impl Map {
    pub fn transforming_liquid_add(&mut self, p: IVec3) {
        self.transforming_liquid.push_back(p);
    }

    pub fn transforming_liquid_size(&self) -> usize {
        self.transforming_liquid.len()
    }

    /// Run one liquid step.
    ///
    /// At most `liquid_loop_max` queued positions are handled, scaled up
    /// while the queue is more than twice that long. If the queue keeps
    /// growing for longer than `purge_time` (zero disables purging), the
    /// oldest entries are dropped until `liquid_loop_max` remain. Changed
    /// nodes are relit together at the end.
    pub fn transform_liquids(
        &mut self,
        modified_blocks: &mut HashSet<IVec3>,
        liquid_loop_max: u32,
        purge_time: Duration,
    ) {
        let defs = self.node_defs().clone();
        let initial_size = self.transforming_liquid.len();

        if initial_size > liquid_loop_max as usize * 2 {
            if self.liquid_state.loop_count_multiplier - 1.0 < BURST_STEP {
                self.liquid_state.loop_count_multiplier *= 1.0 + BURST_STEP / 10.0;
            }
        } else {
            self.liquid_state.loop_count_multiplier = 1.0;
        }
        let loop_max = (liquid_loop_max as f32 * self.liquid_state.loop_count_multiplier) as usize;

        let mut must_reflow: VecDeque<IVec3> = VecDeque::new();
        let mut changed_nodes: Vec<(IVec3, MapNode)> = Vec::new();
        let mut loopcount = 0usize;

        while let Some(p0) = self.transforming_liquid.front().copied() {
            if loopcount >= initial_size || loopcount >= loop_max {
                break;
            }
            loopcount += 1;
            self.transforming_liquid.pop_front();

            let Some(mut n0) = self.get_node_opt(p0) else { continue };
            let cf = defs.get_node(n0);
            let liquid_type = cf.liquid_type;

            let mut liquid_level: i8 = -1;
            // Liquid placed here if something flows in
            let mut liquid_kind = CONTENT_IGNORE;
            // Node placed here if nothing flows in
            let mut floodable_node = CONTENT_AIR;
            match liquid_type {
                LiquidType::Source => {
                    liquid_level = LIQUID_LEVEL_SOURCE as i8;
                    liquid_kind = cf.liquid_alternative_flowing_id;
                }
                LiquidType::Flowing => {
                    liquid_level = (n0.param2() & LIQUID_LEVEL_MASK) as i8;
                    liquid_kind = n0.content();
                }
                LiquidType::None => {
                    if !cf.floodable {
                        continue;
                    }
                    floodable_node = n0.content();
                    liquid_kind = CONTENT_AIR;
                }
            }

            let mut sources: Vec<NodeNeighbor> = Vec::with_capacity(6);
            let mut flows: Vec<NodeNeighbor> = Vec::with_capacity(6);
            let mut airs: Vec<NodeNeighbor> = Vec::with_capacity(6);
            let mut flowing_down = false;
            let mut ignored_sources = false;

            for (i, d) in LIQUID_6DIRS.iter().enumerate() {
                let t = match i {
                    0 => NeighborType::Upper,
                    5 => NeighborType::Lower,
                    _ => NeighborType::SameLevel,
                };
                let npos = p0 + *d;
                let nb = NodeNeighbor { n: self.get_node_or_ignore(npos), t, p: npos };
                let cfnb = defs.get_node(nb.n);
                match cfnb.liquid_type {
                    LiquidType::None => {
                        if cfnb.floodable {
                            airs.push(nb);
                            // A liquid pushes into floodable neighbours even if it
                            // doesn't change itself
                            if nb.t != NeighborType::Upper && liquid_type != LiquidType::None {
                                self.transforming_liquid.push_back(npos);
                            }
                            if nb.t == NeighborType::Lower {
                                flowing_down = true;
                            }
                        } else if nb.n.content() == CONTENT_IGNORE {
                            // Unloaded: don't spread over it and don't drain
                            // towards it
                            if nb.t == NeighborType::Lower {
                                flowing_down = true;
                            } else {
                                ignored_sources = true;
                            }
                        }
                    }
                    LiquidType::Source => {
                        if liquid_kind == CONTENT_AIR {
                            liquid_kind = cfnb.liquid_alternative_flowing_id;
                        }
                        if cfnb.liquid_alternative_flowing_id == liquid_kind && nb.t != NeighborType::Lower {
                            sources.push(nb);
                        }
                    }
                    LiquidType::Flowing => {
                        let falling_same_level = nb.t == NeighborType::SameLevel
                            && nb.n.param2() & LIQUID_FLOW_DOWN_MASK == LIQUID_FLOW_DOWN_MASK;
                        if !falling_same_level && liquid_kind == CONTENT_AIR {
                            liquid_kind = cfnb.liquid_alternative_flowing_id;
                        }
                        if cfnb.liquid_alternative_flowing_id == liquid_kind {
                            flows.push(nb);
                            if nb.t == NeighborType::Lower {
                                flowing_down = true;
                            }
                        }
                    }
                }
            }

            let kind_f = defs.get(liquid_kind);
            let range = kind_f.liquid_range.min(LIQUID_LEVEL_MAX + 1) as i8;
            let mut new_node_level: i8 = -1;
            let new_node_content;

            if (sources.len() >= 2 && kind_f.liquid_renewable) || liquid_type == LiquidType::Source {
                new_node_content = kind_f.liquid_alternative_source_id;
            } else if !sources.is_empty() && sources[0].t != NeighborType::Lower {
                new_node_level = LIQUID_LEVEL_MAX as i8;
                new_node_content = if new_node_level >= LIQUID_LEVEL_MAX as i8 + 1 - range {
                    liquid_kind
                } else {
                    floodable_node
                };
            } else if ignored_sources && liquid_level >= 0 {
                new_node_level = liquid_level;
                new_node_content = liquid_kind;
            } else {
                let mut max_node_level: i8 = -1;
                for f in &flows {
                    let nb_level = (f.n.param2() & LIQUID_LEVEL_MASK) as i8;
                    match f.t {
                        NeighborType::Upper => {
                            let boosted = nb_level + WATER_DROP_BOOST as i8;
                            if boosted > max_node_level {
                                max_node_level = boosted.min(LIQUID_LEVEL_MAX as i8);
                            } else if nb_level > max_node_level {
                                max_node_level = nb_level;
                            }
                        }
                        NeighborType::Lower => {}
                        NeighborType::SameLevel => {
                            if f.n.param2() & LIQUID_FLOW_DOWN_MASK != LIQUID_FLOW_DOWN_MASK
                                && nb_level > 0
                                && nb_level - 1 > max_node_level
                            {
                                max_node_level = nb_level - 1;
                            }
                        }
                    }
                }

                let viscosity = kind_f.liquid_viscosity as i8;
                if viscosity > 1 && max_node_level != liquid_level {
                    let level_inc = max_node_level - liquid_level;
                    new_node_level = if level_inc < -viscosity || level_inc > viscosity {
                        liquid_level + level_inc / viscosity
                    } else if level_inc < 0 {
                        liquid_level - 1
                    } else {
                        liquid_level + 1
                    };
                    if new_node_level != max_node_level {
                        must_reflow.push_back(p0);
                    }
                } else {
                    new_node_level = max_node_level;
                }

                new_node_content = if max_node_level >= LIQUID_LEVEL_MAX as i8 + 1 - range {
                    liquid_kind
                } else {
                    floodable_node
                };
            }

            // Nothing changed
            if new_node_content == n0.content()
                && (cf.liquid_type != LiquidType::Flowing
                    || ((n0.param2() & LIQUID_LEVEL_MASK) as i8 == new_node_level
                        && (n0.param2() & LIQUID_FLOW_DOWN_MASK == LIQUID_FLOW_DOWN_MASK) == flowing_down))
            {
                continue;
            }

            let n00 = n0;
            let new_f = defs.get(new_node_content);
            if new_f.liquid_type == LiquidType::Flowing {
                let down = if flowing_down { LIQUID_FLOW_DOWN_MASK } else { 0 };
                n0.set_param2(down | (new_node_level as u8 & LIQUID_LEVEL_MASK));
            } else {
                n0.set_param2(n0.param2() & !(LIQUID_LEVEL_MASK | LIQUID_FLOW_DOWN_MASK));
            }
            n0.set_content(new_node_content);
            for bank in LightBank::ALL {
                n0.set_light(bank, 0, new_f);
            }

            if self.set_node_raw(p0, n0).is_err() {
                continue;
            }
            modified_blocks.insert(crate::core::types::node_to_block_pos(p0));
            changed_nodes.push((p0, n00));

            match new_f.liquid_type {
                LiquidType::Source | LiquidType::Flowing => {
                    for nb in flows.iter().chain(airs.iter()) {
                        if nb.t != NeighborType::Upper {
                            self.transforming_liquid.push_back(nb.p);
                        }
                    }
                }
                LiquidType::None => {
                    for nb in &flows {
                        self.transforming_liquid.push_back(nb.p);
                    }
                }
            }
        }

        self.transforming_liquid.extend(must_reflow);
        crate::lighting::update_lighting_nodes(self, &changed_nodes, modified_blocks);

        self.purge_liquid_queue(liquid_loop_max as usize, purge_time);
    }

    /// Drop the oldest queue entries once the queue has kept growing for
    /// longer than `purge_time`
    fn purge_liquid_queue(&mut self, liquid_loop_max: usize, purge_time: Duration) {
        if purge_time.is_zero() {
            return;
        }
        let now = Instant::now();
        let prev = self.liquid_state.unprocessed_count;
        let count = self.transforming_liquid.len();
        self.liquid_state.unprocessed_count = count;

        if count <= prev {
            self.liquid_state.trending_up_since = None;
        } else if self.liquid_state.trending_up_since.is_none() {
            self.liquid_state.trending_up_since = Some(now);
        }

        let Some(since) = self.liquid_state.trending_up_since else { return };
        if now.duration_since(since) > purge_time && count > liquid_loop_max {
            let dump = count - liquid_loop_max;
            log::info!("transform_liquids: dumping {} positions from the queue", dump);
            self.transforming_liquid.drain(..dump);
            self.liquid_state.trending_up_since = None;
            self.liquid_state.unprocessed_count = self.transforming_liquid.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::map::tests::filled_map;
    use crate::voxel::nodedef::NodeDefManager;

    fn run(map: &mut Map, steps: usize) {
        let mut modified = HashSet::new();
        for _ in 0..steps {
            map.transform_liquids(&mut modified, 10_000, Duration::ZERO);
        }
    }

    #[test]
    fn test_source_spreads_on_floor() {
        let defs = Arc::new(NodeDefManager::with_default_content());
        let mut map = filled_map(defs.clone(), 1, "air", true);
        let stone = defs.get_id("default:stone").unwrap();
        let source = defs.get_id("default:water_source").unwrap();
        let flowing = defs.get_id("default:water_flowing").unwrap();
        for z in -10..=10 {
            for x in -10..=10 {
                map.set_node_raw(IVec3::new(x, -1, z), MapNode::new(stone)).unwrap();
            }
        }
        map.set_node_raw(IVec3::ZERO, MapNode::new(source)).unwrap();
        map.transforming_liquid_add(IVec3::ZERO);
        run(&mut map, 20);

        let n = map.get_node(IVec3::new(1, 0, 0)).unwrap();
        assert_eq!(n.content(), flowing);
        assert_eq!(n.param2() & LIQUID_LEVEL_MASK, LIQUID_LEVEL_MAX);
        let n = map.get_node(IVec3::new(3, 0, 0)).unwrap();
        assert_eq!(n.param2() & LIQUID_LEVEL_MASK, LIQUID_LEVEL_MAX - 2);
        // Range 8 (levels 7 down to 0) ends before 9 steps
        assert_eq!(map.get_node(IVec3::new(9, 0, 0)).unwrap().content(), CONTENT_AIR);
        assert_eq!(map.get_node(IVec3::ZERO).unwrap().content(), source);
    }

    #[test]
    fn test_flow_drains_without_source() {
        let defs = Arc::new(NodeDefManager::with_default_content());
        let mut map = filled_map(defs.clone(), 0, "stone", true);
        let flowing = defs.get_id("default:water_flowing").unwrap();
        map.set_node_raw(IVec3::new(5, 5, 5), MapNode::new(CONTENT_AIR)).unwrap();
        map.set_node_raw(IVec3::new(6, 5, 5), MapNode::with_params(flowing, 0, 5)).unwrap();
        map.transforming_liquid_add(IVec3::new(6, 5, 5));
        run(&mut map, 3);
        assert_eq!(map.get_node(IVec3::new(6, 5, 5)).unwrap().content(), CONTENT_AIR);
        assert_eq!(map.transforming_liquid_size(), 0);
    }

    #[test]
    fn test_falling_water_marks_flow_down() {
        let defs = Arc::new(NodeDefManager::with_default_content());
        let mut map = filled_map(defs.clone(), 0, "air", true);
        let source = defs.get_id("default:water_source").unwrap();
        let flowing = defs.get_id("default:water_flowing").unwrap();
        map.set_node_raw(IVec3::new(8, 10, 8), MapNode::new(source)).unwrap();
        map.transforming_liquid_add(IVec3::new(8, 10, 8));
        run(&mut map, 4);
        let below = map.get_node(IVec3::new(8, 9, 8)).unwrap();
        assert_eq!(below.content(), flowing);
        assert_eq!(below.param2() & LIQUID_FLOW_DOWN_MASK, LIQUID_FLOW_DOWN_MASK);
    }

    #[test]
    fn test_loop_budget_bursts_with_backlog() {
        let defs = Arc::new(NodeDefManager::with_default_content());
        let mut map = filled_map(defs, 0, "stone", true);
        for i in 0..100 {
            map.transforming_liquid_add(IVec3::new(i % 16, 0, 0));
        }
        let mut modified = HashSet::new();
        map.transform_liquids(&mut modified, 10, Duration::ZERO);
        assert!(map.liquid_state.loop_count_multiplier() > 1.0);
        // Stone is not floodable: entries are consumed without effect
        assert!(map.transforming_liquid_size() < 100);
        assert!(modified.is_empty());
    }
}

//! Trees, jungle grass, ores and simple decorations

use serde::{Deserialize, Serialize};

use crate::core::types::{IVec2, IVec3};
use crate::generation::random::PseudoRandom;
use crate::generation::tree::{make_jungle_tree, make_pine_tree, make_tree};
use crate::voxel::manip::VoxelManipulator;
use crate::voxel::node::{MapNode, CONTENT_AIR};
use crate::voxel::nodedef::NodeDefManager;

use super::{BiomeV6, MapgenV6, V6Content};

/// Clusters of one node scattered through another
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ore {
    pub ore: String,
    /// Names or `group:` selectors the ore may replace
    pub wherein: Vec<String>,
    /// One cluster per this many nodes of volume
    pub clust_scarcity: u32,
    /// Ore nodes per cluster, on average
    pub clust_num_ores: u32,
    /// Edge of the cube a cluster is drawn in
    pub clust_size: i32,
    pub y_min: i32,
    pub y_max: i32,
}

/// A node, or a short column of it, placed on top of the ground
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Decoration {
    pub deco: String,
    pub place_on: Vec<String>,
    /// Expected decorations per ground column
    pub fill_ratio: f32,
    /// Edge of the square cells the chunk is split into
    pub sidelen: i32,
    pub y_min: i32,
    pub y_max: i32,
    pub height: i32,
    /// Random column height up to this when above `height`
    pub height_max: i32,
}

fn resolve_all(defs: &NodeDefManager, names: &[String]) -> Vec<u16> {
    names.iter().flat_map(|n| defs.get_ids(n)).collect()
}

impl MapgenV6 {
    fn heightmap_at(&self, x: i32, z: i32) -> i32 {
        let csx = self.node_max.x - self.node_min.x + 1;
        self.base.heightmap[((z - self.node_min.z) * csx + (x - self.node_min.x)) as usize] as i32
    }

    pub(super) fn place_trees_and_jungle_grass(&self, vm: &mut VoxelManipulator, defs: &NodeDefManager, c: &V6Content) {
        let water_level = self.base.water_level as i32;
        if self.node_max.y < water_level {
            return;
        }
        let mut grassrandom = PseudoRandom::new(self.blockseed as u64 + 53);
        let mut treerandom = PseudoRandom::new(self.blockseed as u64);

        let div = 8;
        let sidelen = (self.node_max.x - self.node_min.x + 1) / div;
        let area = (sidelen * sidelen) as f32;

        // Jungle grass goes first since leaves would hide the ground
        for z0 in 0..div {
            for x0 in 0..div {
                let center = IVec2::new(
                    self.node_min.x + sidelen / 2 + sidelen * x0,
                    self.node_min.z + sidelen / 2 + sidelen * z0,
                );
                let pmin = IVec2::new(self.node_min.x + sidelen * x0, self.node_min.z + sidelen * z0);
                let pmax = pmin + IVec2::splat(sidelen - 1);

                let bt = self.get_biome(center);
                let tree_count = match bt {
                    BiomeV6::Jungle => (area * self.tree_amount(center)) as u32 * 4,
                    BiomeV6::Taiga | BiomeV6::Normal => (area * self.tree_amount(center)) as u32,
                    _ => 0,
                };

                if bt == BiomeV6::Jungle {
                    let grass_count = (5.0 * self.humidity(center) * tree_count as f32) as u32;
                    for _ in 0..grass_count {
                        let x = grassrandom.range(pmin.x, pmax.x);
                        let z = grassrandom.range(pmin.y, pmax.y);
                        let y = self.heightmap_at(x, z);
                        if y < water_level {
                            continue;
                        }
                        // Grass on grass is known to see the sun
                        let p = IVec3::new(x, y, z);
                        if vm.get_node_no_ex(p).content() == c.dirt_with_grass {
                            vm.set_node(p + IVec3::Y, MapNode::new(c.junglegrass));
                        }
                    }
                }

                for _ in 0..tree_count {
                    let x = treerandom.range(pmin.x, pmax.x);
                    let z = treerandom.range(pmin.y, pmax.y);
                    let y = self.heightmap_at(x, z);
                    // Keep trees above water and inside the chunk
                    if y < water_level || y > self.node_max.y - 6 {
                        continue;
                    }
                    let ground = vm.get_node_no_ex(IVec3::new(x, y, z)).content();
                    if ground != c.dirt && ground != c.dirt_with_grass && ground != c.dirt_with_snow {
                        continue;
                    }
                    let p = IVec3::new(x, y + 1, z);
                    let seed = treerandom.next_u32();
                    match bt {
                        BiomeV6::Jungle => make_jungle_tree(vm, p, defs, seed),
                        BiomeV6::Taiga => make_pine_tree(vm, p - IVec3::Y, defs, seed),
                        BiomeV6::Normal => {
                            let apple = treerandom.range(0, 3) == 0 && self.have_apple_tree(IVec2::new(x, z));
                            make_tree(vm, p, apple, defs, seed);
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    pub(super) fn place_ores(&self, vm: &mut VoxelManipulator, defs: &NodeDefManager) {
        for (index, ore) in self.ores.iter().enumerate() {
            let ymin = self.node_min.y.max(ore.y_min);
            let ymax = self.node_max.y.min(ore.y_max);
            if ymin > ymax || ore.clust_scarcity == 0 || ore.clust_size <= 0 {
                continue;
            }
            let Some(content) = defs.get_id(&ore.ore) else {
                log::warn!("v6 generator: unknown ore node '{}'", ore.ore);
                continue;
            };
            let wherein = resolve_all(defs, &ore.wherein);
            let mut pr = PseudoRandom::new(self.blockseed as u64 + index as u64);

            let nmin = IVec3::new(self.node_min.x, ymin, self.node_min.z);
            let nmax = IVec3::new(self.node_max.x, ymax, self.node_max.z);
            let size = nmax - nmin + IVec3::ONE;
            let volume = (size.x * size.y * size.z) as u32;
            let csize = ore.clust_size;
            let cvolume = (csize * csize * csize) as i32;
            let nclusters = volume / ore.clust_scarcity;

            for _ in 0..nclusters {
                let x0 = pr.range(nmin.x, nmax.x - csize + 1);
                let y0 = pr.range(nmin.y, nmax.y - csize + 1);
                let z0 = pr.range(nmin.z, nmax.z - csize + 1);
                for z1 in 0..csize {
                    for y1 in 0..csize {
                        for x1 in 0..csize {
                            if pr.range(1, cvolume) > ore.clust_num_ores as i32 {
                                continue;
                            }
                            let p = IVec3::new(x0 + x1, y0 + y1, z0 + z1);
                            if wherein.contains(&vm.get_node_no_ex(p).content()) {
                                vm.set_node(p, MapNode::new(content));
                            }
                        }
                    }
                }
            }
        }
    }

    pub(super) fn place_decorations(&self, vm: &mut VoxelManipulator, defs: &NodeDefManager) {
        for (index, deco) in self.decorations.iter().enumerate() {
            let Some(content) = defs.get_id(&deco.deco) else {
                log::warn!("v6 generator: unknown decoration node '{}'", deco.deco);
                continue;
            };
            let place_on = resolve_all(defs, &deco.place_on);
            let mut ps = PseudoRandom::new(self.blockseed as u64 + 53 + index as u64);
            let sidelen = deco.sidelen.clamp(1, self.node_max.x - self.node_min.x + 1);
            let divlen = (self.node_max.x - self.node_min.x + 1) / sidelen;
            let area = (sidelen * sidelen) as f32;

            for z0 in 0..divlen {
                for x0 in 0..divlen {
                    let pmin = IVec2::new(self.node_min.x + sidelen * x0, self.node_min.z + sidelen * z0);
                    let pmax = pmin + IVec2::splat(sidelen - 1);
                    let wanted = area * deco.fill_ratio;
                    let mut count = wanted as u32;
                    // Carry the fractional part as a chance of one more
                    if ps.next_float() < wanted.fract() {
                        count += 1;
                    }
                    for _ in 0..count {
                        let x = ps.range(pmin.x, pmax.x);
                        let z = ps.range(pmin.y, pmax.y);
                        let y = self.heightmap_at(x, z);
                        if y < self.node_min.y || y > self.node_max.y || y < deco.y_min || y > deco.y_max {
                            continue;
                        }
                        let height = if deco.height_max > deco.height {
                            ps.range(deco.height, deco.height_max)
                        } else {
                            deco.height.max(1)
                        };
                        if y + height > vm.area.max.y {
                            continue;
                        }
                        if !place_on.contains(&vm.get_node_no_ex(IVec3::new(x, y, z)).content()) {
                            continue;
                        }
                        for dy in 1..=height {
                            let p = IVec3::new(x, y + dy, z);
                            if vm.get_node_no_ex(p).content() != CONTENT_AIR {
                                break;
                            }
                            vm.set_node(p, MapNode::new(content));
                        }
                    }
                }
            }
        }
    }
}

//! Ground, mud and surface passes of the v6 generator

use crate::core::types::{IVec2, IVec3};
use crate::voxel::manip::VoxelManipulator;
use crate::voxel::node::{MapNode, CONTENT_AIR, CONTENT_IGNORE};
use crate::voxel::nodedef::{LiquidType, NodeDefManager, ParamType};

use super::{BiomeV6, MapgenV6, V6Content, DESERT_STONE_BASE, ICE_BASE};

const DIRS4: [IVec3; 4] = [IVec3::new(0, 0, 1), IVec3::new(1, 0, 0), IVec3::new(-1, 0, 0), IVec3::new(0, 0, -1)];

impl MapgenV6 {
    /// Fill the unset cells of the central area with stone, water and air.
    /// Returns the highest stone surface.
    pub(super) fn generate_ground(&self, vm: &mut VoxelManipulator, c: &V6Content) -> i32 {
        let water_level = self.base.water_level as i32;
        let mut stone_surface_max_y = i32::MIN;
        for z in self.node_min.z..=self.node_max.z {
            for x in self.node_min.x..=self.node_max.x {
                let p2d = IVec2::new(x, z);
                let surface_y = self.terrain_level_from_map(p2d) as i32;
                stone_surface_max_y = stone_surface_max_y.max(surface_y);
                let bt = self.get_biome(p2d);

                for y in self.node_min.y..=self.node_max.y {
                    let p = IVec3::new(x, y, z);
                    if vm.get_node_no_ex(p).content() != CONTENT_IGNORE {
                        continue;
                    }
                    let content = if y <= surface_y {
                        if y >= DESERT_STONE_BASE && bt == BiomeV6::Desert { c.desert_stone } else { c.stone }
                    } else if y <= water_level {
                        if y >= ICE_BASE && bt == BiomeV6::Tundra { c.ice } else { c.water_source }
                    } else {
                        CONTENT_AIR
                    };
                    vm.set_node(p, MapNode::new(content));
                }
            }
        }
        stone_surface_max_y
    }

    /// Topmost stone in a column of the whole buffer, or one below the
    /// buffer when there is none
    fn find_stone_level(&self, vm: &VoxelManipulator, c: &V6Content, p2d: IVec2) -> i32 {
        let ymin = vm.area.min.y;
        for y in (ymin..=vm.area.max.y).rev() {
            let content = vm.get_node_no_ex(IVec3::new(p2d.x, y, p2d.y)).content();
            if content == c.stone || content == c.desert_stone {
                return y;
            }
        }
        ymin - 1
    }

    /// Cover the stone of every central column with dirt, sand or gravel
    pub(super) fn add_mud(&self, vm: &mut VoxelManipulator, c: &V6Content) {
        let water_level = self.base.water_level as i32;
        for z in self.node_min.z..=self.node_max.z {
            for x in self.node_min.x..=self.node_max.x {
                let p2d = IVec2::new(x, z);
                let mut mud_add_amount = (self.mud_amount(p2d) / 2.0 + 0.5) as i32;
                let surface_y = self.find_stone_level(vm, c, p2d);
                if surface_y == vm.area.min.y - 1 {
                    continue;
                }

                let bt = self.get_biome(p2d);
                let mut addnode = if bt == BiomeV6::Desert { c.desert_sand } else { c.dirt };
                if bt == BiomeV6::Desert && surface_y + mud_add_amount <= water_level + 1 {
                    addnode = c.sand;
                } else if mud_add_amount <= 0 {
                    mud_add_amount = 1 - mud_add_amount;
                    addnode = c.gravel;
                } else if bt != BiomeV6::Desert && self.have_beach(p2d) && surface_y + mud_add_amount <= water_level + 2 {
                    addnode = c.sand;
                }

                if (bt == BiomeV6::Desert || bt == BiomeV6::Tundra) && surface_y > 20 {
                    mud_add_amount = (mud_add_amount - (surface_y - 20) / 5).max(0);
                }

                // Grass that flowed in from a neighbouring chunk turns back to dirt
                let top = IVec3::new(x, surface_y, z);
                if vm.get_node_no_ex(top).content() == c.dirt_with_grass {
                    vm.set_node(top, MapNode::new(c.dirt));
                }

                let y_start = surface_y + 1;
                let y_end = (y_start + mud_add_amount - 1).min(self.node_max.y);
                for y in y_start..=y_end {
                    vm.set_node(IVec3::new(x, y, z), MapNode::new(addnode));
                }
            }
        }
    }

    /// Drop loose mud off ledges, sweeping the columns once forwards and
    /// once backwards. Mud that already moved during a sweep stays put
    /// until the next one.
    pub(super) fn flow_mud(
        &self,
        vm: &mut VoxelManipulator,
        defs: &NodeDefManager,
        c: &V6Content,
        minpos: i32,
        maxpos: i32,
    ) {
        let area = vm.area;
        let mut moved = vec![false; area.volume()];
        let content_at = |vm: &VoxelManipulator, p: IVec3| vm.get_node_no_ex(p).content();
        let walkable = |vm: &VoxelManipulator, p: IVec3| defs.get_node(vm.get_node_no_ex(p)).walkable;
        let is_loose = |content: u16| content == c.dirt || content == c.dirt_with_grass || content == c.gravel;

        for k in 0..2 {
            moved.fill(false);
            for z in minpos..=maxpos {
                for x in minpos..=maxpos {
                    let p2d = if k == 1 {
                        IVec2::new(self.node_max.x - x, self.node_max.z - z)
                    } else {
                        IVec2::new(self.node_min.x + x, self.node_min.z + z)
                    };

                    let mut y = self.node_max.y;
                    while y >= self.node_min.y {
                        while y >= self.node_min.y && !is_loose(content_at(vm, IVec3::new(p2d.x, y, p2d.y))) {
                            y -= 1;
                        }
                        if y < self.node_min.y {
                            break;
                        }
                        let p = IVec3::new(p2d.x, y, p2d.y);
                        y -= 1;
                        if !area.contains(p) || moved[area.index_p(p)] {
                            continue;
                        }

                        let content = content_at(vm, p);
                        if content == c.dirt || content == c.dirt_with_grass {
                            vm.set_node(p, MapNode::new(c.dirt));
                            // Only mud resting on mud flows
                            let below = content_at(vm, p - IVec3::Y);
                            if below != c.dirt && below != c.dirt_with_grass {
                                continue;
                            }
                        }

                        // Something walkable on top holds it in place
                        let above = p + IVec3::Y;
                        if area.contains(above) && walkable(vm, above) {
                            continue;
                        }

                        for d in DIRS4 {
                            let side = p + d;
                            if !area.contains(side) || walkable(vm, side) {
                                continue;
                            }
                            let mut target = side - IVec3::Y;
                            if !area.contains(target) || walkable(vm, target) {
                                continue;
                            }
                            let mut dropped_to_unknown = false;
                            loop {
                                target.y -= 1;
                                if !area.contains(target) || content_at(vm, target) == CONTENT_IGNORE {
                                    dropped_to_unknown = true;
                                    break;
                                }
                                if walkable(vm, target) {
                                    break;
                                }
                            }
                            if !dropped_to_unknown {
                                let place = target + IVec3::Y;
                                self.move_mud(vm, c, p, place, p2d);
                                moved[area.index_p(place)] = true;
                            }
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Move one mud node. Near the chunk edge, decorations standing on the
    /// old spot or buried by the new one are cleared.
    fn move_mud(&self, vm: &mut VoxelManipulator, c: &V6Content, from: IVec3, to: IVec3, p2d: IVec2) {
        let n = vm.get_node_no_ex(from);
        vm.set_node(to, n);
        vm.set_node(from, MapNode::new(CONTENT_AIR));

        if p2d.x >= self.node_max.x || p2d.x <= self.node_min.x || p2d.y >= self.node_max.z || p2d.y <= self.node_min.z {
            Self::clear_stack(vm, c, from + IVec3::Y);
            Self::clear_stack(vm, c, to + IVec3::Y);
        }
    }

    fn clear_stack(vm: &mut VoxelManipulator, c: &V6Content, mut p: IVec3) {
        while vm.area.contains(p) {
            let content = vm.get_node_no_ex(p).content();
            if content == CONTENT_AIR || content == c.water_source || content == CONTENT_IGNORE {
                break;
            }
            vm.set_node(p, MapNode::new(CONTENT_AIR));
            p.y += 1;
        }
    }

    /// Turn the exposed dirt of every padded column into the biome's surface
    pub(super) fn grow_grass(&self, vm: &mut VoxelManipulator, defs: &NodeDefManager, c: &V6Content) {
        let water_level = self.base.water_level as i32;
        for z in self.full_node_min.z..=self.full_node_max.z {
            for x in self.full_node_min.x..=self.full_node_max.x {
                // Lowest cell that still sees the sky through air and leaves
                let mut surface_y = self.full_node_min.y;
                for y in (self.full_node_min.y..=self.node_max.y).rev() {
                    let n = vm.get_node_no_ex(IVec3::new(x, y, z));
                    let f = defs.get_node(n);
                    if f.param_type != ParamType::Light || f.liquid_type != LiquidType::None || n.content() == c.ice {
                        surface_y = y;
                        break;
                    }
                }
                if surface_y < water_level - 20 {
                    continue;
                }

                let bt = self.get_biome(IVec2::new(x, z));
                let p = IVec3::new(x, surface_y, z);
                let content = vm.get_node_no_ex(p).content();
                if bt == BiomeV6::Taiga && content == c.dirt {
                    vm.set_node(p, MapNode::new(c.dirt_with_snow));
                } else if bt == BiomeV6::Tundra {
                    if content == c.dirt {
                        vm.set_node(p, MapNode::new(c.snowblock));
                        vm.set_node(p - IVec3::Y, MapNode::new(c.dirt_with_snow));
                    } else if content == c.stone && surface_y < self.node_max.y {
                        vm.set_node(p + IVec3::Y, MapNode::new(c.snowblock));
                    }
                } else if content == c.dirt {
                    vm.set_node(p, MapNode::new(c.dirt_with_grass));
                }
            }
        }
    }
}

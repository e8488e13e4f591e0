//! Random-walk tunnels of the v6 generator

use glam::Vec3;

use crate::core::types::{IVec3, MAP_BLOCKSIZE};
use crate::voxel::manip::VoxelManipulator;
use crate::voxel::node::{MapNode, CONTENT_AIR, CONTENT_IGNORE};
use crate::voxel::nodedef::NodeDefManager;

use super::random::PseudoRandom;

/// One cave: a chain of tunnel segments between random route points.
///
/// Large caves flood with water around sea level and with lava deep down.
pub struct CavesV6<'a> {
    defs: &'a NodeDefManager,
    water_level: i32,
    c_water_source: u16,
    c_lava_source: u16,

    node_min: IVec3,
    node_max: IVec3,
    large_cave: bool,
    large_cave_is_flat: bool,
    min_tunnel_diameter: i32,
    max_tunnel_diameter: i32,
    tunnel_routepoints: i32,
    part_max_length_rs: i32,
    main_direction: Vec3,
    /// Route area size and origin
    ar: IVec3,
    of: IVec3,
    route_y_min: i32,
    route_y_max: i32,
    /// Current route point, relative to `of`
    orp: Vec3,
    /// Current tunnel diameter
    rs: i32,
}

impl<'a> CavesV6<'a> {
    pub fn new(defs: &'a NodeDefManager, water_level: i32, c_water_source: u16, c_lava_source: u16) -> Self {
        Self {
            defs,
            water_level,
            c_water_source,
            c_lava_source,
            node_min: IVec3::ZERO,
            node_max: IVec3::ZERO,
            large_cave: false,
            large_cave_is_flat: false,
            min_tunnel_diameter: 2,
            max_tunnel_diameter: 6,
            tunnel_routepoints: 0,
            part_max_length_rs: 0,
            main_direction: Vec3::ZERO,
            ar: IVec3::ZERO,
            of: IVec3::ZERO,
            route_y_min: 0,
            route_y_max: 0,
            orp: Vec3::ZERO,
            rs: 0,
        }
    }

    /// Carve one cave through `vm`. `heightmap` is the ground level of the
    /// central columns with its row length; tunnels entirely above it are
    /// walked but not carved.
    #[allow(clippy::too_many_arguments)]
    pub fn make_cave(
        &mut self,
        vm: &mut VoxelManipulator,
        nmin: IVec3,
        nmax: IVec3,
        ps: &mut PseudoRandom,
        ps2: &mut PseudoRandom,
        is_large_cave: bool,
        max_stone_height: i32,
        heightmap: Option<(&[i16], i32)>,
    ) {
        self.node_min = nmin;
        self.node_max = nmax;
        self.large_cave = is_large_cave;

        self.min_tunnel_diameter = 2;
        self.max_tunnel_diameter = ps.range(2, 6);
        let dswitchint = ps.range(1, 14);
        if self.large_cave {
            self.part_max_length_rs = ps.range(2, 4);
            let hi = ps.range(15, 30);
            self.tunnel_routepoints = ps.range(5, hi);
            self.min_tunnel_diameter = 5;
            let hi = ps.range(8, 24);
            self.max_tunnel_diameter = ps.range(7, hi);
        } else {
            self.part_max_length_rs = ps.range(2, 9);
            let hi = ps.range(15, 30);
            self.tunnel_routepoints = ps.range(10, hi);
        }
        self.large_cave_is_flat = ps.range(0, 1) == 0;
        self.main_direction = Vec3::ZERO;

        // Let the route reach a bit into the neighbours
        self.ar = nmax - nmin + IVec3::ONE;
        self.of = nmin;
        let insure = 10;
        let more = (MAP_BLOCKSIZE - self.max_tunnel_diameter / 2 - insure).max(1);
        self.ar += IVec3::new(1, 0, 1) * more * 2;
        self.of -= IVec3::new(1, 0, 1) * more;

        self.route_y_min = 0;
        // Half a diameter plus 7 over the stone surface
        self.route_y_max = (-self.of.y + max_stone_height + self.max_tunnel_diameter / 2 + 7).clamp(0, self.ar.y - 1);

        if self.large_cave {
            let mut minpos = 0;
            if nmin.y < self.water_level && nmax.y > self.water_level {
                minpos = self.water_level - self.max_tunnel_diameter / 3 - self.of.y;
                self.route_y_max = self.water_level + self.max_tunnel_diameter / 3 - self.of.y;
            }
            self.route_y_min = ps.range(minpos, minpos + self.max_tunnel_diameter);
            self.route_y_min = self.route_y_min.clamp(0, self.route_y_max.max(0));
        }

        let start_y_min = self.route_y_min.clamp(0, self.ar.y - 1);
        let start_y_max = self.route_y_max.clamp(start_y_min, self.ar.y - 1);

        self.orp.z = (ps.next() % self.ar.z as u32) as f32 + 0.5;
        self.orp.y = ps.range(start_y_min, start_y_max) as f32 + 0.5;
        self.orp.x = (ps.next() % self.ar.x as u32) as f32 + 0.5;

        for j in 0..self.tunnel_routepoints {
            self.make_tunnel(vm, ps, ps2, j % dswitchint == 0, heightmap);
        }
    }

    fn surface_from_heightmap(&self, p: IVec3, heightmap: Option<(&[i16], i32)>) -> i32 {
        if let Some((hm, row)) = heightmap {
            if p.z >= self.node_min.z && p.z <= self.node_max.z && p.x >= self.node_min.x && p.x <= self.node_max.x {
                let i = ((p.z - self.node_min.z) * row + (p.x - self.node_min.x)) as usize;
                if let Some(&h) = hm.get(i) {
                    return h as i32;
                }
            }
        }
        self.water_level
    }

    fn make_tunnel(
        &mut self,
        vm: &mut VoxelManipulator,
        ps: &mut PseudoRandom,
        ps2: &mut PseudoRandom,
        dirswitch: bool,
        heightmap: Option<(&[i16], i32)>,
    ) {
        if dirswitch && !self.large_cave {
            self.main_direction.z = ((ps.next() % 20) as f32 - 10.0) / 10.0;
            self.main_direction.y = ((ps.next() % 20) as f32 - 10.0) / 30.0;
            self.main_direction.x = ((ps.next() % 20) as f32 - 10.0) / 10.0;
            self.main_direction *= ps.range(0, 10) as f32 / 10.0;
        }

        self.rs = ps.range(self.min_tunnel_diameter, self.max_tunnel_diameter);
        let len_rs = (self.rs * self.part_max_length_rs).max(1);
        let maxlen = if self.large_cave {
            IVec3::new(len_rs, (len_rs / 2).max(1), len_rs)
        } else {
            IVec3::new(len_rs, ps.range(1, len_rs), len_rs)
        };

        let mut vec = Vec3::ZERO;
        vec.z = (ps.next() % maxlen.z as u32) as f32 - maxlen.z as f32 / 2.0;
        vec.y = (ps.next() % maxlen.y as u32) as f32 - maxlen.y as f32 / 2.0;
        vec.x = (ps.next() % maxlen.x as u32) as f32 - maxlen.x as f32 / 2.0;

        // Jump downward sometimes
        if !self.large_cave && ps.range(0, 12) == 0 {
            vec.z = (ps.next() % maxlen.z as u32) as f32 - maxlen.z as f32 / 2.0;
            vec.y = (ps.next() % (maxlen.y as u32 * 2)) as f32 - maxlen.y as f32;
            vec.x = (ps.next() % maxlen.x as u32) as f32 - maxlen.x as f32 / 2.0;
        }

        // Segments with both ends above ground still draw their random
        // numbers so the rest of the cave stays the same
        let p1 = self.orp.as_ivec3() + self.of + IVec3::splat(self.rs / 2);
        let p2 = vec.as_ivec3() + p1;
        let above_ground =
            p1.y > self.surface_from_heightmap(p1, heightmap) && p2.y > self.surface_from_heightmap(p2, heightmap);

        vec += self.main_direction;

        let mut rp = self.orp + vec;
        rp.x = if rp.x < 0.0 { 0.0 } else if rp.x >= self.ar.x as f32 { (self.ar.x - 1) as f32 } else { rp.x };
        rp.y = if rp.y < self.route_y_min as f32 {
            self.route_y_min as f32
        } else if rp.y >= self.route_y_max as f32 {
            (self.route_y_max - 1) as f32
        } else {
            rp.y
        };
        rp.z = if rp.z < 0.0 { 0.0 } else if rp.z >= self.ar.z as f32 { (self.ar.z - 1) as f32 } else { rp.z };
        vec = rp - self.orp;

        let mut veclen = vec.length();
        if veclen < 0.05 {
            veclen = 1.0;
        }

        // Every second section is rough
        let randomize_xz = ps2.range(1, 2) == 1;

        let mut f = 0.0f32;
        while f < 1.0 {
            self.carve_route(vm, ps, vec, f, randomize_xz, above_ground);
            f += 1.0 / veclen;
        }

        self.orp = rp;
    }

    fn carve_route(
        &self,
        vm: &mut VoxelManipulator,
        ps: &mut PseudoRandom,
        vec: Vec3,
        f: f32,
        randomize_xz: bool,
        above_ground: bool,
    ) {
        let startp = self.orp.as_ivec3() + self.of;
        let mut fp = self.orp + vec * f;
        fp.x += 0.1 * ps.range(-10, 10) as f32;
        fp.z += 0.1 * ps.range(-10, 10) as f32;
        let cp = fp.as_ivec3();

        let rs = self.rs;
        let mut d0 = -rs / 2;
        let mut d1 = d0 + rs;
        if randomize_xz {
            d0 += ps.range(-1, 1);
            d1 += ps.range(-1, 1);
        }

        for z0 in d0..=d1 {
            let si = rs / 2 - (z0.abs() - rs / 7 - 1).max(0);
            let x_start = -si - ps.range(0, 1);
            let x_end = si - 1 + ps.range(0, 1);
            for x0 in x_start..=x_end {
                if above_ground {
                    continue;
                }
                let maxabsxz = x0.abs().max(z0.abs());
                let si2 = rs / 2 - (maxabsxz - rs / 7 - 1).max(0);
                for y0 in -si2..=si2 {
                    // Large flat caves stay low
                    if self.large_cave_is_flat && rs > 7 && y0.abs() >= rs / 3 {
                        continue;
                    }
                    let p = cp + IVec3::new(x0, y0, z0) + self.of;
                    if !vm.area.contains(p) {
                        continue;
                    }
                    let i = vm.area.index_p(p);
                    let c = vm.data[i].content();
                    if !self.defs.get(c).is_ground_content {
                        continue;
                    }

                    if self.large_cave {
                        let full_ymin = self.node_min.y - MAP_BLOCKSIZE;
                        let full_ymax = self.node_max.y + MAP_BLOCKSIZE;
                        let fill = if full_ymin < self.water_level && full_ymax > self.water_level {
                            if p.y <= self.water_level { self.c_water_source } else { CONTENT_AIR }
                        } else if full_ymax < self.water_level {
                            if p.y < startp.y - 2 { self.c_lava_source } else { CONTENT_AIR }
                        } else {
                            CONTENT_AIR
                        };
                        vm.set_node(p, MapNode::new(fill));
                    } else {
                        if c == CONTENT_IGNORE || c == CONTENT_AIR {
                            continue;
                        }
                        vm.set_node(p, MapNode::new(CONTENT_AIR));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::area::VoxelArea;

    fn stone_box(defs: &NodeDefManager) -> VoxelManipulator {
        let stone = defs.get_id("default:stone").unwrap();
        let area = VoxelArea::new(IVec3::splat(-16), IVec3::splat(31));
        let mut vm = VoxelManipulator::with_area(area);
        for p in area.iter() {
            vm.set_node(p, MapNode::new(stone));
        }
        vm
    }

    fn carve(seed: u64, large: bool) -> VoxelManipulator {
        let defs = NodeDefManager::with_default_content();
        let mut vm = stone_box(&defs);
        let water = defs.get_id("default:water_source").unwrap();
        let lava = defs.get_id("default:lava_source").unwrap();
        let mut ps = PseudoRandom::new(seed);
        let mut ps2 = PseudoRandom::new(seed + 1);
        let mut cave = CavesV6::new(&defs, 1000, water, lava);
        cave.make_cave(&mut vm, IVec3::ZERO, IVec3::splat(15), &mut ps, &mut ps2, large, 100, None);
        vm
    }

    #[test]
    fn test_cave_carves_air() {
        let vm = carve(11, false);
        let air = vm.data.iter().filter(|n| n.content() == CONTENT_AIR).count();
        assert!(air > 0);
    }

    #[test]
    fn test_cave_is_deterministic() {
        assert_eq!(carve(77, true).data, carve(77, true).data);
    }

    #[test]
    fn test_cave_keeps_non_ground_nodes() {
        let defs = NodeDefManager::with_default_content();
        let cobble = defs.get_id("default:cobble").unwrap();
        let area = VoxelArea::new(IVec3::splat(-16), IVec3::splat(31));
        let mut vm = VoxelManipulator::with_area(area);
        for p in area.iter() {
            vm.set_node(p, MapNode::new(cobble));
        }
        let mut ps = PseudoRandom::new(3);
        let mut ps2 = PseudoRandom::new(4);
        let mut cave = CavesV6::new(&defs, 1, CONTENT_AIR, CONTENT_AIR);
        cave.make_cave(&mut vm, IVec3::ZERO, IVec3::splat(15), &mut ps, &mut ps2, false, 100, None);
        assert!(vm.data.iter().all(|n| n.content() == cobble));
    }
}

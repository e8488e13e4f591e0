//! State and helpers shared by all generators

use std::collections::VecDeque;

use crate::core::settings::WorldSettings;
use crate::core::types::{IVec2, IVec3, FACE_DIRS, MAP_BLOCKSIZE};
use crate::lighting::queue::{LightQueue, NO_SOURCE};
use crate::voxel::area::VoxelArea;
use crate::voxel::manip::VoxelManipulator;
use crate::voxel::node::{LightBank, CONTENT_IGNORE, LIGHT_SUN};
use crate::voxel::nodedef::NodeDefManager;

/// Seed, layout and flags every generator carries
#[derive(Clone, Debug)]
pub struct MapgenBase {
    pub seed: u64,
    /// Chunk edge in blocks
    pub chunksize: i16,
    pub water_level: i16,
    /// `MG_*` bits
    pub flags: u32,
    /// Central chunk size in nodes
    pub csize: IVec3,
    /// Ground level per column of the last chunk, x fastest
    pub heightmap: Vec<i16>,
}

impl MapgenBase {
    pub fn new(settings: &WorldSettings) -> Self {
        let chunksize = settings.chunksize.max(1);
        let csize = IVec3::splat(chunksize as i32 * MAP_BLOCKSIZE);
        Self {
            seed: settings.seed,
            chunksize,
            water_level: settings.water_level,
            flags: settings.mapgen_flags(),
            csize,
            heightmap: vec![0; (csize.x * csize.z) as usize],
        }
    }

    /// Y of the topmost walkable node in column `p2d` between `ymin` and
    /// `ymax`, or `ymin - 1` when there is none
    pub fn find_ground_level(vm: &VoxelManipulator, defs: &NodeDefManager, p2d: IVec2, ymin: i32, ymax: i32) -> i32 {
        for y in (ymin..=ymax).rev() {
            let n = vm.get_node_no_ex(IVec3::new(p2d.x, y, p2d.y));
            if n.content() != CONTENT_IGNORE && defs.get_node(n).walkable {
                return y;
            }
        }
        ymin - 1
    }

    /// Recompute `heightmap` over the columns of `nmin..=nmax`
    pub fn update_heightmap(&mut self, vm: &VoxelManipulator, defs: &NodeDefManager, nmin: IVec3, nmax: IVec3) {
        let sx = nmax.x - nmin.x + 1;
        let sz = nmax.z - nmin.z + 1;
        self.heightmap.resize((sx * sz) as usize, 0);
        let mut index = 0;
        for z in nmin.z..=nmax.z {
            for x in nmin.x..=nmax.x {
                let y = Self::find_ground_level(vm, defs, IVec2::new(x, z), nmin.y, nmax.y);
                self.heightmap[index] = y as i16;
                index += 1;
            }
        }
    }

    /// Push the top and bottom node of every liquid column in
    /// `nmin..=nmax` onto `queue`
    pub fn update_liquid(
        vm: &VoxelManipulator,
        defs: &NodeDefManager,
        queue: &mut VecDeque<IVec3>,
        nmin: IVec3,
        nmax: IVec3,
    ) {
        for z in nmin.z..=nmax.z {
            for x in nmin.x..=nmax.x {
                let mut was_ignored = true;
                let mut was_liquid = false;
                let mut was_pushed = false;
                for y in (nmin.y..=nmax.y).rev() {
                    let n = vm.get_node_no_ex(IVec3::new(x, y, z));
                    let is_ignored = n.content() == CONTENT_IGNORE;
                    let is_liquid = defs.get_node(n).is_liquid();
                    if is_ignored || was_ignored || is_liquid == was_liquid {
                        was_pushed = false;
                    } else {
                        // Edge of a liquid column, entering or leaving it
                        let mut is_pushed = false;
                        if is_liquid {
                            queue.push_back(IVec3::new(x, y, z));
                            is_pushed = true;
                        }
                        if was_liquid && !was_pushed {
                            queue.push_back(IVec3::new(x, y + 1, z));
                        }
                        was_pushed = is_pushed;
                    }
                    was_liquid = is_liquid;
                    was_ignored = is_ignored;
                }
            }
        }
    }

    /// Overwrite both light banks of every light-carrying cell in
    /// `nmin..=nmax` with `light` (day in the low nibble)
    pub fn set_lighting(vm: &mut VoxelManipulator, defs: &NodeDefManager, light: u8, nmin: IVec3, nmax: IVec3) {
        let a = vm.area.intersect(&VoxelArea::new(nmin, nmax));
        for p in a.iter() {
            let i = vm.area.index_p(p);
            let mut n = vm.data[i];
            let f = defs.get_node(n);
            n.set_light(LightBank::Day, light & 0x0f, f);
            n.set_light(LightBank::Night, light >> 4, f);
            vm.data[i] = n;
        }
    }

    /// Light the buffer from scratch: sunlight falls down the columns of
    /// `nmin..=nmax`, then every lit cell spreads inside `full_min..=full_max`.
    /// A column is sunlit when the node above `nmax` holds sunlight, or when
    /// it holds IGNORE and the area is above `water_level`.
    pub fn calc_lighting(
        vm: &mut VoxelManipulator,
        defs: &NodeDefManager,
        water_level: i16,
        nmin: IVec3,
        nmax: IVec3,
        full_min: IVec3,
        full_max: IVec3,
    ) {
        Self::set_lighting(vm, defs, 0, nmin, nmax);
        Self::propagate_sunlight(vm, defs, water_level, nmin, nmax);
        Self::spread_light(vm, defs, nmin, nmax, full_min, full_max);
    }

    fn propagate_sunlight(vm: &mut VoxelManipulator, defs: &NodeDefManager, water_level: i16, nmin: IVec3, nmax: IVec3) {
        let underground = water_level as i32 >= nmax.y;
        for z in nmin.z..=nmax.z {
            for x in nmin.x..=nmax.x {
                let above = vm.get_node_no_ex(IVec3::new(x, nmax.y + 1, z));
                if above.content() == CONTENT_IGNORE {
                    if underground {
                        continue;
                    }
                } else if above.light_raw(LightBank::Day, defs.get_node(above)) != LIGHT_SUN {
                    continue;
                }
                for y in (nmin.y..=nmax.y).rev() {
                    let p = IVec3::new(x, y, z);
                    if !vm.area.contains(p) {
                        break;
                    }
                    let i = vm.area.index_p(p);
                    let mut n = vm.data[i];
                    let f = defs.get_node(n);
                    if !f.sunlight_propagates {
                        break;
                    }
                    n.set_light(LightBank::Day, LIGHT_SUN, f);
                    vm.data[i] = n;
                }
            }
        }
    }

    fn spread_light(
        vm: &mut VoxelManipulator,
        defs: &NodeDefManager,
        nmin: IVec3,
        nmax: IVec3,
        full_min: IVec3,
        full_max: IVec3,
    ) {
        let full = vm.area.intersect(&VoxelArea::new(full_min, full_max));
        let seeds = vm.area.intersect(&VoxelArea::new(nmin, nmax));
        for bank in LightBank::ALL {
            let mut queue = LightQueue::default();
            for p in seeds.iter() {
                let i = vm.area.index_p(p);
                let mut n = vm.data[i];
                if n.content() == CONTENT_IGNORE {
                    continue;
                }
                let f = defs.get_node(n);
                if !f.light_propagates {
                    continue;
                }
                if f.light_source > n.light_raw(bank, f) {
                    n.set_light(bank, f.light_source, f);
                    vm.data[i] = n;
                }
                let light = n.get_light(bank, f);
                if light > 1 {
                    queue.push(light, p, NO_SOURCE);
                }
            }

            while let Some((light, c)) = queue.pop() {
                let next = light - 1;
                for d in FACE_DIRS {
                    let p = c.pos + d;
                    if !full.contains(p) {
                        continue;
                    }
                    let i = vm.area.index_p(p);
                    let mut n = vm.data[i];
                    if n.content() == CONTENT_IGNORE {
                        continue;
                    }
                    let f = defs.get_node(n);
                    if !f.light_propagates || n.light_raw(bank, f) >= next {
                        continue;
                    }
                    n.set_light(bank, next, f);
                    vm.data[i] = n;
                    if next > 1 {
                        queue.push(next, p, NO_SOURCE);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::node::{MapNode, CONTENT_AIR};

    fn air_box(min: IVec3, max: IVec3) -> VoxelManipulator {
        let mut vm = VoxelManipulator::with_area(VoxelArea::new(min, max));
        for p in VoxelArea::new(min, max).iter() {
            vm.set_node(p, MapNode::new(CONTENT_AIR));
        }
        vm
    }

    #[test]
    fn test_update_liquid_pushes_column_ends() {
        let defs = NodeDefManager::with_default_content();
        let water = defs.get_id("default:water_source").unwrap();
        let mut vm = air_box(IVec3::ZERO, IVec3::new(0, 9, 0));
        for y in 3..=6 {
            vm.set_node(IVec3::new(0, y, 0), MapNode::new(water));
        }
        let mut queue = VecDeque::new();
        MapgenBase::update_liquid(&vm, &defs, &mut queue, IVec3::ZERO, IVec3::new(0, 9, 0));
        let got: Vec<i32> = queue.iter().map(|p| p.y).collect();
        assert_eq!(got, vec![6, 3]);
    }

    #[test]
    fn test_calc_lighting_sun_and_shadow() {
        let defs = NodeDefManager::with_default_content();
        let stone = defs.get_id("default:stone").unwrap();
        let min = IVec3::new(0, 0, 0);
        let max = IVec3::new(9, 20, 9);
        // The top layer stays unloaded, so the columns count as open sky
        let mut vm = air_box(min, IVec3::new(9, 19, 9));
        vm.add_area(&VoxelArea::new(min, max));
        // Roof with a hole at (5, 5)
        for z in 0..=9 {
            for x in 0..=9 {
                if (x, z) != (5, 5) {
                    vm.set_node(IVec3::new(x, 15, z), MapNode::new(stone));
                }
            }
        }
        MapgenBase::calc_lighting(&mut vm, &defs, 0, min, IVec3::new(9, 19, 9), min, max);
        let day = |p: IVec3| {
            let n = vm.get_node_no_ex(p);
            n.get_light(LightBank::Day, defs.get_node(n))
        };
        assert_eq!(day(IVec3::new(5, 3, 5)), LIGHT_SUN);
        assert_eq!(day(IVec3::new(3, 3, 5)), LIGHT_SUN - 2);
        assert_eq!(day(IVec3::new(0, 18, 0)), LIGHT_SUN);
        let n = vm.get_node_no_ex(IVec3::new(5, 3, 5));
        assert_eq!(n.get_light(LightBank::Night, defs.get_node(n)), 0);
    }

    #[test]
    fn test_heightmap() {
        let defs = NodeDefManager::with_default_content();
        let stone = defs.get_id("default:stone").unwrap();
        let mut vm = air_box(IVec3::ZERO, IVec3::new(1, 9, 0));
        for y in 0..=4 {
            vm.set_node(IVec3::new(0, y, 0), MapNode::new(stone));
        }
        let mut base = MapgenBase::new(&WorldSettings::default());
        base.update_heightmap(&vm, &defs, IVec3::ZERO, IVec3::new(1, 9, 0));
        assert_eq!(&base.heightmap[..2], &[4, -1]);
    }
}

//! Dungeon carver: rooms joined by corridors, cut into solid ground

use std::sync::Arc;

use glam::Vec3;

use crate::core::types::{IVec3, MAP_BLOCKSIZE};
use crate::voxel::area::VoxelArea;
use crate::voxel::manip::{
    VoxelManipulator, VMANIP_FLAG_DUNGEON_INSIDE, VMANIP_FLAG_DUNGEON_PRESERVE, VMANIP_FLAG_DUNGEON_UNTOUCHABLE,
};
use crate::voxel::node::{MapNode, CONTENT_AIR, CONTENT_IGNORE};
use crate::voxel::nodedef::{DrawType, NodeDefManager};

use super::noise::{Noise, NoiseParams};
use super::random::PseudoRandom;

#[derive(Clone, Debug)]
pub struct DungeonParams {
    pub seed: u64,
    pub c_wall: u16,
    /// Wall variant mixed in by noise; IGNORE disables the pass
    pub c_alt_wall: u16,
    pub c_stair: u16,
    /// Allow diagonal corridors
    pub diagonal_dirs: bool,
    /// Leave air, liquids and non-ground nodes alone
    pub only_in_ground: bool,
    /// Also leave IGNORE alone, so dungeons never poke out of the chunk
    pub preserve_ignore: bool,
    /// Cross-section of corridors and doors
    pub holesize: IVec3,
    pub corridor_len_min: u32,
    pub corridor_len_max: u32,
    pub room_size_min: IVec3,
    pub room_size_max: IVec3,
    pub room_size_large_min: IVec3,
    pub room_size_large_max: IVec3,
    /// 0 never, 1 always, n one in n rooms
    pub large_room_chance: u32,
    pub num_rooms: u32,
    pub num_dungeons: u32,
    pub np_alt_wall: NoiseParams,
}

impl Default for DungeonParams {
    fn default() -> Self {
        Self {
            seed: 0,
            c_wall: CONTENT_IGNORE,
            c_alt_wall: CONTENT_IGNORE,
            c_stair: CONTENT_IGNORE,
            diagonal_dirs: false,
            only_in_ground: true,
            preserve_ignore: true,
            holesize: IVec3::new(1, 2, 1),
            corridor_len_min: 1,
            corridor_len_max: 13,
            room_size_min: IVec3::new(4, 4, 4),
            room_size_max: IVec3::new(8, 6, 8),
            room_size_large_min: IVec3::new(8, 8, 8),
            room_size_large_max: IVec3::new(16, 16, 16),
            large_room_chance: 0,
            num_rooms: 8,
            num_dungeons: 1,
            np_alt_wall: NoiseParams::new(-0.4, 1.0, Vec3::splat(40.0), 32474, 6, 1.1),
        }
    }
}

pub struct DungeonGen {
    defs: Arc<NodeDefManager>,
    dp: DungeonParams,
    random: PseudoRandom,
    /// Walker state of the door search
    pos: IVec3,
    dir: IVec3,
}

impl DungeonGen {
    pub fn new(defs: Arc<NodeDefManager>, dp: DungeonParams) -> Self {
        Self { defs, dp, random: PseudoRandom::new(0), pos: IVec3::ZERO, dir: IVec3::X }
    }

    pub fn params(&self) -> &DungeonParams {
        &self.dp
    }

    /// Carve `num_dungeons` dungeons into `vm`, preparing the preserve
    /// flags over `nmin..=nmax` first
    pub fn generate(&mut self, vm: &mut VoxelManipulator, blockseed: u32, nmin: IVec3, nmax: IVec3) {
        if self.dp.num_dungeons == 0 {
            return;
        }
        self.random = PseudoRandom::new(blockseed as u64 + 2);

        vm.clear_flag(VMANIP_FLAG_DUNGEON_INSIDE | VMANIP_FLAG_DUNGEON_PRESERVE);

        if self.dp.only_in_ground {
            // Open air, liquids and placed structures stay as they are
            let area = vm.area.intersect(&VoxelArea::new(nmin, nmax));
            for p in area.iter() {
                let i = vm.area.index_p(p);
                let c = vm.data[i].content();
                let f = self.defs.get(c);
                if f.drawtype == DrawType::AirLike
                    || f.drawtype == DrawType::Liquid
                    || (self.dp.preserve_ignore && c == CONTENT_IGNORE)
                    || !f.is_ground_content
                {
                    vm.flags[i] |= VMANIP_FLAG_DUNGEON_PRESERVE;
                }
            }
        }

        for _ in 0..self.dp.num_dungeons {
            self.make_dungeon(vm, IVec3::ONE * MAP_BLOCKSIZE);
        }

        if self.dp.c_alt_wall == CONTENT_IGNORE {
            return;
        }
        let noise = Noise::new(&self.dp.np_alt_wall, blockseed as u64);
        let area = vm.area.intersect(&VoxelArea::new(nmin, nmax));
        for p in area.iter() {
            let i = vm.area.index_p(p);
            if vm.data[i].content() == self.dp.c_wall && noise.noise3d(p.x as f32, p.y as f32, p.z as f32) > 0.0 {
                vm.data[i].set_content(self.dp.c_alt_wall);
            }
        }
    }

    fn random_room_size(&mut self, large: bool) -> IVec3 {
        let (min, max) = if large {
            (self.dp.room_size_large_min, self.dp.room_size_large_max)
        } else {
            (self.dp.room_size_min, self.dp.room_size_max)
        };
        let z = self.random.range(min.z, max.z);
        let y = self.random.range(min.y, max.y);
        let x = self.random.range(min.x, max.x);
        IVec3::new(x, y, z)
    }

    fn make_dungeon(&mut self, vm: &mut VoxelManipulator, start_padding: IVec3) {
        let areasize = vm.area.extent();
        let mut roomsize = IVec3::ZERO;
        let mut roomplace = IVec3::ZERO;

        // Find a spot for the first room, fully inside loaded ground
        let mut fits = false;
        for _ in 0..100 {
            roomsize = self.random_room_size(self.dp.large_room_chance >= 1);
            // The padding keeps the start out of the neighbouring chunks
            roomplace = vm.area.min + start_padding;
            roomplace.z += self.random.range(0, areasize.z - roomsize.z - start_padding.z);
            roomplace.y += self.random.range(0, areasize.y - roomsize.y - start_padding.y);
            roomplace.x += self.random.range(0, areasize.x - roomsize.x - start_padding.x);

            fits = VoxelArea::new(roomplace, roomplace + roomsize - IVec3::ONE).iter().all(|p| {
                vm.area.contains(p) && {
                    let i = vm.area.index_p(p);
                    vm.flags[i] & VMANIP_FLAG_DUNGEON_UNTOUCHABLE == 0 && vm.data[i].content() != CONTENT_IGNORE
                }
            });
            if fits {
                break;
            }
        }
        if !fits {
            return;
        }

        // A corridor may start from the previous room instead of the new one
        let mut last_room_center = roomplace + IVec3::new(roomsize.x / 2, 1, roomsize.z / 2);

        for i in 0..self.dp.num_rooms {
            self.make_room(vm, roomsize, roomplace);
            let room_center = roomplace + IVec3::new(roomsize.x / 2, 1, roomsize.z / 2);
            if i + 1 == self.dp.num_rooms {
                break;
            }

            let walker_start = if self.random.range(0, 2) != 0 {
                last_room_center
            } else {
                last_room_center = room_center;
                room_center
            };

            self.pos = walker_start;
            let Some((mut doorplace, doordir)) = self.find_place_for_door(vm) else { return };
            if self.random.range(0, 1) == 0 {
                self.make_door(vm, doorplace);
            } else {
                doorplace -= doordir;
            }

            let (corridor_end, corridor_end_dir) = self.make_corridor(vm, doorplace, doordir);

            let large = self.dp.large_room_chance > 1 && self.random.range(1, self.dp.large_room_chance as i32) == 1;
            roomsize = self.random_room_size(large);

            self.pos = corridor_end;
            self.dir = corridor_end_dir;
            let Some((doorplace, _, place)) = self.find_place_for_room_door(vm, roomsize) else { return };
            roomplace = place;
            if self.random.range(0, 1) == 0 {
                self.make_door(vm, doorplace);
            }
        }
    }

    fn make_room(&mut self, vm: &mut VoxelManipulator, roomsize: IVec3, roomplace: IVec3) {
        let wall = MapNode::new(self.dp.c_wall);
        let put_wall = |vm: &mut VoxelManipulator, p: IVec3| {
            if !vm.area.contains(p) {
                return;
            }
            let i = vm.area.index_p(p);
            if vm.flags[i] & VMANIP_FLAG_DUNGEON_UNTOUCHABLE != 0 {
                return;
            }
            vm.set_node(p, wall);
        };

        // +-X walls
        for z in 0..roomsize.z {
            for y in 0..roomsize.y {
                put_wall(vm, roomplace + IVec3::new(0, y, z));
                put_wall(vm, roomplace + IVec3::new(roomsize.x - 1, y, z));
            }
        }
        // +-Z walls
        for x in 0..roomsize.x {
            for y in 0..roomsize.y {
                put_wall(vm, roomplace + IVec3::new(x, y, 0));
                put_wall(vm, roomplace + IVec3::new(x, y, roomsize.z - 1));
            }
        }
        // Floor and ceiling
        for z in 0..roomsize.z {
            for x in 0..roomsize.x {
                put_wall(vm, roomplace + IVec3::new(x, 0, z));
                put_wall(vm, roomplace + IVec3::new(x, roomsize.y - 1, z));
            }
        }

        // Interior
        for z in 1..roomsize.z - 1 {
            for y in 1..roomsize.y - 1 {
                for x in 1..roomsize.x - 1 {
                    let p = roomplace + IVec3::new(x, y, z);
                    if !vm.area.contains(p) {
                        continue;
                    }
                    let i = vm.area.index_p(p);
                    vm.flags[i] |= VMANIP_FLAG_DUNGEON_UNTOUCHABLE;
                    vm.set_node(p, MapNode::new(CONTENT_AIR));
                }
            }
        }
    }

    fn make_fill(&self, vm: &mut VoxelManipulator, place: IVec3, size: IVec3, avoid_flags: u8, n: MapNode, or_flags: u8) {
        for p in VoxelArea::new(place, place + size - IVec3::ONE).iter() {
            if !vm.area.contains(p) {
                continue;
            }
            let i = vm.area.index_p(p);
            if vm.flags[i] & avoid_flags != 0 {
                continue;
            }
            vm.flags[i] |= or_flags;
            vm.set_node(p, n);
        }
    }

    fn make_hole(&self, vm: &mut VoxelManipulator, place: IVec3) {
        self.make_fill(vm, place, self.dp.holesize, 0, MapNode::new(CONTENT_AIR), VMANIP_FLAG_DUNGEON_INSIDE);
    }

    fn make_door(&self, vm: &mut VoxelManipulator, doorplace: IVec3) {
        self.make_hole(vm, doorplace);
    }

    fn make_corridor(&mut self, vm: &mut VoxelManipulator, doorplace: IVec3, doordir: IVec3) -> (IVec3, IVec3) {
        self.make_hole(vm, doorplace);
        let mut p0 = doorplace;
        let mut dir = doordir;
        let (lmin, lmax) = (self.dp.corridor_len_min as i32, self.dp.corridor_len_max as i32);
        let length = self.random.range(lmin, lmax);
        let mut partlength = self.random.range(lmin, lmax);
        let mut partcount = 0;
        let mut make_stairs = 0;
        if self.random.next() % 2 == 0 && partlength >= 3 {
            make_stairs = if self.random.next() % 2 == 1 { 1 } else { -1 };
        }

        let wall = MapNode::new(self.dp.c_wall);
        let air = MapNode::new(CONTENT_AIR);
        let holesize = self.dp.holesize;

        let mut i = 0;
        while i < length {
            let mut p = p0 + dir;
            if partcount != 0 {
                p.y += make_stairs;
            }

            if vm.area.contains(p) && vm.area.contains(p + IVec3::Y) {
                if make_stairs != 0 {
                    self.make_fill(vm, p - IVec3::ONE, holesize + IVec3::new(2, 3, 2), VMANIP_FLAG_DUNGEON_UNTOUCHABLE, wall, 0);
                    self.make_fill(vm, p, holesize, VMANIP_FLAG_DUNGEON_UNTOUCHABLE, air, VMANIP_FLAG_DUNGEON_INSIDE);
                    self.make_fill(vm, p - dir, holesize, VMANIP_FLAG_DUNGEON_UNTOUCHABLE, air, VMANIP_FLAG_DUNGEON_INSIDE);

                    // No stair on the bottom step or on diagonal steps
                    let straight = (dir.x ^ dir.z) & 1 != 0;
                    if straight && ((make_stairs == 1 && i != 0) || (make_stairs == -1 && i != length - 1)) {
                        // Face the stair down the slope
                        let facedir = dir_to_facedir(dir * make_stairs);
                        let stair = MapNode::with_params(self.dp.c_stair, 0, facedir);
                        let (width, swv) = if dir.z != 0 { (holesize.x, IVec3::X) } else { (holesize.z, IVec3::Z) };
                        let mut ps = p;
                        for _ in 0..width {
                            let under = if make_stairs == -1 {
                                ps + IVec3::new(-dir.x, -1, -dir.z)
                            } else {
                                ps - IVec3::Y
                            };
                            if vm.area.contains(under) {
                                let vi = vm.area.index_p(under);
                                if vm.data[vi].content() == self.dp.c_wall {
                                    vm.flags[vi] |= VMANIP_FLAG_DUNGEON_UNTOUCHABLE;
                                    vm.data[vi] = stair;
                                }
                            }
                            ps += swv;
                        }
                    }
                } else {
                    self.make_fill(vm, p - IVec3::ONE, holesize + IVec3::splat(2), VMANIP_FLAG_DUNGEON_UNTOUCHABLE, wall, 0);
                    self.make_hole(vm, p);
                }
                p0 = p;
            } else {
                // Blocked, turn away and retry this step
                dir = turn_xz(dir, self.random.range(0, 1));
                make_stairs = -make_stairs;
                partcount = 0;
                partlength = self.random.range(1, length);
                i += 1;
                continue;
            }

            partcount += 1;
            if partcount >= partlength {
                partcount = 0;
                dir = random_turn(&mut self.random, dir);
                partlength = self.random.range(1, length);
                make_stairs = 0;
                if self.random.next() % 2 == 0 && partlength >= 3 {
                    make_stairs = if self.random.next() % 2 == 1 { 1 } else { -1 };
                }
            }
            i += 1;
        }
        (p0, dir)
    }

    fn randomize_dir(&mut self) {
        self.dir = rand_ortho_dir(&mut self.random, self.dp.diagonal_dirs);
    }

    /// Walk through the dungeon's air from `pos` until a two-high wall is
    /// straight ahead
    fn find_place_for_door(&mut self, vm: &VoxelManipulator) -> Option<(IVec3, IVec3)> {
        let content = |p: IVec3| vm.get_node_no_ex(p).content();
        let wall = self.dp.c_wall;
        for i in 0..100 {
            let mut p = self.pos + self.dir;
            let p1 = p + IVec3::Y;
            if !vm.area.contains(p) || !vm.area.contains(p1) || i % 4 == 0 {
                self.randomize_dir();
                continue;
            }
            if content(p) == wall && content(p1) == wall {
                let found = (p, self.dir);
                self.randomize_dir();
                return Some(found);
            }
            // Step up or down when the space is there
            if content(p) == wall && content(p + IVec3::Y) == CONTENT_AIR && content(p + IVec3::new(0, 2, 0)) == CONTENT_AIR {
                p += IVec3::Y;
            }
            if content(p + IVec3::Y) == wall && content(p) == CONTENT_AIR && content(p - IVec3::Y) == CONTENT_AIR {
                p -= IVec3::Y;
            }
            if content(p) != CONTENT_AIR || content(p + IVec3::Y) != CONTENT_AIR {
                self.randomize_dir();
                continue;
            }
            self.pos = p;
        }
        None
    }

    /// Door position, door direction and placement of a room of
    /// `roomsize` behind it, if one fits
    fn find_place_for_room_door(&mut self, vm: &VoxelManipulator, roomsize: IVec3) -> Option<(IVec3, IVec3, IVec3)> {
        for _ in 0..30 {
            let Some((doorplace, doordir)) = self.find_place_for_door(vm) else { continue };
            let roomplace = if doordir == IVec3::X {
                doorplace + IVec3::new(0, -1, self.random.range(-roomsize.z + 2, -2))
            } else if doordir == -IVec3::X {
                doorplace + IVec3::new(-roomsize.x + 1, -1, self.random.range(-roomsize.z + 2, -2))
            } else if doordir == IVec3::Z {
                doorplace + IVec3::new(self.random.range(-roomsize.x + 2, -2), -1, 0)
            } else if doordir == -IVec3::Z {
                doorplace + IVec3::new(self.random.range(-roomsize.x + 2, -2), -1, -roomsize.z + 1)
            } else {
                // Diagonal doors get no room
                continue;
            };

            let interior = VoxelArea::new(roomplace + IVec3::ONE, roomplace + roomsize - IVec3::splat(2));
            let fits = interior.iter().all(|p| {
                vm.area.contains(p) && vm.flags[vm.area.index_p(p)] & VMANIP_FLAG_DUNGEON_INSIDE == 0
            });
            if fits {
                return Some((doorplace, doordir, roomplace));
            }
        }
        None
    }
}

/// Random horizontal direction, occasionally diagonal
pub fn rand_ortho_dir(random: &mut PseudoRandom, diagonal_dirs: bool) -> IVec3 {
    if diagonal_dirs && random.next() % 4 == 0 {
        let mut dir = IVec3::ZERO;
        for _ in 0..10 {
            dir.z = (random.next() % 3) as i32 - 1;
            dir.y = 0;
            dir.x = (random.next() % 3) as i32 - 1;
            if dir.x != 0 && dir.z != 0 {
                break;
            }
        }
        return dir;
    }
    if random.next() % 2 == 0 {
        if random.next() % 2 == 1 { -IVec3::X } else { IVec3::X }
    } else if random.next() % 2 == 1 {
        -IVec3::Z
    } else {
        IVec3::Z
    }
}

/// Quarter turn around y; `t == 0` turns right
pub fn turn_xz(olddir: IVec3, t: i32) -> IVec3 {
    if t == 0 {
        IVec3::new(olddir.z, olddir.y, -olddir.x)
    } else {
        IVec3::new(-olddir.z, olddir.y, olddir.x)
    }
}

/// Go straight, turn right or turn left with equal chance
pub fn random_turn(random: &mut PseudoRandom, dir: IVec3) -> IVec3 {
    match random.range(0, 2) {
        0 => dir,
        1 => turn_xz(dir, 0),
        _ => turn_xz(dir, 1),
    }
}

pub fn dir_to_facedir(d: IVec3) -> u8 {
    if d.x.abs() > d.z.abs() {
        if d.x < 0 { 3 } else { 1 }
    } else if d.z < 0 {
        2
    } else {
        0
    }
}

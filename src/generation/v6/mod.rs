//! The v6 terrain generator
//!
//! Terrain comes from five 2D noises blended into one surface height per
//! column. Two aging iterations of caves, mud and mud flow give the surface
//! its weathered look before dungeons, trees and lighting are added.

mod decorate;
mod params;
mod terrain;

use glam::Vec3;

use crate::core::settings::{WorldSettings, MG_CAVES, MG_DECORATIONS, MG_DUNGEONS, MG_LIGHT, MG_ORES};
use crate::core::types::{IVec2, IVec3, MAP_BLOCKSIZE};
use crate::voxel::node::{CONTENT_AIR, CONTENT_IGNORE};
use crate::voxel::nodedef::NodeDefManager;

use super::caves::CavesV6;
use super::dungeon::{DungeonGen, DungeonParams};
use super::mapgen::MapgenBase;
use super::noise::{noise2d_hash, noise2d_perlin, noise3d_perlin, Noise, NoiseParams};
use super::random::PseudoRandom;
use super::{get_block_seed, BlockMakeData, MapGenerator};

pub use decorate::{Decoration, Ore};
pub use params::{
    MapgenV6Params, MGV6_BIOMEBLEND, MGV6_FLAT, MGV6_JUNGLES, MGV6_MUDFLOW, MGV6_SNOWBIOMES, MGV6_SPFLAG_DESC,
    MGV6_TREES,
};

/// Mud depth used when the terrain is flat
const AVERAGE_MUD_AMOUNT: f32 = 4.0;
/// Desert stone only appears above this y
const DESERT_STONE_BASE: i32 = -32;
/// Tundra water freezes above this y
const ICE_BASE: i32 = 0;
const FREQ_HOT: f32 = 0.4;
const FREQ_SNOW: f32 = -0.4;
const FREQ_TAIGA: f32 = 0.5;
const FREQ_JUNGLE: f32 = 0.5;

const NP_DUNGEONS: NoiseParams = NoiseParams::new(0.9, 0.5, Vec3::splat(500.0), 0, 2, 0.8);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BiomeV6 {
    Normal,
    Desert,
    Jungle,
    Tundra,
    Taiga,
}

/// Content ids the generator writes, resolved from the `mapgen_*` aliases
#[derive(Clone, Copy, Debug)]
pub(crate) struct V6Content {
    pub stone: u16,
    pub dirt: u16,
    pub dirt_with_grass: u16,
    pub sand: u16,
    pub water_source: u16,
    pub lava_source: u16,
    pub gravel: u16,
    pub desert_stone: u16,
    pub desert_sand: u16,
    pub dirt_with_snow: u16,
    pub snow: u16,
    pub snowblock: u16,
    pub ice: u16,
    pub cobble: u16,
    pub mossycobble: u16,
    pub stair_cobble: u16,
    pub stair_desert_stone: u16,
    pub junglegrass: u16,
}

impl V6Content {
    pub fn resolve(defs: &NodeDefManager) -> Self {
        let required = |alias: &str| {
            defs.get_id(alias).unwrap_or_else(|| {
                log::error!("v6 generator: mapgen alias '{}' is not defined", alias);
                CONTENT_AIR
            })
        };
        let stone = required("mapgen_stone");
        let dirt_with_grass = required("mapgen_dirt_with_grass");
        let sand = required("mapgen_sand");
        let water_source = required("mapgen_water_source");
        let opt = |alias: &str, fallback: u16| defs.get_id(alias).unwrap_or(fallback);

        let desert_stone = opt("mapgen_desert_stone", stone);
        let cobble = opt("mapgen_cobble", stone);
        Self {
            stone,
            dirt: required("mapgen_dirt"),
            dirt_with_grass,
            sand,
            water_source,
            lava_source: required("mapgen_lava_source"),
            gravel: opt("mapgen_gravel", stone),
            desert_stone,
            desert_sand: opt("mapgen_desert_sand", sand),
            dirt_with_snow: opt("mapgen_dirt_with_snow", dirt_with_grass),
            snow: opt("mapgen_snow", CONTENT_AIR),
            snowblock: opt("mapgen_snowblock", dirt_with_grass),
            ice: opt("mapgen_ice", water_source),
            cobble,
            mossycobble: opt("mapgen_mossycobble", cobble),
            stair_cobble: opt("mapgen_stair_cobble", cobble),
            stair_desert_stone: opt("mapgen_stair_desert_stone", desert_stone),
            junglegrass: opt("mapgen_junglegrass", CONTENT_AIR),
        }
    }
}

/// Column noise maps of one chunk, laid out over the padded area (x fastest)
#[derive(Clone, Debug, Default)]
struct NoiseMaps {
    origin: IVec2,
    side: i32,
    terrain_base: Vec<f32>,
    terrain_higher: Vec<f32>,
    steepness: Vec<f32>,
    height_select: Vec<f32>,
    mud: Vec<f32>,
    beach: Vec<f32>,
    biome: Vec<f32>,
    humidity: Vec<f32>,
}

impl NoiseMaps {
    /// Map index of column `p`, clamped into the covered square
    fn index(&self, p: IVec2) -> usize {
        let max = self.side - 1;
        let x = (p.x - self.origin.x).clamp(0, max);
        let z = (p.y - self.origin.y).clamp(0, max);
        (z * self.side + x) as usize
    }
}

#[derive(Clone)]
pub struct MapgenV6 {
    base: MapgenBase,
    pub params: MapgenV6Params,
    spflags: u32,
    noise_terrain_base: Noise,
    noise_terrain_higher: Noise,
    noise_steepness: Noise,
    noise_height_select: Noise,
    noise_mud: Noise,
    noise_beach: Noise,
    noise_biome: Noise,
    noise_humidity: Noise,
    maps: NoiseMaps,
    ores: Vec<Ore>,
    decorations: Vec<Decoration>,

    // Per-chunk layout, valid during make_chunk
    node_min: IVec3,
    node_max: IVec3,
    full_node_min: IVec3,
    full_node_max: IVec3,
    blockseed: u32,
}

impl std::fmt::Debug for MapgenV6 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapgenV6").field("base", &self.base).field("params", &self.params).finish()
    }
}

impl MapgenV6 {
    pub fn new(settings: &WorldSettings) -> Self {
        let params = settings.mapgen_v6.clone();
        let seed = settings.seed;
        Self {
            base: MapgenBase::new(settings),
            spflags: params.flags(),
            noise_terrain_base: Noise::new(&params.np_terrain_base, seed),
            noise_terrain_higher: Noise::new(&params.np_terrain_higher, seed),
            noise_steepness: Noise::new(&params.np_steepness, seed),
            noise_height_select: Noise::new(&params.np_height_select, seed),
            noise_mud: Noise::new(&params.np_mud, seed),
            noise_beach: Noise::new(&params.np_beach, seed),
            noise_biome: Noise::new(&params.np_biome, seed),
            noise_humidity: Noise::new(&params.np_humidity, seed),
            params,
            maps: NoiseMaps::default(),
            ores: Vec::new(),
            decorations: Vec::new(),
            node_min: IVec3::ZERO,
            node_max: IVec3::ZERO,
            full_node_min: IVec3::ZERO,
            full_node_max: IVec3::ZERO,
            blockseed: 0,
        }
    }

    pub fn register_ore(&mut self, ore: Ore) {
        self.ores.push(ore);
    }

    pub fn register_decoration(&mut self, deco: Decoration) {
        self.decorations.push(deco);
    }

    pub fn spflags(&self) -> u32 {
        self.spflags
    }

    fn calculate_noise(&mut self) {
        let origin = IVec2::new(self.full_node_min.x, self.full_node_min.z);
        let side = self.full_node_max.x - self.full_node_min.x + 1;
        let size = IVec2::splat(side);
        let m = &mut self.maps;
        m.origin = origin;
        m.side = side;
        m.terrain_base = self.noise_terrain_base.perlin_map_2d(origin, size);
        m.terrain_higher = self.noise_terrain_higher.perlin_map_2d(origin, size);
        m.steepness = self.noise_steepness.perlin_map_2d(origin, size);
        m.height_select = self.noise_height_select.perlin_map_2d(origin, size);
        m.mud = self.noise_mud.perlin_map_2d(origin, size);
        m.beach = self.noise_beach.perlin_map_2d(origin, size);
        m.biome = self.noise_biome.perlin_map_2d(origin, size);
        m.humidity = self.noise_humidity.perlin_map_2d(origin, size);
    }

    /// Blend of low and high ground, steered by the steepness and select
    /// noises
    pub fn base_terrain_level(&self, terrain_base: f32, terrain_higher: f32, steepness: f32, height_select: f32) -> f32 {
        if self.spflags & MGV6_FLAT != 0 {
            return self.base.water_level as f32;
        }
        let base = 1.0 + terrain_base;
        let higher = (1.0 + terrain_higher).max(base);

        let mut b = steepness.clamp(0.0, 1000.0);
        b = 5.0 * b.powi(7);
        b = b.clamp(0.5, 1000.0);
        // Slopes between these two look broken
        if b > 1.5 && b < 100.0 {
            b = if b < 10.0 { 1.5 } else { 100.0 };
        }

        let a = (0.5 + b * (-0.20 + height_select)).clamp(0.0, 1.0);
        base * (1.0 - a) + higher * a
    }

    fn terrain_level_from_map(&self, p: IVec2) -> f32 {
        let i = self.maps.index(p);
        let m = &self.maps;
        self.base_terrain_level(m.terrain_base[i], m.terrain_higher[i], m.steepness[i], m.height_select[i])
    }

    /// Surface level sampled directly from the noises, for columns outside
    /// the current chunk
    fn terrain_level_at_point(&self, p: IVec2) -> f32 {
        let (x, z) = (p.x as f32, p.y as f32);
        self.base_terrain_level(
            self.noise_terrain_base.noise2d(x, z),
            self.noise_terrain_higher.noise2d(x, z),
            self.noise_steepness.noise2d(x, z),
            self.noise_height_select.noise2d(x, z),
        )
    }

    fn mud_amount(&self, p: IVec2) -> f32 {
        if self.spflags & MGV6_FLAT != 0 {
            return AVERAGE_MUD_AMOUNT;
        }
        self.maps.mud[self.maps.index(p)]
    }

    fn have_beach(&self, p: IVec2) -> bool {
        self.maps.beach[self.maps.index(p)] > self.params.freq_beach
    }

    fn humidity(&self, p: IVec2) -> f32 {
        self.maps.humidity[self.maps.index(p)].clamp(0.0, 1.0)
    }

    pub fn get_biome(&self, p: IVec2) -> BiomeV6 {
        let i = self.maps.index(p);
        self.biome_from_values(self.maps.biome[i], self.maps.humidity[i], p)
    }

    fn biome_from_values(&self, d: f32, h: f32, p: IVec2) -> BiomeV6 {
        let blend_enabled = self.spflags & MGV6_BIOMEBLEND != 0;
        if self.spflags & MGV6_SNOWBIOMES != 0 {
            let blend = if blend_enabled { noise2d_hash(p.x, p.y, self.base.seed) / 40.0 } else { 0.0 };
            if d > FREQ_HOT + blend {
                return if h > FREQ_JUNGLE + blend { BiomeV6::Jungle } else { BiomeV6::Desert };
            }
            if d < FREQ_SNOW + blend {
                return if h > FREQ_TAIGA + blend { BiomeV6::Taiga } else { BiomeV6::Tundra };
            }
            return BiomeV6::Normal;
        }

        let freq_desert = self.params.freq_desert;
        if d > freq_desert {
            return BiomeV6::Desert;
        }
        if blend_enabled
            && d > freq_desert - 0.10
            && noise2d_hash(p.x, p.y, self.base.seed) + 1.0 > (freq_desert - d) * 20.0
        {
            return BiomeV6::Desert;
        }
        if self.spflags & MGV6_JUNGLES != 0 && h > 0.75 {
            return BiomeV6::Jungle;
        }
        BiomeV6::Normal
    }

    fn tree_amount(&self, p: IVec2) -> f32 {
        let noise = noise2d_perlin(&self.params.np_trees, self.base.seed, p.x as f32, p.y as f32);
        let zeroval = -0.39;
        if noise < zeroval {
            0.0
        } else {
            0.04 * (noise - zeroval) / (1.0 - zeroval)
        }
    }

    fn have_apple_tree(&self, p: IVec2) -> bool {
        noise2d_perlin(&self.params.np_apple_trees, self.base.seed, p.x as f32, p.y as f32) > 0.2
    }

    fn generate_caves(&mut self, data: &mut BlockMakeData, content: &V6Content, max_stone_y: i32) {
        let cave_amount =
            noise2d_perlin(&self.params.np_cave, self.base.seed, self.node_min.x as f32, self.node_min.z as f32).max(0.0);
        let volume_nodes = (self.node_max.x - self.node_min.x + 1) * (self.node_max.y - self.node_min.y + 1) * MAP_BLOCKSIZE;
        let mut caves_count = (cave_amount * volume_nodes as f32 / 50000.0) as u32;
        let mut bruises_count = 1u32;
        let mut ps = PseudoRandom::new(self.blockseed as u64 + 21343);
        let mut ps2 = PseudoRandom::new(self.blockseed as u64 + 1032);
        if ps.range(1, 6) == 1 {
            let hi = ps.range(0, 2);
            bruises_count = ps.range(0, hi) as u32;
        }
        if self.get_biome(IVec2::new(self.node_min.x, self.node_min.z)) == BiomeV6::Desert {
            caves_count /= 3;
            bruises_count /= 3;
        }

        let csx = self.node_max.x - self.node_min.x + 1;
        for i in 0..caves_count + bruises_count {
            let large = i >= caves_count;
            let mut cave = CavesV6::new(
                &data.nodedef,
                self.base.water_level as i32,
                content.water_source,
                content.lava_source,
            );
            cave.make_cave(
                &mut data.vmanip,
                self.node_min,
                self.node_max,
                &mut ps,
                &mut ps2,
                large,
                max_stone_y,
                Some((self.base.heightmap.as_slice(), csx)),
            );
        }
    }

    fn generate_dungeons(&mut self, data: &mut BlockMakeData, content: &V6Content) {
        let num_dungeons = noise3d_perlin(&NP_DUNGEONS, self.base.seed, self.node_min).floor().max(0.0) as u32;
        if num_dungeons == 0 {
            return;
        }
        let mut ps = PseudoRandom::new(self.blockseed as u64 + 4713);
        let mut dp = DungeonParams {
            seed: self.base.seed,
            num_dungeons,
            only_in_ground: true,
            corridor_len_min: 1,
            corridor_len_max: 13,
            num_rooms: ps.range(2, 16) as u32,
            large_room_chance: if ps.range(1, 4) == 1 { 1 } else { 0 },
            np_alt_wall: NoiseParams::new(-0.4, 1.0, Vec3::splat(40.0), 32474, 6, 1.1),
            ..DungeonParams::default()
        };
        if self.get_biome(IVec2::new(self.node_min.x, self.node_min.z)) == BiomeV6::Desert {
            dp.c_wall = content.desert_stone;
            dp.c_alt_wall = CONTENT_IGNORE;
            dp.c_stair = content.stair_desert_stone;
            dp.diagonal_dirs = true;
            dp.holesize = IVec3::new(2, 3, 2);
            dp.room_size_min = IVec3::new(6, 9, 6);
            dp.room_size_max = IVec3::new(10, 11, 10);
            dp.room_size_large_min = IVec3::new(10, 13, 10);
            dp.room_size_large_max = IVec3::new(18, 21, 18);
        } else {
            dp.c_wall = content.cobble;
            dp.c_alt_wall = content.mossycobble;
            dp.c_stair = content.stair_cobble;
            dp.diagonal_dirs = false;
            dp.holesize = IVec3::new(1, 2, 1);
            dp.room_size_min = IVec3::new(4, 4, 4);
            dp.room_size_max = IVec3::new(8, 6, 8);
            dp.room_size_large_min = IVec3::new(8, 8, 8);
            dp.room_size_large_max = IVec3::new(16, 16, 16);
        }

        let mut dgen = DungeonGen::new(data.nodedef.clone(), dp);
        dgen.generate(&mut data.vmanip, self.blockseed, self.full_node_min, self.full_node_max);
    }
}

impl MapGenerator for MapgenV6 {
    fn base(&self) -> &MapgenBase {
        &self.base
    }

    fn make_chunk(&mut self, data: &mut BlockMakeData) {
        let defs = data.nodedef.clone();
        let content = V6Content::resolve(&defs);

        self.node_min = data.node_min();
        self.node_max = data.node_max();
        self.full_node_min = (data.blockpos_min - IVec3::ONE) * MAP_BLOCKSIZE;
        self.full_node_max = (data.blockpos_max + IVec3::splat(2)) * MAP_BLOCKSIZE - IVec3::ONE;
        let central = self.node_max - self.node_min + IVec3::ONE;
        if central.x != central.z {
            log::error!("v6 generator: chunk {:?}..{:?} is not square", self.node_min, self.node_max);
            return;
        }
        self.blockseed = get_block_seed(self.full_node_min, data.seed);

        self.calculate_noise();

        let stone_surface_max_y = self.generate_ground(&mut data.vmanip, &content);

        // Initial heightmap limits the caves
        self.base.update_heightmap(&data.vmanip, &defs, self.node_min, self.node_max);

        // Mud flows one node into neighbours, so stay one inside the spread
        let max_spread = MAP_BLOCKSIZE;
        let mudflow_minpos = -max_spread + 1;
        let mudflow_maxpos = central.x + max_spread - 2;

        for _ in 0..2 {
            if self.base.flags & MG_CAVES != 0 {
                self.generate_caves(data, &content, stone_surface_max_y);
            }
            self.add_mud(&mut data.vmanip, &content);
            if self.spflags & MGV6_MUDFLOW != 0 {
                self.flow_mud(&mut data.vmanip, &defs, &content, mudflow_minpos, mudflow_maxpos);
            }
        }

        self.base.update_heightmap(&data.vmanip, &defs, self.node_min, self.node_max);

        if self.base.flags & MG_DUNGEONS != 0
            && stone_surface_max_y >= self.node_min.y
            && self.full_node_min.y >= self.params.dungeon_ymin as i32
            && self.full_node_max.y <= self.params.dungeon_ymax as i32
        {
            self.generate_dungeons(data, &content);
        }

        MapgenBase::update_liquid(
            &data.vmanip,
            &defs,
            &mut data.transforming_liquid,
            self.full_node_min,
            self.full_node_max,
        );

        self.grow_grass(&mut data.vmanip, &defs, &content);

        if self.spflags & MGV6_TREES != 0 {
            self.place_trees_and_jungle_grass(&mut data.vmanip, &defs, &content);
        }
        if self.base.flags & MG_DECORATIONS != 0 {
            self.place_decorations(&mut data.vmanip, &defs);
        }
        if self.base.flags & MG_ORES != 0 {
            self.place_ores(&mut data.vmanip, &defs);
        }

        if self.base.flags & MG_LIGHT != 0 {
            MapgenBase::calc_lighting(
                &mut data.vmanip,
                &defs,
                self.base.water_level,
                self.node_min - IVec3::ONE * MAP_BLOCKSIZE,
                self.node_max + IVec3::new(1, 0, 1) * MAP_BLOCKSIZE,
                self.full_node_min,
                self.full_node_max,
            );
        }
    }

    fn get_spawn_level_at_point(&mut self, p: IVec2) -> Option<i32> {
        let level = self.terrain_level_at_point(p) as i32 + AVERAGE_MUD_AMOUNT as i32;
        let water_level = self.base.water_level as i32;
        if level <= water_level || level > water_level + 16 {
            return None;
        }
        Some(level)
    }
}

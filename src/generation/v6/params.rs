use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::core::settings::parse_flag_string;
use crate::generation::noise::NoiseParams;

pub const MGV6_JUNGLES: u32 = 0x01;
pub const MGV6_BIOMEBLEND: u32 = 0x02;
pub const MGV6_MUDFLOW: u32 = 0x04;
pub const MGV6_SNOWBIOMES: u32 = 0x08;
pub const MGV6_FLAT: u32 = 0x10;
pub const MGV6_TREES: u32 = 0x20;

pub const MGV6_SPFLAG_DESC: &[(&str, u32)] = &[
    ("jungles", MGV6_JUNGLES),
    ("biomeblend", MGV6_BIOMEBLEND),
    ("mudflow", MGV6_MUDFLOW),
    ("snowbiomes", MGV6_SNOWBIOMES),
    ("flat", MGV6_FLAT),
    ("trees", MGV6_TREES),
];

const DEFAULT_SPFLAGS: u32 = MGV6_JUNGLES | MGV6_SNOWBIOMES | MGV6_TREES | MGV6_BIOMEBLEND | MGV6_MUDFLOW;

/// Settings of the v6 generator, stored under `mgv6_*` keys
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapgenV6Params {
    #[serde(rename = "mgv6_spflags")]
    pub spflags: String,
    /// Biome noise above which columns turn to desert
    #[serde(rename = "mgv6_freq_desert")]
    pub freq_desert: f32,
    /// Beach noise above which shores get sand
    #[serde(rename = "mgv6_freq_beach")]
    pub freq_beach: f32,
    #[serde(rename = "mgv6_dungeon_ymin")]
    pub dungeon_ymin: i16,
    #[serde(rename = "mgv6_dungeon_ymax")]
    pub dungeon_ymax: i16,

    #[serde(rename = "mgv6_np_terrain_base")]
    pub np_terrain_base: NoiseParams,
    #[serde(rename = "mgv6_np_terrain_higher")]
    pub np_terrain_higher: NoiseParams,
    #[serde(rename = "mgv6_np_steepness")]
    pub np_steepness: NoiseParams,
    #[serde(rename = "mgv6_np_height_select")]
    pub np_height_select: NoiseParams,
    #[serde(rename = "mgv6_np_mud")]
    pub np_mud: NoiseParams,
    #[serde(rename = "mgv6_np_beach")]
    pub np_beach: NoiseParams,
    #[serde(rename = "mgv6_np_biome")]
    pub np_biome: NoiseParams,
    #[serde(rename = "mgv6_np_cave")]
    pub np_cave: NoiseParams,
    #[serde(rename = "mgv6_np_humidity")]
    pub np_humidity: NoiseParams,
    #[serde(rename = "mgv6_np_trees")]
    pub np_trees: NoiseParams,
    #[serde(rename = "mgv6_np_apple_trees")]
    pub np_apple_trees: NoiseParams,
}

impl Default for MapgenV6Params {
    fn default() -> Self {
        Self {
            spflags: "jungles,biomeblend,mudflow,snowbiomes,noflat,trees".to_string(),
            freq_desert: 0.45,
            freq_beach: 0.15,
            dungeon_ymin: -31000,
            dungeon_ymax: 31000,
            np_terrain_base: NoiseParams::new(-4.0, 20.0, Vec3::splat(250.0), 82341, 5, 0.6),
            np_terrain_higher: NoiseParams::new(20.0, 16.0, Vec3::splat(500.0), 85039, 5, 0.6),
            np_steepness: NoiseParams::new(0.85, 0.5, Vec3::splat(125.0), -932, 5, 0.7),
            np_height_select: NoiseParams::new(0.0, 1.0, Vec3::splat(250.0), 4213, 5, 0.69),
            np_mud: NoiseParams::new(4.0, 2.0, Vec3::splat(200.0), 91013, 3, 0.55),
            np_beach: NoiseParams::new(0.0, 1.0, Vec3::splat(250.0), 59420, 3, 0.50),
            np_biome: NoiseParams::new(0.0, 1.0, Vec3::splat(500.0), 9130, 3, 0.50),
            np_cave: NoiseParams::new(6.0, 6.0, Vec3::splat(250.0), 34329, 3, 0.50),
            np_humidity: NoiseParams::new(0.5, 0.5, Vec3::splat(500.0), 72384, 3, 0.50),
            np_trees: NoiseParams::new(0.0, 1.0, Vec3::splat(125.0), 2, 4, 0.66),
            np_apple_trees: NoiseParams::new(0.0, 1.0, Vec3::splat(100.0), 342902, 3, 0.45),
        }
    }
}

impl MapgenV6Params {
    /// `MGV6_*` bits of `spflags`
    pub fn flags(&self) -> u32 {
        parse_flag_string(&self.spflags, MGV6_SPFLAG_DESC, DEFAULT_SPFLAGS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_flags() {
        let p = MapgenV6Params::default();
        let f = p.flags();
        assert_eq!(f & MGV6_FLAT, 0);
        assert_ne!(f & MGV6_MUDFLOW, 0);
        assert_ne!(f & MGV6_TREES, 0);
    }

    #[test]
    fn test_spflags_override() {
        let p = MapgenV6Params { spflags: "nomudflow, flat".to_string(), ..Default::default() };
        let f = p.flags();
        assert_eq!(f & MGV6_MUDFLOW, 0);
        assert_ne!(f & MGV6_FLAT, 0);
        assert_ne!(f & MGV6_JUNGLES, 0);
    }
}

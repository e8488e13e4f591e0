//! World settings loaded from JSON
//!
//! Keys follow the classic flat settings names (`water_level`, `mg_flags`,
//! `mgv6_np_terrain_base`, ...). Missing keys take their defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::types::Result;
use crate::generation::v6::MapgenV6Params;

/// Mapgen flag: carve caves
pub const MG_CAVES: u32 = 0x02;
/// Mapgen flag: place dungeons
pub const MG_DUNGEONS: u32 = 0x04;
/// Mapgen flag: compute lighting inside the generator
pub const MG_LIGHT: u32 = 0x10;
/// Mapgen flag: run decorations
pub const MG_DECORATIONS: u32 = 0x20;
/// Mapgen flag: run ores
pub const MG_ORES: u32 = 0x40;

/// Name/bit table for `mg_flags`
pub const MAPGEN_FLAG_DESC: &[(&str, u32)] = &[
    ("caves", MG_CAVES),
    ("dungeons", MG_DUNGEONS),
    ("light", MG_LIGHT),
    ("decorations", MG_DECORATIONS),
    ("ores", MG_ORES),
];

/// Parse a comma separated flag string against a description table.
///
/// Named flags are set, `no`-prefixed flags are cleared, unnamed flags keep
/// their value from `defaults`. Unknown names are ignored with a warning.
pub fn parse_flag_string(s: &str, desc: &[(&str, u32)], defaults: u32) -> u32 {
    let mut set = 0u32;
    let mut mask = 0u32;
    for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let (name, enable) = match token.strip_prefix("no") {
            Some(rest) if desc.iter().any(|(n, _)| *n == rest) => (rest, false),
            _ => (token, true),
        };
        match desc.iter().find(|(n, _)| *n == name) {
            Some((_, bit)) => {
                mask |= bit;
                if enable {
                    set |= bit;
                }
            }
            None => log::warn!("Unknown flag '{}' in \"{}\"", token, s),
        }
    }
    (defaults & !mask) | set
}

/// Render a flag word back into its string form (every flag named, cleared
/// ones with a `no` prefix)
pub fn write_flag_string(flags: u32, desc: &[(&str, u32)]) -> String {
    desc.iter()
        .map(|(name, bit)| {
            if flags & bit != 0 {
                name.to_string()
            } else {
                format!("no{}", name)
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// All settings consumed by the world core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldSettings {
    /// Map seed
    pub seed: u64,
    /// Sea level in nodes
    pub water_level: i16,
    /// Generator chunk edge in blocks
    pub chunksize: i16,
    /// Generic mapgen flags, see `MAPGEN_FLAG_DESC`
    pub mg_flags: String,

    pub enable_damage: bool,
    pub creative_mode: bool,
    /// Seconds a dropped item entity lives
    pub item_entity_ttl: f32,
    pub movement_gravity: f32,

    /// Radius in blocks around players in which blocks are active
    pub active_block_range: i16,
    /// Radius in blocks in which active objects are sent to players
    pub active_object_send_range_blocks: i16,
    /// Seconds between ABM runs
    pub abm_interval: f32,
    /// Seconds between periodic map saves
    pub server_map_save_interval: f32,
    /// Upper bound on liquid updates per step
    pub liquid_loop_max: u32,
    /// Seconds after which an overfull liquid queue is purged (0 disables)
    pub liquid_queue_purge_time: f32,
    /// Soft cap on loaded blocks before unused ones are evicted
    pub max_loaded_blocks: usize,
    /// Seconds an unused block stays loaded
    pub server_unload_unused_data_timeout: f32,
    /// Game minutes per real minute
    pub time_speed: f32,
    /// Seconds between time-of-day notifications
    pub time_send_interval: f32,
    /// zlib level for block blobs (-1 selects the default level)
    pub compression_level: i32,

    #[serde(flatten)]
    pub mapgen_v6: MapgenV6Params,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            seed: 0,
            water_level: 1,
            chunksize: 5,
            mg_flags: "caves,dungeons,light,decorations,ores".to_string(),
            enable_damage: true,
            creative_mode: false,
            item_entity_ttl: 900.0,
            movement_gravity: 9.81,
            active_block_range: 3,
            active_object_send_range_blocks: 8,
            abm_interval: 1.0,
            server_map_save_interval: 5.3,
            liquid_loop_max: 100_000,
            liquid_queue_purge_time: 0.0,
            max_loaded_blocks: 5000,
            server_unload_unused_data_timeout: 29.0,
            time_speed: 72.0,
            time_send_interval: 5.0,
            compression_level: -1,
            mapgen_v6: MapgenV6Params::default(),
        }
    }
}

impl WorldSettings {
    /// Parse settings from a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load settings from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Write settings to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Decoded `mg_flags`
    pub fn mapgen_flags(&self) -> u32 {
        parse_flag_string(&self.mg_flags, MAPGEN_FLAG_DESC, MG_CAVES | MG_DUNGEONS | MG_LIGHT | MG_DECORATIONS | MG_ORES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag_string() {
        let defaults = MG_CAVES | MG_LIGHT;
        assert_eq!(parse_flag_string("", MAPGEN_FLAG_DESC, defaults), defaults);
        assert_eq!(parse_flag_string("nocaves", MAPGEN_FLAG_DESC, defaults), MG_LIGHT);
        assert_eq!(
            parse_flag_string("dungeons, nolight", MAPGEN_FLAG_DESC, defaults),
            MG_CAVES | MG_DUNGEONS
        );
        assert_eq!(parse_flag_string("bogus", MAPGEN_FLAG_DESC, 0), 0);
    }

    #[test]
    fn test_flag_string_round_trip() {
        let flags = MG_CAVES | MG_ORES;
        let s = write_flag_string(flags, MAPGEN_FLAG_DESC);
        assert_eq!(parse_flag_string(&s, MAPGEN_FLAG_DESC, 0xff), flags);
    }

    #[test]
    fn test_settings_from_json() {
        let json = r#"{
            "seed": 42,
            "water_level": 3,
            "mg_flags": "nodungeons",
            "mgv6_freq_desert": 0.8,
            "mgv6_dungeon_ymin": -100
        }"#;
        let s = WorldSettings::from_json_str(json).unwrap();
        assert_eq!(s.seed, 42);
        assert_eq!(s.water_level, 3);
        assert_eq!(s.mapgen_flags() & MG_DUNGEONS, 0);
        assert!(s.mapgen_flags() & MG_CAVES != 0);
        assert_eq!(s.mapgen_v6.freq_desert, 0.8);
        assert_eq!(s.mapgen_v6.dungeon_ymin, -100);
        assert_eq!(s.chunksize, 5);
    }

    #[test]
    fn test_settings_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("world.json");
        let mut s = WorldSettings::default();
        s.seed = 7;
        s.time_speed = 10.0;
        s.save(&path).unwrap();
        let loaded = WorldSettings::from_file(&path).unwrap();
        assert_eq!(loaded.seed, 7);
        assert_eq!(loaded.time_speed, 10.0);
        assert_eq!(loaded.mapgen_v6.np_terrain_base, s.mapgen_v6.np_terrain_base);
    }
}

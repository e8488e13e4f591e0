//! Persisted environment state and the day/night light curve

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::types::Result;

/// File name of the environment state inside a world directory
pub const ENV_META_FILE: &str = "env_meta.json";

/// Clocks and bookkeeping that survive a restart
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvMeta {
    /// Seconds of simulated time
    pub game_time: u32,
    /// 0..24000
    pub time_of_day: u32,
    pub last_clear_objects_time: u32,
    pub day_count: u32,
    /// `name~time;` list of LBM first-seen times
    pub lbm_introduction_times: String,
}

impl EnvMeta {
    /// Read `env_meta.json` from `dir`; a missing file yields defaults
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(ENV_META_FILE);
        if !path.exists() {
            log::info!("No {} in {}, starting fresh", ENV_META_FILE, dir.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Write `env_meta.json` into `dir`, replacing it atomically
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(ENV_META_FILE);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Day light factor (0..=1000) for a time of day in 0..24000. With `smooth`
/// the curve is interpolated, otherwise it steps.
pub fn time_to_daynight_ratio(time_of_day: f32, smooth: bool) -> u32 {
    let mut t = time_of_day;
    if t < 0.0 {
        t += ((-t) as i32 / 24000) as f32 * 24000.0;
    }
    if t >= 24000.0 {
        t -= (t as i32 / 24000) as f32 * 24000.0;
    }
    if t > 12000.0 {
        t = 24000.0 - t;
    }

    const VALUES: [(f32, f32); 9] = [
        (4375.0, 175.0),
        (4625.0, 175.0),
        (4875.0, 250.0),
        (5125.0, 350.0),
        (5375.0, 500.0),
        (5625.0, 675.0),
        (5875.0, 875.0),
        (6125.0, 1000.0),
        (6375.0, 1000.0),
    ];

    if !smooth {
        let mut last_t = VALUES[0].0;
        for &(t0, ratio) in &VALUES[1..] {
            let switch_t = (t0 + last_t) / 2.0;
            last_t = t0;
            if switch_t <= t {
                continue;
            }
            return ratio as u32;
        }
        return 1000;
    }

    if t <= 4625.0 {
        return VALUES[0].1 as u32;
    } else if t >= 6125.0 {
        return 1000;
    }
    for i in 1..VALUES.len() {
        if VALUES[i].0 <= t {
            continue;
        }
        let (t0, r0) = VALUES[i - 1];
        let (t1, r1) = VALUES[i];
        let f = (t - t0) / (t1 - t0);
        return (f * r1 + (1.0 - f) * r0) as u32;
    }
    1000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daynight_ratio_curve() {
        assert_eq!(time_to_daynight_ratio(0.0, true), 175);
        assert_eq!(time_to_daynight_ratio(12000.0, true), 1000);
        assert_eq!(time_to_daynight_ratio(6000.0, false), 1000);
        assert_eq!(time_to_daynight_ratio(1000.0, false), 175);
        // Symmetric around noon and periodic
        assert_eq!(time_to_daynight_ratio(5000.0, true), time_to_daynight_ratio(19000.0, true));
        assert_eq!(time_to_daynight_ratio(5000.0, true), time_to_daynight_ratio(29000.0, true));
        let mut last = 0;
        for t in (4000..=7000).step_by(50) {
            let r = time_to_daynight_ratio(t as f32, true);
            assert!(r >= last, "ratio drops at {t}");
            last = r;
        }
    }

    #[test]
    fn test_meta_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(EnvMeta::load(dir.path()).unwrap(), EnvMeta::default());
        let meta = EnvMeta {
            game_time: 1234,
            time_of_day: 6000,
            last_clear_objects_time: 10,
            day_count: 2,
            lbm_introduction_times: "mod:a~0;mod:b~100;".to_string(),
        };
        meta.save(dir.path()).unwrap();
        assert_eq!(EnvMeta::load(dir.path()).unwrap(), meta);
    }
}

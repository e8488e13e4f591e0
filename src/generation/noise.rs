//! Fractal noise configured by `NoiseParams`
//!
//! Each octave is an independently seeded Perlin source. Maps over a whole
//! chunk are filled row by row in parallel.

use glam::Vec3;
use noise::{NoiseFn, Perlin};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::types::{IVec2, IVec3};

/// Smooth the interpolation (accepted for settings compatibility)
pub const NOISE_FLAG_EASED: u32 = 1 << 1;
/// Take the absolute value of each octave before summing
pub const NOISE_FLAG_ABSVALUE: u32 = 1 << 2;

/// Parameters of one fractal noise
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct NoiseParams {
    pub offset: f32,
    pub scale: f32,
    /// Size in nodes of the largest feature on each axis
    pub spread: Vec3,
    pub seed: i32,
    pub octaves: u16,
    /// Amplitude factor between octaves
    pub persist: f32,
    /// Frequency factor between octaves
    #[serde(default = "default_lacunarity")]
    pub lacunarity: f32,
    #[serde(default)]
    pub flags: u32,
}

fn default_lacunarity() -> f32 {
    2.0
}

impl NoiseParams {
    pub const fn new(offset: f32, scale: f32, spread: Vec3, seed: i32, octaves: u16, persist: f32) -> Self {
        Self { offset, scale, spread, seed, octaves, persist, lacunarity: 2.0, flags: 0 }
    }
}

impl Default for NoiseParams {
    fn default() -> Self {
        Self::new(0.0, 1.0, Vec3::splat(250.0), 0, 3, 0.6)
    }
}

/// A ready-to-sample noise
#[derive(Clone)]
pub struct Noise {
    params: NoiseParams,
    octaves: Vec<Perlin>,
}

impl std::fmt::Debug for Noise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Noise").field("params", &self.params).finish()
    }
}

impl Noise {
    pub fn new(params: &NoiseParams, map_seed: u64) -> Self {
        let base = (map_seed as u32).wrapping_add(params.seed as u32);
        let octaves = (0..params.octaves.max(1) as u32)
            .map(|o| Perlin::new(base.wrapping_add(o.wrapping_mul(0x9e37_79b9))))
            .collect();
        Self { params: *params, octaves }
    }

    pub fn params(&self) -> &NoiseParams {
        &self.params
    }

    fn fractal(&self, p: [f64; 3], three_d: bool) -> f32 {
        let np = &self.params;
        let mut freq = 1.0f64;
        let mut amp = 1.0f64;
        let mut sum = 0.0f64;
        for source in &self.octaves {
            let x = p[0] * freq / np.spread.x as f64;
            let y = p[1] * freq / np.spread.y as f64;
            let z = p[2] * freq / np.spread.z as f64;
            let mut v = if three_d { source.get([x, y, z]) } else { source.get([x, z]) };
            if np.flags & NOISE_FLAG_ABSVALUE != 0 {
                v = v.abs();
            }
            sum += v * amp;
            freq *= np.lacunarity as f64;
            amp *= np.persist as f64;
        }
        np.offset + np.scale * sum as f32
    }

    /// Value at column `(x, z)`
    pub fn noise2d(&self, x: f32, z: f32) -> f32 {
        self.fractal([x as f64, 0.0, z as f64], false)
    }

    pub fn noise3d(&self, x: f32, y: f32, z: f32) -> f32 {
        self.fractal([x as f64, y as f64, z as f64], true)
    }

    /// Values over `size.x * size.y` columns starting at `origin` (x, z),
    /// x varying fastest
    pub fn perlin_map_2d(&self, origin: IVec2, size: IVec2) -> Vec<f32> {
        let sx = size.x.max(0) as usize;
        let mut out = vec![0.0; sx * size.y.max(0) as usize];
        if sx == 0 {
            return out;
        }
        out.par_chunks_mut(sx).enumerate().for_each(|(row, values)| {
            let z = (origin.y + row as i32) as f32;
            for (i, v) in values.iter_mut().enumerate() {
                *v = self.noise2d((origin.x + i as i32) as f32, z);
            }
        });
        out
    }

    /// Values over a box starting at `origin`, x fastest then y then z
    pub fn perlin_map_3d(&self, origin: IVec3, size: IVec3) -> Vec<f32> {
        let sx = size.x.max(0) as usize;
        let sy = size.y.max(0) as usize;
        let mut out = vec![0.0; sx * sy * size.z.max(0) as usize];
        if sx == 0 {
            return out;
        }
        out.par_chunks_mut(sx).enumerate().for_each(|(row, values)| {
            let y = (origin.y + (row % sy.max(1)) as i32) as f32;
            let z = (origin.z + (row / sy.max(1)) as i32) as f32;
            for (i, v) in values.iter_mut().enumerate() {
                *v = self.noise3d((origin.x + i as i32) as f32, y, z);
            }
        });
        out
    }
}

/// One-off 2D sample
pub fn noise2d_perlin(params: &NoiseParams, map_seed: u64, x: f32, z: f32) -> f32 {
    Noise::new(params, map_seed).noise2d(x, z)
}

/// One-off 3D sample
pub fn noise3d_perlin(params: &NoiseParams, map_seed: u64, p: IVec3) -> f32 {
    Noise::new(params, map_seed).noise3d(p.x as f32, p.y as f32, p.z as f32)
}

/// Uncorrelated value in [-1, 1] for an integer column
pub fn noise2d_hash(x: i32, z: i32, seed: u64) -> f32 {
    let mut n = (1619i32.wrapping_mul(x))
        .wrapping_add(31337i32.wrapping_mul(z))
        .wrapping_add(1013i32.wrapping_mul(seed as i32))
        & 0x7fff_ffff;
    n = (n >> 13) ^ n;
    let h = n
        .wrapping_mul(n.wrapping_mul(n).wrapping_mul(60493).wrapping_add(19990303))
        .wrapping_add(1376312589)
        & 0x7fff_ffff;
    1.0 - h as f32 / 0x4000_0000 as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> NoiseParams {
        NoiseParams::new(10.0, 5.0, Vec3::splat(50.0), 3, 4, 0.5)
    }

    #[test]
    fn test_range_follows_offset_and_scale() {
        let n = Noise::new(&params(), 1);
        for i in 0..200 {
            let v = n.noise2d(i as f32 * 3.7, i as f32 * -1.3);
            // Sum of amplitudes is below 2
            assert!((0.0..=20.0).contains(&v), "{v}");
        }
    }

    #[test]
    fn test_map_matches_point_samples() {
        let n = Noise::new(&params(), 9);
        let map = n.perlin_map_2d(IVec2::new(-5, 20), IVec2::new(7, 3));
        assert_eq!(map.len(), 21);
        assert_eq!(map[0], n.noise2d(-5.0, 20.0));
        assert_eq!(map[7 * 2 + 4], n.noise2d(-1.0, 22.0));

        let map3 = n.perlin_map_3d(IVec3::new(0, -2, 4), IVec3::new(3, 4, 2));
        assert_eq!(map3.len(), 24);
        assert_eq!(map3[3 * 4 + 3 * 2 + 1], n.noise3d(1.0, 0.0, 5.0));
    }

    #[test]
    fn test_seed_changes_output() {
        let a = Noise::new(&params(), 1);
        let b = Noise::new(&params(), 2);
        let differs = (0..50).any(|i| a.noise2d(i as f32 * 7.1, 3.3) != b.noise2d(i as f32 * 7.1, 3.3));
        assert!(differs);
    }

    #[test]
    fn test_hash_noise_range() {
        for i in -50..50 {
            let v = noise2d_hash(i * 13, -i * 7, 5);
            assert!((-1.0..=1.0).contains(&v), "{v}");
            assert_eq!(v, noise2d_hash(i * 13, -i * 7, 5));
        }
    }

    #[test]
    fn test_params_from_json() {
        let np: NoiseParams = serde_json::from_str(
            r#"{"offset": -4, "scale": 20, "spread": [250, 250, 250], "seed": 82341, "octaves": 5, "persist": 0.6}"#,
        )
        .unwrap();
        assert_eq!(np.offset, -4.0);
        assert_eq!(np.spread, Vec3::splat(250.0));
        assert_eq!(np.lacunarity, 2.0);
    }
}

//! Sandvox - a block-based voxel world core
//!
//! Nodes live in 16³ map blocks held by a `Map`. Blocks are lit with day
//! and night light banks, generated chunk by chunk by a map generator,
//! persisted through a `MapDatabase`, and brought to life by a
//! `LogicEnvironment` that runs timers, modifiers and active objects.

pub mod core;
pub mod math;
pub mod util;
pub mod voxel;
pub mod map;
pub mod lighting;
pub mod generation;
pub mod environment;

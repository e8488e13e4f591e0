//! Mathematical utilities

pub mod aabb;
pub mod ray;

pub use aabb::Aabb;
pub use ray::{float_to_node, Ray, VoxelLineIterator};

//! Shared helpers

pub mod serialize;

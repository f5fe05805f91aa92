//! Adapters for services outside this crate.

pub mod params;

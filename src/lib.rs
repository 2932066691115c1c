//! easecache: result caching and read coalescing for a data-access pipeline.

pub mod cache;
pub mod config;
pub mod infra;
pub mod storm;

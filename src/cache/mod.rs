//! Caching and coalescing layer for a data-access pipeline.
//!
//! Reads are keyed by an identifier built from the statement's table, query
//! text and bound parameters. A read is answered from the configured
//! [`Cacher`] when possible; otherwise concurrent identical reads share one
//! execution through the [`Easer`], and the leader writes the result back.
//! Writes invalidate the cacher before they run.
//!
//! ```toml
//! [cache]
//! easer = true
//! backend = "memory"
//! memory_capacity = 1024
//! cacheable_tables = ["^users$", "^roles_"]
//! ```

mod cacher;
mod caches;
mod config;
mod easer;
mod eligibility;
mod error;
pub mod identifier;
mod lock;
mod memory;
mod query;
mod statement;

pub use cacher::Cacher;
pub use caches::{Caches, NAME, Outcome};
pub use config::CachesConfig;
pub use easer::Easer;
pub use eligibility::{Eligibility, TableRule};
pub use error::{CacheError, CacheLayerError, CopyError, ExecutionError};
pub use memory::MemoryCacher;
pub use query::{AnyQuery, Payload, Query, SharedQuery};
pub use statement::{EntityType, Operation, Statement};

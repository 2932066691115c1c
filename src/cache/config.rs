//! Runtime configuration of the interception layer.

use std::fmt;
use std::sync::Arc;

use super::cacher::Cacher;
use super::eligibility::TableRule;
use super::memory::MemoryCacher;
use crate::config::{CacheBackend, CacheSettings};

/// What the layer does around the host pipeline.
#[derive(Clone, Default)]
pub struct CachesConfig {
    /// Coalesce concurrent identical reads.
    pub easer: bool,
    /// Result cache; `None` disables caching entirely.
    pub cacher: Option<Arc<dyn Cacher>>,
    /// Cacheable tables; empty means every table.
    pub cacheable_tables: Vec<TableRule>,
}

impl CachesConfig {
    pub fn with_easer(mut self, enabled: bool) -> Self {
        self.easer = enabled;
        self
    }

    pub fn with_cacher(mut self, cacher: Arc<dyn Cacher>) -> Self {
        self.cacher = Some(cacher);
        self
    }

    pub fn with_cacheable_tables(mut self, rules: Vec<TableRule>) -> Self {
        self.cacheable_tables = rules;
        self
    }

    /// Returns true if the layer does anything beyond calling through.
    pub fn is_active(&self) -> bool {
        self.easer || self.cacher.is_some()
    }
}

impl fmt::Debug for CachesConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachesConfig")
            .field("easer", &self.easer)
            .field("cacher", &self.cacher.is_some())
            .field("cacheable_tables", &self.cacheable_tables)
            .finish()
    }
}

impl From<&CacheSettings> for CachesConfig {
    fn from(settings: &CacheSettings) -> Self {
        let cacher: Option<Arc<dyn Cacher>> = match settings.backend {
            CacheBackend::None => None,
            CacheBackend::Memory => Some(Arc::new(MemoryCacher::new(settings.memory_capacity))),
        };

        Self {
            easer: settings.easer,
            cacher,
            cacheable_tables: settings.cacheable_tables.clone(),
        }
    }
}

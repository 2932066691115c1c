//! Error taxonomy of the cache layer.
//!
//! Only [`ExecutionError`] is fatal to a request. Everything the cache layer
//! itself produces is collected as [`CacheLayerError`] next to the result.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Failure reported by the underlying execution, shared verbatim with every
/// coalesced caller.
#[derive(Clone)]
pub struct ExecutionError {
    inner: Arc<dyn StdError + Send + Sync + 'static>,
}

#[derive(Debug, Error)]
#[error("{0}")]
struct ExecutionMessage(String);

impl ExecutionError {
    pub fn new<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(error),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::new(ExecutionMessage(message.into()))
    }

    /// Borrow the host error for downcasting.
    pub fn get_ref(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.inner.as_ref()
    }
}

impl fmt::Debug for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ExecutionError").field(&self.inner).finish()
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl StdError for ExecutionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source()
    }
}

/// Error reported by a [`Cacher`](super::Cacher) backend.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
    #[error("cache backend error: {message}")]
    Backend { message: String },
    #[error("cache payload could not be encoded: {0}")]
    Encode(String),
}

impl CacheError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}

/// Structural copy failure between two result containers.
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("payload of type `{from}` cannot be encoded: {source}")]
    Encode {
        from: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("payload of type `{from}` does not fit destination `{to}`: {source}")]
    Shape {
        from: &'static str,
        to: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Non-fatal failure recorded while serving a request.
#[derive(Debug, Error)]
pub enum CacheLayerError {
    #[error("cache fetch failed for `{identifier}`")]
    Fetch {
        identifier: String,
        #[source]
        source: CacheError,
    },
    #[error("cache store failed for `{identifier}`")]
    Store {
        identifier: String,
        #[source]
        source: CacheError,
    },
    #[error("cache invalidation failed for table `{table}`")]
    Invalidate {
        table: String,
        #[source]
        source: CacheError,
    },
    #[error("result copy failed for `{identifier}`")]
    Copy {
        identifier: String,
        #[source]
        source: CopyError,
    },
}

impl CacheLayerError {
    /// Metric label of the stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Fetch { .. } => "fetch",
            Self::Store { .. } => "store",
            Self::Invalidate { .. } => "invalidate",
            Self::Copy { .. } => "copy",
        }
    }
}

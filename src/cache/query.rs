//! Result containers and structural copy between destination shapes.
//!
//! A coalesced follower or a cache hit may ask for a destination shape that is
//! not the type the leader (or the backend) produced. Payloads of the same
//! type are cloned; other shapes are copied field by field through
//! `serde_json::Value`, failing with [`CopyError`] instead of panicking.

use std::any::{Any, type_name};
use std::sync::Arc;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use super::error::CopyError;

/// Destination payloads that can be structurally copied into other shapes.
pub trait Payload: Any + Clone + Serialize + DeserializeOwned + Send + Sync {}

impl<T> Payload for T where T: Any + Clone + Serialize + DeserializeOwned + Send + Sync {}

/// Outcome of a read: destination payload plus affected row count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query<D> {
    pub dest: Option<D>,
    pub rows_affected: u64,
}

/// Shared, type-erased view of a [`Query`].
pub type SharedQuery = Arc<dyn AnyQuery>;

/// Object-safe access to a [`Query`] of any payload type.
pub trait AnyQuery: Send + Sync {
    fn rows_affected(&self) -> u64;

    /// The payload, if any, for same-type downcasts.
    fn payload(&self) -> Option<&(dyn Any + Send + Sync)>;

    fn payload_type(&self) -> &'static str;

    /// Structural form of the payload.
    fn payload_value(&self) -> Result<Option<Value>, CopyError>;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<D> Query<D> {
    pub fn new(dest: D) -> Self {
        Self {
            dest: Some(dest),
            rows_affected: 0,
        }
    }

    pub fn with_rows(dest: D, rows_affected: u64) -> Self {
        Self {
            dest: Some(dest),
            rows_affected,
        }
    }

    /// Container without a payload.
    pub fn empty() -> Self {
        Self {
            dest: None,
            rows_affected: 0,
        }
    }
}

impl<D> Default for Query<D> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<D: Payload> Query<D> {
    /// Copy this container into `other`.
    ///
    /// The row count is always transferred. A missing payload leaves
    /// `other.dest` as it is. On a shape mismatch `other.dest` is left
    /// untouched and the error is returned.
    pub fn copy_to<E: Payload>(&self, other: &mut Query<E>) -> Result<(), CopyError> {
        other.copy_from(self)
    }

    /// Fill this container from any other container.
    pub fn copy_from(&mut self, source: &dyn AnyQuery) -> Result<(), CopyError> {
        self.rows_affected = source.rows_affected();

        let Some(payload) = source.payload() else {
            return Ok(());
        };

        if let Some(same) = payload.downcast_ref::<D>() {
            self.dest = Some(same.clone());
            return Ok(());
        }

        let Some(value) = source.payload_value()? else {
            return Ok(());
        };
        let dest = serde_json::from_value(value).map_err(|error| CopyError::Shape {
            from: source.payload_type(),
            to: type_name::<D>(),
            source: error,
        })?;
        self.dest = Some(dest);
        Ok(())
    }

    /// Detach an owned container from a shared outcome.
    ///
    /// The last holder of a same-type outcome takes it without copying.
    /// When the shape does not fit, the row count is still returned alongside
    /// the error.
    pub fn detach(shared: SharedQuery) -> (Self, Option<CopyError>) {
        match Arc::clone(&shared).into_any().downcast::<Self>() {
            Ok(same) => {
                drop(shared);
                let owned = Arc::try_unwrap(same).unwrap_or_else(|same| Self::clone(&same));
                (owned, None)
            }
            Err(_) => {
                let mut detached = Self::empty();
                let error = detached.copy_from(shared.as_ref()).err();
                (detached, error)
            }
        }
    }

    /// Structural form used by cache backends.
    pub fn to_structural(&self) -> Result<Query<Value>, CopyError> {
        Ok(Query {
            dest: self.payload_value()?,
            rows_affected: self.rows_affected,
        })
    }

    pub fn into_shared(self) -> SharedQuery {
        Arc::new(self)
    }
}

impl<D: Payload> AnyQuery for Query<D> {
    fn rows_affected(&self) -> u64 {
        self.rows_affected
    }

    fn payload(&self) -> Option<&(dyn Any + Send + Sync)> {
        self.dest
            .as_ref()
            .map(|dest| dest as &(dyn Any + Send + Sync))
    }

    fn payload_type(&self) -> &'static str {
        type_name::<D>()
    }

    fn payload_value(&self) -> Result<Option<Value>, CopyError> {
        self.dest
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|error| CopyError::Encode {
                from: type_name::<D>(),
                source: error,
            })
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

//! Key/value state store used to persist authentication records.
//!
//! The store is deliberately opaque: values are whole JSON documents that are
//! read and replaced wholesale. A missing key is reported as
//! [`StateError::NoState`] so callers can tell "nothing stored yet" apart from
//! backend failures.
//!
//! Backends:
//! - [`MemoryState`]: process-local map, used by tests and the `memory` backend
//! - [`SqliteState`]: single-table SQLite database for on-disk persistence

pub mod memory;
pub mod sqlite;

pub use memory::MemoryState;
pub use sqlite::SqliteState;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Failure reading or writing a state entry.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Nothing has been stored under the key yet.
    #[error("no state entry for key {0:?}")]
    NoState(String),
    /// The backend itself failed (I/O, SQLite, ...).
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
    /// The stored value is not a valid document of the requested type.
    #[error("cannot decode state entry: {0}")]
    Decode(#[source] serde_json::Error),
    /// The value could not be encoded for storage.
    #[error("cannot encode state entry: {0}")]
    Encode(#[source] serde_json::Error),
}

impl StateError {
    pub fn is_no_state(&self) -> bool {
        matches!(self, Self::NoState(_))
    }
}

/// Raw key/value persistence.
///
/// `set_raw` must replace the value atomically: readers observe either the
/// previous document or the new one, never a mix.
pub trait StateStore: Send + Sync {
    /// Fetch the raw document stored under `key`, or `None` if absent.
    fn get_raw(&self, key: &str) -> anyhow::Result<Option<String>>;

    /// Replace the document stored under `key`.
    fn set_raw(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

/// Typed access on top of [`StateStore`].
pub trait StateStoreExt: StateStore {
    /// Read and decode the document under `key`.
    fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, StateError> {
        let raw = self
            .get_raw(key)?
            .ok_or_else(|| StateError::NoState(key.to_string()))?;
        serde_json::from_str(&raw).map_err(StateError::Decode)
    }

    /// Encode `value` and store it under `key`, replacing any previous value.
    fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StateError> {
        let raw = serde_json::to_string(value).map_err(StateError::Encode)?;
        self.set_raw(key, &raw)?;
        Ok(())
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}

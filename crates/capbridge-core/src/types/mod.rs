//! Core type definitions for capbridge
//!
//! Types shared by both sides of the boundary: the opaque identifiers the
//! client hands over, the opaque payloads the host pushes back, and the
//! JSON-RPC wire structures that carry them.

mod rpc_types;

pub use rpc_types::*;

use crate::error::{BridgeError, Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Opaque identifier of a resource the client wants watched
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WatchTarget(pub String);

impl WatchTarget {
    pub fn new(target: impl Into<String>) -> Self {
        Self(target.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for WatchTarget {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WatchTarget {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<&Path> for WatchTarget {
    fn from(p: &Path) -> Self {
        Self(p.to_string_lossy().to_string())
    }
}

impl From<&SelectedPath> for WatchTarget {
    fn from(p: &SelectedPath) -> Self {
        Self(p.0.clone())
    }
}

impl fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path the user picked in the host's file dialog
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectedPath(pub String);

impl SelectedPath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl fmt::Display for SelectedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque update-event payload.
///
/// The bridge never looks inside; the bytes the host emits are the bytes the
/// client's listeners receive. Cloning shares the underlying buffer so fan-out
/// to several listeners does not copy.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct UpdatePayload(Arc<[u8]>);

impl UpdatePayload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(Arc::from(bytes.into()))
    }

    /// Serialize a value as the payload. Producers and consumers agree on the
    /// schema out of band.
    pub fn from_json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::new(serde_json::to_vec(value)?))
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.0)?)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    pub fn from_base64(encoded: &str) -> Result<Self> {
        STANDARD
            .decode(encoded)
            .map(Self::new)
            .map_err(|e| Error::Bridge(BridgeError::InvalidPayload(e.to_string())))
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl fmt::Debug for UpdatePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdatePayload").field("len", &self.0.len()).finish()
    }
}

impl From<Vec<u8>> for UpdatePayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&[u8]> for UpdatePayload {
    fn from(bytes: &[u8]) -> Self {
        Self(Arc::from(bytes))
    }
}

/// Watch state of a client context. `Watching` is terminal until teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WatchState {
    #[default]
    Unwatched,
    Watching,
}

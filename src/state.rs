//! Shared state records mirrored from the server.
//!
//! DESIGN
//! ======
//! The client never edits these values locally. A record is replaced only
//! when the server pushes or confirms a new one, so the cached copy is always
//! the last server-confirmed value, even across reconnects.
//!
//! Each endpoint has its own record shape; a session is generic over
//! [`StateRecord`] so both share one lifecycle implementation.

use std::collections::HashMap;
use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A server-owned value a session keeps in sync.
pub trait StateRecord: Serialize + DeserializeOwned + Clone + Default + Debug + PartialEq + Send + Sync + 'static {
    /// True when the server holds no meaningful value yet (e.g. right after a
    /// server restart).
    fn is_unset(&self) -> bool;
}

// =============================================================================
// STATE ENDPOINT
// =============================================================================

/// Record served by the `api/state` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentState {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display: DisplayContent,
}

/// What is currently on screen: template fields plus the slide type they fill.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayContent {
    #[serde(default)]
    pub content: HashMap<String, String>,
    #[serde(default)]
    pub slide_type_id: Option<Uuid>,
}

impl StateRecord for CurrentState {
    fn is_unset(&self) -> bool {
        self.id.is_empty()
    }
}

// =============================================================================
// DISPLAY-STATE ENDPOINT
// =============================================================================

/// Record served by the `api/display-state` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayState {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub content: HashMap<String, String>,
    #[serde(default)]
    pub slide_type_id: Option<Uuid>,
}

impl StateRecord for DisplayState {
    fn is_unset(&self) -> bool {
        self.id.is_empty()
    }
}

/// Untyped records, for endpoints whose shape the caller does not model.
impl StateRecord for serde_json::Value {
    fn is_unset(&self) -> bool {
        self.is_null()
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;

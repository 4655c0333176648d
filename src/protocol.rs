//! Wire messages exchanged over a state endpoint.
//!
//! DESIGN
//! ======
//! Every message is a flat JSON text frame. Outbound requests carry exactly
//! one recognized key; inbound messages carry any combination of `state`,
//! `auth`, `pong` and `ping`, each independently meaningful. There is no
//! request id: responses are matched by field shape (see `correlator`).
//!
//! `ping`/`pong` payloads are kept as raw JSON values so a server probe is
//! echoed back byte-for-byte whatever its type.

use rand::Rng;
use rand::distr::Alphanumeric;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Length of the correlation token carried by client pings.
pub const PING_TOKEN_LEN: usize = 16;

// =============================================================================
// OUTBOUND
// =============================================================================

/// Client → server request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outbound<S> {
    /// Authenticate this connection.
    Auth { auth_token: String },
    /// Ask the server to replace the shared state.
    State { state: S },
    /// Ask for the current state.
    Get { get: bool },
    /// Liveness probe; the server answers with the same token as `pong`.
    Ping { ping: String },
    /// Answer to a server-initiated probe.
    Pong { pong: Value },
}

impl<S> Outbound<S> {
    #[must_use]
    pub fn get() -> Self {
        Self::Get { get: true }
    }
}

// =============================================================================
// INBOUND
// =============================================================================

/// Server → client message. Unknown fields are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(bound(deserialize = "S: serde::de::DeserializeOwned"))]
pub struct Inbound<S> {
    #[serde(default)]
    pub state: Option<S>,
    #[serde(default)]
    pub auth: Option<bool>,
    #[serde(default)]
    pub pong: Option<Value>,
    #[serde(default)]
    pub ping: Option<Value>,
}

impl<S> Inbound<S> {
    /// True when `pong` is the string `token`.
    #[must_use]
    pub fn is_pong_for(&self, token: &str) -> bool {
        self.pong.as_ref().and_then(Value::as_str) == Some(token)
    }
}

impl Inbound<Value> {
    /// Type the `state` payload as `S`, keeping the other fields as they are.
    ///
    /// # Errors
    ///
    /// Returns the serde error when `state` does not match `S`.
    pub fn typed<S>(self) -> Result<Inbound<S>, serde_json::Error>
    where
        S: serde::de::DeserializeOwned,
    {
        let state = self.state.map(serde_json::from_value).transpose()?;
        Ok(Inbound { state, auth: self.auth, pong: self.pong, ping: self.ping })
    }
}

/// Decode one inbound text frame, leaving `state` untyped so a payload of
/// the wrong shape cannot hide the other fields.
///
/// # Errors
///
/// Returns the serde error when the text is not a JSON object or a known
/// field has the wrong type.
pub fn decode(text: &str) -> Result<Inbound<Value>, serde_json::Error> {
    serde_json::from_str(text)
}

/// Random alphanumeric token used to correlate a ping with its pong.
#[must_use]
pub fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;

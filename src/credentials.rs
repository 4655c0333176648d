//! Session credential source.
//!
//! The token itself is owned elsewhere (login flow, local storage); sessions
//! only read it when they authenticate a connection.

use std::sync::{Arc, PoisonError, RwLock};

/// Supplies the credential sent as `auth_token`.
pub trait TokenProvider: Send + Sync {
    /// Current session token, if logged in.
    fn token(&self) -> Option<String>;

    /// Whether a freshly connected session should authenticate itself.
    fn should_authenticate(&self) -> bool {
        self.token().is_some()
    }
}

/// A token fixed at construction.
#[derive(Debug, Clone, Default)]
pub struct StaticToken(Option<String>);

impl StaticToken {
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|t| !t.is_empty()))
    }
}

impl TokenProvider for StaticToken {
    fn token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// A token that can change at runtime (login/logout) and is shared by every
/// session of the application.
#[derive(Debug, Clone, Default)]
pub struct SharedToken {
    inner: Arc<RwLock<SharedTokenInner>>,
}

#[derive(Debug, Default)]
struct SharedTokenInner {
    token: Option<String>,
    can_write: bool,
}

impl SharedToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a token after login. `can_write` marks users allowed to change
    /// shared state; only they authenticate on connect.
    pub fn set(&self, token: String, can_write: bool) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.token = Some(token);
        inner.can_write = can_write;
    }

    /// Forget the token after logout.
    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.token = None;
        inner.can_write = false;
    }
}

impl TokenProvider for SharedToken {
    fn token(&self) -> Option<String> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).token.clone()
    }

    fn should_authenticate(&self) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.token.is_some() && inner.can_write
    }
}

#[cfg(test)]
#[path = "credentials_test.rs"]
mod tests;

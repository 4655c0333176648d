//! Message correlator: matches inbound messages to outstanding requests.
//!
//! DESIGN
//! ======
//! The connection is one shared duplex pipe, so any inbound message may be
//! the answer to any outstanding request, an unsolicited push, or a server
//! probe. Each request registers a predicate describing "is this message
//! mine?"; every decoded inbound message is offered to every registered
//! waiter, and a waiter resolves on the first message its predicate accepts.
//!
//! Waiters must be registered before the request is sent, otherwise a fast
//! reply could be dispatched before anyone listens.
//!
//! TRADE-OFFS
//! ==========
//! Matching by shape needs no request ids on the wire, but two concurrent
//! requests expecting the same shape (`refresh` and `set_state` both wait for
//! `state`) are resolved by the same message.
//!
//! LIFECYCLE
//! =========
//! A waiter leaves the registry when it resolves, when the connection
//! closes, when a decode failure rejects it, when its deadline passes, or
//! when the caller drops it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::SessionError;

/// One outstanding request, type-erased over its result.
trait Pending<M>: Send {
    /// Offer `message`; returns true once the waiter is done and can be removed.
    fn offer(&mut self, message: &M) -> bool;

    fn reject(self: Box<Self>, error: SessionError);
}

struct Waiter<T, F> {
    extract: F,
    reply: Option<oneshot::Sender<Result<T, SessionError>>>,
}

impl<M, T, F> Pending<M> for Waiter<T, F>
where
    T: Send,
    F: FnMut(&M) -> Option<T> + Send,
{
    fn offer(&mut self, message: &M) -> bool {
        let Some(reply) = self.reply.as_ref() else {
            return true;
        };
        if reply.is_closed() {
            return true;
        }
        let Some(value) = (self.extract)(message) else {
            return false;
        };
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Ok(value));
        }
        true
    }

    fn reject(mut self: Box<Self>, error: SessionError) {
        if let Some(reply) = self.reply.take() {
            let _ = reply.send(Err(error));
        }
    }
}

struct Registry<M> {
    waiters: HashMap<u64, Box<dyn Pending<M>>>,
    closed: bool,
}

/// Registry of outstanding requests for one connection.
pub struct Correlator<M> {
    registry: Mutex<Registry<M>>,
    next_id: AtomicU64,
}

impl<M: 'static> Correlator<M> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry { waiters: HashMap::new(), closed: false }),
            next_id: AtomicU64::new(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry<M>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a waiter resolved by the first message for which `extract`
    /// returns `Some`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Closed`] if the connection already closed.
    pub fn register<T, F>(self: &Arc<Self>, extract: F) -> Result<Waiting<T, M>, SessionError>
    where
        T: Send + 'static,
        F: FnMut(&M) -> Option<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut registry = self.lock();
        if registry.closed {
            return Err(SessionError::Closed);
        }
        registry.waiters.insert(id, Box::new(Waiter { extract, reply: Some(tx) }));
        drop(registry);

        Ok(Waiting { id, rx, correlator: Arc::clone(self) })
    }

    /// Register a waiter and wait for it, failing after `deadline`.
    ///
    /// # Errors
    ///
    /// See [`Waiting::wait`].
    pub async fn wait_for<T, F>(self: &Arc<Self>, extract: F, deadline: Duration) -> Result<T, SessionError>
    where
        T: Send + 'static,
        F: FnMut(&M) -> Option<T> + Send + 'static,
    {
        self.register(extract)?.wait(deadline).await
    }

    /// Offer an inbound message to every waiter.
    pub fn dispatch(&self, message: &M) {
        self.lock().waiters.retain(|_, waiter| !waiter.offer(message));
    }

    /// Reject every current waiter; the registry stays open.
    pub fn reject_all(&self, error: impl Fn() -> SessionError) {
        let drained: Vec<_> = self.lock().waiters.drain().map(|(_, w)| w).collect();
        for waiter in drained {
            waiter.reject(error());
        }
    }

    /// Reject every waiter and refuse new registrations.
    pub fn close(&self, error: impl Fn() -> SessionError) {
        let drained: Vec<_> = {
            let mut registry = self.lock();
            registry.closed = true;
            registry.waiters.drain().map(|(_, w)| w).collect()
        };
        for waiter in drained {
            waiter.reject(error());
        }
    }

    /// Number of outstanding waiters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().waiters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) {
        self.lock().waiters.remove(&id);
    }
}

impl<M: 'static> Default for Correlator<M> {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered waiter. Dropping it deregisters the waiter.
pub struct Waiting<T, M: 'static> {
    id: u64,
    rx: oneshot::Receiver<Result<T, SessionError>>,
    correlator: Arc<Correlator<M>>,
}

impl<T, M: 'static> Waiting<T, M> {
    /// Wait for the matching message.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Timeout`] after `deadline`, or the error the
    /// waiter was rejected with (close, transport error, decode failure).
    pub async fn wait(mut self, deadline: Duration) -> Result<T, SessionError> {
        match tokio::time::timeout(deadline, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::Closed),
            Err(_) => Err(SessionError::Timeout(deadline)),
        }
    }
}

impl<T, M: 'static> Drop for Waiting<T, M> {
    fn drop(&mut self) {
        self.correlator.remove(self.id);
    }
}

#[cfg(test)]
#[path = "correlator_test.rs"]
mod tests;

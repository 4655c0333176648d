//! Liveness loop: periodic client pings on a connected session.
//!
//! DESIGN
//! ======
//! One task per connection, started once the session is synced and stopped
//! before the connection is torn down. Each iteration pings, then sleeps the
//! current delay; a `None` delay ends the loop. Stopping cancels the loop's
//! token and joins the task, so no ping is sent once `stop` returns.
//!
//! A ping that times out means the connection died silently: the loop
//! reports the stall and exits, and the owner decides how to recover. A ping
//! rejected because some other frame failed to decode is not a liveness
//! signal; the loop carries on.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::SessionError;

pub(crate) struct Heartbeat {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Heartbeat {
    /// Spawn the loop. `ping` performs one round trip; `on_stall` runs once if
    /// a ping times out.
    pub(crate) fn spawn<P, Fut, S>(
        cancel: CancellationToken,
        delay: watch::Receiver<Option<Duration>>,
        ping: P,
        on_stall: S,
    ) -> Self
    where
        P: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Duration, SessionError>> + Send + 'static,
        S: FnOnce() + Send + 'static,
    {
        let task = tokio::spawn(run(cancel.clone(), delay, ping, on_stall));
        Self { cancel, task }
    }

    /// Cancel the loop and wait for it to exit.
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                warn!(error = %e, "heartbeat: task panicked");
            }
        }
    }
}

async fn run<P, Fut, S>(cancel: CancellationToken, delay: watch::Receiver<Option<Duration>>, mut ping: P, on_stall: S)
where
    P: FnMut() -> Fut,
    Fut: Future<Output = Result<Duration, SessionError>>,
    S: FnOnce(),
{
    loop {
        if cancel.is_cancelled() || delay.borrow().is_none() {
            break;
        }

        let result = tokio::select! {
            () = cancel.cancelled() => break,
            result = ping() => result,
        };
        match result {
            Ok(rtt) => debug!(rtt_ms = rtt.as_millis(), "heartbeat: pong"),
            Err(SessionError::Timeout(after)) => {
                warn!(after_ms = after.as_millis(), "heartbeat: ping timed out");
                on_stall();
                break;
            }
            // A malformed frame rejected the waiter; the connection itself is fine.
            Err(SessionError::Decode(reason)) => debug!(%reason, "heartbeat: ping rejected by bad frame"),
            Err(e) => {
                debug!(error = %e, "heartbeat: ping failed, stopping");
                break;
            }
        }

        let Some(pause) = *delay.borrow() else {
            break;
        };
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(pause) => {}
        }
    }
}

#[cfg(test)]
#[path = "heartbeat_test.rs"]
mod tests;

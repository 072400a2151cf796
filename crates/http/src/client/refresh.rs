//! Single-flight coordination of access token refreshes
//!
//! At most one refresh attempt is outstanding at any time. Callers that hit
//! an expired token while an attempt is running join it instead of starting
//! their own, and all of them observe the same outcome.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Outcome of a refresh attempt, shared between every caller that joined it.
/// Resolves to `true` when a new access token has been stored.
pub type RefreshHandle = Shared<BoxFuture<'static, bool>>;

#[derive(Default)]
struct RefreshState {
    in_flight: Option<InFlight>,
    attempts: u64,
}

struct InFlight {
    attempt: u64,
    handle: RefreshHandle,
}

/// Tracks the in-flight refresh attempt.
///
/// Idle until [`begin_or_join`](Self::begin_or_join) starts an attempt,
/// Refreshing until that attempt resolves, then Idle again.
#[derive(Default)]
pub struct RefreshCoordinator {
    state: Arc<Mutex<RefreshState>>,
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the outstanding refresh attempt, or start one with `start` when
    /// none is running.
    ///
    /// The check and the registration of a new attempt happen under one lock
    /// with no suspension point in between. The attempt runs on its own tokio
    /// task, so it completes even if every caller awaiting it is dropped, and
    /// it clears the in-flight marker before its outcome becomes visible.
    ///
    /// Must be called from within a tokio runtime.
    pub fn begin_or_join<F, Fut>(&self, start: F) -> RefreshHandle
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let mut state = self.lock();

        if let Some(in_flight) = &state.in_flight {
            debug!(attempt = in_flight.attempt, "Joining in-flight token refresh");
            return in_flight.handle.clone();
        }

        state.attempts += 1;
        let attempt = state.attempts;
        debug!(attempt, "Starting token refresh");

        let refresh = start();
        let guard = ClearOnDrop {
            state: Arc::clone(&self.state),
            attempt,
        };
        let task = tokio::spawn(async move {
            let _guard = guard;
            refresh.await
        });

        let handle = async move {
            task.await.unwrap_or_else(|e| {
                warn!(error = %e, "Token refresh task did not complete");
                false
            })
        }
        .boxed()
        .shared();

        state.in_flight = Some(InFlight {
            attempt,
            handle: handle.clone(),
        });
        handle
    }

    /// Whether a refresh attempt is currently outstanding
    pub fn is_refreshing(&self) -> bool {
        self.lock().in_flight.is_some()
    }

    /// Number of refresh attempts started so far
    pub fn attempts(&self) -> u64 {
        self.lock().attempts
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Clears the in-flight marker when the attempt task finishes, panics or is
/// cancelled with the runtime.
struct ClearOnDrop {
    state: Arc<Mutex<RefreshState>>,
    attempt: u64,
}

impl Drop for ClearOnDrop {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.attempt == self.attempt)
        {
            state.in_flight = None;
        }
    }
}

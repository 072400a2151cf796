//! Navigation for the command-line shell
//!
//! The HTTP layer never navigates on its own. It broadcasts
//! [`SessionEvent`]s and [`Router::follow`] turns an expired session into a
//! visit to the login route.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webistream_http::SessionEvent;

pub const HOME_PATH: &str = "/";

#[derive(Debug)]
pub struct Router {
    current: Mutex<String>,
}

impl Router {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(HOME_PATH.to_string()),
        }
    }

    /// Switch to `path`
    pub fn navigate(&self, path: &str) {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if *current != path {
            info!(from = %current, to = path, "Navigating");
            *current = path.to_string();
        }
    }

    pub fn current(&self) -> String {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Send the user to `login_path` whenever the session expires. An explicit
    /// logout is left to the command that performed it. The task ends once
    /// every sender of `events` is gone.
    pub fn follow(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<SessionEvent>,
        login_path: String,
    ) -> JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::Expired(reason)) => {
                        debug!(%reason, "Session expired, redirecting");
                        router.navigate(&login_path);
                    }
                    Ok(SessionEvent::Refreshed | SessionEvent::LoggedOut) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed session events");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

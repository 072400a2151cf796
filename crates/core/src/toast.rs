//! Notifications that survive a redirect
//!
//! A toast is written to the store before the user is sent back to the login
//! screen and shown once on the next start.

use crate::storage::CredentialStore;
use serde::{Deserialize, Serialize};

/// Storage key holding the pending toast
pub const PERSISTED_TOAST_KEY: &str = "persisted_toast";

/// Message shown after a session could not be recovered
pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired. Please log in.";

/// How long a persisted toast stays on screen, in milliseconds
pub const PERSISTED_TOAST_DURATION_MS: u64 = 15_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Success,
    Error,
}

/// A user-visible message persisted across application restarts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedToast {
    #[serde(rename = "type", default = "default_kind")]
    pub kind: ToastKind,
    pub description: String,
    #[serde(default = "default_duration")]
    pub duration: u64,
}

fn default_kind() -> ToastKind {
    ToastKind::Error
}

fn default_duration() -> u64 {
    PERSISTED_TOAST_DURATION_MS
}

impl PersistedToast {
    pub fn error(description: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Error,
            description: description.into(),
            duration: PERSISTED_TOAST_DURATION_MS,
        }
    }

    pub fn success(description: impl Into<String>) -> Self {
        Self {
            kind: ToastKind::Success,
            description: description.into(),
            duration: PERSISTED_TOAST_DURATION_MS,
        }
    }

    /// Title the toast is displayed under
    pub fn title(&self) -> &'static str {
        match self.kind {
            ToastKind::Success => "Success!",
            ToastKind::Error => "Something went wrong!",
        }
    }
}

/// Persist a toast for the next start. Failures are logged and dropped.
pub fn persist_toast(store: &dyn CredentialStore, toast: &PersistedToast) {
    let serialized = match serde_json::to_string(toast) {
        Ok(serialized) => serialized,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize persisted toast");
            return;
        }
    };

    if let Err(e) = store.set(PERSISTED_TOAST_KEY, &serialized) {
        tracing::warn!(error = %e, "Failed to persist toast");
    }
}

/// Read and delete the pending toast, if any.
///
/// Entries that fail to parse or carry no description are discarded.
pub fn take_persisted_toast(store: &dyn CredentialStore) -> Option<PersistedToast> {
    let raw = store.get(PERSISTED_TOAST_KEY)?;

    if let Err(e) = store.remove(PERSISTED_TOAST_KEY) {
        tracing::warn!(error = %e, "Failed to clear persisted toast");
    }

    match serde_json::from_str::<PersistedToast>(&raw) {
        Ok(toast) if !toast.description.is_empty() => Some(toast),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "Discarding unreadable persisted toast");
            None
        }
    }
}

//! Webistream core types and utilities
//!
//! Session state shared by the HTTP client and the command-line shell: the
//! credential store, the credential pair kept in it, toasts that survive a
//! redirect, auth error classification, and client configuration.

pub mod auth_error;
pub mod config;
pub mod credentials;
pub mod error;
pub mod storage;
pub mod toast;

pub use auth_error::{AuthErrorCode, AuthErrorInfo};
pub use crate::config::ClientConfig;
pub use credentials::{CredentialPair, clear_credentials, is_logged_in};
pub use error::{CoreError, CoreResult};
pub use storage::{CredentialStore, FileStore, MemoryStore};
pub use toast::{PersistedToast, ToastKind, persist_toast, take_persisted_toast};

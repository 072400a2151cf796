//! Webistream HTTP client
//!
//! [`WebistreamClient`] talks to the public endpoints. [`SessionClient`]
//! wraps it for authenticated calls and transparently refreshes an expired
//! access token, retrying the rejected request once.

pub mod client;
pub mod types;

pub use client::WebistreamClient;
pub use client::error::ClientError;
pub use client::refresh::RefreshCoordinator;
pub use client::session::{ExpiryReason, SessionClient, SessionEvent};

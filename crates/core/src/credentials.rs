//! Credential pair persisted in the [`CredentialStore`]

use crate::error::{CoreError, CoreResult};
use crate::storage::CredentialStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Storage key for the bearer access token
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Storage key for the refresh token
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";

/// Storage key for the refresh token expiry (RFC 3339)
pub const REFRESH_EXPIRES_AT_KEY: &str = "refresh_expires_at";

/// Tokens issued by the API for the signed-in user.
///
/// Every field maps to its own storage key and is read and written
/// independently, so any of them may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPair {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub refresh_expires_at: Option<DateTime<Utc>>,
}

impl CredentialPair {
    /// Read all credential keys from the store.
    ///
    /// An unparsable expiry is dropped rather than failing the load.
    pub fn load(store: &dyn CredentialStore) -> Self {
        let refresh_expires_at = store.get(REFRESH_EXPIRES_AT_KEY).and_then(|raw| {
            parse_timestamp(&raw)
                .inspect_err(|e| tracing::warn!(error = %e, "Ignoring stored refresh expiry"))
                .ok()
        });

        Self {
            access_token: store.get(ACCESS_TOKEN_KEY),
            refresh_token: store.get(REFRESH_TOKEN_KEY),
            refresh_expires_at,
        }
    }

    /// Write the fields that are present. Absent fields leave the stored
    /// value untouched.
    pub fn save(&self, store: &dyn CredentialStore) -> CoreResult<()> {
        if let Some(token) = self.access_token.as_deref().filter(|t| !t.is_empty()) {
            store.set(ACCESS_TOKEN_KEY, token)?;
        }
        if let Some(token) = self.refresh_token.as_deref().filter(|t| !t.is_empty()) {
            store.set(REFRESH_TOKEN_KEY, token)?;
        }
        if let Some(expires_at) = self.refresh_expires_at {
            store.set(REFRESH_EXPIRES_AT_KEY, &expires_at.to_rfc3339())?;
        }
        Ok(())
    }

    /// Whether the refresh token is known to have expired at `now`
    pub fn refresh_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.refresh_expires_at.is_some_and(|expires_at| expires_at <= now)
    }
}

/// Remove every credential key from the store
pub fn clear_credentials(store: &dyn CredentialStore) -> CoreResult<()> {
    store.remove(ACCESS_TOKEN_KEY)?;
    store.remove(REFRESH_TOKEN_KEY)?;
    store.remove(REFRESH_EXPIRES_AT_KEY)?;
    Ok(())
}

/// A user counts as signed in while an access token is stored
pub fn is_logged_in(store: &dyn CredentialStore) -> bool {
    store.get(ACCESS_TOKEN_KEY).is_some()
}

/// Parse an RFC 3339 timestamp as returned by the API
pub fn parse_timestamp(value: &str) -> CoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::InvalidTimestamp {
            value: value.to_string(),
            message: e.to_string(),
        })
}

//! Authenticated client that recovers from expired access tokens
//!
//! Every response goes through [`SessionClient::send`]. A 401 triggers a
//! token refresh shared by all concurrent callers, followed by exactly one
//! retry of the original request. When the session cannot be recovered the
//! stored credentials are cleared, a toast is persisted for the next start,
//! and [`SessionEvent::Expired`] is broadcast so the application shell can
//! send the user to the login screen.

use super::error::ClientError;
use super::refresh::RefreshCoordinator;
use super::{WebistreamClient, decode_response};
use chrono::Utc;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Response, StatusCode};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use webistream_core::credentials::ACCESS_TOKEN_KEY;
use webistream_core::toast::SESSION_EXPIRED_MESSAGE;
use webistream_core::{
    ClientConfig, CredentialPair, CredentialStore, PersistedToast, clear_credentials,
    persist_toast,
};

/// Default upper bound for a refresh call
pub const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Why a session could not be recovered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryReason {
    /// No refresh token was stored
    MissingRefreshToken,
    /// The stored refresh token is past its expiry
    RefreshTokenExpired,
    /// The refresh call failed, timed out or returned no access token
    RefreshFailed,
    /// The retried request failed to send or answered with a non-2xx status
    RetryFailed,
}

impl fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            Self::MissingRefreshToken => "no refresh token available",
            Self::RefreshTokenExpired => "refresh token expired",
            Self::RefreshFailed => "token refresh failed",
            Self::RetryFailed => "request failed after token refresh",
        };
        f.write_str(reason)
    }
}

/// Session lifecycle notifications for the application shell
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new access token was stored by a refresh
    Refreshed,
    /// The session is gone; the user must log in again
    Expired(ExpiryReason),
    /// The user logged out explicitly
    LoggedOut,
}

/// Result of pushing a request through the interceptor
enum Dispatched {
    Completed(Response),
    Expired {
        response: Response,
        reason: ExpiryReason,
    },
}

impl Dispatched {
    fn into_response(self) -> Response {
        match self {
            Self::Completed(response) | Self::Expired { response, .. } => response,
        }
    }
}

/// API client for endpoints that require a bearer token
#[derive(Clone)]
pub struct SessionClient {
    client: WebistreamClient,
    store: Arc<dyn CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    refresh_timeout: Duration,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionClient {
    /// Wrap `client`, keeping tokens in `store`
    pub fn new(client: WebistreamClient, store: Arc<dyn CredentialStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            client,
            store,
            coordinator: Arc::new(RefreshCoordinator::new()),
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            events,
        }
    }

    /// Build the transport and session client from loaded configuration
    pub fn from_config(
        config: &ClientConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, ClientError> {
        let client = WebistreamClient::from_config(config)?;
        Ok(Self::new(client, store).with_refresh_timeout(config.refresh_timeout()))
    }

    /// Bound the duration of a single refresh call
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Subscribe to session lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// The unauthenticated client underneath
    pub fn public(&self) -> &WebistreamClient {
        &self.client
    }

    /// Store holding the session tokens
    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Refresh state shared by every clone of this client
    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Create a request builder carrying the currently stored access token
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.request(method, path);
        match self.store.get(ACCESS_TOKEN_KEY) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request, refreshing the access token and retrying once on 401.
    ///
    /// Responses other than 401 are returned untouched. The retry must answer
    /// with a 2xx status; otherwise, or when the session cannot be recovered,
    /// the original 401 response is returned after the credentials have been
    /// cleared and [`SessionEvent::Expired`] sent.
    pub async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, ClientError> {
        Ok(self.dispatch(request).await?.into_response())
    }

    /// [`send`](Self::send) and decode the JSON body. An unrecoverable
    /// session is reported as [`ClientError::SessionExpired`].
    pub async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ClientError> {
        match self.dispatch(request).await? {
            Dispatched::Completed(response) => decode_response(response).await,
            Dispatched::Expired { reason, .. } => Err(ClientError::SessionExpired(reason)),
        }
    }

    async fn dispatch(&self, request: reqwest::RequestBuilder) -> Result<Dispatched, ClientError> {
        let request = request.build()?;
        let snapshot = request.try_clone();

        let response = self.client.http().execute(request).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(Dispatched::Completed(response));
        }

        debug!(url = %response.url(), "Access token rejected");

        let credentials = CredentialPair::load(self.store.as_ref());
        let Some(refresh_token) = credentials.refresh_token.clone() else {
            return Ok(self.expire(response, ExpiryReason::MissingRefreshToken));
        };
        if credentials.refresh_expired_at(Utc::now()) {
            return Ok(self.expire(response, ExpiryReason::RefreshTokenExpired));
        }

        let refreshed = self
            .coordinator
            .begin_or_join(|| self.refresh_attempt(refresh_token))
            .await;
        if !refreshed {
            return Ok(self.expire(response, ExpiryReason::RefreshFailed));
        }

        let Some(mut retry) = snapshot else {
            // streaming bodies cannot be replayed; the refreshed session stays valid
            warn!(url = %response.url(), "Request body cannot be replayed after token refresh");
            return Ok(Dispatched::Completed(response));
        };

        // re-read: the token may have changed while this caller was suspended
        let authorization = self
            .store
            .get(ACCESS_TOKEN_KEY)
            .and_then(|token| HeaderValue::from_str(&format!("Bearer {token}")).ok());
        let Some(mut authorization) = authorization else {
            return Ok(self.expire(response, ExpiryReason::RetryFailed));
        };
        authorization.set_sensitive(true);
        retry.headers_mut().insert(AUTHORIZATION, authorization);

        match self.client.http().execute(retry).await {
            Ok(retried) if retried.status().is_success() => Ok(Dispatched::Completed(retried)),
            Ok(retried) => {
                warn!(status = %retried.status(), "Retry after token refresh rejected");
                Ok(self.expire(response, ExpiryReason::RetryFailed))
            }
            Err(e) => {
                warn!(error = %e, "Retry after token refresh failed");
                Ok(self.expire(response, ExpiryReason::RetryFailed))
            }
        }
    }

    /// Build the refresh attempt run by the coordinator. Resolves `true` once
    /// the new access token is stored.
    fn refresh_attempt(&self, refresh_token: String) -> impl Future<Output = bool> + Send + 'static {
        let client = self.client.clone();
        let store = Arc::clone(&self.store);
        let events = self.events.clone();
        let timeout = self.refresh_timeout;

        async move {
            let tokens = match tokio::time::timeout(timeout, client.refresh_token(&refresh_token)).await {
                Ok(Ok(tokens)) => tokens,
                Ok(Err(e)) => {
                    warn!(error = %e, "Token refresh rejected");
                    return false;
                }
                Err(_) => {
                    warn!(timeout_secs = timeout.as_secs_f64(), "Token refresh timed out");
                    return false;
                }
            };

            let credentials = tokens.to_credentials();
            if credentials.access_token.is_none() {
                warn!("Token refresh response carried no access token");
                return false;
            }
            if let Err(e) = credentials.save(store.as_ref()) {
                warn!(error = %e, "Failed to store refreshed access token");
                return false;
            }

            info!(
                rotated_refresh_token = credentials.refresh_token.is_some(),
                "Access token refreshed"
            );
            let _ = events.send(SessionEvent::Refreshed);
            true
        }
    }

    /// Terminal path: log out, leave a toast for the next start, tell the shell
    fn expire(&self, response: Response, reason: ExpiryReason) -> Dispatched {
        warn!(%reason, url = %response.url(), "Session expired");

        if let Err(e) = clear_credentials(self.store.as_ref()) {
            warn!(error = %e, "Failed to clear stored credentials");
        }
        persist_toast(
            self.store.as_ref(),
            &PersistedToast::error(SESSION_EXPIRED_MESSAGE),
        );
        // no subscribers is fine: nobody is there to navigate
        let _ = self.events.send(SessionEvent::Expired(reason));

        Dispatched::Expired { response, reason }
    }

    /// Clear stored credentials
    pub fn logout(&self) -> Result<(), ClientError> {
        clear_credentials(self.store.as_ref())?;
        info!("Logged out");
        let _ = self.events.send(SessionEvent::LoggedOut);
        Ok(())
    }

    /// Whether an access token is stored
    pub fn is_logged_in(&self) -> bool {
        webistream_core::is_logged_in(self.store.as_ref())
    }
}

//! Request and response bodies of the Webistream API
//!
//! The API speaks camelCase JSON.

use serde::{Deserialize, Serialize};
use webistream_core::CredentialPair;
use webistream_core::credentials::parse_timestamp;

/// Email/password login request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Phone number + one-time password login request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneLoginRequest {
    pub phone_number: String,
    pub otp_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Authorization code returned by an OAuth provider redirect
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthCallbackRequest {
    pub code: String,
}

/// Body of the token refresh call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    pub refresh_token: String,
}

/// Tokens issued by login, OAuth callback and refresh endpoints
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// RFC 3339 timestamp
    #[serde(default)]
    pub refresh_expires_at: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
}

impl TokenResponse {
    /// Access token, if the response carried a non-empty one
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Convert into the stored credential shape. An unparsable expiry is
    /// dropped with a warning.
    pub fn to_credentials(&self) -> CredentialPair {
        let refresh_expires_at = self.refresh_expires_at.as_deref().and_then(|raw| {
            parse_timestamp(raw)
                .inspect_err(|e| tracing::warn!(error = %e, "Ignoring refresh expiry from API"))
                .ok()
        });

        CredentialPair {
            access_token: self.access_token().map(str::to_string),
            refresh_token: self.refresh_token.clone().filter(|t| !t.is_empty()),
            refresh_expires_at,
        }
    }
}

/// Account registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
}

/// User account as returned by the API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Ask for a one-time login code by SMS
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhoneOtpRequest {
    pub phone_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Confirm a phone number with the code it received
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPhoneRequest {
    pub phone_number: String,
    pub otp_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

/// Body of the endpoints keyed by email alone (verification resend, password recovery)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

/// Confirm an email address with the code sent to it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyEmailRequest {
    pub email: String,
    pub otp_code: String,
}

/// Set a new password with the token from the recovery email
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub new_password: String,
    pub token: String,
}

/// Acknowledgement returned by the verification and recovery endpoints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub message: Option<String>,
}

/// Envelope of the user endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserResponse {
    #[serde(default)]
    pub user: Option<User>,
}

//! Classification of authentication error responses into user-facing codes

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

const FALLBACK_MESSAGE: &str = "Something went wrong.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthErrorCode {
    InvalidCredentials,
    UserNotFound,
    UserInactive,
    EmailNotVerified,
    PhoneNotVerified,
    GenericError,
}

impl AuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::UserNotFound => "USER_NOT_FOUND",
            Self::UserInactive => "USER_INACTIVE",
            Self::EmailNotVerified => "EMAIL_NOT_VERIFIED",
            Self::PhoneNotVerified => "PHONE_NOT_VERIFIED",
            Self::GenericError => "GENERIC_ERROR",
        }
    }
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message extracted from an error body plus its classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthErrorInfo {
    pub code: AuthErrorCode,
    pub message: String,
}

impl fmt::Display for AuthErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl AuthErrorInfo {
    /// Classify a raw response body. Non-JSON bodies are used verbatim as the
    /// message when non-empty.
    pub fn from_response_text(body: &str, status_text: Option<&str>) -> Self {
        match serde_json::from_str::<Value>(body) {
            Ok(value) => Self::from_body(&value, status_text),
            Err(_) if !body.trim().is_empty() => Self::classify(body.trim().to_string()),
            Err(_) => Self::from_body(&Value::Null, status_text),
        }
    }

    /// Classify a decoded JSON error body.
    ///
    /// The message is taken from `detail` (string, or the `msg` of its first
    /// element), then `message`, then the status text.
    pub fn from_body(body: &Value, status_text: Option<&str>) -> Self {
        let detail = body.get("detail");

        let message = match detail {
            Some(Value::String(detail)) => Some(detail.clone()),
            Some(Value::Array(items)) if !items.is_empty() => Some(
                items[0]
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or(FALLBACK_MESSAGE)
                    .to_string(),
            ),
            _ => body
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| {
                    status_text
                        .filter(|text| !text.is_empty())
                        .map(str::to_string)
                }),
        }
        .unwrap_or_else(|| FALLBACK_MESSAGE.to_string());

        Self::classify(message)
    }

    fn classify(message: String) -> Self {
        let normalized = message.to_lowercase();
        let mentions = |needle: &str| normalized.contains(needle);

        let code = if mentions("incorrect email or password")
            || mentions("invalid username or password")
        {
            AuthErrorCode::InvalidCredentials
        } else if mentions("not found") {
            AuthErrorCode::UserNotFound
        } else if mentions("inactive") || mentions("disabled") || mentions("user is not active") {
            AuthErrorCode::UserInactive
        } else if mentions("email not verified")
            || (mentions("not verified") && mentions("email"))
            || mentions("verify email")
        {
            AuthErrorCode::EmailNotVerified
        } else if mentions("phone not verified")
            || (mentions("not verified") && mentions("phone"))
            || mentions("verify phone")
        {
            AuthErrorCode::PhoneNotVerified
        } else {
            AuthErrorCode::GenericError
        };

        Self { code, message }
    }
}

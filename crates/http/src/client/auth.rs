//! Authentication API client methods

use super::error::ClientError;
use super::session::SessionClient;
use super::{WebistreamClient, decode_optional_response};
use crate::types::{
    EmailRequest, LoginRequest, Message, OAuthCallbackRequest, PhoneLoginRequest, PhoneOtpRequest,
    RefreshTokenRequest, RegisterRequest, ResetPasswordRequest, TokenResponse, User, UserResponse,
    VerifyEmailRequest, VerifyPhoneRequest,
};
use tracing::info;
use webistream_core::clear_credentials;

impl WebistreamClient {
    /// Exchange email and password for tokens
    pub async fn login_access_token(
        &self,
        request: &LoginRequest,
    ) -> Result<TokenResponse, ClientError> {
        let req = self
            .request(reqwest::Method::POST, "/v1/login/access-token")
            .json(request);
        self.execute(req).await
    }

    /// Exchange a phone number and one-time code for tokens
    pub async fn login_phone(
        &self,
        request: &PhoneLoginRequest,
    ) -> Result<TokenResponse, ClientError> {
        let req = self
            .request(reqwest::Method::POST, "/v1/login/phone")
            .json(request);
        self.execute(req).await
    }

    /// Exchange an OAuth authorization code for tokens
    pub async fn oauth_callback(
        &self,
        provider: &str,
        code: &str,
    ) -> Result<TokenResponse, ClientError> {
        let req = self
            .request(
                reqwest::Method::POST,
                &format!("/v1/oauth/{provider}/callback"),
            )
            .json(&OAuthCallbackRequest {
                code: code.to_string(),
            });
        self.execute(req).await
    }

    /// Create an account
    pub async fn register(&self, request: &RegisterRequest) -> Result<UserResponse, ClientError> {
        let req = self
            .request(reqwest::Method::POST, "/v1/user")
            .json(request);
        self.execute(req).await
    }

    /// Send a one-time login code to `phone_number`
    pub async fn request_phone_otp(
        &self,
        request: &PhoneOtpRequest,
    ) -> Result<Message, ClientError> {
        let req = self
            .request(reqwest::Method::POST, "/v1/user/request-phone-otp")
            .json(request);
        self.acknowledge(req).await
    }

    /// Confirm a phone number with the code it received
    pub async fn verify_phone_otp(
        &self,
        request: &VerifyPhoneRequest,
    ) -> Result<Message, ClientError> {
        let req = self
            .request(reqwest::Method::POST, "/v1/user/verify-phone-otp")
            .json(request);
        self.acknowledge(req).await
    }

    /// Confirm an email address with the code sent to it
    pub async fn verify_email_otp(
        &self,
        request: &VerifyEmailRequest,
    ) -> Result<Message, ClientError> {
        let req = self
            .request(reqwest::Method::POST, "/v1/user/verify-email")
            .json(request);
        self.acknowledge(req).await
    }

    /// Send the email verification code again
    pub async fn resend_email_verification(&self, email: &str) -> Result<Message, ClientError> {
        let req = self
            .request(reqwest::Method::POST, "/v1/user/resend-email")
            .json(&EmailRequest {
                email: email.to_string(),
            });
        self.acknowledge(req).await
    }

    /// Email a password reset link
    pub async fn recover_password(&self, email: &str) -> Result<Message, ClientError> {
        let req = self
            .request(reqwest::Method::POST, "/v1/password-recovery")
            .json(&EmailRequest {
                email: email.to_string(),
            });
        self.acknowledge(req).await
    }

    /// Set a new password using the token from the recovery email
    pub async fn reset_password(
        &self,
        request: &ResetPasswordRequest,
    ) -> Result<Message, ClientError> {
        let req = self
            .request(reqwest::Method::POST, "/v1/reset-password")
            .json(request);
        self.acknowledge(req).await
    }

    async fn acknowledge(&self, request: reqwest::RequestBuilder) -> Result<Message, ClientError> {
        let response = request.send().await?;
        decode_optional_response(response).await
    }

    /// Trade a refresh token for a new access token. Sent without an
    /// `Authorization` header.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenResponse, ClientError> {
        let req = self
            .request(reqwest::Method::POST, "/v1/login/refresh-token")
            .json(&RefreshTokenRequest {
                refresh_token: refresh_token.to_string(),
            });
        self.execute(req).await
    }
}

impl SessionClient {
    /// Sign in with email and password and store the issued tokens
    pub async fn login_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<TokenResponse, ClientError> {
        let tokens = self
            .public()
            .login_access_token(&LoginRequest {
                email: email.to_string(),
                password: password.to_string(),
            })
            .await?;
        self.store_tokens(tokens, "password")
    }

    /// Sign in with a phone number and one-time code and store the issued tokens
    pub async fn login_with_phone(
        &self,
        request: &PhoneLoginRequest,
    ) -> Result<TokenResponse, ClientError> {
        let tokens = self.public().login_phone(request).await?;
        self.store_tokens(tokens, "phone")
    }

    /// Finish an OAuth redirect and store the issued tokens
    pub async fn complete_oauth(
        &self,
        provider: &str,
        code: &str,
    ) -> Result<TokenResponse, ClientError> {
        let tokens = self.public().oauth_callback(provider, code).await?;
        self.store_tokens(tokens, provider)
    }

    /// Fetch the signed-in user
    pub async fn current_user(&self) -> Result<Option<User>, ClientError> {
        let req = self.request(reqwest::Method::GET, "/v1/user");
        let response: UserResponse = self.execute(req).await?;
        Ok(response.user)
    }

    fn store_tokens(&self, tokens: TokenResponse, method: &str) -> Result<TokenResponse, ClientError> {
        let credentials = tokens.to_credentials();
        if credentials.access_token.is_none() {
            return Err(ClientError::InvalidResponse(
                "login response carried no access token".into(),
            ));
        }

        // drop leftovers of a previous session before writing the new pair
        clear_credentials(self.store().as_ref())?;
        credentials.save(self.store().as_ref())?;

        info!(
            method,
            has_refresh_token = credentials.refresh_token.is_some(),
            "Signed in"
        );
        Ok(tokens)
    }
}

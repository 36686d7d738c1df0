// Auth endpoint client
// Login, signup, social login and token refresh

use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

use crate::error::{Result, SessionError};

use super::device::DeviceInfo;
use super::types::{
    token_preview, AuthResponse, LoginRequest, RefreshRequest, SignupRequest, SocialLoginRequest,
};

/// HTTP client for the authentication API
#[derive(Clone)]
pub struct AuthClient {
    client: Client,
    base_url: String,
}

impl AuthClient {
    /// Create a client for `base_url` with a per-request timeout
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/auth/{}", self.base_url, path)
    }

    /// Email/password login
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse> {
        tracing::info!("Logging in as {}...", email);
        self.post("login", &LoginRequest { email, password }).await
    }

    /// Create an account and start a session
    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
    ) -> Result<AuthResponse> {
        tracing::info!("Creating account for {}...", email);
        self.post(
            "signup",
            &SignupRequest {
                email,
                password,
                name,
            },
        )
        .await
    }

    /// Exchange an identity-provider token for a session
    pub async fn social_login(&self, provider: &str, token: &str) -> Result<AuthResponse> {
        tracing::info!("Logging in via {}...", provider);
        self.post("social-login", &SocialLoginRequest { provider, token })
            .await
    }

    /// Mint a new token bundle from a refresh token
    pub async fn refresh(
        &self,
        refresh_token: &str,
        device_info: &DeviceInfo,
    ) -> Result<AuthResponse> {
        tracing::debug!(
            "Refreshing session (refresh token: {})",
            token_preview(refresh_token)
        );
        self.post(
            "refresh",
            &RefreshRequest {
                refresh_token,
                device_info,
            },
        )
        .await
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<AuthResponse> {
        let url = self.endpoint(path);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Failed to send request to {}: {}", url, e);
                SessionError::Network(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::warn!(
                "Auth request failed: url={}, status={}, body={}",
                url,
                status,
                error_text
            );
            return Err(SessionError::from_status(status, &error_text));
        }

        let text = response.text().await?;
        let data: AuthResponse = serde_json::from_str(&text)
            .map_err(|e| SessionError::InvalidResponse(format!("{} ({})", e, path)))?;

        if data.access_token.is_empty() {
            return Err(SessionError::IncompleteTokens("access_token"));
        }
        if data.refresh_token.is_empty() {
            return Err(SessionError::IncompleteTokens("refresh_token"));
        }

        Ok(data)
    }
}

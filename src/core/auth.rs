use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use reqwest::Client;
use serde::Deserialize;
use uuid::Uuid;

use crate::core::errors::ApiError;

/// Boundary to the external identity provider. The rest of the crate only
/// ever sees the resolved user id; bearer tokens do not travel past this
/// module.
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    async fn verify(&self, bearer: &str) -> Result<Uuid, ApiError>;
}

/// Resolves tokens against the provider's userinfo endpoint.
pub struct RemoteAuthVerifier {
    userinfo_url: String,
    client: Client,
}

impl RemoteAuthVerifier {
    pub fn new(userinfo_url: String, timeout: Duration) -> Self {
        Self {
            userinfo_url,
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
struct UserInfo {
    sub: Uuid,
}

#[async_trait]
impl AuthVerifier for RemoteAuthVerifier {
    async fn verify(&self, bearer: &str) -> Result<Uuid, ApiError> {
        let res = self
            .client
            .get(&self.userinfo_url)
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|e| ApiError::ProviderUnavailable(format!("auth provider: {}", e)))?;

        if res.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized);
        }
        if !res.status().is_success() {
            return Err(ApiError::ProviderUnavailable(format!(
                "auth provider returned {}",
                res.status()
            )));
        }

        let info: UserInfo = res.json().await.map_err(|_| ApiError::Unauthorized)?;
        Ok(info.sub)
    }
}

/// Fixed token → user map. Used in tests and local development where no
/// identity provider is running.
#[derive(Default)]
pub struct StaticAuthVerifier {
    tokens: HashMap<String, Uuid>,
}

impl StaticAuthVerifier {
    pub fn new(tokens: HashMap<String, Uuid>) -> Self {
        Self { tokens }
    }

    pub fn with_token(mut self, token: &str, user_id: Uuid) -> Self {
        self.tokens.insert(token.to_string(), user_id);
        self
    }
}

#[async_trait]
impl AuthVerifier for StaticAuthVerifier {
    async fn verify(&self, bearer: &str) -> Result<Uuid, ApiError> {
        self.tokens
            .get(bearer)
            .copied()
            .ok_or(ApiError::Unauthorized)
    }
}

/// Pulls the bearer token out of the Authorization header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::Unauthorized)?;

    value
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::Unauthorized)
}

/// Authenticates the request and returns the acting user's id.
pub async fn require_user(
    headers: &HeaderMap,
    verifier: &Arc<dyn AuthVerifier>,
) -> Result<Uuid, ApiError> {
    let token = bearer_token(headers)?;
    verifier.verify(token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_requires_scheme_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc123"),
        );
        assert_eq!(bearer_token(&headers).unwrap(), "abc123");

        let mut bare = HeaderMap::new();
        bare.insert(header::AUTHORIZATION, HeaderValue::from_static("abc123"));
        assert!(matches!(bearer_token(&bare), Err(ApiError::Unauthorized)));

        assert!(matches!(
            bearer_token(&HeaderMap::new()),
            Err(ApiError::Unauthorized)
        ));
    }

    #[tokio::test]
    async fn static_verifier_resolves_known_tokens_only() {
        let user = Uuid::new_v4();
        let verifier: Arc<dyn AuthVerifier> =
            Arc::new(StaticAuthVerifier::default().with_token("tok", user));

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        assert_eq!(require_user(&headers, &verifier).await.unwrap(), user);

        let mut wrong = HeaderMap::new();
        wrong.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer nope"),
        );
        assert!(matches!(
            require_user(&wrong, &verifier).await,
            Err(ApiError::Unauthorized)
        ));
    }
}

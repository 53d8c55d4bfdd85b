//! Common utilities for the Aria Automation client
//!
//! `HttpClient` owns the reqwest client and the bearer token. The token is
//! obtained from the refresh token on first use and fetched again once when a
//! request comes back 401 (access tokens expire after a few hours).

pub mod query;

use crate::error::VraError;
use crate::models::{ApiErrorBody, AuthToken, LoginRequest};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

/// IaaS API version sent with every request
pub const API_VERSION: &str = "2021-07-15";

/// HTTP client wrapper with bearer authentication
pub struct HttpClient {
    client: Client,
    base_url: String,
    refresh_token: String,
    access_token: RwLock<Option<String>>,
}

impl HttpClient {
    /// Create a new HTTP client wrapper. No request is made until first use.
    pub fn new(client: Client, base_url: String, refresh_token: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            refresh_token,
            access_token: RwLock::new(None),
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path, appending the API version
    pub fn build_url(&self, path: &str) -> String {
        let url = if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        };
        let sep = if url.contains('?') { '&' } else { '?' };
        format!("{url}{sep}apiVersion={API_VERSION}")
    }

    /// Exchange the refresh token for a bearer token and cache it
    pub async fn login(&self) -> Result<String, VraError> {
        let url = format!("{}/iaas/api/login", self.base_url);
        debug!("Logging in to Aria Automation at {}", url);

        let response = self
            .client
            .post(&url)
            .header("Accept", "application/json")
            .json(&LoginRequest {
                refresh_token: self.refresh_token.clone(),
            })
            .send()
            .await
            .map_err(VraError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VraError::Authentication(format!(
                "login failed: {} - {}",
                status,
                error_message(&body)
            )));
        }

        let token: AuthToken = response.json().await.map_err(VraError::Http)?;
        if !token.token_type.eq_ignore_ascii_case("bearer") {
            return Err(VraError::Authentication(format!(
                "unexpected token type {:?}",
                token.token_type
            )));
        }

        *self.access_token.write().await = Some(token.token.clone());
        Ok(token.token)
    }

    async fn bearer(&self) -> Result<String, VraError> {
        if let Some(token) = self.access_token.read().await.as_ref() {
            return Ok(token.clone());
        }
        self.login().await
    }

    /// Send a request, logging in again once if the token was rejected
    async fn execute(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, VraError> {
        let url = self.build_url(path);
        let mut retried = false;
        loop {
            let token = self.bearer().await?;
            debug!("{} {}", method, url);

            let mut request = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(&token)
                .header("Accept", "application/json");
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await.map_err(VraError::Http)?;

            if response.status() == StatusCode::UNAUTHORIZED && !retried {
                debug!("Bearer token rejected, logging in again");
                *self.access_token.write().await = None;
                retried = true;
                continue;
            }
            return check_response(path, response).await;
        }
    }

    /// Make a GET request
    pub async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, VraError> {
        let response = self.execute(Method::GET, path, None).await?;
        response.json().await.map_err(VraError::Http)
    }

    /// Make a POST request
    pub async fn post<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, VraError> {
        debug!("POST {} with body: {}", path, body);
        let response = self.execute(Method::POST, path, Some(body)).await?;
        response.json().await.map_err(VraError::Http)
    }

    /// Make a DELETE request that answers with a JSON body
    pub async fn delete<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, VraError> {
        let response = self.execute(Method::DELETE, path, None).await?;
        response.json().await.map_err(VraError::Http)
    }
}

/// Map non-success responses onto `VraError`
async fn check_response(path: &str, response: Response) -> Result<Response, VraError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(&body);
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            VraError::Authentication(format!("{path}: {status} - {message}"))
        }
        StatusCode::NOT_FOUND => VraError::NotFound(format!("{path}: {message}")),
        s if s.is_server_error() => VraError::Unavailable(format!("{path}: {s} - {message}")),
        s => VraError::Api {
            status: s.as_u16(),
            message,
        },
    })
}

/// Prefer the `message` field of an API error body, fall back to the raw text
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .unwrap_or_else(|| body.chars().take(500).collect())
}

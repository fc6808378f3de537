//! HTTP client for the license server.
//!
//! Every call is a single round-trip with a fixed timeout. Nothing is
//! retried; transport and server failures go straight back to the caller,
//! which owns the grace-period policy.

use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use crate::error::{LicenseError, Result};
use crate::models::License;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
pub struct ValidateRequest<'a> {
    pub license_id: &'a str,
    pub hardware_id: &'a str,
    /// Unix seconds
    pub timestamp: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidateResponse {
    pub valid: bool,
    /// Refreshed license, replacing the held one
    #[serde(default)]
    pub license: Option<License>,
    #[serde(default)]
    pub revoked: bool,
    #[serde(default)]
    pub revoke_reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub server_time: i64,
    /// Unix seconds of the next suggested check
    #[serde(default)]
    pub next_check: i64,
}

#[derive(Debug, Serialize)]
pub struct ActivateRequest<'a> {
    pub license_key: &'a str,
    pub hardware_id: &'a str,
    pub hostname: &'a str,
    pub platform: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActivateResponse {
    pub success: bool,
    #[serde(default)]
    pub license: Option<License>,
    #[serde(default)]
    pub instance_id: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeactivateRequest<'a> {
    pub license_id: &'a str,
    pub instance_id: &'a str,
    pub hardware_id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub customer_id: String,
    /// Current license key of the account, if one has been issued
    #[serde(default)]
    pub license_key: Option<String>,
}

/// Error body shape returned by the license server.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "error")]
    message: String,
}

#[derive(Debug, Clone)]
pub struct LicenseClient {
    http_client: Client,
    base_url: String,
}

impl LicenseClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| LicenseError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST /api/v1/validate - periodic health check of a license.
    pub async fn validate(&self, license_id: &str, hardware_id: &str) -> Result<ValidateResponse> {
        let request = ValidateRequest {
            license_id,
            hardware_id,
            timestamp: Utc::now().timestamp(),
        };
        self.post("/api/v1/validate", &request).await
    }

    /// POST /api/v1/activate - bind this installation to a license.
    pub async fn activate(
        &self,
        license_key: &str,
        hardware_id: &str,
        hostname: &str,
        platform: &str,
    ) -> Result<ActivateResponse> {
        let request = ActivateRequest {
            license_key,
            hardware_id,
            hostname,
            platform,
        };
        self.post("/api/v1/activate", &request).await
    }

    /// POST /api/v1/deactivate - release a hardware binding.
    pub async fn deactivate(
        &self,
        license_id: &str,
        instance_id: &str,
        hardware_id: &str,
    ) -> Result<()> {
        let request = DeactivateRequest {
            license_id,
            instance_id,
            hardware_id,
        };
        let response = self.send("/api/v1/deactivate", &request).await?;
        check_status(response).await.map(|_| ())
    }

    /// POST /api/v1/login - portal login, returns the account's key if any.
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let request = LoginRequest { email, password };
        self.post("/api/v1/login", &request).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let response = self.send(path, body).await?;
        let response = check_status(response).await?;
        response.json::<T>().await.map_err(|e| {
            tracing::error!(path = %path, error = %e, "Failed to parse license server response");
            LicenseError::Network(format!("invalid response from license server: {}", e))
        })
    }

    async fn send<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        self.http_client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(url = %url, error = %e, "License server request failed");
                LicenseError::Network(e.to_string())
            })
    }
}

/// Turn a non-2xx response into [`LicenseError::Server`].
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|b| b.message)
        .unwrap_or(body);

    tracing::warn!(status = %status, message = %message, "License server returned error");
    Err(LicenseError::Server {
        status: status.as_u16(),
        message,
    })
}

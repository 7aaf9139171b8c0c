//! Client for the external safety validator.
//!
//! The validator is an explicitly safety-rejecting collaborator, so its
//! failures block: a 403 is a plain "not allowed", and any transport error
//! or unexpected status surfaces as `Err` for the engine to treat as a
//! blocked turn.

use crate::engine::traits::Validator;
use crate::error::DependencyError;
use crate::types::Credential;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Serialize)]
struct ValidateRequest<'a> {
    text: &'a str,
    iam_token: &'a str,
    folder_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ValidateResponse {
    #[serde(default)]
    is_allowed: bool,
}

/// HTTP validator client.
#[derive(Debug, Clone)]
pub struct ValidatorClient {
    validator_url: String,
    http: reqwest::Client,
    read_timeout: Duration,
}

impl ValidatorClient {
    pub fn new(
        validator_url: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, DependencyError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| DependencyError(format!("http client: {e}")))?;
        Ok(Self {
            validator_url: validator_url.to_string(),
            http,
            read_timeout,
        })
    }
}

#[async_trait]
impl Validator for ValidatorClient {
    async fn validate(
        &self,
        text: &str,
        credential: &Credential,
        tenant: &str,
    ) -> Result<bool, DependencyError> {
        let resp = self
            .http
            .post(&self.validator_url)
            .timeout(self.read_timeout)
            .json(&ValidateRequest {
                text,
                iam_token: &credential.token,
                folder_id: tenant,
            })
            .send()
            .await
            .map_err(|e| DependencyError(format!("validator request: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            let body: ValidateResponse = resp
                .json()
                .await
                .map_err(|e| DependencyError(format!("validator response: {e}")))?;
            return Ok(body.is_allowed);
        }

        if status == reqwest::StatusCode::FORBIDDEN {
            let body = resp.text().await.unwrap_or_default();
            warn!(%body, "validator blocked message");
            return Ok(false);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(DependencyError(format!(
            "validator error ({status}): {body}"
        )))
    }
}

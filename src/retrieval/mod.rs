//! Adapter for the external context search service.
//!
//! The search contract is total: timeouts, bad statuses and malformed bodies
//! all canonicalize to [`NO_CONTEXT`], as does a present-but-empty context
//! field. The engine compares against the sentinel by value; an empty
//! string is *not* the sentinel.

use crate::engine::traits::Retriever;
use crate::error::DependencyError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Canonical "no relevant documents" sentinel.
pub const NO_CONTEXT: &str = "Релевантная информация в документах не найдена.";

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: u32,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    context: String,
}

/// HTTP retrieval client.
#[derive(Debug, Clone)]
pub struct RetrieverClient {
    base_url: String,
    http: reqwest::Client,
    read_timeout: Duration,
}

impl RetrieverClient {
    pub fn new(
        base_url: &str,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self, DependencyError> {
        let http = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| DependencyError(format!("http client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            read_timeout,
        })
    }

    fn search_url(&self) -> String {
        format!("{}/api/rag", self.base_url)
    }
}

#[async_trait]
impl Retriever for RetrieverClient {
    async fn search(&self, query: &str, top_k: u32) -> String {
        let resp = self
            .http
            .post(self.search_url())
            .timeout(self.read_timeout)
            .json(&SearchRequest { query, top_k })
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                warn!("retrieval request failed: {e}");
                return NO_CONTEXT.to_string();
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(%status, %body, "retrieval service error");
            return NO_CONTEXT.to_string();
        }

        match resp.json::<SearchResponse>().await {
            Ok(body) if body.context.is_empty() => NO_CONTEXT.to_string(),
            Ok(body) => body.context,
            Err(e) => {
                warn!("malformed retrieval response: {e}");
                NO_CONTEXT.to_string()
            }
        }
    }

    async fn ping(&self) -> bool {
        match self
            .http
            .get(format!("{}/", self.base_url))
            .timeout(self.read_timeout)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

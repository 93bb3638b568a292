//! Perplexity search via its chat completions endpoint.
//!
//! Perplexity answers with a synthesized reply plus a list of citation URLs.
//! The reply becomes one result under the first citation; the remaining
//! citations are listed at the end of its content.

use super::{RawResult, SearchProvider, api_key_from_env};
use crate::config::SearchConfig;
use crate::error::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

pub const PERPLEXITY_BASE_URL: &str = "https://api.perplexity.ai";
const PERPLEXITY_MODEL: &str = "sonar-pro";

pub struct PerplexitySearch {
    client: Client,
    base_url: String,
    api_key: String,
}

impl PerplexitySearch {
    pub fn new(config: &SearchConfig) -> Result<Self, SearchError> {
        let api_key = api_key_from_env(&config.api_key_env)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| SearchError::Request {
                message: format!("Failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| PERPLEXITY_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
        })
    }

    fn parse_response(body: &Value) -> Result<Vec<RawResult>, SearchError> {
        let answer = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| SearchError::ResponseParse {
                message: "No answer in Perplexity response".to_string(),
            })?;

        let citations: Vec<&str> = body
            .get("citations")
            .and_then(|c| c.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();

        let Some((first, rest)) = citations.split_first() else {
            return Ok(Vec::new());
        };
        if answer.trim().is_empty() {
            return Ok(Vec::new());
        }
        let mut content = answer.to_string();
        if !rest.is_empty() {
            content.push_str("\n\nAlso cited:");
            for url in rest {
                content.push_str("\n- ");
                content.push_str(url);
            }
        }
        Ok(vec![RawResult::new("Perplexity answer", content, *first)])
    }
}

#[async_trait]
impl SearchProvider for PerplexitySearch {
    async fn search(&self, query: &str) -> Result<Vec<RawResult>, SearchError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": PERPLEXITY_MODEL,
            "messages": [
                {"role": "system", "content": "Search the web and provide factual information with sources."},
                {"role": "user", "content": query},
            ],
        });

        debug!(query = %query, "Sending Perplexity search");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SearchError::Request {
                message: format!("Request failed: {}", e),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| SearchError::Request {
            message: format!("Failed to read response body: {}", e),
        })?;
        if !status.is_success() {
            return Err(SearchError::Provider {
                status: status.as_u16(),
                message: text,
            });
        }
        let json: Value = serde_json::from_str(&text).map_err(|e| SearchError::ResponseParse {
            message: format!("Invalid JSON: {}", e),
        })?;
        Self::parse_response(&json)
    }

    fn name(&self) -> &str {
        "perplexity"
    }
}

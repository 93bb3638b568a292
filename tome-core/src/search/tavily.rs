//! Tavily search API client.

use super::{RawResult, SearchProvider, api_key_from_env};
use crate::config::SearchConfig;
use crate::error::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

pub const TAVILY_BASE_URL: &str = "https://api.tavily.com";

pub struct TavilySearch {
    client: Client,
    base_url: String,
    api_key: String,
    max_results: usize,
    include_raw_content: bool,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    raw_content: Option<String>,
}

impl TavilySearch {
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
                .unwrap_or_else(|| TAVILY_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            max_results: config.max_results,
            include_raw_content: config.include_raw_content,
        })
    }

    fn parse_response(body: &str) -> Result<Vec<RawResult>, SearchError> {
        let parsed: TavilyResponse =
            serde_json::from_str(body).map_err(|e| SearchError::ResponseParse {
                message: format!("Invalid Tavily response: {}", e),
            })?;
        Ok(parsed
            .results
            .into_iter()
            .map(|r| RawResult {
                title: r.title,
                content: r.content,
                url: r.url,
                raw_content: r.raw_content,
            })
            .collect())
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(&self, query: &str) -> Result<Vec<RawResult>, SearchError> {
        let url = format!("{}/search", self.base_url);
        let body = json!({
            "query": query,
            "max_results": self.max_results,
            "include_raw_content": self.include_raw_content,
            "topic": "general",
        });

        debug!(query = %query, "Sending Tavily search");

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
        Self::parse_response(&text)
    }

    fn name(&self) -> &str {
        "tavily"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response() {
        let body = r#"{
            "query": "graph databases",
            "results": [
                {"title": "Neo4j", "url": "https://neo4j.com", "content": "A graph DB", "score": 0.9, "raw_content": null},
                {"title": "Dgraph", "url": "https://dgraph.io", "content": "Distributed", "raw_content": "Full text"}
            ]
        }"#;
        let results = TavilySearch::parse_response(body).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Neo4j");
        assert!(results[0].raw_content.is_none());
        assert_eq!(results[1].raw_content.as_deref(), Some("Full text"));
    }

    #[test]
    fn test_parse_response_without_results() {
        assert!(TavilySearch::parse_response("{}").unwrap().is_empty());
        assert!(matches!(
            TavilySearch::parse_response("not json"),
            Err(SearchError::ResponseParse { .. })
        ));
    }
}

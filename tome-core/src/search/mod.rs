//! Web search collaborators.
//!
//! Defines the `SearchProvider` trait, the value records phase tasks exchange
//! (`SearchQuery`, `SearchResult`), result validation and de-duplication, the
//! bounded concurrent fan-out used by the research phases, and the formatting
//! of a validated corpus into the source text handed to the writer model.

pub mod perplexity;
pub mod tavily;

use crate::config::SearchConfig;
use crate::error::SearchError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

pub use perplexity::PerplexitySearch;
pub use tavily::TavilySearch;

/// A search query planned by a phase task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_subtopic: Option<String>,
}

impl SearchQuery {
    pub fn new(query: impl Into<String>, purpose: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            purpose: purpose.into(),
            target_subtopic: None,
        }
    }

    pub fn for_subtopic(mut self, subtopic: impl Into<String>) -> Self {
        self.target_subtopic = Some(subtopic.into());
        self
    }
}

/// A validated search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub content: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_subtopic: Option<String>,
}

/// A result exactly as the provider returned it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawResult {
    pub title: String,
    pub content: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_content: Option<String>,
}

impl RawResult {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            url: url.into(),
            raw_content: None,
        }
    }

    /// A result is usable only when title, content and URL are all non-blank.
    pub fn is_valid(&self) -> bool {
        !self.title.trim().is_empty() && !self.content.trim().is_empty() && !self.url.trim().is_empty()
    }

    /// Validate and convert, tagging the result with the query's subtopic.
    ///
    /// Full page content replaces the snippet when the provider supplied it.
    pub fn into_result(self, target_subtopic: Option<&str>) -> Option<SearchResult> {
        if !self.is_valid() {
            return None;
        }
        let content = match self.raw_content {
            Some(raw) if !raw.trim().is_empty() => raw,
            _ => self.content,
        };
        Some(SearchResult {
            title: self.title.trim().to_string(),
            content: content.trim().to_string(),
            url: self.url.trim().to_string(),
            target_subtopic: target_subtopic.map(str::to_string),
        })
    }
}

/// Trait for web search providers.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run a single query.
    async fn search(&self, query: &str) -> Result<Vec<RawResult>, SearchError>;

    /// Provider name, for logs.
    fn name(&self) -> &str;
}

/// Outcome of fanning a batch of queries out to a provider.
#[derive(Debug, Default)]
pub struct FanOut {
    /// Validated, URL-deduplicated results in query order.
    pub results: Vec<SearchResult>,
    /// Queries whose search call failed, with the error text.
    pub failures: Vec<(String, String)>,
    /// Raw results discarded by validation.
    pub discarded: usize,
}

impl FanOut {
    pub fn all_failed(&self, query_count: usize) -> bool {
        query_count > 0 && self.failures.len() == query_count
    }
}

/// Issue every query concurrently and join on all of them.
///
/// Individual query failures are logged and skipped; the caller decides
/// whether an empty or fully-failed batch is fatal.
pub async fn search_all(provider: &dyn SearchProvider, queries: &[SearchQuery]) -> FanOut {
    let futures: Vec<_> = queries
        .iter()
        .map(|q| async move { (q, provider.search(&q.query).await) })
        .collect();

    let outcomes = futures::future::join_all(futures).await;

    let mut fan_out = FanOut::default();
    let mut validated = Vec::new();
    for (query, outcome) in outcomes {
        match outcome {
            Ok(raw) => {
                let total = raw.len();
                let kept: Vec<SearchResult> = raw
                    .into_iter()
                    .filter_map(|r| r.into_result(query.target_subtopic.as_deref()))
                    .collect();
                fan_out.discarded += total - kept.len();
                validated.extend(kept);
            }
            Err(e) => {
                warn!(
                    provider = provider.name(),
                    query = %query.query,
                    error = %e,
                    "Skipping failed search query"
                );
                fan_out.failures.push((query.query.clone(), e.to_string()));
            }
        }
    }

    fan_out.results = dedupe_by_url(validated);
    debug!(
        provider = provider.name(),
        queries = queries.len(),
        results = fan_out.results.len(),
        discarded = fan_out.discarded,
        "Search fan-out finished"
    );
    fan_out
}

/// Keep the first result for every URL.
pub fn dedupe_by_url(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert(r.url.clone()))
        .collect()
}

/// Render a corpus as numbered source blocks for a writing prompt.
///
/// Each source's content is cut to at most `max_chars` characters.
pub fn format_sources(results: &[SearchResult], max_chars: usize) -> String {
    let mut out = String::from("Sources:\n\n");
    for (i, result) in results.iter().enumerate() {
        out.push_str(&format!("[{}] {}\nURL: {}\n", i + 1, result.title, result.url));
        if let Some(subtopic) = &result.target_subtopic {
            out.push_str(&format!("Subtopic: {}\n", subtopic));
        }
        out.push_str(&format!(
            "Content: {}\n\n",
            truncate_chars(&result.content, max_chars)
        ));
    }
    out
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Create a search provider based on the configuration.
pub fn create_search_provider(
    config: &SearchConfig,
) -> Result<Arc<dyn SearchProvider>, SearchError> {
    match config.provider.as_str() {
        "tavily" => Ok(Arc::new(TavilySearch::new(config)?)),
        "perplexity" => Ok(Arc::new(PerplexitySearch::new(config)?)),
        other => Err(SearchError::UnsupportedProvider {
            name: other.to_string(),
        }),
    }
}

pub(crate) fn api_key_from_env(var: &str) -> Result<String, SearchError> {
    std::env::var(var)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| SearchError::MissingApiKey {
            var: var.to_string(),
        })
}

/// A mock search provider for testing.
///
/// Answers are looked up by exact query text; unknown queries fall back to
/// the default answer, which is empty unless set.
#[derive(Default)]
pub struct MockSearchProvider {
    answers: Mutex<HashMap<String, Vec<RawResult>>>,
    failing: Mutex<HashSet<String>>,
    default_answer: Mutex<Vec<RawResult>>,
    calls: Mutex<Vec<String>>,
}

impl MockSearchProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every query not otherwise configured with these results.
    pub fn with_default(results: Vec<RawResult>) -> Self {
        let mock = Self::new();
        *lock(&mock.default_answer) = results;
        mock
    }

    pub fn set_answer(&self, query: impl Into<String>, results: Vec<RawResult>) {
        lock(&self.answers).insert(query.into(), results);
    }

    pub fn set_default(&self, results: Vec<RawResult>) {
        *lock(&self.default_answer) = results;
    }

    /// Make the given query fail with a provider error.
    pub fn fail_query(&self, query: impl Into<String>) {
        lock(&self.failing).insert(query.into());
    }

    /// Queries received so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl SearchProvider for MockSearchProvider {
    async fn search(&self, query: &str) -> Result<Vec<RawResult>, SearchError> {
        lock(&self.calls).push(query.to_string());
        if lock(&self.failing).contains(query) {
            return Err(SearchError::Provider {
                status: 503,
                message: format!("mock failure for '{}'", query),
            });
        }
        Ok(lock(&self.answers)
            .get(query)
            .cloned()
            .unwrap_or_else(|| lock(&self.default_answer).clone()))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn result(title: &str, url: &str) -> SearchResult {
        SearchResult {
            title: title.into(),
            content: "body".into(),
            url: url.into(),
            target_subtopic: None,
        }
    }

    #[test]
    fn test_raw_result_validation_trims() {
        assert!(RawResult::new("t", "c", "https://a").is_valid());
        assert!(!RawResult::new("  ", "c", "https://a").is_valid());
        assert!(!RawResult::new("t", "\n\t", "https://a").is_valid());
        assert!(!RawResult::new("t", "c", " ").is_valid());
    }

    #[test]
    fn test_into_result_prefers_raw_content() {
        let mut raw = RawResult::new(" Title ", "snippet", "https://a ");
        raw.raw_content = Some("full page".into());
        let converted = raw.into_result(Some("Basics")).unwrap();
        assert_eq!(converted.title, "Title");
        assert_eq!(converted.url, "https://a");
        assert_eq!(converted.content, "full page");
        assert_eq!(converted.target_subtopic.as_deref(), Some("Basics"));
    }

    #[test]
    fn test_dedupe_by_url_keeps_first() {
        let deduped = dedupe_by_url(vec![
            result("one", "https://a"),
            result("two", "https://b"),
            result("three", "https://a"),
        ]);
        let titles: Vec<_> = deduped.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["one", "two"]);
    }

    #[test]
    fn test_format_sources_truncates_content() {
        let mut r = result("Graphs", "https://g");
        r.content = "abcdefghij".into();
        r.target_subtopic = Some("Storage".into());
        let text = format_sources(&[r], 4);
        assert!(text.contains("[1] Graphs"));
        assert!(text.contains("URL: https://g"));
        assert!(text.contains("Subtopic: Storage"));
        assert!(text.contains("Content: abcd\n"));
        assert!(!text.contains("abcde"));
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }

    #[tokio::test]
    async fn test_search_all_skips_failures_and_invalid() {
        let mock = MockSearchProvider::new();
        mock.set_answer(
            "q1",
            vec![
                RawResult::new("A", "a", "https://a"),
                RawResult::new("", "blank title", "https://x"),
            ],
        );
        mock.set_answer(
            "q2",
            vec![
                RawResult::new("A again", "a", "https://a"),
                RawResult::new("B", "b", "https://b"),
            ],
        );
        mock.fail_query("q3");

        let queries = vec![
            SearchQuery::new("q1", "p"),
            SearchQuery::new("q2", "p").for_subtopic("Second"),
            SearchQuery::new("q3", "p"),
        ];
        let fan_out = search_all(&mock, &queries).await;

        let urls: Vec<_> = fan_out.results.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a", "https://b"]);
        assert_eq!(fan_out.results[1].target_subtopic.as_deref(), Some("Second"));
        assert_eq!(fan_out.discarded, 1);
        assert_eq!(fan_out.failures.len(), 1);
        assert!(!fan_out.all_failed(queries.len()));
        assert_eq!(mock.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_search_all_every_query_failed() {
        let mock = MockSearchProvider::new();
        mock.fail_query("only");
        let queries = vec![SearchQuery::new("only", "p")];
        let fan_out = search_all(&mock, &queries).await;
        assert!(fan_out.results.is_empty());
        assert!(fan_out.all_failed(1));
    }

    #[test]
    fn test_create_search_provider_unknown() {
        let config = SearchConfig {
            provider: "bing".into(),
            ..Default::default()
        };
        assert!(matches!(
            create_search_provider(&config),
            Err(SearchError::UnsupportedProvider { .. })
        ));
    }

    #[test]
    fn test_create_search_provider_missing_key() {
        // SAFETY: test-only env var manipulation
        unsafe { std::env::remove_var("TOME_TEST_TAVILY_MISSING") };
        let config = SearchConfig {
            api_key_env: "TOME_TEST_TAVILY_MISSING".into(),
            ..Default::default()
        };
        match create_search_provider(&config) {
            Err(SearchError::MissingApiKey { var }) => assert_eq!(var, "TOME_TEST_TAVILY_MISSING"),
            Err(other) => panic!("Expected MissingApiKey, got {:?}", other),
            Ok(_) => panic!("Expected an error"),
        }
    }
}

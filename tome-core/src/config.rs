//! Configuration system for Tome.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from the user config directory and/or `.tome/config.toml`
//! in the workspace directory.

use crate::error::{ConfigError, RequestError};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for Tome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomeConfig {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub research: ResearchConfig,
    pub storage: StorageConfig,
}

/// Configuration for the language-model provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "openai", "groq", or "openai-compatible" with a base URL.
    pub provider: String,
    /// Model used for query generation and chapter writing.
    pub model: String,
    /// Model used for chapter planning. Falls back to `model` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planner_model: Option<String>,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override for the API endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum tokens to generate in a response.
    pub max_tokens: usize,
    /// Default temperature for generation.
    pub temperature: f32,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            planner_model: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            max_tokens: 8192,
            temperature: 0.4,
            request_timeout_secs: 300,
        }
    }
}

impl LlmConfig {
    /// The model the planning phase should use.
    pub fn planner_model(&self) -> &str {
        self.planner_model.as_deref().unwrap_or(&self.model)
    }
}

/// Configuration for the web search provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Provider name: "tavily" or "perplexity".
    pub provider: String,
    /// Environment variable name containing the API key.
    pub api_key_env: String,
    /// Optional base URL override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Maximum results requested per query.
    pub max_results: usize,
    /// Ask the provider for full page content when it supports it.
    pub include_raw_content: bool,
    /// Per-request HTTP timeout.
    pub request_timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            provider: "tavily".to_string(),
            api_key_env: "TAVILY_API_KEY".to_string(),
            base_url: None,
            max_results: 5,
            include_raw_content: true,
            request_timeout_secs: 30,
        }
    }
}

/// Shape of the generated report and the research fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchConfig {
    /// Chapter count used when a request does not specify one.
    pub default_chapter_count: usize,
    /// Upper bound accepted for a requested chapter count.
    pub max_chapter_count: usize,
    /// Number of subtopics every planned chapter must carry.
    pub subtopics_per_chapter: usize,
    /// Search queries issued during the initial exploratory search.
    pub initial_query_count: usize,
    /// Upper bound on search queries issued per chapter.
    pub queries_per_chapter: usize,
    /// Characters of each source kept in the writing corpus.
    pub max_source_chars: usize,
    /// Guidance on how each chapter should be organized.
    pub report_structure: String,
}

pub const DEFAULT_REPORT_STRUCTURE: &str = "Each chapter of the report should:
1. Focus on one well-scoped area of the main subject
2. Break that area into exactly the requested number of subtopics, in a logical learning order
3. Give every subtopic a clear title, a one-sentence description, detailed content, and the sources it relies on";

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            default_chapter_count: 6,
            max_chapter_count: 12,
            subtopics_per_chapter: 6,
            initial_query_count: 2,
            queries_per_chapter: 6,
            max_source_chars: 4000,
            report_structure: DEFAULT_REPORT_STRUCTURE.to_string(),
        }
    }
}

impl ResearchConfig {
    /// Resolve and bound-check the requested chapter count.
    pub fn resolve_chapter_count(&self, requested: Option<usize>) -> Result<usize, RequestError> {
        let count = requested.unwrap_or(self.default_chapter_count);
        if count == 0 || count > self.max_chapter_count {
            return Err(RequestError::ChapterCountOutOfRange {
                count,
                max: self.max_chapter_count,
            });
        }
        Ok(count)
    }

    /// Reject configurations the phase tasks cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subtopics_per_chapter == 0 {
            return Err(ConfigError::Invalid {
                message: "research.subtopics_per_chapter must be at least 1".into(),
            });
        }
        if self.initial_query_count == 0 || self.queries_per_chapter == 0 {
            return Err(ConfigError::Invalid {
                message: "research query counts must be at least 1".into(),
            });
        }
        if self.default_chapter_count == 0 || self.default_chapter_count > self.max_chapter_count
        {
            return Err(ConfigError::Invalid {
                message: format!(
                    "research.default_chapter_count must be within 1..={}",
                    self.max_chapter_count
                ),
            });
        }
        Ok(())
    }
}

/// Where sessions and their event logs are stored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory. Defaults to the platform data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Directory holding one JSON snapshot and one event log per session.
    pub fn sessions_dir(&self) -> PathBuf {
        let base = self.data_dir.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("dev", "tome", "tome")
                .map(|d| d.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".tome"))
        });
        base.join("sessions")
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `TOME_`)
/// 3. Workspace-local config (`.tome/config.toml`)
/// 4. User config (`~/.config/tome/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&TomeConfig>,
) -> Result<TomeConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(TomeConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "tome", "tome") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(".tome").join("config.toml");
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // TOME_LLM__MODEL, TOME_RESEARCH__SUBTOPICS_PER_CHAPTER, ...
    figment = figment.merge(Env::prefixed("TOME_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Write a default `.tome/config.toml` into the workspace unless one exists.
///
/// Returns the config path and whether it was newly created.
pub fn init_workspace_config(workspace: &Path) -> anyhow::Result<(PathBuf, bool)> {
    let config_dir = workspace.join(".tome");
    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        return Ok((config_path, false));
    }
    std::fs::create_dir_all(&config_dir)?;
    let content = toml::to_string_pretty(&TomeConfig::default())?;
    std::fs::write(&config_path, content)?;
    Ok((config_path, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TomeConfig::default();
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.search.provider, "tavily");
        assert_eq!(config.research.default_chapter_count, 6);
        assert_eq!(config.research.subtopics_per_chapter, 6);
        assert_eq!(config.research.initial_query_count, 2);
        assert!(config.storage.data_dir.is_none());
    }

    #[test]
    fn test_planner_model_falls_back() {
        let mut llm = LlmConfig::default();
        assert_eq!(llm.planner_model(), "gpt-4o-mini");
        llm.planner_model = Some("o3-mini".into());
        assert_eq!(llm.planner_model(), "o3-mini");
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = TomeConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: TomeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized.llm.model, config.llm.model);
        assert_eq!(
            deserialized.research.max_source_chars,
            config.research.max_source_chars
        );
    }

    #[test]
    fn test_load_config_defaults() {
        let config = load_config(None, None).unwrap();
        assert_eq!(config.research.max_chapter_count, 12);
    }

    #[test]
    fn test_load_config_with_overrides() {
        let mut overrides = TomeConfig::default();
        overrides.llm.model = "llama-3.3-70b".to_string();
        overrides.research.subtopics_per_chapter = 4;

        let config = load_config(None, Some(&overrides)).unwrap();
        assert_eq!(config.llm.model, "llama-3.3-70b");
        assert_eq!(config.research.subtopics_per_chapter, 4);
    }

    #[test]
    fn test_load_config_from_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let tome_dir = dir.path().join(".tome");
        std::fs::create_dir_all(&tome_dir).unwrap();
        std::fs::write(
            tome_dir.join("config.toml"),
            r#"
[search]
provider = "perplexity"
api_key_env = "PERPLEXITY_API_KEY"
max_results = 3
include_raw_content = false
request_timeout_secs = 10

[research]
default_chapter_count = 3
max_chapter_count = 8
subtopics_per_chapter = 6
initial_query_count = 2
queries_per_chapter = 4
max_source_chars = 2000
report_structure = "short"
"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.search.provider, "perplexity");
        assert_eq!(config.research.default_chapter_count, 3);
        assert_eq!(config.research.queries_per_chapter, 4);
        assert_eq!(config.llm.provider, "openai");
    }

    #[test]
    fn test_resolve_chapter_count() {
        let research = ResearchConfig::default();
        assert_eq!(research.resolve_chapter_count(None).unwrap(), 6);
        assert_eq!(research.resolve_chapter_count(Some(3)).unwrap(), 3);
        assert!(matches!(
            research.resolve_chapter_count(Some(0)),
            Err(RequestError::ChapterCountOutOfRange { count: 0, .. })
        ));
        assert!(research.resolve_chapter_count(Some(13)).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_subtopics() {
        let research = ResearchConfig {
            subtopics_per_chapter: 0,
            ..Default::default()
        };
        assert!(research.validate().is_err());
        assert!(ResearchConfig::default().validate().is_ok());
    }

    #[test]
    fn test_init_workspace_config_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (path, created) = init_workspace_config(dir.path()).unwrap();
        assert!(created);
        assert!(path.exists());
        let (_, created_again) = init_workspace_config(dir.path()).unwrap();
        assert!(!created_again);
    }

    #[test]
    fn test_sessions_dir_uses_data_dir() {
        let storage = StorageConfig {
            data_dir: Some(PathBuf::from("/var/lib/tome")),
        };
        assert_eq!(storage.sessions_dir(), PathBuf::from("/var/lib/tome/sessions"));
    }
}

//! Error types for the Tome core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the model client, search client, phase tasks, session state,
//! persistence, configuration, and session-start validation.

use crate::research::Phase;
use std::path::PathBuf;
use uuid::Uuid;

/// Top-level error type for the Tome core library.
#[derive(Debug, thiserror::Error)]
pub enum TomeError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid request: {0}")]
    Request(#[from] RequestError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from language-model provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("Provider returned HTTP {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Unsupported provider: {name}")]
    UnsupportedProvider { name: String },
}

/// Errors from web search provider interactions.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search request failed: {message}")]
    Request { message: String },

    #[error("Search provider returned HTTP {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Search response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Search API key not set: env var '{var}'")]
    MissingApiKey { var: String },

    #[error("Unsupported search provider: {name}")]
    UnsupportedProvider { name: String },
}

/// Failures inside a single phase task. Every variant halts the session.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Model call failed: {0}")]
    Model(#[from] LlmError),

    #[error("Model output did not match the expected shape: {message}")]
    Schema { message: String },

    #[error("No valid search results for {phase}")]
    NoResults { phase: Phase },

    #[error("Every search query failed: {message}")]
    Search { message: String },

    #[error(transparent)]
    State(#[from] StateError),
}

impl TaskError {
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }
}

/// Errors raised by the session state store and the phase sequencer.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Unknown chapter: {title}")]
    UnknownChapter { title: String },

    #[error("State invariant violated: {message}")]
    InvariantViolation { message: String },

    #[error("Session is complete; {phase} result rejected")]
    SessionTerminal { phase: Phase },
}

impl StateError {
    pub fn violation(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }
}

/// Errors from the persistence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Session not found: {id}")]
    NotFound { id: Uuid },

    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from the configuration system.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Configuration parse error: {message}")]
    ParseError { message: String },
}

/// Rejections of a session-start request.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Subject must not be empty")]
    EmptySubject,

    #[error("Chapter count {count} out of range 1..={max}")]
    ChapterCountOutOfRange { count: usize, max: usize },
}

/// A type alias for results using the top-level `TomeError`.
pub type Result<T> = std::result::Result<T, TomeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_llm_provider() {
        let err = TomeError::Llm(LlmError::Provider {
            status: 503,
            message: "overloaded".into(),
        });
        assert_eq!(
            err.to_string(),
            "LLM error: Provider returned HTTP 503: overloaded"
        );
    }

    #[test]
    fn test_task_error_no_results_names_phase() {
        let err = TaskError::NoResults {
            phase: Phase::ChapterResearch,
        };
        assert_eq!(err.to_string(), "No valid search results for chapter research");
    }

    #[test]
    fn test_task_error_from_llm() {
        let err: TaskError = LlmError::AuthFailed {
            provider: "openai".into(),
        }
        .into();
        assert!(matches!(err, TaskError::Model(LlmError::AuthFailed { .. })));
    }

    #[test]
    fn test_state_error_unknown_chapter() {
        let err = StateError::UnknownChapter {
            title: "Intro".into(),
        };
        assert_eq!(err.to_string(), "Unknown chapter: Intro");
        let wrapped: TomeError = err.into();
        assert!(matches!(wrapped, TomeError::State(_)));
    }

    #[test]
    fn test_request_error_range() {
        let err = RequestError::ChapterCountOutOfRange { count: 40, max: 12 };
        assert_eq!(err.to_string(), "Chapter count 40 out of range 1..=12");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: TomeError = io_err.into();
        assert!(matches!(err, TomeError::Io(_)));
    }
}

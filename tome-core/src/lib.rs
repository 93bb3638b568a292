//! # Tome Core
//!
//! Core library for Tome, a multi-chapter research report generator.
//! Provides the research session state machine (store, sequencer, progress
//! projector, runner), the phase tasks, and their collaborators: the LLM
//! interface (brain), web search, session persistence, and configuration.

pub mod brain;
pub mod config;
pub mod error;
pub mod persistence;
pub mod providers;
pub mod research;
pub mod search;
pub mod types;

// Re-export commonly used types at the crate root.
pub use brain::{Brain, LlmProvider, MockLlmProvider};
pub use config::{TomeConfig, load_config};
pub use error::{Result, TomeError};
pub use persistence::{FileSessionStore, MemorySessionStore, SessionPersistence};
pub use research::{
    Phase, PhaseResult, Progress, ResearchEngine, ResearchEvent, ResearchSession, RunStatus,
    SessionHandle, StartRequest,
};
pub use search::{MockSearchProvider, RawResult, SearchProvider, SearchQuery, SearchResult};
pub use types::{CompletionRequest, CompletionResponse, Message, Role, TokenUsage};

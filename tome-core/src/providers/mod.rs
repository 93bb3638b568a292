//! LLM provider implementations.
//!
//! Every supported provider speaks the OpenAI chat completions format:
//! - `openai` against api.openai.com
//! - `groq` against Groq's OpenAI-compatible endpoint
//! - anything else against the configured `base_url`
//!
//! Use `create_provider()` to instantiate the appropriate provider based on config.

pub mod openai_compat;

use crate::brain::LlmProvider;
use crate::config::LlmConfig;
use crate::error::LlmError;
use std::sync::Arc;

pub use openai_compat::OpenAiCompatibleProvider;

/// Create an LLM provider based on the configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let default_base_url = match config.provider.as_str() {
        "openai" => openai_compat::OPENAI_BASE_URL,
        "groq" => openai_compat::GROQ_BASE_URL,
        other => {
            if config.base_url.is_none() {
                return Err(LlmError::UnsupportedProvider {
                    name: other.to_string(),
                });
            }
            ""
        }
    };
    tracing::debug!(provider = %config.provider, model = %config.model, "Creating LLM provider");
    Ok(Arc::new(OpenAiCompatibleProvider::new(
        config,
        default_base_url,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(provider: &str, key_env: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.to_string(),
            model: "test-model".to_string(),
            api_key_env: key_env.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_provider_openai() {
        // SAFETY: test-only env var manipulation
        unsafe { std::env::set_var("TOME_TEST_OPENAI_API_KEY", "test-key-123") };
        let provider = create_provider(&test_config("openai", "TOME_TEST_OPENAI_API_KEY")).unwrap();
        assert_eq!(provider.model_name(), "test-model");
    }

    #[test]
    fn test_create_provider_groq() {
        // SAFETY: test-only env var manipulation
        unsafe { std::env::set_var("TOME_TEST_GROQ_API_KEY", "gsk-test") };
        let provider = create_provider(&test_config("groq", "TOME_TEST_GROQ_API_KEY")).unwrap();
        assert_eq!(provider.model_name(), "test-model");
    }

    #[test]
    fn test_create_provider_unknown_without_base_url() {
        let result = create_provider(&test_config("mystery", "TOME_TEST_UNUSED"));
        match result {
            Err(LlmError::UnsupportedProvider { name }) => assert_eq!(name, "mystery"),
            Err(other) => panic!("Expected UnsupportedProvider, got {:?}", other),
            Ok(_) => panic!("Expected an error"),
        }
    }

    #[test]
    fn test_create_provider_custom_base_url() {
        let mut config = test_config("vllm", "TOME_TEST_VLLM_KEY");
        config.base_url = Some("http://127.0.0.1:8000/v1".to_string());
        assert!(create_provider(&config).is_ok());
    }

    #[test]
    fn test_create_provider_missing_key() {
        // SAFETY: test-only env var manipulation
        unsafe { std::env::remove_var("TOME_NONEXISTENT_KEY") };
        let result = create_provider(&test_config("openai", "TOME_NONEXISTENT_KEY"));
        match result {
            Err(LlmError::AuthFailed { provider }) => {
                assert!(provider.contains("TOME_NONEXISTENT_KEY"));
            }
            Err(other) => panic!("Expected AuthFailed, got {:?}", other),
            Ok(_) => panic!("Expected an error"),
        }
    }
}

//! LLM integration.
//!
//! The executor talks to any [`LlmProvider`]; [`AnthropicProvider`] is the
//! bundled HTTP implementation of the Messages API.

pub mod anthropic;
pub mod provider;
pub mod reasoning;

pub use anthropic::AnthropicProvider;
pub use provider::*;
pub use reasoning::{Reasoning, RespondOutput, RespondResult};

use std::sync::Arc;

use crate::error::ConfigError;

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: secrecy::SecretString,
    pub model: String,
    /// Custom API endpoint; the public one when `None`.
    pub base_url: Option<String>,
}

impl LlmConfig {
    /// Read `ANTHROPIC_API_KEY` and optional `ANTHROPIC_BASE_URL`.
    pub fn from_env(model: impl Into<String>) -> Result<Self, ConfigError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".to_string()))?;
        Ok(Self {
            api_key: secrecy::SecretString::from(api_key),
            model: model.into(),
            base_url: std::env::var("ANTHROPIC_BASE_URL").ok(),
        })
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Arc<dyn LlmProvider> {
    tracing::info!("Using Anthropic (model: {})", config.model);
    match &config.base_url {
        Some(base) => Arc::new(AnthropicProvider::with_base_url(
            config.api_key.clone(),
            &config.model,
            base,
        )),
        None => Arc::new(AnthropicProvider::new(config.api_key.clone(), &config.model)),
    }
}

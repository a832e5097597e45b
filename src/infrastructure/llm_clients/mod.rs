pub mod gemini;

use crate::domain::error::Result;
use crate::domain::llm_config::LLMConfig;
use async_trait::async_trait;

pub use gemini::GeminiClient;

/// A single text-generation call. Implementations report a transient
/// "service overloaded" condition as `AppError::LLMOverloaded` so callers can
/// retry it; every other failure is `AppError::LLMError`.
#[async_trait]
pub trait LLMClient {
    async fn generate(&self, config: &LLMConfig, system: &str, user: &str) -> Result<String>;
}

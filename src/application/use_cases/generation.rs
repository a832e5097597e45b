use super::retry::{retry_with_backoff, RetryPolicy};
use crate::domain::error::{AppError, Result};
use crate::domain::llm_config::LLMConfig;
use crate::infrastructure::llm_clients::LLMClient;
use crate::infrastructure::response::clean_llm_response;
use std::sync::Arc;

/// Prompt in, text out. Every call goes through the retry policy.
pub struct GenerationAdapter {
    llm_client: Arc<dyn LLMClient + Send + Sync>,
    config: LLMConfig,
    retry: RetryPolicy,
}

impl GenerationAdapter {
    /// Fails with a configuration error when no API key is available.
    pub fn new(
        llm_client: Arc<dyn LLMClient + Send + Sync>,
        config: LLMConfig,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let has_key = config
            .api_key
            .as_deref()
            .map(|key| !key.trim().is_empty())
            .unwrap_or(false);
        if !has_key {
            return Err(AppError::ConfigurationError(
                "GEMINI_API_KEY is not set. Add it to your environment or EventScribe.toml."
                    .to_string(),
            ));
        }

        Ok(Self {
            llm_client,
            config,
            retry,
        })
    }

    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let raw = retry_with_backoff(&self.retry, AppError::is_overloaded, || {
            self.llm_client.generate(&self.config, "", prompt)
        })
        .await?;

        let text = clean_llm_response(&raw);
        if text.is_empty() {
            return Err(AppError::LLMError("Model returned an empty response".to_string()));
        }
        Ok(text)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned responses in order and records every prompt it receives.
    pub(crate) struct ScriptedLLM {
        responses: Mutex<VecDeque<Result<String>>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedLLM {
        pub(crate) fn new(responses: Vec<Result<String>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LLMClient for ScriptedLLM {
        async fn generate(&self, _config: &LLMConfig, _system: &str, user: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(user.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(AppError::LLMError("no scripted response left".to_string())))
        }
    }

    pub(crate) fn test_config() -> LLMConfig {
        LLMConfig {
            api_key: Some("test-key".to_string()),
            ..LLMConfig::default()
        }
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let llm = Arc::new(ScriptedLLM::new(vec![]));
        let result = GenerationAdapter::new(llm, LLMConfig::default(), RetryPolicy::default());
        assert!(matches!(result, Err(AppError::ConfigurationError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generate_retries_overload_and_cleans_output() {
        let llm = Arc::new(ScriptedLLM::new(vec![
            Err(AppError::LLMOverloaded("503".to_string())),
            Ok("<think>plan</think>\n  Register today!  ".to_string()),
        ]));
        let adapter =
            GenerationAdapter::new(llm.clone(), test_config(), RetryPolicy::default()).unwrap();

        let text = adapter.generate("Write it").await.unwrap();

        assert_eq!(text, "Register today!");
        assert_eq!(llm.prompts(), vec!["Write it", "Write it"]);
    }

    #[tokio::test]
    async fn test_blank_output_is_an_error() {
        let llm = Arc::new(ScriptedLLM::new(vec![Ok("   ".to_string())]));
        let adapter = GenerationAdapter::new(llm, test_config(), RetryPolicy::default()).unwrap();

        assert!(matches!(
            adapter.generate("Write it").await,
            Err(AppError::LLMError(_))
        ));
    }
}

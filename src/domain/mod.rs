pub mod error;
pub mod event_context;
pub mod llm_config;

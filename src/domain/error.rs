use crate::domain::event_context::PipelineStage;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize)]
pub enum AppError {
    Internal(String),
    ValidationError(String),
    ParseError(String),
    ConfigurationError(String),
    ConnectionError(String),
    SchemaUnavailable(String),
    PlanningError(String),
    QueryError(String),
    NoRelevantData(String),
    LLMError(String),
    LLMOverloaded(String),
    GenerationExhausted(String),
    SecurityError(String),
    IoError(String),
    PipelineFailed {
        stage: PipelineStage,
        cause: Box<AppError>,
    },
}

impl AppError {
    /// Stable identifier used in HTTP error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "internal",
            AppError::ValidationError(_) => "validation",
            AppError::ParseError(_) => "parse",
            AppError::ConfigurationError(_) => "configuration",
            AppError::ConnectionError(_) => "connection",
            AppError::SchemaUnavailable(_) => "schema_unavailable",
            AppError::PlanningError(_) => "planning",
            AppError::QueryError(_) => "query",
            AppError::NoRelevantData(_) => "no_relevant_data",
            AppError::LLMError(_) => "generation",
            AppError::LLMOverloaded(_) => "generation_overloaded",
            AppError::GenerationExhausted(_) => "generation_exhausted",
            AppError::SecurityError(_) => "security",
            AppError::IoError(_) => "io",
            AppError::PipelineFailed { cause, .. } => cause.kind(),
        }
    }

    /// The error a pipeline failure wraps, or `self` for every other variant.
    pub fn root_cause(&self) -> &AppError {
        match self {
            AppError::PipelineFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }

    pub fn failed_stage(&self) -> Option<PipelineStage> {
        match self {
            AppError::PipelineFailed { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Message without the variant prefix, suitable for showing to an end user.
    pub fn reason(&self) -> &str {
        match self {
            AppError::Internal(msg)
            | AppError::ValidationError(msg)
            | AppError::ParseError(msg)
            | AppError::ConfigurationError(msg)
            | AppError::ConnectionError(msg)
            | AppError::SchemaUnavailable(msg)
            | AppError::PlanningError(msg)
            | AppError::QueryError(msg)
            | AppError::NoRelevantData(msg)
            | AppError::LLMError(msg)
            | AppError::LLMOverloaded(msg)
            | AppError::GenerationExhausted(msg)
            | AppError::SecurityError(msg)
            | AppError::IoError(msg) => msg,
            AppError::PipelineFailed { cause, .. } => cause.reason(),
        }
    }

    pub fn is_overloaded(&self) -> bool {
        matches!(self, AppError::LLMOverloaded(_))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::ParseError(msg) => write!(f, "Parse error: {}", msg),
            AppError::ConfigurationError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ConnectionError(msg) => write!(f, "Connection error: {}", msg),
            AppError::SchemaUnavailable(msg) => write!(f, "Schema unavailable: {}", msg),
            AppError::PlanningError(msg) => write!(f, "Planning error: {}", msg),
            AppError::QueryError(msg) => write!(f, "Query error: {}", msg),
            AppError::NoRelevantData(msg) => write!(f, "No relevant data: {}", msg),
            AppError::LLMError(msg) => write!(f, "LLM error: {}", msg),
            AppError::LLMOverloaded(msg) => write!(f, "LLM overloaded: {}", msg),
            AppError::GenerationExhausted(msg) => write!(f, "Generation failed: {}", msg),
            AppError::SecurityError(msg) => write!(f, "Security error: {}", msg),
            AppError::IoError(msg) => write!(f, "IO error: {}", msg),
            AppError::PipelineFailed { stage, cause } => {
                write!(f, "Pipeline failed while {}: {}", stage.describe(), cause)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_failure_keeps_original_message() {
        let err = AppError::PipelineFailed {
            stage: PipelineStage::Planned,
            cause: Box::new(AppError::PlanningError(
                "AI failed to generate valid JSON for SQL queries.".to_string(),
            )),
        };

        assert_eq!(err.kind(), "planning");
        assert_eq!(
            err.reason(),
            "AI failed to generate valid JSON for SQL queries."
        );
        assert_eq!(err.failed_stage(), Some(PipelineStage::Planned));
        assert!(err.to_string().contains("planning SQL queries"));
        assert!(matches!(err.root_cause(), AppError::PlanningError(_)));
    }

    #[test]
    fn test_only_overloaded_is_retryable() {
        assert!(AppError::LLMOverloaded("503".to_string()).is_overloaded());
        assert!(!AppError::LLMError("400".to_string()).is_overloaded());
        assert!(!AppError::GenerationExhausted("done".to_string()).is_overloaded());
    }
}

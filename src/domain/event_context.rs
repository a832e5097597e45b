use crate::domain::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

/// One row returned by the query executor: column name to scalar value.
pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(transparent)]
pub struct UserRequest {
    #[validate(length(min = 1, max = 4096))]
    text: String,
}

impl UserRequest {
    pub fn new(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(AppError::ValidationError("Prompt is required".to_string()));
        }
        let request = Self { text };
        request
            .validate()
            .map_err(|e| AppError::ValidationError(e.to_string()))?;
        Ok(request)
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaDescription(String);

impl SchemaDescription {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Ordered SQL statements proposed by the planner. Nothing here is trusted yet.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryPlan(Vec<String>);

impl QueryPlan {
    pub fn new(statements: Vec<String>) -> Self {
        Self(statements)
    }

    pub fn statements(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Result sets keyed by the table a statement reads from.
///
/// Statements that target the same table append to the same entry instead of
/// replacing it, so no fetched row is lost.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FetchedContext(BTreeMap<String, Vec<Row>>);

impl FetchedContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, table: impl Into<String>, rows: Vec<Row>) {
        self.0.entry(table.into()).or_default().extend(rows);
    }

    #[cfg(test)]
    pub fn get(&self, table: &str) -> Option<&[Row]> {
        self.0.get(table).map(Vec::as_slice)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn non_empty_tables(&self) -> impl Iterator<Item = (&str, &[Row])> {
        self.0
            .iter()
            .filter(|(_, rows)| !rows.is_empty())
            .map(|(table, rows)| (table.as_str(), rows.as_slice()))
    }

    pub fn has_data(&self) -> bool {
        self.non_empty_tables().next().is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub description: String,
    pub context: FetchedContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    Connected,
    SchemaFetched,
    Planned,
    ContextFetched,
    Composed,
    Generated,
    Done,
    Failed,
}

impl PipelineStage {
    /// The stage that follows a successful transition out of `self`.
    pub fn next(self) -> Self {
        match self {
            PipelineStage::Idle => PipelineStage::Connected,
            PipelineStage::Connected => PipelineStage::SchemaFetched,
            PipelineStage::SchemaFetched => PipelineStage::Planned,
            PipelineStage::Planned => PipelineStage::ContextFetched,
            PipelineStage::ContextFetched => PipelineStage::Composed,
            PipelineStage::Composed => PipelineStage::Generated,
            PipelineStage::Generated => PipelineStage::Done,
            PipelineStage::Done => PipelineStage::Done,
            PipelineStage::Failed => PipelineStage::Failed,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            PipelineStage::Idle => "idle",
            PipelineStage::Connected => "connecting to the query executor",
            PipelineStage::SchemaFetched => "fetching the database schema",
            PipelineStage::Planned => "planning SQL queries",
            PipelineStage::ContextFetched => "fetching database context",
            PipelineStage::Composed => "composing the description prompt",
            PipelineStage::Generated => "generating the description",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_user_request_rejects_blank() {
        assert!(UserRequest::new("   \n").is_err());
        assert!(UserRequest::new("").is_err());
        assert_eq!(UserRequest::new("RustConf").unwrap().as_str(), "RustConf");
    }

    #[test]
    fn test_context_appends_rows_for_same_table() {
        let mut context = FetchedContext::new();
        context.append("events", vec![row(json!({"id": 1}))]);
        context.append("events", vec![row(json!({"id": 2}))]);

        let events = context.get("events").unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1]["id"], json!(2));
    }

    #[test]
    fn test_context_without_rows_has_no_data() {
        let mut context = FetchedContext::new();
        assert!(!context.has_data());

        context.append("sponsors", vec![]);
        assert_eq!(context.len(), 1);
        assert!(!context.has_data());
    }

    #[test]
    fn test_stage_sequence_ends_in_done() {
        let mut stage = PipelineStage::Idle;
        let mut steps = 0;
        while stage != PipelineStage::Done {
            stage = stage.next();
            steps += 1;
        }
        assert_eq!(stage, PipelineStage::Done);
        assert_eq!(steps, 7);
    }
}

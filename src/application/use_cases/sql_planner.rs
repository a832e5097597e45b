//! Asks the model which SELECT statements would gather context for a request.

use super::generation::GenerationAdapter;
use crate::domain::error::{AppError, Result};
use crate::domain::event_context::{QueryPlan, SchemaDescription, UserRequest};
use crate::infrastructure::response::strip_code_fences;
use tracing::{error, info, warn};

pub fn build_planning_prompt(request: &UserRequest, schema: &SchemaDescription) -> String {
    format!(
        r#"You are an automated SQL generation bot. Your only purpose is to generate a JSON array of SQL query strings. Do not ask for more information. Do not add any conversational text.

DATABASE SCHEMA:
```sql
{schema}
```

USER REQUEST: "{request}"

Task: Based on the schema and the user request, generate a JSON array of all SQL SELECT queries needed to gather the relevant information from all the database tables that have a relationship with the information asked for by the user (note that the title given by the user may be just a part of the full title).

IMPORTANT: Your response MUST be a valid JSON array of strings and nothing else."#,
        schema = schema.as_str().trim(),
        request = request.as_str().trim(),
    )
}

/// Parses the planner's reply. Code fences are tolerated; anything that is not
/// a JSON array of strings is a planning failure.
pub fn parse_query_plan(raw: &str) -> Result<QueryPlan> {
    let cleaned = strip_code_fences(raw);
    let statements: Vec<String> = serde_json::from_str(&cleaned).map_err(|e| {
        error!(raw_response = %raw, "Planner response is not a JSON array of strings");
        AppError::PlanningError(format!(
            "AI failed to generate valid JSON for SQL queries: {}",
            e
        ))
    })?;
    Ok(QueryPlan::new(statements))
}

pub async fn plan_queries(
    generation: &GenerationAdapter,
    request: &UserRequest,
    schema: &SchemaDescription,
) -> Result<QueryPlan> {
    info!("Asking LLM to generate SQL queries");
    let prompt = build_planning_prompt(request, schema);
    let raw = generation.generate(&prompt).await?;
    let plan = parse_query_plan(&raw)?;
    if plan.is_empty() {
        warn!("LLM planned no queries for the request");
    } else {
        info!(queries = plan.len(), "LLM generated query plan");
    }
    Ok(plan)
}

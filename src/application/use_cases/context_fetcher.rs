use super::allowlist_validator::AllowlistValidator;
use crate::domain::event_context::{FetchedContext, QueryPlan};
use crate::infrastructure::mcp::QueryExecutor;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, warn};

static FROM_TABLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)\bfrom\s+([`"\[\]A-Za-z0-9_$.]+)"#).unwrap());

const UNKNOWN_TABLE: &str = "unknown_table";

/// Context key for a statement: the first identifier after `from`, lower-cased,
/// without quoting or schema qualifier.
pub fn derive_table_key(sql: &str) -> String {
    FROM_TABLE_PATTERN
        .captures(sql)
        .and_then(|caps| caps.get(1))
        .map(|m| {
            m.as_str()
                .trim_matches(|c| matches!(c, '`' | '"' | '[' | ']' | '.'))
                .rsplit('.')
                .next()
                .unwrap_or_default()
                .trim_matches(|c| matches!(c, '`' | '"' | '[' | ']'))
                .to_lowercase()
        })
        .filter(|key| !key.is_empty())
        .unwrap_or_else(|| UNKNOWN_TABLE.to_string())
}

fn is_select(sql: &str) -> bool {
    sql.trim().to_lowercase().starts_with("select")
}

pub struct ContextFetcher {
    validator: AllowlistValidator,
}

impl ContextFetcher {
    pub fn new(validator: AllowlistValidator) -> Self {
        Self { validator }
    }

    /// Runs every eligible statement once, in plan order. A statement that is
    /// rejected or fails contributes nothing; the rest still run.
    pub async fn fetch(&self, executor: &mut dyn QueryExecutor, plan: &QueryPlan) -> FetchedContext {
        let mut context = FetchedContext::new();

        for sql in plan.statements() {
            if !is_select(sql) {
                warn!(sql = %sql, "Skipping non-SELECT query generated by AI");
                continue;
            }

            let validation = self.validator.validate_sql(sql);
            if !validation.is_valid {
                warn!(
                    sql = %sql,
                    reasons = %validation.error_summary(),
                    "Skipping query rejected by allowlist"
                );
                continue;
            }

            match executor.execute(&validation.sanitized_sql).await {
                Ok(rows) => {
                    let table = derive_table_key(&validation.sanitized_sql);
                    info!(table = %table, rows = rows.len(), "Fetched context rows");
                    context.append(table, rows);
                }
                Err(err) => {
                    warn!(sql = %sql, error = %err, "Skipping query that failed to execute");
                }
            }
        }

        if context.is_empty() {
            warn!("No statement produced context rows");
        } else {
            let tables: Vec<&str> = context.keys().collect();
            info!(tables = ?tables, "All context data fetched");
        }
        context
    }
}

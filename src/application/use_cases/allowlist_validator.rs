//! Allowlist validator for model-generated SQL
//!
//! Planned statements come from model output, so each one is checked before it
//! reaches the query executor:
//! - exactly one statement, and it must be a query
//! - no SQL comments
//! - no data-modifying or session keywords outside string literals
//! - every referenced table must be in the allowlist
//!
//! Deny by default, allow by explicit rule.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlparser::ast::{visit_relations, Statement};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser as SqlParser;
use std::collections::HashSet;
use std::ops::ControlFlow;

static STRING_LITERAL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"'(?:[^'\\]|\\.|'')*'|"(?:[^"\\]|\\.|"")*""#).unwrap());

static WORD_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap());

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AllowlistRules {
    /// Tables planned statements may read. Empty disables the table check.
    #[serde(default)]
    pub allowed_tables: Vec<String>,
    /// Keywords that may not appear outside string literals (case-insensitive)
    #[serde(default)]
    pub deny_statements: Vec<String>,
}

impl Default for AllowlistRules {
    fn default() -> Self {
        Self {
            allowed_tables: ["events", "speakers", "sessions", "sponsors"]
                .iter()
                .map(|t| t.to_string())
                .collect(),
            deny_statements: [
                "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "TRUNCATE", "CREATE", "GRANT",
                "REVOKE", "CALL", "LOAD", "HANDLER", "LOCK", "UNLOCK", "SET", "INTO", "OUTFILE",
                "DUMPFILE", "SLEEP", "BENCHMARK",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl AllowlistRules {
    pub fn with_allowed_tables(mut self, tables: Vec<String>) -> Self {
        self.allowed_tables = tables;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    /// Statement as it should be executed: trimmed, trailing semicolons removed
    pub sanitized_sql: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationError {
    pub code: String,
    pub message: String,
}

impl ValidationResult {
    fn valid(sanitized_sql: String) -> Self {
        Self {
            is_valid: true,
            errors: vec![],
            sanitized_sql,
        }
    }

    pub fn add_error(&mut self, code: &str, message: &str) {
        self.is_valid = false;
        self.errors.push(ValidationError {
            code: code.to_string(),
            message: message.to_string(),
        });
    }

    pub fn error_summary(&self) -> String {
        self.errors
            .iter()
            .map(|e| format!("{}: {}", e.code, e.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

pub struct AllowlistValidator {
    allowed_tables: HashSet<String>,
    deny_statements: HashSet<String>,
}

impl AllowlistValidator {
    pub fn from_rules(rules: AllowlistRules) -> Self {
        Self {
            allowed_tables: rules
                .allowed_tables
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
            deny_statements: rules
                .deny_statements
                .iter()
                .map(|s| s.trim().to_uppercase())
                .collect(),
        }
    }

    pub fn validate_sql(&self, sql: &str) -> ValidationResult {
        let sanitized = sanitize(sql);
        let mut result = ValidationResult::valid(sanitized.clone());

        let without_literals = STRING_LITERAL_PATTERN.replace_all(&sanitized, "''");
        if ["--", "/*", "#"]
            .iter()
            .any(|marker| without_literals.contains(marker))
        {
            result.add_error("COMMENTS_NOT_ALLOWED", "SQL comments are not allowed");
            return result;
        }

        if without_literals.contains(';') {
            result.add_error(
                "STACKED_STATEMENTS",
                "Only a single statement may be executed",
            );
            return result;
        }

        for word in WORD_PATTERN.find_iter(&without_literals) {
            let upper = word.as_str().to_uppercase();
            if self.deny_statements.contains(&upper) {
                result.add_error(
                    "FORBIDDEN_STATEMENT",
                    &format!("SQL keyword '{}' is not allowed", upper),
                );
            }
        }
        if !result.is_valid {
            return result;
        }

        let statements = match SqlParser::parse_sql(&MySqlDialect {}, &sanitized) {
            Ok(statements) => statements,
            Err(e) => {
                result.add_error("PARSE_FAILED", &format!("SQL could not be parsed: {}", e));
                return result;
            }
        };

        let statement = match statements.as_slice() {
            [statement] => statement,
            _ => {
                result.add_error(
                    "STACKED_STATEMENTS",
                    &format!("Expected 1 statement, found {}", statements.len()),
                );
                return result;
            }
        };

        let Statement::Query(query) = statement else {
            result.add_error("NOT_A_QUERY", "Only SELECT queries are allowed");
            return result;
        };

        if self.allowed_tables.is_empty() {
            return result;
        }

        let cte_names: HashSet<String> = query
            .with
            .as_ref()
            .map(|with| {
                with.cte_tables
                    .iter()
                    .map(|cte| cte.alias.name.value.to_lowercase())
                    .collect()
            })
            .unwrap_or_default();

        let mut referenced = Vec::new();
        let _ = visit_relations(statement, |relation| {
            if let Some(ident) = relation.0.last() {
                referenced.push(ident.value.to_lowercase());
            }
            ControlFlow::<()>::Continue(())
        });

        for table in referenced {
            if !self.allowed_tables.contains(&table) && !cte_names.contains(&table) {
                result.add_error(
                    "TABLE_NOT_ALLOWED",
                    &format!("Table '{}' is not in the allowlist", table),
                );
            }
        }

        result
    }
}

fn sanitize(sql: &str) -> String {
    sql.trim()
        .trim_end_matches(|c: char| c == ';' || c.is_whitespace())
        .to_string()
}

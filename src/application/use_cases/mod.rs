pub mod allowlist_validator;
pub mod context_fetcher;
pub mod description_composer;
pub mod event_description;
pub mod generation;
pub mod retry;
pub mod sql_planner;

//! Agentic event-description workflow: schema, SQL plan, context, prose.

use super::allowlist_validator::{AllowlistRules, AllowlistValidator};
use super::context_fetcher::ContextFetcher;
use super::description_composer::{build_fallback_prompt, compose_description_prompt};
use super::generation::GenerationAdapter;
use super::retry::RetryPolicy;
use super::sql_planner::plan_queries;
use crate::domain::error::{AppError, Result};
use crate::domain::event_context::{
    FetchedContext, GenerationResult, PipelineStage, UserRequest,
};
use crate::domain::llm_config::LLMConfig;
use crate::infrastructure::llm_clients::LLMClient;
use crate::infrastructure::mcp::{QueryExecutorConnector, ScopedConnection};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub llm: LLMConfig,
    pub retry: RetryPolicy,
    pub allowlist: AllowlistRules,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            llm: LLMConfig::default(),
            retry: RetryPolicy::default(),
            allowlist: AllowlistRules::default(),
        }
    }
}

pub struct EventDescriptionUseCase {
    connector: Arc<dyn QueryExecutorConnector>,
    llm_client: Arc<dyn LLMClient + Send + Sync>,
    settings: PipelineSettings,
}

impl EventDescriptionUseCase {
    pub fn new(
        connector: Arc<dyn QueryExecutorConnector>,
        llm_client: Arc<dyn LLMClient + Send + Sync>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            connector,
            llm_client,
            settings,
        }
    }

    fn generation_adapter(&self) -> Result<GenerationAdapter> {
        GenerationAdapter::new(
            self.llm_client.clone(),
            self.settings.llm.clone(),
            self.settings.retry,
        )
    }

    /// Runs the whole workflow once. Every failure after input validation is
    /// returned as `AppError::PipelineFailed` carrying the stage and the cause.
    pub async fn generate_event_description(&self, user_prompt: &str) -> Result<GenerationResult> {
        let request = UserRequest::new(user_prompt)?;
        info!("--- Starting Event Description Workflow ---");

        let mut stage = PipelineStage::Idle;
        match self.run(&request, &mut stage).await {
            Ok(result) => {
                stage = stage.next();
                info!(stage = ?stage, tables = result.context.len(), "Event description workflow finished");
                Ok(result)
            }
            Err(cause) => {
                error!(
                    stage = ?PipelineStage::Failed,
                    failed_at = ?stage,
                    error = %cause,
                    "Event description workflow failed"
                );
                Err(AppError::PipelineFailed {
                    stage,
                    cause: Box::new(cause),
                })
            }
        }
    }

    /// Degraded mode: no database access, generic copywriting prompt only.
    pub async fn generate_without_context(&self, user_prompt: &str) -> Result<GenerationResult> {
        let request = UserRequest::new(user_prompt)?;
        info!("Generating with AI only (no database context)");

        let generation = self.generation_adapter()?;
        let description = generation.generate(&build_fallback_prompt(&request)).await?;
        Ok(GenerationResult {
            description,
            context: FetchedContext::new(),
        })
    }

    async fn run(
        &self,
        request: &UserRequest,
        stage: &mut PipelineStage,
    ) -> Result<GenerationResult> {
        let generation = self.generation_adapter()?;

        advance(stage);
        let mut connection = ScopedConnection::new(self.connector.connect().await?);

        let outcome = self
            .run_connected(&generation, &mut connection, request, stage)
            .await;
        connection.release().await;
        outcome
    }

    async fn run_connected(
        &self,
        generation: &GenerationAdapter,
        connection: &mut ScopedConnection,
        request: &UserRequest,
        stage: &mut PipelineStage,
    ) -> Result<GenerationResult> {
        advance(stage);
        let schema = connection.executor()?.read_schema().await?;

        advance(stage);
        let plan = plan_queries(generation, request, &schema).await?;

        advance(stage);
        let fetcher = ContextFetcher::new(AllowlistValidator::from_rules(
            self.settings.allowlist.clone(),
        ));
        let context = fetcher.fetch(connection.executor()?, &plan).await;

        advance(stage);
        let prompt = compose_description_prompt(request, &context)?;

        advance(stage);
        info!("Generating final description");
        let description = generation.generate(&prompt).await?;

        Ok(GenerationResult {
            description,
            context,
        })
    }
}

fn advance(stage: &mut PipelineStage) {
    let next = stage.next();
    info!(stage = ?next, "Entering pipeline stage");
    *stage = next;
}

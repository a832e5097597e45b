use crate::application::EventDescriptionUseCase;
use crate::domain::error::AppError;
use crate::domain::event_context::{FetchedContext, GenerationResult, PipelineStage};
use actix_cors::Cors;
use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::{
    dev::Server, get, post, web, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use validator::{Validate, ValidationError};

const MAX_LOG_ENTRIES: usize = 100;
const FALLBACK_CONTEXT_MESSAGE: &str = "Generated without database context";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LogEntry {
    pub time: String,
    pub level: String,
    pub source: String,
    pub message: String,
}

pub type LogBuffer = Arc<Mutex<VecDeque<LogEntry>>>;

pub struct HttpState {
    pub use_case: Arc<EventDescriptionUseCase>,
    pub logs: LogBuffer,
}

#[derive(Debug, Deserialize, Validate)]
pub struct GenerateRequest {
    #[validate(
        length(min = 1, max = 4096, message = "Prompt must be between 1 and 4096 characters"),
        custom(function = "not_blank")
    )]
    pub prompt: String,
    #[serde(default)]
    pub fallback: bool,
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("Prompt must not be blank".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ResponseContext {
    Fetched(FetchedContext),
    Notice { message: String },
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub description: String,
    pub context: ResponseContext,
}

impl From<GenerationResult> for GenerateResponse {
    fn from(result: GenerationResult) -> Self {
        Self {
            description: result.description,
            context: ResponseContext::Fetched(result.context),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
    pub stage: Option<PipelineStage>,
}

fn invalid_input(details: impl Serialize) -> HttpResponse {
    HttpResponse::BadRequest().json(json!({
        "error": "Invalid input data",
        "details": details,
    }))
}

fn error_response(err: &AppError) -> HttpResponse {
    let root = err.root_cause();
    match root {
        AppError::ValidationError(msg) => invalid_input(msg),
        AppError::NoRelevantData(msg) => HttpResponse::UnprocessableEntity().json(ErrorBody {
            error: msg.clone(),
            kind: root.kind(),
            stage: err.failed_stage(),
        }),
        _ => HttpResponse::InternalServerError().json(ErrorBody {
            error: err.to_string(),
            kind: root.kind(),
            stage: err.failed_stage(),
        }),
    }
}

/// The AI-only path may replace a failed run unless the failure is something
/// the caller has to fix: missing data or missing configuration.
fn allows_fallback(err: &AppError) -> bool {
    !matches!(
        err.root_cause(),
        AppError::NoRelevantData(_) | AppError::ConfigurationError(_) | AppError::ValidationError(_)
    )
}

fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = invalid_input(err.to_string());
    InternalError::from_response(err, response).into()
}

#[post("/generate")]
async fn generate(data: web::Data<HttpState>, req: web::Json<GenerateRequest>) -> impl Responder {
    if let Err(errors) = req.validate() {
        add_log(&data.logs, "WARN", "HttpApi", &format!("Rejected request: {}", errors));
        return invalid_input(errors);
    }

    add_log(
        &data.logs,
        "INFO",
        "HttpApi",
        &format!(
            "Generating event description (fallback={} prompt_chars={})",
            req.fallback,
            req.prompt.chars().count()
        ),
    );

    let err = match data.use_case.generate_event_description(&req.prompt).await {
        Ok(result) => {
            add_log(
                &data.logs,
                "INFO",
                "HttpApi",
                &format!("Description generated from {} table(s)", result.context.len()),
            );
            return HttpResponse::Ok().json(GenerateResponse::from(result));
        }
        Err(err) => err,
    };

    add_log(&data.logs, "ERROR", "HttpApi", &format!("Generation failed: {}", err));
    if !(req.fallback && allows_fallback(&err)) {
        return error_response(&err);
    }

    add_log(&data.logs, "WARN", "HttpApi", "Retrying without database context");
    match data.use_case.generate_without_context(&req.prompt).await {
        Ok(result) => HttpResponse::Ok().json(GenerateResponse {
            description: result.description,
            context: ResponseContext::Notice {
                message: FALLBACK_CONTEXT_MESSAGE.to_string(),
            },
        }),
        Err(fallback_err) => {
            add_log(
                &data.logs,
                "ERROR",
                "HttpApi",
                &format!("Fallback generation failed: {}", fallback_err),
            );
            error_response(&fallback_err)
        }
    }
}

#[get("/logs")]
async fn get_logs(data: web::Data<HttpState>) -> impl Responder {
    let logs = lock_logs(&data.logs).iter().cloned().collect::<Vec<_>>();
    HttpResponse::Ok().json(logs)
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(json!({ "status": "ok" }))
}

fn lock_logs(logs: &Mutex<VecDeque<LogEntry>>) -> std::sync::MutexGuard<'_, VecDeque<LogEntry>> {
    logs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn add_log(logs: &Mutex<VecDeque<LogEntry>>, level: &str, source: &str, message: &str) {
    let entry = LogEntry {
        time: Local::now().format("%H:%M:%S").to_string(),
        level: level.to_string(),
        source: source.to_string(),
        message: message.to_string(),
    };
    let mut logs = lock_logs(logs);
    logs.push_back(entry);
    while logs.len() > MAX_LOG_ENTRIES {
        logs.pop_front();
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(web::JsonConfig::default().error_handler(json_error_handler))
        .service(
            web::scope("/api")
                .service(generate)
                .service(get_logs)
                .service(health),
        );
}

pub fn start_server(
    use_case: Arc<EventDescriptionUseCase>,
    logs: LogBuffer,
    host: &str,
    port: u16,
) -> std::io::Result<Server> {
    let state = web::Data::new(HttpState { use_case, logs });

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(state.clone())
            .configure(configure)
    })
    .bind((host, port))?
    .run();

    Ok(server)
}

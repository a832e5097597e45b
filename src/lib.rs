mod application;
mod domain;
mod infrastructure;
mod interfaces;

use crate::application::EventDescriptionUseCase;
use crate::infrastructure::config::{AppConfig, ConfigService};
use crate::infrastructure::llm_clients::GeminiClient;
use crate::infrastructure::mcp::McpConnector;
use crate::interfaces::http::{add_log, start_server};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const STORE_KEY_COMMAND: &str = "store-gemini-key";

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Entry point for the `eventscribe` binary.
///
/// `eventscribe store-gemini-key <KEY>` saves the Gemini key to the OS keyring
/// and exits; without arguments the HTTP service starts.
pub async fn run() -> io::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config_service = ConfigService::new();
    let mut args = std::env::args().skip(1);
    if args.next().as_deref() == Some(STORE_KEY_COMMAND) {
        let key = args.next().filter(|k| !k.trim().is_empty()).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("usage: eventscribe {} <KEY>", STORE_KEY_COMMAND),
            )
        })?;
        config_service
            .save_api_key(key.trim())
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        info!("Gemini API key stored in keyring");
        return Ok(());
    }

    let mut config = AppConfig::load().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    })?;
    config_service.resolve_api_key(&mut config);

    let use_case = Arc::new(EventDescriptionUseCase::new(
        Arc::new(McpConnector::new(config.mcp_settings())),
        Arc::new(GeminiClient::new()),
        config.pipeline_settings(),
    ));

    let logs = Arc::new(Mutex::new(VecDeque::new()));
    let server = start_server(use_case, logs.clone(), &config.http_host, config.http_port)?;

    let listening = format!(
        "Backend initialized and HTTP server started on {}:{}",
        config.http_host, config.http_port
    );
    info!("{}", listening);
    add_log(&logs, "INFO", "System", &listening);

    server.await
}

use super::protocol::{
    self, JsonRpcRequest, PROTOCOL_VERSION, PROTOCOL_VERSION_HEADER, SESSION_HEADER,
};
use super::{QueryExecutor, QueryExecutorConnector};
use crate::domain::error::{AppError, Result};
use crate::domain::event_context::{Row, SchemaDescription};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

const CLIENT_NAME: &str = "EventScribeAI-Service";

#[derive(Debug, Clone)]
pub struct McpSettings {
    pub endpoint: Option<String>,
    pub schema_resource_uri: String,
    pub query_tool_name: String,
    pub timeout: Duration,
}

impl Default for McpSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            schema_resource_uri: "mysql://schemas".to_string(),
            query_tool_name: "read_only_query".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Opens a fresh MCP session for every pipeline run.
pub struct McpConnector {
    settings: McpSettings,
}

impl McpConnector {
    pub fn new(settings: McpSettings) -> Self {
        Self { settings }
    }

    fn endpoint(&self) -> Result<Url> {
        let raw = self
            .settings
            .endpoint
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                AppError::ConfigurationError(
                    "MCP_SERVER_URL is not set. Add the MCP server address to your environment or EventScribe.toml."
                        .to_string(),
                )
            })?;

        Url::parse(raw).map_err(|e| {
            AppError::ConfigurationError(format!("Invalid MCP server URL '{}': {}", raw, e))
        })
    }
}

#[async_trait]
impl QueryExecutorConnector for McpConnector {
    async fn connect(&self) -> Result<Box<dyn QueryExecutor>> {
        let endpoint = self.endpoint()?;
        let http = reqwest::Client::builder()
            .timeout(self.settings.timeout)
            .build()
            .map_err(|e| AppError::ConnectionError(format!("Failed to build HTTP client: {}", e)))?;

        let mut session = McpSession {
            http,
            endpoint,
            timeout: self.settings.timeout,
            session_id: None,
            next_id: 1,
            initialized: false,
            closed: false,
            schema_resource_uri: self.settings.schema_resource_uri.clone(),
            query_tool_name: self.settings.query_tool_name.clone(),
        };

        if let Err(reason) = session.handshake().await {
            session.close().await;
            return Err(AppError::ConnectionError(format!(
                "Failed to connect to MCP server at {}: {}",
                session.endpoint, reason
            )));
        }

        info!(endpoint = %session.endpoint, "MCP client connected");
        Ok(Box::new(session))
    }
}

pub struct McpSession {
    http: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
    session_id: Option<String>,
    next_id: u64,
    initialized: bool,
    closed: bool,
    schema_resource_uri: String,
    query_tool_name: String,
}

impl McpSession {
    async fn handshake(&mut self) -> std::result::Result<(), String> {
        self.request("initialize", protocol::initialize_params(CLIENT_NAME))
            .await?;
        self.initialized = true;
        self.notify("notifications/initialized").await
    }

    fn describe_send_error(&self, err: reqwest::Error) -> String {
        if err.is_timeout() {
            format!("Request timed out after {}s", self.timeout.as_secs())
        } else {
            format!("Request failed: {}", err)
        }
    }

    fn post(&self) -> reqwest::RequestBuilder {
        let mut request = self
            .http
            .post(self.endpoint.clone())
            .header(ACCEPT, "application/json, text/event-stream");
        if let Some(session_id) = &self.session_id {
            request = request.header(SESSION_HEADER, session_id);
        }
        if self.initialized {
            request = request.header(PROTOCOL_VERSION_HEADER, PROTOCOL_VERSION);
        }
        request
    }

    async fn request(&mut self, method: &str, params: Value) -> std::result::Result<Value, String> {
        if self.closed {
            return Err("Session is closed".to_string());
        }
        let id = self.next_id;
        self.next_id += 1;

        debug!(method, id, "Sending MCP request");
        let response = self
            .post()
            .json(&JsonRpcRequest::call(id, method, params))
            .send()
            .await
            .map_err(|e| self.describe_send_error(e))?;

        if let Some(session_id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            self.session_id = Some(session_id.to_string());
        }

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/json")
            .to_string();
        let body = response
            .text()
            .await
            .map_err(|e| self.describe_send_error(e))?;

        if !status.is_success() {
            return Err(format!("HTTP {}: {}", status, body));
        }

        protocol::parse_rpc_body(&content_type, &body, id)?.into_result()
    }

    async fn notify(&mut self, method: &str) -> std::result::Result<(), String> {
        let response = self
            .post()
            .json(&JsonRpcRequest::notification(method))
            .send()
            .await
            .map_err(|e| self.describe_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("HTTP {}: {}", status, body));
        }
        Ok(())
    }
}

#[async_trait]
impl QueryExecutor for McpSession {
    async fn read_schema(&mut self) -> Result<SchemaDescription> {
        let uri = self.schema_resource_uri.clone();
        let result = self
            .request("resources/read", json!({ "uri": uri }))
            .await
            .map_err(|reason| {
                AppError::ConnectionError(format!("Failed to read resource {}: {}", uri, reason))
            })?;
        protocol::schema_from_resource(result)
    }

    async fn execute(&mut self, sql: &str) -> Result<Vec<Row>> {
        let tool = self.query_tool_name.clone();
        let result = self
            .request(
                "tools/call",
                json!({ "name": tool, "arguments": { "sql": sql } }),
            )
            .await
            .map_err(|reason| AppError::QueryError(format!("Tool {} failed: {}", tool, reason)))?;
        protocol::rows_from_tool_result(result)
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(session_id) = self.session_id.take() {
            let result = self
                .http
                .delete(self.endpoint.clone())
                .header(SESSION_HEADER, &session_id)
                .send()
                .await;
            if let Err(e) = result {
                warn!(error = %e, "Failed to terminate MCP session");
            }
        }
        info!("MCP client connection closed");
    }
}

/// A session dropped before `close` (for example while the handshake is still
/// running) is terminated in the background on the current runtime.
impl Drop for McpSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let Some(session_id) = self.session_id.take() else {
            return;
        };

        let request = self
            .http
            .delete(self.endpoint.clone())
            .header(SESSION_HEADER, session_id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("MCP session dropped before close, terminating in the background");
                handle.spawn(async move {
                    if let Err(e) = request.send().await {
                        warn!(error = %e, "Failed to terminate MCP session");
                    }
                });
            }
            Err(_) => warn!("MCP session dropped outside a runtime, remote session left open"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::dev::ServerHandle;
    use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
    use std::sync::Mutex;

    type RequestLog = web::Data<Mutex<Vec<String>>>;

    const SCHEMA: &str = "CREATE TABLE events (id INT, title VARCHAR(255));";

    /// Minimal Streamable HTTP server: JSON replies for `initialize` and
    /// `tools/call`, an SSE reply for `resources/read`. Under `/slow` the data
    /// calls stall for two seconds.
    async fn mcp_endpoint(req: HttpRequest, body: web::Bytes, log: RequestLog) -> HttpResponse {
        let session = req
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string();

        if req.method() == actix_web::http::Method::DELETE {
            log.lock().unwrap().push(format!("DELETE sid={}", session));
            return HttpResponse::Ok().finish();
        }

        let message: Value = serde_json::from_slice(&body).unwrap();
        let method = message["method"].as_str().unwrap_or_default().to_string();
        log.lock().unwrap().push(format!("POST {} sid={}", method, session));
        let id = message["id"].clone();

        if req.path() == "/slow" && matches!(method.as_str(), "resources/read" | "tools/call") {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }

        match method.as_str() {
            "initialize" => HttpResponse::Ok()
                .insert_header((SESSION_HEADER, "abc"))
                .json(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": {
                        "protocolVersion": PROTOCOL_VERSION,
                        "capabilities": {},
                        "serverInfo": { "name": "fake-mcp", "version": "0.0.1" }
                    }
                })),
            "notifications/initialized" => HttpResponse::Accepted().finish(),
            "resources/read" => {
                let reply = json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": { "contents": [{ "uri": "mysql://schemas", "text": SCHEMA }] }
                });
                HttpResponse::Ok()
                    .content_type("text/event-stream")
                    .body(format!("event: message\ndata: {}\n\n", reply))
            }
            "tools/call" => {
                let rows = json!([{ "id": 1, "title": "RustConf" }]).to_string();
                HttpResponse::Ok().json(json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": { "content": [{ "type": "text", "text": rows }], "isError": false }
                }))
            }
            _ => HttpResponse::Ok().json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": "Method not found" }
            })),
        }
    }

    fn start_mcp_server() -> (String, RequestLog, ServerHandle) {
        let log: RequestLog = web::Data::new(Mutex::new(Vec::new()));
        let data = log.clone();
        let server = HttpServer::new(move || {
            App::new()
                .app_data(data.clone())
                .route("/mcp", web::to(mcp_endpoint))
                .route("/slow", web::to(mcp_endpoint))
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        let server = server.run();
        let handle = server.handle();
        actix_web::rt::spawn(server);
        (format!("http://{}", addr), log, handle)
    }

    fn logged(log: &RequestLog) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    fn connector(endpoint: Option<&str>) -> McpConnector {
        McpConnector::new(McpSettings {
            endpoint: endpoint.map(str::to_string),
            ..McpSettings::default()
        })
    }

    #[actix_web::test]
    async fn test_session_flow_against_server() {
        let (base, log, server) = start_mcp_server();
        let mut session = connector(Some(&format!("{}/mcp", base)))
            .connect()
            .await
            .unwrap();

        let schema = session.read_schema().await.unwrap();
        assert_eq!(schema.as_str(), SCHEMA);

        let rows = session.execute("SELECT * FROM events").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["title"], json!("RustConf"));

        session.close().await;
        session.close().await;

        assert_eq!(
            logged(&log),
            vec![
                "POST initialize sid=-",
                "POST notifications/initialized sid=abc",
                "POST resources/read sid=abc",
                "POST tools/call sid=abc",
                "DELETE sid=abc",
            ]
        );
        server.stop(false).await;
    }

    #[actix_web::test]
    async fn test_dropped_session_is_terminated() {
        let (base, log, server) = start_mcp_server();
        let session = connector(Some(&format!("{}/mcp", base)))
            .connect()
            .await
            .unwrap();
        drop(session);

        let mut terminated = false;
        for _ in 0..50 {
            if logged(&log).iter().any(|entry| entry == "DELETE sid=abc") {
                terminated = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(terminated, "no DELETE received: {:?}", logged(&log));
        server.stop(false).await;
    }

    #[actix_web::test]
    async fn test_timeouts_map_to_stage_errors() {
        let (base, log, server) = start_mcp_server();
        let connector = McpConnector::new(McpSettings {
            endpoint: Some(format!("{}/slow", base)),
            timeout: Duration::from_millis(200),
            ..McpSettings::default()
        });
        let mut session = connector.connect().await.unwrap();

        match session.read_schema().await {
            Err(AppError::ConnectionError(msg)) => assert!(msg.contains("timed out"), "{}", msg),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(matches!(
            session.execute("SELECT * FROM events").await,
            Err(AppError::QueryError(_))
        ));

        session.close().await;
        assert_eq!(logged(&log).last().map(String::as_str), Some("DELETE sid=abc"));
        server.stop(false).await;
    }


    #[tokio::test]
    async fn test_missing_endpoint_is_configuration_error() {
        for endpoint in [None, Some("   ")] {
            let result = connector(endpoint).connect().await;
            assert!(matches!(result, Err(AppError::ConfigurationError(_))));
        }
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_configuration_error() {
        let result = connector(Some("not a url")).connect().await;
        assert!(matches!(result, Err(AppError::ConfigurationError(_))));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connection_error() {
        let result = connector(Some("http://127.0.0.1:9/mcp")).connect().await;
        assert!(matches!(result, Err(AppError::ConnectionError(_))));
    }
}

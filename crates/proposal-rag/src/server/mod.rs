//! HTTP and WebSocket surface for uploads, progress and search

pub mod routes;
pub mod state;

use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::RagConfig;
use crate::error::{Error, Result};
use state::AppState;

/// Proposal processing server
pub struct ProposalServer {
    config: RagConfig,
    state: AppState,
}

impl ProposalServer {
    pub fn new(config: RagConfig) -> Result<Self> {
        let state = AppState::new(config.clone())?;
        Ok(Self { config, state })
    }

    pub fn with_state(state: AppState) -> Self {
        Self {
            config: state.config().clone(),
            state,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let router = Router::new()
            .route("/health", get(health_check))
            .nest("/api", routes::api_routes(self.config.server.max_upload_size))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http());

        if self.config.server.enable_cors {
            router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
        } else {
            router
        }
    }

    /// Start the job sweeper and serve until the listener fails
    pub async fn start(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;

        let sweep_interval = Duration::from_secs(self.config.tracker.sweep_interval_secs.max(1));
        let _sweeper = self.state.registry().spawn_sweeper(sweep_interval);

        let router = self.router();

        tracing::info!("Starting proposal server on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Config(format!("Failed to bind: {}", e)))?;

        axum::serve(listener, router)
            .await
            .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.server.host, self.config.server.port)
    }
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    const BOUNDARY: &str = "proposal-rag-boundary";

    fn server() -> ProposalServer {
        let mut config = RagConfig::default();
        config.pipeline.ocr_enabled = false;
        ProposalServer::new(config).unwrap()
    }

    fn server_in(dir: &std::path::Path) -> ProposalServer {
        let mut config = RagConfig::default();
        config.pipeline.ocr_enabled = false;
        config.storage.upload_dir = dir.join("uploads");
        config.storage.sidecar_dir = dir.join("proposals");
        ProposalServer::new(config).unwrap()
    }

    /// Multipart body with one part per `(field, filename, content)`
    fn multipart_body(parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (field, filename, content) in parts {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            let disposition = match filename {
                Some(filename) => format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\r\n",
                    field, filename
                ),
                None => format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", field),
            };
            body.extend_from_slice(disposition.as_bytes());
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    async fn upload(router: Router, body: Vec<u8>) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/api/upload")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap();
        send(router, request).await
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let response = server()
            .router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_job_is_404() {
        let server = server();
        let (status, body) = get_json(
            server.router(),
            &format!("/api/processing-status/{}", uuid::Uuid::new_v4()),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["type"], "not_found");

        let (status, _) = get_json(server.router(), "/api/processing-status/not-a-uuid").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_and_active_tasks() {
        let server = server();
        let tracker = server.state().registry().create_pdf_job("acme.pdf");
        tracker.start_next_stage(None);

        let (status, body) = get_json(
            server.router(),
            &format!("/api/processing-status/{}", tracker.id()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fileName"], "acme.pdf");
        assert_eq!(body["steps"].as_array().unwrap().len(), 6);
        assert_eq!(body["currentStepId"], "step_0");

        let (status, body) = get_json(server.router(), "/api/active-processing-tasks").await;
        assert_eq!(status, StatusCode::OK);
        let tasks = body["tasks"].as_array().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["isComplete"], false);
    }

    #[tokio::test]
    async fn test_stats_and_info() {
        let server = server();
        let (status, body) = get_json(server.router(), "/api/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["vectors"]["total"], 0);
        assert!(body["pipeline"]["extraction_cache"].is_object());

        let (status, body) = get_json(server.router(), "/api/info").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "proposal-rag");
    }

    #[tokio::test]
    async fn test_upload_rejects_non_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let server = server_in(dir.path());
        let body = multipart_body(&[("files", Some("notes.txt"), b"plain text")]);

        let (status, body) = upload(server.router(), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "unsupported_type");
        assert!(server.state().registry().list().is_empty());
    }

    #[tokio::test]
    async fn test_upload_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let server = server_in(dir.path());
        let body = multipart_body(&[("client_name", None, b"Acme")]);

        let (status, body) = upload(server.router(), body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "parse_error");
    }

    #[tokio::test]
    async fn test_truncated_multipart_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let server = server_in(dir.path());
        let body = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"acme.pdf\"\r\n\r\n%PDF-1.4",
            BOUNDARY
        );

        let (status, body) = upload(server.router(), body.into_bytes()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "bad_request");
        assert!(server.state().registry().list().is_empty());
    }

    #[tokio::test]
    async fn test_upload_starts_one_job_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let server = server_in(dir.path());
        let body = multipart_body(&[
            ("client_name", None, b"Acme"),
            ("files", Some("acme.pdf"), b"%PDF-1.4 not really a pdf"),
        ]);

        let (status, body) = upload(server.router(), body).await;
        assert_eq!(status, StatusCode::OK);
        let ids = body["tracking_ids"].as_array().unwrap();
        assert_eq!(ids.len(), 1);
        assert_eq!(body["results"][0]["status"], "processing");
        assert_eq!(body["results"][0]["filename"], "acme.pdf");
        assert_eq!(body["results"][0]["tracking_id"], ids[0]);

        let id: uuid::Uuid = serde_json::from_value(ids[0].clone()).unwrap();
        let tracker = server.state().registry().get(&id).unwrap();
        assert_eq!(tracker.file_name(), "acme.pdf");

        let saved: Vec<_> = std::fs::read_dir(dir.path().join("uploads"))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].ends_with("_acme.pdf"));
    }

    #[tokio::test]
    async fn test_delete_task() {
        let server = server();
        let tracker = server.state().registry().create_pdf_job("acme.pdf");
        let uri = format!("/api/processing-task/{}", tracker.id());
        let delete = |uri: &str| {
            Request::builder()
                .method("DELETE")
                .uri(uri)
                .body(Body::empty())
                .unwrap()
        };

        let (status, body) = send(server.router(), delete(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["message"].as_str().unwrap().contains(&tracker.id().to_string()));
        assert!(server.state().registry().get(&tracker.id()).is_err());

        let (status, body) = send(server.router(), delete(&uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["type"], "not_found");
    }

    #[tokio::test]
    async fn test_tasks_summary_and_ordering() {
        let server = server();
        let registry = server.state().registry();
        let done = registry.create_pdf_job("first.pdf");
        done.complete_job();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let running = registry.create_pdf_job("second.pdf");
        running.start_next_stage(None);

        let (status, body) = get_json(server.router(), "/api/processing-tasks-summary").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["completed"], 1);
        assert_eq!(body["in_progress"], 1);

        let (_, body) = get_json(server.router(), "/api/active-processing-tasks").await;
        let tasks = body["tasks"].as_array().unwrap();
        assert_eq!(tasks[0]["fileName"], "second.pdf");
        assert_eq!(tasks[0]["currentStep"], "Text Extraction");
        assert_eq!(tasks[0]["steps"].as_array().unwrap().len(), 6);
        assert!(tasks[0]["startTime"].is_string());
        assert!(tasks[0]["lastUpdate"].is_string());
        assert_eq!(tasks[1]["fileName"], "first.pdf");
        assert_eq!(tasks[1]["isComplete"], true);
    }
}

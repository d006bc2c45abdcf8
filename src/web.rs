//! Web UI and JSON API server
//!
//! HTML routes follow a post/redirect/get flow: every form action answers
//! `303 See Other` back to `/`, and failures travel through the supervisor's
//! pending error slot to the next page view.

use crate::error::{json_error_response, ErrorCode};
use crate::forward::ForwardRequest;
use crate::page;
use crate::supervisor::Supervisor;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Body, Bytes};
use hyper::header::{CONTENT_TYPE, LOCATION};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Largest request body accepted for form and JSON submissions
const MAX_BODY_BYTES: usize = 16 * 1024;

/// Helper to create a simple response - infallible with valid StatusCode
fn response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum")
}

fn json_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum and static header")
}

fn html_response(body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Full::new(Bytes::from(body)))
        .expect("valid response with static header")
}

fn redirect_home() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::SEE_OTHER)
        .header(LOCATION, "/")
        .body(Full::new(Bytes::new()))
        .expect("valid redirect with static header")
}

/// HTTP server exposing the supervisor
pub struct WebServer {
    bind_addr: SocketAddr,
    supervisor: Arc<Supervisor>,
    shutdown_rx: watch::Receiver<bool>,
}

impl WebServer {
    pub fn new(
        bind_addr: SocketAddr,
        supervisor: Arc<Supervisor>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            supervisor,
            shutdown_rx,
        }
    }

    /// Bind and serve until shutdown is signalled
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, "Web UI listening");
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown is signalled
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let supervisor = Arc::clone(&self.supervisor);
                            tokio::spawn(async move {
                                if let Err(e) = serve_connection(stream, supervisor).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Web server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn serve_connection<S>(stream: S, supervisor: Arc<Supervisor>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let supervisor = Arc::clone(&supervisor);
        async move { handle_request(req, supervisor).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    supervisor: Arc<Supervisor>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!(%method, %path, "Request");

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/") => html_response(page::render_status(&supervisor.status())),

        (&Method::POST, "/start") => handle_start(req, &supervisor).await,
        (_, "/start") => response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"),

        (&Method::GET, "/stop") | (&Method::POST, "/stop") => {
            let params = parse_form(req.uri().query().unwrap_or(""));
            match params.get("id").filter(|id| !id.is_empty()) {
                Some(id) => {
                    if let Err(e) = supervisor.stop_forward(id).await {
                        supervisor.set_error(e.to_string());
                    }
                }
                None => supervisor.set_error("No process ID specified."),
            }
            redirect_home()
        }

        (&Method::GET, "/health") => response(StatusCode::OK, "ok"),

        (&Method::GET, "/version") => {
            let version_info = serde_json::json!({
                "name": PKG_NAME,
                "version": VERSION,
            });
            json_response(StatusCode::OK, version_info.to_string())
        }

        (&Method::GET, "/api/forwards") => {
            supervisor.sweep();
            let forwards = supervisor.forwards();
            let body = serde_json::json!({
                "count": forwards.len(),
                "forwards": forwards,
                "events": supervisor.event_log().snapshot(),
            });
            json_response(StatusCode::OK, body.to_string())
        }

        (&Method::POST, "/api/forwards") => api_start(req, &supervisor).await,

        (&Method::DELETE, path) if path.starts_with("/api/forwards/") => {
            let id = path.strip_prefix("/api/forwards/").unwrap_or("");
            match supervisor.stop_forward(id).await {
                Ok(()) => response(StatusCode::NO_CONTENT, Bytes::new()),
                Err(e) => json_error_response(e.code(), e.to_string()),
            }
        }

        (_, "/api/forwards") => {
            json_error_response(ErrorCode::MethodNotAllowed, "Method not allowed")
        }

        (_, path) if path == "/api" || path.starts_with("/api/") => {
            json_error_response(ErrorCode::NotFound, format!("No API route for {}", path))
        }

        _ => response(StatusCode::NOT_FOUND, "not found"),
    };

    Ok(response)
}

async fn handle_start(req: Request<hyper::body::Incoming>, supervisor: &Supervisor) -> Response<Full<Bytes>> {
    let body = match read_body(req.into_body()).await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "Error reading form body");
            supervisor.set_error("Failed to parse form data.");
            return redirect_home();
        }
    };

    let form = parse_form(&String::from_utf8_lossy(&body));
    let field = |name: &str| form.get(name).cloned().unwrap_or_default();
    let request = ForwardRequest::new(
        field("baseIP"),
        field("basePort"),
        field("remoteIP"),
        field("remotePort"),
    );

    if let Err(e) = supervisor.start_forward(&request) {
        supervisor.set_error(e.to_string());
    }
    redirect_home()
}

async fn api_start(req: Request<hyper::body::Incoming>, supervisor: &Supervisor) -> Response<Full<Bytes>> {
    let body = match read_body(req.into_body()).await {
        Ok(body) => body,
        Err(e) => return json_error_response(ErrorCode::InvalidRequest, e.to_string()),
    };

    let request: ForwardRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return json_error_response(ErrorCode::InvalidRequest, format!("Invalid JSON: {}", e));
        }
    };

    match supervisor.start_forward(&request) {
        Ok(id) => json_response(
            StatusCode::CREATED,
            serde_json::json!({ "id": id }).to_string(),
        ),
        Err(e) => json_error_response(e.code(), e.to_string()),
    }
}

/// Collect a request body, giving up once it passes `MAX_BODY_BYTES`
async fn read_body<B>(body: B) -> anyhow::Result<Bytes>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let collected = Limited::new(body, MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read request body: {}", e))?;
    Ok(collected.to_bytes())
}

/// Parse `application/x-www-form-urlencoded` pairs; the first value of a key wins
pub fn parse_form(input: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for pair in input.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(key);
        let value = decode_component(value);
        fields.entry(key).or_insert(value);
    }
    fields
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

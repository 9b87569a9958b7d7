// HTTP Honeypot Implementation
// Logs every request, spoofs the server banner and serves a few deliberately tempting pages

use super::traits::{BindAddr, HoneypotService, Protocol};
use crate::error::ServiceError;
use crate::events::{EventLogger, Fields};
use anyhow::Result;
use askama::Template;
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{any, get},
    Extension, Router,
};
use serde_json::{Map, Value};
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::info;

/// Value of the `Server` header on every response
pub const SERVER_BANNER: &str = "Apache/2.4.41 (Ubuntu)";

/// Largest request body buffered for logging
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Exploit signature looked for in the User-Agent of the CGI probe
const SHELLSHOCK_MARKER: &str = "() {";

/// Paths scanners commonly try
pub const SCAN_PATHS: [&str; 3] = ["/admin", "/wp-login.php", "/phpmyadmin"];

/// HTTP Honeypot Service
pub struct HttpHoneypot {
    bind: BindAddr,
    logger: Arc<EventLogger>,
}

impl HttpHoneypot {
    pub fn new(bind: BindAddr, logger: Arc<EventLogger>) -> Self {
        Self { bind, logger }
    }
}

#[async_trait]
impl HoneypotService for HttpHoneypot {
    fn protocol(&self) -> Protocol {
        Protocol::Http
    }

    fn bind_addr(&self) -> &BindAddr {
        &self.bind
    }

    async fn serve(&mut self, shutdown: oneshot::Receiver<()>) -> Result<()> {
        let addr = self.bind.to_string();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServiceError::Bind { addr: addr.clone(), source })?;

        info!(addr = %addr, "HTTP honeypot listening");
        self.logger.info(
            format!("HTTP honeypot started on {}", addr),
            Fields::new().with("bind", addr.clone()),
        );

        let state = Arc::new(HttpHoneypotState {
            logger: Arc::clone(&self.logger),
        });
        let app = build_router(state);

        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move {
                shutdown.await.ok();
                info!("HTTP honeypot received shutdown signal");
            })
            .await?;

        self.logger.info("HTTP honeypot stopped", Fields::new());
        Ok(())
    }
}

/// Shared state passed to all request handlers
struct HttpHoneypotState {
    logger: Arc<EventLogger>,
}

/// What the interception stage extracted, handed to route handlers
#[derive(Debug, Clone, Default)]
struct RequestCapture {
    ip: String,
    args: Map<String, Value>,
    form: Map<String, Value>,
}

impl RequestCapture {
    fn arg(&self, key: &str) -> &str {
        self.args.get(key).and_then(Value::as_str).unwrap_or_default()
    }

    fn form_value(&self, key: &str) -> &str {
        self.form.get(key).and_then(Value::as_str).unwrap_or_default()
    }

    fn fields(&self) -> Fields {
        Fields::new().with("ip", self.ip.clone())
    }
}

/// Build the Axum router with all decoy routes and both pipeline stages
fn build_router(state: Arc<HttpHoneypotState>) -> Router {
    with_pipeline(decoy_routes(), state)
}

fn decoy_routes() -> Router<Arc<HttpHoneypotState>> {
    let mut router = Router::new()
        .route("/", get(handle_root).post(handle_root))
        .route("/login", get(handle_login).post(handle_login))
        .route("/search", get(handle_search))
        .route("/cgi-bin/status", get(handle_cgi_status));

    for path in SCAN_PATHS {
        router = router.route(path, any(handle_scan_path));
    }

    router.fallback(handle_not_found)
}

/// Wrap routes with panic capture (inner) and request interception (outer)
///
/// The interception stage sits outside the panic layer so a 500 produced by
/// a panicking handler still carries the spoofed banner.
fn with_pipeline(
    routes: Router<Arc<HttpHoneypotState>>,
    state: Arc<HttpHoneypotState>,
) -> Router {
    let logger = Arc::clone(&state.logger);
    routes
        .layer(CatchPanicLayer::custom(move |panic: Box<dyn Any + Send + 'static>| {
            let detail = if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else {
                "unknown panic".to_string()
            };
            logger.critical(
                "Unhandled error while processing HTTP request",
                Fields::new().with("error", detail),
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }))
        .layer(middleware::from_fn_with_state(Arc::clone(&state), intercept))
        .with_state(state)
}

/// Request interception and response finalization
async fn intercept(
    State(state): State<Arc<HttpHoneypotState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();
    let body = axum::body::to_bytes(body, MAX_BODY_BYTES).await.ok();

    let capture = RequestCapture {
        ip: peer.ip().to_string(),
        args: parse_pairs(parts.uri.query().unwrap_or_default().as_bytes()),
        form: match &body {
            Some(bytes) if is_form(&parts.headers) => parse_pairs(bytes),
            _ => Map::new(),
        },
    };

    let path = parts.uri.path().to_string();
    let mut fields = capture
        .fields()
        .with("method", parts.method.as_str())
        .with("path", path.clone())
        .with("headers", Value::Object(header_map(&parts.headers)))
        .with("args", Value::Object(capture.args.clone()))
        .with("form", Value::Object(capture.form.clone()));
    match &body {
        Some(bytes) => fields.insert("data", String::from_utf8_lossy(bytes).to_string()),
        None => {
            fields.insert("data", "");
            fields.insert("body_too_large", true);
        }
    }
    state
        .logger
        .info(format!("HTTP request received: {} {}", parts.method, path), fields);

    let mut response = match body {
        Some(bytes) => {
            parts.extensions.insert(capture);
            next.run(Request::from_parts(parts, Body::from(bytes))).await
        }
        None => (StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large").into_response(),
    };

    response
        .headers_mut()
        .insert(header::SERVER, HeaderValue::from_static(SERVER_BANNER));
    response
}

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false)
}

/// Decode url-encoded pairs; the first occurrence of a key wins
fn parse_pairs(raw: &[u8]) -> Map<String, Value> {
    let pairs: Vec<(String, String)> = serde_urlencoded::from_bytes(raw).unwrap_or_default();
    let mut map = Map::new();
    for (key, value) in pairs {
        map.entry(key).or_insert(Value::String(value));
    }
    map
}

/// Headers as a JSON object; repeated headers are joined with ", "
fn header_map(headers: &HeaderMap) -> Map<String, Value> {
    let mut map = Map::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).to_string();
        match map.get_mut(name.as_str()) {
            Some(Value::String(existing)) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            _ => {
                map.insert(name.as_str().to_string(), Value::String(value));
            }
        }
    }
    map
}

#[derive(Template)]
#[template(path = "login.html")]
struct LoginTemplate<'a> {
    failed: bool,
    username: &'a str,
}

#[derive(Template)]
#[template(path = "search.html")]
struct SearchTemplate<'a> {
    query: &'a str,
}

fn render(template: impl Template) -> Response {
    match template.render() {
        Ok(html) => Html(html).into_response(),
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response(),
    }
}

async fn handle_root() -> Html<String> {
    Html(format!("<h1>Welcome</h1><p>Server running: {}</p>", SERVER_BANNER))
}

async fn handle_login(
    State(state): State<Arc<HttpHoneypotState>>,
    Extension(capture): Extension<RequestCapture>,
    method: Method,
) -> Response {
    let username = capture.form_value("username");
    let failed = method == Method::POST;

    if failed {
        state.logger.warning(
            "HTTP login attempt via /login",
            capture
                .fields()
                .with("user", username)
                .with("pass", capture.form_value("password")),
        );
    }

    render(LoginTemplate { failed, username })
}

async fn handle_search(
    State(state): State<Arc<HttpHoneypotState>>,
    Extension(capture): Extension<RequestCapture>,
) -> Response {
    let query = capture.arg("q");
    if !query.is_empty() {
        state.logger.warning(
            "Search performed on /search",
            capture.fields().with("query", query),
        );
    }

    render(SearchTemplate { query })
}

async fn handle_scan_path(
    State(state): State<Arc<HttpHoneypotState>>,
    Extension(capture): Extension<RequestCapture>,
    uri: Uri,
) -> (StatusCode, &'static str) {
    state.logger.warning(
        format!("Access to potentially sensitive path: {}", uri.path()),
        capture.fields().with("path", uri.path()),
    );
    (StatusCode::NOT_FOUND, "Not Found")
}

async fn handle_cgi_status(
    State(state): State<Arc<HttpHoneypotState>>,
    Extension(capture): Extension<RequestCapture>,
    headers: HeaderMap,
) -> (StatusCode, &'static str) {
    let user_agent = headers
        .get(header::USER_AGENT)
        .map(|v| String::from_utf8_lossy(v.as_bytes()).to_string())
        .unwrap_or_default();

    if user_agent.contains(SHELLSHOCK_MARKER) {
        state.logger.critical(
            "Potential Shellshock exploitation attempt detected",
            capture.fields().with("user_agent", user_agent),
        );
        return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error");
    }
    (StatusCode::OK, "OK")
}

async fn handle_not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogSettings;
    use crate::events::read_events;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::Request;
    use tower::ServiceExt;

    struct Fixture {
        router: Router,
        logger: Arc<EventLogger>,
        _dir: tempfile::TempDir,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_routes(decoy_routes())
        }

        fn with_routes(routes: Router<Arc<HttpHoneypotState>>) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let logger = Arc::new(EventLogger::new(
                "http",
                &LogSettings {
                    log_directory: dir.path().to_path_buf(),
                    log_file_prefix: "test".to_string(),
                    log_retention: 30,
                },
            ));
            let state = Arc::new(HttpHoneypotState {
                logger: Arc::clone(&logger),
            });
            let router = with_pipeline(routes, state)
                .layer(MockConnectInfo(SocketAddr::from(([203, 0, 113, 50], 44321))));
            Self {
                router,
                logger,
                _dir: dir,
            }
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, String) {
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let headers = response.headers().clone();
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            (status, headers, String::from_utf8(body.to_vec()).unwrap())
        }

        async fn get(&self, uri: &str) -> (StatusCode, HeaderMap, String) {
            self.send(Request::get(uri).body(Body::empty()).unwrap()).await
        }

        fn events(&self) -> Vec<Value> {
            read_events(&self.logger.active_path())
        }

        fn events_with_level(&self, level: &str) -> Vec<Value> {
            self.events()
                .into_iter()
                .filter(|e| e["level"] == level)
                .collect()
        }
    }

    fn form_post(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn root_serves_welcome_with_spoofed_banner() {
        let fx = Fixture::new();
        let (status, headers, body) = fx.get("/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::SERVER], SERVER_BANNER);
        assert_eq!(body, format!("<h1>Welcome</h1><p>Server running: {}</p>", SERVER_BANNER));
    }

    #[tokio::test]
    async fn every_request_is_intercepted() {
        let fx = Fixture::new();
        let request = Request::post("/?debug=1&debug=2")
            .header(header::USER_AGENT, "curl/8.0")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("a=1&b=two"))
            .unwrap();
        fx.send(request).await;

        let events = fx.events();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event["message"], "HTTP request received: POST /");
        assert_eq!(event["ip"], "203.0.113.50");
        assert_eq!(event["method"], "POST");
        assert_eq!(event["path"], "/");
        assert_eq!(event["headers"]["user-agent"], "curl/8.0");
        assert_eq!(event["args"]["debug"], "1");
        assert_eq!(event["form"]["b"], "two");
        assert_eq!(event["data"], "a=1&b=two");
    }

    #[tokio::test]
    async fn login_post_fails_and_escapes_echo() {
        let fx = Fixture::new();
        let payload = "<script>alert(1)</script>";
        let (status, headers, body) = fx
            .send(form_post(
                "/login",
                &format!("username={}&password=p%40ss", "%3Cscript%3Ealert(1)%3C%2Fscript%3E"),
            ))
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(headers[header::SERVER], SERVER_BANNER);
        assert!(body.contains("Login failed. Please try again."));
        assert!(!body.contains(payload));
        assert!(body.contains("&lt;script&gt;"));

        let warnings = fx.events_with_level("WARNING");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0]["user"], payload);
        assert_eq!(warnings[0]["pass"], "p@ss");
        assert_eq!(warnings[0]["ip"], "203.0.113.50");
    }

    #[tokio::test]
    async fn login_get_shows_empty_form() {
        let fx = Fixture::new();
        let (status, _, body) = fx.get("/login").await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("Login Portal"));
        assert!(!body.contains("Login failed"));
        assert!(fx.events_with_level("WARNING").is_empty());
    }

    #[tokio::test]
    async fn search_reflects_raw_query() {
        let fx = Fixture::new();
        let (_, _, body) = fx.get("/search?q=%3Cimg%20src%3Dx%3E").await;

        assert!(body.contains("<h3>Results for: <img src=x></h3>"));
        assert!(body.contains("value=\"&lt;img src=x&gt;\""));

        let warnings = fx.events_with_level("WARNING");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0]["query"], "<img src=x>");
    }

    #[tokio::test]
    async fn empty_search_is_not_flagged() {
        let fx = Fixture::new();
        let (status, _, _) = fx.get("/search").await;

        assert_eq!(status, StatusCode::OK);
        assert!(fx.events_with_level("WARNING").is_empty());
    }

    #[tokio::test]
    async fn scan_paths_look_missing() {
        let fx = Fixture::new();
        for path in SCAN_PATHS {
            let (status, headers, body) = fx.get(path).await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body, "Not Found");
            assert_eq!(headers[header::SERVER], SERVER_BANNER);
        }

        let warnings = fx.events_with_level("WARNING");
        assert_eq!(warnings.len(), SCAN_PATHS.len());
        assert_eq!(warnings[1]["path"], "/wp-login.php");
    }

    #[tokio::test]
    async fn shellshock_probe_is_critical() {
        let fx = Fixture::new();
        let agent = "() { :; }; /bin/bash -c 'cat /etc/passwd'";
        let request = Request::get("/cgi-bin/status")
            .header(header::USER_AGENT, agent)
            .body(Body::empty())
            .unwrap();
        let (status, _, body) = fx.send(request).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Internal Server Error");

        let critical = fx.events_with_level("CRITICAL");
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0]["user_agent"], agent);
    }

    #[tokio::test]
    async fn benign_cgi_probe_is_ok() {
        let fx = Fixture::new();
        let (status, _, body) = fx.get("/cgi-bin/status").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
        assert!(fx.events_with_level("CRITICAL").is_empty());
    }

    #[tokio::test]
    async fn unknown_paths_are_plain_404() {
        let fx = Fixture::new();
        let (status, headers, _) = fx.get("/.git/config").await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(headers[header::SERVER], SERVER_BANNER);
        assert_eq!(fx.events().len(), 1);
    }

    #[tokio::test]
    async fn handler_panic_becomes_logged_500() {
        async fn explode() -> &'static str {
            panic!("template exploded")
        }

        let fx = Fixture::with_routes(decoy_routes().route("/boom", get(explode)));
        let (status, headers, body) = fx.get("/boom").await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, "Internal Server Error");
        assert_eq!(headers[header::SERVER], SERVER_BANNER);

        let critical = fx.events_with_level("CRITICAL");
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0]["error"], "template exploded");
    }

    #[tokio::test]
    async fn oversized_body_is_logged_and_rejected() {
        let fx = Fixture::new();
        let request = Request::post("/")
            .body(Body::from(vec![b'x'; MAX_BODY_BYTES + 1]))
            .unwrap();
        let (status, headers, _) = fx.send(request).await;

        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(headers[header::SERVER], SERVER_BANNER);
        let events = fx.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["body_too_large"], true);
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown() {
        let fx = Fixture::new();
        let mut honeypot = HttpHoneypot::new(BindAddr::new("127.0.0.1", 0), Arc::clone(&fx.logger));
        let (tx, rx) = oneshot::channel();
        let server = tokio::spawn(async move { honeypot.serve(rx).await });

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        tx.send(()).unwrap();
        server.await.unwrap().unwrap();

        let messages: Vec<_> = fx.events().iter().map(|e| e["message"].to_string()).collect();
        assert!(messages.iter().any(|m| m.contains("HTTP honeypot stopped")));
    }
}

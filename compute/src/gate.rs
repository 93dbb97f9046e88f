//! HTTP guard layer.
//!
//! Every request behind [`guard`] is evaluated against the current rule set.
//! The decision travels on as a [`GuardDecision`] request extension and comes
//! back as the `X-Ip-Allowed` / `X-Ip-Reason` response headers. Denied
//! requests are only annotated unless enforcement is on.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use ipguard_core::{
    evaluate, invalid_tokens, normalize_candidate, tokenize, GuardResult, Provenance, RuleError,
    RuleSet, INVALID_IP_FORMAT,
};
use serde::Serialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::rules::{rules_hash, CacheMode, GuardLog, RuleProvider};

/// Engine version - update this on each release
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ENGINE_NAME: &str = "IP Guard";

pub const HEADER_ALLOWED: &str = "x-ip-allowed";
pub const HEADER_REASON: &str = "x-ip-reason";

/// Shared state for the guard and the system endpoints.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<RuleProvider>,
    pub trust_proxy_headers: bool,
    pub enforce: bool,
}

/// The decision attached to a guarded request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GuardDecision {
    pub client: String,
    pub allowed: bool,
    pub reason: String,
}

impl From<&GuardResult> for GuardDecision {
    fn from(result: &GuardResult) -> Self {
        GuardDecision {
            client: result.client.clone(),
            allowed: result.allowed,
            reason: result.reason.to_string(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Client address
// ═══════════════════════════════════════════════════════════════════════════

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// The address to evaluate for a request.
///
/// With `trust_proxy_headers` the first `X-Forwarded-For` entry wins, then
/// `X-Real-IP`, then the peer. Without it only the peer counts. The result is
/// normalized (IPv6 loopback and mapped forms become IPv4).
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy_headers: bool) -> String {
    let forwarded = trust_proxy_headers
        .then(|| {
            header_str(headers, "x-forwarded-for")
                .and_then(|value| value.split(',').map(str::trim).find(|part| !part.is_empty()))
                .or_else(|| header_str(headers, "x-real-ip"))
        })
        .flatten();

    match (forwarded, peer) {
        (Some(addr), _) => normalize_candidate(addr),
        (None, Some(peer)) => normalize_candidate(&peer.ip().to_string()),
        (None, None) => String::new(),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Rule access
// ═══════════════════════════════════════════════════════════════════════════

/// The current rule set. Fresh reads touch the filesystem, so they run on the
/// blocking pool; a failed task falls back to the default rules.
async fn current_rules(provider: &Arc<RuleProvider>) -> Arc<RuleSet> {
    if provider.cache_mode() == CacheMode::Cached {
        return provider.snapshot();
    }
    let task = provider.clone();
    match tokio::task::spawn_blocking(move || task.snapshot()).await {
        Ok(rules) => rules,
        Err(err) => {
            tracing::warn!(error = %err, "rule load task failed (default rules only)");
            provider.default_only()
        }
    }
}

async fn reload_rules(provider: &Arc<RuleProvider>) -> Result<Arc<RuleSet>, tokio::task::JoinError> {
    let task = provider.clone();
    tokio::task::spawn_blocking(move || task.reload()).await
}

// ═══════════════════════════════════════════════════════════════════════════
// Guard middleware
// ═══════════════════════════════════════════════════════════════════════════

fn set_guard_headers(headers: &mut HeaderMap, decision: &GuardDecision) {
    let allowed = if decision.allowed { "true" } else { "false" };
    headers.insert(HEADER_ALLOWED, HeaderValue::from_static(allowed));
    match HeaderValue::from_str(&decision.reason) {
        Ok(value) => {
            headers.insert(HEADER_REASON, value);
        }
        Err(_) => tracing::debug!(reason = %decision.reason, "reason is not a valid header value"),
    }
}

/// Evaluate the caller, annotate the request and response, log the decision.
pub async fn guard(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let start = Instant::now();
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let raw = client_address(req.headers(), peer, state.trust_proxy_headers);

    let rules = current_rules(&state.provider).await;
    let result = evaluate(&rules, &raw);
    let decision = GuardDecision::from(&result);

    let mut log = GuardLog::new(req.method().as_str(), req.uri().path(), start);
    log.record_decision(&result);

    let mut response = if state.enforce && !decision.allowed {
        log.set_enforced();
        tracing::debug!(client = %decision.client, reason = %decision.reason, "request refused");
        forbidden(&decision)
    } else {
        req.extensions_mut().insert(decision.clone());
        next.run(req).await
    };

    set_guard_headers(response.headers_mut(), &decision);
    log.add_response(response.status().as_u16());
    log.finalize();
    log.emit();
    response
}

fn forbidden(decision: &GuardDecision) -> Response {
    let body = json!({
        "error": "forbidden",
        "message": "Client address is not on the allow list.",
        "client": decision.client,
        "reason": decision.reason,
        "engine": ENGINE_NAME,
    });
    (StatusCode::FORBIDDEN, Json(body)).into_response()
}

// ═══════════════════════════════════════════════════════════════════════════
// Handlers
// ═══════════════════════════════════════════════════════════════════════════

async fn guard_info(Extension(decision): Extension<GuardDecision>) -> Json<GuardDecision> {
    Json(decision)
}

fn version_body(state: &AppState, rules: &RuleSet) -> serde_json::Value {
    json!({
        "engine": ENGINE_NAME,
        "version": VERSION,
        "rules_hash": rules_hash(rules.merged()),
        "default_rules": rules.count(Provenance::Default),
        "file_rules": rules.count(Provenance::File),
        "invalid_rules": rules.skipped(),
        "cache": state.provider.cache_mode(),
        "enforce": state.enforce,
    })
}

/// Version/health info, including a hash of the active rules for deployment checks.
async fn version_info(State(state): State<AppState>) -> Response {
    let rules = current_rules(&state.provider).await;
    (
        [(ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(version_body(&state, &rules)),
    )
        .into_response()
}

async fn preflight() -> Response {
    (
        StatusCode::NO_CONTENT,
        [
            (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS"),
            (ACCESS_CONTROL_ALLOW_HEADERS, "Accept, Content-Type"),
            (ACCESS_CONTROL_MAX_AGE, "86400"),
        ],
    )
        .into_response()
}

/// Strict validation of rule text posted as the request body.
async fn validate_rules(body: String) -> Response {
    let invalid = invalid_tokens(&body);
    match invalid.first() {
        None => Json(json!({
            "valid": true,
            "tokens": tokenize(&body).len(),
        }))
        .into_response(),
        Some(first) => {
            let body = json!({
                "valid": false,
                "code": INVALID_IP_FORMAT,
                "message": RuleError::from(first.clone()).to_string(),
                "invalid": invalid,
            });
            (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response()
        }
    }
}

/// Re-read the allow file. Only allowed clients may trigger it.
async fn reload(State(state): State<AppState>, Extension(decision): Extension<GuardDecision>) -> Response {
    if !decision.allowed {
        return forbidden(&decision);
    }
    match reload_rules(&state.provider).await {
        Ok(rules) => {
            tracing::info!(client = %decision.client, "rules reloaded on request");
            Json(version_body(&state, &rules)).into_response()
        }
        Err(err) => {
            tracing::error!(error = %err, "rule reload task failed");
            let body = json!({
                "error": "reload_failed",
                "engine": ENGINE_NAME,
            });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

async fn not_found(uri: Uri) -> Response {
    let body = json!({
        "error": "not_found",
        "path": uri.path(),
        "engine": ENGINE_NAME,
    });
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

/// Apply the guard to an application router.
pub fn protect(app: Router<AppState>, state: AppState) -> Router<AppState> {
    app.layer(from_fn_with_state(state, guard))
}

/// The gate's router: unguarded system endpoints plus guarded routes.
pub fn build_router(state: AppState) -> Router {
    let guarded = Router::new()
        .route("/_guard", get(guard_info))
        .route("/_reload", post(reload))
        .fallback(not_found);

    Router::new()
        .route("/_version", get(version_info).options(preflight))
        .route("/_health", get(version_info).options(preflight))
        .route("/_validate", post(validate_rules).options(preflight))
        .merge(protect(guarded, state.clone()))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{FileRuleSource, LoadError};
    use axum::body::Body;
    use axum::http::Method;
    use http_body_util::BodyExt;
    use std::sync::Mutex;
    use tower::ServiceExt;

    const RFC1918: &str = "10.0.0.0-10.255.255.255|172.16.0.0-172.31.255.255|192.168.0.0-192.168.255.255";

    struct StaticSource(Mutex<Option<String>>);

    impl FileRuleSource for StaticSource {
        fn load(&self) -> Result<String, LoadError> {
            self.0
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| LoadError::NotFound("static".to_string()))
        }
    }

    fn state_with(file: Option<&str>, trust: bool, enforce: bool, cache: bool) -> (AppState, Arc<StaticSource>) {
        let source = Arc::new(StaticSource(Mutex::new(file.map(str::to_string))));
        let provider = RuleProvider::new(RFC1918, source.clone(), cache);
        let state = AppState {
            provider: Arc::new(provider),
            trust_proxy_headers: trust,
            enforce,
        };
        (state, source)
    }

    fn request(method: Method, uri: &str, peer: [u8; 4], body: &str) -> Request {
        let mut req = axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::from(body.to_string()))
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((peer, 40000))));
        req
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn header<'a>(response: &'a Response, name: &str) -> &'a str {
        response.headers().get(name).unwrap().to_str().unwrap()
    }

    #[test]
    fn test_client_address_peer_only_without_trust() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("8.8.8.8"));
        let peer = Some(SocketAddr::from(([10, 0, 0, 5], 1234)));
        assert_eq!(client_address(&headers, peer, false), "10.0.0.5");
    }

    #[test]
    fn test_client_address_trusted_headers() {
        let peer = Some(SocketAddr::from(([10, 0, 0, 5], 1234)));

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" 203.0.113.9 , 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.1"));
        assert_eq!(client_address(&headers, peer, true), "203.0.113.9");

        headers.remove("x-forwarded-for");
        assert_eq!(client_address(&headers, peer, true), "198.51.100.1");

        headers.remove("x-real-ip");
        assert_eq!(client_address(&headers, peer, true), "10.0.0.5");
        assert_eq!(client_address(&headers, None, true), "");
    }

    #[test]
    fn test_client_address_normalizes_ipv6() {
        let headers = HeaderMap::new();
        let loopback: SocketAddr = "[::1]:8080".parse().unwrap();
        assert_eq!(client_address(&headers, Some(loopback), false), "127.0.0.1");
        let mapped: SocketAddr = "[::ffff:192.168.0.5]:8080".parse().unwrap();
        assert_eq!(client_address(&headers, Some(mapped), false), "192.168.0.5");
    }

    #[tokio::test]
    async fn test_guard_annotates_allowed_request() {
        let (state, _) = state_with(Some("172.30.1.10-173.30.1.45"), false, false, false);
        let app = build_router(state);

        let response = app
            .oneshot(request(Method::GET, "/_guard", [172, 30, 1, 20], ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, HEADER_ALLOWED), "true");
        assert_eq!(header(&response, HEADER_REASON), "allowed:user(172.30.1.10-173.30.1.45)");

        let json = body_json(response).await;
        assert_eq!(json["client"], "172.30.1.20");
        assert_eq!(json["allowed"], true);
    }

    #[tokio::test]
    async fn test_guard_annotates_denied_without_enforce() {
        let (state, _) = state_with(None, false, false, false);
        let app = build_router(state);

        let response = app
            .oneshot(request(Method::GET, "/_guard", [8, 8, 8, 8], ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, HEADER_ALLOWED), "false");
        assert_eq!(header(&response, HEADER_REASON), "denied:no-match");
    }

    #[tokio::test]
    async fn test_guard_enforce_returns_403() {
        let (state, _) = state_with(None, false, true, false);
        let app = build_router(state);

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/anything", [8, 8, 8, 8], ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(header(&response, HEADER_ALLOWED), "false");
        let json = body_json(response).await;
        assert_eq!(json["error"], "forbidden");
        assert_eq!(json["reason"], "denied:no-match");

        let response = app
            .oneshot(request(Method::GET, "/anything", [192, 168, 1, 10], ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            header(&response, HEADER_REASON),
            "allowed:default(192.168.0.0-192.168.255.255)"
        );
    }

    #[tokio::test]
    async fn test_guard_trusts_forwarded_for() {
        let (state, _) = state_with(None, true, false, false);
        let app = build_router(state);

        let mut req = request(Method::GET, "/_guard", [8, 8, 8, 8], "");
        req.headers_mut()
            .insert("x-forwarded-for", HeaderValue::from_static("10.9.8.7, 8.8.8.8"));
        let response = app.oneshot(req).await.unwrap();
        assert_eq!(header(&response, HEADER_ALLOWED), "true");
        let json = body_json(response).await;
        assert_eq!(json["client"], "10.9.8.7");
    }

    #[tokio::test]
    async fn test_version_reports_rules() {
        let (state, _) = state_with(Some("203.0.113.7|junk"), false, false, true);
        let app = build_router(state);

        let response = app
            .oneshot(request(Method::GET, "/_version", [8, 8, 8, 8], ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(HEADER_ALLOWED).is_none());
        assert_eq!(header(&response, "access-control-allow-origin"), "*");

        let json = body_json(response).await;
        assert_eq!(json["engine"], ENGINE_NAME);
        assert_eq!(json["default_rules"], 3);
        assert_eq!(json["file_rules"], 1);
        assert_eq!(json["invalid_rules"], 1);
        assert_eq!(json["cache"], "cached");
        assert_eq!(json["rules_hash"].as_str().unwrap().len(), 16);
    }

    #[tokio::test]
    async fn test_validate_endpoint() {
        let (state, _) = state_with(None, false, false, false);
        let app = build_router(state);

        let response = app
            .clone()
            .oneshot(request(Method::POST, "/_validate", [8, 8, 8, 8], "10.0.0.0/8\n1.2.3.*"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["valid"], true);
        assert_eq!(json["tokens"], 2);

        let response = app
            .oneshot(request(
                Method::POST,
                "/_validate",
                [8, 8, 8, 8],
                "999.999.1.1|hello-world|10.0.0.0/33",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = body_json(response).await;
        assert_eq!(json["code"], "INVALID_IP_FORMAT");
        assert_eq!(json["message"], "Invalid rule token at #1: [999.999.1.1]");
        assert_eq!(json["invalid"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_reload_refreshes_cache() {
        let (state, source) = state_with(Some("8.8.8.8"), false, false, true);
        let app = build_router(state);

        *source.0.lock().unwrap() = Some("9.9.9.9".to_string());
        let response = app
            .clone()
            .oneshot(request(Method::GET, "/_guard", [9, 9, 9, 9], ""))
            .await
            .unwrap();
        assert_eq!(header(&response, HEADER_ALLOWED), "false");

        let response = app
            .clone()
            .oneshot(request(Method::POST, "/_reload", [10, 0, 0, 1], ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request(Method::GET, "/_guard", [9, 9, 9, 9], ""))
            .await
            .unwrap();
        assert_eq!(header(&response, HEADER_ALLOWED), "true");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fresh_rules_load_off_runtime() {
        let (state, source) = state_with(None, false, false, false);
        let app = build_router(state);

        let response = app
            .clone()
            .oneshot(request(Method::GET, "/_guard", [9, 9, 9, 9], ""))
            .await
            .unwrap();
        assert_eq!(header(&response, HEADER_ALLOWED), "false");

        *source.0.lock().unwrap() = Some("9.9.9.9".to_string());
        let response = app
            .clone()
            .oneshot(request(Method::GET, "/_guard", [9, 9, 9, 9], ""))
            .await
            .unwrap();
        assert_eq!(header(&response, HEADER_ALLOWED), "true");
        assert_eq!(header(&response, HEADER_REASON), "allowed:user(9.9.9.9)");

        let response = app
            .oneshot(request(Method::GET, "/_version", [8, 8, 8, 8], ""))
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["file_rules"], 1);
        assert_eq!(json["cache"], "fresh");
    }

    #[tokio::test]
    async fn test_current_rules_uses_cache_without_reading() {
        let (state, source) = state_with(Some("8.8.8.8"), false, false, true);
        *source.0.lock().unwrap() = None;
        let rules = current_rules(&state.provider).await;
        assert!(rules.is_allowed("8.8.8.8"));
    }

    #[tokio::test]
    async fn test_reload_refused_for_denied_client() {
        let (state, _) = state_with(None, false, false, true);
        let app = build_router(state);
        let response = app
            .oneshot(request(Method::POST, "/_reload", [8, 8, 8, 8], ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}

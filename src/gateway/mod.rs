//! Axum-based HTTP gateway.
//!
//! Binds the credential verifier, the role gate, and the device transition
//! engine to routes, with:
//! - Request body size limits (16KB max)
//! - Request timeouts (30s)
//! - CORS restricted to configured origins (or any, when none are set)
//! - Sliding-window rate limiting on the login route
//!
//! Every protected route goes through [`require_role`]; the login route is
//! the credential-issuing operation and bypasses the gate entirely.

use crate::auth::store::UserStore;
use crate::auth::token::{CredentialError, CredentialKey};
use crate::auth::{authorize, SessionIdentity, ROLE_ADMIN};
use crate::config::Config;
use crate::devices::engine::TransitionEngine;
use crate::devices::store::DeviceStore;
use crate::devices::WireDevice;
use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

/// Maximum request body size (16KB). Login and mutation bodies are tiny.
pub const MAX_BODY_SIZE: usize = 16_384;
/// Request timeout (30s). Nothing in this gateway blocks unboundedly.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;
/// Sliding window used by login rate limiting.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Sliding-window rate limiter for the login route, keyed per client.
#[derive(Debug)]
pub struct LoginRateLimiter {
    limit_per_window: u32,
    window: Duration,
    requests: Mutex<HashMap<String, Vec<Instant>>>,
}

impl LoginRateLimiter {
    fn new(limit_per_window: u32) -> Self {
        Self {
            limit_per_window,
            window: Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
            requests: Mutex::new(HashMap::new()),
        }
    }

    fn allow(&self, key: &str) -> bool {
        if self.limit_per_window == 0 {
            return true;
        }

        let now = Instant::now();
        let cutoff = now.checked_sub(self.window).unwrap_or(now);

        let mut requests = self.requests.lock();

        // Sweep once the map accumulates many distinct clients so it
        // cannot grow unbounded.
        if requests.len() > 1024 {
            requests.retain(|_, timestamps| {
                timestamps.retain(|t| *t > cutoff);
                !timestamps.is_empty()
            });
        }

        let entry = requests.entry(key.to_owned()).or_default();
        entry.retain(|instant| *instant > cutoff);

        if entry.len() >= self.limit_per_window as usize {
            return false;
        }

        entry.push(now);
        true
    }
}

fn client_key_from_headers(headers: &HeaderMap) -> String {
    for header_name in ["X-Forwarded-For", "X-Real-IP"] {
        if let Some(value) = headers.get(header_name).and_then(|v| v.to_str().ok()) {
            let first = value.split(',').next().unwrap_or("").trim();
            if !first.is_empty() {
                return first.to_owned();
            }
        }
    }
    "unknown".into()
}

/// Shared state for all axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub users: Arc<UserStore>,
    pub registry: Arc<DeviceStore>,
    pub engine: Arc<TransitionEngine>,
    pub credentials: Arc<CredentialKey>,
    pub login_limiter: Arc<LoginRateLimiter>,
}

/// Run the HTTP gateway.
pub async fn run_gateway(host: &str, port: u16, config: &Config) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let display_addr = format!("{host}:{}", listener.local_addr()?.port());

    let workspace = config.ensure_workspace()?;
    let users = Arc::new(UserStore::open(&workspace.join("users.db"))?);
    let registry = Arc::new(DeviceStore::open(&workspace.join("devices.db"))?);
    let seeded = registry.seed_defaults()?;
    if seeded > 0 {
        tracing::info!(count = seeded, "provisioned stock device fleet");
    }

    let secret = config.auth.resolve_secret().unwrap_or_else(|| {
        tracing::warn!(
            "no token secret configured — generating an ephemeral one; \
             issued credentials will not survive a restart"
        );
        generate_secret()
    });
    let credentials = Arc::new(CredentialKey::new(
        secret.as_bytes(),
        config.auth.token_ttl_secs,
    ));

    let state = AppState {
        users,
        engine: Arc::new(TransitionEngine::new(Arc::clone(&registry))),
        registry,
        credentials,
        login_limiter: Arc::new(LoginRateLimiter::new(
            config.gateway.login_rate_limit_per_minute,
        )),
    };

    println!("🏠 hearth gateway listening on http://{display_addr}");
    println!("  POST /api/login               — {{\"email\", \"password\"}} → credential");
    println!("  GET  /api/devices             — list the device fleet");
    println!("  POST /api/devices/{{id}}/toggle — toggle, or {{\"value\": n}} to set");
    println!("  GET  /api/admin/users         — user roster (admin role)");
    println!("  GET  /health                  — health check");
    println!("  Press Ctrl+C to stop.\n");

    let cors = build_cors(&config.gateway.cors_allowed_origins);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/api/login", post(handle_login))
        .route("/api/devices", get(handle_devices_list))
        .route("/api/devices/{id}/toggle", post(handle_device_mutate))
        .route("/api/admin/users", get(handle_admin_users))
        .with_state(state)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_SIZE))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(REQUEST_TIMEOUT_SECS),
        ));

    axum::serve(listener, app).await?;

    Ok(())
}

fn build_cors(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "ignoring unparseable CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

/// Generate a random process-lifetime signing secret (hex-encoded).
fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

// ══════════════════════════════════════════════════════════════════════════════
// AXUM HANDLERS
// ══════════════════════════════════════════════════════════════════════════════

type ApiResponse = (StatusCode, Json<serde_json::Value>);

/// Verify the bearer credential and apply the role gate. The single choke
/// point in front of every protected route.
fn require_role(
    state: &AppState,
    headers: &HeaderMap,
    required_role: Option<&str>,
) -> Result<SessionIdentity, ApiResponse> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let identity = state.credentials.verify_bearer(auth_header).map_err(|e| {
        tracing::warn!("request rejected: {e}");
        let message = match e {
            CredentialError::Missing => "Missing Authorization header",
            CredentialError::Invalid => "Invalid or expired credential",
        };
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": message})),
        )
    })?;

    if !authorize(&identity, required_role) {
        tracing::warn!(
            user = identity.email,
            required = required_role.unwrap_or("-"),
            "request rejected — insufficient role"
        );
        return Err((
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({"error": "Forbidden — insufficient role"})),
        ));
    }

    Ok(identity)
}

/// GET /health — always public (no secrets leaked)
async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Request body for login.
#[derive(serde::Deserialize)]
struct LoginBody {
    email: String,
    password: String,
}

/// POST /api/login — exchange email + password for a signed credential.
///
/// The one unauthenticated API route; it is what issues the credential
/// every other route demands.
async fn handle_login(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<LoginBody>, axum::extract::rejection::JsonRejection>,
) -> ApiResponse {
    let client_key = client_key_from_headers(&headers);
    if !state.login_limiter.allow(&client_key) {
        tracing::warn!("/api/login rate limit exceeded for key: {client_key}");
        let err = serde_json::json!({
            "error": "Too many login attempts. Please retry later.",
            "retry_after": RATE_LIMIT_WINDOW_SECS,
        });
        return (StatusCode::TOO_MANY_REQUESTS, Json(err));
    }

    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!("login JSON parse error: {e}");
            let err = serde_json::json!({
                "error": "Invalid JSON body. Expected: {\"email\": \"...\", \"password\": \"...\"}"
            });
            return (StatusCode::BAD_REQUEST, Json(err));
        }
    };

    let user = match state.users.authenticate(&body.email, &body.password) {
        Ok(u) => u,
        Err(_) => {
            // Unknown email and wrong password collapse into one signal.
            tracing::warn!("login rejected");
            let err = serde_json::json!({"error": "Invalid email or password"});
            return (StatusCode::UNAUTHORIZED, Json(err));
        }
    };

    let token = state.credentials.issue(user.id, &user.email, &user.roles);
    tracing::info!(user = user.email, "login succeeded");
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "token": token,
            "user": {
                "email": user.email,
                "firstName": user.first_name,
                "roles": user.roles,
            },
        })),
    )
}

/// GET /api/devices — the full fleet, id-ascending. Any verified identity.
async fn handle_devices_list(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    if let Err(resp) = require_role(&state, &headers, None) {
        return resp;
    }

    match state.registry.list() {
        Ok(devices) => {
            let wire: Vec<WireDevice> = devices.iter().map(WireDevice::from).collect();
            (
                StatusCode::OK,
                Json(serde_json::to_value(wire).unwrap_or_default()),
            )
        }
        Err(e) => {
            tracing::error!("device listing failed: {e}");
            let err = serde_json::json!({"error": "Server error"});
            (StatusCode::INTERNAL_SERVER_ERROR, Json(err))
        }
    }
}

/// Request body for device mutation. An absent `value` means toggle.
#[derive(Debug, Default, serde::Deserialize)]
struct MutateBody {
    #[serde(default)]
    value: Option<i64>,
}

/// POST /api/devices/{id}/toggle — apply one mutation to one device.
///
/// Uniform request shape across all six kinds: `{"value": n}` is a direct
/// set, an empty body a toggle. The engine owns the per-kind semantics.
async fn handle_device_mutate(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    body: Result<Json<MutateBody>, axum::extract::rejection::JsonRejection>,
) -> ApiResponse {
    if let Err(resp) = require_role(&state, &headers, None) {
        return resp;
    }

    // A missing or empty body is a plain toggle.
    let body = body.map(|Json(b)| b).unwrap_or_default();

    match state.engine.apply_mutation(id, body.value) {
        Ok(Some(device)) => (
            StatusCode::OK,
            Json(serde_json::to_value(WireDevice::from(&device)).unwrap_or_default()),
        ),
        Ok(None) => {
            tracing::warn!(id, "mutation of unknown device");
            let err = serde_json::json!({"error": "Unknown device id"});
            (StatusCode::NOT_FOUND, Json(err))
        }
        Err(e) => {
            tracing::error!("device mutation failed: {e}");
            let err = serde_json::json!({"error": "Server error"});
            (StatusCode::INTERNAL_SERVER_ERROR, Json(err))
        }
    }
}

/// GET /api/admin/users — role-filtered user roster. Admin only.
async fn handle_admin_users(State(state): State<AppState>, headers: HeaderMap) -> ApiResponse {
    if let Err(resp) = require_role(&state, &headers, Some(ROLE_ADMIN)) {
        return resp;
    }

    match state.users.list_users() {
        Ok(users) => (
            StatusCode::OK,
            Json(serde_json::to_value(users).unwrap_or_default()),
        ),
        Err(e) => {
            tracing::error!("user roster listing failed: {e}");
            let err = serde_json::json!({"error": "Server error"});
            (StatusCode::INTERNAL_SERVER_ERROR, Json(err))
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// TESTS
// ══════════════════════════════════════════════════════════════════════════════

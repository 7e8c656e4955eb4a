//! Authentication middleware.
//!
//! Two ways in: an IAM pre-signed identity header checked against `$iam`
//! glob entries, or HTTP Basic against the route class's credential map.
//! Stored passwords starting with `$` are bcrypt hashes; anything else is
//! compared as plaintext in constant time.

use crate::error::ApiError;
use crate::metrics::failure_log;
use crate::presign::PRESIGN_HEADER;
use crate::state::AppState;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use globset::Glob;
use lnvault_core::IAM_AUTH_FLAG;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use subtle::ConstantTimeEq;

/// Timeout for the upstream identity check during authentication.
const PRESIGN_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// The authenticated caller, attached to admitted requests.
#[derive(Clone, Debug)]
pub struct AuthPrincipal {
    /// Configured user name (or the matching `$iam` glob pattern).
    pub name: String,
    /// Remote address, for audit logging.
    pub addr: String,
    /// Request method, for audit logging.
    pub method: String,
}

/// Auth middleware for `/get/` routes.
pub async fn read_auth(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let credentials = state.credentials.clone();
    run_auth(&state, &credentials.read, req, next).await
}

/// Auth middleware for `/put/` and `/verify/` routes.
pub async fn write_auth(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let credentials = state.credentials.clone();
    run_auth(&state, &credentials.write, req, next).await
}

/// Auth middleware for `/query/` routes (read or write keys admit).
pub async fn query_auth(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let credentials = state.credentials.clone();
    run_auth(&state, &credentials.query, req, next).await
}

async fn run_auth(
    state: &AppState,
    credentials: &HashMap<String, String>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let method = req.method().to_string();

    let presign_header = req
        .headers()
        .get(PRESIGN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    let user = match verify_presign(state, presign_header.as_deref(), credentials).await {
        Some(user) => Some(user),
        None => verify_basic(&req, credentials),
    };

    let Some(user) = user else {
        // the auth material here is invalid - do not use it for audit logging
        failure_log("invalid", &addr, "Unauthorized", &method);
        return Ok(ApiError::Unauthorized.into_response());
    };

    req.extensions_mut().insert(AuthPrincipal {
        name: user,
        addr,
        method,
    });
    Ok(next.run(req).await)
}

/// Admit a request carrying a valid pre-signed identity header whose ARN
/// matches some `$iam` glob entry. Returns the matching pattern.
async fn verify_presign(
    state: &AppState,
    presign: Option<&str>,
    credentials: &HashMap<String, String>,
) -> Option<String> {
    let presign = presign?;
    if presign.is_empty() {
        return None;
    }

    let arn = match state.presign.verify(presign, PRESIGN_CHECK_TIMEOUT).await {
        Ok(arn) => arn,
        Err(err) => {
            tracing::warn!(error = %err, "presign check failed");
            return None;
        }
    };

    for (pattern, password) in credentials {
        if password != IAM_AUTH_FLAG {
            continue;
        }
        let Ok(glob) = Glob::new(pattern) else {
            continue;
        };
        if glob.compile_matcher().is_match(&arn) {
            return Some(pattern.clone());
        }
    }

    None
}

/// Check HTTP Basic credentials against the map. Returns the user name.
fn verify_basic(req: &Request, credentials: &HashMap<String, String>) -> Option<String> {
    let header = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, password) = decoded.split_once(':')?;

    let stored = credentials.get(user)?;
    let admitted = if stored.starts_with('$') {
        // password hash; `$iam` entries fail this by construction
        bcrypt::verify(password, stored).unwrap_or(false)
    } else {
        stored.as_bytes().ct_eq(password.as_bytes()).into()
    };

    admitted.then(|| user.to_string())
}

//! Vault resource handlers: put, get, query, delete, verify.

use crate::auth::AuthPrincipal;
use crate::error::{ApiError, ApiResult};
use crate::metrics::{audit_log, failure_log};
use crate::probe::obtain_cert;
use crate::state::{AppState, DEFAULT_READ_DURATION};
use axum::Json;
use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lnvault_core::record::{is_alphanumeric, safe_base64_decode, validate_pubkey};
use lnvault_core::{ApiType, NodeCredential, extract_host_and_port};
use lnvault_storage::Change;
use lnvault_token::{AuthenticatorKind, constrain, detect, kind_for_api};
use std::time::Duration;
use url::Url;

/// Validity probe duration used on every write.
const PROBE_CONSTRAIN: Duration = Duration::from_secs(60);

type Principal = Option<Extension<AuthPrincipal>>;

fn audit(principal: &Principal, message: &str) {
    if let Some(Extension(p)) = principal {
        audit_log(&p.name, &p.addr, message, &p.method);
    }
}

fn failure(principal: &Principal, message: &str) {
    if let Some(Extension(p)) = principal {
        failure_log(&p.name, &p.addr, message, &p.method);
    }
}

fn bad_request(principal: &Principal, reason: &str, log_reason: &str) -> ApiError {
    failure(principal, &format!("Bad request - {log_reason}"));
    ApiError::BadRequest(reason.to_string())
}

fn check_unique_id(principal: &Principal, unique_id: &str) -> ApiResult<()> {
    if unique_id.is_empty() || is_alphanumeric(unique_id) {
        Ok(())
    } else {
        Err(bad_request(
            principal,
            "uniqueId parameter is invalid",
            &format!("uniqueId parameter is invalid - {unique_id}"),
        ))
    }
}

/// GET / - greeting.
pub async fn root() -> &'static str {
    "Welcome to Lightning Vault!\n"
}

// ---- put -------------------------------------------------------------

/// POST /put/ - store a credential in the default namespace.
pub async fn put(
    State(state): State<AppState>,
    principal: Principal,
    body: String,
) -> ApiResult<Response> {
    put_inner(state, String::new(), principal, body).await
}

/// POST /put/{uniqueId} - store a credential in a tenant namespace.
pub async fn put_scoped(
    State(state): State<AppState>,
    Path(unique_id): Path<String>,
    principal: Principal,
    body: String,
) -> ApiResult<Response> {
    put_inner(state, unique_id, principal, body).await
}

async fn put_inner(
    state: AppState,
    unique_id: String,
    principal: Principal,
    body: String,
) -> ApiResult<Response> {
    let mut data: NodeCredential = serde_json::from_str(&body).map_err(|err| {
        bad_request(
            &principal,
            "json decoding failed",
            &format!("json decoding failed: {err}"),
        )
    })?;

    check_unique_id(&principal, &unique_id)?;

    if !validate_pubkey(&data.pubkey) {
        return Err(bad_request(
            &principal,
            "pubkey validation failed",
            &format!("pubkey validation failed: {}", data.pubkey),
        ));
    }

    // writers for the same (pubkey, uid) are serialized end to end
    let _write_guard = state
        .index
        .write_lock(&data.pubkey, &unique_id)
        .lock_owned()
        .await;

    let orig = state.index.get(&format!("{}{}", data.pubkey, unique_id));

    if data.endpoint.is_empty() {
        match &orig {
            Some(orig) => {
                audit(&principal, "using old endpoint (no new one supplied)");
                data.endpoint = orig.endpoint.clone();
            }
            None => return Err(bad_request(&principal, "empty endpoint", "empty endpoint")),
        }
    }

    match data.api_type {
        Some(code) => match ApiType::from_code(code) {
            Ok(ApiType::ClnSocket) | Err(_) => {
                return Err(bad_request(
                    &principal,
                    "invalid api type",
                    &format!("invalid api type - {code}"),
                ));
            }
            Ok(_) => {}
        },
        None => match &orig {
            Some(orig) => {
                // a null api_type on an existing record keeps the stored one
                data.api_type = orig.api_type;
            }
            None => auto_detect_api_type(&mut data),
        },
    }

    let mut hostname = String::new();
    let mut port = -1;
    let mut need_cert = false;

    match ApiType::from_opt_code(data.api_type).ok().flatten() {
        Some(ApiType::LndGrpc) => {
            (hostname, port) = extract_host_and_port(&data.endpoint);
            need_cert = true;
            if port < 0 {
                return Err(bad_request(
                    &principal,
                    "invalid endpoint",
                    &format!("invalid endpoint - {}", data.endpoint),
                ));
            }
        }
        Some(ApiType::LndRest) => {
            (hostname, port) = extract_host_and_port(&data.endpoint);
            need_cert = true;
        }
        Some(ApiType::ClnCommando) => {}
        Some(ApiType::ClnSocket) => {
            return Err(bad_request(
                &principal,
                "unsupported api type",
                "unsupported api type",
            ));
        }
        None => {}
    }

    if port > 0 {
        hostname = format!("{hostname}:{port}");
    }

    if data.certificate_base64.is_empty() {
        match &orig {
            Some(orig) if !orig.certificate_base64.is_empty() => {
                audit(&principal, "using old certificate (no new one supplied)");
                data.certificate_base64 = orig.certificate_base64.clone();
            }
            _ => {
                // last resort until every writer supplies certificates
                if need_cert {
                    data.certificate_base64 = obtain_cert(&hostname).await;
                }
            }
        }
    }

    if data.certificate_base64.is_empty() && need_cert {
        return Err(bad_request(
            &principal,
            "empty certificate",
            "empty certificate",
        ));
    }

    if safe_base64_decode(&data.certificate_base64).is_err() {
        return Err(bad_request(
            &principal,
            "invalid certificate",
            "certificate is not valid base64",
        ));
    }

    if data.macaroon_hex.is_empty() {
        match &orig {
            Some(orig) => {
                audit(&principal, "using old macaroon/rune (no new one supplied)");
                data.macaroon_hex = orig.macaroon_hex.clone();
            }
            None => {
                return Err(bad_request(
                    &principal,
                    "empty macaroon/rune value",
                    "empty macaroon/rune value",
                ));
            }
        }
    }

    if data.cert_verification_type.is_none() {
        if let Some(orig) = &orig {
            if orig.cert_verification_type.is_some() {
                audit(
                    &principal,
                    "using old certificate verification type (no new one supplied)",
                );
                data.cert_verification_type = orig.cert_verification_type;
            }
        }
    }

    if invalid_authenticator(&data) {
        return Err(bad_request(
            &principal,
            "invalid macaroon/rune - not compatible with API type",
            "invalid macaroon/rune - not compatible with API type",
        ));
    }

    let hint = ApiType::from_opt_code(data.api_type).ok().flatten();
    if constrain(&data.macaroon_hex, PROBE_CONSTRAIN, hint).is_err() {
        return Err(bad_request(
            &principal,
            "invalid macaroon/rune",
            "invalid macaroon/rune - could not constrain",
        ));
    }

    let serialized = serde_json::to_string(&data).map_err(|err| {
        bad_request(
            &principal,
            "json encoding failed",
            &format!("json encoding failed: {err}"),
        )
    })?;

    if state.config.verify {
        if let Err(err) = state.verifier.verify(&data, &data.pubkey).await {
            return Err(bad_request(
                &principal,
                "invalid credentials - check failed",
                &format!("live verification failed: {err}"),
            ));
        }
    }

    // persist first, then publish, so a storage failure leaves no
    // phantom index entry
    let name = state.secret_name(&data.pubkey, &unique_id);
    let (_, change) = match state.storage.put(&name, &serialized).await {
        Ok(result) => result,
        Err(err) => {
            failure(
                &principal,
                &format!("backing store put failed with error {err}"),
            );
            return Err(ApiError::Storage(err));
        }
    };

    state.index.publish(&data, &unique_id);

    let response = if change == Change::Updated {
        audit(&principal, &format!("Put (update) {}", data.pubkey));
        (
            StatusCode::OK,
            format!("Updated secret {}", data.pubkey),
        )
    } else {
        audit(&principal, &format!("Put (new) {}", data.pubkey));
        (
            StatusCode::CREATED,
            format!("Inserted secret {}", data.pubkey),
        )
    };
    Ok(response.into_response())
}

// ---- get -------------------------------------------------------------

/// GET/POST /get/{pubkey} - fetch a constrained credential.
pub async fn get_credential(
    State(state): State<AppState>,
    Path(pubkey): Path<String>,
    principal: Principal,
) -> ApiResult<Response> {
    get_inner(state, String::new(), pubkey, principal).await
}

/// GET/POST /get/{uniqueId}/{pubkey}.
pub async fn get_credential_scoped(
    State(state): State<AppState>,
    Path((unique_id, pubkey)): Path<(String, String)>,
    principal: Principal,
) -> ApiResult<Response> {
    get_inner(state, unique_id, pubkey, principal).await
}

async fn get_inner(
    state: AppState,
    unique_id: String,
    pubkey: String,
    principal: Principal,
) -> ApiResult<Response> {
    check_unique_id(&principal, &unique_id)?;

    let Some(record) = state.index.get(&format!("{pubkey}{unique_id}")) else {
        failure(&principal, &format!("[Get] Secret {pubkey} not found"));
        return Err(ApiError::NotFound);
    };

    let duration = principal
        .as_ref()
        .map(|Extension(p)| state.read_duration(&p.name))
        .unwrap_or(DEFAULT_READ_DURATION);

    let constrained = constrained_copy(&record, duration);

    audit(
        &principal,
        &format!("Get {pubkey} ({unique_id}) valid for {duration:?}"),
    );
    Ok(Json(constrained).into_response())
}

/// A copy of the record whose credential is attenuated to `duration`.
/// When attenuation fails the credential is censored instead.
fn constrained_copy(record: &NodeCredential, duration: Duration) -> NodeCredential {
    let mut copy = record.clone();
    let hint = ApiType::from_opt_code(record.api_type).ok().flatten();
    copy.macaroon_hex = constrain(&record.macaroon_hex, duration, hint).unwrap_or_default();
    copy
}

// ---- query -----------------------------------------------------------

/// GET/POST /query/{pubkey} - existence check, leaking nothing else.
pub async fn query(
    State(state): State<AppState>,
    Path(pubkey): Path<String>,
    principal: Principal,
) -> ApiResult<Response> {
    query_inner(state, String::new(), pubkey, principal).await
}

/// GET/POST /query/{uniqueId}/{pubkey}.
pub async fn query_scoped(
    State(state): State<AppState>,
    Path((unique_id, pubkey)): Path<(String, String)>,
    principal: Principal,
) -> ApiResult<Response> {
    query_inner(state, unique_id, pubkey, principal).await
}

async fn query_inner(
    state: AppState,
    unique_id: String,
    pubkey: String,
    principal: Principal,
) -> ApiResult<Response> {
    check_unique_id(&principal, &unique_id)?;
    audit(&principal, &format!("Query {pubkey} ({unique_id})"));

    if !state.index.contains(&format!("{pubkey}{unique_id}")) {
        failure(&principal, &format!("[Query] Secret {pubkey} not found"));
        return Err(ApiError::NotFound);
    }

    Ok((StatusCode::OK, "Macaroon exists\n").into_response())
}

// ---- delete ----------------------------------------------------------

/// DELETE /put/{pubkey} - tombstone a credential.
pub async fn delete(
    State(state): State<AppState>,
    Path(pubkey): Path<String>,
    principal: Principal,
) -> ApiResult<Response> {
    delete_inner(state, String::new(), pubkey, principal).await
}

/// DELETE /put/{uniqueId}/{pubkey}.
pub async fn delete_scoped(
    State(state): State<AppState>,
    Path((unique_id, pubkey)): Path<(String, String)>,
    principal: Principal,
) -> ApiResult<Response> {
    delete_inner(state, unique_id, pubkey, principal).await
}

async fn delete_inner(
    state: AppState,
    unique_id: String,
    pubkey: String,
    principal: Principal,
) -> ApiResult<Response> {
    check_unique_id(&principal, &unique_id)?;
    audit(&principal, &format!("Delete {pubkey} ({unique_id})"));

    let Some(record) = state.index.get(&format!("{pubkey}{unique_id}")) else {
        failure(&principal, &format!("[Delete] Secret {pubkey} not found"));
        return Err(ApiError::NotFound);
    };

    let _write_guard = state
        .index
        .write_lock(&record.pubkey, &unique_id)
        .lock_owned()
        .await;

    let name = state.secret_name(&record.pubkey, &unique_id);
    if let Err(err) = state.storage.delete(&name).await {
        failure(
            &principal,
            &format!("backing store delete failed with error {err}"),
        );
        return Err(ApiError::Storage(err));
    }

    state.index.retract(&record, &unique_id);

    Ok((StatusCode::OK, "Macaroon deleted\n").into_response())
}

// ---- verify ----------------------------------------------------------

/// GET/POST /verify/{pubkey} - live connection probe.
pub async fn verify(
    State(state): State<AppState>,
    Path(pubkey): Path<String>,
    principal: Principal,
) -> ApiResult<Response> {
    verify_inner(state, String::new(), pubkey, principal).await
}

/// GET/POST /verify/{uniqueId}/{pubkey}.
pub async fn verify_scoped(
    State(state): State<AppState>,
    Path((unique_id, pubkey)): Path<(String, String)>,
    principal: Principal,
) -> ApiResult<Response> {
    verify_inner(state, unique_id, pubkey, principal).await
}

async fn verify_inner(
    state: AppState,
    unique_id: String,
    pubkey: String,
    principal: Principal,
) -> ApiResult<Response> {
    check_unique_id(&principal, &unique_id)?;
    audit(&principal, &format!("Verify {pubkey} ({unique_id})"));

    if !validate_pubkey(&pubkey) {
        return Err(bad_request(
            &principal,
            "pubkey validation failed",
            &format!("pubkey validation failed: {pubkey}"),
        ));
    }

    let Some(record) = state.index.get(&format!("{pubkey}{unique_id}")) else {
        failure(&principal, &format!("[Verify] Secret {pubkey} not found"));
        return Err(ApiError::NotFound);
    };

    if let Err(err) = state.verifier.verify(&record, &pubkey).await {
        return Err(bad_request(
            &principal,
            "invalid credentials - check failed",
            &format!("live verification failed: {err}"),
        ));
    }

    Ok((StatusCode::OK, "Everything is ok\n").into_response())
}

// ---- shared helpers --------------------------------------------------

/// Pick an API flavor for records that declare none on first insert.
fn auto_detect_api_type(data: &mut NodeCredential) {
    if data.endpoint.starts_with("http") {
        data.api_type = Some(ApiType::LndRest.code());
        match Url::parse(&data.endpoint) {
            Err(_) => data.api_type = Some(ApiType::LndGrpc.code()),
            Ok(url) => {
                if url.port() == Some(10009) {
                    data.api_type = Some(ApiType::LndGrpc.code());
                    data.endpoint =
                        format!("{}:10009", url.host_str().unwrap_or_default());
                }
            }
        }
    } else {
        data.api_type = Some(ApiType::LndGrpc.code());
    }

    if detect(&data.macaroon_hex, Some(ApiType::ClnCommando)) == AuthenticatorKind::Rune {
        data.api_type = Some(ApiType::ClnCommando.code());
    }
}

/// A credential incompatible with the declared API flavor is refused.
fn invalid_authenticator(data: &NodeCredential) -> bool {
    let Some(code) = data.api_type else {
        return false;
    };
    let Ok(api) = ApiType::from_code(code) else {
        return false;
    };

    let expected = kind_for_api(api);
    if expected == AuthenticatorKind::Unknown {
        return false;
    }

    // if the type is known the used authenticator needs to match
    expected != detect(&data.macaroon_hex, Some(api))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAC: &str = "0201036c6e640224030a10b493608461fb6e64810053fa31ef27991201301a0c0a04696e666f120472656164000216697061646472203139322e3136382e3139322e3136380000062072ea006233da839ce6e9f4721331a12041b228d36c0fdad552680f615766d2f4";
    const RUNE: &str = "tU-RLjMiDpY2U0o3W1oFowar36RFGpWloPbW9-RuZdo9MyZpZD0wMjRiOWExZmE4ZTAwNmYxZTM5MzdmNjVmNjZjNDA4ZTZkYThlMWNhNzI4ZWE0MzIyMmE3MzgxZGYxY2M0NDk2MDUmbWV0aG9kPWxpc3RwZWVycyZwbnVtPTEmcG5hbWVpZF4wMjRiOWExZmE4ZTAwNmYxZTM5M3xwYXJyMF4wMjRiOWExZmE4ZTAwNmYxZTM5MyZ0aW1lPDE2NTY5MjA1MzgmcmF0ZT0y";

    #[test]
    fn auto_detect_by_endpoint() {
        let mut data = NodeCredential {
            endpoint: "http://bolt.observer".to_string(),
            ..Default::default()
        };
        auto_detect_api_type(&mut data);
        assert_eq!(data.api_type, Some(ApiType::LndRest.code()));

        data.api_type = None;
        data.endpoint = "https://bolt.observer:1234".to_string();
        auto_detect_api_type(&mut data);
        assert_eq!(data.api_type, Some(ApiType::LndRest.code()));

        data.api_type = None;
        data.endpoint = "bolt.observer:10009".to_string();
        auto_detect_api_type(&mut data);
        assert_eq!(data.api_type, Some(ApiType::LndGrpc.code()));
    }

    #[test]
    fn auto_detect_grpc_port_strips_scheme() {
        let mut data = NodeCredential {
            endpoint: "http://bolt.observer:10009".to_string(),
            ..Default::default()
        };
        auto_detect_api_type(&mut data);
        assert_eq!(data.api_type, Some(ApiType::LndGrpc.code()));
        assert_eq!(data.endpoint, "bolt.observer:10009");
    }

    #[test]
    fn auto_detect_rune_overrides_flavor() {
        let mut data = NodeCredential {
            endpoint: "bolt.observer:10009".to_string(),
            macaroon_hex: RUNE.to_string(),
            ..Default::default()
        };
        auto_detect_api_type(&mut data);
        assert_eq!(data.api_type, Some(ApiType::ClnCommando.code()));
    }

    #[test]
    fn authenticator_compatibility() {
        let mut data = NodeCredential {
            endpoint: "http://bolt.observer".to_string(),
            ..Default::default()
        };
        assert!(!invalid_authenticator(&data));

        data.macaroon_hex = MAC.to_string();
        assert!(!invalid_authenticator(&data));

        data.api_type = Some(ApiType::ClnCommando.code());
        assert!(invalid_authenticator(&data));

        data.api_type = Some(ApiType::LndGrpc.code());
        assert!(!invalid_authenticator(&data));

        data.api_type = Some(ApiType::LndRest.code());
        assert!(!invalid_authenticator(&data));

        data.macaroon_hex = RUNE.to_string();
        assert!(invalid_authenticator(&data));

        data.api_type = Some(ApiType::LndGrpc.code());
        assert!(invalid_authenticator(&data));

        data.api_type = Some(ApiType::ClnCommando.code());
        assert!(!invalid_authenticator(&data));
    }

    #[test]
    fn constrained_copy_censors_on_failure() {
        let record = NodeCredential {
            macaroon_hex: "garbage".to_string(),
            ..Default::default()
        };
        let copy = constrained_copy(&record, Duration::from_secs(600));
        assert_eq!(copy.macaroon_hex, "");

        let record = NodeCredential {
            macaroon_hex: MAC.to_string(),
            ..Default::default()
        };
        let copy = constrained_copy(&record, Duration::from_secs(600));
        assert_ne!(copy.macaroon_hex, MAC);
        assert!(!copy.macaroon_hex.is_empty());
    }
}

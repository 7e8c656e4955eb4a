//! Server test utilities.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use lnvault_core::AppConfig;
use lnvault_server::verify::AcceptAllVerifier;
use lnvault_server::{AppState, create_router};
use lnvault_storage::MemorySecretStore;
use std::sync::Arc;
use tower::ServiceExt;

/// Valid 33-byte compressed pubkey used across tests.
#[allow(dead_code)]
pub const PUBKEY: &str = "0367fa307a6e0ce29efadc4f7c4d1109ee689aa1e7bd442afd7270919f9e28c3b7";

/// lnd-style readonly macaroon (fake).
#[allow(dead_code)]
pub const MACAROON: &str = "0201036c6e640224030a10b493608461fb6e64810053fa31ef27991201301a0c0a04696e666f120472656164000216697061646472203139322e3136382e3139322e3136380000062072ea006233da839ce6e9f4721331a12041b228d36c0fdad552680f615766d2f4";

/// Commando rune (fake).
#[allow(dead_code)]
pub const RUNE: &str = "tU-RLjMiDpY2U0o3W1oFowar36RFGpWloPbW9-RuZdo9MyZpZD0wMjRiOWExZmE4ZTAwNmYxZTM5MzdmNjVmNjZjNDA4ZTZkYThlMWNhNzI4ZWE0MzIyMmE3MzgxZGYxY2M0NDk2MDUmbWV0aG9kPWxpc3RwZWVycyZwbnVtPTEmcG5hbWVpZF4wMjRiOWExZmE4ZTAwNmYxZTM5M3xwYXJyMF4wMjRiOWExZmE4ZTAwNmYxZTM5MyZ0aW1lPDE2NTY5MjA1MzgmcmF0ZT0y";

/// Base64-wrapped PEM certificate (lnd autogenerated, long expired).
#[allow(dead_code)]
pub const CERTIFICATE: &str = "LS0tLS1CRUdJTiBDRVJUSUZJQ0FURS0tLS0tCk1JSUNKakNDQWN5Z0F3SUJBZ0lRUmU4QzhCcURubEF3b0VxRjdMRTVGREFLQmdncWhrak9QUVFEQWpBeE1SOHcKSFFZRFZRUUtFeFpzYm1RZ1lYVjBiMmRsYm1WeVlYUmxaQ0JqWlhKME1RNHdEQVlEVlFRREV3VmhiR2xqWlRBZQpGdzB5TXpBeE1ESXhOVE0xTXpsYUZ3MHlOREF5TWpjeE5UTTFNemxhTURFeEh6QWRCZ05WQkFvVEZteHVaQ0JoCmRYUnZaMlZ1WlhKaGRHVmtJR05sY25ReERqQU1CZ05WQkFNVEJXRnNhV05sTUZrd0V3WUhLb1pJemowQ0FRWUkKS29aSXpqMERBUWNEUWdBRXlKaHRYWk1NT0NQYzYxWmlISmVyKzdHUm9HalFzcWtNcjdvQVVjNnZsZC9JNDl2SwpHR01mRjhMcDhTSm1jNlJVOHQxN3FEZFhyUmZMbTdLSjB0eDBkcU9CeFRDQndqQU9CZ05WSFE4QkFmOEVCQU1DCkFxUXdFd1lEVlIwbEJBd3dDZ1lJS3dZQkJRVUhBd0V3RHdZRFZSMFRBUUgvQkFVd0F3RUIvekFkQmdOVkhRNEUKRmdRVU5BUW5BYVBNOStrZEpxMXdud2FtbldpY1d1SXdhd1lEVlIwUkJHUXdZb0lGWVd4cFkyV0NDV3h2WTJGcwphRzl6ZElJRllXeHBZMldDRG5CdmJHRnlMVzQyTFdGc2FXTmxnZ1IxYm1sNGdncDFibWw0Y0dGamEyVjBnZ2RpCmRXWmpiMjV1aHdSL0FBQUJoeEFBQUFBQUFBQUFBQUFBQUFBQUFBQUJod1NzR0FBQ01Bb0dDQ3FHU000OUJBTUMKQTBnQU1FVUNJUUQ2dElDMVdTWFRWNkpuSzVlN3FkdDRBVHp2Q0ZHUldPTmp2T29tUUdScXB3SWdiR1ZJWFVPbgpHamlUdTZ5MXVMT1pRS0VPTnB1MXZkYUNKejVpanNRdlVndz0KLS0tLS1FTkQgQ0VSVElGSUNBVEUtLS0tLQo=";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: Router,
    pub state: AppState,
    pub storage: Arc<MemorySecretStore>,
}

#[allow(dead_code)]
impl TestServer {
    /// Create a test server on the in-memory store with a pass-through
    /// node verifier.
    pub fn new() -> Self {
        lnvault_server::metrics::register_metrics();

        let storage = Arc::new(MemorySecretStore::new());
        let config = AppConfig {
            env: "local".to_string(),
            read_api_key_10m: "reader|readerpass".to_string(),
            read_api_key_1h: "hourreader|hourpass".to_string(),
            write_api_key:
                "writer|writerpass,user2|$2a$10$m.Wdkic9j5eOO0L9w49Zo.1HrSDglSc6M1QcaZO5egLs2teohd9Wi"
                    .to_string(),
            ..AppConfig::default()
        };

        let state = AppState::new(config, storage.clone(), Arc::new(AcceptAllVerifier))
            .expect("failed to build test state");
        let router = create_router(state.clone());

        Self {
            router,
            state,
            storage,
        }
    }

    /// Issue a request and return status plus body text.
    pub async fn request(
        &self,
        method: &str,
        uri: &str,
        body: Option<String>,
        auth: Option<(&str, &str)>,
    ) -> (StatusCode, String) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((user, pass)) = auth {
            builder = builder.header(
                header::AUTHORIZATION,
                format!("Basic {}", STANDARD.encode(format!("{user}:{pass}"))),
            );
        }
        let body = match body {
            Some(content) => Body::from(content),
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).expect("request build failed"))
            .await
            .expect("request failed");

        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body read failed");
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    /// PUT a record as the writer and return the response.
    pub async fn put_record(&self, uri: &str, record: serde_json::Value) -> (StatusCode, String) {
        self.request(
            "POST",
            uri,
            Some(record.to_string()),
            Some(("writer", "writerpass")),
        )
        .await
    }

    /// GET a record as the 10-minute reader, expecting 200.
    pub async fn read_record(&self, uri: &str) -> lnvault_core::NodeCredential {
        let (status, body) = self
            .request("GET", uri, None, Some(("reader", "readerpass")))
            .await;
        assert_eq!(status, StatusCode::OK, "read of {uri} failed: {body}");
        serde_json::from_str(&body).expect("record deserialization failed")
    }

    /// A standard valid PUT body.
    pub fn record_body(endpoint: &str, tags: &str) -> serde_json::Value {
        serde_json::json!({
            "pubkey": PUBKEY,
            "macaroon_hex": MACAROON,
            "certificate_base64": CERTIFICATE,
            "endpoint": endpoint,
            "tags": tags,
        })
    }
}

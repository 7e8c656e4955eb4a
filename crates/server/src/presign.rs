//! IAM-presigned identity verification.
//!
//! A pre-signed `sts:GetCallerIdentity` query string works as a bearer
//! token: the server re-executes the signed request against STS and learns
//! the caller's ARN. If the client could not produce that signature, STS
//! rejects it; that is the entire security argument. The `Action` /
//! `Version` / `Redirect` purge and the hostname suffix check below are
//! critical - any bypass is a credential-theft primitive.
//!
//! See <https://ahermosilla.com/cloud/2020/11/17/leveraging-aws-signed-requests.html>
//! for the background on the technique.

use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_sigv4::http_request::{
    SignableBody, SignableRequest, SignatureLocation, SigningSettings, sign,
};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use moka::sync::Cache;
use serde::Deserialize;
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use url::Url;

/// HTTP header carrying a pre-signed query string.
pub const PRESIGN_HEADER: &str = "X-Amazon-Presigned-Getcalleridentity";

/// SHA-256 of an empty request body.
pub const EMPTY_BODY_HASH: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Cache TTL; must stay below the token validity.
const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(2 * 60);

/// Default validity for new tokens and for verification timeouts.
const DEFAULT_VALIDITY: Duration = Duration::from_secs(5 * 60);

/// Total elapsed retry budget for the STS call.
const HTTP_RETRY_TIME: Duration = Duration::from_secs(3);

/// Presign errors. None of them ever carry the query string itself.
#[derive(Debug, Error)]
pub enum PresignError {
    #[error("invalid query string")]
    InvalidQuery,

    #[error("action trickery detected")]
    ActionTrickery,

    #[error("hostname trickery detected, {0}")]
    HostnameTrickery(String),

    #[error("got unauthorized, {0}")]
    Unauthorized(u16),

    #[error("unable to make request, {0}")]
    Request(String),

    #[error("unable to deserialize response, {0}")]
    Deserialize(String),

    #[error("empty result")]
    EmptyResult,

    #[error("unable to load credentials, {0}")]
    Credentials(String),

    #[error("unable to sign request, {0}")]
    Signing(String),
}

#[derive(Debug, Deserialize)]
struct GetCallerIdentityResponse {
    #[serde(rename = "GetCallerIdentityResult")]
    result: GetCallerIdentityResult,
}

#[derive(Debug, Default, Deserialize)]
struct GetCallerIdentityResult {
    #[serde(rename = "Arn", default)]
    arn: String,
}

/// Server-side verifier re-executing pre-signed identity requests.
pub struct PresignVerifier {
    http: reqwest::Client,
    endpoint: String,
    enforce_hostname: bool,
    /// query string -> ARN; entries live a fixed TTL from insert, a cache
    /// hit does not extend it.
    cache: Cache<String, String>,
}

impl PresignVerifier {
    /// Create a verifier for the given STS region.
    pub fn new(region: &str) -> Self {
        Self::build(format!("https://sts.{region}.amazonaws.com/"), true)
    }

    /// Verifier against a stand-in STS with the hostname suffix check
    /// disabled. **For testing only.**
    pub fn for_testing(endpoint: String) -> Self {
        Self::build(endpoint, false)
    }

    fn build(endpoint: String, enforce_hostname: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            enforce_hostname,
            cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(DEFAULT_CACHE_TIME)
                .build(),
        }
    }

    /// Verify that `query` is a pre-signed GetCallerIdentity request and
    /// return the caller's ARN.
    pub async fn verify(&self, query: &str, timeout: Duration) -> Result<String, PresignError> {
        if let Some(arn) = self.cache.get(query) {
            return Ok(arn);
        }

        if query.contains(['@', '?', '/']) || query.starts_with("http") {
            return Err(PresignError::InvalidQuery);
        }

        // the server pins the requested action; a query smuggling its own
        // Action, Version or Redirect must be rejected outright
        for (key, _) in url::form_urlencoded::parse(query.as_bytes()) {
            let low_key = key.to_lowercase();
            if low_key == "action" || low_key == "redirect" || low_key == "version" {
                return Err(PresignError::ActionTrickery);
            }
        }

        let mut url =
            Url::parse(&self.endpoint).map_err(|e| PresignError::Request(e.to_string()))?;
        url.set_query(Some(&format!(
            "Action=GetCallerIdentity&Version=2011-06-15&{query}"
        )));

        let hostname = url.host_str().unwrap_or_default();
        if self.enforce_hostname && !hostname.ends_with(".amazonaws.com") {
            return Err(PresignError::HostnameTrickery(hostname.to_string()));
        }

        let timeout = if timeout.is_zero() {
            DEFAULT_VALIDITY
        } else {
            timeout
        };

        let response = self.post_with_retry(url, timeout).await?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(PresignError::Unauthorized(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PresignError::Request(e.to_string()))?;
        let identity: GetCallerIdentityResponse =
            quick_xml::de::from_str(&body).map_err(|e| PresignError::Deserialize(e.to_string()))?;

        if identity.result.arn.is_empty() {
            return Err(PresignError::EmptyResult);
        }

        self.cache
            .insert(query.to_string(), identity.result.arn.clone());
        Ok(identity.result.arn)
    }

    async fn post_with_retry(
        &self,
        url: Url,
        timeout: Duration,
    ) -> Result<reqwest::Response, PresignError> {
        let started = Instant::now();
        let mut backoff = Duration::from_millis(250);

        loop {
            let result = self
                .http
                .post(url.clone())
                .header("Content-Type", "application/x-www-form-urlencoded")
                .timeout(timeout)
                .send()
                .await;

            match result {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if started.elapsed() + backoff > HTTP_RETRY_TIME {
                        return Err(PresignError::Request(err.to_string()));
                    }
                    tracing::warn!("error calling VerifyGetCallerIdentity");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
}

/// Cached pre-signed query with its own expiry.
#[derive(Clone)]
struct CachedPresign {
    query: String,
    ttl: Duration,
}

struct PresignExpiry;

impl moka::Expiry<String, CachedPresign> for PresignExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedPresign,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Client-side helper producing pre-signed query strings from ambient AWS
/// credentials, the counterpart of [`PresignVerifier`].
pub struct PresignClient {
    region: String,
    cache: Cache<String, CachedPresign>,
}

impl PresignClient {
    /// Create a presigning client for the given STS region.
    pub fn new(region: &str) -> Self {
        Self {
            region: region.to_string(),
            cache: Cache::builder()
                .max_capacity(64)
                .expire_after(PresignExpiry)
                .build(),
        }
    }

    /// Pre-sign a GetCallerIdentity request valid for `validity`, returning
    /// the query string a third party can replay to prove our identity.
    /// The verifier re-adds `Action` and `Version`, so both are stripped.
    pub async fn presign(&self, validity: Duration) -> Result<String, PresignError> {
        let validity = if validity.is_zero() {
            DEFAULT_VALIDITY
        } else {
            validity
        };
        let cache_key = format!("{validity:?}");
        if let Some(cached) = self.cache.get(&cache_key) {
            return Ok(cached.query);
        }

        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(self.region.clone()))
            .load()
            .await;
        let credentials = config
            .credentials_provider()
            .ok_or_else(|| PresignError::Credentials("no credentials provider".to_string()))?
            .provide_credentials()
            .await
            .map_err(|e| PresignError::Credentials(e.to_string()))?;
        if credentials
            .expiry()
            .is_some_and(|expiry| expiry <= SystemTime::now())
        {
            return Err(PresignError::Credentials("credentials expired".to_string()));
        }

        let mut settings = SigningSettings::default();
        settings.signature_location = SignatureLocation::QueryParams;
        settings.expires_in = Some(validity);

        let identity: Identity = credentials.into();
        let params = v4::SigningParams::builder()
            .identity(&identity)
            .region(&self.region)
            .name("sts")
            .time(SystemTime::now())
            .settings(settings)
            .build()
            .map_err(|e| PresignError::Signing(e.to_string()))?;

        let url = format!(
            "https://sts.{}.amazonaws.com/?Action=GetCallerIdentity&Version=2011-06-15",
            self.region
        );
        let signable = SignableRequest::new(
            "POST",
            &url,
            std::iter::once(("content-type", "application/x-www-form-urlencoded")),
            SignableBody::Bytes(b""),
        )
        .map_err(|e| PresignError::Signing(e.to_string()))?;

        let (instructions, _signature) = sign(signable, &params.into())
            .map_err(|e| PresignError::Signing(e.to_string()))?
            .into_parts();

        let mut request = http::Request::builder()
            .method("POST")
            .uri(&url)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(())
            .map_err(|e| PresignError::Signing(e.to_string()))?;
        instructions.apply_to_request_http1x(&mut request);

        let signed_query = request.uri().query().unwrap_or_default();
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in url::form_urlencoded::parse(signed_query.as_bytes()) {
            if key == "Action" || key == "Version" {
                continue;
            }
            serializer.append_pair(&key, &value);
        }
        let query = serializer.finish();

        // cache a bit shorter than the token validity; below a minute
        // caching is pointless
        if validity != DEFAULT_VALIDITY {
            if let Some(cache_validity) = validity
                .checked_sub(Duration::from_secs(60))
                .filter(|v| !v.is_zero())
            {
                self.cache.insert(
                    cache_key,
                    CachedPresign {
                        query: query.clone(),
                        ttl: cache_validity.min(DEFAULT_CACHE_TIME),
                    },
                );
            }
        } else {
            self.cache.insert(
                cache_key,
                CachedPresign {
                    query: query.clone(),
                    ttl: DEFAULT_CACHE_TIME,
                },
            );
        }

        Ok(query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    const STS_OK: &str = r#"<GetCallerIdentityResponse xmlns="https://sts.amazonaws.com/doc/2011-06-15/">
  <GetCallerIdentityResult>
    <Arn>arn:aws:iam::123456789012:user/tester</Arn>
    <UserId>AIDAEXAMPLE</UserId>
    <Account>123456789012</Account>
  </GetCallerIdentityResult>
  <ResponseMetadata><RequestId>abc</RequestId></ResponseMetadata>
</GetCallerIdentityResponse>"#;

    const QUERY: &str = "X-Amz-Algorithm=AWS4-HMAC-SHA256&X-Amz-Credential=AKIA%2F20230101%2Fus-east-1%2Fsts%2Faws4_request&X-Amz-Date=20230101T000000Z&X-Amz-Expires=300&X-Amz-SignedHeaders=content-type&X-Amz-Signature=deadbeef";

    #[tokio::test]
    async fn accepts_valid_presign_and_caches() {
        let server = MockServer::start_async().await;
        let sts = server.mock(|when, then| {
            when.method(POST)
                .query_param("Action", "GetCallerIdentity")
                .query_param("Version", "2011-06-15");
            then.status(200).body(STS_OK);
        });

        let verifier = PresignVerifier::for_testing(format!("{}/", server.base_url()));
        let arn = verifier
            .verify(QUERY, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(arn, "arn:aws:iam::123456789012:user/tester");

        // the second call is served from cache
        let arn = verifier
            .verify(QUERY, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(arn, "arn:aws:iam::123456789012:user/tester");
        sts.assert_hits(1);
    }

    #[tokio::test]
    async fn rejects_suspicious_characters() {
        let verifier = PresignVerifier::new("us-east-1");
        for query in [
            "a=b@c",
            "a=b?c",
            "a=b/c",
            "http://evil.example/steal",
            "httpsomething=1",
        ] {
            let err = verifier
                .verify(query, Duration::from_secs(1))
                .await
                .unwrap_err();
            assert!(
                matches!(err, PresignError::InvalidQuery),
                "query {query} gave {err}"
            );
        }
    }

    #[tokio::test]
    async fn rejects_pinned_parameters() {
        let verifier = PresignVerifier::new("us-east-1");
        for query in [
            "Action=AssumeRole&X-Amz-Signature=x",
            "action=AssumeRole",
            "VERSION=2010-05-08",
            "Redirect=evil",
        ] {
            let err = verifier
                .verify(query, Duration::from_secs(1))
                .await
                .unwrap_err();
            assert!(
                matches!(err, PresignError::ActionTrickery),
                "query {query} gave {err}"
            );
        }
    }

    #[tokio::test]
    async fn rejects_foreign_hostname() {
        let verifier = PresignVerifier::build("https://sts.evil.example/".to_string(), true);
        let err = verifier
            .verify("X-Amz-Signature=x", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PresignError::HostnameTrickery(_)));
    }

    #[tokio::test]
    async fn rejects_unauthorized_response() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST);
            then.status(403).body("denied");
        });

        let verifier = PresignVerifier::for_testing(format!("{}/", server.base_url()));
        let err = verifier
            .verify(QUERY, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, PresignError::Unauthorized(403)));
    }

    #[tokio::test]
    async fn rejects_empty_arn() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST);
            then.status(200).body(
                "<GetCallerIdentityResponse><GetCallerIdentityResult></GetCallerIdentityResult></GetCallerIdentityResponse>",
            );
        });

        let verifier = PresignVerifier::for_testing(format!("{}/", server.base_url()));
        let err = verifier
            .verify(QUERY, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, PresignError::EmptyResult));
    }
}

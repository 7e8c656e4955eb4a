//! Google Secret Manager driver.
//!
//! Speaks the Secret Manager REST surface directly, authenticating with
//! access tokens from the instance metadata server. Values are stored as
//! secret versions; reads always access `versions/latest`.

use crate::error::{StorageError, StorageResult};
use crate::retry::with_retry;
use crate::traits::{Change, SecretStore, TOMBSTONE};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::time::Duration;

const API_BASE: &str = "https://secretmanager.googleapis.com/v1";
const METADATA_BASE: &str = "http://metadata.google.internal/computeMetadata/v1";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct SecretResource {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListSecretsResponse {
    #[serde(default)]
    secrets: Vec<SecretResource>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccessPayload {
    data: String,
}

#[derive(Debug, Deserialize)]
struct AccessResponse {
    payload: AccessPayload,
}

/// Secret Manager backed store.
pub struct GcpSecretStore {
    http: reqwest::Client,
    project: String,
    api_base: String,
    metadata_base: String,
}

impl std::fmt::Debug for GcpSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpSecretStore")
            .field("project", &self.project)
            .finish_non_exhaustive()
    }
}

impl GcpSecretStore {
    /// Create a driver, resolving the project id from configuration or the
    /// metadata server.
    pub async fn new(project_id: Option<String>) -> StorageResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent("lnvault")
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let project = match project_id {
            Some(project) if !project.is_empty() => project,
            _ => {
                let resp = http
                    .get(format!("{METADATA_BASE}/project/project-id"))
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await
                    .map_err(|e| StorageError::Config(format!("project id lookup: {e}")))?;
                if !resp.status().is_success() {
                    return Err(StorageError::Config(format!(
                        "project id lookup returned {}",
                        resp.status()
                    )));
                }
                resp.text()
                    .await
                    .map_err(|e| StorageError::Config(format!("project id lookup: {e}")))?
            }
        };

        Ok(Self {
            http,
            project,
            api_base: API_BASE.to_string(),
            metadata_base: METADATA_BASE.to_string(),
        })
    }

    /// Driver pointed at a stand-in server. **For testing only.**
    #[cfg(test)]
    fn for_testing(base_url: &str, project: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            project: project.to_string(),
            api_base: base_url.to_string(),
            metadata_base: base_url.to_string(),
        }
    }

    async fn access_token(&self) -> StorageResult<String> {
        let resp = self
            .http
            .get(format!(
                "{}/instance/service-accounts/default/token",
                self.metadata_base
            ))
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| StorageError::Http(format!("token lookup: {e}")))?;
        if !resp.status().is_success() {
            return Err(StorageError::UpstreamStatus {
                status: resp.status().as_u16(),
                body: "metadata token lookup failed".to_string(),
            });
        }
        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| StorageError::InvalidPayload(e.to_string()))?;
        Ok(token.access_token)
    }

    fn secret_resource(&self, name: &str) -> String {
        format!("projects/{}/secrets/{}", self.project, name)
    }

    async fn check(resp: reqwest::Response) -> StorageResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(body));
        }
        Err(StorageError::UpstreamStatus {
            status: status.as_u16(),
            body,
        })
    }

    async fn list_once(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let token = self.access_token().await?;
        let mut names = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut req = self
                .http
                .get(format!("{}/projects/{}/secrets", self.api_base, self.project))
                .bearer_auth(&token)
                .query(&[
                    ("filter", format!("name:{prefix}")),
                    ("pageSize", "100".to_string()),
                ]);
            if let Some(page) = &page_token {
                req = req.query(&[("pageToken", page.as_str())]);
            }
            let resp = Self::check(
                req.send()
                    .await
                    .map_err(|e| StorageError::Http(e.to_string()))?,
            )
            .await?;
            let page: ListSecretsResponse = resp
                .json()
                .await
                .map_err(|e| StorageError::InvalidPayload(e.to_string()))?;

            for secret in page.secrets {
                // resource names are fully qualified; keep the last segment
                let name = secret.name.rsplit('/').next().unwrap_or_default();
                if name.starts_with(prefix) {
                    names.push(name.to_string());
                }
            }

            page_token = page.next_page_token.filter(|t| !t.is_empty());
            if page_token.is_none() {
                break;
            }
        }

        Ok(names)
    }

    async fn get_once(&self, name: &str) -> StorageResult<String> {
        let token = self.access_token().await?;
        let resp = self
            .http
            .get(format!(
                "{}/{}/versions/latest:access",
                self.api_base,
                self.secret_resource(name)
            ))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| StorageError::Http(e.to_string()))?;
        let resp = Self::check(resp).await?;
        let access: AccessResponse = resp
            .json()
            .await
            .map_err(|e| StorageError::InvalidPayload(e.to_string()))?;
        let bytes = STANDARD
            .decode(&access.payload.data)
            .map_err(|e| StorageError::InvalidPayload(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| StorageError::InvalidPayload(e.to_string()))
    }

    async fn secret_exists(&self, token: &str, name: &str) -> StorageResult<bool> {
        let resp = self
            .http
            .get(format!("{}/{}", self.api_base, self.secret_resource(name)))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| StorageError::Http(e.to_string()))?;
        match Self::check(resp).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn add_version(&self, token: &str, name: &str, value: &str) -> StorageResult<()> {
        let body = serde_json::json!({
            "payload": { "data": STANDARD.encode(value) }
        });
        let resp = self
            .http
            .post(format!(
                "{}/{}:addVersion",
                self.api_base,
                self.secret_resource(name)
            ))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| StorageError::Http(e.to_string()))?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn put_once(&self, name: &str, value: &str) -> StorageResult<(String, Change)> {
        let token = self.access_token().await?;

        let change = if self.secret_exists(&token, name).await? {
            match self.get_once(name).await {
                Ok(current) if current == TOMBSTONE => Change::Inserted,
                _ => Change::Updated,
            }
        } else {
            let body = serde_json::json!({
                "replication": { "automatic": {} }
            });
            let resp = self
                .http
                .post(format!("{}/projects/{}/secrets", self.api_base, self.project))
                .bearer_auth(&token)
                .query(&[("secretId", name)])
                .json(&body)
                .send()
                .await
                .map_err(|e| StorageError::Http(e.to_string()))?;
            Self::check(resp).await?;
            Change::Inserted
        };

        self.add_version(&token, name, value).await?;
        Ok((self.secret_resource(name), change))
    }

    async fn delete_once(&self, name: &str) -> StorageResult<String> {
        let token = self.access_token().await?;
        if !self.secret_exists(&token, name).await? {
            return Err(StorageError::NotFound(name.to_string()));
        }
        self.add_version(&token, name, TOMBSTONE).await?;
        Ok(self.secret_resource(name))
    }
}

#[async_trait]
impl SecretStore for GcpSecretStore {
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        with_retry("gcp.list", || self.list_once(prefix)).await
    }

    async fn get(&self, name: &str) -> StorageResult<String> {
        with_retry("gcp.get", || self.get_once(name)).await
    }

    async fn put(&self, name: &str, value: &str) -> StorageResult<(String, Change)> {
        with_retry("gcp.put", || self.put_once(name, value)).await
    }

    async fn delete(&self, name: &str) -> StorageResult<String> {
        with_retry("gcp.delete", || self.delete_once(name)).await
    }

    fn backend_name(&self) -> &'static str {
        "gcp"
    }
}

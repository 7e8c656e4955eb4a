//! AWS Secrets Manager driver.
//!
//! Deleting a secret for real blocks its name for seven days, so delete is
//! an update to the `{}` tombstone and put reports `Inserted` when it
//! overwrites one.

use crate::error::{StorageError, StorageResult};
use crate::retry::with_retry;
use crate::traits::{Change, SecretStore, TOMBSTONE};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_secretsmanager::Client;
use aws_sdk_secretsmanager::types::{Filter, FilterNameStringType};

/// Secrets Manager backed store using the AWS SDK.
pub struct AwsSecretStore {
    client: Client,
}

impl std::fmt::Debug for AwsSecretStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSecretStore").finish_non_exhaustive()
    }
}

fn sdk_error<E>(err: aws_sdk_secretsmanager::error::SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::Aws(Box::new(err))
}

impl AwsSecretStore {
    /// Create a driver using the ambient AWS credential chain.
    pub async fn new(region: &str) -> Self {
        let config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        Self {
            client: Client::new(&config),
        }
    }

    /// Resolve a secret name to its ARN via a name-filtered listing.
    async fn find_arn(&self, name: &str) -> StorageResult<Option<String>> {
        let filter = Filter::builder()
            .key(FilterNameStringType::Name)
            .values(name)
            .build();
        let resp = self
            .client
            .list_secrets()
            .max_results(1)
            .filters(filter)
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(resp
            .secret_list()
            .first()
            .and_then(|entry| entry.arn())
            .map(str::to_string))
    }

    async fn list_once(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let filter = Filter::builder()
                .key(FilterNameStringType::Name)
                .values(prefix)
                .build();
            let mut req = self.client.list_secrets().max_results(100).filters(filter);
            if let Some(token) = &next_token {
                req = req.next_token(token.as_str());
            }
            let resp = req.send().await.map_err(sdk_error)?;

            for entry in resp.secret_list() {
                if let Some(name) = entry.name() {
                    names.push(name.to_string());
                }
            }

            next_token = resp.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(names)
    }

    async fn get_once(&self, name: &str) -> StorageResult<String> {
        let resp = self
            .client
            .get_secret_value()
            .secret_id(name)
            .send()
            .await
            .map_err(|err| match &err {
                aws_sdk_secretsmanager::error::SdkError::ServiceError(service)
                    if service.err().is_resource_not_found_exception() =>
                {
                    StorageError::NotFound(name.to_string())
                }
                _ => sdk_error(err),
            })?;
        resp.secret_string()
            .map(str::to_string)
            .ok_or_else(|| StorageError::InvalidPayload(format!("secret {name} has no string value")))
    }

    async fn put_once(&self, name: &str, value: &str) -> StorageResult<(String, Change)> {
        let arn = self.find_arn(name).await?;

        let Some(arn) = arn else {
            let resp = self
                .client
                .create_secret()
                .name(name)
                .secret_string(value)
                .send()
                .await
                .map_err(sdk_error)?;
            let arn = resp.arn().unwrap_or(name).to_string();
            return Ok((arn, Change::Inserted));
        };

        // a tombstoned name means this write is semantically an insert
        let change = match self.get_once(&arn).await {
            Ok(current) if current == TOMBSTONE => Change::Inserted,
            _ => Change::Updated,
        };

        let resp = self
            .client
            .update_secret()
            .secret_id(arn.as_str())
            .secret_string(value)
            .send()
            .await
            .map_err(sdk_error)?;

        if resp.arn().is_some_and(|updated| updated != arn) {
            return Err(StorageError::InvalidPayload(format!(
                "secret ARN changed during update: {arn} vs {:?}",
                resp.arn()
            )));
        }

        Ok((arn, change))
    }

    async fn delete_once(&self, name: &str) -> StorageResult<String> {
        let arn = self
            .find_arn(name)
            .await?
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;

        self.client
            .update_secret()
            .secret_id(arn.as_str())
            .secret_string(TOMBSTONE)
            .send()
            .await
            .map_err(sdk_error)?;

        Ok(arn)
    }
}

#[async_trait]
impl SecretStore for AwsSecretStore {
    async fn list(&self, prefix: &str) -> StorageResult<Vec<String>> {
        with_retry("aws.list", || self.list_once(prefix)).await
    }

    async fn get(&self, name: &str) -> StorageResult<String> {
        with_retry("aws.get", || self.get_once(name)).await
    }

    async fn put(&self, name: &str, value: &str) -> StorageResult<(String, Change)> {
        with_retry("aws.put", || self.put_once(name, value)).await
    }

    async fn delete(&self, name: &str) -> StorageResult<String> {
        with_retry("aws.delete", || self.delete_once(name)).await
    }

    fn backend_name(&self) -> &'static str {
        "aws"
    }
}

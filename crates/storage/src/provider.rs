//! Cloud provider selection.

use std::time::Duration;

const AWS_METADATA_URL: &str = "http://169.254.169.254/latest/dynamic/instance-identity/document";
const GCP_METADATA_URL: &str = "http://metadata.google.internal/computeMetadata/v1";

/// Where this vault instance is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloudProvider {
    Unknown,
    Aws,
    Gcp,
}

/// Determine the cloud provider, honoring an explicit pin first and
/// probing the instance metadata services otherwise.
pub async fn determine_provider(pin: Option<&str>) -> CloudProvider {
    match pin.map(str::to_lowercase).as_deref() {
        Some("aws") => return CloudProvider::Aws,
        Some("gcp") => return CloudProvider::Gcp,
        _ => {}
    }

    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(3))
        .user_agent("lnvault")
        .build()
    {
        Ok(client) => client,
        Err(err) => {
            tracing::warn!(error = %err, "failed to build metadata probe client");
            return CloudProvider::Unknown;
        }
    };

    let probes = [
        (
            CloudProvider::Aws,
            client.get(AWS_METADATA_URL),
        ),
        (
            CloudProvider::Gcp,
            client.get(GCP_METADATA_URL).header("Metadata-Flavor", "Google"),
        ),
    ];

    for (provider, request) in probes {
        match request.send().await {
            Ok(resp)
                if resp.status().is_success()
                    || resp.status() == reqwest::StatusCode::TEMPORARY_REDIRECT
                    || resp.status() == reqwest::StatusCode::PERMANENT_REDIRECT =>
            {
                return provider;
            }
            _ => continue,
        }
    }

    CloudProvider::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pin_overrides_probing() {
        assert_eq!(determine_provider(Some("aws")).await, CloudProvider::Aws);
        assert_eq!(determine_provider(Some("GCP")).await, CloudProvider::Gcp);
    }
}

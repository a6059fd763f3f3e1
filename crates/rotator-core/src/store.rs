use serde::Deserialize;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::transport::RetryingTransport;

// ---------------------------------------------------------------------------
// CertificateMaterial
// ---------------------------------------------------------------------------

/// Result of a successful issuance or metadata read. Owned transiently by
/// the rotation task that requested it; the store keeps the durable copy.
#[derive(Debug, Clone)]
pub struct CertificateMaterial {
    pub certificate: String,
    pub private_key: String,
    /// Raw expiry timestamp as the store reported it. Parsing (and the
    /// fail-open handling of garbage values) belongs to the expiry evaluator.
    pub expires_at: Option<String>,
}

/// Store responses arrive wrapped in a `data` envelope.
#[derive(Debug, Deserialize)]
struct StoreResponse {
    data: StoreData,
}

#[derive(Debug, Deserialize)]
struct StoreData {
    #[serde(default)]
    certificate: String,
    #[serde(default)]
    private_key: String,
    #[serde(default)]
    expiration: Option<String>,
}

impl From<StoreData> for CertificateMaterial {
    fn from(data: StoreData) -> Self {
        Self {
            certificate: data.certificate,
            private_key: data.private_key,
            expires_at: data.expiration,
        }
    }
}

// ---------------------------------------------------------------------------
// StoreClient
// ---------------------------------------------------------------------------

/// Client for the certificate store: reads current certificate metadata and
/// requests new certificates, one transport round trip per operation.
///
/// Issuance is deliberately not retried beyond what the transport does —
/// each issuance may consume a lease in the store, so a higher layer must
/// never wrap it in another retry loop.
#[derive(Debug, Clone)]
pub struct StoreClient {
    transport: RetryingTransport,
    base_url: String,
    token: String,
    dry_run: bool,
}

const TOKEN_HEADER: &str = "X-Vault-Token";

impl StoreClient {
    pub fn new(transport: RetryingTransport, config: &StoreConfig, dry_run: bool) -> Self {
        Self {
            transport,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
            dry_run,
        }
    }

    fn url(&self, cert_path: &str) -> String {
        format!("{}/v1/{}", self.base_url, cert_path)
    }

    /// Fetch the current certificate metadata, `None` if the store has no
    /// certificate at that path yet.
    pub async fn current_certificate(
        &self,
        cert_path: &str,
    ) -> Result<Option<CertificateMaterial>, StoreError> {
        let request = self
            .transport
            .client()
            .get(self.url(cert_path))
            .header(TOKEN_HEADER, &self.token);
        let response = self.transport.execute(request).await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(StoreError::Status {
                path: cert_path.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body: StoreResponse =
            response.json().await.map_err(|source| StoreError::Decode {
                path: cert_path.to_string(),
                source,
            })?;
        Ok(Some(body.data.into()))
    }

    /// Request a new certificate. In dry-run mode this returns a synthetic
    /// placeholder without touching the network.
    pub async fn issue_certificate(
        &self,
        cert_path: &str,
        common_name: &str,
    ) -> Result<CertificateMaterial, StoreError> {
        if self.dry_run {
            tracing::info!(cert_path, common_name, "dry-run: would request new certificate");
            return Ok(CertificateMaterial {
                certificate: "placeholder-certificate".to_string(),
                private_key: "placeholder-key".to_string(),
                expires_at: None,
            });
        }

        let request = self
            .transport
            .client()
            .post(self.url(cert_path))
            .header(TOKEN_HEADER, &self.token)
            .json(&serde_json::json!({ "common_name": common_name }));
        let response = self.transport.execute(request).await?;

        if !response.status().is_success() {
            return Err(StoreError::Status {
                path: cert_path.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body: StoreResponse =
            response.json().await.map_err(|source| StoreError::Decode {
                path: cert_path.to_string(),
                source,
            })?;
        tracing::info!(cert_path, common_name, "new certificate issued");
        Ok(body.data.into())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

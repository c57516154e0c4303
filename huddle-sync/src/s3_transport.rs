//! S3 object reads and writes with short-lived credentials.

use crate::credential_manager::StsCredentials;
use crate::error::{SyncError, SyncResult};
use aws_sdk_s3::Client as S3Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_smithy_http_client::{Builder as HttpClientBuilder, tls};
use aws_smithy_runtime_api::client::http::SharedHttpClient;
use tracing::debug;

pub struct S3Transport {
    bucket: String,
    region: String,
    endpoint_override: Option<String>,
    http_client: SharedHttpClient,
}

impl S3Transport {
    pub fn new(bucket: String, region: String, endpoint_override: Option<String>) -> Self {
        let http_client = HttpClientBuilder::new()
            .tls_provider(tls::Provider::Rustls(
                tls::rustls_provider::CryptoMode::Ring,
            ))
            .build_https();

        Self {
            bucket,
            region,
            endpoint_override,
            http_client,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn build_client(&self, creds: &StsCredentials) -> S3Client {
        let credentials = aws_credential_types::Credentials::new(
            &creds.access_key_id,
            &creds.secret_access_key,
            (!creds.session_token.is_empty()).then(|| creds.session_token.clone()),
            None,
            "huddle-sts",
        );

        let mut config_builder = aws_sdk_s3::Config::builder()
            .region(aws_types::region::Region::new(self.region.clone()))
            .credentials_provider(credentials)
            .http_client(self.http_client.clone())
            .behavior_version_latest();

        if let Some(ref endpoint) = self.endpoint_override {
            config_builder = config_builder
                .endpoint_url(endpoint)
                .force_path_style(true);
        }

        S3Client::from_conf(config_builder.build())
    }

    /// Writes `data` to `key`, replacing any existing object.
    pub async fn upload(&self, creds: &StsCredentials, key: &str, data: Vec<u8>) -> SyncResult<()> {
        if creds.is_expired() {
            return Err(SyncError::AuthExpired);
        }

        let client = self.build_client(creds);
        let size = data.len();

        client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/json")
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| SyncError::S3(format!("upload failed for {key}: {e}")))?;

        debug!("uploaded {size} bytes to s3://{}/{key}", self.bucket);
        Ok(())
    }

    /// Reads `key`. A missing object is `Ok(None)`.
    pub async fn download_optional(
        &self,
        creds: &StsCredentials,
        key: &str,
    ) -> SyncResult<Option<Vec<u8>>> {
        if creds.is_expired() {
            return Err(SyncError::AuthExpired);
        }

        let client = self.build_client(creds);

        let resp = match client.get_object().bucket(&self.bucket).key(key).send().await {
            Ok(resp) => resp,
            Err(e) => {
                let service_err = e.into_service_error();
                if service_err.is_no_such_key() {
                    debug!("s3://{}/{key} does not exist", self.bucket);
                    return Ok(None);
                }
                return Err(SyncError::S3(format!(
                    "download failed for {key}: {service_err}"
                )));
            }
        };

        let body = resp
            .body
            .collect()
            .await
            .map_err(|e| SyncError::S3(format!("failed to read body for {key}: {e}")))?;

        let bytes = body.into_bytes().to_vec();
        debug!(
            "downloaded {} bytes from s3://{}/{key}",
            bytes.len(),
            self.bucket
        );
        Ok(Some(bytes))
    }
}

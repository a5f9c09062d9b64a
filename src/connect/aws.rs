use crate::config::connection::ConnectionSettings;
use crate::connect::{ClientFactory, Credentials};
use crate::domain::ports::Storage;
use crate::utils::error::{EtlError, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_sdk_s3::Client as S3Client;
use std::sync::Arc;

const SERVICE: &str = "s3";

/// Builds an S3 client from region, profile, static keys or the default provider chain.
#[derive(Debug, Clone, Default)]
pub struct AwsConnector;

#[async_trait]
impl ClientFactory for AwsConnector {
    type Client = S3Client;

    fn service_name(&self) -> &str {
        SERVICE
    }

    async fn build(&self, settings: &ConnectionSettings, credentials: Credentials) -> Result<S3Client> {
        let region = settings.region().ok_or_else(|| EtlError::ConnectivityError {
            service: SERVICE.to_string(),
            message: "A region is required".to_string(),
        })?;

        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.to_string()));

        if let Some(endpoint) = settings.primary_endpoint() {
            crate::utils::validation::validate_url("endpoints", endpoint).map_err(|e| {
                EtlError::ConnectivityError {
                    service: SERVICE.to_string(),
                    message: e.to_string(),
                }
            })?;
            loader = loader.endpoint_url(endpoint);
        }

        loader = match credentials {
            Credentials::Profile(profile) => loader.profile_name(profile),
            Credentials::Static(secrets) => {
                let (Some(key_id), Some(secret)) = (
                    secrets.get("aws_access_key_id"),
                    secrets.get("aws_secret_access_key"),
                ) else {
                    return Err(EtlError::AuthenticationError {
                        service: SERVICE.to_string(),
                        message: "Access key id and secret access key are both required"
                            .to_string(),
                    });
                };
                loader.credentials_provider(aws_sdk_s3::config::Credentials::new(
                    key_id,
                    secret,
                    secrets.get("aws_session_token").map(str::to_string),
                    None,
                    "sheet-etl-static",
                ))
            }
            Credentials::Ambient => loader,
        };

        let config = loader.load().await;
        Ok(S3Client::new(&config))
    }
}

fn storage_error(action: &str, key: &str, err: impl ProvideErrorMetadata + std::fmt::Display) -> EtlError {
    EtlError::StorageError {
        message: format!(
            "Failed to {} s3 object {}: {} ({})",
            action,
            key,
            err.message().unwrap_or("no message"),
            err.code().unwrap_or("unknown")
        ),
    }
}

/// `x-amz-copy-source` value: bucket and key with every key segment percent-encoded.
fn copy_source(bucket: &str, key: &str) -> String {
    let encoded: Vec<String> = key
        .split('/')
        .map(|segment| {
            url::form_urlencoded::byte_serialize(segment.as_bytes())
                .collect::<String>()
                .replace('+', "%20")
        })
        .collect();
    format!("{}/{}", bucket, encoded.join("/"))
}

/// 以 S3 bucket + prefix 實作 Storage
#[derive(Debug, Clone)]
pub struct S3Storage {
    client: Arc<S3Client>,
    bucket: String,
    prefix: String,
}

impl S3Storage {
    pub fn new(client: Arc<S3Client>, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    fn key(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if self.prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", self.prefix, path)
        }
    }

    fn relative<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            key
        } else {
            key.strip_prefix(&self.prefix)
                .map(|k| k.trim_start_matches('/'))
                .unwrap_or(key)
        }
    }
}

impl Storage for S3Storage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let key = self.key(path);
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| storage_error("read", &key, e.into_service_error()))?;

        let data = resp.body.collect().await.map_err(|e| EtlError::StorageError {
            message: format!("Failed to collect s3 object {}: {}", key, e),
        })?;

        Ok(data.into_bytes().to_vec())
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let key = self.key(path);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(data.to_vec().into())
            .send()
            .await
            .map_err(|e| storage_error("write", &key, e.into_service_error()))?;
        tracing::debug!("Wrote s3://{}/{} ({} bytes)", self.bucket, key, data.len());
        Ok(())
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        let key = self.key(path);
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| storage_error("delete", &key, e.into_service_error()))?;
        Ok(())
    }

    /// S3 沒有 rename：先複製再刪除來源
    async fn rename_file(&self, from: &str, to: &str) -> Result<()> {
        let from_key = self.key(from);
        let to_key = self.key(to);
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .copy_source(copy_source(&self.bucket, &from_key))
            .key(&to_key)
            .send()
            .await
            .map_err(|e| storage_error("copy", &from_key, e.into_service_error()))?;
        self.delete_file(from).await
    }

    async fn list_files(&self, prefix: &str) -> Result<Vec<String>> {
        let key_prefix = self.key(prefix);
        let mut files = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let resp = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&key_prefix)
                .set_continuation_token(token.take())
                .send()
                .await
                .map_err(|e| storage_error("list", &key_prefix, e.into_service_error()))?;

            for object in resp.contents() {
                if let Some(key) = object.key() {
                    files.push(self.relative(key).to_string());
                }
            }

            match resp.next_continuation_token() {
                Some(next) => token = Some(next.to_string()),
                None => break,
            }
        }

        files.sort();
        Ok(files)
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        let key = self.key(path);
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let err = err.into_service_error();
                if err.is_not_found() {
                    Ok(false)
                } else {
                    Err(storage_error("inspect", &key, err))
                }
            }
        }
    }
}

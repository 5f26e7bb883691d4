use crate::blob_store::BlobStore;
use crate::config::S3Settings;
use crate::TrackerError;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::{primitives::ByteStream, Client};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::debug;

/// Blob store backed by an S3 bucket. Calls block on a private runtime.
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    prefix: String,
    runtime: Arc<Runtime>,
}

impl S3BlobStore {
    pub fn new(settings: &S3Settings) -> Result<Self, TrackerError> {
        let runtime = Runtime::new().map_err(|e| TrackerError::Storage(format!("tokio runtime error: {}", e)))?;
        let region = Region::new(settings.region.clone());
        let base_config = runtime.block_on(
            aws_config::defaults(BehaviorVersion::latest())
                .region(region.clone())
                .load(),
        );

        let mut s3_builder = aws_sdk_s3::config::Builder::from(&base_config).region(region);
        if let Some(endpoint) = &settings.endpoint {
            s3_builder = s3_builder.endpoint_url(endpoint);
            s3_builder = s3_builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(s3_builder.build()),
            bucket: settings.bucket.clone(),
            prefix: settings.prefix.clone(),
            runtime: Arc::new(runtime),
        })
    }

    fn prefixed(&self, key: &str) -> String {
        let clean = key.trim_start_matches('/');
        if self.prefix.is_empty() {
            clean.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), clean)
        }
    }
}

impl BlobStore for S3BlobStore {
    fn get(&self, key: &str) -> Result<Vec<u8>, TrackerError> {
        let resp = self
            .runtime
            .block_on(self.client.get_object().bucket(&self.bucket).key(self.prefixed(key)).send())
            .map_err(|e| {
                if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) {
                    TrackerError::NotFound(key.to_string())
                } else {
                    TrackerError::Storage(format!("S3 get {}: {}", key, e))
                }
            })?;

        let data = self
            .runtime
            .block_on(resp.body.collect())
            .map_err(|e| TrackerError::Storage(format!("S3 read {}: {}", key, e)))?
            .to_vec();
        debug!("[costtrack:s3] read {} ({} bytes)", key, data.len());
        Ok(data)
    }

    fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), TrackerError> {
        let len = bytes.len();
        self.runtime
            .block_on(
                self.client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(self.prefixed(key))
                    .body(ByteStream::from(bytes))
                    .send(),
            )
            .map_err(|e| TrackerError::Storage(format!("S3 put {}: {}", key, e)))?;
        debug!("[costtrack:s3] wrote {} ({} bytes)", key, len);
        Ok(())
    }

    fn last_modified(&self, key: &str) -> Result<Option<DateTime<Utc>>, TrackerError> {
        let resp = self
            .runtime
            .block_on(self.client.head_object().bucket(&self.bucket).key(self.prefixed(key)).send());
        match resp {
            Ok(head) => Ok(head
                .last_modified()
                .and_then(|t| DateTime::<Utc>::from_timestamp(t.secs(), t.subsec_nanos()))),
            Err(e) if e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) => Ok(None),
            Err(e) => Err(TrackerError::Storage(format!("S3 head {}: {}", key, e))),
        }
    }
}

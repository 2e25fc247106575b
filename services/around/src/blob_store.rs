use crate::config::S3Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl};
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

/// Durable media storage
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload `data` as `object_id` in an existing bucket, make it publicly
    /// readable and return its public URL.
    async fn store(
        &self,
        bucket: &str,
        object_id: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String>;

    /// Remove an object. Removing an absent object succeeds.
    async fn delete(&self, bucket: &str, object_id: &str) -> Result<bool>;
}

/// S3-compatible blob store
pub struct S3BlobStore {
    client: S3Client,
    config: S3Config,
}

impl S3BlobStore {
    /// Create a new S3 blob store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        Self::from_client(S3Client::from_conf(s3_config_builder.build()), config)
    }

    /// Wrap an already configured client
    pub fn from_client(client: S3Client, config: &S3Config) -> Result<Self> {
        config.validate()?;

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 blob store initialized"
        );

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Fail unless the bucket already exists; buckets are never auto-created
    async fn require_bucket(&self, bucket: &str) -> Result<()> {
        self.client
            .head_bucket()
            .bucket(bucket)
            .send()
            .await
            .with_context(|| format!("Bucket {} is not available", bucket))?;
        Ok(())
    }

    /// Simple single-part upload for small objects
    async fn simple_upload(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .send()
            .await
            .context("Failed to upload object to S3")?;

        Ok(())
    }

    /// Multipart upload for large objects. A failed part aborts the upload
    /// so no incomplete parts stay in the bucket.
    async fn multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .context("Failed to create multipart upload")?;

        let upload_id = create_response
            .upload_id()
            .context("No upload ID in response")?;

        if let Err(e) = self.upload_parts(bucket, key, upload_id, &data).await {
            warn!(key = %key, error = %e, "Multipart upload failed, aborting");
            if let Err(abort_err) = self
                .client
                .abort_multipart_upload()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .send()
                .await
            {
                warn!(key = %key, error = %abort_err, "Failed to abort multipart upload");
            }
            return Err(e);
        }

        Ok(())
    }

    async fn upload_parts(&self, bucket: &str, key: &str, upload_id: &str, data: &Bytes) -> Result<()> {
        let mut completed_parts = Vec::new();

        for (index, chunk) in data.chunks(self.config.part_size_bytes).enumerate() {
            let part_number = index as i32 + 1;

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(data.slice_ref(chunk)))
                .send()
                .await
                .with_context(|| format!("Failed to upload part {}", part_number))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .context("Failed to complete multipart upload")?;

        Ok(())
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self, data), fields(size_bytes = data.len()))]
    async fn store(
        &self,
        bucket: &str,
        object_id: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String> {
        self.require_bucket(bucket).await?;

        if data.len() > self.config.multipart_threshold_bytes {
            self.multipart_upload(bucket, object_id, data, content_type)
                .await?;
        } else {
            self.simple_upload(bucket, object_id, data, content_type)
                .await?;
        }

        self.client
            .put_object_acl()
            .bucket(bucket)
            .key(object_id)
            .acl(ObjectCannedAcl::PublicRead)
            .send()
            .await
            .context("Failed to make object publicly readable")?;

        let url = public_object_url(&self.config, bucket, object_id);
        info!(url = %url, "Media is saved to S3");

        Ok(url)
    }

    #[instrument(skip(self))]
    async fn delete(&self, bucket: &str, object_id: &str) -> Result<bool> {
        self.require_bucket(bucket).await?;

        // S3 acknowledges deletes of absent keys, which keeps this idempotent
        self.client
            .delete_object()
            .bucket(bucket)
            .key(object_id)
            .send()
            .await
            .context("Failed to delete object from S3")?;

        debug!("Media deleted from S3");
        Ok(true)
    }
}

/// Stable public URL of an object
pub fn public_object_url(config: &S3Config, bucket: &str, key: &str) -> String {
    if let Some(ref base) = config.public_base_url {
        return format!("{}/{}/{}", base.trim_end_matches('/'), bucket, key);
    }

    match config.endpoint_url {
        Some(ref endpoint) => format!("{}/{}/{}", endpoint.trim_end_matches('/'), bucket, key),
        None => format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            bucket, config.region, key
        ),
    }
}

/// Content type for an uploaded media part
pub fn media_content_type(declared: Option<&str>) -> String {
    match declared.map(str::trim) {
        Some(ct) if !ct.is_empty() => ct.to_string(),
        _ => "application/octet-stream".to_string(),
    }
}

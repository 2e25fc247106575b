//! Post ingestion.
//!
//! One logical "create post" fans out to three stores in a fixed order:
//!
//! ```text
//! validate ──▶ new id ──▶ blob upload ──▶ search index ──▶ record store
//!                          (optional)
//! ```
//!
//! The steps are sequential, not transactional. A failure stops the pipeline
//! at that step, and nothing already written is undone. A failed upload
//! leaves no trace anywhere. A failed index write leaves an orphaned blob. A
//! failed record append leaves a searchable post with no audit row.
//!
//! Removal runs the other way: index entry first, then media. The record
//! row is an append-only history and is kept.

use crate::blob_store::BlobStore;
use crate::models::{CoordinateError, Location, Post};
use crate::record_store::RecordStore;
use crate::search_index::SearchIndex;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(#[from] CoordinateError),

    #[error("Image is not available")]
    MissingMedia,

    #[error("Malformed multipart submission: {0}")]
    Multipart(String),

    #[error("Failed to save media: {0:#}")]
    Upload(anyhow::Error),

    #[error("Failed to index post: {0:#}")]
    Index(anyhow::Error),

    #[error("Failed to append post record: {0:#}")]
    Record(anyhow::Error),
}

impl IngestError {
    /// Rejections caused by the submission itself rather than a backend
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            IngestError::InvalidCoordinate(_) | IngestError::Multipart(_)
        )
    }

    pub fn public_message(&self) -> String {
        match self {
            IngestError::Upload(_) => "Failed to save media".to_string(),
            IngestError::Index(_) => "Failed to save post".to_string(),
            IngestError::Record(_) => "Failed to save post record".to_string(),
            other => other.to_string(),
        }
    }

    fn stage(&self) -> &'static str {
        match self {
            IngestError::InvalidCoordinate(_) | IngestError::Multipart(_) => "validate",
            IngestError::MissingMedia => "media",
            IngestError::Upload(_) => "upload",
            IngestError::Index(_) => "index",
            IngestError::Record(_) => "record",
        }
    }
}

#[derive(Error, Debug)]
pub enum RemoveError {
    #[error("Post {0} does not exist")]
    NotFound(String),

    #[error("Post {id} belongs to another user")]
    NotOwner { id: String },

    #[error("Failed to look up post: {0:#}")]
    Lookup(anyhow::Error),

    #[error("Failed to remove post from index: {0:#}")]
    Index(anyhow::Error),

    #[error("Failed to remove media: {0:#}")]
    Media(anyhow::Error),
}

impl RemoveError {
    pub fn public_message(&self) -> String {
        match self {
            RemoveError::Lookup(_) | RemoveError::Index(_) | RemoveError::Media(_) => {
                "The deletion of the post is not successful".to_string()
            }
            other => other.to_string(),
        }
    }
}

/// Uploaded media part
#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub content_type: String,
    pub data: Bytes,
}

/// Raw fields of a post submission, before validation
#[derive(Debug, Clone, Default)]
pub struct PostSubmission {
    pub message: String,
    pub lat: Option<String>,
    pub lon: Option<String>,
    pub media: Option<MediaUpload>,
}

/// Realizes "create post" across blob store, search index and record store
pub struct PostIngestion {
    index: Arc<dyn SearchIndex>,
    blobs: Arc<dyn BlobStore>,
    records: Arc<dyn RecordStore>,
    bucket: String,
    require_media: bool,
}

impl PostIngestion {
    pub fn new(
        index: Arc<dyn SearchIndex>,
        blobs: Arc<dyn BlobStore>,
        records: Arc<dyn RecordStore>,
        bucket: impl Into<String>,
        require_media: bool,
    ) -> Self {
        Self {
            index,
            blobs,
            records,
            bucket: bucket.into(),
            require_media,
        }
    }

    /// Create a post owned by the authenticated `user`.
    ///
    /// Every accepted call creates a distinct post with a fresh id.
    #[instrument(skip(self, submission), fields(user = %user))]
    pub async fn ingest(&self, user: &str, submission: PostSubmission) -> Result<Post, IngestError> {
        let result = self.run(user, submission).await;

        match &result {
            Ok(post) => {
                metrics::counter!("around.posts.ingested").increment(1);
                info!(post_id = %post.id, "Post created");
            }
            Err(e) => {
                metrics::counter!("around.posts.ingest_failed", "stage" => e.stage()).increment(1);
            }
        }

        result
    }

    async fn run(&self, user: &str, submission: PostSubmission) -> Result<Post, IngestError> {
        info!(message = %submission.message, "Received one post request");

        let location = Location::parse(submission.lat.as_deref(), submission.lon.as_deref())?;

        if submission.media.is_none() && self.require_media {
            return Err(IngestError::MissingMedia);
        }

        let mut post = Post {
            id: Uuid::new_v4().to_string(),
            user: user.to_string(),
            message: submission.message,
            location,
            media_url: None,
        };

        if let Some(media) = submission.media {
            let url = self
                .blobs
                .store(&self.bucket, &post.id, media.data, &media.content_type)
                .await
                .map_err(|e| {
                    error!(post_id = %post.id, error = %e, "Media upload failed, nothing was saved");
                    IngestError::Upload(e)
                })?;
            post.media_url = Some(url);
        }

        self.index.index_post(&post.id, &post).await.map_err(|e| {
            if post.media_url.is_some() {
                warn!(post_id = %post.id, "Media stays in blob store without an index entry");
            }
            IngestError::Index(e)
        })?;

        self.records.append(&post.id, &post).await.map_err(|e| {
            warn!(post_id = %post.id, "Post is searchable but has no record row");
            IngestError::Record(e)
        })?;

        Ok(post)
    }

    /// Delete a post owned by `user` from the index and drop its media.
    #[instrument(skip(self), fields(user = %user))]
    pub async fn remove(&self, user: &str, id: &str) -> Result<(), RemoveError> {
        info!(post_id = %id, "Received one delete request");

        let post = self
            .index
            .get_post(id)
            .await
            .map_err(RemoveError::Lookup)?
            .ok_or_else(|| RemoveError::NotFound(id.to_string()))?;

        if post.user != user {
            return Err(RemoveError::NotOwner { id: id.to_string() });
        }

        self.index.delete_post(id).await.map_err(RemoveError::Index)?;

        if post.media_url.is_some() {
            self.blobs.delete(&self.bucket, id).await.map_err(|e| {
                warn!(post_id = %id, "Post is gone from search but its media remains");
                RemoveError::Media(e)
            })?;
        }

        metrics::counter!("around.posts.deleted").increment(1);
        info!(post_id = %id, "Post deleted");
        Ok(())
    }
}

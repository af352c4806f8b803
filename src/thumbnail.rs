//! Attachment thumbnails.
//!
//! Decoding and resizing run on the blocking pool while holding a permit from
//! the shared [`PermitPool`], so at most `capacity` images are in memory at
//! once no matter how many requests ask for thumbnails.

use bytes::Bytes;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::guard::{GuardError, PermitPool};

/// Image types we know how to decode
const SUPPORTED_MIME_TYPES: &[&str] = &["image/png", "image/jpeg", "image/jpg", "image/gif", "image/webp"];

#[derive(Error, Debug)]
pub enum ThumbnailError {
    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error("Failed to decode image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("Failed to encode thumbnail: {0}")]
    Encode(#[source] image::ImageError),

    #[error("Thumbnail task failed: {0}")]
    Task(String),
}

/// Rendered thumbnail
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub data: Bytes,
    pub mime_type: String,
}

#[derive(Debug, Clone)]
pub struct Thumbnailer {
    pool: PermitPool,
    max_size: u32,
}

impl Thumbnailer {
    pub fn new(pool: PermitPool, max_size: u32) -> Self {
        Self {
            pool,
            max_size: max_size.max(1),
        }
    }

    pub fn supports(mime_type: &str) -> bool {
        SUPPORTED_MIME_TYPES.contains(&mime_type.to_ascii_lowercase().as_str())
    }

    pub fn pool(&self) -> &PermitPool {
        &self.pool
    }

    /// Shrink an image so neither side exceeds `max_size`.
    ///
    /// Images already within bounds are returned unchanged.
    pub async fn generate(
        &self,
        blob: Bytes,
        mime_type: &str,
        cancel: &CancellationToken,
    ) -> Result<Thumbnail, ThumbnailError> {
        let permit = self.pool.acquire(cancel).await?;
        let max_size = self.max_size;
        let mime_type = mime_type.to_owned();

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            render(blob, mime_type, max_size)
        })
        .await
        .map_err(|e| ThumbnailError::Task(e.to_string()))?
    }
}

fn render(blob: Bytes, mime_type: String, max_size: u32) -> Result<Thumbnail, ThumbnailError> {
    let img = image::load_from_memory(&blob).map_err(ThumbnailError::Decode)?;
    if img.width() <= max_size && img.height() <= max_size {
        return Ok(Thumbnail { data: blob, mime_type });
    }

    let thumb = DynamicImage::ImageRgb8(img.thumbnail(max_size, max_size).to_rgb8());
    let mut buf = Vec::new();
    thumb
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .map_err(ThumbnailError::Encode)?;

    debug!(
        "Thumbnail {}x{} -> {}x{} ({} bytes)",
        img.width(),
        img.height(),
        thumb.width(),
        thumb.height(),
        buf.len()
    );

    Ok(Thumbnail {
        data: Bytes::from(buf),
        mime_type: "image/jpeg".to_owned(),
    })
}

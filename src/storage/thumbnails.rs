//! Thumbnail derivation for stored images.
//!
//! A thumbnail is itself a public-read object next to the original, named
//! by [`ObjectName::thumbnail`]. Its public URL is the "thumbnail reference"
//! that gets recorded on the artifact and pushed to clients.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use image::ImageFormat;
use log::debug;

use crate::error_handling::types::ThumbnailError;
use crate::storage::storage_trait::ObjectStore;
use crate::storage::types::{ObjectName, PutOptions};

#[async_trait]
pub trait ThumbnailService: Send + Sync {
    /// Derives the thumbnail of `object` and returns its servable URL.
    async fn serving_url(&self, object: &ObjectName) -> Result<String, ThumbnailError>;

    /// Removes whatever `serving_url` derived for `object`.
    async fn delete_serving_url(&self, object: &ObjectName) -> Result<(), ThumbnailError>;

    /// Names of the objects derived from `object`.
    fn derived_objects(&self, object: &ObjectName) -> Vec<ObjectName>;
}

/// Resizes stored images with the `image` crate and stores PNG thumbnails.
pub struct ImageThumbnailer {
    objects: Arc<dyn ObjectStore>,
    size: u32,
}

impl ImageThumbnailer {
    pub fn new(objects: Arc<dyn ObjectStore>, size: u32) -> Self {
        Self { objects, size }
    }
}

/// Decodes `data` and encodes a PNG no larger than `size` on either side.
pub fn render_thumbnail(data: &[u8], size: u32) -> Result<Vec<u8>, ThumbnailError> {
    let img = image::load_from_memory(data).map_err(|e| ThumbnailError::Decode(e.to_string()))?;
    let thumb = if img.width() > size || img.height() > size {
        img.thumbnail(size, size)
    } else {
        img
    };

    let mut buffer = Vec::new();
    let mut cursor = Cursor::new(&mut buffer);
    thumb
        .write_to(&mut cursor, ImageFormat::Png)
        .map_err(|e| ThumbnailError::Encode(e.to_string()))?;
    Ok(buffer)
}

#[async_trait]
impl ThumbnailService for ImageThumbnailer {
    async fn serving_url(&self, object: &ObjectName) -> Result<String, ThumbnailError> {
        let original = self.objects.get(object).await?;
        let size = self.size;
        let png = tokio::task::spawn_blocking(move || render_thumbnail(&original.data, size))
            .await
            .map_err(|e| ThumbnailError::Encode(e.to_string()))??;

        let name = object.thumbnail(self.size);
        let options = PutOptions {
            content_type: "image/png".to_string(),
            public_read: true,
        };
        self.objects.put(&name, &png, &options).await?;
        debug!("Derived thumbnail {} from {}", name, object);
        Ok(self.objects.public_url(&name))
    }

    async fn delete_serving_url(&self, object: &ObjectName) -> Result<(), ThumbnailError> {
        self.objects.delete(&object.thumbnail(self.size)).await?;
        Ok(())
    }

    fn derived_objects(&self, object: &ObjectName) -> Vec<ObjectName> {
        vec![object.thumbnail(self.size)]
    }
}

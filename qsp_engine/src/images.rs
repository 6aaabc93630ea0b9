use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use crate::content::ContentResolver;

/// Displayable image handle; front ends load the file themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageRef {
    File {
        path: PathBuf,
        width: u32,
        height: u32,
    },
    Placeholder,
}

pub trait ImageProvider: Send + Sync {
    fn get(&self, path: &str) -> ImageRef;
    fn invalidate_cache(&self);
}

/// Resolves images through the content resolver and memoises the result
/// until the next game (re)start or directory change.
pub struct CachedImageProvider {
    resolver: Arc<ContentResolver>,
    cache: Mutex<HashMap<String, ImageRef>>,
}

impl CachedImageProvider {
    pub fn new(resolver: Arc<ContentResolver>) -> Self {
        Self {
            resolver,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn load(&self, path: &str) -> ImageRef {
        let Some(file) = self.resolver.find(path) else {
            log::error!("[qsp_engine::images] image not found: {path}");
            return ImageRef::Placeholder;
        };
        match image::image_dimensions(&file) {
            Ok((width, height)) => ImageRef::File {
                path: file,
                width,
                height,
            },
            Err(err) => {
                log::error!(
                    "[qsp_engine::images] failed to read {}: {err}",
                    file.display()
                );
                ImageRef::Placeholder
            }
        }
    }
}

impl ImageProvider for CachedImageProvider {
    fn get(&self, path: &str) -> ImageRef {
        if path.trim().is_empty() {
            return ImageRef::Placeholder;
        }
        if let Some(hit) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
        {
            return hit.clone();
        }
        let loaded = self.load(path);
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), loaded.clone());
        loaded
    }

    fn invalidate_cache(&self) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    // 1x1 transparent PNG.
    const PIXEL_PNG: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F,
        0x15, 0xC4, 0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00,
        0x01, 0x00, 0x00, 0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49,
        0x45, 0x4E, 0x44, 0xAE, 0x42, 0x60, 0x82,
    ];

    #[test]
    fn missing_images_become_placeholders() {
        let dir = tempdir().expect("tempdir");
        let resolver = Arc::new(ContentResolver::new());
        resolver.set_game_dir(dir.path());
        let provider = CachedImageProvider::new(resolver);
        assert_eq!(provider.get("nothing.png"), ImageRef::Placeholder);
        assert_eq!(provider.get(""), ImageRef::Placeholder);
    }

    #[test]
    fn cache_is_dropped_on_invalidate() {
        let dir = tempdir().expect("tempdir");
        let resolver = Arc::new(ContentResolver::new());
        resolver.set_game_dir(dir.path());
        let provider = CachedImageProvider::new(resolver);

        assert_eq!(provider.get("dot.png"), ImageRef::Placeholder);
        fs::write(dir.path().join("dot.png"), PIXEL_PNG).expect("write png");
        assert_eq!(provider.get("dot.png"), ImageRef::Placeholder);

        provider.invalidate_cache();
        match provider.get("dot.png") {
            ImageRef::File { width, height, .. } => assert_eq!((width, height), (1, 1)),
            other => panic!("expected resolved image, got {other:?}"),
        }
    }
}

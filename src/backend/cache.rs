use image::DynamicImage;
use log::warn;
use std::collections::HashMap;
use std::fs;
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::window::ComicId;

const MAX_MEMORY_IMAGES: usize = 30;
const MAX_DISK_CACHE_MB: u64 = 200;

/// Memory + disk cache for decoded comic images, keyed by comic id.
/// Cloned into fetch tasks; the memory tier evicts least recently used
/// entries, the disk tier is trimmed when it grows past its size cap.
#[derive(Clone)]
pub struct ImageCache {
    inner: Arc<RwLock<ImageCacheInner>>,
}

struct ImageCacheInner {
    images: HashMap<ComicId, DynamicImage>,
    access_order: Vec<ComicId>,
    cache_dir: PathBuf,
}

impl ImageCache {
    pub fn new() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("xkcd-tui")
            .join("images");

        Self::with_dir(cache_dir)
    }

    pub fn with_dir(cache_dir: PathBuf) -> Self {
        if let Err(e) = fs::create_dir_all(&cache_dir) {
            warn!("failed to create image cache directory: {e}");
        }

        Self {
            inner: Arc::new(RwLock::new(ImageCacheInner {
                images: HashMap::new(),
                access_order: Vec::new(),
                cache_dir,
            })),
        }
    }

    pub async fn get(&self, id: ComicId) -> Option<DynamicImage> {
        let mut inner = self.inner.write().await;

        if inner.images.contains_key(&id) {
            let image = inner.images.get(&id).cloned();
            inner.access_order.retain(|k| *k != id);
            inner.access_order.push(id);
            return image;
        }

        if let Some(image) = inner.load_from_disk(id) {
            inner.insert_memory(id, image.clone());
            return Some(image);
        }

        None
    }

    pub async fn insert(&self, id: ComicId, image: DynamicImage) {
        let mut inner = self.inner.write().await;
        inner.save_to_disk(id, &image);
        inner.insert_memory(id, image);
    }
}

impl ImageCacheInner {
    fn insert_memory(&mut self, id: ComicId, image: DynamicImage) {
        if self.images.len() >= MAX_MEMORY_IMAGES {
            if let Some(oldest) = self.access_order.first().copied() {
                self.images.remove(&oldest);
                self.access_order.remove(0);
            }
        }

        self.access_order.retain(|k| *k != id);
        self.access_order.push(id);
        self.images.insert(id, image);
    }

    fn image_path(&self, id: ComicId) -> PathBuf {
        self.cache_dir.join(format!("{id}.png"))
    }

    fn load_from_disk(&self, id: ComicId) -> Option<DynamicImage> {
        let bytes = fs::read(self.image_path(id)).ok()?;
        image::ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .ok()?
            .decode()
            .ok()
    }

    fn save_to_disk(&self, id: ComicId, image: &DynamicImage) {
        self.trim_disk();

        let path = self.image_path(id);
        if let Ok(mut file) = fs::File::create(&path) {
            let _ = image.write_to(&mut file, image::ImageFormat::Png);
        }
    }

    fn trim_disk(&self) {
        let max_bytes = MAX_DISK_CACHE_MB * 1024 * 1024;

        let entries: Vec<_> = fs::read_dir(&self.cache_dir)
            .ok()
            .map(|rd| {
                rd.filter_map(|e| e.ok())
                    .filter_map(|e| {
                        let meta = e.metadata().ok()?;
                        let modified = meta.modified().ok()?;
                        Some((e.path(), meta.len(), modified))
                    })
                    .collect()
            })
            .unwrap_or_default();

        let total_size: u64 = entries.iter().map(|(_, size, _)| size).sum();
        if total_size <= max_bytes {
            return;
        }

        // Drop oldest files until under 80% of the cap.
        let mut entries = entries;
        entries.sort_by_key(|(_, _, modified)| *modified);

        let mut current_size = total_size;
        for (path, size, _) in entries {
            if current_size <= max_bytes * 80 / 100 {
                break;
            }
            if fs::remove_file(&path).is_ok() {
                current_size -= size;
            }
        }
    }
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::new()
    }
}

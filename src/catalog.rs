use crate::models::{Chapter, Gallery, ImageRecord};
use crate::{EngineError, Result};
use std::collections::{HashMap, HashSet};

/// Persistence collaborator consulted and extended by a resolution run.
///
/// Stored records are never rewritten; runs only append.
pub trait Catalog {
    fn stored_chapters(&self, gallery_id: i64) -> Result<Vec<Chapter>>;

    fn stored_images(&self, gallery_id: i64) -> Result<Vec<ImageRecord>>;

    /// Appends one run's chapters and images as a single batch.
    fn append_resolved(
        &mut self,
        gallery_id: i64,
        chapters: &[Chapter],
        images: &[ImageRecord],
    ) -> Result<()>;

    fn update_gallery(&mut self, gallery: &Gallery) -> Result<()>;
}

/// Catalog kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    galleries: HashMap<i64, Gallery>,
    chapters: HashMap<i64, Vec<Chapter>>,
    images: HashMap<i64, Vec<ImageRecord>>,
    append_calls: usize,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gallery(&self, gallery_id: i64) -> Option<&Gallery> {
        self.galleries.get(&gallery_id)
    }

    /// Number of non-empty batches appended so far.
    pub fn append_calls(&self) -> usize {
        self.append_calls
    }
}

impl Catalog for MemoryCatalog {
    fn stored_chapters(&self, gallery_id: i64) -> Result<Vec<Chapter>> {
        Ok(self.chapters.get(&gallery_id).cloned().unwrap_or_default())
    }

    fn stored_images(&self, gallery_id: i64) -> Result<Vec<ImageRecord>> {
        Ok(self.images.get(&gallery_id).cloned().unwrap_or_default())
    }

    fn append_resolved(
        &mut self,
        gallery_id: i64,
        chapters: &[Chapter],
        images: &[ImageRecord],
    ) -> Result<()> {
        if chapters.is_empty() && images.is_empty() {
            return Ok(());
        }

        let stored_chapters = self.chapters.entry(gallery_id).or_default();
        let mut chapter_orders: HashSet<u32> = stored_chapters.iter().map(|c| c.order).collect();
        for chapter in chapters {
            if !chapter_orders.insert(chapter.order) {
                return Err(EngineError::Configuration(format!(
                    "chapter order {} already used in gallery {gallery_id}",
                    chapter.order
                )));
            }
        }
        let stored_images = self.images.entry(gallery_id).or_default();
        let mut image_orders: HashSet<(u32, bool)> =
            stored_images.iter().map(|i| (i.order, i.is_cover)).collect();
        for image in images {
            if !image_orders.insert((image.order, image.is_cover)) {
                return Err(EngineError::Configuration(format!(
                    "image order {} already used in gallery {gallery_id}",
                    image.order
                )));
            }
        }

        self.chapters
            .entry(gallery_id)
            .or_default()
            .extend(chapters.iter().cloned());
        self.images
            .entry(gallery_id)
            .or_default()
            .extend(images.iter().cloned());
        self.append_calls += 1;
        Ok(())
    }

    fn update_gallery(&mut self, gallery: &Gallery) -> Result<()> {
        self.galleries.insert(gallery.id, gallery.clone());
        Ok(())
    }
}

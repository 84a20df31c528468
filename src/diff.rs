use crate::models::{Chapter, ImageRecord};
use crate::parsers::ChapterLink;
use std::collections::HashSet;
use url::Url;

/// Stable identity of a chapter: the path segment `offset_from_end` places
/// before the last one (0 = last). Mirrors of one chapter on different hosts
/// share this key.
///
/// Falls back to the whole URL when it has fewer segments than requested.
pub fn chapter_identity_key(url: &str, offset_from_end: usize) -> String {
    let trimmed = url.trim();
    let segments: Vec<String> = match Url::parse(trimmed) {
        Ok(parsed) => parsed
            .path_segments()
            .map(|segments| {
                segments
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        Err(_) => trimmed
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    };
    if offset_from_end < segments.len() {
        segments[segments.len() - 1 - offset_from_end].clone()
    } else {
        trimmed.to_string()
    }
}

/// Discovered chapters whose identity key is absent from `stored`, in
/// discovery order. A key repeated inside `discovered` is kept once.
pub fn extra_chapters(
    stored: &[Chapter],
    discovered: &[ChapterLink],
    offset_from_end: usize,
) -> Vec<ChapterLink> {
    let mut known: HashSet<String> = stored
        .iter()
        .map(|c| chapter_identity_key(&c.url, offset_from_end))
        .collect();
    discovered
        .iter()
        .filter(|link| known.insert(chapter_identity_key(&link.url, offset_from_end)))
        .cloned()
        .collect()
}

pub fn max_chapter_order(stored: &[Chapter]) -> u32 {
    stored.iter().map(|c| c.order).max().unwrap_or(0)
}

pub fn max_image_order(stored: &[ImageRecord]) -> u32 {
    stored.iter().map(|i| i.order).max().unwrap_or(0)
}

/// Continuation numbering for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterPlan {
    /// Extra chapters numbered `max(stored) + 1, + 2, ...`.
    pub chapters: Vec<Chapter>,
    pub first_image_order: u32,
    /// True on a first-time resolution, when a synthetic cover must be added.
    pub needs_cover: bool,
}

impl ChapterPlan {
    pub fn new(
        gallery_id: i64,
        stored_chapters: &[Chapter],
        stored_images: &[ImageRecord],
        discovered: &[ChapterLink],
        offset_from_end: usize,
    ) -> Self {
        let extra = extra_chapters(stored_chapters, discovered, offset_from_end);
        let base = max_chapter_order(stored_chapters);
        let chapters = extra
            .into_iter()
            .zip(1u32..)
            .map(|(link, step)| Chapter {
                gallery_id,
                url: link.url,
                order: base + step,
                title: link.title,
            })
            .collect();
        Self {
            chapters,
            first_image_order: max_image_order(stored_images) + 1,
            needs_cover: stored_chapters.is_empty(),
        }
    }
}

/// Hands out image orders one by one. Orders are never rewound, so a run
/// that stops early leaves a gap-free prefix.
#[derive(Debug, Clone)]
pub struct OrderCursor {
    next: u32,
}

impl OrderCursor {
    pub fn starting_at(first: u32) -> Self {
        Self { next: first.max(1) }
    }

    pub fn number_images(&mut self, urls: Vec<String>, chapter_url: Option<&str>) -> Vec<ImageRecord> {
        urls.into_iter()
            .map(|url| {
                let record = ImageRecord::page(url, self.next, chapter_url);
                self.next += 1;
                record
            })
            .collect()
    }
}

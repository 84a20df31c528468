use super::{
    chapter_links_from, image_urls_from, select_cascade, ChapterLink, ChapterListing, SourceParser,
};
use crate::net::Document;
use scraper::Selector;
use url::Url;

const CHAPTER_LINK_SELECTORS: &[&str] = &["[class^=wp-manga-chapter] a"];
const READER_IMAGE_SELECTOR: &str = ".reading-content img";
const CHAPTER_LISTING_PATH: &str = "ajax/chapters/";

/// Toonily (Madara theme). The chapter list is served by an ajax endpoint
/// hanging off the canonical gallery URL.
pub struct ToonilyParser;

impl ToonilyParser {
    fn canonical_url(doc: &Document) -> String {
        let html = doc.parse();
        let selector = Selector::parse("link[rel=canonical]").expect("canonical selector");
        let canonical = html
            .select(&selector)
            .filter_map(|el| el.value().attr("href"))
            .map(str::trim)
            .find(|href| !href.is_empty())
            .map(str::to_string);

        let mut url = canonical.unwrap_or_else(|| doc.url.clone());
        if let Ok(mut parsed) = Url::parse(&url) {
            parsed.set_query(None);
            parsed.set_fragment(None);
            url = parsed.to_string();
        }
        if !url.ends_with('/') {
            url.push('/');
        }
        url
    }
}

impl SourceParser for ToonilyParser {
    fn name(&self) -> &'static str {
        "toonily"
    }

    fn is_chapter_url(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(|last| last.to_ascii_lowercase().contains("chap"))
            .unwrap_or(false)
    }

    fn extract_chapter_links(&self, doc: &Document) -> Vec<ChapterLink> {
        let Some(base_url) = doc.base_url() else {
            return Vec::new();
        };
        let html = doc.parse();
        let anchors = select_cascade(&html, CHAPTER_LINK_SELECTORS);
        chapter_links_from(&anchors, &base_url)
    }

    fn extract_image_urls(&self, doc: &Document) -> Vec<String> {
        let Some(base_url) = doc.base_url() else {
            return Vec::new();
        };
        image_urls_from(&doc.parse(), READER_IMAGE_SELECTOR, &base_url)
    }

    fn chapter_listing(&self, gallery: &Document) -> ChapterListing {
        ChapterListing::Post(format!(
            "{}{CHAPTER_LISTING_PATH}",
            Self::canonical_url(gallery)
        ))
    }
}

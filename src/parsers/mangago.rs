use super::{
    chapter_links_from, image_urls_from, select_cascade, ChapterLink, FetchMode, SourceParser,
};
use crate::net::{normalize_url_with_base, Document};
use regex::Regex;
use scraper::Selector;
use std::collections::HashSet;
use std::sync::OnceLock;

const CHAPTER_LINK_SELECTORS: &[&str] = &[
    "#chapter_table a[href*='/read-manga/']",
    "table.uk-table a[href*='/read-manga/']",
    "#chapter_table a[href*='/chapter/']",
    "table.uk-table a[href*='/chapter/']",
];
const PICTURE_SELECTOR: &str = "#pic_container img";
const PAGE_NAV_SELECTOR: &str = "#dropdown-menu-page a";
/// Chapters hosted here carry a trailing page segment after the chapter folder.
const PRIMARY_HOST_MARKER: &str = "mangago.me/";

fn chapter_url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)//[^/]+/(read-manga/[^/]+/[^/]+/|chapter/\d+/\d+)")
            .expect("mangago chapter regex")
    })
}

/// Mangago and its sister hosts. Chapter pages paginate in script, so they
/// are loaded through the Render Bridge.
pub struct MangagoParser;

impl SourceParser for MangagoParser {
    fn name(&self) -> &'static str {
        "mangago"
    }

    fn is_chapter_url(&self, url: &str) -> bool {
        chapter_url_pattern().is_match(url)
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
        image_urls_from(&doc.parse(), PICTURE_SELECTOR, &base_url)
    }

    fn extract_page_urls(&self, doc: &Document) -> Vec<String> {
        // Resolved against the chapter's own host: sister sites link chapters across domains.
        let Some(base_url) = doc.base_url() else {
            return Vec::new();
        };
        let html = doc.parse();
        let selector = Selector::parse(PAGE_NAV_SELECTOR).expect("page nav selector");
        let mut seen = HashSet::new();
        html.select(&selector)
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| normalize_url_with_base(href, &base_url))
            .filter(|url| seen.insert(url.clone()))
            .collect()
    }

    fn fetch_mode(&self) -> FetchMode {
        FetchMode::Rendered
    }

    fn chapter_key_offset(&self, discovered: &[ChapterLink]) -> usize {
        if discovered
            .iter()
            .any(|link| link.url.contains(PRIMARY_HOST_MARKER))
        {
            1
        } else {
            0
        }
    }
}

use crate::net::{host_of, normalize_url_with_base, Document};
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use url::Url;

pub mod mangago;
pub mod toonily;

pub use mangago::MangagoParser;
pub use toonily::ToonilyParser;

/// Lazy-loading attributes win over `src`, in this order.
const IMAGE_SOURCE_ATTRS: &[&str] = &[
    "data-src",
    "data-lazy-src",
    "data-lazysrc",
    "data-cfsrc",
    "src",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterLink {
    pub url: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Chapter pages are plain HTML.
    Static,
    /// Chapter pages paginate through client-side scripts and go through the Render Bridge.
    Rendered,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterListing {
    /// Chapter links are on the gallery page itself.
    Inline,
    /// Chapter links come from an empty POST to this URL.
    Post(String),
}

/// Per-site extraction rules. Implementations are stateless and return empty
/// collections instead of failing when nothing matches.
pub trait SourceParser: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_chapter_url(&self, url: &str) -> bool;

    fn extract_chapter_links(&self, doc: &Document) -> Vec<ChapterLink>;

    fn extract_image_urls(&self, doc: &Document) -> Vec<String>;

    /// Links to the remaining pages of a paginated chapter, first page included.
    fn extract_page_urls(&self, _doc: &Document) -> Vec<String> {
        Vec::new()
    }

    fn fetch_mode(&self) -> FetchMode {
        FetchMode::Static
    }

    fn chapter_listing(&self, _gallery: &Document) -> ChapterListing {
        ChapterListing::Inline
    }

    /// Which path segment, counted from the end, identifies a chapter across
    /// URL changes.
    fn chapter_key_offset(&self, _discovered: &[ChapterLink]) -> usize {
        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    Mangago,
    Toonily,
}

impl Site {
    pub fn for_url(url: &str) -> Option<Self> {
        let host = host_of(url)?;
        let host = host.trim_start_matches("www.");
        match host {
            "mangago.me" | "mangago.zone" | "youhim.me" => Some(Site::Mangago),
            "toonily.com" | "toonily.me" => Some(Site::Toonily),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Site::Mangago => "mangago",
            Site::Toonily => "toonily",
        }
    }

    /// Sent as `Referer` when the images are downloaded later.
    pub fn root_url(&self) -> &'static str {
        match self {
            Site::Mangago => "https://www.mangago.me/",
            Site::Toonily => "https://toonily.com/",
        }
    }

    pub fn parser(&self) -> Box<dyn SourceParser> {
        match self {
            Site::Mangago => Box::new(MangagoParser),
            Site::Toonily => Box::new(ToonilyParser),
        }
    }
}

/// Runs `selectors` in order and returns the matches of the first one that
/// yields anything.
pub(crate) fn select_cascade<'a>(document: &'a Html, selectors: &[&str]) -> Vec<ElementRef<'a>> {
    for raw in selectors {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        let found: Vec<ElementRef<'a>> = document.select(&selector).collect();
        if !found.is_empty() {
            return found;
        }
    }
    Vec::new()
}

/// Turns anchors into chapter links, keeping the first occurrence of each URL.
pub(crate) fn chapter_links_from(elements: &[ElementRef<'_>], base_url: &Url) -> Vec<ChapterLink> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for el in elements {
        let Some(href) = el.value().attr("href") else {
            continue;
        };
        let Some(url) = normalize_url_with_base(href, base_url) else {
            continue;
        };
        if !seen.insert(url.clone()) {
            continue;
        }
        let text = element_text(el);
        out.push(ChapterLink {
            url,
            title: if text.is_empty() { None } else { Some(text) },
        });
    }
    out
}

pub(crate) fn img_src(el: &ElementRef<'_>, base_url: &Url) -> Option<String> {
    IMAGE_SOURCE_ATTRS
        .iter()
        .filter_map(|attr| el.value().attr(attr))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .and_then(|value| normalize_url_with_base(value, base_url))
}

/// Image URLs under `selector`, in document order, without repeats.
pub(crate) fn image_urls_from(document: &Html, selector: &str, base_url: &Url) -> Vec<String> {
    let Ok(selector) = Selector::parse(selector) else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    document
        .select(&selector)
        .filter_map(|img| img_src(&img, base_url))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

pub(crate) fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

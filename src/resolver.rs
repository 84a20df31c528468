//! Image Resolution Loop.
//!
//! One call to [`Resolver::resolve`] is one resolution run: fetch the gallery,
//! diff its chapters against the catalog, fetch every extra chapter in order
//! and append the numbered result as a single batch.

use crate::cancel::CancellationToken;
use crate::catalog::Catalog;
use crate::config::ResolverConfig;
use crate::credentials::HeaderSupplier;
use crate::diff::{ChapterPlan, OrderCursor};
use crate::models::{Chapter, DownloadParams, Gallery, ImageRecord};
use crate::net::{normalize_http_url, redact_url_for_log, PageFetcher};
use crate::parsers::{ChapterLink, ChapterListing, FetchMode, Site, SourceParser};
use crate::progress::{ProgressAggregator, ProgressSink};
use crate::render::{RenderSession, RendererFactory};
use crate::{EngineError, Result};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::thread;
use url::Url;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Start,
    FetchingGallery,
    DiffingChapters,
    FetchingChapter(usize),
    Complete,
    Halted,
    Failed,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Start => "start",
            RunState::FetchingGallery => "fetching_gallery",
            RunState::DiffingChapters => "diffing_chapters",
            RunState::FetchingChapter(_) => "fetching_chapter",
            RunState::Complete => "complete",
            RunState::Halted => "halted",
            RunState::Failed => "failed",
        }
    }
}

/// What one run appended to the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Gallery as stored after the run (page count and cover refreshed).
    pub gallery: Gallery,
    pub chapters: Vec<Chapter>,
    /// Ordered records, cover first when one was added.
    pub images: Vec<ImageRecord>,
}

impl Resolution {
    fn unchanged(gallery: &Gallery) -> Self {
        Self {
            gallery: gallery.clone(),
            chapters: Vec::new(),
            images: Vec::new(),
        }
    }
}

pub struct Resolver {
    config: ResolverConfig,
    fetcher: Box<dyn PageFetcher>,
    renderer: Option<RendererFactory>,
    progress: Arc<ProgressAggregator>,
}

impl Resolver {
    pub fn new(config: ResolverConfig, fetcher: Box<dyn PageFetcher>) -> Self {
        Self {
            config: config.clamped(),
            fetcher,
            renderer: None,
            progress: Arc::new(ProgressAggregator::new()),
        }
    }

    /// Enables sources whose chapters paginate in script.
    pub fn with_renderer(mut self, factory: RendererFactory) -> Self {
        self.renderer = Some(factory);
        self
    }

    /// Shares one aggregator across resolvers so the sink sees a single
    /// global value.
    pub fn with_progress(mut self, progress: Arc<ProgressAggregator>) -> Self {
        self.progress = progress;
        self
    }

    pub fn progress(&self) -> &Arc<ProgressAggregator> {
        &self.progress
    }

    /// Resolves `gallery` and appends whatever is new to `catalog`.
    ///
    /// Nothing is appended unless the run completes. Cancellation surfaces as
    /// [`EngineError::Interrupted`], never as an empty success.
    pub fn resolve(
        &self,
        gallery: &Gallery,
        parser: &dyn SourceParser,
        catalog: &mut dyn Catalog,
        credentials: &dyn HeaderSupplier,
        cancel: &CancellationToken,
        sink: &dyn ProgressSink,
    ) -> Result<Resolution> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "resolve",
            run_id = %run_id,
            gallery_id = gallery.id,
            site = parser.name()
        );
        let _entered = span.enter();

        let mut run = Run {
            resolver: self,
            gallery,
            parser,
            headers: credentials.headers_for(gallery),
            cancel,
            sink,
            session: None,
            state: RunState::Start,
        };
        tracing::info!(url = %redact_url_for_log(&gallery.url), "resolve_started");

        let outcome = run.execute(catalog);
        if let Some(session) = run.session.take() {
            session.shutdown();
        }

        match &outcome {
            Ok(resolution) => {
                run.transition(RunState::Complete);
                self.progress.complete(gallery.id);
                sink.report(self.progress.global());
                tracing::info!(
                    chapters = resolution.chapters.len(),
                    images = resolution.images.len(),
                    page_count = resolution.gallery.page_count,
                    "resolve_completed"
                );
            }
            Err(EngineError::Interrupted) => {
                run.transition(RunState::Halted);
                tracing::info!("resolve_interrupted");
            }
            Err(err) => {
                run.transition(RunState::Failed);
                tracing::warn!(error = %err, kind = ?err.kind(), "resolve_failed");
            }
        }
        self.progress.remove(gallery.id);
        outcome
    }
}

struct Run<'a> {
    resolver: &'a Resolver,
    gallery: &'a Gallery,
    parser: &'a dyn SourceParser,
    headers: Vec<(String, String)>,
    cancel: &'a CancellationToken,
    sink: &'a dyn ProgressSink,
    session: Option<RenderSession>,
    state: RunState,
}

impl Run<'_> {
    fn transition(&mut self, next: RunState) {
        tracing::debug!(from = self.state.as_str(), to = next.as_str(), "resolve_state");
        self.state = next;
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Interrupted);
        }
        Ok(())
    }

    fn execute(&mut self, catalog: &mut dyn Catalog) -> Result<Resolution> {
        let gallery_url = normalize_http_url(&self.gallery.url)?;
        if self.parser.fetch_mode() == FetchMode::Rendered && self.resolver.renderer.is_none() {
            return Err(EngineError::Configuration(format!(
                "{} chapters need a page renderer, none is configured",
                self.parser.name()
            )));
        }

        let single_chapter = self.parser.is_chapter_url(&gallery_url);
        let (discovered, key_offset) = if single_chapter {
            let link = ChapterLink {
                url: gallery_url.clone(),
                title: self.gallery.title.clone(),
            };
            let discovered = vec![link];
            let offset = self.parser.chapter_key_offset(&discovered);
            (discovered, offset)
        } else {
            self.transition(RunState::FetchingGallery);
            self.ensure_not_cancelled()?;
            let discovered = self.discover_chapters(&gallery_url)?;
            self.ensure_not_cancelled()?;
            let offset = self.parser.chapter_key_offset(&discovered);
            (discovered, offset)
        };

        self.transition(RunState::DiffingChapters);
        let stored_chapters = catalog.stored_chapters(self.gallery.id)?;
        let stored_images = catalog.stored_images(self.gallery.id)?;
        let plan = ChapterPlan::new(
            self.gallery.id,
            &stored_chapters,
            &stored_images,
            &discovered,
            key_offset,
        );
        tracing::info!(
            discovered = discovered.len(),
            stored = stored_chapters.len(),
            extra = plan.chapters.len(),
            key_offset,
            "gallery_chapters_diffed"
        );

        if plan.chapters.is_empty() {
            if stored_chapters.is_empty() {
                return Err(EngineError::EmptyResult("no structure detected".to_string()));
            }
            return Ok(Resolution::unchanged(self.gallery));
        }

        let total_units = u32::try_from(plan.chapters.len()).unwrap_or(u32::MAX);
        self.resolver.progress.start(self.gallery.id, total_units);
        if self.parser.fetch_mode() == FetchMode::Rendered {
            if let Some(factory) = self.resolver.renderer.clone() {
                self.session = Some(RenderSession::spawn(
                    factory,
                    self.headers.clone(),
                    self.resolver.config.render_poll_interval(),
                )?);
            }
        }

        let mut cursor = OrderCursor::starting_at(plan.first_image_order);
        let mut chapters = Vec::new();
        let mut images = Vec::new();
        for (index, chapter) in plan.chapters.iter().enumerate() {
            self.ensure_not_cancelled()?;
            if index > 0 && self.resolver.config.chapter_delay_ms > 0 {
                thread::sleep(self.resolver.config.chapter_delay());
            }
            self.transition(RunState::FetchingChapter(index));

            let unit = u32::try_from(index).unwrap_or(u32::MAX);
            let fetched = self.chapter_image_urls(&chapter.url, unit);
            // In-flight results are dropped once cancellation is seen.
            self.ensure_not_cancelled()?;
            match fetched {
                Ok(urls) if urls.is_empty() => {
                    tracing::warn!(
                        chapter_url = %redact_url_for_log(&chapter.url),
                        order = chapter.order,
                        "gallery_chapter_empty"
                    );
                }
                Ok(urls) => {
                    tracing::debug!(order = chapter.order, images = urls.len(), "gallery_chapter_resolved");
                    images.extend(cursor.number_images(urls, Some(&chapter.url)));
                    chapters.push(chapter.clone());
                }
                Err(err) => {
                    tracing::warn!(
                        chapter_url = %redact_url_for_log(&chapter.url),
                        order = chapter.order,
                        error = %err,
                        "gallery_chapter_fetch_failed"
                    );
                }
            }

            self.resolver
                .progress
                .set_units(self.gallery.id, (index + 1) as f32);
            self.sink.report(self.resolver.progress.global());
        }

        if images.is_empty() {
            return Err(EngineError::EmptyResult(
                "no chapter yielded any image".to_string(),
            ));
        }

        let mut gallery = self.gallery.clone();
        if gallery.cover_url.is_none() {
            gallery.cover_url = images.first().map(|image| image.url.clone());
        }
        if plan.needs_cover {
            if let Some(cover_url) = gallery.cover_url.clone() {
                images.insert(0, ImageRecord::cover(cover_url));
            }
        }

        let params = self.download_params(&gallery_url);
        for image in &mut images {
            image.download_params = Some(params.clone());
        }

        let stored_pages = stored_images.iter().filter(|i| !i.is_cover).count();
        let new_pages = images.iter().filter(|i| !i.is_cover).count();
        gallery.page_count = u32::try_from(stored_pages + new_pages).unwrap_or(u32::MAX);

        catalog.append_resolved(gallery.id, &chapters, &images)?;
        catalog.update_gallery(&gallery)?;

        Ok(Resolution {
            gallery,
            chapters,
            images,
        })
    }

    fn discover_chapters(&self, gallery_url: &str) -> Result<Vec<ChapterLink>> {
        let fetcher = &self.resolver.fetcher;
        let index = fetcher
            .get(gallery_url, &self.headers)
            .map_err(|err| index_unreachable(gallery_url, err))?;

        let listing = match self.parser.chapter_listing(&index) {
            ChapterListing::Inline => index,
            ChapterListing::Post(listing_url) => {
                self.ensure_not_cancelled()?;
                fetcher
                    .post(&listing_url, &self.headers, "")
                    .map_err(|err| index_unreachable(&listing_url, err))?
            }
        };
        self.ensure_not_cancelled()?;
        Ok(self.parser.extract_chapter_links(&listing))
    }

    fn chapter_image_urls(&mut self, chapter_url: &str, unit: u32) -> Result<Vec<String>> {
        match self.parser.fetch_mode() {
            FetchMode::Static => {
                let doc = self.resolver.fetcher.get(chapter_url, &self.headers)?;
                Ok(self.parser.extract_image_urls(&doc))
            }
            FetchMode::Rendered => self.rendered_chapter_image_urls(chapter_url, unit),
        }
    }

    /// Loads the chapter's first page, then one page per missing image until
    /// the page count is reached.
    fn rendered_chapter_image_urls(&mut self, chapter_url: &str, unit: u32) -> Result<Vec<String>> {
        let timeout = self.resolver.config.render_timeout();
        let gallery_id = self.gallery.id;
        let Some(session) = self.session.as_mut() else {
            return Err(EngineError::Render("no render session".to_string()));
        };

        let first = session
            .load_blocking(chapter_url, self.cancel, timeout)
            .ok_or_else(|| EngineError::unreachable(chapter_url, "chapter page did not render"))?;
        let page_urls = self.parser.extract_page_urls(&first);
        let mut urls = Vec::new();
        let mut seen = HashSet::new();
        push_new(&mut urls, &mut seen, self.parser.extract_image_urls(&first));

        while urls.len() < page_urls.len() {
            if self.cancel.is_cancelled() {
                break;
            }
            self.resolver
                .progress
                .set_partial(gallery_id, unit, urls.len(), page_urls.len());
            self.sink.report(self.resolver.progress.global());

            let next_page = &page_urls[urls.len()];
            let Some(doc) = session.load_blocking(next_page, self.cancel, timeout) else {
                tracing::warn!(page_url = %redact_url_for_log(next_page), "gallery_page_render_failed");
                break;
            };
            if push_new(&mut urls, &mut seen, self.parser.extract_image_urls(&doc)) == 0 {
                break;
            }
        }
        Ok(urls)
    }

    fn download_params(&self, gallery_url: &str) -> DownloadParams {
        let mut headers: BTreeMap<String, String> = self.headers.iter().cloned().collect();
        if let Some(referer) = referer_for(gallery_url) {
            headers.insert("Referer".to_string(), referer);
        }
        DownloadParams { headers }
    }
}

fn push_new(urls: &mut Vec<String>, seen: &mut HashSet<String>, found: Vec<String>) -> usize {
    let before = urls.len();
    urls.extend(found.into_iter().filter(|url| seen.insert(url.clone())));
    urls.len() - before
}

fn index_unreachable(url: &str, err: EngineError) -> EngineError {
    let reason = match err {
        EngineError::Unreachable { reason, .. } => reason,
        other => other.to_string(),
    };
    tracing::warn!(url = %redact_url_for_log(url), reason = %reason, "gallery_index_unreachable");
    EngineError::unreachable(url, format!("index unreachable: {reason}"))
}

/// Site root for known sources, the gallery's origin otherwise.
fn referer_for(gallery_url: &str) -> Option<String> {
    if let Some(site) = Site::for_url(gallery_url) {
        return Some(site.root_url().to_string());
    }
    let parsed = Url::parse(gallery_url).ok()?;
    Some(format!("{}/", parsed.origin().ascii_serialization()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;
    use crate::credentials::{NoHeaders, StaticHeaders};
    use crate::net::Document;
    use crate::parsers::{MangagoParser, ToonilyParser};
    use crate::progress::NullProgress;
    use crate::render::{PageRenderer, RenderedPage};
    use crate::ErrorKind;
    use std::collections::HashMap;
    use std::sync::Mutex;

    const TOONILY_GALLERY: &str = "https://toonily.com/webtoon/tale/";
    const TOONILY_LISTING: &str = "https://toonily.com/webtoon/tale/ajax/chapters/";

    #[derive(Default)]
    struct FakeFetcher {
        pages: HashMap<String, String>,
        posts: HashMap<String, String>,
        cancel_after_get: Option<(String, CancellationToken)>,
        cancel_after_post: Option<(String, CancellationToken)>,
    }

    impl FakeFetcher {
        fn page(mut self, url: &str, html: &str) -> Self {
            self.pages.insert(url.to_string(), html.to_string());
            self
        }

        fn post_page(mut self, url: &str, html: &str) -> Self {
            self.posts.insert(url.to_string(), html.to_string());
            self
        }
    }

    impl PageFetcher for FakeFetcher {
        fn get(&self, url: &str, _headers: &[(String, String)]) -> Result<Document> {
            let html = self
                .pages
                .get(url)
                .ok_or_else(|| EngineError::unreachable(url, "http status 404"))?;
            if let Some((trigger, token)) = &self.cancel_after_get {
                if trigger == url {
                    token.cancel();
                }
            }
            Ok(Document::new(url, html.clone()))
        }

        fn post(&self, url: &str, _headers: &[(String, String)], _body: &str) -> Result<Document> {
            let html = self
                .posts
                .get(url)
                .ok_or_else(|| EngineError::unreachable(url, "http status 404"))?;
            if let Some((trigger, token)) = &self.cancel_after_post {
                if trigger == url {
                    token.cancel();
                }
            }
            Ok(Document::new(url, html.clone()))
        }
    }

    fn toonily_listing(chapters: &[&str]) -> String {
        let items: String = chapters
            .iter()
            .map(|slug| {
                format!(
                    r#"<li class="wp-manga-chapter"><a href="{TOONILY_GALLERY}{slug}/">{slug}</a></li>"#
                )
            })
            .collect();
        format!("<ul>{items}</ul>")
    }

    fn toonily_chapter(slug: &str, pages: usize) -> String {
        let imgs: String = (1..=pages)
            .map(|p| format!(r#"<img data-src="https://cdn.toonily.com/tale/{slug}/{p}.jpg" />"#))
            .collect();
        format!(r#"<div class="reading-content">{imgs}</div>"#)
    }

    fn toonily_fetcher(chapters: &[&str]) -> FakeFetcher {
        let mut fetcher = FakeFetcher::default()
            .page(
                TOONILY_GALLERY,
                &format!(r#"<html><head><link rel="canonical" href="{TOONILY_GALLERY}"></head></html>"#),
            )
            .post_page(TOONILY_LISTING, &toonily_listing(chapters));
        for slug in chapters {
            fetcher = fetcher.page(&format!("{TOONILY_GALLERY}{slug}/"), &toonily_chapter(slug, 3));
        }
        fetcher
    }

    fn fast_config() -> ResolverConfig {
        ResolverConfig {
            render_timeout_secs: 5,
            render_poll_interval_ms: 10,
            ..ResolverConfig::default()
        }
    }

    fn resolve(
        resolver: &Resolver,
        gallery: &Gallery,
        parser: &dyn SourceParser,
        catalog: &mut MemoryCatalog,
        cancel: &CancellationToken,
    ) -> Result<Resolution> {
        resolver.resolve(gallery, parser, catalog, &NoHeaders, cancel, &NullProgress)
    }

    #[test]
    fn new_chapters_continue_after_stored_orders() {
        let mut catalog = MemoryCatalog::new();
        let stored_chapters = vec![
            Chapter::new(1, format!("{TOONILY_GALLERY}chapter-1/"), 1),
            Chapter::new(1, format!("{TOONILY_GALLERY}chapter-2/"), 2),
        ];
        let stored_images: Vec<ImageRecord> = (1..=5)
            .map(|order| ImageRecord::page(format!("https://cdn.toonily.com/old/{order}.jpg"), order, None))
            .collect();
        catalog
            .append_resolved(1, &stored_chapters, &stored_images)
            .expect("seed");

        let fetcher = toonily_fetcher(&["chapter-1", "chapter-2", "chapter-3", "chapter-4"]);
        let resolver = Resolver::new(fast_config(), Box::new(fetcher));
        let gallery = Gallery::new(1, TOONILY_GALLERY);
        let resolution = resolve(
            &resolver,
            &gallery,
            &ToonilyParser,
            &mut catalog,
            &CancellationToken::new(),
        )
        .expect("resolve");

        let chapter_orders: Vec<u32> = resolution.chapters.iter().map(|c| c.order).collect();
        assert_eq!(chapter_orders, vec![3, 4]);
        let image_orders: Vec<u32> = resolution.images.iter().map(|i| i.order).collect();
        assert_eq!(image_orders, vec![6, 7, 8, 9, 10, 11]);
        assert!(resolution.images.iter().all(|i| !i.is_cover));
        assert_eq!(
            resolution.images[0].url,
            "https://cdn.toonily.com/tale/chapter-3/1.jpg"
        );
        assert_eq!(
            resolution.images[5].chapter_url.as_deref(),
            Some("https://toonily.com/webtoon/tale/chapter-4/")
        );
        assert_eq!(resolution.gallery.page_count, 11);
        assert_eq!(catalog.stored_images(1).expect("images").len(), 11);
    }

    #[test]
    fn second_run_without_new_chapters_appends_nothing() {
        let mut catalog = MemoryCatalog::new();
        let resolver = Resolver::new(
            fast_config(),
            Box::new(toonily_fetcher(&["chapter-1", "chapter-2"])),
        );
        let gallery = Gallery::new(7, TOONILY_GALLERY);
        let cancel = CancellationToken::new();

        let first = resolve(&resolver, &gallery, &ToonilyParser, &mut catalog, &cancel)
            .expect("first run");
        assert_eq!(first.images.len(), 7);
        assert!(first.images[0].is_cover);
        assert_eq!(first.images[0].order, 0);
        assert_eq!(first.images[1].order, 1);

        let second = resolve(&resolver, &first.gallery, &ToonilyParser, &mut catalog, &cancel)
            .expect("second run");
        assert!(second.images.is_empty());
        assert!(second.chapters.is_empty());
        assert_eq!(catalog.append_calls(), 1);
        assert_eq!(catalog.stored_images(7).expect("images").len(), 7);
    }

    #[test]
    fn cancellation_before_second_chapter_discards_everything() {
        let cancel = CancellationToken::new();
        let mut fetcher = toonily_fetcher(&["chapter-1", "chapter-2", "chapter-3"]);
        fetcher.cancel_after_get = Some((format!("{TOONILY_GALLERY}chapter-1/"), cancel.clone()));
        let resolver = Resolver::new(fast_config(), Box::new(fetcher));
        let mut catalog = MemoryCatalog::new();

        let err = resolve(
            &resolver,
            &Gallery::new(3, TOONILY_GALLERY),
            &ToonilyParser,
            &mut catalog,
            &cancel,
        )
        .expect_err("interrupted");
        assert_eq!(err.kind(), ErrorKind::Interrupted);
        assert_eq!(catalog.append_calls(), 0);
        assert!(catalog.stored_images(3).expect("images").is_empty());
        assert!(catalog.gallery(3).is_none());
    }

    #[test]
    fn cancel_during_gallery_fetch_is_an_interruption() {
        let cancel = CancellationToken::new();
        let mut fetcher = FakeFetcher::default()
            .page(TOONILY_GALLERY, "<html></html>")
            .post_page(TOONILY_LISTING, "<ul></ul>");
        fetcher.cancel_after_get = Some((TOONILY_GALLERY.to_string(), cancel.clone()));
        let resolver = Resolver::new(fast_config(), Box::new(fetcher));
        let mut catalog = MemoryCatalog::new();

        let err = resolve(
            &resolver,
            &Gallery::new(4, TOONILY_GALLERY),
            &ToonilyParser,
            &mut catalog,
            &cancel,
        )
        .expect_err("interrupted");
        assert_eq!(err.kind(), ErrorKind::Interrupted);
        assert_eq!(catalog.append_calls(), 0);
    }

    #[test]
    fn cancel_during_listing_fetch_is_not_reported_as_unchanged() {
        let mut catalog = MemoryCatalog::new();
        let stored = vec![
            Chapter::new(5, format!("{TOONILY_GALLERY}chapter-1/"), 1),
            Chapter::new(5, format!("{TOONILY_GALLERY}chapter-2/"), 2),
        ];
        let images = vec![
            ImageRecord::page("https://cdn.toonily.com/old/1.jpg", 1, None),
            ImageRecord::page("https://cdn.toonily.com/old/2.jpg", 2, None),
        ];
        catalog.append_resolved(5, &stored, &images).expect("seed");
        let seeded_calls = catalog.append_calls();

        let cancel = CancellationToken::new();
        let mut fetcher = toonily_fetcher(&["chapter-1", "chapter-2"]);
        fetcher.cancel_after_post = Some((TOONILY_LISTING.to_string(), cancel.clone()));
        let resolver = Resolver::new(fast_config(), Box::new(fetcher));

        let err = resolve(
            &resolver,
            &Gallery::new(5, TOONILY_GALLERY),
            &ToonilyParser,
            &mut catalog,
            &cancel,
        )
        .expect_err("interrupted");
        assert_eq!(err.kind(), ErrorKind::Interrupted);
        assert_eq!(catalog.append_calls(), seeded_calls);
        assert_eq!(catalog.stored_chapters(5).expect("chapters").len(), 2);
    }

    #[test]
    fn gallery_without_chapters_is_an_empty_result() {
        let fetcher = FakeFetcher::default()
            .page(TOONILY_GALLERY, "<html></html>")
            .post_page(TOONILY_LISTING, "<ul></ul>");
        let resolver = Resolver::new(fast_config(), Box::new(fetcher));
        let mut catalog = MemoryCatalog::new();

        let err = resolve(
            &resolver,
            &Gallery::new(1, TOONILY_GALLERY),
            &ToonilyParser,
            &mut catalog,
            &CancellationToken::new(),
        )
        .expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::EmptyResult);
        assert!(err.to_string().contains("no structure detected"));
    }

    #[test]
    fn unreachable_index_and_bad_urls_are_told_apart() {
        let resolver = Resolver::new(fast_config(), Box::new(FakeFetcher::default()));
        let mut catalog = MemoryCatalog::new();
        let cancel = CancellationToken::new();

        let err = resolve(
            &resolver,
            &Gallery::new(1, TOONILY_GALLERY),
            &ToonilyParser,
            &mut catalog,
            &cancel,
        )
        .expect_err("unreachable");
        assert_eq!(err.kind(), ErrorKind::Unreachable);
        assert!(err.to_string().contains("index unreachable"));

        let err = resolve(
            &resolver,
            &Gallery::new(1, "ftp://toonily.com/webtoon/tale/"),
            &ToonilyParser,
            &mut catalog,
            &cancel,
        )
        .expect_err("configuration");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn failing_chapter_is_skipped_without_breaking_numbering() {
        let mut fetcher = toonily_fetcher(&["chapter-1", "chapter-2", "chapter-3"]);
        fetcher.pages.remove(&format!("{TOONILY_GALLERY}chapter-2/"));
        let resolver = Resolver::new(fast_config(), Box::new(fetcher));
        let mut catalog = MemoryCatalog::new();

        let resolution = resolve(
            &resolver,
            &Gallery::new(2, TOONILY_GALLERY),
            &ToonilyParser,
            &mut catalog,
            &CancellationToken::new(),
        )
        .expect("resolve");
        let chapter_urls: Vec<&str> = resolution.chapters.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            chapter_urls,
            vec![
                "https://toonily.com/webtoon/tale/chapter-1/",
                "https://toonily.com/webtoon/tale/chapter-3/",
            ]
        );
        let page_orders: Vec<u32> = resolution
            .images
            .iter()
            .filter(|i| !i.is_cover)
            .map(|i| i.order)
            .collect();
        assert_eq!(page_orders, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn records_carry_supplier_headers_and_site_referer() {
        let resolver = Resolver::new(fast_config(), Box::new(toonily_fetcher(&["chapter-1"])));
        let mut catalog = MemoryCatalog::new();
        let credentials = StaticHeaders::from_cookie(Some("sid=abc"));

        let resolution = resolver
            .resolve(
                &Gallery::new(5, TOONILY_GALLERY),
                &ToonilyParser,
                &mut catalog,
                &credentials,
                &CancellationToken::new(),
                &NullProgress,
            )
            .expect("resolve");
        for image in &resolution.images {
            let params = image.download_params.as_ref().expect("params");
            assert_eq!(params.headers.get("Referer").map(String::as_str), Some("https://toonily.com/"));
            assert_eq!(params.headers.get("Cookie").map(String::as_str), Some("sid=abc"));
        }
    }

    #[test]
    fn single_chapter_url_resolves_only_that_chapter() {
        let chapter_url = format!("{TOONILY_GALLERY}chapter-9/");
        let fetcher = FakeFetcher::default().page(&chapter_url, &toonily_chapter("chapter-9", 4));
        let resolver = Resolver::new(fast_config(), Box::new(fetcher));
        let mut catalog = MemoryCatalog::new();

        let resolution = resolve(
            &resolver,
            &Gallery::new(8, chapter_url.clone()),
            &ToonilyParser,
            &mut catalog,
            &CancellationToken::new(),
        )
        .expect("resolve");
        assert_eq!(resolution.chapters.len(), 1);
        assert_eq!(resolution.chapters[0].order, 1);
        assert!(resolution.images[0].is_cover);
        assert_eq!(resolution.images[0].url, resolution.images[1].url);
        let page_orders: Vec<u32> = resolution.images[1..].iter().map(|i| i.order).collect();
        assert_eq!(page_orders, vec![1, 2, 3, 4]);
        assert_eq!(resolution.gallery.page_count, 4);
    }

    #[test]
    fn single_chapter_without_images_is_an_empty_result() {
        let chapter_url = format!("{TOONILY_GALLERY}chapter-9/");
        let fetcher = FakeFetcher::default().page(&chapter_url, "<html></html>");
        let resolver = Resolver::new(fast_config(), Box::new(fetcher));
        let mut catalog = MemoryCatalog::new();

        let err = resolve(
            &resolver,
            &Gallery::new(8, chapter_url),
            &ToonilyParser,
            &mut catalog,
            &CancellationToken::new(),
        )
        .expect_err("empty");
        assert_eq!(err.kind(), ErrorKind::EmptyResult);
    }

    const MANGAGO_GALLERY: &str = "https://www.mangago.me/read-manga/tale/";

    struct FakeRenderer {
        pages: HashMap<String, String>,
    }

    impl PageRenderer for FakeRenderer {
        fn render(&mut self, url: &str) -> Result<RenderedPage> {
            let html = self
                .pages
                .get(url)
                .cloned()
                .ok_or_else(|| EngineError::Render(format!("no page for {url}")))?;
            Ok(RenderedPage {
                finished_url: url.to_string(),
                html,
            })
        }
    }

    fn mangago_page(chapter: &str, page: usize, pages: usize) -> String {
        let nav: String = (1..=pages)
            .map(|p| format!(r#"<a href="{MANGAGO_GALLERY}mf/v01/{chapter}/pg-{p}/">{p}</a>"#))
            .collect();
        format!(
            r#"<ul id="dropdown-menu-page">{nav}</ul>
               <div id="pic_container"><img src="https://i.mangago.example/{chapter}/{page}.jpg"></div>"#
        )
    }

    fn mangago_renderer(chapters: &[&str], pages: usize) -> RendererFactory {
        let mut rendered = HashMap::new();
        for chapter in chapters {
            for page in 1..=pages {
                rendered.insert(
                    format!("{MANGAGO_GALLERY}mf/v01/{chapter}/pg-{page}/"),
                    mangago_page(chapter, page, pages),
                );
            }
        }
        Arc::new(move |_headers: &[(String, String)]| -> Result<Box<dyn PageRenderer>> {
            Ok(Box::new(FakeRenderer {
                pages: rendered.clone(),
            }) as Box<dyn PageRenderer>)
        })
    }

    fn mangago_index(chapters: &[&str]) -> String {
        let rows: String = chapters
            .iter()
            .map(|c| {
                format!(r#"<tr><td><a href="{MANGAGO_GALLERY}mf/v01/{c}/pg-1/">{c}</a></td></tr>"#)
            })
            .collect();
        format!(r#"<table id="chapter_table">{rows}</table>"#)
    }

    #[test]
    fn rendered_chapters_walk_every_page_and_report_smooth_progress() {
        let fetcher = FakeFetcher::default().page(MANGAGO_GALLERY, &mangago_index(&["c001", "c002"]));
        let resolver = Resolver::new(fast_config(), Box::new(fetcher))
            .with_renderer(mangago_renderer(&["c001", "c002"], 3));
        let mut catalog = MemoryCatalog::new();
        let reports = Mutex::new(Vec::new());
        let sink = |fraction: f32| {
            if let Ok(mut reports) = reports.lock() {
                reports.push(fraction);
            }
        };

        let resolution = resolver
            .resolve(
                &Gallery::new(11, MANGAGO_GALLERY),
                &MangagoParser,
                &mut catalog,
                &NoHeaders,
                &CancellationToken::new(),
                &sink,
            )
            .expect("resolve");

        let pages: Vec<&str> = resolution
            .images
            .iter()
            .filter(|i| !i.is_cover)
            .map(|i| i.url.as_str())
            .collect();
        assert_eq!(
            pages,
            vec![
                "https://i.mangago.example/c001/1.jpg",
                "https://i.mangago.example/c001/2.jpg",
                "https://i.mangago.example/c001/3.jpg",
                "https://i.mangago.example/c002/1.jpg",
                "https://i.mangago.example/c002/2.jpg",
                "https://i.mangago.example/c002/3.jpg",
            ]
        );
        assert_eq!(
            resolution.gallery.cover_url.as_deref(),
            Some("https://i.mangago.example/c001/1.jpg")
        );
        let referer = resolution.images[0]
            .download_params
            .as_ref()
            .and_then(|p| p.headers.get("Referer"));
        assert_eq!(referer.map(String::as_str), Some("https://www.mangago.me/"));

        let reports = reports.into_inner().expect("reports");
        assert!(reports.len() > 2, "reports={reports:?}");
        assert!(reports.windows(2).all(|w| w[0] <= w[1]), "reports={reports:?}");
        assert!(reports.iter().any(|f| *f > 0.0 && *f < 0.5));
        assert_eq!(reports.last().copied(), Some(1.0));
        assert_eq!(resolver.progress().item_fraction(11), None);
    }

    #[test]
    fn rendered_source_without_renderer_is_a_configuration_error() {
        let fetcher = FakeFetcher::default().page(MANGAGO_GALLERY, &mangago_index(&["c001"]));
        let resolver = Resolver::new(fast_config(), Box::new(fetcher));
        let mut catalog = MemoryCatalog::new();

        let err = resolve(
            &resolver,
            &Gallery::new(12, MANGAGO_GALLERY),
            &MangagoParser,
            &mut catalog,
            &CancellationToken::new(),
        )
        .expect_err("no renderer");
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn mirrored_chapter_is_not_fetched_again() {
        let mut catalog = MemoryCatalog::new();
        catalog
            .append_resolved(
                13,
                &[Chapter::new(
                    13,
                    "https://www.mangago.zone/read-manga/tale/mf/v01/c001/pg-1/",
                    1,
                )],
                &[ImageRecord::page("https://i.mangago.example/c001/1.jpg", 1, None)],
            )
            .expect("seed");

        let fetcher = FakeFetcher::default().page(MANGAGO_GALLERY, &mangago_index(&["c001", "c002"]));
        let resolver = Resolver::new(fast_config(), Box::new(fetcher))
            .with_renderer(mangago_renderer(&["c001", "c002"], 1));

        let resolution = resolve(
            &resolver,
            &Gallery::new(13, MANGAGO_GALLERY),
            &MangagoParser,
            &mut catalog,
            &CancellationToken::new(),
        )
        .expect("resolve");
        assert_eq!(resolution.chapters.len(), 1);
        assert!(resolution.chapters[0].url.contains("/c002/"));
        assert_eq!(resolution.chapters[0].order, 2);
        assert_eq!(resolution.images.len(), 1);
        assert_eq!(resolution.images[0].order, 2);
    }

    #[test]
    fn single_mangago_chapter_is_keyed_like_its_gallery() {
        let mut catalog = MemoryCatalog::new();
        let stored: Vec<Chapter> = ["c001", "c002"]
            .iter()
            .zip(1u32..)
            .map(|(c, order)| Chapter::new(14, format!("{MANGAGO_GALLERY}mf/v01/{c}/pg-1/"), order))
            .collect();
        let images = vec![
            ImageRecord::page("https://i.mangago.example/c001/1.jpg", 1, None),
            ImageRecord::page("https://i.mangago.example/c002/1.jpg", 2, None),
        ];
        catalog.append_resolved(14, &stored, &images).expect("seed");

        let resolver = Resolver::new(fast_config(), Box::new(FakeFetcher::default()))
            .with_renderer(mangago_renderer(&["c003"], 1));
        let resolution = resolve(
            &resolver,
            &Gallery::new(14, format!("{MANGAGO_GALLERY}mf/v01/c003/pg-1/")),
            &MangagoParser,
            &mut catalog,
            &CancellationToken::new(),
        )
        .expect("resolve");
        assert_eq!(resolution.chapters.len(), 1);
        assert_eq!(resolution.chapters[0].order, 3);
        let orders: Vec<u32> = resolution.images.iter().map(|i| i.order).collect();
        assert_eq!(orders, vec![3]);
        assert_eq!(resolution.images[0].url, "https://i.mangago.example/c003/1.jpg");
        assert_eq!(catalog.stored_chapters(14).expect("chapters").len(), 3);
    }
}

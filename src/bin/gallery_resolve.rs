use std::path::PathBuf;

use gallery_engine::cancel::CancellationToken;
use gallery_engine::config::load_resolver_config;
use gallery_engine::credentials::StaticHeaders;
use gallery_engine::db::SqliteCatalog;
use gallery_engine::net::{normalize_http_url, HttpFetcher};
use gallery_engine::parsers::Site;
use gallery_engine::paths::AppPaths;
use gallery_engine::progress::ProgressSink;
use gallery_engine::resolver::Resolver;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), String> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return Ok(());
    }

    let mut base_dir: Option<PathBuf> = None;
    let mut gallery_id: Option<i64> = None;
    let mut url: Option<String> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--base-dir" => {
                i += 1;
                let v = args
                    .get(i)
                    .ok_or_else(|| "--base-dir requires a value".to_string())?;
                base_dir = Some(PathBuf::from(v));
            }
            "--gallery-id" => {
                i += 1;
                let v = args
                    .get(i)
                    .ok_or_else(|| "--gallery-id requires a value".to_string())?;
                let id = v
                    .parse::<i64>()
                    .map_err(|_| format!("--gallery-id expects an integer, got {v}"))?;
                gallery_id = Some(id);
            }
            other if other.starts_with("--") => {
                return Err(format!("unknown arg: {other} (try --help)"));
            }
            other => {
                if url.is_some() {
                    return Err("only one URL may be resolved per call".to_string());
                }
                url = Some(other.to_string());
            }
        }
        i += 1;
    }

    init_logging();

    let url = url.ok_or_else(|| "missing gallery URL (try --help)".to_string())?;
    let url = normalize_http_url(&url).map_err(|e| e.to_string())?;

    let base_dir = base_dir
        .or_else(default_base_dir)
        .ok_or_else(|| "could not determine base dir; pass --base-dir".to_string())?;
    let paths = AppPaths::new(base_dir);
    paths.ensure_dirs().map_err(|e| e.to_string())?;
    let config = load_resolver_config(&paths).map_err(|e| e.to_string())?;

    let mut catalog = SqliteCatalog::open(&paths).map_err(|e| e.to_string())?;
    let gallery = match gallery_id {
        Some(id) => catalog
            .gallery(id)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("gallery {id} is not in the catalog"))?,
        None => catalog.gallery_for_url(&url).map_err(|e| e.to_string())?,
    };
    let site = Site::for_url(&gallery.url)
        .ok_or_else(|| format!("no parser registered for {}", gallery.url))?;

    let cookie_file = paths.cookie_file_path();
    let credentials = if cookie_file.is_file() {
        StaticHeaders::from_cookie(Some(cookie_file.to_string_lossy().as_ref()))
    } else {
        StaticHeaders::default()
    };

    let fetcher = HttpFetcher::new(&config);
    #[allow(unused_mut)]
    let mut resolver = Resolver::new(config.clone(), Box::new(fetcher));
    #[cfg(feature = "chrome")]
    {
        resolver = resolver.with_renderer(gallery_engine::render::chrome_renderer_factory(
            config.user_agent.clone(),
            config.render_timeout(),
        ));
    }

    let parser = site.parser();
    let cancel = CancellationToken::new();
    ctrlc::set_handler(interrupt_handler(cancel.clone()))
        .map_err(|e| format!("failed to set signal handler: {e}"))?;
    let sink = ConsoleProgress;
    let resolution = resolver
        .resolve(
            &gallery,
            parser.as_ref(),
            &mut catalog,
            &credentials,
            &cancel,
            &sink,
        )
        .map_err(|e| e.to_string())?;

    let pages = resolution.images.iter().filter(|i| !i.is_cover).count();
    println!(
        "{} gallery {}: {} new chapter(s), {} new page(s), {} page(s) total",
        site.name(),
        resolution.gallery.id,
        resolution.chapters.len(),
        pages,
        resolution.gallery.page_count
    );
    Ok(())
}

/// Ctrl-C cancels the run; a second Ctrl-C while it winds down is ignored.
fn interrupt_handler(cancel: CancellationToken) -> impl FnMut() + Send + 'static {
    move || {
        if !cancel.is_cancelled() {
            tracing::info!("resolve_cancel_requested");
            cancel.cancel();
        }
    }
}

struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn report(&self, fraction: f32) {
        tracing::info!(percent = (fraction * 100.0).round() as u32, "resolve_progress");
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn default_base_dir() -> Option<PathBuf> {
    if let Ok(v) = std::env::var("GALLERY_ENGINE_BASE_DIR") {
        let t = v.trim();
        if !t.is_empty() {
            return Some(PathBuf::from(t));
        }
    }
    None
}

fn print_help() {
    println!(
        r#"gallery_resolve

Resolves a gallery (or a single chapter) URL and appends the new chapters and
pages to the local catalog.

Usage:
  cargo run --bin gallery_resolve -- --base-dir ./data https://toonily.com/webtoon/title/
  cargo run --features chrome --bin gallery_resolve -- https://www.mangago.me/read-manga/title/

Options:
  --base-dir <path>     Override base dir (default: $GALLERY_ENGINE_BASE_DIR)
  --gallery-id <n>      Resolve an existing catalog gallery (its stored URL wins)

Files under <base-dir>:
  config/resolver.json  Resolver settings (timeouts, user agent, chapter delay)
  config/cookies.json   Optional cookie export sent with every request
  db/catalog.sqlite     Resolved galleries, chapters and pages

Ctrl-C cancels a run in progress; nothing from that run is stored.

Logging follows RUST_LOG (default: info).
"#
    );
}

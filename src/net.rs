use crate::config::ResolverConfig;
use crate::{EngineError, Result};
use scraper::Html;
use std::io::Read;
use url::Url;

/// Raw markup of one fetched or rendered page, tagged with the URL it came from.
///
/// Kept as a string so it can cross threads; call [`Document::parse`] where
/// the DOM is needed.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub url: String,
    pub html: String,
}

impl Document {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: html.into(),
        }
    }

    pub fn parse(&self) -> Html {
        Html::parse_document(&self.html)
    }

    pub fn base_url(&self) -> Option<Url> {
        Url::parse(&self.url).ok()
    }
}

/// Stateless single-page fetch.
pub trait PageFetcher: Send + Sync {
    fn get(&self, url: &str, headers: &[(String, String)]) -> Result<Document>;

    fn post(&self, url: &str, headers: &[(String, String)], body: &str) -> Result<Document>;
}

pub struct HttpFetcher {
    agent: ureq::Agent,
    max_html_bytes: u64,
}

impl HttpFetcher {
    pub fn new(config: &ResolverConfig) -> Self {
        let mut builder = ureq::Agent::config_builder();
        builder = builder
            .http_status_as_error(false)
            .timeout_global(Some(config.request_timeout()))
            .user_agent(config.user_agent.clone());
        let agent: ureq::Agent = builder.build().into();
        Self {
            agent,
            max_html_bytes: config.max_html_bytes,
        }
    }

    fn read_document(
        &self,
        url: &str,
        outcome: std::result::Result<ureq::http::Response<ureq::Body>, ureq::Error>,
    ) -> Result<Document> {
        let mut response = outcome.map_err(|err| EngineError::unreachable(url, err.to_string()))?;
        let status = response.status().as_u16();
        if status >= 400 {
            return Err(EngineError::unreachable(url, format!("http status {status}")));
        }

        let content_type = header_string(&response, "content-type");
        if !is_html_content_type(&content_type) {
            return Err(EngineError::unreachable(
                url,
                format!("unexpected content type {content_type}"),
            ));
        }

        let mut html_buf = Vec::new();
        response
            .body_mut()
            .as_reader()
            .take(self.max_html_bytes)
            .read_to_end(&mut html_buf)
            .map_err(|err| EngineError::unreachable(url, err.to_string()))?;

        Ok(Document::new(url, String::from_utf8_lossy(&html_buf).into_owned()))
    }
}

impl PageFetcher for HttpFetcher {
    fn get(&self, url: &str, headers: &[(String, String)]) -> Result<Document> {
        let mut request = self.agent.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let outcome = request.call();
        self.read_document(url, outcome)
    }

    fn post(&self, url: &str, headers: &[(String, String)], body: &str) -> Result<Document> {
        let mut request = self
            .agent
            .post(url)
            .header("Content-Type", "application/x-www-form-urlencoded; charset=UTF-8")
            .header("X-Requested-With", "XMLHttpRequest");
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let outcome = request.send(body.as_bytes());
        self.read_document(url, outcome)
    }
}

pub fn normalize_http_url(value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Configuration("empty URL provided".to_string()));
    }
    let parsed = Url::parse(trimmed)
        .map_err(|_| EngineError::Configuration(format!("invalid URL format: {trimmed}")))?;
    match parsed.scheme() {
        "http" | "https" => {}
        _ => {
            return Err(EngineError::Configuration(format!(
                "unsupported URL scheme for {}; only http/https are allowed",
                redact_url_for_log(trimmed)
            )));
        }
    }
    if parsed.host_str().is_none() {
        return Err(EngineError::Configuration(format!(
            "URL is missing host: {}",
            redact_url_for_log(trimmed)
        )));
    }
    Ok(trimmed.to_string())
}

/// Resolves `raw_url` against `base_url`, dropping non-http targets and fragments.
pub fn normalize_url_with_base(raw_url: &str, base_url: &Url) -> Option<String> {
    let raw_url = raw_url.trim();
    if raw_url.is_empty() {
        return None;
    }
    let lower = raw_url.to_ascii_lowercase();
    if lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("data:")
        || lower.starts_with('#')
    {
        return None;
    }

    let mut joined = base_url.join(raw_url).ok()?;
    if !matches!(joined.scheme(), "http" | "https") {
        return None;
    }
    joined.set_fragment(None);
    Some(joined.to_string())
}

pub fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    parsed.host_str().map(|v| v.to_ascii_lowercase())
}

pub fn redact_url_for_log(value: &str) -> String {
    match Url::parse(value) {
        Ok(uri) => {
            let scheme = uri.scheme();
            let authority = uri.host_str().unwrap_or("unknown-host");
            format!("{scheme}://{authority}/...")
        }
        Err(_) => "[invalid-url]".to_string(),
    }
}

fn is_html_content_type(content_type: &str) -> bool {
    if content_type.is_empty() {
        return true;
    }
    content_type.contains("text/html")
        || content_type.contains("application/xhtml+xml")
        || content_type.contains("text/plain")
}

fn header_string(response: &ureq::http::Response<ureq::Body>, key: &str) -> String {
    response
        .headers()
        .get(key)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_http_url_allows_http_https_only() {
        assert!(normalize_http_url("https://example.com/manga/x").is_ok());
        assert!(normalize_http_url(" http://example.com ").is_ok());
        assert!(matches!(
            normalize_http_url("ftp://example.com"),
            Err(EngineError::Configuration(_))
        ));
        assert!(matches!(
            normalize_http_url("not a url"),
            Err(EngineError::Configuration(_))
        ));
        assert!(matches!(
            normalize_http_url("   "),
            Err(EngineError::Configuration(_))
        ));
    }

    #[test]
    fn relative_links_resolve_against_base() {
        let base = Url::parse("https://example.com/manga/title/").expect("base");
        assert_eq!(
            normalize_url_with_base("chapter-2/#top", &base).as_deref(),
            Some("https://example.com/manga/title/chapter-2/")
        );
        assert_eq!(
            normalize_url_with_base("//cdn.example.net/p/1.jpg", &base).as_deref(),
            Some("https://cdn.example.net/p/1.jpg")
        );
        assert_eq!(normalize_url_with_base("javascript:void(0)", &base), None);
        assert_eq!(normalize_url_with_base("  ", &base), None);
    }

    #[test]
    fn redaction_keeps_only_scheme_and_host() {
        assert_eq!(
            redact_url_for_log("https://Example.com/secret/path?token=1"),
            "https://example.com/..."
        );
        assert_eq!(redact_url_for_log("::"), "[invalid-url]");
    }

    #[test]
    fn document_exposes_its_base_url() {
        let doc = Document::new("https://example.com/a/b", "<html></html>");
        assert_eq!(
            doc.base_url().map(|u| u.host_str().map(str::to_string)),
            Some(Some("example.com".to_string()))
        );
    }
}

//! # Page Scanner
//!
//! Fetches a target page and turns its `<img src>` attributes into a list of
//! absolute image URLs.
//!
//! ```text
//! target ──▶ coerce scheme ──▶ bounded GET ──▶ regex over raw markup
//!                                                   │
//!             unique URLs, first-seen order ◀── normalize / drop
//! ```
//!
//! Only three reference shapes survive normalization: absolute `http(s):`
//! URLs (kept verbatim), scheme-relative `//host/path` (takes the page
//! scheme) and root-relative `/path` (takes the page origin). Document
//! relative paths such as `img/a.png` are dropped.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info, warn};
use regex::Regex;
use url::Url;

use crate::error_handling::types::{FetchError, ScanError};
use crate::network::fetcher::Fetcher;
use crate::network::types::ScanOutcome;

const IMG_SRC_PATTERN: &str = r#"(?is)<img[^>]*\ssrc\s*=\s*(?:"([^"]*)"|'([^']*)')"#;

pub struct PageScanner {
    fetcher: Arc<dyn Fetcher>,
    max_page_bytes: u64,
    img_src: Regex,
}

impl PageScanner {
    pub fn new(fetcher: Arc<dyn Fetcher>, max_page_bytes: u64) -> Result<Self, ScanError> {
        Ok(Self {
            fetcher,
            max_page_bytes,
            img_src: Regex::new(IMG_SRC_PATTERN)?,
        })
    }

    /// Fetches `target` and extracts its unique image URLs.
    pub async fn scan(&self, target: &str) -> Result<ScanOutcome, ScanError> {
        let page_url = coerce_target(target)?;
        info!("Scanning {}", page_url);

        let page = self
            .fetcher
            .fetch(page_url.as_str(), self.max_page_bytes)
            .await?;

        if let Some(declared) = page.declared_length {
            let read = page.body.len() as u64;
            if read < declared {
                warn!("Short read on {}: {} of {} bytes", page_url, read, declared);
                return Err(ScanError::ShortRead { declared, read });
            }
        }

        let base = Url::parse(&page.url).unwrap_or(page_url);
        let markup = String::from_utf8_lossy(&page.body);
        let images = dedupe(
            self.extract_sources(&markup)
                .into_iter()
                .filter_map(|src| normalize_reference(&base, src))
                .collect(),
        );

        if images.is_empty() {
            debug!("No usable images on {} (status {})", base, page.status);
            return Ok(ScanOutcome::NoImages {
                status: page.status,
                body: markup.into_owned(),
            });
        }

        info!("Found {} image(s) on {}", images.len(), base);
        Ok(ScanOutcome::Images {
            page_url: base.to_string(),
            images,
        })
    }

    /// Raw `src` attribute values of every `<img>` tag, in document order.
    pub fn extract_sources<'a>(&self, markup: &'a str) -> Vec<&'a str> {
        self.img_src
            .captures_iter(markup)
            .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
            .map(|m| m.as_str())
            .collect()
    }
}

/// Parses the submitted target, defaulting to `http://` when no scheme is given.
pub fn coerce_target(target: &str) -> Result<Url, FetchError> {
    let target = target.trim();
    let candidate = if target.contains("://") {
        target.to_string()
    } else {
        format!("http://{}", target)
    };

    let invalid = |reason: String| FetchError::InvalidUrl {
        url: target.to_string(),
        reason,
    };
    let url = Url::parse(&candidate).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        "http" | "https" => Err(invalid("missing host".to_string())),
        other => Err(invalid(format!("unsupported scheme {}", other))),
    }
}

/// Resolves one `src` value against the page it was found on.
pub fn normalize_reference(page: &Url, src: &str) -> Option<String> {
    let src = src.trim();
    let lower = src.to_ascii_lowercase();

    if lower.starts_with("http:") || lower.starts_with("https:") {
        return Some(src.to_string());
    }
    if src.starts_with("//") {
        return Some(format!("{}:{}", page.scheme(), src));
    }
    if src.starts_with('/') {
        let host = page.host_str()?;
        let origin = match page.port() {
            Some(port) => format!("{}://{}:{}", page.scheme(), host, port),
            None => format!("{}://{}", page.scheme(), host),
        };
        return Some(format!("{}{}", origin, src));
    }
    None
}

/// Drops repeated URLs, keeping the first occurrence of each.
pub fn dedupe(values: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(values.len());
    let mut seen = HashSet::new();
    for value in values {
        if seen.insert(value.clone()) {
            out.push(value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::types::FetchedResource;
    use crate::test_support::StaticFetcher;

    fn scanner(fetcher: Arc<StaticFetcher>) -> PageScanner {
        PageScanner::new(fetcher, 1024 * 1024).unwrap()
    }

    #[test]
    fn test_normalization_example() {
        let page = Url::parse("https://x").unwrap();
        let normalized: Vec<String> = ["http://x/a.png", "//x/b.png", "/c.png", "d.png"]
            .iter()
            .filter_map(|src| normalize_reference(&page, src))
            .collect();
        assert_eq!(
            normalized,
            vec!["http://x/a.png", "https://x/b.png", "https://x/c.png"]
        );
    }

    #[test]
    fn test_root_relative_keeps_explicit_port() {
        let page = Url::parse("http://example.com:8081/gallery/index.html").unwrap();
        assert_eq!(
            normalize_reference(&page, "/img/a.png").as_deref(),
            Some("http://example.com:8081/img/a.png")
        );
    }

    #[test]
    fn test_other_references_are_dropped() {
        let page = Url::parse("https://example.com/dir/").unwrap();
        for src in ["a.png", "./a.png", "../a.png", "data:image/png;base64,AAAA", "ftp://x/a.png", ""] {
            assert_eq!(normalize_reference(&page, src), None, "{}", src);
        }
    }

    #[test]
    fn test_coerce_target() {
        assert_eq!(coerce_target("example.com").unwrap().as_str(), "http://example.com/");
        assert_eq!(
            coerce_target("https://example.com/p").unwrap().as_str(),
            "https://example.com/p"
        );
        assert!(matches!(
            coerce_target("ftp://example.com"),
            Err(FetchError::InvalidUrl { .. })
        ));
        assert!(coerce_target("http://").is_err());
    }

    #[test]
    fn test_extract_sources_quotes_and_case() {
        let s = scanner(Arc::new(StaticFetcher::new()));
        let markup = r#"
            <IMG SRC="/a.png">
            <img alt="x" src='//cdn/b.png' />
            <img data-src="/lazy.png" src="/c.png">
            <img
              class="multi" src="/d.png">
            <image src="/not-an-img.png">
        "#;
        assert_eq!(
            s.extract_sources(markup),
            vec!["/a.png", "//cdn/b.png", "/c.png", "/d.png"]
        );
    }

    #[test]
    fn test_dedupe_keeps_first_seen_order() {
        let values = ["b", "a", "b", "c", "a"].iter().map(|s| s.to_string()).collect();
        assert_eq!(dedupe(values), vec!["b", "a", "c"]);
    }

    #[tokio::test]
    async fn test_scan_dedupes_and_resolves() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.respond(
            "https://x/",
            200,
            Some("text/html"),
            br#"<img src="/c.png"><img src="//x/b.png"><img src="/c.png"><img src="d.png">"#,
        );

        let outcome = scanner(fetcher.clone()).scan("https://x").await.unwrap();
        assert_eq!(
            outcome,
            ScanOutcome::Images {
                page_url: "https://x/".to_string(),
                images: vec!["https://x/c.png".to_string(), "https://x/b.png".to_string()],
            }
        );
        assert_eq!(fetcher.calls(), vec!["https://x/"]);
    }

    #[tokio::test]
    async fn test_scan_without_images_reports_status_and_body() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.respond("http://example.com/", 404, Some("text/html"), b"<p>gone</p>");

        let outcome = scanner(fetcher).scan("example.com").await.unwrap();
        assert_eq!(
            outcome,
            ScanOutcome::NoImages {
                status: 404,
                body: "<p>gone</p>".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_scan_short_read_is_an_error() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.respond_with(FetchedResource {
            url: "http://example.com/".to_string(),
            status: 200,
            content_type: None,
            declared_length: Some(500),
            body: b"<img src=\"/a.png\">".to_vec(),
        });

        let err = scanner(fetcher).scan("http://example.com/").await.unwrap_err();
        assert!(matches!(err, ScanError::ShortRead { declared: 500, read: 18 }));
    }

    #[tokio::test]
    async fn test_scan_rejects_oversized_page() {
        let fetcher = Arc::new(StaticFetcher::new());
        fetcher.respond("http://example.com/", 200, None, &vec![b' '; 64]);

        let s = PageScanner::new(fetcher, 32).unwrap();
        let err = s.scan("http://example.com/").await.unwrap_err();
        assert!(matches!(err, ScanError::Fetch(FetchError::TooLarge { declared: 64, .. })));
    }
}

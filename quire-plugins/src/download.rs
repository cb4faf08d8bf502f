//! Source download: fetch plugin code into memory, never to disk
//!
//! Browsable repository URLs are rewritten to their raw-content form before
//! the request, and payloads that look like a rendered web page are
//! rejected.

use regex::Regex;
use sdk::errors::SourceError;
use std::sync::OnceLock;
use std::time::Duration;

use crate::code::DownloadedCode;
use crate::registry::{fetch_bytes_with_timeout, with_cache_bust};

struct UrlRewrite {
    pattern: Regex,
    replacement: &'static str,
}

fn rewrites() -> &'static [UrlRewrite] {
    static REWRITES: OnceLock<Vec<UrlRewrite>> = OnceLock::new();
    REWRITES.get_or_init(|| {
        [
            // github.com/o/r/blob/ref/path -> raw.githubusercontent.com/o/r/ref/path
            (
                r"^https?://github\.com/([^/]+)/([^/]+)/(?:blob|tree|raw)/(.+)$",
                "https://raw.githubusercontent.com/$1/$2/$3",
            ),
            // gitlab.com/o/r/-/blob/ref/path -> gitlab.com/o/r/-/raw/ref/path
            (
                r"^(https?://[^/]*gitlab[^/]*/.+?)/-/(?:blob|tree)/(.+)$",
                "$1/-/raw/$2",
            ),
            // bitbucket.org/o/r/src/ref/path -> bitbucket.org/o/r/raw/ref/path
            (
                r"^(https?://bitbucket\.org/[^/]+/[^/]+)/src/(.+)$",
                "$1/raw/$2",
            ),
        ]
        .into_iter()
        .filter_map(|(pattern, replacement)| {
            Regex::new(pattern).ok().map(|pattern| UrlRewrite {
                pattern,
                replacement,
            })
        })
        .collect()
    })
}

/// Rewrite a human-browsable repository URL to its raw-content equivalent
///
/// URLs that match no known shape are returned unchanged.
///
/// ```
/// use quire_plugins::download::rewrite_download_url;
///
/// assert_eq!(
///     rewrite_download_url("https://github.com/acme/sources/blob/main/demo.rhai"),
///     "https://raw.githubusercontent.com/acme/sources/main/demo.rhai"
/// );
/// ```
pub fn rewrite_download_url(url: &str) -> String {
    let url = url.trim();
    for rewrite in rewrites() {
        if rewrite.pattern.is_match(url) {
            let raw = rewrite.pattern.replace(url, rewrite.replacement).into_owned();
            tracing::debug!(from = %url, to = %raw, "Rewrote browsable download URL");
            return raw;
        }
    }
    url.to_string()
}

/// Whether `payload` looks like a rendered HTML page rather than code
pub fn looks_like_html(payload: &[u8]) -> bool {
    let start = &payload[..payload.len().min(512)];
    let head: String = String::from_utf8_lossy(start)
        .trim_start_matches('\u{feff}')
        .trim_start()
        .chars()
        .take(16)
        .collect::<String>()
        .to_ascii_lowercase();
    head.starts_with("<!doctype") || head.starts_with("<html")
}

/// Download plugin code from `url` into memory
///
/// The body is kept byte for byte; decoding waits until after verification.
///
/// # Errors
///
/// Returns [`SourceError::Network`] on transport failure, non-2xx status,
/// timeout, or when the payload is an HTML page.
pub async fn download_code(
    http: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<DownloadedCode, SourceError> {
    let raw_url = rewrite_download_url(url);
    let request_url = with_cache_bust(&raw_url)?;

    tracing::info!(url = %raw_url, "Downloading source code");

    let body = fetch_bytes_with_timeout(http, request_url, timeout)
        .await
        .map_err(|reason| SourceError::Network(format!("{}: {}", raw_url, reason)))?;

    if looks_like_html(&body) {
        tracing::warn!(url = %raw_url, "Download returned an HTML page");
        return Err(SourceError::Network(format!(
            "{} returned an HTML page instead of source code",
            raw_url
        )));
    }

    tracing::debug!(url = %raw_url, bytes = body.len(), "Downloaded source code");
    Ok(DownloadedCode::new(body, raw_url))
}

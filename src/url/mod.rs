//! URL handling module for Saga-Crawler
//!
//! This module resolves page links to absolute URLs, derives the host key used for
//! politeness accounting, and reads the numbers and slugs the site encodes in its
//! URLs (`/chuong-12/`, `/trang-3/`, `/the-loai/<slug>/`).

mod patterns;

pub use patterns::SitePatterns;

use url::Url;

/// Resolves a link href against the page URL and validates it
///
/// Returns None if the link should be ignored:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - fragment-only links
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
///
/// The fragment is dropped so that `page#top` and `page` deduplicate.
///
/// # Examples
///
/// ```
/// use saga_crawler::url::resolve_link;
/// use url::Url;
///
/// let base = Url::parse("https://example.com/story/").unwrap();
/// let url = resolve_link("chuong-1/#content", &base).unwrap();
/// assert_eq!(url.as_str(), "https://example.com/story/chuong-1/");
/// ```
pub fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    let mut url = base_url.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    url.set_fragment(None);
    Some(url)
}

/// Key used for per-host politeness accounting: lowercase host plus explicit port
///
/// # Examples
///
/// ```
/// use url::Url;
/// use saga_crawler::url::host_key;
///
/// let url = Url::parse("https://EXAMPLE.com/path").unwrap();
/// assert_eq!(host_key(&url), "example.com");
///
/// let url = Url::parse("http://127.0.0.1:8080/").unwrap();
/// assert_eq!(host_key(&url), "127.0.0.1:8080");
/// ```
pub fn host_key(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    }
}

/// Store key of a story: the last non-empty path segment of its URL
pub fn story_id(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("story")
        .to_string()
}

/// Extracts the category slug from a `/<prefix>/<slug>/...` URL
pub fn category_from_url(url: &Url, category_prefix: &str) -> Option<String> {
    let mut segments = url.path_segments()?;
    segments.find(|s| *s == category_prefix)?;
    segments
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Vietnamese letters and the ASCII letter they fold to
const FOLDED_LETTERS: [(&str, char); 7] = [
    ("àáạảãâầấậẩẫăằắặẳẵ", 'a'),
    ("èéẹẻẽêềếệểễ", 'e'),
    ("ìíịỉĩ", 'i'),
    ("òóọỏõôồốộổỗơờớợởỡ", 'o'),
    ("ùúụủũưừứựửữ", 'u'),
    ("ỳýỵỷỹ", 'y'),
    ("đ", 'd'),
];

fn fold_letter(c: char) -> char {
    FOLDED_LETTERS
        .iter()
        .find(|(letters, _)| letters.contains(c))
        .map_or(c, |(_, ascii)| *ascii)
}

/// Turns a title into a lowercase ASCII file name stem
///
/// Vietnamese diacritics are folded to their base letter; other non-ASCII
/// characters are dropped.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for word in title.to_lowercase().split_whitespace() {
        if !slug.is_empty() {
            slug.push('-');
        }
        slug.extend(
            word.chars()
                .map(fold_letter)
                .filter(|c| c.is_ascii_alphanumeric() || *c == '-'),
        );
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "story".to_string()
    } else {
        slug
    }
}

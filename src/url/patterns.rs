use crate::config::SiteConfig;
use crate::ConfigError;
use regex::Regex;
use url::Url;

/// Compiled URL patterns for one site profile
///
/// Chapter and page numbers are read from the first `<marker>-N` (or `<marker>N`)
/// occurrence in a URL. A chapter URL without a number maps to chapter 0.
#[derive(Debug, Clone)]
pub struct SitePatterns {
    chapter_marker: String,
    page_marker: String,
    category_prefix: String,
    chapter_re: Regex,
    page_re: Regex,
}

impl SitePatterns {
    /// Compiles the patterns for a site profile
    pub fn new(site: &SiteConfig) -> Result<Self, ConfigError> {
        let compile = |marker: &str| {
            Regex::new(&format!(r"(?i)({}-?)(\d+)", regex::escape(marker)))
                .map_err(|e| ConfigError::Validation(format!("bad marker '{}': {}", marker, e)))
        };

        Ok(Self {
            chapter_marker: site.chapter_marker.to_lowercase(),
            page_marker: site.page_marker.to_lowercase(),
            category_prefix: site.category_prefix.clone(),
            chapter_re: compile(&site.chapter_marker)?,
            page_re: compile(&site.page_marker)?,
        })
    }

    /// Chapter number encoded in a chapter URL, 0 when absent
    pub fn chapter_number(&self, url: &str) -> u32 {
        Self::capture_number(&self.chapter_re, url).unwrap_or(0)
    }

    /// Page number encoded in a paginated URL
    pub fn page_number(&self, url: &str) -> Option<u32> {
        Self::capture_number(&self.page_re, url)
    }

    fn capture_number(re: &Regex, url: &str) -> Option<u32> {
        re.captures(url)
            .and_then(|caps| caps.get(2))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// True if the URL path has a `/<chapter marker>-` segment
    pub fn is_chapter_url(&self, url: &str) -> bool {
        url.to_lowercase()
            .contains(&format!("/{}-", self.chapter_marker))
    }

    /// True if the URL path has a `/<page marker>-` segment
    pub fn is_page_url(&self, url: &str) -> bool {
        url.to_lowercase().contains(&format!("/{}-", self.page_marker))
    }

    /// Substring every chapter href contains, for attribute selectors
    pub fn chapter_href_fragment(&self) -> String {
        format!("{}-", self.chapter_marker)
    }

    /// Substring every pagination href contains, for attribute selectors
    pub fn page_href_fragment(&self) -> String {
        format!("{}-", self.page_marker)
    }

    /// Path prefix of a category listing: `/<prefix>/<slug>`
    pub fn category_path(&self, slug: &str) -> String {
        format!("/{}/{}", self.category_prefix, slug)
    }

    pub fn category_prefix(&self) -> &str {
        &self.category_prefix
    }

    /// Rewrites the page number of a paginated URL
    ///
    /// Returns None if the URL carries no page number to replace.
    pub fn with_page(&self, url: &Url, page: u32) -> Option<Url> {
        if !self.page_re.is_match(url.as_str()) {
            return None;
        }
        let replaced = self
            .page_re
            .replace(url.as_str(), |caps: &regex::Captures| {
                format!("{}{}", &caps[1], page)
            });
        Url::parse(&replaced).ok()
    }
}

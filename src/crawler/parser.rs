//! HTML parsers for listing, story and chapter pages
//!
//! Every field is extracted by an ordered list of strategies; the first one that
//! yields something wins. Parsers never fail: a page without a recognizable
//! field gets the [`NOT_FOUND`] sentinel (text fields) or an empty list.
//!
//! `scraper::Html` is not `Send`, so each function parses the body it is given
//! and returns owned data; no document outlives the call.

use crate::crawler::ChapterLink;
use crate::url::{resolve_link, SitePatterns};
use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::{BTreeMap, HashSet};
use std::sync::LazyLock;
use url::Url;

/// Placeholder stored for text fields the page does not provide
pub const NOT_FOUND: &str = "Not found";

static CHAPTER_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:chương|chapter)\s*\d+\s*[:\-–—]\s*")
        .expect("CHAPTER_PREFIX: hardcoded regex is valid")
});

/// Elements whose text is never page content
const SKIPPED_ELEMENTS: [&str; 3] = ["script", "style", "noscript"];

/// Story links and the next page of a category listing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingPage {
    /// Story URLs in page order, without duplicates
    pub story_urls: Vec<Url>,

    /// Next listing page, if any
    pub next_page: Option<Url>,
}

/// Descriptive fields of a story page
#[derive(Debug, Clone, PartialEq)]
pub struct StoryMeta {
    pub title: String,
    pub author: String,
    pub image_url: String,
    pub description: String,
    pub genres: Vec<String>,
}

impl StoryMeta {
    /// True if at least the title was recognized
    pub fn is_valid(&self) -> bool {
        self.title != NOT_FOUND
    }
}

impl Default for StoryMeta {
    fn default() -> Self {
        Self {
            title: NOT_FOUND.to_string(),
            author: NOT_FOUND.to_string(),
            image_url: NOT_FOUND.to_string(),
            description: NOT_FOUND.to_string(),
            genres: Vec::new(),
        }
    }
}

/// Everything read from the first page of a story
#[derive(Debug, Clone, Default)]
pub struct StoryPage {
    pub meta: StoryMeta,

    /// Chapter links on this page, sorted by chapter number
    pub chapter_links: Vec<ChapterLink>,

    /// Chapter-list pages linked from this page, keyed by page number
    pub chapter_pages: BTreeMap<u32, Url>,
}

impl StoryPage {
    /// Highest chapter-list page number and its URL
    pub fn last_chapter_page(&self) -> Option<(u32, &Url)> {
        self.chapter_pages.iter().next_back().map(|(n, url)| (*n, url))
    }
}

/// Title and text of one chapter
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterPage {
    pub title: String,
    pub content: String,
}

/// True if the page looks like a story page rather than a listing
pub fn is_story_page(html: &str) -> bool {
    let document = Html::parse_document(html);
    ["#list-chapter", ".list-chapter", "h3.title[itemprop='name']"]
        .iter()
        .any(|css| !select(&document, css).is_empty())
}

/// Parses a category listing page
///
/// # Arguments
///
/// * `html` - The page body
/// * `page_url` - URL the body was served from
/// * `patterns` - Site URL patterns
/// * `category_slug` - Slug the pagination links must stay within
///
/// # Returns
///
/// The story links on the page and the next listing page, if one is linked
pub fn parse_listing(
    html: &str,
    page_url: &Url,
    patterns: &SitePatterns,
    category_slug: &str,
) -> ListingPage {
    let document = Html::parse_document(html);

    let strategies: [fn(&Html, &Url) -> Vec<Url>; 3] = [
        |doc, base| hrefs(doc, "h3.truyen-title a", base),
        |doc, base| hrefs(doc, "h3.title a", base),
        |doc, base| hrefs(doc, "h3[class*='title'] a", base),
    ];
    let story_urls = strategies
        .iter()
        .map(|strategy| strategy(&document, page_url))
        .find(|urls| !urls.is_empty())
        .map(dedupe)
        .unwrap_or_default();

    let next_page = next_from_pagination(&document, page_url, patterns, category_slug)
        .or_else(|| next_from_fallback(&document, page_url))
        .filter(|next| next != page_url);

    ListingPage {
        story_urls,
        next_page,
    }
}

/// Smallest numbered pagination link within the category above the current page
fn next_from_pagination(
    document: &Html,
    page_url: &Url,
    patterns: &SitePatterns,
    category_slug: &str,
) -> Option<Url> {
    let category_path = patterns.category_path(category_slug);
    let current = patterns.page_number(page_url.as_str()).unwrap_or(1);

    hrefs(document, "ul.pagination a", page_url)
        .into_iter()
        .filter(|url| url.path().contains(&category_path))
        .filter_map(|url| {
            let n = patterns.page_number(url.as_str())?;
            (n > current).then_some((n, url))
        })
        .min_by_key(|(n, _)| *n)
        .map(|(_, url)| url)
}

fn next_from_fallback(document: &Html, page_url: &Url) -> Option<Url> {
    let by_selector = ["a.next", "li.next a", "a[rel~='next']"]
        .iter()
        .find_map(|css| hrefs(document, css, page_url).into_iter().next());
    if by_selector.is_some() {
        return by_selector;
    }

    select(document, "a[href]")
        .into_iter()
        .filter(|a| {
            let text = element_text(a);
            text.contains("Sau") || text.contains("Next") || text.contains('»')
        })
        .find_map(|a| resolve_link(a.value().attr("href")?, page_url))
}

/// Parses the first page of a story
///
/// Missing text fields become [`NOT_FOUND`]; this never fails.
pub fn parse_story(html: &str, page_url: &Url, patterns: &SitePatterns) -> StoryPage {
    let document = Html::parse_document(html);

    let meta = StoryMeta {
        title: first_text(&document, &["h3.title", "h3.truyen-title", "h1"]),
        author: first_text(
            &document,
            &["a[itemprop='author']", ".info a[href*='tac-gia']"],
        ),
        image_url: story_image(&document, page_url),
        description: story_description(&document),
        genres: story_genres(&document),
    };

    StoryPage {
        meta,
        chapter_links: chapter_links_in(&document, page_url, patterns),
        chapter_pages: chapter_pages_in(&document, page_url, patterns),
    }
}

/// Parses the chapter links of an additional chapter-list page
pub fn parse_chapter_list(html: &str, page_url: &Url, patterns: &SitePatterns) -> Vec<ChapterLink> {
    let document = Html::parse_document(html);
    chapter_links_in(&document, page_url, patterns)
}

fn story_image(document: &Html, page_url: &Url) -> String {
    ["img[itemprop='image']", ".book img"]
        .iter()
        .find_map(|css| {
            select(document, css)
                .into_iter()
                .find_map(|img| img.value().attr("src").map(str::trim))
                .filter(|src| !src.is_empty())
        })
        .map(|src| {
            resolve_link(src, page_url)
                .map(|url| url.to_string())
                .unwrap_or_else(|| src.to_string())
        })
        .unwrap_or_else(|| NOT_FOUND.to_string())
}

fn story_description(document: &Html) -> String {
    [
        "div[itemprop='description']",
        ".desc-text",
        ".info-holder",
        ".book-intro",
    ]
    .iter()
    .find_map(|css| {
        let lines: Vec<String> = select(document, css)
            .into_iter()
            .flat_map(|el| text_lines(&el))
            .collect();
        (!lines.is_empty()).then(|| lines.join("\n"))
    })
    .unwrap_or_else(|| NOT_FOUND.to_string())
}

fn story_genres(document: &Html) -> Vec<String> {
    let mut seen = HashSet::new();
    select(document, "a[itemprop='genre']")
        .iter()
        .map(element_text)
        .filter(|g| !g.is_empty() && seen.insert(g.clone()))
        .collect()
}

fn chapter_links_in(document: &Html, page_url: &Url, patterns: &SitePatterns) -> Vec<ChapterLink> {
    let fragment = patterns.chapter_href_fragment();
    let candidates = [
        format!("#list-chapter a[href*='{}']", fragment),
        format!(".list-chapter a[href*='{}']", fragment),
        format!("a[href*='/{}']", fragment),
    ];
    let anchors = candidates
        .iter()
        .map(|css| select(document, css))
        .find(|found| !found.is_empty())
        .unwrap_or_default();

    let mut seen = HashSet::new();
    let mut links: Vec<ChapterLink> = anchors
        .into_iter()
        .filter_map(|a| {
            let url = resolve_link(a.value().attr("href")?, page_url)?;
            if !seen.insert(url.clone()) {
                return None;
            }
            let title = a
                .value()
                .attr("title")
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .or_else(|| Some(element_text(&a)).filter(|t| !t.is_empty()));
            Some(ChapterLink::new(url, title, patterns))
        })
        .collect();

    links.sort_by(|a, b| a.number.cmp(&b.number).then_with(|| a.url.cmp(&b.url)));
    links
}

fn chapter_pages_in(document: &Html, page_url: &Url, patterns: &SitePatterns) -> BTreeMap<u32, Url> {
    let fragment = patterns.page_href_fragment();
    let candidates = [
        format!("#list-chapter a[href*='{}']", fragment),
        format!(".list-chapter a[href*='{}']", fragment),
    ];

    candidates
        .iter()
        .map(|css| hrefs(document, css, page_url))
        .find(|urls| !urls.is_empty())
        .unwrap_or_default()
        .into_iter()
        .filter_map(|url| Some((patterns.page_number(url.as_str())?, url)))
        .collect()
}

/// Parses a chapter page
///
/// # Arguments
///
/// * `html` - The page body
/// * `link_title` - Title carried by the chapter link, preferred when present
/// * `story_title` - Title of the story, stripped from the front of chapter titles
///
/// # Returns
///
/// * `Some(ChapterPage)` - The page has a chapter body
/// * `None` - No chapter body was found
pub fn parse_chapter(html: &str, link_title: Option<&str>, story_title: &str) -> Option<ChapterPage> {
    let document = Html::parse_document(html);

    let body = ["div.chapter-c", "#chapter-c", ".chapter-content"]
        .iter()
        .find_map(|css| select(&document, css).into_iter().next())?;
    let content = text_lines(&body).join("\n");

    let raw_title = link_title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| {
            ["h1.chapter-title, h2.chapter-title", ".chapter-title"]
                .iter()
                .find_map(|css| {
                    select(&document, css)
                        .iter()
                        .map(element_text)
                        .find(|t| !t.is_empty())
                })
        })
        .or_else(|| {
            select(&document, "meta[property='og:title']")
                .into_iter()
                .find_map(|m| m.value().attr("content").map(|c| c.trim().to_string()))
                .filter(|t| !t.is_empty())
        })
        .unwrap_or_default();

    Some(ChapterPage {
        title: clean_chapter_title(&raw_title, story_title),
        content,
    })
}

/// Strips a leading `Chương N:` marker and a repeated story title
///
/// # Examples
///
/// ```
/// use saga_crawler::crawler::clean_chapter_title;
///
/// assert_eq!(clean_chapter_title("Chương 3: Ra đi", "Tiên Nghịch"), "Ra đi");
/// assert_eq!(clean_chapter_title("Tiên Nghịch - Ra đi", "Tiên Nghịch"), "Ra đi");
/// assert_eq!(clean_chapter_title("Tiên Nghịch - Chương 3: Ra đi", "Tiên Nghịch"), "Ra đi");
/// ```
pub fn clean_chapter_title(raw: &str, story_title: &str) -> String {
    let title = CHAPTER_PREFIX.replace(raw, "");
    let title = title.trim();

    let story_title = story_title.trim();
    if story_title.is_empty() || story_title == NOT_FOUND {
        return title.to_string();
    }

    // Compare char by char so case folding never splits a multi-byte char
    let prefix_chars = story_title.chars().count();
    let split_at = title
        .char_indices()
        .nth(prefix_chars)
        .map(|(i, _)| i)
        .unwrap_or(title.len());
    let (head, rest) = title.split_at(split_at);

    if head.chars().count() == prefix_chars && head.to_lowercase() == story_title.to_lowercase() {
        let rest = rest.trim_start_matches([' ', '-', ':', '–', '—']);
        // The marker may follow the story title
        CHAPTER_PREFIX.replace(rest, "").trim().to_string()
    } else {
        title.to_string()
    }
}

fn select<'a>(document: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(selector) => document.select(&selector).collect(),
        Err(e) => {
            tracing::debug!("Invalid selector '{}': {:?}", css, e);
            Vec::new()
        }
    }
}

/// Absolute URLs of the `href`s of the matched elements
fn hrefs(document: &Html, css: &str, base: &Url) -> Vec<Url> {
    select(document, css)
        .into_iter()
        .filter_map(|el| resolve_link(el.value().attr("href")?, base))
        .collect()
}

fn dedupe(urls: Vec<Url>) -> Vec<Url> {
    let mut seen = HashSet::new();
    urls.into_iter().filter(|u| seen.insert(u.clone())).collect()
}

/// First non-empty text among the selectors, or the sentinel
fn first_text(document: &Html, selectors: &[&str]) -> String {
    selectors
        .iter()
        .find_map(|css| {
            select(document, css)
                .iter()
                .map(element_text)
                .find(|t| !t.is_empty())
        })
        .unwrap_or_else(|| NOT_FOUND.to_string())
}

/// Text of an element with whitespace collapsed
fn element_text(element: &ElementRef) -> String {
    text_lines(element).join(" ")
}

/// Non-empty trimmed text nodes, skipping scripts and styles
fn text_lines(element: &ElementRef) -> Vec<String> {
    let mut lines = Vec::new();
    collect_text(*element, &mut lines);
    lines
}

fn collect_text(element: ElementRef, out: &mut Vec<String>) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                let line = text.split_whitespace().collect::<Vec<_>>().join(" ");
                if !line.is_empty() {
                    out.push(line);
                }
            }
            Node::Element(el) if SKIPPED_ELEMENTS.contains(&el.name()) => {}
            Node::Element(_) => {
                if let Some(child) = ElementRef::wrap(child) {
                    collect_text(child, out);
                }
            }
            _ => {}
        }
    }
}

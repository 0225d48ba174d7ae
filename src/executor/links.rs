//! HTML parsing for the HTTP executor
//!
//! Extracts the page title and the links to follow:
//! - `<a href="...">` tags (except those with `download`)
//! - `<link rel="canonical" href="...">`
//!
//! `javascript:`, `mailto:`, `tel:`, `data:` and fragment-only hrefs are
//! ignored. Every kept link is resolved against the page URL and normalized.

use crate::url::normalize_url;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

/// Extracted information from an HTML page
#[derive(Debug, Clone)]
pub struct ParsedPage {
    pub title: Option<String>,
    /// Normalized absolute URLs, first occurrence order, no duplicates
    pub links: Vec<String>,
}

/// Parses HTML content and extracts the title and links
///
/// # Example
///
/// ```
/// use spider_core::executor::parse_html;
/// use url::Url;
///
/// let html = r#"<html><head><title>Test</title></head><body><a href="/page/">Link</a></body></html>"#;
/// let base_url = Url::parse("https://example.com/").unwrap();
/// let parsed = parse_html(html, &base_url);
/// assert_eq!(parsed.title, Some("Test".to_string()));
/// assert_eq!(parsed.links, vec!["https://example.com/page".to_string()]);
/// ```
pub fn parse_html(html: &str, base_url: &Url) -> ParsedPage {
    let document = Html::parse_document(html);
    ParsedPage {
        title: extract_title(&document),
        links: collect_links(&document, base_url),
    }
}

/// Convenience wrapper returning only the links
pub fn extract_links(html: &str, base_url: &Url) -> Vec<String> {
    parse_html(html, base_url).links
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn collect_links(document: &Html, base_url: &Url) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    let mut push = |href: &str| {
        if let Some(url) = resolve_link(href, base_url) {
            if seen.insert(url.clone()) {
                links.push(url);
            }
        }
    };

    if let Ok(selector) = Selector::parse("a[href]") {
        for element in document.select(&selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(href) = element.value().attr("href") {
                push(href);
            }
        }
    }

    if let Ok(selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&selector) {
            if let Some(href) = element.value().attr("href") {
                push(href);
            }
        }
    }

    links
}

/// Resolves an href to a normalized absolute HTTP(S) URL
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if ["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
    {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    normalize_url(absolute.as_str()).ok().map(|u| u.to_string())
}

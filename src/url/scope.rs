use crate::config::{CrawlConfig, FetchConfig};
use crate::url::normalize_url;
use crate::UrlError;
use std::path::Path;
use url::Url;

/// Extensions that never point at a crawlable page
const NON_PAGE_EXTENSIONS: &[&str] = &[
    "css", "js", "map", "jpg", "jpeg", "png", "gif", "bmp", "svg", "webp", "ico", "tif", "tiff",
    "mp3", "wav", "ogg", "mp4", "avi", "mov", "flv", "wmv", "webm", "mkv", "pdf", "doc", "docx",
    "xls", "xlsx", "ppt", "pptx", "txt", "rtf", "csv", "xml", "json", "yaml", "yml", "zip", "rar",
    "tar", "gz", "7z", "bz2", "exe", "dll", "so", "bin", "apk", "dmg", "iso", "msi", "ttf", "otf",
    "woff", "woff2", "eot", "swf", "dat",
];

/// Lowercased host with any leading `www.` removed
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| {
        let host = h.to_lowercase();
        match host.strip_prefix("www.") {
            Some(bare) => bare.to_string(),
            None => host,
        }
    })
}

/// Which discovered links a crawl follows
///
/// A link is in scope when its host equals the start host (`www.` ignored),
/// or is a subdomain of it if subdomains are allowed, its path starts with
/// the path prefix, and it looks like a page rather than an asset.
#[derive(Debug, Clone)]
pub struct CrawlScope {
    domain: String,
    allow_subdomains: bool,
    path_prefix: Option<String>,
    allowed_extensions: Vec<String>,
}

impl CrawlScope {
    pub fn new(
        start_url: &Url,
        allow_subdomains: bool,
        path_prefix: Option<String>,
        allowed_extensions: Vec<String>,
    ) -> Result<Self, UrlError> {
        let domain = extract_domain(start_url).ok_or(UrlError::MissingDomain)?;
        let path_prefix = path_prefix
            .map(|p| p.trim_end_matches('/').to_string())
            .filter(|p| !p.is_empty());

        Ok(Self {
            domain,
            allow_subdomains,
            path_prefix,
            allowed_extensions: allowed_extensions
                .into_iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        })
    }

    /// Builds the scope from configuration
    ///
    /// Without an explicit prefix the start URL's directory is used, so
    /// `https://example.com/docs/intro` limits the crawl to `/docs`.
    pub fn from_config(crawl: &CrawlConfig, fetch: &FetchConfig) -> Result<Self, UrlError> {
        let start = normalize_url(&crawl.start_url)?;
        let prefix = crawl
            .path_prefix
            .clone()
            .or_else(|| Some(default_prefix(&crawl.start_url)));
        Self::new(
            &start,
            crawl.allow_subdomains,
            prefix,
            fetch.allowed_extensions.clone(),
        )
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn path_prefix(&self) -> Option<&str> {
        self.path_prefix.as_deref()
    }

    pub fn contains(&self, url: &Url) -> bool {
        if url.scheme() != "http" && url.scheme() != "https" {
            return false;
        }
        let Some(domain) = extract_domain(url) else {
            return false;
        };

        let domain_match = if self.allow_subdomains {
            domain == self.domain || domain.ends_with(&format!(".{}", self.domain))
        } else {
            domain == self.domain
        };
        if !domain_match {
            return false;
        }

        if let Some(prefix) = &self.path_prefix {
            let path = url.path();
            let under_prefix = path == prefix
                || path
                    .strip_prefix(prefix.as_str())
                    .map_or(false, |rest| rest.starts_with('/'));
            if !under_prefix {
                return false;
            }
        }

        self.is_page(url)
    }

    /// False for URLs whose extension marks a static asset
    pub fn is_page(&self, url: &Url) -> bool {
        let path = url.path();
        if path.ends_with('/') || url.query().is_some() {
            return true;
        }

        let ext = match Path::new(path).extension().and_then(|e| e.to_str()) {
            Some(ext) => ext.to_lowercase(),
            None => return true,
        };

        if self.allowed_extensions.iter().any(|a| *a == ext) {
            return true;
        }
        !NON_PAGE_EXTENSIONS.contains(&ext.as_str())
    }
}

/// Directory part of the start URL's path
fn default_prefix(start_url: &str) -> String {
    let Ok(url) = Url::parse(start_url) else {
        return "/".to_string();
    };
    let path = url.path();
    if path.ends_with('/') {
        return path.to_string();
    }
    match path.rfind('/') {
        Some(idx) => path[..=idx].to_string(),
        None => "/".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn scope(allow_subdomains: bool, prefix: Option<&str>) -> CrawlScope {
        CrawlScope::new(
            &url("https://www.example.com/docs/"),
            allow_subdomains,
            prefix.map(String::from),
            vec![".html".to_string()],
        )
        .unwrap()
    }

    #[test]
    fn test_extract_domain_strips_www() {
        assert_eq!(
            extract_domain(&url("https://WWW.Example.com/a")),
            Some("example.com".to_string())
        );
        assert_eq!(
            extract_domain(&url("https://blog.example.com:8080/")),
            Some("blog.example.com".to_string())
        );
    }

    #[test]
    fn test_same_domain_only() {
        let scope = scope(false, None);
        assert!(scope.contains(&url("https://example.com/anything")));
        assert!(scope.contains(&url("https://www.example.com/anything")));
        assert!(!scope.contains(&url("https://blog.example.com/")));
        assert!(!scope.contains(&url("https://other.com/")));
        assert!(!scope.contains(&url("mailto:someone@example.com")));
    }

    #[test]
    fn test_subdomains_allowed() {
        let scope = scope(true, None);
        assert!(scope.contains(&url("https://blog.example.com/")));
        assert!(scope.contains(&url("https://a.b.example.com/")));
        assert!(!scope.contains(&url("https://notexample.com/")));
    }

    #[test]
    fn test_path_prefix() {
        let scope = scope(false, Some("/docs/"));
        assert_eq!(scope.path_prefix(), Some("/docs"));
        assert!(scope.contains(&url("https://example.com/docs")));
        assert!(scope.contains(&url("https://example.com/docs/guide")));
        assert!(!scope.contains(&url("https://example.com/docsearch")));
        assert!(!scope.contains(&url("https://example.com/blog")));
    }

    #[test]
    fn test_assets_excluded() {
        let scope = scope(false, None);
        assert!(!scope.contains(&url("https://example.com/logo.png")));
        assert!(!scope.contains(&url("https://example.com/app.js")));
        assert!(scope.contains(&url("https://example.com/page.html")));
        assert!(scope.contains(&url("https://example.com/page.unknown")));
        assert!(scope.contains(&url("https://example.com/report.pdf?view=1")));
    }

    #[test]
    fn test_allowed_extension_overrides_exclusion() {
        let scope = CrawlScope::new(
            &url("https://example.com/"),
            false,
            None,
            vec![".xml".to_string()],
        )
        .unwrap();
        assert!(scope.contains(&url("https://example.com/feed.xml")));
    }

    #[test]
    fn test_default_prefix_from_start_url() {
        assert_eq!(default_prefix("https://example.com/docs/intro"), "/docs/");
        assert_eq!(default_prefix("https://example.com/docs/"), "/docs/");
        assert_eq!(default_prefix("https://example.com"), "/");
    }

    #[test]
    fn test_from_config() {
        let crawl = CrawlConfig {
            start_url: "https://example.com/docs/intro".to_string(),
            max_depth: None,
            max_pages: None,
            path_prefix: None,
            allow_subdomains: false,
        };
        let scope = CrawlScope::from_config(&crawl, &FetchConfig::default()).unwrap();
        assert_eq!(scope.domain(), "example.com");
        assert_eq!(scope.path_prefix(), Some("/docs"));
    }
}

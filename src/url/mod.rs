//! URL handling module
//!
//! Normalization gives every discovered link a canonical dedup key, and
//! `CrawlScope` decides which links the bundled HTTP executor follows.

mod normalize;
mod scope;

pub use normalize::normalize_url;
pub use scope::{extract_domain, CrawlScope};

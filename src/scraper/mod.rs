//! HTML extraction for listing and detail pages
//!
//! Both parsers compile their selectors once from [`SiteConfig`](crate::config::SiteConfig)
//! and then work on plain document text, so they never hold a parsed
//! document across an await point.

pub mod detail;
pub mod listing;

use scraper::{ElementRef, Selector};
use thiserror::Error;

pub use detail::FieldExtractor;
pub use listing::ListingParser;

/// Structural problems with a page or the selector configuration
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScrapeError {
    #[error("invalid selector `{css}` for {what}: {reason}")]
    Selector {
        what: String,
        css: String,
        reason: String,
    },

    #[error("page count token `{token}` not found in {url}")]
    MissingPageCount { url: String, token: String },

    #[error("listing container `{css}` not found in {url}")]
    MissingContainer { url: String, css: String },
}

pub(crate) fn compile(what: &str, css: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(css).map_err(|e| ScrapeError::Selector {
        what: what.to_string(),
        css: css.to_string(),
        reason: format!("{e:?}"),
    })
}

pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>()
}

//! Listing page parsing: total page count and item identifiers

use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, warn};

use super::{ScrapeError, compile};
use crate::config::SiteConfig;
use crate::models::ItemId;

/// Compiled listing selectors for one site
#[derive(Debug, Clone)]
pub struct ListingParser {
    container_css: String,
    container: Selector,
    item: Selector,
    link: Selector,
    page_count: Regex,
    page_count_token: String,
    item_id: Regex,
}

impl ListingParser {
    pub fn new(site: &SiteConfig) -> Result<Self, ScrapeError> {
        let container_css = site.listing_container.css();
        let page_count = Regex::new(&format!(r"{}\s*(\d+)", regex::escape(&site.page_count_token)))
            .map_err(|e| ScrapeError::Selector {
                what: "page count token".to_string(),
                css: site.page_count_token.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            container: compile("listing container", &container_css)?,
            container_css,
            item: compile("listing item", &site.listing_item.css())?,
            link: compile("item link", "a[href]")?,
            page_count,
            page_count_token: site.page_count_token.clone(),
            item_id: Regex::new(r"(\d+)/").map_err(|e| ScrapeError::Selector {
                what: "item id pattern".to_string(),
                css: r"(\d+)/".to_string(),
                reason: e.to_string(),
            })?,
        })
    }

    /// Total number of listing pages announced by the document
    pub fn page_count(&self, url: &str, html: &str) -> Result<u32, ScrapeError> {
        self.page_count
            .captures(html)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .ok_or_else(|| ScrapeError::MissingPageCount {
                url: url.to_string(),
                token: self.page_count_token.clone(),
            })
    }

    /// Item identifiers in markup order.
    ///
    /// An absent container means the layout changed and is an error; an item
    /// without a usable link is skipped.
    pub fn item_ids(&self, url: &str, html: &str) -> Result<Vec<ItemId>, ScrapeError> {
        let document = Html::parse_document(html);
        let container = document
            .select(&self.container)
            .next()
            .ok_or_else(|| ScrapeError::MissingContainer {
                url: url.to_string(),
                css: self.container_css.clone(),
            })?;

        let mut ids = Vec::new();
        for item in container.select(&self.item) {
            let href = item
                .select(&self.link)
                .next()
                .and_then(|link| link.value().attr("href"));
            let Some(href) = href else {
                warn!("Listing item without a link on {}", url);
                continue;
            };

            match self.parse_id(href) {
                Some(id) => ids.push(id),
                None => warn!("No item id in link `{}` on {}", href, url),
            }
        }

        debug!("Found {} item links on {}", ids.len(), url);
        Ok(ids)
    }

    fn parse_id(&self, href: &str) -> Option<ItemId> {
        self.item_id
            .captures(href)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .map(ItemId)
    }
}

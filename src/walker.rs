//! Pagination walk over a seller listing, collecting identifiers the store
//! has not seen yet

use std::collections::HashSet;

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::models::ItemId;
use crate::scraper::{ListingParser, ScrapeError};
use crate::traits::PageFetcher;

#[derive(Debug, Error)]
pub enum WalkError {
    #[error("failed to fetch listing page {url}: {source:#}")]
    Fetch {
        url: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid listing url {url}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error(transparent)]
    Structure(#[from] ScrapeError),
}

/// Order-preserving set of newly discovered identifiers
#[derive(Debug, Default)]
struct Discovered {
    ids: Vec<ItemId>,
    seen: HashSet<ItemId>,
}

impl Discovered {
    /// Append the unseen ids of one page; duplicates of earlier pages are dropped
    fn merge(&mut self, page_ids: Vec<ItemId>, known: &HashSet<ItemId>) {
        for id in page_ids {
            if !known.contains(&id) && self.seen.insert(id) {
                self.ids.push(id);
            }
        }
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn into_truncated(mut self, target: usize) -> Vec<ItemId> {
        self.ids.truncate(target);
        self.ids
    }
}

/// Walks listing pages through a shared fetcher
pub struct PaginationWalker<'a> {
    fetcher: &'a dyn PageFetcher,
    parser: &'a ListingParser,
    marker: Option<&'a str>,
    page_param: &'a str,
}

impl<'a> PaginationWalker<'a> {
    pub fn new(
        fetcher: &'a dyn PageFetcher,
        parser: &'a ListingParser,
        marker: Option<&'a str>,
        page_param: &'a str,
    ) -> Self {
        Self {
            fetcher,
            parser,
            marker,
            page_param,
        }
    }

    /// Collect up to `target` identifiers not in `known`, in first-seen order.
    ///
    /// Running out of pages before reaching `target` is not an error.
    pub async fn discover_unseen(
        &self,
        listing_url: &str,
        target: usize,
        known: &HashSet<ItemId>,
    ) -> Result<Vec<ItemId>, WalkError> {
        let first = self.fetch(listing_url).await?;
        let total_pages = self.parser.page_count(listing_url, &first)?;
        info!("Listing {} has {} pages", listing_url, total_pages);

        if target == 0 {
            return Ok(Vec::new());
        }

        let mut discovered = Discovered::default();
        discovered.merge(self.parser.item_ids(listing_url, &first)?, known);
        info!("New items after page 1: {}", discovered.len());
        if discovered.len() >= target {
            return Ok(discovered.into_truncated(target));
        }

        for page in 2..=total_pages {
            let url = page_url(listing_url, self.page_param, page)?;
            let html = self.fetch(&url).await?;
            discovered.merge(self.parser.item_ids(&url, &html)?, known);
            info!("New items after page {}: {}", page, discovered.len());

            if discovered.len() >= target {
                return Ok(discovered.into_truncated(target));
            }
        }

        info!(
            "Listing exhausted with {} of {} requested new items",
            discovered.len(),
            target
        );
        Ok(discovered.ids)
    }

    async fn fetch(&self, url: &str) -> Result<String, WalkError> {
        self.fetcher
            .fetch(url, self.marker)
            .await
            .map(|page| {
                if page.is_degraded() {
                    warn!("Listing page {} is only partially rendered", page.url);
                }
                page.html
            })
            .map_err(|source| WalkError::Fetch {
                url: url.to_string(),
                source,
            })
    }
}

/// Listing URL with the page query parameter appended
pub fn page_url(listing_url: &str, param: &str, page: u32) -> Result<String, WalkError> {
    let mut url = Url::parse(listing_url).map_err(|source| WalkError::Url {
        url: listing_url.to_string(),
        source,
    })?;
    url.query_pairs_mut().append_pair(param, &page.to_string());
    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use proptest::collection::{hash_set, vec};
    use proptest::prelude::*;

    use super::*;
    use crate::config::SiteConfig;
    use crate::traits::{FetchedPage, PageLoad};

    const BASE: &str = "https://shop.example/seller/1/products/";

    /// Serves canned listing pages and records every requested URL
    struct FakeListing {
        pages: HashMap<String, String>,
        requested: Mutex<Vec<String>>,
        degraded: bool,
    }

    impl FakeListing {
        fn new(pages: &[Vec<i64>]) -> Self {
            let total = pages.len();
            let pages = pages
                .iter()
                .enumerate()
                .map(|(i, ids)| {
                    let url = if i == 0 {
                        BASE.to_string()
                    } else {
                        format!("{BASE}?page={}", i + 1)
                    };
                    (url, listing_html(total, ids))
                })
                .collect();
            Self {
                pages,
                requested: Mutex::new(Vec::new()),
                degraded: false,
            }
        }

        fn requested(&self) -> Vec<String> {
            self.requested.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl PageFetcher for FakeListing {
        async fn fetch(&self, url: &str, marker: Option<&str>) -> Result<FetchedPage> {
            self.requested.lock().unwrap().push(url.to_string());
            let html = self
                .pages
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow!("no such page {url}"))?;
            let load = if self.degraded {
                PageLoad::TimedOut {
                    marker: marker.unwrap_or_default().to_string(),
                    waited: std::time::Duration::from_secs(8),
                }
            } else {
                PageLoad::Ready
            };
            Ok(FetchedPage {
                url: url.to_string(),
                html,
                load,
            })
        }
    }

    fn listing_html(total: usize, ids: &[i64]) -> String {
        let items: String = ids
            .iter()
            .map(|id| format!(r#"<div class="u1i ui2"><a href="/product/item-{id}/">x</a></div>"#))
            .collect();
        format!(
            r#"<html><script>{{"totalPages":{total}}}</script><div class="wi4">{items}</div></html>"#
        )
    }

    fn ids(raw: &[i64]) -> Vec<ItemId> {
        raw.iter().copied().map(ItemId).collect()
    }

    fn known(raw: &[i64]) -> HashSet<ItemId> {
        raw.iter().copied().map(ItemId).collect()
    }

    async fn walk(
        fetcher: &FakeListing,
        target: usize,
        known: &HashSet<ItemId>,
    ) -> Result<Vec<ItemId>, WalkError> {
        let site = SiteConfig::default();
        let parser = ListingParser::new(&site).unwrap();
        PaginationWalker::new(fetcher, &parser, Some("div.wi4"), "page")
            .discover_unseen(BASE, target, known)
            .await
    }

    #[tokio::test]
    async fn single_page_truncates_to_target() {
        let fetcher = FakeListing::new(&[vec![1, 2, 3]]);
        let found = walk(&fetcher, 2, &known(&[])).await.unwrap();
        assert_eq!(found, ids(&[1, 2]));
        assert_eq!(fetcher.requested().len(), 1);
    }

    #[tokio::test]
    async fn stops_before_last_page_once_target_is_met() {
        let fetcher = FakeListing::new(&[
            vec![1, 2, 3, 4, 5],
            vec![6, 7, 8, 9, 10],
            vec![11, 12, 13, 14, 15],
        ]);
        let found = walk(&fetcher, 5, &known(&[2, 4, 6, 8])).await.unwrap();
        assert_eq!(found, ids(&[1, 3, 5, 7, 9]));
        assert_eq!(
            fetcher.requested(),
            vec![BASE.to_string(), format!("{BASE}?page=2")]
        );
    }

    #[tokio::test]
    async fn walks_every_page_when_needed() {
        let fetcher = FakeListing::new(&[
            vec![1, 2, 3, 4, 5],
            vec![6, 7, 8, 9, 10],
            vec![11, 12, 13, 14, 15],
        ]);
        let found = walk(&fetcher, 10, &known(&[1, 2, 3, 4])).await.unwrap();
        assert_eq!(found, ids(&[5, 6, 7, 8, 9, 10, 11, 12, 13, 14]));
        assert_eq!(fetcher.requested().len(), 3);
    }

    #[tokio::test]
    async fn first_page_alone_short_circuits() {
        let fetcher = FakeListing::new(&[vec![1, 2, 3, 4, 5], vec![6, 7]]);
        let found = walk(&fetcher, 3, &known(&[1])).await.unwrap();
        assert_eq!(found, ids(&[2, 3, 4]));
        assert_eq!(fetcher.requested(), vec![BASE.to_string()]);
    }

    #[tokio::test]
    async fn duplicates_across_pages_are_counted_once() {
        let fetcher = FakeListing::new(&[vec![1, 2, 2], vec![2, 3, 1], vec![4, 3]]);
        let found = walk(&fetcher, 10, &known(&[])).await.unwrap();
        assert_eq!(found, ids(&[1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn exhausted_listing_returns_short_batch() {
        let fetcher = FakeListing::new(&[vec![1, 2], vec![3]]);
        let found = walk(&fetcher, 10, &known(&[2])).await.unwrap();
        assert_eq!(found, ids(&[1, 3]));
    }

    #[tokio::test]
    async fn zero_target_only_reads_page_count() {
        let fetcher = FakeListing::new(&[vec![1], vec![2]]);
        let found = walk(&fetcher, 0, &known(&[])).await.unwrap();
        assert!(found.is_empty());
        assert_eq!(fetcher.requested().len(), 1);
    }

    #[tokio::test]
    async fn degraded_page_still_yields_its_ids() {
        let mut fetcher = FakeListing::new(&[vec![1, 2]]);
        fetcher.degraded = true;
        let found = walk(&fetcher, 2, &known(&[])).await.unwrap();
        assert_eq!(found, ids(&[1, 2]));
    }

    #[tokio::test]
    async fn missing_page_count_aborts_the_walk() {
        let mut fetcher = FakeListing::new(&[vec![1]]);
        fetcher
            .pages
            .insert(BASE.to_string(), r#"<div class="wi4"></div>"#.to_string());
        let err = walk(&fetcher, 1, &known(&[])).await.unwrap_err();
        assert!(matches!(
            err,
            WalkError::Structure(ScrapeError::MissingPageCount { .. })
        ));
    }

    #[tokio::test]
    async fn missing_container_on_later_page_aborts_the_walk() {
        let mut fetcher = FakeListing::new(&[vec![1], vec![2]]);
        fetcher.pages.insert(
            format!("{BASE}?page=2"),
            r#"<html>{"totalPages":2}</html>"#.to_string(),
        );
        let err = walk(&fetcher, 5, &known(&[])).await.unwrap_err();
        assert!(matches!(
            err,
            WalkError::Structure(ScrapeError::MissingContainer { .. })
        ));
    }

    /// Expected walk result: first-seen unknown ids across all pages, cut to `target`
    fn reference_walk(pages: &[Vec<i64>], known: &HashSet<ItemId>, target: usize) -> Vec<ItemId> {
        let mut seen = HashSet::new();
        pages
            .iter()
            .flatten()
            .map(|id| ItemId(*id))
            .filter(|id| !known.contains(id) && seen.insert(*id))
            .take(target)
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(128))]

        #[test]
        fn walk_yields_unseen_ids_in_first_seen_order(
            pages in vec(vec(1i64..40, 0..8), 1..5),
            known_raw in hash_set(1i64..40, 0..20),
            target in 0usize..30,
        ) {
            let known: HashSet<ItemId> = known_raw.into_iter().map(ItemId).collect();
            let fetcher = FakeListing::new(&pages);
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let found = runtime.block_on(walk(&fetcher, target, &known)).unwrap();

            let unseen: HashSet<ItemId> = pages
                .iter()
                .flatten()
                .map(|id| ItemId(*id))
                .filter(|id| !known.contains(id))
                .collect();
            let distinct: HashSet<ItemId> = found.iter().copied().collect();

            prop_assert!(found.iter().all(|id| !known.contains(id)));
            prop_assert_eq!(distinct.len(), found.len());
            prop_assert_eq!(found.len(), target.min(unseen.len()));
            prop_assert_eq!(found, reference_walk(&pages, &known, target));
        }
    }

    #[test]
    fn page_url_keeps_existing_query() {
        assert_eq!(
            page_url("https://shop.example/s/?sort=new", "page", 3).unwrap(),
            "https://shop.example/s/?sort=new&page=3"
        );
        assert_eq!(
            page_url(BASE, "page", 2).unwrap(),
            format!("{BASE}?page=2")
        );
    }
}

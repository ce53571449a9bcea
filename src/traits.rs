//! Seams between the crawl engine and its collaborators

use std::collections::HashSet;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ItemId, ProductRecord, StoredProduct};

/// How a fetched document came to be returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageLoad {
    /// The wait marker appeared
    Ready,
    /// No marker was given; the fixed settle delay elapsed
    Settled,
    /// The marker never appeared; the document may be partially rendered
    TimedOut { marker: String, waited: Duration },
}

/// Document text of one page at the time fetching completed
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: String,
    pub html: String,
    pub load: PageLoad,
}

impl FetchedPage {
    pub fn is_degraded(&self) -> bool {
        matches!(self.load, PageLoad::TimedOut { .. })
    }
}

/// Something that can navigate to a URL and hand back the rendered document
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Navigate to `url` and return its document text.
    ///
    /// With a `marker`, waits a bounded time for a matching element; a timeout
    /// is not an error and is reported through [`PageLoad::TimedOut`].
    async fn fetch(&self, url: &str, marker: Option<&str>) -> Result<FetchedPage>;
}

/// A fetcher owning a browser resource that must be released
#[async_trait]
pub trait PageSession: PageFetcher {
    /// Graceful close followed by a forced terminate
    async fn close(&mut self) -> Result<()>;
}

/// Opens one fresh session per batch
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PageSession>>;
}

/// Persistence boundary: a read of known identifiers and a bulk append
#[async_trait]
pub trait ProductStore: Send + Sync {
    async fn known_ids(&self) -> Result<HashSet<ItemId>>;

    /// Append all records at once; either every record is committed or none is
    async fn persist(&self, records: &[ProductRecord]) -> Result<Vec<StoredProduct>>;
}

/// Fire-and-forget text notifications
pub trait Notifier: Send + Sync {
    fn notify(&self, text: String);
}

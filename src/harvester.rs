use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{Instrument, error, info, info_span, warn};

use crate::config::{FailurePolicy, SiteConfig};
use crate::models::{BatchReport, BatchResult, FieldErrors, ItemFailure, ItemId, ProductRecord};
use crate::scraper::{FieldExtractor, ListingParser};
use crate::traits::{
    FetchedPage, Notifier, PageFetcher, PageLoad, PageSession, ProductStore, SessionLauncher,
};
use crate::walker::{PaginationWalker, WalkError};

/// Reasons a batch ends without reaching the store
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("failed to open browser session: {0:#}")]
    Session(anyhow::Error),

    #[error("failed to read known products: {0:#}")]
    KnownIds(anyhow::Error),

    #[error(transparent)]
    Walk(#[from] WalkError),

    #[error("item {} is invalid: {}", .0.id, .0.errors)]
    Invalid(ItemFailure),

    #[error("failed to save products: {0:#}")]
    Persist(anyhow::Error),
}

/// Shared flag asking a running batch to stop after the current item
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Forwards degraded page loads to the notifier
struct WarningRelay<'a> {
    inner: &'a dyn PageSession,
    notifier: &'a dyn Notifier,
}

#[async_trait]
impl<'a> PageFetcher for WarningRelay<'a> {
    async fn fetch(&self, url: &str, marker: Option<&str>) -> Result<FetchedPage> {
        let page = self.inner.fetch(url, marker).await?;
        if let PageLoad::TimedOut { marker, waited } = &page.load {
            self.notifier.notify(format!(
                "Page {} did not finish loading: `{}` not found within {}s",
                page.url,
                marker,
                waited.as_secs()
            ));
        }
        Ok(page)
    }
}

/// Runs seller batches: open session, walk, fetch, persist once, notify once, close
#[derive(Clone)]
pub struct Harvester {
    launcher: Arc<dyn SessionLauncher>,
    store: Arc<dyn ProductStore>,
    notifier: Arc<dyn Notifier>,
    site: SiteConfig,
    listing: ListingParser,
    extractor: FieldExtractor,
    policy: FailurePolicy,
    stop: StopSignal,
}

impl Harvester {
    pub fn new(
        launcher: Arc<dyn SessionLauncher>,
        store: Arc<dyn ProductStore>,
        notifier: Arc<dyn Notifier>,
        site: SiteConfig,
        policy: FailurePolicy,
    ) -> Result<Self> {
        let listing = ListingParser::new(&site)?;
        let extractor = FieldExtractor::new(&site.fields)?;

        Ok(Self {
            launcher,
            store,
            notifier,
            site,
            listing,
            extractor,
            policy,
            stop: StopSignal::default(),
        })
    }

    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run one batch end to end. Every outcome, including aborts, comes back as a report.
    pub async fn run_batch(&self, listing_url: &str, target: usize) -> BatchReport {
        let span = info_span!("batch", url = listing_url, count = target);
        self.execute(listing_url, target).instrument(span).await
    }

    async fn execute(&self, listing_url: &str, target: usize) -> BatchReport {
        let fetched_at = Utc::now();

        let mut session = match self.launcher.launch().await {
            Ok(session) => session,
            Err(e) => return self.conclude(aborted(target, BatchError::Session(e))),
        };
        info!("Browser session opened");

        let relay = WarningRelay {
            inner: session.as_ref(),
            notifier: self.notifier.as_ref(),
        };
        let collected = self.collect(&relay, listing_url, target, fetched_at).await;
        let report = self.finalize(target, collected).await;

        if let Err(e) = session.close().await {
            warn!("Browser session did not close cleanly: {:#}", e);
        }
        info!("Browser session closed");

        report
    }

    async fn collect(
        &self,
        fetcher: &dyn PageFetcher,
        listing_url: &str,
        target: usize,
        fetched_at: DateTime<Utc>,
    ) -> Result<BatchResult, BatchError> {
        let known = self.store.known_ids().await.map_err(BatchError::KnownIds)?;
        info!("Products already stored: {}", known.len());

        let walker = PaginationWalker::new(
            fetcher,
            &self.listing,
            self.site.listing_marker.as_deref(),
            &self.site.page_param,
        );
        let ids = walker.discover_unseen(listing_url, target, &known).await?;
        info!("New products selected: {}", ids.len());

        let mut batch = BatchResult::new(target, fetched_at);
        for (index, id) in ids.iter().copied().enumerate() {
            if self.stop.is_requested() {
                warn!("Stop requested, skipping {} remaining items", ids.len() - index);
                break;
            }

            match self.fetch_record(fetcher, id, fetched_at).await {
                Ok(record) => batch.records.push(record),
                Err(errors) => {
                    let failure = ItemFailure { id, errors };
                    match self.policy {
                        FailurePolicy::SkipInvalid => {
                            warn!("Skipping item {}: {}", id, failure.errors);
                            batch.failures.push(failure);
                        }
                        FailurePolicy::AbortBatch => return Err(BatchError::Invalid(failure)),
                    }
                }
            }
        }

        Ok(batch)
    }

    async fn fetch_record(
        &self,
        fetcher: &dyn PageFetcher,
        id: ItemId,
        fetched_at: DateTime<Utc>,
    ) -> Result<ProductRecord, FieldErrors> {
        let url = self.site.product_url(id);
        let page = fetcher
            .fetch(&url, self.site.detail_marker.as_deref())
            .await
            .map_err(|e| FieldErrors::single("page", format!("{e:#}")))?;

        let raw = self.extractor.extract(&page.html);
        ProductRecord::validate(id, &raw, fetched_at)
    }

    async fn finalize(&self, target: usize, collected: Result<BatchResult, BatchError>) -> BatchReport {
        let batch = match collected {
            Ok(batch) => batch,
            Err(e) => return self.conclude(aborted(target, e)),
        };

        let saved = if batch.records.is_empty() {
            0
        } else {
            match self.store.persist(&batch.records).await {
                Ok(stored) => stored.len(),
                Err(e) => {
                    return self.conclude(BatchReport::Aborted {
                        requested: batch.requested,
                        reason: BatchError::Persist(e).to_string(),
                        failures: batch.failures,
                    });
                }
            }
        };

        self.conclude(BatchReport::Completed {
            requested: batch.requested,
            saved,
            failures: batch.failures,
        })
    }

    /// Log the outcome and send the single summary notification
    fn conclude(&self, report: BatchReport) -> BatchReport {
        let summary = report.summary();
        if report.is_aborted() {
            error!("{}", summary);
        } else {
            info!("{}", summary);
        }
        self.notifier.notify(summary);
        report
    }
}

fn aborted(requested: usize, error: BatchError) -> BatchReport {
    let failures = match &error {
        BatchError::Invalid(failure) => vec![failure.clone()],
        _ => Vec::new(),
    };
    BatchReport::Aborted {
        requested,
        reason: error.to_string(),
        failures,
    }
}

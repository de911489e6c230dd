//! Secondary Index Syncer: page through the store and mirror every record into the index.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use appshelf_core::ApplicationRecord;
use appshelf_search::SearchIndex;
use appshelf_source::Backoff;
use appshelf_store::{CatalogStore, RecordFilter};
use metrics::{counter, histogram};
use tracing::{info, warn};

use crate::bounded;

pub const PAGE_SIZE: usize = 1000;
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub docs: usize,
    pub errors: usize,
    /// Index documents whose record no longer exists (or is disabled).
    pub removed: usize,
}

pub struct IndexSyncer {
    store: Arc<dyn CatalogStore>,
    index: Arc<dyn SearchIndex>,
    page_size: usize,
    backoff: Backoff,
    call_timeout: Duration,
}

impl IndexSyncer {
    pub fn new(store: Arc<dyn CatalogStore>, index: Arc<dyn SearchIndex>) -> Self {
        Self { store, index, page_size: PAGE_SIZE, backoff: Backoff::default(), call_timeout: DEFAULT_CALL_TIMEOUT }
    }

    pub fn with_page_size(mut self, n: usize) -> Self { self.page_size = n.max(1); self }
    pub fn with_backoff(mut self, b: Backoff) -> Self { self.backoff = b; self }
    /// Bound for each store and index call.
    pub fn with_call_timeout(mut self, d: Duration) -> Self { self.call_timeout = d; self }

    /// Full re-index; the whole pass is retried when it fails outright.
    pub async fn sync(&self) -> Result<IndexReport> {
        let t0 = Instant::now();
        let report = self.backoff.retry("index sync", || self.sync_once()).await?;
        let ms = t0.elapsed().as_secs_f64() * 1000.0;
        histogram!("index_sync_ms", ms);
        info!(docs = report.docs, errors = report.errors, removed = report.removed, took_ms = ms as u64, "indexer: synced");
        Ok(report)
    }

    async fn sync_once(&self) -> Result<IndexReport> {
        let limit = self.call_timeout;
        let mut report = IndexReport::default();
        let mut live: HashSet<String> = HashSet::new();
        let all = RecordFilter::default();
        let mut skip = 0usize;
        loop {
            let page = bounded(limit, "store page", self.store.paginate(&all, skip, self.page_size))
                .await
                .with_context(|| format!("store page at {skip}"))?;
            let n = page.items.len();
            let batch: Vec<ApplicationRecord> = page.items.into_iter().filter(|r| !r.is_disabled()).collect();
            live.extend(batch.iter().map(|r| r.name.clone()));
            self.index_batch(&batch, &mut report).await;
            if n < self.page_size { break; }
            skip += n;
        }
        let stale: Vec<String> = bounded(limit, "listing index documents", self.index.names())
            .await?
            .into_iter()
            .filter(|name| !live.contains(name))
            .collect();
        if !stale.is_empty() {
            match bounded(limit, "pruning index", self.index.delete_documents(&stale)).await {
                Ok(removed) => report.removed += removed,
                Err(e) => warn!(docs = stale.len(), phase = "index", error = %format!("{e:#}"), "indexer: prune failed"),
            }
        }
        Ok(report)
    }

    // One index call per page; a failed call counts every record of the page as an error.
    async fn index_batch(&self, batch: &[ApplicationRecord], report: &mut IndexReport) {
        if batch.is_empty() { return; }
        match bounded(self.call_timeout, "index batch", self.index.upsert_documents(batch)).await {
            Ok(outcomes) => {
                for (rec, res) in batch.iter().zip(outcomes) {
                    match res {
                        Ok(()) => {
                            report.docs += 1;
                            counter!("index_sync_docs_total", 1u64);
                        }
                        Err(e) => {
                            report.errors += 1;
                            counter!("index_sync_errors_total", 1u64);
                            warn!(app = %rec.name, phase = "index", error = %e, "indexer: upsert failed");
                        }
                    }
                }
            }
            Err(e) => {
                report.errors += batch.len();
                counter!("index_sync_errors_total", batch.len() as u64);
                warn!(docs = batch.len(), phase = "index", error = %format!("{e:#}"), "indexer: batch failed");
            }
        }
    }
}

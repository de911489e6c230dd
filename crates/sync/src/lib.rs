//! Appshelf sync: Catalog Builder, Secondary Index Syncer and the Sync Orchestrator.

#![forbid(unsafe_code)]

mod builder;
mod indexer;
mod orchestrator;

pub use appshelf_source::Backoff;
pub use builder::{BuilderConfig, CatalogBuilder};
pub use indexer::{IndexReport, IndexSyncer, DEFAULT_CALL_TIMEOUT, PAGE_SIZE};
pub use orchestrator::{CycleReport, Orchestrator, Phase, SyncConfig};

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};

async fn bounded<T>(limit: Duration, what: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut).await.map_err(|_| anyhow!("{what} timed out after {}s", limit.as_secs_f64()))?
}

//! Sync Orchestrator: Idle -> Pulling -> Building -> Writing -> Reindexing -> Idle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use appshelf_core::RevisionMarker;
use appshelf_search::SearchIndex;
use appshelf_source::SourceControl;
use appshelf_store::{CatalogStore, HistoryWriter, WriteOutcome};
use metrics::{counter, histogram};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::{bounded, CatalogBuilder, IndexSyncer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Pulling,
    Building,
    Writing,
    Reindexing,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub interval: Duration,
    /// Bound for each store call made by the cycle.
    pub call_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self { Self { interval: Duration::from_secs(300), call_timeout: Duration::from_secs(30) } }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub id: String,
    pub revision: String,
    pub changed: bool,
    /// Non-forced cycle that saw no change and stopped after refreshing the revision.
    pub skipped: bool,
    pub built: usize,
    pub written: usize,
    pub disabled: usize,
    pub failed: usize,
}

pub struct Orchestrator {
    source: Arc<dyn SourceControl>,
    store: Arc<dyn CatalogStore>,
    index: Arc<dyn SearchIndex>,
    builder: CatalogBuilder,
    writer: HistoryWriter,
    indexer: Arc<IndexSyncer>,
    cfg: SyncConfig,
    cycle: Mutex<()>,
    phase: watch::Sender<Phase>,
    epoch: Arc<watch::Sender<u64>>,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn SourceControl>,
        store: Arc<dyn CatalogStore>,
        index: Arc<dyn SearchIndex>,
        builder: CatalogBuilder,
        indexer: IndexSyncer,
        cfg: SyncConfig,
    ) -> Self {
        let (phase, _) = watch::channel(Phase::Idle);
        let (epoch, _) = watch::channel(0u64);
        Self {
            writer: HistoryWriter::new(store.clone()),
            source,
            store,
            index,
            builder,
            indexer: Arc::new(indexer),
            cfg,
            cycle: Mutex::new(()),
            phase,
            epoch: Arc::new(epoch),
        }
    }

    pub fn phase(&self) -> Phase { *self.phase.borrow() }
    pub fn subscribe_phase(&self) -> watch::Receiver<Phase> { self.phase.subscribe() }
    /// Bumped after every finished reindex.
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch.subscribe() }

    fn enter(&self, p: Phase) { self.phase.send_replace(p); }

    /// Read HEAD and store it as the authoritative revision marker.
    pub async fn refresh_revision(&self) -> Result<String> {
        let hash = bounded(self.cfg.call_timeout, "reading revision", self.source.current_revision()).await?;
        let marker = RevisionMarker { hash: hash.clone(), observed_at: chrono::Utc::now().to_rfc3339() };
        bounded(self.cfg.call_timeout, "storing revision", self.store.set_revision(marker)).await?;
        Ok(hash)
    }

    /// One full cycle. Cycles never overlap; a second caller waits for the running one.
    pub async fn run_cycle(&self, force: bool) -> Result<CycleReport> {
        let _guard = self.cycle.lock().await;
        let id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("cycle", id = %id, force);
        let t0 = Instant::now();
        let res = self.cycle_inner(id, force).instrument(span).await;
        self.enter(Phase::Idle);
        let outcome = if res.is_ok() { "ok" } else { "error" };
        counter!("sync_cycles_total", 1u64, "outcome" => outcome);
        histogram!("sync_cycle_ms", t0.elapsed().as_secs_f64() * 1000.0);
        res
    }

    async fn cycle_inner(&self, id: String, force: bool) -> Result<CycleReport> {
        self.enter(Phase::Pulling);
        let pulled = self.source.pull().await.context("pulling source")?;
        let revision = self.refresh_revision().await?;
        let mut report = CycleReport { id, revision: revision.clone(), changed: pulled.changed, ..Default::default() };
        if !pulled.changed && !force {
            report.skipped = true;
            info!(revision = %revision, "sync: source unchanged");
            return Ok(report);
        }

        self.enter(Phase::Building);
        let entries = self.builder.build(&revision).await?;
        report.built = entries.len();

        self.enter(Phase::Writing);
        for entry in entries.iter() {
            match bounded(self.cfg.call_timeout, "writing entry", self.writer.write(entry)).await {
                Ok(WriteOutcome::Upserted) => report.written += 1,
                Ok(WriteOutcome::Disabled { .. }) => {
                    report.disabled += 1;
                    if let Err(e) = bounded(self.cfg.call_timeout, "index delete", self.index.delete_document(&entry.name)).await {
                        warn!(app = %entry.name, phase = "index", error = %format!("{e:#}"), "sync: index delete failed");
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(app = %entry.name, phase = "write", error = %format!("{e:#}"), "sync: write failed");
                }
            }
        }

        self.enter(Phase::Reindexing);
        self.spawn_reindex();
        info!(
            revision = %revision,
            built = report.built,
            written = report.written,
            disabled = report.disabled,
            failed = report.failed,
            "sync: cycle done"
        );
        Ok(report)
    }

    fn spawn_reindex(&self) -> JoinHandle<()> {
        let indexer = self.indexer.clone();
        let epoch = self.epoch.clone();
        tokio::spawn(async move {
            if let Err(e) = indexer.sync().await {
                warn!(error = %format!("{e:#}"), "sync: reindex failed");
            }
            epoch.send_modify(|n| *n += 1);
        })
    }

    /// Clone if needed, record the revision, then run a forced cycle.
    pub async fn startup(&self) -> Result<CycleReport> {
        self.source.ensure_clone().await.context("preparing source tree")?;
        self.refresh_revision().await?;
        self.run_cycle(true).await
    }

    /// Startup, then a non-forced cycle every interval until cancelled.
    /// Cancellation is observed between cycles, never inside one.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if let Err(e) = self.startup().await {
            error!(error = %format!("{e:#}"), "sync: startup cycle failed");
        }
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + self.cfg.interval, self.cfg.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle(false).await {
                        warn!(error = %format!("{e:#}"), "sync: cycle failed");
                    }
                }
            }
        }
        info!("sync: loop stopped");
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> { tokio::spawn(self.run(cancel)) }
}

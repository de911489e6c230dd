use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use appshelf_core::resolve::{filter_all, resolve, resolve_all, resolve_each, resolve_strict};
use appshelf_core::{app_id, ApplicationEntry, ApplicationRecord, LATEST_KEY};
use appshelf_manifest::{Reader, MANIFEST_FILE};
use appshelf_search::{IndexQuery, SearchIndex, SortBy, TermBucket, TermField};
use appshelf_source::SourceControl;
use appshelf_store::{CatalogStore, RecordFilter, TopFilter};
use appshelf_sync::Orchestrator;
use tracing::{debug, info, warn};

use crate::{
    valid_file_name, AppStoreHash, AppStoreInfo, AppStoreStats, CatalogApi, Chart, ChartQuery, ListQuery, ListResult, Paging,
    ShelfError, ShelfResult, TopQuery, TopRank, UpdateSummary, VersionDefaults, APPSTORE_TOP_LIMIT, README_FILE,
};

/// Catalog operations served from the store, the search index and the source tree.
pub struct InProcApi {
    store: Arc<dyn CatalogStore>,
    index: Arc<dyn SearchIndex>,
    source: Arc<dyn SourceControl>,
    reader: Reader,
    charts_dir: PathBuf,
    versions: VersionDefaults,
    orchestrator: Option<Arc<Orchestrator>>,
}

impl InProcApi {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        index: Arc<dyn SearchIndex>,
        source: Arc<dyn SourceControl>,
        reader: Reader,
        charts_dir: impl Into<PathBuf>,
        versions: VersionDefaults,
    ) -> Self {
        Self { store, index, source, reader, charts_dir: charts_dir.into(), versions, orchestrator: None }
    }

    /// Enables `update`; without it forced cycles are unavailable.
    pub fn with_orchestrator(mut self, orch: Arc<Orchestrator>) -> Self {
        self.orchestrator = Some(orch);
        self
    }

    fn map_err(e: anyhow::Error) -> ShelfError { ShelfError::Internal(format!("{e:#}")) }

    fn require_name(name: &str) -> ShelfResult<&str> {
        let name = name.trim();
        if name.is_empty() { return Err(ShelfError::Validation("application name is empty".into())); }
        Ok(name)
    }

    /// Stored marker first, then the working tree's HEAD. `None` disables revision scoping.
    async fn current_revision(&self) -> Option<String> {
        match self.store.revision().await {
            Ok(Some(m)) if !m.hash.is_empty() => return Some(m.hash),
            Ok(_) => {}
            Err(e) => warn!(error = %format!("{e:#}"), "api: reading revision marker failed"),
        }
        match self.source.current_revision().await {
            Ok(h) if !h.is_empty() => Some(h),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "api: reading source revision failed");
                None
            }
        }
    }

    fn base_filter(revision: Option<String>) -> RecordFilter { RecordFilter { revision, ..Default::default() } }

    /// Index (exact name at the current revision), then store, then the source tree.
    async fn find_record(&self, name: &str) -> ShelfResult<ApplicationRecord> {
        if let Some(rev) = self.current_revision().await {
            match self.index.query(&IndexQuery::at_revision(rev).with_name(name), 0, 1).await {
                Ok(page) => {
                    if let Some(rec) = page.items.into_iter().next() {
                        debug!(app = %name, "api: found in index");
                        return Ok(rec);
                    }
                }
                Err(e) => warn!(app = %name, error = %format!("{e:#}"), "api: index lookup failed"),
            }
        }
        if let Some(rec) = self.store.find(name).await.map_err(Self::map_err)? {
            debug!(app = %name, "api: found in store");
            return Ok(rec);
        }
        self.read_from_source(name).await
    }

    async fn read_from_source(&self, name: &str) -> ShelfResult<ApplicationRecord> {
        if !valid_file_name(name) { return Err(ShelfError::NotFound(format!("application {name}"))); }
        let dir = self.source.app_dir(name);
        if !dir.join(MANIFEST_FILE).is_file() { return Err(ShelfError::NotFound(format!("application {name}"))); }
        let reader = self.reader.clone();
        let entry = tokio::task::spawn_blocking(move || reader.read_app(&dir))
            .await
            .map_err(|e| ShelfError::Internal(e.to_string()))?
            .map_err(|e| {
                warn!(app = %name, phase = "read", error = %format!("{e:#}"), "api: source read failed");
                ShelfError::NotFound(format!("application {name}"))
            })?;
        debug!(app = %name, "api: read from source tree");
        let mut history = BTreeMap::new();
        history.insert(LATEST_KEY.to_string(), entry.clone());
        Ok(ApplicationRecord { id: app_id(&entry.name), name: entry.name.clone(), app_labels: entry.app_labels.clone(), history })
    }

    async fn read_chart(&self, file: &str) -> ShelfResult<Option<Chart>> {
        let path = self.charts_dir.join(file);
        if !path.is_file() { return Ok(None); }
        let bytes = tokio::fs::read(&path).await.map_err(|e| ShelfError::Internal(format!("reading {}: {e}", path.display())))?;
        Ok(Some(Chart { file_name: file.to_string(), bytes }))
    }

    /// The v2 payload: strict version filter over one page plus the filtered ranking.
    async fn appstore(&self, paging: Paging, version: &str) -> ShelfResult<AppStoreInfo> {
        let revision = self.current_revision().await;
        let filter = Self::base_filter(revision);
        let page = self.store.paginate(&filter, paging.from, paging.size).await.map_err(Self::map_err)?;
        let apps = filter_all(page.items.iter(), version)?;
        let top = self.store.top(&TopFilter { base: filter, exclude_labels: Vec::new() }, APPSTORE_TOP_LIMIT).await.map_err(Self::map_err)?;
        let ranked = filter_all(top.iter().map(|t| &t.record), version)?;
        let tops: Vec<TopRank> = ranked.into_iter().enumerate().map(|(i, e)| TopRank { app_id: e.name, rank: i + 1 }).collect();
        let hash = content_hash(&apps, &tops)?;
        let stats = AppStoreStats { total_apps: page.total, total_items: apps.len() as u64, hash };
        Ok(AppStoreInfo { apps, tops, stats })
    }
}

/// Hex MD5 over the JSON form of `{apps, tops}`.
fn content_hash(apps: &[ApplicationEntry], tops: &[TopRank]) -> ShelfResult<String> {
    #[derive(serde::Serialize)]
    struct Hashed<'a> {
        apps: &'a [ApplicationEntry],
        tops: &'a [TopRank],
    }
    let bytes = serde_json::to_vec(&Hashed { apps, tops }).map_err(|e| ShelfError::Internal(e.to_string()))?;
    Ok(format!("{:x}", md5::compute(&bytes)))
}

#[async_trait::async_trait]
impl CatalogApi for InProcApi {
    fn versions(&self) -> VersionDefaults { self.versions.clone() }

    async fn list(&self, q: ListQuery) -> ShelfResult<ListResult<ApplicationEntry>> {
        let t0 = Instant::now();
        let filter = RecordFilter { revision: self.current_revision().await, category: q.category.filter(|c| !c.is_empty()), types: q.types };
        let page = self.store.paginate(&filter, q.paging.from, q.paging.size).await.map_err(Self::map_err)?;
        let items = resolve_each(page.items.iter(), &q.version)?;
        info!(items = items.len(), total = page.total, took_ms = %t0.elapsed().as_millis(), "api: list ok");
        Ok(ListResult::with_count(items, page.total))
    }

    async fn types(&self) -> ShelfResult<ListResult<String>> {
        let types = self.store.types().await.map_err(Self::map_err)?;
        Ok(ListResult::new(types))
    }

    async fn categories(&self) -> ShelfResult<ListResult<TermBucket>> {
        let t0 = Instant::now();
        let revision = self.current_revision().await;
        let buckets = self.index.aggregate_terms(TermField::Categories, revision.as_deref()).await.map_err(Self::map_err)?;
        info!(buckets = buckets.len(), took_ms = %t0.elapsed().as_millis(), "api: categories ok");
        Ok(ListResult::new(buckets))
    }

    async fn info(&self, name: &str, version: &str) -> ShelfResult<ApplicationEntry> {
        let t0 = Instant::now();
        let name = Self::require_name(name)?;
        let record = self.find_record(name).await?;
        let entry = resolve(&record, version)?;
        info!(app = %name, version = %entry.version, took_ms = %t0.elapsed().as_millis(), "api: info ok");
        Ok(entry)
    }

    async fn infos(&self, names: Vec<String>, version: &str) -> ShelfResult<BTreeMap<String, ApplicationEntry>> {
        let t0 = Instant::now();
        let names: Vec<String> = names.into_iter().map(|n| n.trim().to_string()).filter(|n| !n.is_empty()).collect();
        let records = self.store.find_many(&names).await.map_err(Self::map_err)?;
        let out = resolve_all(records.iter(), version)?;
        info!(asked = names.len(), found = out.len(), took_ms = %t0.elapsed().as_millis(), "api: infos ok");
        Ok(out)
    }

    async fn exist(&self, name: &str) -> ShelfResult<bool> {
        let name = Self::require_name(name)?;
        Ok(self.store.find(name).await.map_err(Self::map_err)?.is_some())
    }

    async fn readme(&self, name: &str) -> ShelfResult<Vec<u8>> {
        let name = Self::require_name(name)?;
        if !valid_file_name(name) { return Err(ShelfError::Validation(format!("invalid application name {name:?}"))); }
        self.source.read_file(&Path::new(name).join(README_FILE)).await.map_err(|e| {
            debug!(app = %name, error = %format!("{e:#}"), "api: readme missing");
            ShelfError::NotFound(format!("README for {name}"))
        })
    }

    async fn search(&self, name: &str, paging: Paging) -> ShelfResult<ListResult<ApplicationEntry>> {
        let t0 = Instant::now();
        let term = Self::require_name(name)?;
        let mut q = IndexQuery { sort: SortBy::Score, ..Default::default() }.with_fuzzy(term);
        q.revision = self.current_revision().await;
        let page = self.index.query(&q, paging.from, paging.size).await.map_err(Self::map_err)?;
        let items: Vec<ApplicationEntry> = page.items.iter().filter_map(|r| r.latest().cloned()).collect();
        info!(term = %term, hits = items.len(), total = page.total, took_ms = %t0.elapsed().as_millis(), "api: search ok");
        Ok(ListResult::with_count(items, page.total))
    }

    async fn top(&self, q: TopQuery) -> ShelfResult<ListResult<ApplicationEntry>> {
        let t0 = Instant::now();
        let base = RecordFilter { revision: self.current_revision().await, category: q.category.filter(|c| !c.is_empty()), types: q.types };
        let filter = TopFilter { base, exclude_labels: q.excluded_labels };
        let items = self.store.top(&filter, q.size).await.map_err(Self::map_err)?;
        let entries = resolve_each(items.iter().map(|t| &t.record), &q.version)?;
        info!(items = entries.len(), took_ms = %t0.elapsed().as_millis(), "api: top ok");
        Ok(ListResult::new(entries))
    }

    async fn update(&self) -> ShelfResult<UpdateSummary> {
        let orch = self.orchestrator.as_ref().ok_or_else(|| ShelfError::Unavailable("sync is not running".into()))?;
        let t0 = Instant::now();
        let report = orch.run_cycle(true).await.map_err(Self::map_err)?;
        info!(revision = %report.revision, took_ms = %t0.elapsed().as_millis(), "api: update ok");
        Ok(report.into())
    }

    async fn count(&self, name: &str) -> ShelfResult<u64> {
        let name = Self::require_name(name)?;
        let n = self.store.increment(name).await.map_err(Self::map_err)?;
        debug!(app = %name, count = n, "api: counter bumped");
        Ok(n)
    }

    async fn chart(&self, q: ChartQuery) -> ShelfResult<Chart> {
        let t0 = Instant::now();
        let name = Self::require_name(&q.name)?;
        if let Some(file) = q.file_name.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
            if !valid_file_name(file) { return Err(ShelfError::Validation(format!("invalid file name {file:?}"))); }
            return self.read_chart(file).await?.ok_or_else(|| ShelfError::NotFound(format!("chart {file}")));
        }
        if valid_file_name(name) {
            if let Some(chart) = self.read_chart(name).await? { return Ok(chart); }
        }
        let record = self.find_record(name).await?;
        let entry = resolve_strict(&record, &q.version)?;
        if entry.chart_name.is_empty() || !valid_file_name(&entry.chart_name) {
            return Err(ShelfError::NotFound(format!("chart for {name} {}", entry.version)));
        }
        let chart = self.read_chart(&entry.chart_name).await?.ok_or_else(|| ShelfError::NotFound(format!("chart {}", entry.chart_name)))?;
        info!(app = %name, file = %chart.file_name, bytes = chart.bytes.len(), took_ms = %t0.elapsed().as_millis(), "api: chart ok");
        Ok(chart)
    }

    async fn appstore_info(&self, paging: Paging, version: &str) -> ShelfResult<AppStoreInfo> {
        let t0 = Instant::now();
        let info = self.appstore(paging, version).await?;
        info!(apps = info.apps.len(), tops = info.tops.len(), took_ms = %t0.elapsed().as_millis(), "api: appstore_info ok");
        Ok(info)
    }

    async fn appstore_hash(&self, paging: Paging, version: &str) -> ShelfResult<AppStoreHash> {
        let info = self.appstore(paging, version).await?;
        Ok(AppStoreHash { hash: info.stats.hash, updated_at: chrono::Utc::now().to_rfc3339() })
    }
}

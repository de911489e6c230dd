use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use appshelf_core::ApplicationEntry;
use appshelf_search::TermBucket;

use crate::{
    AppStoreHash, AppStoreInfo, CatalogApi, Chart, ChartQuery, ListQuery, ListResult, Paging, ShelfError, ShelfResult, TopQuery,
    UpdateSummary, VersionDefaults,
};

/// Canned catalog for HTTP-layer tests. Entries are served as-is, whatever the version.
#[derive(Default)]
pub struct MockApi {
    pub entries: Vec<ApplicationEntry>,
    pub types: Vec<String>,
    pub categories: Vec<TermBucket>,
    pub readme: Option<Vec<u8>>,
    pub chart: Option<Chart>,
    pub update: Option<UpdateSummary>,
    pub appstore: AppStoreInfo,
    pub versions: VersionDefaults,
    counter: AtomicU64,
}

impl MockApi {
    pub fn new() -> Self { Self::default() }

    pub fn with_entries(entries: Vec<ApplicationEntry>) -> Self { Self { entries, ..Self::default() } }

    fn entry(&self, name: &str) -> Option<&ApplicationEntry> { self.entries.iter().find(|e| e.name == name) }

    fn page(&self, paging: Paging) -> Vec<ApplicationEntry> { self.entries.iter().skip(paging.from).take(paging.size).cloned().collect() }
}

#[async_trait::async_trait]
impl CatalogApi for MockApi {
    fn versions(&self) -> VersionDefaults { self.versions.clone() }

    async fn list(&self, q: ListQuery) -> ShelfResult<ListResult<ApplicationEntry>> {
        Ok(ListResult::with_count(self.page(q.paging), self.entries.len() as u64))
    }

    async fn types(&self) -> ShelfResult<ListResult<String>> { Ok(ListResult::new(self.types.clone())) }

    async fn categories(&self) -> ShelfResult<ListResult<TermBucket>> { Ok(ListResult::new(self.categories.clone())) }

    async fn info(&self, name: &str, _version: &str) -> ShelfResult<ApplicationEntry> {
        if name.is_empty() { return Err(ShelfError::Validation("application name is empty".into())); }
        self.entry(name).cloned().ok_or_else(|| ShelfError::NotFound(format!("application {name}")))
    }

    async fn infos(&self, names: Vec<String>, _version: &str) -> ShelfResult<BTreeMap<String, ApplicationEntry>> {
        Ok(names.iter().filter_map(|n| self.entry(n).map(|e| (n.clone(), e.clone()))).collect())
    }

    async fn exist(&self, name: &str) -> ShelfResult<bool> { Ok(self.entry(name).is_some()) }

    async fn readme(&self, name: &str) -> ShelfResult<Vec<u8>> {
        self.readme.clone().ok_or_else(|| ShelfError::NotFound(format!("README for {name}")))
    }

    async fn search(&self, name: &str, paging: Paging) -> ShelfResult<ListResult<ApplicationEntry>> {
        let hits: Vec<ApplicationEntry> = self.entries.iter().filter(|e| e.name.contains(name)).cloned().collect();
        let total = hits.len() as u64;
        Ok(ListResult::with_count(hits.into_iter().skip(paging.from).take(paging.size).collect(), total))
    }

    async fn top(&self, q: TopQuery) -> ShelfResult<ListResult<ApplicationEntry>> {
        Ok(ListResult::new(self.entries.iter().take(q.size).cloned().collect()))
    }

    async fn update(&self) -> ShelfResult<UpdateSummary> {
        self.update.clone().ok_or_else(|| ShelfError::Unavailable("no update configured".into()))
    }

    async fn count(&self, _name: &str) -> ShelfResult<u64> { Ok(self.counter.fetch_add(1, Ordering::SeqCst) + 1) }

    async fn chart(&self, q: ChartQuery) -> ShelfResult<Chart> {
        self.chart.clone().ok_or_else(|| ShelfError::NotFound(format!("chart for {}", q.name)))
    }

    async fn appstore_info(&self, _paging: Paging, _version: &str) -> ShelfResult<AppStoreInfo> { Ok(self.appstore.clone()) }

    async fn appstore_hash(&self, _paging: Paging, _version: &str) -> ShelfResult<AppStoreHash> {
        Ok(AppStoreHash { hash: self.appstore.stats.hash.clone(), updated_at: String::new() })
    }
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use appshelf_core::{ApplicationEntry, ApplicationRecord};
use appshelf_search::{IndexQuery, MemoryIndex, SearchIndex};
use appshelf_store::{CatalogStore, HistoryWriter, MemoryStore};
use appshelf_sync::{Backoff, IndexSyncer};

async fn seed(store: &Arc<MemoryStore>, n: usize) {
    let w = HistoryWriter::new(store.clone());
    for i in 0..n {
        let e = ApplicationEntry { name: format!("app{i:03}"), version: "1.0.0".into(), last_commit_hash: "h".into(), update_time: i as i64, ..Default::default() };
        w.write(&e).await.unwrap();
    }
}

#[tokio::test]
async fn pages_visit_every_record_once_and_prune_stale_docs() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 25).await;
    let index = Arc::new(MemoryIndex::new());
    index.upsert_document(&ApplicationRecord { name: "gone".into(), ..Default::default() }).await.unwrap();

    let syncer = IndexSyncer::new(store.clone(), index.clone()).with_page_size(10);
    let report = syncer.sync().await.unwrap();
    assert_eq!(report.docs, 25);
    assert_eq!(report.errors, 0);
    assert_eq!(report.removed, 1);
    assert_eq!(index.len(), 25);
    let all = index.query(&IndexQuery::at_revision("h"), 0, 100).await.unwrap();
    assert_eq!(all.total, 25);
    assert_eq!(all.items[0].name, "app024");
    // one seed upsert, one publish per page, one for the prune
    assert_eq!(index.generation(), 5);
}

#[tokio::test]
async fn exact_page_boundary_terminates() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 20).await;
    let index = Arc::new(MemoryIndex::new());
    let report = IndexSyncer::new(store, index.clone()).with_page_size(10).sync().await.unwrap();
    assert_eq!(report.docs, 20);
}

/// Index whose upserts fail for one name.
struct Flaky {
    inner: MemoryIndex,
    bad: &'static str,
}

#[async_trait::async_trait]
impl SearchIndex for Flaky {
    async fn upsert_document(&self, record: &ApplicationRecord) -> Result<()> {
        if record.name == self.bad { anyhow::bail!("rejected") }
        self.inner.upsert_document(record).await
    }
    async fn delete_document(&self, name: &str) -> Result<bool> { self.inner.delete_document(name).await }
    async fn query(&self, q: &IndexQuery, from: usize, size: usize) -> Result<appshelf_search::SearchPage> { self.inner.query(q, from, size).await }
    async fn aggregate_terms(&self, field: appshelf_search::TermField, revision: Option<&str>) -> Result<Vec<appshelf_search::TermBucket>> {
        self.inner.aggregate_terms(field, revision).await
    }
    async fn names(&self) -> Result<Vec<String>> { self.inner.names().await }
}

#[tokio::test]
async fn per_record_failures_do_not_stop_the_pass() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 5).await;
    let index = Arc::new(Flaky { inner: MemoryIndex::new(), bad: "app002" });
    let syncer = IndexSyncer::new(store.clone(), index.clone()).with_backoff(Backoff::doubling(2, Duration::from_millis(1)));
    let report = syncer.sync().await.unwrap();
    assert_eq!((report.docs, report.errors), (4, 1));
    assert_eq!(store.paginate(&Default::default(), 0, 10).await.unwrap().total, 5);
}

/// Index whose upserts never finish.
struct Stalled(MemoryIndex);

#[async_trait::async_trait]
impl SearchIndex for Stalled {
    async fn upsert_document(&self, _record: &ApplicationRecord) -> Result<()> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(())
    }
    async fn delete_document(&self, name: &str) -> Result<bool> { self.0.delete_document(name).await }
    async fn query(&self, q: &IndexQuery, from: usize, size: usize) -> Result<appshelf_search::SearchPage> { self.0.query(q, from, size).await }
    async fn aggregate_terms(&self, field: appshelf_search::TermField, revision: Option<&str>) -> Result<Vec<appshelf_search::TermBucket>> {
        self.0.aggregate_terms(field, revision).await
    }
    async fn names(&self) -> Result<Vec<String>> { self.0.names().await }
}

#[tokio::test]
async fn stalled_index_calls_are_cut_off() {
    let store = Arc::new(MemoryStore::new());
    seed(&store, 5).await;
    let index = Arc::new(Stalled(MemoryIndex::new()));
    let syncer = IndexSyncer::new(store, index).with_page_size(10).with_call_timeout(Duration::from_millis(50));
    let report = tokio::time::timeout(Duration::from_secs(5), syncer.sync()).await.unwrap().unwrap();
    assert_eq!((report.docs, report.errors), (0, 5));
}

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use appshelf_core::{ApplicationRecord, RevisionMarker};
use rustc_hash::FxHashMap;

use crate::{by_popularity, by_recency, CatalogStore, Page, RecordFilter, RecordUpdate, TopFilter, TopItem};

#[derive(Default)]
struct Inner {
    records: FxHashMap<String, ApplicationRecord>,
    counters: FxHashMap<String, u64>,
    revision: Option<RevisionMarker>,
}

/// In-process store used for `:memory:` deployments and tests.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> { self.inner.lock().map_err(|_| anyhow!("memory store lock poisoned")) }

    pub fn len(&self) -> usize { self.inner.lock().map(|g| g.records.len()).unwrap_or(0) }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[async_trait::async_trait]
impl CatalogStore for MemoryStore {
    async fn find(&self, name: &str) -> Result<Option<ApplicationRecord>> { Ok(self.lock()?.records.get(name).cloned()) }

    async fn find_many(&self, names: &[String]) -> Result<Vec<ApplicationRecord>> {
        let g = self.lock()?;
        Ok(names.iter().filter_map(|n| g.records.get(n).cloned()).collect())
    }

    async fn upsert(&self, update: RecordUpdate) -> Result<()> {
        let mut g = self.lock()?;
        let name = update.name.clone();
        let existing = g.records.remove(&name);
        g.records.insert(name, update.apply(existing));
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<bool> { Ok(self.lock()?.records.remove(name).is_some()) }

    async fn paginate(&self, filter: &RecordFilter, skip: usize, limit: usize) -> Result<Page> {
        let g = self.lock()?;
        let mut hits: Vec<&ApplicationRecord> = g.records.values().filter(|r| filter.matches(r)).collect();
        hits.sort_by(|a, b| by_recency(a, b));
        let total = hits.len() as u64;
        let items = hits.into_iter().skip(skip).take(limit).cloned().collect();
        Ok(Page { items, total })
    }

    async fn top(&self, filter: &TopFilter, limit: usize) -> Result<Vec<TopItem>> {
        let g = self.lock()?;
        let mut items: Vec<TopItem> = g
            .records
            .values()
            .filter(|r| filter.matches(r))
            .map(|r| TopItem { record: r.clone(), count: g.counters.get(&r.name).copied().unwrap_or(0) })
            .collect();
        items.sort_by(by_popularity);
        items.truncate(limit);
        Ok(items)
    }

    async fn types(&self) -> Result<Vec<String>> {
        let g = self.lock()?;
        let mut out: Vec<String> = g.records.values().filter_map(|r| r.latest()).map(|e| e.cfg_type.clone()).filter(|t| !t.is_empty()).collect();
        out.sort();
        out.dedup();
        Ok(out)
    }

    async fn init_counter(&self, name: &str) -> Result<()> {
        self.lock()?.counters.entry(name.to_string()).or_insert(0);
        Ok(())
    }

    async fn increment(&self, name: &str) -> Result<u64> {
        let mut g = self.lock()?;
        let c = g.counters.entry(name.to_string()).or_insert(0);
        *c += 1;
        Ok(*c)
    }

    async fn counter(&self, name: &str) -> Result<u64> { Ok(self.lock()?.counters.get(name).copied().unwrap_or(0)) }

    async fn revision(&self) -> Result<Option<RevisionMarker>> { Ok(self.lock()?.revision.clone()) }

    async fn set_revision(&self, marker: RevisionMarker) -> Result<()> {
        self.lock()?.revision = Some(marker);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appshelf_core::{app_id, ApplicationEntry, Labels};

    fn update(name: &str, version: &str, t: i64) -> RecordUpdate {
        let entry = ApplicationEntry { name: name.into(), version: version.into(), cfg_type: "app".into(), update_time: t, ..Default::default() };
        RecordUpdate { id: app_id(name), name: name.into(), app_labels: Labels::new(), entry }
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let s = MemoryStore::new();
        s.upsert(update("a", "1.0.0", 1)).await.unwrap();
        let first = s.find("a").await.unwrap().unwrap();
        s.upsert(update("a", "1.0.0", 1)).await.unwrap();
        assert_eq!(s.find("a").await.unwrap().unwrap(), first);
        assert_eq!(s.len(), 1);
    }

    #[tokio::test]
    async fn paginate_counts_all_and_pages() {
        let s = MemoryStore::new();
        for (i, n) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            s.upsert(update(n, "1.0.0", i as i64)).await.unwrap();
        }
        let p = s.paginate(&RecordFilter::default(), 1, 2).await.unwrap();
        assert_eq!(p.total, 5);
        assert_eq!(p.items.iter().map(|r| r.name.as_str()).collect::<Vec<_>>(), vec!["d", "c"]);
    }

    #[tokio::test]
    async fn counters_and_top() {
        let s = MemoryStore::new();
        for n in ["a", "b", "c"] {
            s.upsert(update(n, "1.0.0", 0)).await.unwrap();
            s.init_counter(n).await.unwrap();
        }
        assert_eq!(s.increment("b").await.unwrap(), 1);
        assert_eq!(s.increment("b").await.unwrap(), 2);
        s.increment("c").await.unwrap();
        s.init_counter("b").await.unwrap();
        assert_eq!(s.counter("b").await.unwrap(), 2);
        let top = s.top(&TopFilter::default(), 2).await.unwrap();
        assert_eq!(top.iter().map(|t| (t.record.name.as_str(), t.count)).collect::<Vec<_>>(), vec![("b", 2), ("c", 1)]);
    }

    #[tokio::test]
    async fn delete_and_revision() {
        let s = MemoryStore::new();
        s.upsert(update("a", "1.0.0", 0)).await.unwrap();
        assert!(s.delete("a").await.unwrap());
        assert!(!s.delete("a").await.unwrap());
        assert!(s.revision().await.unwrap().is_none());
        s.set_revision(RevisionMarker { hash: "h".into(), observed_at: "t".into() }).await.unwrap();
        assert_eq!(s.revision().await.unwrap().unwrap().hash, "h");
        assert_eq!(s.types().await.unwrap(), Vec::<String>::new());
    }
}

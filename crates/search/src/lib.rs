//! Appshelf search: the secondary index contract plus an in-RAM implementation.
//! Documents are whole records keyed by name; filters and ranking read `history.latest`.

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use anyhow::{anyhow, Result};
use appshelf_core::ApplicationRecord;
use arc_swap::ArcSwap;
use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use rustc_hash::FxHashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    /// `updateTime desc, name asc`
    #[default]
    Recency,
    /// fuzzy score desc, then name
    Score,
}

/// Term filters are exact (keyword semantics); `fuzzy` ranks by name similarity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexQuery {
    pub revision: Option<String>,
    pub category: Option<String>,
    pub name: Option<String>,
    pub fuzzy: Option<String>,
    pub sort: SortBy,
}

impl IndexQuery {
    pub fn at_revision(rev: impl Into<String>) -> Self { Self { revision: Some(rev.into()), ..Default::default() } }
    pub fn with_name(mut self, name: impl Into<String>) -> Self { self.name = Some(name.into()); self }
    pub fn with_category(mut self, cat: impl Into<String>) -> Self { self.category = Some(cat.into()); self }
    pub fn with_fuzzy(mut self, term: impl Into<String>) -> Self { self.fuzzy = Some(term.into()); self }
}

#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub items: Vec<ApplicationRecord>,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermField {
    Categories,
    CfgType,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TermBucket {
    pub key: String,
    pub count: u64,
}

/// Search Index collaborator.
#[async_trait::async_trait]
pub trait SearchIndex: Send + Sync {
    async fn upsert_document(&self, record: &ApplicationRecord) -> Result<()>;
    /// Returns whether a document was removed.
    async fn delete_document(&self, name: &str) -> Result<bool>;

    /// Index a batch. An outer error fails the whole batch; otherwise one outcome per record, in order.
    async fn upsert_documents(&self, records: &[ApplicationRecord]) -> Result<Vec<Result<()>>> {
        let mut out = Vec::with_capacity(records.len());
        for r in records { out.push(self.upsert_document(r).await); }
        Ok(out)
    }

    /// Number of documents actually removed.
    async fn delete_documents(&self, names: &[String]) -> Result<usize> {
        let mut removed = 0;
        for n in names {
            if self.delete_document(n).await? { removed += 1; }
        }
        Ok(removed)
    }

    async fn query(&self, q: &IndexQuery, from: usize, size: usize) -> Result<SearchPage>;
    /// Buckets sorted `count desc, key asc`; `revision` narrows the documents counted.
    async fn aggregate_terms(&self, field: TermField, revision: Option<&str>) -> Result<Vec<TermBucket>>;
    /// Every indexed key, sorted.
    async fn names(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOpts {
    pub max_candidates: Option<usize>,
    pub min_score: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
struct Hit { doc: usize, score: i64 }

struct Doc {
    record: Arc<ApplicationRecord>,
    update_time: i64,
    categories: Vec<String>,
    cfg_type: String,
}

/// Read-side view rebuilt on every write. Doc indices follow name order so postings stay sorted.
#[derive(Default)]
struct Snapshot {
    docs: Vec<Doc>,
    by_name: FxHashMap<String, usize>,
    revision_post: FxHashMap<String, Vec<usize>>,
    category_post: FxHashMap<String, Vec<usize>>,
}

impl Snapshot {
    fn build(records: &FxHashMap<String, Arc<ApplicationRecord>>) -> Self {
        let mut names: Vec<&String> = records.keys().collect();
        names.sort();
        let mut snap = Snapshot::default();
        snap.docs.reserve(names.len());
        for name in names {
            let rec = &records[name];
            let i = snap.docs.len();
            let latest = rec.latest();
            let doc = Doc {
                record: rec.clone(),
                update_time: latest.map(|e| e.update_time).unwrap_or(0),
                categories: latest.map(|e| e.categories.clone()).unwrap_or_default(),
                cfg_type: latest.map(|e| e.cfg_type.clone()).unwrap_or_default(),
            };
            if let Some(e) = latest {
                snap.revision_post.entry(e.last_commit_hash.clone()).or_default().push(i);
            }
            for c in doc.categories.iter() {
                let post = snap.category_post.entry(c.clone()).or_default();
                if post.last() != Some(&i) { post.push(i); }
            }
            snap.by_name.insert(name.clone(), i);
            snap.docs.push(doc);
        }
        snap
    }
}

fn intersect_sorted(a: &[usize], b: &[usize]) -> Vec<usize> {
    let mut i = 0usize;
    let mut j = 0usize;
    let mut out = Vec::new();
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => i += 1,
            Ordering::Greater => j += 1,
            Ordering::Equal => { out.push(a[i]); i += 1; j += 1; }
        }
    }
    out
}

fn narrow(cands: Vec<usize>, post: &FxHashMap<String, Vec<usize>>, key: &str) -> Vec<usize> {
    match post.get(key) {
        Some(p) => intersect_sorted(&cands, p),
        None => Vec::new(),
    }
}

/// In-RAM index. Writers serialize on a mutex and publish a fresh snapshot; readers never block.
pub struct MemoryIndex {
    docs: Mutex<FxHashMap<String, Arc<ApplicationRecord>>>,
    snap: ArcSwap<Snapshot>,
    published: AtomicU64,
    opts: SearchOpts,
}

impl Default for MemoryIndex {
    fn default() -> Self { Self::with_opts(SearchOpts::default()) }
}

impl MemoryIndex {
    pub fn new() -> Self { Self::default() }

    pub fn with_opts(opts: SearchOpts) -> Self {
        Self { docs: Mutex::new(FxHashMap::default()), snap: ArcSwap::from_pointee(Snapshot::default()), published: AtomicU64::new(0), opts }
    }

    pub fn len(&self) -> usize { self.snap.load().docs.len() }
    pub fn is_empty(&self) -> bool { self.len() == 0 }
    /// Snapshots published so far.
    pub fn generation(&self) -> u64 { self.published.load(AtomicOrdering::Relaxed) }

    fn lock(&self) -> Result<MutexGuard<'_, FxHashMap<String, Arc<ApplicationRecord>>>> {
        self.docs.lock().map_err(|_| anyhow!("search index lock poisoned"))
    }

    fn publish(&self, docs: &FxHashMap<String, Arc<ApplicationRecord>>) {
        let snap = Snapshot::build(docs);
        metrics::gauge!("index_docs", snap.docs.len() as f64);
        self.snap.store(Arc::new(snap));
        self.published.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn eval(&self, snap: &Snapshot, q: &IndexQuery) -> Vec<Hit> {
        let t0 = Instant::now();
        let mut cands: Vec<usize> = (0..snap.docs.len()).collect();
        let total = cands.len();
        if let Some(rev) = q.revision.as_deref() { cands = narrow(cands, &snap.revision_post, rev); }
        let after_revision = cands.len();
        if let Some(cat) = q.category.as_deref() { cands = narrow(cands, &snap.category_post, cat); }
        let after_category = cands.len();
        if let Some(name) = q.name.as_deref() {
            cands = match snap.by_name.get(name) {
                Some(i) if cands.binary_search(i).is_ok() => vec![*i],
                _ => Vec::new(),
            };
        }
        if let Some(maxc) = self.opts.max_candidates { cands.truncate(maxc); }
        metrics::histogram!("search_candidates", cands.len() as f64);

        let term = q.fuzzy.as_deref().map(str::trim).filter(|t| !t.is_empty());
        let matcher = SkimMatcherV2::default().ignore_case();
        let mut hits: Vec<Hit> = Vec::with_capacity(cands.len());
        for i in cands {
            let score = match term {
                Some(t) => match matcher.fuzzy_match(&snap.docs[i].record.name, t) {
                    Some(s) => s,
                    None => continue,
                },
                None => 0,
            };
            if self.opts.min_score.map(|m| score >= m).unwrap_or(true) { hits.push(Hit { doc: i, score }); }
        }

        let docs = &snap.docs;
        let by_name = |a: &Hit, b: &Hit| docs[a.doc].record.name.cmp(&docs[b.doc].record.name);
        match q.sort {
            SortBy::Recency => hits.sort_by(|a, b| docs[b.doc].update_time.cmp(&docs[a.doc].update_time).then_with(|| by_name(a, b))),
            SortBy::Score => hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| by_name(a, b))),
        }
        debug!(total, after_revision, after_category, hits = hits.len(), "search: evaluated");
        metrics::histogram!("search_eval_ms", t0.elapsed().as_secs_f64() * 1000.0);
        hits
    }
}

#[async_trait::async_trait]
impl SearchIndex for MemoryIndex {
    async fn upsert_document(&self, record: &ApplicationRecord) -> Result<()> {
        let mut g = self.lock()?;
        g.insert(record.name.clone(), Arc::new(record.clone()));
        self.publish(&g);
        Ok(())
    }

    async fn delete_document(&self, name: &str) -> Result<bool> {
        let mut g = self.lock()?;
        let removed = g.remove(name).is_some();
        if removed { self.publish(&g); }
        Ok(removed)
    }

    async fn upsert_documents(&self, records: &[ApplicationRecord]) -> Result<Vec<Result<()>>> {
        let mut g = self.lock()?;
        for r in records { g.insert(r.name.clone(), Arc::new(r.clone())); }
        if !records.is_empty() { self.publish(&g); }
        Ok(records.iter().map(|_| Ok(())).collect())
    }

    async fn delete_documents(&self, names: &[String]) -> Result<usize> {
        let mut g = self.lock()?;
        let removed = names.iter().filter(|n| g.remove(n.as_str()).is_some()).count();
        if removed > 0 { self.publish(&g); }
        Ok(removed)
    }

    async fn query(&self, q: &IndexQuery, from: usize, size: usize) -> Result<SearchPage> {
        let snap = self.snap.load();
        let hits = self.eval(&snap, q);
        let total = hits.len() as u64;
        let items = hits.into_iter().skip(from).take(size).map(|h| snap.docs[h.doc].record.as_ref().clone()).collect();
        Ok(SearchPage { items, total })
    }

    async fn aggregate_terms(&self, field: TermField, revision: Option<&str>) -> Result<Vec<TermBucket>> {
        let snap = self.snap.load();
        let mut counts: FxHashMap<&str, u64> = FxHashMap::default();
        let docs: Box<dyn Iterator<Item = &Doc>> = match revision {
            Some(rev) => Box::new(snap.revision_post.get(rev).into_iter().flatten().map(|i| &snap.docs[*i])),
            None => Box::new(snap.docs.iter()),
        };
        for doc in docs {
            match field {
                TermField::Categories => {
                    let mut seen: Vec<&str> = Vec::new();
                    for c in doc.categories.iter() {
                        if !seen.contains(&c.as_str()) { seen.push(c.as_str()); *counts.entry(c.as_str()).or_default() += 1; }
                    }
                }
                TermField::CfgType => {
                    if !doc.cfg_type.is_empty() { *counts.entry(doc.cfg_type.as_str()).or_default() += 1; }
                }
            }
        }
        let mut out: Vec<TermBucket> = counts.into_iter().map(|(k, v)| TermBucket { key: k.to_string(), count: v }).collect();
        out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
        Ok(out)
    }

    async fn names(&self) -> Result<Vec<String>> {
        Ok(self.snap.load().docs.iter().map(|d| d.record.name.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersect_keeps_common_sorted() {
        assert_eq!(intersect_sorted(&[0, 2, 4, 6], &[1, 2, 3, 6, 9]), vec![2, 6]);
        assert!(intersect_sorted(&[], &[1]).is_empty());
    }

    #[test]
    fn snapshot_orders_docs_by_name() {
        let mut m: FxHashMap<String, Arc<ApplicationRecord>> = FxHashMap::default();
        for n in ["zeta", "alpha", "mid"] {
            m.insert(n.to_string(), Arc::new(ApplicationRecord { name: n.into(), ..Default::default() }));
        }
        let s = Snapshot::build(&m);
        let names: Vec<&str> = s.docs.iter().map(|d| d.record.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
        assert_eq!(s.by_name["zeta"], 2);
        assert!(s.revision_post.is_empty());
    }
}

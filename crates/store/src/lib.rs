//! Appshelf store: the catalog store contract, an in-memory implementation and the History Store Writer.

#![forbid(unsafe_code)]

use std::cmp::Ordering;

use anyhow::Result;
use appshelf_core::{ApplicationEntry, ApplicationRecord, Labels, RevisionMarker, LATEST_KEY};

mod memory;
mod writer;

pub use memory::MemoryStore;
pub use writer::{HistoryWriter, WriteOutcome};

/// Top ranking size when the caller gives none (or an out-of-range one).
pub const DEFAULT_TOP: usize = 10;
pub const MAX_TOP: usize = 2 * DEFAULT_TOP;

/// Filter applied to the `latest` slot of each record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Only records synced from this revision.
    pub revision: Option<String>,
    /// Case-insensitive exact match against one of the categories.
    pub category: Option<String>,
    /// Manifest types; empty means any.
    pub types: Vec<String>,
}

impl RecordFilter {
    pub fn matches(&self, rec: &ApplicationRecord) -> bool {
        let Some(latest) = rec.latest() else { return false };
        if let Some(rev) = &self.revision {
            if &latest.last_commit_hash != rev { return false; }
        }
        if let Some(cat) = &self.category {
            let want = cat.to_lowercase();
            if !latest.categories.iter().any(|c| c.to_lowercase() == want) { return false; }
        }
        self.types.is_empty() || self.types.iter().any(|t| t == &latest.cfg_type)
    }
}

/// `"app,recommend"` -> `["app", "recommend"]`; blanks dropped.
pub fn parse_types(raw: &str) -> Vec<String> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopFilter {
    pub base: RecordFilter,
    /// A record carrying any of these labels is left out.
    pub exclude_labels: Vec<String>,
}

impl TopFilter {
    pub fn matches(&self, rec: &ApplicationRecord) -> bool {
        self.base.matches(rec) && !rec.app_labels.iter().any(|l| self.exclude_labels.contains(l))
    }
}

/// One page of records plus the total number matching the filter.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<ApplicationRecord>,
    pub total: u64,
}

#[derive(Debug, Clone)]
pub struct TopItem {
    pub record: ApplicationRecord,
    pub count: u64,
}

/// Everything one upsert writes: top-level fields plus the `latest` and versioned slots.
#[derive(Debug, Clone)]
pub struct RecordUpdate {
    pub id: String,
    pub name: String,
    pub app_labels: Labels,
    pub entry: ApplicationEntry,
}

impl RecordUpdate {
    /// Fold into the stored record (or a fresh one). Other history slots are kept.
    pub fn apply(self, existing: Option<ApplicationRecord>) -> ApplicationRecord {
        let mut rec = existing.unwrap_or_default();
        rec.id = self.id;
        rec.name = self.name;
        rec.app_labels = self.app_labels;
        if !self.entry.version.is_empty() {
            rec.history.insert(self.entry.version.clone(), self.entry.clone());
        }
        rec.history.insert(LATEST_KEY.to_string(), self.entry);
        rec
    }
}

fn latest_update_time(r: &ApplicationRecord) -> i64 { r.latest().map(|e| e.update_time).unwrap_or(0) }

/// `updateTime desc, name asc`
pub fn by_recency(a: &ApplicationRecord, b: &ApplicationRecord) -> Ordering {
    latest_update_time(b).cmp(&latest_update_time(a)).then_with(|| a.name.cmp(&b.name))
}

/// `count desc, updateTime desc, name asc`
pub fn by_popularity(a: &TopItem, b: &TopItem) -> Ordering {
    b.count.cmp(&a.count).then_with(|| by_recency(&a.record, &b.record))
}

/// Persistent store collaborator. Records are keyed by application name.
#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find(&self, name: &str) -> Result<Option<ApplicationRecord>>;
    async fn find_many(&self, names: &[String]) -> Result<Vec<ApplicationRecord>>;
    /// Create-or-update in one step; replaying the same update yields the same record.
    async fn upsert(&self, update: RecordUpdate) -> Result<()>;
    /// Returns whether a record was removed.
    async fn delete(&self, name: &str) -> Result<bool>;
    /// Sorted by [`by_recency`].
    async fn paginate(&self, filter: &RecordFilter, skip: usize, limit: usize) -> Result<Page>;
    /// Sorted by [`by_popularity`].
    async fn top(&self, filter: &TopFilter, limit: usize) -> Result<Vec<TopItem>>;
    /// Distinct manifest types, sorted.
    async fn types(&self) -> Result<Vec<String>>;
    /// Create a zero counter unless one exists.
    async fn init_counter(&self, name: &str) -> Result<()>;
    /// Create-or-increment; returns the new count.
    async fn increment(&self, name: &str) -> Result<u64>;
    async fn counter(&self, name: &str) -> Result<u64>;
    async fn revision(&self) -> Result<Option<RevisionMarker>>;
    async fn set_revision(&self, marker: RevisionMarker) -> Result<()>;
}

//! History Store Writer: fold freshly built entries into persisted records.

use std::sync::Arc;

use anyhow::{Context, Result};
use appshelf_core::{app_id, ApplicationEntry};
use metrics::counter;
use tracing::{debug, info};

use crate::{CatalogStore, RecordUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Upserted,
    /// The entry carried the `disabled` label; `existed` tells whether a record was removed.
    Disabled { existed: bool },
}

#[derive(Clone)]
pub struct HistoryWriter {
    store: Arc<dyn CatalogStore>,
}

impl HistoryWriter {
    pub fn new(store: Arc<dyn CatalogStore>) -> Self { Self { store } }

    /// Disable or upsert depending on the entry's labels.
    pub async fn write(&self, entry: &ApplicationEntry) -> Result<WriteOutcome> {
        if entry.is_disabled() {
            let existed = self.disable(entry).await?;
            return Ok(WriteOutcome::Disabled { existed });
        }
        self.upsert(entry).await?;
        Ok(WriteOutcome::Upserted)
    }

    /// Write `latest` and the versioned slot together, then make sure a counter exists.
    pub async fn upsert(&self, entry: &ApplicationEntry) -> Result<()> {
        let id = app_id(&entry.name);
        let mut entry = entry.clone();
        entry.id = id.clone();
        entry.app_id = id.clone();
        let name = entry.name.clone();
        let update = RecordUpdate { id, name: name.clone(), app_labels: entry.app_labels.clone(), entry };
        self.store.upsert(update).await.with_context(|| format!("upserting {name}"))?;
        self.store.init_counter(&name).await.with_context(|| format!("initializing counter for {name}"))?;
        counter!("store_upsert_total", 1u64);
        debug!(app = %name, "writer: upserted");
        Ok(())
    }

    /// Remove the whole record; the install counter is left alone.
    pub async fn disable(&self, entry: &ApplicationEntry) -> Result<bool> {
        let existed = self.store.delete(&entry.name).await.with_context(|| format!("deleting {}", entry.name))?;
        counter!("store_disable_total", 1u64);
        info!(app = %entry.name, existed, "writer: disabled app removed");
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use appshelf_core::LABEL_DISABLED;

    fn entry(name: &str, version: &str) -> ApplicationEntry {
        ApplicationEntry { name: name.into(), version: version.into(), app_id: "manifest-id".into(), ..Default::default() }
    }

    #[tokio::test]
    async fn upsert_derives_ids_and_keeps_history() {
        let store = Arc::new(MemoryStore::new());
        let w = HistoryWriter::new(store.clone());
        assert_eq!(w.write(&entry("foo", "1.0.0")).await.unwrap(), WriteOutcome::Upserted);
        assert_eq!(w.write(&entry("foo", "1.1.0")).await.unwrap(), WriteOutcome::Upserted);
        let rec = store.find("foo").await.unwrap().unwrap();
        assert_eq!(rec.id, app_id("foo"));
        let latest = rec.latest().unwrap();
        assert_eq!(latest.version, "1.1.0");
        assert_eq!(latest.app_id, app_id("foo"));
        assert!(rec.history.contains_key(&latest.version));
        assert_eq!(rec.versions().collect::<Vec<_>>(), vec!["1.0.0", "1.1.0"]);
    }

    #[tokio::test]
    async fn replay_is_idempotent_and_counter_survives() {
        let store = Arc::new(MemoryStore::new());
        let w = HistoryWriter::new(store.clone());
        w.write(&entry("foo", "1.0.0")).await.unwrap();
        store.increment("foo").await.unwrap();
        let before = store.find("foo").await.unwrap();
        w.write(&entry("foo", "1.0.0")).await.unwrap();
        assert_eq!(store.find("foo").await.unwrap(), before);
        assert_eq!(store.counter("foo").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn disabled_entry_removes_record() {
        let store = Arc::new(MemoryStore::new());
        let w = HistoryWriter::new(store.clone());
        w.write(&entry("foo", "1.0.0")).await.unwrap();
        let mut off = entry("foo", "1.0.1");
        off.push_label(LABEL_DISABLED);
        assert_eq!(w.write(&off).await.unwrap(), WriteOutcome::Disabled { existed: true });
        assert!(store.find("foo").await.unwrap().is_none());
        assert_eq!(w.write(&off).await.unwrap(), WriteOutcome::Disabled { existed: false });
    }
}

//! Catalog Builder: one pass over the source tree's application directories.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use appshelf_core::ApplicationEntry;
use appshelf_manifest::Reader;
use appshelf_source::{Packager, SourceControl};
use futures::stream::{self, StreamExt};
use metrics::{counter, gauge, histogram};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub charts_dir: PathBuf,
    pub concurrency: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self { Self { charts_dir: PathBuf::from("./charts"), concurrency: 4 } }
}

#[derive(Clone)]
pub struct CatalogBuilder {
    reader: Reader,
    source: Arc<dyn SourceControl>,
    packager: Arc<dyn Packager>,
    cfg: BuilderConfig,
}

fn skip(app: &str, phase: &'static str, err: &anyhow::Error) {
    warn!(app, phase, error = %format!("{err:#}"), "builder: app skipped");
    counter!("catalog_skipped_total", 1u64, "phase" => phase);
}

impl CatalogBuilder {
    pub fn new(reader: Reader, source: Arc<dyn SourceControl>, packager: Arc<dyn Packager>, cfg: BuilderConfig) -> Self {
        Self { reader, source, packager, cfg }
    }

    /// Application directory names under the source root, hidden entries excluded.
    pub async fn app_dirs(&self) -> Result<Vec<String>> {
        let root = self.source.root();
        let mut rd = tokio::fs::read_dir(root).await.with_context(|| format!("listing {}", root.display()))?;
        let mut out = Vec::new();
        while let Some(e) = rd.next_entry().await.with_context(|| format!("listing {}", root.display()))? {
            let name = e.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') { continue; }
            if e.file_type().await.map(|t| t.is_dir()).unwrap_or(false) { out.push(name); }
        }
        out.sort();
        Ok(out)
    }

    /// Only failure to enumerate the root is an error; bad apps are logged and left out.
    pub async fn build(&self, revision: &str) -> Result<Vec<ApplicationEntry>> {
        let t0 = Instant::now();
        let dirs = self.app_dirs().await?;
        let seen = dirs.len();
        let mut entries: Vec<ApplicationEntry> = stream::iter(dirs)
            .map(|dir| self.build_one(dir, revision))
            .buffer_unordered(self.cfg.concurrency.max(1))
            .filter_map(|e| async move { e })
            .collect()
            .await;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let ms = t0.elapsed().as_secs_f64() * 1000.0;
        histogram!("catalog_build_ms", ms);
        gauge!("catalog_entries", entries.len() as f64);
        info!(dirs = seen, built = entries.len(), took_ms = ms as u64, "builder: catalog built");
        Ok(entries)
    }

    /// Read, merge, package and stamp provenance for one directory.
    pub async fn build_one(&self, dir: String, revision: &str) -> Option<ApplicationEntry> {
        let path = self.source.app_dir(&dir);
        let reader = self.reader.clone();
        let read_path = path.clone();
        let mut entry = match tokio::task::spawn_blocking(move || reader.read_app(&read_path)).await {
            Ok(Ok(e)) => e,
            Ok(Err(e)) => { skip(&dir, "read", &e); return None; }
            Err(e) => { skip(&dir, "read", &anyhow::Error::new(e)); return None; }
        };
        match self.packager.package(&path, &self.cfg.charts_dir).await {
            Ok(file) => entry.chart_name = file,
            Err(e) => { skip(&dir, "package", &e); return None; }
        }
        entry.last_commit_hash = revision.to_string();
        entry.create_time = self.source.created_at(&dir).await.unwrap_or_else(|e| {
            warn!(app = %dir, error = %e, "builder: no create time");
            0
        });
        entry.update_time = self.source.last_modified_at(&dir).await.unwrap_or_else(|e| {
            warn!(app = %dir, error = %e, "builder: no update time");
            0
        });
        Some(entry)
    }
}

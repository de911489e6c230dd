//! Scripted collaborators for tests and offline runs: no git, no helm.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};

use crate::{Packager, PullOutcome, PullStrategy, SourceControl};

#[derive(Default)]
struct Script {
    head: String,
    pulls: VecDeque<Result<bool, String>>,
    times: HashMap<String, (i64, i64)>,
}

/// Source control over a plain directory. Pull results are queued by the test;
/// an empty queue means "already up to date".
pub struct ScriptedSource {
    root: PathBuf,
    script: Mutex<Script>,
    pull_calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(root: impl Into<PathBuf>, head: &str) -> Self {
        Self { root: root.into(), script: Mutex::new(Script { head: head.to_string(), ..Default::default() }), pull_calls: AtomicUsize::new(0) }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Script>> { self.script.lock().map_err(|_| anyhow!("scripted source lock poisoned")) }

    /// Move HEAD; the next pull that succeeds reports it.
    pub fn set_head(&self, head: &str) -> Result<()> {
        self.lock()?.head = head.to_string();
        Ok(())
    }

    /// Queue one pull result: `Ok(changed)` or `Err(message)`.
    pub fn push_pull(&self, outcome: Result<bool, String>) -> Result<()> {
        self.lock()?.pulls.push_back(outcome);
        Ok(())
    }

    pub fn set_times(&self, app: &str, created: i64, modified: i64) -> Result<()> {
        self.lock()?.times.insert(app.to_string(), (created, modified));
        Ok(())
    }

    pub fn pull_calls(&self) -> usize { self.pull_calls.load(Ordering::SeqCst) }
}

#[async_trait::async_trait]
impl SourceControl for ScriptedSource {
    fn root(&self) -> &Path { &self.root }

    async fn ensure_clone(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.with_context(|| format!("creating {}", self.root.display()))
    }

    async fn pull(&self) -> Result<PullOutcome> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        match self.lock()?.pulls.pop_front() {
            None => Ok(PullOutcome { changed: false, strategy: PullStrategy::FetchReset }),
            Some(Ok(changed)) => Ok(PullOutcome { changed, strategy: PullStrategy::FetchReset }),
            Some(Err(msg)) => Err(anyhow!(msg).context("all pull strategies failed")),
        }
    }

    async fn current_revision(&self) -> Result<String> { Ok(self.lock()?.head.clone()) }

    async fn created_at(&self, sub: &str) -> Result<i64> {
        self.lock()?.times.get(sub).map(|t| t.0).ok_or_else(|| anyhow!("no commits touch {sub}"))
    }

    async fn last_modified_at(&self, sub: &str) -> Result<i64> {
        self.lock()?.times.get(sub).map(|t| t.1).ok_or_else(|| anyhow!("no commits touch {sub}"))
    }
}

/// Writes `<dir>.tgz` holding the directory name; directories listed in `failing` error out.
#[derive(Default)]
pub struct StubPackager {
    failing: HashSet<String>,
}

impl StubPackager {
    pub fn new() -> Self { Self::default() }
    pub fn failing(names: &[&str]) -> Self { Self { failing: names.iter().map(|s| s.to_string()).collect() } }
}

#[async_trait::async_trait]
impl Packager for StubPackager {
    async fn package(&self, src: &Path, dest: &Path) -> Result<String> {
        let name = src.file_name().map(|n| n.to_string_lossy().into_owned()).ok_or_else(|| anyhow!("no directory name in {}", src.display()))?;
        if self.failing.contains(&name) { bail!("packaging {name} failed"); }
        tokio::fs::create_dir_all(dest).await?;
        let file = format!("{name}.tgz");
        tokio::fs::write(dest.join(&file), format!("chart:{name}")).await?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_pull_queue() {
        let s = ScriptedSource::new("/nonexistent", "h1");
        s.push_pull(Ok(true)).unwrap();
        s.push_pull(Err("offline".into())).unwrap();
        assert!(s.pull().await.unwrap().changed);
        assert!(s.pull().await.is_err());
        assert!(!s.pull().await.unwrap().changed);
        assert_eq!(s.pull_calls(), 3);
        s.set_head("h2").unwrap();
        assert_eq!(s.current_revision().await.unwrap(), "h2");
        assert!(s.created_at("foo").await.is_err());
    }

    #[tokio::test]
    async fn stub_packager_writes_archive() {
        let dir = tempfile::tempdir().unwrap();
        let p = StubPackager::failing(&["bad"]);
        let file = p.package(&dir.path().join("foo"), &dir.path().join("charts")).await.unwrap();
        assert_eq!(file, "foo.tgz");
        assert!(dir.path().join("charts/foo.tgz").exists());
        assert!(p.package(&dir.path().join("bad"), dir.path()).await.is_err());
    }
}

//! Appshelf source: the Source Control and Packaging collaborators.
//! Real implementations shell out to `git` and `helm`; `scripted` provides offline doubles.

#![forbid(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::Result;

pub mod exec;
mod git;
mod helm;
pub mod retry;
pub mod scripted;

pub use git::{GitCli, GitConfig};
pub use helm::{parse_package_output, HelmCli};
pub use retry::Backoff;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PullStrategy {
    /// `git fetch origin <branch>` then `git reset --hard origin/<branch>`
    FetchReset,
    /// plain `git pull`
    Pull,
    /// wipe the checkout and clone again
    Reclone,
}

impl PullStrategy {
    pub const ALL: [PullStrategy; 3] = [PullStrategy::FetchReset, PullStrategy::Pull, PullStrategy::Reclone];

    pub fn as_str(&self) -> &'static str {
        match self {
            PullStrategy::FetchReset => "fetch-reset",
            PullStrategy::Pull => "pull",
            PullStrategy::Reclone => "reclone",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullOutcome {
    pub changed: bool,
    pub strategy: PullStrategy,
}

/// Source Control collaborator. Paths are relative to [`SourceControl::root`].
#[async_trait::async_trait]
pub trait SourceControl: Send + Sync {
    fn root(&self) -> &Path;
    /// Clone when the working directory holds no repository yet.
    async fn ensure_clone(&self) -> Result<()>;
    /// Try the configured strategies in order; "already up to date" is `changed: false`.
    async fn pull(&self) -> Result<PullOutcome>;
    async fn current_revision(&self) -> Result<String>;
    /// Unix seconds of the oldest commit touching `sub`.
    async fn created_at(&self, sub: &str) -> Result<i64>;
    /// Unix seconds of the newest commit touching `sub`.
    async fn last_modified_at(&self, sub: &str) -> Result<i64>;

    async fn read_file(&self, rel: &Path) -> Result<Vec<u8>> {
        let path = self.root().join(rel);
        tokio::fs::read(&path).await.map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))
    }

    fn app_dir(&self, name: &str) -> PathBuf { self.root().join(name) }
}

/// Packaging collaborator: turn an application directory into a chart archive.
#[async_trait::async_trait]
pub trait Packager: Send + Sync {
    /// Returns the archive's file name inside `dest`.
    async fn package(&self, src: &Path, dest: &Path) -> Result<String>;
}

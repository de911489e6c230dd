use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use metrics::counter;
use tracing::{info, warn};

use crate::exec::run_ok;
use crate::{Backoff, PullOutcome, PullStrategy, SourceControl};

#[derive(Debug, Clone)]
pub struct GitConfig {
    pub addr: String,
    pub branch: String,
    pub dir: PathBuf,
    pub timeout: Duration,
}

/// Source control backed by the `git` binary.
pub struct GitCli {
    cfg: GitConfig,
    strategies: Vec<PullStrategy>,
    clone_backoff: Backoff,
}

impl GitCli {
    pub fn new(cfg: GitConfig) -> Self { Self { cfg, strategies: PullStrategy::ALL.to_vec(), clone_backoff: Backoff::default() } }

    pub fn with_strategies(mut self, strategies: Vec<PullStrategy>) -> Self { self.strategies = strategies; self }
    pub fn with_clone_backoff(mut self, backoff: Backoff) -> Self { self.clone_backoff = backoff; self }

    async fn git(&self, args: &[&str]) -> Result<String> {
        let out = run_ok("git", args, Some(&self.cfg.dir), self.cfg.timeout).await.with_context(|| format!("git {}", args.join(" ")))?;
        Ok(out.stdout)
    }

    async fn clone_fresh(&self) -> Result<()> {
        let dir = &self.cfg.dir;
        if tokio::fs::try_exists(dir).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(dir).await.with_context(|| format!("clearing {}", dir.display()))?;
        }
        if let Some(parent) = dir.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.with_context(|| format!("creating {}", parent.display()))?;
        }
        let dir_arg = dir.to_string_lossy();
        info!(addr = %self.cfg.addr, branch = %self.cfg.branch, dir = %dir_arg, "git: clone");
        run_ok("git", ["clone", "--branch", self.cfg.branch.as_str(), self.cfg.addr.as_str(), &*dir_arg], None, self.cfg.timeout)
            .await
            .context("git clone")?;
        Ok(())
    }

    async fn apply(&self, strategy: PullStrategy) -> Result<()> {
        let branch = self.cfg.branch.as_str();
        match strategy {
            PullStrategy::FetchReset => {
                self.git(&["fetch", "origin", branch]).await?;
                self.git(&["reset", "--hard", &format!("origin/{branch}")]).await?;
            }
            PullStrategy::Pull => {
                let out = self.git(&["pull"]).await?;
                if out.contains("Already up to date") { info!("git: already up to date"); }
            }
            PullStrategy::Reclone => self.clone_fresh().await?,
        }
        Ok(())
    }

    async fn log_times(&self, sub: &str, newest_only: bool) -> Result<Vec<i64>> {
        let mut args = vec!["log"];
        if newest_only { args.push("-1"); }
        args.extend(["--pretty=format:%at", "--", sub]);
        let out = self.git(&args).await?;
        let times: Vec<i64> = out.lines().map(str::trim).filter(|l| !l.is_empty()).map(|l| l.parse::<i64>()).collect::<Result<_, _>>()?;
        if times.is_empty() { bail!("no commits touch {sub}"); }
        Ok(times)
    }
}

#[async_trait::async_trait]
impl SourceControl for GitCli {
    fn root(&self) -> &Path { &self.cfg.dir }

    async fn ensure_clone(&self) -> Result<()> {
        if tokio::fs::try_exists(self.cfg.dir.join(".git")).await.unwrap_or(false) { return Ok(()); }
        self.clone_backoff.retry("git clone", || self.clone_fresh()).await
    }

    async fn pull(&self) -> Result<PullOutcome> {
        let before = self.current_revision().await.ok();
        let mut last_err = None;
        for &strategy in self.strategies.iter() {
            match self.apply(strategy).await {
                Ok(()) => {
                    let after = self.current_revision().await?;
                    let changed = before.as_deref() != Some(after.as_str());
                    counter!("sync_pull_strategy_total", 1u64, "strategy" => strategy.as_str());
                    info!(strategy = strategy.as_str(), changed, head = %after, "git: pulled");
                    return Ok(PullOutcome { changed, strategy });
                }
                Err(e) => {
                    warn!(strategy = strategy.as_str(), error = %format!("{e:#}"), "git: pull strategy failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow!("no pull strategy configured")).context("all pull strategies failed"))
    }

    async fn current_revision(&self) -> Result<String> {
        Ok(self.git(&["rev-parse", "HEAD"]).await?.trim().to_string())
    }

    async fn created_at(&self, sub: &str) -> Result<i64> {
        self.log_times(sub, false).await?.last().copied().ok_or_else(|| anyhow!("no commits touch {sub}"))
    }

    async fn last_modified_at(&self, sub: &str) -> Result<i64> {
        self.log_times(sub, true).await?.first().copied().ok_or_else(|| anyhow!("no commits touch {sub}"))
    }
}

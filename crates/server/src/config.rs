use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use appshelf_api::VersionDefaults;
use appshelf_manifest::ReaderConfig;
use appshelf_sync::{BuilderConfig, SyncConfig};
use clap::{ArgAction, Parser};

/// Path of the in-memory store.
pub const MEMORY_DB: &str = ":memory:";

#[derive(Parser, Debug, Clone)]
#[command(name = "appshelfd", version, about = "Appshelf catalog server")]
pub struct Config {
    /// Address the HTTP server binds to
    #[arg(long, env = "APPSHELF_LISTEN", default_value = "0.0.0.0:8081")]
    pub listen: SocketAddr,

    /// Remote of the application source repository
    #[arg(long, env = "APPSHELF_GIT_ADDR", default_value = "https://github.com/Above-Os/terminus-apps.git")]
    pub git_addr: String,

    #[arg(long, env = "APPSHELF_GIT_BRANCH", default_value = "main")]
    pub git_branch: String,

    /// Working tree of the source repository
    #[arg(long, env = "APPSHELF_SOURCE_DIR", default_value = "./app_git")]
    pub source_dir: PathBuf,

    /// Where packaged charts are written
    #[arg(long, env = "APPSHELF_CHARTS_DIR", default_value = "./charts")]
    pub charts_dir: PathBuf,

    /// SQLite file; `:memory:` keeps the catalog in RAM
    #[arg(long, env = "APPSHELF_DB_PATH", default_value = "./appshelf.db")]
    pub db_path: String,

    /// Categories whose apps are disabled (substring match)
    #[arg(long, env = "APPSHELF_DISABLE_CATEGORIES", default_value = "")]
    pub disable_categories: String,

    /// Platform version substituted for `latest`
    #[arg(long, env = "APPSHELF_LATEST_VERSION", default_value = "")]
    pub latest_version: String,

    /// Platform version used when the client sends none
    #[arg(long, env = "APPSHELF_DEFAULT_VERSION", default_value = "1.10.9-0")]
    pub default_version: String,

    #[arg(long, env = "APPSHELF_SYNC_INTERVAL_SECS", default_value_t = 300)]
    pub sync_interval_secs: u64,

    /// Bound for each store call and git/helm subprocess
    #[arg(long, env = "APPSHELF_CALL_TIMEOUT_SECS", default_value_t = 30)]
    pub call_timeout_secs: u64,

    #[arg(long, env = "APPSHELF_BUILD_CONCURRENCY", default_value_t = 4)]
    pub build_concurrency: usize,

    /// Serve what is already stored; never pull or build
    #[arg(long, env = "APPSHELF_NO_SYNC", action = ArgAction::SetTrue)]
    pub no_sync: bool,
}

impl Config {
    pub fn call_timeout(&self) -> Duration { Duration::from_secs(self.call_timeout_secs.max(1)) }

    pub fn reader(&self) -> ReaderConfig { ReaderConfig { disabled_categories: self.disable_categories.clone() } }

    pub fn builder(&self) -> BuilderConfig { BuilderConfig { charts_dir: self.charts_dir.clone(), concurrency: self.build_concurrency.max(1) } }

    pub fn sync(&self) -> SyncConfig {
        SyncConfig { interval: Duration::from_secs(self.sync_interval_secs.max(1)), call_timeout: self.call_timeout() }
    }

    pub fn versions(&self) -> VersionDefaults {
        VersionDefaults { default_version: self.default_version.clone(), latest_version: self.latest_version.clone() }
    }

    pub fn in_memory(&self) -> bool { self.db_path == MEMORY_DB }
}

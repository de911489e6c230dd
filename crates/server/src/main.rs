use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use appshelf_api::{CatalogApi, InProcApi};
use appshelf_manifest::Reader;
use appshelf_persist::SqliteStore;
use appshelf_search::{MemoryIndex, SearchIndex};
use appshelf_server::{router, serve, Config};
use appshelf_source::{GitCli, GitConfig, HelmCli, SourceControl};
use appshelf_store::{CatalogStore, MemoryStore};
use appshelf_sync::{CatalogBuilder, IndexSyncer, Orchestrator};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

fn init_tracing() {
    let env = std::env::var("APPSHELF_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("APPSHELF_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid APPSHELF_METRICS_ADDR; expected host:port");
        }
    }
}

fn open_store(cfg: &Config) -> Result<Arc<dyn CatalogStore>> {
    if cfg.in_memory() {
        info!("store: in-memory");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SqliteStore::open(&cfg.db_path)?;
    info!(path = %cfg.db_path, "store: sqlite");
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cfg = Config::parse();
    info!(listen = %cfg.listen, source = %cfg.source_dir.display(), no_sync = cfg.no_sync, "appshelfd starting");

    tokio::fs::create_dir_all(&cfg.charts_dir).await.with_context(|| format!("creating {}", cfg.charts_dir.display()))?;
    let store = open_store(&cfg)?;
    let index: Arc<dyn SearchIndex> = Arc::new(MemoryIndex::new());
    let source: Arc<dyn SourceControl> = Arc::new(GitCli::new(GitConfig {
        addr: cfg.git_addr.clone(),
        branch: cfg.git_branch.clone(),
        dir: cfg.source_dir.clone(),
        timeout: cfg.call_timeout(),
    }));
    let reader = Reader::new(cfg.reader());
    let cancel = CancellationToken::new();

    let mut api = InProcApi::new(store.clone(), index.clone(), source.clone(), reader.clone(), &cfg.charts_dir, cfg.versions());
    let sync_task = if cfg.no_sync {
        match IndexSyncer::new(store.clone(), index.clone()).with_call_timeout(cfg.call_timeout()).sync().await {
            Ok(r) => info!(docs = r.docs, errors = r.errors, "index loaded from store"),
            Err(e) => warn!(error = %format!("{e:#}"), "initial index load failed"),
        }
        None
    } else {
        let packager = Arc::new(HelmCli::new(cfg.call_timeout()));
        let builder = CatalogBuilder::new(reader, source.clone(), packager, cfg.builder());
        let indexer = IndexSyncer::new(store.clone(), index.clone()).with_call_timeout(cfg.call_timeout());
        let orch = Arc::new(Orchestrator::new(source, store, index, builder, indexer, cfg.sync()));
        api = api.with_orchestrator(orch.clone());
        Some(orch.spawn(cancel.clone()))
    };

    let api: Arc<dyn CatalogApi> = Arc::new(api);
    let mut server = tokio::spawn(serve(cfg.listen, router(api), cancel.clone()));

    let finished = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res { warn!(error = %e, "signal handler failed"); }
            info!("shutdown requested");
            None
        }
        res = &mut server => Some(res),
    };
    cancel.cancel();
    let served = match finished {
        Some(res) => res,
        None => server.await,
    };
    if let Some(task) = sync_task {
        if let Err(e) = task.await { warn!(error = %e, "sync task ended abnormally"); }
    }
    served.context("http task panicked")??;
    info!("appshelfd stopped");
    Ok(())
}

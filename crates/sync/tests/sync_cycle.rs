use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use appshelf_core::resolve::resolve;
use appshelf_manifest::{Reader, ReaderConfig, MANIFEST_FILE};
use appshelf_search::{IndexQuery, MemoryIndex, SearchIndex};
use appshelf_source::scripted::{ScriptedSource, StubPackager};
use appshelf_store::{CatalogStore, MemoryStore};
use appshelf_sync::{Backoff, BuilderConfig, CatalogBuilder, IndexSyncer, Orchestrator, Phase, SyncConfig};
use tokio_util::sync::CancellationToken;

fn manifest(name: &str, version: &str, olares: &str, cats: &str) -> String {
    format!(
        "olaresManifest.type: app\nmetadata:\n  name: {name}\n  version: {version}\n  categories: [{cats}]\nspec:\n  requiredMemory: 512Mi\noptions:\n  dependencies:\n    - name: olares\n      version: \"{olares}\"\n      type: system\n"
    )
}

fn write_app(root: &Path, dir: &str, body: &str) {
    std::fs::create_dir_all(root.join(dir)).unwrap();
    std::fs::write(root.join(dir).join(MANIFEST_FILE), body).unwrap();
}

struct Rig {
    _tmp: tempfile::TempDir,
    root: std::path::PathBuf,
    source: Arc<ScriptedSource>,
    store: Arc<MemoryStore>,
    index: Arc<MemoryIndex>,
    orch: Arc<Orchestrator>,
}

fn rig(disabled: &str, packager: StubPackager) -> Rig {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("src");
    std::fs::create_dir_all(&root).unwrap();
    let source = Arc::new(ScriptedSource::new(&root, "h1"));
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    let builder = CatalogBuilder::new(
        Reader::new(ReaderConfig { disabled_categories: disabled.into() }),
        source.clone(),
        Arc::new(packager),
        BuilderConfig { charts_dir: tmp.path().join("charts"), concurrency: 2 },
    );
    let indexer = IndexSyncer::new(store.clone(), index.clone()).with_backoff(Backoff::doubling(3, Duration::from_millis(5)));
    let orch = Arc::new(Orchestrator::new(source.clone(), store.clone(), index.clone(), builder, indexer, SyncConfig::default()));
    Rig { _tmp: tmp, root, source, store, index, orch }
}

async fn wait_epoch(orch: &Orchestrator, at_least: u64) {
    let mut rx = orch.subscribe_epoch();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|e| *e >= at_least)).await.unwrap().unwrap();
}

#[tokio::test]
async fn builder_skips_bad_apps_and_stamps_provenance() {
    let r = rig("", StubPackager::failing(&["nochart"]));
    for n in ["alpha", "bravo", "charlie", "delta"] {
        write_app(&r.root, n, &manifest(n, "1.0.0", ">=1.0.0", "Utilities"));
    }
    write_app(&r.root, "broken", "metadata: [unclosed");
    write_app(&r.root, ".hidden", &manifest("hidden", "1.0.0", ">=1.0.0", "Utilities"));
    write_app(&r.root, "nochart", &manifest("nochart", "1.0.0", ">=1.0.0", "Utilities"));
    r.source.set_times("alpha", 100, 200).unwrap();

    let builder = CatalogBuilder::new(
        Reader::default(),
        r.source.clone(),
        Arc::new(StubPackager::failing(&["nochart"])),
        BuilderConfig { charts_dir: r.root.join("../charts"), concurrency: 3 },
    );
    let entries = builder.build("rev-1").await.unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "bravo", "charlie", "delta"]);
    let alpha = &entries[0];
    assert_eq!(alpha.chart_name, "alpha.tgz");
    assert_eq!(alpha.last_commit_hash, "rev-1");
    assert_eq!((alpha.create_time, alpha.update_time), (100, 200));
    assert_eq!(alpha.required_memory, "536870912");
    assert_eq!(entries[1].create_time, 0);
}

#[tokio::test]
async fn builder_fails_only_when_root_is_unreadable() {
    let tmp = tempfile::tempdir().unwrap();
    let source = Arc::new(ScriptedSource::new(tmp.path().join("missing"), "h"));
    let builder = CatalogBuilder::new(Reader::default(), source, Arc::new(StubPackager::new()), BuilderConfig::default());
    assert!(builder.build("h").await.is_err());
}

#[tokio::test]
async fn cycles_write_history_and_reindex() {
    let r = rig("", StubPackager::new());
    write_app(&r.root, "foo", &manifest("foo", "1.0.0", ">=1.0.0", "Utilities"));

    let report = r.orch.startup().await.unwrap();
    assert_eq!((report.built, report.written, report.failed), (1, 1, 0));
    assert_eq!(r.orch.phase(), Phase::Idle);
    assert_eq!(r.store.revision().await.unwrap().unwrap().hash, "h1");
    wait_epoch(&r.orch, 1).await;
    let hits = r.index.query(&IndexQuery::at_revision("h1").with_name("foo"), 0, 1).await.unwrap();
    assert_eq!(hits.total, 1);

    // second version lands upstream
    write_app(&r.root, "foo", &manifest("foo", "2.0.0", ">=2.0.0", "Utilities"));
    r.source.set_head("h2").unwrap();
    r.source.push_pull(Ok(true)).unwrap();
    let report = r.orch.run_cycle(false).await.unwrap();
    assert!(report.changed && !report.skipped);
    wait_epoch(&r.orch, 2).await;

    let rec = r.store.find("foo").await.unwrap().unwrap();
    assert_eq!(resolve(&rec, "1.5.0").unwrap().version, "1.0.0");
    assert_eq!(resolve(&rec, "2.5.0").unwrap().version, "2.0.0");
    assert_eq!(rec.latest().unwrap().last_commit_hash, "h2");
}

#[tokio::test]
async fn unchanged_pull_only_refreshes_revision_unless_forced() {
    let r = rig("", StubPackager::new());
    write_app(&r.root, "foo", &manifest("foo", "1.0.0", ">=1.0.0", "Utilities"));
    let report = r.orch.run_cycle(false).await.unwrap();
    assert!(report.skipped);
    assert_eq!(report.built, 0);
    assert!(r.store.find("foo").await.unwrap().is_none());
    assert_eq!(r.store.revision().await.unwrap().unwrap().hash, "h1");

    let report = r.orch.run_cycle(true).await.unwrap();
    assert!(!report.skipped);
    assert_eq!(report.written, 1);
}

#[tokio::test]
async fn failed_pull_aborts_cycle() {
    let r = rig("", StubPackager::new());
    write_app(&r.root, "foo", &manifest("foo", "1.0.0", ">=1.0.0", "Utilities"));
    r.source.push_pull(Err("network down".into())).unwrap();
    assert!(r.orch.run_cycle(true).await.is_err());
    assert_eq!(r.orch.phase(), Phase::Idle);
    assert!(r.store.revision().await.unwrap().is_none());
    assert!(r.store.find("foo").await.unwrap().is_none());
}

#[tokio::test]
async fn disabled_category_removes_record_and_document() {
    let r = rig("Game,Adult", StubPackager::new());
    write_app(&r.root, "chess", &manifest("chess", "1.0.0", ">=1.0.0", "Utilities"));
    r.orch.run_cycle(true).await.unwrap();
    wait_epoch(&r.orch, 1).await;
    assert_eq!(r.index.len(), 1);

    write_app(&r.root, "chess", &manifest("chess", "1.1.0", ">=1.0.0", "Game"));
    let report = r.orch.run_cycle(true).await.unwrap();
    assert_eq!(report.disabled, 1);
    wait_epoch(&r.orch, 2).await;
    assert!(r.store.find("chess").await.unwrap().is_none());
    assert!(r.index.is_empty());
}

#[tokio::test]
async fn loop_stops_on_cancel() {
    let r = rig("", StubPackager::new());
    write_app(&r.root, "foo", &manifest("foo", "1.0.0", ">=1.0.0", "Utilities"));
    let cancel = CancellationToken::new();
    let handle = r.orch.clone().spawn(cancel.clone());
    wait_epoch(&r.orch, 1).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap();
    assert!(r.store.find("foo").await.unwrap().is_some());
    assert_eq!(r.source.pull_calls(), 1);
}

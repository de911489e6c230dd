use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use appshelf_api::{CatalogApi, InProcApi, VersionDefaults};
use appshelf_manifest::{Reader, ReaderConfig, MANIFEST_FILE};
use appshelf_search::MemoryIndex;
use appshelf_server::router;
use appshelf_source::scripted::{ScriptedSource, StubPackager};
use appshelf_store::MemoryStore;
use appshelf_sync::{BuilderConfig, CatalogBuilder, IndexSyncer, Orchestrator, SyncConfig};
use serde_json::Value;

fn write_manifest(root: &Path, name: &str, version: &str, olares: &str) {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    let body = format!(
        "olaresManifest.type: app\nmetadata:\n  name: {name}\n  version: {version}\n  title: Foo\n  categories: [Utilities]\noptions:\n  dependencies:\n    - name: olares\n      version: \"{olares}\"\n      type: system\n"
    );
    std::fs::write(dir.join(MANIFEST_FILE), body).unwrap();
}

async fn wait_epoch(orch: &Orchestrator, at_least: u64) {
    let mut rx = orch.subscribe_epoch();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|e| *e >= at_least)).await.unwrap().unwrap();
}

async fn info_version(base: &str, name: &str, version: &str) -> String {
    let body: Value = reqwest::get(format!("{base}/applications/info/{name}?version={version}")).await.unwrap().json().await.unwrap();
    assert_eq!(body["code"], 0, "{body}");
    body["data"]["version"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn sync_then_resolve_by_platform_version() {
    let tmp = tempfile::tempdir().unwrap();
    let root = tmp.path().join("src");
    let charts = tmp.path().join("charts");
    write_manifest(&root, "foo", "1.0.0", ">=1.0.0");
    std::fs::write(root.join("foo").join("README.md"), "# foo").unwrap();

    let source = Arc::new(ScriptedSource::new(&root, "h1"));
    let store = Arc::new(MemoryStore::new());
    let index = Arc::new(MemoryIndex::new());
    let reader = Reader::new(ReaderConfig::default());
    let builder = CatalogBuilder::new(reader.clone(), source.clone(), Arc::new(StubPackager::new()), BuilderConfig { charts_dir: charts.clone(), concurrency: 2 });
    let indexer = IndexSyncer::new(store.clone(), index.clone());
    let orch = Arc::new(Orchestrator::new(source.clone(), store.clone(), index.clone(), builder, indexer, SyncConfig::default()));
    let api = InProcApi::new(store.clone(), index.clone(), source.clone(), reader, &charts, VersionDefaults::default()).with_orchestrator(orch.clone());
    let api: Arc<dyn CatalogApi> = Arc::new(api);

    let report = orch.startup().await.unwrap();
    assert_eq!(report.written, 1);
    wait_epoch(&orch, 1).await;

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(api);
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    let base = format!("http://{addr}/app-store-server/v1");

    assert_eq!(info_version(&base, "foo", "1.5.0").await, "1.0.0");

    write_manifest(&root, "foo", "2.0.0", ">=2.0.0");
    source.set_head("h2").unwrap();
    source.push_pull(Ok(true)).unwrap();
    let body: Value = reqwest::Client::new().post(format!("{base}/applications/update")).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["data"]["revision"], "h2");
    assert_eq!(body["data"]["written"], 1);
    wait_epoch(&orch, 2).await;

    assert_eq!(info_version(&base, "foo", "2.5.0").await, "2.0.0");
    assert_eq!(info_version(&base, "foo", "1.5.0").await, "1.0.0");

    let body: Value = reqwest::get(format!("{base}/applications?version=1.5.0")).await.unwrap().json().await.unwrap();
    assert_eq!(body["data"]["totalCount"], 1);
    assert_eq!(body["data"]["items"][0]["version"], "1.0.0");

    let resp = reqwest::get(format!("{base}/applications/foo?version=2.5.0")).await.unwrap();
    assert!(resp.status().is_success());
    assert_eq!(resp.bytes().await.unwrap().as_ref(), b"chart:foo");

    let readme = reqwest::get(format!("{base}/applications/foo/README.md")).await.unwrap().text().await.unwrap();
    assert_eq!(readme, "# foo");

    let body: Value = reqwest::get(format!("{base}/applications/search/fo")).await.unwrap().json().await.unwrap();
    assert_eq!(body["data"]["items"][0]["name"], "foo");

    let resp = reqwest::get(format!("{base}/applications/info/foo?version=garbage")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    server.abort();
}

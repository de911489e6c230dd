use appshelf_core::{ApplicationEntry, ApplicationRecord};
use appshelf_search::{IndexQuery, MemoryIndex, SearchIndex, SearchOpts, SortBy, TermBucket, TermField};

fn rec(name: &str, rev: &str, cats: &[&str], t: i64) -> ApplicationRecord {
    let e = ApplicationEntry {
        name: name.into(),
        version: "1.0.0".into(),
        cfg_type: "app".into(),
        categories: cats.iter().map(|s| s.to_string()).collect(),
        last_commit_hash: rev.into(),
        update_time: t,
        ..Default::default()
    };
    ApplicationRecord::from_entry(&e)
}

async fn seeded() -> MemoryIndex {
    let idx = MemoryIndex::new();
    idx.upsert_document(&rec("firefox", "h1", &["Browser", "Utilities"], 10)).await.unwrap();
    idx.upsert_document(&rec("filebrowser", "h1", &["Utilities"], 30)).await.unwrap();
    idx.upsert_document(&rec("jellyfin", "h1", &["Entertainment"], 20)).await.unwrap();
    idx.upsert_document(&rec("stale", "h0", &["Utilities"], 99)).await.unwrap();
    idx
}

fn names(p: &appshelf_search::SearchPage) -> Vec<&str> { p.items.iter().map(|r| r.name.as_str()).collect() }

#[tokio::test]
async fn revision_and_category_terms_sort_by_recency() {
    let idx = seeded().await;
    let p = idx.query(&IndexQuery::at_revision("h1").with_category("Utilities"), 0, 10).await.unwrap();
    assert_eq!(p.total, 2);
    assert_eq!(names(&p), vec!["filebrowser", "firefox"]);
    // keyword terms are exact
    let p = idx.query(&IndexQuery::at_revision("h1").with_category("utilities"), 0, 10).await.unwrap();
    assert_eq!(p.total, 0);
}

#[tokio::test]
async fn exact_name_respects_revision() {
    let idx = seeded().await;
    let p = idx.query(&IndexQuery::at_revision("h1").with_name("jellyfin"), 0, 1).await.unwrap();
    assert_eq!(names(&p), vec!["jellyfin"]);
    let p = idx.query(&IndexQuery::at_revision("h1").with_name("stale"), 0, 1).await.unwrap();
    assert!(p.items.is_empty());
}

#[tokio::test]
async fn fuzzy_name_with_paging_and_total() {
    let idx = seeded().await;
    let q = IndexQuery::at_revision("h1").with_fuzzy("FIREF");
    let all = idx.query(&q, 0, 10).await.unwrap();
    assert_eq!(names(&all), vec!["firefox"]);

    let q = IndexQuery::at_revision("h1").with_fuzzy("f");
    let first = idx.query(&q, 0, 1).await.unwrap();
    let second = idx.query(&q, 1, 1).await.unwrap();
    assert_eq!(first.total, 3);
    assert_eq!(second.total, 3);
    assert_eq!(names(&first), vec!["filebrowser"]);
    assert_eq!(names(&second), vec!["jellyfin"]);

    let q = IndexQuery { sort: SortBy::Score, ..IndexQuery::at_revision("h1").with_fuzzy("firefox") };
    assert_eq!(names(&idx.query(&q, 0, 10).await.unwrap())[0], "firefox");
}

#[tokio::test]
async fn min_score_and_candidate_cap() {
    let idx = MemoryIndex::with_opts(SearchOpts { max_candidates: Some(1), min_score: None });
    idx.upsert_document(&rec("a", "h", &[], 1)).await.unwrap();
    idx.upsert_document(&rec("b", "h", &[], 2)).await.unwrap();
    let p = idx.query(&IndexQuery::default(), 0, 10).await.unwrap();
    assert_eq!(names(&p), vec!["a"]);

    let idx = MemoryIndex::with_opts(SearchOpts { max_candidates: None, min_score: Some(i64::MAX) });
    idx.upsert_document(&rec("a", "h", &[], 1)).await.unwrap();
    assert_eq!(idx.query(&IndexQuery::default().with_fuzzy("a"), 0, 10).await.unwrap().total, 0);
}

#[tokio::test]
async fn upsert_replaces_and_delete_removes() {
    let idx = seeded().await;
    idx.upsert_document(&rec("firefox", "h2", &["Browser"], 50)).await.unwrap();
    assert_eq!(idx.len(), 4);
    let p = idx.query(&IndexQuery::at_revision("h2"), 0, 10).await.unwrap();
    assert_eq!(names(&p), vec!["firefox"]);
    assert!(idx.delete_document("firefox").await.unwrap());
    assert!(!idx.delete_document("firefox").await.unwrap());
    assert_eq!(idx.names().await.unwrap(), vec!["filebrowser", "jellyfin", "stale"]);
}

#[tokio::test]
async fn terms_aggregation_counts_per_revision() {
    let idx = seeded().await;
    let got = idx.aggregate_terms(TermField::Categories, Some("h1")).await.unwrap();
    let b = |k: &str, c: u64| TermBucket { key: k.into(), count: c };
    assert_eq!(got, vec![b("Utilities", 2), b("Browser", 1), b("Entertainment", 1)]);
    let all = idx.aggregate_terms(TermField::Categories, None).await.unwrap();
    assert_eq!(all[0], b("Utilities", 3));
    let types = idx.aggregate_terms(TermField::CfgType, Some("h1")).await.unwrap();
    assert_eq!(types, vec![b("app", 3)]);
    assert!(idx.aggregate_terms(TermField::Categories, Some("nope")).await.unwrap().is_empty());
}

#[tokio::test]
async fn batches_publish_one_snapshot() {
    let idx = MemoryIndex::new();
    let batch: Vec<ApplicationRecord> = (0..50).map(|i| rec(&format!("app{i:02}"), "h1", &["Utilities"], i)).collect();
    let outcomes = idx.upsert_documents(&batch).await.unwrap();
    assert_eq!(outcomes.len(), 50);
    assert!(outcomes.iter().all(|o| o.is_ok()));
    assert_eq!(idx.generation(), 1);
    assert_eq!(idx.len(), 50);
    assert_eq!(idx.query(&IndexQuery::at_revision("h1"), 0, 1).await.unwrap().items[0].name, "app49");

    let gone = vec!["app00".to_string(), "app01".to_string(), "nope".to_string()];
    assert_eq!(idx.delete_documents(&gone).await.unwrap(), 2);
    assert_eq!(idx.generation(), 2);
    assert_eq!(idx.delete_documents(&gone).await.unwrap(), 0);
    assert_eq!(idx.generation(), 2);
    assert!(idx.upsert_documents(&[]).await.unwrap().is_empty());
    assert_eq!(idx.generation(), 2);
}

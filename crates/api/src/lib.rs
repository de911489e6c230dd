//! Appshelf API façade.
//!
//! Typed catalog operations the HTTP surface depends on, with an in-process
//! implementation over the store, index and source tree, plus a canned mock.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use appshelf_core::resolve::ResolveError;
use appshelf_core::ApplicationEntry;
use appshelf_search::TermBucket;
use serde::{Deserialize, Serialize};

mod inproc;
mod mock;

pub use inproc::InProcApi;
pub use mock::MockApi;

pub const DEFAULT_PAGE: usize = 1;
pub const DEFAULT_PAGE_SIZE: usize = 100;
pub const README_FILE: &str = "README.md";
/// Tops considered by the v2 appstore payload.
pub const APPSTORE_TOP_LIMIT: usize = 10_000;

/// API errors; each maps to one HTTP status.
#[derive(Debug, thiserror::Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum ShelfError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type ShelfResult<T> = Result<T, ShelfError>;

impl From<ResolveError> for ShelfError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::InvalidPlatformVersion(_) => ShelfError::Validation(e.to_string()),
            ResolveError::InvalidConstraint { .. } => ShelfError::Internal(e.to_string()),
            ResolveError::NoMatch { .. } => ShelfError::NotFound(e.to_string()),
        }
    }
}

/// `{items, totalItems, totalCount}`; `totalCount` only when the source knows it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ListResult<T> {
    pub items: Vec<T>,
    pub total_items: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_count: Option<u64>,
}

impl<T> ListResult<T> {
    pub fn new(items: Vec<T>) -> Self { Self { total_items: items.len(), items, total_count: None } }
    pub fn with_count(items: Vec<T>, count: u64) -> Self { Self { total_items: items.len(), items, total_count: Some(count) } }
}

/// Offset paging derived from `page`/`size` query strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub from: usize,
    pub size: usize,
}

impl Default for Paging {
    fn default() -> Self { Self { from: 0, size: DEFAULT_PAGE_SIZE } }
}

impl Paging {
    /// Unparsable or non-positive values fall back to page 1 / size 100.
    pub fn parse(page: Option<&str>, size: Option<&str>) -> Self {
        let positive = |raw: Option<&str>, default: usize| raw.and_then(|s| s.trim().parse::<i64>().ok()).filter(|n| *n >= 1).map(|n| n as usize).unwrap_or(default);
        let page = positive(page, DEFAULT_PAGE);
        let size = positive(size, DEFAULT_PAGE_SIZE);
        Self { from: (page - 1).saturating_mul(size), size }
    }
}

/// Top size outside `1..=MAX_TOP` becomes `DEFAULT_TOP`.
pub fn top_size(raw: Option<&str>) -> usize {
    raw.and_then(|s| s.trim().parse::<usize>().ok())
        .filter(|n| (1..=appshelf_store::MAX_TOP).contains(n))
        .unwrap_or(appshelf_store::DEFAULT_TOP)
}

/// Comma list with blanks dropped.
pub fn split_list(raw: Option<&str>) -> Vec<String> { raw.map(appshelf_store::parse_types).unwrap_or_default() }

/// Platform version substitution applied to every `version` parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDefaults {
    /// Used when the client sends nothing or `undefined`.
    pub default_version: String,
    /// Substituted for the literal `latest`.
    pub latest_version: String,
}

impl Default for VersionDefaults {
    fn default() -> Self { Self { default_version: "1.10.9-0".into(), latest_version: String::new() } }
}

impl VersionDefaults {
    pub fn normalize(&self, raw: Option<&str>) -> String {
        match raw.map(str::trim) {
            None | Some("") | Some("undefined") => self.default_version.clone(),
            Some("latest") => self.latest_version.clone(),
            Some(v) => v.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    pub paging: Paging,
    pub category: Option<String>,
    pub types: Vec<String>,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopQuery {
    pub category: Option<String>,
    pub types: Vec<String>,
    pub excluded_labels: Vec<String>,
    pub size: usize,
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChartQuery {
    pub name: String,
    pub version: String,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chart {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Result of a forced sync cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSummary {
    pub revision: String,
    pub changed: bool,
    pub built: usize,
    pub written: usize,
    pub disabled: usize,
    pub failed: usize,
}

impl From<appshelf_sync::CycleReport> for UpdateSummary {
    fn from(r: appshelf_sync::CycleReport) -> Self {
        Self { revision: r.revision, changed: r.changed, built: r.built, written: r.written, disabled: r.disabled, failed: r.failed }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TopRank {
    pub app_id: String,
    pub rank: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppStoreStats {
    /// Records at the current revision before version filtering.
    pub total_apps: u64,
    pub total_items: u64,
    pub hash: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppStoreInfo {
    pub apps: Vec<ApplicationEntry>,
    pub tops: Vec<TopRank>,
    pub stats: AppStoreStats,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppStoreHash {
    pub hash: String,
    pub updated_at: String,
}

/// Name must be a plain file name: `[A-Za-z0-9._-]+`, not `.` or `..`.
pub fn valid_file_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Catalog operations behind the HTTP surface.
#[async_trait::async_trait]
pub trait CatalogApi: Send + Sync {
    fn versions(&self) -> VersionDefaults;

    /// Page of records at the current revision, each resolved for `version`.
    async fn list(&self, q: ListQuery) -> ShelfResult<ListResult<ApplicationEntry>>;

    /// Distinct manifest types.
    async fn types(&self) -> ShelfResult<ListResult<String>>;

    /// Category buckets at the current revision.
    async fn categories(&self) -> ShelfResult<ListResult<TermBucket>>;

    /// One application resolved for `version`; falls back to `latest`.
    async fn info(&self, name: &str, version: &str) -> ShelfResult<ApplicationEntry>;

    /// Batch resolve keyed by name; unknown names are left out.
    async fn infos(&self, names: Vec<String>, version: &str) -> ShelfResult<BTreeMap<String, ApplicationEntry>>;

    async fn exist(&self, name: &str) -> ShelfResult<bool>;

    async fn readme(&self, name: &str) -> ShelfResult<Vec<u8>>;

    /// Fuzzy name search at the current revision.
    async fn search(&self, name: &str, paging: Paging) -> ShelfResult<ListResult<ApplicationEntry>>;

    /// Most installed applications.
    async fn top(&self, q: TopQuery) -> ShelfResult<ListResult<ApplicationEntry>>;

    /// Force a sync cycle and wait for it.
    async fn update(&self) -> ShelfResult<UpdateSummary>;

    /// Bump the install counter; returns the new value.
    async fn count(&self, name: &str) -> ShelfResult<u64>;

    async fn chart(&self, q: ChartQuery) -> ShelfResult<Chart>;

    /// Apps on a page that have an entry satisfying `version`, the ranking, and a content hash.
    async fn appstore_info(&self, paging: Paging, version: &str) -> ShelfResult<AppStoreInfo>;

    async fn appstore_hash(&self, paging: Paging, version: &str) -> ShelfResult<AppStoreHash>;
}

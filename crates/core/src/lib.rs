//! Appshelf core types: catalog entries, persisted records, counters and the revision marker.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub mod quantity;
pub mod resolve;

/// History slot that always mirrors the most recently synced entry.
pub const LATEST_KEY: &str = "latest";

pub const LABEL_DISABLED: &str = "disabled";
pub const LABEL_REMOVE: &str = "remove";
pub const LABEL_SUSPEND: &str = "suspend";
pub const LABEL_NSFW: &str = "nsfw";

/// Dependency that carries the platform-compatibility constraint.
pub const PLATFORM_DEPENDENCY: &str = "olares";
pub const SYSTEM_DEPENDENCY_TYPE: &str = "system";

pub type Labels = SmallVec<[String; 4]>;

/// Short stable id derived from an application name (first 8 hex chars of its MD5).
pub fn app_id(name: &str) -> String {
    let mut hex = format!("{:x}", md5::compute(name.as_bytes()));
    hex.truncate(8);
    hex
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SupportClient {
    pub chrome: String,
    pub edge: String,
    pub android: String,
    pub ios: String,
    pub windows: String,
    pub mac: String,
    pub linux: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct SysDataCfg {
    pub group: String,
    pub data_type: String,
    pub version: String,
    pub ops: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Permission {
    pub app_data: bool,
    pub app_cache: bool,
    pub user_data: Vec<String>,
    pub sys_data: Vec<SysDataCfg>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Entrance {
    pub name: String,
    pub host: String,
    pub port: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub icon: String,
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub auth_level: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub invisible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Policy {
    pub entrance_name: String,
    pub description: String,
    pub uri_regex: String,
    pub level: String,
    pub one_time: bool,
    pub valid_duration: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Analytics {
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Dependency {
    pub name: String,
    /// Semantic-version constraint (range expression).
    pub version: String,
    /// `system` or `application`.
    #[serde(rename = "type")]
    pub kind: String,
}

impl Dependency {
    pub fn is_platform(&self) -> bool {
        self.name == PLATFORM_DEPENDENCY && self.kind == SYSTEM_DEPENDENCY_TYPE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct AppScope {
    pub cluster_scoped: bool,
    pub app_ref: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WsConfig {
    pub port: i32,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct Options {
    pub policies: Vec<Policy>,
    pub analytics: Option<Analytics>,
    pub dependencies: Vec<Dependency>,
    pub app_scope: Option<AppScope>,
    #[serde(rename = "websocket")]
    pub ws_config: Option<WsConfig>,
    pub mobile_supported: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TextAndUrl {
    pub text: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct I18nEntrance {
    pub name: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct I18nMetadata {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct I18nSpec {
    pub full_description: String,
    pub upgrade_description: String,
}

/// Translated bundle for one locale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct I18n {
    pub metadata: I18nMetadata,
    pub entrances: Vec<I18nEntrance>,
    pub spec: I18nSpec,
}

/// One concrete version of one application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ApplicationEntry {
    pub id: String,
    pub name: String,
    pub cfg_type: String,
    pub chart_name: String,
    pub icon: String,
    #[serde(rename = "desc")]
    pub description: String,
    #[serde(rename = "appid")]
    pub app_id: String,
    pub title: String,
    pub version: String,
    pub categories: Vec<String>,
    pub version_name: String,

    pub full_description: String,
    pub upgrade_description: String,
    pub promote_image: Vec<String>,
    pub promote_video: String,
    pub sub_category: String,
    pub locale: Vec<String>,
    pub developer: String,
    pub required_memory: String,
    pub required_disk: String,
    pub support_client: SupportClient,
    pub support_arch: Vec<String>,
    pub required_gpu: String,
    pub required_cpu: String,
    pub rating: f32,
    pub target: String,
    pub permission: Permission,
    pub entrances: Vec<Entrance>,
    /// Middleware requirements; shape is owned by the platform, kept opaque here.
    pub middleware: Option<serde_json::Value>,
    pub options: Options,

    pub submitter: String,
    pub doc: String,
    pub website: String,
    pub featured_image: String,
    pub source_code: String,
    pub license: Vec<TextAndUrl>,
    pub legal: Vec<TextAndUrl>,
    pub i18n: BTreeMap<String, I18n>,
    pub model_size: String,
    pub namespace: String,
    pub only_admin: bool,

    pub last_commit_hash: String,
    pub create_time: i64,
    pub update_time: i64,
    pub app_labels: Labels,
}

impl ApplicationEntry {
    pub fn has_label(&self, label: &str) -> bool { self.app_labels.iter().any(|l| l == label) }

    /// Append a label unless it is already present.
    pub fn push_label(&mut self, label: &str) {
        if !self.has_label(label) { self.app_labels.push(label.to_string()); }
    }

    pub fn is_disabled(&self) -> bool { self.has_label(LABEL_DISABLED) }

    /// Platform-compatibility constraints declared by this entry.
    pub fn platform_constraints(&self) -> impl Iterator<Item = &str> {
        self.options.dependencies.iter().filter(|d| d.is_platform()).map(|d| d.version.as_str())
    }
}

/// One application's full, multi-version history as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct ApplicationRecord {
    pub id: String,
    pub name: String,
    pub app_labels: Labels,
    /// Version tag -> entry. Ordered so every scan over it is deterministic.
    pub history: BTreeMap<String, ApplicationEntry>,
}

impl ApplicationRecord {
    /// Pack a freshly built entry: `latest` and its own version slot carry the same fields.
    pub fn from_entry(entry: &ApplicationEntry) -> Self {
        let mut history = BTreeMap::new();
        history.insert(LATEST_KEY.to_string(), entry.clone());
        if !entry.version.is_empty() {
            history.insert(entry.version.clone(), entry.clone());
        }
        Self { id: app_id(&entry.name), name: entry.name.clone(), app_labels: entry.app_labels.clone(), history }
    }

    pub fn latest(&self) -> Option<&ApplicationEntry> { self.history.get(LATEST_KEY) }

    pub fn is_disabled(&self) -> bool { self.app_labels.iter().any(|l| l == LABEL_DISABLED) }

    /// Concrete version keys (everything except `latest`).
    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.history.keys().map(|k| k.as_str()).filter(|k| *k != LATEST_KEY)
    }
}

/// Last observed source-tree revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RevisionMarker {
    pub hash: String,
    /// RFC 3339 timestamp of the observation.
    pub observed_at: String,
}

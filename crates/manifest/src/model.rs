//! `app.cfg` manifest shape and its projection onto a catalog entry.

use appshelf_core::{ApplicationEntry, Entrance, Options, Permission, SupportClient, TextAndUrl};
use serde::{Deserialize, Deserializer, Serialize};

/// Accept any YAML scalar where a string is expected (`version: 1.0`, `requiredCpu: 1`).
fn scalar<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        S(String),
        I(i64),
        F(f64),
        B(bool),
    }
    Ok(match Option::<Scalar>::deserialize(d)? {
        Some(Scalar::S(s)) => s,
        Some(Scalar::I(i)) => i.to_string(),
        Some(Scalar::F(f)) => f.to_string(),
        Some(Scalar::B(b)) => b.to_string(),
        None => String::new(),
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppMetaData {
    pub name: String,
    pub icon: String,
    pub description: String,
    pub appid: String,
    pub title: String,
    #[serde(deserialize_with = "scalar")]
    pub version: String,
    pub categories: Vec<String>,
    pub rating: f32,
    pub target: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppSpec {
    #[serde(deserialize_with = "scalar")]
    pub version_name: String,
    pub full_description: String,
    pub upgrade_description: String,
    pub promote_image: Vec<String>,
    pub promote_video: String,
    pub sub_category: String,
    pub locale: Vec<String>,
    pub developer: String,
    #[serde(deserialize_with = "scalar")]
    pub required_memory: String,
    #[serde(deserialize_with = "scalar")]
    pub required_disk: String,
    pub support_client: SupportClient,
    pub support_arch: Vec<String>,
    #[serde(deserialize_with = "scalar")]
    pub required_gpu: String,
    #[serde(deserialize_with = "scalar")]
    pub required_cpu: String,

    pub submitter: String,
    pub doc: String,
    pub website: String,
    pub featured_image: String,
    pub source_code: String,
    pub license: Vec<TextAndUrl>,
    pub legal: Vec<TextAndUrl>,
    #[serde(deserialize_with = "scalar")]
    pub model_size: String,
    pub namespace: String,
    pub only_admin: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfiguration {
    #[serde(rename = "olaresManifest.version", deserialize_with = "scalar")]
    pub config_version: String,
    #[serde(rename = "olaresManifest.type")]
    pub config_type: String,
    pub metadata: AppMetaData,
    pub entrances: Vec<Entrance>,
    pub spec: AppSpec,
    pub permission: Permission,
    pub middleware: Option<serde_json::Value>,
    pub options: Options,
}

impl AppConfiguration {
    pub fn from_yaml(bytes: &[u8]) -> serde_yaml::Result<Self> { serde_yaml::from_slice(bytes) }

    pub fn into_entry(self) -> ApplicationEntry {
        let AppConfiguration { config_type, metadata: m, entrances, spec: s, permission, middleware, options, .. } = self;
        ApplicationEntry {
            app_id: m.appid,
            cfg_type: config_type,
            name: m.name,
            icon: m.icon,
            description: m.description,
            title: m.title,
            version: m.version,
            categories: m.categories,
            rating: m.rating,
            target: m.target,
            version_name: s.version_name,
            full_description: s.full_description,
            upgrade_description: s.upgrade_description,
            promote_image: s.promote_image,
            promote_video: s.promote_video,
            sub_category: s.sub_category,
            locale: s.locale,
            developer: s.developer,
            required_memory: s.required_memory,
            required_disk: s.required_disk,
            support_client: s.support_client,
            support_arch: s.support_arch,
            required_gpu: s.required_gpu,
            required_cpu: s.required_cpu,
            submitter: s.submitter,
            doc: s.doc,
            website: s.website,
            featured_image: s.featured_image,
            source_code: s.source_code,
            license: s.license,
            legal: s.legal,
            model_size: s.model_size,
            namespace: s.namespace,
            only_admin: s.only_admin,
            permission,
            entrances,
            middleware,
            options,
            ..Default::default()
        }
    }
}

//! SourceTree Reader: one application directory in, one catalog entry out.

use std::path::Path;

use anyhow::{bail, Context, Result};
use appshelf_core::quantity::{normalize_decimal, normalize_integer};
use appshelf_core::{ApplicationEntry, I18n, LABEL_DISABLED, LABEL_NSFW, LABEL_REMOVE, LABEL_SUSPEND};
use tracing::{debug, warn};

use crate::merge::merge;
use crate::model::AppConfiguration;
use crate::template::{render, Viewer};

pub const MANIFEST_FILE: &str = "app.cfg";
pub const I18N_DIR: &str = "i18n";

/// Marker files and the label each one adds, in label order.
const SENTINELS: [(&str, &str); 3] = [(".remove", LABEL_REMOVE), (".suspend", LABEL_SUSPEND), (".nsfw", LABEL_NSFW)];

#[derive(Debug, Clone, Default)]
pub struct ReaderConfig {
    /// Categories whose apps get the `disabled` label; matched as a substring container.
    pub disabled_categories: String,
}

/// One entry for a plain manifest, two for a templated one.
#[derive(Debug, Clone, PartialEq)]
pub enum Drafts {
    Single(ApplicationEntry),
    Pair { admin: ApplicationEntry, user: ApplicationEntry },
}

impl Drafts {
    pub fn into_entry(self) -> ApplicationEntry {
        match self {
            Drafts::Single(e) => e,
            Drafts::Pair { admin, user } => merge(&admin, &user),
        }
    }
}

/// Parse manifest bytes, falling back to admin/user template rendering when plain YAML fails.
pub fn parse_drafts(bytes: &[u8]) -> Result<Drafts> {
    let err = match AppConfiguration::from_yaml(bytes) {
        Ok(cfg) => return Ok(Drafts::Single(normalized(cfg.into_entry()))),
        Err(e) => e,
    };
    let text = String::from_utf8_lossy(bytes);
    if !text.contains("{{") {
        return Err(err).context("parsing manifest");
    }
    let draft = |viewer: Viewer| -> Result<ApplicationEntry> {
        let rendered = render(&text, viewer).with_context(|| format!("rendering manifest for {viewer:?}"))?;
        let cfg = AppConfiguration::from_yaml(rendered.as_bytes()).with_context(|| format!("parsing {viewer:?} rendering"))?;
        Ok(normalized(cfg.into_entry()))
    };
    Ok(Drafts::Pair { admin: draft(Viewer::Admin)?, user: draft(Viewer::User)? })
}

/// Normalize resource quantities; unparsable values are kept verbatim.
pub fn normalize_quantities(entry: &mut ApplicationEntry) {
    for field in [&mut entry.required_memory, &mut entry.required_disk, &mut entry.required_gpu] {
        if !field.is_empty() { *field = normalize_integer(field); }
    }
    if !entry.required_cpu.is_empty() { entry.required_cpu = normalize_decimal(&entry.required_cpu); }
}

fn normalized(mut e: ApplicationEntry) -> ApplicationEntry {
    normalize_quantities(&mut e);
    e
}

#[derive(Debug, Clone, Default)]
pub struct Reader {
    cfg: ReaderConfig,
}

impl Reader {
    pub fn new(cfg: ReaderConfig) -> Self { Self { cfg } }

    /// Read `<dir>/app.cfg` and decorate the result with labels and localization.
    pub fn read_app(&self, dir: &Path) -> Result<ApplicationEntry> {
        let manifest = dir.join(MANIFEST_FILE);
        let bytes = std::fs::read(&manifest).with_context(|| format!("reading {}", manifest.display()))?;
        let mut entry = parse_drafts(&bytes).with_context(|| format!("manifest {}", manifest.display()))?.into_entry();
        if entry.name.is_empty() { bail!("manifest {} has no metadata.name", manifest.display()); }
        if entry.version.trim().is_empty() { bail!("manifest {} has no metadata.version", manifest.display()); }
        self.apply_disabled(&mut entry);
        entry.i18n = load_i18n(dir, &entry.locale);
        apply_sentinels(dir, &mut entry);
        Ok(entry)
    }

    fn apply_disabled(&self, entry: &mut ApplicationEntry) {
        let disabled = self.cfg.disabled_categories.as_str();
        if disabled.is_empty() { return; }
        let hit = entry.categories.iter().find(|c| !c.is_empty() && disabled.contains(c.as_str()));
        if let Some(category) = hit {
            warn!(app = %entry.name, category = %category, "reader: category disabled");
            entry.push_label(LABEL_DISABLED);
        }
    }
}

fn load_i18n(dir: &Path, locales: &[String]) -> std::collections::BTreeMap<String, I18n> {
    let mut out = std::collections::BTreeMap::new();
    for lang in locales {
        let path = dir.join(I18N_DIR).join(lang).join(MANIFEST_FILE);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "reader: locale bundle unreadable");
                continue;
            }
        };
        match serde_yaml::from_slice::<I18n>(&bytes) {
            Ok(bundle) => {
                out.insert(lang.clone(), bundle);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "reader: locale bundle malformed"),
        }
    }
    out
}

fn apply_sentinels(dir: &Path, entry: &mut ApplicationEntry) {
    let names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(rd) => rd.filter_map(|e| e.ok()).map(|e| e.file_name().to_string_lossy().into_owned()).collect(),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "reader: cannot list app dir");
            return;
        }
    };
    for (file, label) in SENTINELS {
        if names.iter().any(|n| n.eq_ignore_ascii_case(file)) {
            debug!(app = %entry.name, label, "reader: sentinel label");
            entry.push_label(label);
        }
    }
}

//! Appshelf manifests: `app.cfg` model, template rendering, directory reader and admin/user merge.

#![forbid(unsafe_code)]

pub mod merge;
pub mod model;
pub mod reader;
pub mod template;

pub use merge::merge;
pub use model::AppConfiguration;
pub use reader::{parse_drafts, Drafts, Reader, ReaderConfig, MANIFEST_FILE};

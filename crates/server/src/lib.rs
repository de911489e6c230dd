//! Appshelf server: configuration and the HTTP surface over the catalog API.

#![forbid(unsafe_code)]

pub mod config;
pub mod http;

pub use config::Config;
pub use http::{router, serve};

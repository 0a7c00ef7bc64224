//! # Configuration
//!
//! Layered server configuration: profile defaults, an optional YAML/JSON/TOML
//! file, `FEIRA_*` environment variables and command-line overrides.

pub mod server;

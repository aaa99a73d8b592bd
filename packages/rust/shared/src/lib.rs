//! Shared types, error model, and configuration for loadchain.
//!
//! This crate is the foundation depended on by all other loadchain crates.
//! It provides:
//! - [`LoadchainError`] — the unified error type
//! - Data types ([`Request`], [`ScopeKey`], [`RequestId`], [`status`] codes)
//! - Configuration ([`AppConfig`], [`ScopeConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ErrorsConfig, ScopeConfig, ServerConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from, parse_config, validate_config,
};
pub use error::{LoadchainError, Result};
pub use types::{Request, RequestId, ScopeKey, status};

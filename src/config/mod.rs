//! Configuration module for KV Runner.
//!
//! This module handles parsing, validation, and access to the runner's
//! configuration. It supports loading configurations from files or strings
//! in JSON format.
//!
//! # Examples
//!
//! Loading a configuration from a file:
//!
//! ```no_run
//! use kv_runner::config::Config;
//!
//! let config = Config::from_file("kv-runner.json").unwrap();
//! println!("Instances live under {}", config.base_dir.display());
//! ```
//!
//! Creating a configuration programmatically:
//! ```
//! use kv_runner::config::{Config, validate_config};
//!
//! let config = Config {
//!     base_dir: "/tmp/kv-instances".into(),
//!     min_port: 7000,
//!     max_port: 7099,
//!     ..Config::default()
//! };
//! validate_config(&config).unwrap();
//! ```
mod parser;
pub mod validator;

pub use parser::{
    Config, DEFAULT_HTTP_PORT, DEFAULT_MAX_PORT, DEFAULT_MIN_PORT, DEFAULT_WORKERS, HttpConfig,
};
pub use validator::validate_config;

//! Configuration module
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! Every section except `[crawl]` is optional and falls back to defaults.
//!
//! # Example
//!
//! ```no_run
//! use spider_core::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("spider.toml")).unwrap();
//! println!("Crawler will start with {} workers", config.rate.initial_workers);
//! ```

mod parser;
mod types;
mod validation;

pub use types::{
    CheckpointConfig, Config, CrawlConfig, FetchConfig, OrchestratorConfig, OutputConfig,
    RateConfig, RetryConfig, UserAgentConfig, WorkerConfig,
};

pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};

//! Configuration module for Saga-Crawler
//!
//! This module handles loading, parsing, and validating TOML configuration files,
//! and turning a configuration plus command-line choices into a crawl [`Job`].
//!
//! Every section of the file is optional; missing keys fall back to defaults that
//! match a truyenfull-style site.
//!
//! # Example
//!
//! ```no_run
//! use saga_crawler::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("saga.toml")).unwrap();
//! println!("Crawler will use {} workers", config.crawler.concurrency);
//! ```

mod job;
mod parser;
mod types;
mod validation;

// Re-export types
pub use job::{Job, JobScope};
pub use types::{
    Config, CrawlerConfig, IndexConfig, OutputConfig, PolitenessConfig, SiteConfig,
    UserAgentConfig,
};

// Re-export parser functions
pub use parser::{config_hash, load_config, load_config_with_hash, parse_config};
pub use validation::validate;

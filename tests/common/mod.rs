//! Common test utilities for rdslog-dl integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use rdslog_dl::{Config, FetchConfig, SourceConfig};

/// Config writing below `root`, with no launch delay so tests stay fast
pub fn fast_config(root: &Path) -> Config {
    Config {
        output_dir: root.to_path_buf(),
        fetch: FetchConfig {
            launch_delay: Duration::ZERO,
            max_concurrent_fetches: 4,
            ..FetchConfig::default()
        },
        source: SourceConfig::default(),
    }
}

/// Every regular file below `root`, relative to it, sorted
pub fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();
    files.sort();
    files
}

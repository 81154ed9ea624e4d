//! Environment-driven engine configuration.
//!
//! The tax table directory may be specified via `PAYROLL_TAX_TABLE_DIR`;
//! if unset the engine looks for a `tax_tables` folder relative to the
//! current working directory.  `PAYROLL_WORKER_THREADS` optionally sizes
//! a dedicated calculation pool; without it rayon's global pool is used.

use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use tracing::debug;

pub const TAX_TABLE_DIR_VAR: &str = "PAYROLL_TAX_TABLE_DIR";
pub const WORKER_THREADS_VAR: &str = "PAYROLL_WORKER_THREADS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub tax_table_dir: PathBuf,
    pub worker_threads: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            tax_table_dir: PathBuf::from("tax_tables"),
            worker_threads: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = EngineConfig::default();

        debug!("Loading environment `{}`", TAX_TABLE_DIR_VAR);
        if let Some(dir) = lookup(TAX_TABLE_DIR_VAR).filter(|v| !v.trim().is_empty()) {
            config.tax_table_dir = PathBuf::from(dir);
        }

        debug!("Loading environment `{}`", WORKER_THREADS_VAR);
        if let Some(raw) = lookup(WORKER_THREADS_VAR).filter(|v| !v.trim().is_empty()) {
            let threads: usize = raw
                .trim()
                .parse()
                .with_context(|| format!("`{}` is not a number: {}", WORKER_THREADS_VAR, raw))?;
            if threads == 0 {
                bail!("`{}` must be at least 1", WORKER_THREADS_VAR);
            }
            config.worker_threads = Some(threads);
        }
        Ok(config)
    }
}

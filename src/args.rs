//! Command-line arguments for the coordinator binary.
//!
//! Values specified here override the values in the config file (teacher:
//! `bin/prover-client/src/args.rs`).

use std::path::PathBuf;

use argh::FromArgs;

use crate::config::CoordinatorConfig;

#[derive(Debug, FromArgs)]
/// Recover a failed storage node's write-ahead logs by farming out
/// per-file split work to a fleet of live workers.
pub struct Args {
    /// path to a TOML configuration file
    #[argh(option, short = 'c', description = "path to TOML config file")]
    pub config: Option<PathBuf>,

    /// retry budget for async store operations
    #[argh(option, description = "retry budget for async store operations")]
    pub zk_retries: Option<i64>,

    /// CHECK-resubmission ceiling per task
    #[argh(option, description = "CHECK-resubmission ceiling per task")]
    pub max_resubmit: Option<u32>,

    /// idle milliseconds before a CHECK-resubmit is allowed
    #[argh(option, description = "idle ms before CHECK-resubmit")]
    pub manager_timeout_ms: Option<u64>,

    /// directories containing failed-node write-ahead logs to split
    #[argh(positional)]
    pub log_dirs: Vec<PathBuf>,
}

impl Args {
    /// Loads the base config from file (if given) and applies CLI
    /// overrides.
    pub fn resolve_config(&self) -> anyhow::Result<CoordinatorConfig> {
        let mut config = match &self.config {
            Some(path) => CoordinatorConfig::from_file(path)?,
            None => CoordinatorConfig::default(),
        };

        if let Some(v) = self.zk_retries {
            config.retry.zk_retries = v;
        }
        if let Some(v) = self.max_resubmit {
            config.resubmit.max_resubmit = v;
        }
        if let Some(v) = self.manager_timeout_ms {
            config.timing.manager_timeout_ms = v;
        }

        Ok(config)
    }
}

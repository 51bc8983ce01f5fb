//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Job manager configuration.
#[derive(Debug, Clone)]
pub struct JobManagerConfig {
    /// Ended jobs are forgotten once idle for longer than this.
    pub max_job_idle: Duration,
    /// Idle sweep interval.
    pub sweep_interval: Duration,
    /// Maximum number of jobs running in the background at once (`None` = unbounded).
    pub max_concurrent_jobs: Option<usize>,
    /// How long shutdown waits for aborted jobs to wind down.
    pub shutdown_grace: Duration,
}

impl Default for JobManagerConfig {
    fn default() -> Self {
        Self {
            max_job_idle: Duration::from_secs(30 * 60), // 30 minutes
            sweep_interval: Duration::from_secs(60),    // 1 minute
            max_concurrent_jobs: None,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl JobManagerConfig {
    /// Build from `JOBFLOW_*` environment variables, falling back to defaults
    /// for any that are unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let max_job_idle = parse_var(&lookup, "JOBFLOW_MAX_JOB_IDLE_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.max_job_idle);

        let sweep_interval = match parse_var(&lookup, "JOBFLOW_SWEEP_INTERVAL_SECS")? {
            Some(0) => {
                return Err(ConfigError::InvalidValue {
                    key: "JOBFLOW_SWEEP_INTERVAL_SECS".to_string(),
                    message: "must be greater than zero".to_string(),
                });
            }
            Some(secs) => Duration::from_secs(secs),
            None => defaults.sweep_interval,
        };

        let max_concurrent_jobs = match parse_var(&lookup, "JOBFLOW_MAX_CONCURRENT_JOBS")? {
            Some(0) | None => None,
            Some(n) => Some(n as usize),
        };

        let shutdown_grace = parse_var(&lookup, "JOBFLOW_SHUTDOWN_GRACE_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.shutdown_grace);

        Ok(Self {
            max_job_idle,
            sweep_interval,
            max_concurrent_jobs,
            shutdown_grace,
        })
    }
}

fn parse_var<F>(lookup: &F, key: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("'{raw}' is not a non-negative integer: {e}"),
            }),
    }
}

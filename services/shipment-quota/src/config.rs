use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use crate::guard::{CommitMode, DEFAULT_WARNING_THRESHOLD};
use crate::scheduler::ResetSchedule;

#[derive(Debug, Clone)]
pub struct QuotaServiceConfig {
    pub server_host: String,
    pub server_port: u16,
    pub data_dir: PathBuf,
    pub db_busy_timeout_ms: u64,
    pub warning_threshold: f64,
    pub commit_mode: CommitMode,
    pub reset_enabled: bool,
    pub reset_day: u32,
    pub reset_hour: u32,
    pub log_level: String,
}

impl Default for QuotaServiceConfig {
    fn default() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8184,
            data_dir: PathBuf::from("data/subscriptions"),
            db_busy_timeout_ms: 5_000,
            warning_threshold: DEFAULT_WARNING_THRESHOLD,
            commit_mode: CommitMode::Unbounded,
            reset_enabled: true,
            reset_day: 1,
            reset_hour: 0,
            log_level: "info".to_string(),
        }
    }
}

impl QuotaServiceConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source, then
    /// validates it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(host) = lookup("QUOTA_HOST") {
            cfg.server_host = host;
        }
        if let Some(port) = lookup("QUOTA_PORT") {
            cfg.server_port = port.parse().context("QUOTA_PORT must be a valid u16")?;
        }
        if let Some(dir) = lookup("QUOTA_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        if let Some(timeout) = lookup("QUOTA_DB_BUSY_TIMEOUT_MS") {
            cfg.db_busy_timeout_ms = timeout
                .parse()
                .context("QUOTA_DB_BUSY_TIMEOUT_MS must be a positive integer")?;
        }
        if let Some(threshold) = lookup("QUOTA_WARNING_THRESHOLD") {
            cfg.warning_threshold = threshold
                .parse()
                .context("QUOTA_WARNING_THRESHOLD must be a number")?;
        }
        if let Some(mode) = lookup("QUOTA_COMMIT_MODE") {
            cfg.commit_mode = mode
                .parse()
                .with_context(|| format!("QUOTA_COMMIT_MODE is invalid: {mode}"))?;
        }
        if let Some(flag) = lookup("USAGE_RESET_ENABLED") {
            cfg.reset_enabled = parse_bool(&flag)
                .with_context(|| format!("USAGE_RESET_ENABLED is invalid: {flag}"))?;
        }
        if let Some(day) = lookup("USAGE_RESET_DAY") {
            cfg.reset_day = day
                .parse()
                .context("USAGE_RESET_DAY must be an integer between 1 and 28")?;
        }
        if let Some(hour) = lookup("USAGE_RESET_HOUR") {
            cfg.reset_hour = hour
                .parse()
                .context("USAGE_RESET_HOUR must be an integer between 0 and 23")?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            cfg.log_level = level;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        ensure_directory(&self.data_dir)?;

        if self.db_busy_timeout_ms == 0 {
            anyhow::bail!("QUOTA_DB_BUSY_TIMEOUT_MS must be greater than zero");
        }
        if !(self.warning_threshold > 0.0 && self.warning_threshold <= 1.0) {
            anyhow::bail!("QUOTA_WARNING_THRESHOLD must be in (0, 1]");
        }
        self.reset_schedule()?;

        Ok(())
    }

    pub fn reset_schedule(&self) -> Result<ResetSchedule> {
        ResetSchedule::new(self.reset_enabled, self.reset_day, self.reset_hour)
            .context("invalid usage reset schedule")
    }

    pub fn db_busy_timeout(&self) -> Duration {
        Duration::from_millis(self.db_busy_timeout_ms)
    }
}

fn ensure_directory(path: &Path) -> Result<()> {
    if path.exists() {
        if !path.is_dir() {
            anyhow::bail!("{} exists but is not a directory", path.display());
        }
    } else {
        fs::create_dir_all(path)
            .with_context(|| format!("unable to create data directory {}", path.display()))?;
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => anyhow::bail!("invalid boolean value {value}"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)], data_dir: &Path) -> Result<QuotaServiceConfig> {
        let mut map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        map.insert(
            "QUOTA_DATA_DIR".to_string(),
            data_dir.to_string_lossy().into_owned(),
        );
        QuotaServiceConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults_reset_on_first_of_month_at_midnight() {
        let temp = tempfile::tempdir().unwrap();
        let cfg = load(&[], temp.path()).unwrap();
        assert!(cfg.reset_enabled);
        assert_eq!(cfg.reset_day, 1);
        assert_eq!(cfg.reset_hour, 0);
        assert_eq!(cfg.commit_mode, CommitMode::Unbounded);
        assert!((cfg.warning_threshold - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_reads_schedule_and_commit_mode() {
        let temp = tempfile::tempdir().unwrap();
        let cfg = load(
            &[
                ("USAGE_RESET_ENABLED", "no"),
                ("USAGE_RESET_DAY", "28"),
                ("USAGE_RESET_HOUR", "23"),
                ("QUOTA_COMMIT_MODE", "ceiling"),
                ("QUOTA_PORT", "9000"),
            ],
            temp.path(),
        )
        .unwrap();
        assert!(!cfg.reset_enabled);
        assert_eq!(cfg.reset_day, 28);
        assert_eq!(cfg.reset_hour, 23);
        assert_eq!(cfg.commit_mode, CommitMode::Ceiling);
        assert_eq!(cfg.server_port, 9000);

        let schedule = cfg.reset_schedule().unwrap();
        assert!(!schedule.enabled());
        assert_eq!(schedule.reset_day(), 28);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let temp = tempfile::tempdir().unwrap();
        assert!(load(&[("USAGE_RESET_DAY", "29")], temp.path()).is_err());
        assert!(load(&[("USAGE_RESET_DAY", "0")], temp.path()).is_err());
        assert!(load(&[("USAGE_RESET_HOUR", "24")], temp.path()).is_err());
        assert!(load(&[("USAGE_RESET_ENABLED", "maybe")], temp.path()).is_err());
        assert!(load(&[("QUOTA_WARNING_THRESHOLD", "0")], temp.path()).is_err());
        assert!(load(&[("QUOTA_WARNING_THRESHOLD", "1.5")], temp.path()).is_err());
        assert!(load(&[("QUOTA_DB_BUSY_TIMEOUT_MS", "0")], temp.path()).is_err());
        assert!(load(&[("QUOTA_COMMIT_MODE", "strict")], temp.path()).is_err());
    }

    #[test]
    fn test_data_dir_must_be_a_directory() {
        let temp = tempfile::tempdir().unwrap();
        let file = temp.path().join("not-a-dir");
        fs::write(&file, b"x").unwrap();
        assert!(load(&[], &file).is_err());
    }
}

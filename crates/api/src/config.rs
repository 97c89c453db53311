//! Process configuration, read from `DIRBATCH_*` environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, bail};

use dirbatch_infra::directory::HttpDirectoryConfig;
use dirbatch_infra::jobs::{QuotaConfig, RetryPolicy, SchedulerConfig};

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind: SocketAddr,
    pub workers: usize,
    pub max_concurrent: usize,
    pub rate_per_window: usize,
    pub rate_window: Duration,
    pub max_attempts: u32,
    pub lease: Duration,
    /// Upstream directory base URL; `None` selects the in-memory directory.
    pub directory_url: Option<String>,
    pub directory_token: Option<String>,
    pub directory_customer: String,
    pub use_postgres: bool,
    pub database_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        let quota = QuotaConfig::default();
        let scheduler = SchedulerConfig::default();
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8080)),
            workers: scheduler.workers,
            max_concurrent: quota.max_concurrent,
            rate_per_window: quota.max_per_window,
            rate_window: quota.window,
            max_attempts: scheduler.retry.max_attempts,
            lease: scheduler.lease,
            directory_url: None,
            directory_token: None,
            directory_customer: "my_customer".to_string(),
            use_postgres: false,
            database_url: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config = Self::default();

        if let Some(bind) = lookup("DIRBATCH_BIND") {
            config.bind = parse_var("DIRBATCH_BIND", &bind)?;
        }
        if let Some(v) = lookup("DIRBATCH_WORKERS") {
            config.workers = parse_var("DIRBATCH_WORKERS", &v)?;
        }
        if let Some(v) = lookup("DIRBATCH_MAX_CONCURRENT") {
            config.max_concurrent = parse_var("DIRBATCH_MAX_CONCURRENT", &v)?;
        }
        if let Some(v) = lookup("DIRBATCH_RATE_PER_WINDOW") {
            config.rate_per_window = parse_var("DIRBATCH_RATE_PER_WINDOW", &v)?;
        }
        if let Some(v) = lookup("DIRBATCH_RATE_WINDOW_MS") {
            config.rate_window = Duration::from_millis(parse_var("DIRBATCH_RATE_WINDOW_MS", &v)?);
        }
        if let Some(v) = lookup("DIRBATCH_MAX_ATTEMPTS") {
            config.max_attempts = parse_var("DIRBATCH_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("DIRBATCH_LEASE_SECS") {
            config.lease = Duration::from_secs(parse_var("DIRBATCH_LEASE_SECS", &v)?);
        }

        config.directory_url = lookup("DIRBATCH_DIRECTORY_URL").filter(|v| !v.trim().is_empty());
        config.directory_token = lookup("DIRBATCH_DIRECTORY_TOKEN");
        if let Some(customer) = lookup("DIRBATCH_DIRECTORY_CUSTOMER") {
            config.directory_customer = customer;
        }

        config.use_postgres = lookup("DIRBATCH_USE_POSTGRES")
            .is_some_and(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"));
        config.database_url = lookup("DATABASE_URL");

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.workers == 0 {
            bail!("DIRBATCH_WORKERS must be at least 1");
        }
        if self.max_concurrent == 0 || self.rate_per_window == 0 {
            bail!("DIRBATCH_MAX_CONCURRENT and DIRBATCH_RATE_PER_WINDOW must be at least 1");
        }
        if self.workers < self.max_concurrent {
            bail!(
                "DIRBATCH_WORKERS ({}) must be at least DIRBATCH_MAX_CONCURRENT ({})",
                self.workers,
                self.max_concurrent
            );
        }
        if self.rate_window.is_zero() {
            bail!("DIRBATCH_RATE_WINDOW_MS must be positive");
        }
        if self.max_attempts == 0 {
            bail!("DIRBATCH_MAX_ATTEMPTS must be at least 1");
        }
        if self.use_postgres && self.database_url.is_none() {
            bail!("DIRBATCH_USE_POSTGRES is set but DATABASE_URL is missing");
        }
        Ok(())
    }

    pub fn quota(&self) -> QuotaConfig {
        QuotaConfig::default()
            .with_max_concurrent(self.max_concurrent)
            .with_rate(self.rate_per_window, self.rate_window)
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        let retry = RetryPolicy {
            max_attempts: self.max_attempts,
            ..RetryPolicy::default()
        };
        SchedulerConfig::default()
            .with_workers(self.workers)
            .with_lease(self.lease)
            .with_retry(retry)
    }

    /// HTTP directory settings, when an upstream URL is configured.
    pub fn directory(&self) -> Option<HttpDirectoryConfig> {
        let url = self.directory_url.as_ref()?;
        let mut config = HttpDirectoryConfig::new(url).with_customer(&self.directory_customer);
        if let Some(token) = &self.directory_token {
            config = config.with_token(token);
        }
        Some(config)
    }
}

fn parse_var<T>(name: &str, raw: &str) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("invalid value for {name}: '{raw}'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> anyhow::Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config.bind.port(), 8080);
        assert_eq!(config.workers, 8);
        assert_eq!(config.max_concurrent, 4);
        assert_eq!(config.rate_per_window, 25);
        assert_eq!(config.max_attempts, 5);
        assert!(config.directory().is_none());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("DIRBATCH_WORKERS", "2"),
            ("DIRBATCH_MAX_CONCURRENT", "2"),
            ("DIRBATCH_RATE_WINDOW_MS", "500"),
            ("DIRBATCH_DIRECTORY_URL", "https://directory.example.org"),
            ("DIRBATCH_DIRECTORY_TOKEN", "secret"),
        ])
        .unwrap();
        assert_eq!(config.scheduler().workers, 2);
        assert_eq!(config.quota().window, Duration::from_millis(500));
        let directory = config.directory().unwrap();
        assert_eq!(directory.bearer_token.as_deref(), Some("secret"));
    }

    #[test]
    fn invalid_numbers_are_errors() {
        let err = load(&[("DIRBATCH_MAX_CONCURRENT", "many")]).unwrap_err();
        assert!(err.to_string().contains("DIRBATCH_MAX_CONCURRENT"));
        assert!(load(&[("DIRBATCH_WORKERS", "0")]).is_err());
    }

    #[test]
    fn fewer_workers_than_concurrent_calls_is_rejected() {
        let err = load(&[("DIRBATCH_WORKERS", "2"), ("DIRBATCH_MAX_CONCURRENT", "4")]).unwrap_err();
        assert!(err.to_string().contains("DIRBATCH_MAX_CONCURRENT"));
        assert!(load(&[("DIRBATCH_WORKERS", "4"), ("DIRBATCH_MAX_CONCURRENT", "4")]).is_ok());
    }

    #[test]
    fn postgres_requires_database_url() {
        assert!(load(&[("DIRBATCH_USE_POSTGRES", "true")]).is_err());
    }
}

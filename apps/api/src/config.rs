use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::layout::OverflowPolicy;

/// Application configuration loaded from environment variables.
/// Every variable is optional; unset ones fall back to [`Config::default`].
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    /// Enables snapshot persistence when set.
    pub redis_url: Option<String>,
    /// Measurement sidecar. Without it the estimating probe is used.
    pub layout_probe_url: Option<String>,
    pub cache_ttl: Duration,
    pub cache_max_size: usize,
    pub cache_cleanup_interval: Duration,
    pub overflow_policy: OverflowPolicy,
    pub include_cover_page: bool,
    pub ready_delay: Duration,
    pub landscape_recalc_delay: Duration,
    pub landscape_threshold: usize,
    pub diagnostics: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            rust_log: "info".to_string(),
            redis_url: None,
            layout_probe_url: None,
            cache_ttl: Duration::from_secs(300),
            cache_max_size: 1000,
            cache_cleanup_interval: Duration::from_secs(60),
            overflow_policy: OverflowPolicy::Overflow,
            include_cover_page: false,
            ready_delay: Duration::from_millis(500),
            landscape_recalc_delay: Duration::from_millis(100),
            landscape_threshold: 8000,
            diagnostics: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let defaults = Config::default();
        Ok(Config {
            port: parse_env("PORT")?.unwrap_or(defaults.port),
            rust_log: std::env::var("RUST_LOG").unwrap_or(defaults.rust_log),
            redis_url: optional_env("REDIS_URL"),
            layout_probe_url: optional_env("LAYOUT_PROBE_URL"),
            cache_ttl: millis_env("CACHE_TTL_MS")?.unwrap_or(defaults.cache_ttl),
            cache_max_size: parse_env("CACHE_MAX_SIZE")?.unwrap_or(defaults.cache_max_size),
            cache_cleanup_interval: millis_env("CACHE_CLEANUP_INTERVAL_MS")?
                .unwrap_or(defaults.cache_cleanup_interval),
            overflow_policy: parse_env::<OverflowPolicy>("OVERFLOW_POLICY")?
                .unwrap_or(defaults.overflow_policy),
            include_cover_page: parse_env("INCLUDE_COVER_PAGE")?
                .unwrap_or(defaults.include_cover_page),
            ready_delay: millis_env("READY_DELAY_MS")?.unwrap_or(defaults.ready_delay),
            landscape_recalc_delay: millis_env("LANDSCAPE_RECALC_DELAY_MS")?
                .unwrap_or(defaults.landscape_recalc_delay),
            landscape_threshold: parse_env("LANDSCAPE_THRESHOLD")?
                .unwrap_or(defaults.landscape_threshold),
            diagnostics: parse_env("LAYOUT_DIAGNOSTICS")?.unwrap_or(defaults.diagnostics),
        })
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| anyhow!("{e}"))
                .with_context(|| format!("Environment variable '{key}' has an invalid value '{raw}'"))
        })
        .transpose()
}

fn millis_env(key: &str) -> Result<Option<Duration>> {
    Ok(parse_env::<u64>(key)?.map(Duration::from_millis))
}

//! Synchronizer configuration.

use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use zkrep_common::{AttesterId, Settings};
use zkrep_epoch_state::SealerPolicy;

use crate::error::SyncError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based), doubling up to the cap.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// SQLite file; in-memory when unset.
    pub db_path: Option<PathBuf>,
    /// JSON-lines event log read by the daemon.
    pub events_path: Option<PathBuf>,
    /// First block to ingest on an empty database.
    pub start_block: u64,
    pub poll_interval_ms: u64,
    /// Maximum number of blocks fetched per poll.
    pub max_block_span: u64,
    pub retry: RetryConfig,
    /// Resync automatically after a fatal error instead of waiting for an operator.
    pub auto_resync: bool,
    /// Attesters to track; empty tracks every attester.
    pub attesters: Vec<AttesterId>,
    pub sealer_policy: SealerPolicy,
    pub settings: Settings,
    /// Keep polling after catching up with the head.
    pub follow: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            events_path: None,
            start_block: 0,
            poll_interval_ms: 1_000,
            max_block_span: 1_000,
            retry: RetryConfig::default(),
            auto_resync: false,
            attesters: Vec::new(),
            sealer_policy: SealerPolicy::default(),
            settings: Settings::default(),
            follow: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn parse_attesters(raw: &str) -> Result<Vec<AttesterId>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().with_context(|| format!("invalid attester id {s:?}")))
        .collect()
}

/// `anyone`, `attester_only` or `allowlist:<id>,<id>,...`.
pub fn parse_sealer_policy(raw: &str) -> Result<SealerPolicy> {
    let raw = raw.trim();
    match raw {
        "anyone" => Ok(SealerPolicy::Anyone),
        "attester_only" => Ok(SealerPolicy::AttesterOnly),
        _ => match raw.strip_prefix("allowlist:") {
            Some(list) => Ok(SealerPolicy::Allowlist(parse_attesters(list)?)),
            None => anyhow::bail!("unknown sealer policy {raw:?}"),
        },
    }
}

impl SyncConfig {
    /// Load configuration from `ZKREP_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let settings = match env::var("ZKREP_SETTINGS_PATH") {
            Ok(path) => {
                let raw = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read settings file {path}"))?;
                serde_json::from_str(&raw).context("invalid settings file")?
            }
            Err(_) => defaults.settings.clone(),
        };
        let settings = Settings {
            chain_id: env_parse("ZKREP_CHAIN_ID").unwrap_or(settings.chain_id),
            ..settings
        };

        let attesters = match env::var("ZKREP_ATTESTERS") {
            Ok(raw) => parse_attesters(&raw)?,
            Err(_) => Vec::new(),
        };
        let sealer_policy = match env::var("ZKREP_SEALER_POLICY") {
            Ok(raw) => parse_sealer_policy(&raw)?,
            Err(_) => SealerPolicy::default(),
        };

        let config = Self {
            db_path: env::var("ZKREP_DB_PATH").ok().map(PathBuf::from),
            events_path: env::var("ZKREP_EVENTS_PATH").ok().map(PathBuf::from),
            start_block: env_parse("ZKREP_START_BLOCK").unwrap_or(defaults.start_block),
            poll_interval_ms: env_parse("ZKREP_POLL_INTERVAL_MS")
                .unwrap_or(defaults.poll_interval_ms),
            max_block_span: env_parse("ZKREP_MAX_BLOCK_SPAN").unwrap_or(defaults.max_block_span),
            retry: RetryConfig {
                initial_backoff_ms: env_parse("ZKREP_RETRY_INITIAL_BACKOFF_MS")
                    .unwrap_or(defaults.retry.initial_backoff_ms),
                max_backoff_ms: env_parse("ZKREP_RETRY_MAX_BACKOFF_MS")
                    .unwrap_or(defaults.retry.max_backoff_ms),
            },
            auto_resync: env_parse("ZKREP_AUTO_RESYNC").unwrap_or(defaults.auto_resync),
            attesters,
            sealer_policy,
            settings,
            follow: env_parse("ZKREP_FOLLOW").unwrap_or(defaults.follow),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        self.settings.validate()?;
        if self.max_block_span == 0 {
            return Err(SyncError::Config("max_block_span must be non-zero".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(SyncError::Config("poll_interval_ms must be non-zero".into()));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(SyncError::Config(
                "retry.initial_backoff_ms exceeds retry.max_backoff_ms".into(),
            ));
        }
        let width = self.settings.control.attester_id_bits;
        for attester in &self.attesters {
            attester
                .check_width(width)
                .map_err(|e| SyncError::Config(e.to_string()))?;
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Whether events of `attester_id` are ingested.
    pub fn tracks(&self, attester_id: &AttesterId) -> bool {
        self.attesters.is_empty() || self.attesters.contains(attester_id)
    }
}

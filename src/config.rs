use std::str::FromStr;

use serde::Deserialize;

use crate::models::{Level, Resolution, aggregator_id};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
    pub max_pool_size: u32,
    /// Rows per write transaction. Reads stream rows and are not paged.
    #[serde(default = "default_result_set_fetch_size")]
    pub result_set_fetch_size: usize,
}

fn default_result_set_fetch_size() -> usize {
    2000
}

/// Upper bound for slice and tier intervals (one leap year).
pub const MAX_INTERVAL_SECS: u64 = 366 * 86_400;
/// Upper bound for the slicing lookback (one day).
pub const MAX_LOOKBACK_MS: u64 = 86_400_000;
/// Upper bound for retention TTLs (100 years).
pub const MAX_TTL_DAYS: u64 = 36_500;

/// Every tier the pipeline knows, finest first within each level.
pub const TIERS: [(Level, Resolution); 7] = [
    (Level::Host, Resolution::Minute),
    (Level::Host, Resolution::Hour),
    (Level::Host, Resolution::Day),
    (Level::Cluster, Resolution::Second),
    (Level::Cluster, Resolution::Minute),
    (Level::Cluster, Resolution::Hour),
    (Level::Cluster, Resolution::Day),
];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub time_slice_interval_secs: u64,
    /// Range read on each side of a slicing window for boundary interpolation.
    pub interpolation_lookback_ms: u64,
    /// Slice from the live sample cache instead of the metric store.
    pub in_memory_aggregation: bool,
    /// Apps whose hosts' HOST metrics also roll up under the app id.
    pub app_ids: Vec<String>,
    pub host_minute: TierConfig,
    pub host_hourly: TierConfig,
    pub host_daily: TierConfig,
    pub cluster_second: TierConfig,
    pub cluster_minute: TierConfig,
    pub cluster_hourly: TierConfig,
    pub cluster_daily: TierConfig,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            time_slice_interval_secs: 30,
            interpolation_lookback_ms: 90_000,
            in_memory_aggregation: false,
            app_ids: Vec::new(),
            host_minute: TierConfig::default(),
            host_hourly: TierConfig::default(),
            host_daily: TierConfig::default(),
            cluster_second: TierConfig::default(),
            cluster_minute: TierConfig::default(),
            cluster_hourly: TierConfig::default(),
            cluster_daily: TierConfig::default(),
        }
    }
}

/// Per-tier overrides; unset values fall back to the tier's defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TierConfig {
    pub sleep_interval_secs: Option<u64>,
    pub checkpoint_cutoff_multiplier: Option<u32>,
    #[serde(default)]
    pub disabled: bool,
}

/// Resolved schedule for one aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierSettings {
    pub id: String,
    pub level: Level,
    pub resolution: Resolution,
    pub sleep_interval_secs: u64,
    pub checkpoint_cutoff_multiplier: u32,
    pub enabled: bool,
}

impl TierSettings {
    pub fn sleep_interval_ms(&self) -> i64 {
        self.sleep_interval_secs as i64 * 1000
    }
}

/// (sleep interval secs, cutoff multiplier)
fn tier_defaults(level: Level, resolution: Resolution) -> (u64, u32) {
    match (level, resolution) {
        (Level::Host, Resolution::Minute) => (300, 3),
        (Level::Host, Resolution::Hour) => (3600, 2),
        (Level::Host, Resolution::Day) => (86_400, 1),
        (Level::Cluster, Resolution::Second) => (120, 2),
        (Level::Cluster, Resolution::Minute) => (300, 2),
        (Level::Cluster, Resolution::Hour) => (3600, 2),
        (Level::Cluster, Resolution::Day) => (86_400, 1),
        (Level::Host, Resolution::Second) => (0, 0),
    }
}

impl AggregationConfig {
    pub fn time_slice_interval_ms(&self) -> i64 {
        self.time_slice_interval_secs as i64 * 1000
    }

    fn tier_config(&self, level: Level, resolution: Resolution) -> Option<&TierConfig> {
        match (level, resolution) {
            (Level::Host, Resolution::Minute) => Some(&self.host_minute),
            (Level::Host, Resolution::Hour) => Some(&self.host_hourly),
            (Level::Host, Resolution::Day) => Some(&self.host_daily),
            (Level::Host, Resolution::Second) => None,
            (Level::Cluster, Resolution::Second) => Some(&self.cluster_second),
            (Level::Cluster, Resolution::Minute) => Some(&self.cluster_minute),
            (Level::Cluster, Resolution::Hour) => Some(&self.cluster_hourly),
            (Level::Cluster, Resolution::Day) => Some(&self.cluster_daily),
        }
    }

    /// Schedule for one tier with defaults applied. `None` for host seconds.
    pub fn tier(&self, level: Level, resolution: Resolution) -> Option<TierSettings> {
        let cfg = self.tier_config(level, resolution)?;
        let (sleep, cutoff) = tier_defaults(level, resolution);
        Some(TierSettings {
            id: aggregator_id(level, resolution),
            level,
            resolution,
            sleep_interval_secs: cfg.sleep_interval_secs.unwrap_or(sleep),
            checkpoint_cutoff_multiplier: cfg.checkpoint_cutoff_multiplier.unwrap_or(cutoff),
            enabled: !cfg.disabled,
        })
    }

    pub fn tiers(&self) -> Vec<TierSettings> {
        TIERS
            .iter()
            .filter_map(|&(level, resolution)| self.tier(level, resolution))
            .collect()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub raw_ttl_hours: u64,
    pub minute_ttl_days: u64,
    pub hourly_ttl_days: u64,
    pub daily_ttl_days: u64,
    pub cluster_second_ttl_days: u64,
    pub cluster_minute_ttl_days: u64,
    pub cluster_hourly_ttl_days: u64,
    pub cluster_daily_ttl_days: u64,
    pub prune_interval_secs: u64,
    /// Live cache points older than this are evicted on each prune.
    pub live_cache_retention_secs: u64,
    /// Optional cron expression for VACUUM (e.g. "0 0 3 * * *" = 03:00 daily). Uses local time.
    pub vacuum_schedule: Option<String>,
    /// Run VACUUM every N seconds when vacuum_schedule is not set.
    pub vacuum_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            raw_ttl_hours: 24,
            minute_ttl_days: 7,
            hourly_ttl_days: 30,
            daily_ttl_days: 365,
            cluster_second_ttl_days: 7,
            cluster_minute_ttl_days: 30,
            cluster_hourly_ttl_days: 365,
            cluster_daily_ttl_days: 730,
            prune_interval_secs: 3600,
            live_cache_retention_secs: 600,
            vacuum_schedule: None,
            vacuum_interval_secs: 86_400,
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var("CONFIG_FILE").unwrap_or_else(|_| "config.toml".into());
        let s = std::fs::read_to_string(&path)?;
        Self::load_from_str(&s)
    }

    /// Parse and validate config from a string (e.g. for tests).
    pub fn load_from_str(s: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.server.port > 0,
            "server.port must be between 1 and 65535, got {}",
            self.server.port
        );
        anyhow::ensure!(
            !self.database.path.is_empty(),
            "database.path must be non-empty"
        );
        anyhow::ensure!(
            self.database.max_pool_size > 0,
            "database.max_pool_size must be > 0, got {}",
            self.database.max_pool_size
        );
        anyhow::ensure!(
            self.database.result_set_fetch_size > 0,
            "database.result_set_fetch_size must be > 0, got {}",
            self.database.result_set_fetch_size
        );
        self.validate_aggregation()?;
        self.validate_retention()
    }

    fn validate_aggregation(&self) -> anyhow::Result<()> {
        let agg = &self.aggregation;
        let slice = agg.time_slice_interval_secs;
        anyhow::ensure!(
            slice > 0 && slice <= MAX_INTERVAL_SECS,
            "aggregation.time_slice_interval_secs must be between 1 and {}, got {}",
            MAX_INTERVAL_SECS,
            slice
        );
        anyhow::ensure!(
            agg.interpolation_lookback_ms <= MAX_LOOKBACK_MS,
            "aggregation.interpolation_lookback_ms must be <= {}, got {}",
            MAX_LOOKBACK_MS,
            agg.interpolation_lookback_ms
        );
        for (i, app) in agg.app_ids.iter().enumerate() {
            anyhow::ensure!(
                !app.trim().is_empty(),
                "aggregation.app_ids[{}] must be non-empty",
                i
            );
        }
        for tier in agg.tiers() {
            anyhow::ensure!(
                tier.sleep_interval_secs > 0 && tier.sleep_interval_secs <= MAX_INTERVAL_SECS,
                "aggregation.{}.sleep_interval_secs must be between 1 and {}, got {}",
                tier.id,
                MAX_INTERVAL_SECS,
                tier.sleep_interval_secs
            );
            anyhow::ensure!(
                tier.checkpoint_cutoff_multiplier >= 1,
                "aggregation.{}.checkpoint_cutoff_multiplier must be >= 1, got {}",
                tier.id,
                tier.checkpoint_cutoff_multiplier
            );
        }

        for resolution in [Resolution::Second, Resolution::Minute] {
            if let Some(tier) = agg.tier(Level::Cluster, resolution) {
                anyhow::ensure!(
                    tier.sleep_interval_secs % slice == 0,
                    "aggregation.{}.sleep_interval_secs ({}) must be a multiple of time_slice_interval_secs ({})",
                    tier.id,
                    tier.sleep_interval_secs,
                    slice
                );
            }
        }

        let nested = [
            (Level::Host, Resolution::Hour, Resolution::Minute),
            (Level::Host, Resolution::Day, Resolution::Hour),
            (Level::Cluster, Resolution::Hour, Resolution::Minute),
            (Level::Cluster, Resolution::Day, Resolution::Hour),
        ];
        for (level, coarse, fine) in nested {
            if let (Some(c), Some(f)) = (agg.tier(level, coarse), agg.tier(level, fine)) {
                anyhow::ensure!(
                    c.sleep_interval_secs % f.sleep_interval_secs == 0,
                    "aggregation.{}.sleep_interval_secs ({}) must be a multiple of {}.sleep_interval_secs ({})",
                    c.id,
                    c.sleep_interval_secs,
                    f.id,
                    f.sleep_interval_secs
                );
            }
        }
        Ok(())
    }

    fn validate_retention(&self) -> anyhow::Result<()> {
        let r = &self.retention;
        let limits = [
            ("raw_ttl_hours", r.raw_ttl_hours, MAX_TTL_DAYS * 24),
            ("minute_ttl_days", r.minute_ttl_days, MAX_TTL_DAYS),
            ("hourly_ttl_days", r.hourly_ttl_days, MAX_TTL_DAYS),
            ("daily_ttl_days", r.daily_ttl_days, MAX_TTL_DAYS),
            ("cluster_second_ttl_days", r.cluster_second_ttl_days, MAX_TTL_DAYS),
            ("cluster_minute_ttl_days", r.cluster_minute_ttl_days, MAX_TTL_DAYS),
            ("cluster_hourly_ttl_days", r.cluster_hourly_ttl_days, MAX_TTL_DAYS),
            ("cluster_daily_ttl_days", r.cluster_daily_ttl_days, MAX_TTL_DAYS),
            ("prune_interval_secs", r.prune_interval_secs, MAX_INTERVAL_SECS),
            ("live_cache_retention_secs", r.live_cache_retention_secs, MAX_INTERVAL_SECS),
            ("vacuum_interval_secs", r.vacuum_interval_secs, MAX_INTERVAL_SECS),
        ];
        for (name, value, max) in limits {
            anyhow::ensure!(
                value > 0 && value <= max,
                "retention.{} must be between 1 and {}, got {}",
                name,
                max,
                value
            );
        }
        if let Some(ref expr) = r.vacuum_schedule {
            cron::Schedule::from_str(expr).map_err(|e| {
                anyhow::anyhow!("retention.vacuum_schedule {:?} is not a valid cron expression: {}", expr, e)
            })?;
        }
        Ok(())
    }
}

//! Application configuration
//!
//! Layered with the `config` crate: `config/default.toml`, then the file named
//! by `TRADER_CONFIG`, then `TRADER__SECTION__KEY` environment overrides.

use crate::scheduler::DstRegime;
use anyhow::{Context, Result};
use chrono::NaiveTime;
use chrono_tz::Tz;
use common::DecisionType;
use decision_engine::LlmConfig;
use execution::PaperBrokerConfig;
use portfolio_risk::RiskConfig;
use serde::{Deserialize, Serialize};
use signal_generation::SignalsConfig;

pub const CONFIG_ENV_VAR: &str = "TRADER_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "config/default";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// tracing max level: trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub broker: PaperBrokerConfig,

    #[serde(default)]
    pub signals: SignalsConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            risk: RiskConfig::default(),
            llm: LlmConfig::default(),
            broker: PaperBrokerConfig::default(),
            signals: SignalsConfig::default(),
            scheduler: SchedulerConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// One clock trigger for a scheduled session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    pub session: DecisionType,
    pub regime: DstRegime,
    /// `HH:MM` in the schedule timezone
    pub time: String,
}

impl TriggerSpec {
    fn new(session: DecisionType, regime: DstRegime, time: &str) -> Self {
        Self {
            session,
            regime,
            time: time.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Timezone the session trigger times are written in
    #[serde(default = "default_schedule_tz")]
    pub schedule_tz: Tz,

    /// Timezone of the exchange; decides the DST regime and the trading date
    #[serde(default = "default_market_tz")]
    pub market_tz: Tz,

    #[serde(default = "default_triggers")]
    pub triggers: Vec<TriggerSpec>,

    #[serde(default = "default_stop_loss_interval_minutes")]
    pub stop_loss_interval_minutes: u32,

    /// Market window for stop-loss sweeps, market time
    #[serde(default = "default_market_open")]
    pub market_open: String,

    #[serde(default = "default_market_close")]
    pub market_close: String,

    /// Daily snapshot time, market time
    #[serde(default = "default_snapshot_time")]
    pub snapshot_time: String,

    #[serde(default = "default_token_refresh_hours")]
    pub token_refresh_hours: u32,

    /// Skip sessions, sweeps and snapshots on Saturday/Sunday market dates
    #[serde(default = "default_true")]
    pub weekdays_only: bool,

    /// Start firing jobs immediately at launch
    #[serde(default = "default_true")]
    pub autostart: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedule_tz: default_schedule_tz(),
            market_tz: default_market_tz(),
            triggers: default_triggers(),
            stop_loss_interval_minutes: default_stop_loss_interval_minutes(),
            market_open: default_market_open(),
            market_close: default_market_close(),
            snapshot_time: default_snapshot_time(),
            token_refresh_hours: default_token_refresh_hours(),
            weekdays_only: true,
            autostart: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// PostgreSQL URL; in-memory stores are used when absent
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// TOML file holding the risk limits, re-read on reload
    #[serde(default)]
    pub risk_limits_path: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: default_max_connections(),
            risk_limits_path: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_schedule_tz() -> Tz {
    chrono_tz::Asia::Seoul
}

fn default_market_tz() -> Tz {
    chrono_tz::America::New_York
}

fn default_triggers() -> Vec<TriggerSpec> {
    use DecisionType::*;
    use DstRegime::*;

    vec![
        TriggerSpec::new(PreMarket, Winter, "23:20"),
        TriggerSpec::new(PreMarket, Summer, "22:20"),
        TriggerSpec::new(MidSession, Winter, "01:30"),
        TriggerSpec::new(MidSession, Summer, "00:30"),
        TriggerSpec::new(PreClose, Winter, "05:50"),
        TriggerSpec::new(PreClose, Summer, "04:50"),
    ]
}

fn default_stop_loss_interval_minutes() -> u32 {
    30
}

fn default_market_open() -> String {
    "09:30".to_string()
}

fn default_market_close() -> String {
    "16:00".to_string()
}

fn default_snapshot_time() -> String {
    "16:05".to_string()
}

fn default_token_refresh_hours() -> u32 {
    22
}

fn default_true() -> bool {
    true
}

fn default_max_connections() -> u32 {
    5
}

/// Parse an `HH:MM` clock time
pub fn parse_clock(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .with_context(|| format!("invalid clock time '{}', expected HH:MM", raw))
}

impl AppConfig {
    /// Load from the default file, the optional override file and the environment.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false));

        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(config::File::with_name(&path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix("TRADER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?;

        let config: AppConfig = settings
            .try_deserialize()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.risk.limits.validate()?;

        if self.risk.initial_capital <= 0.0 {
            anyhow::bail!("risk.initial_capital must be positive");
        }
        if self.llm.timeout_secs == 0 || self.llm.max_iterations == 0 {
            anyhow::bail!("llm.timeout_secs and llm.max_iterations must be positive");
        }

        let scheduler = &self.scheduler;
        for trigger in &scheduler.triggers {
            parse_clock(&trigger.time)?;
            if trigger.session == DecisionType::OnDemand {
                anyhow::bail!("ON_DEMAND sessions cannot be scheduled");
            }
        }
        let open = parse_clock(&scheduler.market_open)?;
        let close = parse_clock(&scheduler.market_close)?;
        if open >= close {
            anyhow::bail!("scheduler.market_open must be before market_close");
        }
        parse_clock(&scheduler.snapshot_time)?;
        if scheduler.stop_loss_interval_minutes == 0 || scheduler.token_refresh_hours == 0 {
            anyhow::bail!("scheduler intervals must be positive");
        }

        Ok(())
    }

    pub fn log_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::INFO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.scheduler.triggers.len(), 6);
        assert_eq!(config.scheduler.schedule_tz, chrono_tz::Asia::Seoul);
        assert_eq!(config.log_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_sections_deserialize_from_toml() {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                log_level = "debug"

                [risk]
                initial_capital = 50000.0

                [risk.limits]
                max_position_size_pct = 25.0

                [llm]
                model = "deepseek-chat"
                base_url = "https://api.deepseek.com/v1"

                [scheduler]
                market_tz = "America/New_York"
                triggers = [{ session = "PRE_MARKET", regime = "winter", time = "23:25" }]
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();

        let config: AppConfig = settings.try_deserialize().unwrap();
        config.validate().unwrap();

        assert_eq!(config.log_level(), tracing::Level::DEBUG);
        assert_eq!(config.risk.limits.max_position_size_pct, 25.0);
        assert_eq!(config.risk.limits.daily_loss_limit_pct, 20.0);
        assert_eq!(config.llm.model, "deepseek-chat");
        assert_eq!(config.llm.max_iterations, 10);
        assert_eq!(config.scheduler.triggers[0].time, "23:25");
        assert_eq!(config.scheduler.stop_loss_interval_minutes, 30);
    }

    #[test]
    fn test_rejects_bad_schedule() {
        let mut config = AppConfig::default();
        config.scheduler.market_open = "17:00".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scheduler.triggers[0].time = "25:99".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_clock() {
        assert_eq!(parse_clock("05:50").unwrap(), NaiveTime::from_hms_opt(5, 50, 0).unwrap());
        assert!(parse_clock("5pm").is_err());
    }
}

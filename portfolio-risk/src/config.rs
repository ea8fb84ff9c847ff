//! Risk management configuration

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Overall risk management configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Concentration, daily-loss and stop-loss limits
    #[serde(default)]
    pub limits: RiskLimits,

    /// Capital the account started with, the baseline for total P/L
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            limits: RiskLimits::default(),
            initial_capital: default_initial_capital(),
        }
    }
}

fn default_initial_capital() -> f64 {
    1_000_000.0
}

/// Process-wide risk limits, all in percent (40.0 == 40%)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskLimits {
    /// Maximum value of a single position as a share of total assets
    #[serde(default = "default_max_position_size_pct")]
    pub max_position_size_pct: f64,

    /// Daily loss that trips the circuit breaker
    #[serde(default = "default_daily_loss_limit_pct")]
    pub daily_loss_limit_pct: f64,

    /// Unrealized loss per position that forces a full exit
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_position_size_pct: default_max_position_size_pct(),
            daily_loss_limit_pct: default_daily_loss_limit_pct(),
            stop_loss_pct: default_stop_loss_pct(),
        }
    }
}

impl RiskLimits {
    pub fn validate(&self) -> anyhow::Result<()> {
        let in_range = |v: f64| v.is_finite() && v > 0.0 && v <= 100.0;

        if !in_range(self.max_position_size_pct) {
            anyhow::bail!(
                "max_position_size_pct must be in (0, 100], got {}",
                self.max_position_size_pct
            );
        }
        if !in_range(self.daily_loss_limit_pct) {
            anyhow::bail!(
                "daily_loss_limit_pct must be in (0, 100], got {}",
                self.daily_loss_limit_pct
            );
        }
        if !in_range(self.stop_loss_pct) {
            anyhow::bail!("stop_loss_pct must be in (0, 100], got {}", self.stop_loss_pct);
        }
        Ok(())
    }

    /// Human-readable summary shared with the decision prompts.
    pub fn describe(&self) -> String {
        format!(
            "- Maximum position size: {:.0}% of total assets per ticker\n\
             - Daily loss circuit breaker: trading halts at -{:.0}% daily P/L\n\
             - Stop-loss: positions are sold in full at -{:.0}% from average cost",
            self.max_position_size_pct, self.daily_loss_limit_pct, self.stop_loss_pct
        )
    }
}

fn default_max_position_size_pct() -> f64 {
    40.0
}

fn default_daily_loss_limit_pct() -> f64 {
    20.0
}

fn default_stop_loss_pct() -> f64 {
    30.0
}

/// Load risk limits from a TOML file
pub fn load_limits(path: impl AsRef<Path>) -> anyhow::Result<RiskLimits> {
    let content = std::fs::read_to_string(path)?;
    let limits: RiskLimits = toml::from_str(&content)?;
    limits.validate()?;
    Ok(limits)
}

/// Save risk limits to a TOML file
pub fn save_limits(limits: &RiskLimits, path: impl AsRef<Path>) -> anyhow::Result<()> {
    let content = toml::to_string_pretty(limits)?;
    std::fs::write(path, content)?;
    Ok(())
}

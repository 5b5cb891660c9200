use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::core::instrument::canonical_symbol;
use crate::error::ConfigError;
use crate::models::Timeframe;

pub type SharedConfig = Arc<Config>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Account
    pub initial_balance: f64,

    // Risk policy
    pub risk_fraction: f64,
    pub max_risk_per_trade: f64,
    pub min_stop_pips: f64,
    pub max_stop_pips: f64,
    pub atr_period: usize,
    /// Stop must be at least this multiple of ATR (in pips). 0 disables.
    pub atr_stop_floor: f64,

    // Entry geometry
    pub entry_offset_pips: f64,
    pub stop_buffer_pips: f64,
    pub retest_tolerance_pips: f64,

    // Targets
    pub weekly_profit_threshold: f64,
    pub base_reward_ratio: f64,
    pub enhanced_reward_ratio: f64,

    // Compliance
    pub daily_loss_limit: f64,
    pub max_drawdown: f64,

    // Pattern
    pub coarse_tf: Timeframe,
    pub fine_tf: Timeframe,
    pub swing_lookback: usize,
    pub break_confirm_candles: usize,
    pub retest_window_candles: usize,
    pub max_signal_age_secs: u64,
    pub history_limit: usize,

    // Handoff
    pub instruction_max_age_secs: u64,
    pub handoff_dir: String,

    // Calendar
    pub timezone: String,
    pub daily_reset_hour: u32,

    // Instruments
    pub instruments: Vec<String>,
    pub enabled: HashMap<String, bool>,
    /// Quote currency -> USD, for instruments not quoted in or based on USD.
    pub quote_rates: HashMap<String, f64>,

    // Runtime
    pub candle_file: Option<String>,
    /// Skip replayed candles stamped at or before this instant.
    pub replay_start: Option<DateTime<Utc>>,
    pub poll_interval_ms: u64,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        let instruments: Vec<String> = ["EURUSD", "USDJPY", "XAUUSD", "NAS100", "BTCUSD"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let enabled = instruments.iter().map(|s| (s.clone(), true)).collect();

        Config {
            initial_balance: 100_000.0,
            risk_fraction: 0.0055,
            max_risk_per_trade: 0.01,
            min_stop_pips: 4.0,
            max_stop_pips: 15.0,
            atr_period: 14,
            atr_stop_floor: 0.5,
            entry_offset_pips: 6.0,
            stop_buffer_pips: 1.0,
            retest_tolerance_pips: 2.0,
            weekly_profit_threshold: 0.02,
            base_reward_ratio: 1.0,
            enhanced_reward_ratio: 2.0,
            daily_loss_limit: 0.05,
            max_drawdown: 0.10,
            coarse_tf: Timeframe::H1,
            fine_tf: Timeframe::M5,
            swing_lookback: 2,
            break_confirm_candles: 12,
            retest_window_candles: 12,
            max_signal_age_secs: 1800,
            history_limit: 500,
            instruction_max_age_secs: 180,
            handoff_dir: "handoff".to_string(),
            timezone: "America/New_York".to_string(),
            daily_reset_hour: 17,
            instruments,
            enabled,
            quote_rates: HashMap::new(),
            candle_file: None,
            replay_start: None,
            poll_interval_ms: 1000,
            log_level: "INFO".to_string(),
        }
    }
}

impl Config {
    /// Load from the environment (and `.env`). Any variable that is present
    /// but unparseable, and any contradictory combination, is fatal.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let d = Config::default();

        let instruments = match std::env::var("INSTRUMENTS") {
            Ok(raw) => split_list(&raw).map(|s| canonical_symbol(&s)).collect(),
            Err(_) => d.instruments.clone(),
        };
        let disabled: Vec<String> = std::env::var("DISABLED_INSTRUMENTS")
            .map(|raw| split_list(&raw).map(|s| canonical_symbol(&s)).collect())
            .unwrap_or_default();
        let enabled = instruments
            .iter()
            .map(|s| (s.clone(), !disabled.contains(s)))
            .collect();

        let quote_rates = match std::env::var("QUOTE_RATES") {
            Ok(raw) => parse_rates(&raw)?,
            Err(_) => HashMap::new(),
        };

        let cfg = Config {
            initial_balance: env_or("INITIAL_BALANCE", d.initial_balance)?,
            risk_fraction: env_or("RISK_FRACTION", d.risk_fraction)?,
            max_risk_per_trade: env_or("MAX_RISK_PER_TRADE", d.max_risk_per_trade)?,
            min_stop_pips: env_or("MIN_STOP_PIPS", d.min_stop_pips)?,
            max_stop_pips: env_or("MAX_STOP_PIPS", d.max_stop_pips)?,
            atr_period: env_or("ATR_PERIOD", d.atr_period)?,
            atr_stop_floor: env_or("ATR_STOP_FLOOR", d.atr_stop_floor)?,
            entry_offset_pips: env_or("ENTRY_OFFSET_PIPS", d.entry_offset_pips)?,
            stop_buffer_pips: env_or("STOP_BUFFER_PIPS", d.stop_buffer_pips)?,
            retest_tolerance_pips: env_or("RETEST_TOLERANCE_PIPS", d.retest_tolerance_pips)?,
            weekly_profit_threshold: env_or("WEEKLY_PROFIT_THRESHOLD", d.weekly_profit_threshold)?,
            base_reward_ratio: env_or("BASE_REWARD_RATIO", d.base_reward_ratio)?,
            enhanced_reward_ratio: env_or("ENHANCED_REWARD_RATIO", d.enhanced_reward_ratio)?,
            daily_loss_limit: env_or("DAILY_LOSS_LIMIT", d.daily_loss_limit)?,
            max_drawdown: env_or("MAX_DRAWDOWN", d.max_drawdown)?,
            coarse_tf: env_or("COARSE_TF", d.coarse_tf)?,
            fine_tf: env_or("FINE_TF", d.fine_tf)?,
            swing_lookback: env_or("SWING_LOOKBACK", d.swing_lookback)?,
            break_confirm_candles: env_or("BREAK_CONFIRM_CANDLES", d.break_confirm_candles)?,
            retest_window_candles: env_or("RETEST_WINDOW_CANDLES", d.retest_window_candles)?,
            max_signal_age_secs: env_or("MAX_SIGNAL_AGE_SECS", d.max_signal_age_secs)?,
            history_limit: env_or("HISTORY_LIMIT", d.history_limit)?,
            instruction_max_age_secs: env_or(
                "INSTRUCTION_MAX_AGE_SECS",
                d.instruction_max_age_secs,
            )?,
            handoff_dir: std::env::var("HANDOFF_DIR").unwrap_or(d.handoff_dir),
            timezone: std::env::var("ENGINE_TIMEZONE").unwrap_or(d.timezone),
            daily_reset_hour: env_or("DAILY_RESET_HOUR", d.daily_reset_hour)?,
            instruments,
            enabled,
            quote_rates,
            candle_file: std::env::var("CANDLE_FILE").ok(),
            replay_start: std::env::var("REPLAY_START")
                .ok()
                .map(|raw| {
                    raw.trim().parse().map_err(|_| ConfigError::Unparseable {
                        key: "REPLAY_START".to_string(),
                        value: raw,
                    })
                })
                .transpose()?,
            poll_interval_ms: env_or("POLL_INTERVAL_MS", d.poll_interval_ms)?,
            log_level: std::env::var("LOG_LEVEL").unwrap_or(d.log_level),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings that would leave the risk parameters ambiguous.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let bad = |msg: String| Err(ConfigError::Contradictory(msg));

        if !(self.initial_balance > 0.0) {
            return bad(format!("initial balance must be positive, got {}", self.initial_balance));
        }
        if !(self.min_stop_pips > 0.0 && self.min_stop_pips < self.max_stop_pips) {
            return bad(format!(
                "stop band [{}, {}] pips is empty or non-positive",
                self.min_stop_pips, self.max_stop_pips
            ));
        }
        if !(self.max_risk_per_trade > 0.0 && self.max_risk_per_trade < 1.0) {
            return bad(format!("per-trade risk cap {} outside (0, 1)", self.max_risk_per_trade));
        }
        if !(self.risk_fraction > 0.0 && self.risk_fraction <= self.max_risk_per_trade) {
            return bad(format!(
                "risk fraction {} must be in (0, per-trade cap {}]",
                self.risk_fraction, self.max_risk_per_trade
            ));
        }
        for (name, v) in [
            ("daily loss limit", self.daily_loss_limit),
            ("max drawdown", self.max_drawdown),
        ] {
            if !(v > 0.0 && v < 1.0) {
                return bad(format!("{name} {v} outside (0, 1)"));
            }
        }
        if !(self.entry_offset_pips > 0.0) {
            return bad("entry offset must be positive".to_string());
        }
        if self.stop_buffer_pips < 0.0
            || self.retest_tolerance_pips < 0.0
            || self.atr_stop_floor < 0.0
        {
            return bad("stop buffer, retest tolerance and ATR floor cannot be negative".into());
        }
        if !(self.base_reward_ratio > 0.0 && self.enhanced_reward_ratio >= self.base_reward_ratio) {
            return bad(format!(
                "reward ratios base {} / enhanced {} are inconsistent",
                self.base_reward_ratio, self.enhanced_reward_ratio
            ));
        }
        if self.weekly_profit_threshold <= 0.0 {
            return bad("weekly profit threshold must be positive".to_string());
        }
        if self.coarse_tf.as_duration() <= self.fine_tf.as_duration() {
            return bad(format!(
                "coarse timeframe {} must be longer than fine timeframe {}",
                self.coarse_tf, self.fine_tf
            ));
        }
        if self.swing_lookback == 0
            || self.break_confirm_candles == 0
            || self.retest_window_candles == 0
            || self.atr_period == 0
            || self.max_signal_age_secs == 0
            || self.instruction_max_age_secs == 0
        {
            return bad("windows, periods and ages must be non-zero".to_string());
        }
        if self.history_limit <= self.atr_period + 1
            || self.history_limit < self.swing_lookback * 4 + 3
        {
            return bad(format!(
                "history limit {} too short for the configured windows",
                self.history_limit
            ));
        }
        if self.daily_reset_hour > 23 {
            return bad(format!("daily reset hour {} outside 0..=23", self.daily_reset_hour));
        }
        self.tz()?;
        Ok(())
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::UnknownTimezone(self.timezone.clone()))
    }

    pub fn is_enabled(&self, symbol: &str) -> bool {
        self.enabled
            .get(&canonical_symbol(symbol))
            .copied()
            .unwrap_or(false)
    }

    pub fn max_signal_age(&self) -> Duration {
        Duration::seconds(self.max_signal_age_secs as i64)
    }

    pub fn instruction_max_age(&self) -> Duration {
        Duration::seconds(self.instruction_max_age_secs as i64)
    }

    pub fn shared(self) -> SharedConfig {
        Arc::new(self)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Unparseable {
            key: key.to_string(),
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// "JPY:0.0067,GBP:1.27"
fn parse_rates(raw: &str) -> Result<HashMap<String, f64>, ConfigError> {
    let unparseable = || ConfigError::Unparseable {
        key: "QUOTE_RATES".to_string(),
        value: raw.to_string(),
    };
    split_list(raw)
        .map(|pair| {
            let (ccy, rate) = pair.split_once(':').ok_or_else(unparseable)?;
            let rate: f64 = rate.trim().parse().map_err(|_| unparseable())?;
            if !(rate > 0.0) {
                return Err(unparseable());
            }
            Ok((ccy.trim().to_uppercase(), rate))
        })
        .collect()
}

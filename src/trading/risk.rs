use std::collections::HashMap;

use crate::config::Config;
use crate::core::normalizer::ValueNormalizer;
use crate::core::volatility::average_true_range;
use crate::error::EngineError;
use crate::models::{CandleSeries, ResetReason, Timeframe};
use crate::strategies::signals::{EntrySignal, EntryTrigger, RetestConfirmation};

#[derive(Debug, Clone)]
pub struct RiskParams {
    pub risk_fraction: f64,
    pub min_stop_pips: f64,
    pub max_stop_pips: f64,
    pub atr_period: usize,
    pub atr_stop_floor: f64,
    pub stop_buffer_pips: f64,
    pub base_reward_ratio: f64,
    pub enhanced_reward_ratio: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Accepted(EntrySignal),
    Rejected { reason: ResetReason, stop_pips: f64 },
}

/// Snapshot of what the sizing needs from the rest of the engine.
pub struct SizingInput<'a> {
    pub symbol: &'a str,
    pub retest: &'a RetestConfirmation,
    pub trigger: &'a EntryTrigger,
    pub fine: &'a CandleSeries,
    pub fine_tf: Timeframe,
    pub balance: f64,
    /// The instrument crossed its weekly profit threshold earlier this week.
    pub weekly_enhanced: bool,
    pub quote_rates: &'a HashMap<String, f64>,
}

pub struct RiskEngine {
    params: RiskParams,
}

impl RiskEngine {
    pub fn new(params: RiskParams) -> Self {
        Self { params }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(RiskParams {
            risk_fraction: cfg.risk_fraction,
            min_stop_pips: cfg.min_stop_pips,
            max_stop_pips: cfg.max_stop_pips,
            atr_period: cfg.atr_period,
            atr_stop_floor: cfg.atr_stop_floor,
            stop_buffer_pips: cfg.stop_buffer_pips,
            base_reward_ratio: cfg.base_reward_ratio,
            enhanced_reward_ratio: cfg.enhanced_reward_ratio,
        })
    }

    pub fn params(&self) -> &RiskParams {
        &self.params
    }

    /// Stop sits beyond the retest touch by the configured buffer.
    pub fn stop_price(&self, retest: &RetestConfirmation, normalizer: &ValueNormalizer) -> f64 {
        let buffer = normalizer.from_pips(self.params.stop_buffer_pips);
        normalizer.round_to_tick(retest.touch - buffer * retest.direction.sign())
    }

    /// Band check only. `None` means the distance is tradable.
    pub fn check_band(&self, stop_pips: f64) -> Option<ResetReason> {
        (stop_pips < self.params.min_stop_pips || stop_pips > self.params.max_stop_pips)
            .then_some(ResetReason::StopOutsideBand)
    }

    pub fn reward_ratio(&self, weekly_enhanced: bool) -> f64 {
        if weekly_enhanced {
            self.params.enhanced_reward_ratio
        } else {
            self.params.base_reward_ratio
        }
    }

    /// Validate the stop and size the entry.
    ///
    /// Data problems (no ATR history, missing conversion rate) are errors and
    /// the caller must fail closed. Everything else comes back as a decision.
    pub fn evaluate(
        &self,
        input: &SizingInput<'_>,
        normalizer: &ValueNormalizer,
    ) -> Result<RiskDecision, EngineError> {
        let direction = input.trigger.direction;
        let entry = input.trigger.price;
        let stop = self.stop_price(input.retest, normalizer);
        let stop_pips = round6(normalizer.distance_pips(entry, stop));

        if let Some(reason) = self.check_band(stop_pips) {
            return Ok(RiskDecision::Rejected { reason, stop_pips });
        }

        let window = input.fine.tail(self.params.atr_period + 1);
        let atr = average_true_range(window, self.params.atr_period).ok_or_else(|| {
            EngineError::InsufficientHistory {
                symbol: input.symbol.to_string(),
                timeframe: input.fine_tf,
                needed: self.params.atr_period + 1,
                have: input.fine.len(),
            }
        })?;
        let atr_pips = normalizer.to_pips(atr);
        if stop_pips < self.params.atr_stop_floor * atr_pips {
            return Ok(RiskDecision::Rejected {
                reason: ResetReason::StopBelowVolatilityFloor,
                stop_pips,
            });
        }

        let pip_value = normalizer.pip_value_per_unit(entry, input.quote_rates)?;
        let size = position_size(
            input.balance,
            self.params.risk_fraction,
            stop_pips,
            pip_value,
            normalizer,
        );
        let reward_ratio = self.reward_ratio(input.weekly_enhanced);
        let reward = (entry - stop).abs() * reward_ratio * direction.sign();
        let target = normalizer.round_to_tick(entry + reward);

        Ok(RiskDecision::Accepted(EntrySignal {
            symbol: input.symbol.to_string(),
            direction,
            entry_price: entry,
            stop_price: stop,
            target_price: target,
            size,
            stop_pips,
            reward_ratio,
            pip_value,
            potential_loss: round2(stop_pips * size * pip_value),
        }))
    }
}

/// `balance × risk_fraction / (stop_pips × pip_value)`, on the size grid.
pub fn position_size(
    balance: f64,
    risk_fraction: f64,
    stop_pips: f64,
    pip_value: f64,
    normalizer: &ValueNormalizer,
) -> f64 {
    let raw = balance * risk_fraction / (stop_pips * pip_value);
    normalizer.round_size(raw)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round6(v: f64) -> f64 {
    (v * 1e6).round() / 1e6
}

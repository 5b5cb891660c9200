use std::collections::HashMap;
use std::sync::Arc;

use crate::core::instrument::InstrumentProfile;
use crate::error::EngineError;

/// Account currency every monetary figure is expressed in.
pub const ACCOUNT_CURRENCY: &str = "USD";

/// Converts between raw price deltas and pip distances for one instrument.
#[derive(Debug, Clone)]
pub struct ValueNormalizer {
    profile: Arc<InstrumentProfile>,
}

impl ValueNormalizer {
    pub fn new(profile: Arc<InstrumentProfile>) -> Self {
        Self { profile }
    }

    pub fn pip_size(&self) -> f64 {
        self.profile.pip_size
    }

    /// Signed price delta in pips.
    pub fn to_pips(&self, delta: f64) -> f64 {
        delta / self.profile.pip_size
    }

    /// Absolute distance between two prices in pips.
    pub fn distance_pips(&self, a: f64, b: f64) -> f64 {
        self.to_pips((a - b).abs())
    }

    pub fn from_pips(&self, pips: f64) -> f64 {
        pips * self.profile.pip_size
    }

    pub fn round_to_tick(&self, price: f64) -> f64 {
        let tick = self.profile.tick_size;
        let rounded = (price / tick).round() * tick;
        // Strip binary noise below the tick's own precision.
        let decimals = decimals_of(tick);
        let scale = 10f64.powi(decimals);
        (rounded * scale).round() / scale
    }

    /// Round a raw size to the instrument's step, then clamp to its limits.
    pub fn round_size(&self, size: f64) -> f64 {
        let step = self.profile.size_step;
        let stepped = (size / step).round() * step;
        let scale = 10f64.powi(decimals_of(step));
        let stepped = (stepped * scale).round() / scale;
        stepped.clamp(self.profile.min_size, self.profile.max_size)
    }

    /// Monetary value of a one-pip move for 1.0 of size, in the account currency.
    ///
    /// Dollar-quoted instruments need nothing else. Dollar-based pairs convert
    /// through the current price. Anything else needs a configured
    /// quote->USD rate; without one this refuses rather than guessing.
    pub fn pip_value_per_unit(
        &self,
        price: f64,
        quote_rates: &HashMap<String, f64>,
    ) -> Result<f64, EngineError> {
        let p = &self.profile;
        let raw = p.pip_size * p.contract_size;

        if p.quote_currency == ACCOUNT_CURRENCY {
            return Ok(raw);
        }
        if p.base_currency.as_deref() == Some(ACCOUNT_CURRENCY) {
            if !price.is_finite() || price <= 0.0 {
                return Err(EngineError::InvalidPrice(price));
            }
            return Ok(raw / price);
        }
        match quote_rates.get(&p.quote_currency) {
            Some(rate) if rate.is_finite() && *rate > 0.0 => Ok(raw * rate),
            _ => Err(EngineError::QuoteRateMissing {
                symbol: p.symbol.clone(),
                currency: p.quote_currency.clone(),
            }),
        }
    }
}

fn decimals_of(step: f64) -> i32 {
    let mut decimals = 0;
    let mut scaled = step;
    while decimals < 10 && (scaled - scaled.round()).abs() > 1e-9 {
        scaled *= 10.0;
        decimals += 1;
    }
    decimals
}

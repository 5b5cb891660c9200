use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Forex,
    Index,
    Crypto,
    Metal,
    Energy,
    Agricultural,
    Bond,
    Equity,
    Fund,
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AssetClass::Forex => "forex",
            AssetClass::Index => "index",
            AssetClass::Crypto => "crypto",
            AssetClass::Metal => "metal",
            AssetClass::Energy => "energy",
            AssetClass::Agricultural => "agricultural",
            AssetClass::Bond => "bond",
            AssetClass::Equity => "equity",
            AssetClass::Fund => "fund",
        };
        write!(f, "{s}")
    }
}

/// Instruments whose pip size departs from the rest of their class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialCase {
    /// Pip size set by the quote currency (JPY/HUF quoted pairs).
    QuoteCurrencyPip,
    /// Highest-priced coin, quoted in whole units.
    HighPricedCrypto,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentProfile {
    pub symbol: String,
    pub asset_class: AssetClass,
    pub tick_size: f64,
    pub pip_size: f64,
    pub special_case: Option<SpecialCase>,
    /// Only known for currency pairs and metals/crypto quoted against a currency.
    pub base_currency: Option<String>,
    pub quote_currency: String,
    /// Units of the underlying per 1.0 of position size.
    pub contract_size: f64,
    pub size_step: f64,
    pub min_size: f64,
    pub max_size: f64,
}

const CURRENCIES: &[&str] = &[
    "USD", "EUR", "GBP", "JPY", "CHF", "AUD", "NZD", "CAD", "SEK", "NOK", "DKK", "SGD", "HKD",
    "ZAR", "MXN", "PLN", "HUF", "TRY", "CNH", "CZK",
];

/// Quote currencies with a 0.01 pip.
const TWO_DECIMAL_QUOTES: &[&str] = &["JPY", "HUF"];

const METALS: &[(&str, f64, f64)] = &[
    // (code, pip, contract size)
    ("XAU", 0.1, 100.0),
    ("XAG", 0.01, 5000.0),
    ("XPT", 0.1, 100.0),
    ("XPD", 0.1, 100.0),
];

const CRYPTO_QUOTES: &[&str] = &["USDT", "USDC", "USD"];

const INDICES: &[(&str, &str)] = &[
    ("US30", "USD"),
    ("DJ30", "USD"),
    ("NAS100", "USD"),
    ("USTEC", "USD"),
    ("SPX500", "USD"),
    ("US500", "USD"),
    ("US2000", "USD"),
    ("GER40", "EUR"),
    ("DE40", "EUR"),
    ("FRA40", "EUR"),
    ("EU50", "EUR"),
    ("UK100", "GBP"),
    ("JP225", "JPY"),
    ("AUS200", "AUD"),
    ("HK50", "HKD"),
];

const OIL: &[&str] = &["USOIL", "WTI", "XTIUSD", "UKOIL", "BRENT", "XBRUSD"];
const GAS: &[&str] = &["NATGAS", "NGAS", "XNGUSD"];
const AGRICULTURAL: &[&str] = &["CORN", "WHEAT", "SOYBEAN", "COFFEE", "SUGAR", "COCOA", "COTTON"];

const BONDS: &[(&str, &str)] = &[
    ("US02Y", "USD"),
    ("US05Y", "USD"),
    ("US10Y", "USD"),
    ("US30Y", "USD"),
    ("BUND", "EUR"),
    ("OAT", "EUR"),
    ("BTP", "EUR"),
    ("GILT", "GBP"),
];

const EQUITIES: &[&str] = &["AAPL", "MSFT", "AMZN", "GOOGL", "META", "NVDA", "TSLA", "NFLX"];
const FUNDS: &[&str] = &["SPY", "QQQ", "IWM", "DIA", "GLD", "SLV", "TLT", "VTI", "VOO", "EEM"];

/// Uppercase and strip separators: "eur/usd" and "EUR_USD" both become "EURUSD".
pub fn canonical_symbol(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '/' | '-' | '_' | ' '))
        .flat_map(char::to_uppercase)
        .collect()
}

/// Classify an instrument identifier. Pure: the same identifier always gives
/// the same profile. Unknown identifiers are an error, never a generic default.
pub fn classify(raw: &str) -> Result<InstrumentProfile, EngineError> {
    let symbol = canonical_symbol(raw);
    let unavailable = || EngineError::ProfileUnavailable(raw.to_string());
    if symbol.is_empty() {
        return Err(unavailable());
    }

    if let Some(profile) = listed_security(&symbol) {
        return Ok(profile);
    }
    if let Some(&(_, quote)) = INDICES.iter().find(|(name, _)| *name == symbol) {
        return Ok(flat_profile(&symbol, AssetClass::Index, 1.0, quote, 1.0, 0.1, 0.1, 500.0));
    }
    if OIL.contains(&symbol.as_str()) {
        return Ok(flat_profile(
            &symbol,
            AssetClass::Energy,
            0.01,
            "USD",
            1000.0,
            0.01,
            0.01,
            100.0,
        ));
    }
    if GAS.contains(&symbol.as_str()) {
        return Ok(flat_profile(
            &symbol,
            AssetClass::Energy,
            0.001,
            "USD",
            10000.0,
            0.01,
            0.01,
            100.0,
        ));
    }
    if AGRICULTURAL.contains(&symbol.as_str()) {
        return Ok(flat_profile(
            &symbol,
            AssetClass::Agricultural,
            0.01,
            "USD",
            100.0,
            0.1,
            0.1,
            200.0,
        ));
    }
    if let Some(&(_, quote)) = BONDS.iter().find(|(name, _)| *name == symbol) {
        return Ok(flat_profile(&symbol, AssetClass::Bond, 0.01, quote, 1000.0, 0.1, 0.1, 100.0));
    }
    if let Some(profile) = metal(&symbol) {
        return Ok(profile);
    }
    if let Some(profile) = crypto(&symbol) {
        return Ok(profile);
    }
    if let Some(profile) = forex(&symbol) {
        return Ok(profile);
    }

    Err(unavailable())
}

#[allow(clippy::too_many_arguments)]
fn flat_profile(
    symbol: &str,
    asset_class: AssetClass,
    pip_size: f64,
    quote: &str,
    contract_size: f64,
    size_step: f64,
    min_size: f64,
    max_size: f64,
) -> InstrumentProfile {
    InstrumentProfile {
        symbol: symbol.to_string(),
        asset_class,
        tick_size: pip_size / 10.0,
        pip_size,
        special_case: None,
        base_currency: None,
        quote_currency: quote.to_string(),
        contract_size,
        size_step,
        min_size,
        max_size,
    }
}

fn listed_security(symbol: &str) -> Option<InstrumentProfile> {
    let (ticker, suffix) = match symbol.rsplit_once('.') {
        Some((t, s)) => (t, Some(s)),
        None => (symbol, None),
    };
    if ticker.is_empty() {
        return None;
    }
    let class = match suffix {
        Some("ETF") => AssetClass::Fund,
        Some("US") | Some("UK") | Some("DE") => {
            if FUNDS.contains(&ticker) {
                AssetClass::Fund
            } else {
                AssetClass::Equity
            }
        }
        Some(_) => return None,
        None if FUNDS.contains(&ticker) => AssetClass::Fund,
        None if EQUITIES.contains(&ticker) => AssetClass::Equity,
        None => return None,
    };
    let quote = match suffix {
        Some("UK") => "GBP",
        Some("DE") => "EUR",
        _ => "USD",
    };
    Some(flat_profile(symbol, class, 0.01, quote, 1.0, 1.0, 1.0, 10000.0))
}

fn metal(symbol: &str) -> Option<InstrumentProfile> {
    let symbol = match symbol {
        "GOLD" => "XAUUSD",
        "SILVER" => "XAGUSD",
        s => s,
    };
    if symbol.len() != 6 || !symbol.is_ascii() {
        return None;
    }
    let (base, quote) = symbol.split_at(3);
    let &(code, pip, contract) = METALS.iter().find(|(code, _, _)| *code == base)?;
    if !CURRENCIES.contains(&quote) {
        return None;
    }
    Some(InstrumentProfile {
        symbol: symbol.to_string(),
        asset_class: AssetClass::Metal,
        tick_size: pip / 10.0,
        pip_size: pip,
        special_case: None,
        base_currency: Some(code.to_string()),
        quote_currency: quote.to_string(),
        contract_size: contract,
        size_step: 0.01,
        min_size: 0.01,
        max_size: 50.0,
    })
}

fn crypto(symbol: &str) -> Option<InstrumentProfile> {
    let base = CRYPTO_QUOTES
        .iter()
        .find_map(|q| symbol.strip_suffix(q))?;

    let (pip, special, step, min, max) = match base {
        "BTC" => (1.0, Some(SpecialCase::HighPricedCrypto), 0.01, 0.01, 10.0),
        "ETH" => (0.1, None, 0.01, 0.01, 100.0),
        "SOL" | "LTC" | "BNB" | "BCH" | "AVAX" | "LINK" | "DOT" => (0.01, None, 0.1, 0.1, 10000.0),
        "XRP" | "ADA" | "DOGE" | "MATIC" | "TRX" | "XLM" => (0.0001, None, 1.0, 1.0, 1_000_000.0),
        _ => return None,
    };
    Some(InstrumentProfile {
        symbol: symbol.to_string(),
        asset_class: AssetClass::Crypto,
        tick_size: pip / 10.0,
        pip_size: pip,
        special_case: special,
        base_currency: Some(base.to_string()),
        // Stablecoin quotes settle as dollars.
        quote_currency: "USD".to_string(),
        contract_size: 1.0,
        size_step: step,
        min_size: min,
        max_size: max,
    })
}

fn forex(symbol: &str) -> Option<InstrumentProfile> {
    if symbol.len() != 6 || !symbol.is_ascii() {
        return None;
    }
    let (base, quote) = symbol.split_at(3);
    if base == quote || !CURRENCIES.contains(&base) || !CURRENCIES.contains(&quote) {
        return None;
    }
    let (pip, special) = if TWO_DECIMAL_QUOTES.contains(&quote) {
        (0.01, Some(SpecialCase::QuoteCurrencyPip))
    } else {
        (0.0001, None)
    };
    Some(InstrumentProfile {
        symbol: symbol.to_string(),
        asset_class: AssetClass::Forex,
        tick_size: pip / 10.0,
        pip_size: pip,
        special_case: special,
        base_currency: Some(base.to_string()),
        quote_currency: quote.to_string(),
        contract_size: 100_000.0,
        size_step: 0.01,
        min_size: 0.01,
        max_size: 100.0,
    })
}

/// Process-lifetime cache over [`classify`].
#[derive(Debug, Default)]
pub struct ProfileResolver {
    cache: HashMap<String, Arc<InstrumentProfile>>,
}

impl ProfileResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&mut self, raw: &str) -> Result<Arc<InstrumentProfile>, EngineError> {
        let key = canonical_symbol(raw);
        if let Some(profile) = self.cache.get(&key) {
            return Ok(Arc::clone(profile));
        }
        let profile = Arc::new(classify(raw)?);
        self.cache.insert(key, Arc::clone(&profile));
        Ok(profile)
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pip(symbol: &str) -> f64 {
        classify(symbol).unwrap().pip_size
    }

    #[test]
    fn forex_pip_sizes() {
        assert!((pip("EURUSD") - 0.0001).abs() < 1e-12);
        assert!((pip("eur/usd") - 0.0001).abs() < 1e-12);
        assert!((pip("USDJPY") - 0.01).abs() < 1e-12);
        assert!((pip("EURHUF") - 0.01).abs() < 1e-12);

        let jpy = classify("USD_JPY").unwrap();
        assert_eq!(jpy.special_case, Some(SpecialCase::QuoteCurrencyPip));
        assert_eq!(jpy.base_currency.as_deref(), Some("USD"));
        assert_eq!(jpy.quote_currency, "JPY");
    }

    #[test]
    fn every_asset_class_resolves() {
        let cases = [
            ("GBPUSD", AssetClass::Forex, 0.0001),
            ("NAS100", AssetClass::Index, 1.0),
            ("BTCUSD", AssetClass::Crypto, 1.0),
            ("ETH-USDT", AssetClass::Crypto, 0.1),
            ("XRPUSD", AssetClass::Crypto, 0.0001),
            ("XAUUSD", AssetClass::Metal, 0.1),
            ("XAGUSD", AssetClass::Metal, 0.01),
            ("USOIL", AssetClass::Energy, 0.01),
            ("NATGAS", AssetClass::Energy, 0.001),
            ("WHEAT", AssetClass::Agricultural, 0.01),
            ("US10Y", AssetClass::Bond, 0.01),
            ("AAPL.US", AssetClass::Equity, 0.01),
            ("NVDA", AssetClass::Equity, 0.01),
            ("SPY", AssetClass::Fund, 0.01),
            ("ARKK.ETF", AssetClass::Fund, 0.01),
        ];
        for (symbol, class, pip) in cases {
            let p = classify(symbol).unwrap_or_else(|e| panic!("{symbol}: {e}"));
            assert_eq!(p.asset_class, class, "{symbol}");
            assert!((p.pip_size - pip).abs() < 1e-12, "{symbol}");
            assert!(p.tick_size < p.pip_size, "{symbol}");
        }
        assert_eq!(
            classify("BTCUSD").unwrap().special_case,
            Some(SpecialCase::HighPricedCrypto)
        );
    }

    #[test]
    fn unknown_instrument_fails_closed() {
        for symbol in ["", "FOOBAR", "EUREUR", "XYZUSD", "ABC.ZZ"] {
            assert!(
                matches!(classify(symbol), Err(EngineError::ProfileUnavailable(_))),
                "{symbol} should not resolve"
            );
        }
    }

    #[test]
    fn resolver_caches_by_canonical_symbol() {
        let mut resolver = ProfileResolver::new();
        let a = resolver.resolve("eur/usd").unwrap();
        let b = resolver.resolve("EURUSD").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(resolver.cached(), 1);
        assert!(resolver.resolve("NOPE").is_err());
        assert_eq!(resolver.cached(), 1);
    }
}

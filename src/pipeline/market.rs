/// Decimal-odds → probability conversion for 1X2 markets.
///
/// Raw implied probability of a leg is `r = 1 / odds`. The bookmaker margin
/// (overround) is `Σr − 1`, and the de-margined ("no-vig") probability uses
/// the proportional method:
///   p_i = r_i / Σr
use serde::{Deserialize, Serialize};

use crate::db::models::{OddsQuote, Side, Triple};

use super::error::ItemError;

/// Implied and de-margined probabilities for a complete market.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MarketProbs {
    pub raw: Triple,
    pub novig: Triple,
    pub overround: f64,
}

/// A leg is usable only if present, finite and strictly above 1.0.
fn valid_leg(odds: Option<f64>) -> Option<f64> {
    odds.filter(|o| o.is_finite() && *o > 1.0)
}

/// All three odds as a triple, or `None` if any leg is unusable.
pub fn complete_odds(quote: &OddsQuote) -> Option<Triple> {
    Some(Triple::new(
        valid_leg(quote.h)?,
        valid_leg(quote.d)?,
        valid_leg(quote.a)?,
    ))
}

/// Normalize a quote. Any missing, zero or ≤ 1.0 leg makes the market
/// incomplete and nothing is produced.
pub fn normalize(quote: &OddsQuote) -> Result<MarketProbs, ItemError> {
    let odds = complete_odds(quote).ok_or(ItemError::MarketDataIncomplete)?;
    let raw = Triple::from_fn(|side| 1.0 / odds.get(side));
    let total = raw.sum();
    Ok(MarketProbs {
        raw,
        novig: Triple::from_fn(|side| raw.get(side) / total),
        overround: total - 1.0,
    })
}

/// Expected profit per unit staked at decimal `odds` when the win
/// probability is `p`.
pub fn expected_value(p: f64, odds: f64) -> f64 {
    p * odds - 1.0
}

/// Per-side EV for a probability triple against complete odds.
pub fn ev_triple(p: &Triple, odds: &Triple) -> Triple {
    Triple::from_fn(|side: Side| expected_value(p.get(side), odds.get(side)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn quote(h: f64, d: f64, a: f64) -> OddsQuote {
        OddsQuote::new(Some(h), Some(d), Some(a))
    }

    #[test]
    fn test_reference_market() {
        let m = normalize(&quote(2.0, 3.5, 4.0)).unwrap();
        assert_relative_eq!(m.raw.h, 0.5, epsilon = 1e-9);
        assert_relative_eq!(m.raw.d, 0.285_714, epsilon = 1e-6);
        assert_relative_eq!(m.raw.a, 0.25, epsilon = 1e-9);
        assert_relative_eq!(m.raw.sum(), 1.035_714, epsilon = 1e-6);
        assert_relative_eq!(m.novig.h, 0.4828, epsilon = 1e-4);
        assert_relative_eq!(m.novig.d, 0.2759, epsilon = 1e-4);
        assert_relative_eq!(m.novig.a, 0.2414, epsilon = 1e-4);
        assert_relative_eq!(m.overround, 0.0357, epsilon = 1e-4);
    }

    #[test]
    fn test_novig_sums_to_one() {
        for (h, d, a) in [
            (1.01, 15.0, 40.0),
            (2.5, 3.1, 2.9),
            (1.5, 4.2, 7.5),
            (3.3, 3.3, 3.3),
            (11.0, 6.0, 1.22),
        ] {
            let m = normalize(&quote(h, d, a)).unwrap();
            assert_relative_eq!(m.novig.sum(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_fair_book_has_zero_overround() {
        let m = normalize(&quote(3.0, 3.0, 3.0)).unwrap();
        assert_relative_eq!(m.overround, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_leg_is_incomplete() {
        let q = OddsQuote::new(Some(2.0), None, Some(4.0));
        assert_eq!(normalize(&q), Err(ItemError::MarketDataIncomplete));
    }

    #[test]
    fn test_invalid_legs_are_incomplete() {
        assert!(normalize(&quote(2.0, 0.0, 4.0)).is_err());
        assert!(normalize(&quote(1.0, 3.5, 4.0)).is_err());
        assert!(normalize(&quote(2.0, 3.5, 0.8)).is_err());
        assert!(normalize(&quote(2.0, f64::NAN, 4.0)).is_err());
    }

    #[test]
    fn test_expected_value() {
        assert_relative_eq!(expected_value(0.55, 2.0), 0.10, epsilon = 1e-9);
        assert_relative_eq!(expected_value(0.5, 2.0), 0.0, epsilon = 1e-9);
        assert!(expected_value(0.3, 2.0) < 0.0);
    }
}

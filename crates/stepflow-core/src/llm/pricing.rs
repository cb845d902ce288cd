//! Token cost computation.
//!
//! Rates come from the injected [`PricingConfig`] (USD per million tokens).
//! The arithmetic is done in integer micro-dollars so a step's cost is exact
//! to six decimal places.

use stepflow_types::config::PricingConfig;
use stepflow_types::cost::UsdMicros;

const TOKENS_PER_RATE_UNIT: u128 = 1_000_000;

/// Cost of one completion: exact table lookup by model id, default rate
/// for unknown models, rounded half-up to the micro-dollar.
pub fn compute_cost(
    pricing: &PricingConfig,
    model: &str,
    prompt_tokens: u32,
    completion_tokens: u32,
) -> UsdMicros {
    let (input_rate, output_rate) = pricing.rates_for(model);

    let numerator = u128::from(prompt_tokens) * u128::from(rate_in_micros(input_rate))
        + u128::from(completion_tokens) * u128::from(rate_in_micros(output_rate));
    let micros = (numerator + TOKENS_PER_RATE_UNIT / 2) / TOKENS_PER_RATE_UNIT;

    UsdMicros::from_micros(u64::try_from(micros).unwrap_or(u64::MAX))
}

/// Convert a configured USD rate to whole micro-dollars. Negative or
/// non-finite rates price at zero.
fn rate_in_micros(rate: f64) -> u64 {
    if rate.is_finite() && rate > 0.0 {
        (rate * 1_000_000.0).round() as u64
    } else {
        0
    }
}

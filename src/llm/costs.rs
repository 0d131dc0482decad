//! Per-token pricing for known model families, in USD.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// (input, output) cost per token. Unknown models are priced like Sonnet.
pub(crate) fn model_cost(model: &str) -> (Decimal, Decimal) {
    let model = model.to_lowercase();
    if model.contains("haiku") {
        (dec!(0.0000008), dec!(0.000004))
    } else if model.contains("opus") {
        (dec!(0.000015), dec!(0.000075))
    } else {
        (dec!(0.000003), dec!(0.000015))
    }
}

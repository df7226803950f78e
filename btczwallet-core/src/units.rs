//! Display formatting for coin amounts and fiat prices.

/// Format a coin amount with 8 decimals, dropping one decimal digit for each
/// integer digit beyond four so wide balances keep a fixed width.
pub fn format_balance(value: f64) -> String {
    let formatted = format!("{:.8}", value);
    let (integer_part, decimal_part) = match formatted.split_once('.') {
        Some(parts) => parts,
        None => return formatted,
    };

    let integer_digits = integer_part.trim_start_matches('-').len();
    let decimal_part = if integer_digits > 4 {
        let remove = (integer_digits - 4).min(decimal_part.len());
        &decimal_part[..decimal_part.len() - remove]
    } else {
        decimal_part
    };

    format!("{}.{}", integer_part, decimal_part)
}

/// Format a fiat price with precision chosen by magnitude.
pub fn format_price(price: f64) -> String {
    let precision = match price {
        p if p > 0.000_000_01 && p < 0.000_000_1 => 10,
        p if p > 0.000_000_1 && p < 0.000_001 => 9,
        p if p > 0.000_001 && p < 0.000_01 => 8,
        p if p > 0.000_01 && p < 0.000_1 => 7,
        p if p > 0.000_1 && p < 0.001 => 6,
        p if p > 0.001 && p < 0.01 => 5,
        p if p > 0.01 && p < 0.1 => 4,
        p if p > 0.1 && p < 1.0 => 3,
        p if p > 1.0 && p < 10.0 => 2,
        p if p > 10.0 && p < 100.0 => 1,
        _ => 0,
    };
    format!("{:.*}", precision, price)
}

/// Render an amount the way request parameters carry it.
pub fn format_param_amount(value: f64) -> String {
    format!("{:.8}", value)
}

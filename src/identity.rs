use sha2::{Digest, Sha256};

/// Derive a recommendation id for a finding whose source has none.
///
/// The three values are concatenated without a separator and hashed with
/// SHA-256. Savings are rendered with [`float_repr`] so ids computed before
/// this crate existed still join against the persisted ledger.
pub fn recommendation_id(account: &str, resource_id: &str, savings: f64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(account.as_bytes());
    hasher.update(resource_id.as_bytes());
    hasher.update(float_repr(savings).as_bytes());
    to_hex(&hasher.finalize())
}

/// Shortest round-trip rendering of a float, always carrying a fractional
/// part or an exponent (`100.0`, `0.1`, `1e+16`, `1.5e-05`).
pub fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }

    let rendered = format!("{:?}", value);
    match rendered.split_once('e') {
        Some((mantissa, exponent)) => {
            let exp: i32 = exponent.parse().unwrap_or_default();
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exp.abs())
        }
        None => rendered,
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

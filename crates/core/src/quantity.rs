//! Resource quantity parsing (`512Mi`, `500m`, `1.5G`, `2e3`).
//!
//! Memory, disk and GPU are normalized to a whole number string; CPU keeps its fractional part.
//! Anything that does not parse is returned unchanged, so normalization is idempotent.

/// Parse a quantity string into its numeric value.
pub fn parse_quantity(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if s.is_empty() { return None; }
    let bytes = s.as_bytes();
    let mut i = 0;
    if matches!(bytes[0], b'+' | b'-') { i += 1; }
    let mut seen_digit = false;
    let mut seen_dot = false;
    while i < bytes.len() {
        match bytes[i] {
            b'0'..=b'9' => seen_digit = true,
            b'.' if !seen_dot => seen_dot = true,
            _ => break,
        }
        i += 1;
    }
    if !seen_digit { return None; }
    let mut number_end = i;
    // exponent form only when `e`/`E` is followed by an (optionally signed) integer
    if i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
        let mut j = i + 1;
        if j < bytes.len() && matches!(bytes[j], b'+' | b'-') { j += 1; }
        let exp_digits = j;
        while j < bytes.len() && bytes[j].is_ascii_digit() { j += 1; }
        if j > exp_digits && j == bytes.len() {
            number_end = j;
        }
    }
    let number: f64 = s[..number_end].parse().ok()?;
    let (mul, div) = suffix_scale(&s[number_end..])?;
    let v = number * mul / div;
    v.is_finite().then_some(v)
}

/// (multiplier, divisor); sub-unit suffixes divide so `500m` lands exactly on 0.5.
fn suffix_scale(suffix: &str) -> Option<(f64, f64)> {
    let scale = match suffix {
        "" => (1.0, 1.0),
        "Ki" => (1024f64, 1.0),
        "Mi" => (1024f64.powi(2), 1.0),
        "Gi" => (1024f64.powi(3), 1.0),
        "Ti" => (1024f64.powi(4), 1.0),
        "Pi" => (1024f64.powi(5), 1.0),
        "Ei" => (1024f64.powi(6), 1.0),
        "n" => (1.0, 1e9),
        "u" => (1.0, 1e6),
        "m" => (1.0, 1e3),
        "k" => (1e3, 1.0),
        "M" => (1e6, 1.0),
        "G" => (1e9, 1.0),
        "T" => (1e12, 1.0),
        "P" => (1e15, 1.0),
        "E" => (1e18, 1.0),
        _ => return None,
    };
    Some(scale)
}

/// Memory, disk and GPU: integer string, fractional part truncated.
pub fn normalize_integer(raw: &str) -> String {
    match parse_quantity(raw) {
        Some(v) => format!("{}", v.trunc() as i64),
        None => raw.to_string(),
    }
}

/// CPU: shortest decimal representation of the value.
pub fn normalize_decimal(raw: &str) -> String {
    match parse_quantity(raw) {
        Some(v) => format!("{}", v),
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_and_decimal_suffixes() {
        assert_eq!(parse_quantity("512Mi"), Some(536870912.0));
        assert_eq!(parse_quantity("1Gi"), Some(1073741824.0));
        assert_eq!(parse_quantity("2k"), Some(2000.0));
        assert_eq!(parse_quantity("500m"), Some(0.5));
        assert_eq!(parse_quantity("1e3"), Some(1000.0));
        assert_eq!(parse_quantity("2E"), Some(2e18));
        assert_eq!(parse_quantity(""), None);
        assert_eq!(parse_quantity("lots"), None);
        assert_eq!(parse_quantity("12Xi"), None);
    }

    #[test]
    fn integer_normalization_is_idempotent() {
        let once = normalize_integer("512Mi");
        assert_eq!(once, "536870912");
        assert_eq!(normalize_integer(&once), once);
        assert_eq!(normalize_integer("1.5Gi"), "1610612736");
        assert_eq!(normalize_integer("1.9"), "1");
    }

    #[test]
    fn decimal_normalization_keeps_fraction() {
        assert_eq!(normalize_decimal("500m"), "0.5");
        assert_eq!(normalize_decimal("2"), "2");
        assert_eq!(normalize_decimal(&normalize_decimal("250m")), "0.25");
    }

    #[test]
    fn unparsable_left_as_is() {
        assert_eq!(normalize_integer("1Gi||2Gi"), "1Gi||2Gi");
        assert_eq!(normalize_decimal("n/a"), "n/a");
    }
}

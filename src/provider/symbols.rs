//! Instrument identifier and date normalisation.

/// Left-pad a numeric code to six characters.
pub fn zfill6(code: &str) -> String {
    let code = code.trim();
    if code.len() >= 6 {
        code.to_string()
    } else {
        format!("{:0>6}", code)
    }
}

/// Exchange-prefixed symbol for the quote backend (`sh600000`, `sz000001`, `bj830799`).
pub fn tx_prefix_symbol(symbol: &str) -> String {
    let s = symbol.trim();
    if s.is_empty() {
        return String::new();
    }
    if ["sh", "sz", "bj"].iter().any(|p| s.starts_with(p)) && s.len() >= 8 {
        return s.to_string();
    }
    if ["SH", "SZ", "BJ"].iter().any(|p| s.starts_with(p)) {
        return s.to_lowercase();
    }
    let exchange = match s.as_bytes()[0] {
        b'6' => "sh",
        b'0' | b'3' => "sz",
        b'4' | b'8' => "bj",
        _ => "sz",
    };
    format!("{}{}", exchange, s)
}

/// Canonical six-digit A-share code: strips exchange prefixes and keeps the
/// trailing six digits.
pub fn normalize_a_symbol(symbol: &str) -> String {
    let s = symbol.trim().to_uppercase();
    let s = if s.len() >= 8 && ["SZ", "SH", "BJ"].iter().any(|p| s.starts_with(p)) {
        &s[2..]
    } else {
        s.as_str()
    };
    let digits: String = s.chars().filter(char::is_ascii_digit).collect();
    if digits.len() > 6 {
        digits[digits.len() - 6..].to_string()
    } else {
        digits
    }
}

/// `YYYY-MM-DD`, `YYYY/MM/DD` or `YYYYMMDD...` to `YYYYMMDD`; anything else
/// yields `default`.
pub fn normalize_yyyymmdd(value: Option<&str>, default: &str) -> String {
    let Some(raw) = value.map(str::trim).filter(|s| !s.is_empty()) else {
        return default.to_string();
    };
    let compact: String = raw.chars().filter(|c| *c != '-' && *c != '/').collect();
    match compact.get(..8) {
        Some(head) if head.chars().all(|c| c.is_ascii_digit()) => head.to_string(),
        _ => default.to_string(),
    }
}

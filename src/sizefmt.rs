//! Size-string parsing (§6) and ASCII table parsing for `_cat/indices` and
//! `_cat/shards` responses (§4.1).

/// Parses `"<num><unit>"` with units `kb, mb, gb` (decimal multipliers
/// `10^3, 10^6, 10^9`); `"b"` or no unit is bytes; empty is zero.
pub fn text_to_bytes(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() {
        return Some(0);
    }
    let lower = text.to_ascii_lowercase();
    let (number, multiplier) = if let Some(stripped) = lower.strip_suffix("gb") {
        (stripped, 1_000_000_000u64)
    } else if let Some(stripped) = lower.strip_suffix("mb") {
        (stripped, 1_000_000u64)
    } else if let Some(stripped) = lower.strip_suffix("kb") {
        (stripped, 1_000u64)
    } else if let Some(stripped) = lower.strip_suffix('b') {
        (stripped, 1u64)
    } else {
        (lower.as_str(), 1u64)
    };
    let value: f64 = number.trim().parse().ok()?;
    Some((value * multiplier as f64).round() as u64)
}

/// Formats bytes using the same unit scale `text_to_bytes` parses, choosing
/// the largest unit that divides evenly. Exists mainly so
/// `text_to_bytes(value2text(n))` round-trips for test fixtures.
pub fn value2text(bytes: u64) -> String {
    if bytes == 0 {
        return "0b".to_string();
    }
    if bytes % 1_000_000_000 == 0 {
        format!("{}gb", bytes / 1_000_000_000)
    } else if bytes % 1_000_000 == 0 {
        format!("{}mb", bytes / 1_000_000)
    } else if bytes % 1_000 == 0 {
        format!("{}kb", bytes / 1_000)
    } else {
        format!("{}b", bytes)
    }
}

/// Splits a single ASCII table row into columns by runs of whitespace, the
/// same convention `_cat` APIs use (space-separated, column-aligned but not
/// fixed-width).
pub fn split_at(line: &str) -> Vec<String> {
    line.split_whitespace().map(|s| s.to_string()).collect()
}

/// Parses a `_cat/*` response body (one row per line, header-less, space
/// separated) into a list of column maps keyed by `columns`. Extra trailing
/// fields beyond `columns.len()` are dropped; short rows are skipped.
pub fn convert_table_to_list(body: &str, columns: &[&str]) -> Vec<Vec<String>> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| {
            let fields = split_at(line);
            if fields.len() < columns.len() {
                None
            } else {
                Some(fields)
            }
        })
        .collect()
}

//! Number formatting for reports.

/// Values at or above this magnitude are shown in millions.
const MILLION: f64 = 1_000_000.0;

/// Values at or above this magnitude are shown in thousands.
const COMPACT_THOUSANDS: f64 = 10_000.0;

/// Format a value for display: compact `K`/`M` suffixes for large
/// magnitudes, at most two decimals otherwise.
pub fn format_value(v: f64) -> String {
    if !v.is_finite() {
        return v.to_string();
    }

    let magnitude = v.abs();
    if magnitude >= MILLION {
        format!("{}M", trim_decimals(v / MILLION, 2))
    } else if magnitude >= COMPACT_THOUSANDS {
        format!("{}K", trim_decimals(v / 1000.0, 1))
    } else {
        trim_decimals(v, 2)
    }
}

/// Format a percentage with one decimal.
pub fn format_percent(v: f64) -> String {
    let v = normalize_zero(round_to_decimals(v, 1));
    format!("{v:.1}%")
}

/// Divide by a display scale, ignoring zero or non-finite divisors.
pub fn apply_scale(v: f64, scale: Option<f64>) -> f64 {
    match scale {
        Some(s) if usable_scale(s) => v / s,
        _ => v,
    }
}

/// Format a value under a display scale.
///
/// A scaled value is already in the unit named by the column header, so it
/// is never compacted to `K`/`M` on top of that.
pub fn format_scaled(v: f64, scale: Option<f64>) -> String {
    match scale {
        Some(s) if usable_scale(s) => trim_decimals(apply_scale(v, scale), 2),
        _ => format_value(v),
    }
}

fn usable_scale(s: f64) -> bool {
    s.is_finite() && s != 0.0
}

/// Column header suffix describing a display scale.
pub fn scale_suffix(scale: Option<f64>) -> String {
    match scale {
        Some(s) if s == 1000.0 => " (K)".to_string(),
        Some(s) if s == MILLION => " (M)".to_string(),
        Some(s) if usable_scale(s) && s != 1.0 => format!(" (÷{})", trim_decimals(s, 2)),
        _ => String::new(),
    }
}

fn trim_decimals(v: f64, decimals: usize) -> String {
    let v = normalize_zero(round_to_decimals(v, decimals));
    let s = format!("{v:.decimals$}");
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s
    }
}

fn round_to_decimals(x: f64, decimals: usize) -> f64 {
    let factor = 10_f64.powi(i32::try_from(decimals.min(9)).unwrap_or(9));
    (x * factor).round() / factor
}

fn normalize_zero(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else {
        v
    }
}

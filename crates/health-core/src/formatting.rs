use chrono::{DateTime, Utc};

/// Format a floating-point number with thousands separators and a fixed number
/// of decimal places.
///
/// # Examples
///
/// ```
/// use health_core::formatting::format_number;
///
/// assert_eq!(format_number(1234.5,  1), "1,234.5");
/// assert_eq!(format_number(1234567.0, 0), "1,234,567");
/// assert_eq!(format_number(0.0, 2), "0.00");
/// assert_eq!(format_number(-9876.5, 1), "-9,876.5");
/// ```
pub fn format_number(value: f64, decimals: u32) -> String {
    let negative = value < 0.0;
    let abs_value = value.abs();

    // Nudge by half an ULP at the target precision so exact midpoints round up.
    let factor = 10_f64.powi(decimals as i32);
    let epsilon = f64::EPSILON * abs_value * factor;
    let rounded = ((abs_value * factor) + epsilon).round() / factor;

    let integer_part = rounded.trunc() as u64;
    let frac_part = rounded - rounded.trunc();

    let grouped = group_thousands(&integer_part.to_string());

    let result = if decimals == 0 {
        grouped
    } else {
        // `frac_str` looks like "0.50"; keep the ".50".
        let frac_str = format!("{:.prec$}", frac_part, prec = decimals as usize);
        format!("{}{}", grouped, &frac_str[1..])
    };

    if negative && rounded != 0.0 {
        format!("-{}", result)
    } else {
        result
    }
}

/// Format a metric value with as many decimals as its magnitude warrants.
///
/// * integral values → no decimals (`5,000`)
/// * `|v| >= 100` → one decimal (`1,234.6`)
/// * otherwise → two decimals (`72.46`)
///
/// # Examples
///
/// ```
/// use health_core::formatting::format_metric_value;
///
/// assert_eq!(format_metric_value(5000.0), "5,000");
/// assert_eq!(format_metric_value(72.456), "72.46");
/// ```
pub fn format_metric_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format_number(value, 0)
    } else if value.abs() >= 100.0 {
        format_number(value, 1)
    } else {
        format_number(value, 2)
    }
}

/// Render a timestamp as `YYYY-MM-DD HH:MM UTC`.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M UTC").to_string()
}

/// Render an inclusive time range, or `"N/A"` when either end is unknown.
pub fn format_range(first: Option<DateTime<Utc>>, last: Option<DateTime<Utc>>) -> String {
    match (first, last) {
        (Some(f), Some(l)) => format!("{} to {}", format_timestamp(f), format_timestamp(l)),
        _ => "N/A".to_string(),
    }
}

/// Insert commas every three digits from the right of an integer string.
fn group_thousands(s: &str) -> String {
    if s.len() <= 3 {
        return s.to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    let remainder = chars.len() % 3;
    for (i, &c) in chars.iter().enumerate() {
        if i != 0 && (i % 3 == remainder) {
            result.push(',');
        }
        result.push(c);
    }
    result
}

// ── Tests ──────────────────────────────────────────────────────────────────────

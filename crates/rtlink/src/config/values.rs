// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Parsing helpers for configuration values.
//!
//! All values in a configuration set are strings; these helpers turn them into
//! typed values. Parsers return `None` on malformed input and let the caller
//! attach the key to the error.

use std::time::{Duration, Instant};

/// Parse a boolean: `true/yes/on/1` or `false/no/off/0` (case-insensitive).
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Some(true),
        "false" | "no" | "off" | "0" => Some(false),
        _ => None,
    }
}

/// Parse a size with an optional binary suffix: `512`, `64k`, `2M`, `1G`.
pub fn parse_size(value: &str) -> Option<usize> {
    let value = value.trim();
    let (digits, multiplier) = match value.chars().last()? {
        'k' | 'K' => (&value[..value.len() - 1], 1024usize),
        'm' | 'M' => (&value[..value.len() - 1], 1024 * 1024),
        'g' | 'G' => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        _ => (value, 1),
    };
    digits.trim().parse::<usize>().ok()?.checked_mul(multiplier)
}

/// Parse a non-negative duration in seconds (float): `1`, `0.25`.
pub fn parse_seconds(value: &str) -> Option<Duration> {
    let secs: f64 = value.trim().parse().ok()?;
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let duration = Duration::try_from_secs_f64(secs).ok()?;
    // Must still form a deadline from now
    Instant::now().checked_add(duration).map(|_| duration)
}

/// Parse a positive, finite rate in Hz.
pub fn parse_rate(value: &str) -> Option<f64> {
    let hz: f64 = value.trim().parse().ok()?;
    (hz.is_finite() && hz > 0.0).then_some(hz)
}

/// Split on `sep`, trimming blanks around each item and dropping empty items.
pub fn split_trimmed(value: &str, sep: char) -> Vec<String> {
    value
        .split(sep)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Escape control characters for a single-line record: `\t \n \f \r \\`.
pub fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\x0c' => out.push_str("\\f"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out
}

/// Inverse of [`escape`], also reading `\s` as a space. Unknown escapes are
/// kept verbatim.
pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('f') => out.push('\x0c'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('s') => out.push(' '),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Normalize an `exported_ports` value.
///
/// Each comma-separated entry `a.b.c` is reduced to `a.c` (first and last
/// dot-separated segment); entries with fewer than three segments are kept.
pub fn normalize_exported_ports(value: &str) -> String {
    split_trimmed(value, ',')
        .into_iter()
        .map(|entry| {
            let parts: Vec<&str> = entry.split('.').collect();
            if parts.len() > 2 {
                format!("{}.{}", parts[0], parts[parts.len() - 1])
            } else {
                entry
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

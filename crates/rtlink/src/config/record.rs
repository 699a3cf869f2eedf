// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ordered text records for configuration sets.
//!
//! ```text
//! [default]
//! description = Nominal settings
//! dataport.buffer.length = 16
//! dataport.buffer.write.full_policy = overwrite
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. Values are escaped with
//! [`values::escape`] so that every record entry stays on one line.
//!
//! Blanks around keys and values are trimmed when parsing. A value that starts
//! or ends with a space writes that space as `\s`. A value key literally named
//! `description` is written as `\description` so it is not read back as the
//! set description.

use super::{values, ConfigError, ConfigSet, Result};

const DESCRIPTION_KEY: &str = "description";
const ESCAPED_DESCRIPTION_KEY: &str = "\\description";

/// Escape `value` for a record line, keeping edge spaces through trimming.
fn record_value(value: &str) -> String {
    let escaped = values::escape(value);
    let body = escaped.trim_matches(' ');
    if body.len() == escaped.len() {
        return escaped;
    }
    let leading = escaped.len() - escaped.trim_start_matches(' ').len();
    let trailing = if body.is_empty() {
        0
    } else {
        escaped.len() - escaped.trim_end_matches(' ').len()
    };
    format!("{}{}{}", "\\s".repeat(leading), body, "\\s".repeat(trailing))
}

impl ConfigSet {
    /// Serialize as an ordered text record.
    pub fn to_record(&self) -> String {
        let mut out = format!("[{}]\n", self.id());
        out.push_str(&format!(
            "{} = {}\n",
            DESCRIPTION_KEY,
            record_value(self.description())
        ));
        for (key, value) in self.iter() {
            let key = if key == DESCRIPTION_KEY {
                ESCAPED_DESCRIPTION_KEY
            } else {
                key
            };
            out.push_str(&format!("{} = {}\n", key, record_value(value)));
        }
        out
    }

    /// Parse one record produced by [`to_record`](Self::to_record).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the header is missing or a line has
    /// no `=`, and [`ConfigError::InvalidParameter`] for an empty id.
    pub fn from_record(text: &str) -> Result<Self> {
        let mut lines = text
            .lines()
            .enumerate()
            .map(|(n, l)| (n + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty() && !l.starts_with('#'));

        let (line_no, header) = lines
            .next()
            .ok_or_else(|| ConfigError::Parse { line: 0, reason: "empty record".into() })?;
        let id = header
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .ok_or_else(|| ConfigError::Parse {
                line: line_no,
                reason: format!("expected [id] header, got '{header}'"),
            })?
            .trim();
        if id.is_empty() {
            return Err(ConfigError::InvalidParameter);
        }

        let mut set = ConfigSet::new(id);
        for (line_no, line) in lines {
            let (key, value) = line.split_once('=').ok_or_else(|| ConfigError::Parse {
                line: line_no,
                reason: format!("expected 'key = value', got '{line}'"),
            })?;
            let key = key.trim();
            let value = values::unescape(value.trim());
            if key.is_empty() {
                return Err(ConfigError::Parse { line: line_no, reason: "empty key".into() });
            }
            match key {
                DESCRIPTION_KEY => set.set_description(value),
                ESCAPED_DESCRIPTION_KEY => set.set(DESCRIPTION_KEY, value),
                _ => set.set(key, value),
            }
        }
        Ok(set)
    }
}

/// Parse a file holding several consecutive records.
pub fn parse_records(text: &str) -> Result<Vec<ConfigSet>> {
    let mut chunks: Vec<String> = Vec::new();
    for line in text.lines() {
        if line.trim_start().starts_with('[') || chunks.is_empty() {
            chunks.push(String::new());
        }
        if let Some(chunk) = chunks.last_mut() {
            chunk.push_str(line);
            chunk.push('\n');
        }
    }
    chunks
        .iter()
        .filter(|c| c.lines().any(|l| !l.trim().is_empty() && !l.trim().starts_with('#')))
        .map(|c| ConfigSet::from_record(c))
        .collect()
}

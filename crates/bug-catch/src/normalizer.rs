// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shapes raw uncaught-error and unhandled-rejection notifications into a
//! uniform [`NormalizedError`] record.

use crate::error::Error;
use crate::source::{ErrorObject, UncaughtEvent};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Sentinel for an unknown line or column.
pub const UNKNOWN_POSITION: i64 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedError {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub filename: String,
    pub line: i64,
    pub column: i64,
    pub error: ErrorObject,
}

fn stack_position_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    #[allow(clippy::expect_used)]
    RE.get_or_init(|| Regex::new(r":[0-9]+:[0-9]+").expect("stack position regex is valid"))
}

/// Normalizes a raw event.
///
/// Events carrying an `error` object are treated as uncaught exceptions; the
/// rest are treated as rejections and must carry a `reason`, otherwise
/// [`Error::MalformedEvent`] is returned.
pub fn normalize(event: &UncaughtEvent) -> Result<NormalizedError, Error> {
    let event_type = event.kind.as_str().to_string();

    if let Some(error) = &event.error {
        return Ok(NormalizedError {
            event_type,
            message: event.message.clone(),
            filename: event.filename.clone().unwrap_or_default(),
            line: known_position(event.lineno),
            column: known_position(event.colno),
            error: error.clone(),
        });
    }

    let reason = event.reason.as_ref().ok_or(Error::MalformedEvent)?;
    let (line, column) = reason
        .stack
        .as_deref()
        .and_then(stack_position)
        .unwrap_or((UNKNOWN_POSITION, UNKNOWN_POSITION));

    Ok(NormalizedError {
        event_type,
        message: reason.message.clone(),
        filename: String::new(),
        line,
        column,
        error: reason.clone(),
    })
}

// Zero is treated as unknown, matching how hosts report missing positions.
fn known_position(position: Option<u32>) -> i64 {
    match position {
        Some(p) if p > 0 => i64::from(p),
        _ => UNKNOWN_POSITION,
    }
}

/// Returns the `line:column` pair of the first `:<digits>:<digits>` match in a
/// stack trace.
pub fn stack_position(stack: &str) -> Option<(i64, i64)> {
    let found = stack_position_regex().find(stack)?;
    let parts: Vec<&str> = found.as_str().split(':').collect();
    if parts.len() != 3 {
        return None;
    }
    let line = parts[1].parse::<i64>().ok()?;
    let column = parts[2].parse::<i64>().ok()?;
    Some((line, column))
}

//! Normalization of everything a client can type or script.
//!
//! All bounds checking for client-supplied values lives here so the
//! handlers only ever see values that are safe to store and echo.

use serde_json::Value;

use crate::room::is_valid_room_code;

/// Display names are capped at 50 Unicode scalar values.
pub const MAX_NAME_CHARS: usize = 50;

/// Substitute for names that sanitize down to nothing.
pub const FALLBACK_NAME: &str = "Spieler";

/// Longest accepted question text, in characters.
pub const MAX_QUESTION_CHARS: usize = 4000;

/// Longest accepted answer-option text, in characters.
pub const MAX_OPTION_CHARS: usize = 500;

/// Maximum number of answer options per question, and of selected
/// indices per submitted answer.
pub const MAX_ANSWER_OPTIONS: usize = 20;

/// Question duration bounds in seconds. Out-of-range or non-numeric
/// values fall back to the default.
pub const MAX_QUESTION_DURATION_SECS: u32 = 80;
pub const DEFAULT_QUESTION_DURATION_SECS: u32 = 30;

/// Strip HTML tags and control characters from a display name, trim
/// whitespace and cap the length. Names that come out empty become the
/// fallback name.
pub fn sanitize_name(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len().min(4 * MAX_NAME_CHARS));
    let mut in_tag = false;
    for c in raw.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if in_tag => {},
            // char::is_control covers C0, DEL and the C1 range
            c if c.is_control() => {},
            c => cleaned.push(c),
        }
    }
    let capped: String = cleaned.trim().chars().take(MAX_NAME_CHARS).collect();
    let capped = capped.trim_end().to_string();
    if capped.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        capped
    }
}

/// Scores must be non-negative finite numbers. NaN, infinities and
/// negatives are rejected wholesale rather than clamped.
pub fn is_valid_score(score: f64) -> bool {
    score.is_finite() && score >= 0.0
}

/// Uppercase a client-supplied room code and drop whitespace. Returns
/// `None` unless the result is a well-formed code.
pub fn normalize_room_code(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect();
    is_valid_room_code(&cleaned).then_some(cleaned)
}

/// `answerData` must be an array of at most [`MAX_ANSWER_OPTIONS`]
/// integer option indices. Anything else is dropped by the caller.
pub fn is_valid_answer_data(value: &Value) -> bool {
    value
        .as_array()
        .is_some_and(|arr| arr.len() <= MAX_ANSWER_OPTIONS && arr.iter().all(Value::is_i64))
}

/// Coerce a question duration from arbitrary JSON. Missing, non-numeric
/// and out-of-range values become the default so a sloppy host still
/// gets a running timer.
pub fn coerce_duration(value: &Value) -> u32 {
    match value.as_f64() {
        Some(d) if d >= 1.0 && d <= MAX_QUESTION_DURATION_SECS as f64 => d as u32,
        _ => DEFAULT_QUESTION_DURATION_SECS,
    }
}

/// Coerce a question index from arbitrary JSON; anything unusable is 0.
pub fn coerce_index(value: &Value) -> u32 {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0)
}

/// Coerce a question total from arbitrary JSON; the result is at least 1.
pub fn coerce_total(value: &Value) -> u32 {
    value
        .as_u64()
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(1)
        .max(1)
}

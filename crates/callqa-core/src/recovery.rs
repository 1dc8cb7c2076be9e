//! Salvage parsing for near-valid model output.
//!
//! Models asked for a JSON object sometimes wrap it in a code fence, use
//! typographic quotes, leave trailing commas, or get cut off mid-way through
//! a second object. [`recover_json`] tries, in order:
//!
//! 1. strip a fenced block, trim, strict parse
//! 2. take the longest balanced-brace prefix of the raw text, normalize it, parse
//! 3. normalize the whole text, take its longest balanced-brace prefix, parse
//!
//! If all three fail the caller gets [`RecoveryFailed`]; nothing is dropped
//! silently.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

lazy_static! {
    // ```json ... ``` (language tag optional, closing fence required)
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").unwrap();
}

/// All salvage attempts were exhausted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("JSON recovery failed after {attempts} attempt(s): {reason}")]
pub struct RecoveryFailed {
    /// Number of parse attempts made
    pub attempts: u8,

    /// Message from the last failed attempt
    pub reason: String,
}

/// Parse one JSON object out of `text`, repairing common model mistakes.
pub fn recover_json(text: &str) -> Result<Value, RecoveryFailed> {
    let unfenced = strip_code_fence(text);
    let trimmed = unfenced.trim();

    let mut attempts = 1;
    let mut reason = match parse_object(trimmed) {
        Ok(value) => return Ok(value),
        Err(e) => e,
    };

    let Some(start) = trimmed.find('{') else {
        return Err(RecoveryFailed {
            attempts,
            reason: "no '{' found in text".to_string(),
        });
    };
    let candidate = &trimmed[start..];

    // Scan raw text, then clean up only the salvaged prefix
    attempts += 1;
    match balanced_prefix(candidate) {
        Some(end) => match parse_object(&normalize(&candidate[..end])) {
            Ok(value) => {
                tracing::debug!(attempts, "Recovered JSON from balanced prefix");
                return Ok(value);
            }
            Err(e) => reason = e,
        },
        None => reason = "no balanced top-level object".to_string(),
    }

    // Normalize first so typographic quotes count as string delimiters
    attempts += 1;
    let normalized = normalize(candidate);
    match balanced_prefix(&normalized) {
        Some(end) => match parse_object(&normalized[..end]) {
            Ok(value) => {
                tracing::debug!(attempts, "Recovered JSON from normalized text");
                return Ok(value);
            }
            Err(e) => reason = e,
        },
        None => reason = "no balanced top-level object".to_string(),
    }

    Err(RecoveryFailed { attempts, reason })
}

/// Return the body of the first fenced code block, or the text unchanged.
///
/// An opening fence without a closing one (truncated output) loses just the
/// fence line.
pub fn strip_code_fence(text: &str) -> &str {
    if let Some(caps) = FENCED_BLOCK.captures(text) {
        if let Some(body) = caps.get(1) {
            return body.as_str();
        }
    }

    let trimmed = text.trim_start();
    if trimmed.starts_with("```") {
        return match trimmed.find('\n') {
            Some(newline) => &trimmed[newline + 1..],
            None => "",
        };
    }

    text
}

/// Byte offset just past the last `}` that closes a top-level object.
///
/// `text` must start at the opening `{`. Quotes and braces inside strings
/// are ignored, and escapes inside strings are honored.
fn balanced_prefix(text: &str) -> Option<usize> {
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut last_end = None;

    for (i, c) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    last_end = Some(i + 1);
                }
            }
            _ => {}
        }
    }

    last_end
}

/// Replace typographic quotes and drop trailing commas before `}` / `]`.
fn normalize(text: &str) -> String {
    let quoted: String = text
        .chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' | '\u{2033}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' | '\u{2032}' => '\'',
            other => other,
        })
        .collect();

    strip_trailing_commas(&quoted)
}

/// Remove commas whose next non-whitespace character closes a container.
/// Commas inside strings are kept.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            out.push(c);
            continue;
        }

        if c == '"' {
            in_string = true;
        } else if c == ',' {
            let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }

    out
}

fn parse_object(text: &str) -> Result<Value, String> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) if value.is_object() => Ok(value),
        Ok(_) => Err("top-level JSON value is not an object".to_string()),
        Err(e) => Err(e.to_string()),
    }
}

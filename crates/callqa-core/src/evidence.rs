//! Evidence quote checks against the call transcript.
//!
//! Backends quote the transcript to back their findings. Quotes are checked
//! after whitespace and case normalization, since transcripts wrap lines and
//! speaker labels freely. An unverified quote does not invalidate a result;
//! callers log it.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();
}

/// Evidence quotes split by whether they appear in the transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteCheck {
    pub verified: Vec<String>,
    pub unverified: Vec<String>,
}

impl QuoteCheck {
    pub fn all_verified(&self) -> bool {
        self.unverified.is_empty()
    }
}

/// Collapse whitespace runs, fold case, and map smart quotes to ASCII.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect::<String>()
        .to_lowercase();
    WHITESPACE.replace_all(folded.trim(), " ").into_owned()
}

/// Whether `quote` appears in `transcript` after normalization.
///
/// Blank quotes never match.
pub fn quote_in_transcript(transcript: &str, quote: &str) -> bool {
    let needle = normalize(quote);
    if needle.is_empty() {
        return false;
    }
    normalize(transcript).contains(&needle)
}

/// Check every quote against the transcript, preserving input order.
pub fn check_quotes<I, S>(transcript: &str, quotes: I) -> QuoteCheck
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let haystack = normalize(transcript);
    let mut check = QuoteCheck::default();

    for quote in quotes {
        let quote = quote.into();
        let needle = normalize(&quote);
        if !needle.is_empty() && haystack.contains(&needle) {
            check.verified.push(quote);
        } else {
            check.unverified.push(quote);
        }
    }

    check
}

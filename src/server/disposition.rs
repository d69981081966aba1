//! `Content-Disposition` values (RFC 6266).

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use thiserror::Error;

// rawurlencode: everything but unreserved characters
const FILENAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispositionError {
    #[error("the filename fallback cannot contain the \"%\" character")]
    PercentInFallback,

    #[error("the filename and the fallback cannot contain \"/\" or \"\\\"")]
    PathSeparator,
}

/// Replace every non-ASCII character with `_`.
pub fn ascii_fallback(filename: &str) -> String {
    filename
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect()
}

/// `<disposition>; filename="<fallback>"`, plus `filename*=` when the real
/// name differs from its fallback. Without an explicit fallback the ASCII
/// rendering of `filename` is used.
pub fn content_disposition(
    disposition: &str,
    filename: &str,
    fallback: Option<&str>,
) -> Result<String, DispositionError> {
    let fallback = match fallback {
        Some(f) if !f.is_empty() => f.to_string(),
        _ => ascii_fallback(filename),
    };

    if fallback.contains('%') {
        return Err(DispositionError::PercentInFallback);
    }
    let has_separator = |s: &str| s.contains('/') || s.contains('\\');
    if has_separator(filename) || has_separator(&fallback) {
        return Err(DispositionError::PathSeparator);
    }

    let mut output = format!(
        "{disposition}; filename=\"{}\"",
        fallback.replace('"', "\\\"")
    );
    if filename != fallback {
        output.push_str("; filename*=utf-8''");
        output.extend(utf8_percent_encode(filename, FILENAME_ENCODE_SET));
    }

    Ok(output)
}

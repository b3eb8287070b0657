//! Best-effort extraction of JSON objects from model output.
//!
//! Chat models routinely wrap their JSON in prose or markdown fences, and a
//! response that is mostly valid can still contain a malformed sibling.
//! Salvage recovers every well-formed object without requiring the whole
//! response to parse.

use serde_json::Value;

/// One extracted record: a free-form string-keyed object.
pub type Sample = serde_json::Map<String, Value>;

/// Remove a leading ```` ```json ```` fence and a trailing ```` ``` ```` fence,
/// then trim surrounding whitespace.
fn strip_fences(text: &str) -> &str {
    let text = text.strip_prefix("```json").unwrap_or(text);
    let text = text.strip_suffix("```").unwrap_or(text);
    text.trim()
}

/// Decode the whole string when it is already a well-formed array of objects
/// or a single object.
fn decode_whole(text: &str) -> Option<Vec<Sample>> {
    if text.starts_with('[') && text.ends_with(']') {
        return serde_json::from_str::<Vec<Sample>>(text).ok();
    }

    if text.starts_with('{') && text.ends_with('}') {
        return serde_json::from_str::<Sample>(text).ok().map(|object| vec![object]);
    }

    None
}

/// Extract every well-formed JSON object embedded in `text`, in order.
///
/// Tries the whole string first; when that fails, scans character by
/// character tracking brace depth and attempts to decode each substring that
/// closes back to depth zero. Substrings that fail to decode are dropped
/// silently. Nested braces extend the current candidate, so the buffer always
/// begins at the outermost `{`.
pub fn salvage(text: &str) -> Vec<Sample> {
    let text = strip_fences(text);

    if let Some(samples) = decode_whole(text) {
        return samples;
    }

    let mut samples = Vec::new();
    let mut depth = 0usize;
    let mut candidate = String::new();

    for ch in text.chars() {
        if depth > 0 {
            candidate.push(ch);
        }

        match ch {
            '{' => {
                if depth == 0 {
                    candidate.push(ch);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Ok(sample) = serde_json::from_str::<Sample>(&candidate) {
                        samples.push(sample);
                    }
                    candidate.clear();
                }
            }
            _ => {}
        }
    }

    samples
}

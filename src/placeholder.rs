//! `{{key}}` placeholder matching and substitution.
//!
//! A cell whose whole trimmed text is `{{signatureN}}` is a signature cell
//! and is resolved to an image; every other cell gets plain text
//! substitution for the non-signature keys.

use std::borrow::Cow;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::models::FieldMap;

static SIGNATURE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\{\{(signature\d+)\}\}$").expect("signature pattern is valid")
});

const SIGNATURE_PREFIX: &str = "signature";

/// What to do with one text cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellPlan {
    /// Leave the cell as it is.
    Keep,
    /// Write this text back as the cell's value.
    Replace(String),
    /// Fetch the image at `url` and anchor it on the cell.
    Signature { key: String, url: String },
}

/// The key of a signature token filling the entire (trimmed) text.
pub fn signature_key(trimmed: &str) -> Option<&str> {
    SIGNATURE_TOKEN
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Keys starting with `signature` never take part in text substitution.
pub fn is_signature_key(key: &str) -> bool {
    key.len() >= SIGNATURE_PREFIX.len()
        && key.as_bytes()[..SIGNATURE_PREFIX.len()].eq_ignore_ascii_case(SIGNATURE_PREFIX.as_bytes())
}

/// Text used when substituting a field value.
pub fn render_value(value: &Value) -> Cow<'_, str> {
    match value {
        Value::String(s) => Cow::Borrowed(s.as_str()),
        other => Cow::Owned(other.to_string()),
    }
}

/// Usable image URL for a signature key: a string value starting with `http`.
pub fn signature_url<'a>(fields: &'a FieldMap, key: &str) -> Option<&'a str> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .filter(|url| url.starts_with("http"))
}

/// Replaces every `{{key}}` for non-signature keys, one key at a time in
/// field order. Replacement values are not rescanned for their own key.
pub fn substitute_text(text: &str, fields: &FieldMap) -> String {
    let mut out = text.to_string();
    for (key, value) in fields {
        if is_signature_key(key) {
            continue;
        }
        let token = format!("{{{{{}}}}}", key);
        if out.contains(&token) {
            out = out.replace(&token, &render_value(value));
        }
    }
    out
}

/// Decides how to fill one text cell.
pub fn plan_cell(text: &str, fields: &FieldMap) -> CellPlan {
    let trimmed = text.trim();
    if let Some(key) = signature_key(trimmed) {
        return match signature_url(fields, key) {
            Some(url) => CellPlan::Signature {
                key: key.to_string(),
                url: url.to_string(),
            },
            None => CellPlan::Keep,
        };
    }
    let filled = substitute_text(trimmed, fields);
    if filled == text {
        CellPlan::Keep
    } else {
        CellPlan::Replace(filled)
    }
}

//! `{context.key}` substitution from the scratch map.

use std::collections::BTreeMap;

use thiserror::Error;

const OPEN: &str = "{context.";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("no scratch value for placeholder '{0}'")]
pub struct MissingKey(pub String);

/// Replaces every `{context.key}` in `text`. Braces that do not open a
/// placeholder are copied through.
pub fn substitute(text: &str, scratch: &BTreeMap<String, String>) -> Result<String, MissingKey> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after = &rest[start + OPEN.len()..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let key = &after[..end];
        let value = scratch.get(key).ok_or_else(|| MissingKey(key.to_string()))?;
        out.push_str(value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

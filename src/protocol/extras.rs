//! Extension segment decoding.
//!
//! The extension segment is a form-encoded list: `KEY=value&KEY=value`.
//! Values are percent-encoded; `+` stands for a space.

use crate::TollkeeperError;

/// Extension key → decoded value, iterated in first-encounter order.
///
/// A repeated key keeps its original position but takes the later value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtensionMap {
    entries: Vec<(String, String)>,
}

impl ExtensionMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pair; a duplicate key overwrites the earlier value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Look up a value by key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Iterate pairs in encounter order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Decode an extension segment.
///
/// Pieces without `=` are skipped. Never panics.
///
/// # Errors
/// `MalformedExtras` if any value holds a broken `%` escape or decodes to
/// invalid UTF-8. The caller is expected to recover with an empty map.
pub fn decode_extras(segment: &str) -> Result<ExtensionMap, TollkeeperError> {
    let mut map = ExtensionMap::new();

    for pair in segment.split('&') {
        let Some((key, raw_value)) = pair.split_once('=') else {
            continue;
        };
        map.insert(key, decode_component(raw_value)?);
    }

    Ok(map)
}

fn decode_component(raw: &str) -> Result<String, TollkeeperError> {
    let bytes = raw.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let escape = bytes.get(i + 1..i + 3);
            if !escape.is_some_and(|h| h.iter().all(u8::is_ascii_hexdigit)) {
                return Err(TollkeeperError::MalformedExtras(format!(
                    "Invalid percent escape at byte {}",
                    i
                )));
            }
            i += 3;
        } else {
            i += 1;
        }
    }

    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| TollkeeperError::MalformedExtras(format!("Invalid UTF-8 in value: {}", e)))
}

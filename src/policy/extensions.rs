//! Extension key registry.
//!
//! Maps extension keys from a `Licensed` response to the policy field they
//! update. Supporting a new key means adding a row to one of the tables.

use crate::TollkeeperError;

/// Per-file field carried by an indexed `FILE_*{n}` extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileField {
    /// Expansion file name.
    Name,
    /// Download URL (session-only).
    Url,
    /// Size in bytes.
    Size,
}

/// Policy field an extension key updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionTarget {
    /// `VT`: end of the cached-grant validity window.
    ValidUntil,
    /// `GT`: end of the retry grace window.
    RetryGraceUntil,
    /// `GR`: number of consecutive retries tolerated.
    MaxIgnorableRetries,
    /// `FILE_*{n}`: a field of expansion slot `slot` (zero-based).
    File {
        /// Which field of the slot.
        field: FileField,
        /// Zero-based slot index.
        slot: usize,
    },
}

/// Fixed keys shared by every caching policy.
pub const CACHE_EXTENSIONS: &[(&str, ExtensionTarget)] = &[
    ("VT", ExtensionTarget::ValidUntil),
    ("GT", ExtensionTarget::RetryGraceUntil),
    ("GR", ExtensionTarget::MaxIgnorableRetries),
];

/// Indexed key prefixes of the file manifest.
pub const FILE_EXTENSIONS: &[(&str, FileField)] = &[
    ("FILE_NAME", FileField::Name),
    ("FILE_URL", FileField::Url),
    ("FILE_SIZE", FileField::Size),
];

/// The set of extension keys one policy variant understands.
#[derive(Debug, Clone, Copy)]
pub struct ExtensionRegistry {
    fixed: &'static [(&'static str, ExtensionTarget)],
    indexed: &'static [(&'static str, FileField)],
    slots: u32,
}

impl ExtensionRegistry {
    /// Keys of the cached policy.
    pub const CACHED: Self = Self {
        fixed: CACHE_EXTENSIONS,
        indexed: &[],
        slots: 0,
    };

    /// Keys of the manifest policy: the cached keys plus two file slots.
    pub const MANIFEST: Self = Self {
        fixed: CACHE_EXTENSIONS,
        indexed: FILE_EXTENSIONS,
        slots: 2,
    };

    /// Resolve an extension key.
    ///
    /// Returns `Ok(None)` for keys this registry does not know.
    ///
    /// # Errors
    /// `OutOfRangeExtension` for an indexed key whose wire index (1-based)
    /// is outside the supported slots.
    pub fn resolve(&self, key: &str) -> Result<Option<ExtensionTarget>, TollkeeperError> {
        if let Some((_, target)) = self.fixed.iter().find(|(name, _)| *name == key) {
            return Ok(Some(*target));
        }

        for (prefix, field) in self.indexed {
            let Some(digits) = key.strip_prefix(*prefix) else {
                continue;
            };
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                continue;
            }

            let index = digits.parse::<u32>().unwrap_or(u32::MAX);
            if index == 0 || index > self.slots {
                return Err(TollkeeperError::OutOfRangeExtension {
                    key: key.to_string(),
                    index,
                });
            }
            return Ok(Some(ExtensionTarget::File {
                field: *field,
                slot: (index - 1) as usize,
            }));
        }

        Ok(None)
    }
}

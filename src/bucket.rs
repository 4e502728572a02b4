//! Factory codes (bucket ids) that name a shared task list

use std::fmt;

/// Shortest factory code accepted after normalization
pub const MIN_LEN: usize = 3;

/// A normalized, URL-safe factory code
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketId(String);

impl BucketId {
    /// Normalize `raw` and reject codes shorter than [`MIN_LEN`].
    ///
    /// Returns the normalized form on failure so it can be shown to the user.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let normalized = normalize(raw);
        if normalized.chars().count() < MIN_LEN {
            return Err(normalized);
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trim, lowercase, and map anything outside `[a-z0-9_-]` to `-`
pub fn normalize(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

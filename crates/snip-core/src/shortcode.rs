use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// The key a shortened URL is stored and looked up under.
///
/// Codes are 3 to 32 bytes drawn from the URL-safe base64 alphabet
/// (`[A-Za-z0-9_-]`). Comparison is case-sensitive.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShortCode(String);

const CODE_LENGTH: std::ops::RangeInclusive<usize> = 3..=32;

fn is_code_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}

impl ShortCode {
    /// Parses a code supplied from outside, such as a request path or CLI
    /// argument.
    pub fn new(code: impl Into<String>) -> std::result::Result<Self, CoreError> {
        let code = code.into();

        if !CODE_LENGTH.contains(&code.len()) {
            return Err(CoreError::InvalidShortCode(format!(
                "'{code}' is {} bytes, expected {} to {}",
                code.len(),
                CODE_LENGTH.start(),
                CODE_LENGTH.end()
            )));
        }

        if let Some(pos) = code.bytes().position(|b| !is_code_byte(b)) {
            return Err(CoreError::InvalidShortCode(format!(
                "'{code}' has a character outside [A-Za-z0-9_-] at offset {pos}"
            )));
        }

        Ok(Self(code))
    }

    /// Wraps a code that is already known to be well formed, i.e. one the
    /// generator produced or a backend handed back.
    pub fn new_unchecked(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Joins the code onto `base_url`, tolerating a trailing slash.
    pub fn to_url(&self, base_url: &str) -> String {
        let base = base_url.strip_suffix('/').unwrap_or(base_url);
        format!("{base}/{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ShortCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ShortCode {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::new(s)
    }
}

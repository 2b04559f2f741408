use crate::Generator;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use sha2::{Digest, Sha256};
use snip_core::{GeneratorError, ShortCode};
use typed_builder::TypedBuilder;

/// Length of the codes produced by [`DigestGenerator::default`].
pub const DEFAULT_CODE_LENGTH: usize = 8;

/// Length of a URL-safe base64 encoded SHA-256 digest, padding included.
const ENCODED_DIGEST_LENGTH: usize = 44;

/// Content-addressed code generator.
///
/// Hashes the UTF-8 bytes of the URL with SHA-256, encodes the digest with
/// the URL-safe base64 alphabet and keeps the first `length` characters.
#[derive(Debug, Clone, Copy, TypedBuilder)]
pub struct DigestGenerator {
    /// Number of leading characters to keep, clamped to `3..=43`.
    #[builder(default = DEFAULT_CODE_LENGTH)]
    length: usize,
}

impl DigestGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn length(&self) -> usize {
        // Index 43 onwards is base64 padding.
        self.length.clamp(3, ENCODED_DIGEST_LENGTH - 1)
    }
}

impl Default for DigestGenerator {
    fn default() -> Self {
        Self {
            length: DEFAULT_CODE_LENGTH,
        }
    }
}

impl Generator for DigestGenerator {
    fn generate(&self, original_url: &str) -> Result<ShortCode, GeneratorError> {
        if original_url.is_empty() {
            return Err(GeneratorError::EmptyInput);
        }

        let digest = Sha256::digest(original_url.as_bytes());
        let mut encoded = URL_SAFE.encode(digest);
        encoded.truncate(self.length());

        Ok(ShortCode::new_unchecked(encoded))
    }
}

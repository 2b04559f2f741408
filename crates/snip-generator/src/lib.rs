//! Short code generation.

pub mod digest;

pub use digest::DigestGenerator;

use snip_core::{GeneratorError, ShortCode};

/// Trait for deriving short codes from original URLs.
///
/// Implementations are pure functions of their input that don't interact
/// with storage, so they are safe to share across tasks without locking.
/// Two calls with the same input must return the same code; collisions are
/// left to the storage layer to detect.
pub trait Generator: Send + Sync + 'static {
    /// Derives the short code for `original_url`.
    fn generate(&self, original_url: &str) -> Result<ShortCode, GeneratorError>;
}

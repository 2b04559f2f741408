//! URL shortener service implementation.
//!
//! This crate wires a [`Generator`](snip_generator::Generator) and a
//! [`UrlStore`](snip_core::UrlStore) into a
//! [`Shortener`](snip_core::Shortener). Core types are re-exported from
//! `snip_core`.

pub mod service;

pub use service::{ServiceSettings, ShortenerService};
pub use snip_core::{
    BatchItem, BatchResult, CreateOutcome, OwnedUrl, OwnerId, ShortCode, Shortener,
    ShortenerError,
};

//! Core types and traits for the snip URL shortener.
//!
//! This crate provides the domain types, the storage contract every backend
//! implements, the deletion stream, and the shortener contract consumed by
//! transport layers.

pub mod error;
pub mod owner;
pub mod pipeline;
pub mod shortcode;
pub mod shortener;
pub mod store;

pub use error::{CoreError, GeneratorError, ShortenerError, StorageError};
pub use owner::OwnerId;
pub use pipeline::{DeletionRequest, DeletionSender, DeletionStream};
pub use shortcode::ShortCode;
pub use shortener::{BatchItem, BatchResult, CreateOutcome, OwnedUrl, Shortener};
pub use store::{BatchEntry, Stats, UrlRecord, UrlStore};

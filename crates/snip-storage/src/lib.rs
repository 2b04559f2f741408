//! Storage backends for the snip URL shortener.
//!
//! Two interchangeable implementations of [`UrlStore`] are provided: a
//! [`FileStore`] for local and development use, and a [`MySqlStore`] for
//! production multi-user use. [`Store`] selects one of them from a
//! [`StoreConfig`].

pub mod file;
pub mod mysql;
pub mod store;

pub use file::FileStore;
pub use mysql::MySqlStore;
pub use snip_core::{StorageError, UrlStore};
pub use store::{BackendConfig, Store, StoreConfig};

//! # atelier-store
//!
//! Client-side persistence for Atelier: a small string key-value store with
//! browser-local-storage semantics, and the session, quota and gallery
//! layers built on top of it.
//!
//! The store itself is synchronous.  Change notifications go out over a
//! broadcast bus so UI layers can follow quota and gallery mutations, and a
//! polling watcher surfaces writes made by other processes on the same bus.

pub mod events;
pub mod gallery;
pub mod kv;
pub mod quota;
pub mod session;
pub mod watch;

mod error;

pub use error::{Result, StoreError};
pub use events::{GalleryAction, StoreEvent, StoreEvents};
pub use gallery::{LocalGallery, NewImage, StorageAvailability};
pub use kv::{FileKvStore, KvStore, MemoryKvStore};
pub use quota::QuotaLedger;
pub use session::SessionProvider;
pub use watch::StorageWatcher;

//! The `persistence` module keeps retained messages across restarts.
//!
//! The retained set is loaded once at startup and rewritten in full after
//! every change. Two backends implement [`RetainedStore`]: a single JSON file
//! replaced atomically, and an embedded `sled` database. Both share the
//! versioned record format in [`record`]. [`RetainedWriter`] serializes the
//! mutate-then-save sequence on top of whichever backend is configured.

pub mod file_store;
pub mod record;
pub mod retained;
pub mod sled_store;
pub mod writer;

use std::sync::Arc;

pub use file_store::FileStore;
pub use retained::{RetainedSet, RetainedStore};
pub use sled_store::SledStore;
pub use writer::{DurabilityStatus, RetainUpdate, RetainedWriter, SaveMode, SavePolicy, WriterOptions};

use crate::config::{RetainedSettings, StoreBackend};
use crate::utils::error::Result;

/// Opens the backend named in the configuration.
pub fn open_store(settings: &RetainedSettings) -> Result<Arc<dyn RetainedStore>> {
    let store: Arc<dyn RetainedStore> = match settings.backend {
        StoreBackend::File => Arc::new(FileStore::new(&settings.path)),
        StoreBackend::Sled => Arc::new(SledStore::open(&settings.path)?),
    };
    Ok(store)
}

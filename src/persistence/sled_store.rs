//! Retained store backed by `sled`
//!
//! The whole retained set is kept as one record under a fixed key. A sled
//! insert of a single key is atomic, so a crash leaves either the old or the
//! new record; the explicit `flush` makes the insert durable before
//! `save_all` returns.

use std::path::{Path, PathBuf};

use sled::Db;
use tracing::debug;

use crate::persistence::record;
use crate::persistence::retained::{RetainedSet, RetainedStore};
use crate::utils::error::Result;

const RECORD_KEY: &[u8] = b"retained";

#[derive(Clone)]
pub struct SledStore {
    db: Db,
    path: PathBuf,
}

impl SledStore {
    /// Open or create a sled database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let db = sled::open(&path)?;
        Ok(Self { db, path })
    }
}

impl RetainedStore for SledStore {
    fn load(&self) -> Result<RetainedSet> {
        match self.db.get(RECORD_KEY)? {
            Some(bytes) => record::decode(&bytes, &self.describe()),
            None => Ok(RetainedSet::new()),
        }
    }

    fn save_all(&self, set: &RetainedSet) -> Result<()> {
        let bytes = record::encode(set)?;
        self.db.insert(RECORD_KEY, bytes)?;
        self.db.flush()?;
        debug!(path = %self.path.display(), count = set.len(), "Retained record saved");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("sled:{}", self.path.display())
    }
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("db", &"sled::Db")
            .field("path", &self.path)
            .finish()
    }
}

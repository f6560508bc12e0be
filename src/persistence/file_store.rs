//! Retained store backed by a single JSON file.
//!
//! Saves never write the target in place: the record goes to a temporary
//! file in the same directory, is synced, and then renamed over the target.
//! A crash at any point leaves either the previous record or the new one.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::persistence::record;
use crate::persistence::retained::{RetainedSet, RetainedStore};
use crate::utils::error::{Error, Result};

/// Prefix of the scratch files written next to the record.
pub const TEMP_PREFIX: &str = ".retained-";

#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn directory(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }
}

/// Flushes directory metadata, which is what makes a rename durable.
/// Platforms without directory handles have nothing to sync.
pub(crate) fn sync_directory(dir: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    fs::File::open(dir)?.sync_all()?;
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

impl RetainedStore for FileStore {
    fn load(&self) -> Result<RetainedSet> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No retained record, starting empty");
                return Ok(RetainedSet::new());
            }
            Err(e) => {
                return Err(Error::io(format!("reading {}", self.path.display()), e));
            }
        };
        record::decode(&bytes, &self.path.display().to_string())
    }

    fn save_all(&self, set: &RetainedSet) -> Result<()> {
        let bytes = record::encode(set)?;
        let dir = self.directory();
        fs::create_dir_all(dir)
            .map_err(|e| Error::io(format!("creating {}", dir.display()), e))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| Error::io(format!("creating temp file in {}", dir.display()), e))?;
        let written = tmp.write_all(&bytes);
        if let Err(e) = written.and_then(|_| tmp.as_file().sync_all()) {
            return Err(Error::io(format!("writing {}", tmp.path().display()), e));
        }
        tmp.persist(&self.path)
            .map_err(|e| Error::io(format!("replacing {}", self.path.display()), e.error))?;

        // Make the rename itself durable.
        if let Err(e) = sync_directory(dir) {
            warn!(
                dir = %dir.display(),
                error = %e,
                "Could not sync directory, the new record may not survive a power loss"
            );
        }

        debug!(path = %self.path.display(), count = set.len(), "Retained record saved");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

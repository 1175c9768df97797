use crate::engine::SignatureEngine;
use crate::scanner::ScanError;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// Remembers the state of the database directory at the last successful build.
pub struct DatabaseWatcher<E: SignatureEngine> {
    path: PathBuf,
    baseline: Mutex<Option<E::Snapshot>>,
}

impl<E: SignatureEngine> DatabaseWatcher<E> {
    pub fn new(engine: &E, path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            baseline: Mutex::new(Self::stat(engine, path)),
        }
    }

    fn stat(engine: &E, path: &Path) -> Option<E::Snapshot> {
        match engine.stat_directory(path) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                log::warn!("{}", ScanError::StatError(format!("{:?}: {}", path, e)));
                None
            }
        }
    }

    /// Takes a fresh baseline, dropping the previous snapshot.
    pub fn reset(&self, engine: &E) {
        let snapshot = Self::stat(engine, &self.path);
        *self.baseline.lock() = snapshot;
    }

    /// Reports a change once: the baseline is refreshed whenever one is seen.
    pub fn check(&self, engine: &E) -> bool {
        let mut baseline = self.baseline.lock();
        let Some(snapshot) = baseline.as_ref() else {
            *baseline = Self::stat(engine, &self.path);
            return false;
        };

        match engine.directory_changed(snapshot) {
            Ok(true) => {
                log::info!("检测到病毒库目录变化: {:?}", self.path);
                *baseline = None;
                *baseline = Self::stat(engine, &self.path);
                true
            }
            Ok(false) => false,
            Err(e) => {
                log::warn!("{}", ScanError::StatError(e.to_string()));
                false
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

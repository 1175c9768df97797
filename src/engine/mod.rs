//! Capability set consumed from the external signature engine.
//!
//! Everything the wrapper needs from libclamav goes through [`SignatureEngine`].
//! Native resources (engine handles, copied settings, directory snapshots and
//! memory maps) are associated types that release themselves on `Drop`, so the
//! lifecycle code never pairs open/free calls by hand.

#[cfg(feature = "clamav")]
pub mod clamav;
#[cfg(test)]
pub(crate) mod mock;

use crate::scanner::ScanCategories;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::os::fd::BorrowedFd;
use std::path::Path;

#[cfg(feature = "clamav")]
pub use clamav::ClamAv;

/// Error code and message reported by the engine library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub code: i32,
    pub message: String,
}

impl NativeError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for NativeError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericOption {
    MaxScanSize,
    MaxFileSize,
}

impl NumericOption {
    pub fn name(self) -> &'static str {
        match self {
            NumericOption::MaxScanSize => "CL_ENGINE_MAX_SCANSIZE",
            NumericOption::MaxFileSize => "CL_ENGINE_MAX_FILESIZE",
        }
    }
}

/// Per-call state filled in by the pre-scan hook.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanContext {
    pub detected_type: String,
}

impl ScanContext {
    pub fn record_type(&mut self, label: &str) {
        self.detected_type.clear();
        self.detected_type.push_str(label);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawVerdict {
    Clean,
    Virus(String),
}

/// What the engine returned for a scan that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOutcome {
    pub verdict: RawVerdict,
    pub bytes_scanned: u64,
}

/// Header of a signature container (`.cvd` / `.cld`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatabaseHeader {
    pub version: u32,
    pub signatures: u32,
    pub functionality_level: u32,
    pub builder: String,
    pub build_time: Option<DateTime<Utc>>,
}

pub trait SignatureEngine: Send + Sync + 'static {
    /// A loaded engine. Dropping it frees the native engine.
    type Engine: Send + Sync;
    /// Settings copied off an engine, re-applicable to a fresh one.
    type Settings: Send;
    /// Stat token for a database directory.
    type Snapshot: Send;
    /// Memory map over a caller buffer; closed on drop.
    type Map<'a>;

    /// Process-wide library initialisation. Must be idempotent.
    fn init(&self) -> Result<(), NativeError>;

    fn version(&self) -> String;

    fn new_engine(&self) -> Result<Self::Engine, NativeError>;

    fn copy_settings(&self, engine: &Self::Engine) -> Result<Self::Settings, NativeError>;

    fn apply_settings(
        &self,
        engine: &mut Self::Engine,
        settings: &Self::Settings,
    ) -> Result<(), NativeError>;

    /// Limits are plain numeric fields and may be changed on a compiled engine,
    /// but never while a scan is reading it.
    fn set_num(
        &self,
        engine: &mut Self::Engine,
        option: NumericOption,
        value: u64,
    ) -> Result<(), NativeError>;

    fn get_num(&self, engine: &Self::Engine, option: NumericOption) -> Result<u64, NativeError>;

    /// Loads every database in `path`, returning the number of signatures.
    fn load(&self, engine: &mut Self::Engine, path: &Path) -> Result<u32, NativeError>;

    fn compile(&self, engine: &mut Self::Engine) -> Result<(), NativeError>;

    /// Registers the hook that copies the sniffed file type into the
    /// [`ScanContext`] of every scan. The hook always lets the scan continue.
    fn install_pre_scan_hook(&self, engine: &mut Self::Engine);

    fn scan_descriptor(
        &self,
        engine: &Self::Engine,
        fd: BorrowedFd<'_>,
        categories: ScanCategories,
        ctx: &mut ScanContext,
    ) -> Result<RawOutcome, NativeError>;

    fn open_memory_map<'a>(&self, bytes: &'a [u8]) -> Option<Self::Map<'a>>;

    fn scan_map(
        &self,
        engine: &Self::Engine,
        map: &Self::Map<'_>,
        categories: ScanCategories,
        ctx: &mut ScanContext,
    ) -> Result<RawOutcome, NativeError>;

    fn stat_directory(&self, path: &Path) -> Result<Self::Snapshot, NativeError>;

    /// `Ok(true)` when the directory no longer matches `snapshot`.
    fn directory_changed(&self, snapshot: &Self::Snapshot) -> Result<bool, NativeError>;

    fn database_header(&self, path: &Path) -> Option<DatabaseHeader>;
}

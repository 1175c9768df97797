use crate::engine::{NativeError, RawOutcome, RawVerdict, ScanContext, SignatureEngine};
use crate::scanner::{EngineLifecycle, EngineResult, ScanCategories, ScanError};
use serde::Serialize;
use std::fs::File;
use std::os::fd::{AsFd, BorrowedFd};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Clean,
    Infected,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanResult {
    pub verdict: Verdict,
    pub signature_name: Option<String>,
    pub detected_type: String,
    pub bytes_scanned: u64,
}

impl ScanResult {
    fn from_outcome(
        outcome: Result<RawOutcome, NativeError>,
        ctx: ScanContext,
    ) -> EngineResult<Self> {
        let outcome = outcome.map_err(|e| {
            log::error!("Error: {}", e);
            ScanError::ScanFailed(e.to_string())
        })?;

        let (verdict, signature_name) = match outcome.verdict {
            RawVerdict::Virus(name) => (Verdict::Infected, Some(name)),
            RawVerdict::Clean => (Verdict::Clean, None),
        };

        Ok(Self {
            verdict,
            signature_name,
            detected_type: ctx.detected_type,
            bytes_scanned: outcome.bytes_scanned,
        })
    }

    /// Placeholder entry for reports about a scan that returned an error.
    pub fn failed() -> Self {
        Self {
            verdict: Verdict::Error,
            signature_name: None,
            detected_type: String::new(),
            bytes_scanned: 0,
        }
    }

    pub fn is_infected(&self) -> bool {
        self.verdict == Verdict::Infected
    }
}

impl<E: SignatureEngine> EngineLifecycle<E> {
    /// Scans an open descriptor. The descriptor is only borrowed.
    pub fn scan_descriptor(
        &self,
        fd: BorrowedFd<'_>,
        categories: ScanCategories,
    ) -> EngineResult<ScanResult> {
        let engine = self.current().ok_or(ScanError::NotReady)?;
        let engine = engine.read();
        let mut ctx = ScanContext::default();
        let outcome = self.lib().scan_descriptor(&engine, fd, categories, &mut ctx);
        ScanResult::from_outcome(outcome, ctx)
    }

    pub fn scan_buffer(&self, bytes: &[u8], categories: ScanCategories) -> EngineResult<ScanResult> {
        let engine = self.current().ok_or(ScanError::NotReady)?;
        let engine = engine.read();
        let map = self.lib().open_memory_map(bytes).ok_or(ScanError::MapFailed)?;
        let mut ctx = ScanContext::default();
        let outcome = self.lib().scan_map(&engine, &map, categories, &mut ctx);
        drop(map);
        ScanResult::from_outcome(outcome, ctx)
    }

    pub fn scan_file_raw(&self, fd: BorrowedFd<'_>) -> EngineResult<ScanResult> {
        self.scan_descriptor(fd, ScanCategories::RAW)
    }

    pub fn scan_file_standard(&self, fd: BorrowedFd<'_>) -> EngineResult<ScanResult> {
        self.scan_descriptor(fd, ScanCategories::standard())
    }

    pub fn scan_path<P: AsRef<Path>>(
        &self,
        path: P,
        categories: ScanCategories,
    ) -> EngineResult<ScanResult> {
        let file = File::open(path.as_ref())?;
        let result = self.scan_descriptor(file.as_fd(), categories)?;
        log::debug!(
            "{:?}: {:?} [{}] {}",
            path.as_ref(),
            result.verdict,
            result.detected_type,
            result.signature_name.as_deref().unwrap_or("")
        );
        Ok(result)
    }

    pub fn scan_options_for<I, S>(&self, names: I) -> ScanCategories
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        crate::scanner::mask::scan_options_for(names)
    }
}

//! In-process stand-in for libclamav used by the unit tests.
//!
//! Databases are directories of `*.ndb` files with one `Name:hexpattern`
//! signature per line; `*.cvd` files only contribute a header line in the
//! `ClamAV-VDB:time:version:sigs:fl:md5:dsig:builder:stime` layout.
//! Every native resource bumps a counter while alive so tests can detect leaks.

use super::{
    DatabaseHeader, NativeError, NumericOption, RawOutcome, RawVerdict, ScanContext,
    SignatureEngine,
};
use crate::scanner::ScanCategories;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs::File;
use std::os::fd::BorrowedFd;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

pub(crate) const EICAR: &[u8] =
    b"X5O!P%@AP[4\\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";

const DEFAULT_MAX_FILESIZE: u64 = 100 * 1024 * 1024;
const DEFAULT_MAX_SCANSIZE: u64 = 400 * 1024 * 1024;

const CL_EMALFDB: i32 = 4;
const CL_EOPEN: i32 = 8;
const CL_ESTAT: i32 = 11;
const CL_EREAD: i32 = 12;
const CL_EMEM: i32 = 20;

#[derive(Default)]
pub(crate) struct MockState {
    pub live_engines: AtomicUsize,
    pub open_maps: AtomicUsize,
    pub live_settings: AtomicUsize,
    pub live_snapshots: AtomicUsize,
    pub scans: AtomicUsize,
    /// Limit changes that landed while a scan was running on the same engine.
    pub writes_during_scan: AtomicUsize,
    pub fail_init: AtomicBool,
    pub fail_new_engine: AtomicBool,
    pub fail_settings_copy: AtomicBool,
    pub fail_compile: AtomicBool,
    pub fail_scan: AtomicBool,
    pub fail_map: AtomicBool,
}

#[derive(Clone, Default)]
pub(crate) struct MockEngine {
    pub state: Arc<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

pub(crate) struct MockHandle {
    signatures: Vec<(String, Vec<u8>)>,
    max_file_size: u64,
    max_scan_size: u64,
    scans_in_flight: AtomicUsize,
    hook: bool,
    compiled: bool,
    state: Arc<MockState>,
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        self.state.live_engines.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct MockSettings {
    max_file_size: u64,
    max_scan_size: u64,
    state: Arc<MockState>,
}

impl Drop for MockSettings {
    fn drop(&mut self) {
        self.state.live_settings.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct MockSnapshot {
    dir: PathBuf,
    entries: BTreeMap<PathBuf, (Option<SystemTime>, u64)>,
    state: Arc<MockState>,
}

impl Drop for MockSnapshot {
    fn drop(&mut self) {
        self.state.live_snapshots.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) struct MockMap<'a> {
    bytes: &'a [u8],
    state: Arc<MockState>,
}

impl Drop for MockMap<'_> {
    fn drop(&mut self) {
        self.state.open_maps.fetch_sub(1, Ordering::SeqCst);
    }
}

fn sniff(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"MZ") {
        "CL_TYPE_MSEXE"
    } else if bytes.starts_with(b"\x7fELF") {
        "CL_TYPE_ELF"
    } else if bytes.starts_with(b"%PDF") {
        "CL_TYPE_PDF"
    } else if bytes.starts_with(b"PK\x03\x04") {
        "CL_TYPE_ZIP"
    } else if bytes.iter().all(|b| b.is_ascii()) {
        "CL_TYPE_TEXT_ASCII"
    } else {
        "CL_TYPE_BINARY_DATA"
    }
}

fn directory_entries(
    dir: &Path,
) -> Result<BTreeMap<PathBuf, (Option<SystemTime>, u64)>, NativeError> {
    let read = std::fs::read_dir(dir)
        .map_err(|e| NativeError::new(CL_EOPEN, format!("Can't open file or directory: {}", e)))?;
    let mut entries = BTreeMap::new();
    for entry in read {
        let entry = entry.map_err(|e| NativeError::new(CL_ESTAT, e.to_string()))?;
        let meta = entry
            .metadata()
            .map_err(|e| NativeError::new(CL_ESTAT, e.to_string()))?;
        if meta.is_file() {
            entries.insert(entry.path(), (meta.modified().ok(), meta.len()));
        }
    }
    Ok(entries)
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockEngine {
    fn scan_bytes(
        &self,
        engine: &MockHandle,
        bytes: &[u8],
        ctx: &mut ScanContext,
    ) -> Result<RawOutcome, NativeError> {
        self.state.scans.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight::enter(&engine.scans_in_flight);
        if !engine.compiled {
            return Err(NativeError::new(2, "Null argument passed to function"));
        }
        if self.state.fail_scan.load(Ordering::SeqCst) {
            return Err(NativeError::new(CL_EREAD, "Can't read file"));
        }
        if engine.hook {
            ctx.record_type(sniff(bytes));
        }

        if engine.max_file_size != 0 && bytes.len() as u64 > engine.max_file_size {
            return Ok(RawOutcome {
                verdict: RawVerdict::Clean,
                bytes_scanned: 0,
            });
        }
        // 0 means no limit, as in libclamav.
        let max_scan = match engine.max_scan_size {
            0 => usize::MAX,
            limit => usize::try_from(limit).unwrap_or(usize::MAX),
        };
        let data = &bytes[..bytes.len().min(max_scan)];

        let hit = engine
            .signatures
            .iter()
            .find(|(_, pattern)| !pattern.is_empty() && data.windows(pattern.len()).any(|w| w == pattern.as_slice()));

        Ok(RawOutcome {
            verdict: match hit {
                Some((name, _)) => RawVerdict::Virus(name.clone()),
                None => RawVerdict::Clean,
            },
            bytes_scanned: data.len() as u64,
        })
    }
}

impl SignatureEngine for MockEngine {
    type Engine = MockHandle;
    type Settings = MockSettings;
    type Snapshot = MockSnapshot;
    type Map<'a> = MockMap<'a>;

    fn init(&self) -> Result<(), NativeError> {
        if self.state.fail_init.load(Ordering::SeqCst) {
            return Err(NativeError::new(CL_EMEM, "Can't allocate memory"));
        }
        Ok(())
    }

    fn version(&self) -> String {
        "1.4.1-mock".to_string()
    }

    fn new_engine(&self) -> Result<Self::Engine, NativeError> {
        if self.state.fail_new_engine.load(Ordering::SeqCst) {
            return Err(NativeError::new(CL_EMEM, "Can't create new engine"));
        }
        self.state.live_engines.fetch_add(1, Ordering::SeqCst);
        Ok(MockHandle {
            signatures: Vec::new(),
            max_file_size: DEFAULT_MAX_FILESIZE,
            max_scan_size: DEFAULT_MAX_SCANSIZE,
            scans_in_flight: AtomicUsize::new(0),
            hook: false,
            compiled: false,
            state: Arc::clone(&self.state),
        })
    }

    fn copy_settings(&self, engine: &Self::Engine) -> Result<Self::Settings, NativeError> {
        if self.state.fail_settings_copy.load(Ordering::SeqCst) {
            return Err(NativeError::new(CL_EMEM, "cl_engine_settings_copy error"));
        }
        self.state.live_settings.fetch_add(1, Ordering::SeqCst);
        Ok(MockSettings {
            max_file_size: engine.max_file_size,
            max_scan_size: engine.max_scan_size,
            state: Arc::clone(&self.state),
        })
    }

    fn apply_settings(
        &self,
        engine: &mut Self::Engine,
        settings: &Self::Settings,
    ) -> Result<(), NativeError> {
        engine.max_file_size = settings.max_file_size;
        engine.max_scan_size = settings.max_scan_size;
        Ok(())
    }

    fn set_num(
        &self,
        engine: &mut Self::Engine,
        option: NumericOption,
        value: u64,
    ) -> Result<(), NativeError> {
        if engine.scans_in_flight.load(Ordering::SeqCst) != 0 {
            self.state.writes_during_scan.fetch_add(1, Ordering::SeqCst);
        }
        match option {
            NumericOption::MaxFileSize => engine.max_file_size = value,
            NumericOption::MaxScanSize => engine.max_scan_size = value,
        }
        Ok(())
    }

    fn get_num(&self, engine: &Self::Engine, option: NumericOption) -> Result<u64, NativeError> {
        Ok(match option {
            NumericOption::MaxFileSize => engine.max_file_size,
            NumericOption::MaxScanSize => engine.max_scan_size,
        })
    }

    fn load(&self, engine: &mut Self::Engine, path: &Path) -> Result<u32, NativeError> {
        for file in directory_entries(path)?.keys() {
            if file.extension().and_then(|e| e.to_str()) != Some("ndb") {
                continue;
            }
            let content = std::fs::read_to_string(file)
                .map_err(|e| NativeError::new(CL_EREAD, e.to_string()))?;
            for line in content.lines().map(str::trim) {
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let (name, hex_pattern) = line.split_once(':').ok_or_else(|| {
                    NativeError::new(CL_EMALFDB, "Malformed database")
                })?;
                let pattern = hex::decode(hex_pattern)
                    .map_err(|_| NativeError::new(CL_EMALFDB, "Malformed database"))?;
                engine.signatures.push((name.to_string(), pattern));
            }
        }
        Ok(engine.signatures.len() as u32)
    }

    fn compile(&self, engine: &mut Self::Engine) -> Result<(), NativeError> {
        if self.state.fail_compile.load(Ordering::SeqCst) {
            return Err(NativeError::new(CL_EMALFDB, "Malformed database"));
        }
        engine.compiled = true;
        Ok(())
    }

    fn install_pre_scan_hook(&self, engine: &mut Self::Engine) {
        engine.hook = true;
    }

    fn scan_descriptor(
        &self,
        engine: &Self::Engine,
        fd: BorrowedFd<'_>,
        _categories: ScanCategories,
        ctx: &mut ScanContext,
    ) -> Result<RawOutcome, NativeError> {
        let file = File::from(
            fd.try_clone_to_owned()
                .map_err(|e| NativeError::new(CL_EREAD, e.to_string()))?,
        );
        let mut bytes = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = file
                .read_at(&mut buf, bytes.len() as u64)
                .map_err(|e| NativeError::new(CL_EREAD, e.to_string()))?;
            if n == 0 {
                break;
            }
            bytes.extend_from_slice(&buf[..n]);
        }
        self.scan_bytes(engine, &bytes, ctx)
    }

    fn open_memory_map<'a>(&self, bytes: &'a [u8]) -> Option<Self::Map<'a>> {
        if self.state.fail_map.load(Ordering::SeqCst) {
            return None;
        }
        self.state.open_maps.fetch_add(1, Ordering::SeqCst);
        Some(MockMap {
            bytes,
            state: Arc::clone(&self.state),
        })
    }

    fn scan_map(
        &self,
        engine: &Self::Engine,
        map: &Self::Map<'_>,
        _categories: ScanCategories,
        ctx: &mut ScanContext,
    ) -> Result<RawOutcome, NativeError> {
        self.scan_bytes(engine, map.bytes, ctx)
    }

    fn stat_directory(&self, path: &Path) -> Result<Self::Snapshot, NativeError> {
        let entries = directory_entries(path)?;
        self.state.live_snapshots.fetch_add(1, Ordering::SeqCst);
        Ok(MockSnapshot {
            dir: path.to_path_buf(),
            entries,
            state: Arc::clone(&self.state),
        })
    }

    fn directory_changed(&self, snapshot: &Self::Snapshot) -> Result<bool, NativeError> {
        Ok(directory_entries(&snapshot.dir)? != snapshot.entries)
    }

    fn database_header(&self, path: &Path) -> Option<DatabaseHeader> {
        let content = std::fs::read_to_string(path).ok()?;
        let fields: Vec<&str> = content.lines().next()?.split(':').collect();
        if fields.len() < 9 || fields[0] != "ClamAV-VDB" {
            return None;
        }
        Some(DatabaseHeader {
            version: fields[2].parse().ok()?,
            signatures: fields[3].parse().ok()?,
            functionality_level: fields[4].parse().ok()?,
            builder: fields[7].to_string(),
            build_time: fields[8]
                .trim()
                .parse::<i64>()
                .ok()
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        })
    }
}

/// Writes `Name:hex` lines for `signatures` into `dir/file`.
pub(crate) fn write_signatures(dir: &Path, file: &str, signatures: &[(&str, &[u8])]) {
    let body: String = signatures
        .iter()
        .map(|(name, pattern)| format!("{}:{}\n", name, hex::encode(pattern)))
        .collect();
    std::fs::write(dir.join(file), body).unwrap();
}

/// Database with the EICAR test signature and one harmless marker.
pub(crate) fn write_test_database(dir: &Path) {
    write_signatures(
        dir,
        "main.ndb",
        &[
            ("Eicar-Test-Signature", EICAR),
            ("Test.Marker-1", b"MALWARE-MARKER-0001"),
        ],
    );
}

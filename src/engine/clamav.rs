//! libclamav 1.x backend.

#![allow(non_camel_case_types)]

use super::{
    DatabaseHeader, NativeError, NumericOption, RawOutcome, RawVerdict, ScanContext,
    SignatureEngine,
};
use crate::scanner::ScanCategories;
use chrono::{DateTime, Utc};
use libc::{c_char, c_int, c_longlong, c_uint, c_ulong, c_void, size_t};
use once_cell::sync::OnceCell;
use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr::{self, NonNull};

type cl_error_t = c_int;

const CL_SUCCESS: cl_error_t = 0;
const CL_CLEAN: cl_error_t = 0;
const CL_VIRUS: cl_error_t = 1;
const CL_EARG: cl_error_t = 3;
const CL_EMEM: cl_error_t = 20;

const CL_INIT_DEFAULT: c_uint = 0x0;

const CL_DB_PHISHING: c_uint = 0x2;
const CL_DB_PHISHING_URLS: c_uint = 0x8;
const CL_DB_BYTECODE: c_uint = 0x2000;
const CL_DB_STDOPT: c_uint = CL_DB_PHISHING | CL_DB_PHISHING_URLS | CL_DB_BYTECODE;

const CL_SCAN_GENERAL_HEURISTICS: u32 = 0x4;

const CL_ENGINE_MAX_SCANSIZE: c_int = 0;
const CL_ENGINE_MAX_FILESIZE: c_int = 1;

// `scanned` is reported in blocks of this many bytes.
const CL_COUNT_PRECISION: u64 = 4096;

#[repr(C)]
pub struct cl_engine {
    _private: [u8; 0],
}

#[repr(C)]
pub struct cl_settings {
    _private: [u8; 0],
}

#[repr(C)]
pub struct cl_fmap_t {
    _private: [u8; 0],
}

#[repr(C)]
struct cl_stat {
    dir: *mut c_char,
    stattab: *mut c_void,
    statdname: *mut *mut c_char,
    entries: c_uint,
}

#[repr(C)]
struct cl_cvd {
    time: *mut c_char,
    version: c_uint,
    sigs: c_uint,
    fl: c_uint,
    md5: *mut c_char,
    dsig: *mut c_char,
    builder: *mut c_char,
    stime: c_uint,
}

#[repr(C)]
#[derive(Default)]
struct cl_scan_options {
    general: u32,
    parse: u32,
    heuristic: u32,
    mail: u32,
    dev: u32,
}

type clcb_pre_scan =
    Option<unsafe extern "C" fn(fd: c_int, type_: *const c_char, context: *mut c_void) -> cl_error_t>;

#[link(name = "clamav")]
extern "C" {
    fn cl_init(initoptions: c_uint) -> cl_error_t;
    fn cl_retver() -> *const c_char;
    fn cl_strerror(clerror: cl_error_t) -> *const c_char;

    fn cl_engine_new() -> *mut cl_engine;
    fn cl_engine_free(engine: *mut cl_engine) -> cl_error_t;
    fn cl_engine_compile(engine: *mut cl_engine) -> cl_error_t;
    fn cl_engine_settings_copy(engine: *const cl_engine) -> *mut cl_settings;
    fn cl_engine_settings_apply(engine: *mut cl_engine, settings: *const cl_settings) -> cl_error_t;
    fn cl_engine_settings_free(settings: *mut cl_settings) -> cl_error_t;
    fn cl_engine_set_num(engine: *mut cl_engine, field: c_int, num: c_longlong) -> cl_error_t;
    fn cl_engine_get_num(engine: *const cl_engine, field: c_int, err: *mut c_int) -> c_longlong;
    fn cl_engine_set_clcb_pre_scan(engine: *mut cl_engine, callback: clcb_pre_scan);

    fn cl_load(
        path: *const c_char,
        engine: *mut cl_engine,
        signo: *mut c_uint,
        dboptions: c_uint,
    ) -> cl_error_t;

    fn cl_scandesc_callback(
        desc: c_int,
        filename: *const c_char,
        virname: *mut *const c_char,
        scanned: *mut c_ulong,
        engine: *const cl_engine,
        scanoptions: *mut cl_scan_options,
        context: *mut c_void,
    ) -> cl_error_t;

    fn cl_scanmap_callback(
        map: *mut cl_fmap_t,
        filename: *const c_char,
        virname: *mut *const c_char,
        scanned: *mut c_ulong,
        engine: *const cl_engine,
        scanoptions: *mut cl_scan_options,
        context: *mut c_void,
    ) -> cl_error_t;

    fn cl_fmap_open_memory(start: *const c_void, len: size_t) -> *mut cl_fmap_t;
    fn cl_fmap_close(map: *mut cl_fmap_t);

    fn cl_statinidir(dirname: *const c_char, dbstat: *mut cl_stat) -> cl_error_t;
    fn cl_statchkdir(dbstat: *const cl_stat) -> c_int;
    fn cl_statfree(dbstat: *mut cl_stat) -> cl_error_t;

    fn cl_cvdhead(file: *const c_char) -> *mut cl_cvd;
    fn cl_cvdfree(cvd: *mut cl_cvd);
}

static INIT: OnceCell<Result<(), NativeError>> = OnceCell::new();

fn native(code: cl_error_t) -> NativeError {
    let message = unsafe { c_string(cl_strerror(code)) };
    NativeError::new(code, message)
}

unsafe fn c_string(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

fn path_cstring(path: &Path) -> Result<CString, NativeError> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| NativeError::new(CL_EARG, format!("路径包含NUL字符: {:?}", path)))
}

fn field(option: NumericOption) -> c_int {
    match option {
        NumericOption::MaxScanSize => CL_ENGINE_MAX_SCANSIZE,
        NumericOption::MaxFileSize => CL_ENGINE_MAX_FILESIZE,
    }
}

fn scan_options(categories: ScanCategories) -> cl_scan_options {
    let mut opts = cl_scan_options {
        parse: categories.parse_bits(),
        ..Default::default()
    };
    if categories.heuristics() {
        opts.general |= CL_SCAN_GENERAL_HEURISTICS;
    }
    opts
}

fn outcome(ret: cl_error_t, virname: *const c_char, scanned: c_ulong) -> Result<RawOutcome, NativeError> {
    let bytes_scanned = (scanned as u64).saturating_mul(CL_COUNT_PRECISION);
    match ret {
        CL_VIRUS => Ok(RawOutcome {
            verdict: RawVerdict::Virus(unsafe { c_string(virname) }),
            bytes_scanned,
        }),
        CL_CLEAN => Ok(RawOutcome {
            verdict: RawVerdict::Clean,
            bytes_scanned,
        }),
        other => Err(native(other)),
    }
}

unsafe extern "C" fn pre_scan(_fd: c_int, type_: *const c_char, context: *mut c_void) -> cl_error_t {
    if context.is_null() || type_.is_null() {
        return CL_CLEAN;
    }
    // context is always the &mut ScanContext handed to cl_scan*_callback below.
    let ctx = &mut *(context as *mut ScanContext);
    ctx.record_type(&CStr::from_ptr(type_).to_string_lossy());
    CL_CLEAN
}

pub struct ClEngine(NonNull<cl_engine>);

// Scans only take `&ClEngine`; every mutating call needs `&mut`. libclamav
// supports concurrent scans against one compiled engine.
unsafe impl Send for ClEngine {}
unsafe impl Sync for ClEngine {}

impl Drop for ClEngine {
    fn drop(&mut self) {
        unsafe {
            cl_engine_free(self.0.as_ptr());
        }
    }
}

pub struct ClSettings(NonNull<cl_settings>);

unsafe impl Send for ClSettings {}

impl Drop for ClSettings {
    fn drop(&mut self) {
        unsafe {
            cl_engine_settings_free(self.0.as_ptr());
        }
    }
}

pub struct ClStat(Box<cl_stat>);

unsafe impl Send for ClStat {}

impl Drop for ClStat {
    fn drop(&mut self) {
        unsafe {
            cl_statfree(&mut *self.0);
        }
    }
}

pub struct ClMap<'a> {
    map: Option<NonNull<cl_fmap_t>>,
    _bytes: PhantomData<&'a [u8]>,
}

impl Drop for ClMap<'_> {
    fn drop(&mut self) {
        if let Some(map) = self.map.take() {
            unsafe { cl_fmap_close(map.as_ptr()) }
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ClamAv;

impl ClamAv {
    pub fn new() -> Self {
        Self
    }
}

impl SignatureEngine for ClamAv {
    type Engine = ClEngine;
    type Settings = ClSettings;
    type Snapshot = ClStat;
    type Map<'a> = ClMap<'a>;

    fn init(&self) -> Result<(), NativeError> {
        INIT.get_or_init(|| {
            let ret = unsafe { cl_init(CL_INIT_DEFAULT) };
            if ret == CL_SUCCESS {
                Ok(())
            } else {
                Err(native(ret))
            }
        })
        .clone()
    }

    fn version(&self) -> String {
        unsafe { c_string(cl_retver()) }
    }

    fn new_engine(&self) -> Result<Self::Engine, NativeError> {
        NonNull::new(unsafe { cl_engine_new() })
            .map(ClEngine)
            .ok_or_else(|| NativeError::new(CL_EMEM, "Can't create new engine"))
    }

    fn copy_settings(&self, engine: &Self::Engine) -> Result<Self::Settings, NativeError> {
        NonNull::new(unsafe { cl_engine_settings_copy(engine.0.as_ptr()) })
            .map(ClSettings)
            .ok_or_else(|| NativeError::new(CL_EMEM, "cl_engine_settings_copy error"))
    }

    fn apply_settings(
        &self,
        engine: &mut Self::Engine,
        settings: &Self::Settings,
    ) -> Result<(), NativeError> {
        match unsafe { cl_engine_settings_apply(engine.0.as_ptr(), settings.0.as_ptr()) } {
            CL_SUCCESS => Ok(()),
            ret => Err(native(ret)),
        }
    }

    fn set_num(
        &self,
        engine: &mut Self::Engine,
        option: NumericOption,
        value: u64,
    ) -> Result<(), NativeError> {
        let value = c_longlong::try_from(value).unwrap_or(c_longlong::MAX);
        match unsafe { cl_engine_set_num(engine.0.as_ptr(), field(option), value) } {
            CL_SUCCESS => Ok(()),
            ret => Err(native(ret)),
        }
    }

    fn get_num(&self, engine: &Self::Engine, option: NumericOption) -> Result<u64, NativeError> {
        let mut err: c_int = CL_SUCCESS;
        let value = unsafe { cl_engine_get_num(engine.0.as_ptr(), field(option), &mut err) };
        if err != CL_SUCCESS {
            return Err(native(err));
        }
        Ok(value.max(0) as u64)
    }

    fn load(&self, engine: &mut Self::Engine, path: &Path) -> Result<u32, NativeError> {
        let path = path_cstring(path)?;
        let mut sigs: c_uint = 0;
        match unsafe { cl_load(path.as_ptr(), engine.0.as_ptr(), &mut sigs, CL_DB_STDOPT) } {
            CL_SUCCESS => Ok(sigs),
            ret => Err(native(ret)),
        }
    }

    fn compile(&self, engine: &mut Self::Engine) -> Result<(), NativeError> {
        match unsafe { cl_engine_compile(engine.0.as_ptr()) } {
            CL_SUCCESS => Ok(()),
            ret => Err(native(ret)),
        }
    }

    fn install_pre_scan_hook(&self, engine: &mut Self::Engine) {
        unsafe { cl_engine_set_clcb_pre_scan(engine.0.as_ptr(), Some(pre_scan)) }
    }

    fn scan_descriptor(
        &self,
        engine: &Self::Engine,
        fd: BorrowedFd<'_>,
        categories: ScanCategories,
        ctx: &mut ScanContext,
    ) -> Result<RawOutcome, NativeError> {
        let mut opts = scan_options(categories);
        let mut virname: *const c_char = ptr::null();
        let mut scanned: c_ulong = 0;
        let ret = unsafe {
            cl_scandesc_callback(
                fd.as_raw_fd(),
                ptr::null(),
                &mut virname,
                &mut scanned,
                engine.0.as_ptr(),
                &mut opts,
                ctx as *mut ScanContext as *mut c_void,
            )
        };
        outcome(ret, virname, scanned)
    }

    fn open_memory_map<'a>(&self, bytes: &'a [u8]) -> Option<Self::Map<'a>> {
        // libclamav refuses zero-length maps; an empty buffer is scanned as clean.
        if bytes.is_empty() {
            return Some(ClMap {
                map: None,
                _bytes: PhantomData,
            });
        }
        let map = unsafe { cl_fmap_open_memory(bytes.as_ptr() as *const c_void, bytes.len()) };
        NonNull::new(map).map(|map| ClMap {
            map: Some(map),
            _bytes: PhantomData,
        })
    }

    fn scan_map(
        &self,
        engine: &Self::Engine,
        map: &Self::Map<'_>,
        categories: ScanCategories,
        ctx: &mut ScanContext,
    ) -> Result<RawOutcome, NativeError> {
        let Some(fmap) = map.map else {
            return Ok(RawOutcome {
                verdict: RawVerdict::Clean,
                bytes_scanned: 0,
            });
        };
        let mut opts = scan_options(categories);
        let mut virname: *const c_char = ptr::null();
        let mut scanned: c_ulong = 0;
        let ret = unsafe {
            cl_scanmap_callback(
                fmap.as_ptr(),
                ptr::null(),
                &mut virname,
                &mut scanned,
                engine.0.as_ptr(),
                &mut opts,
                ctx as *mut ScanContext as *mut c_void,
            )
        };
        outcome(ret, virname, scanned)
    }

    fn stat_directory(&self, path: &Path) -> Result<Self::Snapshot, NativeError> {
        let dir = path_cstring(path)?;
        let mut stat = Box::new(cl_stat {
            dir: ptr::null_mut(),
            stattab: ptr::null_mut(),
            statdname: ptr::null_mut(),
            entries: 0,
        });
        match unsafe { cl_statinidir(dir.as_ptr(), &mut *stat) } {
            CL_SUCCESS => Ok(ClStat(stat)),
            ret => {
                unsafe {
                    cl_statfree(&mut *stat);
                }
                Err(native(ret))
            }
        }
    }

    fn directory_changed(&self, snapshot: &Self::Snapshot) -> Result<bool, NativeError> {
        match unsafe { cl_statchkdir(&*snapshot.0) } {
            0 => Ok(false),
            1 => Ok(true),
            ret => Err(native(ret)),
        }
    }

    fn database_header(&self, path: &Path) -> Option<DatabaseHeader> {
        let file = path_cstring(path).ok()?;
        let cvd = NonNull::new(unsafe { cl_cvdhead(file.as_ptr()) })?;
        let header = unsafe {
            let cvd = cvd.as_ref();
            DatabaseHeader {
                version: cvd.version,
                signatures: cvd.sigs,
                functionality_level: cvd.fl,
                builder: c_string(cvd.builder),
                build_time: DateTime::<Utc>::from_timestamp(cvd.stime as i64, 0),
            }
        };
        unsafe { cl_cvdfree(cvd.as_ptr()) };
        Some(header)
    }
}

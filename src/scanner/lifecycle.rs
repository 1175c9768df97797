use crate::engine::{NumericOption, SignatureEngine};
use crate::scanner::database::{list_database_files, VdInfo};
use crate::scanner::watcher::DatabaseWatcher;
use crate::scanner::{EngineResult, EngineSettings, ScanError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// What happens to a working engine when a rebuild is requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildPolicy {
    /// The old engine is dropped before the new one is loaded; a failed
    /// rebuild leaves no engine until the next successful build.
    #[default]
    FailClosed,
    /// The old engine keeps serving scans until the new one is compiled and
    /// stays in place if the rebuild fails.
    KeepPrevious,
}

/// A compiled engine shared between scans. Scans hold the read guard for the
/// whole native call; changing limits takes the write guard.
pub(crate) type SharedEngine<E> = Arc<RwLock<<E as SignatureEngine>::Engine>>;

/// Owns the compiled engine for one database directory.
///
/// Scans clone the current `Arc` under a short read lock, so an engine that is
/// swapped out mid-scan is freed only after the last scan using it returns.
/// `build`, `rebuild`, `apply_settings` and `destroy` are serialised by a
/// writer mutex.
pub struct EngineLifecycle<E: SignatureEngine> {
    lib: E,
    db_path: PathBuf,
    engine: RwLock<Option<SharedEngine<E>>>,
    writer: Mutex<()>,
    settings: Mutex<EngineSettings>,
    watcher: DatabaseWatcher<E>,
    vd_info: Mutex<Vec<VdInfo>>,
    sig_count: AtomicU32,
    policy: RebuildPolicy,
}

impl<E: SignatureEngine> EngineLifecycle<E> {
    pub fn new<P: AsRef<Path>>(lib: E, db_path: P) -> EngineResult<Self> {
        lib.init().map_err(|e| {
            log::error!("无法初始化libclamav: {}", e);
            ScanError::InitFailed(e.to_string())
        })?;

        let db_path = db_path.as_ref().to_path_buf();
        let watcher = DatabaseWatcher::new(&lib, &db_path);

        Ok(Self {
            lib,
            db_path,
            engine: RwLock::new(None),
            writer: Mutex::new(()),
            settings: Mutex::new(EngineSettings::default()),
            watcher,
            vd_info: Mutex::new(Vec::new()),
            sig_count: AtomicU32::new(0),
            policy: RebuildPolicy::default(),
        })
    }

    pub fn with_policy(mut self, policy: RebuildPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Limits applied to every engine this lifecycle builds.
    pub fn with_settings(self, settings: EngineSettings) -> Self {
        self.settings.lock().merge(&settings);
        self
    }

    pub fn build(&self) -> EngineResult<u32> {
        let _writer = self.writer.lock();
        self.prepare(None).map_err(|e| {
            self.discard();
            e
        })
    }

    pub fn rebuild(&self) -> EngineResult<u32> {
        let _writer = self.writer.lock();

        let copied = self.current().and_then(|engine| {
            let copied = self.lib.copy_settings(&engine.read());
            match copied {
                Ok(settings) => Some(settings),
                Err(e) => {
                    log::warn!("{}", ScanError::SettingsCopyFailed(e.to_string()));
                    None
                }
            }
        });

        if self.policy == RebuildPolicy::FailClosed {
            self.discard();
        }

        self.prepare(copied).map_err(|e| {
            if self.is_ready() {
                log::warn!("病毒库重建失败，继续使用旧引擎: {}", e);
            } else {
                log::error!("病毒库重建失败，扫描引擎不可用: {}", e);
            }
            e
        })
    }

    /// Builds and compiles a new engine, swapping it in only once it is ready.
    fn prepare(&self, copied: Option<E::Settings>) -> EngineResult<u32> {
        if !self.db_path.exists() {
            return Err(ScanError::PathNotFound(self.db_path.clone()));
        }

        *self.vd_info.lock() = list_database_files(&self.lib, &self.db_path);

        let mut engine = self
            .lib
            .new_engine()
            .map_err(|e| ScanError::InitFailed(e.to_string()))?;

        if let Some(settings) = copied {
            if let Err(e) = self.lib.apply_settings(&mut engine, &settings) {
                log::warn!("cl_engine_settings_apply error: {}", e);
            }
        }
        let configured = *self.settings.lock();
        self.apply_overrides(&mut engine, &configured);

        let sigs = self
            .lib
            .load(&mut engine, &self.db_path)
            .map_err(|e| ScanError::LoadFailed(e.to_string()))?;

        self.lib
            .compile(&mut engine)
            .map_err(|e| ScanError::CompileFailed(e.to_string()))?;

        self.lib.install_pre_scan_hook(&mut engine);

        *self.engine.write() = Some(Arc::new(RwLock::new(engine)));
        self.sig_count.store(sigs, Ordering::Release);
        self.watcher.reset(&self.lib);

        log::info!("病毒库已加载: {:?}，签名数量: {}", self.db_path, sigs);
        Ok(sigs)
    }

    fn apply_overrides(&self, engine: &mut E::Engine, settings: &EngineSettings) {
        for (option, value) in settings.overrides() {
            if let Err(e) = self.lib.set_num(engine, option, value) {
                log::warn!("无法设置 {} = {}: {}", option.name(), value, e);
            }
        }
    }

    fn discard(&self) {
        if self.engine.write().take().is_some() {
            log::info!("已释放扫描引擎");
        }
        self.sig_count.store(0, Ordering::Release);
    }

    pub fn destroy(&self) {
        let _writer = self.writer.lock();
        self.discard();
    }

    pub fn apply_settings(&self, settings: EngineSettings) -> EngineResult<()> {
        let _writer = self.writer.lock();
        let shared = self.current().ok_or(ScanError::NotReady)?;
        let mut engine = shared.write();

        self.apply_overrides(&mut engine, &settings);
        self.settings.lock().merge(&settings);

        if let Ok(current) = self.read_settings(&engine) {
            log::info!(
                "CL_ENGINE_MAX_FILESIZE = {:?}, CL_ENGINE_MAX_SCANSIZE = {:?}",
                current.max_file_size,
                current.max_scan_size
            );
        }
        Ok(())
    }

    /// Limits currently in effect on the live engine.
    pub fn settings(&self) -> EngineResult<EngineSettings> {
        let engine = self.current().ok_or(ScanError::NotReady)?;
        let engine = engine.read();
        self.read_settings(&engine)
    }

    fn read_settings(&self, engine: &E::Engine) -> EngineResult<EngineSettings> {
        let read = |option| {
            self.lib
                .get_num(engine, option)
                .map_err(|e| ScanError::SettingsCopyFailed(e.to_string()))
        };
        Ok(EngineSettings {
            max_file_size: Some(read(NumericOption::MaxFileSize)?),
            max_scan_size: Some(read(NumericOption::MaxScanSize)?),
        })
    }

    pub fn is_database_stale(&self) -> bool {
        self.watcher.check(&self.lib)
    }

    pub(crate) fn current(&self) -> Option<SharedEngine<E>> {
        self.engine.read().clone()
    }

    pub(crate) fn lib(&self) -> &E {
        &self.lib
    }

    pub fn is_ready(&self) -> bool {
        self.engine.read().is_some()
    }

    pub fn signature_count(&self) -> u32 {
        self.sig_count.load(Ordering::Acquire)
    }

    pub fn database_files(&self) -> Vec<VdInfo> {
        self.vd_info.lock().clone()
    }

    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    pub fn policy(&self) -> RebuildPolicy {
        self.policy
    }

    pub fn version(&self) -> String {
        self.lib.version()
    }
}

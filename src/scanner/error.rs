use std::path::PathBuf;
use thiserror::Error;

pub type EngineResult<T> = Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("无法初始化扫描引擎: {0}")]
    InitFailed(String),

    #[error("病毒库路径不存在: {0:?}")]
    PathNotFound(PathBuf),

    #[error("病毒库加载失败: {0}")]
    LoadFailed(String),

    #[error("病毒库编译失败: {0}")]
    CompileFailed(String),

    #[error("扫描失败: {0}")]
    ScanFailed(String),

    #[error("无法为缓冲区建立内存映射")]
    MapFailed,

    /// Non-fatal: a rebuild continues with engine defaults.
    #[error("无法复制引擎设置: {0}")]
    SettingsCopyFailed(String),

    /// Non-fatal: staleness checks treat the database as unchanged.
    #[error("无法读取病毒库目录状态: {0}")]
    StatError(String),

    #[error("扫描引擎未就绪")]
    NotReady,

    #[error("文件读取错误: {0}")]
    Io(#[from] std::io::Error),
}

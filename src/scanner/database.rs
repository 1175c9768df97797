use crate::engine::{DatabaseHeader, SignatureEngine};
use glob::Pattern;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Signature containers listed for information; loading consumes the whole directory.
pub const DATABASE_PATTERNS: &[&str] = &["*.cvd", "*.cld"];

#[derive(Debug, Clone, Serialize)]
pub struct VdInfo {
    pub name: PathBuf,
    pub header: Option<DatabaseHeader>,
}

pub fn list_database_files<E: SignatureEngine>(engine: &E, dir: &Path) -> Vec<VdInfo> {
    let base = Pattern::escape(&dir.to_string_lossy());
    let mut files = Vec::new();

    for pattern in DATABASE_PATTERNS {
        let full = format!("{}/{}", base, pattern);
        let entries = match glob::glob(&full) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("无效的病毒库匹配模式 {}: {}", full, e);
                continue;
            }
        };

        for entry in entries {
            match entry {
                Ok(path) => {
                    let header = engine.database_header(&path);
                    if header.is_none() {
                        log::warn!("无法读取病毒库文件头: {:?}", path);
                    }
                    files.push(VdInfo { name: path, header });
                }
                Err(e) => log::warn!("访问病毒库文件错误: {}", e),
            }
        }
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    files
}

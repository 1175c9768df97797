pub mod database;
mod error;
mod lifecycle;
pub mod mask;
mod scan;
mod settings;
mod watcher;


pub use database::{list_database_files, VdInfo};
pub use error::{EngineResult, ScanError};
pub use lifecycle::{EngineLifecycle, RebuildPolicy};
pub use mask::{scan_options_for, setting_mask, ScanCategories, SETTING_MASK_TABLE};
pub use scan::{ScanResult, Verdict};
pub use settings::EngineSettings;
pub use watcher::DatabaseWatcher;

pub mod engine;
pub mod scanner;
pub mod monitor;
pub mod cli;
pub mod utils;
pub mod config;


pub use engine::SignatureEngine;
pub use scanner::{EngineLifecycle, EngineSettings, ScanCategories, ScanError, ScanResult, Verdict};

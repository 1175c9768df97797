use crate::engine::NumericOption;
use serde::{Deserialize, Serialize};

/// Engine limits. `None` or zero keeps the engine default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default)]
    pub max_file_size: Option<u64>,
    #[serde(default)]
    pub max_scan_size: Option<u64>,
}

impl EngineSettings {
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = Some(bytes);
        self
    }

    pub fn with_max_scan_size(mut self, bytes: u64) -> Self {
        self.max_scan_size = Some(bytes);
        self
    }

    /// Options that actually override the engine, in the order they are applied.
    pub fn overrides(&self) -> Vec<(NumericOption, u64)> {
        [
            (NumericOption::MaxFileSize, self.max_file_size),
            (NumericOption::MaxScanSize, self.max_scan_size),
        ]
        .into_iter()
        .filter_map(|(option, value)| match value {
            Some(v) if v != 0 => Some((option, v)),
            _ => None,
        })
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides().is_empty()
    }

    /// Non-zero fields of `other` replace ours.
    pub fn merge(&mut self, other: &EngineSettings) {
        for (option, value) in other.overrides() {
            match option {
                NumericOption::MaxFileSize => self.max_file_size = Some(value),
                NumericOption::MaxScanSize => self.max_scan_size = Some(value),
            }
        }
    }
}

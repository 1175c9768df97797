use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Content categories the engine should parse. Parser bits share their
    /// values with libclamav's `CL_SCAN_PARSE_*` flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ScanCategories: u32 {
        const ARCHIVE = 0x1;
        const ELF = 0x2;
        const PDF = 0x4;
        const SWF = 0x8;
        const HWP3 = 0x10;
        const XMLDOCS = 0x20;
        const MAIL = 0x40;
        const OLE2 = 0x80;
        const HTML = 0x100;
        const PE = 0x200;
        /// Heuristic (algorithmic) detection, a general option rather than a parser.
        const ALGORITHMIC = 0x1_0000;
    }
}

impl ScanCategories {
    /// Raw scan: no parsers, no heuristics.
    pub const RAW: Self = Self::empty();

    /// Equivalent of the engine's standard options: every parser plus heuristics.
    pub fn standard() -> Self {
        Self::all()
    }

    pub fn parse_bits(self) -> u32 {
        self.difference(Self::ALGORITHMIC).bits()
    }

    pub fn heuristics(self) -> bool {
        self.contains(Self::ALGORITHMIC)
    }
}

/// Configuration names and the flags they select.
pub const SETTING_MASK_TABLE: &[(&str, ScanCategories)] = &[
    ("ARCHIVE", ScanCategories::ARCHIVE),
    ("MAIL", ScanCategories::MAIL),
    ("OLE2", ScanCategories::OLE2),
    ("PDF", ScanCategories::PDF),
    ("HTML", ScanCategories::HTML),
    ("PE", ScanCategories::PE),
    ("ALGORITHMIC", ScanCategories::ALGORITHMIC),
    ("ELF", ScanCategories::ELF),
    ("SWF", ScanCategories::SWF),
    ("XMLDOCS", ScanCategories::XMLDOCS),
    ("HWP3", ScanCategories::HWP3),
];

/// Flag for a single section name; unknown names map to no flags.
pub fn setting_mask(section: &str) -> ScanCategories {
    SETTING_MASK_TABLE
        .iter()
        .find(|(name, _)| *name == section)
        .map(|(_, flag)| *flag)
        .unwrap_or(ScanCategories::empty())
}

pub fn scan_options_for<I, S>(names: I) -> ScanCategories
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names.into_iter().fold(ScanCategories::empty(), |mask, name| {
        let flag = setting_mask(name.as_ref());
        if flag.is_empty() {
            log::debug!("忽略未知的扫描类别: {}", name.as_ref());
        }
        mask | flag
    })
}

//! Reader and writer configuration.

use std::str::FromStr;

use anyhow::bail;
use gridconv_core::{Diagnostics, ReadStats, System};
use serde::{Deserialize, Serialize};

/// Result of reading a source model: the system plus everything worth
/// reporting about how it was built.
#[derive(Debug)]
pub struct ReadResult {
    pub system: System,
    pub diagnostics: Diagnostics,
    pub stats: ReadStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReaderOptions {
    /// CYME network file name inside the input directory
    pub network_file: String,
    /// CYME equipment file name inside the input directory
    pub equipment_file: String,
    /// CYME load file name inside the input directory
    pub load_file: String,
    /// CYME load model to select when the load file carries several
    pub load_model_id: Option<String>,
    /// Keep only these substations (empty keeps all)
    pub substations: Vec<String>,
    /// Keep only these feeders (empty keeps all)
    pub feeders: Vec<String>,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            network_file: "network.txt".to_string(),
            equipment_file: "equipment.txt".to_string(),
            load_file: "load.txt".to_string(),
            load_model_id: None,
            substations: Vec::new(),
            feeders: Vec::new(),
        }
    }
}

impl ReaderOptions {
    pub fn truncates(&self) -> bool {
        !self.substations.is_empty() || !self.feeders.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CimOutputMode {
    /// One `model.xml` document
    #[default]
    Single,
    /// One document per substation/feeder/kind plus a manifest
    Package,
}

impl FromStr for CimOutputMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "single" => Ok(CimOutputMode::Single),
            "package" => Ok(CimOutputMode::Package),
            _ => bail!("output_mode must be either 'single' or 'package', got '{}'", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriterOptions {
    pub cim_output_mode: CimOutputMode,
    /// CIM package: one folder per substation
    pub separate_substations: bool,
    /// CIM package: one folder per feeder
    pub separate_feeders: bool,
    /// CIM package: one document per component kind
    pub separate_equipment_types: bool,
    /// OpenDSS: per-substation script folders
    pub opendss_separate_substations: bool,
    /// OpenDSS: per-feeder script folders
    pub opendss_separate_feeders: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            cim_output_mode: CimOutputMode::Single,
            separate_substations: true,
            separate_feeders: true,
            separate_equipment_types: true,
            opendss_separate_substations: false,
            opendss_separate_feeders: false,
        }
    }
}

/// File-system safe folder name for a substation or feeder.
pub fn safe_group_name(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

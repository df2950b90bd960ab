//! Sectioned CYME text exports.
//!
//! A section starts at a `[NAME]` header, takes its column names from the
//! `FORMAT_{NAMENOSPACES}=` line and runs until a blank line or the next
//! header. `FEEDER=` and `SUBSTATION=` lines set the context attached to
//! the rows that follow them.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};

use crate::table::Table;

/// Context columns appended to rows read with [`CymeFile::section_with_context`].
pub const FEEDER_COLUMN: &str = "FeederID";
pub const SUBSTATION_COLUMN: &str = "SubstationID";

/// One CYME export file held in memory.
#[derive(Debug, Clone)]
pub struct CymeFile {
    path: PathBuf,
    text: String,
}

impl CymeFile {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading CYME file '{}'; ensure file exists", path.display()))?;
        Ok(Self::from_text(path, text))
    }

    pub fn from_text(path: &Path, text: impl Into<String>) -> Self {
        Self {
            path: path.to_path_buf(),
            text: text.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn has_section(&self, name: &str) -> bool {
        let header = format!("[{}]", name);
        self.text.lines().any(|line| line.trim() == header)
    }

    /// Rows of section `name`; an absent section yields an empty table.
    pub fn section(&self, name: &str) -> Result<Table> {
        self.read(name, false)
    }

    /// Rows of section `name` with the feeder and substation in effect on
    /// each row added as [`FEEDER_COLUMN`] and [`SUBSTATION_COLUMN`].
    pub fn section_with_context(&self, name: &str) -> Result<Table> {
        self.read(name, true)
    }

    fn read(&self, name: &str, with_context: bool) -> Result<Table> {
        let header = format!("[{}]", name);
        let format_key = format!("FORMAT_{}", name.replace(' ', ""));
        let mut table: Option<Table> = None;
        let mut reading = false;
        let mut feeder: Option<String> = None;
        let mut substation: Option<String> = None;

        for (line_no, raw) in self.text.lines().enumerate() {
            let line = raw.trim();
            if !reading {
                reading = line == header;
                continue;
            }
            if line.is_empty() || line.starts_with('[') {
                break;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                if key.eq_ignore_ascii_case(&format_key) {
                    let mut columns: Vec<&str> = value.split(',').map(str::trim).collect();
                    if with_context {
                        columns.extend([FEEDER_COLUMN, SUBSTATION_COLUMN]);
                    }
                    table = Some(Table::new(&columns));
                    continue;
                }
                if key.starts_with("FORMAT") {
                    continue;
                }
                if key == "FEEDER" {
                    feeder = context_value(value);
                    continue;
                }
                if key == "SUBSTATION" {
                    substation = context_value(value);
                    continue;
                }
            }

            let Some(table) = table.as_mut() else {
                bail!(
                    "{}:{}: section [{}] has data before its {} line",
                    self.path.display(),
                    line_no + 1,
                    name,
                    format_key
                );
            };
            let width = table.columns().len() - if with_context { 2 } else { 0 };
            let mut values: Vec<Option<String>> = line
                .split(',')
                .map(|cell| {
                    let cell = cell.trim();
                    (!cell.is_empty()).then(|| cell.to_string())
                })
                .collect();
            values.resize(width, None);
            if with_context {
                values.push(feeder.clone());
                values.push(substation.clone());
            }
            table.push(values);
        }

        Ok(table.unwrap_or_default())
    }
}

/// `F1,other,fields` -> `F1`.
fn context_value(value: &str) -> Option<String> {
    value
        .split(',')
        .next()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETWORK: &str = "\
[GENERAL]
DATE=today

[SECTION]
FORMAT_SECTION=SectionID,FromNodeID,FromNodeIndex,ToNodeID,ToNodeIndex,Phase
SUBSTATION=S1
FEEDER=F1,1,0
s1,n1,0,n2,0,ABC
FEEDER=F2
s2,n2,0,n3,0,A

[NODE]
FORMAT_NODE=NodeID,CoordX,CoordY
n1,1.0,2.0
n2,,
";

    fn file() -> CymeFile {
        CymeFile::from_text(Path::new("network.txt"), NETWORK)
    }

    #[test]
    fn reads_rows_under_format_line() {
        let nodes = file().section("NODE").unwrap();
        assert_eq!(nodes.columns(), ["NodeID", "CoordX", "CoordY"]);
        assert_eq!(nodes.len(), 2);
        let second = nodes.rows().nth(1).unwrap();
        assert_eq!(second.get("NodeID"), Some("n2"));
        assert_eq!(second.get("CoordX"), None);
    }

    #[test]
    fn feeder_line_keeps_substation_context() {
        let sections = file().section_with_context("SECTION").unwrap();
        let rows: Vec<_> = sections.rows().collect();
        assert_eq!(rows[0].get(FEEDER_COLUMN), Some("F1"));
        assert_eq!(rows[1].get(FEEDER_COLUMN), Some("F2"));
        assert_eq!(rows[1].get(SUBSTATION_COLUMN), Some("S1"));
    }

    #[test]
    fn missing_section_is_empty() {
        let table = file().section("LOADS").unwrap();
        assert!(table.is_empty());
        assert!(!file().has_section("LOADS"));
    }

    #[test]
    fn data_before_format_is_an_error() {
        let bad = CymeFile::from_text(Path::new("x.txt"), "[NODE]\nn1,1,2\n");
        let err = bad.section("NODE").unwrap_err();
        assert!(err.to_string().contains("before its FORMAT_NODE line"));
    }
}

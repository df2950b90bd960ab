//! Reader and writer registry.
//!
//! Formats are resolved from their registered names; an unknown name is an
//! ordinary [`GridError::UnknownFormat`] listing what is available.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;
use gridconv_core::{truncation, GridError, System};

use crate::cim::{read_cim, write_cim};
use crate::cyme::read_cyme;
use crate::json::{read_json, write_json};
use crate::opendss::{read_opendss, write_opendss};
use crate::options::{ReadResult, ReaderOptions, WriterOptions};

/// Source formats that can build a [`System`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReaderKind {
    /// OpenDSS master script
    OpenDss,
    /// CIM IEC 61968-13 RDF/XML (file, directory or zip archive)
    Cim,
    /// CYME network/equipment/load text exports
    Cyme,
    /// Canonical JSON snapshot
    Json,
}

/// Target formats a [`System`] can be written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriterKind {
    /// OpenDSS scripts with a `Master.dss`
    OpenDss,
    /// CIM IEC 61968-13 RDF/XML, single document or package
    Cim,
    /// Canonical JSON snapshot
    Json,
}

impl ReaderKind {
    pub const ALL: &'static [ReaderKind] = &[
        ReaderKind::OpenDss,
        ReaderKind::Cim,
        ReaderKind::Cyme,
        ReaderKind::Json,
    ];

    /// Registered name, as accepted on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            ReaderKind::OpenDss => "opendss",
            ReaderKind::Cim => "cim_iec_61968_13",
            ReaderKind::Cyme => "cyme",
            ReaderKind::Json => "json",
        }
    }

    pub fn friendly_name(&self) -> &'static str {
        match self {
            ReaderKind::OpenDss => "OpenDSS scripts",
            ReaderKind::Cim => "CIM IEC 61968-13 RDF/XML",
            ReaderKind::Cyme => "CYME text exports",
            ReaderKind::Json => "canonical JSON snapshot",
        }
    }

    pub fn names() -> Vec<String> {
        Self::ALL.iter().map(|kind| kind.name().to_string()).collect()
    }

    pub fn read(&self, path: &Path, options: &ReaderOptions) -> Result<ReadResult> {
        match self {
            ReaderKind::OpenDss => read_opendss(path, options),
            ReaderKind::Cim => read_cim(path, options),
            ReaderKind::Cyme => read_cyme(path, options),
            ReaderKind::Json => {
                let mut result = read_json(path)?;
                if options.truncates() {
                    let system = std::mem::take(&mut result.system);
                    result.system =
                        truncation::truncate(system, &options.substations, &options.feeders)?;
                }
                Ok(result)
            }
        }
    }
}

impl WriterKind {
    pub const ALL: &'static [WriterKind] = &[WriterKind::OpenDss, WriterKind::Cim, WriterKind::Json];

    pub fn name(&self) -> &'static str {
        match self {
            WriterKind::OpenDss => "opendss",
            WriterKind::Cim => "cim_iec_61968_13",
            WriterKind::Json => "json",
        }
    }

    pub fn friendly_name(&self) -> &'static str {
        match self {
            WriterKind::OpenDss => "OpenDSS scripts",
            WriterKind::Cim => "CIM IEC 61968-13 RDF/XML",
            WriterKind::Json => "canonical JSON snapshot",
        }
    }

    pub fn names() -> Vec<String> {
        Self::ALL.iter().map(|kind| kind.name().to_string()).collect()
    }

    /// Write `system` under `output`, returning every file produced.
    pub fn write(&self, system: &System, output: &Path, options: &WriterOptions) -> Result<Vec<PathBuf>> {
        match self {
            WriterKind::OpenDss => write_opendss(system, output, options),
            WriterKind::Cim => write_cim(system, output, options),
            WriterKind::Json => write_json(system, output),
        }
    }
}

impl fmt::Display for ReaderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for WriterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn lookup<T: Copy>(all: &[T], name: &str, kind_name: impl Fn(&T) -> &'static str) -> Option<T> {
    let wanted = name.trim().to_lowercase();
    let wanted = if wanted == "cim" { "cim_iec_61968_13".to_string() } else { wanted };
    all.iter().copied().find(|kind| kind_name(kind) == wanted)
}

impl FromStr for ReaderKind {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(Self::ALL, s, ReaderKind::name).ok_or_else(|| GridError::UnknownFormat {
            role: "reader".into(),
            name: s.to_string(),
            available: Self::names(),
        })
    }
}

impl FromStr for WriterKind {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lookup(Self::ALL, s, WriterKind::name).ok_or_else(|| GridError::UnknownFormat {
            role: "writer".into(),
            name: s.to_string(),
            available: Self::names(),
        })
    }
}

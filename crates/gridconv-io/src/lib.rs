//! # gridconv-io: distribution network readers and writers
//!
//! Every format converts through the canonical [`gridconv_core::System`].
//! Readers load the source, run per-kind queries, map rows onto canonical
//! components in a fixed dependency order (buses, then equipment, then the
//! devices that reference them) and finish with the topology repair passes
//! and aggregated validation from `gridconv-core`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//!
//! use gridconv_io::{convert, ConvertOptions, ReaderKind, WriterKind};
//!
//! fn main() -> anyhow::Result<()> {
//!     let report = convert(
//!         ReaderKind::OpenDss,
//!         WriterKind::Cim,
//!         Path::new("feeder/Master.dss"),
//!         Path::new("out"),
//!         None,
//!         &ConvertOptions::default(),
//!     )?;
//!     println!("{} components, {} files", report.total_components(), report.files.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Supported Formats
//!
//! | Format | Registered name | Read | Write | Notes |
//! |--------|-----------------|------|-------|-------|
//! | OpenDSS | `opendss` | yes | yes | `Master.dss` + per-class scripts |
//! | CIM IEC 61968-13 | `cim_iec_61968_13` | yes | yes | RDF/XML file, package directory or `.zip` |
//! | CYME | `cyme` | yes | no | `network.txt`, `equipment.txt`, `load.txt` |
//! | Canonical JSON | `json` | yes | yes | interchange snapshot |
//!
//! ## Module Overview
//!
//! - [`rdf`] - RDF/XML triple store and pattern queries
//! - [`table`] - string-typed query results consumed by mappers
//! - [`cim`] / [`cyme`] / [`opendss`] - format readers and writers
//! - [`json`] - canonical snapshot
//! - [`format`] - reader/writer registry
//! - [`convert`](mod@convert) - one-shot conversion with a report
//! - [`options`] - reader and writer configuration

pub mod cim;
pub mod convert;
pub mod cyme;
pub mod format;
pub mod json;
pub mod opendss;
pub mod options;
pub mod rdf;
pub mod table;

pub use convert::{convert, ConversionReport, ConvertOptions};
pub use format::{ReaderKind, WriterKind};
pub use options::{CimOutputMode, ReadResult, ReaderOptions, WriterOptions};

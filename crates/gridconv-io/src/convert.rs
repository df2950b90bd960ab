//! One-shot conversion: read, optionally snapshot, write.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use gridconv_core::{Diagnostics, ReadStats};
use serde::Serialize;
use tracing::info;

use crate::format::{ReaderKind, WriterKind};
use crate::json::write_json;
use crate::options::{ReaderOptions, WriterOptions};

/// Conversion settings for both sides.
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    pub reader: ReaderOptions,
    pub writer: WriterOptions,
    /// Fail before writing when the read reported any issue
    pub strict: bool,
}

/// What a conversion produced.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub system: String,
    pub reader: String,
    pub writer: String,
    /// Components per kind in the converted system
    pub counts: BTreeMap<String, usize>,
    /// Written files, including the intermediate snapshot if requested
    pub files: Vec<PathBuf>,
    pub diagnostics: Diagnostics,
    pub stats: ReadStats,
}

impl ConversionReport {
    pub fn total_components(&self) -> usize {
        self.counts.values().sum()
    }
}

/// Read `input` with `reader`, write it to `output` with `writer`.
///
/// When `intermediate` is given the canonical system is also saved there
/// as a JSON snapshot before the target files are written.
pub fn convert(
    reader: ReaderKind,
    writer: WriterKind,
    input: &Path,
    output: &Path,
    intermediate: Option<&Path>,
    options: &ConvertOptions,
) -> Result<ConversionReport> {
    info!(reader = %reader, writer = %writer, input = %input.display(), "converting");
    let read = reader
        .read(input, &options.reader)
        .with_context(|| format!("reading {} input '{}'", reader, input.display()))?;
    if options.strict && read.diagnostics.has_issues() {
        let messages: Vec<String> = read.diagnostics.issues.iter().map(|i| i.to_string()).collect();
        bail!(
            "Strict mode: reading produced {} warning(s):\n  - {}",
            read.diagnostics.warning_count(),
            messages.join("\n  - ")
        );
    }

    let mut files = Vec::new();
    if let Some(path) = intermediate {
        files.extend(
            write_json(&read.system, path)
                .with_context(|| format!("saving intermediate snapshot '{}'", path.display()))?,
        );
    }
    files.extend(
        writer
            .write(&read.system, output, &options.writer)
            .with_context(|| format!("writing {} output '{}'", writer, output.display()))?,
    );

    let counts = read
        .system
        .stats()
        .into_iter()
        .map(|(kind, count)| (kind.as_str().to_string(), count))
        .collect();
    let report = ConversionReport {
        system: read.system.name.clone(),
        reader: reader.name().to_string(),
        writer: writer.name().to_string(),
        counts,
        files,
        diagnostics: read.diagnostics,
        stats: read.stats,
    };
    info!(
        components = report.total_components(),
        files = report.files.len(),
        warnings = report.diagnostics.warning_count(),
        "conversion complete"
    );
    Ok(report)
}

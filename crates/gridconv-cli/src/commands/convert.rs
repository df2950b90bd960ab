use std::io::{self, Write};

use anyhow::Result;
use gridconv_cli::ConvertArgs;
use gridconv_io::{convert, ConversionReport, ConvertOptions, ReaderOptions, WriterOptions};
use tabwriter::TabWriter;
use tracing::info;

fn options(args: &ConvertArgs) -> ConvertOptions {
    let mut reader = ReaderOptions {
        load_model_id: args.load_model_id.clone(),
        substations: args.substations.clone(),
        feeders: args.feeders.clone(),
        ..ReaderOptions::default()
    };
    if let Some(name) = &args.network_file {
        reader.network_file = name.clone();
    }
    if let Some(name) = &args.equipment_file {
        reader.equipment_file = name.clone();
    }
    if let Some(name) = &args.load_file {
        reader.load_file = name.clone();
    }
    ConvertOptions {
        reader,
        writer: WriterOptions {
            cim_output_mode: args.cim_mode.into(),
            separate_substations: !args.no_separate_substations,
            separate_feeders: !args.no_separate_feeders,
            separate_equipment_types: !args.no_separate_equipment_types,
            opendss_separate_substations: args.dss_separate_substations,
            opendss_separate_feeders: args.dss_separate_feeders,
        },
        strict: args.strict,
    }
}

pub fn handle(args: &ConvertArgs) -> Result<()> {
    info!(
        "Converting {} from {} to {}",
        args.input.display(),
        args.from,
        args.to
    );
    let report = convert(
        args.from,
        args.to,
        &args.input,
        &args.output,
        args.save_json.as_deref(),
        &options(args),
    )?;

    if args.verbose {
        eprint!("{}", report.diagnostics);
    }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    print_report(&report)
}

fn print_report(report: &ConversionReport) -> Result<()> {
    let mut writer = TabWriter::new(io::stdout());
    writeln!(writer, "KIND\tCOUNT")?;
    for (kind, count) in &report.counts {
        writeln!(writer, "{}\t{}", kind, count)?;
    }
    writer.flush()?;
    println!(
        "Converted '{}' ({} components, {}) into {} file(s):",
        report.system,
        report.total_components(),
        report.diagnostics.summary(),
        report.files.len()
    );
    for file in &report.files {
        println!("  {}", file.display());
    }
    Ok(())
}

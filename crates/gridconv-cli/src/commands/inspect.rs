//! Summaries of a network model as a reader builds it.

use std::io::{self, Write};

use anyhow::Result;
use gridconv_cli::InspectArgs;
use gridconv_core::graph_utils::{find_islands, graph_stats, GraphStats, IslandSummary};
use gridconv_core::phase::phase_letters;
use gridconv_core::session::SystemSummary;
use gridconv_core::{Component, ComponentKind, Diagnostics, Session, System, SystemMetrics};
use gridconv_io::ReaderOptions;
use serde::Serialize;
use tabwriter::TabWriter;

#[derive(Serialize)]
struct Inspection<'a> {
    summary: SystemSummary,
    metrics: SystemMetrics,
    graph: GraphStats,
    islands: Vec<IslandSummary>,
    diagnostics: &'a Diagnostics,
}

pub fn handle(args: &InspectArgs) -> Result<()> {
    let options = ReaderOptions {
        load_model_id: args.load_model_id.clone(),
        ..ReaderOptions::default()
    };
    let result = args.from.read(&args.input, &options)?;

    let mut session = Session::new();
    let name = result.system.name.clone();
    session.create(name.as_str(), result.system);
    let system = session.get(&name)?;

    match args.kind {
        Some(kind) => list_components(system, kind, args.json),
        None => {
            let view = system.graph();
            let inspection = Inspection {
                summary: session.summary(&name)?,
                metrics: SystemMetrics::from_system(system),
                graph: graph_stats(&view),
                islands: find_islands(&view),
                diagnostics: &result.diagnostics,
            };
            if args.json {
                println!("{}", serde_json::to_string_pretty(&inspection)?);
                Ok(())
            } else {
                print_summary(&inspection)
            }
        }
    }
}

fn print_summary(inspection: &Inspection<'_>) -> Result<()> {
    println!("System: {}", inspection.summary.name);
    let mut writer = TabWriter::new(io::stdout());
    writeln!(writer, "KIND\tCOUNT")?;
    for (kind, count) in &inspection.summary.components {
        writeln!(writer, "{}\t{}", kind, count)?;
    }
    writeln!(writer, "Total\t{}", inspection.summary.total)?;
    writer.flush()?;

    let metrics = &inspection.metrics;
    println!("Total load: {:.3} kW, {:.3} kvar", metrics.total_load_kw, metrics.total_load_kvar);
    println!("Capacitors: {:.3} kvar", metrics.total_capacitor_kvar);
    println!("Branch length: {:.3} m", metrics.total_branch_length);
    println!("Transformers: {:.3} kVA", metrics.total_transformer_kva);

    let graph = &inspection.graph;
    println!(
        "Graph: {} buses, {} devices, degree {}..{} (avg {:.2})",
        graph.node_count, graph.edge_count, graph.min_degree, graph.max_degree, graph.avg_degree
    );
    if inspection.islands.len() > 1 {
        println!("Islands: {}", inspection.islands.len());
        for island in &inspection.islands {
            println!("  #{} {} bus(es) around {}", island.island_id, island.bus_count, island.representative);
        }
    }
    print!("{}", inspection.diagnostics);
    Ok(())
}

fn list_components(system: &System, kind: ComponentKind, json: bool) -> Result<()> {
    let components: Vec<&Component> = system.iter_kind(kind).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&components)?);
        return Ok(());
    }
    let mut writer = TabWriter::new(io::stdout());
    writeln!(writer, "NAME\tBUSES\tPHASES")?;
    for component in components {
        let phases = if component.buses().is_empty() {
            String::new()
        } else {
            phase_letters(component.terminal_phases(0))
        };
        writeln!(
            writer,
            "{}\t{}\t{}",
            component.name(),
            component.buses().join(" "),
            phases
        )?;
    }
    writer.flush()?;
    Ok(())
}

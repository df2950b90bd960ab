use std::path::Path;

use anyhow::{Context, Result};
use gridconv_core::{
    truncation, validate, ComponentKind, Diagnostics, GridError, ReadStats, System,
};
use tracing::{debug, info, warn};

use super::datasets::{build_xfmr_dataset, set_bus_phases};
use super::documents::load_graph;
use super::mappers::MapperRegistry;
use super::queries::*;
use crate::options::{ReadResult, ReaderOptions};
use crate::rdf::Graph;
use crate::table::Table;

/// Components are mapped in this order so every reference a mapper looks up
/// already exists.
const MAPPING_ORDER: [ComponentKind; 14] = [
    ComponentKind::DistributionBus,
    ComponentKind::DistributionLoad,
    ComponentKind::DistributionBattery,
    ComponentKind::DistributionSolar,
    ComponentKind::DistributionCapacitor,
    ComponentKind::DistributionVoltageSource,
    ComponentKind::RegulatorController,
    ComponentKind::MatrixImpedanceBranchEquipment,
    ComponentKind::MatrixImpedanceBranch,
    ComponentKind::DistributionTransformer,
    ComponentKind::DistributionRegulator,
    ComponentKind::MatrixImpedanceSwitch,
    ComponentKind::MatrixImpedanceFuse,
    ComponentKind::MatrixImpedanceRecloser,
];

/// Column naming each entity in its dataset, for error messages.
fn name_column(kind: ComponentKind) -> &'static str {
    match kind {
        ComponentKind::DistributionBus => "bus",
        ComponentKind::DistributionLoad => "load",
        ComponentKind::DistributionBattery => "battery",
        ComponentKind::DistributionSolar => "solar",
        ComponentKind::DistributionCapacitor => "capacitor",
        ComponentKind::DistributionVoltageSource => "source",
        ComponentKind::RegulatorController => "regulator",
        ComponentKind::MatrixImpedanceBranchEquipment => "line_code",
        ComponentKind::MatrixImpedanceBranch => "line",
        ComponentKind::DistributionTransformer | ComponentKind::DistributionRegulator => "xfmr",
        _ => "switch_name",
    }
}

/// Query results reshaped into one table per component kind.
pub struct CimDatasets {
    tables: Vec<(ComponentKind, Table)>,
}

impl CimDatasets {
    pub fn from_graph(graph: &Graph, diagnostics: &mut Diagnostics) -> Self {
        let mut buses = query_distribution_buses(graph, diagnostics);
        let windings = query_transformer_windings(graph);
        let transformers = build_xfmr_dataset(&query_power_transformers(graph), Some(&windings));
        let regulators = build_xfmr_dataset(&query_distribution_regulators(graph), None);

        let tables = vec![
            (ComponentKind::DistributionLoad, reduce_phases(&query_loads(graph), "load", "phase")),
            (ComponentKind::DistributionBattery, query_batteries(graph)),
            (ComponentKind::DistributionSolar, query_photovoltaics(graph)),
            (
                ComponentKind::DistributionCapacitor,
                reduce_phases(&query_capacitors(graph), "capacitor", "phase"),
            ),
            (ComponentKind::DistributionVoltageSource, query_source(graph)),
            (ComponentKind::RegulatorController, query_regulator_controllers(graph)),
            (ComponentKind::MatrixImpedanceBranchEquipment, query_line_codes(graph)),
            (ComponentKind::MatrixImpedanceBranch, query_line_segments(graph, diagnostics)),
            (ComponentKind::DistributionTransformer, transformers),
            (ComponentKind::DistributionRegulator, regulators),
            (ComponentKind::MatrixImpedanceSwitch, query_load_break_switches(graph, diagnostics)),
            (ComponentKind::MatrixImpedanceFuse, query_fuses(graph, diagnostics)),
            (ComponentKind::MatrixImpedanceRecloser, query_reclosers(graph, diagnostics)),
        ];

        let refs: Vec<(ComponentKind, &Table)> = tables.iter().map(|(k, t)| (*k, t)).collect();
        set_bus_phases(&mut buses, &refs);

        let mut all = vec![(ComponentKind::DistributionBus, buses)];
        all.extend(tables);
        info!(
            buses = all[0].1.len(),
            lines = Self::count(&all, ComponentKind::MatrixImpedanceBranch),
            transformers = Self::count(&all, ComponentKind::DistributionTransformer),
            loads = Self::count(&all, ComponentKind::DistributionLoad),
            "CIM query row counts"
        );
        Self { tables: all }
    }

    fn count(tables: &[(ComponentKind, Table)], kind: ComponentKind) -> usize {
        tables
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, t)| t.len())
            .unwrap_or(0)
    }

    pub fn table(&self, kind: ComponentKind) -> Option<&Table> {
        self.tables.iter().find(|(k, _)| *k == kind).map(|(_, t)| t)
    }
}

/// Map every dataset into `system` in dependency order.
pub fn map_datasets(
    datasets: &CimDatasets,
    registry: &MapperRegistry,
    system: &mut System,
    diagnostics: &mut Diagnostics,
    stats: &mut ReadStats,
) -> Result<(), GridError> {
    for kind in MAPPING_ORDER {
        let Some(table) = datasets.table(kind) else {
            continue;
        };
        if table.is_empty() {
            warn!("Dataframe for {} is empty. Check query.", kind);
            continue;
        }
        let Some(mapper) = registry.get(kind) else {
            diagnostics.add_warning("mapping", &format!("No mapper registered for {}", kind));
            stats.record(kind.as_str(), table.len(), 0);
            continue;
        };

        let mut parsed = 0;
        for (i, row) in table.rows().enumerate() {
            let component = mapper(&row, system).map_err(|source| GridError::Mapping {
                kind: kind.to_string(),
                row: i,
                name: row.get(name_column(kind)).map(String::from),
                source: Box::new(source),
            })?;
            system.add(component)?;
            parsed += 1;
        }
        debug!(kind = %kind, parsed, "mapped CIM components");
        stats.record(kind.as_str(), table.len(), parsed);
    }
    Ok(())
}

/// Read a CIM IEC 61968-13 model from an RDF/XML file, a directory of
/// documents or a zip archive.
pub fn read_cim(path: &Path, options: &ReaderOptions) -> Result<ReadResult> {
    let graph = load_graph(path)?;
    info!(triples = graph.len(), path = %path.display(), "loaded CIM graph");

    let mut diagnostics = Diagnostics::new();
    let mut stats = ReadStats::default();
    let datasets = CimDatasets::from_graph(&graph, &mut diagnostics);

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("cim")
        .to_string();
    let mut system = System::new(name);
    map_datasets(
        &datasets,
        &MapperRegistry::cim(),
        &mut system,
        &mut diagnostics,
        &mut stats,
    )
    .with_context(|| format!("mapping CIM model '{}'", path.display()))?;
    info!(
        components = stats.total_parsed(),
        warnings = diagnostics.warning_count(),
        "CIM parse summary"
    );

    if options.truncates() {
        system = truncation::truncate(system, &options.substations, &options.feeders)?;
    }
    validate(&system)?;
    Ok(ReadResult {
        system,
        diagnostics,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdf::parse_rdf_xml;

    const FEEDER: &str = r##"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns:cim="http://iec.ch/TC57/CIM100#">
  <cim:BaseVoltage rdf:about="#bv"><cim:BaseVoltage.nominalVoltage>12470</cim:BaseVoltage.nominalVoltage></cim:BaseVoltage>
  <cim:ConnectivityNode rdf:about="#n1"><cim:IdentifiedObject.name>sourcebus</cim:IdentifiedObject.name></cim:ConnectivityNode>
  <cim:ConnectivityNode rdf:about="#n2"><cim:IdentifiedObject.name>b2</cim:IdentifiedObject.name></cim:ConnectivityNode>
  <cim:EnergySource rdf:about="#src">
    <cim:IdentifiedObject.name>source</cim:IdentifiedObject.name>
    <cim:EnergySource.nominalVoltage>12470</cim:EnergySource.nominalVoltage>
    <cim:EnergySource.voltageMagnitude>12470</cim:EnergySource.voltageMagnitude>
    <cim:EnergySource.voltageAngle>0</cim:EnergySource.voltageAngle>
    <cim:EnergySource.r>0.01</cim:EnergySource.r>
    <cim:EnergySource.x>0.1</cim:EnergySource.x>
    <cim:EnergySource.r0>0.01</cim:EnergySource.r0>
    <cim:EnergySource.x0>0.1</cim:EnergySource.x0>
  </cim:EnergySource>
  <cim:Terminal rdf:about="#t_src"><cim:IdentifiedObject.name>t_src</cim:IdentifiedObject.name><cim:Terminal.ConductingEquipment rdf:resource="#src"/><cim:Terminal.ConnectivityNode rdf:resource="#n1"/></cim:Terminal>
  <cim:EnergyConsumer rdf:about="#ld">
    <cim:IdentifiedObject.name>ld1</cim:IdentifiedObject.name>
    <cim:EnergyConsumer.p>30000</cim:EnergyConsumer.p>
    <cim:EnergyConsumer.q>9000</cim:EnergyConsumer.q>
    <cim:EnergyConsumer.phaseConnection>Y</cim:EnergyConsumer.phaseConnection>
    <cim:EnergyConsumer.grounded>true</cim:EnergyConsumer.grounded>
    <cim:ConductingEquipment.BaseVoltage rdf:resource="#bv"/>
    <cim:EnergyConsumer.LoadResponse rdf:resource="#zip"/>
  </cim:EnergyConsumer>
  <cim:LoadResponseCharacteristic rdf:about="#zip">
    <cim:LoadResponseCharacteristic.pConstantImpedance>0</cim:LoadResponseCharacteristic.pConstantImpedance>
    <cim:LoadResponseCharacteristic.pConstantCurrent>0</cim:LoadResponseCharacteristic.pConstantCurrent>
    <cim:LoadResponseCharacteristic.pConstantPower>100</cim:LoadResponseCharacteristic.pConstantPower>
    <cim:LoadResponseCharacteristic.qConstantImpedance>0</cim:LoadResponseCharacteristic.qConstantImpedance>
    <cim:LoadResponseCharacteristic.qConstantCurrent>0</cim:LoadResponseCharacteristic.qConstantCurrent>
    <cim:LoadResponseCharacteristic.qConstantPower>100</cim:LoadResponseCharacteristic.qConstantPower>
    <cim:LoadResponseCharacteristic.pVoltageExponent>0</cim:LoadResponseCharacteristic.pVoltageExponent>
    <cim:LoadResponseCharacteristic.qVoltageExponent>0</cim:LoadResponseCharacteristic.qVoltageExponent>
  </cim:LoadResponseCharacteristic>
  <cim:Terminal rdf:about="#t_ld"><cim:IdentifiedObject.name>t_ld</cim:IdentifiedObject.name><cim:Terminal.ConductingEquipment rdf:resource="#ld"/><cim:Terminal.ConnectivityNode rdf:resource="#n2"/></cim:Terminal>
</rdf:RDF>"##;

    #[test]
    fn maps_source_and_load() {
        let mut graph = Graph::new();
        parse_rdf_xml(&mut graph, FEEDER).unwrap();
        let mut diagnostics = Diagnostics::new();
        let datasets = CimDatasets::from_graph(&graph, &mut diagnostics);
        let mut system = System::new("feeder");
        let mut stats = ReadStats::default();
        map_datasets(
            &datasets,
            &MapperRegistry::cim(),
            &mut system,
            &mut diagnostics,
            &mut stats,
        )
        .unwrap();

        assert_eq!(system.count(ComponentKind::DistributionBus), 2);
        assert_eq!(system.count(ComponentKind::DistributionLoad), 1);
        assert_eq!(system.count(ComponentKind::DistributionVoltageSource), 1);
        let Some(gridconv_core::Component::DistributionLoad(load)) =
            system.get(ComponentKind::DistributionLoad, "ld1")
        else {
            panic!("expected ld1");
        };
        assert_eq!(load.bus, "b2");
        assert_eq!(load.phases.len(), 3);
        assert!((load.equipment.total_real_power() - 30000.0).abs() < 1e-9);
        assert_eq!(stats.parsed.get("DistributionLoad"), Some(&1));
    }

    #[test]
    fn mapping_failure_names_the_row() {
        let mut graph = Graph::new();
        parse_rdf_xml(&mut graph, FEEDER).unwrap();
        let mut diagnostics = Diagnostics::new();
        let datasets = CimDatasets::from_graph(&graph, &mut diagnostics);
        // Buses are never mapped, so the load cannot resolve its bus
        let mut registry = MapperRegistry::cim();
        registry.register(ComponentKind::DistributionBus, |_, _| {
            Err(GridError::Other("skipped".into()))
        });
        let mut system = System::new("feeder");
        let err = map_datasets(
            &datasets,
            &registry,
            &mut system,
            &mut diagnostics,
            &mut ReadStats::default(),
        )
        .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Failed parsing DistributionBus row 0"));
    }
}

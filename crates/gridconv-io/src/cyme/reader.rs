use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use gridconv_core::{
    topology, truncation, validate, Component, ComponentKind, Diagnostics, GridError, GridResult,
    ReadStats, System,
};
use tracing::{debug, info, warn};

use super::mappers::*;
use super::sections::CymeFile;
use crate::options::{ReadResult, ReaderOptions};
use crate::table::{Row, Table};

/// Network, equipment and load exports of one CYME study.
pub struct CymeInputs {
    pub network: CymeFile,
    pub equipment: Option<CymeFile>,
    pub load: Option<CymeFile>,
}

impl CymeInputs {
    /// Locate the three exports. `path` is the study directory or the
    /// network file itself; the other files are looked up beside it.
    pub fn locate(path: &Path, options: &ReaderOptions, diagnostics: &mut Diagnostics) -> Result<Self> {
        let (dir, network_path) = if path.is_dir() {
            (path.to_path_buf(), path.join(&options.network_file))
        } else {
            let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
            (dir, path.to_path_buf())
        };
        let network = CymeFile::load(&network_path)?;
        let equipment = load_optional(dir.join(&options.equipment_file), diagnostics)?;
        let load = load_optional(dir.join(&options.load_file), diagnostics)?;
        Ok(Self {
            network,
            equipment,
            load,
        })
    }

    fn equipment_section(&self, name: &str) -> Result<Table> {
        match &self.equipment {
            Some(file) => file.section(name),
            None => Ok(Table::default()),
        }
    }

    fn load_section(&self, name: &str) -> Result<Table> {
        match &self.load {
            Some(file) => file.section(name),
            None => Ok(Table::default()),
        }
    }
}

fn load_optional(path: PathBuf, diagnostics: &mut Diagnostics) -> Result<Option<CymeFile>> {
    if !path.exists() {
        warn!(path = %path.display(), "CYME file not found; its sections are skipped");
        diagnostics.add_warning("input", &format!("CYME file '{}' not found", path.display()));
        return Ok(None);
    }
    CymeFile::load(&path).map(Some)
}

fn mapping_error(kind: ComponentKind, row: usize, name: Option<&str>, source: GridError) -> GridError {
    GridError::Mapping {
        kind: kind.to_string(),
        row,
        name: name.map(String::from),
        source: Box::new(source),
    }
}

/// Per-read state threaded through the section mappers.
struct CymeBuild<'a> {
    sections: &'a SectionIndex,
    system: System,
    used_sections: HashSet<String>,
    diagnostics: Diagnostics,
    stats: ReadStats,
}

impl CymeBuild<'_> {
    /// Map every row of a device section placed on a `[SECTION]` entry.
    ///
    /// Series devices mark their section used so no default branch is
    /// created for it.
    fn map_devices<C, F>(
        &mut self,
        table: &Table,
        kind: ComponentKind,
        series: bool,
        mut mapper: F,
    ) -> Result<(), GridError>
    where
        C: Into<Component>,
        F: FnMut(&Row<'_>, &SectionInfo, &System) -> GridResult<C>,
    {
        self.map_device_sets(table, kind, series, |row, section, system| {
            mapper(row, section, system).map(|component| vec![component])
        })
    }

    /// Like [`Self::map_devices`] for rows that expand into several
    /// components, such as a bank of single-phase transformers.
    fn map_device_sets<C, F>(
        &mut self,
        table: &Table,
        kind: ComponentKind,
        series: bool,
        mut mapper: F,
    ) -> Result<(), GridError>
    where
        C: Into<Component>,
        F: FnMut(&Row<'_>, &SectionInfo, &System) -> GridResult<Vec<C>>,
    {
        let sections = self.sections;
        let mut parsed = 0;
        for (i, row) in table.rows().enumerate() {
            let name = row.get("DeviceNumber").or_else(|| row.get("SectionID"));
            let components = row
                .require("SectionID", kind.as_str())
                .and_then(|id| sections.require(id, &format!("{} row {}", kind, i)))
                .and_then(|section| mapper(&row, section, &self.system))
                .map_err(|source| mapping_error(kind, i, name, source))?;
            if series {
                if let Some(id) = row.get("SectionID") {
                    self.used_sections.insert(id.to_string());
                }
            }
            self.system.add_all(components)?;
            parsed += 1;
        }
        if !table.is_empty() {
            debug!(kind = %kind, parsed, "mapped CYME components");
        }
        self.stats.record(kind.as_str(), table.len(), parsed);
        Ok(())
    }

    fn map_nodes(&mut self, nodes: &Table) -> Result<(), GridError> {
        let mut parsed = 0;
        for (i, row) in nodes.rows().enumerate() {
            let bus = map_node(&row, self.sections).map_err(|source| {
                mapping_error(ComponentKind::DistributionBus, i, row.get("NodeID"), source)
            })?;
            self.system.add(bus)?;
            parsed += 1;
        }
        let missing: Vec<String> = self
            .sections
            .nodes()
            .into_iter()
            .filter(|node| self.system.bus(node).is_none())
            .map(String::from)
            .collect();
        for node in &missing {
            self.diagnostics.add_warning_with_entity(
                "topology",
                "node referenced by a section is missing from [NODE]",
                node,
            );
            self.system.add(implicit_node(node, self.sections))?;
        }
        self.stats.record(
            ComponentKind::DistributionBus.as_str(),
            nodes.len() + missing.len(),
            parsed + missing.len(),
        );
        Ok(())
    }

    /// `[SOURCE EQUIVALENT]` rows named through `[SOURCE]` by node.
    fn map_sources(&mut self, sources: &Table, equivalents: &Table) -> Result<(), GridError> {
        let mut parsed = 0;
        for (i, row) in equivalents.rows().enumerate() {
            let node = row.get("NodeID").unwrap_or_default();
            let name = sources
                .filter("NodeID", node)
                .first()
                .and_then(|r| r.get("SourceID"))
                .map(String::from)
                .unwrap_or_else(|| format!("source_{}", node));
            let source = map_source(&row, &name, &self.system).map_err(|source| {
                mapping_error(ComponentKind::DistributionVoltageSource, i, Some(&name), source)
            })?;
            self.system.add(source)?;
            parsed += 1;
        }
        self.stats.record(
            ComponentKind::DistributionVoltageSource.as_str(),
            equivalents.len(),
            parsed,
        );
        Ok(())
    }

    /// 1, 2 and 3 phase variants of every line and cable.
    fn map_line_catalog(&mut self, catalog: &Table) -> Result<(), GridError> {
        let kind = ComponentKind::MatrixImpedanceBranchEquipment;
        let mut parsed = 0;
        for (i, row) in catalog.rows().enumerate() {
            for phase_count in 1..=3 {
                let equipment = map_line_equipment(&row, phase_count)
                    .map_err(|source| mapping_error(kind, i, row.get("ID"), source))?;
                if self.system.contains(kind, &equipment.name) {
                    self.diagnostics.add_warning_with_entity(
                        "equipment",
                        "duplicate line/cable id; first definition kept",
                        &equipment.name,
                    );
                    continue;
                }
                self.system.add(equipment)?;
                parsed += 1;
            }
        }
        self.stats.record(kind.as_str(), catalog.len(), parsed);
        Ok(())
    }

    fn map_loads(&mut self, rows: &[Row<'_>], connections: &Table) -> Result<(), GridError> {
        let kind = ComponentKind::DistributionLoad;
        let mut order: Vec<&str> = Vec::new();
        let mut groups: HashMap<&str, Vec<Row<'_>>> = HashMap::new();
        for row in rows {
            let device = row
                .get("DeviceNumber")
                .or_else(|| row.get("SectionID"))
                .unwrap_or_default();
            groups
                .entry(device)
                .or_insert_with(|| {
                    order.push(device);
                    Vec::new()
                })
                .push(*row);
        }

        for (i, device) in order.iter().enumerate() {
            let group = &groups[device];
            let load = group[0]
                .require("SectionID", kind.as_str())
                .and_then(|id| self.sections.require(id, &format!("{} '{}'", kind, device)))
                .and_then(|section| {
                    let connection = connections
                        .filter("DeviceNumber", device)
                        .first()
                        .and_then(|r| r.get("Connection").or_else(|| r.get("ConnectionConfiguration")));
                    map_load(device, group, section, &self.system, connection)
                })
                .map_err(|source| mapping_error(kind, i, Some(device), source))?;
            self.system.add(load)?;
        }
        self.stats.record(kind.as_str(), rows.len(), order.len());
        Ok(())
    }

    /// Default-impedance branches for sections without a series device.
    fn map_default_branches(&mut self) -> Result<(), GridError> {
        let kind = ComponentKind::MatrixImpedanceBranch;
        let mut parsed = 0;
        let sections = self.sections;
        let pending: Vec<&SectionInfo> = sections
            .iter()
            .filter(|s| !self.used_sections.contains(&s.id) && s.from != s.to)
            .collect();
        for (i, section) in pending.iter().enumerate() {
            let branch = default_branch(section, &self.system)
                .map_err(|source| mapping_error(kind, i, Some(&section.id), source))?;
            self.system.add(branch)?;
            parsed += 1;
        }
        debug!(parsed, "default branches for sections without devices");
        self.stats.record(kind.as_str(), pending.len(), parsed);
        Ok(())
    }
}

/// Customer load rows for the selected load model.
fn select_load_model<'a>(table: &'a Table, load_model_id: Option<&str>) -> Result<Vec<Row<'a>>> {
    if !table.has_column("LoadModelID") {
        return Ok(table.rows().collect());
    }
    match load_model_id {
        Some(id) => {
            info!(load_model_id = id, "filtered load data by LoadModelID");
            Ok(table.filter("LoadModelID", id))
        }
        None => {
            let ids = table.unique("LoadModelID");
            if ids.len() > 1 {
                bail!(
                    "Multiple LoadModelIDs found in load data: [{}]. Please specify load_model_id",
                    ids.join(", ")
                );
            }
            Ok(table.rows().collect())
        }
    }
}

/// Read a CYME study: network, equipment and load exports.
///
/// `path` is the directory holding the exports (file names from
/// `options`) or the network file. After mapping, mixed parallel devices
/// are serialized, bus voltages are propagated from the sources, the
/// system is optionally truncated and then validated.
pub fn read_cyme(path: &Path, options: &ReaderOptions) -> Result<ReadResult> {
    let mut diagnostics = Diagnostics::new();
    let inputs = CymeInputs::locate(path, options, &mut diagnostics)?;
    let network = &inputs.network;

    let sections = SectionIndex::from_table(&network.section_with_context("SECTION")?)
        .with_context(|| format!("reading sections of '{}'", network.path().display()))?;
    info!(sections = sections.len(), path = %network.path().display(), "loaded CYME network");

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("cyme")
        .to_string();
    let mut build = CymeBuild {
        sections: &sections,
        system: System::new(name),
        used_sections: HashSet::new(),
        diagnostics,
        stats: ReadStats::default(),
    };

    build.map_nodes(&network.section("NODE")?)?;
    build.map_sources(&network.section("SOURCE")?, &network.section("SOURCE EQUIVALENT")?)?;
    for catalog in ["LINE", "CABLE"] {
        build.map_line_catalog(&inputs.equipment_section(catalog)?)?;
    }

    let reclosers = inputs.equipment_section("RECLOSER")?;
    build.map_devices(
        &network.section("RECLOSER SETTING")?,
        ComponentKind::MatrixImpedanceRecloser,
        true,
        |row, section, system| map_recloser(row, section, system, &reclosers),
    )?;
    let switches = inputs.equipment_section("SWITCH")?;
    build.map_devices(
        &network.section("SWITCH SETTING")?,
        ComponentKind::MatrixImpedanceSwitch,
        true,
        |row, section, system| map_switch(row, section, system, &switches),
    )?;
    let fuses = inputs.equipment_section("FUSE")?;
    build.map_devices(
        &network.section("FUSE SETTING")?,
        ComponentKind::MatrixImpedanceFuse,
        true,
        |row, section, system| map_fuse(row, section, system, &fuses),
    )?;

    let capacitors = inputs.equipment_section("SHUNT CAPACITOR")?;
    build.map_devices(
        &network.section("SHUNT CAPACITOR SETTING")?,
        ComponentKind::DistributionCapacitor,
        false,
        |row, section, system| map_capacitor(row, section, system, &capacitors),
    )?;

    let customer_loads = inputs.load_section("CUSTOMER LOADS")?;
    let load_rows = select_load_model(&customer_loads, options.load_model_id.as_deref())?;
    build.map_loads(&load_rows, &inputs.load_section("LOADS")?)?;

    for setting in ["OVERHEADLINE SETTING", "UNDERGROUNDLINE SETTING"] {
        build.map_devices(
            &network.section(setting)?,
            ComponentKind::MatrixImpedanceBranch,
            true,
            map_line,
        )?;
    }
    let transformers = inputs.equipment_section("TRANSFORMER")?;
    build.map_devices(
        &network.section("TRANSFORMER SETTING")?,
        ComponentKind::DistributionTransformer,
        true,
        |row, section, system| map_transformer(row, section, system, &transformers),
    )?;
    build.map_device_sets(
        &network.section("TRANSFORMER BYPHASE SETTING")?,
        ComponentKind::DistributionTransformer,
        true,
        |row, section, system| map_transformers_by_phase(row, section, system, &transformers),
    )?;
    let three_winding = inputs.equipment_section("THREE WINDING TRANSFORMER")?;
    build.map_devices(
        &network.section("THREE WINDING TRANSFORMER SETTING")?,
        ComponentKind::DistributionTransformer,
        true,
        |row, section, system| map_three_winding_transformer(row, section, system, &three_winding),
    )?;
    let conductors = inputs.equipment_section("CONDUCTOR")?;
    let spacings = inputs.equipment_section("SPACING TABLE FOR LINE")?;
    build.map_devices(
        &network.section("OVERHEAD BYPHASE SETTING")?,
        ComponentKind::MatrixImpedanceBranch,
        true,
        |row, section, system| map_geometry_line(row, section, system, &conductors, &spacings),
    )?;
    build.map_default_branches()?;

    let CymeBuild {
        mut system,
        diagnostics,
        stats,
        ..
    } = build;
    info!(
        components = stats.total_parsed(),
        warnings = diagnostics.warning_count(),
        "CYME parse summary"
    );

    let split = topology::serialize_parallel_branches(&mut system)?;
    let assigned = topology::assign_bus_voltages(&mut system);
    debug!(split, assigned, "CYME topology repair");

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
    use std::fs;

    const NETWORK: &str = "\
[SECTION]
FORMAT_SECTION=SectionID,FromNodeID,FromNodeIndex,ToNodeID,ToNodeIndex,Phase
SUBSTATION=SUB1
FEEDER=FDR1
s1,src,0,n1,0,ABC
s2,n1,0,n2,0,ABC
s3,n2,0,n3,0,ABC

[NODE]
FORMAT_NODE=NodeID,CoordX,CoordY,LowVoltageLimit,HighVoltageLimit
src,0,0,,
n1,10,0,,
n2,20,0,,
n3,30,0,,

[SOURCE]
FORMAT_SOURCE=SourceID,DeviceNumber,NodeID
SRC1,SRC1,src

[SOURCE EQUIVALENT]
FORMAT_SOURCEEQUIVALENT=NodeID,Voltage,OperatingAngle1,PositiveSequenceResistance,PositiveSequenceReactance,ZeroSequenceResistance,ZeroSequenceReactance
src,12.47,0,0.1,0.5,0.2,1.0

[OVERHEADLINE SETTING]
FORMAT_OVERHEADLINESETTING=SectionID,DeviceNumber,LineCableID,Length
s1,line1,OH1,150

[SWITCH SETTING]
FORMAT_SWITCHSETTING=SectionID,DeviceNumber,EquipmentID,ClosedPhase
s2,sw1,SW,ABC

[TRANSFORMER SETTING]
FORMAT_TRANSFORMERSETTING=SectionID,EqID,DeviceNumber,PrimTap,SecondaryTap
s3,T500,tx1,100,100
";

    const EQUIPMENT: &str = "\
[LINE]
FORMAT_LINE=ID,R1,R0,X1,X0,B1,B0,Amps
OH1,0.3,0.6,0.4,1.2,3.0,1.5,400

[TRANSFORMER]
FORMAT_TRANSFORMER=ID,Type,KVA,KVLLprim,KVLLsec,Z1,XR,Conn,NoLoadLosses
T500,2,500,12.47,0.48,5,4,D_Yg,0.5
";

    const LOADS: &str = "\
[LOADS]
FORMAT_LOADS=SectionID,DeviceNumber,Connection
s3,L1,Yg

[CUSTOMER LOADS]
FORMAT_CUSTOMERLOADS=SectionID,DeviceNumber,LoadModelID,ValueType,LoadPhase,Value1,Value2
s3,L1,1,0,ABC,30,9
s3,L1,2,0,ABC,60,18
";

    const SUBSTATION_NETWORK: &str = "\
[SECTION]
FORMAT_SECTION=SectionID,FromNodeID,FromNodeIndex,ToNodeID,ToNodeIndex,Phase
s1,src,0,n1,0,ABC
s2,n1,0,n2,0,ABC
s3,n2,0,n4,0,A

[NODE]
FORMAT_NODE=NodeID,CoordX,CoordY
src,0,0
n1,10,0
n2,20,0
n3,20,10
n4,30,0

[SOURCE EQUIVALENT]
FORMAT_SOURCEEQUIVALENT=NodeID,Voltage,OperatingAngle1,PositiveSequenceResistance,PositiveSequenceReactance,ZeroSequenceResistance,ZeroSequenceReactance
src,115,0,0.1,0.5,0.2,1.0

[OVERHEAD BYPHASE SETTING]
FORMAT_OVERHEADBYPHASESETTING=SectionID,DeviceNumber,Length,CondID_A,CondID_B,CondID_C,CondID_N1,CondID_N2,SpacingID
s1,oh1,500,336,336,336,4/0,NONE,SP1

[THREE WINDING TRANSFORMER SETTING]
FORMAT_THREEWINDINGTRANSFORMERSETTING=SectionID,DeviceNumber,EquipmentID,TertiaryNodeID,PrimaryTap,SecondaryTap,TertiaryTap
s2,t3,T3W,n3,100,100,100

[TRANSFORMER BYPHASE SETTING]
FORMAT_TRANSFORMERBYPHASESETTING=SectionID,DeviceNumber,PhaseTransformerID1,PhaseTransformerID2,PhaseTransformerID3,Conn
s3,bank,T25,,,Yg_Yg
";

    const SUBSTATION_EQUIPMENT: &str = "\
[CONDUCTOR]
FORMAT_CONDUCTOR=ID,Diameter,GMR,R25,Amps
336,1.83134,0.743712,0.190141,530
4/0,1.43002,0.2481072,0.367852,340

[SPACING TABLE FOR LINE]
FORMAT_SPACINGTABLEFORLINE=ID,PosOfCond1_X,PosOfCond1_Y,PosOfCond2_X,PosOfCond2_Y,PosOfCond3_X,PosOfCond3_Y,PosOfNeutralCond_X,PosOfNeutralCond_Y
SP1,0,8.8392,0.762,8.8392,2.1336,8.8392,1.2192,7.62

[THREE WINDING TRANSFORMER]
FORMAT_THREEWINDINGTRANSFORMER=ID,PrimaryRatedCapacity,SecondaryRatedCapacity,TertiaryRatedCapacity,PrimaryVoltage,SecondaryVoltage,TertiaryVoltage,PrimaryConnection,SecondaryConnection,TertiaryConnection,PrimarySecondaryZ1,PrimarySecondaryXR1Ratio,PrimaryTertiaryZ1,PrimaryTertiaryXR1Ratio,SecondaryTertiaryZ1,SecondaryTertiaryXR1Ratio,NoLoadLosses
T3W,10000,10000,5000,115,12.47,4.16,Yg,Yg,D,8,10,10,10,6,10,12

[TRANSFORMER]
FORMAT_TRANSFORMER=ID,Type,KVA,KVLLprim,KVLLsec,Z1,XR,Conn,NoLoadLosses
T25,1,25,7.2,0.24,2,1,Yg_Yg,0.1
";

    fn study() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("network.txt"), NETWORK).unwrap();
        fs::write(dir.path().join("equipment.txt"), EQUIPMENT).unwrap();
        fs::write(dir.path().join("load.txt"), LOADS).unwrap();
        dir
    }

    fn options(load_model_id: Option<&str>) -> ReaderOptions {
        ReaderOptions {
            load_model_id: load_model_id.map(String::from),
            ..ReaderOptions::default()
        }
    }

    #[test]
    fn reads_study_and_propagates_voltage() {
        let dir = study();
        let result = read_cyme(dir.path(), &options(Some("1"))).unwrap();
        let system = &result.system;

        assert_eq!(system.count(ComponentKind::DistributionBus), 4);
        assert_eq!(system.count(ComponentKind::MatrixImpedanceBranch), 1);
        assert_eq!(system.count(ComponentKind::MatrixImpedanceSwitch), 1);
        assert_eq!(system.count(ComponentKind::DistributionTransformer), 1);
        assert_eq!(system.count(ComponentKind::MatrixImpedanceBranchEquipment), 3);

        let n1 = system.bus("n1").unwrap();
        assert!((n1.rated_voltage - 12_470.0).abs() < 1e-6);
        assert_eq!(n1.feeder.as_deref(), Some("FDR1"));
        assert_eq!(n1.substation.as_deref(), Some("SUB1"));
        assert!((system.bus("n3").unwrap().rated_voltage - 480.0).abs() < 1e-9);

        let load = system.get(ComponentKind::DistributionLoad, "L1").unwrap();
        let Component::DistributionLoad(load) = load else {
            panic!("expected a load");
        };
        assert!((load.equipment.total_real_power() - 30_000.0).abs() < 1e-6);
        assert_eq!(load.bus, "n3");
    }

    #[test]
    fn several_load_models_need_a_choice() {
        let dir = study();
        let err = read_cyme(dir.path(), &options(None)).unwrap_err();
        assert!(err
            .to_string()
            .starts_with("Multiple LoadModelIDs found in load data: [1, 2]"));
    }

    #[test]
    fn truncation_keeps_selected_feeder() {
        let dir = study();
        let options = ReaderOptions {
            feeders: vec!["other".into()],
            ..options(Some("2"))
        };
        let result = read_cyme(dir.path(), &options).unwrap();
        assert!(result.system.is_empty());
    }

    #[test]
    fn missing_load_file_is_a_warning() {
        let dir = study();
        fs::remove_file(dir.path().join("load.txt")).unwrap();
        let result = read_cyme(&dir.path().join("network.txt"), &options(None)).unwrap();
        assert_eq!(result.system.count(ComponentKind::DistributionLoad), 0);
        assert_eq!(result.diagnostics.warning_count(), 1);
    }

    #[test]
    fn reads_geometry_lines_and_multi_winding_transformers() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("network.txt"), SUBSTATION_NETWORK).unwrap();
        fs::write(dir.path().join("equipment.txt"), SUBSTATION_EQUIPMENT).unwrap();
        let result = read_cyme(dir.path(), &options(None)).unwrap();
        let system = &result.system;

        assert_eq!(system.count(ComponentKind::DistributionBus), 5);
        assert_eq!(system.count(ComponentKind::MatrixImpedanceBranch), 1);
        assert_eq!(system.count(ComponentKind::DistributionTransformer), 2);

        let Some(Component::MatrixImpedanceBranch(line)) = system.get(ComponentKind::MatrixImpedanceBranch, "oh1")
        else {
            panic!("expected the overhead line");
        };
        assert_eq!(line.equipment.name, "SP1_oh1");
        assert_eq!(line.equipment.phase_count(), 3);

        let Some(Component::DistributionTransformer(t3)) = system.get(ComponentKind::DistributionTransformer, "t3")
        else {
            panic!("expected the three-winding transformer");
        };
        assert_eq!(t3.buses, vec!["n1", "n2", "n3"]);
        assert!(system.get(ComponentKind::DistributionTransformer, "bank_A").is_some());

        assert!((system.bus("n2").unwrap().rated_voltage - 12_470.0).abs() < 1e-6);
        assert!((system.bus("n3").unwrap().rated_voltage - 4_160.0).abs() < 1e-6);
        assert!((system.bus("n4").unwrap().rated_voltage - 240.0).abs() < 1e-6);
        assert_eq!(system.bus("n3").unwrap().phases.len(), 3);
    }
}

//! Row-to-component mappers for CYME sections.
//!
//! Devices in CYME sit on sections; every mapper takes the device row plus
//! the [`SectionInfo`] it references and resolves the section's nodes
//! against buses already in the system.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use gridconv_core::model::*;
use gridconv_core::phase::{explicit_phases, THREE_PHASE};
use gridconv_core::{ComponentKind, GridError, GridResult, Phase, System};

use super::sections::{FEEDER_COLUMN, SUBSTATION_COLUMN};
use crate::table::{Row, Table};

/// Bus voltage until propagation from the sources replaces it.
pub const PLACEHOLDER_VOLTAGE: f64 = 12_470.0;
/// Metres, for sections without a line device
pub const DEFAULT_BRANCH_LENGTH: f64 = 1.0;
pub const DEFAULT_AMPACITY: f64 = 600.0;
/// ohm/m
const DEFAULT_RESISTANCE: f64 = 1e-9;
const DEFAULT_REACTANCE: f64 = 1e-7;
const KILO: f64 = 1000.0;

/// One `[SECTION]` row: a pair of nodes plus the phases it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionInfo {
    pub id: String,
    pub from: String,
    pub to: String,
    /// Section phase text as read, neutral included
    pub phase_text: String,
    pub feeder: Option<String>,
    pub substation: Option<String>,
}

impl SectionInfo {
    /// Energized phases, three phase when the section names none.
    pub fn phases(&self) -> Vec<Phase> {
        let phases = explicit_phases(&self.phase_text);
        if phases.is_empty() {
            THREE_PHASE.to_vec()
        } else {
            phases
        }
    }
}

/// Sections by id, with the node-level views the bus mapper needs.
#[derive(Debug, Default)]
pub struct SectionIndex {
    order: Vec<String>,
    sections: HashMap<String, SectionInfo>,
}

impl SectionIndex {
    pub fn from_table(table: &Table) -> GridResult<Self> {
        let mut index = Self::default();
        for row in table.rows() {
            let id = row.require("SectionID", "SECTION")?.to_string();
            let ctx = format!("SECTION '{}'", id);
            let info = SectionInfo {
                from: row.require("FromNodeID", &ctx)?.to_string(),
                to: row.require("ToNodeID", &ctx)?.to_string(),
                phase_text: row.get("Phase").unwrap_or("ABC").to_string(),
                feeder: row.get(FEEDER_COLUMN).map(String::from),
                substation: row.get(SUBSTATION_COLUMN).map(String::from),
                id: id.clone(),
            };
            if index.sections.insert(id.clone(), info).is_none() {
                index.order.push(id);
            }
        }
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&SectionInfo> {
        self.sections.get(id)
    }

    pub fn require(&self, id: &str, context: &str) -> GridResult<&SectionInfo> {
        self.get(id)
            .ok_or_else(|| GridError::unresolved("SECTION", id, context))
    }

    /// Sections in file order.
    pub fn iter(&self) -> impl Iterator<Item = &SectionInfo> {
        self.order.iter().filter_map(|id| self.sections.get(id))
    }

    /// Every node named by a section, sorted.
    pub fn nodes(&self) -> BTreeSet<&str> {
        self.iter()
            .flat_map(|s| [s.from.as_str(), s.to.as_str()])
            .collect()
    }

    /// Union of the phases of every section touching `node`, neutral
    /// included. Nodes off every section, such as a transformer tertiary,
    /// are three phase.
    pub fn node_phases(&self, node: &str) -> Vec<Phase> {
        let phases: BTreeSet<Phase> = self
            .iter()
            .filter(|s| s.from == node || s.to == node)
            .flat_map(|s| s.phase_text.chars().filter_map(Phase::from_char))
            .collect();
        if phases.is_empty() {
            return THREE_PHASE.to_vec();
        }
        phases.into_iter().collect()
    }

    /// Feeder and substation of the last section touching `node`.
    pub fn node_membership(&self, node: &str) -> (Option<String>, Option<String>) {
        let mut feeder = None;
        let mut substation = None;
        for section in self.iter().filter(|s| s.from == node || s.to == node) {
            if section.feeder.is_some() {
                feeder = section.feeder.clone();
            }
            if section.substation.is_some() {
                substation = section.substation.clone();
            }
        }
        (substation, feeder)
    }
}

fn context(kind: ComponentKind, name: &str) -> String {
    format!("{} '{}'", kind, name)
}

/// Device name: its `DeviceNumber`, else the section id.
pub fn device_name(row: &Row<'_>, section: &SectionInfo) -> String {
    row.get("DeviceNumber")
        .unwrap_or(section.id.as_str())
        .to_string()
}

fn first_of<'a>(row: &Row<'a>, columns: &[&str]) -> Option<&'a str> {
    columns.iter().find_map(|c| row.get(c))
}

/// Equipment row by id in a catalog section.
fn catalog_row<'a>(catalog: &'a Table, id: Option<&str>) -> Option<Row<'a>> {
    let id = id?;
    catalog.filter("ID", id).into_iter().next()
}

pub fn map_node(row: &Row<'_>, sections: &SectionIndex) -> GridResult<DistributionBus> {
    let name = row.require("NodeID", "NODE")?;
    let (substation, feeder) = sections.node_membership(name);
    let mut bus = DistributionBus::new(
        name,
        sections.node_phases(name),
        PLACEHOLDER_VOLTAGE,
        VoltageType::LineToLine,
    )
    .with_membership(substation, feeder);

    let x = row.f64("CoordX").or_else(|| row.f64("CoordX1"));
    let y = row.f64("CoordY").or_else(|| row.f64("CoordY1"));
    if let (Some(x), Some(y)) = (x, y) {
        bus = bus.with_coordinate(x, y);
    }
    // limits are in kV and only kept as a pair
    if let (Some(low), Some(high)) = (row.f64("LowVoltageLimit"), row.f64("HighVoltageLimit")) {
        bus.voltage_limits = Some(VoltageLimits {
            min: low * KILO,
            max: high * KILO,
        });
    }
    Ok(bus)
}

/// Bus for a node that sections reference but `[NODE]` does not list.
pub fn implicit_node(name: &str, sections: &SectionIndex) -> DistributionBus {
    let (substation, feeder) = sections.node_membership(name);
    DistributionBus::new(
        name,
        sections.node_phases(name),
        PLACEHOLDER_VOLTAGE,
        VoltageType::LineToLine,
    )
    .with_membership(substation, feeder)
}

/// Source from a `[SOURCE EQUIVALENT]` row; `Voltage` is kV line-to-line.
pub fn map_source(
    row: &Row<'_>,
    name: &str,
    system: &System,
) -> GridResult<DistributionVoltageSource> {
    let ctx = context(ComponentKind::DistributionVoltageSource, name);
    let node = row.require("NodeID", &ctx)?;
    let bus = system.require_bus(node, &ctx)?;
    let kv = row.require_f64("Voltage", &ctx)?;
    let mut phases: Vec<Phase> = bus.phases.iter().copied().filter(|p| *p != Phase::N).collect();
    if phases.is_empty() {
        phases = THREE_PHASE.to_vec();
    }
    let impedance = [
        row.f64_or("PositiveSequenceResistance", 0.0),
        row.f64_or("PositiveSequenceReactance", 0.0),
        row.f64_or("ZeroSequenceResistance", 0.0),
        row.f64_or("ZeroSequenceReactance", 0.0),
    ];
    let phase_voltage = if phases.len() > 1 {
        kv * KILO / LINE_TO_LINE_FACTOR
    } else {
        kv * KILO
    };
    Ok(DistributionVoltageSource {
        name: name.to_string(),
        bus: bus.name.clone(),
        equipment: VoltageSourceEquipment::balanced(
            name,
            phases.len(),
            phase_voltage,
            row.f64_or("OperatingAngle1", 0.0),
            impedance,
        ),
        phases,
    })
}

pub fn line_equipment_name(id: &str, phase_count: usize) -> String {
    format!("{}_{}ph", id, phase_count)
}

/// `n`-phase matrices from a `[LINE]` or `[CABLE]` row.
///
/// Sequence impedances are ohm/km and susceptances uS/km.
pub fn map_line_equipment(row: &Row<'_>, phase_count: usize) -> GridResult<MatrixImpedanceEquipment> {
    let id = row.require("ID", "LINE")?;
    let ctx = context(ComponentKind::MatrixImpedanceBranchEquipment, id);
    let r1 = row.require_f64("R1", &ctx)?;
    let x1 = row.require_f64("X1", &ctx)?;
    let r0 = row.f64_or("R0", r1);
    let x0 = row.f64_or("X0", x1);
    let b1 = row.f64_or("B1", 0.0);
    let b0 = row.f64_or("B0", b1);
    Ok(MatrixImpedanceEquipment::from_sequence(
        line_equipment_name(id, phase_count),
        phase_count,
        r1 / KILO,
        x1 / KILO,
        r0 / KILO,
        x0 / KILO,
        b1 * 1e-6 / KILO,
        b0 * 1e-6 / KILO,
        row.f64_or("Amps", DEFAULT_AMPACITY),
    ))
}

/// Near-zero impedance used where a section has no impedance data.
pub fn default_equipment(prefix: &str, phase_count: usize, ampacity: f64) -> MatrixImpedanceEquipment {
    MatrixImpedanceEquipment::diagonal(
        format!("{}_{}ph", prefix, phase_count),
        phase_count,
        DEFAULT_RESISTANCE,
        DEFAULT_REACTANCE,
        0.0,
        ampacity,
    )
}

fn section_buses(section: &SectionInfo, system: &System, ctx: &str) -> GridResult<Vec<String>> {
    let from = system.require_bus(&section.from, ctx)?;
    let to = system.require_bus(&section.to, ctx)?;
    Ok(vec![from.name.clone(), to.name.clone()])
}

/// Branch from an `[OVERHEADLINE SETTING]` or `[UNDERGROUNDLINE SETTING]`
/// row. `Length` is metres.
pub fn map_line(
    row: &Row<'_>,
    section: &SectionInfo,
    system: &System,
) -> GridResult<MatrixImpedanceBranch> {
    let name = device_name(row, section);
    let ctx = context(ComponentKind::MatrixImpedanceBranch, &name);
    let buses = section_buses(section, system, &ctx)?;
    let phases = section.phases();
    let line_id = first_of(row, &["LineCableID", "CableID", "LineID", "EquipmentID"])
        .ok_or_else(|| GridError::missing_field("LineCableID", ctx.as_str()))?;
    let equipment_name = line_equipment_name(line_id, phases.len());
    let equipment = system
        .get(ComponentKind::MatrixImpedanceBranchEquipment, &equipment_name)
        .and_then(|c| c.impedance_equipment())
        .ok_or_else(|| {
            GridError::unresolved(
                ComponentKind::MatrixImpedanceBranchEquipment,
                &equipment_name,
                ctx.as_str(),
            )
        })?
        .clone();
    let length = row.f64("Length").filter(|l| *l > 0.0).unwrap_or(DEFAULT_BRANCH_LENGTH);
    Ok(MatrixImpedanceBranch {
        name,
        buses,
        length,
        phases,
        equipment,
    })
}

/// Branch with default impedance for a section that carries no series
/// device, named after the section.
pub fn default_branch(section: &SectionInfo, system: &System) -> GridResult<MatrixImpedanceBranch> {
    let ctx = context(ComponentKind::MatrixImpedanceBranch, &section.id);
    let buses = section_buses(section, system, &ctx)?;
    let phases = section.phases();
    Ok(MatrixImpedanceBranch {
        name: section.id.clone(),
        buses,
        length: DEFAULT_BRANCH_LENGTH,
        equipment: default_equipment("default", phases.len(), DEFAULT_AMPACITY),
        phases,
    })
}

/// Fields shared by switches, fuses and reclosers.
pub struct SwitchParts {
    pub name: String,
    pub buses: Vec<String>,
    pub phases: Vec<Phase>,
    pub equipment: MatrixImpedanceEquipment,
    pub is_closed: Vec<bool>,
}

/// Common fields of a switching device row. `ClosedPhase` lists the closed
/// phases; `NONE` opens every phase and an absent value closes all.
pub fn switch_parts(
    row: &Row<'_>,
    section: &SectionInfo,
    system: &System,
    catalog: &Table,
    kind: ComponentKind,
) -> GridResult<SwitchParts> {
    let name = device_name(row, section);
    let ctx = context(kind, &name);
    let buses = section_buses(section, system, &ctx)?;
    let phases = section.phases();
    let closed: Option<Vec<Phase>> = row.get("ClosedPhase").map(|text| {
        if text.eq_ignore_ascii_case("NONE") {
            Vec::new()
        } else {
            explicit_phases(text)
        }
    });
    let is_closed = phases
        .iter()
        .map(|p| closed.as_ref().map_or(true, |c| c.contains(p)))
        .collect();
    let equipment_id = row.get("EquipmentID");
    let ampacity = catalog_row(catalog, equipment_id)
        .and_then(|r| r.f64("Amps"))
        .unwrap_or(DEFAULT_AMPACITY);
    let equipment = default_equipment(equipment_id.unwrap_or("default"), phases.len(), ampacity);
    Ok(SwitchParts {
        name,
        buses,
        phases,
        equipment,
        is_closed,
    })
}

pub fn map_switch(
    row: &Row<'_>,
    section: &SectionInfo,
    system: &System,
    catalog: &Table,
) -> GridResult<MatrixImpedanceSwitch> {
    let parts = switch_parts(row, section, system, catalog, ComponentKind::MatrixImpedanceSwitch)?;
    Ok(MatrixImpedanceSwitch {
        name: parts.name,
        buses: parts.buses,
        length: DEFAULT_BRANCH_LENGTH,
        phases: parts.phases,
        equipment: parts.equipment,
        is_closed: parts.is_closed,
    })
}

pub fn map_fuse(
    row: &Row<'_>,
    section: &SectionInfo,
    system: &System,
    catalog: &Table,
) -> GridResult<MatrixImpedanceFuse> {
    let parts = switch_parts(row, section, system, catalog, ComponentKind::MatrixImpedanceFuse)?;
    Ok(MatrixImpedanceFuse {
        name: parts.name,
        buses: parts.buses,
        length: DEFAULT_BRANCH_LENGTH,
        phases: parts.phases,
        equipment: parts.equipment,
        is_closed: parts.is_closed,
        delay: 0.0,
    })
}

pub fn map_recloser(
    row: &Row<'_>,
    section: &SectionInfo,
    system: &System,
    catalog: &Table,
) -> GridResult<MatrixImpedanceRecloser> {
    let parts =
        switch_parts(row, section, system, catalog, ComponentKind::MatrixImpedanceRecloser)?;
    Ok(MatrixImpedanceRecloser {
        controller: Some(RecloserController::with_defaults(format!("{}_ctrl", parts.name))),
        name: parts.name,
        buses: parts.buses,
        length: DEFAULT_BRANCH_LENGTH,
        phases: parts.phases,
        equipment: parts.equipment,
        is_closed: parts.is_closed,
    })
}

/// One side of a connection code; a `g` marks a grounded winding. Blank or
/// numeric codes are grounded star.
fn side_connection(side: &str) -> (ConnectionType, bool) {
    let side = side.trim();
    if side.is_empty() || side.chars().all(|c| c.is_ascii_digit()) {
        return (ConnectionType::Star, true);
    }
    (
        ConnectionType::from_code(side.get(..1).unwrap_or_default()),
        side.to_ascii_lowercase().contains('g'),
    )
}

/// `D_Yg` -> (delta ungrounded, star grounded). Unknown codes are grounded
/// star on both sides.
fn winding_connections(code: Option<&str>) -> [(ConnectionType, bool); 2] {
    let mut sides = code.unwrap_or_default().split('_').map(side_connection);
    let primary = sides.next().unwrap_or((ConnectionType::Star, true));
    let secondary = sides.next().unwrap_or(primary);
    [primary, secondary]
}

/// (resistance, reactance) in percent from `Z1` percent and `X/R`.
fn split_impedance(z1: f64, xr: f64) -> (f64, f64) {
    let r = z1 / (1.0 + xr * xr).sqrt();
    (r, r * xr)
}

fn present(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.eq_ignore_ascii_case("NONE"))
}

/// Two-winding equipment from a `[TRANSFORMER]` catalog entry.
///
/// `Z1` is percent impedance split by `XR` into reactance and resistance;
/// the resistance is shared evenly between the windings. Single-phase
/// units keep the catalog kV as a line-to-ground rating.
fn two_winding_equipment(
    equipment_id: &str,
    spec: &Row<'_>,
    row: &Row<'_>,
    num_phases: usize,
    single_phase: bool,
    ctx: &str,
) -> GridResult<DistributionTransformerEquipment> {
    let kva = spec.require_f64("KVA", ctx)?;
    let (r_pct, x_pct) = split_impedance(spec.f64_or("Z1", 0.0), spec.f64_or("XR", 0.0));
    let connections = winding_connections(
        first_of(row, &["Conn", "Connection"]).or_else(|| spec.get("Conn")),
    );
    let taps = [row.f64_or("PrimTap", 100.0), row.f64_or("SecondaryTap", 100.0)];
    let settings = TapSettings::default();

    let windings = ["KVLLprim", "KVLLsec"]
        .iter()
        .enumerate()
        .map(|(i, column)| {
            let kv = spec.require_f64(column, ctx)?;
            let (connection_type, is_grounded) = connections[i];
            Ok(WindingEquipment {
                name: format!("{}_{}", equipment_id, i + 1),
                rated_voltage: kv * KILO,
                voltage_type: if single_phase {
                    VoltageType::LineToGround
                } else {
                    VoltageType::LineToLine
                },
                rated_power: kva * KILO,
                connection_type,
                resistance: r_pct / 2.0,
                is_grounded,
                num_phases,
                tap_positions: vec![taps[i] / 100.0; num_phases],
                total_taps: settings.total_taps(),
                min_tap_pu: settings.min_tap_pu(),
                max_tap_pu: settings.max_tap_pu(),
            })
        })
        .collect::<GridResult<Vec<_>>>()?;

    let no_load_kw = spec.f64_or("NoLoadLosses", 0.0);
    Ok(DistributionTransformerEquipment {
        name: equipment_id.to_string(),
        windings,
        coupling_sequences: vec![[0, 1]],
        winding_reactances: vec![x_pct],
        pct_no_load_loss: if kva > 0.0 { no_load_kw / kva * 100.0 } else { 0.0 },
        pct_full_load_loss: r_pct,
        is_center_tapped: false,
    })
}

/// Two-winding transformer from a `[TRANSFORMER SETTING]` row and its
/// `[TRANSFORMER]` catalog entry.
pub fn map_transformer(
    row: &Row<'_>,
    section: &SectionInfo,
    system: &System,
    catalog: &Table,
) -> GridResult<DistributionTransformer> {
    let name = device_name(row, section);
    let ctx = context(ComponentKind::DistributionTransformer, &name);
    let buses = section_buses(section, system, &ctx)?;
    let equipment_id = first_of(row, &["EqID", "EquipmentID"])
        .ok_or_else(|| GridError::missing_field("EqID", ctx.as_str()))?;
    let spec = catalog_row(catalog, Some(equipment_id))
        .ok_or_else(|| GridError::unresolved("TRANSFORMER", equipment_id, ctx.as_str()))?;

    let phases = section.phases();
    let single_phase = phases.len() == 1 || spec.get("Type") == Some("1");
    let num_phases = if single_phase { 1 } else { phases.len() };
    let equipment = two_winding_equipment(equipment_id, &spec, row, num_phases, single_phase, &ctx)?;
    Ok(DistributionTransformer {
        name,
        buses,
        winding_phases: vec![phases.clone(), phases],
        equipment,
    })
}

/// Single-phase units of a `[TRANSFORMER BYPHASE SETTING]` row, one per
/// energized phase that names a `PhaseTransformerID{1,2,3}`. Each unit is
/// named `{device}_{phase}`.
pub fn map_transformers_by_phase(
    row: &Row<'_>,
    section: &SectionInfo,
    system: &System,
    catalog: &Table,
) -> GridResult<Vec<DistributionTransformer>> {
    let name = device_name(row, section);
    let ctx = context(ComponentKind::DistributionTransformer, &name);
    let buses = section_buses(section, system, &ctx)?;
    let energized = section.phases();

    let mut units = Vec::new();
    for (phase, column) in [
        (Phase::A, "PhaseTransformerID1"),
        (Phase::B, "PhaseTransformerID2"),
        (Phase::C, "PhaseTransformerID3"),
    ] {
        if !energized.contains(&phase) {
            continue;
        }
        let Some(equipment_id) = present(row.get(column)) else {
            continue;
        };
        let spec = catalog_row(catalog, Some(equipment_id))
            .ok_or_else(|| GridError::unresolved("TRANSFORMER", equipment_id, ctx.as_str()))?;
        units.push(DistributionTransformer {
            name: format!("{}_{}", name, phase.as_str()),
            buses: buses.clone(),
            winding_phases: vec![vec![phase], vec![phase]],
            equipment: two_winding_equipment(equipment_id, &spec, row, 1, true, &ctx)?,
        });
    }
    if units.is_empty() {
        return Err(GridError::missing_field("PhaseTransformerID1", ctx.as_str()));
    }
    Ok(units)
}

const WINDING_SIDES: [&str; 3] = ["Primary", "Secondary", "Tertiary"];

/// Three-winding transformer from a `[THREE WINDING TRANSFORMER SETTING]`
/// row and its `[THREE WINDING TRANSFORMER]` catalog entry.
///
/// The section runs primary to secondary; `TertiaryNodeID` names the third
/// bus. Pair impedances `{Pair}Z1` / `{Pair}XR1Ratio` become the three
/// coupling reactances, and the pair resistances are converted to per
/// winding resistances through the star equivalent.
pub fn map_three_winding_transformer(
    row: &Row<'_>,
    section: &SectionInfo,
    system: &System,
    catalog: &Table,
) -> GridResult<DistributionTransformer> {
    let name = device_name(row, section);
    let ctx = context(ComponentKind::DistributionTransformer, &name);
    let mut buses = section_buses(section, system, &ctx)?;
    let tertiary = row.require("TertiaryNodeID", &ctx)?;
    buses.push(system.require_bus(tertiary, &ctx)?.name.clone());
    let equipment_id = first_of(row, &["EquipmentID", "EqID"])
        .ok_or_else(|| GridError::missing_field("EquipmentID", ctx.as_str()))?;
    let spec = catalog_row(catalog, Some(equipment_id)).ok_or_else(|| {
        GridError::unresolved("THREE WINDING TRANSFORMER", equipment_id, ctx.as_str())
    })?;

    let phases = section.phases();
    let num_phases = phases.len();
    let pairs: Vec<(f64, f64)> = ["PrimarySecondary", "PrimaryTertiary", "SecondaryTertiary"]
        .iter()
        .map(|pair| {
            split_impedance(
                spec.f64_or(&format!("{}Z1", pair), 0.0),
                spec.f64_or(&format!("{}XR1Ratio", pair), 0.0),
            )
        })
        .collect();
    let (r01, r02, r12) = (pairs[0].0, pairs[1].0, pairs[2].0);
    let star = [
        (r01 + r02 - r12) / 2.0,
        (r01 + r12 - r02) / 2.0,
        (r02 + r12 - r01) / 2.0,
    ];

    let primary_kva = spec.require_f64("PrimaryRatedCapacity", &ctx)?;
    let settings = TapSettings::default();
    let windings = WINDING_SIDES
        .iter()
        .enumerate()
        .map(|(i, side)| {
            let kv = spec.require_f64(&format!("{}Voltage", side), &ctx)?;
            let kva = spec.f64_or(&format!("{}RatedCapacity", side), primary_kva);
            let (connection_type, is_grounded) =
                side_connection(spec.get(&format!("{}Connection", side)).unwrap_or_default());
            let tap = row.f64_or(&format!("{}Tap", side), 100.0);
            Ok(WindingEquipment {
                name: format!("{}_{}", equipment_id, i + 1),
                rated_voltage: kv * KILO,
                voltage_type: if num_phases == 1 {
                    VoltageType::LineToGround
                } else {
                    VoltageType::LineToLine
                },
                rated_power: kva * KILO,
                connection_type,
                resistance: star[i].max(0.0),
                is_grounded,
                num_phases,
                tap_positions: vec![tap / 100.0; num_phases],
                total_taps: settings.total_taps(),
                min_tap_pu: settings.min_tap_pu(),
                max_tap_pu: settings.max_tap_pu(),
            })
        })
        .collect::<GridResult<Vec<_>>>()?;

    let no_load_kw = spec.f64_or("NoLoadLosses", 0.0);
    Ok(DistributionTransformer {
        name,
        buses,
        winding_phases: vec![phases; 3],
        equipment: DistributionTransformerEquipment {
            name: equipment_id.to_string(),
            windings,
            coupling_sequences: vec![[0, 1], [0, 2], [1, 2]],
            winding_reactances: pairs.iter().map(|(_, x)| *x).collect(),
            pct_no_load_loss: if primary_kva > 0.0 {
                no_load_kw / primary_kva * 100.0
            } else {
                0.0
            },
            pct_full_load_loss: r01,
            is_center_tapped: false,
        },
    })
}

/// Conductor from a `[CONDUCTOR]` row: `Diameter` and `GMR` in cm, `R25`
/// in ohm/km.
pub fn map_conductor(row: &Row<'_>) -> GridResult<Conductor> {
    let id = row.require("ID", "CONDUCTOR")?;
    let ctx = format!("CONDUCTOR '{}'", id);
    Ok(Conductor {
        name: id.to_string(),
        gmr: row.require_f64("GMR", &ctx)? / 100.0,
        radius: row.require_f64("Diameter", &ctx)? / 200.0,
        resistance: row.require_f64("R25", &ctx)? / KILO,
        ampacity: row.f64_or("Amps", DEFAULT_AMPACITY),
    })
}

fn placed_conductor(
    conductors: &Table,
    id: &str,
    spacing: &Row<'_>,
    position: &str,
    ctx: &str,
) -> GridResult<PlacedConductor> {
    let conductor = catalog_row(conductors, Some(id))
        .ok_or_else(|| GridError::unresolved("CONDUCTOR", id, ctx))
        .and_then(|row| map_conductor(&row))?;
    Ok(PlacedConductor {
        conductor,
        x: spacing.require_f64(&format!("{}_X", position), ctx)?,
        y: spacing.require_f64(&format!("{}_Y", position), ctx)?,
    })
}

/// Branch from an `[OVERHEAD BYPHASE SETTING]` row.
///
/// Energized phases take `CondID_{A,B,C}` and the spacing positions
/// `PosOfCond{1,2,3}` in order; `CondID_N1` (or `CondID_N`) and
/// `CondID_N2` hang at the neutral positions. The impedance is computed
/// from the geometry and the equipment is named `{SpacingID}_{device}`.
/// Spacing positions are metres.
pub fn map_geometry_line(
    row: &Row<'_>,
    section: &SectionInfo,
    system: &System,
    conductors: &Table,
    spacings: &Table,
) -> GridResult<MatrixImpedanceBranch> {
    let name = device_name(row, section);
    let ctx = context(ComponentKind::MatrixImpedanceBranch, &name);
    let buses = section_buses(section, system, &ctx)?;
    let phases = section.phases();
    let spacing_id = row.require("SpacingID", &ctx)?;
    let spacing = catalog_row(spacings, Some(spacing_id))
        .ok_or_else(|| GridError::unresolved("SPACING TABLE FOR LINE", spacing_id, ctx.as_str()))?;

    let phase_conductors = phases
        .iter()
        .enumerate()
        .map(|(k, phase)| {
            let column = format!("CondID_{}", phase.as_str());
            let id = present(row.get(&column))
                .ok_or_else(|| GridError::missing_field(&column, ctx.as_str()))?;
            placed_conductor(conductors, id, &spacing, &format!("PosOfCond{}", k + 1), &ctx)
        })
        .collect::<GridResult<Vec<_>>>()?;
    let mut neutrals = Vec::new();
    for (columns, position) in [
        (["CondID_N1", "CondID_N"], "PosOfNeutralCond"),
        (["CondID_N2", "CondID_N2"], "PosOfNeutralCond_N2"),
    ] {
        if let Some(id) = present(first_of(row, &columns)) {
            neutrals.push(placed_conductor(conductors, id, &spacing, position, &ctx)?);
        }
    }

    let equipment = geometry_impedance(
        format!("{}_{}", spacing_id, name),
        &phase_conductors,
        &neutrals,
    )
    .map_err(|err| GridError::Other(format!("{}: {}", ctx, err)))?;
    let length = row.f64("Length").filter(|l| *l > 0.0).unwrap_or(DEFAULT_BRANCH_LENGTH);
    Ok(MatrixImpedanceBranch {
        name,
        buses,
        length,
        phases,
        equipment,
    })
}

/// Capacitor from a `[SHUNT CAPACITOR SETTING]` row.
///
/// Per-phase `FixedKVAR{A,B,C}` decide the phases; when all are zero the
/// catalog `KVAR` applies to every section phase. `KV` is line-to-line for
/// multi-phase banks.
pub fn map_capacitor(
    row: &Row<'_>,
    section: &SectionInfo,
    system: &System,
    catalog: &Table,
) -> GridResult<DistributionCapacitor> {
    let name = device_name(row, section);
    let ctx = context(ComponentKind::DistributionCapacitor, &name);
    let bus = system.require_bus(&section.to, &ctx)?;
    let spec = catalog_row(catalog, row.get("EquipmentID"));

    let mut per_phase: Vec<(Phase, f64)> = [
        (Phase::A, "FixedKVARA"),
        (Phase::B, "FixedKVARB"),
        (Phase::C, "FixedKVARC"),
    ]
    .iter()
    .filter_map(|(phase, column)| {
        row.f64(column)
            .filter(|kvar| *kvar > 0.0)
            .map(|kvar| (*phase, kvar))
    })
    .collect();
    if per_phase.is_empty() {
        let kvar = spec
            .as_ref()
            .and_then(|s| s.f64("KVAR"))
            .ok_or_else(|| GridError::missing_field("FixedKVARA", ctx.as_str()))?;
        per_phase = section.phases().into_iter().map(|p| (p, kvar)).collect();
    }

    let kv = row
        .f64("KV")
        .or_else(|| spec.as_ref().and_then(|s| s.f64("KV")))
        .unwrap_or(PLACEHOLDER_VOLTAGE / KILO);
    let connection = row
        .get("Connection")
        .or_else(|| spec.as_ref().and_then(|s| s.get("Connection")))
        .map(ConnectionType::from_code)
        .unwrap_or_default();
    Ok(DistributionCapacitor {
        bus: bus.name.clone(),
        phases: per_phase.iter().map(|(p, _)| *p).collect(),
        equipment: CapacitorEquipment {
            name: format!("{}_equipment", name),
            phase_capacitors: per_phase
                .iter()
                .map(|(_, kvar)| PhaseCapacitor {
                    rated_reactive_power: kvar * KILO,
                    num_banks: 1,
                    num_banks_on: 1,
                    resistance: 0.0,
                    reactance: 0.0,
                })
                .collect(),
            rated_voltage: kv * KILO,
            voltage_type: if per_phase.len() > 1 {
                VoltageType::LineToLine
            } else {
                VoltageType::LineToGround
            },
            connection_type: connection,
        },
        controllers: Vec::new(),
        name,
    })
}

/// (kW, kvar) of one `[CUSTOMER LOADS]` row.
///
/// `ValueType` 0 gives kW and kvar, 1 gives kVA and power factor, 2 gives
/// kW and power factor. Power factors may be percent.
pub fn load_powers(row: &Row<'_>, ctx: &str) -> GridResult<(f64, f64)> {
    let v1 = row.require_f64("Value1", ctx)?;
    let v2 = row.f64_or("Value2", 0.0);
    let value_type = row.get("ValueType").unwrap_or("0");
    let pf = |raw: f64| {
        let pf = if raw.abs() > 1.0 { raw / 100.0 } else { raw };
        pf.clamp(-1.0, 1.0)
    };
    Ok(match value_type {
        "1" => {
            let pf = pf(v2);
            let p = v1 * pf.abs();
            (p, (v1 * v1 - p * p).max(0.0).sqrt() * pf.signum())
        }
        "2" => {
            let pf = pf(v2);
            let q = if pf == 0.0 {
                0.0
            } else {
                v1 * pf.abs().acos().tan() * pf.signum()
            };
            (v1, q)
        }
        _ => (v1, v2),
    })
}

/// One load from every `[CUSTOMER LOADS]` row of a device.
///
/// A row naming several phases is spread evenly over them; rows for the
/// same phase add up. `connection` is the `[LOADS]` connection code.
pub fn map_load(
    name: &str,
    rows: &[Row<'_>],
    section: &SectionInfo,
    system: &System,
    connection: Option<&str>,
) -> GridResult<DistributionLoad> {
    let ctx = context(ComponentKind::DistributionLoad, name);
    let bus = system.require_bus(&section.to, &ctx)?;
    let mut per_phase: BTreeMap<Phase, (f64, f64)> = BTreeMap::new();
    for row in rows {
        let (kw, kvar) = load_powers(row, &ctx)?;
        let mut phases = row.get("LoadPhase").map(explicit_phases).unwrap_or_default();
        if phases.is_empty() {
            phases = section.phases();
        }
        let share = phases.len() as f64;
        for phase in phases {
            let entry = per_phase.entry(phase).or_default();
            entry.0 += kw * KILO / share;
            entry.1 += kvar * KILO / share;
        }
    }
    Ok(DistributionLoad {
        name: name.to_string(),
        bus: bus.name.clone(),
        phases: per_phase.keys().copied().collect(),
        equipment: LoadEquipment {
            name: format!("{}_equipment", name),
            phase_loads: per_phase
                .values()
                .map(|(p, q)| PhaseLoad::constant_power(*p, *q))
                .collect(),
            connection_type: connection.map(ConnectionType::from_code).unwrap_or_default(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(phase: &str) -> SectionInfo {
        SectionInfo {
            id: "s1".into(),
            from: "n1".into(),
            to: "n2".into(),
            phase_text: phase.into(),
            feeder: Some("F1".into()),
            substation: None,
        }
    }

    fn system_with_nodes() -> System {
        let mut system = System::new("cyme");
        for name in ["n1", "n2"] {
            system
                .add(DistributionBus::new(
                    name,
                    THREE_PHASE.to_vec(),
                    PLACEHOLDER_VOLTAGE,
                    VoltageType::LineToLine,
                ))
                .unwrap();
        }
        system
    }

    fn one_row(columns: &[&str], values: &[&str]) -> Table {
        let mut table = Table::new(columns);
        table.push(values.iter().map(|v| Some(v.to_string())).collect());
        table
    }

    #[test]
    fn node_phases_and_membership_come_from_sections() {
        let mut sections = Table::new(&["SectionID", "FromNodeID", "ToNodeID", "Phase", FEEDER_COLUMN]);
        sections.push(vec![Some("s1".into()), Some("n1".into()), Some("n2".into()), Some("A".into()), Some("F1".into())]);
        sections.push(vec![Some("s2".into()), Some("n2".into()), Some("n3".into()), Some("CN".into()), Some("F2".into())]);
        let index = SectionIndex::from_table(&sections).unwrap();
        assert_eq!(index.node_phases("n2"), vec![Phase::A, Phase::C, Phase::N]);
        assert_eq!(index.node_membership("n2"), (None, Some("F2".to_string())));
        assert_eq!(index.nodes().len(), 3);

        let nodes = one_row(
            &["NodeID", "CoordX", "CoordY", "CoordX1", "CoordY1", "LowVoltageLimit", "HighVoltageLimit"],
            &["n2", "", "", "5", "6", "11.8", "13.1"],
        );
        let bus = map_node(&nodes.rows().next().unwrap(), &index).unwrap();
        assert_eq!(bus.coordinate, Some(Location { x: 5.0, y: 6.0 }));
        assert_eq!(bus.rated_voltage, PLACEHOLDER_VOLTAGE);
        assert!((bus.voltage_limits.unwrap().max - 13_100.0).abs() < 1e-9);
    }

    #[test]
    fn line_equipment_from_sequence_data() {
        let table = one_row(&["ID", "R1", "X1", "R0", "X0", "Amps"], &["L1", "0.3", "0.6", "0.3", "0.6", "400"]);
        let eq = map_line_equipment(&table.rows().next().unwrap(), 3).unwrap();
        assert_eq!(eq.name, "L1_3ph");
        assert!((eq.r_matrix[0][0] - 0.0003).abs() < 1e-12);
        assert!(eq.r_matrix[0][1].abs() < 1e-12);
        assert_eq!(eq.ampacity, 400.0);
    }

    #[test]
    fn line_needs_its_equipment() {
        let system = system_with_nodes();
        let table = one_row(&["SectionID", "DeviceNumber", "LineCableID", "Length"], &["s1", "ln1", "L9", "120"]);
        let err = map_line(&table.rows().next().unwrap(), &section("ABC"), &system).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing MatrixImpedanceBranchEquipment 'L9_3ph' while mapping MatrixImpedanceBranch 'ln1'"
        );
    }

    #[test]
    fn open_switch_phases() {
        let system = system_with_nodes();
        let table = one_row(&["SectionID", "DeviceNumber", "EquipmentID", "ClosedPhase"], &["s1", "sw1", "SW", "AC"]);
        let catalog = one_row(&["ID", "Amps"], &["SW", "200"]);
        let sw = map_switch(&table.rows().next().unwrap(), &section("ABC"), &system, &catalog).unwrap();
        assert_eq!(sw.is_closed, vec![true, false, true]);
        assert_eq!(sw.equipment.ampacity, 200.0);
        assert_eq!(sw.equipment.phase_count(), 3);
    }

    #[test]
    fn transformer_impedance_split() {
        let system = system_with_nodes();
        let row = one_row(&["SectionID", "EqID", "DeviceNumber"], &["s1", "T50", "tx1"]);
        let catalog = one_row(
            &["ID", "Type", "KVA", "KVLLprim", "KVLLsec", "Z1", "XR", "Conn", "NoLoadLosses"],
            &["T50", "2", "500", "12.47", "0.48", "5", "0", "D_Yg", "1"],
        );
        let tx = map_transformer(&row.rows().next().unwrap(), &section("ABC"), &system, &catalog).unwrap();
        let eq = &tx.equipment;
        assert_eq!(eq.windings[0].connection_type, ConnectionType::Delta);
        assert!(!eq.windings[0].is_grounded);
        assert!(eq.windings[1].is_grounded);
        assert!((eq.windings[0].resistance - 2.5).abs() < 1e-9);
        assert_eq!(eq.winding_reactances, vec![0.0]);
        assert!((eq.pct_no_load_loss - 0.2).abs() < 1e-9);
        assert_eq!(eq.windings[1].rated_voltage, 480.0);
    }

    #[test]
    fn by_phase_units_follow_energized_phases() {
        let system = system_with_nodes();
        let row = one_row(
            &["SectionID", "DeviceNumber", "PhaseTransformerID1", "PhaseTransformerID2", "PhaseTransformerID3", "Conn"],
            &["s1", "bank", "T25", "T25", "NONE", "Yg_Yg"],
        );
        let catalog = one_row(
            &["ID", "Type", "KVA", "KVLLprim", "KVLLsec", "Z1", "XR"],
            &["T25", "1", "25", "7.2", "0.24", "2", "1"],
        );
        let units =
            map_transformers_by_phase(&row.rows().next().unwrap(), &section("AC"), &system, &catalog).unwrap();
        let names: Vec<_> = units.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["bank_A"]);
        let unit = &units[0];
        assert_eq!(unit.winding_phases, vec![vec![Phase::A], vec![Phase::A]]);
        assert_eq!(unit.buses, vec!["n1", "n2"]);
        assert_eq!(unit.equipment.windings[0].num_phases, 1);
        assert_eq!(unit.equipment.windings[0].voltage_type, VoltageType::LineToGround);
        assert_eq!(unit.equipment.windings[0].rated_power, 25_000.0);

        let none = one_row(&["SectionID", "DeviceNumber", "PhaseTransformerID1"], &["s1", "bank", "NONE"]);
        assert!(
            map_transformers_by_phase(&none.rows().next().unwrap(), &section("A"), &system, &catalog).is_err()
        );
    }

    #[test]
    fn three_winding_transformer_reaches_its_tertiary() {
        let mut system = system_with_nodes();
        system
            .add(DistributionBus::new("n3", THREE_PHASE.to_vec(), PLACEHOLDER_VOLTAGE, VoltageType::LineToLine))
            .unwrap();
        let row = one_row(
            &["SectionID", "DeviceNumber", "EquipmentID", "TertiaryNodeID", "TertiaryTap"],
            &["s1", "t3", "T3W", "n3", "102.5"],
        );
        let catalog = one_row(
            &[
                "ID",
                "PrimaryRatedCapacity",
                "SecondaryRatedCapacity",
                "TertiaryRatedCapacity",
                "PrimaryVoltage",
                "SecondaryVoltage",
                "TertiaryVoltage",
                "PrimaryConnection",
                "SecondaryConnection",
                "TertiaryConnection",
                "PrimarySecondaryZ1",
                "PrimarySecondaryXR1Ratio",
                "PrimaryTertiaryZ1",
                "PrimaryTertiaryXR1Ratio",
                "SecondaryTertiaryZ1",
                "SecondaryTertiaryXR1Ratio",
            ],
            &[
                "T3W", "10000", "10000", "5000", "115", "12.47", "4.16", "Yg", "Yg", "D", "8", "0", "10", "0",
                "6", "0",
            ],
        );
        let tx = map_three_winding_transformer(&row.rows().next().unwrap(), &section("ABC"), &system, &catalog)
            .unwrap();
        assert_eq!(tx.buses, vec!["n1", "n2", "n3"]);
        assert_eq!(tx.winding_phases.len(), 3);
        let eq = &tx.equipment;
        assert_eq!(eq.coupling_sequences, vec![[0, 1], [0, 2], [1, 2]]);
        assert_eq!(eq.winding_reactances, vec![0.0, 0.0, 0.0]);
        // pair resistances 8, 10, 6 -> star 6, 2, 4
        let r: Vec<f64> = eq.windings.iter().map(|w| w.resistance).collect();
        assert!((r[0] - 6.0).abs() < 1e-9 && (r[1] - 2.0).abs() < 1e-9 && (r[2] - 4.0).abs() < 1e-9);
        assert_eq!(eq.windings[2].connection_type, ConnectionType::Delta);
        assert_eq!(eq.windings[2].rated_voltage, 4_160.0);
        assert_eq!(eq.windings[2].rated_power, 5_000_000.0);
        assert_eq!(eq.windings[2].tap_positions, vec![1.025; 3]);

        let missing = one_row(&["SectionID", "DeviceNumber", "EquipmentID"], &["s1", "t3", "T3W"]);
        assert!(
            map_three_winding_transformer(&missing.rows().next().unwrap(), &section("ABC"), &system, &catalog)
                .is_err()
        );
    }

    #[test]
    fn spacing_table_line_gets_geometry_impedance() {
        let system = system_with_nodes();
        let conductors = {
            let mut t = Table::new(&["ID", "Diameter", "GMR", "R25", "Amps"]);
            t.push(["336", "1.83134", "0.743712", "0.190141", "530"].iter().map(|v| Some(v.to_string())).collect());
            t.push(["4/0", "1.43002", "0.2481072", "0.367852", "340"].iter().map(|v| Some(v.to_string())).collect());
            t
        };
        let spacings = one_row(
            &[
                "ID",
                "PosOfCond1_X",
                "PosOfCond1_Y",
                "PosOfCond2_X",
                "PosOfCond2_Y",
                "PosOfCond3_X",
                "PosOfCond3_Y",
                "PosOfNeutralCond_X",
                "PosOfNeutralCond_Y",
            ],
            &["SP500", "0", "8.8392", "0.762", "8.8392", "2.1336", "8.8392", "1.2192", "7.62"],
        );
        let row = one_row(
            &["SectionID", "DeviceNumber", "Length", "CondID_A", "CondID_B", "CondID_C", "CondID_N1", "SpacingID"],
            &["s1", "oh1", "250", "336", "336", "336", "4/0", "SP500"],
        );
        let line =
            map_geometry_line(&row.rows().next().unwrap(), &section("ABC"), &system, &conductors, &spacings)
                .unwrap();
        assert_eq!(line.length, 250.0);
        assert_eq!(line.equipment.name, "SP500_oh1");
        assert_eq!(line.equipment.ampacity, 530.0);
        let per_mile = 1609.344;
        assert!((line.equipment.r_matrix[0][0] * per_mile - 0.4576).abs() < 2e-3);
        assert!((line.equipment.x_matrix[0][1] * per_mile - 0.5017).abs() < 2e-3);

        // a lone phase hangs at the first spacing position
        let single = one_row(
            &["SectionID", "DeviceNumber", "CondID_C", "SpacingID"],
            &["s1", "oh2", "336", "SP500"],
        );
        let line =
            map_geometry_line(&single.rows().next().unwrap(), &section("C"), &system, &conductors, &spacings)
                .unwrap();
        assert_eq!(line.phases, vec![Phase::C]);
        assert_eq!(line.equipment.phase_count(), 1);
        assert_eq!(line.length, DEFAULT_BRANCH_LENGTH);

        let unknown = one_row(&["SectionID", "DeviceNumber", "CondID_A", "SpacingID"], &["s1", "oh3", "999", "SP500"]);
        let err = map_geometry_line(&unknown.rows().next().unwrap(), &section("A"), &system, &conductors, &spacings)
            .unwrap_err();
        assert!(err.to_string().contains("999"));
    }

    #[test]
    fn capacitor_uses_catalog_when_fixed_kvar_is_zero() {
        let system = system_with_nodes();
        let row = one_row(&["SectionID", "DeviceNumber", "EquipmentID", "FixedKVARA"], &["s1", "c1", "CAP", "0"]);
        let catalog = one_row(&["ID", "KVAR", "KV"], &["CAP", "100", "12.47"]);
        let cap = map_capacitor(&row.rows().next().unwrap(), &section("AB"), &system, &catalog).unwrap();
        assert_eq!(cap.phases, vec![Phase::A, Phase::B]);
        assert_eq!(cap.equipment.total_reactive_power(), 200_000.0);
        assert_eq!(cap.bus, "n2");
    }

    #[test]
    fn load_rows_combine_per_phase() {
        let system = system_with_nodes();
        let table = {
            let mut t = Table::new(&["DeviceNumber", "ValueType", "LoadPhase", "Value1", "Value2"]);
            t.push(vec![Some("ld".into()), Some("0".into()), Some("A".into()), Some("10".into()), Some("2".into())]);
            t.push(vec![Some("ld".into()), Some("1".into()), Some("B".into()), Some("10".into()), Some("80".into())]);
            t
        };
        let rows: Vec<_> = table.rows().collect();
        let load = map_load("ld", &rows, &section("AB"), &system, Some("D")).unwrap();
        assert_eq!(load.phases, vec![Phase::A, Phase::B]);
        assert!((load.equipment.total_real_power() - 18_000.0).abs() < 1e-6);
        assert!((load.equipment.total_reactive_power() - 8_000.0).abs() < 1e-6);
        assert_eq!(load.equipment.connection_type, ConnectionType::Delta);
    }
}

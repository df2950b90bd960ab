//! Row-to-component mappers for CIM query tables.
//!
//! Each mapper is a pure function of one dataset row and the components
//! mapped so far. Required columns and bus references fail fast with the
//! component named in the error.

use std::collections::BTreeMap;

use gridconv_core::model::*;
use gridconv_core::phase::{explicit_phases, phases_from_text, THREE_PHASE};
use gridconv_core::{Component, ComponentKind, GridError, GridResult, Phase, System};

use crate::table::{split_numbers, Row};

/// Ratio band of winding voltage to bus voltage read as a three-phase
/// winding (line-to-line winding against a line-to-ground bus).
const THREE_PHASE_RATIO: (f64, f64) = (1.45, 2.05);
const DEFAULT_REACTANCE_PCT: f64 = 1.0;
const DEFAULT_IRRADIANCE: f64 = 1000.0;

pub type MapperFn = fn(&Row<'_>, &System) -> GridResult<Component>;

/// Mapper lookup by component kind.
#[derive(Default)]
pub struct MapperRegistry {
    mappers: BTreeMap<ComponentKind, MapperFn>,
}

impl MapperRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every CIM mapper.
    pub fn cim() -> Self {
        let mut registry = Self::new();
        registry.register(ComponentKind::DistributionBus, map_bus);
        registry.register(ComponentKind::DistributionLoad, map_load);
        registry.register(ComponentKind::DistributionBattery, map_battery);
        registry.register(ComponentKind::DistributionSolar, map_solar);
        registry.register(ComponentKind::DistributionCapacitor, map_capacitor);
        registry.register(ComponentKind::DistributionVoltageSource, map_voltage_source);
        registry.register(ComponentKind::RegulatorController, map_regulator_controller);
        registry.register(ComponentKind::MatrixImpedanceBranchEquipment, map_line_code);
        registry.register(ComponentKind::MatrixImpedanceBranch, map_branch);
        registry.register(ComponentKind::DistributionTransformer, map_transformer);
        registry.register(ComponentKind::DistributionRegulator, map_regulator);
        registry.register(ComponentKind::MatrixImpedanceSwitch, map_switch);
        registry.register(ComponentKind::MatrixImpedanceFuse, map_fuse);
        registry.register(ComponentKind::MatrixImpedanceRecloser, map_recloser);
        registry
    }

    pub fn register(&mut self, kind: ComponentKind, mapper: MapperFn) {
        self.mappers.insert(kind, mapper);
    }

    pub fn get(&self, kind: ComponentKind) -> Option<MapperFn> {
        self.mappers.get(&kind).copied()
    }
}

fn context(kind: ComponentKind, name: &str) -> String {
    format!("{} '{}'", kind, name)
}

fn resolve_bus<'s>(
    row: &Row<'_>,
    system: &'s System,
    column: &str,
    ctx: &str,
) -> GridResult<&'s DistributionBus> {
    let name = row.require(column, ctx)?;
    system.require_bus(name, ctx)
}

pub fn map_bus(row: &Row<'_>, _system: &System) -> GridResult<Component> {
    let name = row.require("bus", ComponentKind::DistributionBus.as_str())?;
    let rated_voltage = row.f64_or("rated_voltage", 0.0) / LINE_TO_LINE_FACTOR;
    let mut bus = DistributionBus::new(
        name,
        phases_from_text(row.get("phase")),
        rated_voltage,
        VoltageType::LineToGround,
    );
    if let (Some(x), Some(y)) = (row.f64("x"), row.f64("y")) {
        bus = bus.with_coordinate(x, y);
    }
    Ok(bus.into())
}

pub fn map_load(row: &Row<'_>, system: &System) -> GridResult<Component> {
    let kind = ComponentKind::DistributionLoad;
    let name = row.require("load", kind.as_str())?;
    let ctx = context(kind, name);
    let bus = resolve_bus(row, system, "bus", &ctx)?;

    let mut phases = row
        .get("phase")
        .map(explicit_phases)
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| THREE_PHASE.to_vec());
    if row.get("grounded") == Some("false") && phases.len() == 1 {
        // ungrounded single-phase loads return through another bus phase
        let mut spare: Vec<Phase> = bus
            .phases
            .iter()
            .filter(|p| **p != Phase::N && !phases.contains(p))
            .copied()
            .collect();
        spare.sort();
        if let Some(phase) = spare.first() {
            phases.push(*phase);
        }
    }

    let n = phases.len() as f64;
    let p = row.require_f64("active power", &ctx)?;
    let q = row.require_f64("reactive power", &ctx)?;
    let phase_load = PhaseLoad {
        real_power: p / n,
        reactive_power: q / n,
        z_real: row.f64_or("z_p", 0.0) / 100.0,
        i_real: row.f64_or("i_p", 0.0) / 100.0,
        p_real: row.f64_or("p_p", 100.0) / 100.0,
        z_imag: row.f64_or("z_q", 0.0) / 100.0,
        i_imag: row.f64_or("i_q", 0.0) / 100.0,
        p_imag: row.f64_or("p_q", 100.0) / 100.0,
    };
    Ok(DistributionLoad {
        name: name.to_string(),
        bus: bus.name.clone(),
        equipment: LoadEquipment {
            name: format!("{}_equipment", name),
            phase_loads: vec![phase_load; phases.len()],
            connection_type: ConnectionType::from_code(row.get("conn").unwrap_or("Y")),
        },
        phases,
    }
    .into())
}

pub fn map_capacitor(row: &Row<'_>, system: &System) -> GridResult<Component> {
    let kind = ComponentKind::DistributionCapacitor;
    let name = row.require("capacitor", kind.as_str())?;
    let ctx = context(kind, name);
    let bus = resolve_bus(row, system, "bus", &ctx)?;
    let phases = phases_from_text(row.get("phase"));

    let voltage = row.require_f64("rated_voltage", &ctx)?;
    let total_var = row.f64_or("b1", 0.0) * voltage * voltage;
    let steps = row.f64("steps").map(|s| s.max(0.0) as u32).unwrap_or(1);
    let phase_capacitor = PhaseCapacitor {
        rated_reactive_power: total_var / phases.len() as f64,
        num_banks: steps,
        num_banks_on: steps,
        resistance: 0.0,
        reactance: 0.0,
    };
    Ok(DistributionCapacitor {
        name: name.to_string(),
        bus: bus.name.clone(),
        equipment: CapacitorEquipment {
            name: format!("{}_equipment", name),
            phase_capacitors: vec![phase_capacitor; phases.len()],
            rated_voltage: voltage,
            voltage_type: VoltageType::LineToLine,
            connection_type: ConnectionType::from_code(row.get("conn").unwrap_or("Y")),
        },
        phases,
        controllers: Vec::new(),
    }
    .into())
}

pub fn map_voltage_source(row: &Row<'_>, system: &System) -> GridResult<Component> {
    let kind = ComponentKind::DistributionVoltageSource;
    let name = row.require("source", kind.as_str())?;
    let ctx = context(kind, name);
    let bus = resolve_bus(row, system, "bus", &ctx)?;
    let magnitude = row.require_f64("src_voltage", &ctx)?;
    let angle = row.f64_or("src_angle", 0.0).to_degrees();
    let impedance = [
        row.f64_or("r1", 0.0),
        row.f64_or("x1", 0.0),
        row.f64_or("r0", 0.0),
        row.f64_or("x0", 0.0),
    ];
    Ok(DistributionVoltageSource {
        name: name.to_string(),
        bus: bus.name.clone(),
        phases: bus.phases.clone(),
        equipment: VoltageSourceEquipment::balanced(
            format!("{}_equipment", name),
            bus.phases.len(),
            magnitude / LINE_TO_LINE_FACTOR,
            angle,
            impedance,
        ),
    }
    .into())
}

pub fn map_regulator_controller(row: &Row<'_>, _system: &System) -> GridResult<Component> {
    let kind = ComponentKind::RegulatorController;
    let name = row.require("regulator", kind.as_str())?;
    let ctx = context(kind, name);
    let bus = row.require("bus", &ctx)?;
    let phase = row
        .get("phase")
        .and_then(|p| p.chars().find_map(Phase::from_char))
        .unwrap_or(Phase::A);

    let mut controller = RegulatorController::with_defaults(name, bus, phase);
    controller.delay = row.f64_or("initial_delay", controller.delay);
    controller.v_setpoint = row.f64_or("target", controller.v_setpoint);
    controller.bandwidth = row.f64_or("deadband", controller.bandwidth);
    controller.pt_ratio = row.f64_or("pt_ratio", controller.pt_ratio);
    controller.ct_primary = row.f64_or("ct_rating", controller.ct_primary);
    controller.use_ldc = row.is_true("ldc");
    controller.ldc_r = row.f64_or("line_drop_r", 0.0);
    controller.ldc_x = row.f64_or("line_drop_x", 0.0);
    controller.is_reversible = row.is_true("reversible");
    // limits are written as zero when unset
    controller.max_v_limit = row.f64("max_voltage").filter(|v| *v > 0.0);
    controller.min_v_limit = row.f64("min_voltage").filter(|v| *v > 0.0);
    Ok(controller.into())
}

pub fn map_line_code(row: &Row<'_>, _system: &System) -> GridResult<Component> {
    let kind = ComponentKind::MatrixImpedanceBranchEquipment;
    let name = row.require("line_code", kind.as_str())?;
    let ctx = context(kind, name);
    let n = row.require_f64("phase_count", &ctx)? as usize;
    let equipment = MatrixImpedanceEquipment::from_lower_triangles(
        name,
        n,
        &split_numbers(row.require("r", &ctx)?)?,
        &split_numbers(row.require("x", &ctx)?)?,
        &split_numbers(row.require("b", &ctx)?)?,
        row.f64_or("ampacity_normal", 0.0),
    )?;
    Ok(equipment.into())
}

pub fn map_branch(row: &Row<'_>, system: &System) -> GridResult<Component> {
    let kind = ComponentKind::MatrixImpedanceBranch;
    let name = row.require("line", kind.as_str())?;
    let ctx = context(kind, name);
    let bus_1 = resolve_bus(row, system, "bus_1", &ctx)?;
    let bus_2 = resolve_bus(row, system, "bus_2", &ctx)?;
    let line_code = row.require("line_code", &ctx)?;
    let equipment = match system.get(ComponentKind::MatrixImpedanceBranchEquipment, line_code) {
        Some(Component::MatrixImpedanceBranchEquipment(eq)) => eq.clone(),
        _ => {
            return Err(GridError::unresolved(
                ComponentKind::MatrixImpedanceBranchEquipment,
                line_code,
                ctx,
            ))
        }
    };
    Ok(MatrixImpedanceBranch {
        name: name.to_string(),
        buses: vec![bus_1.name.clone(), bus_2.name.clone()],
        length: row.require_f64("length", &ctx)?,
        phases: explicit_phases(row.require("phases_1", &ctx)?),
        equipment,
    }
    .into())
}

struct SwitchParts {
    name: String,
    buses: Vec<String>,
    phases: Vec<Phase>,
    equipment: MatrixImpedanceEquipment,
    is_closed: Vec<bool>,
}

/// Switching devices carry no impedance in CIM; they borrow the first line
/// code whose dimension matches the phase count of their second bus.
fn switch_parts(row: &Row<'_>, system: &System, kind: ComponentKind) -> GridResult<SwitchParts> {
    let name = row.require("switch_name", kind.as_str())?;
    let ctx = context(kind, name);
    let bus_1 = resolve_bus(row, system, "bus_1", &ctx)?;
    let bus_2 = resolve_bus(row, system, "bus_2", &ctx)?;
    let n = bus_2.phases.len();

    let equipment = system
        .iter_kind(ComponentKind::MatrixImpedanceBranchEquipment)
        .filter_map(Component::impedance_equipment)
        .find(|eq| eq.phase_count() == n)
        .cloned()
        .ok_or_else(|| {
            GridError::Other(format!(
                "No MatrixImpedanceBranchEquipment found for switch '{}' with {} phases",
                name, n
            ))
        })?;
    let closed = row.get("is_open") == Some("false");
    Ok(SwitchParts {
        name: name.to_string(),
        buses: vec![bus_1.name.clone(), bus_2.name.clone()],
        phases: bus_2.phases.clone(),
        equipment,
        is_closed: vec![closed; n.max(1)],
    })
}

pub fn map_switch(row: &Row<'_>, system: &System) -> GridResult<Component> {
    let parts = switch_parts(row, system, ComponentKind::MatrixImpedanceSwitch)?;
    Ok(MatrixImpedanceSwitch {
        name: parts.name,
        buses: parts.buses,
        length: 1.0,
        phases: parts.phases,
        equipment: parts.equipment,
        is_closed: parts.is_closed,
    }
    .into())
}

pub fn map_fuse(row: &Row<'_>, system: &System) -> GridResult<Component> {
    let parts = switch_parts(row, system, ComponentKind::MatrixImpedanceFuse)?;
    Ok(MatrixImpedanceFuse {
        name: parts.name,
        buses: parts.buses,
        length: 1.0,
        phases: parts.phases,
        equipment: parts.equipment,
        is_closed: parts.is_closed,
        delay: 0.0,
    }
    .into())
}

pub fn map_recloser(row: &Row<'_>, system: &System) -> GridResult<Component> {
    let parts = switch_parts(row, system, ComponentKind::MatrixImpedanceRecloser)?;
    Ok(MatrixImpedanceRecloser {
        name: parts.name,
        buses: parts.buses,
        length: 1.0,
        phases: parts.phases,
        equipment: parts.equipment,
        is_closed: parts.is_closed,
        controller: None,
    }
    .into())
}

/// Phases of winding `index`: the explicit `wdg_{index}_phase` text when
/// present, else inferred from the winding-to-bus voltage ratio.
fn winding_phases(row: &Row<'_>, system: &System, index: usize) -> Vec<Phase> {
    if let Some(text) = row.get(&format!("wdg_{}_phase", index)) {
        let phases = explicit_phases(text);
        if !phases.is_empty() {
            return phases;
        }
    }
    let bus = row
        .get(&format!("bus_{}", index))
        .and_then(|name| system.bus(name));
    let Some(bus) = bus else {
        return THREE_PHASE.to_vec();
    };
    let winding_voltage = row.f64_or(&format!("wdg_{}_rated_voltage", index), 0.0);
    if bus.rated_voltage <= 0.0 || winding_voltage <= 0.0 {
        return THREE_PHASE.to_vec();
    }
    let ratio = winding_voltage / bus.rated_voltage;
    if (THREE_PHASE_RATIO.0..=THREE_PHASE_RATIO.1).contains(&ratio) {
        THREE_PHASE.to_vec()
    } else {
        vec![Phase::A]
    }
}

fn winding(row: &Row<'_>, ctx: &str, xfmr: &str, index: usize, phases: &[Phase]) -> GridResult<WindingEquipment> {
    let column = |field: &str| format!("wdg_{}_{}", index, field);
    let s = row.require_f64(&column("apparent_power"), ctx)?;
    let v = row.require_f64(&column("rated_voltage"), ctx)?;
    let r = row.f64_or(&column("per_resistance"), 0.0);
    let resistance = if s > 0.0 && v > 0.0 {
        r / (v * v / s) * 100.0
    } else {
        0.0
    };
    let taps = TapSettings::new(
        row.f64(&column("normal_tap")),
        row.f64(&column("max_tap")),
        row.f64(&column("min_tap")),
        row.f64(&column("dv")),
    );
    let n = phases.len();
    Ok(WindingEquipment {
        name: format!("{}_winding_{}", xfmr, index),
        rated_voltage: if n > 1 { v / LINE_TO_LINE_FACTOR } else { v },
        voltage_type: VoltageType::LineToGround,
        rated_power: s,
        connection_type: ConnectionType::from_code(row.get(&column("conn")).unwrap_or("Y")),
        resistance,
        is_grounded: false,
        num_phases: n,
        tap_positions: vec![taps.tap_pu(); n],
        total_taps: taps.total_taps(),
        min_tap_pu: taps.min_tap_pu(),
        max_tap_pu: taps.max_tap_pu(),
    })
}

/// Series reactance in percent: the mesh impedance when joined, else the
/// short-circuit leakage impedance, both on the first winding's base.
fn reactance_percent(row: &Row<'_>) -> f64 {
    let v = row.f64_or("wdg_1_rated_voltage", 0.0);
    let s = row.f64_or("wdg_1_apparent_power", 0.0);
    if v <= 0.0 || s <= 0.0 {
        return DEFAULT_REACTANCE_PCT;
    }
    let base = v * v / s;
    row.f64("x1")
        .or_else(|| row.f64("wdg_1_z_1_leakage"))
        .map(|x| x / base * 100.0)
        .unwrap_or(DEFAULT_REACTANCE_PCT)
}

struct TransformerParts {
    name: String,
    buses: Vec<String>,
    winding_phases: Vec<Vec<Phase>>,
    equipment: DistributionTransformerEquipment,
}

fn transformer_parts(
    row: &Row<'_>,
    system: &System,
    kind: ComponentKind,
) -> GridResult<TransformerParts> {
    let name = row.require("xfmr", kind.as_str())?;
    let ctx = context(kind, name);
    let bus_1 = resolve_bus(row, system, "bus_1", &ctx)?;
    let bus_2 = resolve_bus(row, system, "bus_2", &ctx)?;

    let winding_phases = vec![winding_phases(row, system, 1), winding_phases(row, system, 2)];
    let windings = vec![
        winding(row, &ctx, name, 1, &winding_phases[0])?,
        winding(row, &ctx, name, 2, &winding_phases[1])?,
    ];
    Ok(TransformerParts {
        name: name.to_string(),
        buses: vec![bus_1.name.clone(), bus_2.name.clone()],
        winding_phases,
        equipment: DistributionTransformerEquipment {
            name: format!("{}_equipment", name),
            windings,
            coupling_sequences: vec![[0, 1]],
            winding_reactances: vec![reactance_percent(row)],
            pct_no_load_loss: 0.0,
            pct_full_load_loss: 0.0,
            is_center_tapped: false,
        },
    })
}

pub fn map_transformer(row: &Row<'_>, system: &System) -> GridResult<Component> {
    let parts = transformer_parts(row, system, ComponentKind::DistributionTransformer)?;
    Ok(DistributionTransformer {
        name: parts.name,
        buses: parts.buses,
        winding_phases: parts.winding_phases,
        equipment: parts.equipment,
    }
    .into())
}

pub fn map_regulator(row: &Row<'_>, system: &System) -> GridResult<Component> {
    let parts = transformer_parts(row, system, ComponentKind::DistributionRegulator)?;
    let controllers = match system.get(ComponentKind::RegulatorController, &parts.name) {
        Some(Component::RegulatorController(controller)) => vec![controller.clone()],
        _ => Vec::new(),
    };
    Ok(DistributionRegulator {
        name: parts.name,
        buses: parts.buses,
        winding_phases: parts.winding_phases,
        equipment: parts.equipment,
        controllers,
    }
    .into())
}

pub fn map_battery(row: &Row<'_>, system: &System) -> GridResult<Component> {
    let kind = ComponentKind::DistributionBattery;
    let name = row.require("battery", kind.as_str())?;
    let ctx = context(kind, name);
    let bus = resolve_bus(row, system, "bus", &ctx)?;
    let max_p = row.f64_or("max_p", 0.0);
    Ok(DistributionBattery {
        name: name.to_string(),
        bus: bus.name.clone(),
        phases: phases_from_text(row.get("phase")),
        active_power: row.f64_or("p", 0.0),
        reactive_power: row.f64_or("q", 0.0),
        equipment: BatteryEquipment {
            name: format!("{}_equipment", name),
            rated_energy: row.require_f64("rated_energy", &ctx)?,
            rated_power: max_p,
            charging_efficiency: 1.0,
            discharging_efficiency: 1.0,
            idling_efficiency: 1.0,
            rated_voltage: row.f64_or("rated_voltage", 0.0),
            voltage_type: VoltageType::LineToLine,
        },
        inverter: InverterEquipment::ideal(
            format!("{}_inverter", name),
            row.f64_or("rated_s", max_p),
        ),
    }
    .into())
}

pub fn map_solar(row: &Row<'_>, system: &System) -> GridResult<Component> {
    let kind = ComponentKind::DistributionSolar;
    let name = row.require("solar", kind.as_str())?;
    let ctx = context(kind, name);
    let bus = resolve_bus(row, system, "bus", &ctx)?;
    let max_p = row.require_f64("max_p", &ctx)?;
    Ok(DistributionSolar {
        name: name.to_string(),
        bus: bus.name.clone(),
        phases: phases_from_text(row.get("phase")),
        irradiance: DEFAULT_IRRADIANCE,
        active_power: row.f64_or("p", 0.0),
        reactive_power: row.f64_or("q", 0.0),
        equipment: SolarEquipment {
            name: format!("{}_equipment", name),
            rated_power: max_p,
            resistance: 0.0,
            reactance: 0.0,
            rated_voltage: row.f64_or("rated_voltage", 0.0),
            voltage_type: VoltageType::LineToLine,
        },
        inverter: InverterEquipment::ideal(
            format!("{}_inverter", name),
            row.f64_or("rated_s", max_p),
        ),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Table;

    fn system_with_buses() -> System {
        let mut system = System::new("test");
        system
            .add(DistributionBus::new("hv", THREE_PHASE.to_vec(), 7_199.8, VoltageType::LineToGround))
            .unwrap();
        system
            .add(DistributionBus::new("lv", THREE_PHASE.to_vec(), 277.1, VoltageType::LineToGround))
            .unwrap();
        system
    }

    fn single_row(columns: &[&str], values: &[Option<&str>]) -> Table {
        let mut table = Table::new(columns);
        table.push(values.iter().map(|v| v.map(String::from)).collect());
        table
    }

    #[test]
    fn ungrounded_single_phase_load_gains_a_phase() {
        let system = system_with_buses();
        let table = single_row(
            &["load", "bus", "phase", "grounded", "active power", "reactive power", "conn"],
            &[Some("ld"), Some("lv"), Some("B"), Some("false"), Some("1000"), Some("200"), Some("D")],
        );
        let row = table.rows().next().unwrap();
        let Component::DistributionLoad(load) = map_load(&row, &system).unwrap() else {
            panic!("expected a load");
        };
        assert_eq!(load.phases, vec![Phase::B, Phase::A]);
        assert_eq!(load.equipment.phase_loads.len(), 2);
        assert!((load.equipment.total_real_power() - 1000.0).abs() < 1e-9);
        assert_eq!(load.equipment.connection_type, ConnectionType::Delta);
    }

    #[test]
    fn load_on_unknown_bus_names_the_load() {
        let system = system_with_buses();
        let table = single_row(
            &["load", "bus", "active power", "reactive power"],
            &[Some("ld"), Some("nowhere"), Some("1"), Some("0")],
        );
        let row = table.rows().next().unwrap();
        let err = map_load(&row, &system).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing DistributionBus 'nowhere' while mapping DistributionLoad 'ld'"
        );
    }

    #[test]
    fn winding_phases_from_voltage_ratio() {
        let system = system_with_buses();
        let table = single_row(
            &["bus_1", "wdg_1_rated_voltage", "bus_2", "wdg_2_rated_voltage"],
            &[Some("hv"), Some("12470"), Some("lv"), Some("277")],
        );
        let row = table.rows().next().unwrap();
        assert_eq!(winding_phases(&row, &system, 1), THREE_PHASE.to_vec());
        assert_eq!(winding_phases(&row, &system, 2), vec![Phase::A]);
    }

    #[test]
    fn transformer_taps_default_when_absent() {
        let system = system_with_buses();
        let table = single_row(
            &[
                "xfmr",
                "bus_1",
                "bus_2",
                "wdg_1_apparent_power",
                "wdg_1_rated_voltage",
                "wdg_1_per_resistance",
                "wdg_1_conn",
                "wdg_2_apparent_power",
                "wdg_2_rated_voltage",
                "wdg_2_per_resistance",
                "wdg_2_conn",
                "x1",
            ],
            &[
                Some("t1"),
                Some("hv"),
                Some("lv"),
                Some("500000"),
                Some("12470"),
                Some("1.5550"),
                Some("D"),
                Some("500000"),
                Some("480"),
                Some("0.0023"),
                Some("Y"),
                Some("12.44"),
            ],
        );
        let row = table.rows().next().unwrap();
        let Component::DistributionTransformer(xfmr) = map_transformer(&row, &system).unwrap()
        else {
            panic!("expected a transformer");
        };
        let hv = &xfmr.equipment.windings[0];
        assert_eq!(hv.connection_type, ConnectionType::Delta);
        assert_eq!(hv.total_taps, 32);
        assert!((hv.max_tap_pu - 1.1).abs() < 1e-12);
        assert!((hv.min_tap_pu - 0.9).abs() < 1e-12);
        assert!((hv.resistance - 0.5).abs() < 1e-3);
        assert!((xfmr.equipment.winding_reactances[0] - 4.0).abs() < 1e-2);
        assert_eq!(xfmr.buses, vec!["hv", "lv"]);
    }

    #[test]
    fn switch_without_matching_line_code_fails() {
        let system = system_with_buses();
        let table = single_row(
            &["switch_name", "bus_1", "bus_2", "is_open"],
            &[Some("sw"), Some("hv"), Some("lv"), Some("false")],
        );
        let row = table.rows().next().unwrap();
        let err = map_switch(&row, &system).unwrap_err();
        assert_eq!(
            err.to_string(),
            "No MatrixImpedanceBranchEquipment found for switch 'sw' with 3 phases"
        );
    }

    #[test]
    fn switch_borrows_line_code() {
        let mut system = system_with_buses();
        system
            .add(MatrixImpedanceEquipment::diagonal("lc1", 1, 1e-4, 1e-4, 0.0, 100.0))
            .unwrap();
        system
            .add(MatrixImpedanceEquipment::diagonal("lc3", 3, 1e-4, 1e-4, 0.0, 400.0))
            .unwrap();
        let table = single_row(
            &["switch_name", "bus_1", "bus_2", "is_open"],
            &[Some("sw"), Some("hv"), Some("lv"), Some("true")],
        );
        let row = table.rows().next().unwrap();
        let Component::MatrixImpedanceSwitch(sw) = map_switch(&row, &system).unwrap() else {
            panic!("expected a switch");
        };
        assert_eq!(sw.equipment.name, "lc3");
        assert_eq!(sw.is_closed, vec![false; 3]);
        assert_eq!(sw.length, 1.0);
    }

    #[test]
    fn registry_lookup() {
        let registry = MapperRegistry::cim();
        assert!(registry.get(ComponentKind::DistributionBus).is_some());
        assert!(MapperRegistry::new().get(ComponentKind::DistributionBus).is_none());
    }
}

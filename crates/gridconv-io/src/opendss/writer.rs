//! Canonical model to OpenDSS scripts.
//!
//! `Master.dss` defines the circuit from the first voltage source and
//! redirects to one script per device class. With substation or feeder
//! separation on, the class scripts live in `{substation}/{feeder}/`
//! folders; line codes and bus coordinates stay beside the master.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use gridconv_core::model::*;
use gridconv_core::{Component, ComponentKind, Phase, System};
use tracing::{debug, info, warn};

use crate::options::{safe_group_name, WriterOptions};

pub const MASTER_FILE: &str = "Master.dss";
const LINECODE_FILE: &str = "LineCodes.dss";
const BUSCOORD_FILE: &str = "BusCoords.dss";
const KILO: f64 = 1_000.0;

/// Class scripts in the order the master redirects to them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Script {
    Lines,
    Switches,
    Fuses,
    Reclosers,
    Transformers,
    Regulators,
    Loads,
    Capacitors,
    CapControls,
    Storage,
    PvSystems,
}

impl Script {
    fn file_name(self) -> &'static str {
        match self {
            Script::Lines => "Lines.dss",
            Script::Switches => "Switches.dss",
            Script::Fuses => "Fuses.dss",
            Script::Reclosers => "Reclosers.dss",
            Script::Transformers => "Transformers.dss",
            Script::Regulators => "Regulators.dss",
            Script::Loads => "Loads.dss",
            Script::Capacitors => "Capacitors.dss",
            Script::CapControls => "CapControls.dss",
            Script::Storage => "Storage.dss",
            Script::PvSystems => "PVSystems.dss",
        }
    }
}

/// Element names may not carry spaces or dots.
fn dss_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_whitespace() || c == '.' { '_' } else { c })
        .collect()
}

/// `bus.1.2.3`
fn bus_ref(bus: &str, phases: &[Phase]) -> String {
    let mut out = dss_name(bus);
    for phase in phases {
        let _ = write!(out, ".{}", phase.node_number());
    }
    out
}

fn connection(connection: ConnectionType) -> &'static str {
    match connection {
        ConnectionType::Star => "wye",
        ConnectionType::Delta => "delta",
    }
}

/// `[a | b c | d e f]`
fn lower_triangle(matrix: &[Vec<f64>], scale: f64) -> String {
    let rows: Vec<String> = matrix
        .iter()
        .enumerate()
        .map(|(i, row)| {
            row.iter()
                .take(i + 1)
                .map(|v| format!("{}", v * scale))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();
    format!("[{}]", rows.join(" | "))
}

/// Element kV as OpenDSS expects it: line-to-line for multi-phase
/// elements, the element's own rating for single-phase ones.
fn element_kv(rated_voltage: f64, voltage_type: VoltageType, phase_count: usize) -> f64 {
    let volts = match (voltage_type, phase_count > 1) {
        (VoltageType::LineToGround, true) => rated_voltage * LINE_TO_LINE_FACTOR,
        _ => rated_voltage,
    };
    volts / KILO
}

/// kV of a load on `bus`: line-to-line unless it is a single-phase star load.
fn load_kv(system: &System, load: &DistributionLoad) -> f64 {
    let line_to_line = system
        .bus(&load.bus)
        .map(|b| b.line_to_line_voltage())
        .unwrap_or(12_470.0);
    let star_single = load.phases.len() == 1 && load.equipment.connection_type == ConnectionType::Star;
    if star_single {
        line_to_line / LINE_TO_LINE_FACTOR / KILO
    } else {
        line_to_line / KILO
    }
}

/// Line codes keyed case-insensitively; equipment sharing a name but not
/// an impedance gets a numbered name.
#[derive(Default)]
struct LineCodes {
    codes: BTreeMap<String, (String, MatrixImpedanceEquipment)>,
}

impl LineCodes {
    fn register(&mut self, equipment: &MatrixImpedanceEquipment) -> String {
        let base = dss_name(&equipment.name);
        let mut name = base.clone();
        let mut k = 1;
        loop {
            match self.codes.get(&name.to_lowercase()) {
                None => {
                    self.codes
                        .insert(name.to_lowercase(), (name.clone(), equipment.clone()));
                    return name;
                }
                Some((_, existing)) if same_impedance(existing, equipment) => return name,
                Some(_) => {
                    k += 1;
                    name = format!("{}_{}", base, k);
                }
            }
        }
    }

    fn script(&self) -> String {
        let mut out = String::new();
        for (name, eq) in self.codes.values() {
            let _ = writeln!(
                out,
                "New LineCode.{} nphases={} units=m rmatrix={} xmatrix={} cmatrix={} normamps={}",
                name,
                eq.phase_count(),
                lower_triangle(&eq.r_matrix, 1.0),
                lower_triangle(&eq.x_matrix, 1.0),
                lower_triangle(&eq.c_matrix, 1e9),
                eq.ampacity
            );
        }
        out
    }
}

fn same_impedance(a: &MatrixImpedanceEquipment, b: &MatrixImpedanceEquipment) -> bool {
    a.r_matrix == b.r_matrix
        && a.x_matrix == b.x_matrix
        && a.c_matrix == b.c_matrix
        && a.ampacity == b.ampacity
}

/// Shared fields of the impedance devices.
struct LineView<'a> {
    name: &'a str,
    buses: &'a [String],
    length: f64,
    phases: &'a [Phase],
    equipment: &'a MatrixImpedanceEquipment,
    is_closed: Option<&'a [bool]>,
}

fn line_definition(out: &mut String, line: &LineView<'_>, codes: &mut LineCodes) {
    let code = codes.register(line.equipment);
    let bus = |i: usize| {
        line.buses
            .get(i)
            .map(|b| bus_ref(b, line.phases))
            .unwrap_or_default()
    };
    let _ = write!(
        out,
        "New Line.{} bus1={} bus2={} phases={} linecode={} length={} units=m",
        dss_name(line.name),
        bus(0),
        bus(1),
        line.phases.len(),
        code,
        line.length
    );
    if line.is_closed.is_some() {
        out.push_str(" switch=yes");
    }
    out.push('\n');
    for (k, closed) in line.is_closed.unwrap_or_default().iter().enumerate() {
        if !closed {
            let _ = writeln!(out, "Open Line.{} 1 {}", dss_name(line.name), k + 1);
        }
    }
}

fn transformer_definition(
    out: &mut String,
    name: &str,
    buses: &[String],
    winding_phases: &[Vec<Phase>],
    equipment: &DistributionTransformerEquipment,
) {
    let phases = equipment.windings.first().map(|w| w.num_phases).unwrap_or(3);
    let _ = write!(
        out,
        "New Transformer.{} phases={} windings={}",
        dss_name(name),
        phases,
        equipment.windings.len()
    );
    for (pair, reactance) in equipment
        .coupling_sequences
        .iter()
        .zip(&equipment.winding_reactances)
    {
        let key = match pair {
            [0, 1] | [1, 0] => "xhl",
            [0, 2] | [2, 0] => "xht",
            _ => "xlt",
        };
        let _ = write!(out, " {}={}", key, reactance);
    }
    let _ = write!(
        out,
        " %noloadloss={} %loadloss={}",
        equipment.pct_no_load_loss, equipment.pct_full_load_loss
    );
    if let Some(first) = equipment.windings.first() {
        let _ = write!(
            out,
            " maxtap={} mintap={} numtaps={}",
            first.max_tap_pu, first.min_tap_pu, first.total_taps
        );
    }
    out.push('\n');
    for (i, winding) in equipment.windings.iter().enumerate() {
        let phases = winding_phases.get(i).map(Vec::as_slice).unwrap_or_default();
        let kv = if winding.num_phases == 1 {
            winding.rated_voltage / KILO
        } else {
            winding.line_to_line_voltage() / KILO
        };
        let _ = writeln!(
            out,
            "~ wdg={} bus={} conn={} kv={} kva={} %r={} tap={}",
            i + 1,
            buses.get(i).map(|b| bus_ref(b, phases)).unwrap_or_default(),
            connection(winding.connection_type),
            kv,
            winding.rated_power / KILO,
            winding.resistance,
            winding.tap_positions.first().copied().unwrap_or(1.0)
        );
    }
}

fn regcontrol_definition(out: &mut String, regulator: &DistributionRegulator, controller: &RegulatorController) {
    let winding = regulator
        .buses
        .iter()
        .position(|b| *b == controller.controlled_bus)
        .map(|i| i + 1)
        .unwrap_or(regulator.buses.len().max(1));
    let _ = write!(
        out,
        "New RegControl.{} transformer={} winding={} vreg={} band={} ptratio={} CTprim={} delay={} R={} X={} PTphase={} reversible={}",
        dss_name(&controller.name),
        dss_name(&regulator.name),
        winding,
        controller.v_setpoint,
        controller.bandwidth,
        controller.pt_ratio,
        controller.ct_primary,
        controller.delay,
        controller.ldc_r,
        controller.ldc_x,
        controller.controlled_phase.node_number(),
        if controller.is_reversible { "yes" } else { "no" }
    );
    if let Some(limit) = controller.max_v_limit {
        let _ = write!(out, " vlimit={}", limit);
    }
    out.push('\n');
}

fn load_definition(out: &mut String, system: &System, load: &DistributionLoad) {
    let eq = &load.equipment;
    let constant_power = eq
        .phase_loads
        .iter()
        .all(|p| p.p_real == 1.0 && p.p_imag == 1.0);
    let _ = write!(
        out,
        "New Load.{} bus1={} phases={} conn={} kv={} kw={} kvar={}",
        dss_name(&load.name),
        bus_ref(&load.bus, &load.phases),
        load.phases.len(),
        connection(eq.connection_type),
        load_kv(system, load),
        eq.total_real_power() / KILO,
        eq.total_reactive_power() / KILO
    );
    match eq.phase_loads.first() {
        Some(p) if !constant_power => {
            let _ = write!(
                out,
                " model=8 zipv=[{} {} {} {} {} {} 0.8]",
                p.z_real, p.i_real, p.p_real, p.z_imag, p.i_imag, p.p_imag
            );
        }
        _ => out.push_str(" model=1"),
    }
    out.push('\n');
}

fn capacitor_definition(out: &mut String, capacitor: &DistributionCapacitor) {
    let eq = &capacitor.equipment;
    let banks = eq.phase_capacitors.first().map(|p| p.num_banks).unwrap_or(1);
    let _ = write!(
        out,
        "New Capacitor.{} bus1={} phases={} kvar={} kv={} conn={}",
        dss_name(&capacitor.name),
        bus_ref(&capacitor.bus, &capacitor.phases),
        capacitor.phases.len(),
        eq.total_reactive_power() / KILO,
        element_kv(eq.rated_voltage, eq.voltage_type, capacitor.phases.len()),
        connection(eq.connection_type)
    );
    if banks > 1 {
        let _ = write!(out, " numsteps={}", banks);
    }
    out.push('\n');
}

fn capcontrol_definition(out: &mut String, capacitor: &DistributionCapacitor, controller: &VoltageCapacitorController) {
    let _ = writeln!(
        out,
        "New CapControl.{} capacitor={} element=Capacitor.{} terminal=1 type=voltage ON={} OFF={} PTratio={} delay={} PTphase={}",
        dss_name(&controller.name),
        dss_name(&capacitor.name),
        dss_name(&capacitor.name),
        controller.on_voltage,
        controller.off_voltage,
        controller.pt_ratio,
        controller.delay,
        controller.controlled_phase.node_number()
    );
}

fn storage_definition(out: &mut String, battery: &DistributionBattery) {
    let eq = &battery.equipment;
    let _ = writeln!(
        out,
        "New Storage.{} bus1={} phases={} kv={} kWrated={} kWhrated={} kva={} kw={} kvar={} %EffCharge={} %EffDischarge={} %IdlingkW={} %cutin={} %cutout={}",
        dss_name(&battery.name),
        bus_ref(&battery.bus, &battery.phases),
        battery.phases.len(),
        element_kv(eq.rated_voltage, eq.voltage_type, battery.phases.len()),
        eq.rated_power / KILO,
        eq.rated_energy / KILO,
        battery.inverter.rated_apparent_power / KILO,
        battery.active_power / KILO,
        battery.reactive_power / KILO,
        eq.charging_efficiency * 100.0,
        eq.discharging_efficiency * 100.0,
        (1.0 - eq.idling_efficiency) * 100.0,
        battery.inverter.cutin_percent,
        battery.inverter.cutout_percent
    );
}

fn pvsystem_definition(out: &mut String, solar: &DistributionSolar) {
    let eq = &solar.equipment;
    let _ = writeln!(
        out,
        "New PVSystem.{} bus1={} phases={} kv={} Pmpp={} kVA={} irradiance={} kvar={} %cutin={} %cutout={} %R={} %X={}",
        dss_name(&solar.name),
        bus_ref(&solar.bus, &solar.phases),
        solar.phases.len(),
        element_kv(eq.rated_voltage, eq.voltage_type, solar.phases.len()),
        eq.rated_power / KILO,
        solar.inverter.rated_apparent_power / KILO,
        solar.irradiance / KILO,
        solar.reactive_power / KILO,
        solar.inverter.cutin_percent,
        solar.inverter.cutout_percent,
        eq.resistance,
        eq.reactance
    );
}

fn source_definition(out: &mut String, class: &str, source: &DistributionVoltageSource) {
    let phase = source.equipment.sources.first();
    let phase_voltage = source.equipment.phase_voltage();
    let base_kv = if source.phases.len() > 1 {
        phase_voltage * LINE_TO_LINE_FACTOR / KILO
    } else {
        phase_voltage / KILO
    };
    let _ = writeln!(
        out,
        "New {}.{} bus1={} phases={} basekv={} pu=1 angle={} r1={} x1={} r0={} x0={}",
        class,
        dss_name(&source.name),
        bus_ref(&source.bus, &source.phases),
        source.phases.len(),
        base_kv,
        phase.map(|p| p.angle).unwrap_or_default(),
        phase.map(|p| p.r1).unwrap_or_default(),
        phase.map(|p| p.x1).unwrap_or_default(),
        phase.map(|p| p.r0).unwrap_or_default(),
        phase.map(|p| p.x0).unwrap_or_default()
    );
}

/// Text every component contributes, by class script.
fn component_scripts(
    system: &System,
    component: &Component,
    codes: &mut LineCodes,
) -> Vec<(Script, String)> {
    let mut parts = Vec::new();
    let mut out = String::new();
    match component {
        Component::MatrixImpedanceBranch(c) => {
            let view = LineView {
                name: &c.name,
                buses: &c.buses,
                length: c.length,
                phases: &c.phases,
                equipment: &c.equipment,
                is_closed: None,
            };
            line_definition(&mut out, &view, codes);
            parts.push((Script::Lines, out));
        }
        Component::MatrixImpedanceSwitch(c) => {
            let view = LineView {
                name: &c.name,
                buses: &c.buses,
                length: c.length,
                phases: &c.phases,
                equipment: &c.equipment,
                is_closed: Some(&c.is_closed),
            };
            line_definition(&mut out, &view, codes);
            parts.push((Script::Switches, out));
        }
        Component::MatrixImpedanceFuse(c) => {
            let view = LineView {
                name: &c.name,
                buses: &c.buses,
                length: c.length,
                phases: &c.phases,
                equipment: &c.equipment,
                is_closed: Some(&c.is_closed),
            };
            line_definition(&mut out, &view, codes);
            let _ = writeln!(
                out,
                "New Fuse.{} MonitoredObj=Line.{} MonitoredTerm=1 RatedCurrent={} Delay={}",
                dss_name(&c.name),
                dss_name(&c.name),
                c.equipment.ampacity,
                c.delay
            );
            parts.push((Script::Fuses, out));
        }
        Component::MatrixImpedanceRecloser(c) => {
            let view = LineView {
                name: &c.name,
                buses: &c.buses,
                length: c.length,
                phases: &c.phases,
                equipment: &c.equipment,
                is_closed: Some(&c.is_closed),
            };
            line_definition(&mut out, &view, codes);
            let controller = c
                .controller
                .clone()
                .unwrap_or_else(|| RecloserController::with_defaults(c.name.clone()));
            let intervals: Vec<String> = controller.delays.iter().map(|d| d.to_string()).collect();
            let _ = writeln!(
                out,
                "New Recloser.{} MonitoredObj=Line.{} MonitoredTerm=1 Shots={} RecloseIntervals=[{}] Reset={}",
                dss_name(&controller.name),
                dss_name(&c.name),
                controller.num_shots,
                intervals.join(" "),
                controller.reset_time
            );
            parts.push((Script::Reclosers, out));
        }
        Component::DistributionTransformer(c) => {
            transformer_definition(&mut out, &c.name, &c.buses, &c.winding_phases, &c.equipment);
            parts.push((Script::Transformers, out));
        }
        Component::DistributionRegulator(c) => {
            transformer_definition(&mut out, &c.name, &c.buses, &c.winding_phases, &c.equipment);
            for controller in &c.controllers {
                regcontrol_definition(&mut out, c, controller);
            }
            parts.push((Script::Regulators, out));
        }
        Component::DistributionLoad(c) => {
            load_definition(&mut out, system, c);
            parts.push((Script::Loads, out));
        }
        Component::DistributionCapacitor(c) => {
            capacitor_definition(&mut out, c);
            parts.push((Script::Capacitors, out));
            if !c.controllers.is_empty() {
                let mut controls = String::new();
                for controller in &c.controllers {
                    capcontrol_definition(&mut controls, c, controller);
                }
                parts.push((Script::CapControls, controls));
            }
        }
        Component::DistributionBattery(c) => {
            storage_definition(&mut out, c);
            parts.push((Script::Storage, out));
        }
        Component::DistributionSolar(c) => {
            pvsystem_definition(&mut out, c);
            parts.push((Script::PvSystems, out));
        }
        Component::MatrixImpedanceBranchEquipment(eq) => {
            codes.register(eq);
        }
        Component::RegulatorController(c) => {
            debug!(controller = %c.name, "standalone regulator controller has no regulator to attach to");
        }
        Component::DistributionBus(_) | Component::DistributionVoltageSource(_) => {}
    }
    parts
}

/// Script folder of a component, relative to the output directory.
fn group_dir(system: &System, component: &Component, options: &WriterOptions) -> PathBuf {
    let bus = component.buses().first().and_then(|name| system.bus(name));
    let mut dir = PathBuf::new();
    if options.opendss_separate_substations {
        if let Some(substation) = bus.and_then(|b| b.substation.as_deref()) {
            dir.push(safe_group_name(substation));
        }
    }
    if options.opendss_separate_feeders {
        if let Some(feeder) = bus.and_then(|b| b.feeder.as_deref()) {
            dir.push(safe_group_name(feeder));
        }
    }
    dir
}

/// `dir/file` with forward slashes, as written in `Redirect` lines.
fn redirect_path(dir: &Path, file: &str) -> String {
    let mut parts: Vec<String> = dir
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    parts.push(file.to_string());
    parts.join("/")
}

fn write_script(path: &Path, text: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory '{}'", parent.display()))?;
    }
    fs::write(path, text).with_context(|| format!("writing OpenDSS file: {}", path.display()))
}

/// Line-to-line kV of every bus, rounded and de-duplicated.
fn voltage_bases(system: &System) -> Vec<f64> {
    let mut bases: Vec<f64> = system
        .buses()
        .map(|b| (b.line_to_line_voltage() / KILO * 1e4).round() / 1e4)
        .filter(|kv| *kv > 0.0)
        .collect();
    bases.sort_by(|a, b| a.total_cmp(b));
    bases.dedup();
    bases
}

/// Write `system` as OpenDSS scripts under `output_dir`. Returns the
/// written files, master last.
pub fn write_opendss(system: &System, output_dir: &Path, options: &WriterOptions) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output directory '{}'", output_dir.display()))?;

    let mut codes = LineCodes::default();
    let mut scripts: BTreeMap<Script, BTreeMap<PathBuf, String>> = BTreeMap::new();
    for component in system.iter() {
        let dir = group_dir(system, component, options);
        for (script, text) in component_scripts(system, component, &mut codes) {
            scripts
                .entry(script)
                .or_default()
                .entry(dir.clone())
                .or_default()
                .push_str(&text);
        }
    }

    let mut master = String::from("Clear\n\n");
    let mut sources = system.iter_kind(ComponentKind::DistributionVoltageSource);
    match sources.next() {
        Some(Component::DistributionVoltageSource(source)) => {
            source_definition(&mut master, "Circuit", source);
            for other in sources {
                if let Component::DistributionVoltageSource(source) = other {
                    source_definition(&mut master, "Vsource", source);
                }
            }
        }
        _ => {
            warn!(system = %system.name, "no voltage source; circuit defined at the first bus");
            let bus = system.buses().next().map(|b| dss_name(&b.name)).unwrap_or_else(|| "sourcebus".into());
            let _ = writeln!(master, "New Circuit.{} bus1={}", dss_name(&system.name), bus);
        }
    }
    master.push('\n');

    let mut written = Vec::new();
    if !codes.codes.is_empty() {
        let path = output_dir.join(LINECODE_FILE);
        write_script(&path, &codes.script())?;
        let _ = writeln!(master, "Redirect {}", LINECODE_FILE);
        written.push(path);
    }
    for (script, groups) in &scripts {
        for (dir, text) in groups {
            let path = output_dir.join(dir).join(script.file_name());
            write_script(&path, text)?;
            let _ = writeln!(master, "Redirect {}", redirect_path(dir, script.file_name()));
            written.push(path);
        }
    }

    let bases: Vec<String> = voltage_bases(system).iter().map(|kv| kv.to_string()).collect();
    let _ = writeln!(master, "\nSet VoltageBases=[{}]\nCalcVoltageBases", bases.join(" "));

    let coords: Vec<String> = system
        .buses()
        .filter_map(|b| b.coordinate.map(|c| format!("{}, {}, {}", dss_name(&b.name), c.x, c.y)))
        .collect();
    if !coords.is_empty() {
        let path = output_dir.join(BUSCOORD_FILE);
        write_script(&path, &(coords.join("\n") + "\n"))?;
        let _ = writeln!(master, "BusCoords {}", BUSCOORD_FILE);
        written.push(path);
    }

    let master_path = output_dir.join(MASTER_FILE);
    write_script(&master_path, &master)?;
    written.push(master_path);
    info!(files = written.len(), line_codes = codes.codes.len(), "wrote OpenDSS model");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opendss::read_opendss;
    use crate::options::ReaderOptions;
    use gridconv_core::phase::THREE_PHASE;

    fn feeder() -> System {
        let mut system = System::new("demo");
        for (name, sub, feeder) in [
            ("src", Some("S1"), Some("F1")),
            ("b2", Some("S1"), Some("F1")),
            ("b3", Some("S1"), Some("F2")),
        ] {
            system
                .add(
                    DistributionBus::new(name, THREE_PHASE.to_vec(), 12_470.0, VoltageType::LineToLine)
                        .with_coordinate(1.0, 2.0)
                        .with_membership(sub.map(String::from), feeder.map(String::from)),
                )
                .unwrap();
        }
        system
            .add(DistributionVoltageSource {
                name: "source".into(),
                bus: "src".into(),
                phases: THREE_PHASE.to_vec(),
                equipment: VoltageSourceEquipment::balanced(
                    "source",
                    3,
                    12_470.0 / LINE_TO_LINE_FACTOR,
                    0.0,
                    [0.1, 0.2, 0.3, 0.4],
                ),
            })
            .unwrap();
        let code = MatrixImpedanceEquipment::diagonal("lc", 3, 2e-4, 4e-4, 1e-11, 400.0);
        system
            .add(MatrixImpedanceBranch {
                name: "l1".into(),
                buses: vec!["src".into(), "b2".into()],
                length: 250.0,
                phases: THREE_PHASE.to_vec(),
                equipment: code.clone(),
            })
            .unwrap();
        system
            .add(MatrixImpedanceSwitch {
                name: "sw1".into(),
                buses: vec!["b2".into(), "b3".into()],
                length: 1.0,
                phases: THREE_PHASE.to_vec(),
                equipment: code,
                is_closed: vec![true, true, false],
            })
            .unwrap();
        system
            .add(DistributionLoad {
                name: "ld1".into(),
                bus: "b3".into(),
                phases: vec![Phase::B],
                equipment: LoadEquipment {
                    name: "ld1".into(),
                    phase_loads: vec![PhaseLoad::constant_power(15_000.0, 5_000.0)],
                    connection_type: ConnectionType::Star,
                },
            })
            .unwrap();
        system
    }

    #[test]
    fn writes_master_and_class_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_opendss(&feeder(), dir.path(), &WriterOptions::default()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            ["LineCodes.dss", "Lines.dss", "Switches.dss", "Loads.dss", "BusCoords.dss", "Master.dss"]
        );

        let master = fs::read_to_string(dir.path().join(MASTER_FILE)).unwrap();
        assert!(master.starts_with("Clear\n\nNew Circuit.source bus1=src.1.2.3 phases=3"));
        assert!(master.contains("Redirect Lines.dss"));
        assert!(master.contains("Set VoltageBases=[12.47]"));

        let switches = fs::read_to_string(dir.path().join("Switches.dss")).unwrap();
        assert!(switches.contains("switch=yes"));
        assert!(switches.contains("Open Line.sw1 1 3"));
        let loads = fs::read_to_string(dir.path().join("Loads.dss")).unwrap();
        assert!(loads.contains("bus1=b3.2 phases=1 conn=wye"));
        assert!(loads.contains("kw=15 kvar=5 model=1"));
    }

    #[test]
    fn feeder_folders_when_separated() {
        let dir = tempfile::tempdir().unwrap();
        let options = WriterOptions {
            opendss_separate_substations: true,
            opendss_separate_feeders: true,
            ..WriterOptions::default()
        };
        write_opendss(&feeder(), dir.path(), &options).unwrap();
        assert!(dir.path().join("S1/F1/Lines.dss").exists());
        assert!(dir.path().join("S1/F2/Loads.dss").exists());
        let master = fs::read_to_string(dir.path().join(MASTER_FILE)).unwrap();
        assert!(master.contains("Redirect S1/F1/Switches.dss"));
    }

    #[test]
    fn written_scripts_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let original = feeder();
        write_opendss(&original, dir.path(), &WriterOptions::default()).unwrap();
        let result = read_opendss(&dir.path().join(MASTER_FILE), &ReaderOptions::default()).unwrap();
        let system = result.system;
        assert_eq!(system.count(ComponentKind::DistributionBus), 3);
        let Some(Component::MatrixImpedanceSwitch(sw)) = system.get(ComponentKind::MatrixImpedanceSwitch, "sw1")
        else {
            panic!("sw1 missing");
        };
        assert_eq!(sw.is_closed, [true, true, false]);
        let Some(Component::MatrixImpedanceBranch(line)) = system.get(ComponentKind::MatrixImpedanceBranch, "l1")
        else {
            panic!("l1 missing");
        };
        assert!((line.length - 250.0).abs() < 1e-9);
        assert!((line.equipment.r_matrix[1][1] - 2e-4).abs() < 1e-12);
        assert_eq!(system.bus("b3").unwrap().coordinate, Some(Location { x: 1.0, y: 2.0 }));
    }

    #[test]
    fn conflicting_line_codes_are_renamed() {
        let mut codes = LineCodes::default();
        let a = MatrixImpedanceEquipment::diagonal("lc", 1, 1.0, 1.0, 0.0, 100.0);
        let b = MatrixImpedanceEquipment::diagonal("LC", 1, 2.0, 1.0, 0.0, 100.0);
        assert_eq!(codes.register(&a), "lc");
        assert_eq!(codes.register(&a), "lc");
        assert_eq!(codes.register(&b), "LC_2");
    }
}

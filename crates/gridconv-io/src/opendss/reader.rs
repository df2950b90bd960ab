//! OpenDSS scripts to the canonical model.
//!
//! Elements are mapped class by class in dependency order: sources and line
//! codes first, then lines, the protective controls that promote lines to
//! fuses and reclosers, transformers and the regulator controls that
//! promote them, and finally shunt elements. Script units (kW, kV, ohm and
//! nF per length unit) are converted to SI on the way in.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use gridconv_core::model::*;
use gridconv_core::phase::THREE_PHASE;
use gridconv_core::{
    topology, truncation, validate, Component, ComponentKind, Diagnostics, GridError, Phase,
    ReadStats, System,
};
use tracing::{debug, info, warn};

use super::parser::{parse_bus, parse_number, split_array, DssElement, DssModel};
use crate::options::{ReadResult, ReaderOptions};

/// Rated voltage of a bus before propagation reaches it.
pub const PLACEHOLDER_VOLTAGE: f64 = 12_470.0;
const KILO: f64 = 1_000.0;
const NANO: f64 = 1e-9;
/// r1, x1, r0, x0 (ohm) and c1, c0 (nF) per 1000 ft
const DEFAULT_LINE: [f64; 6] = [0.058, 0.1206, 0.1784, 0.4047, 3.4, 1.6];
const DEFAULT_NORMAMPS: f64 = 400.0;
/// ohm/m on switches without an impedance of their own
const SWITCH_IMPEDANCE: f64 = 1e-3;
const FEET_PER_KFT: f64 = 304.8;

/// Metres per length unit; `none` yields `None`.
pub fn unit_length(units: &str) -> Result<Option<f64>> {
    let metres = match units.trim().to_lowercase().as_str() {
        "" | "none" => return Ok(None),
        "mi" => 1_609.344,
        "kft" => FEET_PER_KFT,
        "km" => 1_000.0,
        "m" | "meter" => 1.0,
        "ft" => 0.3048,
        "in" => 0.0254,
        "cm" => 0.01,
        "mm" => 0.001,
        other => bail!("unknown length unit '{}'", other),
    };
    Ok(Some(metres))
}

pub fn parse_connection(value: &str) -> ConnectionType {
    match value.trim().to_lowercase().as_str() {
        "delta" | "d" | "ll" => ConnectionType::Delta,
        _ => ConnectionType::Star,
    }
}

fn voltage_type(phase_count: usize, connection: ConnectionType) -> VoltageType {
    if phase_count > 1 || connection == ConnectionType::Delta {
        VoltageType::LineToLine
    } else {
        VoltageType::LineToGround
    }
}

/// Bus name and the phases named by its node list.
fn terminal(spec: &str) -> Result<(String, Vec<Phase>)> {
    let (bus, nodes) = parse_bus(spec)?;
    let mut phases: Vec<Phase> = Vec::new();
    for phase in nodes.into_iter().filter_map(Phase::from_node_number) {
        if phase != Phase::N && !phases.contains(&phase) {
            phases.push(phase);
        }
    }
    Ok((bus, phases))
}

/// Exactly `n` phases: listed nodes first, padded in A, B, C order.
fn fit_phases(mut phases: Vec<Phase>, n: usize) -> Vec<Phase> {
    let n = n.clamp(1, 3);
    phases.truncate(n);
    for phase in THREE_PHASE {
        if phases.len() == n {
            break;
        }
        if !phases.contains(&phase) {
            phases.push(phase);
        }
    }
    phases
}

fn required<'e>(element: &'e DssElement, key: &str) -> Result<&'e str> {
    element
        .get(key)
        .ok_or_else(|| GridError::missing_field(key, element.qualified_name()).into())
}

fn phase_count(element: &DssElement, default: usize) -> Result<usize> {
    Ok(element.number("phases")?.map(|n| n as usize).unwrap_or(default).max(1))
}

/// Per-length impedance as a script writes it: ohm and nF per length unit.
#[derive(Debug, Clone, PartialEq)]
struct LineImpedance {
    r: Vec<Vec<f64>>,
    x: Vec<Vec<f64>>,
    c_nf: Vec<Vec<f64>>,
    /// Metres per length unit
    units: Option<f64>,
    ampacity: f64,
}

impl LineImpedance {
    /// Impedance defined on `element`; `None` when it defines none and no
    /// fallback was asked for.
    fn from_element(element: &DssElement, n: usize, fallback: bool) -> Result<Option<Self>> {
        let units = unit_length(element.get("units").unwrap_or("none"))?;
        let ampacity = element.number_or("normamps", DEFAULT_NORMAMPS)?;
        if element.has("rmatrix") || element.has("xmatrix") {
            return Ok(Some(Self {
                r: parse_matrix(element, "rmatrix", n)?,
                x: parse_matrix(element, "xmatrix", n)?,
                c_nf: parse_matrix(element, "cmatrix", n)?,
                units,
                ampacity,
            }));
        }
        let keys = ["r1", "x1", "r0", "x0", "c1", "c0"];
        if !fallback && !keys.iter().any(|k| element.has(k)) {
            return Ok(None);
        }
        let mut values = [0.0; 6];
        for (i, key) in keys.iter().enumerate() {
            values[i] = element.number_or(key, DEFAULT_LINE[i])?;
        }
        // Defaults are per kft; explicit values use the element's unit.
        let units = if keys.iter().any(|k| element.has(k)) {
            units
        } else {
            Some(FEET_PER_KFT)
        };
        let [r1, x1, r0, x0, c1, c0] = values;
        Ok(Some(Self {
            r: sequence_matrix(n, r1, r0),
            x: sequence_matrix(n, x1, x0),
            c_nf: sequence_matrix(n, c1, c0),
            units,
            ampacity,
        }))
    }

    fn switch(n: usize) -> Self {
        let diagonal = |value: f64| -> Vec<Vec<f64>> {
            (0..n)
                .map(|i| (0..n).map(|j| if i == j { value } else { 0.0 }).collect())
                .collect()
        };
        Self {
            r: diagonal(SWITCH_IMPEDANCE),
            x: diagonal(SWITCH_IMPEDANCE),
            c_nf: diagonal(0.0),
            units: Some(1.0),
            ampacity: DEFAULT_NORMAMPS,
        }
    }

    fn phase_count(&self) -> usize {
        self.r.len()
    }

    /// Leading `n` x `n` block.
    fn shrink(&self, n: usize) -> Self {
        let block = |m: &Vec<Vec<f64>>| -> Vec<Vec<f64>> {
            m.iter().take(n).map(|row| row.iter().take(n).copied().collect()).collect()
        };
        Self {
            r: block(&self.r),
            x: block(&self.x),
            c_nf: block(&self.c_nf),
            ..self.clone()
        }
    }

    /// SI equipment; a unitless impedance takes `fallback_units`.
    fn to_equipment(&self, name: impl Into<String>, fallback_units: Option<f64>) -> MatrixImpedanceEquipment {
        let metres = self.units.or(fallback_units).unwrap_or(1.0);
        let scale = |m: &Vec<Vec<f64>>, factor: f64| -> Vec<Vec<f64>> {
            m.iter()
                .map(|row| row.iter().map(|v| v * factor / metres).collect())
                .collect()
        };
        MatrixImpedanceEquipment {
            name: name.into(),
            r_matrix: scale(&self.r, 1.0),
            x_matrix: scale(&self.x, 1.0),
            c_matrix: scale(&self.c_nf, NANO),
            ampacity: self.ampacity,
        }
    }
}

/// Self terms `(2 z1 + z0) / 3`, mutual terms `(z0 - z1) / 3`.
fn sequence_matrix(n: usize, z1: f64, z0: f64) -> Vec<Vec<f64>> {
    let zs = (2.0 * z1 + z0) / 3.0;
    let zm = (z0 - z1) / 3.0;
    (0..n)
        .map(|i| (0..n).map(|j| if i == j { zs } else { zm }).collect())
        .collect()
}

/// A lower triangle or a full row-major matrix; absent means zeros.
fn parse_matrix(element: &DssElement, key: &str, n: usize) -> Result<Vec<Vec<f64>>> {
    let Some(values) = element.numbers(key)? else {
        return Ok(vec![vec![0.0; n]; n]);
    };
    let mut matrix = vec![vec![0.0; n]; n];
    if values.len() == n * (n + 1) / 2 {
        let mut k = 0;
        for i in 0..n {
            for j in 0..=i {
                matrix[i][j] = values[k];
                matrix[j][i] = values[k];
                k += 1;
            }
        }
    } else if values.len() == n * n {
        for (k, value) in values.into_iter().enumerate() {
            matrix[k / n][k % n] = value;
        }
    } else {
        bail!(
            "{}: {} has {} values for {} phases",
            element.qualified_name(),
            key,
            values.len(),
            n
        );
    }
    Ok(matrix)
}

fn mapping_error(kind: ComponentKind, row: usize, name: &str, source: anyhow::Error) -> GridError {
    GridError::Mapping {
        kind: kind.to_string(),
        row,
        name: Some(name.to_string()),
        source: Box::new(GridError::Other(format!("{:#}", source))),
    }
}

/// Register `name` with a placeholder voltage unless it exists.
fn ensure_bus(system: &mut System, name: &str) -> Result<()> {
    if system.bus(name).is_none() {
        system.add(DistributionBus::new(
            name,
            THREE_PHASE.to_vec(),
            PLACEHOLDER_VOLTAGE,
            VoltageType::LineToLine,
        ))?;
    }
    Ok(())
}

/// Name of the registered component of one of `kinds` matching `name`
/// case-insensitively.
fn find_named(system: &System, kinds: &[ComponentKind], name: &str) -> Option<(ComponentKind, String)> {
    kinds.iter().find_map(|&kind| {
        system
            .iter_kind(kind)
            .find(|c| c.name().eq_ignore_ascii_case(name))
            .map(|c| (kind, c.name().to_string()))
    })
}

/// Conductor states after `enabled=` and any Open/Close commands.
fn conductor_states(model: &DssModel, element: &DssElement, n: usize) -> Vec<bool> {
    let mut closed = vec![element.flag("enabled").unwrap_or(true); n];
    for action in &model.switch_actions {
        if action.class != element.class || !action.name.eq_ignore_ascii_case(&element.name) {
            continue;
        }
        match action.conductor {
            Some(k) if (1..=n).contains(&k) => closed[k - 1] = action.close,
            Some(_) => {}
            None => closed.iter_mut().for_each(|c| *c = action.close),
        }
    }
    closed
}

/// Line pieces shared by every impedance device.
struct LineParts {
    name: String,
    buses: Vec<String>,
    length: f64,
    phases: Vec<Phase>,
    equipment: MatrixImpedanceEquipment,
    is_closed: Vec<bool>,
}

impl LineParts {
    fn take(system: &mut System, kind: ComponentKind, name: &str) -> Option<Self> {
        match system.remove(kind, name)? {
            Component::MatrixImpedanceBranch(c) => Some(Self {
                is_closed: vec![true; c.phases.len()],
                name: c.name,
                buses: c.buses,
                length: c.length,
                phases: c.phases,
                equipment: c.equipment,
            }),
            Component::MatrixImpedanceSwitch(c) => Some(Self {
                name: c.name,
                buses: c.buses,
                length: c.length,
                phases: c.phases,
                equipment: c.equipment,
                is_closed: c.is_closed,
            }),
            _ => None,
        }
    }
}

/// Per-read state threaded through the element mappers.
struct DssBuild<'a> {
    model: &'a DssModel,
    system: System,
    /// Lowercase line code name -> (name as written, impedance)
    linecodes: HashMap<String, (String, LineImpedance)>,
    diagnostics: Diagnostics,
    stats: ReadStats,
}

impl<'a> DssBuild<'a> {
    /// Map every element of `class`, wrapping failures with the element's
    /// position and name.
    fn map_class<F>(&mut self, class: &str, kind: ComponentKind, mut mapper: F) -> Result<()>
    where
        F: FnMut(&DssElement, &mut Self) -> Result<bool>,
    {
        let model = self.model;
        let mut rows = 0;
        let mut parsed = 0;
        for (i, element) in model.of_class(class).enumerate() {
            rows += 1;
            if mapper(element, self).map_err(|err| mapping_error(kind, i, &element.name, err))? {
                parsed += 1;
            }
        }
        if rows > 0 {
            debug!(class, rows, parsed, "mapped OpenDSS elements");
        }
        self.stats.record(class, rows, parsed);
        Ok(())
    }

    fn map_source(&mut self, element: &DssElement) -> Result<bool> {
        let n = phase_count(element, 3)?;
        let (bus, phases) = terminal(element.get("bus1").unwrap_or("sourcebus"))?;
        let base_kv = element.number_or("basekv", 115.0)?;
        let pu = element.number_or("pu", 1.0)?;
        let line_to_line = base_kv * KILO * pu;
        let phase_voltage = if n > 1 {
            line_to_line / LINE_TO_LINE_FACTOR
        } else {
            line_to_line
        };
        let impedance = [
            element.number_or("r1", 1.65)?,
            element.number_or("x1", 6.6)?,
            element.number_or("r0", 1.9)?,
            element.number_or("x0", 5.7)?,
        ];
        ensure_bus(&mut self.system, &bus)?;
        self.system.add(DistributionVoltageSource {
            name: element.name.clone(),
            bus,
            phases: fit_phases(phases, n),
            equipment: VoltageSourceEquipment::balanced(
                element.name.clone(),
                n,
                phase_voltage,
                element.number_or("angle", 0.0)?,
                impedance,
            ),
        })?;
        Ok(true)
    }

    fn map_linecode(&mut self, element: &DssElement) -> Result<bool> {
        let n = element.number("nphases")?.map(|v| v as usize).unwrap_or(3).max(1);
        let impedance = LineImpedance::from_element(element, n, true)?
            .ok_or_else(|| anyhow!("{}: no impedance", element.qualified_name()))?;
        self.system
            .add(impedance.to_equipment(element.name.clone(), None))?;
        self.linecodes.insert(
            element.name.to_lowercase(),
            (element.name.clone(), impedance),
        );
        Ok(true)
    }

    fn map_line(&mut self, element: &DssElement) -> Result<bool> {
        let context = element.qualified_name();
        let (bus1, phases1) = terminal(required(element, "bus1")?)?;
        let (bus2, _) = terminal(required(element, "bus2")?)?;
        let code = match element.get("linecode") {
            Some(code) => Some(
                self.linecodes
                    .get(&code.to_lowercase())
                    .cloned()
                    .ok_or_else(|| GridError::unresolved("LineCode", code, context.clone()))?,
            ),
            None => None,
        };
        let n = element
            .number("phases")?
            .map(|v| v as usize)
            .or_else(|| code.as_ref().map(|(_, z)| z.phase_count()))
            .unwrap_or(3)
            .max(1);
        let is_switch = element.flag("switch").unwrap_or(false);
        let line_units = unit_length(element.get("units").unwrap_or("none"))?;

        let (equipment_name, impedance) = match (LineImpedance::from_element(element, n, false)?, code) {
            (Some(inline), _) => (format!("{}_impedance", element.name), inline),
            (None, Some((name, code))) => (name, code),
            (None, None) if is_switch => (format!("{}_switch", element.name), LineImpedance::switch(n)),
            (None, None) => (
                format!("{}_impedance", element.name),
                LineImpedance::from_element(element, n, true)?
                    .ok_or_else(|| anyhow!("{}: no impedance", context))?,
            ),
        };
        if impedance.phase_count() < n {
            bail!(
                "{}: {} phases but impedance '{}' has {}",
                context,
                n,
                equipment_name,
                impedance.phase_count()
            );
        }
        let impedance = impedance.shrink(n);
        let equipment = impedance.to_equipment(equipment_name, line_units);
        let length = element.number_or("length", 1.0)?
            * line_units.or(impedance.units).unwrap_or(1.0);

        ensure_bus(&mut self.system, &bus1)?;
        ensure_bus(&mut self.system, &bus2)?;
        let phases = fit_phases(phases1, n);
        let buses = vec![bus1, bus2];
        if is_switch {
            self.system.add(MatrixImpedanceSwitch {
                name: element.name.clone(),
                buses,
                length,
                is_closed: conductor_states(self.model, element, n),
                phases,
                equipment,
            })?;
        } else {
            if element.flag("enabled") == Some(false) {
                self.diagnostics.add_warning_with_entity(
                    "topology",
                    "disabled line kept in service",
                    &context,
                );
            }
            self.system.add(MatrixImpedanceBranch {
                name: element.name.clone(),
                buses,
                length,
                phases,
                equipment,
            })?;
        }
        Ok(true)
    }

    /// Fuse or Recloser control: replaces its monitored line with the
    /// protective device of the same name.
    fn promote_line(&mut self, element: &DssElement, kind: ComponentKind) -> Result<bool> {
        let context = element.qualified_name();
        let monitored = required(element, "monitoredobj")?;
        let Some((class, line_name)) = monitored.split_once('.') else {
            bail!("{}: MonitoredObj '{}' is not Class.Name", context, monitored);
        };
        if !class.eq_ignore_ascii_case("line") {
            bail!("{}: MonitoredObj '{}' is not a Line", context, monitored);
        }
        let promoted = [ComponentKind::MatrixImpedanceFuse, ComponentKind::MatrixImpedanceRecloser];
        if let Some((existing, name)) = find_named(&self.system, &promoted, line_name) {
            warn!(line = %name, existing = %existing, "line already carries a protective device");
            self.diagnostics.add_warning_with_entity(
                "topology",
                &format!("Line '{}' is already a {}", name, existing),
                &context,
            );
            return Ok(false);
        }
        let lines = [ComponentKind::MatrixImpedanceBranch, ComponentKind::MatrixImpedanceSwitch];
        let (line_kind, name) = find_named(&self.system, &lines, line_name)
            .ok_or_else(|| GridError::unresolved("Line", line_name, context.clone()))?;
        let parts = LineParts::take(&mut self.system, line_kind, &name)
            .ok_or_else(|| GridError::unresolved("Line", line_name, context.clone()))?;

        if kind == ComponentKind::MatrixImpedanceFuse {
            let mut equipment = parts.equipment;
            if let Some(rated) = element.number("ratedcurrent")? {
                equipment.ampacity = rated;
            }
            self.system.add(MatrixImpedanceFuse {
                name: parts.name,
                buses: parts.buses,
                length: parts.length,
                phases: parts.phases,
                equipment,
                is_closed: parts.is_closed,
                delay: element.number_or("delay", 0.0)?,
            })?;
        } else {
            let defaults = RecloserController::with_defaults(element.name.clone());
            let delays = element.numbers("recloseintervals")?.unwrap_or(defaults.delays);
            let controller = RecloserController {
                num_shots: element
                    .number("shots")?
                    .map(|v| v as u32)
                    .unwrap_or(defaults.num_shots),
                reset_time: element.number_or("reset", defaults.reset_time)?,
                delays,
                name: defaults.name,
            };
            self.system.add(MatrixImpedanceRecloser {
                name: parts.name,
                buses: parts.buses,
                length: parts.length,
                phases: parts.phases,
                equipment: parts.equipment,
                is_closed: parts.is_closed,
                controller: Some(controller),
            })?;
        }
        Ok(true)
    }

    fn map_transformer(&mut self, element: &DssElement) -> Result<bool> {
        let spec = TransformerSpec::from_element(element)?;
        let transformer = spec.build(element)?;
        for bus in &transformer.buses {
            ensure_bus(&mut self.system, bus)?;
        }
        self.system.add(transformer)?;
        Ok(true)
    }

    /// RegControl: turns its transformer into a regulator (once) and adds
    /// the controller to it.
    fn attach_regcontrol(&mut self, element: &DssElement) -> Result<bool> {
        let context = element.qualified_name();
        let target = required(element, "transformer")?;
        let kinds = [ComponentKind::DistributionRegulator, ComponentKind::DistributionTransformer];
        let (kind, name) = find_named(&self.system, &kinds, target)
            .ok_or_else(|| GridError::unresolved("Transformer", target, context.clone()))?;
        if kind == ComponentKind::DistributionTransformer {
            if let Some(Component::DistributionTransformer(t)) = self.system.remove(kind, &name) {
                self.system.add(DistributionRegulator {
                    name: t.name,
                    buses: t.buses,
                    winding_phases: t.winding_phases,
                    equipment: t.equipment,
                    controllers: Vec::new(),
                })?;
            }
        }
        let Some(Component::DistributionRegulator(regulator)) =
            self.system.get_mut(ComponentKind::DistributionRegulator, &name)
        else {
            return Err(GridError::unresolved("DistributionRegulator", &name, context).into());
        };

        let winding = element.number_or("winding", 1.0)? as usize;
        let idx = winding.clamp(1, regulator.buses.len().max(1)) - 1;
        let bus = regulator.buses.get(idx).cloned().unwrap_or_default();
        let phase = match element.number("ptphase")? {
            Some(node) => Phase::from_node_number(node as u32).unwrap_or(Phase::A),
            None => regulator
                .winding_phases
                .get(idx)
                .and_then(|p| p.first().copied())
                .unwrap_or(Phase::A),
        };
        let mut controller = RegulatorController::with_defaults(element.name.clone(), bus, phase);
        controller.v_setpoint = element.number_or("vreg", 120.0)?;
        controller.bandwidth = element.number_or("band", 3.0)?;
        controller.pt_ratio = element.number_or("ptratio", 60.0)?;
        controller.ct_primary = element.number_or("ctprim", 300.0)?;
        controller.delay = element.number_or("delay", 15.0)?;
        controller.ldc_r = element.number_or("r", 0.0)?;
        controller.ldc_x = element.number_or("x", 0.0)?;
        controller.use_ldc = controller.ldc_r != 0.0 || controller.ldc_x != 0.0;
        controller.is_reversible = element.flag("reversible").unwrap_or(false);
        controller.max_v_limit = element.number("vlimit")?.filter(|v| *v > 0.0);
        regulator.controllers.push(controller);
        Ok(true)
    }

    fn map_load(&mut self, element: &DssElement) -> Result<bool> {
        let n = phase_count(element, 3)?;
        let (bus, listed) = terminal(required(element, "bus1")?)?;
        let connection = parse_connection(element.get("conn").unwrap_or("wye"));
        let phases = if connection == ConnectionType::Delta && n == 1 && listed.len() == 2 {
            listed
        } else {
            fit_phases(listed, n)
        };

        let pf = element.number_or("pf", 0.88)?;
        let real = match (element.number("kw")?, element.number("kva")?) {
            (Some(kw), _) => kw,
            (None, Some(kva)) => kva * pf.abs(),
            (None, None) => 10.0,
        } * KILO;
        let reactive = match element.number("kvar")? {
            Some(kvar) => kvar * KILO,
            None if pf == 0.0 => 0.0,
            None => real * pf.abs().acos().tan() * pf.signum(),
        };
        let (z, i, p, zq, iq, pq) = match element.number("model")?.map(|m| m as i64).unwrap_or(1) {
            2 => (1.0, 0.0, 0.0, 1.0, 0.0, 0.0),
            5 => (0.0, 1.0, 0.0, 0.0, 1.0, 0.0),
            8 => {
                let zipv = element.numbers("zipv")?.unwrap_or_default();
                if zipv.len() != 7 {
                    bail!("{}: ZIPV needs 7 values, got {}", element.qualified_name(), zipv.len());
                }
                (zipv[0], zipv[1], zipv[2], zipv[3], zipv[4], zipv[5])
            }
            1 => (0.0, 0.0, 1.0, 0.0, 0.0, 1.0),
            other => {
                self.diagnostics.add_warning_with_entity(
                    "unsupported",
                    &format!("load model {} read as constant power", other),
                    &element.qualified_name(),
                );
                (0.0, 0.0, 1.0, 0.0, 0.0, 1.0)
            }
        };
        let share = phases.len() as f64;
        let phase_loads = phases
            .iter()
            .map(|_| PhaseLoad {
                real_power: real / share,
                reactive_power: reactive / share,
                z_real: z,
                i_real: i,
                p_real: p,
                z_imag: zq,
                i_imag: iq,
                p_imag: pq,
            })
            .collect();

        ensure_bus(&mut self.system, &bus)?;
        self.system.add(DistributionLoad {
            name: element.name.clone(),
            bus,
            phases,
            equipment: LoadEquipment {
                name: element.name.clone(),
                phase_loads,
                connection_type: connection,
            },
        })?;
        Ok(true)
    }

    fn map_capacitor(&mut self, element: &DssElement) -> Result<bool> {
        let n = phase_count(element, 3)?;
        let (bus, listed) = terminal(required(element, "bus1")?)?;
        let phases = fit_phases(listed, n);
        let connection = parse_connection(element.get("conn").unwrap_or("wye"));
        let steps = element.numbers("kvar")?.unwrap_or_else(|| vec![1_200.0]);
        let total = steps.iter().sum::<f64>() * KILO;
        let banks = element
            .number("numsteps")?
            .map(|v| v as u32)
            .unwrap_or(steps.len() as u32)
            .max(1);
        let phase_capacitors = phases
            .iter()
            .map(|_| PhaseCapacitor {
                rated_reactive_power: total / phases.len() as f64,
                num_banks: banks,
                num_banks_on: banks,
                resistance: 0.0,
                reactance: 0.0,
            })
            .collect();

        ensure_bus(&mut self.system, &bus)?;
        self.system.add(DistributionCapacitor {
            name: element.name.clone(),
            bus,
            equipment: CapacitorEquipment {
                name: element.name.clone(),
                phase_capacitors,
                rated_voltage: element.number_or("kv", 12.47)? * KILO,
                voltage_type: voltage_type(phases.len(), connection),
                connection_type: connection,
            },
            phases,
            controllers: Vec::new(),
        })?;
        Ok(true)
    }

    fn attach_capcontrol(&mut self, element: &DssElement) -> Result<bool> {
        let context = element.qualified_name();
        let kind = element.get("type").unwrap_or("current").to_lowercase();
        if !kind.starts_with('v') {
            debug!(control = %context, kind = %kind, "skipping non-voltage capacitor control");
            self.diagnostics.add_warning_with_entity(
                "unsupported",
                &format!("capacitor control type '{}' is not converted", kind),
                &context,
            );
            return Ok(false);
        }
        let target = required(element, "capacitor")?;
        let (_, name) = find_named(&self.system, &[ComponentKind::DistributionCapacitor], target)
            .ok_or_else(|| GridError::unresolved("Capacitor", target, context.clone()))?;
        let monitored = match element.get("element") {
            Some(reference) => self.monitored_bus(reference, element.number_or("terminal", 1.0)? as usize)?,
            None => None,
        };
        let Some(Component::DistributionCapacitor(capacitor)) =
            self.system.get_mut(ComponentKind::DistributionCapacitor, &name)
        else {
            return Err(GridError::unresolved("Capacitor", target, context).into());
        };
        let controlled_phase = match element.number("ptphase")? {
            Some(node) => Phase::from_node_number(node as u32).unwrap_or(Phase::A),
            None => capacitor.phases.first().copied().unwrap_or(Phase::A),
        };
        capacitor.controllers.push(VoltageCapacitorController {
            name: element.name.clone(),
            delay: element.number_or("delay", 15.0)?,
            on_voltage: element.number_or("on", 120.0)?,
            off_voltage: element.number_or("off", 125.0)?,
            pt_ratio: element.number_or("ptratio", 60.0)?,
            controlled_bus: monitored.or_else(|| Some(capacitor.bus.clone())),
            controlled_phase,
        });
        Ok(true)
    }

    /// Bus on `terminal` of a `Class.Name` reference, when resolvable.
    fn monitored_bus(&self, reference: &str, terminal_no: usize) -> Result<Option<String>> {
        let Some((class, name)) = reference.split_once('.') else {
            return Ok(None);
        };
        let Some(target) = self.model.find(&class.to_lowercase(), name) else {
            return Ok(None);
        };
        let key = format!("bus{}", terminal_no.max(1));
        match target.get(&key).or_else(|| target.get("bus1")) {
            Some(spec) => Ok(Some(terminal(spec)?.0)),
            None => Ok(None),
        }
    }

    fn map_storage(&mut self, element: &DssElement) -> Result<bool> {
        let n = phase_count(element, 3)?;
        let (bus, listed) = terminal(required(element, "bus1")?)?;
        let phases = fit_phases(listed, n);
        let kw_rated = element.number_or("kwrated", 25.0)?;
        let rated_voltage = element.number_or("kv", 12.47)? * KILO;
        let mut inverter = InverterEquipment::ideal(
            format!("{}_inverter", element.name),
            element.number_or("kva", kw_rated)? * KILO,
        );
        inverter.cutin_percent = element.number_or("%cutin", 0.0)?;
        inverter.cutout_percent = element.number_or("%cutout", 0.0)?;

        ensure_bus(&mut self.system, &bus)?;
        self.system.add(DistributionBattery {
            name: element.name.clone(),
            bus,
            active_power: element.number_or("kw", 0.0)? * KILO,
            reactive_power: element.number_or("kvar", 0.0)? * KILO,
            equipment: BatteryEquipment {
                name: element.name.clone(),
                rated_energy: element.number_or("kwhrated", 50.0)? * KILO,
                rated_power: kw_rated * KILO,
                charging_efficiency: element.number_or("%effcharge", 90.0)? / 100.0,
                discharging_efficiency: element.number_or("%effdischarge", 90.0)? / 100.0,
                idling_efficiency: 1.0 - element.number_or("%idlingkw", 1.0)? / 100.0,
                rated_voltage,
                voltage_type: voltage_type(phases.len(), ConnectionType::Star),
            },
            inverter,
            phases,
        })?;
        Ok(true)
    }

    fn map_pvsystem(&mut self, element: &DssElement) -> Result<bool> {
        let n = phase_count(element, 3)?;
        let (bus, listed) = terminal(required(element, "bus1")?)?;
        let phases = fit_phases(listed, n);
        let pmpp = element.number_or("pmpp", 500.0)? * KILO;
        let irradiance_pu = element.number_or("irradiance", 1.0)?;
        let active_power = pmpp * irradiance_pu;
        let reactive_power = match (element.number("kvar")?, element.number("pf")?) {
            (Some(kvar), _) => kvar * KILO,
            (None, Some(pf)) if pf != 0.0 => active_power * pf.abs().acos().tan() * pf.signum(),
            _ => 0.0,
        };
        let mut inverter = InverterEquipment::ideal(
            format!("{}_inverter", element.name),
            element.number_or("kva", pmpp / KILO)? * KILO,
        );
        inverter.cutin_percent = element.number_or("%cutin", 20.0)?;
        inverter.cutout_percent = element.number_or("%cutout", 20.0)?;

        ensure_bus(&mut self.system, &bus)?;
        self.system.add(DistributionSolar {
            name: element.name.clone(),
            bus,
            irradiance: irradiance_pu * KILO,
            active_power,
            reactive_power,
            equipment: SolarEquipment {
                name: element.name.clone(),
                rated_power: pmpp,
                resistance: element.number_or("%r", 50.0)?,
                reactance: element.number_or("%x", 0.0)?,
                rated_voltage: element.number_or("kv", 12.47)? * KILO,
                voltage_type: voltage_type(phases.len(), ConnectionType::Star),
            },
            inverter,
            phases,
        })?;
        Ok(true)
    }

    fn apply_coordinates(&mut self) {
        let mut unknown = 0;
        for (name, x, y) in &self.model.bus_coords {
            match self.system.bus_mut(name) {
                Some(bus) => bus.coordinate = Some(Location { x: *x, y: *y }),
                None => unknown += 1,
            }
        }
        if unknown > 0 {
            warn!(unknown, "coordinates for buses no element references");
            self.diagnostics.add_warning(
                "coordinates",
                &format!("{} coordinate rows name unknown buses", unknown),
            );
        }
    }
}

/// Winding data of one transformer as the script sets it.
#[derive(Debug, Clone, Default)]
struct WindingSpec {
    bus: Option<String>,
    conn: Option<ConnectionType>,
    kv: Option<f64>,
    kva: Option<f64>,
    r_pct: Option<f64>,
    tap: Option<f64>,
}

#[derive(Debug, Clone)]
struct TransformerSpec {
    phases: usize,
    windings: Vec<WindingSpec>,
    reactances: [f64; 3],
    pct_no_load_loss: f64,
    pct_load_loss: Option<f64>,
    max_tap: f64,
    min_tap: f64,
    num_taps: i32,
}

impl TransformerSpec {
    /// Replay the properties in order; `wdg=` selects the winding the
    /// per-winding properties that follow apply to.
    fn from_element(element: &DssElement) -> Result<Self> {
        let mut spec = TransformerSpec {
            phases: 3,
            windings: vec![WindingSpec::default(); 2],
            reactances: [7.0, 35.0, 30.0],
            pct_no_load_loss: 0.0,
            pct_load_loss: None,
            max_tap: 1.1,
            min_tap: 0.9,
            num_taps: 32,
        };
        let mut current = 0usize;
        for (key, value) in &element.properties {
            let number = || {
                parse_number(value)
                    .with_context(|| format!("{}: property '{}'", element.qualified_name(), key))
            };
            let numbers = || -> Result<Vec<f64>> {
                split_array(value)
                    .into_iter()
                    .map(parse_number)
                    .collect::<Result<Vec<f64>>>()
                    .with_context(|| format!("{}: property '{}'", element.qualified_name(), key))
            };
            match key.as_str() {
                "phases" => spec.phases = (number()? as usize).max(1),
                "windings" => {
                    let n = (number()? as usize).max(2);
                    spec.windings.resize(n, WindingSpec::default());
                }
                "wdg" => {
                    current = (number()? as usize).max(1) - 1;
                    spec.winding(current);
                }
                "bus" => spec.winding(current).bus = Some(value.clone()),
                "conn" => spec.winding(current).conn = Some(parse_connection(value)),
                "kv" => spec.winding(current).kv = Some(number()?),
                "kva" => spec.winding(current).kva = Some(number()?),
                "%r" | "r" => spec.winding(current).r_pct = Some(number()?),
                "tap" => spec.winding(current).tap = Some(number()?),
                "buses" => {
                    for (i, bus) in split_array(value).into_iter().enumerate() {
                        spec.winding(i).bus = Some(bus.to_string());
                    }
                }
                "conns" => {
                    for (i, conn) in split_array(value).into_iter().enumerate() {
                        spec.winding(i).conn = Some(parse_connection(conn));
                    }
                }
                "kvs" | "kvas" | "%rs" | "taps" => {
                    for (i, v) in numbers()?.into_iter().enumerate() {
                        let winding = spec.winding(i);
                        match key.as_str() {
                            "kvs" => winding.kv = Some(v),
                            "kvas" => winding.kva = Some(v),
                            "%rs" => winding.r_pct = Some(v),
                            _ => winding.tap = Some(v),
                        }
                    }
                }
                "xhl" | "x12" => spec.reactances[0] = number()?,
                "xht" | "x13" => spec.reactances[1] = number()?,
                "xlt" | "x23" => spec.reactances[2] = number()?,
                "xscarray" => {
                    for (i, v) in numbers()?.into_iter().take(3).enumerate() {
                        spec.reactances[i] = v;
                    }
                }
                "%noloadloss" => spec.pct_no_load_loss = number()?,
                "%loadloss" => spec.pct_load_loss = Some(number()?),
                "maxtap" => spec.max_tap = number()?,
                "mintap" => spec.min_tap = number()?,
                "numtaps" => spec.num_taps = number()? as i32,
                _ => {}
            }
        }
        Ok(spec)
    }

    fn winding(&mut self, i: usize) -> &mut WindingSpec {
        if i >= self.windings.len() {
            self.windings.resize(i + 1, WindingSpec::default());
        }
        &mut self.windings[i]
    }

    fn build(&self, element: &DssElement) -> Result<DistributionTransformer> {
        let context = element.qualified_name();
        let count = self.windings.len();
        if count > 3 {
            bail!("{}: {} windings are not supported", context, count);
        }
        let first_kva = self.windings[0].kva.unwrap_or(1_000.0);
        let default_r = self.pct_load_loss.map(|loss| loss / 2.0).unwrap_or(0.2);
        let voltage_kind = if self.phases > 1 {
            VoltageType::LineToLine
        } else {
            VoltageType::LineToGround
        };

        let mut buses = Vec::with_capacity(count);
        let mut winding_phases = Vec::with_capacity(count);
        let mut windings = Vec::with_capacity(count);
        for (i, spec) in self.windings.iter().enumerate() {
            let bus_spec = spec
                .bus
                .as_deref()
                .ok_or_else(|| GridError::missing_field("bus", format!("{} winding {}", context, i + 1)))?;
            let (bus, listed) = terminal(bus_spec)?;
            buses.push(bus);
            winding_phases.push(fit_phases(listed, self.phases));
            let connection = spec.conn.unwrap_or(ConnectionType::Star);
            windings.push(WindingEquipment {
                name: format!("{}_{}", element.name, i + 1),
                rated_voltage: spec.kv.unwrap_or(12.47) * KILO,
                voltage_type: voltage_kind,
                rated_power: spec.kva.unwrap_or(first_kva) * KILO,
                connection_type: connection,
                resistance: spec.r_pct.unwrap_or(default_r),
                is_grounded: connection == ConnectionType::Star,
                num_phases: self.phases,
                tap_positions: vec![spec.tap.unwrap_or(1.0); self.phases],
                total_taps: self.num_taps,
                min_tap_pu: self.min_tap,
                max_tap_pu: self.max_tap,
            });
        }

        let (coupling_sequences, winding_reactances) = if count == 2 {
            (vec![[0, 1]], vec![self.reactances[0]])
        } else {
            (vec![[0, 1], [0, 2], [1, 2]], self.reactances.to_vec())
        };
        let is_center_tapped = count == 3
            && self.phases == 1
            && windings[1].rated_voltage == windings[2].rated_voltage;
        let pct_full_load_loss = self
            .pct_load_loss
            .unwrap_or_else(|| windings.iter().take(2).map(|w| w.resistance).sum());

        Ok(DistributionTransformer {
            name: element.name.clone(),
            buses,
            winding_phases,
            equipment: DistributionTransformerEquipment {
                name: element.get("xfmrcode").unwrap_or(&element.name).to_string(),
                windings,
                coupling_sequences,
                winding_reactances,
                pct_no_load_loss: self.pct_no_load_loss,
                pct_full_load_loss,
                is_center_tapped,
            },
        })
    }
}

/// Read an OpenDSS master script and everything it redirects to.
pub fn read_opendss(path: &Path, options: &ReaderOptions) -> Result<ReadResult> {
    let master = if path.is_dir() {
        path.join("Master.dss")
    } else {
        path.to_path_buf()
    };
    let model = DssModel::load(&master)?;

    let name = model
        .of_class("circuit")
        .next()
        .map(|c| c.name.clone())
        .unwrap_or_else(|| "opendss".to_string());
    let mut build = DssBuild {
        model: &model,
        system: System::new(name),
        linecodes: HashMap::new(),
        diagnostics: Diagnostics::new(),
        stats: ReadStats::default(),
    };

    for class in ["circuit", "vsource"] {
        build.map_class(class, ComponentKind::DistributionVoltageSource, |e, b| b.map_source(e))?;
    }
    build.map_class("linecode", ComponentKind::MatrixImpedanceBranchEquipment, |e, b| {
        b.map_linecode(e)
    })?;
    build.map_class("line", ComponentKind::MatrixImpedanceBranch, |e, b| b.map_line(e))?;
    build.map_class("fuse", ComponentKind::MatrixImpedanceFuse, |e, b| {
        b.promote_line(e, ComponentKind::MatrixImpedanceFuse)
    })?;
    build.map_class("recloser", ComponentKind::MatrixImpedanceRecloser, |e, b| {
        b.promote_line(e, ComponentKind::MatrixImpedanceRecloser)
    })?;
    build.map_class("transformer", ComponentKind::DistributionTransformer, |e, b| {
        b.map_transformer(e)
    })?;
    build.map_class("regcontrol", ComponentKind::DistributionRegulator, |e, b| {
        b.attach_regcontrol(e)
    })?;
    build.map_class("load", ComponentKind::DistributionLoad, |e, b| b.map_load(e))?;
    build.map_class("capacitor", ComponentKind::DistributionCapacitor, |e, b| b.map_capacitor(e))?;
    build.map_class("capcontrol", ComponentKind::DistributionCapacitor, |e, b| {
        b.attach_capcontrol(e)
    })?;
    build.map_class("storage", ComponentKind::DistributionBattery, |e, b| b.map_storage(e))?;
    build.map_class("pvsystem", ComponentKind::DistributionSolar, |e, b| b.map_pvsystem(e))?;
    build.apply_coordinates();

    let DssBuild {
        mut system,
        diagnostics,
        stats,
        ..
    } = build;
    info!(
        components = stats.total_parsed(),
        warnings = diagnostics.warning_count(),
        "OpenDSS parse summary"
    );

    topology::assign_bus_phases(&mut system);
    let assigned = topology::assign_bus_voltages(&mut system);
    debug!(assigned, "OpenDSS voltage propagation");

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

    const FEEDER: &str = "\
Clear
New Circuit.demo basekv=12.47 pu=1.0 phases=3 bus1=SourceBus
New LineCode.lc3 nphases=3 units=km rmatrix=[0.3 | 0.1 0.3 | 0.1 0.1 0.3]
~ xmatrix=[0.6 | 0.2 0.6 | 0.2 0.2 0.6] cmatrix=[10 | 0 10 | 0 0 10] normamps=400
New Line.L1 bus1=sourcebus.1.2.3 bus2=b2.1.2.3 linecode=lc3 length=0.5 units=km
New Line.sw1 bus1=b2 bus2=b3 phases=3 switch=yes
New Line.f1 bus1=b3.1 bus2=b4.1 phases=1 linecode=lc3 length=10 units=m
New Fuse.f1_ctrl MonitoredObj=Line.f1 MonitoredTerm=1 Delay=0.1
Open Line.sw1 1 2
New Transformer.t1 phases=3 windings=2 xhl=2
~ wdg=1 bus=b3 conn=delta kv=12.47 kva=500 %r=0.5
~ wdg=2 bus=b5 conn=wye kv=0.48 kva=500 %r=0.5
New RegControl.rc1 transformer=t1 winding=2 vreg=122 band=2 ptratio=20
New Load.ld1 bus1=b5.1.2.3 phases=3 kv=0.48 kw=90 kvar=30 model=1
New Load.ld2 bus1=b4.1 phases=1 kv=7.2 kw=10 pf=1
New Capacitor.c1 bus1=b2 phases=3 kvar=600 kv=12.47
New CapControl.cc1 capacitor=c1 element=Line.L1 terminal=2 type=voltage ON=118 OFF=124 PTratio=60
";

    fn read(script: &str) -> Result<ReadResult> {
        let dir = tempfile::tempdir().unwrap();
        let master = dir.path().join("Master.dss");
        std::fs::write(&master, script).unwrap();
        read_opendss(&master, &ReaderOptions::default())
    }

    #[test]
    fn reads_feeder_elements() {
        let result = read(FEEDER).unwrap();
        let system = &result.system;
        assert_eq!(system.name, "demo");
        assert_eq!(system.count(ComponentKind::DistributionBus), 5);
        assert_eq!(system.count(ComponentKind::MatrixImpedanceBranch), 1);
        assert_eq!(system.count(ComponentKind::MatrixImpedanceSwitch), 1);
        assert_eq!(system.count(ComponentKind::MatrixImpedanceFuse), 1);
        assert_eq!(system.count(ComponentKind::DistributionTransformer), 0);
        assert_eq!(system.count(ComponentKind::DistributionRegulator), 1);
        assert_eq!(system.count(ComponentKind::DistributionLoad), 2);

        let Some(Component::MatrixImpedanceBranch(line)) =
            system.get(ComponentKind::MatrixImpedanceBranch, "L1")
        else {
            panic!("L1 missing");
        };
        assert_eq!(line.buses, ["sourcebus", "b2"]);
        assert!((line.length - 500.0).abs() < 1e-9);
        assert!((line.equipment.r_matrix[0][0] - 0.3e-3).abs() < 1e-12);
        assert!((line.equipment.c_matrix[0][0] - 10e-12).abs() < 1e-18);
    }

    #[test]
    fn open_command_and_fuse_promotion() {
        let result = read(FEEDER).unwrap();
        let Some(Component::MatrixImpedanceSwitch(sw)) =
            result.system.get(ComponentKind::MatrixImpedanceSwitch, "sw1")
        else {
            panic!("sw1 missing");
        };
        assert_eq!(sw.is_closed, [true, false, true]);

        let Some(Component::MatrixImpedanceFuse(fuse)) =
            result.system.get(ComponentKind::MatrixImpedanceFuse, "f1")
        else {
            panic!("f1 missing");
        };
        assert_eq!(fuse.phases, [Phase::A]);
        assert!((fuse.delay - 0.1).abs() < 1e-12);
        assert_eq!(fuse.equipment.phase_count(), 1);
    }

    #[test]
    fn regulator_and_voltages() {
        let result = read(FEEDER).unwrap();
        let system = &result.system;
        let Some(Component::DistributionRegulator(reg)) =
            system.get(ComponentKind::DistributionRegulator, "t1")
        else {
            panic!("t1 missing");
        };
        assert_eq!(reg.controllers.len(), 1);
        assert_eq!(reg.controllers[0].controlled_bus, "b5");
        assert!((reg.controllers[0].v_setpoint - 122.0).abs() < 1e-12);
        assert_eq!(reg.equipment.windings[0].connection_type, ConnectionType::Delta);

        assert!((system.bus("b2").unwrap().rated_voltage - 12_470.0).abs() < 1e-6);
        assert!((system.bus("b5").unwrap().rated_voltage - 480.0).abs() < 1e-6);
        assert_eq!(system.bus("b4").unwrap().phases, [Phase::A]);
    }

    #[test]
    fn loads_and_capacitor_control() {
        let result = read(FEEDER).unwrap();
        let system = &result.system;
        let Some(Component::DistributionLoad(load)) = system.get(ComponentKind::DistributionLoad, "ld1")
        else {
            panic!("ld1 missing");
        };
        assert_eq!(load.equipment.phase_loads.len(), 3);
        assert!((load.equipment.total_real_power() - 90_000.0).abs() < 1e-6);
        assert!((load.equipment.total_reactive_power() - 30_000.0).abs() < 1e-6);

        let Some(Component::DistributionLoad(unity)) = system.get(ComponentKind::DistributionLoad, "ld2")
        else {
            panic!("ld2 missing");
        };
        assert!(unity.equipment.total_reactive_power().abs() < 1e-9);

        let Some(Component::DistributionCapacitor(cap)) =
            system.get(ComponentKind::DistributionCapacitor, "c1")
        else {
            panic!("c1 missing");
        };
        assert!((cap.equipment.total_reactive_power() - 600_000.0).abs() < 1e-6);
        assert_eq!(cap.controllers.len(), 1);
        assert_eq!(cap.controllers[0].controlled_bus.as_deref(), Some("b2"));
        assert!((cap.controllers[0].on_voltage - 118.0).abs() < 1e-12);
    }

    #[test]
    fn zipv_load_takes_seven_values() {
        let circuit = "New Circuit.c bus1=sourcebus\nNew Line.l1 bus1=sourcebus.1 bus2=b2.1 phases=1\n";
        let result = read(&format!(
            "{}New Load.z1 bus1=b2.1 phases=1 kv=7.2 kw=10 kvar=2 model=8 zipv=[0.2 0.3 0.5 0.1 0.1 0.8 0.8]\n",
            circuit
        ))
        .unwrap();
        let Some(Component::DistributionLoad(load)) = result.system.get(ComponentKind::DistributionLoad, "z1")
        else {
            panic!("z1 missing");
        };
        let phase = &load.equipment.phase_loads[0];
        assert_eq!((phase.z_real, phase.i_real, phase.p_real), (0.2, 0.3, 0.5));
        assert_eq!((phase.z_imag, phase.i_imag, phase.p_imag), (0.1, 0.1, 0.8));

        let err = read(&format!(
            "{}New Load.z2 bus1=b2.1 phases=1 kv=7.2 kw=10 model=8 zipv=[0.2 0.3 0.5 0.1 0.1 0.8]\n",
            circuit
        ))
        .unwrap_err();
        assert!(format!("{:#}", err).contains("ZIPV needs 7 values, got 6"));
    }

    #[test]
    fn unknown_linecode_names_the_line() {
        let err = read("New Circuit.c\nNew Line.l9 bus1=sourcebus bus2=b2 linecode=nope\n").unwrap_err();
        let message = format!("{:#}", err);
        assert!(message.contains("Failed parsing MatrixImpedanceBranch row 0 (name=l9)"));
        assert!(message.contains("LineCode 'nope'"));
    }

    #[test]
    fn fuse_on_missing_line_fails() {
        let err = read("New Circuit.c\nNew Fuse.f MonitoredObj=Line.ghost\n").unwrap_err();
        assert!(format!("{:#}", err).contains("Missing Line 'ghost'"));
    }

    #[test]
    fn unit_names() {
        assert_eq!(unit_length("kft").unwrap(), Some(304.8));
        assert_eq!(unit_length("none").unwrap(), None);
        assert!(unit_length("furlong").is_err());
    }
}

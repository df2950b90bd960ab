//! Per-kind CIM element emitters.
//!
//! Every emitter reads the same properties the CIM queries select, so a
//! written document reads back into the same components.

use std::collections::BTreeMap;
use std::f64::consts::PI;

use gridconv_core::model::*;
use gridconv_core::phase::phase_letters;
use gridconv_core::{Component, Phase};
use tracing::warn;

use super::document::{deterministic_id, CimDocument, Element};

/// Every bus of the system being written, by name.
pub type BusIndex<'a> = BTreeMap<&'a str, &'a DistributionBus>;

fn node_id(bus: &str) -> String {
    deterministic_id("connectivity_node", bus)
}

fn location_id(bus: &str) -> String {
    deterministic_id("location", bus)
}

fn bool_text(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Emit every supported component of `components`.
///
/// Terminals reference connectivity nodes by their deterministic id, so a
/// device may point at a bus written to another document. `buses` holds the
/// whole system; devices with a bus missing from it are skipped.
pub fn populate(doc: &mut CimDocument, components: &[&Component], buses: &BusIndex) {
    for bus in components.iter().filter_map(|c| c.as_bus()) {
        emit_bus(doc, bus);
    }

    let has_buses = |names: &[&str]| names.len() >= 2 && names.iter().all(|b| buses.contains_key(b));
    let of_kind = |kind: ComponentKind| components.iter().filter(move |c| c.kind() == kind);

    for component in of_kind(ComponentKind::DistributionVoltageSource) {
        if let Component::DistributionVoltageSource(source) = component {
            if let Some(bus) = buses.get(source.bus.as_str()) {
                emit_energy_source(doc, source, bus);
            }
        }
    }
    for component in of_kind(ComponentKind::DistributionLoad) {
        if let Component::DistributionLoad(load) = component {
            if let Some(bus) = buses.get(load.bus.as_str()) {
                emit_energy_consumer(doc, load, bus);
            }
        }
    }
    for component in of_kind(ComponentKind::MatrixImpedanceBranch) {
        if let Component::MatrixImpedanceBranch(branch) = component {
            if has_buses(component.buses().as_slice()) {
                emit_line_segment(doc, branch, buses);
            }
        }
    }
    for component in of_kind(ComponentKind::DistributionTransformer) {
        if let Component::DistributionTransformer(xfmr) = component {
            if has_buses(component.buses().as_slice()) {
                emit_power_transformer(doc, &xfmr.name, &xfmr.buses, &xfmr.equipment, buses);
            }
        }
    }
    for component in of_kind(ComponentKind::DistributionRegulator) {
        if let Component::DistributionRegulator(regulator) = component {
            if has_buses(component.buses().as_slice()) {
                emit_regulator(doc, regulator, buses);
            }
        }
    }
    for component in of_kind(ComponentKind::DistributionCapacitor) {
        if let Component::DistributionCapacitor(capacitor) = component {
            if let Some(bus) = buses.get(capacitor.bus.as_str()) {
                emit_capacitor(doc, capacitor, bus);
            }
        }
    }
    for component in components.iter().filter(|c| {
        matches!(
            c.kind(),
            ComponentKind::MatrixImpedanceSwitch
                | ComponentKind::MatrixImpedanceFuse
                | ComponentKind::MatrixImpedanceRecloser
        )
    }) {
        if has_buses(component.buses().as_slice()) {
            emit_switching_device(doc, component, buses);
        }
    }
    for component in of_kind(ComponentKind::DistributionSolar) {
        if let Component::DistributionSolar(solar) = component {
            if let Some(bus) = buses.get(solar.bus.as_str()) {
                emit_solar(doc, solar, bus);
            }
        }
    }
    for component in of_kind(ComponentKind::DistributionBattery) {
        if let Component::DistributionBattery(battery) = component {
            if let Some(bus) = buses.get(battery.bus.as_str()) {
                emit_battery(doc, battery, bus);
            }
        }
    }
}

fn emit_bus(doc: &mut CimDocument, bus: &DistributionBus) {
    let node = node_id(&bus.name);
    doc.push(Element::identified("ConnectivityNode", &node, &bus.name));

    let location = location_id(&bus.name);
    doc.push(Element::identified(
        "Location",
        &location,
        &format!("Location_{}", bus.name),
    ));
    if let Some(coordinate) = &bus.coordinate {
        let id = deterministic_id("position_point", &bus.name);
        let mut point =
            Element::identified("PositionPoint", &id, &format!("Position_{}", bus.name));
        point
            .literal("PositionPoint.xPosition", coordinate.x)
            .literal("PositionPoint.yPosition", coordinate.y)
            .reference("PositionPoint.Location", &location);
        doc.push(point);
    }
}

/// Push a terminal of `equipment_id` on `bus`; line terminals carry normal
/// and emergency current limits.
fn emit_terminal(
    doc: &mut CimDocument,
    equipment_id: &str,
    bus: &str,
    suffix: &str,
    ampacity: Option<f64>,
) -> String {
    let terminal_id = deterministic_id("terminal", &format!("{}:{}", equipment_id, suffix));
    let mut terminal = Element::identified("Terminal", &terminal_id, &format!("Terminal_{}", suffix));
    terminal
        .reference("Terminal.ConductingEquipment", equipment_id)
        .reference("Terminal.ConnectivityNode", &node_id(bus));

    let Some(ampacity) = ampacity else {
        doc.push(terminal);
        return terminal_id;
    };
    let limit_set_id = deterministic_id("operational_limit_set", &terminal_id);
    terminal.reference("ACDCTerminal.OperationalLimitSet", &limit_set_id);
    doc.push(terminal);

    let mut limit_set = Element::identified(
        "OperationalLimitSet",
        &limit_set_id,
        &format!("LimitSet_{}", suffix),
    );
    limit_set.reference("OperationalLimitSet.Terminal", &terminal_id);
    doc.push(limit_set);

    let ampacity = ampacity.max(0.0);
    for (label, value) in [("normal", ampacity), ("emergency", ampacity * 1.2)] {
        let id = deterministic_id("current_limit", &format!("{}:{}", terminal_id, label));
        let title = if label == "normal" { "Normal" } else { "Emergency" };
        let mut limit = Element::identified(
            "CurrentLimit",
            &id,
            &format!("CurrentLimit{}_{}", title, suffix),
        );
        limit
            .reference("OperationalLimit.OperationalLimitSet", &limit_set_id)
            .literal("CurrentLimit.value", value);
        doc.push(limit);
    }
    terminal_id
}

/// Base voltage and location references shared by conducting equipment.
fn place(doc: &mut CimDocument, element: &mut Element, bus: &DistributionBus) {
    let base_voltage = doc.base_voltage(bus.line_to_line_voltage());
    element
        .reference("ConductingEquipment.BaseVoltage", &base_voltage)
        .reference("PowerSystemResource.Location", &location_id(&bus.name));
}

/// Per-phase child elements of one owner class.
struct PhaseRows {
    class: &'static str,
    kind: &'static str,
    owner_property: &'static str,
    phase_property: &'static str,
}

const CONSUMER_PHASES: PhaseRows = PhaseRows {
    class: "EnergyConsumerPhase",
    kind: "energy_consumer_phase",
    owner_property: "EnergyConsumerPhase.EnergyConsumer",
    phase_property: "EnergyConsumerPhase.phase",
};
const LINE_PHASES: PhaseRows = PhaseRows {
    class: "ACLineSegmentPhase",
    kind: "line_segment_phase",
    owner_property: "ACLineSegmentPhase.ACLineSegment",
    phase_property: "ACLineSegmentPhase.phase",
};
const SHUNT_PHASES: PhaseRows = PhaseRows {
    class: "LinearShuntCompensatorPhase",
    kind: "linear_shunt_compensator_phase",
    owner_property: "ShuntCompensatorPhase.ShuntCompensator",
    phase_property: "ShuntCompensatorPhase.phase",
};
const CONNECTION_PHASES: PhaseRows = PhaseRows {
    class: "PowerElectronicsConnectionPhase",
    kind: "power_electronics_connection_phase",
    owner_property: "PowerElectronicsConnectionPhase.PowerElectronicsConnection",
    phase_property: "PowerElectronicsConnectionPhase.phase",
};

fn emit_phases(doc: &mut CimDocument, rows: &PhaseRows, owner: &str, owner_id: &str, phases: &[Phase]) {
    for (index, phase) in phases.iter().enumerate() {
        let index = index + 1;
        let id = deterministic_id(rows.kind, &format!("{}:{}", owner, index));
        let mut element = Element::identified(rows.class, &id, &format!("{}_phase_{}", owner, index));
        element
            .reference(rows.owner_property, owner_id)
            .literal(rows.phase_property, phase.as_str());
        doc.push(element);
    }
}

fn emit_energy_source(
    doc: &mut CimDocument,
    source: &DistributionVoltageSource,
    bus: &DistributionBus,
) {
    let id = deterministic_id("energy_source", &source.name);
    let mut element = Element::identified("EnergySource", &id, &source.name);
    place(doc, &mut element, bus);

    let lead = source.equipment.sources.first();
    let value = |f: fn(&PhaseVoltageSource) -> f64| lead.map(f).unwrap_or_default();
    element
        .literal("EnergySource.nominalVoltage", bus.line_to_line_voltage())
        .literal(
            "EnergySource.voltageMagnitude",
            value(|s| s.voltage) * LINE_TO_LINE_FACTOR,
        )
        .literal("EnergySource.voltageAngle", value(|s| s.angle) * PI / 180.0)
        .literal("EnergySource.r", value(|s| s.r1))
        .literal("EnergySource.x", value(|s| s.x1))
        .literal("EnergySource.r0", value(|s| s.r0))
        .literal("EnergySource.x0", value(|s| s.x0));
    doc.push(element);
    emit_terminal(doc, &id, &bus.name, &format!("{}:1", source.name), None);
}

fn emit_energy_consumer(doc: &mut CimDocument, load: &DistributionLoad, bus: &DistributionBus) {
    let id = deterministic_id("energy_consumer", &load.name);
    let mut element = Element::identified("EnergyConsumer", &id, &load.name);
    place(doc, &mut element, bus);

    let equipment = &load.equipment;
    let delta = equipment.connection_type == ConnectionType::Delta;
    let zip_id = deterministic_id("load_response", &load.name);
    element
        .literal("EnergyConsumer.p", equipment.total_real_power())
        .literal("EnergyConsumer.q", equipment.total_reactive_power())
        .literal("EnergyConsumer.phaseConnection", equipment.connection_type.cim_code())
        .literal("EnergyConsumer.grounded", bool_text(!delta))
        .reference("EnergyConsumer.LoadResponse", &zip_id);
    doc.push(element);

    let lead = equipment
        .phase_loads
        .first()
        .cloned()
        .unwrap_or_else(|| PhaseLoad::constant_power(0.0, 0.0));
    let mut zip = Element::identified(
        "LoadResponseCharacteristic",
        &zip_id,
        &format!("ZIP_{}", load.name),
    );
    zip.literal("LoadResponseCharacteristic.pConstantImpedance", lead.z_real * 100.0)
        .literal("LoadResponseCharacteristic.pConstantCurrent", lead.i_real * 100.0)
        .literal("LoadResponseCharacteristic.pConstantPower", lead.p_real * 100.0)
        .literal("LoadResponseCharacteristic.qConstantImpedance", lead.z_imag * 100.0)
        .literal("LoadResponseCharacteristic.qConstantCurrent", lead.i_imag * 100.0)
        .literal("LoadResponseCharacteristic.qConstantPower", lead.p_imag * 100.0)
        .literal("LoadResponseCharacteristic.pVoltageExponent", 1.0)
        .literal("LoadResponseCharacteristic.qVoltageExponent", 2.0);
    doc.push(zip);

    emit_phases(doc, &CONSUMER_PHASES, &load.name, &id, &load.phases);
    emit_terminal(doc, &id, &bus.name, &format!("{}:1", load.name), None);
}

/// `PerLengthPhaseImpedance` with one `PhaseImpedanceData` per lower
/// triangle cell, emitted once per document.
fn emit_line_code(doc: &mut CimDocument, equipment: &MatrixImpedanceEquipment) -> String {
    let id = deterministic_id("per_length_impedance", &equipment.name);
    if doc.contains(&id) {
        return id;
    }
    let n = equipment.phase_count();
    let mut code = Element::identified("PerLengthPhaseImpedance", &id, &equipment.name);
    code.literal("PerLengthPhaseImpedance.conductorCount", n);
    doc.push(code);

    let omega = 2.0 * PI * SYSTEM_FREQUENCY_HZ;
    for row in 0..n {
        for col in 0..=row {
            let cell = |matrix: &[Vec<f64>]| {
                matrix
                    .get(row)
                    .and_then(|r| r.get(col))
                    .copied()
                    .unwrap_or_default()
            };
            let data_id = deterministic_id(
                "phase_impedance_data",
                &format!("{}:{}:{}", equipment.name, row + 1, col + 1),
            );
            let mut data = Element::identified(
                "PhaseImpedanceData",
                &data_id,
                &format!("{}_{}_{}", equipment.name, row + 1, col + 1),
            );
            data.reference("PhaseImpedanceData.PhaseImpedance", &id)
                .literal("PhaseImpedanceData.r", cell(&equipment.r_matrix))
                .literal("PhaseImpedanceData.x", cell(&equipment.x_matrix))
                .literal("PhaseImpedanceData.b", cell(&equipment.c_matrix) * omega)
                .literal("PhaseImpedanceData.row", row + 1)
                .literal("PhaseImpedanceData.column", col + 1);
            doc.push(data);
        }
    }
    id
}

fn emit_line_segment(doc: &mut CimDocument, branch: &MatrixImpedanceBranch, buses: &BusIndex) {
    let Some(from) = buses.get(branch.buses[0].as_str()) else {
        return;
    };
    let id = deterministic_id("line_segment", &branch.name);
    let mut line = Element::identified("ACLineSegment", &id, &branch.name);
    place(doc, &mut line, from);
    line.literal("Conductor.length", branch.length);
    let code_id = emit_line_code(doc, &branch.equipment);
    line.reference("ACLineSegment.PerLengthImpedance", &code_id);
    doc.push(line);

    emit_phases(doc, &LINE_PHASES, &branch.name, &id, &branch.phases);
    for (index, bus) in branch.buses.iter().take(2).enumerate() {
        emit_terminal(
            doc,
            &id,
            bus,
            &format!("{}:{}", branch.name, index + 1),
            Some(branch.equipment.ampacity),
        );
    }
}

fn winding_reactance_ohm(winding: &WindingEquipment, percent: f64) -> f64 {
    percent / 100.0 * winding.base_impedance()
}

/// Ids produced by a power transformer emission.
struct PowerTransformerIds {
    id: String,
    terminals: Vec<String>,
}

fn emit_power_transformer(
    doc: &mut CimDocument,
    name: &str,
    bus_names: &[String],
    equipment: &DistributionTransformerEquipment,
    buses: &BusIndex,
) -> Option<PowerTransformerIds> {
    let primary = buses.get(bus_names.first()?.as_str())?;
    let id = deterministic_id("power_transformer", name);
    let mut power = Element::identified("PowerTransformer", &id, name);
    place(doc, &mut power, primary);
    if equipment.windings.len() < 2 {
        doc.push(power);
        return Some(PowerTransformerIds {
            id,
            terminals: Vec::new(),
        });
    }
    let vector_group: String = equipment
        .windings
        .iter()
        .take(2)
        .map(|w| w.connection_type.cim_code())
        .collect();
    power.literal("PowerTransformer.vectorGroup", vector_group);
    doc.push(power);
    if equipment.windings.len() > 2 {
        warn!(
            transformer = name,
            windings = equipment.windings.len(),
            "CIM output carries the first two windings only"
        );
    }

    let mut end_ids = Vec::new();
    let mut terminals = Vec::new();
    for (index, (winding, bus)) in equipment.windings.iter().zip(bus_names).take(2).enumerate() {
        let number = index + 1;
        let terminal_id = emit_terminal(doc, &id, bus, &format!("{}:terminal:{}", name, number), None);
        let base_voltage = doc.base_voltage(winding.line_to_line_voltage());
        let end_id = deterministic_id("power_transformer_end", &format!("{}:{}", name, number));
        let mut end = Element::identified(
            "PowerTransformerEnd",
            &end_id,
            &format!("{}_end_{}", name, number),
        );
        end.reference("PowerTransformerEnd.PowerTransformer", &id)
            .literal("PowerTransformerEnd.ratedS", winding.rated_power)
            .literal("PowerTransformerEnd.ratedU", winding.line_to_line_voltage())
            .literal("PowerTransformerEnd.r", winding.resistance_ohm())
            .literal("PowerTransformerEnd.connectionKind", winding.connection_type.cim_code())
            .literal("PowerTransformerEnd.phaseAngleClock", index)
            .literal("TransformerEnd.endNumber", number)
            .reference("TransformerEnd.Terminal", &terminal_id)
            .reference("TransformerEnd.BaseVoltage", &base_voltage);
        doc.push(end);
        end_ids.push(end_id);
        terminals.push(terminal_id);
    }

    let lead = &equipment.windings[0];
    let percent_x = equipment
        .winding_reactances
        .first()
        .copied()
        .unwrap_or(1.0);
    let x = winding_reactance_ohm(lead, percent_x);
    let r = lead.resistance_ohm();
    let mesh_id = deterministic_id("transformer_mesh_impedance", name);
    let mut mesh = Element::identified(
        "TransformerMeshImpedance",
        &mesh_id,
        &format!("{}_mesh", name),
    );
    mesh.literal("TransformerMeshImpedance.r", r)
        .literal("TransformerMeshImpedance.x", x)
        .literal("TransformerMeshImpedance.r0", r)
        .literal("TransformerMeshImpedance.x0", x)
        .reference("TransformerMeshImpedance.FromTransformerEnd", &end_ids[0])
        .reference("TransformerMeshImpedance.ToTransformerEnd", &end_ids[1]);
    doc.push(mesh);
    Some(PowerTransformerIds { id, terminals })
}

/// Regulators are tank-based transformers: the power transformer carries
/// the terminals, the tank carries the winding catalogue, tap changer and
/// control.
fn emit_regulator(doc: &mut CimDocument, regulator: &DistributionRegulator, buses: &BusIndex) {
    let name = regulator.name.as_str();
    let equipment = &regulator.equipment;
    let Some(power) = emit_power_transformer(
        doc,
        &format!("{}_power", name),
        &regulator.buses,
        equipment,
        buses,
    ) else {
        return;
    };
    let location = location_id(&regulator.buses[0]);

    let tank_info_id = deterministic_id("transformer_tank_info", name);
    doc.push(Element::identified(
        "TransformerTankInfo",
        &tank_info_id,
        &format!("{}_tank_info", name),
    ));
    let tank_id = deterministic_id("transformer_tank", name);
    let mut tank = Element::identified("TransformerTank", &tank_id, name);
    tank.reference("TransformerTank.TransformerTankInfo", &tank_info_id)
        .reference("TransformerTank.PowerTransformer", &power.id)
        .reference("PowerSystemResource.Location", &location);
    doc.push(tank);

    let mut tank_end_ids = Vec::new();
    for (index, winding) in equipment.windings.iter().take(2).enumerate() {
        let number = index + 1;
        let info_id = deterministic_id("transformer_end_info", &format!("{}:{}", name, number));
        let mut info = Element::identified(
            "TransformerEndInfo",
            &info_id,
            &format!("{}_end_{}", name, number),
        );
        info.reference("TransformerEndInfo.TransformerTankInfo", &tank_info_id)
            .literal("TransformerEndInfo.ratedS", winding.rated_power)
            .literal("TransformerEndInfo.ratedU", winding.line_to_line_voltage())
            .literal("TransformerEndInfo.r", winding.resistance_ohm())
            .literal("TransformerEndInfo.connectionKind", winding.connection_type.cim_code())
            .literal("TransformerEndInfo.phaseAngleClock", index)
            .literal("TransformerEndInfo.endNumber", number);
        doc.push(info);

        let tank_end_id = deterministic_id("transformer_tank_end", &format!("{}:{}", name, number));
        let phases = regulator
            .winding_phases
            .get(index)
            .map(|p| phase_letters(p))
            .unwrap_or_else(|| "ABC".to_string());
        let mut tank_end = Element::identified(
            "TransformerTankEnd",
            &tank_end_id,
            &format!("{}_tank_end_{}", name, number),
        );
        tank_end
            .reference("TransformerTankEnd.TransformerTank", &tank_id)
            .literal("TransformerTankEnd.orderedPhases", phases);
        doc.push(tank_end);
        tank_end_ids.push(tank_end_id);
    }

    let (Some(controller), Some(primary), Some(tank_end), Some(terminal)) = (
        regulator.controllers.first(),
        equipment.windings.first(),
        tank_end_ids.first(),
        power.terminals.first(),
    ) else {
        return;
    };
    let steps = TapSteps::from_winding(primary);
    let control_id = deterministic_id("tap_changer_control", name);
    let tap_changer_id = deterministic_id("ratio_tap_changer", name);
    let mut tap_changer = Element::identified("RatioTapChanger", &tap_changer_id, name);
    tap_changer
        .reference("RatioTapChanger.TransformerEnd", tank_end)
        .literal("TapChanger.highStep", steps.high_step)
        .literal("TapChanger.lowStep", steps.low_step)
        .literal("TapChanger.neutralStep", 0)
        .literal("TapChanger.normalStep", steps.normal_step)
        .literal("RatioTapChanger.stepVoltageIncrement", steps.step_percent)
        .literal("TapChanger.step", steps.normal_step)
        .literal("TapChanger.neutralU", controller.v_setpoint)
        .literal("TapChanger.initialDelay", controller.delay)
        .literal("TapChanger.subsequentDelay", controller.delay)
        .literal("TapChanger.ltcFlag", "true")
        .literal("TapChanger.controlEnabled", "true")
        .literal("TapChanger.ptRatio", controller.pt_ratio)
        .literal("TapChanger.ctRatio", 1.0)
        .literal("TapChanger.ctRating", controller.ct_primary)
        .reference("TapChanger.TapChangerControl", &control_id);
    doc.push(tap_changer);

    let mut control = Element::identified(
        "TapChangerControl",
        &control_id,
        &format!("{}_control", name),
    );
    control
        .literal("RegulatingControl.mode", "voltage")
        .reference("RegulatingControl.Terminal", terminal)
        .reference("PowerSystemResource.Location", &location)
        .literal("RegulatingControl.monitoredPhase", controller.controlled_phase.as_str())
        .literal("RegulatingControl.targetValue", controller.v_setpoint)
        .literal("RegulatingControl.targetDeadband", controller.bandwidth)
        .literal("TapChangerControl.lineDropCompensation", bool_text(controller.use_ldc))
        .literal("TapChangerControl.lineDropR", controller.ldc_r)
        .literal("TapChangerControl.lineDropX", controller.ldc_x)
        .literal("TapChangerControl.reversible", bool_text(controller.is_reversible))
        .literal("TapChangerControl.maxLimitVoltage", controller.max_v_limit.unwrap_or(0.0))
        .literal("TapChangerControl.minLimitVoltage", controller.min_v_limit.unwrap_or(0.0));
    doc.push(control);

    let x_test = equipment
        .winding_reactances
        .first()
        .map(|x| winding_reactance_ohm(primary, *x))
        .unwrap_or(0.0);
    let r_test = primary.resistance_ohm();
    let test_id = deterministic_id("short_circuit_test", name);
    let mut test = Element::identified(
        "ShortCircuitTest",
        &test_id,
        &format!("{}_short_test", name),
    );
    test.reference(
        "ShortCircuitTest.EnergisedEnd",
        &deterministic_id("transformer_end_info", &format!("{}:1", name)),
    )
    .literal("ShortCircuitTest.leakageImpedance", x_test)
    .literal("ShortCircuitTest.leakageImpedanceZero", x_test)
    .literal("ShortCircuitTest.loss", r_test)
    .literal("ShortCircuitTest.lossZero", r_test);
    doc.push(test);
}

fn emit_capacitor(doc: &mut CimDocument, capacitor: &DistributionCapacitor, bus: &DistributionBus) {
    let equipment = &capacitor.equipment;
    let id = deterministic_id("linear_shunt_compensator", &capacitor.name);
    let mut element = Element::identified("LinearShuntCompensator", &id, &capacitor.name);

    let rated_voltage = if equipment.rated_voltage > 0.0 {
        equipment.rated_voltage
    } else {
        bus.line_to_line_voltage()
    };
    let base_voltage = doc.base_voltage(rated_voltage);
    let b1 = if rated_voltage > 0.0 {
        equipment.total_reactive_power() / rated_voltage.powi(2)
    } else {
        0.0
    };
    let sections = equipment
        .phase_capacitors
        .first()
        .map(|c| c.num_banks.max(1))
        .unwrap_or(1);
    element
        .reference("ConductingEquipment.BaseVoltage", &base_voltage)
        .reference("PowerSystemResource.Location", &location_id(&bus.name))
        .literal("ShuntCompensator.phaseConnection", equipment.connection_type.cim_code())
        .literal("LinearShuntCompensator.bPerSection", b1)
        .literal("LinearShuntCompensator.gPerSection", 0.0)
        .literal("LinearShuntCompensator.b0PerSection", 0.0)
        .literal("LinearShuntCompensator.g0PerSection", 0.0)
        .literal("ShuntCompensator.sections", sections);
    doc.push(element);

    emit_phases(doc, &SHUNT_PHASES, &capacitor.name, &id, &capacitor.phases);
    emit_terminal(doc, &id, &bus.name, &format!("{}:1", capacitor.name), None);
}

/// LoadBreakSwitch, Fuse or Recloser.
fn emit_switching_device(doc: &mut CimDocument, component: &Component, buses: &BusIndex) {
    let (class, kind, breaking_capacity, is_closed) = match component {
        Component::MatrixImpedanceSwitch(s) => ("LoadBreakSwitch", "load_break_switch", true, &s.is_closed),
        Component::MatrixImpedanceFuse(f) => ("Fuse", "fuse", false, &f.is_closed),
        Component::MatrixImpedanceRecloser(r) => ("Recloser", "recloser", true, &r.is_closed),
        _ => return,
    };
    let bus_names = component.buses();
    let (Some(equipment), [from, to, ..]) = (component.impedance_equipment(), bus_names.as_slice())
    else {
        return;
    };
    let Some(from_bus) = buses.get(from) else {
        return;
    };
    let name = component.name();
    let id = deterministic_id(kind, name);
    let mut element = Element::identified(class, &id, name);
    if breaking_capacity {
        element.literal("ProtectedSwitch.breakingCapacity", equipment.ampacity);
    }
    let open = bool_text(!is_closed.iter().all(|closed| *closed));
    element
        .literal("Switch.ratedCurrent", equipment.ampacity)
        .literal("Switch.normalOpen", open)
        .literal("Switch.open", open);
    place(doc, &mut element, from_bus);
    doc.push(element);

    emit_terminal(doc, &id, from, &format!("{}:1", name), None);
    emit_terminal(doc, &id, to, &format!("{}:2", name), None);
}

/// A power electronics unit and its connection, in the shape the battery
/// and PV queries read.
struct PowerElectronics<'a> {
    unit_kind: &'static str,
    name: &'a str,
    phases: &'a [Phase],
    max_p: f64,
    p: f64,
    q: f64,
    rated_s: f64,
}

fn emit_power_electronics(
    doc: &mut CimDocument,
    unit: Element,
    pe: PowerElectronics<'_>,
    bus: &DistributionBus,
) {
    let unit_id = unit.id().to_string();
    doc.push(unit);

    let key = format!("{}:{}", pe.unit_kind, pe.name);
    let id = deterministic_id("power_electronics_connection", &key);
    let mut connection = Element::identified("PowerElectronicsConnection", &id, pe.name);
    place(doc, &mut connection, bus);
    connection
        .reference("PowerElectronicsConnection.PowerElectronicsUnit", &unit_id)
        .literal("PowerElectronicsConnection.maxP", pe.max_p)
        .literal("PowerElectronicsConnection.p", pe.p)
        .literal("PowerElectronicsConnection.q", pe.q)
        .literal("PowerElectronicsConnection.ratedS", pe.rated_s);
    doc.push(connection);

    emit_phases(doc, &CONNECTION_PHASES, &key, &id, pe.phases);
    emit_terminal(doc, &id, &bus.name, &format!("{}:1", pe.name), None);
}

fn emit_battery(doc: &mut CimDocument, battery: &DistributionBattery, bus: &DistributionBus) {
    let unit_id = deterministic_id("battery_unit", &battery.name);
    let mut unit = Element::identified("BatteryUnit", &unit_id, &battery.name);
    unit.literal("BatteryUnit.ratedE", battery.equipment.rated_energy)
        .literal("BatteryUnit.storedE", battery.equipment.rated_energy);
    emit_power_electronics(
        doc,
        unit,
        PowerElectronics {
            unit_kind: "battery",
            name: &battery.name,
            phases: &battery.phases,
            max_p: battery.equipment.rated_power,
            p: battery.active_power,
            q: battery.reactive_power,
            rated_s: battery.inverter.rated_apparent_power,
        },
        bus,
    );
}

fn emit_solar(doc: &mut CimDocument, solar: &DistributionSolar, bus: &DistributionBus) {
    let unit_id = deterministic_id("photovoltaic_unit", &solar.name);
    let unit = Element::identified("PhotoVoltaicUnit", &unit_id, &solar.name);
    emit_power_electronics(
        doc,
        unit,
        PowerElectronics {
            unit_kind: "solar",
            name: &solar.name,
            phases: &solar.phases,
            max_p: solar.equipment.rated_power,
            p: solar.active_power,
            q: solar.reactive_power,
            rated_s: solar.inverter.rated_apparent_power,
        },
        bus,
    );
}

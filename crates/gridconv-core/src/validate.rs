//! Post-construction checks over a whole system.
//!
//! Every component is checked against its own constraints and every issue
//! is collected before reporting, so one run shows all violations.

use std::fmt;

use serde::Serialize;

use crate::error::{GridError, GridResult};
use crate::model::*;
use crate::system::System;

/// One constraint violation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationIssue {
    pub name: String,
    pub kind: String,
    pub field: String,
    /// Short error class (e.g. `value_error`, `missing_reference`)
    pub error: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} '{}' field '{}': {} ({})",
            self.kind, self.name, self.field, self.message, self.error
        )
    }
}

struct Checker<'a> {
    system: &'a System,
    kind: ComponentKind,
    name: &'a str,
    issues: Vec<ValidationIssue>,
}

impl<'a> Checker<'a> {
    fn new(system: &'a System, component: &'a Component) -> Self {
        Self {
            system,
            kind: component.kind(),
            name: component.name(),
            issues: Vec::new(),
        }
    }

    fn push(&mut self, field: &str, error: &str, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            name: self.name.to_string(),
            kind: self.kind.to_string(),
            field: field.to_string(),
            error: error.to_string(),
            message: message.into(),
        });
    }

    fn name(&mut self) {
        if self.name.trim().is_empty() {
            self.push("name", "value_error", "name must not be empty");
        }
    }

    fn bus_ref(&mut self, field: &str, bus: &str) {
        if !self.system.contains(ComponentKind::DistributionBus, bus) {
            self.push(
                field,
                "missing_reference",
                format!("bus '{}' is not registered", bus),
            );
        }
    }

    fn phases<T>(&mut self, field: &str, phases: &[T]) {
        if phases.is_empty() {
            self.push(field, "value_error", "phase list must not be empty");
        }
    }

    fn non_negative(&mut self, field: &str, value: f64) {
        if !value.is_finite() || value < 0.0 {
            self.push(
                field,
                "value_error",
                format!("expected a finite non-negative value, got {}", value),
            );
        }
    }

    fn positive(&mut self, field: &str, value: f64) {
        if !value.is_finite() || value <= 0.0 {
            self.push(
                field,
                "value_error",
                format!("expected a finite positive value, got {}", value),
            );
        }
    }

    fn branch(&mut self, buses: &[String], length: f64, phases: &[crate::phase::Phase], equipment: &MatrixImpedanceEquipment) {
        if buses.len() != 2 {
            self.push(
                "buses",
                "value_error",
                format!("expected 2 buses, got {}", buses.len()),
            );
        }
        for bus in buses {
            self.bus_ref("buses", bus);
        }
        self.phases("phases", phases);
        self.positive("length", length);
        self.impedance(equipment, phases.len());
    }

    fn impedance(&mut self, equipment: &MatrixImpedanceEquipment, n: usize) {
        for (field, matrix) in [
            ("equipment.r_matrix", &equipment.r_matrix),
            ("equipment.x_matrix", &equipment.x_matrix),
            ("equipment.c_matrix", &equipment.c_matrix),
        ] {
            let square = matrix.len() == n && matrix.iter().all(|row| row.len() == n);
            if !square {
                self.push(
                    field,
                    "value_error",
                    format!("matrix must be {n}x{n} to match the phase count"),
                );
            }
        }
        self.non_negative("equipment.ampacity", equipment.ampacity);
    }

    fn switch_states(&mut self, is_closed: &[bool], n: usize) {
        if is_closed.len() != n {
            self.push(
                "is_closed",
                "value_error",
                format!("expected {} switch states, got {}", n, is_closed.len()),
            );
        }
    }

    fn transformer(&mut self, buses: &[String], winding_phases: &[Vec<crate::phase::Phase>], equipment: &DistributionTransformerEquipment) {
        for bus in buses {
            self.bus_ref("buses", bus);
        }
        let windings = equipment.windings.len();
        if windings < 2 {
            self.push("equipment.windings", "value_error", "at least 2 windings required");
        }
        if buses.len() != windings {
            self.push(
                "buses",
                "value_error",
                format!("{} buses for {} windings", buses.len(), windings),
            );
        }
        if winding_phases.len() != windings {
            self.push(
                "winding_phases",
                "value_error",
                format!("{} phase lists for {} windings", winding_phases.len(), windings),
            );
        }
        for phases in winding_phases {
            self.phases("winding_phases", phases);
        }
        for winding in &equipment.windings {
            self.positive("equipment.windings.rated_voltage", winding.rated_voltage);
            self.non_negative("equipment.windings.rated_power", winding.rated_power);
            self.non_negative("equipment.windings.resistance", winding.resistance);
        }
        if equipment.coupling_sequences.len() != equipment.winding_reactances.len() {
            self.push(
                "equipment.winding_reactances",
                "value_error",
                "one reactance per coupling sequence required",
            );
        }
    }
}

/// Constraint violations of one component.
pub fn component_issues(system: &System, component: &Component) -> Vec<ValidationIssue> {
    let mut check = Checker::new(system, component);
    check.name();
    match component {
        Component::DistributionBus(bus) => {
            check.phases("phases", &bus.phases);
            check.non_negative("rated_voltage", bus.rated_voltage);
            if let Some(limits) = bus.voltage_limits {
                if limits.min > limits.max {
                    check.push("voltage_limits", "value_error", "min must not exceed max");
                }
            }
        }
        Component::DistributionVoltageSource(src) => {
            check.bus_ref("bus", &src.bus);
            check.phases("phases", &src.phases);
            if src.equipment.sources.is_empty() {
                check.push("equipment.sources", "value_error", "at least one phase source required");
            }
            for source in &src.equipment.sources {
                check.positive("equipment.sources.voltage", source.voltage);
            }
        }
        Component::DistributionLoad(load) => {
            check.bus_ref("bus", &load.bus);
            check.phases("phases", &load.phases);
            if load.equipment.phase_loads.len() != load.phases.len() {
                check.push(
                    "equipment.phase_loads",
                    "value_error",
                    format!(
                        "{} phase loads for {} phases",
                        load.equipment.phase_loads.len(),
                        load.phases.len()
                    ),
                );
            }
        }
        Component::MatrixImpedanceBranchEquipment(eq) => {
            let n = eq.phase_count();
            if n == 0 {
                check.push("r_matrix", "value_error", "matrix must not be empty");
            }
            check.impedance(eq, n);
        }
        Component::MatrixImpedanceBranch(c) => check.branch(&c.buses, c.length, &c.phases, &c.equipment),
        Component::MatrixImpedanceSwitch(c) => {
            check.branch(&c.buses, c.length, &c.phases, &c.equipment);
            check.switch_states(&c.is_closed, c.phases.len());
        }
        Component::MatrixImpedanceFuse(c) => {
            check.branch(&c.buses, c.length, &c.phases, &c.equipment);
            check.switch_states(&c.is_closed, c.phases.len());
            check.non_negative("delay", c.delay);
        }
        Component::MatrixImpedanceRecloser(c) => {
            check.branch(&c.buses, c.length, &c.phases, &c.equipment);
            check.switch_states(&c.is_closed, c.phases.len());
        }
        Component::DistributionTransformer(c) => {
            check.transformer(&c.buses, &c.winding_phases, &c.equipment)
        }
        Component::DistributionRegulator(c) => {
            check.transformer(&c.buses, &c.winding_phases, &c.equipment);
            for controller in &c.controllers {
                check.bus_ref("controllers.controlled_bus", &controller.controlled_bus);
            }
        }
        Component::RegulatorController(c) => {
            check.bus_ref("controlled_bus", &c.controlled_bus);
            check.positive("pt_ratio", c.pt_ratio);
            check.non_negative("bandwidth", c.bandwidth);
        }
        Component::DistributionCapacitor(c) => {
            check.bus_ref("bus", &c.bus);
            check.phases("phases", &c.phases);
            check.positive("equipment.rated_voltage", c.equipment.rated_voltage);
            for phase in &c.equipment.phase_capacitors {
                check.non_negative("equipment.phase_capacitors.rated_reactive_power", phase.rated_reactive_power);
            }
        }
        Component::DistributionBattery(c) => {
            check.bus_ref("bus", &c.bus);
            check.phases("phases", &c.phases);
            check.non_negative("equipment.rated_energy", c.equipment.rated_energy);
            check.non_negative("equipment.rated_power", c.equipment.rated_power);
            check.non_negative("inverter.rated_apparent_power", c.inverter.rated_apparent_power);
        }
        Component::DistributionSolar(c) => {
            check.bus_ref("bus", &c.bus);
            check.phases("phases", &c.phases);
            check.non_negative("irradiance", c.irradiance);
            check.non_negative("equipment.rated_power", c.equipment.rated_power);
            check.non_negative("inverter.rated_apparent_power", c.inverter.rated_apparent_power);
        }
    }
    check.issues
}

/// Every constraint violation in the system, in registry order.
pub fn collect_issues(system: &System) -> Vec<ValidationIssue> {
    system
        .iter()
        .flat_map(|component| component_issues(system, component))
        .collect()
}

/// Fail with every violation when any component breaks its constraints.
pub fn validate(system: &System) -> GridResult<()> {
    let issues = collect_issues(system);
    if issues.is_empty() {
        Ok(())
    } else {
        Err(GridError::Validation(issues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::{Phase, THREE_PHASE};

    fn valid_system() -> System {
        let mut system = System::new("v");
        for name in ["b1", "b2"] {
            system
                .add(DistributionBus::new(name, THREE_PHASE.to_vec(), 12_470.0, VoltageType::LineToLine))
                .unwrap();
        }
        system
            .add(MatrixImpedanceBranch {
                name: "l1".into(),
                buses: vec!["b1".into(), "b2".into()],
                length: 50.0,
                phases: THREE_PHASE.to_vec(),
                equipment: MatrixImpedanceEquipment::diagonal("lc", 3, 1e-4, 1e-4, 0.0, 100.0),
            })
            .unwrap();
        system
    }

    #[test]
    fn valid_system_passes() {
        assert!(validate(&valid_system()).is_ok());
    }

    #[test]
    fn all_issues_are_reported_together() {
        let mut system = valid_system();
        system
            .add(MatrixImpedanceBranch {
                name: "bad".into(),
                buses: vec!["b1".into(), "nowhere".into()],
                length: 0.0,
                phases: vec![Phase::A, Phase::B],
                equipment: MatrixImpedanceEquipment::diagonal("lc", 3, 1e-4, 1e-4, 0.0, 100.0),
            })
            .unwrap();

        let issues = collect_issues(&system);
        let fields: Vec<&str> = issues.iter().map(|i| i.field.as_str()).collect();
        assert!(fields.contains(&"buses"));
        assert!(fields.contains(&"length"));
        assert!(fields.contains(&"equipment.r_matrix"));
        assert!(issues.iter().all(|i| i.name == "bad"));

        let err = validate(&system).unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with(&format!("{} validation error(s):", issues.len())));
        assert!(text.contains("bus 'nowhere' is not registered"));
    }

    #[test]
    fn load_phase_count_must_match() {
        let mut system = valid_system();
        system
            .add(DistributionLoad {
                name: "ld".into(),
                bus: "b1".into(),
                phases: vec![Phase::A, Phase::B],
                equipment: LoadEquipment {
                    name: "ld_equipment".into(),
                    phase_loads: vec![PhaseLoad::constant_power(1.0, 0.0)],
                    connection_type: ConnectionType::Star,
                },
            })
            .unwrap();
        let issues = collect_issues(&system);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "equipment.phase_loads");
        assert_eq!(
            issues[0].to_string(),
            "DistributionLoad 'ld' field 'equipment.phase_loads': 1 phase loads for 2 phases (value_error)"
        );
    }
}

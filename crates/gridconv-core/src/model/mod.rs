//! Canonical distribution model.
//!
//! Every format converts through these types. [`Component`] is the closed
//! set of registrable kinds; [`ComponentKind`] is its discriminant and
//! carries the stable names used in logs, JSON snapshots and registries.

pub mod bus;
pub mod components;
pub mod controllers;
pub mod equipment;
pub mod geometry;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GridError;
use crate::phase::{Phase, THREE_PHASE};

pub use bus::DistributionBus;
pub use components::*;
pub use controllers::*;
pub use equipment::*;
pub use geometry::{geometry_impedance, Conductor, PlacedConductor};

/// Ratio between line-to-line and line-to-ground magnitudes.
pub const LINE_TO_LINE_FACTOR: f64 = 1.732;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoltageType {
    #[default]
    LineToLine,
    LineToGround,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionType {
    #[default]
    Star,
    Delta,
}

impl ConnectionType {
    /// Single-letter code used by CIM `connectionKind`.
    pub fn cim_code(&self) -> &'static str {
        match self {
            ConnectionType::Star => "Y",
            ConnectionType::Delta => "D",
        }
    }

    /// `D`/`delta` map to [`ConnectionType::Delta`]; anything else is star.
    pub fn from_code(code: &str) -> Self {
        let code = code.trim();
        if code.eq_ignore_ascii_case("d") || code.eq_ignore_ascii_case("delta") {
            ConnectionType::Delta
        } else {
            ConnectionType::Star
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f64,
}

/// Operating voltage band, volts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoltageLimits {
    pub min: f64,
    pub max: f64,
}

/// Discriminant of [`Component`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ComponentKind {
    DistributionBus,
    DistributionVoltageSource,
    DistributionLoad,
    MatrixImpedanceBranchEquipment,
    MatrixImpedanceBranch,
    MatrixImpedanceSwitch,
    MatrixImpedanceFuse,
    MatrixImpedanceRecloser,
    DistributionTransformer,
    DistributionRegulator,
    RegulatorController,
    DistributionCapacitor,
    DistributionBattery,
    DistributionSolar,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 14] = [
        ComponentKind::DistributionBus,
        ComponentKind::DistributionVoltageSource,
        ComponentKind::DistributionLoad,
        ComponentKind::MatrixImpedanceBranchEquipment,
        ComponentKind::MatrixImpedanceBranch,
        ComponentKind::MatrixImpedanceSwitch,
        ComponentKind::MatrixImpedanceFuse,
        ComponentKind::MatrixImpedanceRecloser,
        ComponentKind::DistributionTransformer,
        ComponentKind::DistributionRegulator,
        ComponentKind::RegulatorController,
        ComponentKind::DistributionCapacitor,
        ComponentKind::DistributionBattery,
        ComponentKind::DistributionSolar,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::DistributionBus => "DistributionBus",
            ComponentKind::DistributionVoltageSource => "DistributionVoltageSource",
            ComponentKind::DistributionLoad => "DistributionLoad",
            ComponentKind::MatrixImpedanceBranchEquipment => "MatrixImpedanceBranchEquipment",
            ComponentKind::MatrixImpedanceBranch => "MatrixImpedanceBranch",
            ComponentKind::MatrixImpedanceSwitch => "MatrixImpedanceSwitch",
            ComponentKind::MatrixImpedanceFuse => "MatrixImpedanceFuse",
            ComponentKind::MatrixImpedanceRecloser => "MatrixImpedanceRecloser",
            ComponentKind::DistributionTransformer => "DistributionTransformer",
            ComponentKind::DistributionRegulator => "DistributionRegulator",
            ComponentKind::RegulatorController => "RegulatorController",
            ComponentKind::DistributionCapacitor => "DistributionCapacitor",
            ComponentKind::DistributionBattery => "DistributionBattery",
            ComponentKind::DistributionSolar => "DistributionSolar",
        }
    }

    /// `MatrixImpedanceBranch` -> `matrix_impedance_branch`, used in file names.
    pub fn snake_name(&self) -> String {
        let mut out = String::new();
        for (i, c) in self.as_str().chars().enumerate() {
            if c.is_ascii_uppercase() {
                if i > 0 {
                    out.push('_');
                }
                out.push(c.to_ascii_lowercase());
            } else {
                out.push(c);
            }
        }
        out
    }

    /// Kinds whose terminals sit at different voltage levels.
    pub fn is_transformer_like(&self) -> bool {
        matches!(
            self,
            ComponentKind::DistributionTransformer | ComponentKind::DistributionRegulator
        )
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComponentKind {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ComponentKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s) || kind.snake_name() == s)
            .ok_or_else(|| GridError::Parse(format!("unknown component kind '{}'", s)))
    }
}

/// Any registrable element of a [`crate::System`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Component {
    DistributionBus(DistributionBus),
    DistributionVoltageSource(DistributionVoltageSource),
    DistributionLoad(DistributionLoad),
    MatrixImpedanceBranchEquipment(MatrixImpedanceEquipment),
    MatrixImpedanceBranch(MatrixImpedanceBranch),
    MatrixImpedanceSwitch(MatrixImpedanceSwitch),
    MatrixImpedanceFuse(MatrixImpedanceFuse),
    MatrixImpedanceRecloser(MatrixImpedanceRecloser),
    DistributionTransformer(DistributionTransformer),
    DistributionRegulator(DistributionRegulator),
    RegulatorController(RegulatorController),
    DistributionCapacitor(DistributionCapacitor),
    DistributionBattery(DistributionBattery),
    DistributionSolar(DistributionSolar),
}

macro_rules! for_each_variant {
    ($value:expr, $inner:ident => $body:expr) => {
        match $value {
            Component::DistributionBus($inner) => $body,
            Component::DistributionVoltageSource($inner) => $body,
            Component::DistributionLoad($inner) => $body,
            Component::MatrixImpedanceBranchEquipment($inner) => $body,
            Component::MatrixImpedanceBranch($inner) => $body,
            Component::MatrixImpedanceSwitch($inner) => $body,
            Component::MatrixImpedanceFuse($inner) => $body,
            Component::MatrixImpedanceRecloser($inner) => $body,
            Component::DistributionTransformer($inner) => $body,
            Component::DistributionRegulator($inner) => $body,
            Component::RegulatorController($inner) => $body,
            Component::DistributionCapacitor($inner) => $body,
            Component::DistributionBattery($inner) => $body,
            Component::DistributionSolar($inner) => $body,
        }
    };
}

impl Component {
    pub fn kind(&self) -> ComponentKind {
        match self {
            Component::DistributionBus(_) => ComponentKind::DistributionBus,
            Component::DistributionVoltageSource(_) => ComponentKind::DistributionVoltageSource,
            Component::DistributionLoad(_) => ComponentKind::DistributionLoad,
            Component::MatrixImpedanceBranchEquipment(_) => {
                ComponentKind::MatrixImpedanceBranchEquipment
            }
            Component::MatrixImpedanceBranch(_) => ComponentKind::MatrixImpedanceBranch,
            Component::MatrixImpedanceSwitch(_) => ComponentKind::MatrixImpedanceSwitch,
            Component::MatrixImpedanceFuse(_) => ComponentKind::MatrixImpedanceFuse,
            Component::MatrixImpedanceRecloser(_) => ComponentKind::MatrixImpedanceRecloser,
            Component::DistributionTransformer(_) => ComponentKind::DistributionTransformer,
            Component::DistributionRegulator(_) => ComponentKind::DistributionRegulator,
            Component::RegulatorController(_) => ComponentKind::RegulatorController,
            Component::DistributionCapacitor(_) => ComponentKind::DistributionCapacitor,
            Component::DistributionBattery(_) => ComponentKind::DistributionBattery,
            Component::DistributionSolar(_) => ComponentKind::DistributionSolar,
        }
    }

    pub fn name(&self) -> &str {
        for_each_variant!(self, c => c.name.as_str())
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        for_each_variant!(self, c => c.name = name)
    }

    /// Bus names this component attaches to, in terminal order.
    ///
    /// Empty for buses themselves, standalone equipment and controllers.
    pub fn buses(&self) -> Vec<&str> {
        match self {
            Component::DistributionVoltageSource(c) => vec![c.bus.as_str()],
            Component::DistributionLoad(c) => vec![c.bus.as_str()],
            Component::DistributionCapacitor(c) => vec![c.bus.as_str()],
            Component::DistributionBattery(c) => vec![c.bus.as_str()],
            Component::DistributionSolar(c) => vec![c.bus.as_str()],
            Component::MatrixImpedanceBranch(c) => c.buses.iter().map(String::as_str).collect(),
            Component::MatrixImpedanceSwitch(c) => c.buses.iter().map(String::as_str).collect(),
            Component::MatrixImpedanceFuse(c) => c.buses.iter().map(String::as_str).collect(),
            Component::MatrixImpedanceRecloser(c) => c.buses.iter().map(String::as_str).collect(),
            Component::DistributionTransformer(c) => c.buses.iter().map(String::as_str).collect(),
            Component::DistributionRegulator(c) => c.buses.iter().map(String::as_str).collect(),
            Component::DistributionBus(_)
            | Component::MatrixImpedanceBranchEquipment(_)
            | Component::RegulatorController(_) => Vec::new(),
        }
    }

    pub fn buses_mut(&mut self) -> Vec<&mut String> {
        match self {
            Component::DistributionVoltageSource(c) => vec![&mut c.bus],
            Component::DistributionLoad(c) => vec![&mut c.bus],
            Component::DistributionCapacitor(c) => vec![&mut c.bus],
            Component::DistributionBattery(c) => vec![&mut c.bus],
            Component::DistributionSolar(c) => vec![&mut c.bus],
            Component::MatrixImpedanceBranch(c) => c.buses.iter_mut().collect(),
            Component::MatrixImpedanceSwitch(c) => c.buses.iter_mut().collect(),
            Component::MatrixImpedanceFuse(c) => c.buses.iter_mut().collect(),
            Component::MatrixImpedanceRecloser(c) => c.buses.iter_mut().collect(),
            Component::DistributionTransformer(c) => c.buses.iter_mut().collect(),
            Component::DistributionRegulator(c) => c.buses.iter_mut().collect(),
            Component::DistributionBus(_)
            | Component::MatrixImpedanceBranchEquipment(_)
            | Component::RegulatorController(_) => Vec::new(),
        }
    }

    /// Whether this component is a device placed on at least one bus.
    pub fn is_device(&self) -> bool {
        !self.buses().is_empty()
    }

    /// Phases carried at terminal `terminal`.
    pub fn terminal_phases(&self, terminal: usize) -> &[Phase] {
        match self {
            Component::DistributionVoltageSource(c) => &c.phases,
            Component::DistributionLoad(c) => &c.phases,
            Component::DistributionCapacitor(c) => &c.phases,
            Component::DistributionBattery(c) => &c.phases,
            Component::DistributionSolar(c) => &c.phases,
            Component::MatrixImpedanceBranch(c) => &c.phases,
            Component::MatrixImpedanceSwitch(c) => &c.phases,
            Component::MatrixImpedanceFuse(c) => &c.phases,
            Component::MatrixImpedanceRecloser(c) => &c.phases,
            Component::DistributionTransformer(c) => winding_phases(&c.winding_phases, terminal),
            Component::DistributionRegulator(c) => winding_phases(&c.winding_phases, terminal),
            Component::DistributionBus(c) => &c.phases,
            Component::MatrixImpedanceBranchEquipment(_) | Component::RegulatorController(_) => {
                &THREE_PHASE
            }
        }
    }

    /// Transformer equipment of transformer-like devices.
    pub fn transformer_equipment(&self) -> Option<&DistributionTransformerEquipment> {
        match self {
            Component::DistributionTransformer(c) => Some(&c.equipment),
            Component::DistributionRegulator(c) => Some(&c.equipment),
            _ => None,
        }
    }

    /// Impedance equipment of branches and switching devices.
    pub fn impedance_equipment(&self) -> Option<&MatrixImpedanceEquipment> {
        match self {
            Component::MatrixImpedanceBranchEquipment(c) => Some(c),
            Component::MatrixImpedanceBranch(c) => Some(&c.equipment),
            Component::MatrixImpedanceSwitch(c) => Some(&c.equipment),
            Component::MatrixImpedanceFuse(c) => Some(&c.equipment),
            Component::MatrixImpedanceRecloser(c) => Some(&c.equipment),
            _ => None,
        }
    }

    pub fn as_bus(&self) -> Option<&DistributionBus> {
        match self {
            Component::DistributionBus(bus) => Some(bus),
            _ => None,
        }
    }

    pub fn as_bus_mut(&mut self) -> Option<&mut DistributionBus> {
        match self {
            Component::DistributionBus(bus) => Some(bus),
            _ => None,
        }
    }
}

fn winding_phases(phases: &[Vec<Phase>], terminal: usize) -> &[Phase] {
    phases
        .get(terminal)
        .or_else(|| phases.first())
        .map(Vec::as_slice)
        .unwrap_or(&THREE_PHASE)
}

macro_rules! impl_from_component {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Component {
                fn from(value: $ty) -> Self {
                    Component::$variant(value)
                }
            }
        )*
    };
}

impl_from_component! {
    DistributionBus => DistributionBus,
    DistributionVoltageSource => DistributionVoltageSource,
    DistributionLoad => DistributionLoad,
    MatrixImpedanceBranchEquipment => MatrixImpedanceEquipment,
    MatrixImpedanceBranch => MatrixImpedanceBranch,
    MatrixImpedanceSwitch => MatrixImpedanceSwitch,
    MatrixImpedanceFuse => MatrixImpedanceFuse,
    MatrixImpedanceRecloser => MatrixImpedanceRecloser,
    DistributionTransformer => DistributionTransformer,
    DistributionRegulator => DistributionRegulator,
    RegulatorController => RegulatorController,
    DistributionCapacitor => DistributionCapacitor,
    DistributionBattery => DistributionBattery,
    DistributionSolar => DistributionSolar,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(name: &str, a: &str, b: &str) -> Component {
        Component::MatrixImpedanceBranch(MatrixImpedanceBranch {
            name: name.into(),
            buses: vec![a.into(), b.into()],
            length: 10.0,
            phases: THREE_PHASE.to_vec(),
            equipment: MatrixImpedanceEquipment::diagonal("lc", 3, 1e-4, 2e-4, 0.0, 400.0),
        })
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in ComponentKind::ALL {
            assert_eq!(kind.as_str().parse::<ComponentKind>().unwrap(), kind);
            assert_eq!(kind.snake_name().parse::<ComponentKind>().unwrap(), kind);
        }
        assert_eq!(
            ComponentKind::MatrixImpedanceBranch.snake_name(),
            "matrix_impedance_branch"
        );
        assert!("Generator".parse::<ComponentKind>().is_err());
    }

    #[test]
    fn bus_accessors_follow_terminal_order() {
        let mut line = branch("l1", "b1", "b2");
        assert_eq!(line.buses(), vec!["b1", "b2"]);
        *line.buses_mut()[1] = "b3".to_string();
        assert_eq!(line.buses(), vec!["b1", "b3"]);
        assert!(line.is_device());

        let bus: Component = DistributionBus::new("b1", vec![Phase::A], 240.0, VoltageType::LineToGround).into();
        assert!(bus.buses().is_empty());
        assert!(bus.as_bus().is_some());
    }

    #[test]
    fn set_name_renames_inner_value() {
        let mut line = branch("l1", "b1", "b2");
        line.set_name("l1_0");
        assert_eq!(line.name(), "l1_0");
    }

    #[test]
    fn json_snapshot_is_tagged_by_kind() {
        let line = branch("l1", "b1", "b2");
        let json = serde_json::to_value(&line).unwrap();
        assert_eq!(json["kind"], "MatrixImpedanceBranch");
        let back: Component = serde_json::from_value(json).unwrap();
        assert_eq!(back, line);
    }

    #[test]
    fn connection_codes() {
        assert_eq!(ConnectionType::from_code("D"), ConnectionType::Delta);
        assert_eq!(ConnectionType::from_code("Yn"), ConnectionType::Star);
        assert_eq!(ConnectionType::Delta.cim_code(), "D");
    }
}

//! Devices placed on buses.
//!
//! Single-terminal devices hold one `bus`; branches, switching devices and
//! transformers hold an ordered `buses` list. Bus references are names
//! resolved through [`crate::System`].

use serde::{Deserialize, Serialize};

use super::controllers::{RecloserController, RegulatorController, VoltageCapacitorController};
use super::equipment::{
    BatteryEquipment, CapacitorEquipment, DistributionTransformerEquipment, InverterEquipment,
    LoadEquipment, MatrixImpedanceEquipment, SolarEquipment, VoltageSourceEquipment,
};
use crate::phase::Phase;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionVoltageSource {
    pub name: String,
    pub bus: String,
    pub phases: Vec<Phase>,
    pub equipment: VoltageSourceEquipment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionLoad {
    pub name: String,
    pub bus: String,
    pub phases: Vec<Phase>,
    pub equipment: LoadEquipment,
}

/// Line or cable section described by per-length matrices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixImpedanceBranch {
    pub name: String,
    pub buses: Vec<String>,
    /// Metres
    pub length: f64,
    pub phases: Vec<Phase>,
    pub equipment: MatrixImpedanceEquipment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixImpedanceSwitch {
    pub name: String,
    pub buses: Vec<String>,
    pub length: f64,
    pub phases: Vec<Phase>,
    pub equipment: MatrixImpedanceEquipment,
    /// Per phase
    pub is_closed: Vec<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixImpedanceFuse {
    pub name: String,
    pub buses: Vec<String>,
    pub length: f64,
    pub phases: Vec<Phase>,
    pub equipment: MatrixImpedanceEquipment,
    pub is_closed: Vec<bool>,
    /// Seconds
    #[serde(default)]
    pub delay: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixImpedanceRecloser {
    pub name: String,
    pub buses: Vec<String>,
    pub length: f64,
    pub phases: Vec<Phase>,
    pub equipment: MatrixImpedanceEquipment,
    pub is_closed: Vec<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controller: Option<RecloserController>,
}

/// Transformer with one bus and one phase list per winding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionTransformer {
    pub name: String,
    pub buses: Vec<String>,
    pub winding_phases: Vec<Vec<Phase>>,
    pub equipment: DistributionTransformerEquipment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionRegulator {
    pub name: String,
    pub buses: Vec<String>,
    pub winding_phases: Vec<Vec<Phase>>,
    pub equipment: DistributionTransformerEquipment,
    #[serde(default)]
    pub controllers: Vec<RegulatorController>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionCapacitor {
    pub name: String,
    pub bus: String,
    pub phases: Vec<Phase>,
    pub equipment: CapacitorEquipment,
    #[serde(default)]
    pub controllers: Vec<VoltageCapacitorController>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionBattery {
    pub name: String,
    pub bus: String,
    pub phases: Vec<Phase>,
    /// Dispatch setpoint, W
    pub active_power: f64,
    pub reactive_power: f64,
    pub equipment: BatteryEquipment,
    pub inverter: InverterEquipment,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionSolar {
    pub name: String,
    pub bus: String,
    pub phases: Vec<Phase>,
    /// W/m^2
    pub irradiance: f64,
    pub active_power: f64,
    pub reactive_power: f64,
    pub equipment: SolarEquipment,
    pub inverter: InverterEquipment,
}

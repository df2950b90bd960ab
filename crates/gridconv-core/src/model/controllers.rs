use serde::{Deserialize, Serialize};

use crate::phase::Phase;

/// Tap-changer control of a regulator.
///
/// Voltages are on the 120 V PT secondary base; `ldc_r`/`ldc_x` are line
/// drop compensator settings in volts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatorController {
    pub name: String,
    /// Seconds
    pub delay: f64,
    pub v_setpoint: f64,
    pub bandwidth: f64,
    pub pt_ratio: f64,
    pub ct_primary: f64,
    pub use_ldc: bool,
    pub ldc_r: f64,
    pub ldc_x: f64,
    pub is_reversible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_v_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_v_limit: Option<f64>,
    pub controlled_bus: String,
    pub controlled_phase: Phase,
}

impl RegulatorController {
    /// Controller with a 120 V setpoint and 2 V band on `bus`.
    pub fn with_defaults(name: impl Into<String>, bus: impl Into<String>, phase: Phase) -> Self {
        Self {
            name: name.into(),
            delay: 15.0,
            v_setpoint: 120.0,
            bandwidth: 2.0,
            pt_ratio: 60.0,
            ct_primary: 300.0,
            use_ldc: false,
            ldc_r: 0.0,
            ldc_x: 0.0,
            is_reversible: false,
            max_v_limit: None,
            min_v_limit: None,
            controlled_bus: bus.into(),
            controlled_phase: phase,
        }
    }
}

/// Voltage-switched capacitor control.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoltageCapacitorController {
    pub name: String,
    pub delay: f64,
    pub on_voltage: f64,
    pub off_voltage: f64,
    pub pt_ratio: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub controlled_bus: Option<String>,
    pub controlled_phase: Phase,
}

/// Reclosing sequence of a recloser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecloserController {
    pub name: String,
    /// Seconds between shots
    pub delays: Vec<f64>,
    pub num_shots: u32,
    pub reset_time: f64,
}

impl RecloserController {
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            delays: vec![0.5, 2.0, 2.0],
            num_shots: 4,
            reset_time: 15.0,
        }
    }
}

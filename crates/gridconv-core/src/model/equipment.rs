//! Equipment records shared by value between components.
//!
//! All quantities are SI: ohm/m and F/m for per-length matrices, volts,
//! volt-amperes, watts, vars, watt-hours and amperes. Winding resistance and
//! reactances are percentages on the winding base.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use super::{ConnectionType, VoltageType, LINE_TO_LINE_FACTOR};
use crate::error::{GridError, GridResult};

/// System frequency assumed when converting susceptance to capacitance.
pub const SYSTEM_FREQUENCY_HZ: f64 = 60.0;

/// Per-length impedance of lines, cables and switching devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixImpedanceEquipment {
    pub name: String,
    pub r_matrix: Vec<Vec<f64>>,
    pub x_matrix: Vec<Vec<f64>>,
    pub c_matrix: Vec<Vec<f64>>,
    pub ampacity: f64,
}

impl MatrixImpedanceEquipment {
    pub fn phase_count(&self) -> usize {
        self.r_matrix.len()
    }

    /// Diagonal matrices of size `n` with zero mutual terms.
    pub fn diagonal(name: impl Into<String>, n: usize, r: f64, x: f64, c: f64, ampacity: f64) -> Self {
        Self {
            name: name.into(),
            r_matrix: diagonal_matrix(n, r),
            x_matrix: diagonal_matrix(n, x),
            c_matrix: diagonal_matrix(n, c),
            ampacity,
        }
    }

    /// Phase-frame matrices from sequence impedances.
    ///
    /// Self terms are `(2 Z1 + Z0) / 3`, mutual terms `(Z0 - Z1) / 3`; the
    /// same reduction applies to the shunt susceptances, which are turned
    /// into capacitance at [`SYSTEM_FREQUENCY_HZ`].
    #[allow(clippy::too_many_arguments)]
    pub fn from_sequence(
        name: impl Into<String>,
        n: usize,
        r1: f64,
        x1: f64,
        r0: f64,
        x0: f64,
        b1: f64,
        b0: f64,
        ampacity: f64,
    ) -> Self {
        let omega = 2.0 * PI * SYSTEM_FREQUENCY_HZ;
        let (rs, rm) = self_and_mutual(r1, r0, n);
        let (xs, xm) = self_and_mutual(x1, x0, n);
        let (bs, bm) = self_and_mutual(b1, b0, n);
        Self {
            name: name.into(),
            r_matrix: symmetric_matrix(n, rs, rm),
            x_matrix: symmetric_matrix(n, xs, xm),
            c_matrix: symmetric_matrix(n, bs / omega, bm / omega),
            ampacity,
        }
    }

    /// Rebuild full matrices from row-major lower triangles.
    ///
    /// `b` is shunt susceptance per metre; it is stored as capacitance.
    pub fn from_lower_triangles(
        name: impl Into<String>,
        n: usize,
        r: &[f64],
        x: &[f64],
        b: &[f64],
        ampacity: f64,
    ) -> GridResult<Self> {
        let name = name.into();
        let omega = 2.0 * PI * SYSTEM_FREQUENCY_HZ;
        let c: Vec<f64> = b.iter().map(|value| value / omega).collect();
        Ok(Self {
            r_matrix: expand_lower_triangle(&name, n, r)?,
            x_matrix: expand_lower_triangle(&name, n, x)?,
            c_matrix: expand_lower_triangle(&name, n, &c)?,
            name,
            ampacity,
        })
    }

    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Row-major lower triangle of a matrix (`r[0][0], r[1][0], r[1][1], ...`).
    pub fn lower_triangle(matrix: &[Vec<f64>]) -> Vec<f64> {
        let mut out = Vec::new();
        for (row, values) in matrix.iter().enumerate() {
            for value in values.iter().take(row + 1) {
                out.push(*value);
            }
        }
        out
    }

    /// Mean of the resistance diagonal, ohm/m.
    pub fn mean_self_resistance(&self) -> f64 {
        mean_diagonal(&self.r_matrix)
    }

    /// Mean of the reactance diagonal, ohm/m.
    pub fn mean_self_reactance(&self) -> f64 {
        mean_diagonal(&self.x_matrix)
    }
}

fn self_and_mutual(z1: f64, z0: f64, n: usize) -> (f64, f64) {
    if n == 1 {
        (z1, 0.0)
    } else {
        ((2.0 * z1 + z0) / 3.0, (z0 - z1) / 3.0)
    }
}

fn diagonal_matrix(n: usize, value: f64) -> Vec<Vec<f64>> {
    symmetric_matrix(n, value, 0.0)
}

fn symmetric_matrix(n: usize, diagonal: f64, off_diagonal: f64) -> Vec<Vec<f64>> {
    (0..n)
        .map(|i| {
            (0..n)
                .map(|j| if i == j { diagonal } else { off_diagonal })
                .collect()
        })
        .collect()
}

fn expand_lower_triangle(name: &str, n: usize, values: &[f64]) -> GridResult<Vec<Vec<f64>>> {
    let expected = n * (n + 1) / 2;
    if values.len() != expected {
        return Err(GridError::Parse(format!(
            "equipment '{}' expects {} lower-triangle values for {} phases, found {}",
            name,
            expected,
            n,
            values.len()
        )));
    }
    let mut matrix = vec![vec![0.0; n]; n];
    let mut k = 0;
    for i in 0..n {
        for j in 0..=i {
            matrix[i][j] = values[k];
            matrix[j][i] = values[k];
            k += 1;
        }
    }
    Ok(matrix)
}

fn mean_diagonal(matrix: &[Vec<f64>]) -> f64 {
    if matrix.is_empty() {
        return 0.0;
    }
    let sum: f64 = matrix
        .iter()
        .enumerate()
        .filter_map(|(i, row)| row.get(i))
        .sum();
    sum / matrix.len() as f64
}

/// One side of a transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindingEquipment {
    pub name: String,
    pub rated_voltage: f64,
    pub voltage_type: VoltageType,
    pub rated_power: f64,
    pub connection_type: ConnectionType,
    /// Percent on the winding base
    pub resistance: f64,
    pub is_grounded: bool,
    pub num_phases: usize,
    /// Per-unit tap per phase
    pub tap_positions: Vec<f64>,
    pub total_taps: i32,
    pub min_tap_pu: f64,
    pub max_tap_pu: f64,
}

impl WindingEquipment {
    /// Winding voltage expressed line-to-line.
    pub fn line_to_line_voltage(&self) -> f64 {
        match self.voltage_type {
            VoltageType::LineToLine => self.rated_voltage,
            VoltageType::LineToGround if self.num_phases > 1 => {
                self.rated_voltage * LINE_TO_LINE_FACTOR
            }
            VoltageType::LineToGround => self.rated_voltage,
        }
    }

    /// Base impedance `V_ll^2 / S` in ohm, zero for an unrated winding.
    pub fn base_impedance(&self) -> f64 {
        if self.rated_power <= 0.0 {
            return 0.0;
        }
        self.line_to_line_voltage().powi(2) / self.rated_power
    }

    pub fn resistance_ohm(&self) -> f64 {
        self.resistance / 100.0 * self.base_impedance()
    }
}

/// Tap range of a winding derived from raw step data.
///
/// Missing fields fall back to normal 0, max 16, min -16 and 0.625 % per
/// step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TapSettings {
    pub normal_step: f64,
    pub max_step: f64,
    pub min_step: f64,
    /// Percent voltage change per step
    pub step_percent: f64,
}

impl TapSettings {
    pub const DEFAULT_NORMAL: f64 = 0.0;
    pub const DEFAULT_MAX: f64 = 16.0;
    pub const DEFAULT_MIN: f64 = -16.0;
    pub const DEFAULT_STEP_PERCENT: f64 = 0.625;

    pub fn new(
        normal_step: Option<f64>,
        max_step: Option<f64>,
        min_step: Option<f64>,
        step_percent: Option<f64>,
    ) -> Self {
        Self {
            normal_step: normal_step.unwrap_or(Self::DEFAULT_NORMAL),
            max_step: max_step.unwrap_or(Self::DEFAULT_MAX),
            min_step: min_step.unwrap_or(Self::DEFAULT_MIN),
            step_percent: step_percent.unwrap_or(Self::DEFAULT_STEP_PERCENT),
        }
    }

    fn step_pu(&self) -> f64 {
        self.step_percent / 100.0
    }

    pub fn total_taps(&self) -> i32 {
        (self.max_step - self.min_step).round() as i32
    }

    pub fn tap_pu(&self) -> f64 {
        1.0 + self.normal_step * self.step_pu()
    }

    pub fn max_tap_pu(&self) -> f64 {
        1.0 + self.max_step * self.step_pu()
    }

    pub fn min_tap_pu(&self) -> f64 {
        1.0 + self.min_step * self.step_pu()
    }
}

impl Default for TapSettings {
    fn default() -> Self {
        Self::new(None, None, None, None)
    }
}

/// Integer tap steps recovered from per-unit tap data, for writers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TapSteps {
    pub step_percent: f64,
    pub high_step: i32,
    pub low_step: i32,
    pub normal_step: i32,
}

impl TapSteps {
    const FALLBACK_STEP_PU: f64 = 0.00625;

    pub fn from_winding(winding: &WindingEquipment) -> Self {
        let total = if winding.total_taps > 0 {
            winding.total_taps
        } else {
            32
        };
        let tap = winding.tap_positions.first().copied().unwrap_or(1.0);
        let mut step_pu = (winding.max_tap_pu - winding.min_tap_pu) / total as f64;
        if step_pu <= 0.0 || !step_pu.is_finite() {
            step_pu = Self::FALLBACK_STEP_PU;
        }
        Self {
            step_percent: step_pu * 100.0,
            high_step: ((winding.max_tap_pu - 1.0) / step_pu).round() as i32,
            low_step: ((winding.min_tap_pu - 1.0) / step_pu).round() as i32,
            normal_step: ((tap - 1.0) / step_pu).round() as i32,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionTransformerEquipment {
    pub name: String,
    pub windings: Vec<WindingEquipment>,
    /// Winding index pairs the reactances apply to
    pub coupling_sequences: Vec<[usize; 2]>,
    /// Percent reactance per coupling
    pub winding_reactances: Vec<f64>,
    pub pct_no_load_loss: f64,
    pub pct_full_load_loss: f64,
    #[serde(default)]
    pub is_center_tapped: bool,
}

impl DistributionTransformerEquipment {
    pub fn rated_power(&self) -> f64 {
        self.windings
            .first()
            .map(|w| w.rated_power)
            .unwrap_or_default()
    }
}

/// ZIP load definition for one phase. ZIP fractions sum to 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseLoad {
    pub real_power: f64,
    pub reactive_power: f64,
    pub z_real: f64,
    pub i_real: f64,
    pub p_real: f64,
    pub z_imag: f64,
    pub i_imag: f64,
    pub p_imag: f64,
}

impl PhaseLoad {
    /// Constant-power load.
    pub fn constant_power(real_power: f64, reactive_power: f64) -> Self {
        Self {
            real_power,
            reactive_power,
            z_real: 0.0,
            i_real: 0.0,
            p_real: 1.0,
            z_imag: 0.0,
            i_imag: 0.0,
            p_imag: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadEquipment {
    pub name: String,
    pub phase_loads: Vec<PhaseLoad>,
    pub connection_type: ConnectionType,
}

impl LoadEquipment {
    pub fn total_real_power(&self) -> f64 {
        self.phase_loads.iter().map(|p| p.real_power).sum()
    }

    pub fn total_reactive_power(&self) -> f64 {
        self.phase_loads.iter().map(|p| p.reactive_power).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseCapacitor {
    pub rated_reactive_power: f64,
    pub num_banks: u32,
    pub num_banks_on: u32,
    #[serde(default)]
    pub resistance: f64,
    #[serde(default)]
    pub reactance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacitorEquipment {
    pub name: String,
    pub phase_capacitors: Vec<PhaseCapacitor>,
    pub rated_voltage: f64,
    pub voltage_type: VoltageType,
    pub connection_type: ConnectionType,
}

impl CapacitorEquipment {
    pub fn total_reactive_power(&self) -> f64 {
        self.phase_capacitors
            .iter()
            .map(|p| p.rated_reactive_power)
            .sum()
    }
}

/// Thevenin source behind one phase. Voltage is line-to-ground, angle in
/// degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseVoltageSource {
    pub voltage: f64,
    pub angle: f64,
    pub r0: f64,
    pub r1: f64,
    pub x0: f64,
    pub x1: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoltageSourceEquipment {
    pub name: String,
    pub sources: Vec<PhaseVoltageSource>,
}

impl VoltageSourceEquipment {
    /// Balanced set of phase sources at 0, -120 and 120 degrees offset.
    pub fn balanced(
        name: impl Into<String>,
        phase_count: usize,
        phase_voltage: f64,
        angle: f64,
        impedance: [f64; 4],
    ) -> Self {
        let [r1, x1, r0, x0] = impedance;
        let sources = (0..phase_count.max(1))
            .map(|k| PhaseVoltageSource {
                voltage: phase_voltage,
                angle: angle - 120.0 * k as f64,
                r0,
                r1,
                x0,
                x1,
            })
            .collect();
        Self {
            name: name.into(),
            sources,
        }
    }

    pub fn phase_voltage(&self) -> f64 {
        self.sources.first().map(|s| s.voltage).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryEquipment {
    pub name: String,
    pub rated_energy: f64,
    pub rated_power: f64,
    pub charging_efficiency: f64,
    pub discharging_efficiency: f64,
    pub idling_efficiency: f64,
    pub rated_voltage: f64,
    pub voltage_type: VoltageType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InverterEquipment {
    pub name: String,
    pub rated_apparent_power: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rise_limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fall_limit: Option<f64>,
    pub cutin_percent: f64,
    pub cutout_percent: f64,
    pub dc_to_ac_efficiency: f64,
}

impl InverterEquipment {
    pub fn ideal(name: impl Into<String>, rated_apparent_power: f64) -> Self {
        Self {
            name: name.into(),
            rated_apparent_power,
            rise_limit: None,
            fall_limit: None,
            cutin_percent: 0.0,
            cutout_percent: 0.0,
            dc_to_ac_efficiency: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolarEquipment {
    pub name: String,
    /// DC rating at maximum power point, W
    pub rated_power: f64,
    pub resistance: f64,
    pub reactance: f64,
    pub rated_voltage: f64,
    pub voltage_type: VoltageType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_reduction_to_phase_frame() {
        let eq = MatrixImpedanceEquipment::from_sequence("lc", 3, 0.3, 0.6, 0.9, 1.2, 0.0, 0.0, 400.0);
        assert!((eq.r_matrix[0][0] - 0.5).abs() < 1e-12);
        assert!((eq.r_matrix[0][1] - 0.2).abs() < 1e-12);
        assert!((eq.x_matrix[2][2] - 0.8).abs() < 1e-12);
        assert_eq!(eq.phase_count(), 3);

        let single = MatrixImpedanceEquipment::from_sequence("lc1", 1, 0.3, 0.6, 0.9, 1.2, 0.0, 0.0, 400.0);
        assert_eq!(single.r_matrix, vec![vec![0.3]]);
    }

    #[test]
    fn lower_triangle_round_trip() {
        let eq = MatrixImpedanceEquipment::from_lower_triangles(
            "lc",
            2,
            &[1.0, 0.5, 2.0],
            &[3.0, 0.25, 4.0],
            &[0.0, 0.0, 0.0],
            100.0,
        )
        .unwrap();
        assert_eq!(eq.r_matrix, vec![vec![1.0, 0.5], vec![0.5, 2.0]]);
        assert_eq!(
            MatrixImpedanceEquipment::lower_triangle(&eq.x_matrix),
            vec![3.0, 0.25, 4.0]
        );
    }

    #[test]
    fn lower_triangle_length_is_checked() {
        let err = MatrixImpedanceEquipment::from_lower_triangles("lc", 3, &[1.0], &[1.0], &[1.0], 1.0)
            .unwrap_err();
        assert!(err.to_string().contains("expects 6 lower-triangle values"));
    }

    #[test]
    fn tap_settings_defaults() {
        let taps = TapSettings::default();
        assert_eq!(taps.total_taps(), 32);
        assert!((taps.max_tap_pu() - 1.1).abs() < 1e-12);
        assert!((taps.min_tap_pu() - 0.9).abs() < 1e-12);
        assert!((taps.tap_pu() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn tap_steps_invert_tap_settings() {
        let taps = TapSettings::new(Some(4.0), None, None, None);
        let winding = WindingEquipment {
            name: "w".into(),
            rated_voltage: 7200.0,
            voltage_type: VoltageType::LineToGround,
            rated_power: 500_000.0,
            connection_type: ConnectionType::Star,
            resistance: 0.5,
            is_grounded: false,
            num_phases: 1,
            tap_positions: vec![taps.tap_pu()],
            total_taps: taps.total_taps(),
            min_tap_pu: taps.min_tap_pu(),
            max_tap_pu: taps.max_tap_pu(),
        };
        let steps = TapSteps::from_winding(&winding);
        assert_eq!(steps.high_step, 16);
        assert_eq!(steps.low_step, -16);
        assert_eq!(steps.normal_step, 4);
        assert!((steps.step_percent - 0.625).abs() < 1e-9);
    }

    #[test]
    fn winding_line_to_line_voltage() {
        let mut winding = WindingEquipment {
            name: "w".into(),
            rated_voltage: 7200.0,
            voltage_type: VoltageType::LineToGround,
            rated_power: 1_000_000.0,
            connection_type: ConnectionType::Delta,
            resistance: 1.0,
            is_grounded: false,
            num_phases: 3,
            tap_positions: vec![1.0; 3],
            total_taps: 32,
            min_tap_pu: 0.9,
            max_tap_pu: 1.1,
        };
        assert!((winding.line_to_line_voltage() - 12_470.4).abs() < 1e-6);
        winding.num_phases = 1;
        assert_eq!(winding.line_to_line_voltage(), 7200.0);
        assert!((winding.resistance_ohm() - 0.5184).abs() < 1e-9);
    }
}

//! Overhead line impedance from conductor geometry.
//!
//! Series impedance uses the modified Carson equations with earth
//! resistivity [`EARTH_RESISTIVITY`]; shunt capacitance uses potential
//! coefficients with conductor images. Neutrals are Kron-reduced away so
//! the result is a phase-frame [`MatrixImpedanceEquipment`] in ohm/m and
//! F/m.

use std::f64::consts::PI;

use num_complex::Complex64;

use super::equipment::{MatrixImpedanceEquipment, SYSTEM_FREQUENCY_HZ};
use crate::error::{GridError, GridResult};

/// Ohm-metres
pub const EARTH_RESISTIVITY: f64 = 100.0;
/// F/m
const EPSILON_0: f64 = 8.854_187_812_8e-12;
/// Carson's constant for lengths in metres
const CARSON_CONSTANT: f64 = 6.490_479;

/// Bare conductor data in SI units.
#[derive(Debug, Clone, PartialEq)]
pub struct Conductor {
    pub name: String,
    /// Geometric mean radius, metres
    pub gmr: f64,
    /// Outside radius, metres
    pub radius: f64,
    /// AC resistance, ohm/m
    pub resistance: f64,
    pub ampacity: f64,
}

/// A conductor hung at `(x, y)`, `y` being the height above ground.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedConductor {
    pub conductor: Conductor,
    pub x: f64,
    pub y: f64,
}

impl PlacedConductor {
    fn distance(&self, other: &PlacedConductor) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    fn image_distance(&self, other: &PlacedConductor) -> f64 {
        (self.x - other.x).hypot(self.y + other.y)
    }
}

/// Phase-frame matrices for `phases` conductors over `neutrals`.
///
/// Ampacity is the smallest phase conductor rating.
pub fn geometry_impedance(
    name: impl Into<String>,
    phases: &[PlacedConductor],
    neutrals: &[PlacedConductor],
) -> GridResult<MatrixImpedanceEquipment> {
    let name = name.into();
    if phases.is_empty() {
        return Err(GridError::Other(format!(
            "line geometry '{}' has no phase conductors",
            name
        )));
    }
    let all: Vec<&PlacedConductor> = phases.iter().chain(neutrals).collect();
    check_geometry(&name, &all)?;

    let rg = PI * PI * SYSTEM_FREQUENCY_HZ * 1e-7;
    let k = 4.0 * PI * SYSTEM_FREQUENCY_HZ * 1e-7;
    let earth = 0.5 * (EARTH_RESISTIVITY / SYSTEM_FREQUENCY_HZ).ln() + CARSON_CONSTANT;
    let z: Vec<Vec<Complex64>> = all
        .iter()
        .enumerate()
        .map(|(i, a)| {
            all.iter()
                .enumerate()
                .map(|(j, b)| {
                    if i == j {
                        Complex64::new(
                            a.conductor.resistance + rg,
                            k * ((1.0 / a.conductor.gmr).ln() + earth),
                        )
                    } else {
                        Complex64::new(rg, k * ((1.0 / a.distance(b)).ln() + earth))
                    }
                })
                .collect()
        })
        .collect();

    let scale = 1.0 / (2.0 * PI * EPSILON_0);
    let p: Vec<Vec<f64>> = all
        .iter()
        .enumerate()
        .map(|(i, a)| {
            all.iter()
                .enumerate()
                .map(|(j, b)| {
                    if i == j {
                        scale * (2.0 * a.y / a.conductor.radius).ln()
                    } else {
                        scale * (a.image_distance(b) / a.distance(b)).ln()
                    }
                })
                .collect()
        })
        .collect();

    let n = phases.len();
    let z = kron_reduce(z, n);
    let c = invert(&kron_reduce(p, n)).ok_or_else(|| {
        GridError::Other(format!(
            "line geometry '{}' has a singular potential matrix",
            name
        ))
    })?;
    let ampacity = phases
        .iter()
        .map(|p| p.conductor.ampacity)
        .fold(f64::INFINITY, f64::min);

    Ok(MatrixImpedanceEquipment {
        name,
        r_matrix: z.iter().map(|row| row.iter().map(|v| v.re).collect()).collect(),
        x_matrix: z.iter().map(|row| row.iter().map(|v| v.im).collect()).collect(),
        c_matrix: c,
        ampacity,
    })
}

fn check_geometry(name: &str, conductors: &[&PlacedConductor]) -> GridResult<()> {
    for (i, a) in conductors.iter().enumerate() {
        let c = &a.conductor;
        if !(c.gmr > 0.0 && c.radius > 0.0 && a.y > 0.0) {
            return Err(GridError::Other(format!(
                "line geometry '{}': conductor '{}' needs positive GMR, radius and height",
                name, c.name
            )));
        }
        if conductors[i + 1..].iter().any(|b| a.distance(b) <= 0.0) {
            return Err(GridError::Other(format!(
                "line geometry '{}': two conductors share position ({}, {})",
                name, a.x, a.y
            )));
        }
    }
    Ok(())
}

/// Eliminate every row and column past `keep`, last first.
fn kron_reduce<T>(mut m: Vec<Vec<T>>, keep: usize) -> Vec<Vec<T>>
where
    T: Copy + std::ops::Sub<Output = T> + std::ops::Mul<Output = T> + std::ops::Div<Output = T>,
{
    while m.len() > keep {
        let last = m.len() - 1;
        let pivot = m[last][last];
        for i in 0..last {
            for j in 0..last {
                m[i][j] = m[i][j] - m[i][last] * m[last][j] / pivot;
            }
        }
        m.truncate(last);
        for row in &mut m {
            row.truncate(last);
        }
    }
    m
}

/// Gauss-Jordan inverse; `None` when singular.
fn invert(m: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = m.len();
    let mut a: Vec<Vec<f64>> = m
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let mut extended = row.clone();
            extended.extend((0..n).map(|j| if i == j { 1.0 } else { 0.0 }));
            extended
        })
        .collect();
    for col in 0..n {
        let pivot = (col..n).max_by(|&x, &y| a[x][col].abs().total_cmp(&a[y][col].abs()))?;
        if a[pivot][col].abs() < f64::EPSILON * 1e-6 {
            return None;
        }
        a.swap(col, pivot);
        let lead = a[col][col];
        for value in &mut a[col] {
            *value /= lead;
        }
        for row in 0..n {
            if row != col {
                let factor = a[row][col];
                if factor != 0.0 {
                    for k in 0..2 * n {
                        a[row][k] -= factor * a[col][k];
                    }
                }
            }
        }
    }
    Some(a.into_iter().map(|row| row[n..].to_vec()).collect())
}

//! Electrical summary metrics used to compare systems across formats.

use serde::Serialize;

use crate::model::{Component, ComponentKind};
use crate::system::System;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SystemMetrics {
    pub bus_count: usize,
    pub total_load_kw: f64,
    pub total_load_kvar: f64,
    pub total_capacitor_kvar: f64,
    /// Metres, over branches only
    pub total_branch_length: f64,
    /// Sum of length x mean self resistance, ohm
    pub total_branch_resistance: f64,
    pub total_branch_reactance: f64,
    pub total_transformer_kva: f64,
}

impl SystemMetrics {
    pub fn from_system(system: &System) -> Self {
        let mut metrics = SystemMetrics {
            bus_count: system.count(ComponentKind::DistributionBus),
            ..Default::default()
        };
        for component in system.iter() {
            match component {
                Component::DistributionLoad(load) => {
                    metrics.total_load_kw += load.equipment.total_real_power() / 1000.0;
                    metrics.total_load_kvar += load.equipment.total_reactive_power() / 1000.0;
                }
                Component::DistributionCapacitor(cap) => {
                    metrics.total_capacitor_kvar += cap.equipment.total_reactive_power() / 1000.0;
                }
                Component::MatrixImpedanceBranch(branch) => {
                    metrics.total_branch_length += branch.length;
                    metrics.total_branch_resistance +=
                        branch.length * branch.equipment.mean_self_resistance();
                    metrics.total_branch_reactance +=
                        branch.length * branch.equipment.mean_self_reactance();
                }
                Component::DistributionTransformer(xfmr) => {
                    metrics.total_transformer_kva += xfmr.equipment.rated_power() / 1000.0;
                }
                _ => {}
            }
        }
        metrics
    }

    /// Pairwise `|a - b| <= atol + rtol * |b|` over every float metric and
    /// exact equality of the bus count.
    pub fn approx_eq(&self, other: &SystemMetrics, rtol: f64, atol: f64) -> bool {
        self.mismatches(other, rtol, atol).is_empty()
    }

    /// Names of metrics outside tolerance, for test and CLI reporting.
    pub fn mismatches(&self, other: &SystemMetrics, rtol: f64, atol: f64) -> Vec<&'static str> {
        let close = |a: f64, b: f64| (a - b).abs() <= atol + rtol * b.abs();
        let pairs = [
            ("total_load_kw", self.total_load_kw, other.total_load_kw),
            ("total_load_kvar", self.total_load_kvar, other.total_load_kvar),
            ("total_capacitor_kvar", self.total_capacitor_kvar, other.total_capacitor_kvar),
            ("total_branch_length", self.total_branch_length, other.total_branch_length),
            ("total_branch_resistance", self.total_branch_resistance, other.total_branch_resistance),
            ("total_branch_reactance", self.total_branch_reactance, other.total_branch_reactance),
            ("total_transformer_kva", self.total_transformer_kva, other.total_transformer_kva),
        ];
        let mut out: Vec<&'static str> = pairs
            .iter()
            .filter(|(_, a, b)| !close(*a, *b))
            .map(|(name, _, _)| *name)
            .collect();
        if self.bus_count != other.bus_count {
            out.insert(0, "bus_count");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::phase::{Phase, THREE_PHASE};

    fn system() -> System {
        let mut system = System::new("m");
        for name in ["b1", "b2"] {
            system
                .add(DistributionBus::new(name, THREE_PHASE.to_vec(), 12_470.0, VoltageType::LineToLine))
                .unwrap();
        }
        system
            .add(MatrixImpedanceBranch {
                name: "l1".into(),
                buses: vec!["b1".into(), "b2".into()],
                length: 1000.0,
                phases: THREE_PHASE.to_vec(),
                equipment: MatrixImpedanceEquipment::diagonal("lc", 3, 2e-4, 4e-4, 0.0, 400.0),
            })
            .unwrap();
        system
            .add(DistributionLoad {
                name: "ld".into(),
                bus: "b2".into(),
                phases: vec![Phase::A, Phase::B],
                equipment: LoadEquipment {
                    name: "ld_equipment".into(),
                    phase_loads: vec![
                        PhaseLoad::constant_power(5_000.0, 1_000.0),
                        PhaseLoad::constant_power(5_000.0, 1_000.0),
                    ],
                    connection_type: ConnectionType::Star,
                },
            })
            .unwrap();
        system
    }

    #[test]
    fn metrics_sum_components() {
        let metrics = SystemMetrics::from_system(&system());
        assert_eq!(metrics.bus_count, 2);
        assert!((metrics.total_load_kw - 10.0).abs() < 1e-12);
        assert!((metrics.total_load_kvar - 2.0).abs() < 1e-12);
        assert!((metrics.total_branch_resistance - 0.2).abs() < 1e-12);
        assert!((metrics.total_branch_reactance - 0.4).abs() < 1e-12);
    }

    #[test]
    fn approx_eq_uses_relative_and_absolute_tolerance() {
        let a = SystemMetrics::from_system(&system());
        let mut b = a.clone();
        b.total_load_kw *= 1.005;
        assert!(a.approx_eq(&b, 0.01, 0.01));
        b.total_load_kw *= 1.1;
        assert_eq!(a.mismatches(&b, 0.01, 0.01), vec!["total_load_kw"]);
        b = a.clone();
        b.bus_count += 1;
        assert!(!a.approx_eq(&b, 0.01, 0.01));
    }
}

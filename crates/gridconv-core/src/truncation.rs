use std::collections::BTreeSet;

use tracing::info;

use crate::error::GridResult;
use crate::model::ComponentKind;
use crate::system::System;

/// Restrict a system to the given substations and feeders.
///
/// A bus is kept when its substation is in `substations` or its feeder is
/// in `feeders`. A device is kept when any of its buses is kept, and its
/// other buses come along so every reference still resolves. Components
/// without a bus reference (standalone equipment and controllers) are
/// dropped. With both sets empty the system is returned unchanged.
pub fn truncate(system: System, substations: &[String], feeders: &[String]) -> GridResult<System> {
    if substations.is_empty() && feeders.is_empty() {
        return Ok(system);
    }

    let mut kept_buses: BTreeSet<String> = system
        .buses()
        .filter(|bus| {
            bus.substation
                .as_ref()
                .is_some_and(|s| substations.contains(s))
                || bus.feeder.as_ref().is_some_and(|f| feeders.contains(f))
        })
        .map(|bus| bus.name.clone())
        .collect();
    info!(buses = kept_buses.len(), "truncating system");

    let mut truncated = System::new(system.name.clone());
    let mut endpoint_buses = BTreeSet::new();
    for component in system.iter() {
        let buses = component.buses();
        if buses.iter().any(|b| kept_buses.contains(*b)) {
            endpoint_buses.extend(buses.iter().map(|b| b.to_string()));
            truncated.add(component.clone())?;
        }
    }
    kept_buses.extend(endpoint_buses);

    for name in &kept_buses {
        if let Some(bus) = system.get(ComponentKind::DistributionBus, name) {
            truncated.add(bus.clone())?;
        }
    }

    info!(
        before = system.len(),
        after = truncated.len(),
        "truncation complete"
    );
    Ok(truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::phase::THREE_PHASE;

    fn bus(name: &str, feeder: &str) -> DistributionBus {
        DistributionBus::new(name, THREE_PHASE.to_vec(), 12_470.0, VoltageType::LineToLine)
            .with_membership(Some("sub1".into()), Some(feeder.into()))
    }

    fn line(name: &str, a: &str, b: &str) -> MatrixImpedanceBranch {
        MatrixImpedanceBranch {
            name: name.into(),
            buses: vec![a.into(), b.into()],
            length: 10.0,
            phases: THREE_PHASE.to_vec(),
            equipment: MatrixImpedanceEquipment::diagonal("lc", 3, 1e-4, 1e-4, 0.0, 100.0),
        }
    }

    fn system() -> System {
        let mut system = System::new("t");
        system
            .add_all([bus("f1a", "f1"), bus("f1b", "f1"), bus("f2a", "f2"), bus("f2b", "f2")])
            .unwrap();
        system.add(line("in_f1", "f1a", "f1b")).unwrap();
        system.add(line("tie", "f1b", "f2a")).unwrap();
        system.add(line("in_f2", "f2a", "f2b")).unwrap();
        system
            .add(MatrixImpedanceEquipment::diagonal("spare", 3, 1e-4, 1e-4, 0.0, 100.0))
            .unwrap();
        system
    }

    #[test]
    fn keeps_feeder_and_boundary_buses() {
        let truncated = truncate(system(), &[], &["f1".to_string()]).unwrap();
        assert!(truncated.contains(ComponentKind::MatrixImpedanceBranch, "in_f1"));
        assert!(truncated.contains(ComponentKind::MatrixImpedanceBranch, "tie"));
        assert!(!truncated.contains(ComponentKind::MatrixImpedanceBranch, "in_f2"));
        // f2a stays so the tie line still resolves
        assert!(truncated.bus("f2a").is_some());
        assert!(truncated.bus("f2b").is_none());
        assert_eq!(truncated.count(ComponentKind::MatrixImpedanceBranchEquipment), 0);
    }

    #[test]
    fn empty_selection_is_identity() {
        let original = system();
        let truncated = truncate(original.clone(), &[], &[]).unwrap();
        assert_eq!(truncated, original);
    }

    #[test]
    fn substation_selection_keeps_everything_in_it() {
        let truncated = truncate(system(), &["sub1".to_string()], &[]).unwrap();
        assert_eq!(truncated.count(ComponentKind::DistributionBus), 4);
        assert_eq!(truncated.count(ComponentKind::MatrixImpedanceBranch), 3);
    }

    #[test]
    fn multi_winding_device_brings_every_terminal() {
        let mut system = system();
        system.add(bus("tert", "f3")).unwrap();
        let t3 = DistributionTransformer {
            name: "t3".into(),
            buses: vec!["f1b".into(), "f2b".into(), "tert".into()],
            winding_phases: vec![THREE_PHASE.to_vec(); 3],
            equipment: DistributionTransformerEquipment {
                name: "t3w".into(),
                windings: Vec::new(),
                coupling_sequences: vec![[0, 1], [0, 2], [1, 2]],
                winding_reactances: vec![8.0, 10.0, 6.0],
                pct_no_load_loss: 0.0,
                pct_full_load_loss: 0.0,
                is_center_tapped: false,
            },
        };
        system.add(t3).unwrap();

        let truncated = truncate(system, &[], &["f3".to_string()]).unwrap();
        assert!(truncated.contains(ComponentKind::DistributionTransformer, "t3"));
        let kept: Vec<_> = truncated.buses().map(|b| b.name.as_str()).collect();
        assert_eq!(kept, vec!["f1b", "f2b", "tert"]);
        assert!(!truncated.contains(ComponentKind::MatrixImpedanceBranch, "tie"));
    }
}

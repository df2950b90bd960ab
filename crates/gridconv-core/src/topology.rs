//! Topology repair passes run after every component is registered.
//!
//! - [`assign_bus_voltages`] propagates rated voltage outward from sources
//! - [`serialize_parallel_branches`] splits mixed-kind parallel devices
//! - [`assign_bus_phases`] derives bus phase sets from incident devices

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use tracing::{debug, info};

use crate::error::{GridError, GridResult};
use crate::model::{Component, ComponentKind, VoltageType, LINE_TO_LINE_FACTOR};
use crate::phase::{Phase, THREE_PHASE};
use crate::system::System;

/// Device data needed while walking the network.
struct DeviceTerminals {
    kind: ComponentKind,
    name: String,
    buses: Vec<String>,
    /// Winding level per terminal for transformer-like devices
    windings: Option<Vec<(f64, VoltageType)>>,
}

fn collect_devices(system: &System) -> Vec<DeviceTerminals> {
    system
        .iter()
        .filter(|c| c.buses().len() >= 2)
        .map(|c| DeviceTerminals {
            kind: c.kind(),
            name: c.name().to_string(),
            buses: c.buses().iter().map(|b| b.to_string()).collect(),
            windings: c.transformer_equipment().map(|eq| {
                eq.windings
                    .iter()
                    .map(|w| (w.rated_voltage, w.voltage_type))
                    .collect()
            }),
        })
        .collect()
}

/// Propagate rated voltage from every voltage source through the network.
///
/// Source buses get the first phase source voltage, scaled to line-to-line
/// for multi-phase sources. A bus reached through a transformer takes the
/// rated voltage and type of the winding on that terminal; any other device
/// passes the current bus level through unchanged. A bus is assigned once;
/// unreachable buses keep their placeholder. Returns the number of buses
/// assigned.
pub fn assign_bus_voltages(system: &mut System) -> usize {
    let devices = collect_devices(system);
    let mut adjacency: HashMap<&str, Vec<usize>> = HashMap::new();
    for (idx, device) in devices.iter().enumerate() {
        for bus in &device.buses {
            adjacency.entry(bus.as_str()).or_default().push(idx);
        }
    }

    let seeds: Vec<(String, f64, VoltageType)> = system
        .iter_kind(ComponentKind::DistributionVoltageSource)
        .filter_map(|c| match c {
            Component::DistributionVoltageSource(src) => {
                let phase_voltage = src.equipment.phase_voltage();
                if src.phases.len() > 1 {
                    Some((
                        src.bus.clone(),
                        phase_voltage * LINE_TO_LINE_FACTOR,
                        VoltageType::LineToLine,
                    ))
                } else {
                    Some((src.bus.clone(), phase_voltage, VoltageType::LineToGround))
                }
            }
            _ => None,
        })
        .collect();

    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    for (bus_name, voltage, voltage_type) in seeds {
        if !visited.insert(bus_name.clone()) {
            continue;
        }
        if let Some(bus) = system.bus_mut(&bus_name) {
            bus.rated_voltage = voltage;
            bus.voltage_type = voltage_type;
            queue.push_back(bus_name);
        }
    }

    let mut observed_devices: HashSet<usize> = HashSet::new();
    while let Some(current) = queue.pop_front() {
        let Some((voltage, voltage_type)) = system
            .bus(&current)
            .map(|b| (b.rated_voltage, b.voltage_type))
        else {
            continue;
        };
        let Some(incident) = adjacency.get(current.as_str()) else {
            continue;
        };
        for &idx in incident {
            if !observed_devices.insert(idx) {
                continue;
            }
            let device = &devices[idx];
            for (j, neighbor) in device.buses.iter().enumerate() {
                if *neighbor == current || visited.contains(neighbor) {
                    continue;
                }
                let level = match &device.windings {
                    Some(windings) => windings.get(j).copied().unwrap_or((voltage, voltage_type)),
                    None => (voltage, voltage_type),
                };
                if let Some(bus) = system.bus_mut(neighbor) {
                    bus.rated_voltage = level.0;
                    bus.voltage_type = level.1;
                    visited.insert(neighbor.clone());
                    queue.push_back(neighbor.clone());
                    debug!(
                        bus = neighbor.as_str(),
                        via = device.name.as_str(),
                        voltage = level.0,
                        "assigned bus voltage"
                    );
                }
            }
        }
    }

    info!(assigned = visited.len(), "bus voltage propagation complete");
    visited.len()
}

/// Two-terminal devices grouped by their unordered bus pair.
fn group_by_bus_pair(system: &System) -> BTreeMap<(String, String), Vec<(String, ComponentKind)>> {
    let mut groups: BTreeMap<(String, String), Vec<(String, ComponentKind)>> = BTreeMap::new();
    for component in system.iter() {
        let buses = component.buses();
        if buses.len() != 2 || buses[0] == buses[1] {
            continue;
        }
        let pair = if buses[0] <= buses[1] {
            (buses[0].to_string(), buses[1].to_string())
        } else {
            (buses[1].to_string(), buses[0].to_string())
        };
        groups
            .entry(pair)
            .or_default()
            .push((component.name().to_string(), component.kind()));
    }
    groups
}

/// Bus pairs joined directly by devices of more than one kind.
pub fn parallel_edge_pairs(system: &System) -> Vec<(String, String)> {
    group_by_bus_pair(system)
        .into_iter()
        .filter(|(_, members)| distinct_kinds(members) > 1)
        .map(|(pair, _)| pair)
        .collect()
}

fn distinct_kinds(members: &[(String, ComponentKind)]) -> usize {
    members.iter().map(|(_, k)| *k).collect::<BTreeSet<_>>().len()
}

/// Put mixed-kind parallel devices in series through synthetic buses.
///
/// Groups are handled in bus-pair order and members in (name, kind) order.
/// Members sharing a name are renamed `{name}_{k}`. When the group holds a
/// transformer-like device, one such kind (transformers over regulators) is
/// kept: its primary bus `p` is copied to `{p}_primary`, every device of that
/// kind is moved to run from the copy to the secondary and all other devices,
/// including transformer-like ones of another kind, are chained from `p` to
/// the copy. Otherwise the devices are chained between the pair through
/// buses named `{bus2}_{j}_{i}`. Returns the number of groups split.
pub fn serialize_parallel_branches(system: &mut System) -> GridResult<usize> {
    let groups: Vec<((String, String), Vec<(String, ComponentKind)>)> = group_by_bus_pair(system)
        .into_iter()
        .filter(|(_, members)| distinct_kinds(members) > 1)
        .collect();
    let split = groups.len();

    for (i, ((bus_a, bus_b), mut members)) in groups.into_iter().enumerate() {
        members.sort();
        let members = rename_collisions(system, members)?;

        let anchor_kind = members
            .iter()
            .map(|(_, kind)| *kind)
            .filter(|kind| kind.is_transformer_like())
            .min_by_key(|kind| *kind != ComponentKind::DistributionTransformer);

        if let Some(anchor_kind) = anchor_kind {
            let (anchors, others): (Vec<_>, Vec<_>) = members
                .into_iter()
                .partition(|(_, kind)| *kind == anchor_kind);
            let (first_name, _) = &anchors[0];
            let primary = system
                .get(anchor_kind, first_name)
                .and_then(|c| c.buses().first().map(|b| b.to_string()))
                .unwrap_or_else(|| bus_a.clone());
            let secondary = if primary == bus_a { bus_b.clone() } else { bus_a.clone() };
            let primary_copy = copy_bus(system, &primary, &format!("{primary}_primary"))?;

            // Series devices first, then the remaining transformer-like ones.
            let mut others = others;
            others.sort_by_key(|(_, kind)| kind.is_transformer_like());

            let mut chain = vec![primary.clone()];
            for j in 0..others.len().saturating_sub(1) {
                let name = format!("{}_{}_{}", others[j + 1].0, j, i);
                chain.push(copy_bus(system, &primary, &name)?);
            }
            chain.push(primary_copy.clone());
            for (j, (name, kind)) in others.iter().enumerate() {
                set_terminals(system, *kind, name, &chain[j], &chain[j + 1])?;
            }
            for (name, kind) in &anchors {
                set_terminals(system, *kind, name, &primary_copy, &secondary)?;
            }
            info!(
                primary = primary.as_str(),
                secondary = secondary.as_str(),
                devices = others.len(),
                "moved parallel devices ahead of transformer"
            );
        } else {
            let others = members;
            let mut chain = vec![bus_a.clone()];
            for j in 0..others.len().saturating_sub(1) {
                chain.push(copy_bus(system, &bus_b, &format!("{bus_b}_{j}_{i}"))?);
            }
            chain.push(bus_b.clone());
            for (j, (name, kind)) in others.iter().enumerate() {
                set_terminals(system, *kind, name, &chain[j], &chain[j + 1])?;
            }
            info!(
                from = bus_a.as_str(),
                to = bus_b.as_str(),
                devices = others.len(),
                "chained parallel devices in series"
            );
        }
    }

    Ok(split)
}

fn rename_collisions(
    system: &mut System,
    members: Vec<(String, ComponentKind)>,
) -> GridResult<Vec<(String, ComponentKind)>> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for (name, _) in &members {
        *counts.entry(name.clone()).or_default() += 1;
    }
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut renamed = Vec::with_capacity(members.len());
    for (name, kind) in members {
        if counts[&name] > 1 {
            let k = seen.entry(name.clone()).or_default();
            let new_name = format!("{name}_{k}");
            *k += 1;
            system.rename(kind, &name, &new_name)?;
            debug!(kind = %kind, from = name.as_str(), to = new_name.as_str(), "renamed parallel device");
            renamed.push((new_name, kind));
        } else {
            renamed.push((name, kind));
        }
    }
    Ok(renamed)
}

/// Register a copy of `template` under `name`, suffixing when taken.
fn copy_bus(system: &mut System, template: &str, name: &str) -> GridResult<String> {
    let bus = system
        .bus(template)
        .ok_or_else(|| GridError::unresolved(ComponentKind::DistributionBus, template, "parallel branch serialization"))?
        .clone();
    let mut candidate = name.to_string();
    let mut n = 1;
    while system.contains(ComponentKind::DistributionBus, &candidate) {
        candidate = format!("{name}_{n}");
        n += 1;
    }
    system.add(bus.duplicate(candidate.clone()))?;
    Ok(candidate)
}

fn set_terminals(
    system: &mut System,
    kind: ComponentKind,
    name: &str,
    from: &str,
    to: &str,
) -> GridResult<()> {
    let component = system
        .get_mut(kind, name)
        .ok_or_else(|| GridError::unresolved(kind, name, "parallel branch serialization"))?;
    let mut terminals = component.buses_mut();
    if terminals.len() < 2 {
        return Err(GridError::Other(format!(
            "{kind} '{name}' has fewer than 2 buses"
        )));
    }
    *terminals[0] = from.to_string();
    *terminals[1] = to.to_string();
    Ok(())
}

/// Set each bus phase set to the union of the phases its devices carry.
///
/// Buses with no incident device default to three phase.
pub fn assign_bus_phases(system: &mut System) {
    let mut observed: HashMap<String, BTreeSet<Phase>> = HashMap::new();
    for component in system.iter() {
        for (j, bus) in component.buses().into_iter().enumerate() {
            observed
                .entry(bus.to_string())
                .or_default()
                .extend(component.terminal_phases(j).iter().copied());
        }
    }
    let names: Vec<String> = system.buses().map(|b| b.name.clone()).collect();
    for name in names {
        let phases = match observed.get(&name) {
            Some(set) if !set.is_empty() => set.iter().copied().collect(),
            _ => THREE_PHASE.to_vec(),
        };
        if let Some(bus) = system.bus_mut(&name) {
            bus.phases = phases;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;

    fn bus(name: &str) -> DistributionBus {
        DistributionBus::new(name, THREE_PHASE.to_vec(), 12_470.0, VoltageType::LineToLine)
    }

    fn impedance() -> MatrixImpedanceEquipment {
        MatrixImpedanceEquipment::diagonal("lc", 3, 1e-4, 2e-4, 0.0, 400.0)
    }

    fn line(name: &str, a: &str, b: &str) -> Component {
        Component::MatrixImpedanceBranch(MatrixImpedanceBranch {
            name: name.into(),
            buses: vec![a.into(), b.into()],
            length: 100.0,
            phases: THREE_PHASE.to_vec(),
            equipment: impedance(),
        })
    }

    fn switch(name: &str, a: &str, b: &str) -> Component {
        Component::MatrixImpedanceSwitch(MatrixImpedanceSwitch {
            name: name.into(),
            buses: vec![a.into(), b.into()],
            length: 1.0,
            phases: THREE_PHASE.to_vec(),
            equipment: impedance(),
            is_closed: vec![true; 3],
        })
    }

    fn winding(voltage: f64) -> WindingEquipment {
        WindingEquipment {
            name: "w".into(),
            rated_voltage: voltage,
            voltage_type: VoltageType::LineToGround,
            rated_power: 500_000.0,
            connection_type: ConnectionType::Star,
            resistance: 0.5,
            is_grounded: true,
            num_phases: 3,
            tap_positions: vec![1.0; 3],
            total_taps: 32,
            min_tap_pu: 0.9,
            max_tap_pu: 1.1,
        }
    }

    fn transformer(name: &str, a: &str, b: &str) -> Component {
        Component::DistributionTransformer(DistributionTransformer {
            name: name.into(),
            buses: vec![a.into(), b.into()],
            winding_phases: vec![THREE_PHASE.to_vec(), THREE_PHASE.to_vec()],
            equipment: DistributionTransformerEquipment {
                name: format!("{name}_equipment"),
                windings: vec![winding(7_200.0), winding(277.0)],
                coupling_sequences: vec![[0, 1]],
                winding_reactances: vec![2.0],
                pct_no_load_loss: 0.0,
                pct_full_load_loss: 1.0,
                is_center_tapped: false,
            },
        })
    }

    fn regulator(name: &str, a: &str, b: &str) -> Component {
        let Component::DistributionTransformer(t) = transformer(name, a, b) else {
            unreachable!()
        };
        Component::DistributionRegulator(DistributionRegulator {
            name: t.name,
            buses: t.buses,
            winding_phases: t.winding_phases,
            equipment: t.equipment,
            controllers: Vec::new(),
        })
    }

    fn source(bus: &str, phases: usize) -> Component {
        Component::DistributionVoltageSource(DistributionVoltageSource {
            name: "src".into(),
            bus: bus.into(),
            phases: THREE_PHASE[..phases].to_vec(),
            equipment: VoltageSourceEquipment::balanced("src_equipment", phases, 7_200.0, 0.0, [0.0; 4]),
        })
    }

    #[test]
    fn source_level_passes_through_lines() {
        let mut system = System::new("v");
        for name in ["b1", "b2", "b3", "island"] {
            let mut b = bus(name);
            b.rated_voltage = 1.0;
            system.add(b).unwrap();
        }
        system.add(source("b1", 3)).unwrap();
        system.add(line("l1", "b1", "b2")).unwrap();
        system.add(line("l2", "b2", "b3")).unwrap();

        let assigned = assign_bus_voltages(&mut system);
        assert_eq!(assigned, 3);
        for name in ["b1", "b2", "b3"] {
            let b = system.bus(name).unwrap();
            assert!((b.rated_voltage - 7_200.0 * 1.732).abs() < 1e-9);
            assert_eq!(b.voltage_type, VoltageType::LineToLine);
        }
        assert_eq!(system.bus("island").unwrap().rated_voltage, 1.0);
    }

    #[test]
    fn transformer_secondary_takes_winding_level() {
        let mut system = System::new("v");
        system.add_all([bus("hv"), bus("lv"), bus("service")]).unwrap();
        system.add(source("hv", 3)).unwrap();
        system.add(transformer("t1", "hv", "lv")).unwrap();
        system.add(line("l1", "lv", "service")).unwrap();

        assign_bus_voltages(&mut system);
        let lv = system.bus("lv").unwrap();
        assert_eq!(lv.rated_voltage, 277.0);
        assert_eq!(lv.voltage_type, VoltageType::LineToGround);
        assert_eq!(system.bus("service").unwrap().rated_voltage, 277.0);
    }

    #[test]
    fn single_phase_source_is_line_to_ground() {
        let mut system = System::new("v");
        system.add(bus("b1")).unwrap();
        system.add(source("b1", 1)).unwrap();
        assign_bus_voltages(&mut system);
        let b1 = system.bus("b1").unwrap();
        assert_eq!(b1.rated_voltage, 7_200.0);
        assert_eq!(b1.voltage_type, VoltageType::LineToGround);
    }

    #[test]
    fn mixed_parallel_devices_are_chained() {
        let mut system = System::new("p");
        system.add_all([bus("b1"), bus("b2")]).unwrap();
        system.add(line("dev", "b1", "b2")).unwrap();
        system.add(switch("dev", "b2", "b1")).unwrap();
        system.add(line("l2", "b1", "b2")).unwrap();
        assert_eq!(parallel_edge_pairs(&system).len(), 1);

        let split = serialize_parallel_branches(&mut system).unwrap();
        assert_eq!(split, 1);
        assert!(parallel_edge_pairs(&system).is_empty());

        // (name, kind) order: dev/branch, dev/switch, l2/branch
        let first = system.get(ComponentKind::MatrixImpedanceBranch, "dev_0").unwrap();
        assert_eq!(first.buses(), vec!["b1", "b2_0_0"]);
        let second = system.get(ComponentKind::MatrixImpedanceSwitch, "dev_1").unwrap();
        assert_eq!(second.buses(), vec!["b2_0_0", "b2_1_0"]);
        let third = system.get(ComponentKind::MatrixImpedanceBranch, "l2").unwrap();
        assert_eq!(third.buses(), vec!["b2_1_0", "b2"]);
        assert_eq!(system.count(ComponentKind::DistributionBus), 4);
    }

    #[test]
    fn transformer_moves_behind_parallel_switch() {
        let mut system = System::new("p");
        system.add_all([bus("hv"), bus("lv")]).unwrap();
        system.add(transformer("t1", "hv", "lv")).unwrap();
        system.add(switch("sw1", "hv", "lv")).unwrap();

        serialize_parallel_branches(&mut system).unwrap();
        assert!(parallel_edge_pairs(&system).is_empty());
        let sw = system.get(ComponentKind::MatrixImpedanceSwitch, "sw1").unwrap();
        assert_eq!(sw.buses(), vec!["hv", "hv_primary"]);
        let t1 = system.get(ComponentKind::DistributionTransformer, "t1").unwrap();
        assert_eq!(t1.buses(), vec!["hv_primary", "lv"]);
        assert!(system.bus("hv_primary").is_some());
    }

    #[test]
    fn regulator_parallel_to_transformer_is_chained_ahead() {
        let mut system = System::new("p");
        system.add_all([bus("hv"), bus("lv")]).unwrap();
        system.add(transformer("t1", "hv", "lv")).unwrap();
        system.add(regulator("r1", "hv", "lv")).unwrap();
        assert_eq!(parallel_edge_pairs(&system).len(), 1);

        assert_eq!(serialize_parallel_branches(&mut system).unwrap(), 1);
        assert!(parallel_edge_pairs(&system).is_empty());
        let r1 = system.get(ComponentKind::DistributionRegulator, "r1").unwrap();
        assert_eq!(r1.buses(), vec!["hv", "hv_primary"]);
        let t1 = system.get(ComponentKind::DistributionTransformer, "t1").unwrap();
        assert_eq!(t1.buses(), vec!["hv_primary", "lv"]);
    }

    #[test]
    fn switch_regulator_and_transformer_each_get_a_bus_pair() {
        let mut system = System::new("p");
        system.add_all([bus("hv"), bus("lv")]).unwrap();
        system.add(transformer("t1", "hv", "lv")).unwrap();
        system.add(regulator("r1", "hv", "lv")).unwrap();
        system.add(switch("sw", "hv", "lv")).unwrap();

        serialize_parallel_branches(&mut system).unwrap();
        assert!(parallel_edge_pairs(&system).is_empty());
        let sw = system.get(ComponentKind::MatrixImpedanceSwitch, "sw").unwrap();
        assert_eq!(sw.buses(), vec!["hv", "r1_0_0"]);
        let r1 = system.get(ComponentKind::DistributionRegulator, "r1").unwrap();
        assert_eq!(r1.buses(), vec!["r1_0_0", "hv_primary"]);
        let t1 = system.get(ComponentKind::DistributionTransformer, "t1").unwrap();
        assert_eq!(t1.buses(), vec!["hv_primary", "lv"]);
        assert_eq!(system.count(ComponentKind::DistributionBus), 4);
    }

    #[test]
    fn same_kind_parallel_lines_are_left_alone() {
        let mut system = System::new("p");
        system.add_all([bus("b1"), bus("b2")]).unwrap();
        system.add(line("l1", "b1", "b2")).unwrap();
        system.add(line("l2", "b1", "b2")).unwrap();
        assert_eq!(serialize_parallel_branches(&mut system).unwrap(), 0);
        assert_eq!(system.count(ComponentKind::DistributionBus), 2);
    }

    #[test]
    fn bus_phases_are_union_of_devices() {
        let mut system = System::new("ph");
        system.add_all([bus("b1"), bus("b2"), bus("lonely")]).unwrap();
        system
            .add(MatrixImpedanceBranch {
                name: "l1".into(),
                buses: vec!["b1".into(), "b2".into()],
                length: 1.0,
                phases: vec![Phase::C],
                equipment: MatrixImpedanceEquipment::diagonal("lc1", 1, 1e-4, 1e-4, 0.0, 100.0),
            })
            .unwrap();
        system
            .add(DistributionLoad {
                name: "ld".into(),
                bus: "b2".into(),
                phases: vec![Phase::A],
                equipment: LoadEquipment {
                    name: "ld_equipment".into(),
                    phase_loads: vec![PhaseLoad::constant_power(1000.0, 100.0)],
                    connection_type: ConnectionType::Star,
                },
            })
            .unwrap();
        assign_bus_phases(&mut system);
        assert_eq!(system.bus("b1").unwrap().phases, vec![Phase::C]);
        assert_eq!(system.bus("b2").unwrap().phases, vec![Phase::A, Phase::C]);
        assert_eq!(system.bus("lonely").unwrap().phases, THREE_PHASE.to_vec());
    }
}

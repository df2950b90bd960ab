//! Component registry and its multigraph view.

use std::collections::{BTreeMap, HashMap};

use petgraph::graph::{NodeIndex, UnGraph};

use crate::error::{GridError, GridResult};
use crate::model::{Component, ComponentKind, DistributionBus};

/// Edge payload of [`SystemGraph`]: the device joining two buses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEdge {
    pub kind: ComponentKind,
    pub name: String,
}

/// Undirected multigraph: one node per bus (weight = bus name), one edge
/// per device between its first bus and each further bus.
#[derive(Debug, Default)]
pub struct SystemGraph {
    pub graph: UnGraph<String, DeviceEdge>,
    pub index: HashMap<String, NodeIndex>,
}

impl SystemGraph {
    pub fn node(&self, bus: &str) -> Option<NodeIndex> {
        self.index.get(bus).copied()
    }
}

/// A canonical distribution system.
///
/// Components are keyed by (kind, name); names are unique within a kind.
/// Iteration is ordered by kind and then by name, so every pass over the
/// registry is deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct System {
    pub name: String,
    components: BTreeMap<ComponentKind, BTreeMap<String, Component>>,
}

impl System {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: BTreeMap::new(),
        }
    }

    /// Register a component, rejecting a duplicate (kind, name).
    pub fn add(&mut self, component: impl Into<Component>) -> GridResult<()> {
        let component = component.into();
        let kind = component.kind();
        let slot = self.components.entry(kind).or_default();
        if slot.contains_key(component.name()) {
            return Err(GridError::DuplicateComponent {
                kind: kind.to_string(),
                name: component.name().to_string(),
            });
        }
        slot.insert(component.name().to_string(), component);
        Ok(())
    }

    pub fn add_all<I, C>(&mut self, components: I) -> GridResult<()>
    where
        I: IntoIterator<Item = C>,
        C: Into<Component>,
    {
        for component in components {
            self.add(component)?;
        }
        Ok(())
    }

    pub fn get(&self, kind: ComponentKind, name: &str) -> Option<&Component> {
        self.components.get(&kind).and_then(|m| m.get(name))
    }

    pub fn get_mut(&mut self, kind: ComponentKind, name: &str) -> Option<&mut Component> {
        self.components.get_mut(&kind).and_then(|m| m.get_mut(name))
    }

    pub fn remove(&mut self, kind: ComponentKind, name: &str) -> Option<Component> {
        let slot = self.components.get_mut(&kind)?;
        let removed = slot.remove(name);
        if slot.is_empty() {
            self.components.remove(&kind);
        }
        removed
    }

    pub fn contains(&self, kind: ComponentKind, name: &str) -> bool {
        self.get(kind, name).is_some()
    }

    /// Components of one kind in name order.
    pub fn iter_kind(&self, kind: ComponentKind) -> impl Iterator<Item = &Component> {
        self.components.get(&kind).into_iter().flat_map(|m| m.values())
    }

    /// Every component, ordered by kind then name.
    pub fn iter(&self) -> impl Iterator<Item = &Component> {
        self.components.values().flat_map(|m| m.values())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Component> {
        self.components.values_mut().flat_map(|m| m.values_mut())
    }

    /// Kinds with at least one registered component.
    pub fn kinds(&self) -> Vec<ComponentKind> {
        self.components
            .iter()
            .filter(|(_, m)| !m.is_empty())
            .map(|(k, _)| *k)
            .collect()
    }

    pub fn count(&self, kind: ComponentKind) -> usize {
        self.components.get(&kind).map(BTreeMap::len).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.components.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn buses(&self) -> impl Iterator<Item = &DistributionBus> {
        self.iter_kind(ComponentKind::DistributionBus)
            .filter_map(Component::as_bus)
    }

    pub fn bus(&self, name: &str) -> Option<&DistributionBus> {
        self.get(ComponentKind::DistributionBus, name)
            .and_then(Component::as_bus)
    }

    pub fn bus_mut(&mut self, name: &str) -> Option<&mut DistributionBus> {
        self.get_mut(ComponentKind::DistributionBus, name)
            .and_then(Component::as_bus_mut)
    }

    /// Resolve a bus reference made by `context`, failing when unregistered.
    pub fn require_bus(&self, name: &str, context: impl Into<String>) -> GridResult<&DistributionBus> {
        self.bus(name)
            .ok_or_else(|| GridError::unresolved(ComponentKind::DistributionBus, name, context))
    }

    /// Change the name of a registered component.
    pub fn rename(&mut self, kind: ComponentKind, old: &str, new: &str) -> GridResult<()> {
        if old == new {
            return Ok(());
        }
        if self.contains(kind, new) {
            return Err(GridError::DuplicateComponent {
                kind: kind.to_string(),
                name: new.to_string(),
            });
        }
        let mut component = self
            .remove(kind, old)
            .ok_or_else(|| GridError::unresolved(kind, old, format!("rename to '{}'", new)))?;
        component.set_name(new);
        self.add(component)
    }

    /// Per-kind component counts.
    pub fn stats(&self) -> BTreeMap<ComponentKind, usize> {
        self.components
            .iter()
            .filter(|(_, m)| !m.is_empty())
            .map(|(k, m)| (*k, m.len()))
            .collect()
    }

    /// Build the undirected multigraph over buses and devices.
    ///
    /// Devices with more than two buses contribute one edge from their first
    /// bus to each other bus. Single-bus devices add no edge.
    pub fn graph(&self) -> SystemGraph {
        let mut view = SystemGraph::default();
        for bus in self.buses() {
            let idx = view.graph.add_node(bus.name.clone());
            view.index.insert(bus.name.clone(), idx);
        }
        for component in self.iter() {
            let buses = component.buses();
            if buses.len() < 2 {
                continue;
            }
            let first = node_for(&mut view, buses[0]);
            for other in &buses[1..] {
                let target = node_for(&mut view, other);
                view.graph.add_edge(
                    first,
                    target,
                    DeviceEdge {
                        kind: component.kind(),
                        name: component.name().to_string(),
                    },
                );
            }
        }
        view
    }
}

fn node_for(view: &mut SystemGraph, bus: &str) -> NodeIndex {
    if let Some(idx) = view.index.get(bus) {
        return *idx;
    }
    let idx = view.graph.add_node(bus.to_string());
    view.index.insert(bus.to_string(), idx);
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::phase::THREE_PHASE;

    fn bus(name: &str) -> DistributionBus {
        DistributionBus::new(name, THREE_PHASE.to_vec(), 12_470.0, VoltageType::LineToLine)
    }

    fn line(name: &str, a: &str, b: &str) -> MatrixImpedanceBranch {
        MatrixImpedanceBranch {
            name: name.into(),
            buses: vec![a.into(), b.into()],
            length: 100.0,
            phases: THREE_PHASE.to_vec(),
            equipment: MatrixImpedanceEquipment::diagonal("lc", 3, 1e-4, 2e-4, 0.0, 400.0),
        }
    }

    #[test]
    fn duplicate_names_are_rejected_per_kind() {
        let mut system = System::new("test");
        system.add(bus("b1")).unwrap();
        let err = system.add(bus("b1")).unwrap_err();
        assert!(matches!(err, GridError::DuplicateComponent { .. }));
        assert_eq!(err.to_string(), "DistributionBus 'b1' is already registered");

        // Same name under another kind is fine
        system.add(line("b1", "b1", "b2")).unwrap();
        assert_eq!(system.len(), 2);
    }

    #[test]
    fn require_bus_reports_context() {
        let system = System::new("test");
        let err = system.require_bus("n9", "DistributionLoad 'ld1'").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing DistributionBus 'n9' while mapping DistributionLoad 'ld1'"
        );
    }

    #[test]
    fn rename_moves_component() {
        let mut system = System::new("test");
        system.add(line("l1", "b1", "b2")).unwrap();
        system
            .rename(ComponentKind::MatrixImpedanceBranch, "l1", "l1_0")
            .unwrap();
        assert!(!system.contains(ComponentKind::MatrixImpedanceBranch, "l1"));
        let renamed = system.get(ComponentKind::MatrixImpedanceBranch, "l1_0").unwrap();
        assert_eq!(renamed.name(), "l1_0");
    }

    #[test]
    fn graph_has_one_edge_per_device() {
        let mut system = System::new("test");
        system.add_all([bus("b1"), bus("b2"), bus("b3")]).unwrap();
        system.add(line("l1", "b1", "b2")).unwrap();
        system.add(line("l2", "b1", "b2")).unwrap();
        system.add(line("l3", "b2", "b3")).unwrap();

        let view = system.graph();
        assert_eq!(view.graph.node_count(), 3);
        assert_eq!(view.graph.edge_count(), 3);
        let b1 = view.node("b1").unwrap();
        let b2 = view.node("b2").unwrap();
        assert_eq!(view.graph.edges_connecting(b1, b2).count(), 2);
    }

    #[test]
    fn stats_counts_per_kind() {
        let mut system = System::new("test");
        system.add_all([bus("b1"), bus("b2")]).unwrap();
        system.add(line("l1", "b1", "b2")).unwrap();
        let stats = system.stats();
        assert_eq!(stats[&ComponentKind::DistributionBus], 2);
        assert_eq!(stats[&ComponentKind::MatrixImpedanceBranch], 1);
        system.remove(ComponentKind::MatrixImpedanceBranch, "l1");
        assert!(!system.stats().contains_key(&ComponentKind::MatrixImpedanceBranch));
    }
}

use std::collections::{HashSet, VecDeque};

use petgraph::algo::connected_components;
use serde::Serialize;

use crate::system::SystemGraph;

/// Summary statistics of the bus/device multigraph (degree and component counts).
#[derive(Debug, Clone, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub connected_components: usize,
    pub min_degree: usize,
    pub avg_degree: f64,
    pub max_degree: usize,
}

/// One connected group of buses.
#[derive(Debug, Clone, Serialize)]
pub struct IslandSummary {
    pub island_id: usize,
    pub bus_count: usize,
    /// Lowest bus name in the island, for reporting
    pub representative: String,
}

pub fn graph_stats(view: &SystemGraph) -> GraphStats {
    let graph = &view.graph;
    let node_count = graph.node_count();
    let degrees: Vec<usize> = graph
        .node_indices()
        .map(|node| graph.edges(node).count())
        .collect();
    let min_degree = degrees.iter().copied().min().unwrap_or(0);
    let max_degree = degrees.iter().copied().max().unwrap_or(0);
    let avg_degree = if node_count == 0 {
        0.0
    } else {
        degrees.iter().sum::<usize>() as f64 / node_count as f64
    };
    GraphStats {
        node_count,
        edge_count: graph.edge_count(),
        connected_components: connected_components(graph),
        min_degree,
        avg_degree,
        max_degree,
    }
}

/// Label connected bus groups by breadth-first search.
pub fn find_islands(view: &SystemGraph) -> Vec<IslandSummary> {
    let graph = &view.graph;
    let mut visited = HashSet::new();
    let mut islands = Vec::new();
    for start in graph.node_indices() {
        if visited.contains(&start) {
            continue;
        }
        let mut queue = VecDeque::from([start]);
        let mut members = Vec::new();
        while let Some(node) = queue.pop_front() {
            if !visited.insert(node) {
                continue;
            }
            members.push(graph[node].clone());
            for neighbor in graph.neighbors(node) {
                if !visited.contains(&neighbor) {
                    queue.push_back(neighbor);
                }
            }
        }
        members.sort();
        islands.push(IslandSummary {
            island_id: islands.len(),
            bus_count: members.len(),
            representative: members.first().cloned().unwrap_or_default(),
        });
    }
    islands
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use crate::phase::THREE_PHASE;
    use crate::System;

    fn system() -> System {
        let mut system = System::new("islands");
        for name in ["a", "b", "c", "d"] {
            system
                .add(DistributionBus::new(name, THREE_PHASE.to_vec(), 240.0, VoltageType::LineToGround))
                .unwrap();
        }
        system
            .add(MatrixImpedanceBranch {
                name: "ab".into(),
                buses: vec!["a".into(), "b".into()],
                length: 1.0,
                phases: THREE_PHASE.to_vec(),
                equipment: MatrixImpedanceEquipment::diagonal("lc", 3, 1e-4, 1e-4, 0.0, 100.0),
            })
            .unwrap();
        system
    }

    #[test]
    fn stats_count_isolated_buses() {
        let stats = graph_stats(&system().graph());
        assert_eq!(stats.node_count, 4);
        assert_eq!(stats.edge_count, 1);
        assert_eq!(stats.connected_components, 3);
        assert_eq!(stats.max_degree, 1);
        assert_eq!(stats.min_degree, 0);
    }

    #[test]
    fn islands_group_connected_buses() {
        let islands = find_islands(&system().graph());
        assert_eq!(islands.len(), 3);
        assert_eq!(islands[0].bus_count, 2);
        assert_eq!(islands[0].representative, "a");
    }
}

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{GridError, GridResult};
use crate::system::System;

/// Named in-memory systems for one interactive or scripted run.
///
/// Every operation goes through an explicit `Session` value; there is no
/// process-wide registry.
#[derive(Debug, Default)]
pub struct Session {
    systems: BTreeMap<String, System>,
}

/// Per-kind component counts of one loaded system.
#[derive(Debug, Clone, Serialize)]
pub struct SystemSummary {
    pub name: String,
    pub components: BTreeMap<String, usize>,
    pub total: usize,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `system` under `name`, replacing any previous entry.
    pub fn create(&mut self, name: impl Into<String>, system: System) -> Option<System> {
        self.systems.insert(name.into(), system)
    }

    pub fn get(&self, name: &str) -> GridResult<&System> {
        match self.systems.get(name) {
            Some(system) => Ok(system),
            None => Err(self.missing(name)),
        }
    }

    pub fn get_mut(&mut self, name: &str) -> GridResult<&mut System> {
        if !self.systems.contains_key(name) {
            return Err(self.missing(name));
        }
        self.systems
            .get_mut(name)
            .ok_or_else(|| GridError::Other(format!("system '{}' vanished", name)))
    }

    /// Remove and return a system.
    pub fn drop(&mut self, name: &str) -> GridResult<System> {
        match self.systems.remove(name) {
            Some(system) => Ok(system),
            None => Err(self.missing(name)),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.systems.keys().cloned().collect()
    }

    pub fn summary(&self, name: &str) -> GridResult<SystemSummary> {
        let system = self.get(name)?;
        let components: BTreeMap<String, usize> = system
            .stats()
            .into_iter()
            .map(|(kind, count)| (kind.to_string(), count))
            .collect();
        Ok(SystemSummary {
            name: name.to_string(),
            total: components.values().sum(),
            components,
        })
    }

    fn missing(&self, name: &str) -> GridError {
        GridError::NoSuchSystem {
            name: name.to_string(),
            available: self.names(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DistributionBus, VoltageType};
    use crate::phase::THREE_PHASE;

    fn system_with_bus() -> System {
        let mut system = System::new("s");
        system
            .add(DistributionBus::new("b1", THREE_PHASE.to_vec(), 240.0, VoltageType::LineToGround))
            .unwrap();
        system
    }

    #[test]
    fn lifecycle() {
        let mut session = Session::new();
        assert!(session.create("feeder_a", System::new("a")).is_none());
        assert!(session.create("feeder_b", system_with_bus()).is_none());
        assert_eq!(session.names(), vec!["feeder_a", "feeder_b"]);

        let summary = session.summary("feeder_b").unwrap();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.components["DistributionBus"], 1);

        session.drop("feeder_a").unwrap();
        assert_eq!(session.names(), vec!["feeder_b"]);
    }

    #[test]
    fn missing_system_lists_available() {
        let mut session = Session::new();
        session.create("a", System::new("a"));
        session.create("b", System::new("b"));
        let err = session.get("c").unwrap_err();
        assert_eq!(
            err.to_string(),
            "No system loaded with name 'c'. Available systems: a, b"
        );
        assert!(session.drop("c").is_err());
    }

    #[test]
    fn create_overwrites() {
        let mut session = Session::new();
        session.create("a", System::new("first"));
        let previous = session.create("a", system_with_bus());
        assert_eq!(previous.unwrap().name, "first");
        assert_eq!(session.get("a").unwrap().len(), 1);
        session.get_mut("a").unwrap().name = "renamed".into();
        assert_eq!(session.get("a").unwrap().name, "renamed");
    }
}

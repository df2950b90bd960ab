use serde::{Deserialize, Serialize};

use super::{Location, VoltageLimits, VoltageType, LINE_TO_LINE_FACTOR};
use crate::phase::Phase;

/// A network node with a voltage level and an energized phase set.
///
/// Rated voltage is stored in volts; `voltage_type` says whether it is a
/// line-to-line or line-to-ground magnitude. Topology repair rewrites both
/// after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionBus {
    pub name: String,
    pub phases: Vec<Phase>,
    pub rated_voltage: f64,
    pub voltage_type: VoltageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinate: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage_limits: Option<VoltageLimits>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub substation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feeder: Option<String>,
}

impl DistributionBus {
    pub fn new(
        name: impl Into<String>,
        phases: Vec<Phase>,
        rated_voltage: f64,
        voltage_type: VoltageType,
    ) -> Self {
        Self {
            name: name.into(),
            phases,
            rated_voltage,
            voltage_type,
            coordinate: None,
            voltage_limits: None,
            substation: None,
            feeder: None,
        }
    }

    pub fn with_coordinate(mut self, x: f64, y: f64) -> Self {
        self.coordinate = Some(Location { x, y });
        self
    }

    pub fn with_membership(mut self, substation: Option<String>, feeder: Option<String>) -> Self {
        self.substation = substation;
        self.feeder = feeder;
        self
    }

    /// Rated voltage expressed line-to-line.
    pub fn line_to_line_voltage(&self) -> f64 {
        match self.voltage_type {
            VoltageType::LineToLine => self.rated_voltage,
            VoltageType::LineToGround => self.rated_voltage * LINE_TO_LINE_FACTOR,
        }
    }

    /// Copy of this bus under another name, used for synthetic buses.
    pub fn duplicate(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::THREE_PHASE;

    #[test]
    fn line_to_line_voltage_respects_type() {
        let ll = DistributionBus::new("b1", THREE_PHASE.to_vec(), 12_470.0, VoltageType::LineToLine);
        assert_eq!(ll.line_to_line_voltage(), 12_470.0);

        let lg = DistributionBus::new("b2", THREE_PHASE.to_vec(), 7_200.0, VoltageType::LineToGround);
        assert!((lg.line_to_line_voltage() - 12_470.4).abs() < 1e-6);
    }

    #[test]
    fn duplicate_keeps_attributes() {
        let bus = DistributionBus::new("b1", vec![Phase::A], 240.0, VoltageType::LineToGround)
            .with_coordinate(1.0, 2.0)
            .with_membership(Some("sub".into()), Some("fdr".into()));
        let copy = bus.duplicate("b1_primary");
        assert_eq!(copy.name, "b1_primary");
        assert_eq!(copy.coordinate, bus.coordinate);
        assert_eq!(copy.feeder.as_deref(), Some("fdr"));
    }
}

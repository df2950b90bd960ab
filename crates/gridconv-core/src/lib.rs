//! # gridconv-core: canonical distribution network model
//!
//! Every reader in `gridconv-io` builds a [`System`] and every writer walks
//! one. The model is a registry of typed components keyed by
//! (kind, name), with an undirected multigraph view where:
//! - **Nodes** are buses
//! - **Edges** are devices (branches, switching devices, transformers)
//!
//! After mapping, readers run the repair passes in [`topology`]:
//! voltage propagation from sources, serialization of mixed-kind parallel
//! devices and bus phase assignment. [`truncation`] cuts a system down to
//! selected substations or feeders and [`validate`] re-checks every
//! component, reporting all violations at once.
//!
//! ## Quick Start
//!
//! ```rust
//! use gridconv_core::model::*;
//! use gridconv_core::phase::THREE_PHASE;
//! use gridconv_core::{topology, System};
//!
//! let mut system = System::new("demo");
//! for name in ["sourcebus", "b2"] {
//!     system
//!         .add(DistributionBus::new(name, THREE_PHASE.to_vec(), 1.0, VoltageType::LineToLine))
//!         .unwrap();
//! }
//! system
//!     .add(DistributionVoltageSource {
//!         name: "source".into(),
//!         bus: "sourcebus".into(),
//!         phases: THREE_PHASE.to_vec(),
//!         equipment: VoltageSourceEquipment::balanced("source", 3, 7_200.0, 0.0, [0.0; 4]),
//!     })
//!     .unwrap();
//! system
//!     .add(MatrixImpedanceBranch {
//!         name: "l1".into(),
//!         buses: vec!["sourcebus".into(), "b2".into()],
//!         length: 100.0,
//!         phases: THREE_PHASE.to_vec(),
//!         equipment: MatrixImpedanceEquipment::diagonal("lc", 3, 1e-4, 2e-4, 0.0, 400.0),
//!     })
//!     .unwrap();
//!
//! topology::assign_bus_voltages(&mut system);
//! assert!((system.bus("b2").unwrap().rated_voltage - 12_470.4).abs() < 1e-6);
//! ```
//!
//! ## Modules
//!
//! - [`model`] - buses, equipment, devices and controllers
//! - [`system`] - registry and multigraph view
//! - [`topology`] / [`truncation`] - repair passes
//! - [`validate`] - aggregated constraint checks
//! - [`session`] - named systems for multi-model runs
//! - [`metrics`] - electrical summaries for round-trip comparison
//! - [`diagnostics`] - non-fatal issues reported by readers

pub mod diagnostics;
pub mod error;
pub mod graph_utils;
pub mod metrics;
pub mod model;
pub mod phase;
pub mod session;
pub mod system;
pub mod topology;
pub mod truncation;
pub mod validate;

pub use diagnostics::{DiagnosticIssue, Diagnostics, ReadStats};
pub use error::{GridError, GridResult};
pub use metrics::SystemMetrics;
pub use model::{Component, ComponentKind};
pub use phase::Phase;
pub use session::Session;
pub use system::{DeviceEdge, System, SystemGraph};
pub use validate::{validate, ValidationIssue};

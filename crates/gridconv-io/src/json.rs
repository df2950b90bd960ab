//! Canonical JSON snapshot: `{"name": ..., "components": [...]}` with every
//! component tagged by its kind.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use gridconv_core::{validate, Component, Diagnostics, ReadStats, System};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::options::ReadResult;

/// File name used when a snapshot path names a directory.
pub const SNAPSHOT_FILE: &str = "system.json";

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    name: String,
    components: Vec<Component>,
}

fn snapshot_path(path: &Path) -> PathBuf {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        path.to_path_buf()
    } else {
        path.join(SNAPSHOT_FILE)
    }
}

/// Serialize `system` to `path` (a `.json` file or a directory).
pub fn write_json(system: &System, path: &Path) -> Result<Vec<PathBuf>> {
    let target = snapshot_path(path);
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory '{}'", parent.display()))?;
    }
    let snapshot = Snapshot {
        name: system.name.clone(),
        components: system.iter().cloned().collect(),
    };
    let file = File::create(&target)
        .with_context(|| format!("creating JSON snapshot: {}", target.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &snapshot)
        .with_context(|| format!("serializing system '{}'", system.name))?;
    writer.flush()?;
    info!(path = %target.display(), components = snapshot.components.len(), "wrote JSON snapshot");
    Ok(vec![target])
}

/// Rebuild a system from a snapshot, re-checking every component.
pub fn read_json(path: &Path) -> Result<ReadResult> {
    let source = snapshot_path(path);
    let file = File::open(&source)
        .with_context(|| format!("opening JSON snapshot '{}'; ensure file exists", source.display()))?;
    let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing JSON snapshot '{}'", source.display()))?;

    let mut system = System::new(snapshot.name);
    let mut stats = ReadStats::default();
    let total = snapshot.components.len();
    for component in snapshot.components {
        let kind = component.kind();
        system.add(component)?;
        stats.record(kind.as_str(), 1, 1);
    }
    validate(&system)?;
    info!(components = total, "loaded JSON snapshot");
    Ok(ReadResult {
        system,
        diagnostics: Diagnostics::new(),
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridconv_core::model::*;
    use gridconv_core::phase::THREE_PHASE;
    use gridconv_core::ComponentKind;

    fn small() -> System {
        let mut system = System::new("snap");
        system
            .add(DistributionBus::new("b1", THREE_PHASE.to_vec(), 480.0, VoltageType::LineToLine))
            .unwrap();
        system
            .add(DistributionLoad {
                name: "l1".into(),
                bus: "b1".into(),
                phases: THREE_PHASE.to_vec(),
                equipment: LoadEquipment {
                    name: "l1".into(),
                    phase_loads: vec![PhaseLoad::constant_power(1_000.0, 100.0); 3],
                    connection_type: ConnectionType::Star,
                },
            })
            .unwrap();
        system
    }

    #[test]
    fn directory_target_uses_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_json(&small(), dir.path()).unwrap();
        assert_eq!(files, [dir.path().join(SNAPSHOT_FILE)]);

        let back = read_json(dir.path()).unwrap();
        assert_eq!(back.system, small());
        assert_eq!(back.stats.total_parsed(), 2);
    }

    #[test]
    fn converted_units_survive_exactly() {
        // one ulp above 1e-11, as produced by per-km to per-m scaling
        let capacitance = 1.0000000000000001e-11;
        assert_ne!(capacitance, 1e-11);
        let mut system = small();
        system
            .add(DistributionBus::new("b2", THREE_PHASE.to_vec(), 480.0, VoltageType::LineToLine))
            .unwrap();
        system
            .add(MatrixImpedanceBranch {
                name: "l1".into(),
                buses: vec!["b1".into(), "b2".into()],
                length: 1.0 / 3.0,
                phases: THREE_PHASE.to_vec(),
                equipment: MatrixImpedanceEquipment::diagonal("lc", 3, 0.1 / 3.0, 2e-4, capacitance, 400.0),
            })
            .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exact.json");
        write_json(&system, &path).unwrap();
        assert_eq!(read_json(&path).unwrap().system, system);
    }

    #[test]
    fn duplicate_components_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dup.json");
        let bus = serde_json::to_value(Component::from(DistributionBus::new(
            "b1",
            THREE_PHASE.to_vec(),
            480.0,
            VoltageType::LineToLine,
        )))
        .unwrap();
        let text = serde_json::json!({ "name": "dup", "components": [bus.clone(), bus] });
        fs::write(&path, text.to_string()).unwrap();
        let err = read_json(&path).unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert_eq!(small().count(ComponentKind::DistributionLoad), 1);
    }
}

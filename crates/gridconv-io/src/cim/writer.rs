use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use gridconv_core::{Component, ComponentKind, System};
use tracing::{debug, info};

use super::document::{xml_escape, CimDocument};
use super::emitters::{populate, BusIndex};
use crate::options::{safe_group_name, CimOutputMode, WriterOptions};
use crate::rdf::CIM_NS;

const SINGLE_FILE: &str = "model.xml";
const MANIFEST_FILE: &str = "manifest.xml";
const DEFAULT_SUBSTATION: &str = "default_substation";
const DEFAULT_FEEDER: &str = "default_feeder";

/// Kinds with a CIM emitter.
const EMITTED_KINDS: [ComponentKind; 12] = [
    ComponentKind::DistributionBus,
    ComponentKind::DistributionVoltageSource,
    ComponentKind::DistributionLoad,
    ComponentKind::MatrixImpedanceBranch,
    ComponentKind::DistributionTransformer,
    ComponentKind::DistributionRegulator,
    ComponentKind::DistributionCapacitor,
    ComponentKind::MatrixImpedanceSwitch,
    ComponentKind::MatrixImpedanceFuse,
    ComponentKind::MatrixImpedanceRecloser,
    ComponentKind::DistributionSolar,
    ComponentKind::DistributionBattery,
];

/// One entry of the package manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub substation: String,
    pub feeder: String,
    pub kind: String,
    pub path: String,
}

fn component_group(system: &System, component: &Component) -> (String, String) {
    let bus = match component.as_bus() {
        Some(bus) => Some(bus),
        None => component.buses().first().and_then(|name| system.bus(name)),
    };
    let substation = bus
        .and_then(|b| b.substation.as_deref())
        .unwrap_or(DEFAULT_SUBSTATION);
    let feeder = bus
        .and_then(|b| b.feeder.as_deref())
        .unwrap_or(DEFAULT_FEEDER);
    (safe_group_name(substation), safe_group_name(feeder))
}

fn write_document(doc: &CimDocument, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory '{}'", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("creating CIM RDF file: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    doc.write_to(&mut writer)?;
    writer.flush()?;
    debug!(path = %path.display(), elements = doc.len(), "wrote CIM document");
    Ok(())
}

fn write_manifest(entries: &[ManifestEntry], path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("creating CIM manifest: {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writeln!(writer, "<?xml version=\"1.0\" encoding=\"utf-8\"?>")?;
    writeln!(writer, "<PackageManifest xmlns:cim=\"{}\">", CIM_NS)?;
    for entry in entries {
        writeln!(
            writer,
            "  <cim:File substation=\"{}\" feeder=\"{}\" type=\"{}\" path=\"{}\"/>",
            xml_escape(&entry.substation),
            xml_escape(&entry.feeder),
            xml_escape(&entry.kind),
            xml_escape(&entry.path)
        )?;
    }
    writeln!(writer, "</PackageManifest>")?;
    writer.flush()?;
    Ok(())
}

/// Write `system` as CIM IEC 61968-13 RDF/XML under `output_dir`.
///
/// Single mode writes `model.xml`. Package mode writes one document per
/// substation/feeder group (and per component kind when
/// `separate_equipment_types` is set) plus `manifest.xml`. Returns every
/// written file.
pub fn write_cim(system: &System, output_dir: &Path, options: &WriterOptions) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("creating output directory '{}'", output_dir.display()))?;

    let components: Vec<&Component> = EMITTED_KINDS
        .iter()
        .flat_map(|kind| system.iter_kind(*kind))
        .collect();
    let buses: BusIndex = system.buses().map(|bus| (bus.name.as_str(), bus)).collect();

    if options.cim_output_mode == CimOutputMode::Single {
        let mut doc = CimDocument::new();
        populate(&mut doc, &components, &buses);
        let path = output_dir.join(SINGLE_FILE);
        write_document(&doc, &path)?;
        info!(path = %path.display(), elements = doc.len(), "wrote CIM model");
        return Ok(vec![path]);
    }

    let mut groups: BTreeMap<(String, String), Vec<&Component>> = BTreeMap::new();
    for component in &components {
        let (substation, feeder) = component_group(system, component);
        let key = (
            if options.separate_substations {
                substation
            } else {
                "all_substations".to_string()
            },
            if options.separate_feeders {
                feeder
            } else {
                "all_feeders".to_string()
            },
        );
        groups.entry(key).or_default().push(component);
    }

    let mut written = Vec::new();
    let mut manifest = Vec::new();
    for ((substation, feeder), members) in &groups {
        let folder = output_dir.join(substation).join(feeder);
        if !options.separate_equipment_types {
            let file_name = format!("{}__{}.xml", substation, feeder);
            let mut doc = CimDocument::new();
            populate(&mut doc, members, &buses);
            let path = folder.join(&file_name);
            write_document(&doc, &path)?;
            written.push(path);
            manifest.push(ManifestEntry {
                substation: substation.clone(),
                feeder: feeder.clone(),
                kind: "all".to_string(),
                path: format!("{}/{}/{}", substation, feeder, file_name),
            });
            continue;
        }

        let mut buckets: BTreeMap<ComponentKind, Vec<&Component>> = BTreeMap::new();
        for component in members.iter().copied() {
            buckets.entry(component.kind()).or_default().push(component);
        }
        for (kind, bucket) in buckets {
            let file_name = format!("{}__{}__{}.xml", substation, feeder, kind.snake_name());
            let mut doc = CimDocument::new();
            populate(&mut doc, &bucket, &buses);
            let path = folder.join(&file_name);
            write_document(&doc, &path)?;
            written.push(path);
            manifest.push(ManifestEntry {
                substation: substation.clone(),
                feeder: feeder.clone(),
                kind: kind.to_string(),
                path: format!("{}/{}/{}", substation, feeder, file_name),
            });
        }
    }

    let manifest_path = output_dir.join(MANIFEST_FILE);
    write_manifest(&manifest, &manifest_path)?;
    written.push(manifest_path);
    info!(files = written.len(), groups = groups.len(), "wrote CIM package");
    Ok(written)
}

use std::{fs, path::Path, path::PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::rdf::{parse_rdf_xml, Graph};

const MANIFEST_FILE: &str = "manifest.xml";

/// Load every RDF/XML document under `path` into one graph.
pub fn load_graph(path: &Path) -> Result<Graph> {
    let mut graph = Graph::new();
    for (origin, text) in collect_cim_documents(path)? {
        parse_rdf_xml(&mut graph, &text)
            .with_context(|| format!("parsing CIM document '{}'", origin))?;
    }
    Ok(graph)
}

/// Read the CIM documents behind `path`: one RDF/XML file, a directory tree
/// of `.rdf`/`.xml` files (as written in package mode) or a zip archive of
/// them. Package manifests are skipped. Returns (origin, text) pairs in
/// path order.
pub fn collect_cim_documents(path: &Path) -> Result<Vec<(String, String)>> {
    if path.is_dir() {
        let mut files = Vec::new();
        let mut pending = vec![path.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in fs::read_dir(&dir).with_context(|| {
                format!(
                    "reading CIM directory '{}'; ensure it contains RDF/XML files",
                    dir.display()
                )
            })? {
                let doc_path = entry?.path();
                if doc_path.is_dir() {
                    pending.push(doc_path);
                } else if is_rdf_document(&doc_path.to_string_lossy()) {
                    files.push(doc_path);
                }
            }
        }
        files.sort();
        let docs = files
            .into_iter()
            .map(|file: PathBuf| {
                let text = fs::read_to_string(&file)
                    .with_context(|| format!("reading CIM file '{}'", file.display()))?;
                Ok((file.display().to_string(), text))
            })
            .collect::<Result<Vec<_>>>()?;
        if docs.is_empty() {
            Err(anyhow!(
                "CIM directory '{}' contains no RDF/XML files",
                path.display()
            ))
        } else {
            Ok(docs)
        }
    } else if path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
    {
        read_archive(path)
    } else {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading CIM file '{}'; ensure it exists", path.display()))?;
        Ok(vec![(path.display().to_string(), text)])
    }
}

fn is_rdf_document(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    (lower.ends_with(".rdf") || lower.ends_with(".xml"))
        && !lower.ends_with(&format!("/{}", MANIFEST_FILE))
        && lower != MANIFEST_FILE
}

#[cfg(feature = "archives")]
fn read_archive(path: &Path) -> Result<Vec<(String, String)>> {
    use std::{fs::File, io::Read};
    use zip::ZipArchive;

    let mut archive = ZipArchive::new(File::open(path)?)?;
    let mut docs = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if is_rdf_document(file.name()) {
            let mut contents = String::new();
            file.read_to_string(&mut contents)?;
            docs.push((file.name().to_string(), contents));
        }
    }
    docs.sort_by(|a, b| a.0.cmp(&b.0));
    if docs.is_empty() {
        Err(anyhow!(
            "CIM zip '{}' contains no RDF/XML files",
            path.display()
        ))
    } else {
        Ok(docs)
    }
}

#[cfg(not(feature = "archives"))]
fn read_archive(path: &Path) -> Result<Vec<(String, String)>> {
    Err(anyhow!(
        "reading '{}' requires the 'archives' feature",
        path.display()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_is_not_a_document() {
        assert!(is_rdf_document("sub/fdr/sub__fdr__distribution_bus.xml"));
        assert!(is_rdf_document("MODEL.RDF"));
        assert!(!is_rdf_document("manifest.xml"));
        assert!(!is_rdf_document("out/manifest.xml"));
        assert!(!is_rdf_document("notes.txt"));
    }

    #[test]
    fn directory_is_walked_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("sub").join("fdr");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("a.xml"), "<rdf:RDF/>").unwrap();
        fs::write(dir.path().join("manifest.xml"), "<PackageManifest/>").unwrap();

        let docs = collect_cim_documents(dir.path()).unwrap();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].0.ends_with("a.xml"));
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = collect_cim_documents(dir.path()).unwrap_err();
        assert!(err.to_string().contains("contains no RDF/XML files"));
    }
}

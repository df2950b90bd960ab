//! In-memory RDF/XML document for the CIM writer.
//!
//! Elements are collected first and serialized in insertion order, so an
//! emitter can finish an element (including references to objects it
//! creates afterwards) before pushing it.

use std::collections::HashMap;
use std::fmt::Display;
use std::io::Write;

use anyhow::Result;
use uuid::Uuid;

use crate::rdf::{CIM_NS, RDF_NS};

/// Stable identifier for a CIM object: UUID v5 in the URL namespace over
/// `gridconv-cim:{kind}:{name}`.
pub fn deterministic_id(kind: &str, name: &str) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        format!("gridconv-cim:{}:{}", kind, name).as_bytes(),
    )
    .to_string()
}

pub fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[derive(Debug, Clone)]
enum Property {
    Literal(String, String),
    Resource(String, String),
}

/// One `cim:` element with its properties.
#[derive(Debug, Clone)]
pub struct Element {
    class: &'static str,
    id: String,
    properties: Vec<Property>,
}

impl Element {
    /// An identified object carrying its name and mRID.
    pub fn identified(class: &'static str, id: &str, name: &str) -> Self {
        let mut element = Self {
            class,
            id: id.to_string(),
            properties: Vec::new(),
        };
        element.literal("IdentifiedObject.name", name);
        element.literal("IdentifiedObject.mRID", id);
        element
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn literal(&mut self, property: &str, value: impl Display) -> &mut Self {
        self.properties
            .push(Property::Literal(property.to_string(), value.to_string()));
        self
    }

    pub fn reference(&mut self, property: &str, id: &str) -> &mut Self {
        self.properties
            .push(Property::Resource(property.to_string(), id.to_string()));
        self
    }

    fn write_to(&self, writer: &mut impl Write) -> Result<()> {
        writeln!(
            writer,
            "  <cim:{} rdf:about=\"#{}\">",
            self.class,
            xml_escape(&self.id)
        )?;
        for property in &self.properties {
            match property {
                Property::Literal(name, value) => writeln!(
                    writer,
                    "    <cim:{name}>{}</cim:{name}>",
                    xml_escape(value),
                    name = name
                )?,
                Property::Resource(name, id) => writeln!(
                    writer,
                    "    <cim:{} rdf:resource=\"#{}\"/>",
                    name,
                    xml_escape(id)
                )?,
            }
        }
        writeln!(writer, "  </cim:{}>", self.class)?;
        Ok(())
    }
}

/// Elements of one output document plus the caches shared by emitters.
#[derive(Debug, Default)]
pub struct CimDocument {
    elements: Vec<Element>,
    base_voltages: HashMap<String, String>,
}

impl CimDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, element: Element) {
        self.elements.push(element);
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.elements.iter().any(|e| e.id == id)
    }

    /// Id of the `BaseVoltage` for `nominal_voltage`, emitting it on first
    /// use.
    pub fn base_voltage(&mut self, nominal_voltage: f64) -> String {
        let key = format!("{:.6}", nominal_voltage);
        if let Some(id) = self.base_voltages.get(&key) {
            return id.clone();
        }
        let id = deterministic_id("base_voltage", &key);
        let mut element = Element::identified(
            "BaseVoltage",
            &id,
            &format!("BaseVoltage_{}", nominal_voltage.round() as i64),
        );
        element.literal("BaseVoltage.nominalVoltage", nominal_voltage);
        self.push(element);
        self.base_voltages.insert(key, id.clone());
        id
    }

    pub fn write_to(&self, writer: &mut impl Write) -> Result<()> {
        writeln!(writer, "<?xml version=\"1.0\" encoding=\"utf-8\"?>")?;
        writeln!(
            writer,
            "<rdf:RDF xmlns:rdf=\"{}\" xmlns:cim=\"{}\">",
            RDF_NS, CIM_NS
        )?;
        for element in &self.elements {
            element.write_to(writer)?;
        }
        writeln!(writer, "</rdf:RDF>")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable() {
        let a = deterministic_id("connectivity_node", "b1");
        assert_eq!(a, deterministic_id("connectivity_node", "b1"));
        assert_ne!(a, deterministic_id("connectivity_node", "b2"));
        assert_ne!(a, deterministic_id("location", "b1"));
    }

    #[test]
    fn base_voltage_is_cached() {
        let mut doc = CimDocument::new();
        let first = doc.base_voltage(12470.0);
        let second = doc.base_voltage(12470.0);
        assert_eq!(first, second);
        assert_eq!(doc.len(), 1);
        doc.base_voltage(480.0);
        assert_eq!(doc.len(), 2);
    }

    #[test]
    fn serializes_escaped_rdf() {
        let mut doc = CimDocument::new();
        let mut element = Element::identified("ConnectivityNode", "n1", "a&b");
        element.reference("PowerSystemResource.Location", "loc1");
        doc.push(element);
        let mut out = Vec::new();
        doc.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("<cim:ConnectivityNode rdf:about=\"#n1\">"));
        assert!(text.contains("<cim:IdentifiedObject.name>a&amp;b</cim:IdentifiedObject.name>"));
        assert!(text.contains("<cim:PowerSystemResource.Location rdf:resource=\"#loc1\"/>"));
        assert!(text.trim_end().ends_with("</rdf:RDF>"));
    }
}

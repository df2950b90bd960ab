//! RDF/XML loading on top of the quick-xml event reader.
//!
//! Covers the striped syntax CIM exports use: typed node elements with
//! `rdf:about` / `rdf:ID` / `rdf:nodeID`, property elements carrying
//! literal text, `rdf:resource` references or a nested node element,
//! property attributes and `rdf:parseType="Resource"`.

use anyhow::{bail, Result};
use quick_xml::{
    events::{BytesStart, Event},
    Reader,
};

use super::graph::{Graph, Term, RDF_NS, RDF_TYPE};

enum Frame {
    Root,
    Node(Term),
    Property {
        subject: Term,
        predicate: String,
        text: String,
        object: Option<Term>,
    },
}

/// Parse one RDF/XML document into `graph`.
pub fn parse_rdf_xml(graph: &mut Graph, document: &str) -> Result<()> {
    let mut reader = Reader::from_str(document);
    reader.trim_text(true);
    let mut stack: Vec<Frame> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                declare_namespaces(graph, e)?;
                let frame = open_element(graph, &mut stack, e)?;
                stack.push(frame);
            }
            Ok(Event::Empty(ref e)) => {
                declare_namespaces(graph, e)?;
                let frame = open_element(graph, &mut stack, e)?;
                close_frame(graph, frame);
            }
            Ok(Event::Text(e)) => {
                if let Some(Frame::Property { text, .. }) = stack.last_mut() {
                    text.push_str(&e.unescape()?);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(Frame::Property { text, .. }) = stack.last_mut() {
                    text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Ok(Event::End(_)) => {
                if let Some(frame) = stack.pop() {
                    close_frame(graph, frame);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => bail!(
                "malformed RDF/XML at byte {}: {}",
                reader.buffer_position(),
                e
            ),
            _ => {}
        }
    }
    Ok(())
}

fn open_element(graph: &mut Graph, stack: &mut [Frame], event: &BytesStart) -> Result<Frame> {
    let element = element_iri(graph, &qualified_name(event.name().as_ref()));
    if element == format!("{}RDF", RDF_NS) {
        return Ok(Frame::Root);
    }

    match stack.last_mut() {
        Some(Frame::Node(subject)) => {
            let subject = subject.clone();
            open_property(graph, subject, element, event)
        }
        Some(Frame::Property { object, .. }) => {
            let node = open_node(graph, &element, event)?;
            if let Frame::Node(nested) = &node {
                *object = Some(nested.clone());
            }
            Ok(node)
        }
        Some(Frame::Root) | None => open_node(graph, &element, event),
    }
}

fn open_node(graph: &mut Graph, element: &str, event: &BytesStart) -> Result<Frame> {
    let subject = if let Some(about) = attribute_value(event, "about")? {
        resource_iri(&about)
    } else if let Some(id) = attribute_value(event, "ID")? {
        resource_iri(&id)
    } else if let Some(node_id) = attribute_value(event, "nodeID")? {
        Term::Blank(format!("_:{}", node_id))
    } else {
        graph.fresh_blank()
    };

    if element != format!("{}Description", RDF_NS) {
        graph.insert(subject.clone(), RDF_TYPE, Term::Iri(element.to_string()));
    }
    for (predicate, value) in property_attributes(graph, event)? {
        graph.insert(subject.clone(), predicate, Term::Literal(value));
    }
    Ok(Frame::Node(subject))
}

fn open_property(
    graph: &mut Graph,
    subject: Term,
    predicate: String,
    event: &BytesStart,
) -> Result<Frame> {
    if attribute_value(event, "parseType")?.as_deref() == Some("Resource") {
        let node = graph.fresh_blank();
        graph.insert(subject, predicate, node.clone());
        return Ok(Frame::Node(node));
    }
    let object = if let Some(resource) = attribute_value(event, "resource")? {
        Some(resource_iri(&resource))
    } else {
        attribute_value(event, "nodeID")?.map(|id| Term::Blank(format!("_:{}", id)))
    };
    Ok(Frame::Property {
        subject,
        predicate,
        text: String::new(),
        object,
    })
}

fn close_frame(graph: &mut Graph, frame: Frame) {
    if let Frame::Property {
        subject,
        predicate,
        text,
        object,
    } = frame
    {
        let object = object.unwrap_or_else(|| Term::Literal(text.trim().to_string()));
        graph.insert(subject, predicate, object);
    }
}

fn declare_namespaces(graph: &mut Graph, event: &BytesStart) -> Result<()> {
    for attr in event.attributes().with_checks(false) {
        let attr = attr?;
        let key = qualified_name(attr.key.as_ref());
        if key == "xmlns" {
            graph.bind("", attr.unescape_value()?.into_owned());
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            graph.bind(prefix, attr.unescape_value()?.into_owned());
        }
    }
    Ok(())
}

/// Attributes of a node element that are themselves properties.
fn property_attributes(graph: &Graph, event: &BytesStart) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for attr in event.attributes().with_checks(false) {
        let attr = attr?;
        let key = qualified_name(attr.key.as_ref());
        if key.starts_with("xmlns") || key.starts_with("xml:") {
            continue;
        }
        let iri = element_iri(graph, &key);
        if iri.starts_with(RDF_NS) || !key.contains(':') {
            continue;
        }
        out.push((iri, attr.unescape_value()?.into_owned()));
    }
    Ok(out)
}

fn element_iri(graph: &Graph, qualified: &str) -> String {
    let (prefix, local) = qualified.split_once(':').unwrap_or(("", qualified));
    match graph.namespaces().get(prefix) {
        Some(namespace) => format!("{}{}", namespace, local),
        None => qualified.to_string(),
    }
}

fn attribute_value(event: &BytesStart, key: &str) -> Result<Option<String>> {
    for attr in event.attributes().with_checks(false) {
        let attr = attr?;
        if let Ok(name) = std::str::from_utf8(attr.key.local_name().as_ref()) {
            if name == key {
                return Ok(Some(attr.unescape_value()?.into_owned()));
            }
        }
    }
    Ok(None)
}

/// Same-document references (`#_id`) and `rdf:ID` values share one form.
fn resource_iri(value: &str) -> Term {
    Term::Iri(value.trim_start_matches('#').to_string())
}

fn qualified_name(name: &[u8]) -> String {
    String::from_utf8_lossy(name).into_owned()
}

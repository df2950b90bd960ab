//! Minimal RDF support for CIM documents: an indexed triple store, an
//! RDF/XML loader and a pattern query engine.

mod graph;
mod query;
mod xml;

pub use graph::{shorten_uri, Graph, Term, Triple, CIM_NS, RDF_NS, RDF_TYPE};
pub use query::{not_exists, optional, t, Node, Pattern, SelectQuery};
pub use xml::parse_rdf_xml;

//! Basic graph pattern matching with OPTIONAL and NOT EXISTS groups.
//!
//! Queries are built from [`t`], [`optional`] and [`not_exists`]. In a
//! pattern term, `?name` is a variable; anything else is a constant that
//! expands through the graph's prefixes (`cim:Terminal`, `a`, `<iri>`).
//!
//! ```
//! use gridconv_io::rdf::{parse_rdf_xml, t, Graph, SelectQuery};
//!
//! let doc = r##"<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
//!                       xmlns:cim="http://iec.ch/TC57/CIM100#">
//!   <cim:ConnectivityNode rdf:about="#n1">
//!     <cim:IdentifiedObject.name>b1</cim:IdentifiedObject.name>
//!   </cim:ConnectivityNode>
//! </rdf:RDF>"##;
//! let mut graph = Graph::new();
//! parse_rdf_xml(&mut graph, doc).unwrap();
//!
//! let table = SelectQuery::new(
//!     &["?name"],
//!     vec![
//!         t("?node", "a", "cim:ConnectivityNode"),
//!         t("?node", "cim:IdentifiedObject.name", "?name"),
//!     ],
//! )
//! .run(&graph, &["bus"]);
//! assert_eq!(table.unique("bus"), vec!["b1"]);
//! ```

use std::collections::HashMap;

use super::graph::{Graph, Term};
use crate::table::Table;

type Binding = HashMap<String, Term>;

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Var(String),
    Const(String),
}

impl Node {
    fn parse(text: &str) -> Self {
        match text.strip_prefix('?') {
            Some(name) => Node::Var(name.to_string()),
            None => Node::Const(text.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Triple {
        subject: Node,
        predicate: String,
        object: Node,
    },
    Optional(Vec<Pattern>),
    NotExists(Vec<Pattern>),
}

/// A triple pattern.
pub fn t(subject: &str, predicate: &str, object: &str) -> Pattern {
    Pattern::Triple {
        subject: Node::parse(subject),
        predicate: predicate.to_string(),
        object: Node::parse(object),
    }
}

pub fn optional(patterns: Vec<Pattern>) -> Pattern {
    Pattern::Optional(patterns)
}

pub fn not_exists(patterns: Vec<Pattern>) -> Pattern {
    Pattern::NotExists(patterns)
}

/// A projection over a list of patterns.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    variables: Vec<String>,
    patterns: Vec<Pattern>,
}

impl SelectQuery {
    pub fn new(variables: &[&str], patterns: Vec<Pattern>) -> Self {
        Self {
            variables: variables
                .iter()
                .map(|v| v.trim_start_matches('?').to_string())
                .collect(),
            patterns,
        }
    }

    /// Evaluate and project into a table. Columns are assigned to the
    /// selected variables by position; resources are shortened to their
    /// local name and duplicate rows are dropped.
    pub fn run(&self, graph: &Graph, columns: &[&str]) -> Table {
        let mut table = Table::new(columns);
        for binding in evaluate(graph, &self.patterns, vec![Binding::new()]) {
            table.push(
                self.variables
                    .iter()
                    .take(columns.len())
                    .map(|var| binding.get(var).map(Term::normalized))
                    .collect(),
            );
        }
        table.dedup();
        table
    }
}

fn evaluate(graph: &Graph, patterns: &[Pattern], mut bindings: Vec<Binding>) -> Vec<Binding> {
    for pattern in patterns {
        if bindings.is_empty() {
            break;
        }
        bindings = match pattern {
            Pattern::Triple {
                subject,
                predicate,
                object,
            } => match_triple(graph, subject, predicate, object, bindings),
            Pattern::Optional(group) => bindings
                .into_iter()
                .flat_map(|binding| {
                    let extended = evaluate(graph, group, vec![binding.clone()]);
                    if extended.is_empty() {
                        vec![binding]
                    } else {
                        extended
                    }
                })
                .collect(),
            Pattern::NotExists(group) => bindings
                .into_iter()
                .filter(|binding| evaluate(graph, group, vec![binding.clone()]).is_empty())
                .collect(),
        };
    }
    bindings
}

fn match_triple(
    graph: &Graph,
    subject: &Node,
    predicate: &str,
    object: &Node,
    bindings: Vec<Binding>,
) -> Vec<Binding> {
    let Some(predicate) = graph.expand(predicate) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for binding in bindings {
        let (Some(s), Some(o)) = (resolve(graph, subject, &binding), resolve(graph, object, &binding))
        else {
            continue;
        };
        for triple in graph.matching(s.as_ref(), &predicate, o.as_ref()) {
            let mut next = binding.clone();
            if bind(&mut next, subject, &triple.subject) && bind(&mut next, object, &triple.object) {
                out.push(next);
            }
        }
    }
    out
}

/// `Some(None)` for a free variable, `Some(Some(term))` for a bound value
/// and `None` for a constant that cannot exist in this graph.
fn resolve(graph: &Graph, node: &Node, binding: &Binding) -> Option<Option<Term>> {
    match node {
        Node::Var(name) => Some(binding.get(name).cloned()),
        Node::Const(name) => graph.expand(name).map(|iri| Some(Term::Iri(iri))),
    }
}

fn bind(binding: &mut Binding, node: &Node, value: &Term) -> bool {
    match node {
        Node::Const(_) => true,
        Node::Var(name) => match binding.get(name) {
            Some(existing) => existing == value,
            None => {
                binding.insert(name.clone(), value.clone());
                true
            }
        },
    }
}

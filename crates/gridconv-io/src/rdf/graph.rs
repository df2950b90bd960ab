use std::collections::{BTreeMap, HashMap};

pub const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
pub const CIM_NS: &str = "http://iec.ch/TC57/CIM100#";
pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// An RDF node: resource, blank node or literal text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Term {
    Iri(String),
    Blank(String),
    Literal(String),
}

impl Term {
    /// Table cell text: resources are shortened to their local name.
    pub fn normalized(&self) -> String {
        match self {
            Term::Iri(iri) => shorten_uri(iri),
            Term::Blank(id) => id.clone(),
            Term::Literal(text) => text.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Triple {
    pub subject: Term,
    pub predicate: String,
    pub object: Term,
}

/// In-memory triple store with the indexes the pattern matcher needs.
#[derive(Debug, Default)]
pub struct Graph {
    triples: Vec<Triple>,
    namespaces: BTreeMap<String, String>,
    by_predicate: HashMap<String, Vec<usize>>,
    by_subject: HashMap<(Term, String), Vec<usize>>,
    by_object: HashMap<(Term, String), Vec<usize>>,
    blank_nodes: usize,
}

impl Graph {
    pub fn new() -> Self {
        let mut graph = Self::default();
        graph.bind("rdf", RDF_NS);
        graph.bind("cim", CIM_NS);
        graph
    }

    /// Declare a prefix; later declarations win.
    pub fn bind(&mut self, prefix: impl Into<String>, namespace: impl Into<String>) {
        self.namespaces.insert(prefix.into(), namespace.into());
    }

    pub fn namespaces(&self) -> &BTreeMap<String, String> {
        &self.namespaces
    }

    /// Add a triple. Re-asserting an existing triple is a no-op.
    pub fn insert(&mut self, subject: Term, predicate: impl Into<String>, object: Term) {
        let predicate = predicate.into();
        let key = (subject.clone(), predicate.clone());
        if let Some(existing) = self.by_subject.get(&key) {
            if existing.iter().any(|&i| self.triples[i].object == object) {
                return;
            }
        }
        let index = self.triples.len();
        self.by_predicate
            .entry(predicate.clone())
            .or_default()
            .push(index);
        self.by_subject.entry(key).or_default().push(index);
        self.by_object
            .entry((object.clone(), predicate.clone()))
            .or_default()
            .push(index);
        self.triples.push(Triple {
            subject,
            predicate,
            object,
        });
    }

    /// A blank node id unique within this graph.
    pub fn fresh_blank(&mut self) -> Term {
        self.blank_nodes += 1;
        Term::Blank(format!("_:b{}", self.blank_nodes))
    }

    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }

    /// Expand `prefix:local` against the declared namespaces; `a` is
    /// `rdf:type` and full IRIs pass through.
    pub fn expand(&self, name: &str) -> Option<String> {
        if name == "a" {
            return Some(RDF_TYPE.to_string());
        }
        if let Some(iri) = name.strip_prefix('<').and_then(|n| n.strip_suffix('>')) {
            return Some(iri.to_string());
        }
        let (prefix, local) = name.split_once(':')?;
        self.namespaces
            .get(prefix)
            .map(|namespace| format!("{}{}", namespace, local))
    }

    /// Triples matching a predicate and optionally bound subject/object.
    pub fn matching<'a>(
        &'a self,
        subject: Option<&Term>,
        predicate: &str,
        object: Option<&Term>,
    ) -> Vec<&'a Triple> {
        let candidates = match (subject, object) {
            (Some(s), _) => self.by_subject.get(&(s.clone(), predicate.to_string())),
            (None, Some(o)) => self.by_object.get(&(o.clone(), predicate.to_string())),
            (None, None) => self.by_predicate.get(predicate),
        };
        candidates
            .map(|indices| {
                indices
                    .iter()
                    .map(|i| &self.triples[*i])
                    .filter(|t| object.map_or(true, |o| &t.object == o))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Local name of a URI: the text after the last `#`, then `/`, then `.`.
///
/// ```
/// use gridconv_io::rdf::shorten_uri;
///
/// assert_eq!(shorten_uri("http://iec.ch/TC57/CIM100#SinglePhaseKind.A"), "A");
/// assert_eq!(shorten_uri("#_b1"), "_b1");
/// ```
pub fn shorten_uri(value: &str) -> String {
    let mut token = value.trim_end_matches('/');
    for delimiter in ['#', '/', '.'] {
        if let Some((_, tail)) = token.rsplit_once(delimiter) {
            token = tail;
        }
    }
    token.to_string()
}

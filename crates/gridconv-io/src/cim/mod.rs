//! CIM IEC 61968-13 RDF/XML support.
//!
//! Reading runs fixed pattern queries over the loaded triple store, shapes
//! the rows into per-kind tables and hands every row to a registered
//! mapper. Writing emits one RDF/XML document (or a package of documents
//! per substation, feeder and kind) whose structure the queries read back.

pub mod datasets;
pub mod document;
pub mod documents;
pub mod emitters;
pub mod mappers;
pub mod queries;
pub mod reader;
pub mod writer;

pub use mappers::{MapperFn, MapperRegistry};
pub use reader::read_cim;
pub use writer::{write_cim, ManifestEntry};

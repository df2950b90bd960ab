//! CYME sectioned text exports (network, equipment and load files).

pub mod mappers;
pub mod reader;
pub mod sections;

pub use reader::read_cyme;
pub use sections::CymeFile;

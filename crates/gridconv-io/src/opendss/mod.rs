//! OpenDSS scripts.
//!
//! The reader follows `Redirect`/`Compile` from a master script, maps
//! element definitions onto the canonical model and repairs bus phases and
//! voltages. The writer emits a master script redirecting to one script
//! per device class.

pub mod parser;
pub mod reader;
pub mod writer;

pub use parser::{DssElement, DssModel};
pub use reader::read_opendss;
pub use writer::{write_opendss, MASTER_FILE};

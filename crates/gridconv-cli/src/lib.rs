pub mod cli;

pub use cli::{Cli, Commands, ConvertArgs, InspectArgs};

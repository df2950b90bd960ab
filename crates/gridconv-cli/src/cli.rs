use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint};
use clap_complete::Shell;
use gridconv_core::ComponentKind;
use gridconv_io::{CimOutputMode, ReaderKind, WriterKind};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gridconv-cli", author, version, about, long_about = None)]
pub struct Cli {
    /// Set the logging level
    #[arg(long, default_value = "info", global = true)]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert a network model between formats
    Convert(ConvertArgs),
    /// List registered readers and writers
    Formats,
    /// Summarize a network model
    Inspect(InspectArgs),
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: Shell,
        /// Write output to a file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
pub struct ConvertArgs {
    /// Input file or directory
    #[arg(value_hint = ValueHint::AnyPath)]
    pub input: PathBuf,

    /// Reader name (see `formats`)
    #[arg(long)]
    pub from: ReaderKind,

    /// Writer name (see `formats`)
    #[arg(long)]
    pub to: WriterKind,

    /// Output directory (or `.json` file for the json writer)
    #[arg(short, long, value_hint = ValueHint::AnyPath)]
    pub output: PathBuf,

    /// Also save the canonical system as a JSON snapshot
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub save_json: Option<PathBuf>,

    /// CIM output layout
    #[arg(long, value_enum, default_value_t = CimMode::Single)]
    pub cim_mode: CimMode,

    /// CIM package: keep all substations in one folder
    #[arg(long)]
    pub no_separate_substations: bool,

    /// CIM package: keep all feeders in one folder
    #[arg(long)]
    pub no_separate_feeders: bool,

    /// CIM package: one document per group instead of per component kind
    #[arg(long)]
    pub no_separate_equipment_types: bool,

    /// OpenDSS: write scripts into per-substation folders
    #[arg(long)]
    pub dss_separate_substations: bool,

    /// OpenDSS: write scripts into per-feeder folders
    #[arg(long)]
    pub dss_separate_feeders: bool,

    /// CYME load model to use when the load file carries several
    #[arg(long)]
    pub load_model_id: Option<String>,

    /// CYME network file name inside the input directory
    #[arg(long)]
    pub network_file: Option<String>,

    /// CYME equipment file name inside the input directory
    #[arg(long)]
    pub equipment_file: Option<String>,

    /// CYME load file name inside the input directory
    #[arg(long)]
    pub load_file: Option<String>,

    /// Keep only this substation (repeatable)
    #[arg(long = "substation")]
    pub substations: Vec<String>,

    /// Keep only this feeder (repeatable)
    #[arg(long = "feeder")]
    pub feeders: Vec<String>,

    /// Print read diagnostics
    #[arg(short, long)]
    pub verbose: bool,

    /// Fail when reading produced any warning
    #[arg(long)]
    pub strict: bool,

    /// Print the conversion report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Input file or directory
    #[arg(value_hint = ValueHint::AnyPath)]
    pub input: PathBuf,

    /// Reader name (see `formats`)
    #[arg(long)]
    pub from: ReaderKind,

    /// List the components of one kind
    #[arg(long)]
    pub kind: Option<ComponentKind>,

    /// CYME load model to use when the load file carries several
    #[arg(long)]
    pub load_model_id: Option<String>,

    /// Emit JSON instead of a table
    #[arg(long)]
    pub json: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CimMode {
    Single,
    Package,
}

impl From<CimMode> for CimOutputMode {
    fn from(mode: CimMode) -> Self {
        match mode {
            CimMode::Single => CimOutputMode::Single,
            CimMode::Package => CimOutputMode::Package,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn convert_flags_parse() {
        let cli = Cli::try_parse_from([
            "gridconv-cli",
            "convert",
            "feeder",
            "--from",
            "cyme",
            "--to",
            "cim_iec_61968_13",
            "-o",
            "out",
            "--cim-mode",
            "package",
            "--feeder",
            "F1",
            "--feeder",
            "F2",
        ])
        .unwrap();
        let Commands::Convert(args) = cli.command else {
            panic!("expected convert");
        };
        assert_eq!(args.from, ReaderKind::Cyme);
        assert_eq!(args.to, WriterKind::Cim);
        assert_eq!(args.cim_mode, CimMode::Package);
        assert_eq!(args.feeders, ["F1", "F2"]);
    }

    #[test]
    fn unknown_reader_is_rejected() {
        let err = Cli::try_parse_from([
            "gridconv-cli", "convert", "x", "--from", "psse", "--to", "json", "-o", "y",
        ])
        .unwrap_err();
        assert!(err.to_string().contains("Unknown reader 'psse'"));
    }
}

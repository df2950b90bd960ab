use std::fs;
use std::io;
use std::process::ExitCode;

use anyhow::Context;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use gridconv_cli::{Cli, Commands};
use tracing::error;
use tracing_subscriber::FmtSubscriber;

mod commands;

fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Convert(args) => commands::convert::handle(args),
        Commands::Formats => commands::formats::handle(),
        Commands::Inspect(args) => commands::inspect::handle(args),
        Commands::Completions { shell, out } => {
            let mut command = Cli::command();
            match out {
                Some(path) => {
                    let mut file = fs::File::create(path)
                        .with_context(|| format!("creating completion file {}", path.display()))?;
                    generate(*shell, &mut command, "gridconv-cli", &mut file);
                }
                None => generate(*shell, &mut command, "gridconv-cli", &mut io::stdout()),
            }
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_writer(io::stderr)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {err}");
    }

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            eprintln!("Error: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

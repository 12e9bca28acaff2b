use anyhow::Error;
use clap::Parser;
use run::{RunArgs, run};

pub mod run;

/// Fork, patch, build and release third-party Python packages.
#[derive(Debug, Clone, Parser)]
#[command(name = "patchfork", version)]
pub struct Cli {
    #[command(flatten)]
    run: RunArgs,
}

pub fn handle_args(args: &Cli) -> Result<(), Error> {
    run(&args.run)?;
    Ok(())
}

use anyhow::Error;
use clap::Parser;
use cmd::{Cli, handle_args};

mod cmd;

fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Cli::parse();
    handle_args(&args)?;
    Ok(())
}

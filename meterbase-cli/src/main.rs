//! # meterbase CLI
//!
//! Run with: `meterbase --config meterbase.toml scan --dump tables.json --table meter`

use anyhow::Result;
use clap::Parser;

use meterbase_cli::{run, Cli};

fn main() -> Result<()> {
    let output = run(Cli::parse())?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    classtrack_cli::init_tracing();
    let cli = classtrack_cli::Cli::parse();
    classtrack_cli::run_cli(cli)
}

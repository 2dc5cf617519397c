//! flux-cli - batch processing of eddy-covariance tower datasets.

use clap::Parser;

#[derive(Parser)]
#[command(
    name = "flux-cli",
    version,
    about = "Eddy-covariance flux processing toolkit"
)]
struct Cli {
    #[command(subcommand)]
    command: flux_cmd::Command,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    flux_cmd::run(cli.command)
}

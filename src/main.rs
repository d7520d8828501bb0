use clap::Parser;
use tradedesk::cli::{Cli, run};

fn main() -> std::process::ExitCode {
    run(Cli::parse())
}

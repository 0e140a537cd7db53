use anyhow::Result;
use clap::{ArgAction, Parser};
use custody::{cli::custody::CustodyCliOpts, cli::log_level_from_verbosity_flag_count};

#[path = "_common/clap_version.rs"]
mod clap_version;

#[tokio::main]
async fn main() -> Result<()> {
    let opts = Opts::parse();

    custody::init_logger(Some(log_level_from_verbosity_flag_count(opts.verbose)));

    match custody::custody::custody_cli_run(&opts.cli_opts).await {
        Ok(_) => std::process::exit(0),
        Err(e) => {
            custody::utils::report_error(&e);
            std::process::exit(1);
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[clap(about = "Custody command line utility")]
#[clap(version = clap_version::custody_clap_version())]
#[clap(disable_help_subcommand = true)]
struct Opts {
    #[command(flatten)]
    cli_opts: CustodyCliOpts,

    /// Pass many times for a more verbose output. Passing `-v` adds debug
    /// logs, `-vv` enables trace logging
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

use clap::Parser;

pub const NAME: &str = "custodyd";

#[derive(Parser, Debug, Clone)]
#[clap(name = NAME)]
#[clap(about = "Custody daemon")]
pub struct CustodyDaemonOpts {
    /// Use this configuration file instead of the default one
    #[clap(long)]
    pub config_file: Option<String>,
}

use clap::{Args, Parser, Subcommand};
use custody_core::{FileId, Pid, RespawnPolicy};

pub const NAME: &str = "custody";

#[derive(Parser, Debug, Clone)]
#[clap(name = NAME)]
#[clap(about = "Custody cli")]
pub struct CustodyCliOpts {
    /// Specify custom api server
    #[clap(long)]
    pub api_server: Option<String>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// List watched families
    Status,

    /// Print the daemon version
    Version,

    /// Start watching a running process and everything it spawns
    Register(Register),

    /// Stop watching a process
    Unregister { pid: Pid },

    /// Kill every process in the family of a process
    Terminate { pid: Pid },

    /// List the processes of the family rooted at a process
    Members { pid: Pid },

    /// List the files owned by the family rooted at a process
    Files { pid: Pid },

    /// Wait until a root process may exit, then forget it
    Wait {
        pid: Pid,

        /// Give up after this many milliseconds, 0 waits forever
        #[clap(long, default_value_t = 0)]
        timeout_ms: u64,
    },
}

#[derive(Args, Debug, Clone)]
pub struct Register {
    pub pid: Pid,

    /// Identifier of the image the process was started from
    #[clap(long, conflicts_with = "origin_path")]
    pub origin: Option<FileId>,

    /// Image the process was started from, resolved to its identifier
    #[clap(long)]
    pub origin_path: Option<String>,

    /// What happens to the family once all its processes exited
    #[clap(long, default_value_t = RespawnPolicy::NoRestriction)]
    pub policy: RespawnPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_register() {
        let opts = CustodyCliOpts::try_parse_from([
            NAME,
            "register",
            "42",
            "--origin",
            "0x1f",
            "--policy",
            "protect-dropped-files",
        ])
        .unwrap();
        match opts.command {
            Commands::Register(register) => {
                assert_eq!(register.pid, Pid::from_raw(42));
                assert_eq!(register.origin, Some(FileId::from_raw(0x1f)));
                assert_eq!(register.policy, RespawnPolicy::ProtectDroppedFiles);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn origin_sources_are_exclusive() {
        assert!(
            CustodyCliOpts::try_parse_from([
                NAME,
                "register",
                "42",
                "--origin",
                "1",
                "--origin-path",
                "/bin/sh",
            ])
            .is_err()
        );
    }

    #[test]
    fn wait_defaults_to_no_timeout() {
        let opts = CustodyCliOpts::try_parse_from([NAME, "wait", "7"]).unwrap();
        assert!(matches!(
            opts.command,
            Commands::Wait { timeout_ms: 0, .. }
        ));
    }
}

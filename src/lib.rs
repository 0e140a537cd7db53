//! Custody keeps untrusted processes, and everything they spawn or drop on
//! disk, inside a monitored *family*.
//!
//! It is made of two components:
//!
//! - a [daemon](crate::custodyd) owning the shared
//!   [`FamilyRegistry`](custody_core::FamilyRegistry), the process and
//!   filesystem monitors that feed it, and the management API
//! - a [cli](crate::cli::custody) to register, inspect and terminate families
//!   through that API
//!
//! The two components are provided as separate binaries: `custodyd` (daemon)
//! and `custody` (CLI).
//!
//! ```sh
//! # Execute the daemon
//! custodyd
//!
//! # Watch process 4242 and every file it drops
//! custody register 4242 --policy protect-dropped-files
//! custody members 4242
//! ```

pub mod cli;
pub mod custody;
pub mod custodyd;
pub mod utils;

pub mod metadata {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Init logger. We log from info level and above unless a verbosity flag
/// asks for more. If RUST_LOG is set, env_logger default behaviour wins.
pub fn init_logger(override_log_level: Option<log::LevelFilter>) {
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::init();
    } else {
        let level_filter = override_log_level.unwrap_or(log::LevelFilter::Info);
        env_logger::builder().filter_level(level_filter).init();
    }
}

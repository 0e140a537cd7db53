//! Command line options of the two binaries.

pub mod custody;
pub mod custodyd;

/// Map the number of `-v` flags to a log level: `-v` adds debug logs,
/// `-vv` enables trace logging.
pub fn log_level_from_verbosity_flag_count(count: u8) -> log::LevelFilter {
    match count {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

use std::env;

fn wants_backtrace() -> bool {
    log::max_level() >= log::LevelFilter::Debug
        || env::var("RUST_BACKTRACE").is_ok_and(|value| value == "1")
}

/// Log a fatal error. The whole cause chain is printed on one line, with
/// the backtrace added at debug verbosity or when `RUST_BACKTRACE=1`.
pub fn report_error(e: &anyhow::Error) {
    if wants_backtrace() {
        log::error!("{e:?}");
    } else {
        log::error!("{e:#}");
    }
}

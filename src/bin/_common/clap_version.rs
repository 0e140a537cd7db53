use std::sync::OnceLock;

/// Version string shown by clap for the custody binaries, with the build
/// profile appended.
pub(crate) fn custody_clap_version() -> &'static str {
    // clap requires a &'static str
    static CLAP_VERSION: OnceLock<String> = OnceLock::new();

    CLAP_VERSION.get_or_init(|| {
        #[cfg(debug_assertions)]
        const PROFILE: &str = "debug";
        #[cfg(not(debug_assertions))]
        const PROFILE: &str = "release";

        format!("{}\nprofile: {PROFILE}", custody::metadata::VERSION)
    })
}

use std::{
    collections::HashMap,
    fs::File,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use custody_core::ModuleConfig;

const DEFAULT_CONFIG_FILE: &str = "/var/lib/custody/custody.ini";

/// Daemon configuration, one [`ModuleConfig`] per `INI` section.
#[derive(Debug, Clone)]
pub struct CustodyConfig {
    config_file: PathBuf,
    sections: HashMap<String, ModuleConfig>,
}

impl CustodyConfig {
    /// Load the default file, creating an empty one if missing.
    pub fn new() -> Result<Self> {
        let config_file = PathBuf::from(DEFAULT_CONFIG_FILE);
        if !config_file.exists() {
            if let Some(prefix) = config_file.parent() {
                std::fs::create_dir_all(prefix)
                    .with_context(|| format!("Error creating {}", prefix.display()))?;
            }
            File::create(&config_file)
                .with_context(|| format!("Error creating {}", config_file.display()))?;
        }
        Self::from_config_file(config_file)
    }

    /// Load a custom file, which must exist.
    pub fn with_custom_file(config_file: &str) -> Result<Self> {
        let config_file = PathBuf::from(config_file);
        if !config_file.exists() {
            bail!("Configuration file {} not found", config_file.display());
        }
        Self::from_config_file(config_file)
    }

    fn from_config_file(config_file: PathBuf) -> Result<Self> {
        let conf = ini::Ini::load_from_file(&config_file)
            .with_context(|| format!("Error loading configuration from {config_file:?}"))?;

        let mut sections: HashMap<String, ModuleConfig> = HashMap::new();
        for (section, prop) in &conf {
            // keys outside any section are ignored
            let Some(section) = section else { continue };
            let module_config = sections.entry(section.to_string()).or_default();
            for (key, value) in prop.iter() {
                log::debug!("{}.{}={}", section, key, value);
                module_config.insert(key, value);
            }
        }

        Ok(Self {
            config_file,
            sections,
        })
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// The named section, or an empty one so every default applies.
    pub fn section(&self, name: &str) -> ModuleConfig {
        self.sections.get(name).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use custody_core::RegistryLimits;

    use super::*;

    #[test]
    fn sections_are_parsed() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "stray=1\n[custody]\napi_socket_path=/tmp/c.sock\n[registry]\nmax_families = 2"
        )
        .unwrap();

        let config = CustodyConfig::with_custom_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(
            config.section("custody").get_raw("api_socket_path"),
            Some("/tmp/c.sock")
        );
        let limits = RegistryLimits::try_from(&config.section("registry")).unwrap();
        assert_eq!(limits.max_families, 2);
        assert_eq!(config.section("missing"), ModuleConfig::default());
    }

    #[test]
    fn custom_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("custody.ini");
        assert!(CustodyConfig::with_custom_file(missing.to_str().unwrap()).is_err());
    }
}

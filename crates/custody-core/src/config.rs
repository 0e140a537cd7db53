//! Typed access to one section of the configuration file.

use std::{collections::HashMap, fmt::Display, str::FromStr};

use thiserror::Error;

use crate::registry::{MAX_ITEMS, RegistryLimits};

/// Key/value pairs of a single INI section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleConfig {
    values: HashMap<String, String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("field {field} is required")]
    RequiredValue { field: String },
    #[error("{value} is not a valid value for field {field}: {err}")]
    InvalidValue {
        field: String,
        value: String,
        err: String,
    },
}

impl ModuleConfig {
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.values.insert(key.into(), value.into())
    }

    pub fn get_raw(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }

    pub fn required<T>(&self, field: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.optional(field)?.ok_or_else(|| ConfigError::RequiredValue {
            field: field.to_string(),
        })
    }

    pub fn optional<T>(&self, field: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.values
            .get(field)
            .map(|value| parse(value, field))
            .transpose()
    }

    /// Typed value, or `default` when the field is missing.
    pub fn with_default<T>(&self, field: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        Ok(self.optional(field)?.unwrap_or(default))
    }

    /// Comma separated list. Empty when the field is missing.
    pub fn get_list<T>(&self, field: &str) -> Result<Vec<T>, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.values
            .get(field)
            .iter()
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| parse(item, field))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K, V> FromIterator<(K, V)> for ModuleConfig
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn parse<T>(value: &str, field: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    value.trim().parse().map_err(|err: T::Err| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        err: err.to_string(),
    })
}

/// Built from the `[registry]` section.
impl TryFrom<&ModuleConfig> for RegistryLimits {
    type Error = ConfigError;

    fn try_from(config: &ModuleConfig) -> Result<Self, Self::Error> {
        Ok(Self {
            max_families: config.with_default("max_families", MAX_ITEMS)?,
            max_members: config.with_default("max_members", MAX_ITEMS)?,
            max_files: config.with_default("max_files", MAX_ITEMS)?,
        })
    }
}

//! Key/value configuration of one section of the configuration file.
//!
//! Components read their settings through typed accessors and convert a section
//! into their own configuration with `TryFrom<&SectionConfig>`.

use std::{collections::HashMap, fmt::Display, str::FromStr};

use event_wire::WireLimits;
use thiserror::Error;

#[derive(Debug, Clone, Default)]
pub struct SectionConfig {
    inner: HashMap<String, String>,
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

impl SectionConfig {
    /// Inserts a new configuration value.
    pub fn insert(&mut self, key: String, value: String) -> Option<String> {
        self.inner.insert(key, value)
    }

    /// Returns a typed configuration value.
    pub fn required<T>(&self, config_name: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        match self.inner.get(config_name) {
            None => Err(ConfigError::RequiredValue {
                field: config_name.to_string(),
            }),
            Some(value) => parse(value, config_name),
        }
    }

    /// Returns an optional typed configuration value.
    pub fn optional<T>(&self, config_name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        self.inner
            .get(config_name)
            .map(|value| parse(value, config_name))
            .transpose()
    }

    /// Returns a typed configuration value, or `default` if the field is missing.
    pub fn with_default<T>(&self, config_name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        Ok(self.optional(config_name)?.unwrap_or(default))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SectionConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            inner: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

fn parse<T>(value: &str, config_name: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    <T as FromStr>::Err: Display,
{
    T::from_str(value).map_err(|err| ConfigError::InvalidValue {
        field: config_name.to_string(),
        value: value.to_string(),
        err: err.to_string(),
    })
}

/// Record limits from the `[wire]` section.
pub fn wire_limits(config: &SectionConfig) -> Result<WireLimits, ConfigError> {
    let defaults = WireLimits::default();
    let limits = WireLimits {
        max_record_size: config.with_default("max_record_size", defaults.max_record_size)?,
        max_array_bytes: config.with_default("max_array_bytes", defaults.max_array_bytes)?,
    };
    // a record must at least hold a header and an empty array
    if limits.max_record_size < event_wire::HEADER_LEN + 2 {
        return Err(ConfigError::InvalidValue {
            field: "max_record_size".to_string(),
            value: limits.max_record_size.to_string(),
            err: format!("must be at least {}", event_wire::HEADER_LEN + 2),
        });
    }
    if limits.max_record_size > u32::MAX as usize {
        return Err(ConfigError::InvalidValue {
            field: "max_record_size".to_string(),
            value: limits.max_record_size.to_string(),
            err: "must fit the 32 bit length field".to_string(),
        });
    }
    Ok(limits)
}

use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result, bail};
use event_wire::WireLimits;
use syswatch_core::{
    DispatcherConfig, RegistryConfig, SectionConfig,
    config::wire_limits,
};

pub const WIRE_SECTION: &str = "wire";
pub const REGISTRY_SECTION: &str = "registry";
pub const DISPATCHER_SECTION: &str = "dispatcher";

/// Configuration of every component, one INI section each.
///
/// Missing sections and keys fall back to the component defaults.
#[derive(Debug, Clone, Default)]
pub struct SyswatchConfig {
    sections: HashMap<String, SectionConfig>,
}

impl SyswatchConfig {
    pub fn from_file(config_file: &Path) -> Result<Self> {
        if !config_file.exists() {
            bail!("Configuration file {} not found", config_file.display());
        }
        let conf = ini::Ini::load_from_file(config_file)
            .with_context(|| format!("Error loading configuration from {config_file:?}"))?;
        Ok(Self::from_ini(&conf))
    }

    pub fn from_ini_str(content: &str) -> Result<Self> {
        let conf = ini::Ini::load_from_str(content).context("Error parsing configuration")?;
        Ok(Self::from_ini(&conf))
    }

    fn from_ini(conf: &ini::Ini) -> Self {
        let mut sections: HashMap<String, SectionConfig> = HashMap::new();
        for (section, prop) in conf {
            if let Some(section) = section {
                let section_config = sections.entry(section.to_string()).or_default();
                for (key, value) in prop.iter() {
                    log::debug!("{}.{}={}", section, key, value);
                    section_config.insert(key.to_string(), value.to_string());
                }
            }
        }
        Self { sections }
    }

    /// The keys of a section, empty if the section is missing.
    pub fn section(&self, name: &str) -> SectionConfig {
        self.sections.get(name).cloned().unwrap_or_default()
    }

    pub fn wire_limits(&self) -> Result<WireLimits> {
        wire_limits(&self.section(WIRE_SECTION)).context("Invalid [wire] configuration")
    }

    pub fn registry(&self) -> Result<RegistryConfig> {
        RegistryConfig::try_from(&self.section(REGISTRY_SECTION))
            .context("Invalid [registry] configuration")
    }

    pub fn dispatcher(&self) -> Result<DispatcherConfig> {
        DispatcherConfig::try_from(&self.section(DISPATCHER_SECTION))
            .context("Invalid [dispatcher] configuration")
    }
}

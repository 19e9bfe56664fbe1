use serde::Deserialize;

use crate::error::EngineError;
use crate::settings::StreamsSettings;

/// Root configuration, parsed from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BridgeConfig {
    /// Stream-backed table definitions.
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TableConfig {
    pub name: String,
    /// Raw `[tables.settings]`; validated by `TableConfig::settings`.
    #[serde(default)]
    pub settings: toml::Table,
}

impl TableConfig {
    pub fn settings(&self) -> Result<StreamsSettings, EngineError> {
        StreamsSettings::from_toml(&self.settings)
            .map_err(|e| e.with_context(format!("table '{}'", self.name)))
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self, EngineError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| EngineError::Config(format!("{path}: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, EngineError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| EngineError::Config(e.to_string()))?;
        for (i, table) in config.tables.iter().enumerate() {
            if config.tables[..i].iter().any(|t| t.name == table.name) {
                return Err(EngineError::Config(format!(
                    "duplicate table '{}'",
                    table.name
                )));
            }
        }
        Ok(config)
    }

    pub fn table(&self, name: &str) -> Result<&TableConfig, EngineError> {
        self.tables
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| EngineError::TableNotFound(name.to_string()))
    }
}

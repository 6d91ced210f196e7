//! Engine settings and the read-only configuration boundary.
//!
//! [`EngineSettings`] are process level knobs layered from defaults, an
//! optional TOML file and `LEDGER__*` environment variables. [`ConfigStore`]
//! is the business configuration the workflow reads (fiscal year, supplier
//! and equipment lists); it is maintained elsewhere and only read here.
use crate::error::{LedgerError, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const DEFAULT_DATA_DIR: &str = "procurement-ledger.db";
const DEFAULT_LOCAL_CURRENCY: &str = "NPR";
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    pub data_dir: PathBuf,
    pub local_currency: String,
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

impl EngineSettings {
    /// Load settings: built-in defaults, then `file` if present, then env.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = Config::builder()
            .set_default("data_dir", DEFAULT_DATA_DIR)?
            .set_default("local_currency", DEFAULT_LOCAL_CURRENCY)?
            .set_default("log_level", DEFAULT_LOG_LEVEL)?
            .set_default("log_json", false)?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(false));
        }

        let settings: EngineSettings = builder
            .add_source(Environment::with_prefix("LEDGER").separator("__"))
            .build()?
            .try_deserialize()?;

        if settings.local_currency.trim().is_empty() {
            anyhow::bail!("local_currency must not be empty");
        }
        Ok(settings)
    }
}

/// Typed view over the externally maintained configuration.
pub trait ConfigStore: Send + Sync {
    fn current_fiscal_year(&self) -> Result<String>;
    fn local_currency(&self) -> Result<String>;
    fn equipment_list(&self, fuel_type: &str) -> Result<Vec<String>>;
    /// Known supplier names. An empty list disables supplier validation.
    fn suppliers(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct StaticConfig {
    pub fiscal_year: String,
    pub local_currency: String,
    pub suppliers: Vec<String>,
    pub equipment: HashMap<String, Vec<String>>,
}

impl StaticConfig {
    pub fn new(fiscal_year: &str, local_currency: &str) -> Self {
        Self {
            fiscal_year: fiscal_year.to_string(),
            local_currency: local_currency.to_string(),
            suppliers: Vec::new(),
            equipment: HashMap::new(),
        }
    }

    pub fn with_suppliers(mut self, suppliers: &[&str]) -> Self {
        self.suppliers = suppliers.iter().map(|s| s.to_string()).collect();
        self
    }
}

impl ConfigStore for StaticConfig {
    fn current_fiscal_year(&self) -> Result<String> {
        Ok(self.fiscal_year.clone())
    }
    fn local_currency(&self) -> Result<String> {
        Ok(self.local_currency.clone())
    }
    fn equipment_list(&self, fuel_type: &str) -> Result<Vec<String>> {
        Ok(self.equipment.get(fuel_type).cloned().unwrap_or_default())
    }
    fn suppliers(&self) -> Result<Vec<String>> {
        Ok(self.suppliers.clone())
    }
}

/// Configuration kept as delimited strings in a sled tree.
///
/// Keys: `fiscal_year`, `local_currency`, `suppliers`, `equipment:<fuel type>`.
/// Lists are comma separated.
pub struct SledConfigStore {
    tree: sled::Tree,
    default_currency: String,
}

impl SledConfigStore {
    pub fn new(tree: sled::Tree, settings: &EngineSettings) -> Self {
        Self {
            tree,
            default_currency: settings.local_currency.clone(),
        }
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        self.tree.insert(key.as_bytes(), value.as_bytes())?;
        Ok(())
    }

    fn get_text(&self, key: &str) -> Result<Option<String>> {
        match self.tree.get(key.as_bytes())? {
            Some(raw) => String::from_utf8(raw.to_vec())
                .map(Some)
                .map_err(|_| LedgerError::Dependency(format!("config key {key} is not utf-8"))),
            None => Ok(None),
        }
    }

    fn get_list(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .get_text(key)?
            .map(|text| split_list(&text))
            .unwrap_or_default())
    }
}

impl ConfigStore for SledConfigStore {
    fn current_fiscal_year(&self) -> Result<String> {
        self.get_text("fiscal_year")?
            .map(|fy| fy.trim().to_string())
            .filter(|fy| !fy.is_empty())
            .ok_or_else(|| LedgerError::not_found("config", "fiscal_year"))
    }

    fn local_currency(&self) -> Result<String> {
        Ok(self
            .get_text("local_currency")?
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| self.default_currency.clone()))
    }

    fn equipment_list(&self, fuel_type: &str) -> Result<Vec<String>> {
        self.get_list(&format!("equipment:{fuel_type}"))
    }

    fn suppliers(&self) -> Result<Vec<String>> {
        self.get_list("suppliers")
    }
}

fn split_list(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !out.iter().any(|known| known == item) {
            out.push(item.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn settings() -> EngineSettings {
        EngineSettings {
            data_dir: PathBuf::from("unused"),
            local_currency: "NPR".into(),
            log_level: "info".into(),
            log_json: false,
        }
    }

    #[test]
    fn settings_load_from_file_over_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "local_currency = \"INR\"\nlog_json = true").unwrap();

        let loaded = EngineSettings::load(Some(file.path())).unwrap();
        assert_eq!(loaded.local_currency, "INR");
        assert!(loaded.log_json);
        assert_eq!(loaded.log_level, "info");
    }

    #[test]
    fn sled_config_parses_delimited_lists() {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path().join("config.db")).unwrap();
        let store = SledConfigStore::new(db.open_tree("config").unwrap(), &settings());

        store.set("fiscal_year", " 2081/82 ").unwrap();
        store.set("suppliers", "Himal Traders, Everest Auto,,Himal Traders").unwrap();
        store.set("equipment:diesel", "101,102, 205").unwrap();

        assert_eq!(store.current_fiscal_year().unwrap(), "2081/82");
        assert_eq!(store.local_currency().unwrap(), "NPR");
        assert_eq!(
            store.suppliers().unwrap(),
            vec!["Himal Traders".to_string(), "Everest Auto".to_string()]
        );
        assert_eq!(store.equipment_list("diesel").unwrap().len(), 3);
        assert!(store.equipment_list("petrol").unwrap().is_empty());
    }

    #[test]
    fn missing_fiscal_year_is_not_found() {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path().join("config.db")).unwrap();
        let store = SledConfigStore::new(db.open_tree("config").unwrap(), &settings());

        assert!(matches!(
            store.current_fiscal_year(),
            Err(LedgerError::NotFound { .. })
        ));
    }
}

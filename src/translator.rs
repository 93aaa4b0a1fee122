//! Monitoring point name translation.
//!
//! Ping-Admin reports monitoring point names in Russian. A `locations.json` file maps
//! them to English; names missing from the table pass through unchanged.

use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranslatorError {
    #[error("failed to read translations file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse translations file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Read-only RU -> EN lookup table, shared by all exporters.
#[derive(Debug, Clone, Default)]
pub struct Translator {
    locations: Option<HashMap<String, String>>,
}

impl Translator {
    /// Load the lookup table from a JSON object file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TranslatorError> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "Loading translations...");

        let raw = std::fs::read_to_string(path)?;
        let locations: HashMap<String, String> = serde_json::from_str(&raw)?;

        tracing::info!(count = locations.len(), "Translations loaded successfully");
        Ok(Self::from_map(locations))
    }

    pub fn from_map(locations: HashMap<String, String>) -> Self {
        Self {
            locations: Some(locations),
        }
    }

    /// A translator that returns every name untouched.
    pub fn passthrough() -> Self {
        Self::default()
    }

    /// Return the English name for `name`, or `name` itself when unknown.
    pub fn translate(&self, name: &str) -> String {
        let Some(locations) = &self.locations else {
            return name.to_string();
        };

        match locations.get(name) {
            Some(eng) => eng.clone(),
            None => {
                tracing::warn!(location = name, "Translation not found for location");
                name.to_string()
            }
        }
    }
}

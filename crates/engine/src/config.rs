//! Table configuration via `burrow.toml`
//!
//! A table directory carries its layout in a config file next to the data
//! files. The layout fixes the record arity and which fields are indexed, so
//! it is written once on create and read back on every open.

use burrow_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

/// Config file name placed in the table directory.
pub const CONFIG_FILE_NAME: &str = "burrow.toml";

/// Table layout loaded from `burrow.toml`.
///
/// # Example
///
/// ```toml
/// field_count = 3
/// key_fields = [0]
/// order_field = 2
/// initial_slots = 16
/// page_size = 64
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    /// Fields per record.
    pub field_count: usize,
    /// Fields that get a hash index. Keys are unique per index.
    #[serde(default)]
    pub key_fields: Vec<usize>,
    /// Field feeding the ordered index. Must hold an 8-byte big-endian `u64`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_field: Option<usize>,
    /// Initial hash table size, a power of two of at least 2 (default: 16).
    #[serde(default = "default_initial_slots")]
    pub initial_slots: u64,
    /// Entries per ordered page (default: 64).
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_initial_slots() -> u64 {
    16
}

fn default_page_size() -> usize {
    64
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            field_count: 2,
            key_fields: vec![0],
            order_field: None,
            initial_slots: default_initial_slots(),
            page_size: default_page_size(),
        }
    }
}

impl TableConfig {
    /// Config with `field_count` fields and no indexes
    pub fn new(field_count: usize) -> Self {
        Self {
            field_count,
            key_fields: Vec::new(),
            ..Self::default()
        }
    }

    /// Add a hash index on `field`
    pub fn with_key_field(mut self, field: usize) -> Self {
        self.key_fields.push(field);
        self
    }

    /// Feed the ordered index from `field`
    pub fn with_order_field(mut self, field: usize) -> Self {
        self.order_field = Some(field);
        self
    }

    /// Check every value against the table's constraints.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidConfig` naming the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.field_count == 0 {
            return Err(invalid("field_count must be at least 1".to_string()));
        }
        for (i, field) in self.key_fields.iter().enumerate() {
            if *field >= self.field_count {
                return Err(invalid(format!(
                    "key field {} out of range for {} fields",
                    field, self.field_count
                )));
            }
            if self.key_fields[..i].contains(field) {
                return Err(invalid(format!("key field {} listed twice", field)));
            }
        }
        if let Some(field) = self.order_field {
            if field >= self.field_count {
                return Err(invalid(format!(
                    "order field {} out of range for {} fields",
                    field, self.field_count
                )));
            }
        }
        if self.initial_slots < 2 || !self.initial_slots.is_power_of_two() {
            return Err(invalid(format!(
                "initial_slots {} is not a power of two >= 2",
                self.initial_slots
            )));
        }
        if self.page_size == 0 {
            return Err(invalid("page_size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Burrow table configuration
#
# Fields per record. Fixed for the life of the table.
field_count = 2

# Fields with a hash index. Each key maps to one record; inserting a
# record with an existing key replaces the index entry.
key_fields = [0]

# Field feeding the ordered index, holding an 8-byte big-endian u64.
# order_field = 1

# Initial hash table size, a power of two >= 2 (default: 16)
initial_slots = 16

# Entries per ordered page (default: 64)
page_size = 64
"#
    }

    /// Read, parse and validate config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("Failed to read config file '{}': {}", path.display(), e),
            )
        })?;
        let config: TableConfig = toml::from_str(&content).map_err(|e| {
            invalid(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to write default config file '{}': {}",
                        path.display(),
                        e
                    ),
                )
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| invalid(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("Failed to write config file '{}': {}", path.display(), e),
            )
            .into()
        })
    }
}

fn invalid(msg: String) -> Error {
    Error::InvalidConfig(msg)
}

//! PID dictionary loaded from a YAML file.
//!
//! ```yaml
//! pids:
//!   - name: DEVICE_INFO
//!     value: 96
//!   - name: SERIAL_NUMBER
//!     value: 32768
//!     manufacturer_id: 31344
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

/// PID dictionary errors
#[derive(Error, Debug)]
pub enum PidStoreError {
    /// The file could not be read
    #[error("failed to read pid file {path}: {source}")]
    Io {
        /// File that was being read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The file was not valid YAML for the dictionary schema
    #[error("failed to parse pid file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The same PID was defined twice for the same manufacturer
    #[error("duplicate pid {value:#06x} (manufacturer {manufacturer:?})")]
    Duplicate {
        /// PID value
        value: u16,
        /// Manufacturer the entry belongs to, `None` for ESTA PIDs
        manufacturer: Option<u16>,
    },
}

/// One parameter definition
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PidDescriptor {
    /// Symbolic name, e.g. `DEVICE_INFO`
    pub name: String,
    /// Parameter id
    pub value: u16,
    /// Manufacturer for manufacturer-specific PIDs
    #[serde(default)]
    pub manufacturer_id: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct PidFile {
    #[serde(default)]
    pids: Vec<PidDescriptor>,
}

/// Lookup table of ESTA and manufacturer-specific PIDs
#[derive(Debug, Default)]
pub struct PidStore {
    esta: HashMap<u16, PidDescriptor>,
    manufacturer: HashMap<(u16, u16), PidDescriptor>,
}

impl PidStore {
    /// Load a dictionary from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PidStoreError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| PidStoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self::from_yaml(&contents)?;
        debug!("Loaded {} pids from {}", store.len(), path.display());
        Ok(store)
    }

    /// Parse a dictionary from YAML text
    pub fn from_yaml(contents: &str) -> Result<Self, PidStoreError> {
        let file: PidFile = serde_yaml::from_str(contents)?;
        let mut store = Self::default();

        for descriptor in file.pids {
            let value = descriptor.value;
            let manufacturer = descriptor.manufacturer_id;
            let previous = match manufacturer {
                Some(id) => store.manufacturer.insert((id, value), descriptor),
                None => store.esta.insert(value, descriptor),
            };
            if previous.is_some() {
                return Err(PidStoreError::Duplicate {
                    value,
                    manufacturer,
                });
            }
        }

        Ok(store)
    }

    /// Find a PID, preferring the manufacturer's own definition
    pub fn lookup(&self, pid: u16, manufacturer_id: u16) -> Option<&PidDescriptor> {
        self.manufacturer
            .get(&(manufacturer_id, pid))
            .or_else(|| self.esta.get(&pid))
    }

    /// Number of definitions
    pub fn len(&self) -> usize {
        self.esta.len() + self.manufacturer.len()
    }

    /// True when no definitions are loaded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

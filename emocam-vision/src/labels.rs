use std::path::Path;

use anyhow::{Context, Result};

/// Class names indexed by classifier output position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassNameTable {
    names: Vec<String>,
}

impl ClassNameTable {
    pub fn new(names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            anyhow::bail!("class table is empty");
        }
        Ok(Self { names })
    }

    /// Read a JSON array of strings, e.g. `["angry", "happy", "sad"]`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading class table {}", path.display()))?;
        Self::from_json_str(&raw)
            .with_context(|| format!("parsing class table {}", path.display()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let names: Vec<String> = serde_json::from_str(raw)?;
        Self::new(names)
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }
}

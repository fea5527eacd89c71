//! Pass configuration
//!
//! A configuration file is a TOML document with one table per pass, keyed
//! by the pass name:
//!
//! ```toml
//! [CommonSubexpressionEliminationPass]
//! debug = false
//! runtime_assertions = true
//! pure_methods = ["Lcom/example/Util;.hash:(I)I"]
//! ```

use crate::error::{PassError, Result};
use dexo_ir::MethodRef;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Per-pass configuration tables
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassConfig {
    table: toml::Table,
}

impl PassConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table of `pass`, if the configuration has one
    pub fn section(&self, pass: &str) -> Option<&toml::Value> {
        self.table.get(pass)
    }

    /// Names of all configured passes, in file order
    pub fn passes(&self) -> impl Iterator<Item = &str> + '_ {
        self.table.keys().map(String::as_str)
    }

    /// Deserialize the table of `pass`, or the default when it has none
    pub fn get<T>(&self, pass: &str) -> Result<T>
    where
        T: for<'de> Deserialize<'de> + Default,
    {
        match self.section(pass) {
            Some(value) => value.clone().try_into().map_err(|err: toml::de::Error| {
                PassError::InvalidSection {
                    pass: pass.to_string(),
                    message: err.message().to_string(),
                }
            }),
            None => Ok(T::default()),
        }
    }

    /// Replace the table of `pass`
    pub fn set<T: Serialize>(&mut self, pass: &str, config: &T) -> Result<()> {
        let value = toml::Value::try_from(config).map_err(|err| PassError::InvalidSection {
            pass: pass.to_string(),
            message: err.to_string(),
        })?;
        self.table.insert(pass.to_string(), value);
        Ok(())
    }
}

impl FromStr for PassConfig {
    type Err = PassError;

    fn from_str(text: &str) -> Result<Self> {
        Ok(Self {
            table: text.parse()?,
        })
    }
}

/// Options of the common-subexpression elimination pass
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CseConfig {
    /// Count barriers and log the most frequent ones
    pub debug: bool,

    /// Re-execute every eliminated instruction and throw on mismatch
    pub runtime_assertions: bool,

    /// Additional methods known to be pure, as `Lpkg/Cls;.name:(Args)Ret`
    pub pure_methods: Vec<String>,
}

impl CseConfig {
    /// Parse `pure_methods`
    pub fn parse_pure_methods(&self, pass: &str) -> Result<Vec<MethodRef>> {
        self.pure_methods
            .iter()
            .map(|entry| {
                entry.parse().map_err(|source| PassError::InvalidMethod {
                    pass: pass.to_string(),
                    entry: entry.clone(),
                    source,
                })
            })
            .collect()
    }
}

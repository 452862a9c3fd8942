use serde::Deserialize;

use crate::{cache::Cache, error::ConfigError};

/// Cache geometry, from a JSON document and/or command line flags.
///
/// ```json
/// { "s": 4, "E": 1, "b": 4 }
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub s: Option<u32>,
    #[serde(rename = "E")]
    pub lines: Option<usize>,
    pub b: Option<u32>,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Config, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Values set in `overrides` win over the ones in `self`.
    pub fn merge(self, overrides: Config) -> Config {
        Config {
            s: overrides.s.or(self.s),
            lines: overrides.lines.or(self.lines),
            b: overrides.b.or(self.b),
        }
    }

    pub fn to_cache(&self) -> Result<Cache, ConfigError> {
        let s = self.s.ok_or(ConfigError::Missing("-s"))?;
        let lines = self.lines.ok_or(ConfigError::Missing("-E"))?;
        let b = self.b.ok_or(ConfigError::Missing("-b"))?;
        Cache::new(s, lines, b)
    }
}


use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Mid-flow rebinding policy. Only consulted when [`Mobility::enable`] is set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Mobility {
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub mode: u8,
    #[serde(default)]
    pub interval_s: u64,
}

/// Top-level configuration, loaded once at startup and never mutated afterwards.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub listen: String,
    pub sfu_list: Vec<String>,
    #[serde(default)]
    pub mobility: Mobility,
    #[serde(default)]
    pub debug: String,
}

impl Config {
    /// Reads and parses a JSON config file at `path`, the same file format as the
    /// `-c`/`--conf` CLI flag expects.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path).map_err(|_| Error::ErrConfigOpen)?;
        let cfg: Config =
            serde_json::from_slice(&data).map_err(|e| Error::ErrConfigParse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.sfu_list.is_empty() {
            return Err(Error::ErrConfigEmptySfuList);
        }
        if self.mobility.enable {
            if self.mobility.mode != 1 && self.mobility.mode != 2 {
                return Err(Error::ErrConfigBadMobilityMode);
            }
            if self.mobility.mode == 2 && distinct_count(&self.sfu_list) < 2 {
                return Err(Error::ErrConfigMobilityModeTwoNeedsTwoSfus);
            }
            if self.mobility.interval_s == 0 {
                return Err(Error::ErrConfigZeroInterval);
            }
        }
        Ok(())
    }
}

fn distinct_count(sfu_list: &[String]) -> usize {
    let mut seen = std::collections::HashSet::new();
    for s in sfu_list {
        seen.insert(s.as_str());
    }
    seen.len()
}

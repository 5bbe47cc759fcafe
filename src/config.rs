//! Settings for a drug search, loaded from a toml file. Anything left out takes its default, and
//! command line flags override the file.

use crate::{error::Error, notes::Classifier};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    /// The `generic|brand|...` drug list.
    pub drug_list: PathBuf,
    /// Where to write the result table. Must not exist yet.
    pub output: PathBuf,
    /// The generic whose presence on admission marks an admission as exposed.
    pub exposure_generic: String,
    /// Log progress every this many admissions (0 for never).
    pub progress_interval: usize,
    /// Report ambiguous lines, malformed notes and uncertain groups.
    pub verbose: bool,
    /// Classify admissions on all cores.
    pub parallel: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            drug_list: PathBuf::from("data/drugs/opiates.txt"),
            output: PathBuf::from("output.csv"),
            exposure_generic: Classifier::DEFAULT_EXPOSURE.to_owned(),
            progress_interval: 100,
            verbose: false,
            parallel: false,
        }
    }
}

impl SearchConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::ConfigFile {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;
        Self::parse(&text).map_err(|reason| Error::ConfigFile {
            path: path.to_owned(),
            reason,
        })
    }

    fn parse(text: &str) -> Result<Self, String> {
        let config: SearchConfig = toml::from_str(text).map_err(|e| e.to_string())?;
        if config.exposure_generic.trim().is_empty() {
            return Err("exposure_generic must not be empty".into());
        }
        Ok(config)
    }
}

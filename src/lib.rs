//! Find which ICU admissions had opiates on admission by reading their clinical notes, and
//! compare outcomes between the exposed and unexposed groups.
//!
//! The pipeline is
//!
//!  1. load the drug list (`DrugDictionary`) and the admissions with their notes (`Cohort`),
//!  2. walk each note line by line, tracking the section we're in and flagging drugs
//!     (`notes::Search`), and write one row per admission (`output::ResultWriter`),
//!  3. join that table with stay and death times and run the comparisons (`analysis::Study`).

pub mod analysis;
pub mod cohort;
pub mod config;
pub mod drugs;
pub mod error;
pub mod notes;
pub mod output;
pub mod section;
pub mod stats;
mod util;

use qu::ick_use::*;
use serde::de::DeserializeOwned;
use std::{path::Path, sync::Arc};

pub use crate::{
    cohort::{AdmissionRecord, Cohort, NoteText},
    config::SearchConfig,
    drugs::{DrugDictionary, DrugFlags},
    error::{Error, Notice},
    notes::{AdmissionResult, Classifier, Group, Search, SearchSummary},
    output::ResultWriter,
    section::Section,
    util::{header, path_exists},
};

pub type ArcStr = Arc<str>;
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;

/// Load every row of a csv file with a header row.
fn load_csv<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    let path = path.as_ref();
    csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)?
        .into_deserialize()
        .collect::<Result<Vec<T>, _>>()
        .with_context(|| format!("while loading \"{}\"", path.display()))
}

pub fn check_extension(path: &Path, ext: &str) -> Result<()> {
    ensure!(
        matches!(path.extension(), Some(p) if p == ext),
        "filename should end with `.{}`",
        ext
    );
    Ok(())
}

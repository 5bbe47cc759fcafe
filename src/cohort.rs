//! The admissions to classify, as exported from the cohort query.

use crate::{error::Error, ArcStr};
use qu::ick_use::*;
use std::{collections::BTreeMap, ops::Deref, path::Path, str, sync::Arc};

pub type SubjectId = u64;
pub type AdmissionId = u64;

/// The text of a clinical note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoteText {
    Text(ArcStr),
    /// The note couldn't be decoded. Holds the reason.
    Malformed(ArcStr),
}

impl NoteText {
    /// Decode raw note bytes. Bad bytes don't fail the load, they mark the note as malformed.
    pub fn from_bytes(raw: &[u8]) -> Self {
        if raw.contains(&0) {
            return NoteText::Malformed("note contains NUL bytes".into());
        }
        match str::from_utf8(raw) {
            Ok(text) => NoteText::Text(text.into()),
            Err(e) => NoteText::Malformed(format!("note is not valid UTF-8: {}", e).into()),
        }
    }
}

impl From<&str> for NoteText {
    fn from(text: &str) -> Self {
        NoteText::Text(text.into())
    }
}

/// One row of the cohort: an admission and its note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionRecord {
    pub row_id: u64,
    pub subject_id: SubjectId,
    pub hadm_id: AdmissionId,
    pub note: NoteText,
}

/// The loaded cohort, in file order.
#[derive(Debug, Clone, Default)]
pub struct Cohort {
    els: Arc<Vec<AdmissionRecord>>,
}

impl Cohort {
    pub fn new(els: Vec<AdmissionRecord>) -> Self {
        Cohort { els: Arc::new(els) }
    }

    /// Load admissions from a csv file with a header row.
    ///
    /// Required columns are `row_id`, `subject_id`, `hadm_id`, and the note in either `text` or
    /// `note_text`. Other columns are ignored.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let unreadable = |source| Error::CohortUnreadable {
            path: path.to_owned(),
            source,
        };
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(unreadable)?;
        let headers = reader.byte_headers().map_err(unreadable)?.clone();

        let column = |names: &[&str], column: &'static str| {
            headers
                .iter()
                .position(|h| names.iter().any(|name| h == name.as_bytes()))
                .ok_or_else(|| Error::CohortColumnMissing {
                    path: path.to_owned(),
                    column,
                })
        };
        let row_id_col = column(&["row_id"], "row_id")?;
        let subject_id_col = column(&["subject_id"], "subject_id")?;
        let hadm_id_col = column(&["hadm_id"], "hadm_id")?;
        let text_col = column(&["text", "note_text"], "text")?;

        let mut els = vec![];
        for (idx, record) in reader.byte_records().enumerate() {
            let record = record.map_err(unreadable)?;
            let record_no = idx as u64 + 1;
            let id = |col: usize, name: &str| {
                record
                    .get(col)
                    .and_then(|raw| str::from_utf8(raw).ok())
                    .and_then(|raw| raw.trim().parse::<u64>().ok())
                    .ok_or_else(|| Error::CohortRow {
                        path: path.to_owned(),
                        record: record_no,
                        reason: format!("\"{}\" is not a whole number", name),
                    })
            };
            els.push(AdmissionRecord {
                row_id: id(row_id_col, "row_id")?,
                subject_id: id(subject_id_col, "subject_id")?,
                hadm_id: id(hadm_id_col, "hadm_id")?,
                note: NoteText::from_bytes(record.get(text_col).unwrap_or(b"")),
            });
        }

        let cohort = Cohort::new(els);
        cohort.check_distinct_admissions();
        Ok(cohort)
    }

    /// (subject, admission) pairs that appear on more than one row, with their row count.
    pub fn duplicate_admissions(&self) -> BTreeMap<(SubjectId, AdmissionId), usize> {
        let mut counts = BTreeMap::new();
        for el in self.els.iter() {
            *counts.entry((el.subject_id, el.hadm_id)).or_insert(0) += 1;
        }
        counts.retain(|_, count| *count > 1);
        counts
    }

    /// Warn if there are more rows than distinct admissions.
    pub fn check_distinct_admissions(&self) {
        let dupes = self.duplicate_admissions();
        if !dupes.is_empty() {
            let extra: usize = dupes.values().map(|count| count - 1).sum();
            event!(
                Level::WARN,
                "{} rows but only {} distinct subject/admission pairs",
                self.els.len(),
                self.els.len() - extra
            );
        }
    }
}

impl Deref for Cohort {
    type Target = [AdmissionRecord];

    fn deref(&self) -> &Self::Target {
        &self.els
    }
}

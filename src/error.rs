//! Typed errors raised by the library, and the per-admission notices that never stop a batch.

use std::{fmt, io, path::PathBuf};
use thiserror::Error;

/// A fatal problem. Anything returning this stops the batch before (or instead of) writing
/// output.
#[derive(Debug, Error)]
pub enum Error {
    #[error("could not read drug list \"{}\"", .path.display())]
    DrugListUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed drug list, line {line}: {reason}")]
    MalformedDictionary { line: usize, reason: String },

    #[error("could not read config file \"{}\": {reason}", .path.display())]
    ConfigFile { path: PathBuf, reason: String },

    #[error("output file \"{}\" already exists - remove or rename it first", .path.display())]
    OutputConflict { path: PathBuf },

    #[error("could not read cohort \"{}\"", .path.display())]
    CohortUnreadable {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("cohort \"{}\" has no \"{column}\" column", .path.display())]
    CohortColumnMissing { path: PathBuf, column: &'static str },

    #[error("cohort \"{}\", record {record}: {reason}", .path.display())]
    CohortRow {
        path: PathBuf,
        record: u64,
        reason: String,
    },
}

/// Something worth reporting about a single admission. These are logged (when asked for) and
/// counted, but processing carries on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// A line mentions medications together with admission/discharge/transfer, but no medication
    /// section is active.
    AmbiguousLine { line_no: usize, line: String },
    /// The note text could not be decoded; the admission gets an all-zero result.
    MalformedNote { reason: String },
    /// The evidence didn't fit any group.
    UncertainGroup,
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Notice::AmbiguousLine { line_no, line } => {
                write!(f, "ambiguous line {}: {:?}", line_no, line)
            }
            Notice::MalformedNote { reason } => write!(f, "malformed note: {}", reason),
            Notice::UncertainGroup => f.write_str("uncertain group"),
        }
    }
}

//! Works out which part of a note we are in from the section headers.
//!
//! Notes are free text, but clinicians mostly write section titles like `Medications on
//! Admission:` or `2. PAST MEDICAL HISTORY IS ...`. We recognise such a line as a header, and then
//! use keyword rules to decide what section it starts. Headers we can't place end the current
//! section.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::fmt;

/// The section of a note the scanner is currently in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum Section {
    /// Before the first header.
    #[default]
    None,
    /// Past medical history.
    History,
    /// Medications on admission (home meds, pre-op meds, ...).
    Admit,
    /// Discharge medications.
    Discharge,
    /// Some other section.
    Unknown,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Section::None => "none",
            Section::History => "history",
            Section::Admit => "admit",
            Section::Discharge => "discharge",
            Section::Unknown => "unknown",
        })
    }
}

fn case_insensitive(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .unwrap()
}

/// An optional enumerator ("1.", "A)"), a short phrase, and a terminator.
static HEADER: Lazy<Regex> = Lazy::new(|| {
    case_insensitive(
        r"^((\d|[A-Z])(\.|\)))?\s*([a-zA-Z',\.\-\*\d\[\]\(\) ]+)(:| WERE | IS | ARE |INCLUDED|INCLUDING)",
    )
});
static HISTORY: Lazy<Regex> = Lazy::new(|| case_insensitive(r"med(ical)?\s+hist(ory)?"));
static MEDICATION: Lazy<Regex> = Lazy::new(|| case_insensitive("medication|meds"));
static DISCHARGE: Lazy<Regex> = Lazy::new(|| case_insensitive("disch(arge)?"));
static ADMIT: Lazy<Regex> = Lazy::new(|| {
    case_insensitive(
        r"admission|admitting|home|nh|nmeds|pre[-\s]?(hosp|op)|current|previous|outpatient|outpt|outside|^[^a-zA-Z]*med(ication)?(s)?",
    )
});
static CONTEXT: Lazy<Regex> = Lazy::new(|| case_insensitive("admission|discharge|transfer"));
static OPIATE: Lazy<Regex> = Lazy::new(|| case_insensitive("opiate(s)?"));

/// A rule deciding whether a header line starts `section`.
struct Rule {
    section: Section,
    applies: fn(line: &str, current: Section) -> bool,
}

/// Tried in order, first match wins.
static RULES: [Rule; 3] = [
    Rule {
        section: Section::History,
        applies: |line, _| HISTORY.is_match(line),
    },
    Rule {
        section: Section::Discharge,
        applies: |line, _| MEDICATION.is_match(line) && DISCHARGE.is_match(line),
    },
    Rule {
        // A run of admit headers stays admit even without "meds" in the title.
        section: Section::Admit,
        applies: |line, current| {
            ADMIT.is_match(line) && (current == Section::Admit || MEDICATION.is_match(line))
        },
    },
];

/// Whether `line` looks like a section header.
pub fn is_header(line: &str) -> bool {
    HEADER.is_match(line)
}

/// If `line` is a header, the section it starts. `None` means the line is not a header and the
/// current section carries on.
pub fn classify(line: &str, current: Section) -> Option<Section> {
    if !is_header(line) {
        return None;
    }
    Some(
        RULES
            .iter()
            .find(|rule| (rule.applies)(line, current))
            .map(|rule| rule.section)
            .unwrap_or(Section::Unknown),
    )
}

/// Whether a history line mentions opiates.
pub fn mentions_opiates(line: &str) -> bool {
    OPIATE.is_match(line)
}

/// A line outside any medication section that talks about medications and
/// admission/discharge/transfer. We can't tell what it refers to.
pub fn is_ambiguous(line: &str) -> bool {
    MEDICATION.is_match(line) && CONTEXT.is_match(line)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn headers() {
        for line in [
            "Past Medical History:",
            "1. Medications on admission:",
            "A) Discharge Medications:",
            "HOME MEDS INCLUDED aspirin",
            "Her medications WERE as follows",
            "Allergies:",
        ] {
            assert!(is_header(line), "{:?}", line);
        }
        for line in [
            "",
            "Aspirin 81 mg daily",
            "She was given morphine for pain",
            "   ",
        ] {
            assert!(!is_header(line), "{:?}", line);
        }
    }

    #[test]
    fn classify_headers() {
        use Section::*;
        let cases = [
            ("Past Medical History:", None, History),
            ("Past Med Hist:", Admit, History),
            ("Discharge Medications:", None, Discharge),
            ("Meds on disch:", History, Discharge),
            ("Medications on Admission:", None, Admit),
            ("Home medications:", Discharge, Admit),
            ("Pre-op meds:", None, Admit),
            ("Meds:", None, Admit),
            ("Allergies:", Admit, Unknown),
            ("Social History:", History, Unknown),
        ];
        for (line, current, expected) in cases {
            assert_eq!(classify(line, current), Some(expected), "{:?}", line);
        }
        assert_eq!(classify("aspirin 81mg", Admit), Option::None);
    }

    #[test]
    fn precedence() {
        // history beats discharge
        assert_eq!(
            classify("Medical history and discharge meds:", Section::None),
            Some(Section::History)
        );
        // discharge beats admit
        assert_eq!(
            classify("Admission and discharge medications:", Section::None),
            Some(Section::Discharge)
        );
    }

    #[test]
    fn admit_continuation() {
        // "Outpatient:" only counts as admit if we are already in admit
        assert_eq!(
            classify("Outpatient:", Section::Admit),
            Some(Section::Admit)
        );
        assert_eq!(
            classify("Outpatient:", Section::None),
            Some(Section::Unknown)
        );
    }

    #[test]
    fn line_checks() {
        assert!(mentions_opiates("h/o OPIATE abuse"));
        assert!(!mentions_opiates("morphine"));
        assert!(is_ambiguous("meds changed on transfer"));
        assert!(!is_ambiguous("meds unchanged"));
    }
}

//! Walk each admission's note line by line, collecting evidence, and sort the admission into a
//! group.

use crate::{
    cohort::{AdmissionId, AdmissionRecord, Cohort, NoteText, SubjectId},
    drugs::{DrugDictionary, DrugFlags},
    error::Notice,
    section::{self, Section},
};
use qu::ick_use::*;
use rayon::prelude::*;
use std::{
    fmt,
    time::{Duration, Instant},
};

/// The outcome groups an admission can be sorted into.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Group {
    /// Listed drugs on discharge, but none found on admission.
    DischargeOnly = 0,
    /// Admission meds without listed drugs, and no discharge meds section.
    AdmitWithoutDischarge = 1,
    /// Admission and discharge meds sections, neither with listed drugs.
    NoListedDrugs = 2,
    /// Listed drugs on admission.
    AdmitDrugs = 3,
}

impl Group {
    pub fn number(self) -> u8 {
        self as u8
    }

    /// Sort an admission into a group. `None` means the evidence fits no group.
    pub fn assign(evidence: Evidence) -> Option<Group> {
        GROUP_RULES
            .iter()
            .find(|(_, applies)| applies(&evidence))
            .map(|(group, _)| *group)
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// What group assignment looks at.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Evidence {
    pub has_admit: bool,
    pub has_drugs_admit: bool,
    pub has_discharge: bool,
    pub has_drugs_discharge: bool,
}

/// Tried in order, first match wins.
static GROUP_RULES: [(Group, fn(&Evidence) -> bool); 4] = [
    (Group::DischargeOnly, |e| {
        e.has_discharge && e.has_drugs_discharge && (!e.has_admit || !e.has_drugs_admit)
    }),
    (Group::AdmitWithoutDischarge, |e| {
        e.has_admit && !e.has_drugs_admit && !e.has_discharge
    }),
    (Group::NoListedDrugs, |e| {
        e.has_admit && !e.has_drugs_admit && e.has_discharge && !e.has_drugs_discharge
    }),
    (Group::AdmitDrugs, |e| e.has_drugs_admit),
];

/// The classification of one admission. Identifiers are copied from the input row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionResult {
    pub row_id: u64,
    pub subject_id: SubjectId,
    pub hadm_id: AdmissionId,
    pub history_found: bool,
    pub opiate_history_found: bool,
    pub admission_meds_found: bool,
    pub discharge_meds_found: bool,
    pub admission_drugs: DrugFlags,
    pub discharge_drugs: DrugFlags,
    pub group: Option<Group>,
    /// Whether the exposure drug (usually "opiates") was found in the admission meds.
    pub opiate_on_admission: bool,
}

impl AdmissionResult {
    pub fn evidence(&self) -> Evidence {
        Evidence {
            has_admit: self.admission_meds_found,
            has_drugs_admit: self.admission_drugs.any(),
            has_discharge: self.discharge_meds_found,
            has_drugs_discharge: self.discharge_drugs.any(),
        }
    }
}

/// Scans notes with a drug dictionary, and knows which drug counts as the exposure.
#[derive(Debug, Clone)]
pub struct Classifier {
    dict: DrugDictionary,
    exposure: Option<usize>,
}

impl Classifier {
    pub const DEFAULT_EXPOSURE: &'static str = "opiates";

    /// If `exposure_generic` isn't in the dictionary, nobody is ever exposed.
    pub fn new(dict: DrugDictionary, exposure_generic: &str) -> Self {
        let exposure = dict.index_of(exposure_generic);
        if exposure.is_none() {
            event!(
                Level::WARN,
                "\"{}\" is not in the drug list, no admission will be marked as exposed",
                exposure_generic
            );
        }
        Classifier { dict, exposure }
    }

    pub fn dictionary(&self) -> &DrugDictionary {
        &self.dict
    }

    /// Start scanning a new note.
    pub fn scan(&self) -> NoteScan<'_> {
        NoteScan {
            classifier: self,
            section: Section::None,
            line_no: 0,
            history_found: false,
            opiate_history_found: false,
            admission_meds_found: false,
            discharge_meds_found: false,
            admission_drugs: self.dict.new_flags(),
            discharge_drugs: self.dict.new_flags(),
        }
    }

    /// Classify one admission. Problems with the note are returned as notices rather than errors.
    pub fn classify(&self, record: &AdmissionRecord) -> (AdmissionResult, Vec<Notice>) {
        let mut notices = vec![];
        let result = match &record.note {
            NoteText::Text(text) => {
                let mut scan = self.scan();
                for line in text.split('\n') {
                    let outcome = scan.feed_line(line);
                    if outcome.ambiguous {
                        notices.push(Notice::AmbiguousLine {
                            line_no: scan.line_no,
                            line: line.trim_end().to_owned(),
                        });
                    }
                }
                let result = scan.finish(record);
                if result.group.is_none() {
                    notices.push(Notice::UncertainGroup);
                }
                result
            }
            NoteText::Malformed(reason) => {
                notices.push(Notice::MalformedNote {
                    reason: reason.to_string(),
                });
                self.scan().finish(record)
            }
        };
        (result, notices)
    }
}

/// What happened on a single line.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LineOutcome {
    /// Set if the line was a header. The section it started.
    pub header: Option<Section>,
    /// The section the line was counted in.
    pub section: Section,
    pub ambiguous: bool,
}

/// The state of a scan through one note. Accumulators only ever go from false to true.
pub struct NoteScan<'a> {
    classifier: &'a Classifier,
    section: Section,
    line_no: usize,
    history_found: bool,
    opiate_history_found: bool,
    admission_meds_found: bool,
    discharge_meds_found: bool,
    admission_drugs: DrugFlags,
    discharge_drugs: DrugFlags,
}

impl<'a> NoteScan<'a> {
    pub fn section(&self) -> Section {
        self.section
    }

    pub fn feed_line(&mut self, line: &str) -> LineOutcome {
        let line = line.strip_suffix('\r').unwrap_or(line);
        self.line_no += 1;

        let header = section::classify(line, self.section);
        if let Some(next) = header {
            match next {
                Section::History => self.history_found = true,
                Section::Admit => self.admission_meds_found = true,
                Section::Discharge => self.discharge_meds_found = true,
                Section::None | Section::Unknown => (),
            }
            self.section = next;
        }

        let mut ambiguous = false;
        match self.section {
            Section::History => {
                if section::mentions_opiates(line) {
                    self.opiate_history_found = true;
                }
            }
            Section::Admit => self
                .classifier
                .dict
                .scan_line(line, &mut self.admission_drugs),
            Section::Discharge => self
                .classifier
                .dict
                .scan_line(line, &mut self.discharge_drugs),
            Section::None | Section::Unknown => ambiguous = section::is_ambiguous(line),
        }

        LineOutcome {
            header,
            section: self.section,
            ambiguous,
        }
    }

    pub fn evidence(&self) -> Evidence {
        Evidence {
            has_admit: self.admission_meds_found,
            has_drugs_admit: self.admission_drugs.any(),
            has_discharge: self.discharge_meds_found,
            has_drugs_discharge: self.discharge_drugs.any(),
        }
    }

    /// Finish the note and produce its result.
    pub fn finish(self, record: &AdmissionRecord) -> AdmissionResult {
        let group = Group::assign(self.evidence());
        let opiate_on_admission = self
            .classifier
            .exposure
            .map(|idx| self.admission_drugs.get(idx))
            .unwrap_or(false);
        AdmissionResult {
            row_id: record.row_id,
            subject_id: record.subject_id,
            hadm_id: record.hadm_id,
            history_found: self.history_found,
            opiate_history_found: self.opiate_history_found,
            admission_meds_found: self.admission_meds_found,
            discharge_meds_found: self.discharge_meds_found,
            admission_drugs: self.admission_drugs,
            discharge_drugs: self.discharge_drugs,
            group,
            opiate_on_admission,
        }
    }
}

/// Runs the classifier over a whole cohort.
pub struct Search {
    classifier: Classifier,
    verbose: bool,
    progress_interval: usize,
    parallel: bool,
}

impl Search {
    pub fn new(classifier: Classifier) -> Self {
        Search {
            classifier,
            verbose: false,
            progress_interval: 100,
            parallel: false,
        }
    }

    /// Log ambiguous lines, malformed notes and uncertain groups.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Log progress every `interval` admissions. 0 turns progress off.
    pub fn progress_interval(mut self, interval: usize) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Spread admissions over the rayon thread pool. Results stay in cohort order.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn run(&self, cohort: &Cohort) -> SearchSummary {
        let records: &[AdmissionRecord] = cohort;
        let start = Instant::now();
        let process = |(idx, record): (usize, &AdmissionRecord)| {
            self.progress(idx, record, start);
            let (result, notices) = self.classifier.classify(record);
            if self.verbose {
                for notice in notices.iter() {
                    self.report(record, &result, notice);
                }
            }
            (result, notices)
        };
        let processed: Vec<(AdmissionResult, Vec<Notice>)> = if self.parallel {
            records.par_iter().enumerate().map(process).collect()
        } else {
            records.iter().enumerate().map(process).collect()
        };

        let mut summary = SearchSummary::default();
        for (result, notices) in processed {
            for notice in notices {
                match notice {
                    Notice::AmbiguousLine { .. } => summary.ambiguous_lines += 1,
                    Notice::MalformedNote { .. } => summary.malformed_notes += 1,
                    Notice::UncertainGroup => (),
                }
            }
            match result.group {
                Some(group) => summary.group_counts[group.number() as usize] += 1,
                None => summary.unclassified += 1,
            }
            summary.results.push(result);
        }
        summary.elapsed = start.elapsed();

        let secs = summary.elapsed.as_secs_f64();
        event!(
            Level::INFO,
            "Done analysing {} documents in {:.2} seconds ({:.2} docs/sec)",
            summary.results.len(),
            secs,
            rate(summary.results.len(), secs)
        );
        summary
    }

    fn progress(&self, idx: usize, record: &AdmissionRecord, start: Instant) {
        if self.progress_interval == 0 || idx % self.progress_interval != 0 {
            return;
        }
        let secs = start.elapsed().as_secs_f64();
        event!(
            Level::INFO,
            "...index: {}. row_id: {}. subject_id: {}. hadm_id: {}. ({:.1}s, {:.1} docs/sec)",
            idx,
            record.row_id,
            record.subject_id,
            record.hadm_id,
            secs,
            rate(idx, secs)
        );
    }

    fn report(&self, record: &AdmissionRecord, result: &AdmissionResult, notice: &Notice) {
        match notice {
            Notice::MalformedNote { .. } => {
                event!(Level::WARN, "row_id {}: {}", record.row_id, notice)
            }
            Notice::AmbiguousLine { .. } => {
                event!(Level::INFO, "?? row_id {}: {}", record.row_id, notice)
            }
            Notice::UncertainGroup => event!(
                Level::INFO,
                "Uncertain about group type for row_id = {} ({:?})",
                record.row_id,
                result.evidence()
            ),
        }
    }
}

fn rate(count: usize, secs: f64) -> f64 {
    if secs > 0. {
        count as f64 / secs
    } else {
        0.
    }
}

/// Everything a search produced.
#[derive(Debug, Default)]
pub struct SearchSummary {
    /// One per admission, in cohort order.
    pub results: Vec<AdmissionResult>,
    /// Indexed by group number.
    pub group_counts: [usize; 4],
    pub unclassified: usize,
    pub malformed_notes: usize,
    pub ambiguous_lines: usize,
    pub elapsed: Duration,
}

impl SearchSummary {
    pub fn term_table(&self) -> term_data_table::Table<'static> {
        use term_data_table::{Cell, Row, Table};
        let total = self.results.len();
        let pct = |count: usize| {
            if total == 0 {
                0.
            } else {
                count as f64 / total as f64 * 100.
            }
        };
        let mut table = Table::new().with_row(
            Row::new()
                .with_cell(Cell::from("Group"))
                .with_cell(Cell::from("Count"))
                .with_cell(Cell::from("Percentage")),
        );
        let labels = ["0", "1", "2", "3"];
        for (label, count) in labels.iter().zip(self.group_counts) {
            table.add_row(
                Row::new()
                    .with_cell(Cell::from(*label))
                    .with_cell(Cell::from(count.to_string()))
                    .with_cell(Cell::from(format!("{:.1}%", pct(count)))),
            );
        }
        table.add_row(
            Row::new()
                .with_cell(Cell::from("unclassified"))
                .with_cell(Cell::from(self.unclassified.to_string()))
                .with_cell(Cell::from(format!("{:.1}%", pct(self.unclassified)))),
        );
        table
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    fn aspirin() -> Classifier {
        Classifier::new(DrugDictionary::parse("aspirin|asa|ecotrin\n").unwrap(), "opiates")
    }

    fn opiates() -> Classifier {
        Classifier::new(
            DrugDictionary::parse("opiates|morphine|oxycodone\naspirin|asa\n").unwrap(),
            "opiates",
        )
    }

    fn record(note: &str) -> AdmissionRecord {
        AdmissionRecord {
            row_id: 1,
            subject_id: 2,
            hadm_id: 3,
            note: NoteText::from(note),
        }
    }

    #[test]
    fn full_note() {
        let note = "Past Medical History:\n\
                    History of opiates abuse\n\
                    Medications on Admission:\n\
                    Aspirin 81 mg daily\n\
                    Discharge Medications:\n\
                    \n";
        let (result, notices) = aspirin().classify(&record(note));
        assert!(result.history_found);
        assert!(result.opiate_history_found);
        assert!(result.admission_meds_found);
        assert!(result.discharge_meds_found);
        assert_eq!(&*result.admission_drugs, &[true]);
        assert_eq!(&*result.discharge_drugs, &[false]);
        assert_eq!(result.group, Some(Group::AdmitDrugs));
        // no "opiates" generic in this dictionary
        assert!(!result.opiate_on_admission);
        assert!(notices.is_empty());
        assert_eq!((result.row_id, result.subject_id, result.hadm_id), (1, 2, 3));
    }

    #[test]
    fn history_header_line_is_scanned() {
        let clf = Classifier::new(DrugDictionary::parse("aspirin|bayer\n").unwrap(), "opiates");
        let (result, _) = clf.classify(&record(
            "PAST MEDICAL HISTORY: opiate dependence.\n\
             ADMISSION MEDICATIONS:\n\
             aspirin 81mg\n\
             DISCHARGE MEDICATIONS:\n\
             none",
        ));
        assert!(result.history_found);
        assert!(result.opiate_history_found);
        assert!(result.admission_meds_found);
        assert!(result.discharge_meds_found);
        assert_eq!(&*result.admission_drugs, &[true]);
        assert_eq!(&*result.discharge_drugs, &[false]);
        assert_eq!(result.group, Some(Group::AdmitDrugs));
    }

    #[test]
    fn exposure_from_admission_only() {
        let clf = opiates();
        let (result, _) = clf.classify(&record(
            "Home medications:\nMorphine 2mg q4h\nDischarge meds:\noxycodone\n",
        ));
        assert!(result.opiate_on_admission);
        assert_eq!(result.group, Some(Group::AdmitDrugs));

        let (result, _) = clf.classify(&record(
            "Home medications:\naspirin\nDischarge meds:\noxycodone\n",
        ));
        assert!(!result.opiate_on_admission);
        assert_eq!(&*result.discharge_drugs, &[true, false]);
    }

    #[test]
    fn empty_and_headerless_notes() {
        let clf = aspirin();
        for note in ["", "aspirin 81mg\nmorphine prn\n", "\r\n\r\n"] {
            let (result, notices) = clf.classify(&record(note));
            assert!(!result.history_found);
            assert!(!result.opiate_history_found);
            assert!(!result.admission_meds_found);
            assert!(!result.discharge_meds_found);
            assert!(!result.admission_drugs.any());
            assert!(!result.discharge_drugs.any());
            assert_eq!(result.group, None);
            assert!(notices.contains(&Notice::UncertainGroup));
        }
    }

    #[test]
    fn malformed_note() {
        let clf = aspirin();
        let mut rec = record("");
        rec.note = NoteText::from_bytes(b"Meds:\n\xff\xfe aspirin");
        let (result, notices) = clf.classify(&rec);
        assert_eq!(result.group, None);
        assert!(!result.admission_meds_found);
        assert!(matches!(notices[..], [Notice::MalformedNote { .. }]));
    }

    #[test]
    fn unknown_header_ends_section() {
        let clf = aspirin();
        let (result, _) = clf.classify(&record("Medications on admission:\nAllergies:\naspirin\n"));
        assert!(result.admission_meds_found);
        assert!(!result.admission_drugs.any());
        assert_eq!(result.group, Some(Group::AdmitWithoutDischarge));
    }

    #[test]
    fn ambiguous_lines() {
        let clf = aspirin();
        let (_, notices) = clf.classify(&record(
            "Brief course\nPatient's meds reviewed on transfer to floor\n",
        ));
        assert_eq!(
            notices[0],
            Notice::AmbiguousLine {
                line_no: 2,
                line: "Patient's meds reviewed on transfer to floor".into()
            }
        );
    }

    #[test]
    fn section_trace() {
        let clf = aspirin();
        let mut scan = clf.scan();
        assert_eq!(scan.section(), Section::None);
        let outcome = scan.feed_line("Discharge Medications:\r");
        assert_eq!(outcome.header, Some(Section::Discharge));
        let outcome = scan.feed_line("ecotrin");
        assert_eq!(outcome.header, None);
        assert_eq!(outcome.section, Section::Discharge);
        assert!(scan.evidence().has_drugs_discharge);
    }

    #[test]
    fn all_group_combinations() {
        use Group::*;
        // (has_admit, has_drugs_admit, has_discharge, has_drugs_discharge) -> group
        let expected = [
            ((false, false, false, false), None),
            ((false, false, false, true), None),
            ((false, false, true, false), None),
            ((false, false, true, true), Some(DischargeOnly)),
            ((false, true, false, false), Some(AdmitDrugs)),
            ((false, true, false, true), Some(AdmitDrugs)),
            ((false, true, true, false), Some(AdmitDrugs)),
            ((false, true, true, true), Some(DischargeOnly)),
            ((true, false, false, false), Some(AdmitWithoutDischarge)),
            ((true, false, false, true), Some(AdmitWithoutDischarge)),
            ((true, false, true, false), Some(NoListedDrugs)),
            ((true, false, true, true), Some(DischargeOnly)),
            ((true, true, false, false), Some(AdmitDrugs)),
            ((true, true, false, true), Some(AdmitDrugs)),
            ((true, true, true, false), Some(AdmitDrugs)),
            ((true, true, true, true), Some(AdmitDrugs)),
        ];
        for ((a, da, d, dd), group) in expected {
            let evidence = Evidence {
                has_admit: a,
                has_drugs_admit: da,
                has_discharge: d,
                has_drugs_discharge: dd,
            };
            assert_eq!(Group::assign(evidence), group, "{:?}", evidence);
        }
    }

    #[test]
    fn search_keeps_order_and_counts() {
        let cohort = Cohort::new(
            (0..20u64)
                .map(|i| AdmissionRecord {
                    row_id: i,
                    subject_id: i,
                    hadm_id: 100 + i,
                    note: if i % 2 == 0 {
                        NoteText::from("Meds on admission:\nmorphine\n")
                    } else {
                        NoteText::from("nothing to see")
                    },
                })
                .collect(),
        );
        for parallel in [false, true] {
            let summary = Search::new(opiates())
                .progress_interval(5)
                .parallel(parallel)
                .run(&cohort);
            let ids: Vec<u64> = summary.results.iter().map(|r| r.row_id).collect();
            assert_eq!(ids, (0..20).collect::<Vec<_>>());
            assert_eq!(summary.group_counts, [0, 0, 0, 10]);
            assert_eq!(summary.unclassified, 10);
            assert_eq!(summary.malformed_notes, 0);
        }
    }

    const LINES: &[&str] = &[
        "Past Medical History:",
        "opiate use disorder",
        "Medications on Admission:",
        "morphine 2mg",
        "aspirin 81",
        "Discharge Medications:",
        "oxycodone",
        "Allergies:",
        "meds changed on transfer",
        "",
    ];

    proptest! {
        #[test]
        fn accumulators_never_reset(
            lines in proptest::collection::vec(proptest::sample::select(LINES), 0..30)
        ) {
            let clf = opiates();
            let mut scan = clf.scan();
            let mut prev = (scan.evidence(), false, false, scan.admission_drugs.clone());
            for line in lines {
                scan.feed_line(line);
                let (evidence, hist, opiate_hist, admit_drugs) = &prev;
                let now = scan.evidence();
                prop_assert!(now.has_admit || !evidence.has_admit);
                prop_assert!(now.has_discharge || !evidence.has_discharge);
                prop_assert!(now.has_drugs_admit || !evidence.has_drugs_admit);
                prop_assert!(now.has_drugs_discharge || !evidence.has_drugs_discharge);
                prop_assert!(scan.history_found || !hist);
                prop_assert!(scan.opiate_history_found || !opiate_hist);
                prop_assert!(scan.admission_drugs.contains(admit_drugs));
                prev = (
                    now,
                    scan.history_found,
                    scan.opiate_history_found,
                    scan.admission_drugs.clone(),
                );
            }
            prop_assert_eq!(scan.admission_drugs.len(), clf.dictionary().len());
        }
    }
}

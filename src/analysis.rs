//! Compare outcomes between admissions with and without opiates on admission.
//!
//! Takes the result table written by the drug search and a table of ICU/hospital stay times and
//! dates of death, cleans and joins them, and runs the tests in `stats` on the two groups.

use crate::{
    cohort::{AdmissionId, SubjectId},
    load_csv,
    output::FIXED_COLUMNS,
    stats::{
        self, Alternative, ChiSquare, ContingencyTable, Descriptives, KsTest, MannWhitney,
        OddsRatio,
    },
    util::{self, bool_01, mimic_datetime, opt_mimic_datetime},
};
use chrono::NaiveDateTime;
use itertools::Itertools;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet, HashSet},
    ops::Deref,
    path::Path,
    sync::Arc,
};
use term_data_table::{Cell, Row, Table};

const HOURS_IN_DAY: f64 = 24.;

/// A row of the drug search result table. Per-drug columns are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResultRow {
    pub row_id: u64,
    pub subject_id: SubjectId,
    pub hadm_id: AdmissionId,
    #[serde(rename = "hist_found", deserialize_with = "bool_01")]
    pub history_found: bool,
    #[serde(rename = "opiate_history", deserialize_with = "bool_01")]
    pub opiate_history_found: bool,
    #[serde(rename = "admit_found", deserialize_with = "bool_01")]
    pub admission_meds_found: bool,
    #[serde(rename = "dis_found", deserialize_with = "bool_01")]
    pub discharge_meds_found: bool,
    /// Empty for unclassified admissions.
    pub group: Option<u8>,
    #[serde(deserialize_with = "bool_01")]
    pub opiates: bool,
}

impl ResultRow {
    fn admission(&self) -> (SubjectId, AdmissionId) {
        (self.subject_id, self.hadm_id)
    }
}

/// The drug search results, as read back from disk.
#[derive(Debug, Clone, Default)]
pub struct ResultTable {
    els: Arc<Vec<ResultRow>>,
}

impl ResultTable {
    pub fn new(els: Vec<ResultRow>) -> Self {
        ResultTable { els: Arc::new(els) }
    }

    /// Only the leading fixed columns are read. The drug columns can repeat a fixed column's name
    /// (there is usually an "opiates" generic), so they can't go through serde by header.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        fn inner(path: &Path) -> Result<Vec<ResultRow>> {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(true)
                .trim(csv::Trim::All)
                .from_path(path)?;
            let headers = reader.headers()?.clone();
            ensure!(
                headers.iter().take(FIXED_COLUMNS.len()).eq(FIXED_COLUMNS),
                "expected the table to start with the columns {}",
                FIXED_COLUMNS.join(",")
            );
            let fixed = csv::StringRecord::from(FIXED_COLUMNS.to_vec());
            let mut rows = vec![];
            for record in reader.records() {
                let record = record?;
                let record: csv::StringRecord =
                    record.iter().take(FIXED_COLUMNS.len()).collect();
                rows.push(record.deserialize(Some(&fixed))?);
            }
            Ok(rows)
        }

        let path = path.as_ref();
        let rows = inner(path)
            .with_context(|| format!("while loading results \"{}\"", path.display()))?;
        Ok(Self::new(rows))
    }

    /// The rows to analyse: one per `row_id`, no admission with conflicting `admit_found` or
    /// `group` values across its rows, and only admissions with an admission meds section.
    pub fn admissions(&self) -> Vec<ResultRow> {
        let mut seen = HashSet::new();
        let deduped: Vec<&ResultRow> = self
            .els
            .iter()
            .filter(|row| seen.insert(row.row_id))
            .collect();
        if deduped.len() < self.els.len() {
            event!(
                Level::INFO,
                "dropped {} rows with a repeated row_id",
                self.els.len() - deduped.len()
            );
        }

        let ambiguous = ambiguous_admissions(&deduped);
        if !ambiguous.is_empty() {
            event!(
                Level::INFO,
                "removing {} subject/admissions with conflicting admit_found or group",
                ambiguous.len()
            );
        }

        deduped
            .into_iter()
            .filter(|row| !ambiguous.contains(&row.admission()))
            .filter(|row| row.admission_meds_found)
            .cloned()
            .collect()
    }
}

impl Deref for ResultTable {
    type Target = [ResultRow];

    fn deref(&self) -> &Self::Target {
        &self.els
    }
}

/// Admissions whose rows disagree on `admit_found` or on `group`.
fn ambiguous_admissions(rows: &[&ResultRow]) -> BTreeSet<(SubjectId, AdmissionId)> {
    rows.iter()
        .into_group_map_by(|row| row.admission())
        .into_iter()
        .filter(|(_, rows)| {
            rows.iter().map(|row| row.admission_meds_found).unique().count() > 1
                || rows.iter().map(|row| row.group).unique().count() > 1
        })
        .map(|(admission, _)| admission)
        .collect()
}

/// Stay times and date of death for one admission.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Outcome {
    pub subject_id: SubjectId,
    pub hadm_id: AdmissionId,
    #[serde(deserialize_with = "mimic_datetime")]
    pub icu_intime: NaiveDateTime,
    #[serde(deserialize_with = "mimic_datetime")]
    pub icu_outtime: NaiveDateTime,
    #[serde(deserialize_with = "mimic_datetime")]
    pub hospital_intime: NaiveDateTime,
    #[serde(deserialize_with = "mimic_datetime")]
    pub hospital_outtime: NaiveDateTime,
    #[serde(deserialize_with = "opt_mimic_datetime")]
    pub dod: Option<NaiveDateTime>,
}

/// Outcomes indexed by admission.
#[derive(Debug, Clone, Default)]
pub struct Outcomes {
    by_admission: BTreeMap<(SubjectId, AdmissionId), Outcome>,
}

impl Outcomes {
    /// Only the first row for each admission is kept.
    pub fn new(rows: Vec<Outcome>) -> Self {
        let total = rows.len();
        let mut by_admission = BTreeMap::new();
        for row in rows {
            by_admission
                .entry((row.subject_id, row.hadm_id))
                .or_insert(row);
        }
        if by_admission.len() < total {
            event!(
                Level::WARN,
                "Orig row cnt={} but unique rows by subject/hadm_id cnt={}",
                total,
                by_admission.len()
            );
        }
        Outcomes { by_admission }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load_csv(path)?))
    }

    pub fn get(&self, subject_id: SubjectId, hadm_id: AdmissionId) -> Option<&Outcome> {
        self.by_admission.get(&(subject_id, hadm_id))
    }

    pub fn len(&self) -> usize {
        self.by_admission.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_admission.is_empty()
    }
}

/// An admission in the study, with derived outcomes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StudyAdmission {
    pub row_id: u64,
    pub subject_id: SubjectId,
    pub hadm_id: AdmissionId,
    pub group: Option<u8>,
    pub opiates: bool,
    pub icu_los_days: f64,
    pub hospital_los_days: f64,
    /// Days from hospital discharge to death, negative if the patient died before discharge.
    pub death_days_since_hospital: Option<f64>,
    pub mortality_30d: bool,
    pub mortality_1y: bool,
}

impl StudyAdmission {
    pub fn new(row: &ResultRow, outcome: &Outcome) -> Self {
        let days = |from: NaiveDateTime, to: NaiveDateTime| {
            (to - from).num_seconds() as f64 / 3600. / HOURS_IN_DAY
        };
        let death_days_since_hospital = outcome.dod.map(|dod| days(outcome.hospital_outtime, dod));
        let died_within = |limit: f64| matches!(death_days_since_hospital, Some(d) if d <= limit);
        StudyAdmission {
            row_id: row.row_id,
            subject_id: row.subject_id,
            hadm_id: row.hadm_id,
            group: row.group,
            opiates: row.opiates,
            icu_los_days: days(outcome.icu_intime, outcome.icu_outtime),
            hospital_los_days: days(outcome.hospital_intime, outcome.hospital_outtime),
            death_days_since_hospital,
            mortality_30d: died_within(30.),
            mortality_1y: died_within(365.),
        }
    }
}

/// The cleaned, joined data, split by opiates on admission.
#[derive(Debug, Clone, Default)]
pub struct Study {
    pub opiate: Vec<StudyAdmission>,
    pub non_opiate: Vec<StudyAdmission>,
    /// Admissions left out because there was no outcome row for them.
    pub missing_outcomes: usize,
}

impl Study {
    pub fn build(results: &ResultTable, outcomes: &Outcomes) -> Self {
        let mut study = Study::default();
        let mut included = HashSet::new();
        for row in results.admissions() {
            // Several notes can belong to one admission. They agree on group, so use the first.
            if !included.insert(row.admission()) {
                continue;
            }
            let Some(outcome) = outcomes.get(row.subject_id, row.hadm_id) else {
                study.missing_outcomes += 1;
                continue
            };
            let admission = StudyAdmission::new(&row, outcome);
            if admission.opiates {
                study.opiate.push(admission);
            } else {
                study.non_opiate.push(admission);
            }
        }
        if study.missing_outcomes > 0 {
            event!(
                Level::WARN,
                "{} admissions have no outcome row and were left out",
                study.missing_outcomes
            );
        }
        study
    }

    pub fn report(&self, opts: &ReportOptions) -> Report {
        let continuous = |name: &'static str, f: fn(&StudyAdmission) -> f64| {
            let opiate: Vec<f64> = self.opiate.iter().map(f).collect();
            let non_opiate: Vec<f64> = self.non_opiate.iter().map(f).collect();
            ContinuousReport {
                name,
                opiate: stats::describe(&opiate),
                non_opiate: stats::describe(&non_opiate),
                opiate_percentiles: stats::percentiles(&opiate, &stats::PERCENTILES),
                non_opiate_percentiles: stats::percentiles(&non_opiate, &stats::PERCENTILES),
                opiate_normality: stats::ks_normal(&opiate),
                non_opiate_normality: stats::ks_normal(&non_opiate),
                mann_whitney: stats::mann_whitney_u(&opiate, &non_opiate, opts.alternative),
            }
        };
        let binary = |name: &'static str, f: fn(&StudyAdmission) -> bool| {
            let table = ContingencyTable::from_outcomes(
                self.opiate.iter().map(f),
                self.non_opiate.iter().map(f),
            );
            BinaryReport {
                name,
                table,
                chi_square: stats::chi2_contingency(&table, opts.yates),
                odds_ratio: stats::odds_ratio(&table, opts.z),
            }
        };

        Report {
            opiate_n: self.opiate.len(),
            non_opiate_n: self.non_opiate.len(),
            alpha: opts.alpha,
            continuous: vec![
                continuous("icu_los_days", |a| a.icu_los_days),
                continuous("hospital_los_days", |a| a.hospital_los_days),
            ],
            binary: vec![
                binary("mortality_30d", |a| a.mortality_30d),
                binary("mortality_1y", |a| a.mortality_1y),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportOptions {
    /// Significance level.
    pub alpha: f64,
    /// Critical value for odds ratio confidence intervals.
    pub z: f64,
    /// Alternative hypothesis for the opiate group in Mann-Whitney tests.
    pub alternative: Alternative,
    /// Use Yates' correction in chi-square tests.
    pub yates: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        ReportOptions {
            alpha: 0.05,
            z: 1.96,
            alternative: Alternative::Greater,
            yates: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ContinuousReport {
    pub name: &'static str,
    pub opiate: Option<Descriptives>,
    pub non_opiate: Option<Descriptives>,
    pub opiate_percentiles: Option<Vec<f64>>,
    pub non_opiate_percentiles: Option<Vec<f64>>,
    pub opiate_normality: Option<KsTest>,
    pub non_opiate_normality: Option<KsTest>,
    pub mann_whitney: Option<MannWhitney>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BinaryReport {
    pub name: &'static str,
    pub table: ContingencyTable,
    pub chi_square: Option<ChiSquare>,
    pub odds_ratio: Option<OddsRatio>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub opiate_n: usize,
    pub non_opiate_n: usize,
    pub alpha: f64,
    pub continuous: Vec<ContinuousReport>,
    pub binary: Vec<BinaryReport>,
}

impl Report {
    /// Print the report as a series of tables.
    pub fn print(&self) {
        util::header("Groups");
        println!("opiate on admission: {}", self.opiate_n);
        println!("no opiate on admission: {}", self.non_opiate_n);

        for cont in self.continuous.iter() {
            util::header(cont.name);
            println!("{}", cont.descriptives_table());
            println!("{}", cont.percentiles_table());

            println!("Kolmogorov-Smirnov test for normality");
            for (label, ks) in [
                ("opiate", &cont.opiate_normality),
                ("non opiate", &cont.non_opiate_normality),
            ] {
                match ks {
                    Some(ks) => println!(
                        "  {}: D={:.4}, {}",
                        label,
                        ks.statistic,
                        stats::verdict(ks.p_value, self.alpha)
                    ),
                    None => println!("  {}: not enough distinct values", label),
                }
            }

            match &cont.mann_whitney {
                Some(mw) => println!(
                    "Mann-Whitney U ({}, opiate vs non opiate): U={}, {}",
                    mw.alternative,
                    mw.u,
                    stats::verdict(mw.p_value, self.alpha)
                ),
                None => println!("Mann-Whitney U: not enough data"),
            }
        }

        for bin in self.binary.iter() {
            util::header(bin.name);
            println!("{}", bin.term_table());
            match &bin.chi_square {
                Some(chi) => println!(
                    "chi-square={:.4} (dof {}), {}",
                    chi.statistic,
                    chi.dof,
                    stats::verdict(chi.p_value, self.alpha)
                ),
                None => println!("chi-square: a row or column is empty"),
            }
            match &bin.odds_ratio {
                Some(or) => println!(
                    "odds ratio {:.3} (CI {:.3} - {:.3}, z={})",
                    or.ratio, or.lower, or.upper, or.z
                ),
                None => println!("odds ratio: undefined (a cell is zero)"),
            }
        }
    }
}

impl ContinuousReport {
    fn descriptives_table(&self) -> Table<'static> {
        let mut table = Table::new().with_row(
            ["Group", "N", "Mean", "Median", "Std. dev.", "Variance"]
                .into_iter()
                .fold(Row::new(), |row, title| row.with_cell(Cell::from(title))),
        );
        for (label, desc) in [("opiate", &self.opiate), ("non opiate", &self.non_opiate)] {
            let mut row = Row::new().with_cell(Cell::from(label));
            match desc {
                Some(d) => {
                    row = row
                        .with_cell(Cell::from(d.n.to_string()))
                        .with_cell(Cell::from(format!("{:.3}", d.mean)))
                        .with_cell(Cell::from(format!("{:.3}", d.median)))
                        .with_cell(Cell::from(format!("{:.3}", d.std_dev)))
                        .with_cell(Cell::from(format!("{:.3}", d.variance)));
                }
                None => {
                    row = row.with_cell(Cell::from("0"));
                    for _ in 0..4 {
                        row = row.with_cell(Cell::from("-"));
                    }
                }
            }
            table.add_row(row);
        }
        table
    }

    fn percentiles_table(&self) -> Table<'static> {
        let mut header = Row::new().with_cell(Cell::from("Percentile"));
        for p in stats::PERCENTILES {
            header = header.with_cell(Cell::from(format!("{}", p)));
        }
        let mut table = Table::new().with_row(header);
        for (label, values) in [
            ("opiate", &self.opiate_percentiles),
            ("non opiate", &self.non_opiate_percentiles),
        ] {
            let mut row = Row::new().with_cell(Cell::from(label));
            for idx in 0..stats::PERCENTILES.len() {
                let cell = match values {
                    Some(values) => format!("{:.2}", values[idx]),
                    None => "-".to_string(),
                };
                row = row.with_cell(Cell::from(cell));
            }
            table.add_row(row);
        }
        table
    }
}

impl BinaryReport {
    fn term_table(&self) -> Table<'static> {
        let [[a, b], [c, d]] = self.table.cells;
        Table::new()
            .with_row(
                Row::new()
                    .with_cell(Cell::from(""))
                    .with_cell(Cell::from(self.name))
                    .with_cell(Cell::from("no event")),
            )
            .with_row(
                Row::new()
                    .with_cell(Cell::from("opiate"))
                    .with_cell(Cell::from(a.to_string()))
                    .with_cell(Cell::from(b.to_string())),
            )
            .with_row(
                Row::new()
                    .with_cell(Cell::from("non opiate"))
                    .with_cell(Cell::from(c.to_string()))
                    .with_cell(Cell::from(d.to_string())),
            )
    }
}

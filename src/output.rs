//! The per-admission result table.
//!
//! Rows are written to `<output>.partial` and the file is renamed once the last row is in, so a
//! file at the real output path is always complete.

use crate::{drugs::DrugDictionary, error::Error, notes::AdmissionResult, util};
use qu::ick_use::*;
use std::{
    fs,
    path::{Path, PathBuf},
};

/// Columns before the per-drug flags.
pub const FIXED_COLUMNS: [&str; 9] = [
    "row_id",
    "subject_id",
    "hadm_id",
    "hist_found",
    "opiate_history",
    "admit_found",
    "dis_found",
    "group",
    "opiates",
];

pub struct ResultWriter {
    path: PathBuf,
    partial: PathBuf,
    writer: csv::Writer<fs::File>,
    drug_count: usize,
    rows: usize,
}

impl ResultWriter {
    /// Open the output, refusing if something is already at `path`.
    ///
    /// Call this before doing any work, so a conflict is reported straight away.
    pub fn create(path: impl AsRef<Path>, dict: &DrugDictionary) -> Result<Self> {
        fn inner(path: &Path, dict: &DrugDictionary) -> Result<ResultWriter> {
            check_free(path)?;
            let partial = partial_path(path);
            if util::path_exists(&partial)? {
                event!(
                    Level::WARN,
                    "overwriting incomplete output at \"{}\"",
                    partial.display()
                );
            }
            let mut writer = csv::Writer::from_path(&partial)?;
            writer.write_record(
                FIXED_COLUMNS
                    .iter()
                    .copied()
                    .chain(dict.generics().map(|g| &**g)),
            )?;
            Ok(ResultWriter {
                path: path.to_owned(),
                partial,
                writer,
                drug_count: dict.len(),
                rows: 0,
            })
        }

        let path = path.as_ref();
        inner(path, dict).with_context(|| format!("creating output \"{}\"", path.display()))
    }

    pub fn write(&mut self, result: &AdmissionResult) -> Result {
        ensure!(
            result.admission_drugs.len() == self.drug_count,
            "result for row_id {} has {} drug flags, expected {}",
            result.row_id,
            result.admission_drugs.len(),
            self.drug_count
        );
        let mut record = csv::StringRecord::new();
        record.push_field(&result.row_id.to_string());
        record.push_field(&result.subject_id.to_string());
        record.push_field(&result.hadm_id.to_string());
        for flag in [
            result.history_found,
            result.opiate_history_found,
            result.admission_meds_found,
            result.discharge_meds_found,
        ] {
            record.push_field(flag_01(flag));
        }
        match result.group {
            Some(group) => record.push_field(&group.to_string()),
            None => record.push_field(""),
        }
        record.push_field(flag_01(result.opiate_on_admission));
        for flag in result.admission_drugs.iter() {
            record.push_field(flag_01(*flag));
        }
        self.writer.write_record(&record)?;
        self.rows += 1;
        Ok(())
    }

    pub fn write_all<'a>(
        &mut self,
        results: impl IntoIterator<Item = &'a AdmissionResult>,
    ) -> Result {
        for result in results {
            self.write(result)?;
        }
        Ok(())
    }

    /// Flush and move the file to its final path. Returns the number of rows written.
    pub fn finish(mut self) -> Result<usize> {
        self.writer.flush()?;
        drop(self.writer);
        check_free(&self.path)?;
        fs::rename(&self.partial, &self.path).with_context(|| {
            format!(
                "moving \"{}\" to \"{}\"",
                self.partial.display(),
                self.path.display()
            )
        })?;
        Ok(self.rows)
    }
}

/// Fail with `Error::OutputConflict` if something is already at `path`.
pub fn check_free(path: &Path) -> Result {
    if util::path_exists(path)? {
        return Err(Error::OutputConflict {
            path: path.to_owned(),
        }
        .into());
    }
    Ok(())
}

/// `out.csv` -> `out.csv.partial`
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_owned();
    name.push(".partial");
    path.with_file_name(name)
}

fn flag_01(flag: bool) -> &'static str {
    if flag {
        "1"
    } else {
        "0"
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        cohort::{AdmissionRecord, NoteText},
        notes::Classifier,
    };

    fn results() -> (DrugDictionary, Vec<AdmissionResult>) {
        let dict = DrugDictionary::parse("opiates|morphine\naspirin|asa\n").unwrap();
        let clf = Classifier::new(dict.clone(), "opiates");
        let notes = [
            "Medications on admission:\nmorphine\naspirin\n",
            "Discharge medications:\nasa\n",
            "",
        ];
        let results = notes
            .iter()
            .enumerate()
            .map(|(idx, note)| {
                let record = AdmissionRecord {
                    row_id: idx as u64 + 1,
                    subject_id: 10,
                    hadm_id: 100 + idx as u64,
                    note: NoteText::from(*note),
                };
                clf.classify(&record).0
            })
            .collect();
        (dict, results)
    }

    #[test]
    fn writes_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let (dict, results) = results();
        let mut writer = ResultWriter::create(&path, &dict).unwrap();
        assert!(partial_path(&path).exists());
        assert!(!path.exists());
        writer.write_all(&results).unwrap();
        assert_eq!(writer.finish().unwrap(), 3);

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(
            lines,
            [
                "row_id,subject_id,hadm_id,hist_found,opiate_history,admit_found,dis_found,group,opiates,opiates,aspirin",
                "1,10,100,0,0,1,0,3,1,1,1",
                "2,10,101,0,0,0,1,0,0,0,0",
                "3,10,102,0,0,0,0,,0,0,0",
            ]
        );
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        fs::write(&path, "precious").unwrap();
        let (dict, _) = results();
        let err = ResultWriter::create(&path, &dict).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::OutputConflict { .. })
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), "precious");
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn partial_names() {
        assert_eq!(
            partial_path(Path::new("data/out.csv")),
            Path::new("data/out.csv.partial")
        );
    }
}

//! The drug dictionary: generic names, their brand synonyms, and a matcher that finds them all in
//! one pass over a line.

use crate::{error::Error, util, ArcStr};
use qu::ick_use::*;
use regex::{RegexSet, RegexSetBuilder};
use std::{collections::BTreeMap, fmt, fs, io::prelude::*, ops, path::Path, sync::Arc};

/// One line of the drug list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrugEntry {
    /// Lowercased generic name. This is also the column name in the result table.
    pub generic: ArcStr,
    /// Lowercased brand names/synonyms. Never empty strings.
    pub synonyms: Vec<ArcStr>,
}

impl DrugEntry {
    /// The alternation over the generic name and all its synonyms.
    fn pattern(&self) -> String {
        let mut out = String::from("(?:");
        out.push_str(&self.generic);
        for syn in self.synonyms.iter() {
            out.push('|');
            out.push_str(syn);
        }
        out.push(')');
        out
    }
}

impl fmt::Display for DrugEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.generic)?;
        for syn in self.synonyms.iter() {
            write!(f, "|{}", syn)?;
        }
        Ok(())
    }
}

/// The parsed drug list.
///
/// Generic names are assigned flag indices in file order when the list is loaded, and these never
/// change. Cloning is cheap, and clones share everything.
#[derive(Debug, Clone)]
pub struct DrugDictionary {
    entries: Arc<Vec<DrugEntry>>,
    index: Arc<BTreeMap<ArcStr, usize>>,
    /// Pattern `i` is the alternation for `entries[i]`.
    matcher: RegexSet,
}

impl DrugDictionary {
    /// Load a drug list with one generic per line, in the format `generic|brand1|brand2|...`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| Error::DrugListUnreadable {
            path: path.to_owned(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse the text of a drug list.
    ///
    /// Everything is lowercased and fields are trimmed. Blank lines and empty synonym fields are
    /// skipped.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let mut entries = vec![];
        // generic -> (flag index, line number)
        let mut seen: BTreeMap<ArcStr, (usize, usize)> = BTreeMap::new();

        for (line_idx, line) in text.lines().enumerate() {
            let line_no = line_idx + 1;
            if line.trim().is_empty() {
                continue;
            }
            let line = line.to_lowercase();
            let mut fields = line.split('|').map(str::trim);
            let generic = fields.next().unwrap_or("");
            if generic.is_empty() {
                return Err(Error::MalformedDictionary {
                    line: line_no,
                    reason: "no generic name before the first '|'".into(),
                });
            }
            if let Some((_, first_line)) = seen.get(generic) {
                return Err(Error::MalformedDictionary {
                    line: line_no,
                    reason: format!(
                        "generic \"{}\" already listed on line {}",
                        generic, first_line
                    ),
                });
            }
            let entry = DrugEntry {
                generic: generic.into(),
                synonyms: fields.filter(|f| !f.is_empty()).map(Into::into).collect(),
            };
            if let Err(e) = regex::Regex::new(&entry.pattern()) {
                return Err(Error::MalformedDictionary {
                    line: line_no,
                    reason: format!("invalid pattern: {}", e),
                });
            }
            seen.insert(entry.generic.clone(), (entries.len(), line_no));
            entries.push(entry);
        }

        let matcher = RegexSetBuilder::new(entries.iter().map(DrugEntry::pattern))
            .case_insensitive(true)
            .build()
            .map_err(|e| Error::MalformedDictionary {
                line: 0,
                reason: format!("could not build matcher: {}", e),
            })?;
        let index = seen
            .into_iter()
            .map(|(generic, (idx, _))| (generic, idx))
            .collect();

        Ok(DrugDictionary {
            entries: Arc::new(entries),
            index: Arc::new(index),
            matcher,
        })
    }

    /// Write the dictionary back out in the same format it was loaded from.
    pub fn save(&self, path: impl AsRef<Path>, overwrite: bool) -> Result {
        fn inner(this: &DrugDictionary, path: &Path, overwrite: bool) -> Result {
            ensure!(
                overwrite || !util::path_exists(path)?,
                "file already exists"
            );
            let mut file = fs::File::create(path)?;
            write!(file, "{}", this)?;
            Ok(())
        }

        let path = path.as_ref();
        inner(self, path, overwrite)
            .with_context(|| format!("error writing drug list to file \"{}\"", path.display()))
    }

    /// Generic names in flag index order.
    pub fn generics(&self) -> impl Iterator<Item = &ArcStr> + '_ {
        self.entries.iter().map(|entry| &entry.generic)
    }

    /// The flag index of a generic name (case-insensitive).
    pub fn index_of(&self, generic: &str) -> Option<usize> {
        self.index.get(generic.to_lowercase().as_str()).copied()
    }

    /// An all-false flag vector of the right length for this dictionary.
    pub fn new_flags(&self) -> DrugFlags {
        DrugFlags(vec![false; self.entries.len()])
    }

    /// Set the flag of every generic mentioned anywhere in `line`.
    ///
    /// Flags are only ever set, never cleared.
    pub fn scan_line(&self, line: &str, flags: &mut DrugFlags) {
        debug_assert_eq!(flags.len(), self.entries.len());
        for idx in self.matcher.matches(line).into_iter() {
            flags.0[idx] = true;
        }
    }

    pub fn term_table(&self) -> term_data_table::Table<'_> {
        use term_data_table::{Cell, Row, Table};
        let mut table = Table::new().with_row(
            Row::new()
                .with_cell(Cell::from("Index"))
                .with_cell(Cell::from("Generic"))
                .with_cell(Cell::from("Synonyms")),
        );
        for (idx, entry) in self.entries.iter().enumerate() {
            table.add_row(
                Row::new()
                    .with_cell(Cell::from(idx.to_string()))
                    .with_cell(Cell::from(&*entry.generic))
                    .with_cell(Cell::from(entry.synonyms.join(", "))),
            );
        }
        table
    }
}

impl ops::Deref for DrugDictionary {
    type Target = [DrugEntry];

    fn deref(&self) -> &Self::Target {
        &self.entries
    }
}

impl fmt::Display for DrugDictionary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for entry in self.entries.iter() {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}

/// One flag per generic in a `DrugDictionary`, in flag index order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DrugFlags(Vec<bool>);

impl DrugFlags {
    pub fn get(&self, idx: usize) -> bool {
        self.0.get(idx).copied().unwrap_or(false)
    }

    /// Whether any drug was found.
    pub fn any(&self) -> bool {
        self.0.iter().any(|v| *v)
    }

    /// Whether every flag set in `other` is also set in `self`.
    pub fn contains(&self, other: &DrugFlags) -> bool {
        self.0.len() == other.0.len() && self.0.iter().zip(other.0.iter()).all(|(a, b)| *a || !*b)
    }
}

impl ops::Deref for DrugFlags {
    type Target = [bool];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;

    const LIST: &str = "Opiates|Morphine|oxycodone|Percocet\n\
                        aspirin|ASA|ecotrin\n\
                        \n\
                        heparin|\n";

    #[test]
    fn parse_keeps_file_order() {
        let dict = DrugDictionary::parse(LIST).unwrap();
        let generics: Vec<_> = dict.generics().map(|g| g.to_string()).collect();
        assert_eq!(generics, ["opiates", "aspirin", "heparin"]);
        assert_eq!(dict[0].synonyms.len(), 3);
        // trailing '|' must not add an empty synonym
        assert!(dict[2].synonyms.is_empty());
    }

    #[test]
    fn index_is_a_bijection() {
        let dict = DrugDictionary::parse(LIST).unwrap();
        let mut seen = vec![false; dict.len()];
        for generic in dict.generics() {
            let idx = dict.index_of(generic).unwrap();
            assert!(!seen[idx]);
            seen[idx] = true;
            assert_eq!(&dict[idx].generic, generic);
        }
        assert!(seen.into_iter().all(|v| v));
        assert_eq!(dict.index_of("ASPIRIN"), Some(1));
        assert_eq!(dict.index_of("ibuprofen"), None);
        assert_eq!(dict.new_flags().len(), dict.len());
    }

    #[test]
    fn missing_generic() {
        match DrugDictionary::parse("aspirin|asa\n|tylenol\n") {
            Err(Error::MalformedDictionary { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected malformed dictionary, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_generic() {
        match DrugDictionary::parse("aspirin|asa\nheparin\nAspirin|ecotrin\n") {
            Err(Error::MalformedDictionary { line, reason }) => {
                assert_eq!(line, 3);
                assert!(reason.contains("line 1"), "{}", reason);
            }
            other => panic!("expected malformed dictionary, got {:?}", other),
        }
    }

    #[test]
    fn bad_pattern() {
        assert!(matches!(
            DrugDictionary::parse("aspirin|asa(\n"),
            Err(Error::MalformedDictionary { line: 1, .. })
        ));
    }

    #[test]
    fn unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            DrugDictionary::load(dir.path().join("missing.txt")),
            Err(Error::DrugListUnreadable { .. })
        ));
    }

    #[test]
    fn scan_finds_every_generic() {
        let dict = DrugDictionary::parse(LIST).unwrap();
        let mut flags = dict.new_flags();
        dict.scan_line("1. PERCOCET 5/325 q6h prn, Aspirin 81mg daily", &mut flags);
        assert_eq!(&*flags, &[true, true, false]);
        assert!(flags.any());

        let mut flags = dict.new_flags();
        dict.scan_line("no drugs on this line", &mut flags);
        assert!(!flags.any());
    }

    #[test]
    fn display_round_trips() {
        let dict = DrugDictionary::parse(LIST).unwrap();
        let again = DrugDictionary::parse(&dict.to_string()).unwrap();
        assert!(dict.generics().eq(again.generics()));
        assert_eq!(&*dict, &*again);
    }

    #[test]
    fn save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drugs.txt");
        let dict = DrugDictionary::parse(LIST).unwrap();
        dict.save(&path, false).unwrap();
        assert!(dict.save(&path, false).is_err());
        let loaded = DrugDictionary::load(&path).unwrap();
        assert!(dict.generics().eq(loaded.generics()));
    }

    proptest! {
        #[test]
        fn scan_is_idempotent_and_monotonic(lines in proptest::collection::vec(".{0,40}", 0..8)) {
            let dict = DrugDictionary::parse(LIST).unwrap();
            let mut flags = dict.new_flags();
            for line in lines.iter() {
                let before = flags.clone();
                dict.scan_line(line, &mut flags);
                prop_assert!(flags.contains(&before));
                let once = flags.clone();
                dict.scan_line(line, &mut flags);
                prop_assert_eq!(&once, &flags);
            }
        }
    }
}

use clap::Parser;
use icu_opiate_analysis::{
    AdmissionRecord, Classifier, DrugDictionary, NoteText, SearchConfig, Section,
};
use qu::ick_use::*;
use std::{fs, path::PathBuf};

/// Show how a single note is read: the section each line is counted in, and the result.
#[derive(Parser)]
struct Opt {
    /// A file holding the note text.
    note: PathBuf,
    /// The `generic|brand|...` drug list.
    #[clap(long)]
    drug_list: Option<PathBuf>,
    /// The generic that marks an admission as exposed.
    #[clap(long)]
    exposure: Option<String>,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let defaults = SearchConfig::default();
    let dict = DrugDictionary::load(opt.drug_list.unwrap_or(defaults.drug_list))?;
    let classifier = Classifier::new(
        dict,
        opt.exposure.as_deref().unwrap_or(&defaults.exposure_generic),
    );

    let raw = fs::read(&opt.note)
        .with_context(|| format!("reading note \"{}\"", opt.note.display()))?;
    let text = match NoteText::from_bytes(&raw) {
        NoteText::Text(text) => text,
        NoteText::Malformed(reason) => bail!("{}", reason),
    };

    let mut scan = classifier.scan();
    for (idx, line) in text.split('\n').enumerate() {
        let outcome = scan.feed_line(line);
        let marker = match (outcome.header, outcome.ambiguous) {
            (Some(_), _) => '#',
            (None, true) => '?',
            (None, false) => ' ',
        };
        let section = match outcome.section {
            Section::None => String::new(),
            section => section.to_string(),
        };
        println!("{:>5} {:<9} {} {}", idx + 1, section, marker, line.trim_end());
    }

    let result = scan.finish(&AdmissionRecord {
        row_id: 0,
        subject_id: 0,
        hadm_id: 0,
        note: NoteText::Text(text.clone()),
    });
    let found = |flags: &[bool]| {
        classifier
            .dictionary()
            .generics()
            .zip(flags)
            .filter(|(_, flag)| **flag)
            .map(|(generic, _)| generic.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };

    println!();
    println!("history found:        {}", result.history_found);
    println!("opiate history:       {}", result.opiate_history_found);
    println!("admission meds found: {}", result.admission_meds_found);
    println!("discharge meds found: {}", result.discharge_meds_found);
    println!("admission drugs:      {}", found(&result.admission_drugs));
    println!("discharge drugs:      {}", found(&result.discharge_drugs));
    match result.group {
        Some(group) => println!("group:                {}", group),
        None => println!("group:                unclassified"),
    }
    println!("opiates on admission: {}", result.opiate_on_admission);
    Ok(())
}

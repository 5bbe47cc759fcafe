use clap::Parser;
use icu_opiate_analysis::{
    check_extension, header, output, Classifier, Cohort, DrugDictionary, ResultWriter, Search,
    SearchConfig,
};
use qu::ick_use::*;
use std::path::PathBuf;

/// Classify admissions by the drugs mentioned in the medication sections of their notes.
#[derive(Parser)]
struct Opt {
    /// csv export of the cohort query, with row_id, subject_id, hadm_id and text columns.
    cohort: PathBuf,
    /// toml file with search settings. Flags below override it.
    #[clap(long, short)]
    config: Option<PathBuf>,
    /// The `generic|brand|...` drug list.
    #[clap(long)]
    drug_list: Option<PathBuf>,
    /// Where to write the result table. Must not already exist.
    #[clap(long, short)]
    output: Option<PathBuf>,
    /// The generic that marks an admission as exposed.
    #[clap(long)]
    exposure: Option<String>,
    /// Log progress every this many admissions.
    #[clap(long)]
    progress_interval: Option<usize>,
    /// Report ambiguous lines, malformed notes and admissions that fit no group.
    #[clap(long)]
    report_uncertain: bool,
    /// Classify admissions on all cores.
    #[clap(long)]
    parallel: bool,
    /// Print the drug list before searching.
    #[clap(long)]
    show_drugs: bool,
}

impl Opt {
    fn config(&self) -> Result<SearchConfig> {
        let mut config = match &self.config {
            Some(path) => {
                check_extension(path, "toml")?;
                SearchConfig::load(path)?
            }
            None => SearchConfig::default(),
        };
        if let Some(drug_list) = &self.drug_list {
            config.drug_list = drug_list.clone();
        }
        if let Some(output) = &self.output {
            config.output = output.clone();
        }
        if let Some(exposure) = &self.exposure {
            config.exposure_generic = exposure.clone();
        }
        if let Some(interval) = self.progress_interval {
            config.progress_interval = interval;
        }
        config.verbose |= self.report_uncertain;
        config.parallel |= self.parallel;
        Ok(config)
    }
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    let config = opt.config()?;
    // Don't do any work if we can't write the result.
    output::check_free(&config.output)?;

    let dict = DrugDictionary::load(&config.drug_list)?;
    event!(
        Level::INFO,
        "Using {} drugs from \"{}\"",
        dict.len(),
        config.drug_list.display()
    );
    if opt.show_drugs {
        println!("{}", dict.term_table());
    }

    let cohort = Cohort::load(&opt.cohort)?;
    event!(Level::INFO, "Reading {} documents...", cohort.len());

    let mut writer = ResultWriter::create(&config.output, &dict)?;
    let search = Search::new(Classifier::new(dict, &config.exposure_generic))
        .verbose(config.verbose)
        .progress_interval(config.progress_interval)
        .parallel(config.parallel);
    let summary = search.run(&cohort);
    writer.write_all(&summary.results)?;
    let rows = writer.finish()?;

    header("Groups");
    println!("{}", summary.term_table());
    println!("malformed notes: {}", summary.malformed_notes);
    println!("ambiguous lines: {}", summary.ambiguous_lines);
    println!("wrote {} rows to \"{}\"", rows, config.output.display());
    Ok(())
}

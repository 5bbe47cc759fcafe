use clap::Parser;
use icu_opiate_analysis::{
    analysis::{Outcomes, ReportOptions, ResultTable, Study},
    stats::Alternative,
};
use qu::ick_use::*;
use std::path::PathBuf;

/// Compare length of stay and mortality between admissions with and without opiates on
/// admission.
#[derive(Parser)]
struct Opt {
    /// Result table written by `find_drugs`.
    results: PathBuf,
    /// csv with subject_id, hadm_id, icu_intime, icu_outtime, hospital_intime,
    /// hospital_outtime and dod columns.
    outcomes: PathBuf,
    /// Significance level.
    #[clap(long, default_value_t = 0.05)]
    alpha: f64,
    /// Critical value for odds ratio confidence intervals.
    #[clap(long, default_value_t = 1.96)]
    z: f64,
    /// Alternative hypothesis for the opiate group (two-sided, less or greater).
    #[clap(long, default_value = "greater")]
    alternative: Alternative,
    /// Don't apply Yates' correction to chi-square tests.
    #[clap(long)]
    no_yates: bool,
    /// Print the report as json.
    #[clap(long)]
    json: bool,
}

#[qu::ick]
pub fn main(opt: Opt) -> Result {
    ensure!(
        opt.alpha > 0. && opt.alpha < 1.,
        "alpha must be between 0 and 1"
    );
    let results = ResultTable::load(&opt.results)?;
    let outcomes = Outcomes::load(&opt.outcomes)?;
    event!(
        Level::INFO,
        "loaded {} result rows and {} outcomes",
        results.len(),
        outcomes.len()
    );

    let study = Study::build(&results, &outcomes);
    let report = study.report(&ReportOptions {
        alpha: opt.alpha,
        z: opt.z,
        alternative: opt.alternative,
        yates: !opt.no_yates,
    });

    if opt.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print();
    }
    Ok(())
}

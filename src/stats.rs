//! Descriptive statistics and the hypothesis tests used to compare the opiate and non-opiate
//! groups.
//!
//! The tests match the usual textbook definitions (and scipy's defaults): population standard
//! deviation, linear interpolation for percentiles, tie-corrected normal approximation for
//! Mann-Whitney U, and Yates' correction for 2x2 chi-square tests.

use noisy_float::prelude::*;
use serde::Serialize;
use statrs::{
    distribution::{ChiSquared, ContinuousCDF, Normal},
    statistics::Statistics,
};
use std::{f64::consts::PI, fmt, str::FromStr};

/// The percentiles reported for continuous outcomes.
pub const PERCENTILES: [f64; 10] = [10., 20., 30., 40., 50., 60., 70., 80., 90., 99.];

/// Finite values, sorted.
fn sorted(data: &[f64]) -> Vec<R64> {
    let mut out: Vec<R64> = data
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .map(r64)
        .collect();
    out.sort();
    out
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct Descriptives {
    pub n: usize,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub variance: f64,
}

impl fmt::Display for Descriptives {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "N={} MEAN={:.4} MEDIAN={:.4} STD.DEV={:.4} VARIANCE={:.4}",
            self.n, self.mean, self.median, self.std_dev, self.variance
        )
    }
}

/// `None` if there are no (finite) values.
pub fn describe(data: &[f64]) -> Option<Descriptives> {
    let sorted = sorted(data);
    if sorted.is_empty() {
        return None;
    }
    let values: Vec<f64> = sorted.iter().map(|v| v.raw()).collect();
    Some(Descriptives {
        n: values.len(),
        mean: values.iter().mean(),
        median: percentile_sorted(&sorted, 50.),
        std_dev: values.iter().population_std_dev(),
        variance: values.iter().population_variance(),
    })
}

/// Percentiles (0-100) using linear interpolation between closest ranks.
pub fn percentiles(data: &[f64], ps: &[f64]) -> Option<Vec<f64>> {
    let sorted = sorted(data);
    if sorted.is_empty() {
        return None;
    }
    Some(ps.iter().map(|p| percentile_sorted(&sorted, *p)).collect())
}

fn percentile_sorted(sorted: &[R64], p: f64) -> f64 {
    let last = sorted.len() - 1;
    let h = last as f64 * p.clamp(0., 100.) / 100.;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(last);
    let (lo_v, hi_v) = (sorted[lo].raw(), sorted[hi].raw());
    lo_v + (h - lo as f64) * (hi_v - lo_v)
}

/// One-sample Kolmogorov-Smirnov test.
#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct KsTest {
    pub statistic: f64,
    pub p_value: f64,
}

/// Test whether `data` could come from a normal distribution with the sample's own mean and
/// (population) standard deviation.
///
/// The p-value uses the asymptotic Kolmogorov distribution with Stephens' small sample
/// correction. `None` if there are no values or they are all equal.
pub fn ks_normal(data: &[f64]) -> Option<KsTest> {
    let desc = describe(data)?;
    let normal = Normal::new(desc.mean, desc.std_dev).ok()?;
    let sorted = sorted(data);
    let n = sorted.len() as f64;

    let mut statistic: f64 = 0.;
    for (idx, value) in sorted.iter().enumerate() {
        let cdf = normal.cdf(value.raw());
        let above = (idx + 1) as f64 / n - cdf;
        let below = cdf - idx as f64 / n;
        statistic = statistic.max(above).max(below);
    }

    let sqrt_n = n.sqrt();
    let p_value = kolmogorov_sf((sqrt_n + 0.12 + 0.11 / sqrt_n) * statistic);
    Some(KsTest { statistic, p_value })
}

/// P(K > lambda) for the Kolmogorov distribution.
fn kolmogorov_sf(lambda: f64) -> f64 {
    if lambda <= 0. {
        return 1.;
    }
    let p = if lambda < 1.18 {
        // the alternating series converges too slowly here, use the dual form of the cdf
        let y = (-PI * PI / (8. * lambda * lambda)).exp();
        1. - (2. * PI).sqrt() / lambda * (y + y.powi(9) + y.powi(25) + y.powi(49))
    } else {
        let x = (-2. * lambda * lambda).exp();
        2. * (x - x.powi(4) + x.powi(9) - x.powi(16))
    };
    p.clamp(0., 1.)
}

/// The alternative hypothesis of a two-sample test, stated for the first sample.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Alternative {
    TwoSided,
    Less,
    Greater,
}

impl FromStr for Alternative {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "two-sided" | "two_sided" => Ok(Alternative::TwoSided),
            "less" => Ok(Alternative::Less),
            "greater" => Ok(Alternative::Greater),
            other => Err(format!(
                "unknown alternative \"{}\" (expected two-sided, less or greater)",
                other
            )),
        }
    }
}

impl fmt::Display for Alternative {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Alternative::TwoSided => "two-sided",
            Alternative::Less => "less",
            Alternative::Greater => "greater",
        })
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct MannWhitney {
    /// U for the first sample.
    pub u: f64,
    pub p_value: f64,
    pub alternative: Alternative,
}

/// Mann-Whitney U test of `x` against `y`, using the normal approximation with tie and
/// continuity corrections.
///
/// `None` if either sample is empty, or every value is tied.
pub fn mann_whitney_u(x: &[f64], y: &[f64], alternative: Alternative) -> Option<MannWhitney> {
    let x = sorted(x);
    let y = sorted(y);
    if x.is_empty() || y.is_empty() {
        return None;
    }
    let (n1, n2) = (x.len() as f64, y.len() as f64);
    let n = n1 + n2;

    // (value, from x) in value order, ranked with ties sharing the average rank.
    let mut all: Vec<(R64, bool)> = x
        .iter()
        .map(|v| (*v, true))
        .chain(y.iter().map(|v| (*v, false)))
        .collect();
    all.sort_by_key(|(v, _)| *v);
    let mut rank_sum_x = 0.;
    let mut tie_term = 0.;
    let mut start = 0;
    while start < all.len() {
        let mut end = start;
        while end + 1 < all.len() && all[end + 1].0 == all[start].0 {
            end += 1;
        }
        let count = (end - start + 1) as f64;
        let rank = (start + end) as f64 / 2. + 1.;
        rank_sum_x += rank * all[start..=end].iter().filter(|(_, is_x)| *is_x).count() as f64;
        tie_term += count.powi(3) - count;
        start = end + 1;
    }

    let u1 = rank_sum_x - n1 * (n1 + 1.) / 2.;
    let u2 = n1 * n2 - u1;
    let mu = n1 * n2 / 2.;
    let sigma = (n1 * n2 / 12. * ((n + 1.) - tie_term / (n * (n - 1.)))).sqrt();
    if !(sigma > 0.) {
        return None;
    }
    let std_normal = Normal::new(0., 1.).ok()?;
    let sf = |u: f64| 1. - std_normal.cdf((u - mu - 0.5) / sigma);
    let p_value = match alternative {
        Alternative::Greater => sf(u1),
        Alternative::Less => sf(u2),
        Alternative::TwoSided => (2. * sf(u1.max(u2))).min(1.),
    };
    Some(MannWhitney {
        u: u1,
        p_value,
        alternative,
    })
}

/// Counts for a binary outcome in two groups.
///
/// Rows are (exposed, control), columns are (outcome, no outcome).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ContingencyTable {
    pub cells: [[u64; 2]; 2],
}

impl ContingencyTable {
    pub fn new(exposed_yes: u64, exposed_no: u64, control_yes: u64, control_no: u64) -> Self {
        ContingencyTable {
            cells: [[exposed_yes, exposed_no], [control_yes, control_no]],
        }
    }

    pub fn from_outcomes(
        exposed: impl IntoIterator<Item = bool>,
        control: impl IntoIterator<Item = bool>,
    ) -> Self {
        let col = |outcome: bool| if outcome { 0 } else { 1 };
        let mut table = Self::default();
        for outcome in exposed {
            table.cells[0][col(outcome)] += 1;
        }
        for outcome in control {
            table.cells[1][col(outcome)] += 1;
        }
        table
    }

    pub fn total(&self) -> u64 {
        self.cells.iter().flatten().sum()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct ChiSquare {
    pub statistic: f64,
    pub p_value: f64,
    pub dof: u32,
    pub expected: [[f64; 2]; 2],
}

/// Chi-square test of independence on a 2x2 table, optionally with Yates' continuity correction.
///
/// `None` if any expected frequency is zero (an empty row or column).
pub fn chi2_contingency(table: &ContingencyTable, yates: bool) -> Option<ChiSquare> {
    let total = table.total() as f64;
    let row = |r: usize| (table.cells[r][0] + table.cells[r][1]) as f64;
    let col = |c: usize| (table.cells[0][c] + table.cells[1][c]) as f64;

    let mut expected = [[0.; 2]; 2];
    let mut statistic = 0.;
    for r in 0..2 {
        for c in 0..2 {
            let e = row(r) * col(c) / total;
            if !(e > 0.) {
                return None;
            }
            expected[r][c] = e;
            let observed = table.cells[r][c] as f64;
            let mut diff = observed - e;
            if yates {
                diff = diff.signum() * (diff.abs() - 0.5).max(0.);
            }
            statistic += diff * diff / e;
        }
    }
    let dist = ChiSquared::new(1.).ok()?;
    Some(ChiSquare {
        statistic,
        p_value: 1. - dist.cdf(statistic),
        dof: 1,
        expected,
    })
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct OddsRatio {
    pub ratio: f64,
    pub lower: f64,
    pub upper: f64,
    pub z: f64,
}

/// The odds ratio of the outcome for exposed vs control, with a Wald confidence interval at
/// critical value `z` (1.96 for 95%).
///
/// `None` if any cell is zero.
pub fn odds_ratio(table: &ContingencyTable, z: f64) -> Option<OddsRatio> {
    let [[a, b], [c, d]] = table.cells;
    if a == 0 || b == 0 || c == 0 || d == 0 {
        return None;
    }
    let (a, b, c, d) = (a as f64, b as f64, c as f64, d as f64);
    let ratio = (a * d) / (b * c);
    let se = (1. / a + 1. / b + 1. / c + 1. / d).sqrt();
    Some(OddsRatio {
        ratio,
        lower: (ratio.ln() - z * se).exp(),
        upper: (ratio.ln() + z * se).exp(),
        z,
    })
}

/// Whether a p-value is significant at level `alpha`.
pub fn is_significant(p_value: f64, alpha: f64) -> bool {
    p_value <= alpha
}

/// A one-line reading of a p-value.
pub fn verdict(p_value: f64, alpha: f64) -> String {
    if is_significant(p_value, alpha) {
        format!(
            "p={:.4} not greater than alpha={:.3}. Different distribution (reject H0)",
            p_value, alpha
        )
    } else {
        format!(
            "p={:.4} greater than alpha={:.3}. Same distribution (fail to reject H0)",
            p_value, alpha
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-6, "{} != {}", a, b);
    }

    const DATA: [f64; 8] = [2., 4., 4., 4., 5., 5., 7., 9.];

    #[test]
    fn descriptives() {
        let desc = describe(&DATA).unwrap();
        assert_eq!(desc.n, 8);
        close(desc.mean, 5.);
        close(desc.median, 4.5);
        close(desc.std_dev, 2.);
        close(desc.variance, 4.);
        assert!(describe(&[]).is_none());
        // non-finite values are skipped
        assert_eq!(describe(&[1., f64::NAN, 3.]).unwrap().n, 2);
    }

    #[test]
    fn percentile_interpolation() {
        let got = percentiles(&DATA, &PERCENTILES).unwrap();
        let expected = [3.4, 4., 4., 4., 4.5, 5., 5., 6.2, 7.6, 8.86];
        for (g, e) in got.into_iter().zip(expected) {
            close(g, e);
        }
        assert_eq!(percentiles(&[7.], &[10., 99.]).unwrap(), vec![7., 7.]);
    }

    #[test]
    fn kolmogorov() {
        close(kolmogorov_sf(1.0), 0.2699996716773546);
        close(kolmogorov_sf(1.5), 0.022217962616525127);
        assert_eq!(kolmogorov_sf(0.), 1.);

        let ks = ks_normal(&[1., 2., 3., 4., 5.]).unwrap();
        close(ks.statistic, 0.16024993890652328);
        close(ks.p_value, 0.998390351338461);
        assert!(ks_normal(&[3., 3., 3.]).is_none());
    }

    #[test]
    fn mann_whitney() {
        let x = [3., 4., 5., 6.];
        let y = [1., 2., 3.];
        let greater = mann_whitney_u(&x, &y, Alternative::Greater).unwrap();
        close(greater.u, 11.5);
        close(greater.p_value, 0.03723091570870276);
        let less = mann_whitney_u(&x, &y, Alternative::Less).unwrap();
        close(less.p_value, 0.983843544378378);
        let both = mann_whitney_u(&x, &y, Alternative::TwoSided).unwrap();
        close(both.p_value, 0.07446183141740552);

        assert!(mann_whitney_u(&[], &y, Alternative::Greater).is_none());
        assert!(mann_whitney_u(&[1., 1.], &[1.], Alternative::Greater).is_none());
    }

    #[test]
    fn chi_square() {
        let table = ContingencyTable::new(10, 20, 30, 40);
        let chi = chi2_contingency(&table, true).unwrap();
        close(chi.statistic, 0.4464285714285714);
        close(chi.p_value, 0.5040358664525048);
        assert_eq!(chi.expected, [[12., 18.], [28., 42.]]);

        let plain = chi2_contingency(&table, false).unwrap();
        close(plain.statistic, 4. / 12. + 4. / 18. + 4. / 28. + 4. / 42.);

        assert!(chi2_contingency(&ContingencyTable::new(0, 0, 3, 4), true).is_none());
    }

    #[test]
    fn odds() {
        let table = ContingencyTable::new(10, 20, 30, 40);
        let or = odds_ratio(&table, 1.96).unwrap();
        close(or.ratio, 2. / 3.);
        close(or.lower, 0.2725103677809769);
        close(or.upper, 1.630926735241336);
        assert!(odds_ratio(&ContingencyTable::new(0, 5, 3, 4), 1.96).is_none());
    }

    #[test]
    fn contingency_from_outcomes() {
        let table =
            ContingencyTable::from_outcomes([true, false, true], [false, false, true, false]);
        assert_eq!(table.cells, [[2, 1], [1, 3]]);
        assert_eq!(table.total(), 7);
    }

    #[test]
    fn alternatives() {
        assert_eq!("Greater".parse::<Alternative>(), Ok(Alternative::Greater));
        assert_eq!("two-sided".parse::<Alternative>(), Ok(Alternative::TwoSided));
        assert!("bigger".parse::<Alternative>().is_err());
    }

    #[test]
    fn verdicts() {
        assert!(verdict(0.01, 0.05).contains("reject H0"));
        assert!(verdict(0.2, 0.05).contains("fail to reject"));
    }
}

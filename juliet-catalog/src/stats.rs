//! Summary statistics over measurements, rendered as a LaTeX table.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::measurement::{self, Measurement};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub avg: f64,
    pub med: f64,
    pub stdev: f64,
}

impl Stats {
    fn row<F: Fn(f64) -> String>(stats: Option<&Stats>, fmt: F) -> String {
        match stats {
            Some(s) => format!(" & {} & {} & {}", fmt(s.avg), fmt(s.med), fmt(s.stdev)),
            None => " & - & - & -".to_string(),
        }
    }
}

fn avg(dat: &[f64]) -> Option<f64> {
    if dat.is_empty() {
        return None;
    }
    let sum: f64 = dat.iter().sum();
    Some(sum / dat.len() as f64)
}

/// Mean, median and population standard deviation. `None` for no data.
pub fn stats(dat: &[f64]) -> Option<Stats> {
    let dat_avg = avg(dat)?;
    let sqs: Vec<f64> = dat.iter().map(|d| (d - dat_avg).powi(2)).collect();
    let dat_stdev = avg(&sqs)?.sqrt();
    let mut sorting = dat.to_vec();
    sorting.sort_by(|x, y| x.total_cmp(y));
    let dat_med = if dat.len() % 2 == 0 {
        let left = (dat.len() - 1) / 2;
        (sorting[left] + sorting[left + 1]) / 2.0
    } else {
        sorting[(dat.len() - 1) / 2]
    };
    Some(Stats {
        avg: dat_avg,
        med: dat_med,
        stdev: dat_stdev,
    })
}

pub fn fmt_time(mut t: f64) -> String {
    let mut out = String::new();
    let h = (t / 60.0 / 60.0).floor() as u64;
    t -= (h * 60 * 60) as f64;
    let m = (t / 60.0).floor() as u64;
    t -= (m * 60) as f64;
    if h > 0 {
        let _ = write!(out, "{h}h");
    }
    if m > 0 {
        let _ = write!(out, "{m}m");
    }
    let _ = write!(out, "{t:.1}s");
    out
}

const KILO: f64 = 1024.0;
const MEGA: f64 = KILO * 1024.0;
const GIGA: f64 = MEGA * 1024.0;

pub fn fmt_space(t: f64) -> String {
    if t > GIGA {
        format!("{:.1}G", t / GIGA)
    } else if t > MEGA {
        format!("{:.1}M", t / MEGA)
    } else {
        format!("{:.1}k", t / KILO)
    }
}

/// Whole numbers print bare, everything else with one decimal.
pub fn fmt_fp(t: f64) -> String {
    if (t.floor() * 10.0 - (t * 10.0).floor()).abs() < f64::EPSILON {
        format!("{}", t.floor() as u64)
    } else {
        format!("{t:.1}")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerStats {
    pub analyzer: String,
    pub samples: usize,
    pub time: Option<Stats>,
    pub space: Option<Stats>,
    pub false_positives: Option<Stats>,
}

/// Statistics per analyzer, in order of first appearance, over the primary
/// measurement of each case.
pub fn summarize(measurements: &[Measurement]) -> Vec<AnalyzerStats> {
    let mut order: Vec<&str> = Vec::new();
    for m in measurements {
        if !order.contains(&m.analyzer.as_str()) {
            order.push(&m.analyzer);
        }
    }

    let primary = measurement::primary(measurements);
    order
        .into_iter()
        .map(|analyzer| {
            let picked: Vec<&Measurement> = primary
                .iter()
                .filter(|((a, _), _)| *a == analyzer)
                .map(|(_, m)| *m)
                .collect();
            let fps: Vec<f64> = picked.iter().map(|m| m.false_positives as f64).collect();
            let spaces: Vec<f64> = picked.iter().map(|m| m.space as f64).collect();
            let times: Vec<f64> = picked.iter().map(|m| m.time.as_secs_f64()).collect();
            AnalyzerStats {
                analyzer: analyzer.to_string(),
                samples: picked.len(),
                time: stats(&times),
                space: stats(&spaces),
                false_positives: stats(&fps),
            }
        })
        .collect()
}

pub fn render_table(summary: &[AnalyzerStats]) -> String {
    let mut out = String::from("BEGIN_TABLE\n");
    for s in summary {
        out.push_str(&s.analyzer);
        out.push(' ');
        out.push_str(&Stats::row(s.time.as_ref(), fmt_time));
        out.push_str(&Stats::row(s.space.as_ref(), fmt_space));
        out.push_str(&Stats::row(s.false_positives.as_ref(), fmt_fp));
        out.push_str("\\\\ \\hline\n");
    }
    out.push_str("END_TABLE\n");
    out
}

/// Mean share of false positives `small` removes relative to `big`, over the
/// cases where `big` reported any false positive and both were measured.
pub fn compare(big: &str, small: &str, measurements: &[Measurement]) -> Option<f64> {
    let mut bigs = BTreeMap::new();
    let mut smalls = BTreeMap::new();
    for ((analyzer, case), m) in measurement::primary(measurements) {
        if analyzer == big {
            if m.false_positives != 0 {
                bigs.insert(case, m.false_positives);
            }
        } else if analyzer == small {
            smalls.insert(case, m.false_positives);
        }
    }

    let removed: Vec<f64> = bigs
        .iter()
        .filter_map(|(case, big_fp)| {
            let small_fp = *smalls.get(case)? as f64;
            let big_fp = *big_fp as f64;
            Some((big_fp - small_fp) / big_fp)
        })
        .collect();
    avg(&removed)
}

pub fn render_compare(big: &str, small: &str, measurements: &[Measurement]) -> String {
    match compare(big, small, measurements) {
        Some(power) => format!("{big} -> {small} power: {:.1}%", 100.0 * power),
        None => format!("{big} -> {small} power: n/a"),
    }
}

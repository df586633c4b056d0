//! Output files of an evaluation run: the running measurement logs, JSON
//! artifacts and the Markdown report.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::ConfigSnapshot;
use crate::evaluation::IncompleteRun;
use crate::measurement::Measurement;
use crate::scoring::{CaseVerdict, Scorecard, Tally};
use crate::stats::{self, AnalyzerStats};

pub const HUMAN_LOG: &str = "human.log";
pub const DEBUG_LOG: &str = "debug.log";
pub const MEASUREMENTS_JSON: &str = "measurements.json";
pub const SCORECARD_JSON: &str = "scorecard.json";
pub const REPORT_MD: &str = "juliet-report.md";

/// Appends one measurement to `debug.log` (framed Debug form, for recovery)
/// and `human.log` (Display form). Files are reopened per call so every
/// measurement is flushed as soon as it exists.
pub fn log_measure(out_dir: &Path, m: &Measurement) -> Result<()> {
    fs::create_dir_all(out_dir).context("create measurement log directory")?;
    let mut open = OpenOptions::new();
    open.create(true).append(true);

    let debug_path = out_dir.join(DEBUG_LOG);
    let mut debug_fd = open
        .open(&debug_path)
        .with_context(|| format!("open {}", debug_path.display()))?;
    writeln!(debug_fd, "MEASURE\n{:?}\nEND_MEASURE", m).context("append to debug log")?;

    let human_path = out_dir.join(HUMAN_LOG);
    let mut human_fd = open
        .open(&human_path)
        .with_context(|| format!("open {}", human_path.display()))?;
    writeln!(human_fd, "{}", m).context("append to human log")?;
    Ok(())
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create parent directories for {}", path.display()))?;
    }
    let mut file =
        File::create(path).with_context(|| format!("create {}", path.display()))?;
    serde_json::to_writer_pretty(&mut file, value)
        .with_context(|| format!("serialize {}", path.display()))?;
    file.write_all(b"\n").ok();
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("parse {}", path.display()))
}

pub fn write_measurements(path: &Path, measurements: &[Measurement]) -> Result<()> {
    write_json(path, measurements)
}

pub fn read_measurements(path: &Path) -> Result<Vec<Measurement>> {
    read_json(path)
}

pub fn write_scorecard(path: &Path, scorecard: &Scorecard) -> Result<()> {
    write_json(path, scorecard)
}

/// Explicit paths win. Otherwise `out_dir/base_name`, with a timestamp
/// suffix when that file already exists.
pub fn resolve_output_path(
    user_path: Option<PathBuf>,
    out_dir: &Path,
    base_name: &str,
    timestamp: &str,
) -> PathBuf {
    if let Some(p) = user_path.filter(|p| !p.as_os_str().is_empty()) {
        return p;
    }

    let default_path = out_dir.join(base_name);
    if !default_path.exists() {
        return default_path;
    }
    let base = Path::new(base_name);
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(base_name);
    match base.extension().and_then(|e| e.to_str()) {
        Some(ext) => out_dir.join(format!("{stem}_{timestamp}.{ext}")),
        None => out_dir.join(format!("{stem}_{timestamp}")),
    }
}

pub fn report_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d-%H%M%S").to_string()
}

/// Everything the Markdown report shows.
pub struct ReportContext<'a> {
    pub corpus: &'a Path,
    pub cases: usize,
    pub scorecard: &'a Scorecard,
    pub stats: &'a [AnalyzerStats],
    pub comparisons: &'a [String],
    pub incomplete: &'a [IncompleteRun],
    pub snapshot: Option<&'a ConfigSnapshot>,
}

fn percent(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.1}%", 100.0 * v),
        None => "n/a".to_string(),
    }
}

fn escape_markdown_pipes(text: &str) -> String {
    text.replace('|', "\\|")
}

fn tally_row(content: &mut String, label: &str, tally: &Tally) -> std::fmt::Result {
    writeln!(
        content,
        "| {} | {} | {} | {} | {} | {} | {} |",
        label,
        tally.cases,
        tally.true_positives,
        tally.false_positives,
        percent(tally.precision()),
        percent(tally.recall()),
        percent(tally.discrimination_rate()),
    )
}

const TALLY_HEADER: &str = "| TP | FP | Precision | Recall | Discrimination |\n";

pub fn render_markdown(ctx: &ReportContext<'_>) -> Result<String> {
    let mut content = String::new();

    writeln!(content, "# Juliet Evaluation Report")?;
    writeln!(content)?;
    writeln!(
        content,
        "Generated by juliet-eval v{} on {}",
        env!("CARGO_PKG_VERSION"),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    )?;
    writeln!(content)?;
    writeln!(content, "- Corpus: `{}`", ctx.corpus.display())?;
    writeln!(content, "- Cases evaluated: {}", ctx.cases)?;
    writeln!(content, "- Analyzers: {}", ctx.scorecard.analyzers.len())?;
    writeln!(content)?;

    writeln!(content, "## Summary")?;
    writeln!(content)?;
    writeln!(
        content,
        "| Analyzer | Cases | TP | FP | Precision | Recall | F1 | Discrimination | Missed | Incomplete |"
    )?;
    writeln!(
        content,
        "|----------|-------|----|----|-----------|--------|----|----------------|--------|------------|"
    )?;
    for score in &ctx.scorecard.analyzers {
        let t = &score.totals;
        writeln!(
            content,
            "| {} | {} | {} | {} | {} | {} | {} | {} | {} | {} |",
            escape_markdown_pipes(&score.analyzer),
            t.cases,
            t.true_positives,
            t.false_positives,
            percent(t.precision()),
            percent(t.recall()),
            percent(t.f1()),
            percent(t.discrimination_rate()),
            t.missed,
            score.incomplete,
        )?;
    }
    writeln!(content)?;

    writeln!(content, "### Verdicts")?;
    writeln!(content)?;
    let verdicts = [
        CaseVerdict::Discriminated,
        CaseVerdict::Noisy,
        CaseVerdict::FalseAlarm,
        CaseVerdict::Missed,
        CaseVerdict::Clean,
    ];
    write!(content, "| Analyzer |")?;
    for verdict in &verdicts {
        write!(content, " {} |", verdict)?;
    }
    writeln!(content)?;
    writeln!(content, "|----------|{}", "---|".repeat(verdicts.len()))?;
    for score in &ctx.scorecard.analyzers {
        write!(content, "| {} |", escape_markdown_pipes(&score.analyzer))?;
        for verdict in &verdicts {
            write!(content, " {} |", score.verdicts.get(verdict).copied().unwrap_or(0))?;
        }
        writeln!(content)?;
    }
    writeln!(content)?;

    if !ctx.stats.is_empty() {
        writeln!(content, "### Resource usage")?;
        writeln!(content)?;
        writeln!(content, "```")?;
        content.push_str(&stats::render_table(ctx.stats));
        writeln!(content, "```")?;
        writeln!(content)?;
    }

    if !ctx.comparisons.is_empty() {
        writeln!(content, "### False positive reduction")?;
        writeln!(content)?;
        for line in ctx.comparisons {
            writeln!(content, "- {}", line)?;
        }
        writeln!(content)?;
    }

    for score in &ctx.scorecard.analyzers {
        writeln!(content, "## {}", score.analyzer)?;
        writeln!(content)?;

        writeln!(content, "### By CWE")?;
        writeln!(content)?;
        write!(content, "| CWE | Cases {}", TALLY_HEADER)?;
        writeln!(content, "|-----|-------|----|----|-----------|--------|----------------|")?;
        for (cwe, tally) in &score.by_cwe {
            tally_row(&mut content, &cwe.to_string(), tally)?;
        }
        writeln!(content)?;

        writeln!(content, "### By flow variant")?;
        writeln!(content)?;
        write!(content, "| Flow | Cases {}", TALLY_HEADER)?;
        writeln!(content, "|------|-------|----|----|-----------|--------|----------------|")?;
        for (flow, tally) in &score.by_flow {
            let label = format!("{} ({})", flow, flow.description());
            tally_row(&mut content, &escape_markdown_pipes(&label), tally)?;
        }
        writeln!(content)?;

        writeln!(content, "### By opacity")?;
        writeln!(content)?;
        write!(content, "| Opacity | Cases {}", TALLY_HEADER)?;
        writeln!(content, "|---------|-------|----|----|-----------|--------|----------------|")?;
        for (opacity, tally) in &score.by_opacity {
            tally_row(&mut content, &format!("{:?}", opacity), tally)?;
        }
        writeln!(content)?;

        writeln!(content, "### Cross variants")?;
        writeln!(content)?;
        if score.false_positives_by_kind.is_empty() {
            writeln!(content, "No false positives on good paths.")?;
        } else {
            writeln!(content, "| Good path | False positives |")?;
            writeln!(content, "|-----------|-----------------|")?;
            for (kind, count) in &score.false_positives_by_kind {
                writeln!(content, "| {} | {} |", kind, count)?;
            }
        }
        writeln!(content)?;

        if !score.missed_cases.is_empty() {
            writeln!(content, "<details><summary>Missed cases ({})</summary>", score.missed_cases.len())?;
            writeln!(content)?;
            for case in &score.missed_cases {
                writeln!(content, "- `{}`", case)?;
            }
            writeln!(content)?;
            writeln!(content, "</details>")?;
            writeln!(content)?;
        }
    }

    if !ctx.incomplete.is_empty() {
        writeln!(content, "## Incomplete runs")?;
        writeln!(content)?;
        writeln!(content, "| Analyzer | Case | Variant | Outcome |")?;
        writeln!(content, "|----------|------|---------|---------|")?;
        for run in ctx.incomplete {
            writeln!(
                content,
                "| {} | {} | {} | {} |",
                escape_markdown_pipes(&run.analyzer),
                run.case,
                run.variant,
                escape_markdown_pipes(&run.outcome.to_string()),
            )?;
        }
        writeln!(content)?;
    }

    if let Some(snapshot) = ctx.snapshot {
        writeln!(content, "## Configuration")?;
        writeln!(content)?;
        writeln!(content, "| Setting | Value | Source |")?;
        writeln!(content, "|---------|-------|--------|")?;
        for entry in snapshot.entries() {
            writeln!(
                content,
                "| {} | {} | {} |",
                entry.name,
                escape_markdown_pipes(&entry.value),
                entry.source.label()
            )?;
        }
        writeln!(content)?;
    }

    Ok(content)
}

pub fn write_markdown(path: &Path, ctx: &ReportContext<'_>) -> Result<()> {
    let content = render_markdown(ctx)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("create report directory")?;
    }
    fs::write(path, content).with_context(|| format!("write report to {}", path.display()))
}

use anyhow::{anyhow, Context, Result};
use clap::{builder::BoolishValueParser, ArgAction, Parser, Subcommand};
use juliet_catalog::config::{default_out_dir, ComparePair};
use juliet_catalog::header::TemplateKind;
use juliet_catalog::matrix::run_job;
use juliet_catalog::report::{self, ReportContext};
use juliet_catalog::{
    discover, evaluate_case, logging, memory_profiler, stats, BuildOutcome, BuildPlan,
    ConfigSnapshot, Corpus, CweId, Evaluator, JulietConfig, Opacity, OracleVerdict,
    ResultCache, SettingSource, TestCase,
};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

/// juliet-eval: runs analyzers over Juliet test cases and scores what they report.
#[derive(Parser, Debug)]
#[command(name = "juliet-eval", version, about = "Juliet test suite analyzer evaluation")]
struct Cli {
    /// YAML configuration file (analyzers, build settings, selection, scoring)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Juliet `testcases` directory; overrides `corpus` from the config file
    #[arg(long, global = true, env = "JULIET_CORPUS")]
    corpus: Option<PathBuf>,

    /// Directory where logs, measurements and reports are written (defaults to out/juliet)
    #[arg(long, global = true)]
    out_dir: Option<PathBuf>,

    /// Enable the analyzer result cache (default true)
    #[arg(long, global = true, value_parser = BoolishValueParser::new())]
    cache: Option<bool>,

    /// Clear cached analyzer results before running
    #[arg(long = "clear-cache", global = true, action = ArgAction::SetTrue)]
    clear_cache: bool,

    /// Only consider cases of this CWE (repeat the flag for several)
    #[arg(long = "cwe", global = true, action = ArgAction::Append)]
    cwe: Vec<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Discover test cases and print what their names encode
    List {
        #[arg(long)]
        json: bool,
        /// Also print files whose names could not be parsed
        #[arg(long)]
        skipped: bool,
    },
    /// Print the compiler commands of the build matrix
    Plan,
    /// Compile every selected case in every configured build variant
    Build,
    /// Run the configured analyzers, score their findings and write reports
    Evaluate {
        /// Exit with code 1 when any flawed case went unreported
        #[arg(long = "fail-on-missed", action = ArgAction::SetTrue)]
        fail_on_missed: bool,
        /// Markdown report path (defaults to <out_dir>/juliet-report.md)
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Recompute resource and false positive statistics from a measurements file
    Stats {
        /// Defaults to <out_dir>/measurements.json
        #[arg(long)]
        measurements: Option<PathBuf>,
        /// Analyzer pair as `big,small` (repeatable); added to the config file's pairs
        #[arg(long = "compare", action = ArgAction::Append)]
        compare: Vec<String>,
    },
    /// Check that each case's bad and good paths behave as their labels say
    Oracle {
        #[arg(long)]
        json: bool,
    },
}

/// Configuration after command line overrides.
struct Session {
    config: JulietConfig,
    snapshot: ConfigSnapshot,
    out_dir: PathBuf,
}

impl Session {
    fn load(cli: &Cli) -> Result<Self> {
        let (mut config, mut snapshot) = match &cli.config {
            Some(path) => JulietConfig::load(path)?,
            None => {
                let config = JulietConfig::default();
                let snapshot = ConfigSnapshot::capture(&config, None)?;
                (config, snapshot)
            }
        };

        if let Some(corpus) = &cli.corpus {
            config.corpus = Some(corpus.clone());
            snapshot.set_user("corpus", corpus.display().to_string());
        }
        if let Some(enabled) = cli.cache {
            config.cache.enabled = enabled;
            snapshot.set_user("cache.enabled", enabled.to_string());
        }
        if cli.clear_cache {
            config.cache.clear = true;
            snapshot.set_user("cache.clear", "true");
        }
        if !cli.cwe.is_empty() {
            config.selection.cwes = cli.cwe.iter().copied().map(CweId).collect();
            snapshot.set_user(
                "selection.cwes",
                config
                    .selection
                    .cwes
                    .iter()
                    .map(|cwe| cwe.0.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }

        let out_dir = match &cli.out_dir {
            Some(dir) => {
                // Directories nested under the output directory follow it
                // unless the config file placed them explicitly.
                if is_default(&snapshot, "cache.directory") {
                    config.cache.directory = dir.join("cache");
                    snapshot.set_user("cache.directory", config.cache.directory.display().to_string());
                }
                if is_default(&snapshot, "build.output_dir") {
                    config.build.output_dir = dir.join("build");
                    snapshot.set_user("build.output_dir", config.build.output_dir.display().to_string());
                }
                dir.clone()
            }
            None => default_out_dir(),
        };

        Ok(Session {
            config,
            snapshot,
            out_dir,
        })
    }

    fn corpus(&self) -> Result<Corpus> {
        let root = self.config.corpus.as_deref().ok_or_else(|| {
            anyhow!("no corpus given; pass --corpus or set `corpus` in the config file")
        })?;
        discover(root).with_context(|| format!("discover test cases under {}", root.display()))
    }
}

fn is_default(snapshot: &ConfigSnapshot, name: &str) -> bool {
    snapshot
        .get(name)
        .map(|entry| entry.source == SettingSource::Default)
        .unwrap_or(true)
}

fn main() -> Result<()> {
    logging::init_tracing();
    // Enabled with JULIET_MEMORY_PROFILE=1
    memory_profiler::init();

    let cli = Cli::parse();
    let session = Session::load(&cli)?;

    let code = match &cli.command {
        Commands::List { json, skipped } => list(&session, *json, *skipped)?,
        Commands::Plan => plan(&session)?,
        Commands::Build => build(&session)?,
        Commands::Evaluate {
            fail_on_missed,
            report,
        } => evaluate(&session, *fail_on_missed, report.clone())?,
        Commands::Stats {
            measurements,
            compare,
        } => stats_command(&session, measurements.clone(), compare)?,
        Commands::Oracle { json } => oracle(&session, *json)?,
    };

    memory_profiler::final_report();
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

#[derive(Serialize)]
struct ListedCase<'a> {
    id: &'a str,
    cwe: CweId,
    description: &'a str,
    data_type: String,
    source: Option<&'a str>,
    sink: Option<String>,
    flow: u16,
    flow_description: &'static str,
    opacity: Opacity,
    template: TemplateKind,
    files: Vec<String>,
    missing_parts: Vec<char>,
}

impl<'a> ListedCase<'a> {
    fn of(case: &'a TestCase) -> Self {
        let name = case.name();
        ListedCase {
            id: case.id.as_str(),
            cwe: name.cwe,
            description: &name.description,
            data_type: name.data_type.to_string(),
            source: name.source.as_deref(),
            sink: name.sink.map(|sink| sink.to_string()),
            flow: name.flow.0,
            flow_description: name.flow.description(),
            opacity: name.flow.opacity(),
            template: case.template_kind(),
            files: case.files.iter().map(|f| f.file_name()).collect(),
            missing_parts: case.missing_parts(),
        }
    }
}

fn list(session: &Session, json: bool, show_skipped: bool) -> Result<i32> {
    let corpus = session.corpus()?;
    let cases = corpus.select(&session.config.selection)?;

    if json {
        let listed: Vec<ListedCase<'_>> = cases.iter().map(|case| ListedCase::of(case)).collect();
        println!("{}", serde_json::to_string_pretty(&listed)?);
        return Ok(0);
    }

    for case in &cases {
        let listed = ListedCase::of(case);
        let mut line = format!(
            "{}\t{}\t{}\t{}\t{}\tflow {:02} ({})\t{} file(s)",
            listed.id,
            listed.cwe,
            listed.data_type,
            listed.source.unwrap_or("-"),
            listed.sink.as_deref().unwrap_or("-"),
            listed.flow,
            listed.flow_description,
            listed.files.len(),
        );
        if !listed.missing_parts.is_empty() {
            let missing: Vec<String> = listed.missing_parts.iter().map(char::to_string).collect();
            line.push_str(&format!("\tincomplete (missing {})", missing.join(", ")));
        }
        println!("{line}");
    }
    println!(
        "{} case(s) from {} file(s); {} file(s) skipped",
        cases.len(),
        corpus.file_count(),
        corpus.skipped.len()
    );
    if show_skipped {
        for skipped in &corpus.skipped {
            println!("skipped {}: {}", skipped.path.display(), skipped.reason);
        }
    }
    Ok(0)
}

fn plan(session: &Session) -> Result<i32> {
    let corpus = session.corpus()?;
    let cases = corpus.select(&session.config.selection)?;
    let plan = BuildPlan::for_cases(&cases, &session.config.build);
    for job in &plan.jobs {
        println!("# {} ({})", job.case, job.variant);
        println!("{}", job.command_line());
    }
    println!("{} build job(s) for {} case(s)", plan.len(), cases.len());
    Ok(0)
}

fn build(session: &Session) -> Result<i32> {
    let corpus = session.corpus()?;
    let cases = corpus.select(&session.config.selection)?;
    let plan = BuildPlan::for_cases(&cases, &session.config.build);

    let mut failed = 0usize;
    for job in &plan.jobs {
        match run_job(job)? {
            BuildOutcome::Built(path) => {
                println!("built {} ({}) -> {}", job.case, job.variant, path.display());
            }
            BuildOutcome::Failed { status, stderr } => {
                failed += 1;
                let status = status.map_or_else(|| "signal".to_string(), |code| code.to_string());
                println!("FAILED {} ({}), status {}", job.case, job.variant, status);
                for line in stderr.lines().take(10) {
                    println!("    {line}");
                }
            }
        }
    }
    println!("{} of {} build job(s) succeeded", plan.len() - failed, plan.len());
    Ok(if failed > 0 { 1 } else { 0 })
}

fn evaluate(session: &Session, fail_on_missed: bool, report_path: Option<PathBuf>) -> Result<i32> {
    let config = &session.config;
    let out_dir = &session.out_dir;
    fs::create_dir_all(out_dir).context("create evaluation output directory")?;
    let timestamp = report::report_timestamp();

    if config.analyzers.is_empty() {
        return Err(anyhow!(
            "no analyzers configured; add an `analyzers` section to the config file"
        ));
    }

    println!("Effective configuration:");
    print!("{}", session.snapshot);

    let corpus = session.corpus()?;
    let cases = corpus.select(&config.selection)?;
    println!(
        "Evaluating {} analyzer(s) over {} case(s) from {}",
        config.analyzers.len(),
        cases.len(),
        corpus.root.display()
    );

    let cache = ResultCache::open(config.cache.clone())?;
    if !cache.is_enabled() {
        println!("Cache disabled; running every analyzer directly.");
    }
    let evaluator = Evaluator::new(cases.clone(), config, cache, out_dir)?;
    let evaluation = evaluator.run()?;

    let measurements_path = out_dir.join(report::MEASUREMENTS_JSON);
    report::write_measurements(&measurements_path, &evaluation.measurements)?;
    let scorecard_path = out_dir.join(report::SCORECARD_JSON);
    report::write_scorecard(&scorecard_path, &evaluation.scorecard)?;

    let summary = stats::summarize(&evaluation.measurements);
    let comparisons: Vec<String> = config
        .compare
        .iter()
        .map(|pair| stats::render_compare(&pair.big, &pair.small, &evaluation.measurements))
        .collect();

    let report_path = report::resolve_output_path(report_path, out_dir, report::REPORT_MD, &timestamp);
    report::write_markdown(
        &report_path,
        &ReportContext {
            corpus: &corpus.root,
            cases: cases.len(),
            scorecard: &evaluation.scorecard,
            stats: &summary,
            comparisons: &comparisons,
            incomplete: &evaluation.incomplete,
            snapshot: Some(&session.snapshot),
        },
    )?;

    for score in &evaluation.scorecard.analyzers {
        let totals = &score.totals;
        println!(
            "{}: {} case(s), {} TP, {} FP, recall {}, precision {}, {} missed, {} incomplete",
            score.analyzer,
            totals.cases,
            totals.true_positives,
            totals.false_positives,
            percent(totals.recall()),
            percent(totals.precision()),
            score.missed_cases.len(),
            score.incomplete
        );
    }
    print!("{}", stats::render_table(&summary));
    for line in &comparisons {
        println!("{line}");
    }
    if evaluation.cache_hits > 0 {
        println!("{} analyzer run(s) served from cache", evaluation.cache_hits);
    }
    for run in &evaluation.incomplete {
        println!(
            "incomplete: {} on {} ({}): {}",
            run.analyzer, run.case, run.variant, run.outcome
        );
    }

    println!("Measurements written to {}", measurements_path.display());
    println!("Scorecard written to {}", scorecard_path.display());
    println!("Report written to {}", report_path.display());

    if fail_on_missed && evaluation.scorecard.any_missed() {
        println!("Flawed cases went unreported; exiting with status 1.");
        return Ok(1);
    }
    Ok(0)
}

fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.1}%", 100.0 * v))
}

fn parse_compare(raw: &str) -> Result<ComparePair> {
    let (big, small) = raw
        .split_once(',')
        .ok_or_else(|| anyhow!("--compare expects `big,small`, got `{raw}`"))?;
    Ok(ComparePair {
        big: big.trim().to_string(),
        small: small.trim().to_string(),
    })
}

fn stats_command(session: &Session, measurements: Option<PathBuf>, compare: &[String]) -> Result<i32> {
    let path = measurements.unwrap_or_else(|| session.out_dir.join(report::MEASUREMENTS_JSON));
    let measurements = report::read_measurements(&path)?;

    let mut pairs = session.config.compare.clone();
    for raw in compare {
        pairs.push(parse_compare(raw)?);
    }

    print!("{}", stats::render_table(&stats::summarize(&measurements)));
    for pair in &pairs {
        println!("{}", stats::render_compare(&pair.big, &pair.small, &measurements));
    }
    Ok(0)
}

#[derive(Serialize)]
struct OracleResult<'a> {
    case: &'a str,
    template: TemplateKind,
    verdict: OracleVerdict,
}

fn oracle(session: &Session, json: bool) -> Result<i32> {
    let corpus = session.corpus()?;
    let cases = corpus.select(&session.config.selection)?;

    let mut results = Vec::new();
    for case in cases.iter().filter(|case| case.is_complete()) {
        let template = case.template_kind();
        let verdict = evaluate_case(case.name(), template)
            .with_context(|| format!("evaluate {}", case.id))?;
        results.push(OracleResult {
            case: case.id.as_str(),
            template,
            verdict,
        });
    }
    let incomplete = cases.len() - results.len();
    let violations: usize = results.iter().map(|r| r.verdict.violations().len()).sum();

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else {
        for result in &results {
            match &result.verdict {
                OracleVerdict::Unsupported(reason) => {
                    println!("{}: not checked ({reason})", result.case);
                }
                OracleVerdict::Checked(checks) => {
                    let broken = result.verdict.violations();
                    if broken.is_empty() {
                        println!("{}: ok ({} path(s))", result.case, checks.len());
                    } else {
                        println!("{}: LABEL VIOLATION", result.case);
                    }
                    for check in broken {
                        let expected = if check.path.expects_flaw() {
                            "reach the flaw"
                        } else {
                            "stay clear of the flaw"
                        };
                        println!(
                            "    {} should {expected} ({} input(s) tried)",
                            check.path, check.samples
                        );
                        for witness in &check.witnesses {
                            println!("      {witness}");
                        }
                    }
                }
            }
        }
        let checked = results.iter().filter(|r| r.verdict.is_supported()).count();
        println!(
            "{checked} case(s) checked, {} not modeled, {incomplete} incomplete, {violations} violation(s)",
            results.len() - checked
        );
    }

    Ok(if violations > 0 { 1 } else { 0 })
}

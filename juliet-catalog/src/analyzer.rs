//! Analyzers under evaluation. A [`CommandAnalyzer`] runs an external tool
//! per case under time and memory limits; a [`ReportAnalyzer`] replays SARIF
//! a tool produced earlier.

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::discovery::TestCase;
use crate::matrix::BuildVariant;
use crate::memory_profiler::ProcessSampler;
use crate::sarif;
use crate::ToolFinding;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerInput {
    Source,
    Binary,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerKind {
    #[default]
    Command,
    Report,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Sarif,
    Diagnostics,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputLocation {
    /// The tool writes to the path substituted for `{output}`.
    #[default]
    File,
    Stdout,
    Stderr,
}

fn default_input() -> AnalyzerInput {
    AnalyzerInput::Source
}

fn default_ok_exit_codes() -> Vec<i32> {
    vec![0, 1]
}

/// Configuration of one analyzer, as written in the `analyzers` section.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerSpec {
    pub name: String,
    #[serde(default)]
    pub kind: AnalyzerKind,
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_input")]
    pub input: AnalyzerInput,
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub output: OutputLocation,
    /// SARIF file or directory of per-case SARIF files for report analyzers.
    #[serde(default)]
    pub report: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Exit codes that still mean "analysis finished"; many tools exit 1
    /// when they report anything.
    #[serde(default = "default_ok_exit_codes")]
    pub ok_exit_codes: Vec<i32>,
}

impl AnalyzerSpec {
    pub fn command(name: &str, program: &str, args: &[&str]) -> Self {
        AnalyzerSpec {
            name: name.to_string(),
            kind: AnalyzerKind::Command,
            program: Some(program.to_string()),
            args: args.iter().map(|a| a.to_string()).collect(),
            input: AnalyzerInput::Source,
            format: OutputFormat::Sarif,
            output: OutputLocation::File,
            report: None,
            env: BTreeMap::new(),
            ok_exit_codes: default_ok_exit_codes(),
        }
    }

    pub fn report(name: &str, report: impl Into<PathBuf>) -> Self {
        AnalyzerSpec {
            kind: AnalyzerKind::Report,
            program: None,
            report: Some(report.into()),
            ..AnalyzerSpec::command(name, "", &[])
        }
    }

    fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(env!("CARGO_PKG_VERSION").as_bytes());
        if let Ok(encoded) = serde_json::to_vec(self) {
            hasher.update(&encoded);
        }
        hex::encode(hasher.finalize())
    }
}

fn default_time_limit_secs() -> u64 {
    60 * 60
}

fn default_memory_limit_bytes() -> u64 {
    1024 * 1024 * 1024 * 100
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    #[serde(default = "default_time_limit_secs")]
    pub time_secs: u64,
    #[serde(default = "default_memory_limit_bytes")]
    pub memory_bytes: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            time_secs: default_time_limit_secs(),
            memory_bytes: default_memory_limit_bytes(),
        }
    }
}

impl Limits {
    pub fn time_limit(&self) -> Duration {
        Duration::from_secs(self.time_secs)
    }
}

/// Everything an analyzer needs to look at one case in one build variant.
pub struct Invocation<'a> {
    pub case: &'a TestCase,
    pub variant: BuildVariant,
    pub binary: Option<&'a Path>,
    pub scratch_dir: PathBuf,
    pub include_dir: Option<&'a Path>,
    pub include_main: bool,
    pub limits: Limits,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Completed,
    TimedOut,
    OverMemory,
    Crashed { status: Option<i32>, stderr: String },
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunOutcome::Completed => f.write_str("completed"),
            RunOutcome::TimedOut => f.write_str("timed out"),
            RunOutcome::OverMemory => f.write_str("over memory limit"),
            RunOutcome::Crashed {
                status: Some(code), ..
            } => write!(f, "crashed (exit {code})"),
            RunOutcome::Crashed { status: None, .. } => f.write_str("crashed (signal)"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerRun {
    pub findings: Vec<ToolFinding>,
    pub elapsed: Duration,
    /// Peak resident memory of the analyzer process in bytes.
    pub peak_memory: u64,
    pub outcome: RunOutcome,
}

impl AnalyzerRun {
    fn incomplete(outcome: RunOutcome, elapsed: Duration, peak_memory: u64) -> Self {
        AnalyzerRun {
            findings: Vec::new(),
            elapsed,
            peak_memory,
            outcome,
        }
    }
}

pub trait Analyzer: Send + Sync {
    fn name(&self) -> &str;

    fn input(&self) -> AnalyzerInput;

    /// Identifies the analyzer configuration.
    fn fingerprint(&self) -> String;

    /// Cache key for one invocation. Analyzers that read inputs outside the
    /// case files fold those inputs in here.
    fn cache_key(&self, _invocation: &Invocation<'_>) -> Result<String> {
        Ok(self.fingerprint())
    }

    fn analyze(&self, invocation: &Invocation<'_>) -> Result<AnalyzerRun>;
}

pub fn build_analyzers(specs: &[AnalyzerSpec]) -> Result<Vec<Box<dyn Analyzer>>> {
    let mut seen = Vec::new();
    let mut analyzers: Vec<Box<dyn Analyzer>> = Vec::new();
    for spec in specs {
        if seen.contains(&spec.name.as_str()) {
            bail!("analyzer `{}` is configured twice", spec.name);
        }
        seen.push(spec.name.as_str());
        match spec.kind {
            AnalyzerKind::Command => {
                if spec.program.as_deref().map_or(true, str::is_empty) {
                    bail!("command analyzer `{}` has no program", spec.name);
                }
                analyzers.push(Box::new(CommandAnalyzer::new(spec.clone())));
            }
            AnalyzerKind::Report => {
                if spec.report.is_none() {
                    bail!("report analyzer `{}` has no report path", spec.name);
                }
                analyzers.push(Box::new(ReportAnalyzer::new(spec.clone())));
            }
        }
    }
    Ok(analyzers)
}

pub struct CommandAnalyzer {
    spec: AnalyzerSpec,
}

impl CommandAnalyzer {
    pub fn new(spec: AnalyzerSpec) -> Self {
        Self { spec }
    }

    fn output_path(&self, invocation: &Invocation<'_>) -> PathBuf {
        let ext = match self.spec.format {
            OutputFormat::Sarif => "sarif",
            OutputFormat::Diagnostics => "txt",
        };
        invocation.scratch_dir.join(format!(
            "{}.{}.{}.{}",
            self.spec.name,
            invocation.case.id,
            invocation.variant.label(),
            ext
        ))
    }

    fn command(&self, invocation: &Invocation<'_>, output: &Path) -> Result<Command> {
        let program = self
            .spec
            .program
            .as_deref()
            .ok_or_else(|| anyhow!("command analyzer `{}` has no program", self.spec.name))?;
        let args = expand_args(&self.spec.args, invocation, output)?;

        let mut cmd = Command::new(program);
        cmd.args(&args)
            .envs(&self.spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        Ok(cmd)
    }

    fn parse(&self, text: &str) -> Result<Vec<ToolFinding>> {
        match self.spec.format {
            OutputFormat::Diagnostics => Ok(sarif::parse_diagnostics(text)),
            OutputFormat::Sarif => {
                if text.trim().is_empty() {
                    return Ok(Vec::new());
                }
                let value: serde_json::Value =
                    serde_json::from_str(text).context("parse analyzer SARIF output")?;
                sarif::parse_sarif(&value)
            }
        }
    }
}

impl Analyzer for CommandAnalyzer {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn input(&self) -> AnalyzerInput {
        self.spec.input
    }

    fn fingerprint(&self) -> String {
        self.spec.fingerprint()
    }

    fn analyze(&self, invocation: &Invocation<'_>) -> Result<AnalyzerRun> {
        fs::create_dir_all(&invocation.scratch_dir).with_context(|| {
            format!(
                "create analyzer scratch directory {}",
                invocation.scratch_dir.display()
            )
        })?;
        let output_path = self.output_path(invocation);
        if output_path.exists() {
            fs::remove_file(&output_path)
                .with_context(|| format!("remove stale output {}", output_path.display()))?;
        }

        let mut cmd = self.command(invocation, &output_path)?;
        tracing::debug!(analyzer = %self.spec.name, case = %invocation.case.id, command = ?cmd, "running analyzer");
        let child = cmd
            .spawn()
            .with_context(|| format!("start analyzer `{}`", self.spec.name))?;

        let supervised = supervise(child, &invocation.limits)?;
        let Supervised {
            status,
            stdout,
            stderr,
            elapsed,
            peak_memory,
            outcome,
        } = supervised;

        if let Some(outcome) = outcome {
            tracing::warn!(analyzer = %self.spec.name, case = %invocation.case.id, ?outcome, "analyzer stopped");
            return Ok(AnalyzerRun::incomplete(outcome, elapsed, peak_memory));
        }

        let code = status.and_then(|s| s.code());
        let accepted = status.map_or(false, |s| s.success())
            || code.map_or(false, |c| self.spec.ok_exit_codes.contains(&c));
        if !accepted {
            return Ok(AnalyzerRun::incomplete(
                RunOutcome::Crashed {
                    status: code,
                    stderr: String::from_utf8_lossy(&stderr).into_owned(),
                },
                elapsed,
                peak_memory,
            ));
        }

        let text = match self.spec.output {
            OutputLocation::Stdout => String::from_utf8_lossy(&stdout).into_owned(),
            OutputLocation::Stderr => String::from_utf8_lossy(&stderr).into_owned(),
            OutputLocation::File => match fs::read(&output_path) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(_) => {
                    return Ok(AnalyzerRun::incomplete(
                        RunOutcome::Crashed {
                            status: code,
                            stderr: format!(
                                "analyzer produced no output at {}",
                                output_path.display()
                            ),
                        },
                        elapsed,
                        peak_memory,
                    ))
                }
            },
        };

        let findings = self
            .parse(&text)
            .with_context(|| format!("read output of `{}` for {}", self.spec.name, invocation.case.id))?;
        Ok(AnalyzerRun {
            findings,
            elapsed,
            peak_memory,
            outcome: RunOutcome::Completed,
        })
    }
}

struct Supervised {
    status: Option<ExitStatus>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    elapsed: Duration,
    peak_memory: u64,
    /// Set when the child was stopped for exceeding a limit.
    outcome: Option<RunOutcome>,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        buf
    })
}

/// Waits for `child`, sampling its memory and killing it when it exceeds
/// either limit. Descendants of the child are neither sampled nor killed;
/// one that keeps the output pipes open past the time limit times the run
/// out, and its drain threads are left behind.
fn supervise(mut child: Child, limits: &Limits) -> Result<Supervised> {
    let start = Instant::now();
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());
    let mut sampler = ProcessSampler::new(child.id());

    let (status, mut outcome) = loop {
        if let Some(status) = child.try_wait().context("poll analyzer process")? {
            break (Some(status), None);
        }
        let memory = sampler.sample().unwrap_or(0);
        if memory > limits.memory_bytes {
            let _ = child.kill();
            let _ = child.wait();
            break (None, Some(RunOutcome::OverMemory));
        }
        if start.elapsed() > limits.time_limit() {
            let _ = child.kill();
            let _ = child.wait();
            break (None, Some(RunOutcome::TimedOut));
        }
        thread::sleep(POLL_INTERVAL);
    };

    while outcome.is_none() && !(stdout.is_finished() && stderr.is_finished()) {
        if start.elapsed() > limits.time_limit() {
            outcome = Some(RunOutcome::TimedOut);
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    let elapsed = start.elapsed();
    let (stdout, stderr) = if outcome.is_none() {
        (stdout.join().unwrap_or_default(), stderr.join().unwrap_or_default())
    } else {
        (Vec::new(), Vec::new())
    };
    Ok(Supervised {
        status,
        stdout,
        stderr,
        elapsed,
        peak_memory: sampler.peak(),
        outcome,
    })
}

/// Substitutes placeholders in analyzer arguments. `{files}` and `{defines}`
/// standing alone expand to several arguments; the others are replaced
/// inline.
fn expand_args(args: &[String], invocation: &Invocation<'_>, output: &Path) -> Result<Vec<String>> {
    let files: Vec<String> = invocation
        .case
        .paths()
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    let defines = invocation.variant.defines(invocation.include_main);

    let mut expanded = Vec::new();
    for arg in args {
        match arg.as_str() {
            "{files}" => expanded.extend(files.iter().cloned()),
            "{defines}" => expanded.extend(defines.iter().cloned()),
            _ => {
                let mut value = arg
                    .replace("{case}", invocation.case.id.as_str())
                    .replace("{variant}", invocation.variant.label())
                    .replace("{output}", &output.display().to_string())
                    .replace("{files}", &files.join(" "))
                    .replace("{defines}", &defines.join(" "));
                if value.contains("{include}") {
                    let include = invocation
                        .include_dir
                        .ok_or_else(|| anyhow!("`{{include}}` used but no support directory is configured"))?;
                    value = value.replace("{include}", &include.display().to_string());
                }
                if value.contains("{binary}") {
                    let binary = invocation.binary.ok_or_else(|| {
                        anyhow!("`{{binary}}` used but {} has no built artifact", invocation.case.id)
                    })?;
                    value = value.replace("{binary}", &binary.display().to_string());
                }
                expanded.push(value);
            }
        }
    }
    Ok(expanded)
}

pub struct ReportAnalyzer {
    spec: AnalyzerSpec,
    shared: OnceCell<Vec<ToolFinding>>,
    shared_digest: OnceCell<String>,
}

impl ReportAnalyzer {
    pub fn new(spec: AnalyzerSpec) -> Self {
        Self {
            spec,
            shared: OnceCell::new(),
            shared_digest: OnceCell::new(),
        }
    }

    fn report_path(&self) -> Result<&Path> {
        self.spec
            .report
            .as_deref()
            .ok_or_else(|| anyhow!("report analyzer `{}` has no report path", self.spec.name))
    }

    fn parse_file(&self, path: &Path) -> Result<Vec<ToolFinding>> {
        match self.spec.format {
            OutputFormat::Sarif => sarif::parse_sarif_file(path),
            OutputFormat::Diagnostics => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("read diagnostics {}", path.display()))?;
                Ok(sarif::parse_diagnostics(&text))
            }
        }
    }

    /// The per-case file of a report directory, `<case>.<variant>.<ext>`
    /// before `<case>.<ext>`.
    fn case_report(&self, report: &Path, invocation: &Invocation<'_>) -> Option<PathBuf> {
        let ext = match self.spec.format {
            OutputFormat::Sarif => "sarif",
            OutputFormat::Diagnostics => "txt",
        };
        let id = invocation.case.id.as_str();
        [
            report.join(format!("{id}.{}.{ext}", invocation.variant.label())),
            report.join(format!("{id}.{ext}")),
        ]
        .into_iter()
        .find(|p| p.is_file())
    }

    fn findings_for(&self, invocation: &Invocation<'_>) -> Result<Vec<ToolFinding>> {
        let report = self.report_path()?;
        if report.is_dir() {
            return match self.case_report(report, invocation) {
                Some(path) => self.parse_file(&path),
                None => {
                    tracing::debug!(analyzer = %self.spec.name, case = %invocation.case.id, "no report for case");
                    Ok(Vec::new())
                }
            };
        }

        let all = self.shared.get_or_try_init(|| self.parse_file(report))?;
        Ok(all
            .iter()
            .filter(|finding| belongs_to(finding, invocation.case))
            .cloned()
            .collect())
    }
}

fn file_digest(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("read report {}", path.display()))?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

fn belongs_to(finding: &ToolFinding, case: &TestCase) -> bool {
    if let Some(name) = finding.file_name() {
        if case.file(name).is_some() {
            return true;
        }
    }
    finding
        .function
        .as_deref()
        .map_or(false, |f| f.starts_with(case.id.as_str()))
}

impl Analyzer for ReportAnalyzer {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn input(&self) -> AnalyzerInput {
        self.spec.input
    }

    fn fingerprint(&self) -> String {
        self.spec.fingerprint()
    }

    /// Configuration plus the contents of the report file the invocation
    /// reads from.
    fn cache_key(&self, invocation: &Invocation<'_>) -> Result<String> {
        let report = self.report_path()?;
        let mut hasher = Sha256::new();
        hasher.update(self.spec.fingerprint().as_bytes());
        if report.is_dir() {
            match self.case_report(report, invocation) {
                Some(path) => {
                    hasher.update(path.file_name().unwrap_or_default().to_string_lossy().as_bytes());
                    hasher.update(file_digest(&path)?.as_bytes());
                }
                None => hasher.update(b"absent"),
            }
        } else {
            let digest = self.shared_digest.get_or_try_init(|| file_digest(report))?;
            hasher.update(digest.as_bytes());
        }
        Ok(hex::encode(hasher.finalize()))
    }

    fn analyze(&self, invocation: &Invocation<'_>) -> Result<AnalyzerRun> {
        let findings = self.findings_for(invocation)?;
        Ok(AnalyzerRun {
            findings,
            elapsed: Duration::ZERO,
            peak_memory: 0,
            outcome: RunOutcome::Completed,
        })
    }
}

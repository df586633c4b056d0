//! Turning analyzer findings into true and false positives.
//!
//! A finding lands on a case function either through the logical location
//! the analyzer reported or through the file and line it pointed at. The
//! function's Juliet role then decides what the finding is worth.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use crate::analyzer::AnalyzerRun;
use crate::annotations::MarkerKind;
use crate::discovery::{CaseFile, TestCase};
use crate::flow::{FlowVariant, Opacity};
use crate::measurement::{self, Measurement, Scope};
use crate::naming::{classify_function, CweId, FunctionRole};
use crate::ToolFinding;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Attribution {
    /// Map each finding to the function enclosing its location.
    #[default]
    Location,
    /// Compare a bad-only build against a full build.
    Differential,
}

fn default_match_cwe() -> bool {
    true
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringOptions {
    /// Findings tagged only with other CWEs are incidental instead of
    /// counting for or against the analyzer.
    #[serde(default = "default_match_cwe")]
    pub match_cwe: bool,
    #[serde(default)]
    pub attribution: Attribution,
}

impl Default for ScoringOptions {
    fn default() -> Self {
        ScoringOptions {
            match_cwe: default_match_cwe(),
            attribution: Attribution::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FindingClass {
    Flaw { location: String },
    FalseAlarm { location: String, role: FunctionRole },
    Incidental,
    Neutral { location: String },
    Unattributed,
}

/// Function name without a trailing parameter list.
fn bare_function_name(name: &str) -> &str {
    name.split('(').next().unwrap_or(name).trim()
}

fn location_key(function: &str, line: Option<u32>) -> String {
    match line {
        Some(line) => format!("{function}:{line}"),
        None => function.to_string(),
    }
}

pub fn attribute(case: &TestCase, finding: &ToolFinding, options: &ScoringOptions) -> FindingClass {
    if options.match_cwe && !finding.cwes.is_empty() && !finding.cwes.contains(&case.cwe()) {
        return FindingClass::Incidental;
    }

    let file: Option<&CaseFile> = finding.file_name().and_then(|name| case.file(name));

    if let (Some(file), Some(line)) = (file, finding.line) {
        let incidental = file
            .source_map
            .markers
            .iter()
            .any(|m| m.kind == MarkerKind::Incidental && m.line == line);
        if incidental {
            return FindingClass::Incidental;
        }
    }

    let function = finding
        .function
        .as_deref()
        .map(bare_function_name)
        .filter(|name| {
            classify_function(&case.id, name).role != FunctionRole::Neutral
                || case.functions().any(|(_, span)| span.name == *name)
        })
        .map(str::to_string)
        .or_else(|| {
            let line = finding.line?;
            file?
                .source_map
                .function_at(line)
                .map(|span| span.name.clone())
        });

    let Some(function) = function else {
        return FindingClass::Unattributed;
    };
    let location = location_key(&function, finding.line);

    match classify_function(&case.id, &function).role {
        FunctionRole::Bad => FindingClass::Flaw { location },
        role @ FunctionRole::Good(_) => FindingClass::FalseAlarm { location, role },
        FunctionRole::Neutral => FindingClass::Neutral { location },
    }
}

/// Bad functions that carry a flaw marker, or every bad function when the
/// case has no markers.
fn flaw_functions(case: &TestCase) -> Vec<String> {
    let bad: Vec<(&CaseFile, &str)> = case
        .functions()
        .filter(|(_, span)| classify_function(&case.id, &span.name).role == FunctionRole::Bad)
        .map(|(file, span)| (file, span.name.as_str()))
        .collect();
    let marked: Vec<String> = bad
        .iter()
        .filter(|(file, name)| {
            file.source_map.markers_in(name).any(|m| {
                matches!(m.kind, MarkerKind::Flaw | MarkerKind::PotentialFlaw)
            })
        })
        .map(|(_, name)| name.to_string())
        .collect();
    if marked.is_empty() {
        bad.into_iter().map(|(_, name)| name.to_string()).collect()
    } else {
        marked
    }
}

#[derive(Default)]
struct Accumulator {
    flaws: BTreeSet<String>,
    false_alarms: BTreeMap<String, String>,
    found: BTreeSet<String>,
    incidental: usize,
    unattributed: usize,
}

impl Accumulator {
    fn add(&mut self, finding: &ToolFinding, class: FindingClass) {
        match class {
            FindingClass::Flaw { location } => {
                self.found.insert(location.clone());
                self.flaws.insert(location);
            }
            FindingClass::FalseAlarm { location, role } => {
                self.found.insert(location.clone());
                self.false_alarms.insert(location, role.to_string());
            }
            FindingClass::Neutral { location } => {
                self.found.insert(location);
            }
            FindingClass::Incidental => self.incidental += 1,
            FindingClass::Unattributed => {
                self.unattributed += 1;
                self.found.insert(finding_key(finding));
            }
        }
    }

    fn roles(&self) -> BTreeMap<String, usize> {
        let mut roles = BTreeMap::new();
        for role in self.false_alarms.values() {
            *roles.entry(role.clone()).or_insert(0) += 1;
        }
        roles
    }
}

fn finding_key(finding: &ToolFinding) -> String {
    format!(
        "{}@{}:{}:{}",
        finding.rule_id,
        finding.file_name().unwrap_or("?"),
        finding.line.map(|l| l.to_string()).unwrap_or_default(),
        finding.function.as_deref().unwrap_or_default()
    )
}

fn skeleton(analyzer: &str, case: &TestCase, scope: Scope) -> Measurement {
    Measurement {
        analyzer: analyzer.to_string(),
        case: case.id.clone(),
        artifact: case.files.iter().map(CaseFile::file_name).collect(),
        cwe: case.cwe(),
        flow: case.flow(),
        scope,
        true_positives: 0,
        false_positives: 0,
        false_positive_roles: BTreeMap::new(),
        missed: Vec::new(),
        found: Vec::new(),
        incidental: 0,
        unattributed: 0,
        expects_flaw: false,
        time: Duration::ZERO,
        space: 0,
    }
}

/// Scores one analyzer run on one build variant by location.
pub fn measure(
    analyzer: &str,
    case: &TestCase,
    scope: Scope,
    run: &AnalyzerRun,
    options: &ScoringOptions,
) -> Measurement {
    let mut acc = Accumulator::default();
    for finding in &run.findings {
        acc.add(finding, attribute(case, finding, options));
    }

    let flaws = flaw_functions(case);
    let expects_flaw = !flaws.is_empty()
        && match scope {
            Scope::Variant(variant) => variant.has_bad(),
            Scope::Differential => true,
        };

    let mut m = skeleton(analyzer, case, scope);
    m.true_positives = acc.flaws.len();
    m.false_positives = acc.false_alarms.len();
    m.false_positive_roles = acc.roles();
    m.found = acc.found.into_iter().collect();
    m.incidental = acc.incidental;
    m.unattributed = acc.unattributed;
    m.expects_flaw = expects_flaw;
    if expects_flaw && m.true_positives == 0 {
        m.missed = flaws;
    }
    m.time = run.elapsed;
    m.space = run.peak_memory;
    m
}

/// Scores a case from a bad-only run and a full run: everything reported on
/// the bad-only build is a true positive, anything the full build adds is a
/// false positive.
pub fn differential(
    analyzer: &str,
    case: &TestCase,
    bad_only: &AnalyzerRun,
    full: &AnalyzerRun,
    options: &ScoringOptions,
) -> Measurement {
    let relevant = |finding: &&ToolFinding| {
        !(options.match_cwe && !finding.cwes.is_empty() && !finding.cwes.contains(&case.cwe()))
    };

    let bad_keys: BTreeSet<String> = bad_only
        .findings
        .iter()
        .filter(relevant)
        .map(finding_key)
        .collect();

    let mut extra: BTreeMap<String, &ToolFinding> = BTreeMap::new();
    for finding in full.findings.iter().filter(relevant) {
        let key = finding_key(finding);
        if !bad_keys.contains(&key) {
            extra.entry(key).or_insert(finding);
        }
    }

    let mut roles: BTreeMap<String, usize> = BTreeMap::new();
    for finding in extra.values() {
        let role = match attribute(case, finding, options) {
            FindingClass::FalseAlarm { role, .. } => role.to_string(),
            FindingClass::Flaw { .. } => FunctionRole::Bad.to_string(),
            _ => "unattributed".to_string(),
        };
        *roles.entry(role).or_insert(0) += 1;
    }

    let incidental = bad_only
        .findings
        .iter()
        .chain(full.findings.iter())
        .filter(|f| !relevant(f))
        .count();

    let mut m = skeleton(analyzer, case, Scope::Differential);
    m.true_positives = bad_keys.len();
    m.false_positives = extra.len();
    m.false_positive_roles = roles;
    m.found = bad_keys.iter().cloned().chain(extra.keys().cloned()).collect();
    m.incidental = incidental;
    m.expects_flaw = true;
    if m.true_positives == 0 {
        m.missed = flaw_functions(case);
    }
    m.time = bad_only.elapsed + full.elapsed;
    m.space = bad_only.peak_memory.max(full.peak_memory);
    m
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseVerdict {
    /// Flaw reported, fixed paths left alone.
    Discriminated,
    /// Flaw reported along with false alarms on fixed paths.
    Noisy,
    /// Only false alarms.
    FalseAlarm,
    Missed,
    /// No flaw expected and nothing reported.
    Clean,
}

impl CaseVerdict {
    pub fn of(m: &Measurement) -> CaseVerdict {
        match (m.true_positives > 0, m.false_positives > 0) {
            (true, false) => CaseVerdict::Discriminated,
            (true, true) => CaseVerdict::Noisy,
            (false, true) => CaseVerdict::FalseAlarm,
            (false, false) if m.expects_flaw => CaseVerdict::Missed,
            (false, false) => CaseVerdict::Clean,
        }
    }
}

impl fmt::Display for CaseVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CaseVerdict::Discriminated => "discriminated",
            CaseVerdict::Noisy => "noisy",
            CaseVerdict::FalseAlarm => "false alarm",
            CaseVerdict::Missed => "missed",
            CaseVerdict::Clean => "clean",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub cases: usize,
    pub flawed_cases: usize,
    pub detected: usize,
    pub discriminated: usize,
    pub noisy: usize,
    pub false_alarm_cases: usize,
    pub missed: usize,
    pub true_positives: usize,
    pub false_positives: usize,
}

fn ratio(num: usize, den: usize) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

impl Tally {
    pub fn add(&mut self, m: &Measurement) {
        self.cases += 1;
        if m.expects_flaw {
            self.flawed_cases += 1;
        }
        if m.true_positives > 0 {
            self.detected += 1;
        }
        match CaseVerdict::of(m) {
            CaseVerdict::Discriminated => self.discriminated += 1,
            CaseVerdict::Noisy => self.noisy += 1,
            CaseVerdict::FalseAlarm => self.false_alarm_cases += 1,
            CaseVerdict::Missed => self.missed += 1,
            CaseVerdict::Clean => {}
        }
        self.true_positives += m.true_positives;
        self.false_positives += m.false_positives;
    }

    pub fn precision(&self) -> Option<f64> {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    /// Share of flawed cases in which the flaw was reported.
    pub fn recall(&self) -> Option<f64> {
        ratio(self.detected.min(self.flawed_cases), self.flawed_cases)
    }

    pub fn f1(&self) -> Option<f64> {
        let p = self.precision()?;
        let r = self.recall()?;
        if p + r == 0.0 {
            return Some(0.0);
        }
        Some(2.0 * p * r / (p + r))
    }

    /// Share of flawed cases reported without any false alarm on the fixed
    /// paths.
    pub fn discrimination_rate(&self) -> Option<f64> {
        ratio(self.discriminated, self.flawed_cases)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerScore {
    pub analyzer: String,
    pub totals: Tally,
    pub by_cwe: BTreeMap<CweId, Tally>,
    pub by_flow: BTreeMap<FlowVariant, Tally>,
    pub by_opacity: BTreeMap<Opacity, Tally>,
    /// False positives grouped by good-path family (`G2B`, `B2G`, `goodN`, ...).
    pub false_positives_by_kind: BTreeMap<String, usize>,
    pub verdicts: BTreeMap<CaseVerdict, usize>,
    pub missed_cases: Vec<String>,
    pub incomplete: usize,
    pub time: Duration,
    pub peak_space: u64,
}

/// `goodG2B2` belongs to `G2B`, `good1` to `goodN` and so on.
pub fn role_family(role: &str) -> &'static str {
    if role.starts_with("goodG2B") {
        "G2B"
    } else if role.starts_with("goodB2G") {
        "B2G"
    } else if role.starts_with("helperGood") {
        "helper"
    } else if role == "good" {
        "good"
    } else if role.starts_with("good") {
        "goodN"
    } else if role == "bad" {
        "bad"
    } else {
        "unattributed"
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Scorecard {
    pub analyzers: Vec<AnalyzerScore>,
}

impl Scorecard {
    /// Aggregates the primary measurement of every analyzer and case.
    pub fn from_measurements(measurements: &[Measurement]) -> Scorecard {
        let mut scores: BTreeMap<&str, AnalyzerScore> = BTreeMap::new();
        for ((analyzer, case), m) in measurement::primary(measurements) {
            let score = scores.entry(analyzer).or_insert_with(|| AnalyzerScore {
                analyzer: analyzer.to_string(),
                ..Default::default()
            });
            score.totals.add(m);
            score.by_cwe.entry(m.cwe).or_default().add(m);
            score.by_flow.entry(m.flow).or_default().add(m);
            score.by_opacity.entry(m.flow.opacity()).or_default().add(m);
            for (role, count) in &m.false_positive_roles {
                *score
                    .false_positives_by_kind
                    .entry(role_family(role).to_string())
                    .or_insert(0) += count;
            }
            *score.verdicts.entry(CaseVerdict::of(m)).or_insert(0) += 1;
            if m.is_missed() {
                score.missed_cases.push(case.to_string());
            }
        }

        // Differential measurements restate the time of their two variant runs.
        for m in measurements.iter().filter(|m| matches!(m.scope, Scope::Variant(_))) {
            if let Some(score) = scores.get_mut(m.analyzer.as_str()) {
                score.time += m.time;
                score.peak_space = score.peak_space.max(m.space);
            }
        }

        Scorecard {
            analyzers: scores.into_values().collect(),
        }
    }

    pub fn record_incomplete(&mut self, analyzer: &str) {
        match self.analyzers.iter_mut().find(|s| s.analyzer == analyzer) {
            Some(score) => score.incomplete += 1,
            None => self.analyzers.push(AnalyzerScore {
                analyzer: analyzer.to_string(),
                incomplete: 1,
                ..Default::default()
            }),
        }
    }

    pub fn analyzer(&self, name: &str) -> Option<&AnalyzerScore> {
        self.analyzers.iter().find(|s| s.analyzer == name)
    }

    pub fn any_missed(&self) -> bool {
        self.analyzers.iter().any(|s| s.totals.missed > 0)
    }
}

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use crate::flow::FlowVariant;
use crate::matrix::BuildVariant;
use crate::naming::{CaseId, CweId};

/// What a measurement was computed from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Findings of one build variant attributed by location.
    Variant(BuildVariant),
    /// Bad-only findings as true positives, the rest of the full build as
    /// false positives.
    Differential,
}

impl Scope {
    /// Preference when several measurements exist for the same case.
    fn rank(&self) -> u8 {
        match self {
            Scope::Differential => 0,
            Scope::Variant(BuildVariant::Full) => 1,
            Scope::Variant(BuildVariant::BadOnly) => 2,
            Scope::Variant(BuildVariant::GoodOnly) => 3,
        }
    }
}

impl Display for Scope {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Variant(variant) => write!(f, "{variant}"),
            Scope::Differential => f.write_str("differential"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    pub analyzer: String,
    pub case: CaseId,
    /// File names of the translation units analyzed.
    pub artifact: Vec<String>,
    pub cwe: CweId,
    pub flow: FlowVariant,
    pub scope: Scope,
    pub true_positives: usize,
    pub false_positives: usize,
    /// False positives keyed by the good role that was flagged (`goodG2B`,
    /// `goodB2G`, `good1`, ...).
    #[serde(default)]
    pub false_positive_roles: BTreeMap<String, usize>,
    /// Flaw functions left unreported when the case was missed entirely.
    #[serde(default)]
    pub missed: Vec<String>,
    /// Distinct locations reported at all, for triage.
    #[serde(default)]
    pub found: Vec<String>,
    #[serde(default)]
    pub incidental: usize,
    #[serde(default)]
    pub unattributed: usize,
    /// Whether the case had any flaw a correct analyzer should report in this
    /// scope.
    #[serde(default)]
    pub expects_flaw: bool,
    pub time: Duration,
    /// bytes
    pub space: u64,
}

impl Measurement {
    pub fn is_missed(&self) -> bool {
        self.expects_flaw && self.true_positives == 0
    }
}

/// One measurement per analyzer and case, preferring a differential
/// measurement, then the full build.
pub fn primary(measurements: &[Measurement]) -> BTreeMap<(&str, &str), &Measurement> {
    let mut primary: BTreeMap<(&str, &str), &Measurement> = BTreeMap::new();
    for m in measurements {
        let key = (m.analyzer.as_str(), m.case.as_str());
        let better = primary
            .get(&key)
            .map_or(true, |existing| m.scope.rank() < existing.scope.rank());
        if better {
            primary.insert(key, m);
        }
    }
    primary
}

const KILO: u64 = 1024;
const MEGA: u64 = 1024 * KILO;
const GIGA: u64 = 1024 * MEGA;

fn fmt_space(f: &mut Formatter<'_>, space: u64) -> fmt::Result {
    if space > GIGA {
        write!(f, "{}G", space / GIGA)
    } else if space > MEGA {
        write!(f, "{}M", space / MEGA)
    } else {
        write!(f, "{}k", space / KILO)
    }
}

impl Display for Measurement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{}]", self.artifact.join(", "))?;
        writeln!(
            f,
            "~{} ({})\n+{} -{}",
            self.analyzer, self.scope, self.true_positives, self.false_positives
        )?;

        let time_mins = self.time.as_secs() / 60;
        let time_secs = self.time.as_secs() % 60;
        if time_mins > 0 {
            write!(f, "{time_mins}m")?;
        }
        writeln!(f, "{time_secs}s")?;

        fmt_space(f, self.space)?;
        writeln!(f)?;

        for (role, count) in &self.false_positive_roles {
            writeln!(f, "False alarm in {role}: {count}")?;
        }
        for function in &self.missed {
            writeln!(f, "Missed bug! {function}")?;
        }

        Ok(())
    }
}

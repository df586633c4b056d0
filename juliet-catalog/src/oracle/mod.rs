//! Executable models of what a case's labels claim.
//!
//! Each supported CWE gets a small model of its source and sink. The bad
//! path must be able to reach the flaw, and every good path (G2B, B2G, or the
//! plain `goodN` functions of point-flaw templates) must not reach it over
//! the same inputs.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::header::TemplateKind;
use crate::naming::{CaseName, CweId};

pub mod cleanup;
pub mod integer;
pub mod search_path;

/// Which function family of a case a check exercised.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathKind {
    Bad,
    GoodG2B,
    GoodB2G,
    Good,
}

impl PathKind {
    /// Whether a correct fixture reaches its flaw on this path.
    pub fn expects_flaw(&self) -> bool {
        matches!(self, PathKind::Bad)
    }
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PathKind::Bad => "bad",
            PathKind::GoodG2B => "goodG2B",
            PathKind::GoodB2G => "goodB2G",
            PathKind::Good => "good",
        };
        f.write_str(label)
    }
}

/// The paths a template generates.
pub fn paths_for(template: TemplateKind, cwe: CweId) -> &'static [PathKind] {
    const SOURCES_SINKS: &[PathKind] = &[PathKind::Bad, PathKind::GoodG2B, PathKind::GoodB2G];
    const SOURCES_SINK: &[PathKind] = &[PathKind::Bad, PathKind::GoodG2B];
    const POINT_FLAW: &[PathKind] = &[PathKind::Bad, PathKind::Good];

    match template {
        TemplateKind::SourcesSinks => SOURCES_SINKS,
        TemplateKind::SourcesSink => SOURCES_SINK,
        TemplateKind::PointFlaw => POINT_FLAW,
        TemplateKind::Unknown => match cwe.0 {
            190 | 191 => SOURCES_SINKS,
            427 => SOURCES_SINK,
            _ => POINT_FLAW,
        },
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathCheck {
    pub path: PathKind,
    /// Inputs tried.
    pub samples: usize,
    /// Inputs that reached the flaw, rendered for humans. Capped.
    pub witnesses: Vec<String>,
    pub flaw_reached: bool,
}

const MAX_WITNESSES: usize = 4;

impl PathCheck {
    pub fn new(path: PathKind) -> Self {
        PathCheck {
            path,
            samples: 0,
            witnesses: Vec::new(),
            flaw_reached: false,
        }
    }

    pub fn record(&mut self, flawed: bool, witness: impl FnOnce() -> String) {
        self.samples += 1;
        if flawed {
            self.flaw_reached = true;
            if self.witnesses.len() < MAX_WITNESSES {
                self.witnesses.push(witness());
            }
        }
    }

    /// True when the path behaves as its label says.
    pub fn holds(&self) -> bool {
        self.flaw_reached == self.path.expects_flaw()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleVerdict {
    Checked(Vec<PathCheck>),
    Unsupported(String),
}

impl OracleVerdict {
    pub fn violations(&self) -> Vec<&PathCheck> {
        match self {
            OracleVerdict::Checked(checks) => checks.iter().filter(|c| !c.holds()).collect(),
            OracleVerdict::Unsupported(_) => Vec::new(),
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, OracleVerdict::Checked(_))
    }
}

/// Runs the model for a case. Temporary files created by the cleanup model
/// live in a private directory that is removed before returning.
pub fn evaluate_case(name: &CaseName, template: TemplateKind) -> Result<OracleVerdict> {
    let paths = paths_for(template, name.cwe);
    match name.cwe.0 {
        190 | 191 => Ok(integer::evaluate(name, paths)),
        459 => cleanup::evaluate(paths),
        427 => Ok(search_path::evaluate(name, paths)),
        other => Ok(OracleVerdict::Unsupported(format!("CWE-{other} is not modeled"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(file: &str) -> CaseName {
        CaseName::parse(file).unwrap()
    }

    #[test]
    fn point_flaw_templates_check_good_functions() {
        assert_eq!(
            paths_for(TemplateKind::PointFlaw, CweId(459)),
            &[PathKind::Bad, PathKind::Good]
        );
        assert_eq!(
            paths_for(TemplateKind::Unknown, CweId(191)).len(),
            3
        );
    }

    #[test]
    fn fixtures_behave_as_labeled() -> Result<()> {
        for (file, template) in [
            ("CWE190_Integer_Overflow__int_max_preinc_01.c", TemplateKind::SourcesSinks),
            ("CWE191_Integer_Underflow__char_rand_postdec_09.c", TemplateKind::SourcesSinks),
            ("CWE459_Incomplete_Cleanup__char_18.c", TemplateKind::PointFlaw),
            (
                "CWE427_Uncontrolled_Search_Path_Element__wchar_t_connect_socket_22a.c",
                TemplateKind::SourcesSink,
            ),
        ] {
            let verdict = evaluate_case(&case(file), template)?;
            assert!(verdict.is_supported(), "{file}");
            assert!(verdict.violations().is_empty(), "{file}: {verdict:?}");
        }
        Ok(())
    }

    #[test]
    fn unmodeled_cwe_is_unsupported() -> Result<()> {
        let verdict = evaluate_case(
            &case("CWE401_Memory_Leak__char_malloc_01.c"),
            TemplateKind::PointFlaw,
        )?;
        assert!(matches!(verdict, OracleVerdict::Unsupported(_)));
        assert!(verdict.violations().is_empty());
        Ok(())
    }

    #[test]
    fn check_holds_only_when_flaw_matches_label() {
        let mut bad = PathCheck::new(PathKind::Bad);
        bad.record(false, String::new);
        assert!(!bad.holds());
        bad.record(true, || "x".into());
        assert!(bad.holds());

        let mut good = PathCheck::new(PathKind::GoodG2B);
        good.record(false, String::new);
        assert!(good.holds());
        assert_eq!(good.samples, 1);
    }
}

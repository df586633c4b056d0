use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

pub mod analyzer;
pub mod annotations;
pub mod cache;
pub mod config;
pub mod discovery;
pub mod evaluation;
pub mod flow;
pub mod header;
pub mod logging;
pub mod matrix;
pub mod measurement;
pub mod memory_profiler;
pub mod naming;
pub mod oracle;
pub mod report;
pub mod sarif;
pub mod scoring;
pub mod stats;

pub use analyzer::{
    build_analyzers, Analyzer, AnalyzerInput, AnalyzerRun, AnalyzerSpec, Invocation, Limits,
    RunOutcome,
};
pub use cache::{CacheConfig, CacheMissReason, CacheStatus, ResultCache};
pub use config::{ConfigSnapshot, JulietConfig, SettingSource};
pub use discovery::{discover, CaseFile, Corpus, Selection, SkippedFile, TestCase};
pub use evaluation::{Evaluation, Evaluator, IncompleteRun};
pub use flow::{FlowCategory, FlowVariant, Opacity};
pub use matrix::{BuildJob, BuildOutcome, BuildPlan, BuildSettings, BuildVariant};
pub use measurement::{Measurement, Scope};
pub use naming::{
    classify_function, CaseId, CaseName, CweId, DataType, Expectation, FunctionLabel,
    FunctionPart, FunctionRole, GoodKind, NameError, SinkOp, SourceClass,
};
pub use oracle::{evaluate_case, OracleVerdict, PathCheck, PathKind};
pub use scoring::{Attribution, CaseVerdict, Scorecard, ScoringOptions};

/// A single result reported by an analyzer under evaluation, normalized from
/// SARIF or compiler-style diagnostics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolFinding {
    pub rule_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Logical location (function name) when the tool reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cwes: Vec<CweId>,
}

impl ToolFinding {
    /// File name component of the reported path, with any `file://` prefix and
    /// directory removed.
    pub fn file_name(&self) -> Option<&str> {
        let file = self.file.as_deref()?;
        let file = file.strip_prefix("file://").unwrap_or(file);
        file.rsplit(|c: char| c == '/' || c == '\\').next().filter(|name| !name.is_empty())
    }
}

pub fn write_findings_json(path: impl AsRef<Path>, findings: &[ToolFinding]) -> Result<()> {
    if let Some(parent) = path.as_ref().parent() {
        fs::create_dir_all(parent).context("create parent directories for findings JSON")?;
    }
    let mut file = File::create(path.as_ref()).context("create findings JSON file")?;
    serde_json::to_writer_pretty(&mut file, findings).context("serialize findings to JSON")?;
    file.write_all(b"\n").ok();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_strips_uri_and_directories() {
        let finding = ToolFinding {
            file: Some("file:///work/testcases/CWE190_Integer_Overflow__int_max_preinc_01.c".into()),
            ..Default::default()
        };
        assert_eq!(
            finding.file_name(),
            Some("CWE190_Integer_Overflow__int_max_preinc_01.c")
        );

        let windows = ToolFinding {
            file: Some(r"C:\juliet\s01\CWE459_Incomplete_Cleanup__char_18.c".into()),
            ..Default::default()
        };
        assert_eq!(windows.file_name(), Some("CWE459_Incomplete_Cleanup__char_18.c"));
    }

    #[test]
    fn file_name_is_none_without_path() {
        assert_eq!(ToolFinding::default().file_name(), None);
    }
}

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use crate::annotations::{self, FunctionSpan, SourceMap};
use crate::flow::FlowVariant;
use crate::header::{self, TemplateHeader, TemplateKind};
use crate::naming::{CaseId, CaseName, CweId, DataType, FilePart, SinkOp};

/// One translation unit of a test case.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseFile {
    pub path: PathBuf,
    pub name: CaseName,
    pub header: TemplateHeader,
    pub source_map: SourceMap,
}

impl CaseFile {
    pub fn load(path: &Path, name: CaseName) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read test case {}", path.display()))?;
        let source = String::from_utf8_lossy(&bytes);
        Ok(CaseFile {
            path: path.to_path_buf(),
            name,
            header: header::parse_header(&source),
            source_map: annotations::scan(&source),
        })
    }

    pub fn file_name(&self) -> String {
        self.name.to_string()
    }
}

/// All sibling translation units sharing a [`CaseId`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TestCase {
    pub id: CaseId,
    pub files: Vec<CaseFile>,
}

impl TestCase {
    /// Name of the first file; identical to every sibling apart from the part
    /// and extension.
    pub fn name(&self) -> &CaseName {
        &self.files[0].name
    }

    pub fn cwe(&self) -> CweId {
        self.name().cwe
    }

    pub fn flow(&self) -> FlowVariant {
        self.name().flow
    }

    pub fn is_cpp(&self) -> bool {
        self.files.iter().any(|f| f.name.is_cpp())
    }

    /// Template named by the first sibling whose header says so.
    pub fn template_kind(&self) -> TemplateKind {
        self.files
            .iter()
            .map(|f| f.header.template_kind())
            .find(|kind| *kind != TemplateKind::Unknown)
            .unwrap_or(TemplateKind::Unknown)
    }

    pub fn missing_parts(&self) -> Vec<char> {
        let present: Vec<char> = self
            .files
            .iter()
            .filter_map(|f| match f.name.part {
                Some(FilePart::Letter(letter)) => Some(letter),
                _ => None,
            })
            .collect();
        self.flow()
            .parts()
            .into_iter()
            .filter(|letter| !present.contains(letter))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_parts().is_empty()
    }

    pub fn functions(&self) -> impl Iterator<Item = (&CaseFile, &FunctionSpan)> {
        self.files
            .iter()
            .flat_map(|file| file.source_map.functions.iter().map(move |span| (file, span)))
    }

    pub fn file(&self, file_name: &str) -> Option<&CaseFile> {
        self.files.iter().find(|f| {
            f.path.file_name().and_then(OsStr::to_str) == Some(file_name)
        })
    }

    pub fn paths(&self) -> Vec<&Path> {
        self.files.iter().map(|f| f.path.as_path()).collect()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Corpus {
    pub root: PathBuf,
    pub cases: Vec<TestCase>,
    pub skipped: Vec<SkippedFile>,
}

impl Corpus {
    pub fn case(&self, id: &str) -> Option<&TestCase> {
        self.cases.iter().find(|c| c.id.as_str() == id)
    }

    pub fn select(&self, selection: &Selection) -> Result<Vec<&TestCase>> {
        let matcher = selection.matcher()?;
        Ok(self.cases.iter().filter(|case| matcher.matches(case)).collect())
    }

    pub fn file_count(&self) -> usize {
        self.cases.iter().map(|c| c.files.len()).sum()
    }
}

/// Walks `root` for `.c`/`.cpp` test case files and groups siblings by case.
pub fn discover(root: &Path) -> Result<Corpus> {
    if !root.is_dir() {
        bail!("corpus root {} is not a directory", root.display());
    }

    let mut grouped: BTreeMap<CaseId, Vec<CaseFile>> = BTreeMap::new();
    let mut skipped = Vec::new();

    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(filter_entry)
    {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                tracing::warn!(error = %err, "skipping unreadable corpus entry");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        if !matches!(
            entry.path().extension().and_then(OsStr::to_str),
            Some("c") | Some("cpp")
        ) {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy();
        match CaseName::parse(&file_name) {
            Ok(name) => {
                let file = CaseFile::load(entry.path(), name)?;
                grouped.entry(file.name.case_id()).or_default().push(file);
            }
            Err(err) => {
                tracing::debug!(path = %entry.path().display(), error = %err, "not a test case file");
                skipped.push(SkippedFile {
                    path: entry.path().to_path_buf(),
                    reason: err.to_string(),
                });
            }
        }
    }

    let cases: Vec<TestCase> = grouped
        .into_iter()
        .map(|(id, mut files)| {
            files.sort_by(|a, b| a.name.part.cmp(&b.name.part));
            TestCase { id, files }
        })
        .collect();

    for case in cases.iter().filter(|c| !c.is_complete()) {
        tracing::warn!(case = %case.id, missing = ?case.missing_parts(), "incomplete multi-file case");
    }
    tracing::info!(
        root = %root.display(),
        cases = cases.len(),
        skipped = skipped.len(),
        "discovered corpus"
    );

    Ok(Corpus {
        root: root.to_path_buf(),
        cases,
        skipped,
    })
}

fn filter_entry(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return true;
    }

    let name = entry.file_name().to_string_lossy();
    if entry.file_type().is_dir()
        && matches!(
            name.as_ref(),
            "testcasesupport" | "target" | ".git" | ".juliet-cache" | "out" | "build"
        )
    {
        return false;
    }
    true
}

/// Which cases of a corpus take part in a run. Empty lists select everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selection {
    pub cwes: Vec<CweId>,
    pub exclude_cwes: Vec<CweId>,
    pub flow_variants: Vec<FlowVariant>,
    pub data_types: Vec<DataType>,
    pub sources: Vec<String>,
    pub sinks: Vec<SinkOp>,
    /// Regular expression matched against the case id.
    pub pattern: Option<String>,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        *self == Selection::default()
    }

    fn matcher(&self) -> Result<Matcher<'_>> {
        let pattern = self
            .pattern
            .as_deref()
            .map(Regex::new)
            .transpose()
            .context("invalid case selection pattern")?;
        Ok(Matcher {
            selection: self,
            pattern,
        })
    }
}

struct Matcher<'a> {
    selection: &'a Selection,
    pattern: Option<Regex>,
}

impl Matcher<'_> {
    fn matches(&self, case: &TestCase) -> bool {
        let s = self.selection;
        let name = case.name();

        if !s.cwes.is_empty() && !s.cwes.contains(&name.cwe) {
            return false;
        }
        if s.exclude_cwes.contains(&name.cwe) {
            return false;
        }
        if !s.flow_variants.is_empty() && !s.flow_variants.contains(&name.flow) {
            return false;
        }
        if !s.data_types.is_empty() && !s.data_types.contains(&name.data_type) {
            return false;
        }
        if !s.sources.is_empty()
            && !name
                .source
                .as_ref()
                .map_or(false, |source| s.sources.contains(source))
        {
            return false;
        }
        if !s.sinks.is_empty() && !name.sink.map_or(false, |sink| s.sinks.contains(&sink)) {
            return false;
        }
        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(case.id.as_str()) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const BODY: &str = "#include \"std_testcase.h\"\n\n#ifndef OMITBAD\nvoid f_bad()\n{\n}\n#endif\n";

    fn write(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, BODY).unwrap();
    }

    #[test]
    fn groups_multi_file_cases_and_skips_support() -> Result<()> {
        let dir = tempdir()?;
        let root = dir.path();
        write(root, "CWE191/s01/CWE191_Integer_Underflow__int_fgets_postdec_63a.c");
        write(root, "CWE191/s01/CWE191_Integer_Underflow__int_fgets_postdec_63b.c");
        write(root, "CWE191/s01/CWE191_Integer_Underflow__int_min_predec_52b.c");
        write(root, "CWE191/s01/main_linux.cpp");
        write(root, "testcasesupport/io.c");

        let corpus = discover(root)?;
        assert_eq!(corpus.cases.len(), 2);
        assert_eq!(corpus.skipped.len(), 1);

        let two_part = corpus
            .case("CWE191_Integer_Underflow__int_fgets_postdec_63")
            .unwrap();
        assert_eq!(two_part.files.len(), 2);
        assert!(two_part.is_complete());

        let partial = corpus
            .case("CWE191_Integer_Underflow__int_min_predec_52")
            .unwrap();
        assert_eq!(partial.missing_parts(), vec!['a', 'c']);
        Ok(())
    }

    #[test]
    fn selection_filters() -> Result<()> {
        let dir = tempdir()?;
        let root = dir.path();
        write(root, "CWE190_Integer_Overflow__int_max_preinc_01.c");
        write(root, "CWE190_Integer_Overflow__short_rand_square_09.c");
        write(root, "CWE191_Integer_Underflow__char_rand_postdec_09.c");
        write(root, "CWE459_Incomplete_Cleanup__char_18.c");
        let corpus = discover(root)?;

        let everything = corpus.select(&Selection::default())?;
        assert_eq!(everything.len(), 4);

        let overflow = Selection {
            cwes: vec![CweId(190)],
            ..Default::default()
        };
        assert_eq!(corpus.select(&overflow)?.len(), 2);

        let rand_flow_09 = Selection {
            flow_variants: vec![FlowVariant(9)],
            sources: vec!["rand".into()],
            exclude_cwes: vec![CweId(191)],
            ..Default::default()
        };
        let ids: Vec<&str> = corpus
            .select(&rand_flow_09)?
            .iter()
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids, vec!["CWE190_Integer_Overflow__short_rand_square_09"]);

        let sinkless = Selection {
            sinks: vec![SinkOp::Postdec],
            data_types: vec![DataType::Char],
            ..Default::default()
        };
        assert_eq!(corpus.select(&sinkless)?.len(), 1);

        let bad_pattern = Selection {
            pattern: Some("(".into()),
            ..Default::default()
        };
        assert!(corpus.select(&bad_pattern).is_err());
        Ok(())
    }

    #[test]
    fn missing_root_is_an_error() {
        assert!(discover(Path::new("/nonexistent/juliet/corpus")).is_err());
    }
}

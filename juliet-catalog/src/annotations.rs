//! Line-level scan of a test case translation unit: function spans, flaw/fix
//! comment markers and the preprocessor gates that split bad from good code.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::naming::CweId;

static FUNCTION_SIGNATURE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[A-Za-z_][^;=(]*?[\s*&])?(~?[A-Za-z_][\w:~]*)\s*\(")
        .expect("function signature regex")
});

static MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(POTENTIAL FLAW|EXPECTED INCIDENTAL|INCIDENTAL|FLAW|FIX)\s*:\s*(.*)")
        .expect("marker regex")
});

static GATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*#\s*if(?:n?def)?\b.*\b(OMITBAD|OMITGOOD|INCLUDEMAIN)\b")
        .expect("gate regex")
});

const NOT_FUNCTIONS: &[&str] = &["if", "for", "while", "switch", "return", "sizeof", "else"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerKind {
    PotentialFlaw,
    Flaw,
    Fix,
    Incidental,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gate {
    OmitBad,
    OmitGood,
    IncludeMain,
}

impl Gate {
    fn from_macro(name: &str) -> Option<Gate> {
        match name {
            "OMITBAD" => Some(Gate::OmitBad),
            "OMITGOOD" => Some(Gate::OmitGood),
            "INCLUDEMAIN" => Some(Gate::IncludeMain),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSpan {
    pub name: String,
    pub start_line: u32,
    pub end_line: u32,
    pub is_static: bool,
    /// Innermost gate the definition sits under, if any.
    pub gate: Option<Gate>,
}

impl FunctionSpan {
    pub fn contains(&self, line: u32) -> bool {
        (self.start_line..=self.end_line).contains(&line)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub line: u32,
    pub kind: MarkerKind,
    pub text: String,
    pub function: Option<String>,
    /// CWE named by an `EXPECTED INCIDENTAL: CWE367 ...` note.
    pub cwe: Option<CweId>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gates {
    pub omit_bad: bool,
    pub omit_good: bool,
    pub include_main: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMap {
    pub functions: Vec<FunctionSpan>,
    pub markers: Vec<Marker>,
    pub gates: Gates,
}

impl SourceMap {
    pub fn function_at(&self, line: u32) -> Option<&FunctionSpan> {
        self.functions
            .iter()
            .filter(|f| f.contains(line))
            .min_by_key(|f| f.end_line - f.start_line)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionSpan> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn markers_in<'a>(&'a self, function: &'a str) -> impl Iterator<Item = &'a Marker> + 'a {
        self.markers
            .iter()
            .filter(move |m| m.function.as_deref() == Some(function))
    }

    /// Lines the scanner considers flaw sites: `POTENTIAL FLAW` and `FLAW`
    /// markers.
    pub fn flaw_lines(&self) -> impl Iterator<Item = u32> + '_ {
        self.markers
            .iter()
            .filter(|m| matches!(m.kind, MarkerKind::Flaw | MarkerKind::PotentialFlaw))
            .map(|m| m.line)
    }
}

pub fn scan_file(path: &Path) -> Result<SourceMap> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(scan(&String::from_utf8_lossy(&bytes)))
}

pub fn scan(source: &str) -> SourceMap {
    let mut map = SourceMap::default();
    let mut in_block_comment = false;
    let mut depth: usize = 0;
    // Depth at which function definitions live; raised by `namespace` and
    // `extern "C"` blocks.
    let mut base: usize = 0;
    let mut transparent: Vec<usize> = Vec::new();
    let mut pending: Option<(String, u32, bool, Option<Gate>)> = None;
    let mut open: Option<(String, u32, bool, Option<Gate>)> = None;
    let mut gate_stack: Vec<Option<Gate>> = Vec::new();
    let mut previous = String::new();

    for (index, raw) in source.lines().enumerate() {
        let line_no = index as u32 + 1;
        let (code, comments) = split_line(raw, &mut in_block_comment);

        for comment in &comments {
            if let Some(caps) = MARKER.captures(comment) {
                let kind = match &caps[1] {
                    "POTENTIAL FLAW" => MarkerKind::PotentialFlaw,
                    "FLAW" => MarkerKind::Flaw,
                    "FIX" => MarkerKind::Fix,
                    _ => MarkerKind::Incidental,
                };
                let text = caps[2].trim().trim_end_matches("*/").trim().to_string();
                let cwe = (kind == MarkerKind::Incidental)
                    .then(|| CweId::from_tag(&text))
                    .flatten();
                map.markers.push(Marker {
                    line: line_no,
                    kind,
                    text,
                    function: None,
                    cwe,
                });
            }
        }

        let trimmed = code.trim();
        if trimmed.starts_with('#') {
            let directive = trimmed.trim_start_matches('#').trim_start();
            if let Some(caps) = GATE.captures(trimmed) {
                let gate = Gate::from_macro(&caps[1]);
                match gate {
                    Some(Gate::OmitBad) => map.gates.omit_bad = true,
                    Some(Gate::OmitGood) => map.gates.omit_good = true,
                    Some(Gate::IncludeMain) => map.gates.include_main = true,
                    None => {}
                }
                gate_stack.push(gate);
            } else if directive.starts_with("if") {
                gate_stack.push(None);
            } else if directive.starts_with("else") || directive.starts_with("elif") {
                // Later branches compile when the gate's condition fails.
                if let Some(top) = gate_stack.last_mut() {
                    *top = None;
                }
            } else if directive.starts_with("endif") {
                gate_stack.pop();
            }
            continue;
        }

        if depth == base && open.is_none() && !code.starts_with(char::is_whitespace) {
            if let Some(caps) = FUNCTION_SIGNATURE.captures(&code) {
                let name = caps[1].to_string();
                if !NOT_FUNCTIONS.contains(&name.as_str()) && !trimmed.ends_with(';') {
                    let is_static = trimmed.starts_with("static");
                    let gate = gate_stack.iter().rev().find_map(|g| *g);
                    pending = Some((name, line_no, is_static, gate));
                }
            } else if trimmed.ends_with(';') {
                pending = None;
            }
        }

        for ch in code.chars() {
            match ch {
                '{' => {
                    if depth == base && open.is_none() {
                        if let Some(function) = pending.take() {
                            open = Some(function);
                        } else if is_transparent_scope(trimmed) || is_transparent_scope(&previous) {
                            transparent.push(depth);
                            base += 1;
                        }
                    }
                    depth += 1;
                }
                '}' => {
                    depth = depth.saturating_sub(1);
                    if depth == base {
                        if let Some((name, start_line, is_static, gate)) = open.take() {
                            map.functions.push(FunctionSpan {
                                name,
                                start_line,
                                end_line: line_no,
                                is_static,
                                gate,
                            });
                        }
                    } else if transparent.last() == Some(&depth) {
                        transparent.pop();
                        base = base.saturating_sub(1);
                    }
                }
                _ => {}
            }
        }

        if !trimmed.is_empty() {
            previous = trimmed.to_string();
        }
    }

    let spans = map.functions.clone();
    for marker in &mut map.markers {
        marker.function = spans
            .iter()
            .filter(|f| f.contains(marker.line))
            .min_by_key(|f| f.end_line - f.start_line)
            .map(|f| f.name.clone());
    }

    map
}

fn is_transparent_scope(line: &str) -> bool {
    line.starts_with("namespace") || line.starts_with("extern")
}

/// Splits a physical line into code (string and character literals blanked,
/// comments removed) and the text of the comments it contains.
fn split_line(line: &str, in_block_comment: &mut bool) -> (String, Vec<String>) {
    let mut code = String::with_capacity(line.len());
    let mut comments = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        if *in_block_comment {
            if ch == '*' && chars.peek() == Some(&'/') {
                chars.next();
                *in_block_comment = false;
                comments.push(std::mem::take(&mut current));
            } else {
                current.push(ch);
            }
            continue;
        }
        match ch {
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                *in_block_comment = true;
                code.push(' ');
            }
            '/' if chars.peek() == Some(&'/') => {
                comments.push(chars.skip(1).collect());
                break;
            }
            '"' | '\'' => {
                code.push(ch);
                let mut escaped = false;
                for inner in chars.by_ref() {
                    if escaped {
                        escaped = false;
                    } else if inner == '\\' {
                        escaped = true;
                    } else if inner == ch {
                        break;
                    }
                }
                code.push(ch);
            }
            _ => code.push(ch),
        }
    }

    if *in_block_comment && !current.is_empty() {
        comments.push(current);
    }
    (code, comments)
}

#[cfg(test)]
mod tests {
    use super::*;

    const POINT_FLAW: &str = r#"/* header */
#include "std_testcase.h"

#ifdef _WIN32
static int _mkstemp(const char * t){
  return 0;
}
#endif

#ifndef OMITBAD

void CWE459_Incomplete_Cleanup__char_18_bad()
{
    goto sink;
sink:
    {
        char filename[] = "badXXXXXX{";
        /* FLAW: We don't unlink */
    }
}

#endif /* OMITBAD */

#ifndef OMITGOOD

static void good1()
{
    {
        /* FIX: Unlink the temporary file */
        UNLINK(filename); /* EXPECTED INCIDENTAL: CWE367 TOCTOU - This POSIX API is essentially insecure by design */
    }
}

void CWE459_Incomplete_Cleanup__char_18_good()
{
    good1();
}

#endif /* OMITGOOD */

#ifdef INCLUDEMAIN
int main(int argc, char * argv[])
{
    CWE459_Incomplete_Cleanup__char_18_good();
    return 0;
}
#endif
"#;

    #[test]
    fn finds_function_spans() {
        let map = scan(POINT_FLAW);
        let names: Vec<&str> = map.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "_mkstemp",
                "CWE459_Incomplete_Cleanup__char_18_bad",
                "good1",
                "CWE459_Incomplete_Cleanup__char_18_good",
                "main"
            ]
        );

        let bad = map.function("CWE459_Incomplete_Cleanup__char_18_bad").unwrap();
        assert_eq!((bad.start_line, bad.end_line), (12, 20));
        assert_eq!(bad.gate, Some(Gate::OmitBad));
        assert!(!bad.is_static);

        let good1 = map.function("good1").unwrap();
        assert!(good1.is_static);
        assert_eq!(good1.gate, Some(Gate::OmitGood));
        assert_eq!(map.function("main").unwrap().gate, Some(Gate::IncludeMain));
        assert_eq!(map.function("_mkstemp").unwrap().gate, None);
    }

    #[test]
    fn attributes_markers_to_functions() {
        let map = scan(POINT_FLAW);
        let flaw = map
            .markers
            .iter()
            .find(|m| m.kind == MarkerKind::Flaw)
            .unwrap();
        assert_eq!(flaw.line, 18);
        assert_eq!(
            flaw.function.as_deref(),
            Some("CWE459_Incomplete_Cleanup__char_18_bad")
        );
        assert_eq!(flaw.text, "We don't unlink");

        let incidental = map
            .markers
            .iter()
            .find(|m| m.kind == MarkerKind::Incidental)
            .unwrap();
        assert_eq!(incidental.cwe, Some(CweId(367)));
        assert_eq!(incidental.function.as_deref(), Some("good1"));
        assert_eq!(map.markers_in("good1").count(), 2);
        assert_eq!(map.flaw_lines().collect::<Vec<_>>(), vec![18]);
    }

    #[test]
    fn records_gates() {
        let map = scan(POINT_FLAW);
        assert_eq!(
            map.gates,
            Gates {
                omit_bad: true,
                omit_good: true,
                include_main: true
            }
        );
    }

    #[test]
    fn else_branches_leave_the_gate() {
        let source = r#"#ifndef OMITGOOD

#ifndef OMITBAD
void helper_bad()
{
}
#else
void helper_stub()
{
}
#endif

static void good1()
{
}

#endif /* OMITGOOD */

#ifdef INCLUDEMAIN
int main()
{
    return 0;
}
#elif defined(_WIN32)
int wmain()
{
    return 0;
}
#endif
"#;
        let map = scan(source);
        assert_eq!(map.function("helper_bad").unwrap().gate, Some(Gate::OmitBad));
        // The outer OMITGOOD gate still applies to the `#else` branch.
        assert_eq!(map.function("helper_stub").unwrap().gate, Some(Gate::OmitGood));
        assert_eq!(map.function("good1").unwrap().gate, Some(Gate::OmitGood));
        assert_eq!(map.function("main").unwrap().gate, Some(Gate::IncludeMain));
        assert_eq!(map.function("wmain").unwrap().gate, None);
    }

    #[test]
    fn function_at_resolves_lines() {
        let map = scan(POINT_FLAW);
        assert_eq!(map.function_at(14).map(|f| f.name.as_str()), Some("CWE459_Incomplete_Cleanup__char_18_bad"));
        assert_eq!(map.function_at(2), None);
    }

    #[test]
    fn prototypes_and_namespaces() {
        let source = "namespace ns\n{\nvoid badSink(int data);\n\nvoid bad()\n{\n    badSink(1);\n}\n\n} /* close namespace */\n";
        let map = scan(source);
        assert_eq!(map.functions.len(), 1);
        assert_eq!(map.functions[0].name, "bad");
        assert_eq!((map.functions[0].start_line, map.functions[0].end_line), (5, 8));
    }

    #[test]
    fn qualified_method_names() {
        let source = "void CWE190_Integer_Overflow__int_rand_square_81_bad::action(int data) const\n{\n    /* POTENTIAL FLAW: square */\n    int result = data * data;\n}\n";
        let map = scan(source);
        assert_eq!(
            map.functions[0].name,
            "CWE190_Integer_Overflow__int_rand_square_81_bad::action"
        );
        assert_eq!(map.markers[0].kind, MarkerKind::PotentialFlaw);
    }
}

//! Template header of a generated test case.
//!
//! ```text
//! /* TEMPLATE GENERATED TESTCASE FILE
//! Filename: CWE190_Integer_Overflow__int64_t_rand_preinc_44.c
//! Label Definition File: CWE190_Integer_Overflow.label.xml
//! Template File: sources-sinks-44.tmpl.c
//! */
//! /*
//!  * @description
//!  * CWE: 190 Integer Overflow
//!  * BadSource: rand Set data to result of rand()
//!  ...
//! ```

use serde::{Deserialize, Serialize};

use crate::flow::FlowVariant;
use crate::naming::CweId;

/// Shape of the template a case was generated from. Decides which cross
/// variants the good path contains.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    /// `point-flaw-*`: `good1()`, `good2()`, ... without sources or sinks.
    PointFlaw,
    /// `sources-sink-*`: one sink, good path is G2B only.
    SourcesSink,
    /// `sources-sinks-*`: good path has both G2B and B2G.
    SourcesSinks,
    Unknown,
}

impl TemplateKind {
    fn from_template_file(file: &str) -> TemplateKind {
        if file.starts_with("point-flaw") {
            TemplateKind::PointFlaw
        } else if file.starts_with("sources-sinks") {
            TemplateKind::SourcesSinks
        } else if file.starts_with("sources-sink") {
            TemplateKind::SourcesSink
        } else {
            TemplateKind::Unknown
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateHeader {
    pub filename: Option<String>,
    pub label_file: Option<String>,
    pub template_file: Option<String>,
    pub cwe: Option<CweId>,
    pub cwe_title: Option<String>,
    pub bad_source: Option<String>,
    pub good_source: Option<String>,
    pub sinks: Option<String>,
    pub good_sink: Option<String>,
    pub bad_sink: Option<String>,
    pub flow_variant: Option<FlowVariant>,
    pub flow_description: Option<String>,
}

impl TemplateHeader {
    pub fn template_kind(&self) -> TemplateKind {
        self.template_file
            .as_deref()
            .map(TemplateKind::from_template_file)
            .unwrap_or(TemplateKind::Unknown)
    }
}

/// Reads the leading comment block. Stops at the first preprocessor
/// directive; a file without a header yields an empty [`TemplateHeader`].
pub fn parse_header(source: &str) -> TemplateHeader {
    let mut header = TemplateHeader::default();

    for raw in source.lines() {
        let line = raw.trim();
        if line.starts_with('#') {
            break;
        }
        let line = line
            .trim_start_matches("/*")
            .trim_start_matches('*')
            .trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        let owned = || (!value.is_empty()).then(|| value.to_string());

        match key {
            "Filename" => header.filename = owned(),
            "Label Definition File" => header.label_file = owned(),
            "Template File" => header.template_file = owned(),
            "CWE" => {
                let (number, title) = value.split_once(' ').unwrap_or((value, ""));
                header.cwe = number.parse().ok().map(CweId);
                header.cwe_title = (!title.is_empty()).then(|| title.trim().to_string());
            }
            "BadSource" => header.bad_source = owned(),
            "GoodSource" => header.good_source = owned(),
            "Sinks" | "Sink" => header.sinks = owned(),
            "GoodSink" => header.good_sink = owned(),
            "BadSink" => header.bad_sink = owned(),
            "Flow Variant" => {
                let (number, text) = value.split_once(' ').unwrap_or((value, ""));
                header.flow_variant = number.parse().ok().map(FlowVariant);
                header.flow_description = (!text.is_empty()).then(|| text.trim().to_string());
            }
            _ => {}
        }
    }

    header
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCES_SINKS: &str = r#"/* TEMPLATE GENERATED TESTCASE FILE
Filename: CWE190_Integer_Overflow__int64_t_rand_preinc_44.c
Label Definition File: CWE190_Integer_Overflow.label.xml
Template File: sources-sinks-44.tmpl.c
*/
/*
 * @description
 * CWE: 190 Integer Overflow
 * BadSource: rand Set data to result of rand()
 * GoodSource: Set data to a small, non-zero number (two)
 * Sinks: increment
 *    GoodSink: Ensure there will not be an overflow before incrementing data
 *    BadSink : Increment data, which can cause an overflow
 * Flow Variant: 44 Data/control flow: data passed as an argument from one function to a function in the same source file called via a function pointer
 *
 * */

#include "std_testcase.h"
"#;

    #[test]
    fn parses_sources_sinks_header() {
        let header = parse_header(SOURCES_SINKS);
        assert_eq!(
            header.filename.as_deref(),
            Some("CWE190_Integer_Overflow__int64_t_rand_preinc_44.c")
        );
        assert_eq!(header.cwe, Some(CweId(190)));
        assert_eq!(header.cwe_title.as_deref(), Some("Integer Overflow"));
        assert_eq!(
            header.bad_source.as_deref(),
            Some("rand Set data to result of rand()")
        );
        assert_eq!(header.sinks.as_deref(), Some("increment"));
        assert_eq!(
            header.bad_sink.as_deref(),
            Some("Increment data, which can cause an overflow")
        );
        assert_eq!(header.flow_variant, Some(FlowVariant(44)));
        assert!(header
            .flow_description
            .as_deref()
            .unwrap()
            .starts_with("Data/control flow"));
        assert_eq!(header.template_kind(), TemplateKind::SourcesSinks);
    }

    #[test]
    fn point_flaw_has_no_sources() {
        let header = parse_header(
            "/* TEMPLATE GENERATED TESTCASE FILE\nTemplate File: point-flaw-18.tmpl.c\n*/\n/*\n * CWE: 459 Incomplete Cleanup\n * Sinks:\n *    GoodSink: Clean up properly\n */\n#include \"std_testcase.h\"\n",
        );
        assert_eq!(header.template_kind(), TemplateKind::PointFlaw);
        assert_eq!(header.cwe, Some(CweId(459)));
        assert_eq!(header.bad_source, None);
        assert_eq!(header.sinks, None);
        assert_eq!(header.good_sink.as_deref(), Some("Clean up properly"));
    }

    #[test]
    fn missing_header_is_empty() {
        let header = parse_header("#include <stdio.h>\nint x: 1;\n");
        assert_eq!(header, TemplateHeader::default());
        assert_eq!(header.template_kind(), TemplateKind::Unknown);
    }
}

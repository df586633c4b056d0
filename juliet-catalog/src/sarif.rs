//! Ingestion of analyzer output: SARIF 2.1.0 logs and gcc-style diagnostic
//! lines, both normalized into [`ToolFinding`]s.

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::naming::CweId;
use crate::ToolFinding;

static DIAGNOSTIC: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?P<file>(?:[A-Za-z]:)?[^:\n]+):(?P<line>\d+)(?::(?P<col>\d+))?:\s*(?P<severity>fatal error|error|warning|style|performance|portability|information|note)\s*:\s*(?P<message>.*)$",
    )
    .expect("diagnostic regex")
});

static FUNCTION_CONTEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<file>(?:[A-Za-z]:)?[^:\n]+):\s*In (?:member )?function ['‘`](?P<function>[^'’`]+)['’`]:")
        .expect("function context regex")
});

static TRAILING_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\[(?P<id>[^\]\s]+)\]\s*$").expect("rule id regex"));

static CWE_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bCWE[-_: ]?(\d+)").expect("cwe regex"));

pub fn parse_sarif_file(path: &Path) -> Result<Vec<ToolFinding>> {
    let text =
        fs::read_to_string(path).with_context(|| format!("read SARIF log {}", path.display()))?;
    let value: Value = serde_json::from_str(&text)
        .with_context(|| format!("parse SARIF log {}", path.display()))?;
    parse_sarif(&value).with_context(|| format!("interpret SARIF log {}", path.display()))
}

pub fn parse_sarif(log: &Value) -> Result<Vec<ToolFinding>> {
    let runs = log
        .get("runs")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("SARIF log has no `runs` array"))?;

    let mut findings = Vec::new();
    for run in runs {
        let rules = rule_table(run);
        let Some(results) = run.get("results").and_then(Value::as_array) else {
            continue;
        };
        for result in results {
            findings.push(finding_from_result(result, &rules));
        }
    }
    Ok(findings)
}

struct RuleInfo {
    id: String,
    cwes: Vec<CweId>,
}

/// Rules of the driver and its extensions, addressable by id and by the
/// driver rule index.
fn rule_table(run: &Value) -> (Vec<RuleInfo>, HashMap<String, usize>) {
    let tool = run.get("tool");
    let mut components: Vec<&Value> = tool.and_then(|t| t.get("driver")).into_iter().collect();
    if let Some(extensions) = tool.and_then(|t| t.get("extensions")).and_then(Value::as_array) {
        components.extend(extensions.iter());
    }

    let mut rules = Vec::new();
    let mut by_id = HashMap::new();
    for component in components {
        let Some(list) = component.get("rules").and_then(Value::as_array) else {
            continue;
        };
        for rule in list {
            let id = rule
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let mut cwes = Vec::new();
            collect_cwes(rule.get("properties"), &mut cwes);
            if let Some(cwe) = CweId::from_tag(&id) {
                push_unique(&mut cwes, cwe);
            }
            if let Some(relationships) = rule.get("relationships").and_then(Value::as_array) {
                for rel in relationships {
                    if let Some(target) = rel
                        .get("target")
                        .and_then(|t| t.get("id"))
                        .and_then(Value::as_str)
                    {
                        if let Some(cwe) = CweId::from_tag(target) {
                            push_unique(&mut cwes, cwe);
                        }
                    }
                }
            }
            by_id.entry(id.clone()).or_insert(rules.len());
            rules.push(RuleInfo { id, cwes });
        }
    }
    (rules, by_id)
}

fn finding_from_result(result: &Value, (rules, by_id): &(Vec<RuleInfo>, HashMap<String, usize>)) -> ToolFinding {
    let rule = result
        .get("ruleIndex")
        .and_then(Value::as_u64)
        .and_then(|index| rules.get(index as usize))
        .or_else(|| {
            rule_id_of(result)
                .and_then(|id| by_id.get(id))
                .and_then(|index| rules.get(*index))
        });

    let rule_id = rule_id_of(result)
        .map(str::to_string)
        .or_else(|| rule.map(|r| r.id.clone()))
        .unwrap_or_default();

    let message = result
        .get("message")
        .and_then(|m| m.get("text").or_else(|| m.get("markdown")))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let location = result
        .get("locations")
        .and_then(Value::as_array)
        .and_then(|locations| locations.first());
    let physical = location.and_then(|l| l.get("physicalLocation"));
    let file = physical
        .and_then(|p| p.get("artifactLocation"))
        .and_then(|a| a.get("uri"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let line = physical
        .and_then(|p| p.get("region"))
        .and_then(|r| r.get("startLine"))
        .and_then(Value::as_u64)
        .map(|l| l as u32);
    let function = location
        .and_then(|l| l.get("logicalLocations"))
        .and_then(Value::as_array)
        .and_then(|logical| logical.first())
        .and_then(|l| {
            l.get("fullyQualifiedName")
                .or_else(|| l.get("name"))
                .and_then(Value::as_str)
        })
        .map(str::to_string);

    let mut cwes = rule.map(|r| r.cwes.clone()).unwrap_or_default();
    collect_cwes(result.get("properties"), &mut cwes);
    if let Some(cwe) = CweId::from_tag(&rule_id) {
        push_unique(&mut cwes, cwe);
    }

    ToolFinding {
        rule_id,
        message,
        file,
        line,
        function,
        cwes,
    }
}

fn rule_id_of(result: &Value) -> Option<&str> {
    result
        .get("ruleId")
        .and_then(Value::as_str)
        .or_else(|| {
            result
                .get("rule")
                .and_then(|r| r.get("id"))
                .and_then(Value::as_str)
        })
}

fn collect_cwes(properties: Option<&Value>, out: &mut Vec<CweId>) {
    let Some(properties) = properties else {
        return;
    };
    if let Some(tags) = properties.get("tags").and_then(Value::as_array) {
        for tag in tags.iter().filter_map(Value::as_str) {
            if let Some(cwe) = CweId::from_tag(tag) {
                push_unique(out, cwe);
            }
        }
    }
    match properties.get("cwe") {
        Some(Value::Number(n)) => {
            if let Some(n) = n.as_u64() {
                push_unique(out, CweId(n as u32));
            }
        }
        Some(Value::String(s)) => {
            if let Some(cwe) = CweId::from_tag(s).or_else(|| s.parse().ok().map(CweId)) {
                push_unique(out, cwe);
            }
        }
        Some(Value::Array(items)) => {
            for item in items {
                let cwe = item
                    .as_u64()
                    .map(|n| CweId(n as u32))
                    .or_else(|| item.as_str().and_then(CweId::from_tag));
                if let Some(cwe) = cwe {
                    push_unique(out, cwe);
                }
            }
        }
        _ => {}
    }
}

fn push_unique(out: &mut Vec<CweId>, cwe: CweId) {
    if !out.contains(&cwe) {
        out.push(cwe);
    }
}

/// Reads `path:line[:col]: severity: message [id]` lines. `note:` lines and
/// anything unrecognized are ignored; `In function 'f':` context lines
/// attribute the diagnostics that follow to `f`.
pub fn parse_diagnostics(text: &str) -> Vec<ToolFinding> {
    let mut findings = Vec::new();
    let mut context: Option<(String, String)> = None;

    for line in text.lines() {
        let line = line.trim_end();
        if let Some(caps) = FUNCTION_CONTEXT.captures(line) {
            context = Some((caps["file"].to_string(), caps["function"].to_string()));
            continue;
        }
        let Some(caps) = DIAGNOSTIC.captures(line) else {
            continue;
        };
        if &caps["severity"] == "note" {
            continue;
        }

        let file = caps["file"].to_string();
        let mut message = caps["message"].to_string();
        let mut rule_id = caps["severity"].to_string();
        if let Some(id) = TRAILING_ID.captures(&message) {
            rule_id = id["id"].to_string();
            let start = id.get(0).map_or(message.len(), |m| m.start());
            message.truncate(start);
        }

        let mut cwes = Vec::new();
        for cap in CWE_MENTION.captures_iter(&caps["message"]) {
            if let Ok(n) = cap[1].parse() {
                push_unique(&mut cwes, CweId(n));
            }
        }

        let function = context
            .as_ref()
            .filter(|(ctx_file, _)| *ctx_file == file)
            .map(|(_, function)| function.clone());

        findings.push(ToolFinding {
            rule_id,
            message: message.trim().to_string(),
            file: Some(file),
            line: caps["line"].parse().ok(),
            function,
            cwes,
        });
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_results_with_rule_tags() {
        let log = json!({
            "version": "2.1.0",
            "runs": [{
                "tool": {"driver": {
                    "name": "checker",
                    "rules": [
                        {"id": "int-overflow", "properties": {"tags": ["security", "external/cwe/cwe-190"]}},
                        {"id": "tmp-leak", "properties": {"cwe": 459}}
                    ]
                }},
                "results": [
                    {
                        "ruleId": "int-overflow",
                        "message": {"text": "unchecked increment"},
                        "locations": [{
                            "physicalLocation": {
                                "artifactLocation": {"uri": "file:///c/CWE190_Integer_Overflow__int_max_preinc_01.c"},
                                "region": {"startLine": 31}
                            },
                            "logicalLocations": [{"fullyQualifiedName": "CWE190_Integer_Overflow__int_max_preinc_01_bad"}]
                        }]
                    },
                    {
                        "ruleIndex": 1,
                        "message": {"text": "temporary file not removed"}
                    }
                ]
            }]
        });

        let findings = parse_sarif(&log).unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].rule_id, "int-overflow");
        assert_eq!(findings[0].line, Some(31));
        assert_eq!(findings[0].cwes, vec![CweId(190)]);
        assert_eq!(
            findings[0].function.as_deref(),
            Some("CWE190_Integer_Overflow__int_max_preinc_01_bad")
        );
        assert_eq!(findings[1].rule_id, "tmp-leak");
        assert_eq!(findings[1].cwes, vec![CweId(459)]);
        assert_eq!(findings[1].file, None);
    }

    #[test]
    fn rule_id_carries_cwe() {
        let log = json!({"runs": [{"results": [{"ruleId": "CWE-191", "message": {"text": "x"}}]}]});
        let findings = parse_sarif(&log).unwrap();
        assert_eq!(findings[0].cwes, vec![CweId(191)]);
    }

    #[test]
    fn rejects_logs_without_runs() {
        assert!(parse_sarif(&json!({"version": "2.1.0"})).is_err());
    }

    #[test]
    fn reads_compiler_diagnostics() {
        let text = "\
src/CWE190_Integer_Overflow__int_max_preinc_01.c: In function 'CWE190_Integer_Overflow__int_max_preinc_01_bad':
src/CWE190_Integer_Overflow__int_max_preinc_01.c:31:9: warning: integer overflow in expression [-Woverflow]
src/CWE190_Integer_Overflow__int_max_preinc_01.c:31:9: note: in expansion of macro
CWE459_Incomplete_Cleanup__char_18.c:52: style: temporary file not removed (CWE-459) [tmpLeak]
random chatter
";
        let findings = parse_diagnostics(text);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].rule_id, "-Woverflow");
        assert_eq!(findings[0].message, "integer overflow in expression");
        assert_eq!(findings[0].line, Some(31));
        assert_eq!(
            findings[0].function.as_deref(),
            Some("CWE190_Integer_Overflow__int_max_preinc_01_bad")
        );
        assert_eq!(findings[1].rule_id, "tmpLeak");
        assert_eq!(findings[1].cwes, vec![CweId(459)]);
        assert_eq!(findings[1].function, None);
    }
}

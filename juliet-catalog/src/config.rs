//! Harness configuration file and the effective-settings snapshot printed in
//! reports.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::analyzer::{AnalyzerSpec, Limits};
use crate::cache::CacheConfig;
use crate::discovery::Selection;
use crate::matrix::BuildSettings;
use crate::scoring::ScoringOptions;

/// `compare` entries: how many of `big`'s false positives `small` removes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparePair {
    pub big: String,
    pub small: String,
}

/// Configuration file format for juliet-eval
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JulietConfig {
    /// Directory holding the Juliet `testcases` tree
    pub corpus: Option<PathBuf>,
    pub selection: Selection,
    pub build: BuildSettings,
    pub analyzers: Vec<AnalyzerSpec>,
    pub limits: Limits,
    pub scoring: ScoringOptions,
    pub cache: CacheConfig,
    pub compare: Vec<ComparePair>,
}

impl JulietConfig {
    /// Reads a YAML configuration file. Sections the file leaves out keep
    /// their defaults.
    pub fn load(path: &Path) -> Result<(Self, ConfigSnapshot)> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read config file {}", path.display()))?;
        Self::from_yaml(&contents).with_context(|| format!("parse config file {}", path.display()))
    }

    pub fn from_yaml(contents: &str) -> Result<(Self, ConfigSnapshot)> {
        let raw: serde_yaml::Value = serde_yaml::from_str(contents)?;
        let config: JulietConfig = if raw.is_null() {
            JulietConfig::default()
        } else {
            serde_yaml::from_value(raw.clone())?
        };
        let user = serde_json::to_value(&raw).context("convert configuration to JSON")?;
        let snapshot = ConfigSnapshot::capture(&config, Some(&user))?;
        Ok((config, snapshot))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettingSource {
    Default,
    User,
}

impl SettingSource {
    pub fn label(&self) -> &'static str {
        match self {
            SettingSource::Default => "default",
            SettingSource::User => "user",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingEntry {
    pub name: String,
    pub value: String,
    pub source: SettingSource,
}

/// Every effective setting with where it came from.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    entries: Vec<SettingEntry>,
}

impl ConfigSnapshot {
    /// Flattens `config` into dotted setting names. A setting is `user` when
    /// the same path exists in the `user` document.
    pub fn capture(config: &JulietConfig, user: Option<&Value>) -> Result<Self> {
        let effective = serde_json::to_value(config).context("serialize configuration")?;
        let mut entries = Vec::new();
        flatten(&effective, user, String::new(), &mut entries);
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[SettingEntry] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&SettingEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Records a command line override, replacing the file value if any.
    pub fn set_user(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|entry| entry.name == name) {
            Some(entry) => {
                entry.value = value;
                entry.source = SettingSource::User;
            }
            None => self.entries.push(SettingEntry {
                name: name.to_string(),
                value,
                source: SettingSource::User,
            }),
        }
    }
}

impl fmt::Display for ConfigSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
        for entry in &self.entries {
            writeln!(
                f,
                "  {:<width$}  {} ({})",
                entry.name,
                entry.value,
                entry.source.label()
            )?;
        }
        Ok(())
    }
}

fn flatten(value: &Value, user: Option<&Value>, name: String, out: &mut Vec<SettingEntry>) {
    if let Value::Object(map) = value {
        if !map.is_empty() {
            for (key, child) in map {
                let child_name = if name.is_empty() {
                    key.clone()
                } else {
                    format!("{name}.{key}")
                };
                let user_child = user.and_then(|u| u.get(key));
                flatten(child, user_child, child_name, out);
            }
            return;
        }
    }

    let source = match user {
        Some(Value::Null) | None => SettingSource::Default,
        Some(_) => SettingSource::User,
    };
    out.push(SettingEntry {
        name,
        value: describe(value),
        source,
    });
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "unset".to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) if items.is_empty() => "none".to_string(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Object(map) => map
                    .get("name")
                    .map(describe)
                    .unwrap_or_else(|| item.to_string()),
                other => describe(other),
            })
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

/// Output directory default shared by the CLI and reports.
pub fn default_out_dir() -> PathBuf {
    PathBuf::from("out/juliet")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{AnalyzerInput, AnalyzerKind};
    use crate::matrix::BuildVariant;
    use crate::naming::CweId;
    use crate::scoring::Attribution;

    const SAMPLE: &str = r#"
corpus: juliet/testcases
selection:
  cwes: [190, 191]
build:
  compiler: clang
  variants: [bad_only, full]
analyzers:
  - name: clang-tidy
    program: clang-tidy
    args: ["{files}", "--", "{defines}"]
    format: diagnostics
    output: stdout
  - name: rudra
    kind: report
    report: reports/rudra
limits:
  time_secs: 120
scoring:
  attribution: differential
compare:
  - big: clang-tidy
    small: rudra
"#;

    #[test]
    fn loads_sections_and_keeps_defaults() -> Result<()> {
        let (config, _) = JulietConfig::from_yaml(SAMPLE)?;
        assert_eq!(config.corpus, Some(PathBuf::from("juliet/testcases")));
        assert_eq!(config.selection.cwes, vec![CweId(190), CweId(191)]);
        assert_eq!(config.build.compiler, "clang");
        assert_eq!(config.build.cxx_compiler, "c++");
        assert_eq!(
            config.build.variants,
            vec![BuildVariant::BadOnly, BuildVariant::Full]
        );
        assert_eq!(config.analyzers.len(), 2);
        assert_eq!(config.analyzers[0].input, AnalyzerInput::Source);
        assert_eq!(config.analyzers[1].kind, AnalyzerKind::Report);
        assert_eq!(config.limits.time_secs, 120);
        assert_eq!(config.limits.memory_bytes, Limits::default().memory_bytes);
        assert_eq!(config.scoring.attribution, Attribution::Differential);
        assert!(config.scoring.match_cwe);
        assert_eq!(config.compare[0].small, "rudra");
        Ok(())
    }

    #[test]
    fn snapshot_tracks_origin() -> Result<()> {
        let (_, mut snapshot) = JulietConfig::from_yaml(SAMPLE)?;
        let compiler = snapshot.get("build.compiler").unwrap();
        assert_eq!(compiler.value, "clang");
        assert_eq!(compiler.source, SettingSource::User);

        let cxx = snapshot.get("build.cxx_compiler").unwrap();
        assert_eq!(cxx.source, SettingSource::Default);

        assert_eq!(snapshot.get("analyzers").unwrap().value, "clang-tidy, rudra");
        assert_eq!(
            snapshot.get("limits.memory_bytes").unwrap().source,
            SettingSource::Default
        );

        snapshot.set_user("corpus", "elsewhere");
        assert_eq!(snapshot.get("corpus").unwrap().value, "elsewhere");
        assert!(snapshot.to_string().contains("(user)"));
        Ok(())
    }

    #[test]
    fn empty_file_is_all_defaults() -> Result<()> {
        let (config, snapshot) = JulietConfig::from_yaml("")?;
        assert_eq!(config, JulietConfig::default());
        assert!(snapshot
            .entries()
            .iter()
            .all(|entry| entry.source == SettingSource::Default));
        Ok(())
    }

    #[test]
    fn rejects_unknown_variant() {
        let err = JulietConfig::from_yaml("build:\n  variants: [sometimes]\n");
        assert!(err.is_err());
    }
}

//! Drives every configured analyzer over the selected cases and scores the
//! results.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::analyzer::{build_analyzers, Analyzer, AnalyzerInput, AnalyzerRun, Invocation, RunOutcome};
use crate::cache::{run_fingerprint, ResultCache};
use crate::config::JulietConfig;
use crate::discovery::TestCase;
use crate::matrix::{self, BuildOutcome, BuildVariant};
use crate::measurement::{Measurement, Scope};
use crate::memory_profiler::MemoryScope;
use crate::naming::CaseId;
use crate::report;
use crate::scoring::{self, Attribution, Scorecard};
use crate::write_findings_json;

/// An analyzer run that produced no usable findings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompleteRun {
    pub analyzer: String,
    pub case: CaseId,
    pub variant: BuildVariant,
    pub outcome: RunOutcome,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Evaluation {
    pub measurements: Vec<Measurement>,
    pub scorecard: Scorecard,
    pub incomplete: Vec<IncompleteRun>,
    pub cache_hits: usize,
}

pub struct Evaluator<'a> {
    cases: Vec<&'a TestCase>,
    config: &'a JulietConfig,
    analyzers: Vec<Box<dyn Analyzer>>,
    cache: ResultCache,
    out_dir: PathBuf,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        cases: Vec<&'a TestCase>,
        config: &'a JulietConfig,
        cache: ResultCache,
        out_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let analyzers = build_analyzers(&config.analyzers)?;
        Ok(Self {
            cases,
            config,
            analyzers,
            cache,
            out_dir: out_dir.into(),
        })
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Build variants each analyzer looks at. Differential scoring needs the
    /// bad-only and full builds no matter what the build section lists.
    pub fn variants(&self) -> Vec<BuildVariant> {
        match self.config.scoring.attribution {
            Attribution::Differential => vec![BuildVariant::BadOnly, BuildVariant::Full],
            Attribution::Location => {
                let mut variants = Vec::new();
                for variant in &self.config.build.variants {
                    if !variants.contains(variant) {
                        variants.push(*variant);
                    }
                }
                if variants.is_empty() {
                    variants.push(BuildVariant::Full);
                }
                variants
            }
        }
    }

    pub fn run(&self) -> Result<Evaluation> {
        let variants = self.variants();
        let needs_binaries = self
            .analyzers
            .iter()
            .any(|a| a.input() == AnalyzerInput::Binary);
        let mut evaluation = Evaluation::default();

        tracing::info!(
            cases = self.cases.len(),
            analyzers = self.analyzers.len(),
            variants = ?variants,
            "starting evaluation"
        );

        for case in &self.cases {
            let _scope = MemoryScope::new(case.id.as_str());
            let builds = if needs_binaries {
                self.build(case, &variants)?
            } else {
                BTreeMap::new()
            };

            for analyzer in &self.analyzers {
                let mut runs: BTreeMap<BuildVariant, AnalyzerRun> = BTreeMap::new();
                for variant in &variants {
                    let binary = match analyzer.input() {
                        AnalyzerInput::Source => None,
                        AnalyzerInput::Binary => match builds.get(variant) {
                            Some(BuildOutcome::Built(path)) => Some(path.as_path()),
                            Some(BuildOutcome::Failed { status, stderr }) => {
                                evaluation.incomplete.push(IncompleteRun {
                                    analyzer: analyzer.name().to_string(),
                                    case: case.id.clone(),
                                    variant: *variant,
                                    outcome: RunOutcome::Crashed {
                                        status: *status,
                                        stderr: format!("build failed: {stderr}"),
                                    },
                                });
                                continue;
                            }
                            None => continue,
                        },
                    };

                    let run = self.run_one(analyzer.as_ref(), case, *variant, binary, &mut evaluation)?;
                    if run.outcome.is_completed() {
                        let findings_path = self
                            .out_dir
                            .join("findings")
                            .join(analyzer.name())
                            .join(format!("{}.{}.json", case.id, variant.label()));
                        write_findings_json(&findings_path, &run.findings)?;
                        runs.insert(*variant, run);
                    } else {
                        evaluation.incomplete.push(IncompleteRun {
                            analyzer: analyzer.name().to_string(),
                            case: case.id.clone(),
                            variant: *variant,
                            outcome: run.outcome,
                        });
                    }
                }

                for (variant, run) in &runs {
                    let m = scoring::measure(
                        analyzer.name(),
                        case,
                        Scope::Variant(*variant),
                        run,
                        &self.config.scoring,
                    );
                    self.record(m, &mut evaluation)?;
                }

                if self.config.scoring.attribution == Attribution::Differential {
                    if let (Some(bad_only), Some(full)) =
                        (runs.get(&BuildVariant::BadOnly), runs.get(&BuildVariant::Full))
                    {
                        let m = scoring::differential(
                            analyzer.name(),
                            case,
                            bad_only,
                            full,
                            &self.config.scoring,
                        );
                        self.record(m, &mut evaluation)?;
                    }
                }
            }
        }

        let mut scorecard = Scorecard::from_measurements(&evaluation.measurements);
        for run in &evaluation.incomplete {
            scorecard.record_incomplete(&run.analyzer);
        }
        evaluation.scorecard = scorecard;

        tracing::info!(
            measurements = evaluation.measurements.len(),
            incomplete = evaluation.incomplete.len(),
            cache_hits = evaluation.cache_hits,
            "evaluation finished"
        );
        Ok(evaluation)
    }

    fn build(
        &self,
        case: &TestCase,
        variants: &[BuildVariant],
    ) -> Result<BTreeMap<BuildVariant, BuildOutcome>> {
        let mut builds = BTreeMap::new();
        for variant in variants {
            let job = matrix::job_for(case, *variant, &self.config.build);
            let outcome = matrix::run_job(&job)?;
            builds.insert(*variant, outcome);
        }
        Ok(builds)
    }

    fn run_one(
        &self,
        analyzer: &dyn Analyzer,
        case: &TestCase,
        variant: BuildVariant,
        binary: Option<&Path>,
        evaluation: &mut Evaluation,
    ) -> Result<AnalyzerRun> {
        let invocation = Invocation {
            case,
            variant,
            binary,
            scratch_dir: self.out_dir.join("scratch"),
            include_dir: self.config.build.support_dir.as_deref(),
            include_main: self.config.build.include_main,
            limits: self.config.limits,
        };

        let fingerprint = if self.cache.is_enabled() {
            Some(run_fingerprint(&analyzer.cache_key(&invocation)?, &invocation)?)
        } else {
            None
        };

        if let Some(fp) = &fingerprint {
            let (cached, status) = self.cache.lookup(fp)?;
            tracing::debug!(analyzer = analyzer.name(), case = %case.id, %variant, ?status, "cache lookup");
            if let Some(run) = cached {
                evaluation.cache_hits += 1;
                return Ok(run);
            }
        }

        let run = analyzer
            .analyze(&invocation)
            .with_context(|| format!("run `{}` on {} ({})", analyzer.name(), case.id, variant))?;

        if let (Some(fp), true) = (&fingerprint, run.outcome.is_completed()) {
            self.cache.store(fp, analyzer.name(), &case.id, &run);
        }
        Ok(run)
    }

    fn record(&self, m: Measurement, evaluation: &mut Evaluation) -> Result<()> {
        report::log_measure(&self.out_dir, &m)?;
        evaluation.measurements.push(m);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::AnalyzerSpec;
    use crate::cache::CacheConfig;
    use crate::discovery::discover;
    use crate::scoring::CaseVerdict;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    const CASE_FILE: &str = "CWE191_Integer_Underflow__char_rand_postdec_09.c";
    const CASE_ID: &str = "CWE191_Integer_Underflow__char_rand_postdec_09";

    fn fixture() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../ci-corpus/testcases/CWE191_Integer_Underflow/s04")
            .join(CASE_FILE)
    }

    fn sarif(lines: &[u32]) -> serde_json::Value {
        let results: Vec<_> = lines
            .iter()
            .map(|line| {
                json!({
                    "ruleId": "integer-underflow",
                    "message": {"text": "decrement may underflow"},
                    "properties": {"tags": ["CWE-191"]},
                    "locations": [{"physicalLocation": {
                        "artifactLocation": {"uri": format!("file:///src/{CASE_FILE}")},
                        "region": {"startLine": line}
                    }}]
                })
            })
            .collect();
        json!({"version": "2.1.0", "runs": [{"tool": {"driver": {"name": "t"}}, "results": results}]})
    }

    #[test]
    fn scores_report_analyzer_by_location() -> Result<()> {
        let dir = tempdir()?;
        let corpus_dir = dir.path().join("testcases");
        fs::create_dir_all(&corpus_dir)?;
        fs::copy(fixture(), corpus_dir.join(CASE_FILE))?;
        let corpus = discover(&corpus_dir)?;

        let reports = dir.path().join("reports");
        fs::create_dir_all(&reports)?;
        fs::write(
            reports.join(format!("{CASE_ID}.sarif")),
            serde_json::to_string(&sarif(&[35, 66]))?,
        )?;

        let config = JulietConfig {
            analyzers: vec![AnalyzerSpec::report("replay", &reports)],
            ..Default::default()
        };
        let out = dir.path().join("out");
        let evaluator = Evaluator::new(
            corpus.cases.iter().collect(),
            &config,
            ResultCache::disabled(),
            &out,
        )?;
        let evaluation = evaluator.run()?;

        assert_eq!(evaluation.measurements.len(), 1);
        let m = &evaluation.measurements[0];
        assert_eq!(m.true_positives, 1);
        assert_eq!(m.false_positives, 1);
        assert_eq!(CaseVerdict::of(m), CaseVerdict::Noisy);
        assert!(evaluation.incomplete.is_empty());
        assert!(out.join(report::HUMAN_LOG).is_file());
        assert!(out.join(report::DEBUG_LOG).is_file());
        assert!(out
            .join("findings/replay")
            .join(format!("{CASE_ID}.full.json"))
            .is_file());

        let score = evaluation.scorecard.analyzer("replay").unwrap();
        assert_eq!(score.totals.cases, 1);
        assert_eq!(score.false_positives_by_kind.get("B2G"), Some(&1));
        Ok(())
    }

    #[test]
    fn differential_mode_runs_both_builds() -> Result<()> {
        let dir = tempdir()?;
        let corpus_dir = dir.path().join("testcases");
        fs::create_dir_all(&corpus_dir)?;
        fs::copy(fixture(), corpus_dir.join(CASE_FILE))?;
        let corpus = discover(&corpus_dir)?;

        let reports = dir.path().join("reports");
        fs::create_dir_all(&reports)?;
        fs::write(
            reports.join(format!("{CASE_ID}.bad.sarif")),
            serde_json::to_string(&sarif(&[35]))?,
        )?;
        fs::write(
            reports.join(format!("{CASE_ID}.full.sarif")),
            serde_json::to_string(&sarif(&[35, 66]))?,
        )?;

        let mut config = JulietConfig {
            analyzers: vec![AnalyzerSpec::report("replay", &reports)],
            ..Default::default()
        };
        config.scoring.attribution = Attribution::Differential;
        let evaluator = Evaluator::new(
            corpus.cases.iter().collect(),
            &config,
            ResultCache::disabled(),
            dir.path().join("out"),
        )?;
        assert_eq!(
            evaluator.variants(),
            vec![BuildVariant::BadOnly, BuildVariant::Full]
        );

        let evaluation = evaluator.run()?;
        let scopes: Vec<Scope> = evaluation.measurements.iter().map(|m| m.scope).collect();
        assert!(scopes.contains(&Scope::Differential));
        let diff = evaluation
            .measurements
            .iter()
            .find(|m| m.scope == Scope::Differential)
            .unwrap();
        assert_eq!(diff.true_positives, 1);
        assert_eq!(diff.false_positives, 1);
        Ok(())
    }

    #[test]
    fn second_run_is_served_from_cache() -> Result<()> {
        let dir = tempdir()?;
        let corpus_dir = dir.path().join("testcases");
        fs::create_dir_all(&corpus_dir)?;
        fs::copy(fixture(), corpus_dir.join(CASE_FILE))?;
        let corpus = discover(&corpus_dir)?;

        let reports = dir.path().join("reports");
        fs::create_dir_all(&reports)?;
        fs::write(
            reports.join(format!("{CASE_ID}.sarif")),
            serde_json::to_string(&sarif(&[35]))?,
        )?;
        let config = JulietConfig {
            analyzers: vec![AnalyzerSpec::report("replay", &reports)],
            ..Default::default()
        };
        let cache_config = CacheConfig {
            enabled: true,
            directory: dir.path().join("cache"),
            clear: false,
        };

        for expected_hits in [0, 1] {
            let evaluator = Evaluator::new(
                corpus.cases.iter().collect(),
                &config,
                ResultCache::open(cache_config.clone())?,
                dir.path().join("out"),
            )?;
            let evaluation = evaluator.run()?;
            assert_eq!(evaluation.cache_hits, expected_hits);
            assert_eq!(evaluation.measurements[0].true_positives, 1);
        }
        Ok(())
    }
}

//! Build matrix: every selected case compiled once per preprocessor
//! configuration. Compilation itself is delegated to an external compiler.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::discovery::TestCase;
use crate::naming::CaseId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildVariant {
    /// `-DOMITGOOD`: only the flawed paths are compiled.
    BadOnly,
    /// `-DOMITBAD`: only the fixed paths are compiled.
    GoodOnly,
    Full,
}

impl BuildVariant {
    pub const ALL: [BuildVariant; 3] =
        [BuildVariant::BadOnly, BuildVariant::GoodOnly, BuildVariant::Full];

    pub fn defines(&self, include_main: bool) -> Vec<String> {
        let mut defines = match self {
            BuildVariant::BadOnly => vec!["-DOMITGOOD".to_string()],
            BuildVariant::GoodOnly => vec!["-DOMITBAD".to_string()],
            BuildVariant::Full => Vec::new(),
        };
        if include_main {
            defines.push("-DINCLUDEMAIN".to_string());
        }
        defines
    }

    pub fn label(&self) -> &'static str {
        match self {
            BuildVariant::BadOnly => "bad",
            BuildVariant::GoodOnly => "good",
            BuildVariant::Full => "full",
        }
    }

    /// Whether functions labeled bad are compiled in.
    pub fn has_bad(&self) -> bool {
        !matches!(self, BuildVariant::GoodOnly)
    }

    pub fn has_good(&self) -> bool {
        !matches!(self, BuildVariant::BadOnly)
    }
}

impl fmt::Display for BuildVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn default_compiler() -> String {
    "cc".to_string()
}

fn default_cxx_compiler() -> String {
    "c++".to_string()
}

fn default_support_sources() -> Vec<String> {
    vec!["io.c".to_string(), "std_thread.c".to_string()]
}

fn default_link_flags() -> Vec<String> {
    vec!["-lm".to_string(), "-lpthread".to_string()]
}

fn default_variants() -> Vec<BuildVariant> {
    vec![BuildVariant::Full]
}

fn default_include_main() -> bool {
    true
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("out/juliet/build")
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSettings {
    #[serde(default = "default_compiler")]
    pub compiler: String,
    #[serde(default = "default_cxx_compiler")]
    pub cxx_compiler: String,
    /// Juliet `testcasesupport` directory with `std_testcase.h` and `io.c`.
    #[serde(default)]
    pub support_dir: Option<PathBuf>,
    #[serde(default = "default_support_sources")]
    pub support_sources: Vec<String>,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default = "default_link_flags")]
    pub link_flags: Vec<String>,
    #[serde(default = "default_variants")]
    pub variants: Vec<BuildVariant>,
    #[serde(default = "default_include_main")]
    pub include_main: bool,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for BuildSettings {
    fn default() -> Self {
        BuildSettings {
            compiler: default_compiler(),
            cxx_compiler: default_cxx_compiler(),
            support_dir: None,
            support_sources: default_support_sources(),
            flags: Vec::new(),
            link_flags: default_link_flags(),
            variants: default_variants(),
            include_main: default_include_main(),
            output_dir: default_output_dir(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildJob {
    pub case: CaseId,
    pub variant: BuildVariant,
    pub program: String,
    pub args: Vec<String>,
    pub output: PathBuf,
}

impl BuildJob {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

fn shell_quote(arg: &str) -> String {
    if !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=+:,".contains(c))
    {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BuildPlan {
    pub jobs: Vec<BuildJob>,
}

impl BuildPlan {
    pub fn for_cases(cases: &[&TestCase], settings: &BuildSettings) -> BuildPlan {
        let jobs = cases
            .iter()
            .flat_map(|case| {
                settings
                    .variants
                    .iter()
                    .map(move |variant| job_for(case, *variant, settings))
            })
            .collect();
        BuildPlan { jobs }
    }

    pub fn job(&self, case: &CaseId, variant: BuildVariant) -> Option<&BuildJob> {
        self.jobs
            .iter()
            .find(|job| &job.case == case && job.variant == variant)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

pub fn artifact_path(settings: &BuildSettings, case: &CaseId, variant: BuildVariant) -> PathBuf {
    settings
        .output_dir
        .join(variant.label())
        .join(case.as_str())
}

pub fn job_for(case: &TestCase, variant: BuildVariant, settings: &BuildSettings) -> BuildJob {
    let program = if case.is_cpp() {
        settings.cxx_compiler.clone()
    } else {
        settings.compiler.clone()
    };

    let mut args = variant.defines(settings.include_main);
    args.extend(settings.flags.iter().cloned());
    if let Some(support) = &settings.support_dir {
        args.push(format!("-I{}", support.display()));
        for source in &settings.support_sources {
            args.push(support.join(source).display().to_string());
        }
    }
    for path in case.paths() {
        args.push(path.display().to_string());
    }
    let output = artifact_path(settings, &case.id, variant);
    args.push("-o".to_string());
    args.push(output.display().to_string());
    args.extend(settings.link_flags.iter().cloned());

    BuildJob {
        case: case.id.clone(),
        variant,
        program,
        args,
        output,
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildOutcome {
    Built(PathBuf),
    Failed { status: Option<i32>, stderr: String },
}

impl BuildOutcome {
    pub fn artifact(&self) -> Option<&Path> {
        match self {
            BuildOutcome::Built(path) => Some(path),
            BuildOutcome::Failed { .. } => None,
        }
    }
}

/// Runs the compiler for one job. Compiler failures are an outcome, not an
/// error; only failing to start the compiler is.
pub fn run_job(job: &BuildJob) -> Result<BuildOutcome> {
    if let Some(parent) = job.output.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create build output directory {}", parent.display()))?;
    }

    tracing::debug!(case = %job.case, variant = %job.variant, command = %job.command_line(), "building");
    let output = job
        .to_command()
        .output()
        .with_context(|| format!("run compiler `{}` for {}", job.program, job.case))?;

    if output.status.success() {
        Ok(BuildOutcome::Built(job.output.clone()))
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        tracing::warn!(case = %job.case, variant = %job.variant, status = ?output.status.code(), "build failed");
        Ok(BuildOutcome::Failed {
            status: output.status.code(),
            stderr,
        })
    }
}

//! Incomplete cleanup (CWE-459) model: a temporary file created with a
//! `mkstemp` style template, written, closed, and then either unlinked (good)
//! or left behind (bad).

use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

use super::{OracleVerdict, PathCheck, PathKind};

/// Temporary files still present in `dir` after the lifecycle ran.
fn run_lifecycle(dir: &Path, prefix: &str, unlink: bool) -> Result<Vec<String>> {
    let mut file = tempfile::Builder::new()
        .prefix(prefix)
        .rand_bytes(6)
        .tempfile_in(dir)
        .context("create temporary file")?;
    file.write_all(b"Temporary file").context("write temporary file")?;

    let path = file.into_temp_path();
    if unlink {
        path.close().context("unlink temporary file")?;
    } else {
        path.keep().context("close temporary file without unlinking")?;
    }

    let mut left = Vec::new();
    for entry in fs::read_dir(dir).context("list scratch directory")? {
        let name = entry.context("read scratch directory entry")?.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(prefix) {
            left.push(name.into_owned());
        }
    }
    Ok(left)
}

pub fn evaluate(paths: &[PathKind]) -> Result<OracleVerdict> {
    let scratch = tempfile::tempdir().context("create scratch directory")?;
    let mut checks = Vec::new();
    for path in paths {
        let (prefix, unlink) = match path {
            PathKind::Bad => ("bad", false),
            _ => ("good", true),
        };
        let mut check = PathCheck::new(*path);
        let left = run_lifecycle(scratch.path(), prefix, unlink)?;
        check.record(!left.is_empty(), || format!("left behind: {}", left.join(", ")));
        checks.push(check);
    }
    Ok(OracleVerdict::Checked(checks))
}

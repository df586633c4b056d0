//! On-disk cache of analyzer runs, one JSON envelope per run keyed by a
//! SHA-256 fingerprint of the analyzer configuration, the build variant and
//! the bytes of everything analyzed.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::analyzer::{AnalyzerRun, Invocation};
use crate::naming::CaseId;

const CACHE_VERSION: u32 = 1;
const CACHE_SUFFIX: &str = ".juliet-cache.json";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    pub clear: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            directory: PathBuf::from("out/juliet/cache"),
            clear: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum CacheMissReason {
    NotFound,
    Cleared,
    Invalid(String),
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub enum CacheStatus {
    Hit { fingerprint: String, created_timestamp: u64 },
    Miss { fingerprint: String, reason: CacheMissReason },
    Disabled,
}

impl CacheStatus {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheStatus::Hit { .. })
    }
}

#[derive(Serialize, Deserialize)]
struct CacheEnvelope {
    version: u32,
    fingerprint: String,
    analyzer: String,
    case: CaseId,
    created_timestamp: u64,
    run: AnalyzerRun,
}

pub struct ResultCache {
    config: CacheConfig,
    cleared: bool,
}

impl ResultCache {
    /// Opens the cache directory, emptying it first when `clear` is set.
    pub fn open(config: CacheConfig) -> Result<Self> {
        let mut cleared = false;
        if config.enabled {
            fs::create_dir_all(&config.directory).context("create cache directory")?;
            if config.clear {
                let mut removed = 0usize;
                for entry in fs::read_dir(&config.directory).context("list cache directory")? {
                    let path = entry.context("read cache directory entry")?.path();
                    let is_entry = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map_or(false, |n| n.ends_with(CACHE_SUFFIX));
                    if is_entry && fs::remove_file(&path).is_ok() {
                        removed += 1;
                    }
                }
                tracing::info!(removed, directory = %config.directory.display(), "cleared result cache");
                cleared = true;
            }
        }
        Ok(Self { config, cleared })
    }

    pub fn disabled() -> Self {
        Self {
            config: CacheConfig {
                enabled: false,
                ..Default::default()
            },
            cleared: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn entry_path(&self, fingerprint: &str) -> PathBuf {
        self.config
            .directory
            .join(format!("{fingerprint}{CACHE_SUFFIX}"))
    }

    pub fn lookup(&self, fingerprint: &str) -> Result<(Option<AnalyzerRun>, CacheStatus)> {
        if !self.config.enabled {
            return Ok((None, CacheStatus::Disabled));
        }

        let path = self.entry_path(fingerprint);
        let miss = |reason| CacheStatus::Miss {
            fingerprint: fingerprint.to_string(),
            reason,
        };

        match read_cache_envelope(&path)? {
            Some(envelope) => {
                if envelope.version == CACHE_VERSION && envelope.fingerprint == fingerprint {
                    let status = CacheStatus::Hit {
                        fingerprint: fingerprint.to_string(),
                        created_timestamp: envelope.created_timestamp,
                    };
                    Ok((Some(envelope.run), status))
                } else {
                    fs::remove_file(&path).ok();
                    Ok((
                        None,
                        miss(CacheMissReason::Invalid("fingerprint mismatch".to_string())),
                    ))
                }
            }
            None if path.exists() => {
                fs::remove_file(&path).ok();
                Ok((
                    None,
                    miss(CacheMissReason::Invalid("corrupt cache entry".to_string())),
                ))
            }
            None if self.cleared => Ok((None, miss(CacheMissReason::Cleared))),
            None => Ok((None, miss(CacheMissReason::NotFound))),
        }
    }

    /// Persists a run. Failing to write is logged, not fatal.
    pub fn store(&self, fingerprint: &str, analyzer: &str, case: &CaseId, run: &AnalyzerRun) {
        if !self.config.enabled {
            return;
        }
        let path = self.entry_path(fingerprint);
        let envelope = CacheEnvelope {
            version: CACHE_VERSION,
            fingerprint: fingerprint.to_string(),
            analyzer: analyzer.to_string(),
            case: case.clone(),
            created_timestamp: current_timestamp(),
            run: run.clone(),
        };
        if let Err(err) = write_cache_envelope(&path, &envelope) {
            tracing::warn!(path = %path.display(), error = %err, "failed to persist cache entry");
        }
    }
}

/// Fingerprint of one analyzer run: the analyzer's cache key, build
/// variant and preprocessor defines, the support directory, and the name and
/// contents of every file the analyzer sees.
pub fn run_fingerprint(analyzer_key: &str, invocation: &Invocation<'_>) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(CACHE_VERSION.to_le_bytes());
    hasher.update(analyzer_key.as_bytes());
    hasher.update(invocation.variant.label().as_bytes());
    for define in invocation.variant.defines(invocation.include_main) {
        hasher.update(define.as_bytes());
        hasher.update([0]);
    }
    if let Some(include) = invocation.include_dir {
        hasher.update(include.display().to_string().as_bytes());
    }
    hasher.update([0]);
    for file in &invocation.case.files {
        let bytes = fs::read(&file.path)
            .with_context(|| format!("read {} for fingerprint", file.path.display()))?;
        hasher.update(file.file_name().as_bytes());
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    if let Some(binary) = invocation.binary {
        let bytes = fs::read(binary)
            .with_context(|| format!("read {} for fingerprint", binary.display()))?;
        hasher.update(&bytes);
    }
    Ok(hex::encode(hasher.finalize()))
}

fn read_cache_envelope(path: &Path) -> Result<Option<CacheEnvelope>> {
    let data = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).context("read cache file"),
    };

    let envelope: CacheEnvelope = match serde_json::from_slice(&data) {
        Ok(env) => env,
        Err(_) => return Ok(None),
    };

    Ok(Some(envelope))
}

fn write_cache_envelope(path: &Path, envelope: &CacheEnvelope) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("create cache parent directory")?;
    }
    let mut file = File::create(path).context("create cache file")?;
    serde_json::to_writer_pretty(&mut file, envelope).context("write cache envelope")?;
    file.write_all(b"\n").ok();
    Ok(())
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::{Limits, RunOutcome};
    use crate::discovery::{CaseFile, TestCase};
    use crate::matrix::BuildVariant;
    use crate::naming::CaseName;
    use std::time::Duration;
    use tempfile::tempdir;

    fn run() -> AnalyzerRun {
        AnalyzerRun {
            findings: vec![crate::ToolFinding {
                rule_id: "r".into(),
                message: "m".into(),
                ..Default::default()
            }],
            elapsed: Duration::from_millis(5),
            peak_memory: 10,
            outcome: RunOutcome::Completed,
        }
    }

    fn case_id() -> CaseId {
        CaseName::parse("CWE459_Incomplete_Cleanup__char_18.c")
            .unwrap()
            .case_id()
    }

    #[test]
    fn store_then_hit() -> Result<()> {
        let dir = tempdir()?;
        let cache = ResultCache::open(CacheConfig {
            enabled: true,
            directory: dir.path().to_path_buf(),
            clear: false,
        })?;

        let (found, status) = cache.lookup("abc")?;
        assert!(found.is_none());
        assert_eq!(
            status,
            CacheStatus::Miss {
                fingerprint: "abc".into(),
                reason: CacheMissReason::NotFound
            }
        );

        cache.store("abc", "tool", &case_id(), &run());
        let (found, status) = cache.lookup("abc")?;
        assert_eq!(found, Some(run()));
        assert!(status.is_hit());
        Ok(())
    }

    #[test]
    fn corrupt_entries_and_clearing() -> Result<()> {
        let dir = tempdir()?;
        let config = CacheConfig {
            enabled: true,
            directory: dir.path().to_path_buf(),
            clear: false,
        };
        fs::write(dir.path().join(format!("bad{CACHE_SUFFIX}")), "{not json")?;
        let cache = ResultCache::open(config.clone())?;
        let (_, status) = cache.lookup("bad")?;
        assert!(matches!(
            status,
            CacheStatus::Miss {
                reason: CacheMissReason::Invalid(_),
                ..
            }
        ));

        cache.store("abc", "tool", &case_id(), &run());
        let cleared = ResultCache::open(CacheConfig {
            clear: true,
            ..config
        })?;
        let (found, status) = cleared.lookup("abc")?;
        assert!(found.is_none());
        assert!(matches!(
            status,
            CacheStatus::Miss {
                reason: CacheMissReason::Cleared,
                ..
            }
        ));
        Ok(())
    }

    #[test]
    fn disabled_cache_never_hits() -> Result<()> {
        let cache = ResultCache::disabled();
        cache.store("abc", "tool", &case_id(), &run());
        assert_eq!(cache.lookup("abc")?.1, CacheStatus::Disabled);
        Ok(())
    }

    #[test]
    fn fingerprint_depends_on_contents_and_build_context() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("CWE459_Incomplete_Cleanup__char_18.c");
        fs::write(&path, "void a() {}\n")?;
        let file = CaseFile::load(&path, CaseName::parse("CWE459_Incomplete_Cleanup__char_18.c").unwrap())?;
        let case = TestCase {
            id: file.name.case_id(),
            files: vec![file],
        };
        let support = dir.path().join("testcasesupport");
        let mut inv = Invocation {
            case: &case,
            variant: BuildVariant::Full,
            binary: None,
            scratch_dir: dir.path().join("scratch"),
            include_dir: None,
            include_main: false,
            limits: Limits::default(),
        };

        let full = run_fingerprint("tool", &inv)?;
        assert_eq!(full, run_fingerprint("tool", &inv)?);
        assert_ne!(full, run_fingerprint("other", &inv)?);

        inv.variant = BuildVariant::BadOnly;
        assert_ne!(full, run_fingerprint("tool", &inv)?);
        inv.variant = BuildVariant::Full;

        inv.include_main = true;
        let with_main = run_fingerprint("tool", &inv)?;
        assert_ne!(full, with_main);

        inv.include_dir = Some(support.as_path());
        assert_ne!(with_main, run_fingerprint("tool", &inv)?);
        inv.include_dir = None;
        inv.include_main = false;

        fs::write(&path, "void b() {}\n")?;
        assert_ne!(full, run_fingerprint("tool", &inv)?);
        Ok(())
    }
}

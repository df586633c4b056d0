//! Uncontrolled search path element (CWE-427) model.
//!
//! The sink hands `PATH=<data>` to `putenv`. The bad sources append whatever
//! they read; the good source appends a hardcoded system directory.

use super::{OracleVerdict, PathCheck, PathKind};
use crate::naming::{CaseName, SourceClass};

/// `wchar_t dataBuffer[250] = L"PATH=";`
const BUFFER_LEN: usize = 250;
const PREFIX: &str = "PATH=";
const GOOD_PATH: &str = "/bin";
const TRUSTED: &[&str] = &["/bin", "/usr/bin", "/sbin", "/usr/sbin"];

/// What the attacker-controlled sources can deliver.
const ATTACKER_INPUTS: &[&str] = &[
    "/tmp/evil",
    ".",
    "",
    "bin:/usr/bin",
    "/home/user/bin:/bin",
    "../../tmp",
    "/bin:/tmp",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Trusted,
    /// Empty or relative: resolved against the working directory.
    Relative,
    Untrusted,
}

pub fn classify_entry(entry: &str) -> EntryKind {
    if entry.is_empty() || !entry.starts_with('/') {
        EntryKind::Relative
    } else if TRUSTED.contains(&entry.trim_end_matches('/')) {
        EntryKind::Trusted
    } else {
        EntryKind::Untrusted
    }
}

/// Builds the environment string the sink installs, truncated the way the
/// fixed-size buffer truncates it (one slot for the terminator).
pub fn environment_string(data: &str) -> String {
    let room = BUFFER_LEN - PREFIX.len() - 1;
    let appended: String = data.chars().take(room).collect();
    format!("{PREFIX}{appended}")
}

/// Entries of a `PATH=` string that are not trusted system directories.
pub fn unsafe_entries(env: &str) -> Vec<String> {
    let value = env.strip_prefix(PREFIX).unwrap_or(env);
    value
        .split(':')
        .filter(|entry| classify_entry(entry) != EntryKind::Trusted)
        .map(str::to_string)
        .collect()
}

fn check(path: PathKind, inputs: &[&str]) -> PathCheck {
    let mut check = PathCheck::new(path);
    for input in inputs {
        let env = environment_string(input);
        let bad = unsafe_entries(&env);
        check.record(!bad.is_empty(), || format!("{env:?} -> {bad:?}"));
    }
    check
}

pub fn evaluate(name: &CaseName, paths: &[PathKind]) -> OracleVerdict {
    let attacker = match name.source_class() {
        SourceClass::External | SourceClass::Random => ATTACKER_INPUTS,
        _ => {
            return OracleVerdict::Unsupported(format!(
                "source {:?} is not modeled for search paths",
                name.source
            ))
        }
    };

    let checks = paths
        .iter()
        .map(|path| match path {
            PathKind::Bad => check(*path, attacker),
            _ => check(*path, &[GOOD_PATH]),
        })
        .collect();
    OracleVerdict::Checked(checks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_classified() {
        assert_eq!(classify_entry("/bin"), EntryKind::Trusted);
        assert_eq!(classify_entry("/usr/bin/"), EntryKind::Trusted);
        assert_eq!(classify_entry(""), EntryKind::Relative);
        assert_eq!(classify_entry("bin"), EntryKind::Relative);
        assert_eq!(classify_entry("/"), EntryKind::Untrusted);
        assert_eq!(classify_entry("/tmp/evil"), EntryKind::Untrusted);
    }

    #[test]
    fn hardcoded_path_is_safe() {
        assert!(unsafe_entries(&environment_string(GOOD_PATH)).is_empty());
        assert_eq!(
            unsafe_entries(&environment_string("/bin:/tmp")),
            vec!["/tmp".to_string()]
        );
    }

    #[test]
    fn long_input_is_truncated_to_the_buffer() {
        let long = "a".repeat(1000);
        let env = environment_string(&long);
        assert_eq!(env.chars().count(), BUFFER_LEN - 1);
        assert!(env.starts_with("PATH=aaa"));
    }

    #[test]
    fn console_source_reaches_untrusted_path() {
        let name = CaseName::parse("CWE427_Uncontrolled_Search_Path_Element__char_console_01.c").unwrap();
        let OracleVerdict::Checked(checks) = evaluate(&name, &[PathKind::Bad, PathKind::GoodG2B]) else {
            panic!("console sources are modeled");
        };
        assert!(checks[0].flaw_reached);
        assert_eq!(checks[0].samples, ATTACKER_INPUTS.len());
        assert!(checks[1].holds());
    }
}

//! Discovery of the jq executable and its version.

use crate::error::JqError;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

/// A parsed jq version banner such as `jq-1.7.1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JqVersion {
    pub major: u32,
    pub minor: u32,
    /// Anything after the minor version, e.g. `.1` or `-137-gabcdef`.
    pub suffix: String,
}

impl fmt::Display for JqVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "jq-{}.{}{}", self.major, self.minor, self.suffix)
    }
}

/// Find the jq executable.
///
/// With no explicit path, searches `PATH` for a `jq` binary. With an
/// explicit path, validates that the target actually reports a jq
/// version banner so arbitrary executables are rejected up front.
pub fn locate_jq(path: Option<&Path>) -> Result<PathBuf, JqError> {
    match path {
        None => {
            let search = env::var_os("PATH").unwrap_or_default();
            for dir in env::split_paths(&search) {
                if dir.as_os_str().is_empty() {
                    continue;
                }
                let candidate = dir.join("jq");
                if candidate.is_file() && is_executable(&candidate) {
                    return Ok(candidate);
                }
            }
            Err(JqError::NotFound)
        }
        Some(path) => {
            check_version(path)?;
            Ok(path.to_path_buf())
        }
    }
}

/// Run `jq --version` and parse the banner.
pub fn check_version(bin: &Path) -> Result<JqVersion, JqError> {
    let output = Command::new(bin)
        .arg("--version")
        .output()
        .map_err(JqError::Launch)?;
    let mut banner = String::from_utf8_lossy(&output.stdout).into_owned();
    if banner.trim().is_empty() {
        banner = String::from_utf8_lossy(&output.stderr).into_owned();
    }
    parse_version(&banner)
}

/// Parse a version banner of the form `jq-MAJOR.MINOR[suffix]`. The
/// older `jq version MAJOR.MINOR` form is also accepted.
pub fn parse_version(banner: &str) -> Result<JqVersion, JqError> {
    let banner = banner.trim();
    let bad = || JqError::BadVersion(banner.to_string());

    let rest = banner
        .strip_prefix("jq-")
        .or_else(|| banner.strip_prefix("jq version "))
        .ok_or_else(bad)?;

    let (major, rest) = take_number(rest).ok_or_else(bad)?;
    let rest = rest.strip_prefix('.').ok_or_else(bad)?;
    let (minor, suffix) = take_number(rest).ok_or_else(bad)?;

    Ok(JqVersion {
        major,
        minor,
        suffix: suffix.to_string(),
    })
}

/// Split a leading run of digits off `s`, returning the parsed value and
/// the remainder. None when `s` does not start with a digit.
fn take_number(s: &str) -> Option<(u32, &str)> {
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let value = s[..end].parse().ok()?;
    Some((value, &s[end..]))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(_path: &Path) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_patch() {
        let v = parse_version("jq-1.7.1").unwrap();
        assert_eq!((v.major, v.minor), (1, 7));
        assert_eq!(v.suffix, ".1");
    }

    #[test]
    fn test_parse_version_bare() {
        let v = parse_version("jq-1.3\n").unwrap();
        assert_eq!((v.major, v.minor), (1, 3));
        assert_eq!(v.suffix, "");
    }

    #[test]
    fn test_parse_version_spelled_out() {
        let v = parse_version("jq version 1.8").unwrap();
        assert_eq!((v.major, v.minor), (1, 8));
    }

    #[test]
    fn test_parse_version_git_describe() {
        let v = parse_version("jq-1.6-137-gfa6a2ff").unwrap();
        assert_eq!((v.major, v.minor), (1, 6));
        assert_eq!(v.suffix, "-137-gfa6a2ff");
    }

    #[test]
    fn test_parse_version_rejects_other_tools() {
        assert!(parse_version("sed (GNU sed) 4.8").is_err());
        assert!(parse_version("jq-x.y").is_err());
        assert!(parse_version("jq-1").is_err());
        assert!(parse_version("").is_err());
    }

    #[test]
    fn test_version_display_round_trip() {
        let v = parse_version("jq-1.7.1").unwrap();
        assert_eq!(v.to_string(), "jq-1.7.1");
    }
}

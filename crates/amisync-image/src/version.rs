//! Version coercion and canonical keys.
//!
//! Inventory names and user input carry versions in loose forms (`v6.4`,
//! `6.4.1 GA`, `build 7.0`). Everything is coerced to a strict semantic
//! version before it is used as a cache key or substituted into a template
//! key pattern.

use std::cmp::Ordering;
use std::sync::LazyLock;

use amisync_common::error::{AmisyncError, Result};
use regex::Regex;
use semver::Version;

// First run of up to three dot-separated numeric components not glued to
// other digits. Components are capped at 16 digits.
static COERCE_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^\d])(\d{1,16})(?:\.(\d{1,16}))?(?:\.(\d{1,16}))?(?:$|[^\d])").ok()
});

/// Coerces `input` into a strict semantic version.
///
/// Missing minor or patch components default to zero; pre-release and build
/// suffixes are dropped.
///
/// # Errors
///
/// Returns `AmisyncError::InvalidVersion` if no numeric version can be found.
pub fn coerce(input: &str) -> Result<Version> {
    let invalid = || AmisyncError::InvalidVersion {
        version: input.to_owned(),
    };
    let caps = COERCE_RE
        .as_ref()
        .and_then(|re| re.captures(input))
        .ok_or_else(invalid)?;
    let component = |idx: usize| -> Result<u64> {
        caps.get(idx)
            .map_or(Ok(0), |m| m.as_str().parse().map_err(|_| invalid()))
    };
    Ok(Version::new(component(1)?, component(2)?, component(3)?))
}

/// Returns the canonical `major.minor.patch` form of `input`.
///
/// # Errors
///
/// Returns `AmisyncError::InvalidVersion` if `input` cannot be coerced.
pub fn canonical(input: &str) -> Result<String> {
    coerce(input).map(|v| v.to_string())
}

/// Returns the dense numeric key of `input`: the canonical form with its
/// separators removed (`6.2.3` becomes `623`).
///
/// # Errors
///
/// Returns `AmisyncError::InvalidVersion` if `input` cannot be coerced.
pub fn normalize(input: &str) -> Result<String> {
    canonical(input).map(|v| v.replace('.', ""))
}

/// Orders two version strings by their coerced semantic versions.
///
/// Inputs that cannot be coerced sort below those that can, and fall back
/// to plain string order among themselves.
pub fn compare(a: &str, b: &str) -> Ordering {
    match (coerce(a), coerce(b)) {
        (Ok(va), Ok(vb)) => va.cmp(&vb).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Returns `versions` sorted from highest to lowest.
pub fn sorted_descending(versions: &[String]) -> Vec<String> {
    let mut sorted = versions.to_vec();
    sorted.sort_by(|a, b| compare(b, a));
    sorted
}

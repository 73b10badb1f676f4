//! Version comparison and requirement matching.
//!
//! Formula versions are "semver-ish": `1.2.3`, `3.9`, `2024.01.15`,
//! `1.0.0-rc.1`. Anything with up to three leading numeric segments is
//! coerced into a [`semver::Version`]; everything else falls back to a
//! segment-wise numeric comparison.

use std::cmp::Ordering;

/// Compare two version strings.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    if let (Some(va), Some(vb)) = (coerce(a), coerce(b)) {
        return va.cmp(&vb);
    }

    let parse = |v: &str| -> Vec<u64> {
        v.split(['.', '-', '_'])
            .map_while(|s| s.parse::<u64>().ok())
            .collect()
    };

    let a_parts = parse(a);
    let b_parts = parse(b);

    for i in 0..std::cmp::max(a_parts.len(), b_parts.len()) {
        let av = a_parts.get(i).unwrap_or(&0);
        let bv = b_parts.get(i).unwrap_or(&0);
        match av.cmp(bv) {
            Ordering::Equal => {}
            other => return other,
        }
    }

    // Stable (no suffix) sorts after a pre-release with the same numbers.
    let has_suffix = |v: &str| v.contains('-') || v.chars().any(char::is_alphabetic);
    match (has_suffix(a), has_suffix(b)) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => a.cmp(b),
    }
}

/// Returns true if `latest` is newer than `current`.
pub fn is_newer(current: &str, latest: &str) -> bool {
    compare_versions(latest, current) == Ordering::Greater
}

/// Check if a version satisfies a requirement using semver.
/// Falls back to segment-based prefix matching for non-semver specs.
pub fn version_satisfies_requirement(version: &str, requirement: &str) -> bool {
    let requirement = requirement.trim();
    if requirement.is_empty() || requirement == "latest" || requirement == "*" {
        return true;
    }

    if version == requirement {
        return true;
    }

    if let (Some(ver), Ok(req)) = (coerce(version), semver::VersionReq::parse(requirement)) {
        return req.matches(&ver);
    }

    version_matches_segments(version, requirement)
}

/// Check if a version string matches a requirement by comparing segments.
/// "0.2" matches "0.2.0", "0.2.1" but NOT "0.20.0"
pub fn version_matches_segments(version: &str, requirement: &str) -> bool {
    let v_parts: Vec<&str> = version.split('.').collect();
    let r_parts: Vec<&str> = requirement.split('.').collect();

    if r_parts.len() > v_parts.len() {
        return false;
    }

    r_parts.iter().zip(v_parts.iter()).all(|(r, v)| r == v)
}

/// Coerce a loose version into semver by padding missing segments.
///
/// `3.9` becomes `3.9.0`, `2.1-beta` becomes `2.1.0-beta`. Versions with more
/// than three numeric segments, or a non-numeric head, are rejected.
fn coerce(v: &str) -> Option<semver::Version> {
    if let Ok(parsed) = semver::Version::parse(v) {
        return Some(parsed);
    }

    let (numeric, suffix) = match v.find(['-', '+']) {
        Some(idx) => (&v[..idx], &v[idx..]),
        None => (v, ""),
    };

    let segments: Vec<&str> = numeric.split('.').collect();
    if segments.is_empty()
        || segments.len() > 3
        || segments
            .iter()
            .any(|s| s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()))
    {
        return None;
    }

    let mut padded: Vec<String> = segments
        .iter()
        .map(|s| s.trim_start_matches('0'))
        .map(|s| if s.is_empty() { "0".to_string() } else { s.to_string() })
        .collect();
    while padded.len() < 3 {
        padded.push("0".to_string());
    }

    semver::Version::parse(&format!("{}{suffix}", padded.join("."))).ok()
}

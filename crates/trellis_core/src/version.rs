//! Framework version specifiers.
//!
//! Framework releases follow semantic versioning, but the compatibility unit
//! is the minor line: `1.70.x` and `1.71.x` can differ in public API. Carets
//! therefore keep `major.minor` fixed, and a bare `major.minor` selects the
//! newest patch of that line. Every other comparator follows semver.

use crate::error::{CoreError, CoreResult};
use once_cell::sync::Lazy;
use regex::Regex;
use semver::{Comparator, Op, VersionReq};
use std::fmt;
use std::str::FromStr;

pub use semver::Version;

static MINOR_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\.(\d+)$").expect("valid regex"));

/// What version of a framework distribution to use
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum VersionSpec {
    /// Newest stable release
    #[default]
    Latest,
    /// One specific release
    Exact(Version),
    /// Newest stable release satisfying every comparator
    Range {
        /// Specifier as written
        raw: String,
        /// Normalized requirement
        req: VersionReq,
    },
}

impl VersionSpec {
    /// Parse a specifier: `latest`, an exact version, or a range
    ///
    /// # Errors
    ///
    /// Returns error if the specifier is empty or not a valid range
    pub fn parse(s: &str) -> CoreResult<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(invalid(s, "empty specifier"));
        }
        if trimmed.eq_ignore_ascii_case("latest") {
            return Ok(Self::Latest);
        }
        if let Ok(version) = Version::parse(trimmed) {
            return Ok(Self::Exact(version));
        }
        if let Some(caps) = MINOR_LINE.captures(trimmed) {
            let major = parse_component(s, &caps[1])?;
            let minor = parse_component(s, &caps[2])?;
            return Ok(Self::Range {
                raw: trimmed.to_string(),
                req: minor_line(s, major, minor, 0)?,
            });
        }
        if trimmed.contains("||") {
            return Err(invalid(s, "alternative ranges ('||') are not supported"));
        }

        let mut comparators = Vec::new();
        for token in tokenize(trimmed) {
            if token == "*" || token.eq_ignore_ascii_case("x") {
                continue;
            }
            let comparator = Comparator::parse(&token).map_err(|e| invalid(s, &e.to_string()))?;
            match (comparator.op, comparator.minor) {
                (Op::Caret, Some(minor)) if comparator.pre.is_empty() => {
                    let line = minor_line(s, comparator.major, minor, comparator.patch.unwrap_or(0))?;
                    comparators.extend(line.comparators);
                }
                _ => comparators.push(comparator),
            }
        }

        Ok(Self::Range {
            raw: trimmed.to_string(),
            req: VersionReq { comparators },
        })
    }

    /// Pick the release this specifier resolves to
    ///
    /// Only stable releases are candidates for `latest` and ranges; an exact
    /// version is used verbatim when the catalog lists it. The result depends
    /// only on the set of candidates, never on their order.
    #[must_use]
    pub fn select<'a, I>(&self, candidates: I) -> Option<Version>
    where
        I: IntoIterator<Item = &'a Version>,
    {
        match self {
            Self::Latest => candidates.into_iter().filter(|v| v.pre.is_empty()).max().cloned(),
            Self::Exact(wanted) => candidates.into_iter().find(|v| *v == wanted).cloned(),
            Self::Range { req, .. } => candidates
                .into_iter()
                .filter(|v| v.pre.is_empty() && req.matches(v))
                .max()
                .cloned(),
        }
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Exact(version) => write!(f, "{}", version),
            Self::Range { raw, .. } => f.write_str(raw),
        }
    }
}

impl FromStr for VersionSpec {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// `>=major.minor.patch, <major.(minor+1).0`
fn minor_line(specifier: &str, major: u64, minor: u64, patch: u64) -> CoreResult<VersionReq> {
    let next = minor
        .checked_add(1)
        .ok_or_else(|| invalid(specifier, "minor version has no successor"))?;
    let bound = |op, minor, patch| Comparator {
        op,
        major,
        minor: Some(minor),
        patch: Some(patch),
        pre: semver::Prerelease::EMPTY,
    };
    Ok(VersionReq {
        comparators: vec![bound(Op::GreaterEq, minor, patch), bound(Op::Less, next, 0)],
    })
}

/// Split on commas and whitespace, gluing a bare operator to the version after it
fn tokenize(s: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut pending_op = String::new();
    for part in s.split(|c: char| c == ',' || c.is_whitespace()).filter(|p| !p.is_empty()) {
        if part.chars().all(|c| matches!(c, '<' | '>' | '=' | '~' | '^')) {
            pending_op.push_str(part);
            continue;
        }
        tokens.push(format!("{}{}", std::mem::take(&mut pending_op), part));
    }
    if !pending_op.is_empty() {
        tokens.push(pending_op);
    }
    tokens
}

fn parse_component(specifier: &str, digits: &str) -> CoreResult<u64> {
    digits
        .parse()
        .map_err(|_| invalid(specifier, "version component out of range"))
}

fn invalid(specifier: &str, reason: &str) -> CoreError {
    CoreError::InvalidSpecifier {
        specifier: specifier.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn catalog(versions: &[&str]) -> Vec<Version> {
        versions.iter().map(|v| Version::parse(v).unwrap()).collect()
    }

    fn pick(spec: &str, versions: &[&str]) -> Option<String> {
        VersionSpec::parse(spec)
            .unwrap()
            .select(&catalog(versions))
            .map(|v| v.to_string())
    }

    const CATALOG: &[&str] = &["1.69.0", "1.70.0", "1.70.5", "1.71.0"];

    #[test]
    fn test_caret_stays_on_minor_line() {
        assert_eq!(pick("^1.70.0", CATALOG), Some("1.70.5".to_string()));
        assert_eq!(pick("^1.71.0", CATALOG), Some("1.71.0".to_string()));
        assert_eq!(pick("^1.72.0", CATALOG), None);
    }

    #[test]
    fn test_exact_version() {
        assert_eq!(pick("1.70.0", CATALOG), Some("1.70.0".to_string()));
        assert_eq!(pick("1.70.1", CATALOG), None);
    }

    #[test]
    fn test_latest_skips_prereleases() {
        assert_eq!(pick("latest", &["1.70.0", "1.72.0-SNAPSHOT"]), Some("1.70.0".to_string()));
        assert_eq!(pick("LATEST", CATALOG), Some("1.71.0".to_string()));
        assert_eq!(pick("latest", &[]), None);
    }

    #[test]
    fn test_exact_prerelease_is_verbatim() {
        let versions = &["1.70.0", "1.72.0-SNAPSHOT"];
        assert_eq!(pick("1.72.0-SNAPSHOT", versions), Some("1.72.0-SNAPSHOT".to_string()));
    }

    #[test]
    fn test_minor_line_shorthand() {
        assert_eq!(pick("1.70", CATALOG), Some("1.70.5".to_string()));
        assert_eq!(pick("1.68", CATALOG), None);
    }

    #[test]
    fn test_comparator_ranges() {
        assert_eq!(pick(">=1.69.0, <1.71.0", CATALOG), Some("1.70.5".to_string()));
        assert_eq!(pick(">= 1.69.0 < 1.70.5", CATALOG), Some("1.70.0".to_string()));
        assert_eq!(pick("~1.69", CATALOG), Some("1.69.0".to_string()));
        assert_eq!(pick("1.x", CATALOG), Some("1.71.0".to_string()));
        assert_eq!(pick("*", CATALOG), Some("1.71.0".to_string()));
        assert_eq!(pick(">1.71.0", CATALOG), None);
    }

    #[test]
    fn test_parse_errors() {
        assert!(VersionSpec::parse("").is_err());
        assert!(VersionSpec::parse("newest").is_err());
        assert!(VersionSpec::parse("^1.70.0 || ^1.71.0").is_err());
    }

    #[test]
    fn test_minor_line_at_maximum_minor_is_rejected() {
        let max = u64::MAX;
        for spec in [format!("1.{}", max), format!("^1.{}.0", max)] {
            let err = VersionSpec::parse(&spec).unwrap_err();
            assert!(matches!(err, CoreError::InvalidSpecifier { ref specifier, .. } if *specifier == spec));
        }
        assert!(VersionSpec::parse(&format!("^1.{}.0", max - 1)).is_ok());
    }

    #[test]
    fn test_display() {
        assert_eq!(VersionSpec::Latest.to_string(), "latest");
        assert_eq!(VersionSpec::parse("1.70.5").unwrap().to_string(), "1.70.5");
        assert_eq!(VersionSpec::parse(" ^1.70.0 ").unwrap().to_string(), "^1.70.0");
    }

    fn arb_version() -> impl Strategy<Value = Version> {
        (0u64..3, 0u64..80, 0u64..10).prop_map(|(a, b, c)| Version::new(a, b, c))
    }

    fn arb_spec() -> impl Strategy<Value = VersionSpec> {
        prop_oneof![
            Just(VersionSpec::Latest),
            arb_version().prop_map(VersionSpec::Exact),
            arb_version().prop_map(|v| VersionSpec::parse(&format!("^{}", v)).unwrap()),
            arb_version().prop_map(|v| VersionSpec::parse(&format!(">={}", v)).unwrap()),
        ]
    }

    proptest! {
        #[test]
        fn prop_selection_is_order_independent(
            spec in arb_spec(),
            versions in proptest::collection::vec(arb_version(), 0..24),
        ) {
            let forward = spec.select(&versions);
            let mut reversed = versions.clone();
            reversed.reverse();
            prop_assert_eq!(forward.clone(), spec.select(&reversed));
            prop_assert_eq!(forward, spec.select(&versions));
        }

        #[test]
        fn prop_selected_version_is_a_candidate(
            spec in arb_spec(),
            versions in proptest::collection::vec(arb_version(), 0..24),
        ) {
            if let Some(selected) = spec.select(&versions) {
                prop_assert!(versions.contains(&selected));
            }
        }
    }
}

//! Version Resolver: pick the history entry that fits a platform version.
//!
//! Constraint syntax follows the range dialect used by app manifests:
//! `||` separated alternatives, each a comma/space separated conjunction of
//! comparators (`=`, `!=`, `>`, `>=`, `<`, `<=`, `~`, `^`), wildcards (`1.2.x`, `*`)
//! and hyphen ranges (`1.2 - 1.4.5`). A prerelease version only satisfies a
//! comparator that itself carries a prerelease.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use semver::{BuildMetadata, Prerelease, Version};
use tracing::{debug, warn};

use crate::{ApplicationEntry, ApplicationRecord, LATEST_KEY};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("invalid platform version: {0}")]
    InvalidPlatformVersion(String),
    #[error("invalid constraint {constraint:?} on {app}")]
    InvalidConstraint { app: String, constraint: String },
    #[error("no matching version for {app}")]
    NoMatch { app: String },
}

/// Lenient version parse: optional `v` prefix, missing minor/patch padded with zero.
pub fn parse_version(raw: &str) -> Option<Version> {
    let p = PartialVersion::parse(raw)?;
    if p.wildcard() { return None; }
    Some(p.floor())
}

pub fn parse_platform(raw: &str) -> Result<Version, ResolveError> {
    parse_version(raw).ok_or_else(|| ResolveError::InvalidPlatformVersion(raw.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PartialVersion {
    major: Option<u64>,
    minor: Option<u64>,
    patch: Option<u64>,
    pre: Prerelease,
}

impl PartialVersion {
    fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim();
        let s = s.strip_prefix(['v', 'V']).unwrap_or(s);
        if s.is_empty() { return None; }
        let s = s.split_once('+').map(|(core, _)| core).unwrap_or(s);
        let (core, pre) = match s.split_once('-') {
            Some((core, pre)) => (core, Prerelease::new(pre).ok()?),
            None => (s, Prerelease::EMPTY),
        };
        let mut parts = [None; 3];
        let mut wild = false;
        let mut n = 0;
        for piece in core.split('.') {
            if n == 3 { return None; }
            if matches!(piece, "x" | "X" | "*") {
                wild = true;
            } else {
                // numbers after a wildcard are meaningless
                if wild || piece.is_empty() || !piece.bytes().all(|b| b.is_ascii_digit()) { return None; }
                parts[n] = Some(piece.parse().ok()?);
            }
            n += 1;
        }
        Some(Self { major: parts[0], minor: parts[1], patch: parts[2], pre })
    }

    fn wildcard(&self) -> bool { self.major.is_none() }

    /// Lowest version this partial stands for.
    fn floor(&self) -> Version {
        Version {
            major: self.major.unwrap_or(0),
            minor: self.minor.unwrap_or(0),
            patch: self.patch.unwrap_or(0),
            pre: self.pre.clone(),
            build: BuildMetadata::EMPTY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Tilde,
    Caret,
}

#[derive(Debug, Clone)]
struct Comparator {
    op: Op,
    /// `None` for `*` / `x`
    ver: Option<PartialVersion>,
}

fn v3(major: u64, minor: u64, patch: u64) -> Version { Version::new(major, minor, patch) }

impl Comparator {
    fn parse(token: &str) -> Option<Self> {
        let ops = [
            (">=", Op::Ge),
            ("=>", Op::Ge),
            ("<=", Op::Le),
            ("=<", Op::Le),
            ("!=", Op::Ne),
            ("~>", Op::Tilde),
            (">", Op::Gt),
            ("<", Op::Lt),
            ("=", Op::Eq),
            ("~", Op::Tilde),
            ("^", Op::Caret),
        ];
        let (op, rest) = ops
            .iter()
            .find_map(|(p, op)| token.strip_prefix(p).map(|rest| (*op, rest)))
            .unwrap_or((Op::Eq, token));
        let rest = rest.trim();
        if matches!(rest, "*" | "x" | "X") {
            return Some(Self { op, ver: None });
        }
        let ver = PartialVersion::parse(rest)?;
        Some(Self { op, ver: (!ver.wildcard()).then_some(ver) })
    }

    fn matches(&self, v: &Version) -> bool {
        let Some(c) = &self.ver else {
            return v.pre.is_empty() && self.op != Op::Ne;
        };
        if !v.pre.is_empty() && c.pre.is_empty() { return false; }
        let floor = c.floor();
        let (maj, min) = (floor.major, floor.minor);
        match self.op {
            Op::Eq => within_prefix(c, v),
            Op::Ne => !within_prefix(c, v),
            Op::Gt => match (c.minor, c.patch) {
                (None, _) => v.major > maj,
                (Some(_), None) => (v.major, v.minor) > (maj, min),
                _ => cmp(v, &floor) == Ordering::Greater,
            },
            Op::Ge => cmp(v, &floor) != Ordering::Less,
            Op::Lt => cmp(v, &floor) == Ordering::Less,
            Op::Le => match (c.minor, c.patch) {
                (None, _) => v.major <= maj,
                (Some(_), None) => (v.major, v.minor) <= (maj, min),
                _ => cmp(v, &floor) != Ordering::Greater,
            },
            Op::Tilde => {
                let upper = if c.minor.is_none() { ceiling(maj, None, None) } else { ceiling(maj, Some(min), None) };
                cmp(v, &floor) != Ordering::Less && below(v, upper.as_ref())
            }
            Op::Caret => {
                let upper = if maj > 0 || c.minor.is_none() {
                    ceiling(maj, None, None)
                } else if min > 0 || c.patch.is_none() {
                    ceiling(0, Some(min), None)
                } else {
                    ceiling(0, Some(0), Some(floor.patch))
                };
                cmp(v, &floor) != Ordering::Less && below(v, upper.as_ref())
            }
        }
    }
}

// Exact for full versions, prefix match for partial ones (`1.2` == `1.2.x`).
fn within_prefix(c: &PartialVersion, v: &Version) -> bool {
    match (c.minor, c.patch) {
        (None, _) => c.major == Some(v.major),
        (Some(min), None) => c.major == Some(v.major) && min == v.minor,
        _ => cmp(v, &c.floor()) == Ordering::Equal,
    }
}

fn cmp(a: &Version, b: &Version) -> Ordering { a.cmp_precedence(b) }

// Exclusive bound just past the innermost given component. An overflowing component carries
// into the next one out; `None` means unbounded.
fn ceiling(major: u64, minor: Option<u64>, patch: Option<u64>) -> Option<Version> {
    match (minor, patch) {
        (Some(n), Some(p)) => p.checked_add(1).map(|p| v3(major, n, p)).or_else(|| ceiling(major, Some(n), None)),
        (Some(n), None) => n.checked_add(1).map(|n| v3(major, n, 0)).or_else(|| ceiling(major, None, None)),
        (None, _) => major.checked_add(1).map(|m| v3(m, 0, 0)),
    }
}

fn below(v: &Version, upper: Option<&Version>) -> bool { upper.map_or(true, |u| cmp(v, u) == Ordering::Less) }

/// A parsed constraint expression.
#[derive(Debug, Clone)]
pub struct Constraint {
    alternatives: Vec<Vec<Comparator>>,
}

impl Constraint {
    pub fn parse(expr: &str) -> Option<Self> {
        let mut alternatives = Vec::new();
        for group in expr.split("||") {
            let tokens = tokenize(group);
            if tokens.is_empty() { return None; }
            let mut comps = Vec::with_capacity(tokens.len());
            let mut i = 0;
            while i < tokens.len() {
                // hyphen range: `a - b`
                if i + 2 < tokens.len() && tokens[i + 1] == "-" {
                    let lo = PartialVersion::parse(&tokens[i])?;
                    let hi = PartialVersion::parse(&tokens[i + 2])?;
                    comps.push(Comparator { op: Op::Ge, ver: Some(lo) });
                    comps.push(Comparator { op: Op::Le, ver: Some(hi) });
                    i += 3;
                    continue;
                }
                comps.push(Comparator::parse(&tokens[i])?);
                i += 1;
            }
            alternatives.push(comps);
        }
        Some(Self { alternatives })
    }

    pub fn matches(&self, v: &Version) -> bool {
        self.alternatives.iter().any(|group| group.iter().all(|c| c.matches(v)))
    }
}

// Split on commas and whitespace, gluing a bare operator onto the version after it.
fn tokenize(group: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut pending_op: Option<String> = None;
    for raw in group.split(|c: char| c == ',' || c.is_whitespace()).filter(|t| !t.is_empty()) {
        let is_op = raw != "-" && raw.chars().all(|c| matches!(c, '<' | '>' | '=' | '!' | '~' | '^'));
        if is_op {
            pending_op = Some(raw.to_string());
            continue;
        }
        match pending_op.take() {
            Some(op) => out.push(format!("{op}{raw}")),
            None => out.push(raw.to_string()),
        }
    }
    if let Some(op) = pending_op { out.push(op); }
    out
}

/// Does `entry` declare a platform constraint that `platform` satisfies?
pub fn entry_matches(entry: &ApplicationEntry, platform: &Version) -> Result<bool, ResolveError> {
    for expr in entry.platform_constraints() {
        let constraint = Constraint::parse(expr)
            .ok_or_else(|| ResolveError::InvalidConstraint { app: entry.name.clone(), constraint: expr.to_string() })?;
        if constraint.matches(platform) { return Ok(true); }
    }
    Ok(false)
}

/// Greatest satisfying entry, or `None` when nothing matches.
///
/// History is scanned in key order and a candidate replaces the current best only when its
/// version is strictly greater, so ties go to the lexicographically first key.
pub fn select<'a>(record: &'a ApplicationRecord, platform: &Version) -> Result<Option<&'a ApplicationEntry>, ResolveError> {
    let mut best: Option<(Version, &ApplicationEntry)> = None;
    for (key, entry) in &record.history {
        if !entry_matches(entry, platform)? { continue; }
        let Some(ver) = parse_version(&entry.version) else {
            debug!(app = %record.name, key = %key, version = %entry.version, "resolve: skipping unparsable entry version");
            continue;
        };
        let replace = match &best {
            None => true,
            Some((cur, _)) => cmp(&ver, cur) == Ordering::Greater,
        };
        if replace { best = Some((ver, entry)); }
    }
    Ok(best.map(|(_, e)| e))
}

// `latest`, or the highest parsable version when the slot is missing.
fn fallback(record: &ApplicationRecord) -> Option<&ApplicationEntry> {
    record.history.get(LATEST_KEY).or_else(|| {
        record
            .history
            .values()
            .filter_map(|e| parse_version(&e.version).map(|v| (v, e)))
            .max_by(|a, b| cmp(&a.0, &b.0))
            .map(|(_, e)| e)
            .or_else(|| record.history.values().next())
    })
}

/// Best entry for `platform`, falling back to `latest` when no constraint is satisfied.
pub fn resolve(record: &ApplicationRecord, platform: &str) -> Result<ApplicationEntry, ResolveError> {
    let v = parse_platform(platform)?;
    resolve_parsed(record, &v)
}

fn resolve_parsed(record: &ApplicationRecord, v: &Version) -> Result<ApplicationEntry, ResolveError> {
    match select(record, v)? {
        Some(e) => Ok(e.clone()),
        None => fallback(record).cloned().ok_or_else(|| ResolveError::NoMatch { app: record.name.clone() }),
    }
}

/// Best entry for `platform`; `NoMatch` when nothing satisfies.
pub fn resolve_strict(record: &ApplicationRecord, platform: &str) -> Result<ApplicationEntry, ResolveError> {
    let v = parse_platform(platform)?;
    select(record, &v)?.cloned().ok_or_else(|| ResolveError::NoMatch { app: record.name.clone() })
}

fn resolve_pairs<'a, I>(records: I, platform: &str) -> Result<Vec<(String, ApplicationEntry)>, ResolveError>
where
    I: IntoIterator<Item = &'a ApplicationRecord>,
{
    let v = parse_platform(platform)?;
    let mut out = Vec::new();
    for record in records {
        match resolve_parsed(record, &v) {
            Ok(e) => out.push((record.name.clone(), e)),
            Err(err @ ResolveError::InvalidConstraint { .. }) => {
                warn!(app = %record.name, error = %err, "resolve: falling back to latest");
                if let Some(e) = fallback(record) { out.push((record.name.clone(), e.clone())); }
            }
            Err(err) => warn!(app = %record.name, error = %err, "resolve: skipped"),
        }
    }
    Ok(out)
}

/// Resolve every record, keyed by name. Only a malformed `platform` fails the batch; a record
/// whose constraints cannot be parsed falls back to its `latest` entry.
pub fn resolve_all<'a, I>(records: I, platform: &str) -> Result<BTreeMap<String, ApplicationEntry>, ResolveError>
where
    I: IntoIterator<Item = &'a ApplicationRecord>,
{
    Ok(resolve_pairs(records, platform)?.into_iter().collect())
}

/// [`resolve_all`] keeping the input order.
pub fn resolve_each<'a, I>(records: I, platform: &str) -> Result<Vec<ApplicationEntry>, ResolveError>
where
    I: IntoIterator<Item = &'a ApplicationRecord>,
{
    Ok(resolve_pairs(records, platform)?.into_iter().map(|(_, e)| e).collect())
}

/// Strict variant in input order: records with no satisfying entry are omitted.
pub fn filter_all<'a, I>(records: I, platform: &str) -> Result<Vec<ApplicationEntry>, ResolveError>
where
    I: IntoIterator<Item = &'a ApplicationRecord>,
{
    let v = parse_platform(platform)?;
    let mut out = Vec::new();
    for record in records {
        match select(record, &v) {
            Ok(Some(e)) => out.push(e.clone()),
            Ok(None) => {}
            Err(err) => warn!(app = %record.name, error = %err, "resolve: omitted"),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Dependency;

    fn entry(name: &str, version: &str, constraint: &str) -> ApplicationEntry {
        let mut e = ApplicationEntry { name: name.into(), version: version.into(), ..Default::default() };
        if !constraint.is_empty() {
            e.options.dependencies.push(Dependency { name: "olares".into(), version: constraint.into(), kind: "system".into() });
        }
        e
    }

    fn record(latest: ApplicationEntry, others: Vec<ApplicationEntry>) -> ApplicationRecord {
        let mut rec = ApplicationRecord::from_entry(&latest);
        for e in others { rec.history.insert(e.version.clone(), e); }
        rec
    }

    fn sample() -> ApplicationRecord {
        record(entry("foo", "3.0.0", ">=3.0.0"), vec![entry("foo", "1.5.0", ">=1.0.0,<2.0.0"), entry("foo", "2.1.0", ">=2.0.0")])
    }

    fn c(expr: &str, v: &str) -> bool {
        Constraint::parse(expr).unwrap().matches(&parse_version(v).unwrap())
    }

    #[test]
    fn picks_entry_for_platform() {
        let rec = sample();
        assert_eq!(resolve(&rec, "1.8.0").unwrap().version, "1.5.0");
        // 2.1.0 and 3.0.0 (>=2.0.0 / >=3.0.0) are both candidates for 3.5.0
        assert_eq!(resolve(&rec, "3.5.0").unwrap().version, "3.0.0");
        let rec2 = record(entry("foo", "2.1.0", ">=2.0.0"), vec![entry("foo", "1.5.0", ">=1.0.0,<2.0.0")]);
        assert_eq!(resolve(&rec2, "2.5.0").unwrap().version, "2.1.0");
    }

    #[test]
    fn falls_back_to_latest() {
        let rec = sample();
        let got = resolve(&rec, "0.5.0").unwrap();
        assert_eq!(got.version, "3.0.0");
        assert_eq!(resolve_strict(&rec, "0.5.0"), Err(ResolveError::NoMatch { app: "foo".into() }));
    }

    #[test]
    fn maximal_candidate_wins() {
        let rec = record(
            entry("foo", "9.0.0", ">=9.0.0"),
            vec![entry("foo", "1.4.0", ">=1.0.0,<2.0.0"), entry("foo", "1.5.0", ">=1.0.0,<2.0.0")],
        );
        assert_eq!(resolve(&rec, "1.2.0").unwrap().version, "1.5.0");
    }

    #[test]
    fn malformed_platform_is_an_error() {
        assert!(matches!(resolve(&sample(), "not-a-version"), Err(ResolveError::InvalidPlatformVersion(_))));
        assert!(resolve_all([&sample()], "x.y").is_err());
    }

    #[test]
    fn unparsable_entry_version_is_skipped() {
        let rec = record(entry("foo", "2.0.0", ""), vec![entry("foo", "garbage", ">=1.0.0")]);
        assert_eq!(resolve(&rec, "1.0.0").unwrap().version, "2.0.0");
    }

    #[test]
    fn max_component_bounds_do_not_overflow() {
        let max = u64::MAX;
        assert!(c(&format!("~{max}"), &format!("{max}.3.0")));
        assert!(!c(&format!("~{max}"), "1.0.0"));
        assert!(c(&format!("~1.{max}"), &format!("1.{max}.7")));
        assert!(!c(&format!("~1.{max}"), "2.0.0"));
        assert!(c(&format!("^{max}.0.0"), &format!("{max}.9.9")));
        assert!(c(&format!("^0.{max}"), &format!("0.{max}.1")));
        assert!(!c(&format!("^0.{max}"), "1.0.0"));
        assert!(c(&format!("^0.0.{max}"), &format!("0.0.{max}")));
        assert!(!c(&format!("^0.0.{max}"), "0.1.0"));

        let rec = record(entry("foo", "2.0.0", &format!("~{max}")), vec![entry("foo", "1.0.0", ">=1.0.0")]);
        assert_eq!(resolve(&rec, "1.0.0").unwrap().version, "1.0.0");
        assert_eq!(resolve_strict(&rec, &format!("{max}.0.0")).unwrap().version, "2.0.0");
    }

    #[test]
    fn invalid_constraint_fails_single_but_not_batch() {
        let bad = record(entry("bad", "1.0.0", ">=>=nope"), vec![]);
        let good = sample();
        assert!(matches!(resolve(&bad, "1.0.0"), Err(ResolveError::InvalidConstraint { .. })));
        let all = resolve_all([&bad, &good], "1.8.0").unwrap();
        assert_eq!(all["bad"].version, "1.0.0");
        assert_eq!(all["foo"].version, "1.5.0");
        let strict = filter_all([&bad, &good], "1.8.0").unwrap();
        assert_eq!(strict.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(), vec!["foo"]);
        let ordered = resolve_each([&good, &bad], "1.8.0").unwrap();
        assert_eq!(ordered.iter().map(|e| e.name.as_str()).collect::<Vec<_>>(), vec!["foo", "bad"]);
    }

    #[test]
    fn constraint_dialect() {
        assert!(c(">= 1.2, < 2", "1.9.9"));
        assert!(!c(">=1.2 <2", "2.0.0"));
        assert!(c("1.2 - 1.4.5", "1.4.5"));
        assert!(!c("1.2 - 1.4.5", "1.4.6"));
        assert!(c("~1.2.3", "1.2.9"));
        assert!(!c("~1.2.3", "1.3.0"));
        assert!(c("^1.2.3", "1.9.0"));
        assert!(!c("^0.2.3", "0.3.0"));
        assert!(c("1.2.x", "1.2.7"));
        assert!(c(">1.2", "1.3.0"));
        assert!(!c(">1.2", "1.2.9"));
        assert!(c("<=1.2", "1.2.9"));
        assert!(c("!=1.2.3", "1.2.4"));
        assert!(c("*", "5.0.0"));
        assert!(c("<1.0.0 || >=3.0.0", "3.1.0"));
        assert!(c("v1.2.3", "1.2.3"));
    }

    #[test]
    fn prerelease_needs_prerelease_comparator() {
        assert!(!c(">=1.0.0", "1.10.9-0"));
        assert!(c(">=1.0.0-0", "1.10.9-0"));
        assert!(c(">=1.10.0-0, <1.11.0-0", "1.10.9-0"));
    }

    #[test]
    fn lenient_versions() {
        assert_eq!(parse_version("v1.2"), Some(Version::new(1, 2, 0)));
        assert_eq!(parse_version("3"), Some(Version::new(3, 0, 0)));
        assert_eq!(parse_version("1.2.3+build"), Some(Version::new(1, 2, 3)));
        assert!(parse_version("1.2.3.4").is_none());
        assert!(parse_version("").is_none());
    }
}

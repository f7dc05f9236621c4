//! Segment patterns with exact structural subsumption.
//!
//! A pattern is split on `/` into segments:
//! - a literal segment matches only itself;
//! - `*` matches exactly one segment, whatever its content;
//! - `**` matches zero or more segments and may appear at most once;
//! - `[abc]`, `[a-z0-9]` and `[!0-9]` match one character of a class inside a
//!   single segment, and may be mixed with literal characters (`log[0-9].txt`).
//!
//! Matching is case-sensitive and anchored at both ends. Subjects that are not
//! canonical (a `.` or `..` segment, or an empty segment other than a leading
//! one) are rejected before any pattern is consulted, so `/data/./secret` and
//! `/data//secret` can never slip past a denial written for `/data/secret`.
//!
//! [`Pattern::subsumes`] is computed on the segment structure, never by
//! sampling subjects: `a.subsumes(b)` holds exactly when every subject matched
//! by `b` is matched by `a`.

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use serde::{Deserialize, Serialize};

use crate::error::{CapabilityError, CapabilityResult};

/// Segment separator for patterns and subjects.
pub const SEPARATOR: char = '/';

const MAX_SCALAR: u32 = 0x0010_FFFF;
const SURROGATES: (u32, u32) = (0xD800, 0xDFFF);

/// Placeholder for one arbitrary segment when expanding a `**` on the
/// subsumed side.
static ANY_SEGMENT: Segment = Segment::Any;

/// Normalized character class: sorted, merged, non-empty scalar ranges that
/// never include the separator.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CharClass {
    ranges: Vec<(u32, u32)>,
}

impl CharClass {
    fn from_ranges(mut ranges: Vec<(u32, u32)>, negated: bool) -> Self {
        ranges.sort_unstable();
        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(ranges.len());
        for (lo, hi) in ranges {
            match merged.last_mut() {
                Some(last) if lo <= last.1.saturating_add(1) => last.1 = last.1.max(hi),
                _ => merged.push((lo, hi)),
            }
        }
        if negated {
            merged = complement(&merged);
        }
        let sep = u32::from(SEPARATOR);
        let merged = subtract(merged, (sep, sep));
        Self {
            ranges: subtract(merged, SURROGATES),
        }
    }

    fn contains(&self, c: char) -> bool {
        let c = u32::from(c);
        self.ranges.iter().any(|&(lo, hi)| lo <= c && c <= hi)
    }

    fn is_subset_of(&self, other: &Self) -> bool {
        // Both sides are maximal runs over the same universe, so each range
        // must sit inside a single range of the superset.
        self.ranges.iter().all(|&(lo, hi)| {
            other
                .ranges
                .iter()
                .any(|&(olo, ohi)| olo <= lo && hi <= ohi)
        })
    }

    fn single(&self) -> Option<char> {
        match self.ranges.as_slice() {
            [(lo, hi)] if lo == hi => char::from_u32(*lo),
            _ => None,
        }
    }
}

fn complement(ranges: &[(u32, u32)]) -> Vec<(u32, u32)> {
    let mut out = Vec::with_capacity(ranges.len().saturating_add(1));
    let mut next = 0u32;
    for &(lo, hi) in ranges {
        if lo > next {
            out.push((next, lo.saturating_sub(1)));
        }
        next = hi.saturating_add(1);
    }
    if next <= MAX_SCALAR {
        out.push((next, MAX_SCALAR));
    }
    out
}

fn subtract(ranges: Vec<(u32, u32)>, (cut_lo, cut_hi): (u32, u32)) -> Vec<(u32, u32)> {
    let mut out = Vec::with_capacity(ranges.len().saturating_add(1));
    for (lo, hi) in ranges {
        if hi < cut_lo || lo > cut_hi {
            out.push((lo, hi));
            continue;
        }
        if lo < cut_lo {
            out.push((lo, cut_lo.saturating_sub(1)));
        }
        if hi > cut_hi {
            out.push((cut_hi.saturating_add(1), hi));
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Atom {
    Char(char),
    Class(CharClass),
}

impl Atom {
    fn matches(&self, c: char) -> bool {
        match self {
            Self::Char(expected) => *expected == c,
            Self::Class(class) => class.contains(c),
        }
    }

    fn covers(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Char(a), Self::Char(b)) => a == b,
            (Self::Class(class), Self::Char(c)) => class.contains(*c),
            (Self::Char(c), Self::Class(class)) => class.single() == Some(*c),
            (Self::Class(a), Self::Class(b)) => b.is_subset_of(a),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Atoms(Vec<Atom>),
    Any,
    Recursive,
}

impl Segment {
    fn matches(&self, subject: &str) -> bool {
        match self {
            Self::Literal(literal) => literal == subject,
            Self::Atoms(atoms) => {
                let mut chars = subject.chars();
                atoms
                    .iter()
                    .all(|atom| chars.next().is_some_and(|c| atom.matches(c)))
                    && chars.next().is_none()
            },
            Self::Any | Self::Recursive => true,
        }
    }

    /// Single-segment containment: every segment matched by `other` is
    /// matched by `self`.
    fn covers(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Any, _) => true,
            (_, Self::Any) | (Self::Recursive, _) | (_, Self::Recursive) => false,
            (Self::Literal(a), Self::Literal(b)) => a == b,
            _ => {
                let ours = self.atoms();
                let theirs = other.atoms();
                ours.len() == theirs.len() && ours.iter().zip(&theirs).all(|(a, b)| a.covers(b))
            },
        }
    }

    fn atoms(&self) -> Vec<Atom> {
        match self {
            Self::Literal(literal) => literal.chars().map(Atom::Char).collect(),
            Self::Atoms(atoms) => atoms.clone(),
            Self::Any | Self::Recursive => Vec::new(),
        }
    }
}

/// A compiled path pattern.
///
/// Equality and hashing use the source text.
#[derive(Debug, Clone)]
pub struct Pattern {
    source: String,
    segments: Vec<Segment>,
    /// Index of the `**` segment, if any.
    recursive: Option<usize>,
}

impl Pattern {
    /// Compile a pattern.
    ///
    /// # Errors
    ///
    /// Returns [`CapabilityError::MalformedCapability`] for a second `**`,
    /// a `*` mixed with literal text, a `..` segment, or a malformed
    /// bracket expression.
    pub fn parse(source: impl Into<String>) -> CapabilityResult<Self> {
        let source = source.into();
        let mut segments = Vec::new();
        let mut recursive = None;

        for (index, text) in source.split(SEPARATOR).enumerate() {
            let segment = parse_segment(&source, text)?;
            if segment == Segment::Recursive {
                if recursive.is_some() {
                    return Err(CapabilityError::malformed(
                        &source,
                        "`**` may appear at most once",
                    ));
                }
                recursive = Some(index);
            }
            segments.push(segment);
        }

        Ok(Self {
            source,
            segments,
            recursive,
        })
    }

    /// The pattern matching every subject (`**`).
    #[must_use]
    pub fn everything() -> Self {
        Self {
            source: "**".to_string(),
            segments: vec![Segment::Recursive],
            recursive: Some(0),
        }
    }

    /// The source text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether the pattern contains no wildcard or class.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|segment| matches!(segment, Segment::Literal(_)))
    }

    /// Check a subject against this pattern.
    ///
    /// Non-canonical subjects never match.
    #[must_use]
    pub fn matches(&self, subject: &str) -> bool {
        if !is_canonical_subject(subject) {
            return false;
        }

        let count = subject.split(SEPARATOR).count();
        match self.recursive {
            None => {
                count == self.segments.len()
                    && self
                        .segments
                        .iter()
                        .zip(subject.split(SEPARATOR))
                        .all(|(segment, part)| segment.matches(part))
            },
            Some(index) => {
                let (prefix, suffix) = self.split_at_recursive(index);
                count >= prefix.len().saturating_add(suffix.len())
                    && prefix
                        .iter()
                        .zip(subject.split(SEPARATOR))
                        .all(|(segment, part)| segment.matches(part))
                    && suffix
                        .iter()
                        .rev()
                        .zip(subject.rsplit(SEPARATOR))
                        .all(|(segment, part)| segment.matches(part))
            },
        }
    }

    /// Whether every subject matched by `other` is also matched by `self`.
    #[must_use]
    pub fn subsumes(&self, other: &Self) -> bool {
        match (self.recursive, other.recursive) {
            (None, None) => {
                self.segments.len() == other.segments.len()
                    && self
                        .segments
                        .iter()
                        .zip(&other.segments)
                        .all(|(a, b)| a.covers(b))
            },
            // A fixed-length pattern cannot contain an unbounded language.
            (None, Some(_)) => false,
            (Some(index), None) => {
                let fixed: Vec<&Segment> = other.segments.iter().collect();
                self.covers_fixed(index, &fixed)
            },
            (Some(index), Some(theirs)) => {
                let (head, tail) = other.split_at_recursive(theirs);
                // Beyond `prefix + suffix` inserted segments every position
                // compared against our prefix/suffix is fixed, so checking
                // each gap up to our own length decides all of them.
                // A subject always has at least one segment, so `**` alone
                // never stands for the empty sequence.
                let min_gap = usize::from(head.is_empty() && tail.is_empty());
                (min_gap..=self.segments.len()).all(|gap| {
                    let expanded: Vec<&Segment> = head
                        .iter()
                        .chain(std::iter::repeat_n(&ANY_SEGMENT, gap))
                        .chain(tail)
                        .collect();
                    self.covers_fixed(index, &expanded)
                })
            },
        }
    }

    fn split_at_recursive(&self, index: usize) -> (&[Segment], &[Segment]) {
        let (prefix, rest) = self.segments.split_at(index);
        (prefix, rest.get(1..).unwrap_or_default())
    }

    /// Containment of a fixed-length segment sequence by a pattern with `**`.
    fn covers_fixed(&self, index: usize, fixed: &[&Segment]) -> bool {
        let (prefix, suffix) = self.split_at_recursive(index);
        fixed.len() >= prefix.len().saturating_add(suffix.len())
            && prefix
                .iter()
                .zip(fixed.iter())
                .all(|(ours, theirs)| ours.covers(theirs))
            && suffix
                .iter()
                .rev()
                .zip(fixed.iter().rev())
                .all(|(ours, theirs)| ours.covers(theirs))
    }
}

fn parse_segment(pattern: &str, text: &str) -> CapabilityResult<Segment> {
    match text {
        "**" => return Ok(Segment::Recursive),
        "*" => return Ok(Segment::Any),
        ".." => {
            return Err(CapabilityError::malformed(
                pattern,
                "parent-directory segment `..` is not allowed",
            ));
        },
        _ => {},
    }

    if text.contains('*') {
        return Err(CapabilityError::malformed(
            pattern,
            "`*` and `**` must occupy a whole segment",
        ));
    }
    if !text.contains(['[', ']']) {
        return Ok(Segment::Literal(text.to_string()));
    }

    let mut atoms = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '[' => atoms.push(Atom::Class(parse_class(pattern, &mut chars)?)),
            ']' => return Err(CapabilityError::malformed(pattern, "unmatched `]`")),
            other => atoms.push(Atom::Char(other)),
        }
    }
    Ok(Segment::Atoms(atoms))
}

fn parse_class(pattern: &str, chars: &mut Peekable<Chars<'_>>) -> CapabilityResult<CharClass> {
    let negated = matches!(chars.peek(), Some('!' | '^'));
    if negated {
        chars.next();
    }

    let mut members = Vec::new();
    let mut closed = false;
    for c in chars.by_ref() {
        // A `]` right after the opening bracket is a member, not the end.
        if c == ']' && !members.is_empty() {
            closed = true;
            break;
        }
        members.push(c);
    }
    if !closed {
        return Err(CapabilityError::malformed(
            pattern,
            "unterminated character class",
        ));
    }

    let mut ranges = Vec::with_capacity(members.len());
    let mut rest = members.as_slice();
    loop {
        match rest {
            [lo, '-', hi, tail @ ..] => {
                if lo > hi {
                    return Err(CapabilityError::malformed(
                        pattern,
                        format!("reversed range `{lo}-{hi}` in character class"),
                    ));
                }
                ranges.push((u32::from(*lo), u32::from(*hi)));
                rest = tail;
            },
            [c, tail @ ..] => {
                ranges.push((u32::from(*c), u32::from(*c)));
                rest = tail;
            },
            [] => break,
        }
    }

    let class = CharClass::from_ranges(ranges, negated);
    if class.ranges.is_empty() {
        return Err(CapabilityError::malformed(
            pattern,
            "character class matches nothing",
        ));
    }
    Ok(class)
}

/// Whether a subject is in canonical form.
///
/// A canonical subject has no `.` or `..` segment and no empty segment
/// except a leading one (`/data/x`). The root `/` is canonical.
#[must_use]
pub fn is_canonical_subject(subject: &str) -> bool {
    if subject == "/" {
        return true;
    }
    subject
        .split(SEPARATOR)
        .enumerate()
        .all(|(index, segment)| match segment {
            "." | ".." => false,
            "" => index == 0,
            _ => true,
        })
}

/// Match `subject` against the pattern text `pattern`.
///
/// # Errors
///
/// Returns [`CapabilityError::MalformedCapability`] if the pattern is invalid.
pub fn matches(pattern: &str, subject: &str) -> CapabilityResult<bool> {
    Ok(Pattern::parse(pattern)?.matches(subject))
}

/// Whether pattern `a` subsumes pattern `b`.
///
/// # Errors
///
/// Returns [`CapabilityError::MalformedCapability`] if either pattern is invalid.
pub fn subsumes(a: &str, b: &str) -> CapabilityResult<bool> {
    Ok(Pattern::parse(a)?.subsumes(&Pattern::parse(b)?))
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl std::str::FromStr for Pattern {
    type Err = CapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for Pattern {}

impl std::hash::Hash for Pattern {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.source.hash(state);
    }
}

impl Serialize for Pattern {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.source.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Pattern {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let source = String::deserialize(deserializer)?;
        Self::parse(source).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(source: &str) -> Pattern {
        Pattern::parse(source).unwrap()
    }

    #[test]
    fn test_literal_match_is_anchored() {
        let pattern = p("/data/a.txt");
        assert!(pattern.matches("/data/a.txt"));
        assert!(!pattern.matches("/data/a.txt/more"));
        assert!(!pattern.matches("/data"));
        assert!(!pattern.matches("/DATA/a.txt"));
    }

    #[test]
    fn test_single_star_matches_one_segment() {
        let pattern = p("/data/*/a.txt");
        assert!(pattern.matches("/data/x/a.txt"));
        assert!(!pattern.matches("/data/x/y/a.txt"));
        assert!(!pattern.matches("/data/a.txt"));
    }

    #[test]
    fn test_recursive_matches_zero_or_more() {
        let pattern = p("/data/**");
        assert!(pattern.matches("/data"));
        assert!(pattern.matches("/data/a.txt"));
        assert!(pattern.matches("/data/sub/deep/a.txt"));
        assert!(!pattern.matches("/etc/passwd"));

        let middle = p("/data/**/out.log");
        assert!(middle.matches("/data/out.log"));
        assert!(middle.matches("/data/a/b/out.log"));
        assert!(!middle.matches("/data/a/b/in.log"));

        let leading = p("**/secret");
        assert!(leading.matches("secret"));
        assert!(leading.matches("/home/u/secret"));
    }

    #[test]
    fn test_character_classes() {
        let pattern = p("/logs/app[0-9].log");
        assert!(pattern.matches("/logs/app3.log"));
        assert!(!pattern.matches("/logs/appx.log"));
        assert!(!pattern.matches("/logs/app10.log"));

        let negated = p("/tmp/[!abc]");
        assert!(negated.matches("/tmp/z"));
        assert!(!negated.matches("/tmp/a"));

        let bracket = p("/x/[]a]");
        assert!(bracket.matches("/x/]"));
        assert!(bracket.matches("/x/a"));
    }

    #[test]
    fn test_empty_pattern_matches_only_empty_subject() {
        let pattern = p("");
        assert!(pattern.matches(""));
        assert!(!pattern.matches("a"));
        assert!(!pattern.matches("/"));
    }

    #[test]
    fn test_traversal_subject_rejected() {
        let pattern = p("**");
        assert!(!pattern.matches("/data/../etc/passwd"));
        assert!(!pattern.matches(".."));
        assert!(pattern.matches("/data/file..txt"));
    }

    #[test]
    fn test_non_canonical_subject_rejected() {
        let pattern = p("/data/**");
        assert!(!pattern.matches("/data/./secret/key"));
        assert!(!pattern.matches("/data//secret/key"));
        assert!(!pattern.matches("/data/secret/"));
        assert!(!pattern.matches("."));
        assert!(pattern.matches("/data/.hidden"));

        assert!(is_canonical_subject("/"));
        assert!(is_canonical_subject(""));
        assert!(is_canonical_subject("/data/x"));
        assert!(is_canonical_subject("api.example.com/443"));
        assert!(!is_canonical_subject("//data"));
        assert!(!is_canonical_subject("/data/."));
    }

    #[test]
    fn test_malformed_patterns() {
        assert!(Pattern::parse("/a/**/b/**").is_err());
        assert!(Pattern::parse("/a/*.txt").is_err());
        assert!(Pattern::parse("/a/[0-9").is_err());
        assert!(Pattern::parse("/a/0-9]").is_err());
        assert!(Pattern::parse("/a/[9-0]").is_err());
        assert!(Pattern::parse("/a/../b").is_err());
        assert!(Pattern::parse("/a/[/]").is_err());
    }

    #[test]
    fn test_subsumption_basics() {
        assert!(p("**").subsumes(&p("/any/thing/*")));
        assert!(p("/data/**").subsumes(&p("/data/sub/a.txt")));
        assert!(p("/data/**").subsumes(&p("/data/*/**")));
        assert!(!p("/data/**").subsumes(&p("/etc/**")));
        assert!(!p("/data/*").subsumes(&p("/data/**")));
        assert!(p("/data/*").subsumes(&p("/data/a[0-9]")));
        assert!(!p("/data/a").subsumes(&p("/data/*")));
        assert!(p("/data/[a-z]").subsumes(&p("/data/[b-d]")));
        assert!(!p("/data/[b-d]").subsumes(&p("/data/[a-z]")));
        assert!(p("/data/[a]").subsumes(&p("/data/a")));
        assert!(p("/data/a").subsumes(&p("/data/[a]")));
    }

    #[test]
    fn test_subsumption_with_recursive_on_both_sides() {
        assert!(p("/a/**").subsumes(&p("/a/b/**")));
        assert!(!p("/a/b/**").subsumes(&p("/a/**")));
        assert!(p("**/x").subsumes(&p("/a/**/x")));
        assert!(!p("/a/**/x").subsumes(&p("**/x")));
        // `/*/**` requires at least two segments; `**` also matches one.
        assert!(!p("/*/**").subsumes(&p("**")));
        assert!(p("*/**").subsumes(&p("/**")));
        assert!(p("/**/*").subsumes(&p("/a/**/b")));
        assert!(!p("/**/b").subsumes(&p("/**/*")));
    }

    #[test]
    fn test_bare_recursive_never_expands_to_nothing() {
        // Both match every subject, since a subject has at least one segment.
        assert!(p("*/**").subsumes(&p("**")));
        assert!(p("**/*").subsumes(&p("**")));
        assert!(p("**").subsumes(&p("*/**")));
        // A non-empty prefix or suffix still allows a zero-length `**`.
        assert!(!p("/a/*/**").subsumes(&p("/a/**")));
        assert!(!p("*/**/x").subsumes(&p("**/x")));
    }

    #[test]
    fn test_subsumption_is_reflexive() {
        for source in [
            "",
            "**",
            "/data/**",
            "/a/*/b",
            "/logs/app[0-9].log",
            "**/x/[!a]",
            "/a/**/b/c",
        ] {
            let pattern = p(source);
            assert!(pattern.subsumes(&pattern), "{source} must subsume itself");
        }
    }

    #[test]
    fn test_subsumption_is_transitive() {
        let patterns: Vec<Pattern> = [
            "**",
            "/data/**",
            "/data/*/**",
            "/data/*",
            "/data/a",
            "/data/[a-c]",
            "/data/**/x",
            "/data/sub/**",
            "*/**",
            "/**/*",
            "/data/[a]",
        ]
        .iter()
        .map(|s| p(s))
        .collect();

        for a in &patterns {
            for b in &patterns {
                for c in &patterns {
                    if a.subsumes(b) && b.subsumes(c) {
                        assert!(a.subsumes(c), "{a} > {b} > {c} must imply {a} > {c}");
                    }
                }
            }
        }
    }

    #[test]
    fn test_subsumption_agrees_with_matching() {
        let subjects = [
            "", "/data", "/data/a", "/data/b", "/data/sub/a", "/data/sub/x", "/etc/x", "x",
            "/data/a/x",
        ];
        let patterns: Vec<Pattern> = [
            "**",
            "*/**",
            "**/*",
            "/data/**",
            "/data/*",
            "/data/a",
            "/data/**/x",
            "/*/*",
        ]
        .iter()
        .map(|s| p(s))
        .collect();

        for a in &patterns {
            for b in &patterns {
                if a.subsumes(b) {
                    for subject in subjects {
                        if b.matches(subject) {
                            assert!(a.matches(subject), "{a} subsumes {b} but misses {subject}");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_free_functions() {
        assert!(matches("/data/**", "/data/x").unwrap());
        assert!(subsumes("**", "/data/x").unwrap());
        assert!(matches("/data/[", "/data/x").is_err());
    }

    #[test]
    fn test_pattern_serialization() {
        let pattern = p("/data/**");
        let json = serde_json::to_string(&pattern).unwrap();
        assert_eq!(json, "\"/data/**\"");
        let decoded: Pattern = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, pattern);
        assert!(serde_json::from_str::<Pattern>("\"/a/**/**\"").is_err());
    }
}

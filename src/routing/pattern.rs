//! Route patterns: parsing, matching and reverse formatting.
//!
//! # Responsibilities
//! - Parse `/posts/<id:int>/<rest:any>` into literal and typed variable segments
//! - Match a concrete request path and bind variables
//! - Format a pattern back into a path from positional or named values
//!
//! # Design Decisions
//! - Segment based, no regex: each variable type is a character-class check
//! - A failed match binds nothing (no partial variables)
//! - One trailing slash on the request path is not significant
//! - Request segments are percent-decoded after splitting, so `%2F` stays
//!   inside its segment
//! - Formatting is strict: argument count must equal variable count, and
//!   values are percent-encoded back into path form

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use thiserror::Error;

use super::params::UrlParams;

/// Errors raised while parsing or formatting a pattern.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("malformed segment `{segment}` in pattern `{pattern}`")]
    Malformed { pattern: String, segment: String },

    #[error("invalid variable name `{name}` in pattern `{pattern}`")]
    InvalidName { pattern: String, name: String },

    #[error("unknown variable type `{kind}` in pattern `{pattern}`")]
    UnknownType { pattern: String, kind: String },

    #[error("variable `{name}` declared twice in pattern `{pattern}`")]
    DuplicateVariable { pattern: String, name: String },

    #[error("wildcard must be the last segment of pattern `{pattern}`")]
    WildcardNotLast { pattern: String },

    #[error("pattern `{pattern}` needs {expected} arguments, got {got}")]
    MissingArguments { pattern: String, expected: usize, got: usize },

    #[error("pattern `{pattern}` takes {expected} arguments, got {got}")]
    TooManyArguments { pattern: String, expected: usize, got: usize },

    #[error("no value for variable `{name}` of pattern `{pattern}`")]
    MissingParameter { pattern: String, name: String },
}

/// Bytes escaped when a value is written into a wildcard variable.
const PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// Bytes escaped when a value is written into a single segment.
const SEGMENT: &AsciiSet = &PATH.add(b'/');

/// Declared type of a path variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarKind {
    /// `[0-9]+`
    Int,
    /// Any non-empty segment.
    Str,
    /// `[A-Za-z0-9_-]+`
    Slug,
    /// Hyphenated 8-4-4-4-12 hex.
    Uuid,
    /// Trailing wildcard: the rest of the path, one segment or more.
    Any,
}

impl VarKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "int" => Some(Self::Int),
            "string" | "str" => Some(Self::Str),
            "slug" => Some(Self::Slug),
            "uuid" => Some(Self::Uuid),
            "any" | "*" => Some(Self::Any),
            _ => None,
        }
    }

    fn accepts(self, value: &str) -> bool {
        if value.is_empty() {
            return false;
        }
        match self {
            Self::Int => value.bytes().all(|b| b.is_ascii_digit()),
            Self::Str | Self::Any => true,
            Self::Slug => value
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_'),
            Self::Uuid => is_uuid(value),
        }
    }
}

fn is_uuid(value: &str) -> bool {
    const GROUPS: [usize; 5] = [8, 4, 4, 4, 12];
    let parts: Vec<&str> = value.split('-').collect();
    parts.len() == GROUPS.len()
        && parts
            .iter()
            .zip(GROUPS)
            .all(|(part, len)| part.len() == len && part.bytes().all(|b| b.is_ascii_hexdigit()))
}

/// One `/`-delimited piece of a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Var { name: String, kind: VarKind },
}

/// A segment with its variable name erased.
///
/// Two patterns with equal shapes accept exactly the same paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentShape<'a> {
    Literal(&'a str),
    Var(VarKind),
}

/// A parsed route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
    leading_slash: bool,
    trailing_slash: bool,
}

impl PathPattern {
    /// Parse a pattern such as `/blog/<year:int>/<slug:slug>`.
    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let mut segments: Vec<Segment> = Vec::new();
        let mut seen = HashSet::new();

        for part in raw.split('/').filter(|p| !p.is_empty()) {
            if matches!(segments.last(), Some(Segment::Var { kind: VarKind::Any, .. })) {
                return Err(PatternError::WildcardNotLast { pattern: raw.to_string() });
            }
            let segment = parse_segment(raw, part)?;
            if let Segment::Var { name, .. } = &segment {
                if !seen.insert(name.clone()) {
                    return Err(PatternError::DuplicateVariable {
                        pattern: raw.to_string(),
                        name: name.clone(),
                    });
                }
            }
            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
            leading_slash: raw.starts_with('/'),
            trailing_slash: raw.len() > 1 && raw.ends_with('/'),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Variable names in declaration order.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Var { name, .. } => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    pub fn variable_count(&self) -> usize {
        self.variables().count()
    }

    pub fn shape(&self) -> Vec<SegmentShape<'_>> {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(literal) => SegmentShape::Literal(literal),
                Segment::Var { kind, .. } => SegmentShape::Var(*kind),
            })
            .collect()
    }

    /// Match a concrete path, returning the bound variables on success.
    ///
    /// `path` is the raw request path; each segment is percent-decoded before
    /// it is compared or bound. A segment that does not decode to UTF-8
    /// fails the match.
    pub fn matches(&self, path: &str) -> Option<UrlParams> {
        let trimmed = path.strip_prefix('/').unwrap_or(path);
        let trimmed = trimmed.strip_suffix('/').unwrap_or(trimmed);
        let parts: Vec<Cow<'_, str>> = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed
                .split('/')
                .map(|part| percent_decode_str(part).decode_utf8().ok())
                .collect::<Option<_>>()?
        };

        let mut params = UrlParams::new();
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(literal) => {
                    if parts.get(i).map(|p| &**p) != Some(literal.as_str()) {
                        return None;
                    }
                }
                Segment::Var { name, kind: VarKind::Any } => {
                    let rest = parts.get(i..).map(|rest| rest.join("/")).unwrap_or_default();
                    if rest.is_empty() {
                        return None;
                    }
                    params.insert(name.clone(), rest);
                    return Some(params);
                }
                Segment::Var { name, kind } => {
                    let value = parts.get(i)?;
                    if !kind.accepts(value) {
                        return None;
                    }
                    params.insert(name.clone(), &**value);
                }
            }
        }

        (parts.len() == self.segments.len()).then_some(params)
    }

    /// Substitute positional arguments for the variables, in declaration order.
    pub fn format(&self, args: &[&dyn fmt::Display]) -> Result<String, PatternError> {
        let expected = self.variable_count();
        if args.len() < expected {
            return Err(PatternError::MissingArguments {
                pattern: self.raw.clone(),
                expected,
                got: args.len(),
            });
        }
        if args.len() > expected {
            return Err(PatternError::TooManyArguments {
                pattern: self.raw.clone(),
                expected,
                got: args.len(),
            });
        }

        let mut args = args.iter();
        self.render(|_| args.next().map(|arg| arg.to_string()))
    }

    /// Substitute variables by name, e.g. with the params of a previous match.
    pub fn format_params(&self, params: &UrlParams) -> Result<String, PatternError> {
        self.render(|name| params.get(name).map(str::to_string))
    }

    fn render(
        &self,
        mut value_for: impl FnMut(&str) -> Option<String>,
    ) -> Result<String, PatternError> {
        let mut out = String::with_capacity(self.raw.len());
        if self.leading_slash {
            out.push('/');
        }
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                out.push('/');
            }
            match segment {
                Segment::Literal(literal) => out.push_str(literal),
                Segment::Var { name, kind } => {
                    let value = value_for(name).ok_or_else(|| PatternError::MissingParameter {
                        pattern: self.raw.clone(),
                        name: name.clone(),
                    })?;
                    let escape = if *kind == VarKind::Any { PATH } else { SEGMENT };
                    out.extend(utf8_percent_encode(&value, escape));
                }
            }
        }
        if self.trailing_slash && !self.segments.is_empty() {
            out.push('/');
        }
        Ok(out)
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn parse_segment(pattern: &str, part: &str) -> Result<Segment, PatternError> {
    let is_bracket = |c: char| c == '<' || c == '>';

    let Some(inner) = part.strip_prefix('<').and_then(|p| p.strip_suffix('>')) else {
        if part.contains(is_bracket) {
            return Err(PatternError::Malformed {
                pattern: pattern.to_string(),
                segment: part.to_string(),
            });
        }
        return Ok(Segment::Literal(part.to_string()));
    };

    if inner.contains(is_bracket) {
        return Err(PatternError::Malformed {
            pattern: pattern.to_string(),
            segment: part.to_string(),
        });
    }

    let (name, kind) = match inner.split_once(':') {
        Some((name, kind)) => {
            let kind = VarKind::from_name(kind).ok_or_else(|| PatternError::UnknownType {
                pattern: pattern.to_string(),
                kind: kind.to_string(),
            })?;
            (name, kind)
        }
        None => (inner, VarKind::Str),
    };

    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(PatternError::InvalidName {
            pattern: pattern.to_string(),
            name: name.to_string(),
        });
    }

    Ok(Segment::Var { name: name.to_string(), kind })
}

//! Path pattern compiler.
//!
//! Compiles `/users/:id/files/*` style templates into an ordered list of
//! segment matchers, each pattern carrying a [`Specificity`] used by the
//! matcher to rank overlapping definitions.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

/// Key under which the trailing wildcard binds the matched suffix.
pub const WILDCARD_PARAM: &str = "*";

/// Errors produced while compiling a path pattern.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    /// Pattern text is empty
    #[error("path pattern cannot be empty")]
    Empty,
    /// Pattern does not start with a slash
    #[error("path pattern must start with '/'")]
    MissingLeadingSlash,
    /// A `:` segment without a usable name
    #[error("invalid parameter name {0:?}")]
    InvalidParamName(String),
    /// The same parameter name appears twice
    #[error("duplicate parameter name {0:?}")]
    DuplicateParam(String),
    /// `*` somewhere other than the final segment
    #[error("wildcard is only allowed as the last segment")]
    WildcardNotLast,
    /// `*` embedded inside a literal segment
    #[error("segment {0:?} mixes a wildcard with literal text")]
    EmbeddedWildcard(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Wildcard,
}

/// A compiled path pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    source: String,
    segments: Vec<Segment>,
}

/// How specific a pattern is.
///
/// Ordered so that a greater value is a more specific pattern: literal
/// segments dominate, then parameters, then the absence of a wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct Specificity {
    /// Number of literal segments
    pub literals: usize,
    /// Number of parameter segments
    pub params: usize,
    /// Whether the pattern ends in a wildcard
    pub wildcard: bool,
}

impl Specificity {
    /// Derived default priority for definitions that do not set one.
    pub fn score(&self) -> i32 {
        let literals = i32::try_from(self.literals).unwrap_or(i32::MAX / 100);
        let params = i32::try_from(self.params).unwrap_or(i32::MAX / 100);
        literals
            .saturating_mul(100)
            .saturating_add(params.saturating_mul(10))
            .saturating_add(if self.wildcard { 0 } else { 1 })
    }
}

impl Ord for Specificity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.literals
            .cmp(&other.literals)
            .then(self.params.cmp(&other.params))
            .then(other.wildcard.cmp(&self.wildcard))
    }
}

impl PartialOrd for Specificity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PathPattern {
    /// Compile a pattern.
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err(PatternError::Empty);
        }
        if !trimmed.starts_with('/') {
            return Err(PatternError::MissingLeadingSlash);
        }

        let raw: Vec<&str> = trimmed.split('/').filter(|s| !s.is_empty()).collect();
        let mut segments = Vec::with_capacity(raw.len());

        for (i, part) in raw.iter().enumerate() {
            if *part == "*" {
                if i + 1 != raw.len() {
                    return Err(PatternError::WildcardNotLast);
                }
                segments.push(Segment::Wildcard);
            } else if let Some(name) = part.strip_prefix(':') {
                if !is_valid_param_name(name) {
                    return Err(PatternError::InvalidParamName(name.to_string()));
                }
                let duplicate = segments
                    .iter()
                    .any(|s| matches!(s, Segment::Param(existing) if existing == name));
                if duplicate {
                    return Err(PatternError::DuplicateParam(name.to_string()));
                }
                segments.push(Segment::Param(name.to_string()));
            } else if part.contains('*') {
                return Err(PatternError::EmbeddedWildcard(part.to_string()));
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        Ok(Self {
            source: trimmed.to_string(),
            segments,
        })
    }

    /// The pattern text as it was compiled.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match a normalized request path, returning the bound parameters.
    pub fn matches(&self, path: &str) -> Option<HashMap<String, String>> {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = HashMap::new();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(lit) => {
                    if parts.get(i) != Some(&lit.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let value = parts.get(i)?;
                    params.insert(name.clone(), (*value).to_string());
                }
                Segment::Wildcard => {
                    let rest = parts.get(i..).unwrap_or_default();
                    params.insert(WILDCARD_PARAM.to_string(), rest.join("/"));
                    return Some(params);
                }
            }
        }

        // Without a wildcard the whole path must be consumed
        (parts.len() == self.segments.len()).then_some(params)
    }

    /// Specificity of this pattern.
    pub fn specificity(&self) -> Specificity {
        let mut spec = Specificity {
            literals: 0,
            params: 0,
            wildcard: false,
        };
        for segment in &self.segments {
            match segment {
                Segment::Literal(_) => spec.literals += 1,
                Segment::Param(_) => spec.params += 1,
                Segment::Wildcard => spec.wildcard = true,
            }
        }
        spec
    }

    /// Names of the parameters this pattern binds, in order.
    pub fn param_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn is_valid_param_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Normalize a request path: collapse repeated slashes and drop the
/// trailing one. The root path stays `/`.
pub fn normalize_path(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    format!("/{}", parts.join("/"))
}

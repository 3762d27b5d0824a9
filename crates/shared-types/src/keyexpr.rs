//! # Key Expressions
//!
//! Key expressions are hierarchical addresses separated by slashes
//! (e.g., `"robot/arm/joint1"`). Patterns support two wildcards:
//! - `*` matches exactly one segment
//! - `**` matches zero or more segments, anywhere in the expression
//!
//! Matching and intersection are iterative so that deeply nested
//! expressions cannot exhaust the stack.

use crate::errors::KeyExprError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Separator between segments.
pub const SEGMENT_SEPARATOR: char = '/';

/// Matches exactly one segment.
pub const WILDCARD_SINGLE: &str = "*";

/// Matches zero or more segments.
pub const WILDCARD_MULTI: &str = "**";

/// Characters reserved by the addressing scheme.
const RESERVED_CHARS: [char; 3] = ['#', '?', '$'];

/// A segment of a parsed key expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Matches this exact literal string.
    Literal(String),
    /// The `*` wildcard.
    Single,
    /// The `**` wildcard.
    Multi,
}

impl Segment {
    /// Whether this segment is one of the wildcards.
    #[must_use]
    pub fn is_wild(&self) -> bool {
        !matches!(self, Self::Literal(_))
    }
}

/// A validated key expression.
///
/// Cloning is cheap: the string and its segments are shared.
///
/// # Examples
///
/// ```
/// use shared_types::KeyExpr;
///
/// let pattern = KeyExpr::new("robot/*/status").unwrap();
/// let key = KeyExpr::new("robot/arm/status").unwrap();
/// assert!(pattern.matches(&key));
///
/// let pattern = KeyExpr::new("robot/**/status").unwrap();
/// assert!(pattern.matches(&KeyExpr::new("robot/status").unwrap()));
/// assert!(pattern.matches(&KeyExpr::new("robot/arm/left/status").unwrap()));
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyExpr {
    /// Original string form.
    repr: Arc<str>,
    /// Parsed segments.
    segments: Arc<[Segment]>,
}

impl KeyExpr {
    /// Parse and validate a key expression.
    ///
    /// # Errors
    ///
    /// Returns [`KeyExprError`] if the string is empty, has an empty
    /// segment, mixes a wildcard with literal characters, contains `**/**`,
    /// or contains a reserved or non-printable character.
    pub fn new(expr: impl AsRef<str>) -> Result<Self, KeyExprError> {
        let expr = expr.as_ref();
        let segments = Self::parse(expr)?;
        Ok(Self {
            repr: Arc::from(expr),
            segments: Arc::from(segments),
        })
    }

    /// The expression as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.repr
    }

    /// The parsed segments.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Whether the expression contains any wildcard.
    #[must_use]
    pub fn is_wild(&self) -> bool {
        self.segments.iter().any(Segment::is_wild)
    }

    /// Append `suffix` (itself a key expression) to this one.
    ///
    /// # Errors
    ///
    /// Returns [`KeyExprError`] if the joined string is not a valid expression.
    pub fn join(&self, suffix: &str) -> Result<Self, KeyExprError> {
        Self::new(format!("{}{}{}", self.repr, SEGMENT_SEPARATOR, suffix))
    }

    /// Check whether this pattern matches a concrete key.
    ///
    /// A `candidate` containing wildcards never matches. `*` consumes one
    /// segment; `**` consumes zero or more, backtracking as needed so that
    /// later literal segments can still line up.
    #[must_use]
    pub fn matches(&self, candidate: &KeyExpr) -> bool {
        if candidate.is_wild() {
            return false;
        }

        let pattern = &self.segments;
        let target = &candidate.segments;
        let mut p = 0;
        let mut t = 0;
        // Position just after the last `**` seen, and the target index it
        // has absorbed up to.
        let mut resume: Option<(usize, usize)> = None;

        while t < target.len() {
            match pattern.get(p) {
                Some(Segment::Multi) => {
                    resume = Some((p + 1, t));
                    p += 1;
                    continue;
                }
                Some(Segment::Single) => {
                    p += 1;
                    t += 1;
                    continue;
                }
                Some(Segment::Literal(lit))
                    if matches!(&target[t], Segment::Literal(name) if name == lit) =>
                {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }

            // Mismatch: let the last `**` absorb one more segment.
            match resume {
                Some((resume_p, absorbed)) => {
                    resume = Some((resume_p, absorbed + 1));
                    p = resume_p;
                    t = absorbed + 1;
                }
                None => return false,
            }
        }

        pattern[p..].iter().all(|s| *s == Segment::Multi)
    }

    /// Check whether some concrete key is matched by both expressions.
    ///
    /// Symmetric in `self` and `other`; either side may contain wildcards.
    #[must_use]
    pub fn intersects(&self, other: &KeyExpr) -> bool {
        let a = &self.segments;
        let b = &other.segments;
        let (n, m) = (a.len(), b.len());
        let width = m + 1;

        // table[i * width + j]: do a[i..] and b[j..] intersect?
        let mut table = vec![false; (n + 1) * width];
        table[n * width + m] = true;

        for i in (0..=n).rev() {
            for j in (0..=m).rev() {
                if i == n && j == m {
                    continue;
                }
                let value = if i == n {
                    b[j] == Segment::Multi && table[i * width + j + 1]
                } else if j == m {
                    a[i] == Segment::Multi && table[(i + 1) * width + j]
                } else {
                    match (&a[i], &b[j]) {
                        (Segment::Multi, _) | (_, Segment::Multi) => {
                            table[(i + 1) * width + j] || table[i * width + j + 1]
                        }
                        (Segment::Literal(x), Segment::Literal(y)) => {
                            x == y && table[(i + 1) * width + j + 1]
                        }
                        _ => table[(i + 1) * width + j + 1],
                    }
                };
                table[i * width + j] = value;
            }
        }

        table[0]
    }

    fn parse(expr: &str) -> Result<Vec<Segment>, KeyExprError> {
        if expr.is_empty() {
            return Err(KeyExprError::Empty);
        }

        let mut segments = Vec::new();
        for (position, part) in expr.split(SEGMENT_SEPARATOR).enumerate() {
            if part.is_empty() {
                return Err(KeyExprError::EmptySegment { position });
            }

            let segment = if part == WILDCARD_SINGLE {
                Segment::Single
            } else if part == WILDCARD_MULTI {
                if segments.last() == Some(&Segment::Multi) {
                    return Err(KeyExprError::RedundantMultiWildcard { position });
                }
                Segment::Multi
            } else {
                if part.contains('*') {
                    return Err(KeyExprError::PartialWildcard {
                        segment: part.to_string(),
                    });
                }
                let invalid = part
                    .chars()
                    .find(|c| RESERVED_CHARS.contains(c) || c.is_whitespace() || c.is_control());
                if let Some(character) = invalid {
                    return Err(KeyExprError::InvalidCharacter {
                        segment: part.to_string(),
                        character,
                    });
                }
                Segment::Literal(part.to_string())
            };

            segments.push(segment);
        }

        Ok(segments)
    }
}

impl fmt::Display for KeyExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr)
    }
}

impl fmt::Debug for KeyExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyExpr({})", self.repr)
    }
}

impl AsRef<str> for KeyExpr {
    fn as_ref(&self) -> &str {
        &self.repr
    }
}

impl FromStr for KeyExpr {
    type Err = KeyExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for KeyExpr {
    type Error = KeyExprError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<String> for KeyExpr {
    type Error = KeyExprError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&String> for KeyExpr {
    type Error = KeyExprError;

    fn try_from(value: &String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<KeyExpr> for String {
    fn from(value: KeyExpr) -> Self {
        value.repr.to_string()
    }
}

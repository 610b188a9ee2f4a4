//! Switch triggers: decide, line by line, when a running child's clock jumps.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{SkewError, SkewResult};

/// Inspects one line of child output (without its line terminator).
pub trait LineMatcher: Send {
    fn matches(&self, line: &str) -> bool;
}

/// Matches lines starting with a literal prefix.
#[derive(Debug, Clone)]
pub struct PrefixMatcher {
    prefix: String,
}

impl PrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl LineMatcher for PrefixMatcher {
    fn matches(&self, line: &str) -> bool {
        line.starts_with(&self.prefix)
    }
}

/// Matches lines containing a regex match anywhere.
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    re: Regex,
}

impl RegexMatcher {
    pub fn new(pattern: &str) -> SkewResult<Self> {
        let re = Regex::new(pattern).map_err(|e| SkewError::Trigger {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { re })
    }
}

impl LineMatcher for RegexMatcher {
    fn matches(&self, line: &str) -> bool {
        self.re.is_match(line)
    }
}

/// Serializable description of a switch trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Literal prefix of the output line.
    Prefix(String),
    /// Regular expression searched in the output line.
    Pattern(String),
}

impl Trigger {
    pub fn prefix(text: impl Into<String>) -> Self {
        Self::Prefix(text.into())
    }

    pub fn pattern(text: impl Into<String>) -> Self {
        Self::Pattern(text.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Prefix(s) | Self::Pattern(s) => s,
        }
    }

    /// Build the matcher invoked once per output line.
    pub fn matcher(&self) -> SkewResult<Box<dyn LineMatcher>> {
        match self {
            Self::Prefix(p) if p.is_empty() => Err(SkewError::Trigger {
                pattern: String::new(),
                message: "empty prefix would match every line".into(),
            }),
            Self::Prefix(p) => Ok(Box::new(PrefixMatcher::new(p.clone()))),
            Self::Pattern(p) => Ok(Box::new(RegexMatcher::new(p)?)),
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prefix(p) => write!(f, "{}", p),
            Self::Pattern(p) => write!(f, "/{}/", p),
        }
    }
}

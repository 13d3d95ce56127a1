//! Line matching and named-capture extraction.

use regex::Regex;

use crate::error::{ConfigError, PatternSyntaxSnafu};
use snafu::prelude::*;

/// A single named capture extracted from a matched line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedField {
    pub name: String,
    pub value: String,
}

/// Tests lines against a compiled pattern and extracts named captures.
///
/// Capture groups are reported in declaration order; unnamed groups are
/// omitted. This lets a pattern like
/// `(?P<host>\w+) sshd\[\d+\]: Accepted publickey for (?P<user>\w+)`
/// turn each match into structured message fields.
#[derive(Debug)]
pub struct LineMatcher {
    regex: Regex,
}

impl LineMatcher {
    /// Compile `pattern`. A syntax error is fatal at startup.
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(pattern).context(PatternSyntaxSnafu)?;
        Ok(Self { regex })
    }

    /// Test `line`; on a match, return the named captures in the order
    /// their groups are declared in the pattern.
    ///
    /// A named group that did not participate in the match yields an
    /// empty value rather than being dropped, so downstream field lists
    /// keep a stable shape.
    pub fn captures(&self, line: &str) -> Option<Vec<CapturedField>> {
        let caps = self.regex.captures(line)?;

        let fields = self
            .regex
            .capture_names()
            .flatten()
            .map(|name| CapturedField {
                name: name.to_string(),
                value: caps
                    .name(name)
                    .map_or_else(String::new, |m| m.as_str().to_string()),
            })
            .collect();

        Some(fields)
    }
}

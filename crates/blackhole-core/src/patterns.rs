//! Offender extraction from raw log lines
//!
//! A [`PatternSet`] is an ordered list of [`LineMatcher`]s. The first matcher
//! that captures something decides the outcome for the line; later matchers
//! are never consulted. New detection rules are added by appending matchers,
//! nothing else in the engine needs to know about them.

use regex::Regex;
use std::fmt;
use std::net::IpAddr;
use std::sync::LazyLock;
use tracing::debug;

use crate::config::DetectionConfig;
use crate::error::{Error, Result};

/// Failed password / public key authentication, optionally for an invalid user
pub const FAILED_AUTH_PATTERN: &str =
    r"Failed (?:password|publickey) for (?:invalid user )?[^\s]+ from ([^\s]+) port";

/// Connection attempt naming a user that does not exist
pub const INVALID_USER_PATTERN: &str = r"Invalid user [^\s]+ from ([^\s]+)";

static FAILED_AUTH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(FAILED_AUTH_PATTERN).expect("built-in pattern is valid"));

static INVALID_USER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(INVALID_USER_PATTERN).expect("built-in pattern is valid"));

/// A single extraction rule
///
/// Implementations return the raw text of the offending address, or `None`
/// when the line does not match. Empty captures count as no match.
pub trait LineMatcher: Send + Sync + fmt::Debug {
    /// Capture the source address from `line`
    fn capture<'a>(&self, line: &'a str) -> Option<&'a str>;

    /// Human readable description (for logging)
    fn describe(&self) -> &str;
}

/// Regex-backed matcher whose single capture group is the address
#[derive(Debug, Clone)]
pub struct RegexMatcher {
    regex: Regex,
}

impl RegexMatcher {
    /// Compile a matcher from a pattern
    ///
    /// The pattern must contain exactly one capture group.
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)?;
        Self::from_regex(regex)
    }

    /// Wrap an already compiled regex
    pub fn from_regex(regex: Regex) -> Result<Self> {
        // captures_len() counts the implicit whole-match group
        let groups = regex.captures_len() - 1;
        if groups != 1 {
            return Err(Error::pattern(format!(
                "pattern '{}' must have exactly one capture group, found {}",
                regex.as_str(),
                groups
            )));
        }
        Ok(Self { regex })
    }
}

impl LineMatcher for RegexMatcher {
    fn capture<'a>(&self, line: &'a str) -> Option<&'a str> {
        self.regex
            .captures(line)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .filter(|s| !s.is_empty())
    }

    fn describe(&self) -> &str {
        self.regex.as_str()
    }
}

/// Ordered, first-match-wins list of extraction rules
#[derive(Debug, Default)]
pub struct PatternSet {
    matchers: Vec<Box<dyn LineMatcher>>,
}

impl PatternSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// The canonical sshd rule set (failed password/publickey)
    pub fn sshd() -> Self {
        Self::new().with_matcher(RegexMatcher {
            regex: FAILED_AUTH.clone(),
        })
    }

    /// Build the rule set described by the configuration
    ///
    /// Order: failed auth, then invalid user (if enabled), then extra patterns
    /// in the order given.
    pub fn from_config(config: &DetectionConfig) -> Result<Self> {
        let mut set = Self::sshd();

        if config.match_invalid_user {
            set.push(RegexMatcher {
                regex: INVALID_USER.clone(),
            });
        }

        for pattern in &config.extra_patterns {
            set.push(RegexMatcher::new(pattern)?);
        }

        Ok(set)
    }

    /// Append a matcher (builder style)
    pub fn with_matcher(mut self, matcher: impl LineMatcher + 'static) -> Self {
        self.push(matcher);
        self
    }

    /// Append a matcher
    pub fn push(&mut self, matcher: impl LineMatcher + 'static) {
        self.matchers.push(Box::new(matcher));
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    /// Whether the set has no rules
    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }

    /// Extract the offending address from a log line
    ///
    /// Returns `None` when no rule matches, or when the first matching rule
    /// captured something that is not an IP literal. IPv4-mapped IPv6
    /// addresses are folded to plain IPv4.
    pub fn extract(&self, line: &str) -> Option<IpAddr> {
        let (matcher, raw) = self
            .matchers
            .iter()
            .find_map(|m| m.capture(line).map(|raw| (m, raw)))?;

        match raw.parse::<IpAddr>() {
            Ok(addr) => Some(addr.to_canonical()),
            Err(_) => {
                debug!(
                    capture = raw,
                    rule = matcher.describe(),
                    "Captured text is not an IP address, ignoring line"
                );
                None
            }
        }
    }
}

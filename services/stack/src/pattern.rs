//! Path patterns shared by listener rules and cache behaviors
//!
//! `*` matches any run of characters (including `/`), `?` matches exactly
//! one. Matching is case-sensitive, as on the load balancer and the edge.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RoutingError;

const MAX_PATTERN_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathPattern(String);

impl PathPattern {
    /// Validate a pattern: non-empty, at most 255 characters, no whitespace
    pub fn new(pattern: &str) -> Result<Self, RoutingError> {
        let invalid = |reason: &str| RoutingError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: reason.to_string(),
        };
        if pattern.is_empty() {
            return Err(invalid("pattern is empty"));
        }
        if pattern.len() > MAX_PATTERN_LEN {
            return Err(invalid("pattern is longer than 255 characters"));
        }
        if pattern.chars().any(char::is_whitespace) {
            return Err(invalid("pattern contains whitespace"));
        }
        Ok(Self(pattern.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Characters before the first wildcard; longer means more specific
    pub fn literal_prefix(&self) -> &str {
        let end = self.0.find(&['*', '?'][..]).unwrap_or(self.0.len());
        &self.0[..end]
    }

    /// `*` matches any run of characters, `?` exactly one
    pub fn matches(&self, path: &str) -> bool {
        wildcard_match(self.0.as_bytes(), path.as_bytes())
    }
}

/// Greedy match with single-star backtracking
fn wildcard_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == b'?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == b'*' {
        p += 1;
    }
    p == pattern.len()
}

impl fmt::Display for PathPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PathPattern {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PathPattern {
    type Error = RoutingError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<PathPattern> for String {
    fn from(pattern: PathPattern) -> Self {
        pattern.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(s: &str) -> PathPattern {
        PathPattern::new(s).unwrap()
    }

    #[test]
    fn test_prefix_star() {
        let api = pattern("/api/*");
        assert!(api.matches("/api/health"));
        assert!(api.matches("/api/v1/tokens/42"));
        assert!(api.matches("/api/"));
        assert!(!api.matches("/api"));
        assert!(!api.matches("/apis/x"));
        assert!(!api.matches("/API/health"));
    }

    #[test]
    fn test_question_mark_and_inner_star() {
        assert!(pattern("/img/?.png").matches("/img/a.png"));
        assert!(!pattern("/img/?.png").matches("/img/ab.png"));
        assert!(pattern("/*/thumb/*").matches("/nft-media/thumb/1.jpg"));
        assert!(!pattern("/*/thumb/*").matches("/nft-media/full/1.jpg"));
    }

    #[test]
    fn test_catch_all() {
        let all = pattern("*");
        assert!(all.matches(""));
        assert!(all.matches("/anything/at/all"));
        assert_eq!(all.literal_prefix(), "");
        assert_eq!(pattern("/nft-media/*").literal_prefix(), "/nft-media/");
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(PathPattern::new("").is_err());
        assert!(PathPattern::new("/a b/*").is_err());
        assert!(serde_json::from_str::<PathPattern>("\"\"").is_err());
        assert_eq!(
            serde_json::from_str::<PathPattern>("\"/api/*\"").unwrap(),
            pattern("/api/*")
        );
    }
}

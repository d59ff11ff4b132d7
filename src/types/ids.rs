//! Newtype wrappers for domain identifiers.
//!
//! These keep pull request numbers, commit SHAs and comment IDs from being
//! mixed up with each other or with plain integers and strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A pull request (issue) number within a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrNumber(pub u64);

impl fmt::Display for PrNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for PrNumber {
    fn from(n: u64) -> Self {
        PrNumber(n)
    }
}

/// A git commit SHA.
///
/// Not validated: GitHub hands us full 40-character SHAs, but batch
/// descriptors and tests routinely carry abbreviated ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sha(pub String);

impl Sha {
    pub fn new(s: impl Into<String>) -> Self {
        Sha(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short (7-character) version of the SHA for display.
    pub fn short(&self) -> &str {
        self.0.get(..7).unwrap_or(&self.0)
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Sha {
    fn from(s: String) -> Self {
        Sha(s)
    }
}

impl From<&str> for Sha {
    fn from(s: &str) -> Self {
        Sha(s.to_string())
    }
}

/// A repository identifier (owner/repo format).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    pub owner: String,
    pub repo: String,
}

impl RepoId {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        RepoId {
            owner: owner.into(),
            repo: repo.into(),
        }
    }
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// Error returned when a string is not of the form `owner/repo`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid repository {0:?}: expected owner/repo")]
pub struct InvalidRepoId(pub String);

impl FromStr for RepoId {
    type Err = InvalidRepoId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((owner, repo))
                if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') =>
            {
                Ok(RepoId::new(owner, repo))
            }
            _ => Err(InvalidRepoId(s.to_string())),
        }
    }
}

/// A GitHub issue comment ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentId(pub u64);

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod pr_number {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn display_format(n: u64) {
                prop_assert_eq!(format!("{}", PrNumber(n)), format!("#{}", n));
            }

            #[test]
            fn ordering_matches_underlying(a: u64, b: u64) {
                prop_assert_eq!(PrNumber(a).cmp(&PrNumber(b)), a.cmp(&b));
            }
        }
    }

    mod sha {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn short_returns_7_chars(s in "[0-9a-f]{40}") {
                let sha = Sha::new(&s);
                prop_assert_eq!(sha.short(), &s[..7]);
            }
        }

        #[test]
        fn short_handles_short_input() {
            assert_eq!(Sha::new("abc").short(), "abc");
        }

        #[test]
        fn serializes_as_plain_string() {
            let json = serde_json::to_string(&Sha::new("f00d")).unwrap();
            assert_eq!(json, "\"f00d\"");
        }
    }

    mod repo_id {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn display_then_parse(
                owner in "[a-zA-Z][a-zA-Z0-9-]{0,38}",
                repo in "[a-zA-Z][a-zA-Z0-9_.-]{0,99}"
            ) {
                let id = RepoId::new(&owner, &repo);
                let parsed: RepoId = id.to_string().parse().unwrap();
                prop_assert_eq!(id, parsed);
            }
        }

        #[test]
        fn rejects_malformed() {
            assert!("kubernetes".parse::<RepoId>().is_err());
            assert!("/repo".parse::<RepoId>().is_err());
            assert!("owner/".parse::<RepoId>().is_err());
            assert!("a/b/c".parse::<RepoId>().is_err());
        }
    }
}

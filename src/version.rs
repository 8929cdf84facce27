//! `major.minor.patch[-pre][+build]` versions used for cluster version and
//! downgrade bookkeeping.

use std::cmp::Ordering;
use std::fmt;

use crate::error::VersionError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre_release: Vec<String>,
    pub metadata: Option<String>,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version { major, minor, patch, pre_release: Vec::new(), metadata: None }
    }

    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let (rest, metadata) = match input.split_once('+') {
            Some((rest, meta)) => (rest, Some(meta)),
            None => (input, None),
        };
        let (core, pre) = match rest.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (rest, None),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() != 3 {
            return Err(VersionError::NotDottedTri(input.to_owned()));
        }
        let number = |part: &str| {
            part.parse::<u64>().map_err(|_| VersionError::InvalidNumber {
                input: input.to_owned(),
                part: part.to_owned(),
            })
        };

        let mut pre_release = Vec::new();
        if let Some(pre) = pre {
            for ident in pre.split('.') {
                if !is_identifier(ident) {
                    return Err(VersionError::InvalidIdentifier(ident.to_owned()));
                }
                pre_release.push(ident.to_owned());
            }
        }
        if let Some(meta) = metadata {
            if !meta.split('.').all(is_identifier) {
                return Err(VersionError::InvalidIdentifier(meta.to_owned()));
            }
        }

        Ok(Version {
            major: number(parts[0])?,
            minor: number(parts[1])?,
            patch: number(parts[2])?,
            pre_release,
            metadata: metadata.map(str::to_owned),
        })
    }

    /// Parses a version that was committed to the log.
    ///
    /// # Panics
    /// On any malformed input. Versions reach the log only after the proposer
    /// has validated them.
    pub fn must_parse(input: &str) -> Self {
        match Version::parse(input) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(version = input, error = %e, "committed version is malformed");
                panic!("{e}");
            }
        }
    }

    /// Drops the patch level and any suffix; cluster versions compare at
    /// `major.minor` granularity.
    pub fn major_minor(&self) -> Version {
        Version::new(self.major, self.minor, 0)
    }
}

fn is_identifier(ident: &str) -> bool {
    !ident.is_empty() && ident.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (self.pre_release.is_empty(), other.pre_release.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.pre_release.cmp(&other.pre_release),
            })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.pre_release.is_empty() {
            write!(f, "-{}", self.pre_release.join("."))?;
        }
        if let Some(meta) = &self.metadata {
            write!(f, "+{meta}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_suffixed_versions() {
        assert_eq!(Version::parse("3.5.0").unwrap(), Version::new(3, 5, 0));
        let v = Version::parse("3.6.0-alpha.1+build-7").unwrap();
        assert_eq!(v.pre_release, vec!["alpha".to_string(), "1".to_string()]);
        assert_eq!(v.metadata.as_deref(), Some("build-7"));
        assert_eq!(v.to_string(), "3.6.0-alpha.1+build-7");
    }

    #[test]
    fn rejects_malformed_versions_with_stable_wording() {
        let err = Version::parse("3.5").unwrap_err();
        assert!(err.to_string().contains("is not in dotted-tri format"));

        let err = Version::parse("3.x.0").unwrap_err();
        assert!(err.to_string().contains("invalid version number"));

        let err = Version::parse("3.5.0-al pha").unwrap_err();
        assert!(err.to_string().contains("is not a valid semver identifier"));

        let err = Version::parse("").unwrap_err();
        assert!(matches!(err, VersionError::NotDottedTri(_)));
    }

    #[test]
    fn pre_release_sorts_before_release() {
        let pre = Version::parse("3.5.0-rc.1").unwrap();
        assert!(pre < Version::new(3, 5, 0));
        assert!(Version::new(3, 4, 9) < pre);
    }

    #[test]
    #[should_panic(expected = "is not in dotted-tri format")]
    fn must_parse_panics_on_garbage() {
        Version::must_parse("garbage");
    }
}

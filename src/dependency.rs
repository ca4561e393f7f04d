// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Dependency expressions and their satisfaction.

Pacman metadata expresses relationships between packages as
`name[cmp version]` strings, e.g. `glibc>=2.35` or `python`. The same
syntax is shared by `depends`, `makedepends`, `checkdepends`, `conflicts`,
`provides` and `replaces` entries. [VersionRequirement] is the parsed
form, and [satisfies_requirement] implements the resolution rule used for
upgrade gating and build requirement validation.
*/

use {
    crate::{
        error::{RepositoryError, Result},
        package_version::PackageVersion,
    },
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        str::FromStr,
    },
};

/// A comparison operator in a versioned dependency expression.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VersionComparison {
    Less,
    LessOrEqual,
    Equal,
    GreaterOrEqual,
    Greater,
}

impl VersionComparison {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Less => "<",
            Self::LessOrEqual => "<=",
            Self::Equal => "=",
            Self::GreaterOrEqual => ">=",
            Self::Greater => ">",
        }
    }

    /// Whether `ordering` (candidate compared against required version)
    /// satisfies this operator.
    pub fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Self::Less => ordering == Ordering::Less,
            Self::LessOrEqual => ordering != Ordering::Greater,
            Self::Equal => ordering == Ordering::Equal,
            Self::GreaterOrEqual => ordering != Ordering::Less,
            Self::Greater => ordering == Ordering::Greater,
        }
    }
}

impl Display for VersionComparison {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed `name[cmp version]` dependency expression.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VersionRequirement {
    pub name: String,
    pub constraint: Option<(VersionComparison, PackageVersion)>,
}

impl VersionRequirement {
    /// Parse an expression like `gcc-libs` or `glibc>=2.35-2`.
    pub fn parse(s: &str) -> Result<Self> {
        let malformed = || RepositoryError::InvalidConstraint(s.to_string());

        let (name, constraint) = match s.find(|c| matches!(c, '<' | '>' | '=')) {
            Some(pos) => {
                let name = &s[0..pos];
                let rest = &s[pos..];

                let (cmp, version) = if let Some(version) = rest.strip_prefix("<=") {
                    (VersionComparison::LessOrEqual, version)
                } else if let Some(version) = rest.strip_prefix(">=") {
                    (VersionComparison::GreaterOrEqual, version)
                } else if let Some(version) = rest.strip_prefix('<') {
                    (VersionComparison::Less, version)
                } else if let Some(version) = rest.strip_prefix('>') {
                    (VersionComparison::Greater, version)
                } else if let Some(version) = rest.strip_prefix('=') {
                    (VersionComparison::Equal, version)
                } else {
                    return Err(malformed());
                };

                let version = PackageVersion::parse(version).map_err(|_| malformed())?;

                (name, Some((cmp, version)))
            }
            None => (s, None),
        };

        if name.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            name: name.to_string(),
            constraint,
        })
    }

    /// Whether a concrete `(name, version)` satisfies this requirement.
    pub fn satisfied_by(&self, name: &str, version: &PackageVersion) -> bool {
        if name != self.name {
            return false;
        }

        match &self.constraint {
            None => true,
            Some((cmp, required)) => cmp.accepts(version.cmp(required)),
        }
    }
}

impl Display for VersionRequirement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)?;

        if let Some((cmp, version)) = &self.constraint {
            write!(f, "{}{}", cmp, version)?;
        }

        Ok(())
    }
}

impl FromStr for VersionRequirement {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Whether a candidate package satisfies `requirement`.
///
/// The candidate matches through its own name and version, or through any
/// of its `provides` entries. A provide may carry its own version
/// (`libfoo.so=2`); an unversioned provide satisfies only unversioned
/// requirements, matching pacman's resolver.
pub fn satisfies_requirement(
    requirement: &VersionRequirement,
    name: &str,
    version: &PackageVersion,
    provides: &[String],
) -> bool {
    if requirement.satisfied_by(name, version) {
        return true;
    }

    provides.iter().any(|provide| {
        let (provide_name, provide_version) = match provide.split_once('=') {
            Some((n, v)) => (n, PackageVersion::parse(v).ok()),
            None => (provide.as_str(), None),
        };

        if provide_name != requirement.name {
            return false;
        }

        match (&requirement.constraint, provide_version) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some((cmp, required)), Some(provided)) => cmp.accepts(provided.cmp(required)),
        }
    })
}

/// Convenience form of [satisfies_requirement] on unparsed version strings.
///
/// Total and infallible on valid input; malformed versions surface as
/// [RepositoryError::InvalidConstraint] from the parsing stage instead.
pub fn version_satisfies(version: &str, cmp: VersionComparison, required: &str) -> Result<bool> {
    let version = PackageVersion::parse(version)?;
    let required = PackageVersion::parse(required)?;

    Ok(cmp.accepts(version.cmp(&required)))
}

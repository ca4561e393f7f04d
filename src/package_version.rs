// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Pacman package version string handling. */

use {
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        num::ParseIntError,
        str::FromStr,
    },
    thiserror::Error,
};

#[derive(Clone, Debug, Error)]
pub enum VersionError {
    #[error("error parsing string to integer: {0}")]
    ParseInt(#[from] ParseIntError),

    #[error("the epoch component has non-digit characters: {0}")]
    EpochNonNumeric(String),

    #[error("the pkgver component is empty or has an illegal character: {0}")]
    PkgverIllegalChar(String),

    #[error("the pkgrel component is not of the form digits[.digits]: {0}")]
    PkgrelIllegal(String),
}

pub type Result<T> = std::result::Result<T, VersionError>;

/// A pacman package version.
///
/// Versions consist of an optional numeric epoch, a `pkgver` and an
/// optional `pkgrel`, serialized as `[epoch:]pkgver[-pkgrel]`. The
/// comparison semantics match libalpm's `vercmp`, so repositories built
/// with this type order upgrades exactly like pacman does.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PackageVersion {
    epoch: u64,
    pkgver: String,
    pkgrel: Option<String>,
}

impl PackageVersion {
    /// Construct an instance by parsing a version string.
    pub fn parse(s: &str) -> Result<Self> {
        // The epoch is the part before a colon, if present. pkgver and
        // pkgrel are discovered by splitting on the last hyphen.
        let (epoch, remainder) = if let Some(pos) = s.find(':') {
            (Some(&s[0..pos]), &s[pos + 1..])
        } else {
            (None, s)
        };

        let (pkgver, pkgrel) = if let Some(pos) = remainder.rfind('-') {
            (&remainder[0..pos], Some(&remainder[pos + 1..]))
        } else {
            (remainder, None)
        };

        let epoch = if let Some(epoch) = epoch {
            if epoch.is_empty() || !epoch.chars().all(|c| c.is_ascii_digit()) {
                return Err(VersionError::EpochNonNumeric(s.to_string()));
            }

            u64::from_str(epoch)?
        } else {
            0
        };

        // pkgver may contain alphanumerics, full stops, underscores and
        // plus signs. Hyphens belong to the pkgrel separator only.
        if pkgver.is_empty()
            || !pkgver
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+'))
        {
            return Err(VersionError::PkgverIllegalChar(s.to_string()));
        }

        let pkgrel = if let Some(pkgrel) = pkgrel {
            if !is_valid_pkgrel(pkgrel) {
                return Err(VersionError::PkgrelIllegal(s.to_string()));
            }

            Some(pkgrel.to_string())
        } else {
            None
        };

        Ok(Self {
            epoch,
            pkgver: pkgver.to_string(),
            pkgrel,
        })
    }

    /// The `epoch` component. Defaults to `0` when the string had none.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The `pkgver` component of the version string.
    pub fn pkgver(&self) -> &str {
        &self.pkgver
    }

    /// The `pkgrel` component of the version string, if present.
    pub fn pkgrel(&self) -> Option<&str> {
        self.pkgrel.as_deref()
    }
}

fn is_valid_pkgrel(s: &str) -> bool {
    let mut parts = s.splitn(2, '.');

    let integral = parts.next().unwrap_or("");
    let valid_digits = |p: &str| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit());

    match parts.next() {
        Some(minor) => valid_digits(integral) && valid_digits(minor),
        None => valid_digits(integral),
    }
}

impl Display for PackageVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }

        f.write_str(&self.pkgver)?;

        if let Some(pkgrel) = &self.pkgrel {
            write!(f, "-{}", pkgrel)?;
        }

        Ok(())
    }
}

impl FromStr for PackageVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Compare two version component strings the way libalpm's `rpmvercmp` does.
///
/// Non-alphanumeric characters act as segment separators. Each iteration
/// takes the next run of digits or the next run of letters (never mixing),
/// compares digit runs numerically (insensitive to leading zeros) and
/// letter runs byte-lexically. A digit run outranks a letter run. When one
/// side runs out first, the longer side wins unless its remainder starts
/// with a letter run, which loses (`1.0a` sorts before `1.0`).
pub fn vercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let a = a.as_bytes();
    let b = b.as_bytes();

    let mut one_start = 0;
    let mut two_start = 0;
    let mut one_end = 0;
    let mut two_end = 0;

    while one_start < a.len() && two_start < b.len() {
        while one_start < a.len() && !a[one_start].is_ascii_alphanumeric() {
            one_start += 1;
        }
        while two_start < b.len() && !b[two_start].is_ascii_alphanumeric() {
            two_start += 1;
        }

        if one_start >= a.len() || two_start >= b.len() {
            break;
        }

        // Different separator run lengths decide the comparison outright.
        if one_start - one_end != two_start - two_end {
            return if one_start - one_end < two_start - two_end {
                Ordering::Less
            } else {
                Ordering::Greater
            };
        }

        one_end = one_start;
        two_end = two_start;

        let is_digit_segment = a[one_start].is_ascii_digit();

        if is_digit_segment {
            while one_end < a.len() && a[one_end].is_ascii_digit() {
                one_end += 1;
            }
            while two_end < b.len() && b[two_end].is_ascii_digit() {
                two_end += 1;
            }
        } else {
            while one_end < a.len() && a[one_end].is_ascii_alphabetic() {
                one_end += 1;
            }
            while two_end < b.len() && b[two_end].is_ascii_alphabetic() {
                two_end += 1;
            }
        }

        let mut one = &a[one_start..one_end];
        let mut two = &b[two_start..two_end];

        // Mixed segment types: the numeric side is always newer.
        if two.is_empty() {
            return if is_digit_segment {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        if is_digit_segment {
            while let Some((b'0', rest)) = one.split_first() {
                one = rest;
            }
            while let Some((b'0', rest)) = two.split_first() {
                two = rest;
            }

            // More digits wins once leading zeros are discarded.
            match one.len().cmp(&two.len()) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }

        match one.cmp(two) {
            Ordering::Equal => {}
            unequal => return unequal,
        }

        one_start = one_end;
        two_start = two_end;
    }

    let one = &a[one_start..];
    let two = &b[two_start..];

    if one.is_empty() && two.is_empty() {
        return Ordering::Equal;
    }

    // A remaining alpha tail never beats an empty string.
    if (one.is_empty() && !two[0].is_ascii_alphabetic())
        || (!one.is_empty() && one[0].is_ascii_alphabetic())
    {
        Ordering::Less
    } else {
        Ordering::Greater
    }
}

impl PartialOrd<Self> for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // Epochs are compared numerically, then pkgver and pkgrel
        // segmentwise. A missing pkgrel on either side makes the pkgrel
        // comparison a tie.
        match self.epoch.cmp(&other.epoch) {
            Ordering::Equal => {}
            unequal => return unequal,
        }

        match vercmp(&self.pkgver, &other.pkgver) {
            Ordering::Equal => {}
            unequal => return unequal,
        }

        match (&self.pkgrel, &other.pkgrel) {
            (Some(a), Some(b)) => vercmp(a, b),
            _ => Ordering::Equal,
        }
    }
}

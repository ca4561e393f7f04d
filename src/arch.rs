// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! CPU architectures understood by pacman repositories. */

use {
    serde::{Deserialize, Serialize},
    std::{
        fmt::{Display, Formatter},
        str::FromStr,
    },
};

/// A CPU architecture a package can be built for.
///
/// `Any` denotes architecture independent packages. The enumeration is
/// closed: package metadata naming an architecture outside of it is
/// rejected during inspection.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    Aarch64,
    Any,
    Arm,
    Armv6h,
    Armv7h,
    I486,
    I686,
    Pentium4,
    Riscv32,
    Riscv64,
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "x86_64_v2")]
    X86_64V2,
    #[serde(rename = "x86_64_v3")]
    X86_64V3,
    #[serde(rename = "x86_64_v4")]
    X86_64V4,
}

impl Architecture {
    /// The architecture name as it appears in file names and metadata.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aarch64 => "aarch64",
            Self::Any => "any",
            Self::Arm => "arm",
            Self::Armv6h => "armv6h",
            Self::Armv7h => "armv7h",
            Self::I486 => "i486",
            Self::I686 => "i686",
            Self::Pentium4 => "pentium4",
            Self::Riscv32 => "riscv32",
            Self::Riscv64 => "riscv64",
            Self::X86_64 => "x86_64",
            Self::X86_64V2 => "x86_64_v2",
            Self::X86_64V3 => "x86_64_v3",
            Self::X86_64V4 => "x86_64_v4",
        }
    }

    /// Whether a package of this architecture can be placed in a repository
    /// for `repo_arch`.
    ///
    /// `Any` packages are accepted everywhere.
    pub fn compatible_with(&self, repo_arch: Architecture) -> bool {
        *self == Self::Any || *self == repo_arch
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "aarch64" => Self::Aarch64,
            "any" => Self::Any,
            "arm" => Self::Arm,
            "armv6h" => Self::Armv6h,
            "armv7h" => Self::Armv7h,
            "i486" => Self::I486,
            "i686" => Self::I686,
            "pentium4" => Self::Pentium4,
            "riscv32" => Self::Riscv32,
            "riscv64" => Self::Riscv64,
            "x86_64" => Self::X86_64,
            "x86_64_v2" => Self::X86_64V2,
            "x86_64_v3" => Self::X86_64V3,
            "x86_64_v4" => Self::X86_64V4,
            other => return Err(format!("unknown architecture: {}", other)),
        })
    }
}

impl Display for Architecture {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The type of a built package, as recorded in `.PKGINFO` version 2.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageType {
    /// A default single package.
    Pkg,
    /// A member of a split package.
    Split,
    /// A debug symbols package.
    Debug,
    /// A source package.
    Src,
}

impl PackageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pkg => "pkg",
            Self::Split => "split",
            Self::Debug => "debug",
            Self::Src => "src",
        }
    }
}

impl FromStr for PackageType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "pkg" => Self::Pkg,
            "split" => Self::Split,
            "debug" => Self::Debug,
            "src" => Self::Src,
            other => return Err(format!("unknown package type: {}", other)),
        })
    }
}

impl Display for PackageType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn architecture_roundtrip() {
        for s in ["any", "x86_64", "x86_64_v3", "aarch64", "armv7h"] {
            assert_eq!(Architecture::from_str(s).unwrap().to_string(), s);
        }

        assert!(Architecture::from_str("amd64").is_err());
    }

    #[test]
    fn any_is_compatible_everywhere() {
        assert!(Architecture::Any.compatible_with(Architecture::X86_64));
        assert!(Architecture::X86_64.compatible_with(Architecture::X86_64));
        assert!(!Architecture::I686.compatible_with(Architecture::X86_64));
    }
}

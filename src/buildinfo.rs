// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `.BUILDINFO` parsing.

`.BUILDINFO` captures the environment a package was built in: the
PKGBUILD checksum, makepkg options and the exact set of packages
installed in the build root. It shares the `key = value` line format of
`.PKGINFO` but carries an explicit `format` key that selects the schema
version. Version 2 added the build tool identity and the start
directory.
*/

use {
    crate::{
        arch::Architecture,
        error::{RepositoryError, Result},
        package_version::PackageVersion,
        pkginfo::PACKAGE_NAME_RE,
    },
    once_cell::sync::Lazy,
    regex::Regex,
    std::{collections::BTreeMap, str::FromStr},
};

const FILE: &str = ".BUILDINFO";

static SHA256_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-f0-9]{64}$").unwrap());

/// makepkg.conf BUILDENV and OPTIONS values, optionally negated.
static MAKEPKG_OPTION_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^!?[\w\-.]+$").unwrap());

fn schema_violation(field: &str) -> RepositoryError {
    RepositoryError::SchemaViolation {
        file: FILE,
        field: field.to_string(),
    }
}

/// A package installed in the build root, from an `installed` entry.
///
/// Serialized as `<name>-<version>-<pkgrel>-<architecture>`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstalledPackage {
    pub name: String,
    pub version: PackageVersion,
    pub architecture: Architecture,
}

impl InstalledPackage {
    pub fn parse(s: &str) -> Result<Self> {
        let violation = || schema_violation("installed");

        let mut parts = s.split('-').collect::<Vec<_>>();
        if parts.len() < 4 {
            return Err(violation());
        }

        let architecture = Architecture::from_str(parts.pop().expect("length checked"))
            .map_err(|_| violation())?;
        let pkgrel = parts.pop().expect("length checked");
        let pkgver = parts.pop().expect("length checked");
        let name = parts.join("-");

        let version = PackageVersion::parse(&format!("{}-{}", pkgver, pkgrel))
            .map_err(|_| violation())?;

        if !PACKAGE_NAME_RE.is_match(&name) {
            return Err(violation());
        }

        Ok(Self {
            name,
            version,
            architecture,
        })
    }
}

impl std::fmt::Display for InstalledPackage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.name, self.version, self.architecture)
    }
}

/// A parsed `.BUILDINFO`, dispatched on the `format` key.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BuildInfo {
    V1(BuildInfoV1),
    V2(BuildInfoV2),
}

/// The fields of a `format = 1` `.BUILDINFO`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildInfoV1 {
    pub pkgname: String,
    pub pkgbase: String,
    pub pkgver: PackageVersion,
    pub pkgarch: Architecture,
    pub pkgbuild_sha256sum: String,
    pub packager: String,
    pub builddate: i64,
    pub builddir: String,
    pub buildenv: Vec<String>,
    pub options: Vec<String>,
    pub installed: Vec<InstalledPackage>,
}

/// The fields of a `format = 2` `.BUILDINFO`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BuildInfoV2 {
    pub info: BuildInfoV1,
    pub startdir: String,
    pub buildtool: String,
    pub buildtoolver: String,
}

impl BuildInfo {
    /// Parse the contents of a `.BUILDINFO` file.
    pub fn parse(data: &str) -> Result<Self> {
        let mut singles: BTreeMap<String, String> = BTreeMap::new();
        let mut multis: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for line in data.lines() {
            let line = line.trim();

            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (key, value) =
                line.split_once(" = ")
                    .ok_or_else(|| RepositoryError::DecodeError {
                        file: FILE,
                        line: line.to_string(),
                    })?;
            let (key, value) = (key.trim(), value.trim());

            match key {
                "buildenv" | "options" | "installed" => {
                    multis
                        .entry(key.to_string())
                        .or_default()
                        .push(value.to_string());
                }
                _ => {
                    singles.insert(key.to_string(), value.to_string());
                }
            }
        }

        let single = |key: &str| -> Result<&str> {
            singles
                .get(key)
                .map(|v| v.as_str())
                .ok_or_else(|| schema_violation(key))
        };

        let format = single("format")?;

        let pkgname = single("pkgname")?.to_string();
        let pkgbase = single("pkgbase")?.to_string();
        for (field, value) in [("pkgname", &pkgname), ("pkgbase", &pkgbase)] {
            if !PACKAGE_NAME_RE.is_match(value) {
                return Err(schema_violation(field));
            }
        }

        let pkgver =
            PackageVersion::parse(single("pkgver")?).map_err(|_| schema_violation("pkgver"))?;
        if pkgver.pkgrel().is_none() {
            return Err(schema_violation("pkgver"));
        }

        let pkgarch = Architecture::from_str(single("pkgarch")?)
            .map_err(|_| schema_violation("pkgarch"))?;

        let pkgbuild_sha256sum = single("pkgbuild_sha256sum")?.to_string();
        if !SHA256_RE.is_match(&pkgbuild_sha256sum) {
            return Err(schema_violation("pkgbuild_sha256sum"));
        }

        let builddate = i64::from_str(single("builddate")?)
            .ok()
            .filter(|date| *date >= 0)
            .ok_or_else(|| schema_violation("builddate"))?;

        let builddir = single("builddir")?.to_string();
        if !builddir.starts_with('/') {
            return Err(schema_violation("builddir"));
        }

        for key in ["buildenv", "options"] {
            if let Some(values) = multis.get(key) {
                if values.iter().any(|v| !MAKEPKG_OPTION_RE.is_match(v)) {
                    return Err(schema_violation(key));
                }
            }
        }

        let installed = multis
            .remove("installed")
            .unwrap_or_default()
            .iter()
            .map(|entry| InstalledPackage::parse(entry))
            .collect::<Result<Vec<_>>>()?;

        let info = BuildInfoV1 {
            packager: single("packager")?.to_string(),
            pkgname,
            pkgbase,
            pkgver,
            pkgarch,
            pkgbuild_sha256sum,
            builddate,
            builddir,
            buildenv: multis.remove("buildenv").unwrap_or_default(),
            options: multis.remove("options").unwrap_or_default(),
            installed,
        };

        match format {
            "1" => Ok(Self::V1(info)),
            "2" => {
                let startdir = single("startdir")?.to_string();
                if !startdir.starts_with('/') {
                    return Err(schema_violation("startdir"));
                }

                let buildtool = single("buildtool")?.to_string();
                if !PACKAGE_NAME_RE.is_match(&buildtool) {
                    return Err(schema_violation("buildtool"));
                }

                let buildtoolver = single("buildtoolver")?.to_string();

                // Packages built with devtools record the exact devtools
                // release as [epoch:]pkgver-pkgrel-arch.
                if buildtool == "devtools" && !is_versioned_tool(&buildtoolver) {
                    return Err(schema_violation("buildtoolver"));
                }

                Ok(Self::V2(BuildInfoV2 {
                    info,
                    startdir,
                    buildtool,
                    buildtoolver,
                }))
            }
            other => Err(RepositoryError::SchemaUnknown(FILE, other.to_string())),
        }
    }

    /// The schema version as recorded in the `format` key.
    pub fn schema_version(&self) -> u32 {
        match self {
            Self::V1(_) => 1,
            Self::V2(_) => 2,
        }
    }

    /// The version independent field set.
    pub fn info(&self) -> &BuildInfoV1 {
        match self {
            Self::V1(info) => info,
            Self::V2(v2) => &v2.info,
        }
    }
}

fn is_versioned_tool(buildtoolver: &str) -> bool {
    match buildtoolver.rsplit_once('-') {
        Some((version, arch)) => {
            Architecture::from_str(arch).is_ok()
                && PackageVersion::parse(version)
                    .map(|v| v.pkgrel().is_some())
                    .unwrap_or(false)
        }
        None => false,
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `.PKGINFO` parsing.

Every built package embeds a `.PKGINFO` member at the archive root
describing the package proper: identity, description, relations and
sizes. The format is line oriented `key = value` text. Repeated keys form
multi-valued fields and comment lines carry the makepkg and fakeroot
versions used for the build.

Two schema versions exist. Version 2 additionally records the package
type (`pkg`, `split`, `debug` or `src`) through `xdata` extra data;
version 1 predates that field. [PkgInfo] is the version-dispatched
result of [PkgInfo::parse].
*/

use {
    crate::{
        arch::{Architecture, PackageType},
        error::{RepositoryError, Result},
        package_version::PackageVersion,
    },
    once_cell::sync::Lazy,
    regex::Regex,
    std::collections::BTreeMap,
    std::str::FromStr,
};

/// Package names: lower case alphanumerics with a limited symbol set,
/// not starting with a hyphen or dot.
pub(crate) static PACKAGE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z\d_@+]+[a-z\d\-._@+]*$").unwrap());

const FILE: &str = ".PKGINFO";

fn schema_violation(field: &str) -> RepositoryError {
    RepositoryError::SchemaViolation {
        file: FILE,
        field: field.to_string(),
    }
}

/// A parsed `.PKGINFO`, dispatched on schema version.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PkgInfo {
    V1(PkgInfoV1),
    V2(PkgInfoV2),
}

/// The fields of a version 1 `.PKGINFO`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PkgInfoV1 {
    pub name: String,
    pub base: String,
    pub version: PackageVersion,
    pub desc: String,
    pub url: String,
    pub builddate: i64,
    pub packager: String,
    /// Installed size in bytes (the `size` key).
    pub isize: u64,
    pub arch: Architecture,
    pub license: Vec<String>,
    pub groups: Vec<String>,
    pub replaces: Vec<String>,
    pub conflicts: Vec<String>,
    pub provides: Vec<String>,
    pub depends: Vec<String>,
    pub optdepends: Vec<String>,
    pub makedepends: Vec<String>,
    pub checkdepends: Vec<String>,
    pub backup: Vec<String>,
    /// Version of makepkg recorded in the generated comment header.
    pub makepkg_version: Option<String>,
    /// Version of fakeroot recorded in the generated comment header.
    pub fakeroot_version: Option<String>,
    /// Unknown keys, preserved verbatim but not validated.
    pub extra: BTreeMap<String, Vec<String>>,
}

/// The fields of a version 2 `.PKGINFO`.
///
/// Carries everything version 1 does plus the package type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PkgInfoV2 {
    pub info: PkgInfoV1,
    pub pkgtype: PackageType,
}

#[derive(Default)]
struct Collector {
    singles: BTreeMap<&'static str, String>,
    multis: BTreeMap<&'static str, Vec<String>>,
    pkgtype: Option<String>,
    makepkg_version: Option<String>,
    fakeroot_version: Option<String>,
    extra: BTreeMap<String, Vec<String>>,
}

const SINGLE_KEYS: &[&str] = &[
    "pkgname",
    "pkgbase",
    "pkgver",
    "pkgdesc",
    "url",
    "builddate",
    "packager",
    "size",
    "arch",
];

const MULTI_KEYS: &[(&str, &str)] = &[
    ("license", "license"),
    ("group", "groups"),
    ("replaces", "replaces"),
    ("conflict", "conflicts"),
    ("provides", "provides"),
    ("depend", "depends"),
    ("optdepend", "optdepends"),
    ("makedepend", "makedepends"),
    ("checkdepend", "checkdepends"),
    ("backup", "backup"),
];

impl Collector {
    fn add(&mut self, key: &str, value: &str, line: &str) -> Result<()> {
        if let Some(known) = SINGLE_KEYS.iter().find(|k| **k == key) {
            self.singles.insert(*known, value.to_string());
            return Ok(());
        }

        if let Some((_, field)) = MULTI_KEYS.iter().find(|(k, _)| *k == key) {
            self.multis
                .entry(*field)
                .or_default()
                .push(value.to_string());
            return Ok(());
        }

        match key {
            "pkgtype" => {
                self.pkgtype = Some(value.to_string());
            }
            // `xdata` nests further `key=value` pairs; only pkgtype is
            // understood so far, others fall through to extra.
            "xdata" => match value.split_once('=') {
                Some(("pkgtype", pkgtype)) => {
                    self.pkgtype = Some(pkgtype.to_string());
                }
                Some(_) | None => {
                    self.extra
                        .entry("xdata".to_string())
                        .or_default()
                        .push(value.to_string());
                }
            },
            _ => {
                if key.is_empty() {
                    return Err(RepositoryError::DecodeError {
                        file: FILE,
                        line: line.to_string(),
                    });
                }

                self.extra
                    .entry(key.to_string())
                    .or_default()
                    .push(value.to_string());
            }
        }

        Ok(())
    }

    fn comment(&mut self, line: &str) {
        // makepkg emits e.g. "# Generated by makepkg 6.0.1" and
        // "# using fakeroot version 1.29".
        let last = line.split_whitespace().last().map(|s| s.to_string());

        if line.contains("makepkg") {
            self.makepkg_version = last;
        } else if line.contains("fakeroot") {
            self.fakeroot_version = last;
        }
    }

    fn single(&self, key: &str) -> Result<&str> {
        self.singles
            .get(key)
            .map(|s| s.as_str())
            .ok_or_else(|| schema_violation(key))
    }

    fn multi(&mut self, field: &str) -> Vec<String> {
        self.multis.remove(field).unwrap_or_default()
    }
}

impl PkgInfo {
    /// Parse the contents of a `.PKGINFO` file.
    pub fn parse(data: &str) -> Result<Self> {
        let mut collector = Collector::default();

        for line in data.lines() {
            let line = line.trim();

            if line.is_empty() {
                continue;
            }

            if let Some(comment) = line.strip_prefix('#') {
                collector.comment(comment);
                continue;
            }

            let (key, value) =
                line.split_once(" = ")
                    .ok_or_else(|| RepositoryError::DecodeError {
                        file: FILE,
                        line: line.to_string(),
                    })?;

            collector.add(key.trim(), value.trim(), line)?;
        }

        let name = collector.single("pkgname")?.to_string();
        let base = collector.single("pkgbase")?.to_string();

        for (field, value) in [("pkgname", &name), ("pkgbase", &base)] {
            if !PACKAGE_NAME_RE.is_match(value) {
                return Err(schema_violation(field));
            }
        }

        let version = PackageVersion::parse(collector.single("pkgver")?)
            .map_err(|_| schema_violation("pkgver"))?;
        if version.pkgrel().is_none() {
            return Err(schema_violation("pkgver"));
        }

        let builddate = i64::from_str(collector.single("builddate")?)
            .ok()
            .filter(|date| *date >= 0)
            .ok_or_else(|| schema_violation("builddate"))?;

        let isize =
            u64::from_str(collector.single("size")?).map_err(|_| schema_violation("size"))?;

        let arch = Architecture::from_str(collector.single("arch")?)
            .map_err(|_| schema_violation("arch"))?;

        let license = collector.multi("license");
        if license.is_empty() {
            return Err(schema_violation("license"));
        }

        let info = PkgInfoV1 {
            desc: collector.single("pkgdesc")?.to_string(),
            url: collector.single("url")?.to_string(),
            packager: collector.single("packager")?.to_string(),
            name,
            base,
            version,
            builddate,
            isize,
            arch,
            license,
            groups: collector.multi("groups"),
            replaces: collector.multi("replaces"),
            conflicts: collector.multi("conflicts"),
            provides: collector.multi("provides"),
            depends: collector.multi("depends"),
            optdepends: collector.multi("optdepends"),
            makedepends: collector.multi("makedepends"),
            checkdepends: collector.multi("checkdepends"),
            backup: collector.multi("backup"),
            makepkg_version: collector.makepkg_version.take(),
            fakeroot_version: collector.fakeroot_version.take(),
            extra: std::mem::take(&mut collector.extra),
        };

        match collector.pkgtype {
            Some(pkgtype) => {
                let pkgtype = PackageType::from_str(&pkgtype)
                    .map_err(|_| schema_violation("pkgtype"))?;

                Ok(Self::V2(PkgInfoV2 { info, pkgtype }))
            }
            None => Ok(Self::V1(info)),
        }
    }

    /// The schema version of this `.PKGINFO`.
    pub fn schema_version(&self) -> u32 {
        match self {
            Self::V1(_) => 1,
            Self::V2(_) => 2,
        }
    }

    /// The version independent field set.
    pub fn info(&self) -> &PkgInfoV1 {
        match self {
            Self::V1(info) => info,
            Self::V2(v2) => &v2.info,
        }
    }

    /// The package type, if the schema version records one.
    pub fn pkgtype(&self) -> Option<PackageType> {
        match self {
            Self::V1(_) => None,
            Self::V2(v2) => Some(v2.pkgtype),
        }
    }

    pub fn name(&self) -> &str {
        &self.info().name
    }

    pub fn base(&self) -> &str {
        &self.info().base
    }

    pub fn version(&self) -> &PackageVersion {
        &self.info().version
    }

    pub fn arch(&self) -> Architecture {
        self.info().arch
    }

    /// Whether this package holds debug symbols.
    ///
    /// Version 1 files carry no package type; the conventional
    /// `-debug` name suffix is used as fallback there.
    pub fn is_debug(&self) -> bool {
        match self.pkgtype() {
            Some(pkgtype) => pkgtype == PackageType::Debug,
            None => self.name().ends_with("-debug"),
        }
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The management repository descriptor model.

The management repository persists one JSON document per pkgbase. That
document — [PackageBaseDescriptor] — is the authoritative record of
repository state: the sync databases are derived from it, never the
other way around.

Serialization is canonical: keys are sorted, output is compact, absent
optional fields are omitted and there is no trailing newline, so
documents can be compared and version controlled byte for byte.
Documents carry a top level `schema_version`; untagged legacy input is
read as version 1 and newer tags are tolerated with a logged downgrade.
*/

use {
    crate::{
        arch::Architecture,
        buildinfo::BuildInfo,
        error::{RepositoryError, Result},
        package::Package,
        package_version::PackageVersion,
        sync_db::{DescRecord, SyncDbPackage},
    },
    serde::{Deserialize, Serialize},
    std::collections::BTreeMap,
};

fn default_schema_version() -> u32 {
    1
}

/// Condensed `.BUILDINFO` data carried on a pkgbase descriptor.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct BuildInfoSummary {
    pub schema_version: u32,
    pub builddir: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buildenv: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buildtool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buildtoolver: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub installed: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    pub pkgbuild_sha256sum: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startdir: Option<String>,
}

impl BuildInfoSummary {
    pub fn from_buildinfo(buildinfo: &BuildInfo) -> Self {
        let info = buildinfo.info();

        let (buildtool, buildtoolver, startdir) = match buildinfo {
            BuildInfo::V1(_) => (None, None, None),
            BuildInfo::V2(v2) => (
                Some(v2.buildtool.clone()),
                Some(v2.buildtoolver.clone()),
                Some(v2.startdir.clone()),
            ),
        };

        Self {
            schema_version: buildinfo.schema_version(),
            builddir: info.builddir.clone(),
            buildenv: info.buildenv.clone(),
            installed: info.installed.iter().map(|i| i.to_string()).collect(),
            options: info.options.clone(),
            pkgbuild_sha256sum: info.pkgbuild_sha256sum.clone(),
            buildtool,
            buildtoolver,
            startdir,
        }
    }
}

/// One package of a pkgbase, as persisted in the management repository.
///
/// Fields shared by every member of a pkgbase (version, packager, build
/// date) live on [PackageBaseDescriptor] instead.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PackageDescriptor {
    pub arch: Architecture,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backup: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<String>,
    pub csize: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,
    pub desc: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Vec<String>>,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    pub isize: u64,
    pub license: Vec<String>,
    pub md5sum: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optdepends: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pgpsig: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replaces: Vec<String>,
    pub sha256sum: String,
    pub url: String,
}

/// The persisted unit of the management repository: a pkgbase and its
/// packages.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PackageBaseDescriptor {
    pub base: String,
    pub builddate: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buildinfo: Option<BuildInfoSummary>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checkdepends: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub makedepends: Vec<String>,
    pub packager: String,
    pub packages: Vec<PackageDescriptor>,
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub version: String,
}

impl PackageBaseDescriptor {
    /// Merge inspected packages sharing one pkgbase into a descriptor.
    ///
    /// All members must agree on pkgbase, version, packager and build
    /// date; any disagreement fails the merge.
    pub fn from_packages(packages: &[Package]) -> Result<Self> {
        let first = packages
            .first()
            .ok_or_else(|| RepositoryError::PkgbaseInconsistent(String::new(), "packages"))?;

        let base = first.base().to_string();
        let inconsistent =
            |field: &'static str| RepositoryError::PkgbaseInconsistent(base.clone(), field);

        let version = first.version().clone();
        let packager = first.pkginfo.info().packager.clone();
        let builddate = first.pkginfo.info().builddate;

        let mut names = std::collections::BTreeSet::new();

        for package in packages {
            if package.base() != base {
                return Err(inconsistent("pkgbase"));
            }
            if package.version() != &version {
                return Err(inconsistent("version"));
            }
            if package.pkginfo.info().packager != packager {
                return Err(inconsistent("packager"));
            }
            if package.pkginfo.info().builddate != builddate {
                return Err(inconsistent("builddate"));
            }
            if !names.insert(package.name().to_string()) {
                return Err(inconsistent("name"));
            }
        }

        let mut members = packages.iter().collect::<Vec<_>>();
        members.sort_by(|a, b| a.name().cmp(b.name()));

        // Split packages are built from a single recipe, so the build
        // requirements of the first member stand in for the pkgbase.
        let makedepends = members[0].pkginfo.info().makedepends.clone();
        let checkdepends = members[0].pkginfo.info().checkdepends.clone();
        let buildinfo = members[0]
            .buildinfo
            .as_ref()
            .map(BuildInfoSummary::from_buildinfo);

        let packages = members
            .iter()
            .map(|package| {
                let info = package.pkginfo.info();

                PackageDescriptor {
                    arch: info.arch,
                    backup: info.backup.clone(),
                    conflicts: info.conflicts.clone(),
                    csize: package.csize,
                    depends: info.depends.clone(),
                    desc: info.desc.clone(),
                    extra: BTreeMap::new(),
                    filename: package.filename.clone(),
                    files: package.files.clone(),
                    groups: info.groups.clone(),
                    isize: info.isize,
                    license: info.license.clone(),
                    md5sum: package.md5sum.clone(),
                    name: info.name.clone(),
                    optdepends: info.optdepends.clone(),
                    pgpsig: None,
                    provides: info.provides.clone(),
                    replaces: info.replaces.clone(),
                    sha256sum: package.sha256sum.clone(),
                    url: info.url.clone(),
                }
            })
            .collect();

        Ok(Self {
            base,
            builddate,
            buildinfo,
            checkdepends,
            makedepends,
            packager,
            packages,
            schema_version: default_schema_version(),
            version: version.to_string(),
        })
    }

    /// Reassemble a descriptor from sync database records of one pkgbase.
    pub fn from_records(records: &[SyncDbPackage]) -> Result<Self> {
        let first = &records
            .first()
            .ok_or_else(|| RepositoryError::PkgbaseInconsistent(String::new(), "packages"))?
            .desc;

        let base = first.base.clone();
        let inconsistent =
            |field: &'static str| RepositoryError::PkgbaseInconsistent(base.clone(), field);

        for record in records {
            if record.desc.base != first.base {
                return Err(inconsistent("pkgbase"));
            }
            if record.desc.version != first.version {
                return Err(inconsistent("version"));
            }
            if record.desc.packager != first.packager {
                return Err(inconsistent("packager"));
            }
            if record.desc.builddate != first.builddate {
                return Err(inconsistent("builddate"));
            }
        }

        let mut sorted = records.iter().collect::<Vec<_>>();
        sorted.sort_by(|a, b| a.desc.name.cmp(&b.desc.name));

        let packages = sorted
            .iter()
            .map(|record| -> Result<PackageDescriptor> {
                let desc = &record.desc;

                Ok(PackageDescriptor {
                    arch: desc.arch.ok_or_else(|| inconsistent("arch"))?,
                    backup: desc.backup.clone(),
                    conflicts: desc.conflicts.clone(),
                    csize: desc.csize,
                    depends: desc.depends.clone(),
                    desc: desc.desc.clone(),
                    extra: desc.extra.clone(),
                    filename: desc.filename.clone(),
                    files: record.files.clone().unwrap_or_default(),
                    groups: desc.groups.clone(),
                    isize: desc.isize,
                    license: desc.license.clone(),
                    md5sum: desc.md5sum.clone(),
                    name: desc.name.clone(),
                    optdepends: desc.optdepends.clone(),
                    pgpsig: desc.pgpsig.clone(),
                    provides: desc.provides.clone(),
                    replaces: desc.replaces.clone(),
                    sha256sum: desc.sha256sum.clone(),
                    url: desc.url.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            base,
            builddate: first.builddate,
            buildinfo: None,
            checkdepends: first.checkdepends.clone(),
            makedepends: first.makedepends.clone(),
            packager: first.packager.clone(),
            packages,
            schema_version: default_schema_version(),
            version: first.version.clone(),
        })
    }

    /// Flatten the descriptor into sync database records.
    pub fn to_records(&self) -> Vec<SyncDbPackage> {
        self.packages
            .iter()
            .map(|package| SyncDbPackage {
                desc: DescRecord {
                    filename: package.filename.clone(),
                    name: package.name.clone(),
                    base: self.base.clone(),
                    version: self.version.clone(),
                    desc: package.desc.clone(),
                    groups: package.groups.clone(),
                    csize: package.csize,
                    isize: package.isize,
                    md5sum: package.md5sum.clone(),
                    sha256sum: package.sha256sum.clone(),
                    pgpsig: package.pgpsig.clone(),
                    url: package.url.clone(),
                    license: package.license.clone(),
                    arch: Some(package.arch),
                    builddate: self.builddate,
                    packager: self.packager.clone(),
                    replaces: package.replaces.clone(),
                    conflicts: package.conflicts.clone(),
                    provides: package.provides.clone(),
                    depends: package.depends.clone(),
                    optdepends: package.optdepends.clone(),
                    makedepends: self.makedepends.clone(),
                    checkdepends: self.checkdepends.clone(),
                    backup: package.backup.clone(),
                    extra: package.extra.clone(),
                },
                files: Some(package.files.clone()),
            })
            .collect()
    }

    /// The parsed pkgbase version.
    pub fn parsed_version(&self) -> Result<PackageVersion> {
        Ok(PackageVersion::parse(&self.version)?)
    }

    /// The file names of every package and signature this descriptor
    /// references, signature names included only where a signature is
    /// recorded.
    pub fn referenced_files(&self) -> Vec<String> {
        self.packages
            .iter()
            .map(|package| package.filename.clone())
            .collect()
    }

    /// Serialize to canonical JSON: sorted keys, compact separators, no
    /// trailing newline.
    pub fn to_canonical_json(&self) -> Result<String> {
        let value = serde_json::to_value(self)?;

        Ok(value.to_string())
    }

    /// Deserialize a descriptor document.
    ///
    /// Untagged input is treated as schema version 1. A newer tag is
    /// accepted with a warning; unknown fields it introduced are
    /// dropped on the way in.
    pub fn from_json(data: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(data)?;

        let tagged_version = value
            .get("schema_version")
            .and_then(|v| v.as_u64())
            .unwrap_or(1);

        if tagged_version > u64::from(default_schema_version()) {
            log::warn!(
                "descriptor carries schema version {}; reading as version {}",
                tagged_version,
                default_schema_version()
            );
        }

        let mut descriptor: Self = serde_json::from_value(value)?;
        descriptor.schema_version = default_schema_version();

        Ok(descriptor)
    }
}

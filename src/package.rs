// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package archive inspection.

A package archive is a compressed tar with well known metadata members
at its root: `.PKGINFO` (required), `.BUILDINFO` and `.MTREE` (optional
but expected from modern build tools). [Package::inspect] streams an
archive once, computing content digests of the compressed file on the
way, and returns a validated in-memory representation.

Inspection is deterministic: the same archive always yields the same
[Package]. It never extracts payload file contents, only their names.
*/

use {
    crate::{
        arch::Architecture,
        buildinfo::BuildInfo,
        error::{RepositoryError, Result},
        io::{read_decompressed, Compression, MultiDigester},
        mtree::Mtree,
        package_version::PackageVersion,
        pkginfo::PkgInfo,
    },
    std::{
        io::Read,
        path::Path,
        str::FromStr,
    },
};

/// Metadata derived from a package file name.
///
/// Package files are named `<name>-<version>-<architecture>.pkg.tar[.<ext>]`
/// where `<version>` contains a pkgrel and possibly an epoch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FilenameParts {
    pub name: String,
    pub version: PackageVersion,
    pub architecture: Architecture,
    pub compression: Compression,
}

impl FilenameParts {
    /// Split a package file name into its components.
    pub fn parse(filename: &str) -> Result<Self> {
        let malformed = |reason: &str| {
            RepositoryError::ArchiveFormat(filename.to_string(), reason.to_string())
        };

        let (stem, suffix) = filename
            .split_once(".pkg.tar")
            .ok_or_else(|| malformed("missing .pkg.tar suffix"))?;

        let compression = Compression::from_filename_suffix(suffix.trim_start_matches('.'))
            .ok_or_else(|| malformed("unknown compression suffix"))?;

        let mut parts = stem.split('-').collect::<Vec<_>>();
        if parts.len() < 4 {
            return Err(malformed("missing name, version or architecture"));
        }

        let architecture = Architecture::from_str(parts.pop().expect("length checked"))
            .map_err(|_| malformed("unknown architecture"))?;
        let pkgrel = parts.pop().expect("length checked");
        let pkgver = parts.pop().expect("length checked");
        let name = parts.join("-");

        let version = PackageVersion::parse(&format!("{}-{}", pkgver, pkgrel))
            .map_err(|_| malformed("invalid version"))?;

        Ok(Self {
            name,
            version,
            architecture,
            compression,
        })
    }
}

/// The validated in-memory representation of a package archive.
#[derive(Clone, Debug)]
pub struct Package {
    pub pkginfo: PkgInfo,
    pub buildinfo: Option<BuildInfo>,
    pub mtree: Option<Mtree>,
    /// Base name of the inspected archive.
    pub filename: String,
    /// Size of the compressed archive in bytes.
    pub csize: u64,
    pub md5sum: String,
    pub sha256sum: String,
    /// Payload paths in sync database notation.
    pub files: Vec<String>,
}

impl Package {
    /// Inspect a package archive on disk.
    pub fn inspect(path: &Path) -> Result<Self> {
        let filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                RepositoryError::ArchiveFormat(
                    path.display().to_string(),
                    "not a valid file name".to_string(),
                )
            })?
            .to_string();

        let data = std::fs::read(path)
            .map_err(|e| RepositoryError::IoPath(path.display().to_string(), e))?;

        let digests = MultiDigester::digest(&data);

        let mut package = Self::inspect_data(&data, filename)?;
        package.csize = data.len() as u64;
        package.md5sum = digests.md5.digest_hex();
        package.sha256sum = digests.sha256.digest_hex();

        Ok(package)
    }

    /// Inspect archive bytes. Digest and size fields are left empty.
    fn inspect_data(data: &[u8], filename: String) -> Result<Self> {
        let archive_error =
            |e: std::io::Error| RepositoryError::ArchiveFormat(filename.clone(), e.to_string());

        let reader = read_decompressed(data, Compression::detect(data)).map_err(archive_error)?;
        let mut archive = tar::Archive::new(reader);

        let mut pkginfo = None;
        let mut buildinfo = None;
        let mut mtree = None;
        let mut payload = Vec::new();

        for entry in archive.entries().map_err(archive_error)? {
            let mut entry = entry.map_err(archive_error)?;

            let member = entry
                .path()
                .map_err(archive_error)?
                .to_string_lossy()
                .trim_start_matches("./")
                .trim_end_matches('/')
                .to_string();

            match member.as_str() {
                ".PKGINFO" => {
                    let mut text = String::new();
                    entry.read_to_string(&mut text).map_err(archive_error)?;
                    pkginfo = Some(PkgInfo::parse(&text)?);
                }
                ".BUILDINFO" => {
                    let mut text = String::new();
                    entry.read_to_string(&mut text).map_err(archive_error)?;
                    buildinfo = Some(BuildInfo::parse(&text)?);
                }
                ".MTREE" => {
                    let mut bytes = Vec::new();
                    entry.read_to_end(&mut bytes).map_err(archive_error)?;
                    mtree = Some(Mtree::parse(&bytes)?);
                }
                // Other dotfiles at the root (.INSTALL, .CHANGELOG) are
                // package hooks, not payload.
                _ if member.starts_with('.') || member.is_empty() => {}
                _ => {
                    if entry.header().entry_type().is_dir() {
                        payload.push(format!("{}/", member));
                    } else {
                        payload.push(member);
                    }
                }
            }
        }

        let pkginfo =
            pkginfo.ok_or_else(|| RepositoryError::MissingMetadata(filename.clone()))?;

        // The mtree manifest is authoritative for the file listing when
        // present; the raw tar member list is the fallback.
        let files = match &mtree {
            Some(mtree) => mtree.installed_paths(),
            None => {
                payload.sort();
                payload
            }
        };

        Ok(Self {
            pkginfo,
            buildinfo,
            mtree,
            filename,
            csize: 0,
            md5sum: String::new(),
            sha256sum: String::new(),
            files,
        })
    }

    /// Whether all optional metadata members were present.
    ///
    /// Archives produced by current makepkg always carry `.BUILDINFO`
    /// and `.MTREE`; their absence downgrades the package to a reduced
    /// schema tier that can still be served but carries no build
    /// provenance.
    pub fn is_complete(&self) -> bool {
        self.buildinfo.is_some() && self.mtree.is_some()
    }

    pub fn name(&self) -> &str {
        self.pkginfo.name()
    }

    pub fn base(&self) -> &str {
        self.pkginfo.base()
    }

    pub fn version(&self) -> &PackageVersion {
        self.pkginfo.version()
    }

    pub fn arch(&self) -> Architecture {
        self.pkginfo.arch()
    }

    /// Validate that the file name agrees with the embedded metadata.
    pub fn validate_filename(&self) -> Result<()> {
        let parts = FilenameParts::parse(&self.filename)?;

        if parts.name != self.name()
            || &parts.version != self.version()
            || parts.architecture != self.arch()
        {
            return Err(RepositoryError::ArchiveFormat(
                self.filename.clone(),
                format!(
                    "file name disagrees with metadata {}-{}-{}",
                    self.name(),
                    self.version(),
                    self.arch()
                ),
            ));
        }

        Ok(())
    }

    /// The base name of the detached signature for this package.
    pub fn signature_filename(&self) -> String {
        format!("{}.sig", self.filename)
    }
}

#[cfg(test)]
mod test {
    use {super::*, crate::testutil::PackageArchiveBuilder, std::io::Write};

    #[test]
    fn filename_parts() {
        let parts = FilenameParts::parse("gcc-libs-12.1.0-2-x86_64.pkg.tar.zst").unwrap();
        assert_eq!(parts.name, "gcc-libs");
        assert_eq!(parts.version.to_string(), "12.1.0-2");
        assert_eq!(parts.architecture, Architecture::X86_64);
        assert_eq!(parts.compression, Compression::Zst);

        let parts = FilenameParts::parse("example-1:1.0-1-any.pkg.tar").unwrap();
        assert_eq!(parts.version.to_string(), "1:1.0-1");
        assert_eq!(parts.compression, Compression::None);

        assert!(FilenameParts::parse("example.tar.zst").is_err());
        assert!(FilenameParts::parse("example-1.0-1-amd64.pkg.tar.zst").is_err());
    }

    #[test]
    fn inspect_zstd_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = PackageArchiveBuilder::new("example", "example", "1.0.0-1", "any")
            .file("usr/", b"")
            .file("usr/bin/", b"")
            .file("usr/bin/example", b"#!/bin/sh\n")
            .write_to(dir.path(), "example-1.0.0-1-any.pkg.tar.zst");

        let data = std::fs::read(&path).unwrap();
        let package = Package::inspect(&path).unwrap();

        assert_eq!(package.name(), "example");
        assert_eq!(package.version().to_string(), "1.0.0-1");
        assert_eq!(package.csize, data.len() as u64);
        assert_eq!(
            package.files,
            vec!["usr/", "usr/bin/", "usr/bin/example"]
        );
        assert!(!package.is_complete());
        assert!(package.validate_filename().is_ok());

        let digests = crate::io::MultiDigester::digest(&data);
        assert_eq!(package.md5sum, digests.md5.digest_hex());
        assert_eq!(package.sha256sum, digests.sha256.digest_hex());
    }

    #[test]
    fn inspection_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = PackageArchiveBuilder::new("example", "example", "1.0.0-1", "any")
            .compression(Compression::Gz)
            .file("etc/conf", b"x")
            .write_to(dir.path(), "example-1.0.0-1-any.pkg.tar.gz");

        let one = Package::inspect(&path).unwrap();
        let two = Package::inspect(&path).unwrap();

        assert_eq!(one.sha256sum, two.sha256sum);
        assert_eq!(one.files, two.files);
        assert_eq!(one.pkginfo, two.pkginfo);
    }

    #[test]
    fn missing_pkginfo() {
        let dir = tempfile::tempdir().unwrap();
        let path = PackageArchiveBuilder::new("example", "example", "1.0.0-1", "any")
            .without_pkginfo()
            .file("usr/", b"")
            .write_to(dir.path(), "example-1.0.0-1-any.pkg.tar.zst");

        assert!(matches!(
            Package::inspect(&path),
            Err(RepositoryError::MissingMetadata(_))
        ));
    }

    #[test]
    fn garbage_is_an_archive_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("example-1.0.0-1-any.pkg.tar.zst");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(b"certainly not a tarball").unwrap();

        assert!(matches!(
            Package::inspect(&path),
            Err(RepositoryError::ArchiveFormat(_, _))
        ));
    }

    #[test]
    fn filename_mismatch_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = PackageArchiveBuilder::new("example", "example", "1.0.0-1", "any")
            .write_to(dir.path(), "example-2.0.0-1-any.pkg.tar.zst");

        let package = Package::inspect(&path).unwrap();
        assert!(package.validate_filename().is_err());
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Test helpers for constructing package archives. */

use {
    crate::{
        io::{write_compressed, Compression},
        sync_db::append_pax_member,
    },
    std::{io::Write, path::{Path, PathBuf}},
};

/// Render a minimal but valid `.PKGINFO` for tests.
pub fn pkginfo_text(name: &str, base: &str, version: &str, arch: &str) -> String {
    format!(
        r#"pkgname = {}
pkgbase = {}
pkgver = {}
pkgdesc = A test package
url = https://example.org
builddate = 1658671461
packager = Foo Bar <foo@example.org>
size = 5000
arch = {}
license = GPL
"#,
        name, base, version, arch
    )
}

/// Builder for in-memory package archives.
pub struct PackageArchiveBuilder {
    pkginfo: Option<String>,
    buildinfo: Option<String>,
    payload: Vec<(String, Vec<u8>)>,
    compression: Compression,
}

impl PackageArchiveBuilder {
    pub fn new(name: &str, base: &str, version: &str, arch: &str) -> Self {
        Self {
            pkginfo: Some(pkginfo_text(name, base, version, arch)),
            buildinfo: None,
            payload: vec![],
            compression: Compression::Zst,
        }
    }

    pub fn without_pkginfo(mut self) -> Self {
        self.pkginfo = None;
        self
    }

    pub fn pkginfo_line(mut self, line: &str) -> Self {
        if let Some(pkginfo) = &mut self.pkginfo {
            pkginfo.push_str(line);
            pkginfo.push('\n');
        }

        self
    }

    pub fn buildinfo(mut self, text: &str) -> Self {
        self.buildinfo = Some(text.to_string());
        self
    }

    pub fn file(mut self, path: &str, data: &[u8]) -> Self {
        self.payload.push((path.to_string(), data.to_vec()));
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());

        let mut append = |path: &str, data: &[u8]| {
            append_pax_member(&mut builder, path, data).unwrap();
        };

        if let Some(pkginfo) = &self.pkginfo {
            append(".PKGINFO", pkginfo.as_bytes());
        }

        if let Some(buildinfo) = &self.buildinfo {
            append(".BUILDINFO", buildinfo.as_bytes());
        }

        for (path, data) in &self.payload {
            append(path, data);
        }

        let tar_data = builder.into_inner().unwrap();

        write_compressed(&tar_data, self.compression).unwrap()
    }

    /// Build the archive and write it into `dir` under a conventional
    /// package file name.
    pub fn write_to(self, dir: &Path, filename: &str) -> PathBuf {
        let data = self.build();
        let path = dir.join(filename);

        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&data).unwrap();

        path
    }
}

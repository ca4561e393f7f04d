// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Sync database reading and writing.

A sync database is a compressed tar holding one directory per package
named `<name>-<version>/`, with a `desc` member and, in the files
variant, a `files` member. The text records are sequences of `%KEY%`
blocks: an identifier line, one or more value lines, and a single blank
line terminating the block.

Two `desc` schema versions are supported: version 1 carries a `%PGPSIG%`
block with the base64 encoded detached signature, version 2 omits it.

Writing is deterministic. Packages are sorted by name, members carry
pax headers with pinned metadata (zero mtime, fixed modes and
ownership) and the key order matches what `repo-add` emits, so writing
the same logical state twice yields byte-identical databases.
*/

use {
    crate::{
        arch::Architecture,
        error::{RepositoryError, Result},
        io::{read_detected, write_compressed, Compression},
    },
    std::{
        collections::BTreeMap,
        fmt::Write as _,
        io::Read,
        str::FromStr,
    },
};

/// Schema version of `desc` records.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DescVersion {
    /// Includes `%PGPSIG%`.
    V1,
    /// Omits `%PGPSIG%`.
    V2,
}

impl Default for DescVersion {
    fn default() -> Self {
        Self::V1
    }
}

impl TryFrom<u32> for DescVersion {
    type Error = RepositoryError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(Self::V1),
            2 => Ok(Self::V2),
            other => Err(RepositoryError::SchemaUnknown("desc", other.to_string())),
        }
    }
}

/// Schema version of `files` records.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FilesVersion {
    V1,
}

impl Default for FilesVersion {
    fn default() -> Self {
        Self::V1
    }
}

impl TryFrom<u32> for FilesVersion {
    type Error = RepositoryError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(Self::V1),
            other => Err(RepositoryError::SchemaUnknown("files", other.to_string())),
        }
    }
}

/// Which flavor of database to emit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncDbKind {
    /// The default `.db` database: `desc` members only.
    Default,
    /// The extended `.files` database: `desc` plus `files` members.
    Files,
}

impl SyncDbKind {
    /// The database file name for a layer, e.g. `stable.db.tar.gz`.
    pub fn database_filename(&self, layer: &str, compression: Compression) -> String {
        match self {
            Self::Default => format!("{}.db.tar{}", layer, compression.extension()),
            Self::Files => format!("{}.files.tar{}", layer, compression.extension()),
        }
    }

    /// The stable symlink name pointing at the database, e.g. `stable.db`.
    pub fn symlink_filename(&self, layer: &str) -> String {
        match self {
            Self::Default => format!("{}.db", layer),
            Self::Files => format!("{}.files", layer),
        }
    }
}

/// A flat `desc` record, one per package.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DescRecord {
    pub filename: String,
    pub name: String,
    pub base: String,
    pub version: String,
    pub desc: String,
    pub groups: Vec<String>,
    pub csize: u64,
    pub isize: u64,
    pub md5sum: String,
    pub sha256sum: String,
    pub pgpsig: Option<String>,
    pub url: String,
    pub license: Vec<String>,
    pub arch: Option<Architecture>,
    pub builddate: i64,
    pub packager: String,
    pub replaces: Vec<String>,
    pub conflicts: Vec<String>,
    pub provides: Vec<String>,
    pub depends: Vec<String>,
    pub optdepends: Vec<String>,
    pub makedepends: Vec<String>,
    pub checkdepends: Vec<String>,
    pub backup: Vec<String>,
    /// Unknown keys (without the percent signs), retained for re-emission.
    pub extra: BTreeMap<String, Vec<String>>,
}

impl DescRecord {
    /// The tar directory name for this record.
    pub fn directory(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }
}

/// One package as stored in a sync database.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncDbPackage {
    pub desc: DescRecord,
    pub files: Option<Vec<String>>,
}

const REQUIRED_KEYS: &[&str] = &[
    "%FILENAME%",
    "%NAME%",
    "%BASE%",
    "%VERSION%",
    "%DESC%",
    "%CSIZE%",
    "%ISIZE%",
    "%MD5SUM%",
    "%SHA256SUM%",
    "%URL%",
    "%LICENSE%",
    "%ARCH%",
    "%BUILDDATE%",
    "%PACKAGER%",
];

/// Parse `%KEY%` block structured text into a key/values map.
fn parse_blocks(text: &str, context: &str) -> Result<BTreeMap<String, Vec<String>>> {
    let mut blocks: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut current: Option<String> = None;

    for line in text.lines() {
        if line.starts_with('%') && line.ends_with('%') && line.len() > 2 {
            let key = line.to_string();

            if blocks.contains_key(&key) {
                return Err(RepositoryError::SyncDbMalformed(
                    context.to_string(),
                    format!("duplicate block {}", key),
                ));
            }

            blocks.insert(key.clone(), Vec::new());
            current = Some(key);
        } else if line.is_empty() {
            current = None;
        } else {
            match &current {
                Some(key) => {
                    blocks
                        .get_mut(key)
                        .expect("current key always present")
                        .push(line.to_string());
                }
                None => {
                    return Err(RepositoryError::SyncDbMalformed(
                        context.to_string(),
                        format!("value line outside of a block: {}", line),
                    ));
                }
            }
        }
    }

    Ok(blocks)
}

/// Parse the text of a `desc` member.
pub fn parse_desc(text: &str, context: &str) -> Result<DescRecord> {
    let mut blocks = parse_blocks(text, context)?;

    for key in REQUIRED_KEYS {
        if !blocks.contains_key(*key) {
            return Err(RepositoryError::SyncDbMalformed(
                context.to_string(),
                format!("missing required block {}", key),
            ));
        }
    }

    let mut single = |key: &str| -> Result<String> {
        let values = blocks.remove(key).unwrap_or_default();

        if values.len() != 1 {
            return Err(RepositoryError::SyncDbMalformed(
                context.to_string(),
                format!("block {} must hold exactly one value", key),
            ));
        }

        Ok(values.into_iter().next().expect("length checked"))
    };

    let filename = single("%FILENAME%")?;
    let name = single("%NAME%")?;
    let base = single("%BASE%")?;
    let version = single("%VERSION%")?;
    let desc = single("%DESC%")?;
    let csize = single("%CSIZE%")?;
    let isize = single("%ISIZE%")?;
    let md5sum = single("%MD5SUM%")?;
    let sha256sum = single("%SHA256SUM%")?;
    let url = single("%URL%")?;
    let arch = single("%ARCH%")?;
    let builddate = single("%BUILDDATE%")?;
    let packager = single("%PACKAGER%")?;

    let number = |key: &str, value: &str| -> Result<i64> {
        i64::from_str(value).map_err(|_| {
            RepositoryError::SyncDbMalformed(
                context.to_string(),
                format!("block {} does not hold a number: {}", key, value),
            )
        })
    };

    let pgpsig = blocks
        .remove("%PGPSIG%")
        .map(|values| values.join(""));

    let record = DescRecord {
        csize: number("%CSIZE%", &csize)? as u64,
        isize: number("%ISIZE%", &isize)? as u64,
        builddate: number("%BUILDDATE%", &builddate)?,
        arch: Some(Architecture::from_str(&arch).map_err(|e| {
            RepositoryError::SyncDbMalformed(context.to_string(), e)
        })?),
        license: blocks.remove("%LICENSE%").unwrap_or_default(),
        groups: blocks.remove("%GROUPS%").unwrap_or_default(),
        replaces: blocks.remove("%REPLACES%").unwrap_or_default(),
        conflicts: blocks.remove("%CONFLICTS%").unwrap_or_default(),
        provides: blocks.remove("%PROVIDES%").unwrap_or_default(),
        depends: blocks.remove("%DEPENDS%").unwrap_or_default(),
        optdepends: blocks.remove("%OPTDEPENDS%").unwrap_or_default(),
        makedepends: blocks.remove("%MAKEDEPENDS%").unwrap_or_default(),
        checkdepends: blocks.remove("%CHECKDEPENDS%").unwrap_or_default(),
        backup: blocks.remove("%BACKUP%").unwrap_or_default(),
        extra: blocks
            .into_iter()
            .map(|(key, values)| (key.trim_matches('%').to_string(), values))
            .collect(),
        filename,
        name,
        base,
        version,
        desc,
        md5sum,
        sha256sum,
        pgpsig,
        url,
        packager,
    };

    Ok(record)
}

/// Parse the text of a `files` member.
pub fn parse_files(text: &str, context: &str) -> Result<Vec<String>> {
    let mut blocks = parse_blocks(text, context)?;

    let files = blocks.remove("%FILES%").ok_or_else(|| {
        RepositoryError::SyncDbMalformed(context.to_string(), "missing %FILES% block".to_string())
    })?;

    if !blocks.is_empty() {
        return Err(RepositoryError::SyncDbMalformed(
            context.to_string(),
            "unexpected extra blocks in files record".to_string(),
        ));
    }

    Ok(files)
}

fn push_block(out: &mut String, key: &str, values: &[String]) {
    if values.is_empty() {
        return;
    }

    writeln!(out, "%{}%", key).expect("writing to a string cannot fail");
    for value in values {
        out.push_str(value);
        out.push('\n');
    }
    out.push('\n');
}

fn push_single(out: &mut String, key: &str, value: &str) {
    push_block(out, key, std::slice::from_ref(&value.to_string()));
}

/// Render a `desc` record to text.
pub fn render_desc(record: &DescRecord, version: DescVersion) -> String {
    let mut out = String::new();

    push_single(&mut out, "FILENAME", &record.filename);
    push_single(&mut out, "NAME", &record.name);
    push_single(&mut out, "BASE", &record.base);
    push_single(&mut out, "VERSION", &record.version);
    push_single(&mut out, "DESC", &record.desc);
    push_block(&mut out, "GROUPS", &record.groups);
    push_single(&mut out, "CSIZE", &record.csize.to_string());
    push_single(&mut out, "ISIZE", &record.isize.to_string());
    push_single(&mut out, "MD5SUM", &record.md5sum);
    push_single(&mut out, "SHA256SUM", &record.sha256sum);

    if version == DescVersion::V1 {
        if let Some(pgpsig) = &record.pgpsig {
            push_single(&mut out, "PGPSIG", pgpsig);
        }
    }

    push_single(&mut out, "URL", &record.url);
    push_block(&mut out, "LICENSE", &record.license);
    if let Some(arch) = record.arch {
        push_single(&mut out, "ARCH", arch.as_str());
    }
    push_single(&mut out, "BUILDDATE", &record.builddate.to_string());
    push_single(&mut out, "PACKAGER", &record.packager);
    push_block(&mut out, "REPLACES", &record.replaces);
    push_block(&mut out, "CONFLICTS", &record.conflicts);
    push_block(&mut out, "PROVIDES", &record.provides);
    push_block(&mut out, "DEPENDS", &record.depends);
    push_block(&mut out, "OPTDEPENDS", &record.optdepends);
    push_block(&mut out, "MAKEDEPENDS", &record.makedepends);
    push_block(&mut out, "CHECKDEPENDS", &record.checkdepends);
    push_block(&mut out, "BACKUP", &record.backup);

    // Unknown keys survive re-emission, after the known set.
    for (key, values) in &record.extra {
        push_block(&mut out, key, values);
    }

    out
}

/// Render a `files` record to text.
pub fn render_files(files: &[String]) -> String {
    let mut out = String::new();
    push_block(&mut out, "FILES", files);

    out
}

/// Append one member in pax format, the flavor stock database tooling
/// writes.
///
/// Pax headers share the POSIX ustar wire layout; fields that layout
/// cannot hold (long or non ASCII names) travel in a pax extended
/// header record preceding the member, with a truncated form left in
/// the inline field. Member metadata is pinned: uid/gid 0, mode 0o644
/// (directories 0o755), zero mtime.
pub(crate) fn append_pax_member(
    builder: &mut tar::Builder<Vec<u8>>,
    path: &str,
    data: &[u8],
) -> std::io::Result<()> {
    let directory = path.ends_with('/');

    let mut header = tar::Header::new_ustar();
    header.set_entry_type(if directory {
        tar::EntryType::Directory
    } else {
        tar::EntryType::Regular
    });
    header.set_mode(if directory { 0o755 } else { 0o644 });
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(0);
    header.set_size(if directory { 0 } else { data.len() as u64 });

    if path.len() > 100 || !path.is_ascii() {
        builder.append_pax_extensions([("path", path.as_bytes())])?;

        let mut end = path.len().min(100);
        while !path.is_char_boundary(end) {
            end -= 1;
        }

        builder.append_data(&mut header, &path[..end], data)
    } else {
        builder.append_data(&mut header, path, data)
    }
}

/// Serialize packages into a sync database.
///
/// Packages are sorted by name; the result is byte-identical across
/// repeated calls with the same input.
pub fn write_database(
    packages: &[SyncDbPackage],
    kind: SyncDbKind,
    version: DescVersion,
    compression: Compression,
) -> Result<Vec<u8>> {
    let mut sorted = packages.iter().collect::<Vec<_>>();
    sorted.sort_by(|a, b| a.desc.name.cmp(&b.desc.name));

    let mut builder = tar::Builder::new(Vec::new());

    for package in sorted {
        let directory = package.desc.directory();

        append_pax_member(&mut builder, &format!("{}/", directory), &[])?;
        append_pax_member(
            &mut builder,
            &format!("{}/desc", directory),
            render_desc(&package.desc, version).as_bytes(),
        )?;

        if kind == SyncDbKind::Files {
            let files = package.files.clone().unwrap_or_default();
            append_pax_member(
                &mut builder,
                &format!("{}/files", directory),
                render_files(&files).as_bytes(),
            )?;
        }
    }

    let tar_data = builder.into_inner()?;

    Ok(write_compressed(&tar_data, compression)?)
}

/// Read a sync database from any byte stream.
///
/// The compression is detected from magic bytes. Yields one
/// [SyncDbPackage] per package directory; any malformed record fails the
/// whole read.
pub fn read_database<R: Read>(mut reader: R) -> Result<Vec<SyncDbPackage>> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;

    let tar_data = read_detected(&data)
        .map_err(|e| RepositoryError::SyncDbMalformed("(stream)".to_string(), e.to_string()))?;

    let mut archive = tar::Archive::new(tar_data.as_slice());

    // Directory name -> (desc text, files text). Members of one package
    // are adjacent in databases we write, but that is not relied upon.
    let mut members: BTreeMap<String, (Option<String>, Option<String>)> = BTreeMap::new();

    for entry in archive.entries()? {
        let mut entry = entry?;

        // Pax extended header records carry member metadata, not
        // package data.
        if matches!(
            entry.header().entry_type(),
            tar::EntryType::XHeader | tar::EntryType::XGlobalHeader
        ) {
            continue;
        }

        let path = entry.path()?.to_string_lossy().to_string();
        let path = path.trim_matches('/');

        let (directory, member) = match path.split_once('/') {
            Some(parts) => parts,
            // Top level directory entries carry no data.
            None => continue,
        };

        let mut text = String::new();
        entry.read_to_string(&mut text).map_err(|e| {
            RepositoryError::SyncDbMalformed(path.to_string(), e.to_string())
        })?;

        let slot = members.entry(directory.to_string()).or_default();

        match member {
            "desc" => slot.0 = Some(text),
            "files" => slot.1 = Some(text),
            other => {
                return Err(RepositoryError::SyncDbMalformed(
                    path.to_string(),
                    format!("unexpected member {}", other),
                ));
            }
        }
    }

    let mut packages = Vec::with_capacity(members.len());

    for (directory, (desc, files)) in members {
        let desc = desc.ok_or_else(|| {
            RepositoryError::SyncDbMalformed(directory.clone(), "missing desc member".to_string())
        })?;

        let record = parse_desc(&desc, &directory)?;

        if record.directory() != directory {
            return Err(RepositoryError::SyncDbMalformed(
                directory,
                format!(
                    "directory name disagrees with desc contents {}-{}",
                    record.name, record.version
                ),
            ));
        }

        let files = files
            .map(|text| parse_files(&text, &directory))
            .transpose()?;

        packages.push(SyncDbPackage {
            desc: record,
            files,
        });
    }

    Ok(packages)
}

#[cfg(test)]
mod test {
    use super::*;

    fn record(name: &str, version: &str) -> DescRecord {
        DescRecord {
            filename: format!("{}-{}-any.pkg.tar.zst", name, version),
            name: name.to_string(),
            base: name.to_string(),
            version: version.to_string(),
            desc: "A test package".to_string(),
            csize: 100,
            isize: 200,
            md5sum: "d3b07384d113edec49eaa6238ad5ff00".to_string(),
            sha256sum: "b5bb9d8014a0f9b1d61e21e796d78dccdf1352f23cd32812f4850b878ae4944c"
                .to_string(),
            url: "https://example.org".to_string(),
            license: vec!["GPL".to_string()],
            arch: Some(Architecture::Any),
            builddate: 1658671461,
            packager: "Foo Bar <foo@example.org>".to_string(),
            depends: vec!["glibc".to_string()],
            ..DescRecord::default()
        }
    }

    fn package(name: &str, version: &str) -> SyncDbPackage {
        SyncDbPackage {
            desc: record(name, version),
            files: Some(vec!["usr/".to_string(), "usr/bin/".to_string()]),
        }
    }

    #[test]
    fn desc_text_layout() {
        let text = render_desc(&record("foo", "1.0-1"), DescVersion::V2);

        assert!(text.starts_with("%FILENAME%\nfoo-1.0-1-any.pkg.tar.zst\n\n%NAME%\nfoo\n\n"));
        assert!(text.contains("%DEPENDS%\nglibc\n\n"));
        assert!(text.ends_with("\n\n"));
        // Empty lists are omitted entirely.
        assert!(!text.contains("%GROUPS%"));
    }

    #[test]
    fn desc_roundtrip() {
        let mut original = record("foo", "1.0-1");
        original.pgpsig = Some("c2lnbmF0dXJl".to_string());
        original
            .extra
            .insert("FUTUREKEY".to_string(), vec!["futurevalue".to_string()]);

        let text = render_desc(&original, DescVersion::V1);
        let parsed = parse_desc(&text, "foo-1.0-1").unwrap();

        assert_eq!(parsed, original);
    }

    #[test]
    fn desc_v2_drops_pgpsig() {
        let mut original = record("foo", "1.0-1");
        original.pgpsig = Some("c2lnbmF0dXJl".to_string());

        let text = render_desc(&original, DescVersion::V2);
        let parsed = parse_desc(&text, "foo-1.0-1").unwrap();

        assert_eq!(parsed.pgpsig, None);

        // Everything else is preserved.
        let mut expected = original;
        expected.pgpsig = None;
        assert_eq!(parsed, expected);
    }

    #[test]
    fn database_roundtrip_is_byte_identical() {
        let packages = vec![package("zsh", "5.9-1"), package("bash", "5.1.016-1")];

        for kind in [SyncDbKind::Default, SyncDbKind::Files] {
            for compression in [Compression::None, Compression::Gz, Compression::Zst] {
                let first =
                    write_database(&packages, kind, DescVersion::V1, compression).unwrap();

                let read = read_database(first.as_slice()).unwrap();
                let second = write_database(&read, kind, DescVersion::V1, compression).unwrap();

                assert_eq!(first, second);
            }
        }
    }

    #[test]
    fn database_read_yields_sorted_records() {
        let packages = vec![package("zsh", "5.9-1"), package("bash", "5.1.016-1")];
        let data = write_database(
            &packages,
            SyncDbKind::Files,
            DescVersion::V2,
            Compression::Gz,
        )
        .unwrap();

        let read = read_database(data.as_slice()).unwrap();

        assert_eq!(read.len(), 2);
        assert_eq!(read[0].desc.name, "bash");
        assert_eq!(read[1].desc.name, "zsh");
        assert_eq!(
            read[0].files.as_deref(),
            Some(&["usr/".to_string(), "usr/bin/".to_string()][..])
        );
    }

    #[test]
    fn default_database_has_no_files_members() {
        let data = write_database(
            &[package("foo", "1.0-1")],
            SyncDbKind::Default,
            DescVersion::V2,
            Compression::None,
        )
        .unwrap();

        let read = read_database(data.as_slice()).unwrap();
        assert_eq!(read[0].files, None);
    }

    #[test]
    fn malformed_desc_fails_the_read() {
        let mut broken = package("foo", "1.0-1");
        broken.desc.md5sum = String::new();

        // An empty value renders as a block with no value lines.
        let data = write_database(
            &[broken],
            SyncDbKind::Default,
            DescVersion::V2,
            Compression::None,
        )
        .unwrap();

        assert!(matches!(
            read_database(data.as_slice()),
            Err(RepositoryError::SyncDbMalformed(_, _))
        ));
    }

    #[test]
    fn oversized_member_names_use_pax_extensions() {
        let mut builder = tar::Builder::new(Vec::new());
        let long = format!("{}/desc", "x".repeat(120));
        append_pax_member(&mut builder, &long, b"data").unwrap();
        let data = builder.into_inner().unwrap();

        let mut archive = tar::Archive::new(data.as_slice());
        let kinds = archive
            .entries()
            .unwrap()
            .map(|entry| entry.unwrap().header().entry_type())
            .collect::<Vec<_>>();

        assert!(kinds.contains(&tar::EntryType::XHeader));

        // Ordinary member names need no extension records.
        let mut builder = tar::Builder::new(Vec::new());
        append_pax_member(&mut builder, "foo-1.0-1/desc", b"data").unwrap();
        let data = builder.into_inner().unwrap();

        let mut archive = tar::Archive::new(data.as_slice());
        assert!(archive
            .entries()
            .unwrap()
            .all(|entry| entry.unwrap().header().entry_type() == tar::EntryType::Regular));
    }

    #[test]
    fn database_filenames() {
        assert_eq!(
            SyncDbKind::Default.database_filename("stable", Compression::Gz),
            "stable.db.tar.gz"
        );
        assert_eq!(
            SyncDbKind::Files.database_filename("testing", Compression::None),
            "testing.files.tar"
        );
        assert_eq!(SyncDbKind::Default.symlink_filename("stable"), "stable.db");
    }
}

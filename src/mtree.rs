// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `.MTREE` parsing.

The `.MTREE` member of a package archive is a gzip compressed BSD mtree
manifest describing every filesystem entry the package installs. Lines
starting with `/set` update running defaults, entry lines start with
`./` and carry whitespace separated `key=value` pairs.

Path names may encode arbitrary bytes as backslash octal escapes
(`\303\244` for a two byte UTF-8 sequence). Decoding first reconstructs
the raw byte sequence and only then interprets the result as UTF-8, so
multi byte characters survive the round trip.
*/

use {
    crate::error::{RepositoryError, Result},
    std::{collections::HashMap, io::Read, str::FromStr},
};

const FILE: &str = ".MTREE";

fn decode_error(line: &str) -> RepositoryError {
    RepositoryError::DecodeError {
        file: FILE,
        line: line.to_string(),
    }
}

/// Filesystem entry types appearing in an mtree manifest.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MtreeEntryType {
    Block,
    Char,
    Dir,
    Fifo,
    File,
    Link,
    Socket,
}

impl FromStr for MtreeEntryType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "block" => Self::Block,
            "char" => Self::Char,
            "dir" => Self::Dir,
            "fifo" => Self::Fifo,
            "file" => Self::File,
            "link" => Self::Link,
            "socket" => Self::Socket,
            other => return Err(format!("unknown mtree entry type: {}", other)),
        })
    }
}

/// A single filesystem entry of an mtree manifest.
#[derive(Clone, Debug, PartialEq)]
pub struct MtreeEntry {
    /// Absolute path of the entry, octal escapes decoded.
    pub path: String,
    pub entry_type: MtreeEntryType,
    pub uid: u32,
    pub gid: u32,
    /// Permission bits, parsed from the octal `mode` keyword.
    pub mode: u32,
    pub size: Option<u64>,
    /// Modification time in seconds since the epoch.
    pub time: f64,
    pub md5: Option<String>,
    pub sha256: Option<String>,
    /// Symlink target for `link` entries, octal escapes decoded.
    pub link: Option<String>,
}

/// A parsed `.MTREE` manifest.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mtree {
    pub entries: Vec<MtreeEntry>,
}

/// Decode mtree backslash octal escapes into the bytes they denote.
///
/// The escape blocks encode raw bytes; the reassembled byte string is
/// interpreted as UTF-8 in one piece afterwards.
fn decode_escapes(s: &str) -> Option<String> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let octal = &bytes[i + 1..i + 4];

            if octal.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = (octal[0] - b'0') as u32 * 64
                    + (octal[1] - b'0') as u32 * 8
                    + (octal[2] - b'0') as u32;
                out.push(value as u8);
                i += 4;
                continue;
            }
        }

        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8(out).ok()
}

#[derive(Clone, Default)]
struct EntryDefaults {
    values: HashMap<String, String>,
}

impl EntryDefaults {
    fn apply(&mut self, pairs: impl Iterator<Item = (String, String)>) {
        for (key, value) in pairs {
            self.values.insert(key, value);
        }
    }
}

fn split_pairs<'a>(
    tokens: impl Iterator<Item = &'a str> + 'a,
) -> impl Iterator<Item = (String, String)> + 'a {
    tokens.filter_map(|token| {
        token
            .split_once('=')
            .map(|(k, v)| (k.to_string(), v.to_string()))
    })
}

impl Mtree {
    /// Parse a gzip compressed `.MTREE` member.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut text = String::new();
        flate2::read::GzDecoder::new(data)
            .read_to_string(&mut text)
            .map_err(|_| decode_error("(not a gzip compressed mtree)"))?;

        Self::parse_text(&text)
    }

    /// Parse uncompressed mtree text.
    pub fn parse_text(text: &str) -> Result<Self> {
        let mut defaults = EntryDefaults::default();
        let mut entries = Vec::new();

        for line in text.lines() {
            let line = line.trim();

            if let Some(rest) = line.strip_prefix("/set ") {
                defaults.apply(split_pairs(rest.split_whitespace()));
            } else if line.starts_with("./") {
                let mut tokens = line.split_whitespace();
                let raw_path = tokens.next().expect("line starts with ./");

                let mut values = defaults.values.clone();
                for (key, value) in split_pairs(tokens) {
                    values.insert(key, value);
                }

                entries.push(Self::entry(&raw_path[1..], &values, line)?);
            }
            // `#mtree` header, `/unset` and blank lines are skipped.
        }

        Ok(Self { entries })
    }

    fn entry(raw_path: &str, values: &HashMap<String, String>, line: &str) -> Result<MtreeEntry> {
        let path = decode_escapes(raw_path).ok_or_else(|| decode_error(line))?;

        let required = |key: &str| values.get(key).ok_or_else(|| decode_error(line));

        let entry_type =
            MtreeEntryType::from_str(required("type")?).map_err(|_| decode_error(line))?;

        let uid = u32::from_str(required("uid")?).map_err(|_| decode_error(line))?;
        let gid = u32::from_str(required("gid")?).map_err(|_| decode_error(line))?;
        let mode =
            u32::from_str_radix(required("mode")?, 8).map_err(|_| decode_error(line))?;
        let time = f64::from_str(required("time")?).map_err(|_| decode_error(line))?;

        let size = values
            .get("size")
            .map(|v| u64::from_str(v).map_err(|_| decode_error(line)))
            .transpose()?;

        let link = values
            .get("link")
            .map(|v| decode_escapes(v).ok_or_else(|| decode_error(line)))
            .transpose()?;

        Ok(MtreeEntry {
            path,
            entry_type,
            uid,
            gid,
            mode,
            size,
            time,
            md5: values.get("md5digest").cloned(),
            sha256: values.get("sha256digest").cloned(),
            link,
        })
    }

    /// The paths a package installs, in sync database notation.
    ///
    /// Paths are relative (no leading slash), directories carry a
    /// trailing slash and the package metadata dotfiles are omitted.
    pub fn installed_paths(&self) -> Vec<String> {
        let mut paths = self
            .entries
            .iter()
            .filter(|entry| {
                !matches!(
                    entry.path.as_str(),
                    "/.BUILDINFO" | "/.CHANGELOG" | "/.INSTALL" | "/.MTREE" | "/.PKGINFO"
                )
            })
            .map(|entry| {
                let path = entry.path.trim_start_matches('/');

                match entry.entry_type {
                    MtreeEntryType::Dir => format!("{}/", path),
                    _ => path.to_string(),
                }
            })
            .collect::<Vec<_>>();

        paths.sort();
        paths
    }
}

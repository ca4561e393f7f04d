// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O helpers.

Compression handling for package archives and sync databases, plus
content digest primitives. Package archives and databases are tars
compressed with one of gzip, bzip2, xz or zstandard; the concrete format
is detected from magic bytes rather than trusted from file names.
*/

use {
    digest::Digest,
    futures::AsyncRead,
    md5::Md5,
    pin_project::pin_project,
    serde::{Deserialize, Serialize},
    sha2::Sha256,
    std::{
        fmt::Formatter,
        io::{Read, Write},
        pin::Pin,
        task::{Context, Poll},
    },
};

/// Compression formats used by package archives and sync databases.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// No compression (no extension).
    None,

    /// Gzip compression (.gz extension).
    #[serde(alias = "gzip")]
    Gz,

    /// Bzip2 compression (.bz2 extension).
    #[serde(alias = "bzip2")]
    Bz2,

    /// XZ compression (.xz extension).
    #[serde(alias = "lzma")]
    Xz,

    /// Zstandard compression (.zst extension).
    #[serde(alias = "zstandard")]
    Zst,
}

impl Default for Compression {
    fn default() -> Self {
        Self::Gz
    }
}

impl Compression {
    /// Filename extension for files compressed in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Gz => ".gz",
            Self::Bz2 => ".bz2",
            Self::Xz => ".xz",
            Self::Zst => ".zst",
        }
    }

    /// Resolve a compression from a filename suffix (without leading dot).
    pub fn from_filename_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "" | "tar" => Some(Self::None),
            "gz" => Some(Self::Gz),
            "bz2" => Some(Self::Bz2),
            "xz" => Some(Self::Xz),
            "zst" => Some(Self::Zst),
            _ => None,
        }
    }

    /// Detect the compression of a byte stream from its magic bytes.
    ///
    /// Data that matches no known magic is treated as uncompressed.
    pub fn detect(data: &[u8]) -> Self {
        if data.starts_with(&[0x1f, 0x8b]) {
            Self::Gz
        } else if data.starts_with(b"BZh") {
            Self::Bz2
        } else if data.starts_with(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00]) {
            Self::Xz
        } else if data.starts_with(&[0x28, 0xb5, 0x2f, 0xfd]) {
            Self::Zst
        } else {
            Self::None
        }
    }
}

/// Wrap a reader with transparent decompression.
pub fn read_decompressed<'a, R: Read + 'a>(
    reader: R,
    compression: Compression,
) -> std::io::Result<Box<dyn Read + 'a>> {
    Ok(match compression {
        Compression::None => Box::new(reader),
        Compression::Gz => Box::new(flate2::read::GzDecoder::new(reader)),
        Compression::Bz2 => Box::new(bzip2::read::BzDecoder::new(reader)),
        Compression::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
        Compression::Zst => Box::new(zstd::stream::read::Decoder::new(reader)?),
    })
}

/// Compress a buffer in one shot.
///
/// Encoders are configured so identical input yields identical output
/// across runs (gzip mtime is fixed at zero).
pub fn write_compressed(data: &[u8], compression: Compression) -> std::io::Result<Vec<u8>> {
    Ok(match compression {
        Compression::None => data.to_vec(),
        Compression::Gz => {
            let mut encoder =
                flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data)?;
            encoder.finish()?
        }
        Compression::Bz2 => {
            let mut encoder =
                bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
            encoder.write_all(data)?;
            encoder.finish()?
        }
        Compression::Xz => {
            let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
            encoder.write_all(data)?;
            encoder.finish()?
        }
        Compression::Zst => zstd::stream::encode_all(data, 0)?,
    })
}

/// Decompress a buffer in one shot, detecting the format from magic bytes.
pub fn read_detected(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut reader = read_decompressed(data, Compression::detect(data))?;
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;

    Ok(out)
}

/// Represents a content digest.
#[derive(Clone, Eq, PartialEq, PartialOrd)]
pub enum ContentDigest {
    /// An MD5 digest.
    Md5(Vec<u8>),
    /// A SHA-256 digest.
    Sha256(Vec<u8>),
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5(data) => write!(f, "Md5({})", hex::encode(data)),
            Self::Sha256(data) => write!(f, "Sha256({})", hex::encode(data)),
        }
    }
}

impl ContentDigest {
    /// Create a new MD5 instance by parsing a hex digest.
    pub fn md5_hex(digest: &str) -> crate::error::Result<Self> {
        Ok(Self::Md5(hex::decode(digest)?))
    }

    /// Create a new SHA-256 instance by parsing a hex digest.
    pub fn sha256_hex(digest: &str) -> crate::error::Result<Self> {
        Ok(Self::Sha256(hex::decode(digest)?))
    }

    /// Obtain the digest bytes for this content digest.
    pub fn digest_bytes(&self) -> &[u8] {
        match self {
            Self::Md5(x) => x,
            Self::Sha256(x) => x,
        }
    }

    /// Obtain the hex encoded content digest.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest_bytes())
    }
}

/// Holds an MD5 and SHA-256 digest over the same content.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MultiContentDigest {
    pub md5: ContentDigest,
    pub sha256: ContentDigest,
}

impl MultiContentDigest {
    /// Whether this digest matches another one of the same flavor.
    pub fn matches_digest(&self, other: &ContentDigest) -> bool {
        match other {
            ContentDigest::Md5(_) => &self.md5 == other,
            ContentDigest::Sha256(_) => &self.sha256 == other,
        }
    }
}

/// A content digester computing multiple digest types simultaneously.
pub struct MultiDigester {
    md5: Md5,
    sha256: Sha256,
}

impl Default for MultiDigester {
    fn default() -> Self {
        Self {
            md5: Md5::new(),
            sha256: Sha256::new(),
        }
    }
}

impl MultiDigester {
    /// Digest a full buffer in one call.
    pub fn digest(data: &[u8]) -> MultiContentDigest {
        let mut digester = Self::default();
        digester.update(data);
        digester.finish()
    }

    /// Write content into the digesters.
    pub fn update(&mut self, data: &[u8]) {
        self.md5.update(data);
        self.sha256.update(data);
    }

    /// Finish digesting content.
    ///
    /// Consumes the instance and returns a [MultiContentDigest] holding
    /// all the digests.
    pub fn finish(self) -> MultiContentDigest {
        MultiContentDigest {
            md5: ContentDigest::Md5(self.md5.finalize().to_vec()),
            sha256: ContentDigest::Sha256(self.sha256.finalize().to_vec()),
        }
    }
}

/// An [AsyncRead] stream adapter computing content digests as data is read.
#[pin_project]
pub struct DigestingReader<R> {
    digester: MultiDigester,
    bytes_read: u64,
    #[pin]
    source: R,
}

impl<R> DigestingReader<R> {
    /// Construct a new instance from a source reader.
    pub fn new(source: R) -> Self {
        Self {
            digester: MultiDigester::default(),
            bytes_read: 0,
            source,
        }
    }

    /// Finish the stream.
    ///
    /// Returns the source reader, the resolved digests and the number of
    /// bytes read.
    pub fn finish(self) -> (R, MultiContentDigest, u64) {
        (self.source, self.digester.finish(), self.bytes_read)
    }
}

impl<R> AsyncRead for DigestingReader<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        let mut this = self.project();

        match this.source.as_mut().poll_read(cx, buf) {
            Poll::Ready(Ok(size)) => {
                if size > 0 {
                    this.digester.update(&buf[0..size]);
                    *this.bytes_read += size as u64;
                }

                Poll::Ready(Ok(size))
            }
            res => res,
        }
    }
}

/// Digest a file on disk without holding its content in memory.
pub async fn digest_file(path: &std::path::Path) -> crate::error::Result<MultiContentDigest> {
    let file = std::fs::File::open(path)
        .map_err(|e| crate::error::RepositoryError::IoPath(path.display().to_string(), e))?;

    let mut reader = DigestingReader::new(futures::io::AllowStdIo::new(file));
    let mut sink = futures::io::sink();
    futures::io::copy(&mut reader, &mut sink)
        .await
        .map_err(|e| crate::error::RepositoryError::IoPath(path.display().to_string(), e))?;

    Ok(reader.finish().1)
}

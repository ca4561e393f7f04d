// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {crate::package_version::VersionError, thiserror::Error};

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("I/O error on path {0}: {1:?}")]
    IoPath(String, std::io::Error),

    #[error("hex parsing error: {0:?}")]
    Hex(#[from] hex::FromHexError),

    #[error("JSON error: {0:?}")]
    Json(#[from] serde_json::Error),

    #[error("version error: {0}")]
    Version(#[from] VersionError),

    #[error("malformed dependency expression: {0}")]
    InvalidConstraint(String),

    #[error("cannot read package archive {0}: {1}")]
    ArchiveFormat(String, String),

    #[error("package archive {0} lacks a .PKGINFO member")]
    MissingMetadata(String),

    #[error("unknown {0} schema version: {1}")]
    SchemaUnknown(&'static str, String),

    #[error("required field {field} missing or invalid in {file}")]
    SchemaViolation { file: &'static str, field: String },

    #[error("cannot decode {file} line: {line}")]
    DecodeError { file: &'static str, line: String },

    #[error("malformed sync database entry {0}: {1}")]
    SyncDbMalformed(String, String),

    #[error("packages for pkgbase {0} disagree on {1}")]
    PkgbaseInconsistent(String, &'static str),

    #[error("version of {name} would regress from {current} to {proposed}")]
    VersionRegression {
        name: String,
        current: String,
        proposed: String,
    },

    #[error("build requirement {0} is not satisfiable")]
    MissingBuildRequirement(String),

    #[error("package name {0} is already provided by pkgbase {1}")]
    NameConflict(String, String),

    #[error("pkgbase {0} is not present in layer {1}")]
    PkgbaseAbsent(String, String),

    #[error("package {0} does not belong in layer {1}")]
    LayerMismatch(String, String),

    #[error("pool entry {0} exists with different contents")]
    PoolCollision(String),

    #[error("symlink {0} exists but points at {1}")]
    LinkConflict(String, String),

    #[error("could not lock repository {0} within {1:?}")]
    LockTimeout(String, std::time::Duration),

    #[error("signature {0} did not verify: {1}")]
    SignatureInvalid(String, String),

    #[error("no signature found for package {0}")]
    SignatureMissing(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown repository {0}")]
    UnknownRepository(String),
}

impl RepositoryError {
    /// Map an error to the process exit code reserved for its category.
    ///
    /// `1` for validation failures, `2` for I/O failures, `3` for
    /// configuration errors and `4` for signature failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Io(_) | Self::IoPath(_, _) | Self::LockTimeout(_, _) => 2,
            Self::Config(_) | Self::UnknownRepository(_) => 3,
            Self::SignatureInvalid(_, _) | Self::SignatureMissing(_) => 4,
            _ => 1,
        }
    }
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, RepositoryError>;

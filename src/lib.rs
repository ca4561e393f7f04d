// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Pacman repository management primitives.

This crate defines pure Rust implementations of the primitives behind a
package repository for pacman flavored Linux distributions: inspecting
built package archives, maintaining the authoritative management
repository of per-pkgbase descriptor documents, and generating the sync
databases pacman consumes at install time.

# Goals

## Determinism and Reproducibility

Given the same logical repository state, operations should produce
byte-for-byte identical artifacts. Sync databases are written with
pinned tar metadata and stable ordering; descriptor documents use
canonical JSON. Identical state in, identical bytes out.

## Compatibility

Package metadata parsing, version comparison and the sync database
format follow what libalpm, makepkg and repo-add actually produce, so
repositories managed by this crate are indistinguishable to pacman from
ones managed with the stock tooling.

## Safety under failure

Mutating operations are transactional: all filesystem effects are
staged, applied through atomic renames and rolled back on failure. A
crash between apply and publish is healed on the next reconcile pass.

# A Tour of Functionality

A package archive is a compressed tar carrying metadata members at its
root. [package::Package::inspect] streams an archive and returns its
validated metadata: the [pkginfo::PkgInfo] (`.PKGINFO`),
[buildinfo::BuildInfo] (`.BUILDINFO`) and [mtree::Mtree] (`.MTREE`)
documents, content digests and the payload file listing. Each of the
three formats dispatches on an explicit schema version.

Package versions and their pacman compatible total order live in
[package_version]; [package_version::vercmp] is the segmentwise
comparison and [package_version::PackageVersion] the parsed form.
Dependency expressions (`name>=version`) are handled by [dependency].

The management repository persists one
[descriptor::PackageBaseDescriptor] JSON document per pkgbase; it is
the authoritative record from which everything else derives. The sync
database codec in [sync_db] converts between those descriptors and the
tar based `.db`/`.files` databases, supporting both `desc` schema
versions.

Physical storage is a content addressed [pool::PackagePool] plus
relative symlinks inside per-layer repository directories. The
[repository::engine::RepositoryEngine] ties it all together: its `add`,
`remove` and `move_pkgbases` operations validate against repository
state (version ordering across stability layers, pkgbase coherence,
name uniqueness, optional build requirement closure and signature
verification via [signature]) and apply changes under the advisory
locks of [repository::lock], with undo tracking from [transaction].

Configuration is TOML, modeled in [config].
*/

pub mod arch;
pub mod buildinfo;
pub mod config;
pub mod dependency;
pub mod descriptor;
pub mod error;
pub mod io;
pub mod mtree;
pub mod package;
pub mod package_version;
pub mod pkginfo;
pub mod pool;
pub mod repository;
pub mod signature;
pub mod sync_db;
pub mod transaction;

#[cfg(test)]
pub(crate) mod testutil;

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The repository engine.

Orchestrates package addition, removal and movement across stability
layers. Each operation runs under the repository's advisory lock and
walks the same state machine: inputs are staged and inspected,
validated against the current repository state, applied to the pool and
layer directories, and finally published by persisting descriptors and
regenerating the sync databases.

Every filesystem effect is recorded on an [UndoStack]; a failure at any
point unwinds the stack in reverse order and leaves the repository in
its pre-operation state. A crash between apply and publish is healed by
[RepositoryEngine::reconcile], which treats the persisted descriptors
as the authoritative record.
*/

use {
    crate::{
        config::{RepositoryConfig, Settings},
        dependency::{satisfies_requirement, VersionRequirement},
        descriptor::PackageBaseDescriptor,
        error::{RepositoryError, Result},
        package::{FilenameParts, Package},
        package_version::PackageVersion,
        pool::PackagePool,
        repository::{lock::RepositoryLock, Layer, LayerRole},
        signature::{signature_path, verifier_for, SignatureVerifier},
        sync_db::{write_database, SyncDbKind, SyncDbPackage},
        transaction::{
            is_staging_residue, replace_symlink, staged_remove, staged_write, UndoStack,
        },
    },
    futures::StreamExt,
    std::{
        collections::{BTreeMap, BTreeSet},
        fs,
        path::{Path, PathBuf},
    },
};

/// A request to add package archives to one layer of a repository.
#[derive(Clone, Debug)]
pub struct AddRequest {
    pub repository: String,
    pub layer: Layer,
    pub archives: Vec<PathBuf>,
    /// Bypass version ordering checks.
    pub force: bool,
}

/// A request to drop pkgbases from one layer.
#[derive(Clone, Debug)]
pub struct RemoveRequest {
    pub repository: String,
    pub layer: Layer,
    pub pkgbases: Vec<String>,
    /// Run pool garbage collection afterwards.
    pub collect: bool,
}

/// A request to move pkgbases between two layers of a repository.
#[derive(Clone, Debug)]
pub struct MoveRequest {
    pub repository: String,
    pub from: Layer,
    pub to: Layer,
    pub pkgbases: Vec<String>,
    pub force: bool,
}

/// Summary of a successful add.
#[derive(Clone, Debug)]
pub struct AddOutcome {
    /// pkgbase names and their versions, as published.
    pub pkgbases: Vec<(String, String)>,
}

/// What a reconcile pass changed.
#[derive(Clone, Debug, Default)]
pub struct ReconcileReport {
    pub removed_links: Vec<PathBuf>,
    pub restored_links: Vec<PathBuf>,
    pub residue_removed: Vec<PathBuf>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.removed_links.is_empty()
            && self.restored_links.is_empty()
            && self.residue_removed.is_empty()
    }
}

/// The repository engine. One instance serves every configured
/// repository; per-operation state lives on the stack.
pub struct RepositoryEngine {
    settings: Settings,
    verifier: Box<dyn SignatureVerifier>,
}

impl RepositoryEngine {
    pub fn new(settings: Settings) -> Self {
        let verifier = verifier_for(settings.package_verification);

        Self { settings, verifier }
    }

    /// Substitute the signature verifier, e.g. with a keyring bound
    /// instance.
    pub fn with_verifier(settings: Settings, verifier: Box<dyn SignatureVerifier>) -> Self {
        Self { settings, verifier }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Add a batch of package archives to a repository layer.
    ///
    /// The batch is all or nothing: any validation or I/O failure
    /// leaves the repository unchanged.
    pub async fn add(&self, request: AddRequest) -> Result<AddOutcome> {
        let repo = self.settings.repository(&request.repository)?;
        let layer_dir = self.require_layer(repo, request.layer)?;
        let management_dir = self
            .settings
            .management_dir(repo, request.layer)
            .expect("layer presence checked");

        let _lock = RepositoryLock::acquire(
            &self.settings.lock_path(repo),
            self.settings.lock_timeout(),
        )?;

        // Stage: inspect every archive, locate signatures.
        let packages = self.inspect_archives(&request.archives).await?;
        let signatures = locate_signatures(&request.archives);

        // Validate.
        self.validate_batch(repo, request.layer, &packages)?;

        let mut descriptors = group_into_descriptors(&packages)?;

        let existing = load_descriptors_in(&management_dir)?;
        check_name_uniqueness(&descriptors, &existing)?;

        if !request.force {
            for descriptor in &descriptors {
                self.check_version_order(repo, request.layer, descriptor, &existing)?;
            }
        }

        if self.settings.build_requirements_exist {
            self.check_build_requirements(repo, &descriptors, &packages)?;
        }

        for archive in &request.archives {
            match signatures.get(archive) {
                Some(signature_file) => {
                    self.verifier.verify(archive, signature_file).await?;
                }
                None if self.verifier.requires_signature() => {
                    return Err(RepositoryError::SignatureMissing(
                        signature_path(archive).display().to_string(),
                    ));
                }
                None => {}
            }
        }

        embed_signatures(&mut descriptors, &request.archives, &signatures)?;

        // Apply and publish under one undo stack.
        let mut undo = UndoStack::new();

        let result = self
            .apply_add(
                repo,
                request.layer,
                &layer_dir,
                &management_dir,
                &request.archives,
                &signatures,
                &descriptors,
                &mut undo,
            )
            .await;

        match result {
            Ok(()) => {
                undo.commit();

                Ok(AddOutcome {
                    pkgbases: descriptors
                        .iter()
                        .map(|d| (d.base.clone(), d.version.clone()))
                        .collect(),
                })
            }
            Err(e) => {
                log::warn!("add to {} failed, rolling back: {}", request.repository, e);
                undo.unwind();

                Err(e)
            }
        }
    }

    /// Drop pkgbases from a layer. Absent pkgbases are tolerated.
    pub async fn remove(&self, request: RemoveRequest) -> Result<()> {
        let repo = self.settings.repository(&request.repository)?;
        let layer_dir = self.require_layer(repo, request.layer)?;
        let management_dir = self
            .settings
            .management_dir(repo, request.layer)
            .expect("layer presence checked");

        let _lock = RepositoryLock::acquire(
            &self.settings.lock_path(repo),
            self.settings.lock_timeout(),
        )?;

        let mut undo = UndoStack::new();
        let pool = PackagePool::new(self.settings.package_pool_dir(repo));

        let result = (|| {
            for base in &request.pkgbases {
                let descriptor_path = management_dir.join(format!("{}.json", base));

                let descriptor = match load_descriptor(&descriptor_path)? {
                    Some(descriptor) => descriptor,
                    None => {
                        log::info!("pkgbase {} already absent, skipping", base);
                        continue;
                    }
                };

                for filename in descriptor.referenced_files() {
                    pool.unlink(&layer_dir, &filename, &mut undo)?;
                    pool.unlink(&layer_dir, &format!("{}.sig", filename), &mut undo)?;
                }

                staged_remove(&descriptor_path, &mut undo)?;
            }

            self.publish_layer(repo, request.layer, &mut undo)
        })();

        match result {
            Ok(()) => {
                undo.commit();

                if request.collect {
                    self.collect_shared_pool(repo)?;
                }

                Ok(())
            }
            Err(e) => {
                undo.unwind();
                Err(e)
            }
        }
    }

    /// Move pkgbases from one layer to another.
    pub async fn move_pkgbases(&self, request: MoveRequest) -> Result<()> {
        let repo = self.settings.repository(&request.repository)?;
        let from_dir = self.require_layer(repo, request.from)?;
        let to_dir = self.require_layer(repo, request.to)?;
        let from_management = self
            .settings
            .management_dir(repo, request.from)
            .expect("layer presence checked");
        let to_management = self
            .settings
            .management_dir(repo, request.to)
            .expect("layer presence checked");

        // Both layers live under one repository lock; the ordered
        // acquisition keeps multi-repository extensions deadlock free.
        let _locks = RepositoryLock::acquire_ordered(
            &[self.settings.lock_path(repo)],
            self.settings.lock_timeout(),
        )?;

        // Validate every pkgbase before touching anything.
        let mut moves = Vec::new();
        let target_existing = load_descriptors_in(&to_management)?;

        for base in &request.pkgbases {
            let source_path = from_management.join(format!("{}.json", base));

            let descriptor = load_descriptor(&source_path)?.ok_or_else(|| {
                RepositoryError::PkgbaseAbsent(base.clone(), request.from.describe())
            })?;

            for package in &descriptor.packages {
                if let Some(holder) = target_existing.iter().find(|other| {
                    other.base != *base
                        && other.packages.iter().any(|p| p.name == package.name)
                }) {
                    return Err(RepositoryError::NameConflict(
                        package.name.clone(),
                        holder.base.clone(),
                    ));
                }
            }

            if !request.force {
                if let Some(current) = target_existing.iter().find(|d| d.base == *base) {
                    let current_version = current.parsed_version()?;
                    let proposed = descriptor.parsed_version()?;

                    if proposed <= current_version {
                        return Err(RepositoryError::VersionRegression {
                            name: base.clone(),
                            current: current.version.clone(),
                            proposed: descriptor.version.clone(),
                        });
                    }
                }
            }

            moves.push((source_path, descriptor));
        }

        let pool = PackagePool::new(self.settings.package_pool_dir(repo));
        let mut undo = UndoStack::new();

        let result = (|| {
            for (source_path, descriptor) in &moves {
                let target_path = to_management.join(format!("{}.json", descriptor.base));

                // Replacing an older version in the target layer drops
                // its now stale links.
                if let Some(previous) = load_descriptor(&target_path)? {
                    for filename in previous.referenced_files() {
                        pool.unlink(&to_dir, &filename, &mut undo)?;
                        pool.unlink(&to_dir, &format!("{}.sig", filename), &mut undo)?;
                    }
                }

                staged_write(
                    &target_path,
                    descriptor.to_canonical_json()?.as_bytes(),
                    &mut undo,
                )?;
                staged_remove(source_path, &mut undo)?;

                for filename in descriptor.referenced_files() {
                    let names = [filename.clone(), format!("{}.sig", filename)];

                    for name in names {
                        let pool_path = pool.entry_path(&name);

                        if pool_path.exists() {
                            pool.link(&pool_path, &to_dir, &mut undo)?;
                            pool.unlink(&from_dir, &name, &mut undo)?;
                        }
                    }
                }
            }

            self.publish_layer(repo, request.from, &mut undo)?;
            self.publish_layer(repo, request.to, &mut undo)?;

            Ok(())
        })();

        match result {
            Ok(()) => {
                undo.commit();
                Ok(())
            }
            Err(e) => {
                undo.unwind();
                Err(e)
            }
        }
    }

    /// Heal a repository after a crash.
    ///
    /// Descriptors are authoritative: layer symlinks they do not
    /// reference are removed, missing ones are restored from the pool
    /// and the sync databases are regenerated. Staging residue from
    /// interrupted operations is deleted.
    pub async fn reconcile(&self, repository: &str) -> Result<ReconcileReport> {
        let repo = self.settings.repository(repository)?;

        let _lock = RepositoryLock::acquire(
            &self.settings.lock_path(repo),
            self.settings.lock_timeout(),
        )?;

        let pool = PackagePool::new(self.settings.package_pool_dir(repo));
        let mut report = ReconcileReport::default();

        for layer in repo.layers() {
            let layer_dir = self.settings.layer_dir(repo, layer).expect("configured");
            let management_dir = self
                .settings
                .management_dir(repo, layer)
                .expect("configured");

            let descriptors = load_descriptors_in(&management_dir)?;

            let mut expected = BTreeSet::new();
            for descriptor in &descriptors {
                for filename in descriptor.referenced_files() {
                    let sig = format!("{}.sig", filename);
                    if pool.entry_path(&sig).exists() {
                        expected.insert(sig);
                    }

                    expected.insert(filename);
                }
            }

            let layer_name = repo.layer_name(layer).expect("configured");
            let db_names = database_file_names(&layer_name, &self.settings);

            if let Ok(entries) = fs::read_dir(&layer_dir) {
                for entry in entries {
                    let entry = entry.map_err(|e| {
                        RepositoryError::IoPath(layer_dir.display().to_string(), e)
                    })?;
                    let name = entry.file_name().to_string_lossy().to_string();
                    let path = entry.path();

                    if is_staging_residue(&name) {
                        fs::remove_file(&path).map_err(|e| {
                            RepositoryError::IoPath(path.display().to_string(), e)
                        })?;
                        report.residue_removed.push(path);
                        continue;
                    }

                    if db_names.contains(&name) {
                        continue;
                    }

                    let is_symlink = fs::read_link(&path).is_ok();

                    if is_symlink && !expected.contains(&name) {
                        fs::remove_file(&path).map_err(|e| {
                            RepositoryError::IoPath(path.display().to_string(), e)
                        })?;
                        log::info!("reconcile removed orphan link {}", path.display());
                        report.removed_links.push(path);
                    } else if !is_symlink {
                        log::warn!("unexpected file in layer directory: {}", path.display());
                    }
                }
            }

            for name in &expected {
                let link_path = layer_dir.join(name);

                if fs::read_link(&link_path).is_ok() {
                    continue;
                }

                let pool_path = pool.entry_path(name);
                if !pool_path.exists() {
                    log::warn!(
                        "descriptor references {} but the pool entry is missing",
                        name
                    );
                    continue;
                }

                let mut undo = UndoStack::new();
                pool.link(&pool_path, &layer_dir, &mut undo)?;
                undo.commit();

                log::info!("reconcile restored link {}", link_path.display());
                report.restored_links.push(link_path);
            }

            let mut undo = UndoStack::new();
            self.publish_layer(repo, layer, &mut undo)?;
            undo.commit();
        }

        Ok(report)
    }

    /// Remove pool entries no layer references.
    ///
    /// The pool may be shared: every repository resolving to the same
    /// pool directory contributes its references.
    pub async fn collect_garbage(&self, repository: &str) -> Result<Vec<String>> {
        let repo = self.settings.repository(repository)?;

        let _lock = RepositoryLock::acquire(
            &self.settings.lock_path(repo),
            self.settings.lock_timeout(),
        )?;

        self.collect_shared_pool(repo)
    }

    fn collect_shared_pool(&self, repo: &RepositoryConfig) -> Result<Vec<String>> {
        let pool_dir = self.settings.package_pool_dir(repo);
        let pool = PackagePool::new(pool_dir.clone());

        let mut known = BTreeSet::new();

        for other in &self.settings.repositories {
            if self.settings.package_pool_dir(other) != pool_dir {
                continue;
            }

            for layer in other.layers() {
                let management_dir = self
                    .settings
                    .management_dir(other, layer)
                    .expect("configured");

                for descriptor in load_descriptors_in(&management_dir)? {
                    for filename in descriptor.referenced_files() {
                        known.insert(format!("{}.sig", filename));
                        known.insert(filename);
                    }
                }
            }
        }

        pool.collect(&known)
    }

    // Apply phase of an add: pool placement, layer linking, descriptor
    // persistence, database regeneration.
    #[allow(clippy::too_many_arguments)]
    async fn apply_add(
        &self,
        repo: &RepositoryConfig,
        layer: Layer,
        layer_dir: &Path,
        management_dir: &Path,
        archives: &[PathBuf],
        signatures: &BTreeMap<PathBuf, PathBuf>,
        descriptors: &[PackageBaseDescriptor],
        undo: &mut UndoStack,
    ) -> Result<()> {
        let pool = PackagePool::new(self.settings.package_pool_dir(repo));

        for archive in archives {
            let pool_path = pool.place(archive, undo).await?;
            pool.link(&pool_path, layer_dir, undo)?;

            if let Some(signature) = signatures.get(archive) {
                let sig_pool_path = pool.place(signature, undo).await?;
                pool.link(&sig_pool_path, layer_dir, undo)?;
            }
        }

        fs::create_dir_all(management_dir)
            .map_err(|e| RepositoryError::IoPath(management_dir.display().to_string(), e))?;

        for descriptor in descriptors {
            let path = management_dir.join(format!("{}.json", descriptor.base));

            // A version upgrade replaces the descriptor in place; layer
            // links of files the new version no longer ships go away.
            if let Some(previous) = load_descriptor(&path)? {
                let kept = descriptor
                    .referenced_files()
                    .into_iter()
                    .collect::<BTreeSet<_>>();

                for filename in previous.referenced_files() {
                    if !kept.contains(&filename) {
                        pool.unlink(layer_dir, &filename, undo)?;
                        pool.unlink(layer_dir, &format!("{}.sig", filename), undo)?;
                    }
                }
            }

            staged_write(&path, descriptor.to_canonical_json()?.as_bytes(), undo)?;
        }

        self.publish_layer(repo, layer, undo)
    }

    /// Regenerate both sync databases of a layer from its descriptors.
    ///
    /// Descriptor persistence happens before this; the database rename
    /// is the publication point of the layer.
    fn publish_layer(
        &self,
        repo: &RepositoryConfig,
        layer: Layer,
        undo: &mut UndoStack,
    ) -> Result<()> {
        let layer_dir = self.settings.layer_dir(repo, layer).expect("configured");
        let management_dir = self
            .settings
            .management_dir(repo, layer)
            .expect("configured");
        let layer_name = repo.layer_name(layer).expect("configured");

        let descriptors = load_descriptors_in(&management_dir)?;

        let records = descriptors
            .iter()
            .flat_map(|descriptor| descriptor.to_records())
            .collect::<Vec<SyncDbPackage>>();

        let compression = self.settings.database_compression;
        let desc_version = self.settings.syncdb_settings.desc()?;
        self.settings.syncdb_settings.files()?;

        fs::create_dir_all(&layer_dir)
            .map_err(|e| RepositoryError::IoPath(layer_dir.display().to_string(), e))?;

        for kind in [SyncDbKind::Default, SyncDbKind::Files] {
            let data = write_database(&records, kind, desc_version, compression)?;

            let filename = kind.database_filename(&layer_name, compression);
            staged_write(&layer_dir.join(&filename), &data, undo)?;

            replace_symlink(
                &layer_dir.join(kind.symlink_filename(&layer_name)),
                Path::new(&filename),
                undo,
            )?;
        }

        log::info!(
            "published {} packages to {}/{}",
            records.len(),
            repo.name,
            layer_name
        );

        Ok(())
    }

    fn require_layer(&self, repo: &RepositoryConfig, layer: Layer) -> Result<PathBuf> {
        self.settings.layer_dir(repo, layer).ok_or_else(|| {
            RepositoryError::Config(format!(
                "repository {} has no {} layer",
                repo.name,
                layer.describe()
            ))
        })
    }

    /// Inspect archives in parallel, heavy work on blocking threads.
    async fn inspect_archives(&self, archives: &[PathBuf]) -> Result<Vec<Package>> {
        if archives.is_empty() {
            return Err(RepositoryError::Config(
                "no package archives provided".to_string(),
            ));
        }

        let threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        let mut stream = futures::stream::iter(archives.iter().cloned().map(|path| {
            async_std::task::spawn_blocking(move || Package::inspect(&path))
        }))
        .buffer_unordered(threads);

        let mut packages = Vec::with_capacity(archives.len());

        while let Some(result) = stream.next().await {
            packages.push(result?);
        }

        // Deterministic processing order regardless of completion order.
        packages.sort_by(|a, b| a.filename.cmp(&b.filename));

        Ok(packages)
    }

    fn validate_batch(
        &self,
        repo: &RepositoryConfig,
        layer: Layer,
        packages: &[Package],
    ) -> Result<()> {
        let repo_arch = self.settings.repository_architecture(repo);

        for package in packages {
            package.validate_filename()?;

            if !package.arch().compatible_with(repo_arch) {
                return Err(RepositoryError::LayerMismatch(
                    package.filename.clone(),
                    format!("{} repository {}", repo_arch, repo.name),
                ));
            }

            // Debug packages go to the debug series and nowhere else.
            if package.pkginfo.is_debug() != layer.debug {
                return Err(RepositoryError::LayerMismatch(
                    package.filename.clone(),
                    layer.describe(),
                ));
            }
        }

        Ok(())
    }

    /// Version ordering checks for one incoming descriptor.
    ///
    /// Within the target layer an add must strictly increase the
    /// version. Against siblings the stability waterfall holds: a layer
    /// carries strictly newer versions than every more stable layer and
    /// strictly older ones than every less stable layer, with one
    /// carve-out — staging may fall behind testing as long as it stays
    /// ahead of stable.
    fn check_version_order(
        &self,
        repo: &RepositoryConfig,
        layer: Layer,
        descriptor: &PackageBaseDescriptor,
        existing: &[PackageBaseDescriptor],
    ) -> Result<()> {
        let proposed = descriptor.parsed_version()?;

        if let Some(current) = existing.iter().find(|d| d.base == descriptor.base) {
            if proposed <= current.parsed_version()? {
                return Err(RepositoryError::VersionRegression {
                    name: descriptor.base.clone(),
                    current: current.version.clone(),
                    proposed: descriptor.version.clone(),
                });
            }
        }

        for sibling in layer.siblings() {
            let management_dir = match self.settings.management_dir(repo, sibling) {
                Some(dir) => dir,
                None => continue,
            };

            let sibling_descriptor =
                match load_descriptor(&management_dir.join(format!("{}.json", descriptor.base)))? {
                    Some(descriptor) => descriptor,
                    None => continue,
                };

            let sibling_version = sibling_descriptor.parsed_version()?;

            let violated = if sibling.role > layer.role {
                let exempt =
                    layer.role == LayerRole::Staging && sibling.role == LayerRole::Testing;

                !exempt && proposed <= sibling_version
            } else {
                proposed >= sibling_version
            };

            if violated {
                return Err(RepositoryError::VersionRegression {
                    name: descriptor.base.clone(),
                    current: sibling_descriptor.version.clone(),
                    proposed: descriptor.version.clone(),
                });
            }
        }

        Ok(())
    }

    /// Verify that the build requirements of the incoming pkgbases are
    /// satisfiable from the batch itself, the repository's layers or
    /// the archive directory.
    fn check_build_requirements(
        &self,
        repo: &RepositoryConfig,
        incoming: &[PackageBaseDescriptor],
        batch: &[Package],
    ) -> Result<()> {
        // Candidate providers: (name, version, provides).
        let mut providers: Vec<(String, PackageVersion, Vec<String>)> = Vec::new();

        for package in batch {
            providers.push((
                package.name().to_string(),
                package.version().clone(),
                package.pkginfo.info().provides.clone(),
            ));
        }

        for layer in repo.layers() {
            let management_dir = self
                .settings
                .management_dir(repo, layer)
                .expect("configured");

            for descriptor in load_descriptors_in(&management_dir)? {
                let version = descriptor.parsed_version()?;

                for package in &descriptor.packages {
                    providers.push((
                        package.name.clone(),
                        version.clone(),
                        package.provides.clone(),
                    ));
                }
            }
        }

        // The archive directory contributes file names only. An absent
        // directory contributes nothing; requirements then fail closed.
        if let Some(archive_dir) = &repo.archiving {
            match fs::read_dir(archive_dir) {
                Ok(entries) => {
                    for entry in entries {
                        let entry = entry.map_err(|e| {
                            RepositoryError::IoPath(archive_dir.display().to_string(), e)
                        })?;
                        let name = entry.file_name().to_string_lossy().to_string();

                        if let Ok(parts) = FilenameParts::parse(&name) {
                            providers.push((parts.name, parts.version, Vec::new()));
                        }
                    }
                }
                Err(_) => {
                    log::warn!(
                        "archive directory {} is not readable; build requirements fall back to repository contents",
                        archive_dir.display()
                    );
                }
            }
        }

        let mut requirements = BTreeSet::new();
        for descriptor in incoming {
            requirements.extend(descriptor.makedepends.iter().cloned());
            requirements.extend(descriptor.checkdepends.iter().cloned());

            for package in &descriptor.packages {
                requirements.extend(package.depends.iter().cloned());
            }
        }

        for requirement_text in requirements {
            let requirement = VersionRequirement::parse(&requirement_text)?;

            let satisfied = providers.iter().any(|(name, version, provides)| {
                satisfies_requirement(&requirement, name, version, provides)
            });

            if !satisfied {
                return Err(RepositoryError::MissingBuildRequirement(requirement_text));
            }
        }

        Ok(())
    }
}

/// Group inspected packages by pkgbase and merge each group.
fn group_into_descriptors(packages: &[Package]) -> Result<Vec<PackageBaseDescriptor>> {
    let mut grouped: BTreeMap<String, Vec<Package>> = BTreeMap::new();

    for package in packages {
        grouped
            .entry(package.base().to_string())
            .or_default()
            .push(package.clone());
    }

    grouped
        .values()
        .map(|group| PackageBaseDescriptor::from_packages(group))
        .collect()
}

/// The detached signature files present next to the input archives.
fn locate_signatures(archives: &[PathBuf]) -> BTreeMap<PathBuf, PathBuf> {
    let mut signatures = BTreeMap::new();

    for archive in archives {
        let signature = signature_path(archive);

        if signature.exists() {
            signatures.insert(archive.clone(), signature);
        }
    }

    signatures
}

/// Reject batches whose package names collide with each other or with
/// another pkgbase already in the layer.
fn check_name_uniqueness(
    incoming: &[PackageBaseDescriptor],
    existing: &[PackageBaseDescriptor],
) -> Result<()> {
    let mut claimed: BTreeMap<&str, &str> = BTreeMap::new();

    for descriptor in incoming {
        for package in &descriptor.packages {
            if let Some(base) = claimed.insert(&package.name, &descriptor.base) {
                return Err(RepositoryError::NameConflict(
                    package.name.clone(),
                    base.to_string(),
                ));
            }
        }
    }

    for descriptor in existing {
        for package in &descriptor.packages {
            if let Some(base) = claimed.get(package.name.as_str()) {
                if *base != descriptor.base {
                    return Err(RepositoryError::NameConflict(
                        package.name.clone(),
                        descriptor.base.clone(),
                    ));
                }
            }
        }
    }

    Ok(())
}

/// Attach base64 encoded signatures to the descriptors' packages.
fn embed_signatures(
    descriptors: &mut [PackageBaseDescriptor],
    archives: &[PathBuf],
    signatures: &BTreeMap<PathBuf, PathBuf>,
) -> Result<()> {
    for archive in archives {
        let signature = match signatures.get(archive) {
            Some(signature) => signature,
            None => continue,
        };

        let filename = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let encoded = base64::encode(
            fs::read(signature)
                .map_err(|e| RepositoryError::IoPath(signature.display().to_string(), e))?,
        );

        for descriptor in descriptors.iter_mut() {
            for package in &mut descriptor.packages {
                if package.filename == filename {
                    package.pgpsig = Some(encoded.clone());
                }
            }
        }
    }

    Ok(())
}

/// Load one descriptor document, `None` when absent.
fn load_descriptor(path: &Path) -> Result<Option<PackageBaseDescriptor>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(PackageBaseDescriptor::from_json(&text)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(RepositoryError::IoPath(path.display().to_string(), e)),
    }
}

/// Load every descriptor document in a management directory.
fn load_descriptors_in(dir: &Path) -> Result<Vec<PackageBaseDescriptor>> {
    let mut descriptors = Vec::new();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return Ok(descriptors),
    };

    for entry in entries {
        let entry = entry.map_err(|e| RepositoryError::IoPath(dir.display().to_string(), e))?;
        let name = entry.file_name().to_string_lossy().to_string();

        if !name.ends_with(".json") || is_staging_residue(&name) {
            continue;
        }

        if let Some(descriptor) = load_descriptor(&entry.path())? {
            descriptors.push(descriptor);
        }
    }

    descriptors.sort_by(|a, b| a.base.cmp(&b.base));

    Ok(descriptors)
}

/// Every database related file name of a layer, across compressions.
fn database_file_names(layer_name: &str, settings: &Settings) -> BTreeSet<String> {
    let mut names = BTreeSet::new();

    for kind in [SyncDbKind::Default, SyncDbKind::Files] {
        names.insert(kind.symlink_filename(layer_name));
        names.insert(kind.database_filename(layer_name, settings.database_compression));
    }

    names
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            arch::Architecture,
            config::{ManagementRepoSettings, PackageVerification, SyncDbSettings},
            io::Compression,
            sync_db::read_database,
            testutil::PackageArchiveBuilder,
        },
        async_std::task::block_on,
        std::time::Duration,
    };

    fn test_settings(root: &Path) -> Settings {
        Settings {
            architecture: Architecture::Any,
            database_compression: Compression::Gz,
            package_verification: PackageVerification::None,
            build_requirements_exist: false,
            lock_timeout: 0,
            syncdb_settings: SyncDbSettings {
                desc_version: 1,
                files_version: 1,
            },
            management_repo: ManagementRepoSettings {
                directory: root.join("management"),
            },
            data_directory: root.join("data"),
            repositories: vec![RepositoryConfig {
                name: "core".to_string(),
                architecture: None,
                debug: None,
                staging: Some("staging".to_string()),
                testing: Some("testing".to_string()),
                staging_debug: None,
                testing_debug: None,
                package_pool: None,
                source_pool: None,
                archiving: None,
            }],
        }
    }

    fn add_request(archives: Vec<PathBuf>, layer: Layer) -> AddRequest {
        AddRequest {
            repository: "core".to_string(),
            layer,
            archives,
            force: false,
        }
    }

    fn stable_dir(settings: &Settings) -> PathBuf {
        let repo = settings.repository("core").unwrap();
        settings.layer_dir(repo, Layer::stable()).unwrap()
    }

    fn stable_management(settings: &Settings) -> PathBuf {
        let repo = settings.repository("core").unwrap();
        settings.management_dir(repo, Layer::stable()).unwrap()
    }

    fn pool_dir(settings: &Settings) -> PathBuf {
        let repo = settings.repository("core").unwrap();
        settings.package_pool_dir(repo)
    }

    #[test]
    fn add_new_pkgbase() {
        block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let settings = test_settings(dir.path());
            let engine = RepositoryEngine::new(settings.clone());

            let archive = PackageArchiveBuilder::new("foo", "foo", "1.0-1", "any")
                .file("usr/", b"")
                .file("usr/bin/foo", b"binary")
                .write_to(dir.path(), "foo-1.0-1-any.pkg.tar.zst");

            let outcome = engine
                .add(add_request(vec![archive], Layer::stable()))
                .await
                .unwrap();
            assert_eq!(
                outcome.pkgbases,
                vec![("foo".to_string(), "1.0-1".to_string())]
            );

            // Descriptor persisted.
            let descriptor_path = stable_management(&settings).join("foo.json");
            let descriptor = load_descriptor(&descriptor_path).unwrap().unwrap();
            assert_eq!(descriptor.base, "foo");
            assert_eq!(descriptor.version, "1.0-1");

            // Pool entry and layer symlink in place.
            let pool_entry = pool_dir(&settings).join("foo-1.0-1-any.pkg.tar.zst");
            assert!(pool_entry.exists());

            let link = stable_dir(&settings).join("foo-1.0-1-any.pkg.tar.zst");
            let resolved = link.parent().unwrap().join(fs::read_link(&link).unwrap());
            assert_eq!(fs::canonicalize(&resolved).unwrap(), pool_entry);

            // Databases regenerated with the one package.
            let db_path = stable_dir(&settings).join("stable.db.tar.gz");
            let packages = read_database(fs::File::open(&db_path).unwrap()).unwrap();
            assert_eq!(packages.len(), 1);
            assert_eq!(packages[0].desc.name, "foo");
            assert_eq!(packages[0].desc.base, "foo");
            assert_eq!(packages[0].desc.version, "1.0-1");
            assert!(!packages[0].desc.md5sum.is_empty());

            let db_link = stable_dir(&settings).join("stable.db");
            assert_eq!(
                fs::read_link(&db_link).unwrap(),
                Path::new("stable.db.tar.gz")
            );

            // The files database carries the file list.
            let files_path = stable_dir(&settings).join("stable.files.tar.gz");
            let packages = read_database(fs::File::open(&files_path).unwrap()).unwrap();
            assert_eq!(
                packages[0].files.as_deref().unwrap(),
                &["usr/".to_string(), "usr/bin/foo".to_string()][..]
            );
        });
    }

    #[test]
    fn add_rejects_version_regression() {
        block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let settings = test_settings(dir.path());
            let engine = RepositoryEngine::new(settings.clone());

            let current = PackageArchiveBuilder::new("foo", "foo", "2.0-1", "any")
                .write_to(dir.path(), "foo-2.0-1-any.pkg.tar.zst");
            engine
                .add(add_request(vec![current], Layer::stable()))
                .await
                .unwrap();

            let older = PackageArchiveBuilder::new("foo", "foo", "1.9-1", "any")
                .write_to(dir.path(), "foo-1.9-1-any.pkg.tar.zst");

            assert!(matches!(
                engine.add(add_request(vec![older], Layer::stable())).await,
                Err(RepositoryError::VersionRegression { current, proposed, .. })
                    if current == "2.0-1" && proposed == "1.9-1"
            ));

            // Nothing was touched.
            let descriptor = load_descriptor(&stable_management(&settings).join("foo.json"))
                .unwrap()
                .unwrap();
            assert_eq!(descriptor.version, "2.0-1");
            assert!(!pool_dir(&settings)
                .join("foo-1.9-1-any.pkg.tar.zst")
                .exists());
            assert!(
                fs::read_link(stable_dir(&settings).join("foo-1.9-1-any.pkg.tar.zst")).is_err()
            );
        });
    }

    #[test]
    fn upgrade_replaces_in_place() {
        block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let settings = test_settings(dir.path());
            let engine = RepositoryEngine::new(settings.clone());

            let old = PackageArchiveBuilder::new("foo", "foo", "1.0-1", "any")
                .write_to(dir.path(), "foo-1.0-1-any.pkg.tar.zst");
            engine
                .add(add_request(vec![old], Layer::stable()))
                .await
                .unwrap();

            let new = PackageArchiveBuilder::new("foo", "foo", "1.1-1", "any")
                .write_to(dir.path(), "foo-1.1-1-any.pkg.tar.zst");
            engine
                .add(add_request(vec![new], Layer::stable()))
                .await
                .unwrap();

            // The old layer link is gone, the new one present.
            assert!(
                fs::read_link(stable_dir(&settings).join("foo-1.0-1-any.pkg.tar.zst")).is_err()
            );
            assert!(
                fs::read_link(stable_dir(&settings).join("foo-1.1-1-any.pkg.tar.zst")).is_ok()
            );

            let db_path = stable_dir(&settings).join("stable.db.tar.gz");
            let packages = read_database(fs::File::open(&db_path).unwrap()).unwrap();
            assert_eq!(packages.len(), 1);
            assert_eq!(packages[0].desc.version, "1.1-1");
        });
    }

    #[test]
    fn split_package_incoherence_rejected() {
        block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let settings = test_settings(dir.path());
            let engine = RepositoryEngine::new(settings.clone());

            let libfoo = PackageArchiveBuilder::new("libfoo", "foo", "1.0-1", "any")
                .write_to(dir.path(), "libfoo-1.0-1-any.pkg.tar.zst");
            let foo = PackageArchiveBuilder::new("foo", "foo", "1.1-1", "any")
                .write_to(dir.path(), "foo-1.1-1-any.pkg.tar.zst");

            assert!(matches!(
                engine
                    .add(add_request(vec![libfoo, foo], Layer::stable()))
                    .await,
                Err(RepositoryError::PkgbaseInconsistent(base, "version")) if base == "foo"
            ));

            // Neither package was placed.
            assert!(!pool_dir(&settings).exists());
            assert!(
                load_descriptor(&stable_management(&settings).join("foo.json"))
                    .unwrap()
                    .is_none()
            );
        });
    }

    #[test]
    fn move_preserves_referential_integrity() {
        block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let settings = test_settings(dir.path());
            let engine = RepositoryEngine::new(settings.clone());
            let repo = settings.repository("core").unwrap();

            let archive = PackageArchiveBuilder::new("foo", "foo", "1.0-1", "any")
                .file("usr/bin/foo", b"binary")
                .write_to(dir.path(), "foo-1.0-1-any.pkg.tar.zst");
            engine
                .add(add_request(vec![archive], Layer::testing()))
                .await
                .unwrap();

            let testing_management = settings.management_dir(repo, Layer::testing()).unwrap();
            let original_bytes = fs::read(testing_management.join("foo.json")).unwrap();

            engine
                .move_pkgbases(MoveRequest {
                    repository: "core".to_string(),
                    from: Layer::testing(),
                    to: Layer::stable(),
                    pkgbases: vec!["foo".to_string()],
                    force: false,
                })
                .await
                .unwrap();

            // Descriptor relocated byte for byte.
            assert!(!testing_management.join("foo.json").exists());
            assert_eq!(
                fs::read(stable_management(&settings).join("foo.json")).unwrap(),
                original_bytes
            );

            // Symlinks followed the move; the pool is untouched.
            let testing_dir = settings.layer_dir(repo, Layer::testing()).unwrap();
            assert!(
                fs::read_link(testing_dir.join("foo-1.0-1-any.pkg.tar.zst")).is_err()
            );
            assert!(
                fs::read_link(stable_dir(&settings).join("foo-1.0-1-any.pkg.tar.zst")).is_ok()
            );
            assert!(pool_dir(&settings)
                .join("foo-1.0-1-any.pkg.tar.zst")
                .exists());

            // Both databases were regenerated.
            let testing_db =
                read_database(fs::File::open(testing_dir.join("testing.db.tar.gz")).unwrap())
                    .unwrap();
            assert!(testing_db.is_empty());

            let stable_db = read_database(
                fs::File::open(stable_dir(&settings).join("stable.db.tar.gz")).unwrap(),
            )
            .unwrap();
            assert_eq!(stable_db.len(), 1);
        });
    }

    #[test]
    fn remove_and_collect() {
        block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let settings = test_settings(dir.path());
            let engine = RepositoryEngine::new(settings.clone());

            let archive = PackageArchiveBuilder::new("foo", "foo", "1.0-1", "any")
                .write_to(dir.path(), "foo-1.0-1-any.pkg.tar.zst");
            engine
                .add(add_request(vec![archive], Layer::stable()))
                .await
                .unwrap();

            engine
                .remove(RemoveRequest {
                    repository: "core".to_string(),
                    layer: Layer::stable(),
                    pkgbases: vec!["foo".to_string(), "never-existed".to_string()],
                    collect: false,
                })
                .await
                .unwrap();

            assert!(
                load_descriptor(&stable_management(&settings).join("foo.json"))
                    .unwrap()
                    .is_none()
            );
            assert!(
                fs::read_link(stable_dir(&settings).join("foo-1.0-1-any.pkg.tar.zst")).is_err()
            );

            let db = read_database(
                fs::File::open(stable_dir(&settings).join("stable.db.tar.gz")).unwrap(),
            )
            .unwrap();
            assert!(db.is_empty());

            // Without collection the pool entry survives; garbage
            // collection reaps it.
            let pool_entry = pool_dir(&settings).join("foo-1.0-1-any.pkg.tar.zst");
            assert!(pool_entry.exists());

            let removed = engine.collect_garbage("core").await.unwrap();
            assert_eq!(removed, vec!["foo-1.0-1-any.pkg.tar.zst".to_string()]);
            assert!(!pool_entry.exists());
        });
    }

    #[test]
    fn name_conflicts_are_rejected() {
        block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let settings = test_settings(dir.path());
            let engine = RepositoryEngine::new(settings);

            let first = PackageArchiveBuilder::new("foo", "foo", "1.0-1", "any")
                .write_to(dir.path(), "foo-1.0-1-any.pkg.tar.zst");
            engine
                .add(add_request(vec![first], Layer::stable()))
                .await
                .unwrap();

            // Another pkgbase trying to provide the package name foo.
            let rogue = PackageArchiveBuilder::new("foo", "foo2", "2.0-1", "any")
                .write_to(dir.path(), "foo-2.0-1-any.pkg.tar.zst");

            assert!(matches!(
                engine.add(add_request(vec![rogue], Layer::stable())).await,
                Err(RepositoryError::NameConflict(name, base)) if name == "foo" && base == "foo"
            ));
        });
    }

    #[test]
    fn stability_waterfall_is_enforced() {
        block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let settings = test_settings(dir.path());
            let engine = RepositoryEngine::new(settings);

            let stable = PackageArchiveBuilder::new("foo", "foo", "2.0-1", "any")
                .write_to(dir.path(), "foo-2.0-1-any.pkg.tar.zst");
            engine
                .add(add_request(vec![stable], Layer::stable()))
                .await
                .unwrap();

            // Staging must stay ahead of stable.
            let stale = PackageArchiveBuilder::new("foo", "foo", "1.9-1", "any")
                .write_to(dir.path(), "foo-1.9-1-any.pkg.tar.zst");
            assert!(matches!(
                engine.add(add_request(vec![stale], Layer::staging())).await,
                Err(RepositoryError::VersionRegression { .. })
            ));

            let fresh = PackageArchiveBuilder::new("foo", "foo", "2.1-1", "any")
                .write_to(dir.path(), "foo-2.1-1-any.pkg.tar.zst");
            engine
                .add(add_request(vec![fresh], Layer::staging()))
                .await
                .unwrap();

            // Testing may not overtake staging.
            let overtaking = PackageArchiveBuilder::new("foo", "foo", "3.0-1", "any")
                .write_to(dir.path(), "foo-3.0-1-any.pkg.tar.zst");
            assert!(matches!(
                engine
                    .add(add_request(vec![overtaking], Layer::testing()))
                    .await,
                Err(RepositoryError::VersionRegression { .. })
            ));
        });
    }

    #[test]
    fn build_requirements_fail_closed() {
        block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let mut settings = test_settings(dir.path());
            settings.build_requirements_exist = true;
            let engine = RepositoryEngine::new(settings);

            let unsatisfied = PackageArchiveBuilder::new("foo", "foo", "1.0-1", "any")
                .pkginfo_line("depend = does-not-exist>=1.0")
                .write_to(dir.path(), "foo-1.0-1-any.pkg.tar.zst");

            assert!(matches!(
                engine
                    .add(add_request(vec![unsatisfied], Layer::stable()))
                    .await,
                Err(RepositoryError::MissingBuildRequirement(requirement))
                    if requirement == "does-not-exist>=1.0"
            ));

            // Satisfied from within the batch.
            let dependency = PackageArchiveBuilder::new("bar", "bar", "1.0-1", "any")
                .write_to(dir.path(), "bar-1.0-1-any.pkg.tar.zst");
            let dependent = PackageArchiveBuilder::new("foo", "foo", "1.0-1", "any")
                .pkginfo_line("depend = bar>=1.0")
                .write_to(dir.path(), "foo-1.0-1-any.pkg.tar.zst");

            engine
                .add(add_request(vec![dependency, dependent], Layer::stable()))
                .await
                .unwrap();
        });
    }

    #[test]
    fn signatures_are_placed_and_embedded() {
        block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let settings = test_settings(dir.path());
            let engine = RepositoryEngine::new(settings.clone());

            let archive = PackageArchiveBuilder::new("foo", "foo", "1.0-1", "any")
                .write_to(dir.path(), "foo-1.0-1-any.pkg.tar.zst");
            fs::write(
                dir.path().join("foo-1.0-1-any.pkg.tar.zst.sig"),
                b"signature bytes",
            )
            .unwrap();

            engine
                .add(add_request(vec![archive], Layer::stable()))
                .await
                .unwrap();

            assert!(pool_dir(&settings)
                .join("foo-1.0-1-any.pkg.tar.zst.sig")
                .exists());
            assert!(fs::read_link(
                stable_dir(&settings).join("foo-1.0-1-any.pkg.tar.zst.sig")
            )
            .is_ok());

            let descriptor = load_descriptor(&stable_management(&settings).join("foo.json"))
                .unwrap()
                .unwrap();
            assert_eq!(
                descriptor.packages[0].pgpsig.as_deref(),
                Some(base64::encode(b"signature bytes").as_str())
            );

            // The signature lands in the version 1 desc records.
            let db = read_database(
                fs::File::open(stable_dir(&settings).join("stable.db.tar.gz")).unwrap(),
            )
            .unwrap();
            assert!(db[0].desc.pgpsig.is_some());
        });
    }

    #[test]
    fn debug_packages_must_match_the_layer() {
        block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let settings = test_settings(dir.path());
            let engine = RepositoryEngine::new(settings);

            let debug = PackageArchiveBuilder::new("foo-debug", "foo", "1.0-1", "any")
                .pkginfo_line("xdata = pkgtype=debug")
                .write_to(dir.path(), "foo-debug-1.0-1-any.pkg.tar.zst");

            assert!(matches!(
                engine.add(add_request(vec![debug], Layer::stable())).await,
                Err(RepositoryError::LayerMismatch(_, _))
            ));
        });
    }

    #[test]
    fn reconcile_heals_the_layer() {
        block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let settings = test_settings(dir.path());
            let engine = RepositoryEngine::new(settings.clone());

            let archive = PackageArchiveBuilder::new("foo", "foo", "1.0-1", "any")
                .write_to(dir.path(), "foo-1.0-1-any.pkg.tar.zst");
            engine
                .add(add_request(vec![archive], Layer::stable()))
                .await
                .unwrap();

            // Sabotage: drop the real link, plant an orphan one.
            let link = stable_dir(&settings).join("foo-1.0-1-any.pkg.tar.zst");
            fs::remove_file(&link).unwrap();

            let orphan = stable_dir(&settings).join("ghost-1.0-1-any.pkg.tar.zst");
            std::os::unix::fs::symlink("../nowhere", &orphan).unwrap();

            let report = engine.reconcile("core").await.unwrap();
            assert_eq!(report.restored_links, vec![link.clone()]);
            assert_eq!(report.removed_links, vec![orphan.clone()]);

            assert!(fs::read_link(&link).is_ok());
            assert!(fs::read_link(&orphan).is_err());

            // A second pass has nothing to do.
            assert!(engine.reconcile("core").await.unwrap().is_clean());
        });
    }

    #[test]
    fn failed_apply_rolls_back_the_batch() {
        block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let settings = test_settings(dir.path());
            let engine = RepositoryEngine::new(settings.clone());

            // Pre-seed the pool so the second archive of the batch
            // collides mid-apply.
            let colliding = pool_dir(&settings).join("zzz-1.0-1-any.pkg.tar.zst");
            fs::create_dir_all(colliding.parent().unwrap()).unwrap();
            fs::write(&colliding, b"different content").unwrap();

            let clean = PackageArchiveBuilder::new("aaa", "aaa", "1.0-1", "any")
                .write_to(dir.path(), "aaa-1.0-1-any.pkg.tar.zst");
            let collides = PackageArchiveBuilder::new("zzz", "zzz", "1.0-1", "any")
                .write_to(dir.path(), "zzz-1.0-1-any.pkg.tar.zst");

            assert!(matches!(
                engine
                    .add(add_request(vec![clean, collides], Layer::stable()))
                    .await,
                Err(RepositoryError::PoolCollision(_))
            ));

            // The first archive's effects were rolled back and nothing
            // was published.
            assert!(!pool_dir(&settings)
                .join("aaa-1.0-1-any.pkg.tar.zst")
                .exists());
            assert!(
                load_descriptor(&stable_management(&settings).join("aaa.json"))
                    .unwrap()
                    .is_none()
            );
            assert!(!stable_dir(&settings).join("stable.db.tar.gz").exists());
            assert_eq!(fs::read(&colliding).unwrap(), b"different content");
        });
    }

    #[test]
    fn operations_respect_the_lock() {
        block_on(async {
            let dir = tempfile::tempdir().unwrap();
            let settings = test_settings(dir.path());
            let engine = RepositoryEngine::new(settings.clone());

            let repo = settings.repository("core").unwrap();
            let _held =
                RepositoryLock::acquire(&settings.lock_path(repo), Duration::ZERO).unwrap();

            let archive = PackageArchiveBuilder::new("foo", "foo", "1.0-1", "any")
                .write_to(dir.path(), "foo-1.0-1-any.pkg.tar.zst");

            assert!(matches!(
                engine.add(add_request(vec![archive], Layer::stable())).await,
                Err(RepositoryError::LockTimeout(_, _))
            ));
        });
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Configuration consumed by the repository core.

Configuration is TOML. Only the options the core reacts to are modeled
here; surface concerns like output formatting belong to the caller.

Load time validation enforces the path uniqueness rules: every resolved
layer directory (package side and management side) must be globally
unique and may not double as a pool or archive directory. Pool and
archive directories on the other hand may be shared between
repositories.
*/

use {
    crate::{
        arch::Architecture,
        error::{RepositoryError, Result},
        io::Compression,
        repository::{Layer, LayerRole},
        sync_db::{DescVersion, FilesVersion},
    },
    serde::Deserialize,
    std::{
        collections::HashMap,
        path::{Path, PathBuf},
        time::Duration,
    },
};

/// How package signatures are verified on add.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum PackageVerification {
    /// Accept unsigned packages; no `.sig` files expected.
    None,
    /// Require a detached signature and verify it with `pacman-key`.
    PacmanKey,
}

impl Default for PackageVerification {
    fn default() -> Self {
        Self::None
    }
}

/// Sync database schema versions to emit.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SyncDbSettings {
    #[serde(default = "default_desc_version")]
    pub desc_version: u32,
    #[serde(default = "default_files_version")]
    pub files_version: u32,
}

fn default_desc_version() -> u32 {
    1
}

fn default_files_version() -> u32 {
    1
}

impl SyncDbSettings {
    pub fn desc(&self) -> Result<DescVersion> {
        DescVersion::try_from(self.desc_version)
    }

    pub fn files(&self) -> Result<FilesVersion> {
        FilesVersion::try_from(self.files_version)
    }
}

/// Location of the management repository.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManagementRepoSettings {
    pub directory: PathBuf,
}

/// One package repository.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    pub name: String,
    /// Defaults to the global architecture when absent.
    pub architecture: Option<Architecture>,
    /// Directory name of the debug layer mirroring `stable`. Absent
    /// means the repository has no debug series.
    pub debug: Option<String>,
    /// Directory name of the staging layer. Absent disables it.
    pub staging: Option<String>,
    /// Directory name of the testing layer. Absent disables it.
    pub testing: Option<String>,
    pub staging_debug: Option<String>,
    pub testing_debug: Option<String>,
    /// Pool directory override; repositories may share one.
    pub package_pool: Option<PathBuf>,
    /// Source pool directory override; subject to the same sharing and
    /// collision rules as the package pool.
    pub source_pool: Option<PathBuf>,
    /// Directory holding archived packages, consulted by the build
    /// requirement check.
    pub archiving: Option<PathBuf>,
}

impl RepositoryConfig {
    /// The directory name of a layer, or `None` when the repository
    /// does not carry it.
    pub fn layer_name(&self, layer: Layer) -> Option<String> {
        match (layer.role, layer.debug) {
            (LayerRole::Stable, false) => Some("stable".to_string()),
            (LayerRole::Stable, true) => self.debug.clone(),
            (LayerRole::Testing, false) => self.testing.clone(),
            (LayerRole::Testing, true) => self.testing_debug.clone(),
            (LayerRole::Staging, false) => self.staging.clone(),
            (LayerRole::Staging, true) => self.staging_debug.clone(),
        }
    }

    /// Every layer this repository carries.
    pub fn layers(&self) -> Vec<Layer> {
        Layer::all()
            .into_iter()
            .filter(|layer| self.layer_name(*layer).is_some())
            .collect()
    }
}

/// The full configuration the core consumes.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub architecture: Architecture,
    #[serde(default)]
    pub database_compression: Compression,
    #[serde(default)]
    pub package_verification: PackageVerification,
    #[serde(default)]
    pub build_requirements_exist: bool,
    /// Seconds to wait for a repository lock. Zero fails fast.
    #[serde(default)]
    pub lock_timeout: u64,
    #[serde(default)]
    pub syncdb_settings: SyncDbSettings,
    pub management_repo: ManagementRepoSettings,
    /// Root of the data tree holding pools and repository directories.
    pub data_directory: PathBuf,
    #[serde(default)]
    pub repositories: Vec<RepositoryConfig>,
}

impl Settings {
    /// Parse and validate configuration text.
    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Self =
            toml::from_str(text).map_err(|e| RepositoryError::Config(e.to_string()))?;

        settings.validate()?;

        Ok(settings)
    }

    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RepositoryError::IoPath(path.display().to_string(), e))?;

        Self::from_toml(&text)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout)
    }

    /// Look up a repository by name.
    pub fn repository(&self, name: &str) -> Result<&RepositoryConfig> {
        self.repositories
            .iter()
            .find(|repo| repo.name == name)
            .ok_or_else(|| RepositoryError::UnknownRepository(name.to_string()))
    }

    /// The architecture a repository serves.
    pub fn repository_architecture(&self, repo: &RepositoryConfig) -> Architecture {
        repo.architecture.unwrap_or(self.architecture)
    }

    /// The pool directory of a repository.
    pub fn package_pool_dir(&self, repo: &RepositoryConfig) -> PathBuf {
        repo.package_pool.clone().unwrap_or_else(|| {
            self.data_directory
                .join("pool")
                .join("package")
                .join(&repo.name)
        })
    }

    /// The source pool directory of a repository.
    pub fn source_pool_dir(&self, repo: &RepositoryConfig) -> PathBuf {
        repo.source_pool.clone().unwrap_or_else(|| {
            self.data_directory
                .join("pool")
                .join("source")
                .join(&repo.name)
        })
    }

    /// The package side directory of one layer.
    pub fn layer_dir(&self, repo: &RepositoryConfig, layer: Layer) -> Option<PathBuf> {
        let name = repo.layer_name(layer)?;
        let arch = self.repository_architecture(repo);

        Some(
            self.data_directory
                .join("repo")
                .join("package")
                .join(&repo.name)
                .join(arch.as_str())
                .join(name),
        )
    }

    /// The management side directory of one layer.
    pub fn management_dir(&self, repo: &RepositoryConfig, layer: Layer) -> Option<PathBuf> {
        let name = repo.layer_name(layer)?;
        let arch = self.repository_architecture(repo);

        Some(
            self.management_repo
                .directory
                .join(&repo.name)
                .join(arch.as_str())
                .join(name),
        )
    }

    /// The advisory lock file of a repository, in the management root.
    pub fn lock_path(&self, repo: &RepositoryConfig) -> PathBuf {
        let arch = self.repository_architecture(repo);

        self.management_repo
            .directory
            .join(format!("{}-{}.lock", repo.name, arch))
    }

    fn validate(&self) -> Result<()> {
        if self.repositories.is_empty() {
            return Err(RepositoryError::Config(
                "no repositories configured".to_string(),
            ));
        }

        self.syncdb_settings.desc()?;
        self.syncdb_settings.files()?;

        let mut identities = std::collections::HashSet::new();
        // Resolved directory -> the role it serves, for uniqueness and
        // cross-purposing checks.
        let mut roles: HashMap<PathBuf, String> = HashMap::new();

        let mut claim = |path: PathBuf, role: String| -> Result<()> {
            if let Some(existing) = roles.get(&path) {
                return Err(RepositoryError::Config(format!(
                    "directory {} serves both {} and {}",
                    path.display(),
                    existing,
                    role
                )));
            }

            roles.insert(path, role);
            Ok(())
        };

        for repo in &self.repositories {
            let arch = self.repository_architecture(repo);

            if !identities.insert((repo.name.clone(), arch)) {
                return Err(RepositoryError::Config(format!(
                    "repository {} ({}) is defined twice",
                    repo.name, arch
                )));
            }

            for layer in repo.layers() {
                let layer_dir = self.layer_dir(repo, layer).expect("layer is configured");
                claim(
                    layer_dir,
                    format!("{} layer of {}", layer.describe(), repo.name),
                )?;

                let management_dir =
                    self.management_dir(repo, layer).expect("layer is configured");
                claim(
                    management_dir,
                    format!("{} management tree of {}", layer.describe(), repo.name),
                )?;
            }

            if repo.staging.is_none() && repo.staging_debug.is_some() {
                return Err(RepositoryError::Config(format!(
                    "repository {} has a staging debug layer but no staging layer",
                    repo.name
                )));
            }

            if repo.testing.is_none() && repo.testing_debug.is_some() {
                return Err(RepositoryError::Config(format!(
                    "repository {} has a testing debug layer but no testing layer",
                    repo.name
                )));
            }
        }

        // Pools and archives may be shared with each other but never
        // with a layer directory.
        for repo in &self.repositories {
            for dir in [
                Some(self.package_pool_dir(repo)),
                Some(self.source_pool_dir(repo)),
                repo.archiving.clone(),
            ]
            .into_iter()
            .flatten()
            {
                if let Some(role) = roles.get(&dir) {
                    return Err(RepositoryError::Config(format!(
                        "directory {} serves both {} and a pool or archive",
                        dir.display(),
                        role
                    )));
                }
            }
        }

        Ok(())
    }
}

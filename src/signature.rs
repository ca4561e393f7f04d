// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Detached signature verification.

Signature checking is pluggable: the engine talks to a
[SignatureVerifier] trait object and ships two strategies. `none`
accepts unsigned packages outright. `pacman-key` requires a detached
`.sig` next to each archive and delegates the actual cryptographic
check to the external `pacman-key --verify` command, bounded by a wall
clock budget.
*/

use {
    crate::{
        config::PackageVerification,
        error::{RepositoryError, Result},
    },
    async_trait::async_trait,
    std::{
        path::{Path, PathBuf},
        process::{Command, Stdio},
        time::{Duration, Instant},
    },
};

/// Verifies one package archive against its detached signature.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    /// Whether packages must carry a `.sig` file at all.
    fn requires_signature(&self) -> bool;

    /// Verify `package` against `signature`.
    ///
    /// Implementations fail with [RepositoryError::SignatureInvalid]
    /// when verification does not succeed, for whatever reason.
    async fn verify(&self, package: &Path, signature: &Path) -> Result<()>;
}

/// Accepts everything; used when `package_verification` is `none`.
pub struct AcceptAll;

#[async_trait]
impl SignatureVerifier for AcceptAll {
    fn requires_signature(&self) -> bool {
        false
    }

    async fn verify(&self, _package: &Path, _signature: &Path) -> Result<()> {
        Ok(())
    }
}

/// Verifies through the external `pacman-key --verify` command.
pub struct PacmanKeyVerifier {
    /// Wall clock budget for one verifier invocation.
    timeout: Duration,
}

impl PacmanKeyVerifier {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for PacmanKeyVerifier {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl SignatureVerifier for PacmanKeyVerifier {
    fn requires_signature(&self) -> bool {
        true
    }

    async fn verify(&self, package: &Path, signature: &Path) -> Result<()> {
        let package = package.to_path_buf();
        let signature = signature.to_path_buf();
        let timeout = self.timeout;

        async_std::task::spawn_blocking(move || {
            run_verifier_command(&package, &signature, timeout)
        })
        .await
    }
}

fn run_verifier_command(package: &Path, signature: &Path, timeout: Duration) -> Result<()> {
    let signature_name = signature.display().to_string();

    let mut child = Command::new("pacman-key")
        .arg("--verify")
        .arg(signature)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| RepositoryError::SignatureInvalid(signature_name.clone(), e.to_string()))?;

    let deadline = Instant::now() + timeout;

    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                return if status.success() {
                    log::debug!("verified signature for {}", package.display());
                    Ok(())
                } else {
                    Err(RepositoryError::SignatureInvalid(
                        signature_name,
                        format!("pacman-key exited with {}", status),
                    ))
                };
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();

                    return Err(RepositoryError::SignatureInvalid(
                        signature_name,
                        format!("verifier exceeded its {:?} budget", timeout),
                    ));
                }

                std::thread::sleep(Duration::from_millis(25));
            }
            Err(e) => {
                return Err(RepositoryError::SignatureInvalid(
                    signature_name,
                    e.to_string(),
                ));
            }
        }
    }
}

/// Resolve the configured verification policy to a verifier.
pub fn verifier_for(policy: PackageVerification) -> Box<dyn SignatureVerifier> {
    match policy {
        PackageVerification::None => Box::new(AcceptAll),
        PackageVerification::PacmanKey => Box::new(PacmanKeyVerifier::default()),
    }
}

/// The expected signature path for a package archive path.
pub fn signature_path(package: &Path) -> PathBuf {
    let mut name = package
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".sig");

    package.with_file_name(name)
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Repository identity and stability layers.

A repository is identified by name and architecture. It carries up to
three stability layers — `staging`, `testing` and `stable`, ordered by
increasing stability — and optionally a parallel debug series for each.
Packages enter at some layer and are moved towards `stable` as they
prove out, so less stable layers hold the newer versions of a pkgbase.

The engine lives in [engine]; the advisory locking protocol in [lock].
*/

pub mod engine;
pub mod lock;

use {
    crate::arch::Architecture,
    std::fmt::{Display, Formatter},
};

/// The stability rank of a layer, least stable first.
///
/// The derived order makes `Staging < Testing < Stable`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum LayerRole {
    Staging,
    Testing,
    Stable,
}

impl LayerRole {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Staging => "staging",
            Self::Testing => "testing",
            Self::Stable => "stable",
        }
    }
}

/// One stability layer of a repository, optionally of the debug series.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct Layer {
    pub role: LayerRole,
    pub debug: bool,
}

impl Layer {
    pub fn new(role: LayerRole, debug: bool) -> Self {
        Self { role, debug }
    }

    pub fn stable() -> Self {
        Self::new(LayerRole::Stable, false)
    }

    pub fn testing() -> Self {
        Self::new(LayerRole::Testing, false)
    }

    pub fn staging() -> Self {
        Self::new(LayerRole::Staging, false)
    }

    /// Every layer a repository can carry.
    pub fn all() -> Vec<Self> {
        vec![
            Self::new(LayerRole::Stable, false),
            Self::new(LayerRole::Stable, true),
            Self::new(LayerRole::Testing, false),
            Self::new(LayerRole::Testing, true),
            Self::new(LayerRole::Staging, false),
            Self::new(LayerRole::Staging, true),
        ]
    }

    /// The sibling layers of the same (debug or regular) series.
    pub fn siblings(&self) -> Vec<Self> {
        Self::all()
            .into_iter()
            .filter(|layer| layer.debug == self.debug && layer.role != self.role)
            .collect()
    }

    /// The debug counterpart of a regular layer and vice versa.
    pub fn counterpart(&self) -> Self {
        Self::new(self.role, !self.debug)
    }

    pub fn describe(&self) -> String {
        if self.debug {
            format!("{} (debug)", self.role.describe())
        } else {
            self.role.describe().to_string()
        }
    }
}

impl Display for Layer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

/// A repository identity: name plus architecture.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct RepositoryId {
    pub name: String,
    pub architecture: Architecture,
}

impl RepositoryId {
    pub fn new(name: impl ToString, architecture: Architecture) -> Self {
        Self {
            name: name.to_string(),
            architecture,
        }
    }
}

impl Display for RepositoryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.name, self.architecture)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn stability_order() {
        assert!(LayerRole::Staging < LayerRole::Testing);
        assert!(LayerRole::Testing < LayerRole::Stable);
    }

    #[test]
    fn siblings_stay_within_their_series() {
        let staging = Layer::staging();
        let siblings = staging.siblings();

        assert_eq!(siblings.len(), 2);
        assert!(siblings.iter().all(|layer| !layer.debug));

        let debug_testing = Layer::new(LayerRole::Testing, true);
        assert!(debug_testing.siblings().iter().all(|layer| layer.debug));
    }

    #[test]
    fn repository_ids_order_lexicographically() {
        let a = RepositoryId::new("core", Architecture::X86_64);
        let b = RepositoryId::new("extra", Architecture::Aarch64);

        assert!(a < b);
        assert_eq!(a.to_string(), "core-x86_64");
    }
}

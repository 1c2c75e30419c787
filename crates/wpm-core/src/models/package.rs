use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::models::{ManagerId, Source};

/// Version string reported by the engine when an installed version is not known.
pub const UNKNOWN_VERSION: &str = "Unknown";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize)]
pub struct PackageHash(pub u64);

impl Display for PackageHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl PackageHash {
    /// Each field is length-prefixed, so no separator character has to be
    /// reserved out of ids such as `ARP\Machine\X64\{GUID}`.
    fn of(fields: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for field in fields {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        Self(u64::from_le_bytes(prefix))
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize)]
pub enum PackageStatus {
    #[default]
    Default,
    AlreadyInstalled,
    IsUpgradable,
    Pinned,
    OnQueue,
    BeingProcessed,
    Failed,
}

impl PackageStatus {
    const ALL: [Self; 7] = [
        Self::Default,
        Self::AlreadyInstalled,
        Self::IsUpgradable,
        Self::Pinned,
        Self::OnQueue,
        Self::BeingProcessed,
        Self::Failed,
    ];

    fn to_bits(self) -> u8 {
        Self::ALL
            .iter()
            .position(|status| *status == self)
            .unwrap_or_default() as u8
    }

    fn from_bits(bits: u8) -> Self {
        Self::ALL.get(bits as usize).copied().unwrap_or_default()
    }
}

/// One discovered package. Identity fields never change after construction;
/// only the `checked` flag and the status tag are mutable, so a `Package` can
/// be shared behind an `Arc` by every cache view and UI collection.
#[derive(Debug)]
pub struct Package {
    name: String,
    id: String,
    version: String,
    new_version: String,
    source: Arc<Source>,
    manager: ManagerId,
    upgradable: bool,
    hash: PackageHash,
    versioned_hash: PackageHash,
    checked: AtomicBool,
    status: AtomicU8,
}

impl Package {
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        version: impl Into<String>,
        source: Arc<Source>,
        manager: ManagerId,
    ) -> Self {
        let id = id.into();
        let version = version.into();
        let hash = PackageHash::of(&[manager.name(), &source.name, &id]);
        let versioned_hash = PackageHash::of(&[manager.name(), &source.name, &id, &version]);

        Self {
            name: name.into(),
            id,
            version,
            new_version: String::new(),
            source,
            manager,
            upgradable: false,
            hash,
            versioned_hash,
            checked: AtomicBool::new(false),
            status: AtomicU8::new(PackageStatus::Default.to_bits()),
        }
    }

    /// Update listings act on every row by default, so upgradable packages
    /// start out checked.
    pub fn upgradable(
        name: impl Into<String>,
        id: impl Into<String>,
        installed_version: impl Into<String>,
        new_version: impl Into<String>,
        source: Arc<Source>,
        manager: ManagerId,
    ) -> Self {
        let mut package = Self::new(name, id, installed_version, source, manager);
        package.upgradable = true;
        package.new_version = new_version.into();
        package.checked = AtomicBool::new(true);
        package.status = AtomicU8::new(PackageStatus::IsUpgradable.to_bits());
        package
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn new_version(&self) -> &str {
        &self.new_version
    }

    pub fn source(&self) -> &Arc<Source> {
        &self.source
    }

    pub fn manager(&self) -> ManagerId {
        self.manager
    }

    pub fn is_upgradable(&self) -> bool {
        self.upgradable
    }

    /// Identifies the package slot regardless of version.
    pub fn hash(&self) -> PackageHash {
        self.hash
    }

    /// Identifies this exact observed state, version included.
    pub fn versioned_hash(&self) -> PackageHash {
        self.versioned_hash
    }

    pub fn is_equivalent_to(&self, other: &Package) -> bool {
        self.hash == other.hash
    }

    pub fn is_checked(&self) -> bool {
        self.checked.load(Ordering::Relaxed)
    }

    pub fn set_checked(&self, checked: bool) {
        self.checked.store(checked, Ordering::Relaxed);
    }

    pub fn status(&self) -> PackageStatus {
        PackageStatus::from_bits(self.status.load(Ordering::Relaxed))
    }

    pub fn set_status(&self, status: PackageStatus) {
        self.status.store(status.to_bits(), Ordering::Relaxed);
    }
}

/// Copies identity and a snapshot of the mutable flags; the copy does not
/// track later changes made through the original.
impl Clone for Package {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            id: self.id.clone(),
            version: self.version.clone(),
            new_version: self.new_version.clone(),
            source: Arc::clone(&self.source),
            manager: self.manager,
            upgradable: self.upgradable,
            hash: self.hash,
            versioned_hash: self.versioned_hash,
            checked: AtomicBool::new(self.is_checked()),
            status: AtomicU8::new(self.status().to_bits()),
        }
    }
}

impl PartialEq for Package {
    fn eq(&self, other: &Self) -> bool {
        self.versioned_hash == other.versioned_hash
    }
}

impl Eq for Package {}

impl Hash for Package {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.versioned_hash.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{Package, PackageHash, PackageStatus};
    use crate::models::{ManagerId, Source};

    fn winget() -> Arc<Source> {
        Arc::new(Source::new(
            ManagerId::WinGet,
            "winget",
            "https://cdn.winget.microsoft.com/cache",
        ))
    }

    #[test]
    fn hashes_are_stable_across_independent_construction() {
        let first = Package::new("Git", "Git.Git", "2.45.1", winget(), ManagerId::WinGet);
        let second = Package::new("Git", "Git.Git", "2.45.1", winget(), ManagerId::WinGet);

        assert_eq!(first.hash(), second.hash());
        assert_eq!(first.versioned_hash(), second.versioned_hash());
        assert_eq!(first, second);
    }

    #[test]
    fn version_only_changes_the_versioned_hash() {
        let old = Package::new("Git", "Git.Git", "2.44.0", winget(), ManagerId::WinGet);
        let new = Package::new("Git", "Git.Git", "2.45.1", winget(), ManagerId::WinGet);

        assert!(old.is_equivalent_to(&new));
        assert_ne!(old, new);
    }

    #[test]
    fn display_name_does_not_take_part_in_identity() {
        let first = Package::new("Git", "Git.Git", "2.45.1", winget(), ManagerId::WinGet);
        let renamed = Package::new("Git for Windows", "Git.Git", "2.45.1", winget(), ManagerId::WinGet);

        assert_eq!(first, renamed);
    }

    #[test]
    fn field_boundaries_cannot_be_shifted_between_source_and_id() {
        let left = PackageHash::of(&["Winget", "a\\b", "c"]);
        let right = PackageHash::of(&["Winget", "a", "b\\c"]);

        assert_ne!(left, right);
    }

    #[test]
    fn upgradable_packages_start_checked() {
        let package = Package::upgradable(
            "Git",
            "Git.Git",
            "2.44.0",
            "2.45.1",
            winget(),
            ManagerId::WinGet,
        );

        assert!(package.is_upgradable());
        assert!(package.is_checked());
        assert_eq!(package.new_version(), "2.45.1");
        assert_eq!(package.status(), PackageStatus::IsUpgradable);
    }

    #[test]
    fn status_tag_round_trips_through_atomic_storage() {
        let package = Package::new("Git", "Git.Git", "2.45.1", winget(), ManagerId::WinGet);
        assert_eq!(package.status(), PackageStatus::Default);

        package.set_status(PackageStatus::Pinned);
        assert_eq!(package.status(), PackageStatus::Pinned);
    }
}

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::models::{Package, PackageHash};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CacheView {
    /// Search results.
    Available,
    /// Update listings.
    Upgradable,
    /// Installed listings, keyed by versioned hash.
    Installed,
}

impl CacheView {
    pub fn key(self, package: &Package) -> PackageHash {
        match self {
            Self::Available | Self::Upgradable => package.hash(),
            Self::Installed => package.versioned_hash(),
        }
    }
}

/// Deduplicates [`Package`] construction per view so that repeated discovery
/// hands out the same shared instance.
#[derive(Debug, Default)]
pub struct PackageCache {
    available: DashMap<PackageHash, Arc<Package>>,
    upgradable: DashMap<PackageHash, Arc<Package>>,
    installed: DashMap<PackageHash, Arc<Package>>,
}

impl PackageCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn view(&self, view: CacheView) -> &DashMap<PackageHash, Arc<Package>> {
        match view {
            CacheView::Available => &self.available,
            CacheView::Upgradable => &self.upgradable,
            CacheView::Installed => &self.installed,
        }
    }

    /// Returns the cached instance for `candidate`'s key, inserting
    /// `candidate` only when the key is new.
    pub fn get_or_add(&self, view: CacheView, candidate: Package) -> Arc<Package> {
        match self.view(view).entry(view.key(&candidate)) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => Arc::clone(entry.insert(Arc::new(candidate)).value()),
        }
    }

    pub fn get(&self, view: CacheView, key: PackageHash) -> Option<Arc<Package>> {
        self.view(view)
            .get(&key)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// True when an installed entry for the same slot already carries the
    /// version `candidate` would upgrade to.
    pub fn newer_version_is_installed(&self, candidate: &Package) -> bool {
        self.installed.iter().any(|entry| {
            let installed = entry.value();
            installed.is_equivalent_to(candidate) && installed.version() == candidate.new_version()
        })
    }

    /// Installed entries for the slot identified by an unversioned hash.
    pub fn find_installed(&self, hash: PackageHash) -> Vec<Arc<Package>> {
        self.installed
            .iter()
            .filter(|entry| entry.value().hash() == hash)
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Drops the entry `package` occupies in `view`, e.g. once an operation
    /// replaced it with a newer state.
    pub fn retire(&self, view: CacheView, package: &Package) -> Option<Arc<Package>> {
        self.view(view)
            .remove(&view.key(package))
            .map(|(_, retired)| retired)
    }

    pub fn len(&self, view: CacheView) -> usize {
        self.view(view).len()
    }

    pub fn is_empty(&self, view: CacheView) -> bool {
        self.view(view).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{CacheView, PackageCache};
    use crate::models::{ManagerId, Package, Source};

    fn source() -> Arc<Source> {
        Arc::new(Source::new(
            ManagerId::WinGet,
            "winget",
            "https://cdn.winget.microsoft.com/cache",
        ))
    }

    fn package(version: &str) -> Package {
        Package::new("Git", "Git.Git", version, source(), ManagerId::WinGet)
    }

    #[test]
    fn repeated_discovery_returns_first_instance() {
        let cache = PackageCache::new();
        let first = cache.get_or_add(CacheView::Available, package("2.45.1"));
        let second = cache.get_or_add(CacheView::Available, package("2.45.1"));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(CacheView::Available), 1);
    }

    #[test]
    fn available_view_ignores_version_but_installed_view_does_not() {
        let cache = PackageCache::new();

        let old = cache.get_or_add(CacheView::Available, package("2.44.0"));
        let new = cache.get_or_add(CacheView::Available, package("2.45.1"));
        assert!(Arc::ptr_eq(&old, &new));
        assert_eq!(new.version(), "2.44.0");

        cache.get_or_add(CacheView::Installed, package("2.44.0"));
        cache.get_or_add(CacheView::Installed, package("2.45.1"));
        assert_eq!(cache.len(CacheView::Installed), 2);
        assert_eq!(cache.find_installed(old.hash()).len(), 2);
    }

    #[test]
    fn upgrade_is_suppressed_once_target_version_is_installed() {
        let cache = PackageCache::new();
        let candidate = Package::upgradable(
            "Git",
            "Git.Git",
            "1.0",
            "2.0",
            source(),
            ManagerId::WinGet,
        );
        assert!(!cache.newer_version_is_installed(&candidate));

        cache.get_or_add(CacheView::Installed, package("1.0"));
        assert!(!cache.newer_version_is_installed(&candidate));

        cache.get_or_add(CacheView::Installed, package("2.0"));
        assert!(cache.newer_version_is_installed(&candidate));
    }

    #[test]
    fn retire_removes_only_the_matching_entry() {
        let cache = PackageCache::new();
        let old = cache.get_or_add(CacheView::Installed, package("1.0"));
        cache.get_or_add(CacheView::Installed, package("2.0"));

        let retired = cache
            .retire(CacheView::Installed, &old)
            .expect("entry should be retired");
        assert!(Arc::ptr_eq(&retired, &old));
        assert_eq!(cache.len(CacheView::Installed), 1);
        assert!(cache.get(CacheView::Installed, old.versioned_hash()).is_none());
    }

    #[test]
    fn concurrent_discovery_of_one_package_keeps_a_single_instance() {
        let cache = PackageCache::new();

        let found: Vec<Arc<Package>> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..16)
                .map(|_| {
                    scope.spawn(|| {
                        (0..50)
                            .map(|_| cache.get_or_add(CacheView::Available, package("2.45.1")))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            workers
                .into_iter()
                .flat_map(|worker| worker.join().expect("worker panicked"))
                .collect()
        });

        assert_eq!(found.len(), 16 * 50);
        assert_eq!(cache.len(CacheView::Available), 1);
        assert!(found.iter().all(|package| Arc::ptr_eq(package, &found[0])));
    }

    #[test]
    fn concurrent_installed_versions_each_get_their_own_entry() {
        let cache = PackageCache::new();
        let versions = ["1.0", "1.1", "2.0", "2.1", "3.0"];

        let found: Vec<Arc<Package>> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..20)
                .map(|worker| {
                    let cache = &cache;
                    let version = versions[worker % versions.len()];
                    scope.spawn(move || cache.get_or_add(CacheView::Installed, package(version)))
                })
                .collect();
            workers
                .into_iter()
                .map(|worker| worker.join().expect("worker panicked"))
                .collect()
        });

        assert_eq!(cache.len(CacheView::Installed), versions.len());
        for version in versions {
            let same: Vec<_> = found
                .iter()
                .filter(|package| package.version() == version)
                .collect();
            assert_eq!(same.len(), 4);
            assert!(same.iter().all(|package| Arc::ptr_eq(package, same[0])));
        }
        assert_eq!(cache.find_installed(found[0].hash()).len(), versions.len());
    }
}

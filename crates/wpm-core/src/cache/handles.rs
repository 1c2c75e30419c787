use std::sync::Arc;

use dashmap::DashMap;

use crate::models::{Package, PackageHash};
use crate::native::{
    CatalogMetadata, CatalogPackage, ElevationRequirement, FindPackagesOptions, InstallOptions,
    InstallerInfo, InstallerScope, MatchOption, NativePackageManager, PackageMatchField,
    PackageVersionInfo,
};

/// Which version object an installer lookup resolves against.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum InstallerLookup {
    /// Default install version, for installs and updates.
    Install,
    /// Installed version, for uninstalls.
    Uninstall,
}

type InstallerKey = (PackageHash, InstallerScope);

/// Memoized native objects per package slot. Every lookup that misses goes
/// to the catalog service and blocks; callers run it off the async runtime.
#[derive(Default)]
pub struct NativeHandleCache {
    handles: DashMap<PackageHash, Arc<dyn CatalogPackage>>,
    metadata: DashMap<PackageHash, CatalogMetadata>,
    install_installers: DashMap<InstallerKey, InstallerInfo>,
    uninstall_installers: DashMap<InstallerKey, InstallerInfo>,
}

impl NativeHandleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a handle a discovery pass already holds, so it is never
    /// searched for again.
    pub fn register_handle(&self, package: &Package, handle: Arc<dyn CatalogPackage>) {
        self.handles.insert(package.hash(), handle);
    }

    pub fn cached_handle(&self, package: &Package) -> Option<Arc<dyn CatalogPackage>> {
        self.handles
            .get(&package.hash())
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn handle(
        &self,
        manager: &dyn NativePackageManager,
        package: &Package,
    ) -> Option<Arc<dyn CatalogPackage>> {
        if let Some(handle) = self.cached_handle(package) {
            return Some(handle);
        }

        let handle = find_on_catalog(manager, package)?;
        self.register_handle(package, Arc::clone(&handle));
        Some(handle)
    }

    pub fn metadata(
        &self,
        manager: &dyn NativePackageManager,
        package: &Package,
    ) -> Option<CatalogMetadata> {
        if let Some(metadata) = self.metadata.get(&package.hash()) {
            return Some(metadata.value().clone());
        }

        let handle = self.handle(manager, package)?;
        let metadata = handle
            .default_install_version()
            .and_then(|version| version.metadata())
            .or_else(|| {
                handle
                    .available_versions()
                    .first()
                    .and_then(|version| handle.version_info(version))
                    .and_then(|version| version.metadata())
            })
            .or_else(|| {
                handle
                    .installed_version()
                    .and_then(|version| version.metadata())
            })?;

        self.metadata.insert(package.hash(), metadata.clone());
        Some(metadata)
    }

    /// Applicable installer for `package`. A scoped request that matches no
    /// installer is retried once with unscoped options.
    pub fn installer(
        &self,
        manager: &dyn NativePackageManager,
        package: &Package,
        options: &InstallOptions,
        lookup: InstallerLookup,
    ) -> Option<InstallerInfo> {
        let cache = match lookup {
            InstallerLookup::Install => &self.install_installers,
            InstallerLookup::Uninstall => &self.uninstall_installers,
        };
        let key = (package.hash(), options.scope);
        if let Some(installer) = cache.get(&key) {
            return Some(installer.value().clone());
        }

        let handle = self.handle(manager, package)?;
        let version: Option<Arc<dyn PackageVersionInfo>> = match lookup {
            InstallerLookup::Install => handle.default_install_version(),
            InstallerLookup::Uninstall => handle.installed_version(),
        };
        let Some(version) = version else {
            tracing::warn!(
                package_id = package.id(),
                ?lookup,
                "native package has no version to resolve an installer against"
            );
            return None;
        };

        let installer = version.applicable_installer(options).or_else(|| {
            if !options.is_scoped() {
                return None;
            }
            tracing::debug!(
                package_id = package.id(),
                scope = ?options.scope,
                "no installer for requested scope, retrying unscoped"
            );
            version.applicable_installer(&InstallOptions::default())
        })?;

        cache.insert(key, installer.clone());
        Some(installer)
    }

    pub fn elevation_hint(
        &self,
        manager: &dyn NativePackageManager,
        package: &Package,
        options: &InstallOptions,
        lookup: InstallerLookup,
    ) -> Option<ElevationRequirement> {
        self.installer(manager, package, options, lookup)
            .map(|installer| installer.elevation)
            .filter(|elevation| *elevation != ElevationRequirement::Unknown)
    }

    /// Drops every cached object; they all belong to the old connection.
    pub fn clear(&self) {
        self.handles.clear();
        self.metadata.clear();
        self.install_installers.clear();
        self.uninstall_installers.clear();
    }

    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }
}

fn find_on_catalog(
    manager: &dyn NativePackageManager,
    package: &Package,
) -> Option<Arc<dyn CatalogPackage>> {
    let source = &package.source().name;
    let Some(catalog) = manager.catalog_by_name(source) else {
        tracing::warn!(
            package_id = package.id(),
            catalog = source.as_str(),
            "no catalog with this name, the package is probably local"
        );
        return None;
    };

    let connected = match catalog.connect(true) {
        Ok(connected) => connected,
        Err(error) => {
            tracing::warn!(
                package_id = package.id(),
                catalog = source.as_str(),
                error = %error,
                "failed to connect to catalog"
            );
            return None;
        }
    };

    let options = FindPackagesOptions::default()
        .filter(PackageMatchField::Id, MatchOption::Equals, package.id())
        .result_limit(1);

    match connected.find_packages(&options) {
        Ok(matches) => {
            let found = matches.into_iter().next();
            if found.is_none() {
                tracing::warn!(
                    package_id = package.id(),
                    catalog = source.as_str(),
                    "package not found in its catalog"
                );
            }
            found
        }
        Err(error) => {
            tracing::warn!(
                package_id = package.id(),
                catalog = source.as_str(),
                error = %error,
                "exact id search failed"
            );
            None
        }
    }
}

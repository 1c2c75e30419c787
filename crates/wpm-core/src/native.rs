//! Object-safe view of the WinGet native catalog API.
//!
//! Every method here is a blocking call into the package manager service.
//! The native engine only ever invokes them from `spawn_blocking`.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;

use crate::models::CoreResult;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum PackageMatchField {
    Id,
    Name,
    Moniker,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum MatchOption {
    Equals,
    ContainsCaseInsensitive,
    StartsWithCaseInsensitive,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum CompositeSearchBehavior {
    LocalCatalogs,
    RemotePackagesFromAllCatalogs,
    AllCatalogs,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct MatchFilter {
    pub field: PackageMatchField,
    pub option: MatchOption,
    pub value: String,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct FindPackagesOptions {
    pub filters: Vec<MatchFilter>,
    pub result_limit: Option<u32>,
}

impl FindPackagesOptions {
    pub fn filter(
        mut self,
        field: PackageMatchField,
        option: MatchOption,
        value: impl Into<String>,
    ) -> Self {
        self.filters.push(MatchFilter {
            field,
            option,
            value: value.into(),
        });
        self
    }

    pub fn result_limit(mut self, limit: u32) -> Self {
        self.result_limit = Some(limit);
        self
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct CatalogInfo {
    pub name: String,
    /// Source argument, normally the catalog URL.
    pub argument: String,
    pub last_update: Option<SystemTime>,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize)]
pub enum InstallerScope {
    #[default]
    Any,
    User,
    System,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize)]
pub enum ElevationRequirement {
    #[default]
    Unknown,
    ElevationRequired,
    ElevationProhibited,
    ElevatesSelf,
}

/// Options the installer lookup is resolved against.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize)]
pub struct InstallOptions {
    pub scope: InstallerScope,
}

impl InstallOptions {
    pub fn scoped(scope: InstallerScope) -> Self {
        Self { scope }
    }

    pub fn is_scoped(&self) -> bool {
        self.scope != InstallerScope::Any
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct InstallerInfo {
    pub installer_type: Option<String>,
    pub scope: InstallerScope,
    pub elevation: ElevationRequirement,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct CatalogMetadata {
    pub description: String,
    pub publisher: String,
    pub author: String,
    pub package_url: String,
    pub license: String,
    pub license_url: String,
    pub release_notes: String,
    pub release_notes_url: String,
    pub tags: Vec<String>,
}

pub trait PackageVersionInfo: Send + Sync + Debug {
    fn version(&self) -> String;

    /// Name of the catalog this version was found in, if any.
    fn catalog_name(&self) -> Option<String>;

    fn metadata(&self) -> Option<CatalogMetadata>;

    fn applicable_installer(&self, options: &InstallOptions) -> Option<InstallerInfo>;
}

pub trait CatalogPackage: Send + Sync + Debug {
    fn id(&self) -> String;

    fn name(&self) -> String;

    fn installed_version(&self) -> Option<Arc<dyn PackageVersionInfo>>;

    fn default_install_version(&self) -> Option<Arc<dyn PackageVersionInfo>>;

    /// Newest first.
    fn available_versions(&self) -> Vec<String>;

    fn version_info(&self, version: &str) -> Option<Arc<dyn PackageVersionInfo>>;

    fn is_update_available(&self) -> bool;
}

pub trait Catalog: Send + Sync {
    fn find_packages(&self, options: &FindPackagesOptions)
    -> CoreResult<Vec<Arc<dyn CatalogPackage>>>;
}

pub trait CatalogReference: Send + Sync {
    fn info(&self) -> CoreResult<CatalogInfo>;

    fn connect(&self, accept_source_agreements: bool) -> CoreResult<Arc<dyn Catalog>>;
}

pub trait NativePackageManager: Send + Sync {
    fn catalogs(&self) -> CoreResult<Vec<Arc<dyn CatalogReference>>>;

    fn catalog_by_name(&self, name: &str) -> Option<Arc<dyn CatalogReference>>;

    /// Merges every available catalog into one reference searched with the
    /// given behavior.
    fn composite_catalog(
        &self,
        behavior: CompositeSearchBehavior,
    ) -> CoreResult<Arc<dyn CatalogReference>>;
}

/// Creates (or recreates, after a service fault) the native manager object.
pub trait NativeConnector: Send + Sync {
    fn connect(&self) -> CoreResult<Arc<dyn NativePackageManager>>;
}

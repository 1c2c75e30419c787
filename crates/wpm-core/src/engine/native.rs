//! Discovery through the native catalog API. Catalog calls block, so each one
//! runs on the blocking pool; searches fan out one task per catalog and match
//! field.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use tokio::task::JoinSet;

use crate::cache::{CacheView, InstallerLookup, NativeHandleCache, TaskRecycler};
use crate::engine::command::{self, CommandRunner, LineControl, SHOW_TIMEOUT};
use crate::engine::{DiscoveryContext, DiscoveryEngine, EngineFuture};
use crate::models::details::set_if_present;
use crate::models::{
    CoreError, CoreErrorKind, CoreResult, EngineKind, ManagerAction, ManagerId, OperationLog,
    Package, PackageDetails, Source, TaskType, UNKNOWN_VERSION, manifest_url,
};
use crate::native::{
    Catalog, CatalogInfo, CatalogMetadata, CatalogPackage, CompositeSearchBehavior, ElevationRequirement,
    FindPackagesOptions, InstallOptions, InstallerInfo, MatchOption, NativeConnector,
    NativePackageManager, PackageMatchField,
};
use crate::parsing::DetailsScanner;

const SEARCH_FIELDS: [PackageMatchField; 3] = [
    PackageMatchField::Name,
    PackageMatchField::Id,
    PackageMatchField::Moniker,
];

const LOCAL_LISTING: &str = "local-catalogs";

type LocalListing = Arc<Vec<Arc<dyn CatalogPackage>>>;

enum SearchStep {
    Connected(CatalogInfo, Arc<dyn Catalog>),
    Searched(String, PackageMatchField, CoreResult<Vec<NativeRow>>),
}

/// Plain values read off a native package, so packages can be built without
/// touching the catalog service again.
struct NativeRow {
    name: String,
    id: String,
    version: String,
    new_version: Option<String>,
    catalog: Option<String>,
    handle: Arc<dyn CatalogPackage>,
}

pub struct NativeEngine {
    context: Arc<DiscoveryContext>,
    runner: Arc<CommandRunner>,
    connector: Arc<dyn NativeConnector>,
    manager: RwLock<Arc<dyn NativePackageManager>>,
    handles: Arc<NativeHandleCache>,
    local_listing: TaskRecycler<&'static str, CoreResult<LocalListing>>,
}

impl NativeEngine {
    /// Opens the first connection. Blocks; call it from the blocking pool.
    pub fn connect(
        context: Arc<DiscoveryContext>,
        runner: Arc<CommandRunner>,
        connector: Arc<dyn NativeConnector>,
    ) -> CoreResult<Self> {
        let manager = connector.connect()?;
        let ttl = context.config.installed_listing_ttl;
        Ok(Self {
            context,
            runner,
            connector,
            manager: RwLock::new(manager),
            handles: Arc::new(NativeHandleCache::new()),
            local_listing: TaskRecycler::new(ttl),
        })
    }

    pub fn handles(&self) -> &Arc<NativeHandleCache> {
        &self.handles
    }

    fn native(&self) -> CoreResult<Arc<dyn NativePackageManager>> {
        self.manager
            .read()
            .map(|manager| Arc::clone(&manager))
            .map_err(|_| internal("native package manager lock poisoned"))
    }

    async fn search(&self, query: &str) -> CoreResult<Vec<Arc<Package>>> {
        let query = query.trim().to_string();
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut log = OperationLog::new(ManagerId::WinGet, TaskType::FindPackages);
        log.info(format!("native search for '{query}'"));

        let native = self.native()?;
        let references = match blocking(move || native.catalogs()).await {
            Ok(references) => references,
            Err(error) => {
                log.error(format!("could not enumerate catalogs: {}", error.message));
                self.context.close_log(log, None);
                return Err(error);
            }
        };

        // A catalog's searches start as soon as that catalog connects.
        let mut tasks = JoinSet::new();
        for reference in references {
            tasks.spawn_blocking(move || {
                let info = reference.info()?;
                let catalog = reference.connect(true).map_err(|error| {
                    CoreError::catalog(format!("{}: {}", info.name, error.message))
                })?;
                Ok::<_, CoreError>(SearchStep::Connected(info, catalog))
            });
        }

        let mut rows = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(SearchStep::Connected(info, catalog))) => {
                    let name = self.register_catalog(info).name.clone();
                    for field in SEARCH_FIELDS {
                        let name = name.clone();
                        let catalog = Arc::clone(&catalog);
                        let options = FindPackagesOptions::default().filter(
                            field,
                            MatchOption::ContainsCaseInsensitive,
                            query.clone(),
                        );
                        tasks.spawn_blocking(move || {
                            let found = catalog.find_packages(&options).map(|matches| {
                                matches
                                    .into_iter()
                                    .map(|handle| available_row(handle, &name))
                                    .collect::<Vec<_>>()
                            });
                            Ok(SearchStep::Searched(name, field, found))
                        });
                    }
                }
                Ok(Ok(SearchStep::Searched(_, _, Ok(found)))) => rows.extend(found),
                Ok(Ok(SearchStep::Searched(name, field, Err(error)))) => {
                    log.warn(format!("{name}: search by {field:?} failed: {}", error.message));
                }
                Ok(Err(error)) => log.warn(format!("skipping catalog: {}", error.message)),
                Err(error) => log.warn(format!("catalog task failed: {error}")),
            }
        }

        let packages = self.collect(rows, CacheView::Available);
        log.info(format!("found {} packages", packages.len()));
        self.context.close_log(log, Some(0));
        Ok(packages)
    }

    /// Composite local listing shared by installed and update listings.
    async fn local_packages(&self) -> CoreResult<LocalListing> {
        let native = self.native()?;
        self.local_listing
            .run_or_attach_ok(LOCAL_LISTING, move || {
                blocking(move || {
                    let composite =
                        native.composite_catalog(CompositeSearchBehavior::LocalCatalogs)?;
                    let catalog = composite.connect(true).map_err(|error| {
                        CoreError::catalog(format!(
                            "failed to connect to the local composite catalog: {}",
                            error.message
                        ))
                    })?;
                    let options = FindPackagesOptions::default().filter(
                        PackageMatchField::Id,
                        MatchOption::StartsWithCaseInsensitive,
                        "",
                    );
                    Ok(Arc::new(catalog.find_packages(&options)?))
                })
            })
            .await
    }

    async fn installed(&self) -> CoreResult<Vec<Arc<Package>>> {
        let mut log = OperationLog::new(ManagerId::WinGet, TaskType::ListInstalledPackages);
        let listing = match self.local_packages().await {
            Ok(listing) => listing,
            Err(error) => {
                log.error(error.message.clone());
                self.context.close_log(log, None);
                return Err(error);
            }
        };
        if let Err(error) = self.register_catalogs(&mut log).await {
            log.warn(format!("could not enumerate catalogs: {}", error.message));
        }

        let rows = blocking(move || Ok(listing.iter().map(installed_row).collect::<Vec<_>>())).await?;
        let resolver = &self.context.resolver;
        let mut packages = Vec::new();
        for row in rows {
            // No available version means no catalog claims the install.
            let source = match &row.catalog {
                Some(name) => resolver.resolve_by_name(name),
                None => resolver.resolve_local(&row.id),
            };
            let package = Package::new(row.name, row.id, row.version, source, ManagerId::WinGet);
            let package = self.context.cache.get_or_add(CacheView::Installed, package);
            self.handles.register_handle(&package, row.handle);
            packages.push(package);
        }

        log.info(format!("listed {} installed packages", packages.len()));
        self.context.close_log(log, Some(0));
        Ok(packages)
    }

    async fn updates(&self) -> CoreResult<Vec<Arc<Package>>> {
        let mut log = OperationLog::new(ManagerId::WinGet, TaskType::ListUpdates);
        let listing = match self.local_packages().await {
            Ok(listing) => listing,
            Err(error) => {
                log.error(error.message.clone());
                self.context.close_log(log, None);
                return Err(error);
            }
        };
        if let Err(error) = self.register_catalogs(&mut log).await {
            log.warn(format!("could not enumerate catalogs: {}", error.message));
        }

        let rows = blocking(move || {
            Ok(listing
                .iter()
                .filter(|handle| handle.is_update_available())
                .map(upgradable_row)
                .collect::<Vec<_>>())
        })
        .await?;

        let resolver = &self.context.resolver;
        let mut packages = Vec::new();
        for row in rows {
            let source = match &row.catalog {
                Some(name) => resolver.resolve_by_name(name),
                None => resolver.default_source(),
            };
            let candidate = Package::upgradable(
                row.name,
                row.id,
                row.version,
                row.new_version.unwrap_or_default(),
                source,
                ManagerId::WinGet,
            );
            if self.context.upgrade_already_applied(&candidate) {
                log.info(format!(
                    "{} {} is already installed, not listing the update",
                    candidate.id(),
                    candidate.new_version()
                ));
                continue;
            }

            let package = self.context.cache.get_or_add(CacheView::Upgradable, candidate);
            self.handles.register_handle(&package, row.handle);
            packages.push(package);
        }

        log.info(format!("listed {} updates", packages.len()));
        self.context.close_log(log, Some(0));
        Ok(packages)
    }

    async fn sources(&self) -> CoreResult<Vec<Arc<Source>>> {
        let mut log = OperationLog::new(ManagerId::WinGet, TaskType::ListSources);
        match self.register_catalogs(&mut log).await {
            Ok(sources) => {
                self.context.close_log(log, Some(0));
                Ok(sources)
            }
            Err(error) => {
                log.error(error.message.clone());
                self.context.close_log(log, None);
                Err(error)
            }
        }
    }

    /// Registers every configured catalog as a source, so catalog names read
    /// off packages resolve to their own source instead of the default.
    async fn register_catalogs(&self, log: &mut OperationLog) -> CoreResult<Vec<Arc<Source>>> {
        let native = self.native()?;
        let infos = blocking(move || {
            Ok(native
                .catalogs()?
                .into_iter()
                .map(|reference| reference.info())
                .collect::<Vec<_>>())
        })
        .await?;

        let mut sources = Vec::new();
        for info in infos {
            match info {
                Ok(info) => sources.push(self.register_catalog(info)),
                Err(error) => log.warn(format!("could not read catalog info: {}", error.message)),
            }
        }
        Ok(sources)
    }

    fn register_catalog(&self, info: CatalogInfo) -> Arc<Source> {
        let source = Source::new(ManagerId::WinGet, info.name, info.argument)
            .update_date(info.last_update.unwrap_or_else(SystemTime::now));
        self.context.resolver.register(source)
    }

    async fn versions(&self, package: &Package) -> CoreResult<Vec<String>> {
        let mut log = OperationLog::new(ManagerId::WinGet, TaskType::LoadPackageVersions);
        let versions = match self.native() {
            Ok(native) => {
                let handles = Arc::clone(&self.handles);
                let package = package.clone();
                blocking(move || {
                    Ok(handles
                        .handle(native.as_ref(), &package)
                        .map(|handle| handle.available_versions()))
                })
                .await
            }
            Err(error) => Err(error),
        };

        let versions = match versions {
            Ok(Some(versions)) => versions,
            Ok(None) => {
                log.warn(format!("no native handle for {}", package.id()));
                Vec::new()
            }
            Err(error) => {
                log.warn(format!("could not load versions: {}", error.message));
                Vec::new()
            }
        };
        self.context.close_log(log, Some(0));
        Ok(versions)
    }

    async fn details(&self, package: &Package) -> CoreResult<PackageDetails> {
        let mut log = OperationLog::new(ManagerId::WinGet, TaskType::LoadPackageDetails);
        let mut details = PackageDetails {
            manifest_url: manifest_url(package),
            ..PackageDetails::default()
        };

        match self.metadata(package).await {
            Ok(Some(metadata)) => apply_metadata(&metadata, &mut details),
            Ok(None) => log.warn(format!("no native metadata for {}", package.id())),
            Err(error) => log.warn(format!("could not load native metadata: {}", error.message)),
        }

        // Installer url, hash, type and release date only show up in the CLI.
        let mut exit_code = None;
        if !package.source().is_virtual {
            let request = self.runner.request(
                TaskType::LoadPackageDetails,
                ManagerAction::FetchDetails,
                command::show_in_source_args(package),
                SHOW_TIMEOUT,
            );
            let mut scanner = DetailsScanner::installer_only();
            let streamed = self
                .runner
                .stream(request, &mut log, |line| {
                    scanner.push_line(line, &mut details);
                    LineControl::Continue
                })
                .await;
            match streamed {
                Ok(code) => exit_code = code,
                Err(error) => log.warn(format!(
                    "installer details unavailable: {}",
                    error.message
                )),
            }
        }

        self.context.close_log(log, exit_code);
        Ok(details)
    }

    async fn metadata(&self, package: &Package) -> CoreResult<Option<CatalogMetadata>> {
        let native = self.native()?;
        let handles = Arc::clone(&self.handles);
        let package = package.clone();
        blocking(move || Ok(handles.metadata(native.as_ref(), &package))).await
    }

    /// Installer the given options would pick for `package`, if any.
    pub async fn installer(
        &self,
        package: &Package,
        options: InstallOptions,
        lookup: InstallerLookup,
    ) -> CoreResult<Option<InstallerInfo>> {
        let native = self.native()?;
        let handles = Arc::clone(&self.handles);
        let package = package.clone();
        blocking(move || Ok(handles.installer(native.as_ref(), &package, &options, lookup))).await
    }

    pub async fn elevation_hint(
        &self,
        package: &Package,
        options: InstallOptions,
        lookup: InstallerLookup,
    ) -> CoreResult<Option<ElevationRequirement>> {
        let native = self.native()?;
        let handles = Arc::clone(&self.handles);
        let package = package.clone();
        blocking(move || {
            Ok(handles.elevation_hint(native.as_ref(), &package, &options, lookup))
        })
        .await
    }

    async fn reopen(&self) -> CoreResult<()> {
        let connector = Arc::clone(&self.connector);
        let fresh = blocking(move || connector.connect()).await?;

        {
            let mut manager = self
                .manager
                .write()
                .map_err(|_| internal("native package manager lock poisoned"))?;
            *manager = fresh;
        }
        self.handles.clear();
        self.local_listing.clear();
        tracing::info!(
            manager = ManagerId::WinGet.name(),
            "reconnected to the native catalog service"
        );
        Ok(())
    }

    /// Builds packages from native rows, registering each handle and keeping
    /// one entry per package slot.
    fn collect(&self, rows: Vec<NativeRow>, view: CacheView) -> Vec<Arc<Package>> {
        let mut seen = HashSet::new();
        let mut packages = Vec::new();
        for row in rows {
            let source = match &row.catalog {
                Some(name) => self.context.resolver.resolve_by_name(name),
                None => self.context.resolver.default_source(),
            };
            let package = Package::new(row.name, row.id, row.version, source, ManagerId::WinGet);
            let package = self.context.cache.get_or_add(view, package);
            if seen.insert(view.key(&package)) {
                self.handles.register_handle(&package, row.handle);
                packages.push(package);
            }
        }
        packages
    }
}

impl DiscoveryEngine for NativeEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Native
    }

    fn find_packages<'a>(&'a self, query: &'a str) -> EngineFuture<'a, Vec<Arc<Package>>> {
        Box::pin(self.search(query))
    }

    fn list_installed(&self) -> EngineFuture<'_, Vec<Arc<Package>>> {
        Box::pin(self.installed())
    }

    fn list_available_updates(&self) -> EngineFuture<'_, Vec<Arc<Package>>> {
        Box::pin(self.updates())
    }

    fn list_sources(&self) -> EngineFuture<'_, Vec<Arc<Source>>> {
        Box::pin(self.sources())
    }

    fn installable_versions<'a>(&'a self, package: &'a Package) -> EngineFuture<'a, Vec<String>> {
        Box::pin(self.versions(package))
    }

    fn fetch_details<'a>(&'a self, package: &'a Package) -> EngineFuture<'a, PackageDetails> {
        Box::pin(self.details(package))
    }

    fn reconnect(&self) -> EngineFuture<'_, ()> {
        Box::pin(self.reopen())
    }
}

async fn blocking<T, F>(task: F) -> CoreResult<T>
where
    F: FnOnce() -> CoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|error| internal(format!("native catalog task failed: {error}")))?
}

fn internal(message: impl Into<String>) -> CoreError {
    CoreError::new(CoreErrorKind::Internal, message).manager(ManagerId::WinGet)
}

fn available_row(handle: Arc<dyn CatalogPackage>, catalog: &str) -> NativeRow {
    NativeRow {
        name: handle.name(),
        id: handle.id(),
        version: handle
            .default_install_version()
            .map(|version| version.version())
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string()),
        new_version: None,
        catalog: Some(catalog.to_string()),
        handle,
    }
}

fn installed_row(handle: &Arc<dyn CatalogPackage>) -> NativeRow {
    let catalog = handle
        .available_versions()
        .first()
        .and_then(|version| handle.version_info(version))
        .and_then(|version| version.catalog_name());
    NativeRow {
        name: handle.name(),
        id: handle.id(),
        version: handle
            .installed_version()
            .map(|version| version.version())
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string()),
        new_version: None,
        catalog,
        handle: Arc::clone(handle),
    }
}

fn upgradable_row(handle: &Arc<dyn CatalogPackage>) -> NativeRow {
    let default = handle.default_install_version();
    NativeRow {
        name: handle.name(),
        id: handle.id(),
        version: handle
            .installed_version()
            .map(|version| version.version())
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string()),
        new_version: default.as_ref().map(|version| version.version()),
        catalog: default.and_then(|version| version.catalog_name()),
        handle: Arc::clone(handle),
    }
}

fn apply_metadata(metadata: &CatalogMetadata, details: &mut PackageDetails) {
    set_if_present(&mut details.description, &metadata.description);
    set_if_present(&mut details.publisher, &metadata.publisher);
    set_if_present(&mut details.author, &metadata.author);
    set_if_present(&mut details.homepage_url, &metadata.package_url);
    set_if_present(&mut details.license, &metadata.license);
    set_if_present(&mut details.license_url, &metadata.license_url);
    set_if_present(&mut details.release_notes, &metadata.release_notes);
    set_if_present(&mut details.release_notes_url, &metadata.release_notes_url);
    if !metadata.tags.is_empty() {
        details.tags = metadata.tags.clone();
    }
}

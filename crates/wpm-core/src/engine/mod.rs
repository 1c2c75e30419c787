pub mod cli;
pub mod command;
pub mod native;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;

use crate::cache::PackageCache;
use crate::config::DiscoveryConfig;
use crate::execution::OperationLogStore;
use crate::models::{CoreResult, EngineKind, OperationLog, Package, PackageDetails, Source};
use crate::sources::SourceResolver;

pub use cli::CliEngine;
pub use command::{CommandRunner, LineControl, package_selector};
pub use native::NativeEngine;

pub type EngineFuture<'a, T> = Pin<Box<dyn Future<Output = CoreResult<T>> + Send + 'a>>;

/// State both engines share. One instance per manager; nothing here is
/// process-global.
pub struct DiscoveryContext {
    pub cache: PackageCache,
    pub resolver: SourceResolver,
    pub logs: OperationLogStore,
    pub config: DiscoveryConfig,
    applied_upgrades: DashMap<String, String>,
}

impl DiscoveryContext {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            cache: PackageCache::new(),
            resolver: SourceResolver::winget(),
            logs: OperationLogStore::new(),
            config,
            applied_upgrades: DashMap::new(),
        }
    }

    /// Remembers that the update `package` lists was installed, so later
    /// update listings stop offering it.
    pub fn mark_upgrade_applied(&self, package: &Package) {
        if package.is_upgradable() {
            self.applied_upgrades
                .insert(package.id().to_string(), package.new_version().to_string());
        }
    }

    /// An update is hidden when it was applied in this session, or when the
    /// installed view already holds the target version. The second check only
    /// sees installed listings that completed before this call.
    pub fn upgrade_already_applied(&self, candidate: &Package) -> bool {
        let applied = self
            .applied_upgrades
            .get(candidate.id())
            .is_some_and(|version| version.value() == candidate.new_version());
        applied || self.cache.newer_version_is_installed(candidate)
    }

    pub fn close_log(&self, log: OperationLog, exit_code: Option<i32>) -> u64 {
        self.logs.record(log.finish(exit_code))
    }
}

/// One way of talking to WinGet. The manager picks exactly one at load time.
pub trait DiscoveryEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    fn find_packages<'a>(&'a self, query: &'a str) -> EngineFuture<'a, Vec<Arc<Package>>>;

    fn list_installed(&self) -> EngineFuture<'_, Vec<Arc<Package>>>;

    fn list_available_updates(&self) -> EngineFuture<'_, Vec<Arc<Package>>>;

    fn list_sources(&self) -> EngineFuture<'_, Vec<Arc<Source>>>;

    /// Never fails for an unknown package; the list is just empty.
    fn installable_versions<'a>(&'a self, package: &'a Package) -> EngineFuture<'a, Vec<String>>;

    fn fetch_details<'a>(&'a self, package: &'a Package) -> EngineFuture<'a, PackageDetails>;

    /// Drops state tied to the current connection to the package manager.
    fn reconnect(&self) -> EngineFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

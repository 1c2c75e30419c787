use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::cache::{CacheView, InstallerLookup};
use crate::config::DiscoveryConfig;
use crate::engine::command::{self, DETECT_TIMEOUT, REFRESH_TIMEOUT};
use crate::engine::{CliEngine, CommandRunner, DiscoveryContext, DiscoveryEngine, NativeEngine};
use crate::execution::ProcessExecutor;
use crate::models::{
    CoreError, CoreResult, EngineKind, ManagerAction, ManagerId, ManagerStatus, OperationLog,
    OperationLogRecord, Package, PackageDetails, Source, TaskType,
};
use crate::native::{ElevationRequirement, InstallOptions, NativeConnector};

const WINGET_BINARY: &str = "winget";

/// Entry point for WinGet discovery. Picks one engine at load time and
/// forwards every discovery call to it. When no engine could be set up, every
/// call succeeds with an empty result and [`ManagerStatus::packages_ever_loaded`]
/// stays false.
pub struct WinGetManager {
    context: Arc<DiscoveryContext>,
    status: ManagerStatus,
    runner: Option<Arc<CommandRunner>>,
    engine: Option<Arc<dyn DiscoveryEngine>>,
    native: Option<Arc<NativeEngine>>,
    packages_loaded: AtomicBool,
}

impl WinGetManager {
    pub async fn load(
        config: DiscoveryConfig,
        executor: Arc<dyn ProcessExecutor>,
        connector: Option<Arc<dyn NativeConnector>>,
    ) -> Self {
        let context = Arc::new(DiscoveryContext::new(config));
        let mut status = ManagerStatus::default();

        let Some(executable) = locate_executable(&context.config) else {
            tracing::warn!(
                manager = ManagerId::WinGet.name(),
                "winget executable not found, discovery is unavailable"
            );
            return Self::assemble(context, status, None, None, None);
        };
        status.found = true;
        status.executable_path = Some(executable.clone());

        let runner = Arc::new(CommandRunner::new(executor, executable, &context.config));
        status.version = detect_version(&runner, &context).await;

        let native = match connector {
            Some(connector) if !context.config.force_cli_engine => {
                connect_native(Arc::clone(&context), Arc::clone(&runner), connector).await
            }
            Some(_) => {
                tracing::info!(
                    manager = ManagerId::WinGet.name(),
                    "native engine disabled by configuration"
                );
                None
            }
            None => None,
        };

        let engine: Option<Arc<dyn DiscoveryEngine>> = match &native {
            Some(native) => Some(Arc::clone(native) as Arc<dyn DiscoveryEngine>),
            None if status.version.is_some() => Some(Arc::new(CliEngine::new(
                Arc::clone(&context),
                Arc::clone(&runner),
            ))),
            None => {
                tracing::warn!(
                    manager = ManagerId::WinGet.name(),
                    "neither the native nor the CLI engine could be initialized"
                );
                None
            }
        };
        status.engine = engine.as_ref().map(|engine| engine.kind());
        if let Some(kind) = status.engine {
            tracing::info!(
                manager = ManagerId::WinGet.name(),
                engine = ?kind,
                version = status.version.as_deref().unwrap_or("unknown"),
                "winget discovery ready"
            );
        }

        Self::assemble(context, status, Some(runner), engine, native)
    }

    fn assemble(
        context: Arc<DiscoveryContext>,
        status: ManagerStatus,
        runner: Option<Arc<CommandRunner>>,
        engine: Option<Arc<dyn DiscoveryEngine>>,
        native: Option<Arc<NativeEngine>>,
    ) -> Self {
        Self {
            context,
            status,
            runner,
            engine,
            native,
            packages_loaded: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> ManagerStatus {
        ManagerStatus {
            packages_ever_loaded: self.packages_loaded.load(Ordering::Relaxed),
            ..self.status.clone()
        }
    }

    pub fn engine_kind(&self) -> Option<EngineKind> {
        self.status.engine
    }

    pub fn context(&self) -> &Arc<DiscoveryContext> {
        &self.context
    }

    pub async fn find_packages(&self, query: &str) -> CoreResult<Vec<Arc<Package>>> {
        let Some(engine) = &self.engine else {
            return Ok(Vec::new());
        };
        let packages = engine
            .find_packages(query)
            .await
            .map_err(|error| rephrase(error, TaskType::FindPackages, ManagerAction::Search))?;
        self.packages_loaded.store(true, Ordering::Relaxed);
        Ok(packages)
    }

    pub async fn list_installed(&self) -> CoreResult<Vec<Arc<Package>>> {
        let Some(engine) = &self.engine else {
            return Ok(Vec::new());
        };
        let packages = engine.list_installed().await.map_err(|error| {
            rephrase(
                error,
                TaskType::ListInstalledPackages,
                ManagerAction::ListInstalled,
            )
        })?;
        self.packages_loaded.store(true, Ordering::Relaxed);
        Ok(packages)
    }

    /// Updates already applied in this session, or whose target version the
    /// last installed listing reported, are left out. Run
    /// [`WinGetManager::list_installed`] first for the second filter to see
    /// current data.
    pub async fn list_available_updates(&self) -> CoreResult<Vec<Arc<Package>>> {
        let Some(engine) = &self.engine else {
            return Ok(Vec::new());
        };
        let packages = engine
            .list_available_updates()
            .await
            .map_err(|error| rephrase(error, TaskType::ListUpdates, ManagerAction::ListOutdated))?;
        self.packages_loaded.store(true, Ordering::Relaxed);
        Ok(packages)
    }

    pub async fn list_sources(&self) -> CoreResult<Vec<Arc<Source>>> {
        let Some(engine) = &self.engine else {
            return Ok(Vec::new());
        };
        engine
            .list_sources()
            .await
            .map_err(|error| rephrase(error, TaskType::ListSources, ManagerAction::ListSources))
    }

    pub async fn installable_versions(&self, package: &Package) -> CoreResult<Vec<String>> {
        let Some(engine) = &self.engine else {
            return Ok(Vec::new());
        };
        engine.installable_versions(package).await.map_err(|error| {
            rephrase(
                error,
                TaskType::LoadPackageVersions,
                ManagerAction::ListVersions,
            )
        })
    }

    pub async fn fetch_details(&self, package: &Package) -> CoreResult<PackageDetails> {
        let Some(engine) = &self.engine else {
            return Ok(PackageDetails::default());
        };
        engine.fetch_details(package).await.map_err(|error| {
            rephrase(
                error,
                TaskType::LoadPackageDetails,
                ManagerAction::FetchDetails,
            )
        })
    }

    /// `source update` through the CLI, whichever engine is active.
    pub async fn refresh_indexes(&self) -> CoreResult<()> {
        let (Some(runner), Some(_)) = (&self.runner, &self.engine) else {
            return Ok(());
        };

        let mut log = OperationLog::new(ManagerId::WinGet, TaskType::RefreshIndexes);
        let request = runner.request(
            TaskType::RefreshIndexes,
            ManagerAction::RefreshIndexes,
            command::source_update_args(),
            REFRESH_TIMEOUT,
        );
        match runner.capture(request, &mut log).await {
            Ok((_, exit_code)) => {
                self.context.close_log(log, exit_code);
                Ok(())
            }
            Err(error) => {
                log.error(error.message.clone());
                self.context.close_log(log, None);
                Err(rephrase(
                    error,
                    TaskType::RefreshIndexes,
                    ManagerAction::RefreshIndexes,
                ))
            }
        }
    }

    /// Called by the operation layer once `package`'s update was installed.
    pub fn mark_upgrade_applied(&self, package: &Package) {
        self.context.mark_upgrade_applied(package);
        self.context.cache.retire(CacheView::Upgradable, package);
    }

    /// Installer elevation needs, known only with the native engine.
    pub async fn elevation_hint(
        &self,
        package: &Package,
        options: InstallOptions,
        lookup: InstallerLookup,
    ) -> Option<ElevationRequirement> {
        let native = self.native.as_ref()?;
        match native.elevation_hint(package, options, lookup).await {
            Ok(hint) => hint,
            Err(error) => {
                tracing::warn!(
                    package_id = package.id(),
                    error = %error,
                    "could not resolve installer elevation"
                );
                None
            }
        }
    }

    /// Re-creates the native connection after a service fault.
    pub async fn reconnect(&self) -> CoreResult<()> {
        let Some(engine) = &self.engine else {
            return Ok(());
        };
        engine.reconnect().await
    }

    /// Closed operation logs, oldest first.
    pub fn logs(&self) -> Vec<OperationLogRecord> {
        self.context.logs.snapshot()
    }
}

fn locate_executable(config: &DiscoveryConfig) -> Option<PathBuf> {
    if let Some(path) = &config.executable {
        return Some(path.clone());
    }
    which::which(WINGET_BINARY).ok()
}

async fn detect_version(runner: &CommandRunner, context: &DiscoveryContext) -> Option<String> {
    let mut log = OperationLog::new(ManagerId::WinGet, TaskType::Detection);
    let request = runner.local_request(
        TaskType::Detection,
        ManagerAction::Detect,
        ["--version"],
        DETECT_TIMEOUT,
    );

    match runner.capture(request, &mut log).await {
        Ok((lines, Some(0))) => {
            let version = lines
                .iter()
                .map(|line| line.trim())
                .find(|line| !line.is_empty())
                .map(|line| line.trim_start_matches('v').to_string());
            context.close_log(log, Some(0));
            version
        }
        Ok((_, exit_code)) => {
            log.warn(format!("winget --version exited with {exit_code:?}"));
            context.close_log(log, exit_code);
            None
        }
        Err(error) => {
            log.warn(format!("could not run winget: {}", error.message));
            context.close_log(log, None);
            None
        }
    }
}

async fn connect_native(
    context: Arc<DiscoveryContext>,
    runner: Arc<CommandRunner>,
    connector: Arc<dyn NativeConnector>,
) -> Option<Arc<NativeEngine>> {
    let connected =
        tokio::task::spawn_blocking(move || NativeEngine::connect(context, runner, connector))
            .await;

    match connected {
        Ok(Ok(engine)) => Some(Arc::new(engine)),
        Ok(Err(error)) => {
            tracing::warn!(
                manager = ManagerId::WinGet.name(),
                error = %error,
                "native engine unavailable, falling back to the CLI"
            );
            None
        }
        Err(error) => {
            tracing::warn!(
                manager = ManagerId::WinGet.name(),
                error = %error,
                "native engine setup failed, falling back to the CLI"
            );
            None
        }
    }
}

/// Failures reach callers phrased by the operation they asked for; the cause
/// goes to the log.
fn rephrase(error: CoreError, task: TaskType, action: ManagerAction) -> CoreError {
    tracing::error!(
        manager = ManagerId::WinGet.name(),
        task_type = task.as_str(),
        error = %error,
        "{}",
        action.failure_phrase()
    );
    CoreError::new(error.kind, action.failure_phrase()).attribute(ManagerId::WinGet, task, action)
}

//! Discovery through the `winget` executable: every call spawns one process
//! and parses its stdout as it arrives.

use std::sync::Arc;

use crate::cache::CacheView;
use crate::config::DEFAULT_LOCALE;
use crate::engine::command::{
    self, CommandRunner, LIST_TIMEOUT, LineControl, SEARCH_TIMEOUT, SHOW_TIMEOUT,
};
use crate::engine::{DiscoveryContext, DiscoveryEngine, EngineFuture};
use crate::models::{
    CoreResult, EngineKind, ManagerAction, ManagerId, OperationLog, Package, PackageDetails,
    Source, TaskType, manifest_url,
};
use crate::parsing::{
    DetailsScanner, ListingParser, TableKind, TableParser, TableRow, TableRowError,
    is_locale_failure, parse_source_row,
};

pub struct CliEngine {
    context: Arc<DiscoveryContext>,
    runner: Arc<CommandRunner>,
}

impl CliEngine {
    pub fn new(context: Arc<DiscoveryContext>, runner: Arc<CommandRunner>) -> Self {
        Self { context, runner }
    }

    /// Streams one table-producing command through a [`TableParser`].
    async fn table(
        &self,
        kind: TableKind,
        task_type: TaskType,
        action: ManagerAction,
        args: Vec<String>,
        timeout: std::time::Duration,
    ) -> CoreResult<Vec<TableRow>> {
        let mut log = OperationLog::new(ManagerId::WinGet, task_type);
        let request = self.runner.request(task_type, action, args, timeout);

        let mut parser = TableParser::new(kind);
        let mut rows = Vec::new();
        let mut rejected = Vec::new();
        let streamed = self
            .runner
            .stream(request, &mut log, |line| {
                match parser.push_line(line) {
                    Ok(Some(row)) => rows.push(row),
                    Ok(None) => {}
                    Err(error) => rejected.push(error),
                }
                LineControl::Continue
            })
            .await;

        for error in rejected {
            match error {
                TableRowError::Banner(line) => {
                    tracing::debug!(line = line.as_str(), "skipped banner line");
                }
                other => log.warn(format!("skipped malformed row: {other}")),
            }
        }

        match streamed {
            Ok(exit_code) => {
                log.info(format!("parsed {} rows", rows.len()));
                self.context.close_log(log, exit_code);
                Ok(rows)
            }
            Err(error) => {
                log.error(error.message.clone());
                self.context.close_log(log, None);
                Err(error)
            }
        }
    }

    async fn search(&self, query: &str) -> CoreResult<Vec<Arc<Package>>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let rows = self
            .table(
                TableKind::Search,
                TaskType::FindPackages,
                ManagerAction::Search,
                command::search_args(query.trim()),
                SEARCH_TIMEOUT,
            )
            .await?;

        let resolver = &self.context.resolver;
        Ok(rows
            .into_iter()
            .map(|row| {
                let source = match &row.source {
                    Some(name) => resolver.resolve_by_name(name),
                    None => resolver.default_source(),
                };
                let package = Package::new(row.name, row.id, row.version, source, ManagerId::WinGet);
                self.context.cache.get_or_add(CacheView::Available, package)
            })
            .collect())
    }

    async fn installed(&self) -> CoreResult<Vec<Arc<Package>>> {
        let rows = self
            .table(
                TableKind::Installed,
                TaskType::ListInstalledPackages,
                ManagerAction::ListInstalled,
                command::list_args(),
                LIST_TIMEOUT,
            )
            .await?;

        let resolver = &self.context.resolver;
        Ok(rows
            .into_iter()
            .map(|row| {
                // Installs no catalog claims are listed without a source.
                let source = match &row.source {
                    Some(name) => resolver.resolve_by_name(name),
                    None => resolver.resolve_local(&row.id),
                };
                let package = Package::new(row.name, row.id, row.version, source, ManagerId::WinGet);
                self.context.cache.get_or_add(CacheView::Installed, package)
            })
            .collect())
    }

    async fn updates(&self) -> CoreResult<Vec<Arc<Package>>> {
        let rows = self
            .table(
                TableKind::Updates,
                TaskType::ListUpdates,
                ManagerAction::ListOutdated,
                command::update_args(),
                LIST_TIMEOUT,
            )
            .await?;

        let resolver = &self.context.resolver;
        let mut packages = Vec::new();
        for row in rows {
            let source = match &row.source {
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
                tracing::debug!(
                    package_id = candidate.id(),
                    new_version = candidate.new_version(),
                    "update already applied, not listing it"
                );
                continue;
            }
            packages.push(self.context.cache.get_or_add(CacheView::Upgradable, candidate));
        }
        Ok(packages)
    }

    async fn sources(&self) -> CoreResult<Vec<Arc<Source>>> {
        let mut log = OperationLog::new(ManagerId::WinGet, TaskType::ListSources);
        let request = self.runner.request(
            TaskType::ListSources,
            ManagerAction::ListSources,
            command::source_list_args(),
            SEARCH_TIMEOUT,
        );

        let mut parser = ListingParser::new();
        let mut rows = Vec::new();
        let mut skipped = 0usize;
        let exit_code = self
            .runner
            .stream(request, &mut log, |line| {
                if let Some(row) = parser.push_line(line) {
                    match parse_source_row(row) {
                        Some(source) => rows.push(source),
                        None => skipped += 1,
                    }
                }
                LineControl::Continue
            })
            .await;

        let exit_code = match exit_code {
            Ok(exit_code) => exit_code,
            Err(error) => {
                log.error(error.message.clone());
                self.context.close_log(log, None);
                return Err(error);
            }
        };
        if skipped > 0 {
            log.warn(format!("skipped {skipped} source rows without a url"));
        }
        self.context.close_log(log, exit_code);

        Ok(rows
            .into_iter()
            .map(|row| {
                self.context
                    .resolver
                    .register(Source::new(ManagerId::WinGet, row.name, row.url))
            })
            .collect())
    }

    async fn versions(&self, package: &Package) -> CoreResult<Vec<String>> {
        let mut log = OperationLog::new(ManagerId::WinGet, TaskType::LoadPackageVersions);
        let request = self.runner.request(
            TaskType::LoadPackageVersions,
            ManagerAction::ListVersions,
            command::versions_args(package),
            SHOW_TIMEOUT,
        );

        let mut parser = ListingParser::new();
        let mut versions = Vec::new();
        let streamed = self
            .runner
            .stream(request, &mut log, |line| {
                if let Some(version) = parser.push_line(line) {
                    versions.push(version.to_string());
                }
                LineControl::Continue
            })
            .await;

        match streamed {
            Ok(exit_code) => {
                self.context.close_log(log, exit_code);
                Ok(versions)
            }
            Err(error) => {
                log.error(error.message.clone());
                self.context.close_log(log, None);
                Err(error)
            }
        }
    }

    /// Locales tried in order: the configured one, the fixed fallback, then
    /// whatever winget picks by itself. The fallback is tried even when it is
    /// also the configured locale, so a failing `en-US` lookup is retried once
    /// before winget chooses.
    fn locale_attempts(&self) -> Vec<Option<String>> {
        vec![
            Some(self.context.config.effective_locale().to_string()),
            Some(DEFAULT_LOCALE.to_string()),
            None,
        ]
    }

    async fn details(&self, package: &Package) -> CoreResult<PackageDetails> {
        let mut log = OperationLog::new(ManagerId::WinGet, TaskType::LoadPackageDetails);
        let mut details = PackageDetails::default();
        let mut last_exit = None;
        let mut resolved = false;

        for locale in self.locale_attempts() {
            let request = self.runner.request(
                TaskType::LoadPackageDetails,
                ManagerAction::FetchDetails,
                command::show_args(package, locale.as_deref()),
                SHOW_TIMEOUT,
            );

            // Every attempt starts from scratch; nothing a failed locale
            // printed is kept.
            let mut attempt = PackageDetails::default();
            let mut scanner = DetailsScanner::new();
            let mut locale_failed = false;
            let streamed = self
                .runner
                .stream(request, &mut log, |line| {
                    if is_locale_failure(line) {
                        locale_failed = true;
                        return LineControl::Stop;
                    }
                    scanner.push_line(line, &mut attempt);
                    LineControl::Continue
                })
                .await;

            match streamed {
                Ok(exit_code) => last_exit = exit_code,
                Err(error) => {
                    log.error(error.message.clone());
                    self.context.close_log(log, None);
                    return Err(error);
                }
            }

            if locale_failed {
                log.warn(format!(
                    "no manifest data for locale {}, retrying",
                    locale.as_deref().unwrap_or("default")
                ));
                continue;
            }

            details = attempt;
            resolved = true;
            break;
        }

        if !resolved {
            log.warn("winget returned no details in any locale");
        }
        details.manifest_url = manifest_url(package);
        self.context.close_log(log, last_exit);
        Ok(details)
    }
}

impl DiscoveryEngine for CliEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Cli
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
}

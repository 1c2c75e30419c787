//! wpm - WinGet package discovery from the command line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use wpm_core::config::ProxyConfig;
use wpm_core::execution::TokioProcessExecutor;
use wpm_core::models::{CoreResult, ManagerId, Package, UNKNOWN_VERSION};
use wpm_core::{DiscoveryConfig, WinGetManager};

#[derive(Parser)]
#[command(name = "wpm", version, about = "Discover WinGet packages and print them as JSON")]
struct Cli {
    /// Parse CLI output even when the native catalog API is available
    #[arg(long, global = true)]
    force_cli: bool,

    /// Path to the winget executable
    #[arg(long, global = true, env = "WPM_WINGET_PATH")]
    winget_path: Option<PathBuf>,

    /// Proxy URL passed to winget
    #[arg(long, global = true, env = "WPM_PROXY")]
    proxy: Option<String>,

    /// Locale for package details
    #[arg(long, global = true, env = "WPM_LOCALE")]
    locale: Option<String>,

    /// Print the operation logs collected while the command ran
    #[arg(long, global = true)]
    show_logs: bool,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Search every configured source
    Search { query: String },
    /// List installed packages
    List,
    /// List available updates
    Updates,
    /// List configured sources
    Sources,
    /// List installable versions of a package
    Versions(PackageArgs),
    /// Show package details
    Show(PackageArgs),
    /// Update source indexes
    Refresh,
    /// Print the detected manager status
    Status,
}

#[derive(clap::Args)]
struct PackageArgs {
    id: String,

    /// Source the package comes from
    #[arg(long, default_value = "winget")]
    source: String,
}

#[derive(Serialize)]
struct PackageView<'a> {
    name: &'a str,
    id: &'a str,
    version: &'a str,
    #[serde(skip_serializing_if = "is_blank")]
    new_version: &'a str,
    source: &'a str,
    hash: String,
}

fn is_blank(value: &&str) -> bool {
    value.is_empty()
}

impl<'a> From<&'a Package> for PackageView<'a> {
    fn from(package: &'a Package) -> Self {
        Self {
            name: package.name(),
            id: package.id(),
            version: package.version(),
            new_version: package.new_version(),
            source: &package.source().name,
            hash: package.hash().to_string(),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if cli.verbose { "wpm=debug" } else { "wpm=info" })
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            eprintln!("error: failed to create async runtime: {error}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {}", error.message);
            ExitCode::FAILURE
        }
    }
}

fn config_from(cli: &Cli) -> DiscoveryConfig {
    let mut config = DiscoveryConfig::from_env();
    config.force_cli_engine |= cli.force_cli;
    if let Some(path) = &cli.winget_path {
        config.executable = Some(path.clone());
    }
    if let Some(url) = &cli.proxy {
        config.proxy = Some(ProxyConfig {
            url: url.clone(),
            requires_auth: config.proxy.as_ref().is_some_and(|proxy| proxy.requires_auth),
        });
    }
    if let Some(locale) = &cli.locale {
        config.locale = Some(locale.clone());
    }
    config
}

async fn run(cli: Cli) -> CoreResult<()> {
    let config = config_from(&cli);
    let manager = WinGetManager::load(config, Arc::new(TokioProcessExecutor), None).await;
    tracing::debug!(engine = ?manager.engine_kind(), "manager loaded");

    match &cli.command {
        Command::Search { query } => print_packages(&manager.find_packages(query).await?),
        Command::List => print_packages(&manager.list_installed().await?),
        Command::Updates => {
            // The installed listing feeds the already-installed filter.
            manager.list_installed().await?;
            print_packages(&manager.list_available_updates().await?)
        }
        Command::Sources => {
            let sources = manager.list_sources().await?;
            let sources: Vec<_> = sources.iter().map(|source| source.as_ref()).collect();
            print_json(&sources)
        }
        Command::Versions(args) => {
            let package = lookup_package(&manager, args);
            print_json(&manager.installable_versions(&package).await?)
        }
        Command::Show(args) => {
            let package = lookup_package(&manager, args);
            print_json(&manager.fetch_details(&package).await?)
        }
        Command::Refresh => manager.refresh_indexes().await?,
        Command::Status => print_json(&manager.status()),
    }

    if cli.show_logs {
        print_json(&manager.logs());
    }
    Ok(())
}

fn lookup_package(manager: &WinGetManager, args: &PackageArgs) -> Package {
    let source = manager.context().resolver.resolve_by_name(&args.source);
    Package::new(&args.id, &args.id, UNKNOWN_VERSION, source, ManagerId::WinGet)
}

fn print_packages(packages: &[Arc<Package>]) {
    let views: Vec<PackageView<'_>> = packages
        .iter()
        .map(|package| PackageView::from(package.as_ref()))
        .collect();
    print_json(&views);
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(error) => eprintln!("error: failed to encode output: {error}"),
    }
}

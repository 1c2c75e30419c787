use std::path::PathBuf;

use serde::Serialize;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum ManagerId {
    WinGet,
}

impl ManagerId {
    /// Stable name that takes part in package identity hashes.
    pub fn name(self) -> &'static str {
        match self {
            Self::WinGet => "Winget",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Self::WinGet => "WinGet",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum ManagerAction {
    Detect,
    RefreshIndexes,
    Search,
    ListInstalled,
    ListOutdated,
    ListSources,
    ListVersions,
    FetchDetails,
}

impl ManagerAction {
    /// User-facing phrasing of a failed discovery call.
    pub fn failure_phrase(self) -> &'static str {
        match self {
            Self::Detect => "could not detect the package manager",
            Self::RefreshIndexes => "could not refresh package indexes",
            Self::Search => "could not search for packages",
            Self::ListInstalled => "could not list installed packages",
            Self::ListOutdated => "could not list available updates",
            Self::ListSources => "could not list package sources",
            Self::ListVersions => "could not list installable versions",
            Self::FetchDetails => "could not load package details",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum EngineKind {
    Native,
    Cli,
}

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ManagerStatus {
    pub found: bool,
    pub executable_path: Option<PathBuf>,
    pub version: Option<String>,
    pub engine: Option<EngineKind>,
    pub packages_ever_loaded: bool,
}

impl ManagerStatus {
    pub fn is_ready(&self) -> bool {
        self.engine.is_some()
    }
}

use serde::Serialize;

/// Kind of discovery work an operation log or error is attributed to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum TaskType {
    Detection,
    RefreshIndexes,
    FindPackages,
    ListInstalledPackages,
    ListUpdates,
    ListSources,
    LoadPackageVersions,
    LoadPackageDetails,
    OtherTask,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Detection => "detection",
            Self::RefreshIndexes => "refresh_indexes",
            Self::FindPackages => "find_packages",
            Self::ListInstalledPackages => "list_installed_packages",
            Self::ListUpdates => "list_updates",
            Self::ListSources => "list_sources",
            Self::LoadPackageVersions => "load_package_versions",
            Self::LoadPackageDetails => "load_package_details",
            Self::OtherTask => "other_task",
        }
    }
}

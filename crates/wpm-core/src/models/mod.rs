pub mod details;
pub mod error;
pub mod manager;
pub mod package;
pub mod source;
pub mod task;
pub mod task_log;

pub use details::{PackageDetails, manifest_url};
pub use error::{CoreError, CoreErrorKind, CoreResult};
pub use manager::{EngineKind, ManagerAction, ManagerId, ManagerStatus};
pub use package::{Package, PackageHash, PackageStatus, UNKNOWN_VERSION};
pub use source::{LOCAL_SOURCE_URL, Source};
pub use task::TaskType;
pub use task_log::{OperationLog, OperationLogRecord, TaskLogLevel, TaskLogNote};
